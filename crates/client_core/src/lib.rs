//! Participant-side survey client: the question-by-question flow and the
//! HTTP calls behind it.

pub mod api;
pub mod error;
pub mod flow;
pub mod session;

pub use api::{HttpSurveyApi, SurveyApi};
pub use error::{ClientError, FlowError};
pub use flow::{FlowState, ParticipantFlow, SubmitPlan};
pub use session::SurveySession;

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;
