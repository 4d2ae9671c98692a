use shared::domain::QuestionId;
use thiserror::Error;

use crate::flow::FlowState;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("survey not found")]
    NotFound,
    #[error("server rejected request ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid response body: {0}")]
    Decode(String),
    #[error("invalid server url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl ClientError {
    /// Whether retrying the same request could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Transport(_) => true,
            ClientError::Api { status, .. } => *status >= 500,
            ClientError::NotFound | ClientError::Decode(_) | ClientError::InvalidUrl(_) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowError {
    #[error("cannot {action} from {from:?}")]
    InvalidTransition {
        from: FlowState,
        action: &'static str,
    },
    #[error("question {0} requires an answer")]
    AnswerRequired(QuestionId),
    #[error("question {0} is not the question being shown")]
    NotCurrentQuestion(QuestionId),
    #[error("a submission is already in flight")]
    SubmitInFlight,
}
