use std::sync::Arc;

use shared::domain::SurveyId;
use tokio::{
    runtime::Handle,
    sync::{Mutex, MutexGuard},
};
use tracing::warn;

use crate::{
    api::SurveyApi,
    error::{ClientError, FlowError},
    flow::{FlowState, ParticipantFlow, SubmitPlan},
};

/// A [`ParticipantFlow`] shared between a UI and the network.
///
/// The flow lock is never held across a network call.
#[derive(Clone)]
pub struct SurveySession {
    flow: Arc<Mutex<ParticipantFlow>>,
    api: Arc<dyn SurveyApi>,
}

impl SurveySession {
    pub fn new(flow: ParticipantFlow, api: Arc<dyn SurveyApi>) -> Self {
        Self {
            flow: Arc::new(Mutex::new(flow)),
            api,
        }
    }

    /// Fetches the survey once. A missing survey yields a session stuck in
    /// [`FlowState::NotFound`]; any other failure is returned.
    pub async fn load(api: Arc<dyn SurveyApi>, survey_id: SurveyId) -> Result<Self, ClientError> {
        let flow = match api.fetch_survey(survey_id).await {
            Ok(survey) => ParticipantFlow::new(survey),
            Err(ClientError::NotFound) => {
                warn!(survey_id = survey_id.0, "survey not found");
                ParticipantFlow::not_found(survey_id)
            }
            Err(error) => return Err(error),
        };
        Ok(Self::new(flow, api))
    }

    pub async fn flow(&self) -> MutexGuard<'_, ParticipantFlow> {
        self.flow.lock().await
    }

    pub async fn state(&self) -> FlowState {
        self.flow.lock().await.state()
    }

    /// Submits the collected answers. Dropping the returned future before it
    /// completes releases the in-flight guard, leaving the flow in `Review`.
    pub async fn submit(&self) -> Result<FlowState, FlowError> {
        let (survey_id, request, attempt) = {
            let mut flow = self.flow.lock().await;
            match flow.begin_submit()? {
                SubmitPlan::Finished => return Ok(flow.state()),
                SubmitPlan::Send(request) => (flow.survey_id(), request, flow.submit_attempt()),
            }
        };
        let mut pending = PendingSubmit {
            flow: Arc::clone(&self.flow),
            attempt,
            armed: true,
        };

        let result = self.api.submit_response(survey_id, &request).await;
        let mut flow = self.flow.lock().await;
        pending.armed = false;
        flow.finish_submit(result)
    }
}

/// Abandons a submit attempt whose future was dropped before its outcome
/// reached the flow.
struct PendingSubmit {
    flow: Arc<Mutex<ParticipantFlow>>,
    attempt: u64,
    armed: bool,
}

impl Drop for PendingSubmit {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let attempt = self.attempt;
        match self.flow.try_lock() {
            Ok(mut flow) => {
                flow.abandon_submit(attempt);
            }
            Err(_) => match Handle::try_current() {
                Ok(handle) => {
                    let flow = Arc::clone(&self.flow);
                    handle.spawn(async move {
                        flow.lock().await.abandon_submit(attempt);
                    });
                }
                Err(_) => warn!(attempt, "no runtime to release abandoned submit"),
            },
        }
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
