use std::collections::HashMap;

use chrono::Utc;
use shared::{
    domain::{AnswerValue, QuestionId, ResponseId, SurveyId},
    protocol::{AnswerInput, QuestionView, SubmitResponseRequest, SubmittedResponse, SurveyView},
};
use tracing::{debug, info, warn};

use crate::{
    api::SurveyApi,
    error::{ClientError, FlowError},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Start,
    Question(usize),
    Review,
    Done,
    /// The survey could not be loaded. Terminal.
    NotFound,
}

/// What the caller has to do after [`ParticipantFlow::begin_submit`].
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitPlan {
    /// Send this payload, then hand the outcome to
    /// [`ParticipantFlow::finish_submit`].
    Send(SubmitResponseRequest),
    /// Nothing to send; the flow is already `Done`.
    Finished,
}

/// One participant's walk through a survey.
///
/// Answers live only in memory until submit. Every operation either
/// performs its transition or returns an error and leaves the flow as it was.
#[derive(Debug, Clone)]
pub struct ParticipantFlow {
    survey_id: SurveyId,
    survey: Option<SurveyView>,
    state: FlowState,
    answers: HashMap<QuestionId, AnswerValue>,
    validation_message: Option<String>,
    submit_error: Option<String>,
    submit_in_flight: bool,
    submit_attempt: u64,
    response_id: Option<ResponseId>,
}

impl ParticipantFlow {
    pub fn new(survey: SurveyView) -> Self {
        let skip_cover = survey.cover.skip;
        let mut flow = Self {
            survey_id: survey.id,
            survey: Some(survey),
            state: FlowState::Start,
            answers: HashMap::new(),
            validation_message: None,
            submit_error: None,
            submit_in_flight: false,
            submit_attempt: 0,
            response_id: None,
        };
        if skip_cover {
            flow.state = flow.begin_target();
        }
        flow
    }

    pub fn not_found(survey_id: SurveyId) -> Self {
        Self {
            survey_id,
            survey: None,
            state: FlowState::NotFound,
            answers: HashMap::new(),
            validation_message: None,
            submit_error: None,
            submit_in_flight: false,
            submit_attempt: 0,
            response_id: None,
        }
    }

    pub fn survey_id(&self) -> SurveyId {
        self.survey_id
    }

    pub fn survey(&self) -> Option<&SurveyView> {
        self.survey.as_ref()
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    pub fn questions(&self) -> &[QuestionView] {
        self.survey
            .as_ref()
            .map_or(&[][..], |survey| survey.questions.as_slice())
    }

    pub fn question_count(&self) -> usize {
        self.questions().len()
    }

    pub fn current_question(&self) -> Option<&QuestionView> {
        match self.state {
            FlowState::Question(index) => self.questions().get(index),
            _ => None,
        }
    }

    pub fn answer(&self, question_id: QuestionId) -> Option<&AnswerValue> {
        self.answers.get(&question_id)
    }

    pub fn answers(&self) -> &HashMap<QuestionId, AnswerValue> {
        &self.answers
    }

    /// Why the last `next` was refused, until the next successful move.
    pub fn validation_message(&self) -> Option<&str> {
        self.validation_message.as_deref()
    }

    pub fn submit_error(&self) -> Option<&str> {
        self.submit_error.as_deref()
    }

    pub fn response_id(&self) -> Option<ResponseId> {
        self.response_id
    }

    pub fn is_submitting(&self) -> bool {
        self.submit_in_flight
    }

    /// Increments on every `begin_submit` that produces a payload.
    pub fn submit_attempt(&self) -> u64 {
        self.submit_attempt
    }

    pub fn begin(&mut self) -> Result<FlowState, FlowError> {
        self.require(FlowState::Start, "begin")?;
        self.move_to(self.begin_target());
        Ok(self.state)
    }

    /// Answers the question currently shown. Any other id is refused.
    pub fn set_answer(
        &mut self,
        question_id: QuestionId,
        value: impl Into<AnswerValue>,
    ) -> Result<(), FlowError> {
        self.require_current_question(question_id, "set answer")?;
        self.answers.insert(question_id, value.into());
        self.validation_message = None;
        Ok(())
    }

    pub fn clear_answer(&mut self, question_id: QuestionId) -> Result<(), FlowError> {
        self.require_current_question(question_id, "clear answer")?;
        self.answers.remove(&question_id);
        Ok(())
    }

    /// Advances past the current question, unless it is required and still
    /// unanswered.
    pub fn next(&mut self) -> Result<FlowState, FlowError> {
        let index = self.require_question_state("next")?;
        let Some(question) = self.questions().get(index) else {
            return Err(self.invalid("next"));
        };

        if question.required && self.is_unanswered(question.id) {
            let question_id = question.id;
            let message = format!("\"{}\" requires an answer", question.content);
            debug!(question_id = question_id.0, "required gate blocked next");
            self.validation_message = Some(message);
            return Err(FlowError::AnswerRequired(question_id));
        }

        let target = if index + 1 < self.question_count() {
            FlowState::Question(index + 1)
        } else {
            FlowState::Review
        };
        self.move_to(target);
        Ok(self.state)
    }

    pub fn previous(&mut self) -> Result<FlowState, FlowError> {
        let index = self.require_question_state("previous")?;
        let target = match index {
            0 => FlowState::Start,
            i => FlowState::Question(i - 1),
        };
        self.move_to(target);
        Ok(self.state)
    }

    pub fn edit(&mut self, index: usize) -> Result<FlowState, FlowError> {
        if self.submit_in_flight {
            return Err(FlowError::SubmitInFlight);
        }
        self.require(FlowState::Review, "edit")?;
        if index >= self.question_count() {
            return Err(self.invalid("edit"));
        }
        self.move_to(FlowState::Question(index));
        Ok(self.state)
    }

    /// Guards against re-entry and builds the ordered payload: one entry per
    /// question in survey order, unanswered questions carrying `""`.
    pub fn begin_submit(&mut self) -> Result<SubmitPlan, FlowError> {
        if self.submit_in_flight {
            return Err(FlowError::SubmitInFlight);
        }
        self.require(FlowState::Review, "submit")?;

        if self.question_count() == 0 {
            self.move_to(FlowState::Done);
            return Ok(SubmitPlan::Finished);
        }

        let answers = self
            .questions()
            .iter()
            .map(|question| {
                let value = self
                    .answers
                    .get(&question.id)
                    .cloned()
                    .unwrap_or_else(|| AnswerValue::from(""));
                AnswerInput::new(question.id, value)
            })
            .collect();

        self.submit_in_flight = true;
        self.submit_attempt += 1;
        self.submit_error = None;
        Ok(SubmitPlan::Send(SubmitResponseRequest {
            answers,
            submitted_at: Some(Utc::now()),
        }))
    }

    pub fn finish_submit(
        &mut self,
        result: Result<SubmittedResponse, ClientError>,
    ) -> Result<FlowState, FlowError> {
        if !self.submit_in_flight {
            return Err(self.invalid("finish submit"));
        }
        self.submit_in_flight = false;

        match result {
            Ok(submitted) => {
                info!(
                    survey_id = self.survey_id.0,
                    response_id = submitted.response_id.0,
                    answer_count = submitted.answer_count,
                    "survey submitted"
                );
                self.response_id = Some(submitted.response_id);
                self.move_to(FlowState::Done);
            }
            Err(error) => {
                warn!(survey_id = self.survey_id.0, %error, "survey submission failed");
                self.submit_error = Some(error.to_string());
            }
        }
        Ok(self.state)
    }

    /// Releases the in-flight guard of `attempt` when its outcome will never
    /// arrive. The flow stays in `Review` so the participant can submit
    /// again. Returns `false` if that attempt is no longer outstanding.
    pub fn abandon_submit(&mut self, attempt: u64) -> bool {
        if !self.submit_in_flight || self.submit_attempt != attempt {
            return false;
        }
        self.submit_in_flight = false;
        self.submit_error = Some("submission interrupted".to_string());
        warn!(survey_id = self.survey_id.0, attempt, "survey submission abandoned");
        true
    }

    /// Runs a whole submit against `api`. Use a
    /// [`SurveySession`](crate::SurveySession) when the flow is shared.
    pub async fn submit(&mut self, api: &dyn SurveyApi) -> Result<FlowState, FlowError> {
        match self.begin_submit()? {
            SubmitPlan::Finished => Ok(self.state),
            SubmitPlan::Send(request) => {
                let result = api.submit_response(self.survey_id, &request).await;
                self.finish_submit(result)
            }
        }
    }

    pub fn restart(&mut self) -> Result<FlowState, FlowError> {
        self.require(FlowState::Done, "restart")?;
        self.answers.clear();
        self.submit_error = None;
        self.response_id = None;
        self.move_to(FlowState::Start);
        Ok(self.state)
    }

    fn begin_target(&self) -> FlowState {
        if self.question_count() == 0 {
            FlowState::Review
        } else {
            FlowState::Question(0)
        }
    }

    fn is_unanswered(&self, question_id: QuestionId) -> bool {
        self.answers
            .get(&question_id)
            .map_or(true, AnswerValue::is_blank)
    }

    fn move_to(&mut self, target: FlowState) {
        debug!(from = ?self.state, to = ?target, "flow transition");
        self.state = target;
        self.validation_message = None;
    }

    fn require(&self, expected: FlowState, action: &'static str) -> Result<(), FlowError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(self.invalid(action))
        }
    }

    fn require_current_question(
        &self,
        question_id: QuestionId,
        action: &'static str,
    ) -> Result<(), FlowError> {
        self.require_question_state(action)?;
        match self.current_question() {
            Some(question) if question.id == question_id => Ok(()),
            _ => Err(FlowError::NotCurrentQuestion(question_id)),
        }
    }

    fn require_question_state(&self, action: &'static str) -> Result<usize, FlowError> {
        match self.state {
            FlowState::Question(index) => Ok(index),
            _ => Err(self.invalid(action)),
        }
    }

    fn invalid(&self, action: &'static str) -> FlowError {
        FlowError::InvalidTransition {
            from: self.state,
            action,
        }
    }
}

#[cfg(test)]
#[path = "tests/flow_tests.rs"]
mod tests;
