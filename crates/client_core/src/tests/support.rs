use std::{collections::VecDeque, sync::Arc};

use async_trait::async_trait;
use shared::{
    domain::{QuestionId, QuestionType, ResponseId, SurveyId},
    protocol::{
        Branding, CoverPage, EndingPage, QuestionView, SubmitResponseRequest, SubmittedResponse,
        SurveyView,
    },
};
use tokio::sync::{Mutex, Notify};

use crate::{api::SurveyApi, error::ClientError};

pub(crate) fn question(id: i64, question_type: QuestionType, required: bool) -> QuestionView {
    QuestionView {
        id: QuestionId(id),
        content: format!("Question {id}"),
        question_type,
        options: if question_type.requires_options() {
            vec!["red".into(), "green".into()]
        } else {
            Vec::new()
        },
        required,
        order: id,
    }
}

pub(crate) fn survey(questions: Vec<QuestionView>) -> SurveyView {
    SurveyView {
        id: SurveyId(10),
        title: "Pulse".into(),
        description: None,
        branding: Branding::default(),
        cover: CoverPage::default(),
        ending: EndingPage::default(),
        questions,
    }
}

/// Required text question 1, optional checkbox question 2.
pub(crate) fn two_question_survey() -> SurveyView {
    survey(vec![
        question(1, QuestionType::Text, true),
        question(2, QuestionType::Checkbox, false),
    ])
}

pub(crate) fn accepted(response_id: i64, answer_count: u64) -> Result<SubmittedResponse, ClientError> {
    Ok(SubmittedResponse {
        response_id: ResponseId(response_id),
        answer_count,
    })
}

pub(crate) fn server_error() -> Result<SubmittedResponse, ClientError> {
    Err(ClientError::Api {
        status: 500,
        message: "failed to save response".into(),
    })
}

/// `SurveyApi` double that replays queued outcomes and records every
/// submission. With `hold_submits`, each submit waits for `release`.
#[derive(Default)]
pub(crate) struct ScriptedApi {
    pub(crate) survey: Option<SurveyView>,
    pub(crate) outcomes: Mutex<VecDeque<Result<SubmittedResponse, ClientError>>>,
    pub(crate) submitted: Mutex<Vec<SubmitResponseRequest>>,
    pub(crate) hold_submits: bool,
    pub(crate) entered: Notify,
    pub(crate) release: Notify,
}

impl ScriptedApi {
    pub(crate) fn with_survey(survey: SurveyView) -> Self {
        Self {
            survey: Some(survey),
            ..Self::default()
        }
    }

    pub(crate) fn holding(mut self) -> Self {
        self.hold_submits = true;
        self
    }

    pub(crate) async fn push(&self, outcome: Result<SubmittedResponse, ClientError>) {
        self.outcomes.lock().await.push_back(outcome);
    }

    pub(crate) async fn submissions(&self) -> Vec<SubmitResponseRequest> {
        self.submitted.lock().await.clone()
    }

    pub(crate) fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

#[async_trait]
impl SurveyApi for ScriptedApi {
    async fn fetch_survey(&self, _survey_id: SurveyId) -> Result<SurveyView, ClientError> {
        self.survey.clone().ok_or(ClientError::NotFound)
    }

    async fn submit_response(
        &self,
        _survey_id: SurveyId,
        request: &SubmitResponseRequest,
    ) -> Result<SubmittedResponse, ClientError> {
        self.submitted.lock().await.push(request.clone());
        if self.hold_submits {
            self.entered.notify_one();
            self.release.notified().await;
        }
        self.outcomes
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| accepted(1, request.answers.len() as u64))
    }
}
