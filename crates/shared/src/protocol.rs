use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    domain::{AnswerValue, QuestionId, QuestionType, ResponseId, SurveyId, SurveyStatus, UserId},
    error::{ApiError, ErrorCode},
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Branding {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_family: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverPage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub button_label: Option<String>,
    /// Participants land directly on the first question.
    #[serde(default)]
    pub skip: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndingPage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionView {
    pub id: QuestionId,
    pub content: String,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub required: bool,
    pub order: i64,
}

/// What a participant needs to take a survey.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurveyView {
    pub id: SurveyId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub branding: Branding,
    #[serde(default)]
    pub cover: CoverPage,
    #[serde(default)]
    pub ending: EndingPage,
    pub questions: Vec<QuestionView>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurveyDetail {
    pub id: SurveyId,
    pub owner_id: UserId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: SurveyStatus,
    pub branding: Branding,
    pub cover: CoverPage,
    pub ending: EndingPage,
    pub questions: Vec<QuestionView>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurveySummary {
    pub id: SurveyId,
    pub title: String,
    pub status: SurveyStatus,
    pub question_count: u64,
    pub response_count: u64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSurveyRequest {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<SurveyStatus>,
    #[serde(default)]
    pub branding: Option<Branding>,
    #[serde(default)]
    pub cover: Option<CoverPage>,
    #[serde(default)]
    pub ending: Option<EndingPage>,
}

/// Partial update; absent fields keep their stored value.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSurveyRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<SurveyStatus>,
    #[serde(default)]
    pub branding: Option<Branding>,
    #[serde(default)]
    pub cover: Option<CoverPage>,
    #[serde(default)]
    pub ending: Option<EndingPage>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionInput {
    pub content: String,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub order: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReorderQuestionsRequest {
    pub question_ids: Vec<QuestionId>,
}

/// One entry of a submission. Both fields are optional on the wire so that
/// a missing key is reported as a validation failure instead of a decode
/// failure.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_id: Option<QuestionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<AnswerValue>,
}

impl AnswerInput {
    pub fn new(question_id: QuestionId, value: impl Into<AnswerValue>) -> Self {
        Self {
            question_id: Some(question_id),
            value: Some(value.into()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponseRequest {
    #[serde(default)]
    pub answers: Vec<AnswerInput>,
    /// Client clock at submit time; the stored timestamp is assigned by the
    /// server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedResponse {
    pub response_id: ResponseId,
    pub answer_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponseReply {
    pub success: bool,
    pub response_id: ResponseId,
    pub answer_count: u64,
}

impl From<SubmittedResponse> for SubmitResponseReply {
    fn from(value: SubmittedResponse) -> Self {
        Self {
            success: true,
            response_id: value.response_id,
            answer_count: value.answer_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRecord {
    pub question_id: QuestionId,
    pub value: AnswerValue,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseRecord {
    pub id: ResponseId,
    pub survey_id: SurveyId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub respondent_id: Option<UserId>,
    pub submitted_at: DateTime<Utc>,
    pub answers: Vec<AnswerRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataEnvelope<T> {
    pub success: bool,
    pub data: T,
}

impl<T> DataEnvelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub success: bool,
    pub code: ErrorCode,
    pub message: String,
}

impl From<ApiError> for ErrorEnvelope {
    fn from(value: ApiError) -> Self {
        Self {
            success: false,
            code: value.code,
            message: value.message,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    ResponseSubmitted {
        survey_id: SurveyId,
        response_id: ResponseId,
        answer_count: u64,
    },
    SurveyUpdated {
        survey_id: SurveyId,
    },
    SurveyDeleted {
        survey_id: SurveyId,
    },
}
