use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(UserId);
id_newtype!(SurveyId);
id_newtype!(QuestionId);
id_newtype!(ResponseId);
id_newtype!(AnswerId);

/// Identity of whoever is calling into the core. Authentication happens
/// upstream; the core only ever sees the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Caller {
    Anonymous,
    User(UserId),
}

impl Caller {
    pub fn user_id(self) -> Option<UserId> {
        match self {
            Caller::Anonymous => None,
            Caller::User(user_id) => Some(user_id),
        }
    }
}

impl From<Option<UserId>> for Caller {
    fn from(value: Option<UserId>) -> Self {
        value.map_or(Caller::Anonymous, Caller::User)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurveyStatus {
    #[default]
    Draft,
    Active,
    Scheduled,
    Paused,
    #[serde(alias = "inactive")]
    Completed,
}

impl SurveyStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SurveyStatus::Draft => "draft",
            SurveyStatus::Active => "active",
            SurveyStatus::Scheduled => "scheduled",
            SurveyStatus::Paused => "paused",
            SurveyStatus::Completed => "completed",
        }
    }
}

impl FromStr for SurveyStatus {
    type Err = UnknownVariant;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "draft" => Ok(SurveyStatus::Draft),
            "active" => Ok(SurveyStatus::Active),
            "scheduled" => Ok(SurveyStatus::Scheduled),
            "paused" => Ok(SurveyStatus::Paused),
            "completed" | "inactive" => Ok(SurveyStatus::Completed),
            _ => Err(UnknownVariant(raw.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuestionType {
    Text,
    Textarea,
    Radio,
    Checkbox,
    Dropdown,
    StarRating,
    Scale,
    YesNo,
    ImageSelect,
}

impl QuestionType {
    pub fn as_str(self) -> &'static str {
        match self {
            QuestionType::Text => "TEXT",
            QuestionType::Textarea => "TEXTAREA",
            QuestionType::Radio => "RADIO",
            QuestionType::Checkbox => "CHECKBOX",
            QuestionType::Dropdown => "DROPDOWN",
            QuestionType::StarRating => "STAR_RATING",
            QuestionType::Scale => "SCALE",
            QuestionType::YesNo => "YES_NO",
            QuestionType::ImageSelect => "IMAGE_SELECT",
        }
    }

    /// Types whose answers are picked from the question's option list.
    pub fn requires_options(self) -> bool {
        matches!(
            self,
            QuestionType::Radio
                | QuestionType::Checkbox
                | QuestionType::Dropdown
                | QuestionType::ImageSelect
        )
    }

    pub fn is_multi_select(self) -> bool {
        matches!(self, QuestionType::Checkbox)
    }

    pub fn is_free_text(self) -> bool {
        matches!(self, QuestionType::Text | QuestionType::Textarea)
    }
}

impl FromStr for QuestionType {
    type Err = UnknownVariant;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "TEXT" => Ok(QuestionType::Text),
            "TEXTAREA" => Ok(QuestionType::Textarea),
            "RADIO" => Ok(QuestionType::Radio),
            "CHECKBOX" => Ok(QuestionType::Checkbox),
            "DROPDOWN" => Ok(QuestionType::Dropdown),
            "STAR_RATING" => Ok(QuestionType::StarRating),
            "SCALE" => Ok(QuestionType::Scale),
            "YES_NO" => Ok(QuestionType::YesNo),
            "IMAGE_SELECT" => Ok(QuestionType::ImageSelect),
            _ => Err(UnknownVariant(raw.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown variant '{0}'")]
pub struct UnknownVariant(pub String);

/// A recorded answer. Multi-select questions carry `Choices`; everything
/// else is text or a number (ratings, scales).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    Text(String),
    Number(f64),
    Choices(Vec<String>),
}

impl AnswerValue {
    /// Whether this value satisfies a required question.
    pub fn is_blank(&self) -> bool {
        match self {
            AnswerValue::Text(text) => text.is_empty(),
            AnswerValue::Number(_) => false,
            AnswerValue::Choices(choices) => choices.is_empty(),
        }
    }

    /// Text form persisted in the answers table.
    pub fn to_stored(&self) -> String {
        match self {
            AnswerValue::Text(text) => text.clone(),
            AnswerValue::Number(number) => number.to_string(),
            AnswerValue::Choices(choices) => {
                serde_json::to_string(choices).unwrap_or_else(|_| "[]".to_string())
            }
        }
    }

    /// Inverse of [`AnswerValue::to_stored`] given the owning question's type.
    pub fn from_stored(question_type: QuestionType, stored: &str) -> Self {
        if question_type.is_multi_select() {
            if let Ok(choices) = serde_json::from_str::<Vec<String>>(stored) {
                return AnswerValue::Choices(choices);
            }
        }
        AnswerValue::Text(stored.to_string())
    }
}

impl From<&str> for AnswerValue {
    fn from(value: &str) -> Self {
        AnswerValue::Text(value.to_string())
    }
}

impl From<String> for AnswerValue {
    fn from(value: String) -> Self {
        AnswerValue::Text(value)
    }
}

impl From<Vec<String>> for AnswerValue {
    fn from(value: Vec<String>) -> Self {
        AnswerValue::Choices(value)
    }
}
