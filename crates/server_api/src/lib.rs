//! Transport-free survey operations. Every function takes the caller's
//! already-authenticated identity and returns [`ApiError`] values the HTTP
//! layer maps onto status codes.

use std::collections::HashMap;

use shared::{
    domain::{AnswerValue, Caller, QuestionId, QuestionType, SurveyId, UserId},
    error::{ApiError, ErrorCode},
    protocol::{
        AnswerInput, AnswerRecord, CreateSurveyRequest, QuestionInput, QuestionView,
        ReorderQuestionsRequest, ResponseRecord, SubmitResponseRequest, SubmittedResponse,
        SurveyDetail, SurveySummary, SurveyView, UpdateSurveyRequest,
    },
};
use storage::{NewAnswer, NewQuestion, NewSurvey, Storage, StoredQuestion, StoredSurvey};
use tracing::{error, info};

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
}

pub async fn get_survey_for_participant(
    ctx: &ApiContext,
    survey_id: SurveyId,
) -> Result<SurveyView, ApiError> {
    let survey = ctx
        .storage
        .load_survey(survey_id)
        .await
        .map_err(internal("failed to load survey"))?
        .ok_or_else(|| ApiError::not_found("survey not found"))?;
    let questions = ctx
        .storage
        .list_questions_for_survey(survey_id)
        .await
        .map_err(internal("failed to load survey"))?;

    Ok(SurveyView {
        id: survey.survey_id,
        title: survey.title,
        description: survey.description,
        branding: survey.branding,
        cover: survey.cover,
        ending: survey.ending,
        questions: questions.into_iter().map(question_view).collect(),
    })
}

/// Checks the shape of a submission: at least one entry, and every entry
/// carries a question id and a value. An empty string is a valid value.
///
/// Whether required questions are answered, and whether the question ids
/// belong to the target survey, is not checked here.
pub fn validate_answers(answers: &[AnswerInput]) -> Result<Vec<NewAnswer>, ApiError> {
    if answers.is_empty() {
        return Err(ApiError::validation("answers missing"));
    }

    answers
        .iter()
        .enumerate()
        .map(|(index, answer)| {
            let question_id = answer.question_id.ok_or_else(|| {
                ApiError::validation(format!("answer {index} is missing questionId"))
            })?;
            let value = answer
                .value
                .as_ref()
                .ok_or_else(|| ApiError::validation(format!("answer {index} is missing value")))?;
            Ok(NewAnswer {
                question_id,
                value: value.to_stored(),
            })
        })
        .collect()
}

pub async fn submit_response(
    ctx: &ApiContext,
    survey_id: SurveyId,
    caller: Caller,
    request: &SubmitResponseRequest,
) -> Result<SubmittedResponse, ApiError> {
    let answers = validate_answers(&request.answers)?;

    ctx.storage
        .load_survey(survey_id)
        .await
        .map_err(internal("failed to save response"))?
        .ok_or_else(|| ApiError::not_found("survey not found"))?;

    let (response_id, answer_count) = ctx
        .storage
        .insert_response_batch(survey_id, caller.user_id(), &answers)
        .await
        .map_err(internal("failed to save response"))?;

    info!(
        survey_id = survey_id.0,
        response_id = response_id.0,
        answer_count,
        anonymous = caller.user_id().is_none(),
        "response submitted"
    );
    Ok(SubmittedResponse {
        response_id,
        answer_count,
    })
}

pub async fn create_survey(
    ctx: &ApiContext,
    caller: Caller,
    request: CreateSurveyRequest,
) -> Result<SurveyDetail, ApiError> {
    let owner_id = require_user(caller)?;
    let title = validated_title(&request.title)?;

    let survey_id = ctx
        .storage
        .create_survey(&NewSurvey {
            owner_id,
            title,
            description: normalized_text(request.description),
            status: request.status.unwrap_or_default(),
            branding: request.branding.unwrap_or_default(),
            cover: request.cover.unwrap_or_default(),
            ending: request.ending.unwrap_or_default(),
        })
        .await
        .map_err(internal("failed to create survey"))?;

    info!(survey_id = survey_id.0, owner_id = owner_id.0, "survey created");
    survey_detail(ctx, caller, survey_id).await
}

pub async fn survey_detail(
    ctx: &ApiContext,
    caller: Caller,
    survey_id: SurveyId,
) -> Result<SurveyDetail, ApiError> {
    let survey = ensure_owner(ctx, caller, survey_id).await?;
    let questions = ctx
        .storage
        .list_questions_for_survey(survey_id)
        .await
        .map_err(internal("failed to load survey"))?;
    Ok(detail_from_parts(survey, questions))
}

pub async fn list_surveys(ctx: &ApiContext, caller: Caller) -> Result<Vec<SurveySummary>, ApiError> {
    let owner_id = require_user(caller)?;
    let listings = ctx
        .storage
        .list_surveys_for_owner(owner_id)
        .await
        .map_err(internal("failed to list surveys"))?;
    Ok(listings
        .into_iter()
        .map(|listing| SurveySummary {
            id: listing.survey.survey_id,
            title: listing.survey.title,
            status: listing.survey.status,
            question_count: listing.question_count,
            response_count: listing.response_count,
            updated_at: listing.survey.updated_at,
        })
        .collect())
}

/// Applies the fields present in `request`. Status changes are accepted in
/// any direction.
pub async fn update_survey(
    ctx: &ApiContext,
    caller: Caller,
    survey_id: SurveyId,
    request: UpdateSurveyRequest,
) -> Result<SurveyDetail, ApiError> {
    let mut survey = ensure_owner(ctx, caller, survey_id).await?;

    if let Some(title) = request.title {
        survey.title = validated_title(&title)?;
    }
    if request.description.is_some() {
        survey.description = normalized_text(request.description);
    }
    if let Some(status) = request.status {
        survey.status = status;
    }
    if let Some(branding) = request.branding {
        survey.branding = branding;
    }
    if let Some(cover) = request.cover {
        survey.cover = cover;
    }
    if let Some(ending) = request.ending {
        survey.ending = ending;
    }

    let saved = ctx
        .storage
        .save_survey(&survey)
        .await
        .map_err(internal("failed to update survey"))?;
    if !saved {
        return Err(ApiError::not_found("survey not found"));
    }
    survey_detail(ctx, caller, survey_id).await
}

pub async fn delete_survey(
    ctx: &ApiContext,
    caller: Caller,
    survey_id: SurveyId,
) -> Result<(), ApiError> {
    ensure_owner(ctx, caller, survey_id).await?;
    let deleted = ctx
        .storage
        .delete_survey(survey_id)
        .await
        .map_err(internal("failed to delete survey"))?;
    if !deleted {
        return Err(ApiError::not_found("survey not found"));
    }
    info!(survey_id = survey_id.0, "survey deleted");
    Ok(())
}

pub async fn add_question(
    ctx: &ApiContext,
    caller: Caller,
    survey_id: SurveyId,
    input: QuestionInput,
) -> Result<QuestionView, ApiError> {
    ensure_owner(ctx, caller, survey_id).await?;
    let question = validated_question(input)?;
    let question_id = ctx
        .storage
        .add_question(survey_id, &question)
        .await
        .map_err(internal("failed to add question"))?;
    load_question_view(ctx, survey_id, question_id).await
}

pub async fn update_question(
    ctx: &ApiContext,
    caller: Caller,
    survey_id: SurveyId,
    question_id: QuestionId,
    input: QuestionInput,
) -> Result<QuestionView, ApiError> {
    ensure_owner(ctx, caller, survey_id).await?;
    ensure_question_in_survey(ctx, survey_id, question_id).await?;
    let question = validated_question(input)?;
    ctx.storage
        .update_question(question_id, &question)
        .await
        .map_err(internal("failed to update question"))?;
    load_question_view(ctx, survey_id, question_id).await
}

pub async fn delete_question(
    ctx: &ApiContext,
    caller: Caller,
    survey_id: SurveyId,
    question_id: QuestionId,
) -> Result<(), ApiError> {
    ensure_owner(ctx, caller, survey_id).await?;
    ensure_question_in_survey(ctx, survey_id, question_id).await?;
    ctx.storage
        .delete_question(question_id)
        .await
        .map_err(internal("failed to delete question"))?;
    Ok(())
}

pub async fn reorder_questions(
    ctx: &ApiContext,
    caller: Caller,
    survey_id: SurveyId,
    request: &ReorderQuestionsRequest,
) -> Result<Vec<QuestionView>, ApiError> {
    ensure_owner(ctx, caller, survey_id).await?;
    let current = ctx
        .storage
        .list_questions_for_survey(survey_id)
        .await
        .map_err(internal("failed to reorder questions"))?;

    let mut requested = request.question_ids.clone();
    requested.sort();
    requested.dedup();
    let mut existing: Vec<QuestionId> = current.iter().map(|q| q.question_id).collect();
    existing.sort();
    if requested.len() != request.question_ids.len() || requested != existing {
        return Err(ApiError::validation(
            "questionIds must list every question of the survey exactly once",
        ));
    }

    ctx.storage
        .reorder_questions(survey_id, &request.question_ids)
        .await
        .map_err(internal("failed to reorder questions"))?;

    let questions = ctx
        .storage
        .list_questions_for_survey(survey_id)
        .await
        .map_err(internal("failed to reorder questions"))?;
    Ok(questions.into_iter().map(question_view).collect())
}

/// Responses to `survey_id`, newest first, each with its answers.
pub async fn list_responses(
    ctx: &ApiContext,
    caller: Caller,
    survey_id: SurveyId,
) -> Result<Vec<ResponseRecord>, ApiError> {
    ensure_owner(ctx, caller, survey_id).await?;

    let question_types: HashMap<QuestionId, QuestionType> = ctx
        .storage
        .list_questions_for_survey(survey_id)
        .await
        .map_err(internal("failed to load responses"))?
        .into_iter()
        .map(|q| (q.question_id, q.question_type))
        .collect();
    let responses = ctx
        .storage
        .list_responses_for_survey(survey_id)
        .await
        .map_err(internal("failed to load responses"))?;
    let answers = ctx
        .storage
        .list_answers_for_survey(survey_id)
        .await
        .map_err(internal("failed to load responses"))?;

    let mut answers_by_response: HashMap<_, Vec<AnswerRecord>> = HashMap::new();
    for answer in answers {
        let value = match question_types.get(&answer.question_id) {
            Some(question_type) => AnswerValue::from_stored(*question_type, &answer.value),
            None => AnswerValue::Text(answer.value),
        };
        answers_by_response
            .entry(answer.response_id)
            .or_default()
            .push(AnswerRecord {
                question_id: answer.question_id,
                value,
            });
    }

    Ok(responses
        .into_iter()
        .map(|response| ResponseRecord {
            id: response.response_id,
            survey_id: response.survey_id,
            respondent_id: response.respondent_id,
            submitted_at: response.submitted_at,
            answers: answers_by_response
                .remove(&response.response_id)
                .unwrap_or_default(),
        })
        .collect())
}

pub async fn ensure_owner(
    ctx: &ApiContext,
    caller: Caller,
    survey_id: SurveyId,
) -> Result<StoredSurvey, ApiError> {
    let user_id = require_user(caller)?;
    let survey = ctx
        .storage
        .load_survey(survey_id)
        .await
        .map_err(internal("failed to load survey"))?
        .ok_or_else(|| ApiError::not_found("survey not found"))?;
    if survey.owner_id != user_id {
        return Err(ApiError::forbidden("survey belongs to another user"));
    }
    Ok(survey)
}

async fn ensure_question_in_survey(
    ctx: &ApiContext,
    survey_id: SurveyId,
    question_id: QuestionId,
) -> Result<StoredQuestion, ApiError> {
    let question = ctx
        .storage
        .load_question(question_id)
        .await
        .map_err(internal("failed to load question"))?
        .ok_or_else(|| ApiError::not_found("question not found"))?;
    if question.survey_id != survey_id {
        return Err(ApiError::not_found("question not found"));
    }
    Ok(question)
}

async fn load_question_view(
    ctx: &ApiContext,
    survey_id: SurveyId,
    question_id: QuestionId,
) -> Result<QuestionView, ApiError> {
    ensure_question_in_survey(ctx, survey_id, question_id)
        .await
        .map(question_view)
}

fn require_user(caller: Caller) -> Result<UserId, ApiError> {
    caller
        .user_id()
        .ok_or_else(|| ApiError::new(ErrorCode::Unauthorized, "sign in required"))
}

fn validated_title(raw: &str) -> Result<String, ApiError> {
    let title = raw.trim();
    if title.is_empty() {
        return Err(ApiError::validation("title is required"));
    }
    Ok(title.to_string())
}

fn normalized_text(raw: Option<String>) -> Option<String> {
    raw.map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

fn validated_question(input: QuestionInput) -> Result<NewQuestion, ApiError> {
    let content = input.content.trim();
    if content.is_empty() {
        return Err(ApiError::validation("question content is required"));
    }

    let options: Vec<String> = if input.question_type.is_free_text() {
        Vec::new()
    } else {
        input
            .options
            .iter()
            .map(|option| option.trim())
            .filter(|option| !option.is_empty())
            .map(str::to_string)
            .collect()
    };
    if input.question_type.requires_options() && options.is_empty() {
        return Err(ApiError::validation(format!(
            "{} questions need at least one option",
            input.question_type.as_str()
        )));
    }

    Ok(NewQuestion {
        content: content.to_string(),
        question_type: input.question_type,
        options,
        required: input.required,
        order_index: input.order,
    })
}

fn question_view(question: StoredQuestion) -> QuestionView {
    QuestionView {
        id: question.question_id,
        content: question.content,
        question_type: question.question_type,
        options: question.options,
        required: question.required,
        order: question.order_index,
    }
}

fn detail_from_parts(survey: StoredSurvey, questions: Vec<StoredQuestion>) -> SurveyDetail {
    SurveyDetail {
        id: survey.survey_id,
        owner_id: survey.owner_id,
        title: survey.title,
        description: survey.description,
        status: survey.status,
        branding: survey.branding,
        cover: survey.cover,
        ending: survey.ending,
        questions: questions.into_iter().map(question_view).collect(),
        created_at: survey.created_at,
        updated_at: survey.updated_at,
    }
}

/// Logs the full error chain and hands the caller a message that does not
/// leak datastore detail.
fn internal(public_message: &'static str) -> impl FnOnce(anyhow::Error) -> ApiError {
    move |err| {
        error!(error = ?err, "{public_message}");
        ApiError::new(ErrorCode::Internal, public_message)
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
