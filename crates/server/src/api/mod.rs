//! HTTP bindings for the survey service layer.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use server_api::{
    add_question, create_survey, delete_question, delete_survey, get_survey_for_participant,
    list_responses, list_surveys, reorder_questions, submit_response, survey_detail,
    update_question, update_survey,
};
use shared::{
    domain::{Caller, QuestionId, SurveyId, UserId},
    error::{ApiError, ErrorCode},
    protocol::{
        CreateSurveyRequest, DataEnvelope, ErrorEnvelope, QuestionInput, QuestionView,
        ReorderQuestionsRequest, ResponseRecord, ServerEvent, SubmitResponseReply,
        SubmitResponseRequest, SurveyDetail, SurveySummary, SurveyView, UpdateSurveyRequest,
    },
};
use tracing::{debug, warn};

use crate::app_state::AppState;

/// Identity established upstream, forwarded as a query parameter.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct CallerQuery {
    pub(crate) user_id: Option<i64>,
}

impl CallerQuery {
    fn caller(&self) -> Caller {
        self.user_id.map(UserId).into()
    }
}

#[derive(Debug)]
pub(crate) struct HttpError {
    status: StatusCode,
    error: ApiError,
}

impl From<ApiError> for HttpError {
    fn from(error: ApiError) -> Self {
        Self {
            status: status_for(error.code),
            error,
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorEnvelope::from(self.error))).into_response()
    }
}

pub(crate) fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorCode::Forbidden => StatusCode::FORBIDDEN,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

type HttpResult<T> = Result<T, HttpError>;

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> HttpResult<T> {
    match payload {
        Ok(Json(body)) => Ok(body),
        Err(rejection) => {
            debug!(error = %rejection, "rejected request body");
            if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
                return Err(HttpError {
                    status: StatusCode::PAYLOAD_TOO_LARGE,
                    error: ApiError::validation("request body too large"),
                });
            }
            Err(ApiError::validation(format!(
                "malformed request body: {}",
                rejection.body_text()
            ))
            .into())
        }
    }
}

pub(crate) async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.api.storage.health_check().await {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(error) => {
            warn!(error = ?error, "health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
        }
    }
}

pub(crate) async fn http_get_survey(
    State(state): State<Arc<AppState>>,
    Path(survey_id): Path<i64>,
) -> HttpResult<Json<DataEnvelope<SurveyView>>> {
    let survey = get_survey_for_participant(&state.api, SurveyId(survey_id)).await?;
    Ok(Json(DataEnvelope::ok(survey)))
}

pub(crate) async fn http_submit_response(
    State(state): State<Arc<AppState>>,
    Path(survey_id): Path<i64>,
    Query(q): Query<CallerQuery>,
    payload: Result<Json<SubmitResponseRequest>, JsonRejection>,
) -> HttpResult<(StatusCode, Json<SubmitResponseReply>)> {
    let request = json_body(payload)?;
    let survey_id = SurveyId(survey_id);
    if let Some(client_time) = request.submitted_at {
        debug!(survey_id = survey_id.0, %client_time, "client reported submit time");
    }

    let submitted = submit_response(&state.api, survey_id, q.caller(), &request).await?;
    state.publish(ServerEvent::ResponseSubmitted {
        survey_id,
        response_id: submitted.response_id,
        answer_count: submitted.answer_count,
    });
    Ok((StatusCode::CREATED, Json(submitted.into())))
}

pub(crate) async fn http_create_survey(
    State(state): State<Arc<AppState>>,
    Query(q): Query<CallerQuery>,
    payload: Result<Json<CreateSurveyRequest>, JsonRejection>,
) -> HttpResult<(StatusCode, Json<DataEnvelope<SurveyDetail>>)> {
    let request = json_body(payload)?;
    let survey = create_survey(&state.api, q.caller(), request).await?;
    Ok((StatusCode::CREATED, Json(DataEnvelope::ok(survey))))
}

pub(crate) async fn http_list_surveys(
    State(state): State<Arc<AppState>>,
    Query(q): Query<CallerQuery>,
) -> HttpResult<Json<DataEnvelope<Vec<SurveySummary>>>> {
    let surveys = list_surveys(&state.api, q.caller()).await?;
    Ok(Json(DataEnvelope::ok(surveys)))
}

pub(crate) async fn http_survey_detail(
    State(state): State<Arc<AppState>>,
    Path(survey_id): Path<i64>,
    Query(q): Query<CallerQuery>,
) -> HttpResult<Json<DataEnvelope<SurveyDetail>>> {
    let survey = survey_detail(&state.api, q.caller(), SurveyId(survey_id)).await?;
    Ok(Json(DataEnvelope::ok(survey)))
}

pub(crate) async fn http_update_survey(
    State(state): State<Arc<AppState>>,
    Path(survey_id): Path<i64>,
    Query(q): Query<CallerQuery>,
    payload: Result<Json<UpdateSurveyRequest>, JsonRejection>,
) -> HttpResult<Json<DataEnvelope<SurveyDetail>>> {
    let request = json_body(payload)?;
    let survey_id = SurveyId(survey_id);
    let survey = update_survey(&state.api, q.caller(), survey_id, request).await?;
    state.publish(ServerEvent::SurveyUpdated { survey_id });
    Ok(Json(DataEnvelope::ok(survey)))
}

pub(crate) async fn http_delete_survey(
    State(state): State<Arc<AppState>>,
    Path(survey_id): Path<i64>,
    Query(q): Query<CallerQuery>,
) -> HttpResult<StatusCode> {
    let survey_id = SurveyId(survey_id);
    delete_survey(&state.api, q.caller(), survey_id).await?;
    state.publish(ServerEvent::SurveyDeleted { survey_id });
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn http_add_question(
    State(state): State<Arc<AppState>>,
    Path(survey_id): Path<i64>,
    Query(q): Query<CallerQuery>,
    payload: Result<Json<QuestionInput>, JsonRejection>,
) -> HttpResult<(StatusCode, Json<DataEnvelope<QuestionView>>)> {
    let input = json_body(payload)?;
    let survey_id = SurveyId(survey_id);
    let question = add_question(&state.api, q.caller(), survey_id, input).await?;
    state.publish(ServerEvent::SurveyUpdated { survey_id });
    Ok((StatusCode::CREATED, Json(DataEnvelope::ok(question))))
}

pub(crate) async fn http_update_question(
    State(state): State<Arc<AppState>>,
    Path((survey_id, question_id)): Path<(i64, i64)>,
    Query(q): Query<CallerQuery>,
    payload: Result<Json<QuestionInput>, JsonRejection>,
) -> HttpResult<Json<DataEnvelope<QuestionView>>> {
    let input = json_body(payload)?;
    let survey_id = SurveyId(survey_id);
    let question = update_question(
        &state.api,
        q.caller(),
        survey_id,
        QuestionId(question_id),
        input,
    )
    .await?;
    state.publish(ServerEvent::SurveyUpdated { survey_id });
    Ok(Json(DataEnvelope::ok(question)))
}

pub(crate) async fn http_delete_question(
    State(state): State<Arc<AppState>>,
    Path((survey_id, question_id)): Path<(i64, i64)>,
    Query(q): Query<CallerQuery>,
) -> HttpResult<StatusCode> {
    let survey_id = SurveyId(survey_id);
    delete_question(&state.api, q.caller(), survey_id, QuestionId(question_id)).await?;
    state.publish(ServerEvent::SurveyUpdated { survey_id });
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn http_reorder_questions(
    State(state): State<Arc<AppState>>,
    Path(survey_id): Path<i64>,
    Query(q): Query<CallerQuery>,
    payload: Result<Json<ReorderQuestionsRequest>, JsonRejection>,
) -> HttpResult<Json<DataEnvelope<Vec<QuestionView>>>> {
    let request = json_body(payload)?;
    let survey_id = SurveyId(survey_id);
    let questions = reorder_questions(&state.api, q.caller(), survey_id, &request).await?;
    state.publish(ServerEvent::SurveyUpdated { survey_id });
    Ok(Json(DataEnvelope::ok(questions)))
}

pub(crate) async fn http_list_responses(
    State(state): State<Arc<AppState>>,
    Path(survey_id): Path<i64>,
    Query(q): Query<CallerQuery>,
) -> HttpResult<Json<DataEnvelope<Vec<ResponseRecord>>>> {
    let responses = list_responses(&state.api, q.caller(), SurveyId(survey_id)).await?;
    Ok(Json(DataEnvelope::ok(responses)))
}

pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws_connection(state, socket))
}

async fn ws_connection(state: Arc<AppState>, socket: axum::extract::ws::WebSocket) {
    use axum::extract::ws::Message;
    use futures::{SinkExt, StreamExt};
    use tokio::sync::broadcast::error::RecvError;

    let (mut sender, mut receiver) = socket.split();
    let mut events_rx = state.events.subscribe();

    let send_task = tokio::spawn(async move {
        loop {
            let event = match events_rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "live feed subscriber lagged");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            let text = match serde_json::to_string(&event) {
                Ok(v) => v,
                Err(_) => continue,
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(_msg)) = receiver.next().await {}

    send_task.abort();
}

#[cfg(test)]
#[path = "tests/mod_tests.rs"]
mod tests;
