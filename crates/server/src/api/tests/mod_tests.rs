use super::*;
use axum::body;

async fn envelope_of(response: Response) -> serde_json::Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

#[test]
fn error_codes_map_to_http_statuses() {
    assert_eq!(status_for(ErrorCode::Validation), StatusCode::BAD_REQUEST);
    assert_eq!(status_for(ErrorCode::Unauthorized), StatusCode::UNAUTHORIZED);
    assert_eq!(status_for(ErrorCode::Forbidden), StatusCode::FORBIDDEN);
    assert_eq!(status_for(ErrorCode::NotFound), StatusCode::NOT_FOUND);
    assert_eq!(
        status_for(ErrorCode::Internal),
        StatusCode::INTERNAL_SERVER_ERROR
    );
}

#[tokio::test]
async fn http_error_renders_failure_envelope() {
    let response = HttpError::from(ApiError::not_found("survey not found")).into_response();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let json = envelope_of(response).await;
    assert_eq!(
        json,
        serde_json::json!({
            "success": false,
            "code": "not_found",
            "message": "survey not found"
        })
    );
}

#[test]
fn caller_query_without_user_is_anonymous() {
    assert_eq!(CallerQuery::default().caller(), Caller::Anonymous);
    assert_eq!(
        CallerQuery { user_id: Some(7) }.caller(),
        Caller::User(UserId(7))
    );
}

#[test]
fn accepted_body_passes_through() {
    let body = json_body(Ok(Json(ReorderQuestionsRequest {
        question_ids: vec![QuestionId(2), QuestionId(1)],
    })))
    .expect("body");
    assert_eq!(body.question_ids, vec![QuestionId(2), QuestionId(1)]);
}
