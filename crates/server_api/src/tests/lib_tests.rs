use super::*;
use shared::domain::SurveyStatus;

const OWNER: Caller = Caller::User(UserId(1));

async fn setup() -> ApiContext {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    ApiContext { storage }
}

fn question(content: &str, question_type: QuestionType, required: bool) -> QuestionInput {
    QuestionInput {
        content: content.to_string(),
        question_type,
        options: if question_type.requires_options() {
            vec!["A".into(), "B".into()]
        } else {
            Vec::new()
        },
        required,
        order: None,
    }
}

async fn two_question_survey(ctx: &ApiContext) -> (SurveyId, QuestionId, QuestionId) {
    let survey = create_survey(
        ctx,
        OWNER,
        CreateSurveyRequest {
            title: "Feedback".into(),
            description: Some("  tell us  ".into()),
            status: Some(SurveyStatus::Active),
            branding: None,
            cover: None,
            ending: None,
        },
    )
    .await
    .expect("survey");
    let first = add_question(ctx, OWNER, survey.id, question("Pick one", QuestionType::Radio, true))
        .await
        .expect("first");
    let second = add_question(
        ctx,
        OWNER,
        survey.id,
        question("Anything else?", QuestionType::Textarea, false),
    )
    .await
    .expect("second");
    (survey.id, first.id, second.id)
}

fn submission(answers: Vec<AnswerInput>) -> SubmitResponseRequest {
    SubmitResponseRequest {
        answers,
        submitted_at: None,
    }
}

#[tokio::test]
async fn round_trip_submission_writes_one_response_and_two_answers() {
    let ctx = setup().await;
    let (survey, first, second) = two_question_survey(&ctx).await;

    let submitted = submit_response(
        &ctx,
        survey,
        Caller::Anonymous,
        &submission(vec![
            AnswerInput::new(first, "A"),
            AnswerInput::new(second, "free text"),
        ]),
    )
    .await
    .expect("submit");
    assert_eq!(submitted.answer_count, 2);

    let response = ctx
        .storage
        .load_response(submitted.response_id)
        .await
        .expect("load")
        .expect("response resolves");
    assert_eq!(response.survey_id, survey);
    assert_eq!(response.respondent_id, None);

    let answers = ctx
        .storage
        .list_answers_for_response(submitted.response_id)
        .await
        .expect("answers");
    assert_eq!(answers.len(), 2);
    assert_eq!((answers[0].question_id, answers[0].value.as_str()), (first, "A"));
    assert_eq!(
        (answers[1].question_id, answers[1].value.as_str()),
        (second, "free text")
    );
    assert_eq!(ctx.storage.count_responses_for_survey(survey).await.expect("count"), 1);
}

#[tokio::test]
async fn signed_in_caller_is_recorded_as_respondent() {
    let ctx = setup().await;
    let (survey, first, _) = two_question_survey(&ctx).await;

    let submitted = submit_response(
        &ctx,
        survey,
        Caller::User(UserId(77)),
        &submission(vec![AnswerInput::new(first, "B")]),
    )
    .await
    .expect("submit");
    let response = ctx
        .storage
        .load_response(submitted.response_id)
        .await
        .expect("load")
        .expect("response");
    assert_eq!(response.respondent_id, Some(UserId(77)));
}

#[tokio::test]
async fn empty_payload_is_rejected_and_writes_nothing() {
    let ctx = setup().await;
    let (survey, _, _) = two_question_survey(&ctx).await;

    let err = submit_response(&ctx, survey, Caller::Anonymous, &submission(Vec::new()))
        .await
        .expect_err("empty answers");
    assert_eq!(err.code, ErrorCode::Validation);
    assert_eq!(err.message, "answers missing");
    assert_eq!(ctx.storage.count_responses_for_survey(survey).await.expect("count"), 0);
}

#[tokio::test]
async fn entry_without_question_id_is_rejected_and_writes_nothing() {
    let ctx = setup().await;
    let (survey, _, _) = two_question_survey(&ctx).await;

    let err = submit_response(
        &ctx,
        survey,
        Caller::Anonymous,
        &submission(vec![AnswerInput {
            question_id: None,
            value: Some(AnswerValue::from("x")),
        }]),
    )
    .await
    .expect_err("missing question id");
    assert_eq!(err.code, ErrorCode::Validation);
    assert!(err.message.contains("questionId"));
    assert_eq!(ctx.storage.count_responses_for_survey(survey).await.expect("count"), 0);
}

#[tokio::test]
async fn entry_without_value_is_rejected_but_empty_string_is_accepted() {
    let ctx = setup().await;
    let (survey, first, second) = two_question_survey(&ctx).await;

    let err = submit_response(
        &ctx,
        survey,
        Caller::Anonymous,
        &submission(vec![
            AnswerInput::new(first, "A"),
            AnswerInput {
                question_id: Some(second),
                value: None,
            },
        ]),
    )
    .await
    .expect_err("missing value");
    assert_eq!(err.code, ErrorCode::Validation);
    assert_eq!(err.message, "answer 1 is missing value");

    submit_response(
        &ctx,
        survey,
        Caller::Anonymous,
        &submission(vec![AnswerInput::new(first, "A"), AnswerInput::new(second, "")]),
    )
    .await
    .expect("empty string is a value");
}

#[tokio::test]
async fn required_questions_are_not_enforced_server_side() {
    let ctx = setup().await;
    let (survey, _required, optional) = two_question_survey(&ctx).await;

    submit_response(
        &ctx,
        survey,
        Caller::Anonymous,
        &submission(vec![AnswerInput::new(optional, "only the optional one")]),
    )
    .await
    .expect("accepted without the required answer");
}

#[tokio::test]
async fn unknown_survey_is_not_found() {
    let ctx = setup().await;
    let err = submit_response(
        &ctx,
        SurveyId(404),
        Caller::Anonymous,
        &submission(vec![AnswerInput::new(QuestionId(1), "x")]),
    )
    .await
    .expect_err("missing survey");
    assert_eq!(err.code, ErrorCode::NotFound);

    let err = get_survey_for_participant(&ctx, SurveyId(404))
        .await
        .expect_err("missing survey");
    assert_eq!(err.code, ErrorCode::NotFound);
}

#[tokio::test]
async fn persistence_failure_is_generic_and_rolls_back() {
    let ctx = setup().await;
    let (survey, first, _) = two_question_survey(&ctx).await;

    let err = submit_response(
        &ctx,
        survey,
        Caller::Anonymous,
        &submission(vec![
            AnswerInput::new(first, "A"),
            AnswerInput::new(QuestionId(9_999), "dangling"),
        ]),
    )
    .await
    .expect_err("foreign key violation");
    assert_eq!(err.code, ErrorCode::Internal);
    assert_eq!(err.message, "failed to save response");
    assert!(err.is_retryable());
    assert_eq!(ctx.storage.count_responses_for_survey(survey).await.expect("count"), 0);
    assert_eq!(ctx.storage.count_answers_for_survey(survey).await.expect("count"), 0);
}

#[tokio::test]
async fn participant_projection_orders_questions() {
    let ctx = setup().await;
    let survey = create_survey(
        &ctx,
        OWNER,
        CreateSurveyRequest {
            title: "Ordered".into(),
            description: None,
            status: None,
            branding: None,
            cover: None,
            ending: None,
        },
    )
    .await
    .expect("survey");
    for order in [3, 1, 2] {
        let mut input = question(&format!("order {order}"), QuestionType::Text, false);
        input.order = Some(order);
        add_question(&ctx, OWNER, survey.id, input)
            .await
            .expect("question");
    }

    let view = get_survey_for_participant(&ctx, survey.id)
        .await
        .expect("view");
    let orders: Vec<i64> = view.questions.iter().map(|q| q.order).collect();
    assert_eq!(orders, vec![1, 2, 3]);
    assert_eq!(view.questions[0].content, "order 1");
}

#[tokio::test]
async fn create_survey_trims_and_validates_title() {
    let ctx = setup().await;
    let err = create_survey(
        &ctx,
        OWNER,
        CreateSurveyRequest {
            title: "   ".into(),
            description: None,
            status: None,
            branding: None,
            cover: None,
            ending: None,
        },
    )
    .await
    .expect_err("blank title");
    assert_eq!(err.code, ErrorCode::Validation);

    let (survey, _, _) = two_question_survey(&ctx).await;
    let detail = survey_detail(&ctx, OWNER, survey).await.expect("detail");
    assert_eq!(detail.description.as_deref(), Some("tell us"));
    assert_eq!(detail.status, SurveyStatus::Active);
    assert_eq!(detail.questions.len(), 2);
}

#[tokio::test]
async fn admin_operations_require_owner() {
    let ctx = setup().await;
    let (survey, first, _) = two_question_survey(&ctx).await;
    let stranger = Caller::User(UserId(2));

    let err = survey_detail(&ctx, stranger, survey)
        .await
        .expect_err("stranger");
    assert_eq!(err.code, ErrorCode::Forbidden);
    let err = delete_question(&ctx, stranger, survey, first)
        .await
        .expect_err("stranger");
    assert_eq!(err.code, ErrorCode::Forbidden);
    let err = list_surveys(&ctx, Caller::Anonymous)
        .await
        .expect_err("anonymous");
    assert_eq!(err.code, ErrorCode::Unauthorized);
}

#[tokio::test]
async fn choice_questions_need_options_and_free_text_drops_them() {
    let ctx = setup().await;
    let (survey, _, _) = two_question_survey(&ctx).await;

    let mut dropdown = question("Country", QuestionType::Dropdown, false);
    dropdown.options = vec!["  ".into()];
    let err = add_question(&ctx, OWNER, survey, dropdown)
        .await
        .expect_err("no usable options");
    assert_eq!(err.code, ErrorCode::Validation);

    let mut text = question("Name", QuestionType::Text, false);
    text.options = vec!["ignored".into()];
    let view = add_question(&ctx, OWNER, survey, text).await.expect("text");
    assert!(view.options.is_empty());
    assert_eq!(view.order, 2);
}

#[tokio::test]
async fn update_survey_changes_status_in_any_direction() {
    let ctx = setup().await;
    let (survey, _, _) = two_question_survey(&ctx).await;

    let completed = update_survey(
        &ctx,
        OWNER,
        survey,
        UpdateSurveyRequest {
            status: Some(SurveyStatus::Completed),
            ..Default::default()
        },
    )
    .await
    .expect("complete");
    assert_eq!(completed.status, SurveyStatus::Completed);

    let reopened = update_survey(
        &ctx,
        OWNER,
        survey,
        UpdateSurveyRequest {
            status: Some(SurveyStatus::Draft),
            title: Some("Renamed".into()),
            ..Default::default()
        },
    )
    .await
    .expect("back to draft");
    assert_eq!(reopened.status, SurveyStatus::Draft);
    assert_eq!(reopened.title, "Renamed");
}

#[tokio::test]
async fn update_question_rejects_question_from_other_survey() {
    let ctx = setup().await;
    let (survey, _, _) = two_question_survey(&ctx).await;
    let (_other, other_question, _) = two_question_survey(&ctx).await;

    let err = update_question(
        &ctx,
        OWNER,
        survey,
        other_question,
        question("moved", QuestionType::Text, false),
    )
    .await
    .expect_err("foreign question");
    assert_eq!(err.code, ErrorCode::NotFound);
}

#[tokio::test]
async fn reorder_requires_complete_permutation() {
    let ctx = setup().await;
    let (survey, first, second) = two_question_survey(&ctx).await;

    let err = reorder_questions(
        &ctx,
        OWNER,
        survey,
        &ReorderQuestionsRequest {
            question_ids: vec![second],
        },
    )
    .await
    .expect_err("partial");
    assert_eq!(err.code, ErrorCode::Validation);

    let reordered = reorder_questions(
        &ctx,
        OWNER,
        survey,
        &ReorderQuestionsRequest {
            question_ids: vec![second, first],
        },
    )
    .await
    .expect("reorder");
    let ids: Vec<QuestionId> = reordered.iter().map(|q| q.id).collect();
    assert_eq!(ids, vec![second, first]);
}

#[tokio::test]
async fn list_responses_groups_answers_and_decodes_choices() {
    let ctx = setup().await;
    let (survey, first, second) = two_question_survey(&ctx).await;
    let colours = add_question(
        &ctx,
        OWNER,
        survey,
        question("Colours", QuestionType::Checkbox, false),
    )
    .await
    .expect("checkbox");

    submit_response(
        &ctx,
        survey,
        Caller::Anonymous,
        &submission(vec![AnswerInput::new(first, "A"), AnswerInput::new(second, "")]),
    )
    .await
    .expect("first response");
    let latest = submit_response(
        &ctx,
        survey,
        Caller::Anonymous,
        &submission(vec![
            AnswerInput::new(first, "B"),
            AnswerInput::new(colours.id, vec!["A".to_string(), "B".to_string()]),
        ]),
    )
    .await
    .expect("second response");

    let responses = list_responses(&ctx, OWNER, survey).await.expect("responses");
    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0].id, latest.response_id);
    assert_eq!(responses[0].answers.len(), 2);
    assert_eq!(
        responses[0].answers[1].value,
        AnswerValue::Choices(vec!["A".into(), "B".into()])
    );
    assert_eq!(responses[1].answers.len(), 2);
}

#[tokio::test]
async fn delete_survey_removes_everything() {
    let ctx = setup().await;
    let (survey, first, _) = two_question_survey(&ctx).await;
    submit_response(
        &ctx,
        survey,
        Caller::Anonymous,
        &submission(vec![AnswerInput::new(first, "A")]),
    )
    .await
    .expect("submit");

    delete_survey(&ctx, OWNER, survey).await.expect("delete");
    assert_eq!(ctx.storage.count_responses_for_survey(survey).await.expect("count"), 0);
    let err = get_survey_for_participant(&ctx, survey)
        .await
        .expect_err("deleted");
    assert_eq!(err.code, ErrorCode::NotFound);
}
