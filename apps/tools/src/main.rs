use anyhow::Result;
use clap::{Parser, Subcommand};
use server_api::{
    add_question, create_survey, list_responses, list_surveys, reorder_questions, update_survey,
    ApiContext,
};
use shared::{
    domain::{Caller, QuestionId, QuestionType, SurveyId, SurveyStatus, UserId},
    error::{ApiError, ApiException},
    protocol::{CreateSurveyRequest, QuestionInput, ReorderQuestionsRequest, UpdateSurveyRequest},
};
use storage::Storage;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "sqlite://./data/surveys.db")]
    database_url: String,
    /// User the commands act as.
    #[arg(long)]
    owner: i64,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    CreateSurvey {
        title: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long, default_value = "draft")]
        status: SurveyStatus,
    },
    AddQuestion {
        survey_id: i64,
        #[arg(long = "type")]
        question_type: QuestionType,
        content: String,
        #[arg(long = "option")]
        options: Vec<String>,
        #[arg(long)]
        required: bool,
        #[arg(long)]
        order: Option<i64>,
    },
    Reorder {
        survey_id: i64,
        question_ids: Vec<i64>,
    },
    SetStatus {
        survey_id: i64,
        status: SurveyStatus,
    },
    ListSurveys,
    ListResponses {
        survey_id: i64,
    },
}

fn api_err(error: ApiError) -> ApiException {
    error.into()
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();
    let cli = Cli::parse();
    let ctx = ApiContext {
        storage: Storage::new(&cli.database_url).await?,
    };
    let caller = Caller::User(UserId(cli.owner));

    match cli.command {
        Command::CreateSurvey {
            title,
            description,
            status,
        } => {
            let survey = create_survey(
                &ctx,
                caller,
                CreateSurveyRequest {
                    title,
                    description,
                    status: Some(status),
                    branding: None,
                    cover: None,
                    ending: None,
                },
            )
            .await
            .map_err(api_err)?;
            println!("created survey_id={}", survey.id);
        }
        Command::AddQuestion {
            survey_id,
            question_type,
            content,
            options,
            required,
            order,
        } => {
            let question = add_question(
                &ctx,
                caller,
                SurveyId(survey_id),
                QuestionInput {
                    content,
                    question_type,
                    options,
                    required,
                    order,
                },
            )
            .await
            .map_err(api_err)?;
            println!(
                "created question_id={} order={}",
                question.id, question.order
            );
        }
        Command::Reorder {
            survey_id,
            question_ids,
        } => {
            let request = ReorderQuestionsRequest {
                question_ids: question_ids.into_iter().map(QuestionId).collect(),
            };
            let questions = reorder_questions(&ctx, caller, SurveyId(survey_id), &request)
                .await
                .map_err(api_err)?;
            for question in questions {
                println!("{} {}", question.order, question.content);
            }
        }
        Command::SetStatus { survey_id, status } => {
            let survey = update_survey(
                &ctx,
                caller,
                SurveyId(survey_id),
                UpdateSurveyRequest {
                    status: Some(status),
                    ..UpdateSurveyRequest::default()
                },
            )
            .await
            .map_err(api_err)?;
            println!("survey_id={} status={}", survey.id, survey.status.as_str());
        }
        Command::ListSurveys => {
            for summary in list_surveys(&ctx, caller).await.map_err(api_err)? {
                println!(
                    "{}\t{}\t{}\tquestions={}\tresponses={}",
                    summary.id,
                    summary.status.as_str(),
                    summary.title,
                    summary.question_count,
                    summary.response_count
                );
            }
        }
        Command::ListResponses { survey_id } => {
            let responses = list_responses(&ctx, caller, SurveyId(survey_id))
                .await
                .map_err(api_err)?;
            println!("{}", serde_json::to_string_pretty(&responses)?);
        }
    }

    Ok(())
}
