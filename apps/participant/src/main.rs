use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Parser;
use client_core::{FlowState, HttpSurveyApi, ParticipantFlow, SurveySession};
use shared::{
    domain::{AnswerValue, QuestionType, SurveyId, UserId},
    protocol::QuestionView,
};
use tokio::io::{self, AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    server_url: String,
    #[arg(long)]
    survey_id: i64,
    /// Attribute the response to this user instead of submitting anonymously.
    #[arg(long)]
    user_id: Option<i64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();
    let args = Args::parse();

    let mut api = HttpSurveyApi::new(&args.server_url)?;
    if let Some(user_id) = args.user_id {
        api = api.with_respondent(UserId(user_id));
    }
    let session = SurveySession::load(Arc::new(api), SurveyId(args.survey_id)).await?;
    let mut input = BufReader::new(io::stdin()).lines();

    loop {
        let state = session.state().await;
        match state {
            FlowState::NotFound => bail!("survey {} not found", args.survey_id),
            FlowState::Start => {
                print_cover(&*session.flow().await);
                let Some(_) = read_line(&mut input).await? else {
                    return Ok(());
                };
                session.flow().await.begin()?;
            }
            FlowState::Question(index) => {
                let Some(question) = session.flow().await.current_question().cloned() else {
                    bail!("question {index} is missing");
                };
                print_question(index, &question);
                let Some(line) = read_line(&mut input).await? else {
                    return Ok(());
                };
                handle_question_input(&session, &question, &line).await;
            }
            FlowState::Review => {
                print_review(&*session.flow().await);
                let Some(line) = read_line(&mut input).await? else {
                    return Ok(());
                };
                handle_review_input(&session, &line).await;
            }
            FlowState::Done => {
                print_ending(&*session.flow().await);
                match read_line(&mut input).await?.as_deref() {
                    Some("restart") => {
                        session.flow().await.restart()?;
                    }
                    _ => return Ok(()),
                }
            }
        }
    }
}

async fn read_line(input: &mut Lines<BufReader<Stdin>>) -> Result<Option<String>> {
    Ok(input.next_line().await?.map(|line| line.trim().to_string()))
}

async fn handle_question_input(session: &SurveySession, question: &QuestionView, line: &str) {
    let mut flow = session.flow().await;
    let outcome = match line {
        ":back" => flow.previous().map(|_| ()),
        ":clear" => flow.clear_answer(question.id),
        "" => flow.next().map(|_| ()),
        raw => match parse_answer(question, raw) {
            Ok(value) => flow
                .set_answer(question.id, value)
                .and_then(|()| flow.next().map(|_| ())),
            Err(message) => {
                println!("  ! {message}");
                return;
            }
        },
    };
    if let Err(error) = outcome {
        let message = flow
            .validation_message()
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        println!("  ! {message}");
    }
}

async fn handle_review_input(session: &SurveySession, line: &str) {
    if line == "submit" {
        match session.submit().await {
            Ok(FlowState::Done) => {}
            Ok(_) => {
                if let Some(error) = session.flow().await.submit_error() {
                    println!("  ! submission failed: {error} (type submit to retry)");
                }
            }
            Err(error) => println!("  ! {error}"),
        }
        return;
    }

    let target = line
        .strip_prefix("edit ")
        .and_then(|n| n.trim().parse::<usize>().ok())
        .and_then(|n| n.checked_sub(1));
    match target {
        Some(index) => {
            if let Err(error) = session.flow().await.edit(index) {
                println!("  ! {error}");
            }
        }
        None => println!("  ! type `submit` or `edit <number>`"),
    }
}

/// Turns a typed line into an answer. Choice questions accept option
/// numbers (comma separated for multi-select) or the option text.
fn parse_answer(question: &QuestionView, raw: &str) -> Result<AnswerValue, String> {
    let pick = |token: &str| -> Result<String, String> {
        let token = token.trim();
        if let Ok(n) = token.parse::<usize>() {
            return n
                .checked_sub(1)
                .and_then(|i| question.options.get(i))
                .cloned()
                .ok_or_else(|| format!("no option {n}"));
        }
        question
            .options
            .iter()
            .find(|option| option.eq_ignore_ascii_case(token))
            .cloned()
            .ok_or_else(|| format!("unknown option '{token}'"))
    };

    match question.question_type {
        QuestionType::Checkbox => raw
            .split(',')
            .filter(|token| !token.trim().is_empty())
            .map(pick)
            .collect::<Result<Vec<_>, _>>()
            .map(AnswerValue::Choices),
        t if t.requires_options() => pick(raw).map(AnswerValue::Text),
        QuestionType::StarRating | QuestionType::Scale => raw
            .parse::<f64>()
            .map(AnswerValue::Number)
            .map_err(|_| format!("'{raw}' is not a number")),
        QuestionType::YesNo => match raw.to_ascii_lowercase().as_str() {
            "y" | "yes" => Ok(AnswerValue::from("yes")),
            "n" | "no" => Ok(AnswerValue::from("no")),
            _ => Err("answer yes or no".to_string()),
        },
        _ => Ok(AnswerValue::from(raw)),
    }
}

fn print_cover(flow: &ParticipantFlow) {
    let Some(survey) = flow.survey() else {
        return;
    };
    println!();
    println!("== {} ==", survey.cover.heading.as_deref().unwrap_or(&survey.title));
    if let Some(body) = survey.cover.body.as_deref().or(survey.description.as_deref()) {
        println!("{body}");
    }
    println!(
        "[{}] press enter",
        survey.cover.button_label.as_deref().unwrap_or("Start")
    );
}

fn print_question(index: usize, question: &QuestionView) {
    println!();
    let marker = if question.required { " *" } else { "" };
    println!("{}. {}{marker}", index + 1, question.content);
    for (i, option) in question.options.iter().enumerate() {
        println!("   {}) {option}", i + 1);
    }
    println!("   (enter to continue, :back, :clear)");
}

fn print_review(flow: &ParticipantFlow) {
    println!();
    println!("== Review ==");
    for (i, question) in flow.questions().iter().enumerate() {
        let shown = match flow.answer(question.id) {
            Some(AnswerValue::Text(text)) => text.clone(),
            Some(AnswerValue::Number(n)) => n.to_string(),
            Some(AnswerValue::Choices(choices)) => choices.join(", "),
            None => "-".to_string(),
        };
        println!("{}. {}: {shown}", i + 1, question.content);
    }
    println!("(submit, edit <number>)");
}

fn print_ending(flow: &ParticipantFlow) {
    let ending = flow.survey().map(|survey| &survey.ending);
    println!();
    println!(
        "== {} ==",
        ending
            .and_then(|e| e.heading.as_deref())
            .unwrap_or("Thank you")
    );
    if let Some(message) = ending.and_then(|e| e.message.as_deref()) {
        println!("{message}");
    }
    if let Some(response_id) = flow.response_id() {
        println!("response #{response_id} recorded");
    }
    println!("(restart, or enter to quit)");
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::domain::QuestionId;

    fn question(question_type: QuestionType) -> QuestionView {
        QuestionView {
            id: QuestionId(1),
            content: "Pick".into(),
            question_type,
            options: vec!["Red".into(), "Green".into(), "Blue".into()],
            required: false,
            order: 0,
        }
    }

    #[test]
    fn choice_answers_accept_numbers_or_labels() {
        let radio = question(QuestionType::Radio);
        assert_eq!(parse_answer(&radio, "2"), Ok(AnswerValue::from("Green")));
        assert_eq!(parse_answer(&radio, "blue"), Ok(AnswerValue::from("Blue")));
        assert!(parse_answer(&radio, "9").is_err());
    }

    #[test]
    fn checkbox_answers_split_on_commas() {
        let checkbox = question(QuestionType::Checkbox);
        assert_eq!(
            parse_answer(&checkbox, "1, 3"),
            Ok(AnswerValue::Choices(vec!["Red".into(), "Blue".into()]))
        );
    }

    #[test]
    fn ratings_must_be_numeric() {
        let rating = question(QuestionType::StarRating);
        assert_eq!(parse_answer(&rating, "4"), Ok(AnswerValue::Number(4.0)));
        assert!(parse_answer(&rating, "lots").is_err());
    }
}
