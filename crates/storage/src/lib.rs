use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::debug;

use shared::{
    domain::{AnswerId, QuestionId, QuestionType, ResponseId, SurveyId, SurveyStatus, UserId},
    protocol::{Branding, CoverPage, EndingPage},
};

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredSurvey {
    pub survey_id: SurveyId,
    pub owner_id: UserId,
    pub title: String,
    pub description: Option<String>,
    pub status: SurveyStatus,
    pub branding: Branding,
    pub cover: CoverPage,
    pub ending: EndingPage,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewSurvey {
    pub owner_id: UserId,
    pub title: String,
    pub description: Option<String>,
    pub status: SurveyStatus,
    pub branding: Branding,
    pub cover: CoverPage,
    pub ending: EndingPage,
}

#[derive(Debug, Clone)]
pub struct SurveyListing {
    pub survey: StoredSurvey,
    pub question_count: u64,
    pub response_count: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredQuestion {
    pub question_id: QuestionId,
    pub survey_id: SurveyId,
    pub content: String,
    pub question_type: QuestionType,
    pub options: Vec<String>,
    pub required: bool,
    pub order_index: i64,
}

#[derive(Debug, Clone)]
pub struct NewQuestion {
    pub content: String,
    pub question_type: QuestionType,
    pub options: Vec<String>,
    pub required: bool,
    /// `None` appends after the current last question on insert and keeps
    /// the current position on update.
    pub order_index: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredResponse {
    pub response_id: ResponseId,
    pub survey_id: SurveyId,
    pub respondent_id: Option<UserId>,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredAnswer {
    pub answer_id: AnswerId,
    pub response_id: ResponseId,
    pub question_id: QuestionId,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct NewAnswer {
    pub question_id: QuestionId,
    pub value: String,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);

        // Every connection to `sqlite::memory:` opens its own private database.
        let in_memory = database_url.starts_with("sqlite::memory:");
        let mut pool_options = SqlitePoolOptions::new().max_connections(if in_memory { 1 } else { 5 });
        if in_memory {
            pool_options = pool_options.idle_timeout(None).max_lifetime(None);
        }

        let pool = pool_options.connect_with(connect_options).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn create_survey(&self, survey: &NewSurvey) -> Result<SurveyId> {
        let now = Utc::now();
        let rec = sqlx::query(
            "INSERT INTO surveys (owner_user_id, title, description, status, branding_json, cover_json, ending_json, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(survey.owner_id.0)
        .bind(&survey.title)
        .bind(survey.description.as_deref())
        .bind(survey.status.as_str())
        .bind(to_json_column(&survey.branding)?)
        .bind(to_json_column(&survey.cover)?)
        .bind(to_json_column(&survey.ending)?)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .context("failed to insert survey")?;
        Ok(SurveyId(rec.get::<i64, _>(0)))
    }

    pub async fn load_survey(&self, survey_id: SurveyId) -> Result<Option<StoredSurvey>> {
        let row = sqlx::query(
            "SELECT id, owner_user_id, title, description, status, branding_json, cover_json, ending_json, created_at, updated_at
             FROM surveys WHERE id = ?",
        )
        .bind(survey_id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(survey_from_row).transpose()
    }

    /// Writes every mutable column of `survey` and bumps `updated_at`.
    pub async fn save_survey(&self, survey: &StoredSurvey) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE surveys
             SET title = ?, description = ?, status = ?, branding_json = ?, cover_json = ?, ending_json = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&survey.title)
        .bind(survey.description.as_deref())
        .bind(survey.status.as_str())
        .bind(to_json_column(&survey.branding)?)
        .bind(to_json_column(&survey.cover)?)
        .bind(to_json_column(&survey.ending)?)
        .bind(Utc::now())
        .bind(survey.survey_id.0)
        .execute(&self.pool)
        .await
        .context("failed to update survey")?;
        Ok(result.rows_affected() == 1)
    }

    /// Removes the survey together with its questions, responses and answers.
    pub async fn delete_survey(&self, survey_id: SurveyId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM surveys WHERE id = ?")
            .bind(survey_id.0)
            .execute(&self.pool)
            .await
            .context("failed to delete survey")?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn list_surveys_for_owner(&self, owner_id: UserId) -> Result<Vec<SurveyListing>> {
        let rows = sqlx::query(
            "SELECT s.id, s.owner_user_id, s.title, s.description, s.status, s.branding_json, s.cover_json, s.ending_json, s.created_at, s.updated_at,
                    (SELECT COUNT(*) FROM questions q WHERE q.survey_id = s.id),
                    (SELECT COUNT(*) FROM responses r WHERE r.survey_id = s.id)
             FROM surveys s
             WHERE s.owner_user_id = ?
             ORDER BY s.updated_at DESC, s.id DESC",
        )
        .bind(owner_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| {
                Ok(SurveyListing {
                    survey: survey_from_row(r)?,
                    question_count: count_column(r, 10),
                    response_count: count_column(r, 11),
                })
            })
            .collect()
    }

    pub async fn add_question(&self, survey_id: SurveyId, question: &NewQuestion) -> Result<QuestionId> {
        let rec = sqlx::query(
            "INSERT INTO questions (survey_id, content, question_type, options_json, required, order_index)
             VALUES (?1, ?2, ?3, ?4, ?5,
                     COALESCE(?6, (SELECT COALESCE(MAX(order_index) + 1, 0) FROM questions WHERE survey_id = ?1)))
             RETURNING id",
        )
        .bind(survey_id.0)
        .bind(&question.content)
        .bind(question.question_type.as_str())
        .bind(to_json_column(&question.options)?)
        .bind(question.required)
        .bind(question.order_index)
        .fetch_one(&self.pool)
        .await
        .context("failed to insert question")?;
        Ok(QuestionId(rec.get::<i64, _>(0)))
    }

    pub async fn load_question(&self, question_id: QuestionId) -> Result<Option<StoredQuestion>> {
        let row = sqlx::query(
            "SELECT id, survey_id, content, question_type, options_json, required, order_index
             FROM questions WHERE id = ?",
        )
        .bind(question_id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(question_from_row).transpose()
    }

    pub async fn update_question(&self, question_id: QuestionId, question: &NewQuestion) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE questions
             SET content = ?, question_type = ?, options_json = ?, required = ?, order_index = COALESCE(?, order_index)
             WHERE id = ?",
        )
        .bind(&question.content)
        .bind(question.question_type.as_str())
        .bind(to_json_column(&question.options)?)
        .bind(question.required)
        .bind(question.order_index)
        .bind(question_id.0)
        .execute(&self.pool)
        .await
        .context("failed to update question")?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn delete_question(&self, question_id: QuestionId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM questions WHERE id = ?")
            .bind(question_id.0)
            .execute(&self.pool)
            .await
            .context("failed to delete question")?;
        Ok(result.rows_affected() == 1)
    }

    /// Questions in presentation order: ascending `order_index`, insertion
    /// order among equal indexes.
    pub async fn list_questions_for_survey(&self, survey_id: SurveyId) -> Result<Vec<StoredQuestion>> {
        let rows = sqlx::query(
            "SELECT id, survey_id, content, question_type, options_json, required, order_index
             FROM questions
             WHERE survey_id = ?
             ORDER BY order_index ASC, id ASC",
        )
        .bind(survey_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(question_from_row).collect()
    }

    /// Assigns `order_index` 0..n following `ordered`. Every id must belong
    /// to `survey_id`; otherwise nothing is changed.
    pub async fn reorder_questions(&self, survey_id: SurveyId, ordered: &[QuestionId]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for (position, question_id) in ordered.iter().enumerate() {
            let updated = sqlx::query(
                "UPDATE questions SET order_index = ? WHERE id = ? AND survey_id = ?",
            )
            .bind(position as i64)
            .bind(question_id.0)
            .bind(survey_id.0)
            .execute(&mut *tx)
            .await?
            .rows_affected();
            if updated != 1 {
                tx.rollback().await?;
                return Err(anyhow!(
                    "question {} does not belong to survey {}",
                    question_id.0,
                    survey_id.0
                ));
            }
        }

        tx.commit().await?;
        Ok(())
    }

    /// Writes one response and all of its answers as a single transaction.
    /// On any failure the transaction is rolled back and no row from this
    /// call remains.
    pub async fn insert_response_batch(
        &self,
        survey_id: SurveyId,
        respondent_id: Option<UserId>,
        answers: &[NewAnswer],
    ) -> Result<(ResponseId, u64)> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to begin response transaction")?;

        let rec = sqlx::query(
            "INSERT INTO responses (survey_id, respondent_id, submitted_at) VALUES (?, ?, ?) RETURNING id",
        )
        .bind(survey_id.0)
        .bind(respondent_id.map(|id| id.0))
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await
        .with_context(|| format!("failed to insert response for survey {}", survey_id.0))?;
        let response_id = ResponseId(rec.get::<i64, _>(0));

        let mut written = 0u64;
        for (index, answer) in answers.iter().enumerate() {
            sqlx::query("INSERT INTO answers (response_id, question_id, value) VALUES (?, ?, ?)")
                .bind(response_id.0)
                .bind(answer.question_id.0)
                .bind(&answer.value)
                .execute(&mut *tx)
                .await
                .with_context(|| {
                    format!(
                        "failed to insert answer {index} (question {}) for response {}",
                        answer.question_id.0, response_id.0
                    )
                })?;
            written += 1;
        }

        tx.commit()
            .await
            .context("failed to commit response transaction")?;
        debug!(survey_id = survey_id.0, response_id = response_id.0, written, "response batch committed");
        Ok((response_id, written))
    }

    pub async fn load_response(&self, response_id: ResponseId) -> Result<Option<StoredResponse>> {
        let row = sqlx::query(
            "SELECT id, survey_id, respondent_id, submitted_at FROM responses WHERE id = ?",
        )
        .bind(response_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(response_from_row))
    }

    /// Newest first.
    pub async fn list_responses_for_survey(&self, survey_id: SurveyId) -> Result<Vec<StoredResponse>> {
        let rows = sqlx::query(
            "SELECT id, survey_id, respondent_id, submitted_at
             FROM responses
             WHERE survey_id = ?
             ORDER BY submitted_at DESC, id DESC",
        )
        .bind(survey_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(response_from_row).collect())
    }

    pub async fn count_responses_for_survey(&self, survey_id: SurveyId) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM responses WHERE survey_id = ?")
            .bind(survey_id.0)
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    pub async fn list_answers_for_response(&self, response_id: ResponseId) -> Result<Vec<StoredAnswer>> {
        let rows = sqlx::query(
            "SELECT id, response_id, question_id, value FROM answers WHERE response_id = ? ORDER BY id ASC",
        )
        .bind(response_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(answer_from_row).collect())
    }

    /// All answers of all responses to `survey_id`, grouped by response in
    /// insertion order.
    pub async fn list_answers_for_survey(&self, survey_id: SurveyId) -> Result<Vec<StoredAnswer>> {
        let rows = sqlx::query(
            "SELECT a.id, a.response_id, a.question_id, a.value
             FROM answers a
             INNER JOIN responses r ON r.id = a.response_id
             WHERE r.survey_id = ?
             ORDER BY a.response_id ASC, a.id ASC",
        )
        .bind(survey_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(answer_from_row).collect())
    }

    pub async fn count_answers_for_survey(&self, survey_id: SurveyId) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM answers a INNER JOIN responses r ON r.id = a.response_id WHERE r.survey_id = ?",
        )
        .bind(survey_id.0)
        .fetch_one(&self.pool)
        .await?;
        Ok(u64::try_from(count).unwrap_or_default())
    }
}

fn survey_from_row(r: &SqliteRow) -> Result<StoredSurvey> {
    let status_raw = r.get::<String, _>(4);
    let status = status_raw
        .parse::<SurveyStatus>()
        .with_context(|| format!("survey {} has unreadable status", r.get::<i64, _>(0)))?;
    Ok(StoredSurvey {
        survey_id: SurveyId(r.get::<i64, _>(0)),
        owner_id: UserId(r.get::<i64, _>(1)),
        title: r.get::<String, _>(2),
        description: r.get::<Option<String>, _>(3),
        status,
        branding: from_json_column(&r.get::<String, _>(5))?,
        cover: from_json_column(&r.get::<String, _>(6))?,
        ending: from_json_column(&r.get::<String, _>(7))?,
        created_at: r.get::<DateTime<Utc>, _>(8),
        updated_at: r.get::<DateTime<Utc>, _>(9),
    })
}

fn question_from_row(r: &SqliteRow) -> Result<StoredQuestion> {
    let question_id = r.get::<i64, _>(0);
    let question_type = r
        .get::<String, _>(3)
        .parse::<QuestionType>()
        .with_context(|| format!("question {question_id} has unreadable type"))?;
    Ok(StoredQuestion {
        question_id: QuestionId(question_id),
        survey_id: SurveyId(r.get::<i64, _>(1)),
        content: r.get::<String, _>(2),
        question_type,
        options: from_json_column(&r.get::<String, _>(4))?,
        required: r.get::<bool, _>(5),
        order_index: r.get::<i64, _>(6),
    })
}

fn response_from_row(r: &SqliteRow) -> StoredResponse {
    StoredResponse {
        response_id: ResponseId(r.get::<i64, _>(0)),
        survey_id: SurveyId(r.get::<i64, _>(1)),
        respondent_id: r.get::<Option<i64>, _>(2).map(UserId),
        submitted_at: r.get::<DateTime<Utc>, _>(3),
    }
}

fn answer_from_row(r: &SqliteRow) -> StoredAnswer {
    StoredAnswer {
        answer_id: AnswerId(r.get::<i64, _>(0)),
        response_id: ResponseId(r.get::<i64, _>(1)),
        question_id: QuestionId(r.get::<i64, _>(2)),
        value: r.get::<String, _>(3),
    }
}

fn count_column(r: &SqliteRow, index: usize) -> u64 {
    u64::try_from(r.get::<i64, _>(index)).unwrap_or_default()
}

fn to_json_column<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).context("failed to encode json column")
}

fn from_json_column<T: DeserializeOwned>(raw: &str) -> Result<T> {
    serde_json::from_str(raw).with_context(|| format!("failed to decode json column '{raw}'"))
}

/// Creates the directory a file-backed SQLite url points into.
pub fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.starts_with("sqlite::memory:") || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
