use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use shared::{
    domain::{SurveyId, UserId},
    protocol::{
        DataEnvelope, ErrorEnvelope, SubmitResponseReply, SubmitResponseRequest,
        SubmittedResponse, SurveyView,
    },
};
use tracing::debug;
use url::Url;

use crate::error::ClientError;

/// The two calls a participant makes against the survey backend.
#[async_trait]
pub trait SurveyApi: Send + Sync {
    async fn fetch_survey(&self, survey_id: SurveyId) -> Result<SurveyView, ClientError>;
    async fn submit_response(
        &self,
        survey_id: SurveyId,
        request: &SubmitResponseRequest,
    ) -> Result<SubmittedResponse, ClientError>;
}

#[derive(Serialize)]
struct CallerQuery {
    user_id: i64,
}

pub struct HttpSurveyApi {
    http: Client,
    base_url: Url,
    respondent: Option<UserId>,
}

impl HttpSurveyApi {
    pub fn new(server_url: &str) -> Result<Self, ClientError> {
        let mut base_url = Url::parse(server_url.trim())?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            http: Client::new(),
            base_url,
            respondent: None,
        })
    }

    /// Attributes submissions to an already authenticated user.
    pub fn with_respondent(mut self, user_id: UserId) -> Self {
        self.respondent = Some(user_id);
        self
    }

    fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        Ok(self.base_url.join(path)?)
    }
}

#[async_trait]
impl SurveyApi for HttpSurveyApi {
    async fn fetch_survey(&self, survey_id: SurveyId) -> Result<SurveyView, ClientError> {
        let url = self.endpoint(&format!("surveys/{}", survey_id.0))?;
        debug!(%url, "fetching survey");
        let response = self.http.get(url).send().await?;
        let envelope: DataEnvelope<SurveyView> = decode(response).await?;
        Ok(envelope.data)
    }

    async fn submit_response(
        &self,
        survey_id: SurveyId,
        request: &SubmitResponseRequest,
    ) -> Result<SubmittedResponse, ClientError> {
        let url = self.endpoint(&format!("surveys/{}/response", survey_id.0))?;
        let mut builder = self.http.post(url).json(request);
        if let Some(user_id) = self.respondent {
            builder = builder.query(&CallerQuery { user_id: user_id.0 });
        }
        let reply: SubmitResponseReply = decode(builder.send().await?).await?;
        Ok(SubmittedResponse {
            response_id: reply.response_id,
            answer_count: reply.answer_count,
        })
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Err(ClientError::NotFound);
    }

    let body = response.bytes().await?;
    if !status.is_success() {
        let message = serde_json::from_slice::<ErrorEnvelope>(&body)
            .map(|envelope| envelope.message)
            .unwrap_or_else(|_| String::from_utf8_lossy(&body).into_owned());
        return Err(ClientError::Api {
            status: status.as_u16(),
            message,
        });
    }

    serde_json::from_slice(&body).map_err(|error| ClientError::Decode(error.to_string()))
}

#[cfg(test)]
#[path = "tests/api_tests.rs"]
mod tests;
