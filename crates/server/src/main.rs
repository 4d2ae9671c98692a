use std::{net::SocketAddr, sync::Arc};

use axum::{
    routing::{get, post, put},
    Router,
};
use server_api::ApiContext;
use storage::Storage;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod api;
mod app_state;
mod config;

use api::{
    healthz, http_add_question, http_create_survey, http_delete_question, http_delete_survey,
    http_get_survey, http_list_responses, http_list_surveys, http_reorder_questions,
    http_submit_response, http_survey_detail, http_update_question, http_update_survey,
    ws_handler,
};
use app_state::AppState;
use config::{load_settings, prepare_database_url};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let settings = load_settings();
    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;

    let state = AppState::new(ApiContext { storage });
    let app = build_router(Arc::new(state), settings.max_body_bytes);

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, max_body_bytes = settings.max_body_bytes, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/surveys", post(http_create_survey).get(http_list_surveys))
        .route(
            "/surveys/:id",
            get(http_get_survey)
                .put(http_update_survey)
                .delete(http_delete_survey),
        )
        .route("/admin/surveys/:id", get(http_survey_detail))
        .route("/surveys/:id/response", post(http_submit_response))
        .route("/surveys/:id/responses", get(http_list_responses))
        .route("/surveys/:id/questions", post(http_add_question))
        .route("/surveys/:id/questions/order", put(http_reorder_questions))
        .route(
            "/surveys/:id/questions/:question_id",
            put(http_update_question).delete(http_delete_question),
        )
        .route("/ws", get(ws_handler))
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .with_state(state)
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
