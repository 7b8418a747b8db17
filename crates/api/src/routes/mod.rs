use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Extension, Query, State};
use axum::{
    Json, Router,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use questline_domain::quest::QuestType;
use questline_domain::submissions::{ExistenceCheck, SubmissionDraft};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use validator::Validate;

use crate::middleware::CorrelationId;
use crate::{error::ApiError, middleware as app_middleware, observability, state::AppState};

pub fn router(state: AppState) -> Router {
    let mut app = Router::new()
        .route(
            "/health",
            get(health).fallback(app_middleware::method_fallback),
        )
        .route(
            "/metrics",
            get(metrics).fallback(app_middleware::method_fallback),
        )
        .route(
            "/check-submission",
            get(check_submission).fallback(app_middleware::method_fallback),
        )
        .route(
            "/submit",
            post(submit).fallback(app_middleware::method_fallback),
        )
        .route_layer(middleware::from_fn(app_middleware::metrics_layer))
        .layer(app_middleware::timeout_layer(&state.config))
        .layer(app_middleware::trace_layer())
        .layer(app_middleware::propagate_request_id_layer())
        .layer(app_middleware::set_request_id_layer())
        .layer(middleware::from_fn(
            app_middleware::correlation_id_middleware,
        ));

    if !state.config.is_test() {
        app = app.layer(app_middleware::rate_limit_layer(&state.config));
    }

    app.layer(middleware::map_response(app_middleware::error_envelope))
        .layer(app_middleware::cors_layer(&state.config))
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    environment: String,
    data_backend: &'static str,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        environment: state.config.app_env.clone(),
        data_backend: state.submissions.store_name(),
    })
}

async fn metrics() -> Response {
    match observability::render_metrics() {
        Some(body) => (StatusCode::OK, body).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[derive(Debug, Deserialize, Validate)]
struct CheckSubmissionQuery {
    #[validate(length(max = 128))]
    username: Option<String>,
    #[validate(length(max = 128))]
    quest_id: Option<String>,
    #[validate(length(max = 32))]
    quest_type: Option<String>,
}

async fn check_submission(
    State(state): State<AppState>,
    query: Result<Query<CheckSubmissionQuery>, QueryRejection>,
) -> Result<Json<ExistenceCheck>, ApiError> {
    let Query(query) = query.map_err(|err| ApiError::InvalidRequest(err.body_text()))?;
    query.validate()?;

    let username = present(&query.username);
    let quest_id = present(&query.quest_id);
    let quest_type = present(&query.quest_type);
    let missing = [
        ("username", username.is_none()),
        ("quest_id", quest_id.is_none()),
        ("quest_type", quest_type.is_none()),
    ]
    .into_iter()
    .filter(|(_, absent)| *absent)
    .map(|(name, _)| name.to_string())
    .collect::<Vec<_>>();
    let (Some(username), Some(quest_id), Some(quest_type)) = (username, quest_id, quest_type)
    else {
        return Err(ApiError::MissingRequiredFields(missing));
    };

    let quest_type: QuestType = quest_type.parse()?;
    let check = state
        .submissions
        .check_exists(quest_type, quest_id, username)
        .await?;
    observability::register_existence_check(quest_type.as_str(), check.exists);
    Ok(Json(check))
}

fn present(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct SubmissionDataRequest {
    #[validate(length(max = 128))]
    quest_id: Option<String>,
    #[validate(length(max = 128))]
    discord_username: Option<String>,
    #[validate(length(max = 128))]
    twitter_username: Option<String>,
    #[validate(length(max = 256))]
    user_status: Option<String>,
    #[validate(length(max = 4000))]
    short_answer: Option<String>,
    #[validate(length(max = 2048))]
    submission_link: Option<String>,
    #[validate(length(max = 2048))]
    tweet_post_link: Option<String>,
    #[validate(length(max = 2048))]
    reply_submission_link: Option<String>,
    #[validate(length(max = 2048))]
    retweet_submission_link: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct SubmitRequest {
    #[validate(length(max = 128))]
    quest_id: Option<String>,
    quest_type: Option<Value>,
    #[serde(default)]
    #[validate(nested)]
    submission_data: SubmissionDataRequest,
}

impl SubmitRequest {
    /// The top-level `questId` wins over the one nested in `submissionData`.
    fn into_draft(self) -> SubmissionDraft {
        let data = self.submission_data;
        SubmissionDraft {
            quest_id: self
                .quest_id
                .filter(|value| !value.trim().is_empty())
                .or(data.quest_id),
            discord_username: data.discord_username,
            twitter_username: data.twitter_username,
            user_status: data.user_status,
            short_answer: data.short_answer,
            submission_link: data.submission_link,
            tweet_post_link: data.tweet_post_link,
            reply_submission_link: data.reply_submission_link,
            retweet_submission_link: data.retweet_submission_link,
        }
    }
}

#[derive(Serialize)]
struct SubmitResponse {
    message: &'static str,
    data: Map<String, Value>,
}

async fn submit(
    State(state): State<AppState>,
    Extension(correlation_id): Extension<CorrelationId>,
    payload: Result<Json<SubmitRequest>, JsonRejection>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let Json(payload) = payload.map_err(|err| ApiError::InvalidRequest(err.body_text()))?;
    payload.validate()?;

    let quest_type = match &payload.quest_type {
        None | Some(Value::Null) => {
            return Err(ApiError::MissingRequiredFields(vec!["questType".into()]));
        }
        Some(raw) => QuestType::from_json(raw)?,
    };

    let draft = payload.into_draft();
    let result = state.submissions.submit(quest_type, &draft).await;
    let outcome = match &result {
        Ok(_) => "admitted",
        Err(err) => ApiError::from(err.clone()).error_code(),
    };
    observability::register_admission(quest_type.as_str(), outcome);
    tracing::info!(
        correlation_id = %correlation_id.0,
        quest_type = %quest_type,
        outcome,
        "submission handled"
    );

    let receipt = result?;
    Ok(Json(SubmitResponse {
        message: "Submission received",
        data: receipt.record,
    }))
}
