//! Routes that do not fit the uniform resource shape.

use axum::{
    extract::State,
    response::Response,
    routing::{get, post, put},
    Router,
};
use serde::Deserialize;
use serde_json::json;

use super::envelope;
use super::extract::{Actor, ApiPath, ApiQuery, ResponseCase, ValidJson};
use super::resources::log_change;
use super::AppState;
use crate::error::{AdminError, Result};
use crate::query::ListParams;
use crate::sessions::RecordSessionStep;
use crate::settings::PutSetting;
use crate::steps::{ReorderSteps, ReplaceActions};
use crate::users::{ChangePassword, LoginRequest};

pub fn step_routes(state: AppState) -> Router {
    Router::new()
        .route("/reorder", put(reorder_steps))
        .route("/{id}/actions", get(list_step_actions).put(replace_step_actions))
        .with_state(state)
}

pub fn remote_routes(state: AppState) -> Router {
    Router::new()
        .route("/default", get(default_remote))
        .route("/{id}/default", post(set_default_remote))
        .route("/{id}/usage", post(record_remote_usage))
        .with_state(state)
}

pub fn user_routes(state: AppState) -> Router {
    Router::new()
        .route("/login", post(login))
        .route("/{id}/password", put(change_password))
        .with_state(state)
}

pub fn change_log_routes(state: AppState) -> Router {
    Router::new()
        .route("/", get(list_change_logs))
        .route("/stats", get(change_log_stats))
        .route("/{id}", get(get_change_log))
        .with_state(state)
}

pub fn settings_routes(state: AppState) -> Router {
    Router::new()
        .route("/", get(list_settings))
        .route(
            "/{key}",
            get(get_setting).put(put_setting).delete(delete_setting),
        )
        .with_state(state)
}

pub fn session_routes(state: AppState) -> Router {
    Router::new()
        .route("/stats", get(session_stats))
        .route(
            "/{session_id}/steps",
            get(list_session_steps).post(record_session_step),
        )
        .with_state(state)
}

async fn reorder_steps(
    State(state): State<AppState>,
    ResponseCase(case): ResponseCase,
    actor: Actor,
    body: ValidJson<ReorderSteps>,
) -> Result<Response> {
    let ReorderSteps {
        problem_id,
        ordered_ids,
    } = &body.value;
    let steps = state.steps.reorder(*problem_id, ordered_ids).await?;
    log_change(
        &state.change_logs,
        "problem",
        *problem_id,
        "update",
        actor,
        json!({ "reordered_step_ids": ordered_ids }),
    )
    .await;
    envelope::ok(&steps, case)
}

async fn list_step_actions(
    State(state): State<AppState>,
    ResponseCase(case): ResponseCase,
    ApiPath(id): ApiPath<i32>,
) -> Result<Response> {
    let actions = state.steps.list_actions(id).await?;
    envelope::ok(&actions, case)
}

async fn replace_step_actions(
    State(state): State<AppState>,
    ResponseCase(case): ResponseCase,
    actor: Actor,
    ApiPath(id): ApiPath<i32>,
    body: ValidJson<ReplaceActions>,
) -> Result<Response> {
    let actions = state.steps.replace_actions(id, &body.value).await?;
    log_change(&state.change_logs, "step", id, "update", actor, body.raw).await;
    envelope::ok(&actions, case)
}

#[derive(Debug, Deserialize)]
struct DefaultRemoteQuery {
    #[serde(alias = "deviceId")]
    device_id: Option<i32>,
}

async fn default_remote(
    State(state): State<AppState>,
    ResponseCase(case): ResponseCase,
    ApiQuery(query): ApiQuery<DefaultRemoteQuery>,
) -> Result<Response> {
    let device_id = query
        .device_id
        .ok_or_else(|| AdminError::Validation("device_id is required".to_string()))?;
    let remote = state.remotes.default_for_device(device_id).await?;
    envelope::ok(&remote, case)
}

async fn set_default_remote(
    State(state): State<AppState>,
    ResponseCase(case): ResponseCase,
    actor: Actor,
    ApiPath(id): ApiPath<i32>,
) -> Result<Response> {
    let remote = state.remotes.set_default(id).await?;
    log_change(
        &state.change_logs,
        "remote",
        id,
        "update",
        actor,
        json!({ "is_default": true }),
    )
    .await;
    envelope::ok(&remote, case)
}

async fn record_remote_usage(
    State(state): State<AppState>,
    ResponseCase(case): ResponseCase,
    ApiPath(id): ApiPath<i32>,
) -> Result<Response> {
    let remote = state.remotes.increment_usage(id).await?;
    envelope::ok(&remote, case)
}

async fn login(
    State(state): State<AppState>,
    ResponseCase(case): ResponseCase,
    body: ValidJson<LoginRequest>,
) -> Result<Response> {
    let login = &body.value;
    let user = state.users.authenticate(&login.username, &login.password).await?;
    envelope::ok(&user, case)
}

async fn change_password(
    State(state): State<AppState>,
    ResponseCase(case): ResponseCase,
    actor: Actor,
    ApiPath(id): ApiPath<i32>,
    body: ValidJson<ChangePassword>,
) -> Result<Response> {
    let user = state.users.change_password(id, &body.value).await?;
    log_change(
        &state.change_logs,
        "user",
        id,
        "update",
        actor,
        json!({ "password_changed": true }),
    )
    .await;
    envelope::ok(&user, case)
}

async fn list_change_logs(
    State(state): State<AppState>,
    ResponseCase(case): ResponseCase,
    ApiQuery(mut params): ApiQuery<ListParams>,
) -> Result<Response> {
    params.limit.get_or_insert(state.default_page_size);
    let page = state.change_logs.list(&params).await?;
    envelope::page(page, case)
}

async fn change_log_stats(
    State(state): State<AppState>,
    ResponseCase(case): ResponseCase,
) -> Result<Response> {
    let stats = state.change_logs.stats().await?;
    envelope::ok(&stats, case)
}

async fn get_change_log(
    State(state): State<AppState>,
    ResponseCase(case): ResponseCase,
    ApiPath(id): ApiPath<i32>,
) -> Result<Response> {
    let entry = state.change_logs.get(id).await?;
    envelope::ok(&entry, case)
}

async fn list_settings(
    State(state): State<AppState>,
    ResponseCase(case): ResponseCase,
) -> Result<Response> {
    let settings = state.settings.list().await?;
    envelope::ok(&settings, case)
}

async fn get_setting(
    State(state): State<AppState>,
    ResponseCase(case): ResponseCase,
    ApiPath(key): ApiPath<String>,
) -> Result<Response> {
    let setting = state.settings.get(&key).await?;
    envelope::ok(&setting, case)
}

async fn put_setting(
    State(state): State<AppState>,
    ResponseCase(case): ResponseCase,
    actor: Actor,
    ApiPath(key): ApiPath<String>,
    body: ValidJson<PutSetting>,
) -> Result<Response> {
    let setting = state.settings.upsert(&key, &body.value).await?;
    log_change(
        &state.change_logs,
        "site_setting",
        setting.id,
        "update",
        actor,
        json!({ "key": key, "value": body.raw.get("value") }),
    )
    .await;
    envelope::ok(&setting, case)
}

async fn delete_setting(
    State(state): State<AppState>,
    ResponseCase(case): ResponseCase,
    actor: Actor,
    ApiPath(key): ApiPath<String>,
) -> Result<Response> {
    let removed = state.settings.delete(&key).await?;
    log_change(
        &state.change_logs,
        "site_setting",
        removed.id,
        "delete",
        actor,
        json!({ "key": key }),
    )
    .await;
    envelope::ok(&json!({ "key": removed.key, "deleted": true }), case)
}

async fn record_session_step(
    State(state): State<AppState>,
    ResponseCase(case): ResponseCase,
    ApiPath(session_id): ApiPath<String>,
    body: ValidJson<RecordSessionStep>,
) -> Result<Response> {
    let recorded = state.sessions.record_step(&session_id, &body.value).await?;
    envelope::created(&recorded, case)
}

async fn list_session_steps(
    State(state): State<AppState>,
    ResponseCase(case): ResponseCase,
    ApiPath(session_id): ApiPath<String>,
) -> Result<Response> {
    let steps = state.sessions.list_steps(&session_id).await?;
    envelope::ok(&steps, case)
}

async fn session_stats(
    State(state): State<AppState>,
    ResponseCase(case): ResponseCase,
) -> Result<Response> {
    let stats = state.sessions.stats().await?;
    envelope::ok(&stats, case)
}
