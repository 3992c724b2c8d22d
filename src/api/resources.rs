use std::sync::Arc;

use axum::{
    extract::State,
    response::Response,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};

use super::envelope;
use super::extract::{Actor, ApiPath, ApiQuery, ResponseCase, ValidJson};
use crate::change_logs::{ChangeEntry, ChangeLogStore};
use crate::error::Result;
use crate::interfaces::resource::{Duplicable, Resource};
use crate::query::{ListParams, SearchParams};

/// Per-resource router state: the repository plus what every mutation needs.
pub struct ResourceState<R> {
    pub store: Arc<R>,
    pub change_logs: Arc<ChangeLogStore>,
    pub default_page_size: u32,
}

impl<R> Clone for ResourceState<R> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            change_logs: Arc::clone(&self.change_logs),
            default_page_size: self.default_page_size,
        }
    }
}

/// Appends a change log entry. A failed write is logged and never fails the
/// request that already succeeded.
pub(crate) async fn log_change(
    change_logs: &ChangeLogStore,
    entity_type: &str,
    entity_id: i32,
    action: &str,
    actor: Actor,
    changes: Value,
) {
    let entry = ChangeEntry {
        entity_type,
        entity_id,
        action,
        user_id: actor.0,
        changes,
    };
    if let Err(err) = change_logs.record(entry).await {
        tracing::warn!(entity_type, entity_id, action, error = %err, "Failed to write change log");
    }
}

/// list, create, get, update, delete, restore, search and stats.
pub fn routes<R: Resource>(state: ResourceState<R>) -> Router {
    Router::new()
        .route("/", get(list::<R>).post(create::<R>))
        .route("/search", get(search::<R>))
        .route("/stats", get(stats::<R>))
        .route(
            "/{id}",
            get(fetch::<R>).put(update::<R>).delete(remove::<R>),
        )
        .route("/{id}/restore", post(restore::<R>))
        .with_state(state)
}

/// [`routes`] plus `POST /{id}/duplicate`.
pub fn duplicable_routes<R: Duplicable>(state: ResourceState<R>) -> Router {
    let duplicate_route = Router::new()
        .route("/{id}/duplicate", post(duplicate::<R>))
        .with_state(state.clone());
    routes(state).merge(duplicate_route)
}

async fn list<R: Resource>(
    State(state): State<ResourceState<R>>,
    ResponseCase(case): ResponseCase,
    ApiQuery(mut params): ApiQuery<ListParams>,
) -> Result<Response> {
    params.limit.get_or_insert(state.default_page_size);
    let page = state.store.list(&params).await?;
    envelope::page(page, case)
}

async fn search<R: Resource>(
    State(state): State<ResourceState<R>>,
    ResponseCase(case): ResponseCase,
    ApiQuery(mut params): ApiQuery<SearchParams>,
) -> Result<Response> {
    params.limit.get_or_insert(state.default_page_size);
    let term = params.term()?;
    let found = state.store.search(term, params.limit()).await?;
    envelope::ok(&found, case)
}

async fn stats<R: Resource>(
    State(state): State<ResourceState<R>>,
    ResponseCase(case): ResponseCase,
) -> Result<Response> {
    let stats = state.store.stats().await?;
    envelope::ok(&stats, case)
}

async fn fetch<R: Resource>(
    State(state): State<ResourceState<R>>,
    ResponseCase(case): ResponseCase,
    ApiPath(id): ApiPath<i32>,
) -> Result<Response> {
    let record = state.store.get(id).await?;
    envelope::ok(&record, case)
}

async fn create<R: Resource>(
    State(state): State<ResourceState<R>>,
    ResponseCase(case): ResponseCase,
    actor: Actor,
    body: ValidJson<R::Create>,
) -> Result<Response> {
    let record = state.store.create(body.value).await?;
    let id = R::id_of(&record);
    log_change(&state.change_logs, R::ENTITY, id, "create", actor, body.raw).await;
    envelope::created(&record, case)
}

async fn update<R: Resource>(
    State(state): State<ResourceState<R>>,
    ResponseCase(case): ResponseCase,
    actor: Actor,
    ApiPath(id): ApiPath<i32>,
    body: ValidJson<R::Update>,
) -> Result<Response> {
    let record = state.store.update(id, body.value).await?;
    log_change(&state.change_logs, R::ENTITY, id, "update", actor, body.raw).await;
    envelope::ok(&record, case)
}

async fn remove<R: Resource>(
    State(state): State<ResourceState<R>>,
    ResponseCase(case): ResponseCase,
    actor: Actor,
    ApiPath(id): ApiPath<i32>,
) -> Result<Response> {
    state.store.soft_delete(id).await?;
    log_change(&state.change_logs, R::ENTITY, id, "delete", actor, json!({})).await;
    envelope::ok(&json!({ "id": id, "deleted": true }), case)
}

async fn restore<R: Resource>(
    State(state): State<ResourceState<R>>,
    ResponseCase(case): ResponseCase,
    actor: Actor,
    ApiPath(id): ApiPath<i32>,
) -> Result<Response> {
    let record = state.store.restore(id).await?;
    log_change(&state.change_logs, R::ENTITY, id, "restore", actor, json!({})).await;
    envelope::ok(&record, case)
}

async fn duplicate<R: Duplicable>(
    State(state): State<ResourceState<R>>,
    ResponseCase(case): ResponseCase,
    actor: Actor,
    ApiPath(id): ApiPath<i32>,
) -> Result<Response> {
    let copy = state.store.duplicate(id).await?;
    let copy_id = R::id_of(&copy);
    log_change(
        &state.change_logs,
        R::ENTITY,
        copy_id,
        "duplicate",
        actor,
        json!({ "source_id": id }),
    )
    .await;
    envelope::created(&copy, case)
}
