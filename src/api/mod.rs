use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::change_logs::ChangeLogStore;
use crate::config::{Config, CorsOrigins};
use crate::db::Database;
use crate::devices::DeviceStore;
use crate::error::{AdminError, Result};
use crate::problems::ProblemStore;
use crate::remotes::RemoteStore;
use crate::sessions::SessionStore;
use crate::settings::SettingsStore;
use crate::steps::StepStore;
use crate::tv_interfaces::TvInterfaceStore;
use crate::users::UserStore;

pub mod envelope;
pub mod extract;
mod handlers;
pub mod resources;

use resources::ResourceState;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub devices: Arc<DeviceStore>,
    pub problems: Arc<ProblemStore>,
    pub steps: Arc<StepStore>,
    pub remotes: Arc<RemoteStore>,
    pub users: Arc<UserStore>,
    pub tv_interfaces: Arc<TvInterfaceStore>,
    pub change_logs: Arc<ChangeLogStore>,
    pub settings: Arc<SettingsStore>,
    pub sessions: Arc<SessionStore>,
    pub token: String,
    pub cors_origins: CorsOrigins,
    pub default_page_size: u32,
}

impl AppState {
    pub fn new(db: Database, config: &Config) -> Self {
        Self {
            devices: Arc::new(DeviceStore::new(db.clone())),
            problems: Arc::new(ProblemStore::new(db.clone())),
            steps: Arc::new(StepStore::new(db.clone())),
            remotes: Arc::new(RemoteStore::new(db.clone())),
            users: Arc::new(UserStore::new(db.clone())),
            tv_interfaces: Arc::new(TvInterfaceStore::new(db.clone())),
            change_logs: Arc::new(ChangeLogStore::new(db.clone())),
            settings: Arc::new(SettingsStore::new(db.clone())),
            sessions: Arc::new(SessionStore::new(db.clone())),
            db,
            token: config.api_token.trim().to_string(),
            cors_origins: config.cors_origins.clone(),
            default_page_size: config.default_page_size,
        }
    }

    fn resource<R>(&self, store: &Arc<R>) -> ResourceState<R> {
        ResourceState {
            store: Arc::clone(store),
            change_logs: Arc::clone(&self.change_logs),
            default_page_size: self.default_page_size,
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: &'static str,
    git_sha: &'static str,
    database: String,
}

pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .nest(
            "/devices",
            resources::duplicable_routes(state.resource(&state.devices)),
        )
        .nest(
            "/problems",
            resources::duplicable_routes(state.resource(&state.problems)),
        )
        .nest(
            "/steps",
            resources::duplicable_routes(state.resource(&state.steps))
                .merge(handlers::step_routes(state.clone())),
        )
        .nest(
            "/remotes",
            resources::duplicable_routes(state.resource(&state.remotes))
                .merge(handlers::remote_routes(state.clone())),
        )
        .nest(
            "/users",
            resources::routes(state.resource(&state.users))
                .merge(handlers::user_routes(state.clone())),
        )
        .nest(
            "/tv-interfaces",
            resources::duplicable_routes(state.resource(&state.tv_interfaces)),
        )
        .nest("/change-logs", handlers::change_log_routes(state.clone()))
        .nest("/settings", handlers::settings_routes(state.clone()))
        .nest("/sessions", handlers::session_routes(state.clone()))
        .layer(middleware::from_fn_with_state(
            state.token.clone(),
            require_token,
        ));

    Router::new()
        .route("/health", get(health))
        .with_state(state.clone())
        .nest("/api/v1", api)
        .layer(cors_layer(&state.cors_origins))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let database = match state.db.ping().await {
        Ok(()) => "ok".to_string(),
        Err(err) => {
            tracing::warn!(error = %err, "Health check could not reach the database");
            "unavailable".to_string()
        }
    };
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION"),
        git_sha: option_env!("TVDIAG_GIT_SHA").unwrap_or("unknown"),
        database,
    })
}

async fn require_token(
    State(token): State<String>,
    request: Request,
    next: Next,
) -> Response {
    match authorize(request.headers(), &token) {
        Ok(()) => next.run(request).await,
        Err(err) => err.into_response(),
    }
}

/// Accepts `Authorization: Bearer <token>` or `x-api-key: <token>`. An empty
/// configured token rejects everything.
fn authorize(headers: &HeaderMap, token: &str) -> Result<()> {
    let expected_token = token.trim();
    if expected_token.is_empty() {
        return Err(AdminError::Unauthorized(
            "API token is not configured".to_string(),
        ));
    }

    let header = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let api_key = headers
        .get("x-api-key")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let bearer = header.strip_prefix("Bearer ").unwrap_or("").trim();
    let api_key = api_key.trim();

    if bearer == expected_token || api_key == expected_token {
        Ok(())
    } else {
        Err(AdminError::Unauthorized("Unauthorized".to_string()))
    }
}

fn cors_layer(origins: &CorsOrigins) -> CorsLayer {
    let allow_origin = match origins {
        CorsOrigins::Any(_) => AllowOrigin::from(Any),
        CorsOrigins::List(list) => AllowOrigin::list(list.iter().filter_map(|origin| {
            HeaderValue::from_str(origin)
                .map_err(|_| tracing::warn!(origin = %origin, "Ignoring invalid CORS origin"))
                .ok()
        })),
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static("x-api-key"),
            HeaderName::from_static(extract::KEY_CASE_HEADER),
            HeaderName::from_static(extract::USER_ID_HEADER),
        ])
        .max_age(Duration::from_secs(60 * 60))
}

pub async fn run_with_shutdown<F>(config: Config, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let db = Database::open(&config.db_path).await?;
    let state = AppState::new(db, &config);
    let app = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| AdminError::Runtime(e.to_string()))?;
    tracing::info!(%addr, db_path = %config.db_path, "Admin API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| AdminError::Runtime(e.to_string()))?;

    tracing::info!("Admin API stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorize_accepts_bearer_or_api_key() {
        let mut headers = HeaderMap::new();
        assert!(authorize(&headers, "secret").is_err());

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer secret"));
        assert!(authorize(&headers, "secret").is_ok());
        assert!(authorize(&headers, "other").is_err());

        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("secret"));
        assert!(authorize(&headers, "secret").is_ok());
    }

    #[test]
    fn empty_token_fails_closed() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert!(matches!(
            authorize(&headers, "  "),
            Err(AdminError::Unauthorized(_))
        ));
    }
}
