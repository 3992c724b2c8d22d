use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::{tempdir, TempDir};
use tower::ServiceExt;

use tvdiag_admin::api::{build_router, AppState};
use tvdiag_admin::config::Config;
use tvdiag_admin::db::Database;

const TOKEN: &str = "token";

async fn make_app(token: &str) -> (TempDir, Router) {
    let temp = tempdir().unwrap();
    let db_path = temp.path().join("admin-api.db").to_string_lossy().to_string();
    let config = Config {
        db_path: db_path.clone(),
        api_token: token.to_string(),
        ..Config::default()
    };
    let db = Database::open(&db_path).await.unwrap();
    let app = build_router(AppState::new(db, &config));
    (temp, app)
}

async fn call(
    app: &Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
    headers: &[(&str, &str)],
) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {TOKEN}"));
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    call(app, method, uri, body, &[]).await
}

#[tokio::test]
async fn health_is_public_and_api_requires_token() {
    let (_temp, app) = make_app(TOKEN).await;

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let health: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["database"], "ok");

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/devices")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["errorType"], "UNAUTHORIZED");

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/devices")
                .header("x-api-key", TOKEN)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn empty_token_fails_closed() {
    let (_temp, app) = make_app("").await;
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/devices")
                .header("authorization", "Bearer ")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn device_crud_envelope_and_soft_delete() {
    let (_temp, app) = make_app(TOKEN).await;

    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/devices",
        Some(json!({"name": "Box A", "manufacturer": "Arris", "orderIndex": 2})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["order_index"], 2);
    assert!(body["timestamp"].as_str().is_some());
    let id = body["data"]["id"].as_i64().unwrap();

    let (status, body) = send(&app, "GET", "/api/v1/devices?page=1&limit=10", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pagination"]["total"], 1);
    assert_eq!(body["pagination"]["totalPages"], 1);

    let (status, body) = send(
        &app,
        "PUT",
        &format!("/api/v1/devices/{id}"),
        Some(json!({"model": "VIP-4302"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["name"], "Box A");
    assert_eq!(body["data"]["model"], "VIP-4302");

    let (status, _) = send(&app, "DELETE", &format!("/api/v1/devices/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, "GET", &format!("/api/v1/devices/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["errorType"], "NOT_FOUND");

    let (_, body) = send(&app, "GET", "/api/v1/devices?includeInactive=true", None).await;
    assert_eq!(body["pagination"]["total"], 1);

    let (status, body) = send(&app, "POST", &format!("/api/v1/devices/{id}/restore"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["is_active"], true);

    let (status, body) = send(&app, "GET", "/api/v1/change-logs?entityType=device", None).await;
    assert_eq!(status, StatusCode::OK);
    let actions: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|entry| entry["action"].as_str().unwrap())
        .collect();
    assert_eq!(actions, vec!["restore", "delete", "update", "create"]);
}

#[tokio::test]
async fn camel_case_responses_on_request() {
    let (_temp, app) = make_app(TOKEN).await;
    let (_, body) = send(&app, "POST", "/api/v1/devices", Some(json!({"name": "Box A"}))).await;
    let device_id = body["data"]["id"].as_i64().unwrap();

    let (status, body) = call(
        &app,
        "POST",
        "/api/v1/remotes",
        Some(json!({
            "name": "Classic",
            "deviceId": device_id,
            "isDefault": true,
            "buttons": [{"id": "power", "isActive": true}]
        })),
        &[("x-key-case", "camel")],
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["deviceId"], device_id);
    assert_eq!(body["data"]["isDefault"], true);
    assert_eq!(body["data"]["buttons"][0]["isActive"], true);
    assert!(body["data"].get("device_id").is_none());

    let (_, body) = send(
        &app,
        "GET",
        &format!("/api/v1/remotes/default?deviceId={device_id}&case=camel"),
        None,
    )
    .await;
    assert_eq!(body["data"]["usageCount"], 0);
    assert_eq!(body["data"]["name"], "Classic");
}

#[tokio::test]
async fn validation_and_conflict_errors() {
    let (_temp, app) = make_app(TOKEN).await;

    let (status, body) = send(&app, "POST", "/api/v1/devices", Some(json!({"name": "  "}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errorType"], "VALIDATION_ERROR");

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/devices")
                .header("authorization", format!("Bearer {TOKEN}"))
                .header("content-type", "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let (status, body) = send(&app, "GET", "/api/v1/devices/abc", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errorType"], "VALIDATION_ERROR");

    let (status, _) = send(&app, "GET", "/api/v1/devices/search?q=", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, body) = send(&app, "POST", "/api/v1/devices", Some(json!({"name": "Box A"}))).await;
    let device_id = body["data"]["id"].as_i64().unwrap();
    send(
        &app,
        "POST",
        "/api/v1/problems",
        Some(json!({"title": "No signal", "deviceId": device_id})),
    )
    .await;

    let (status, body) = send(&app, "DELETE", &format!("/api/v1/devices/{device_id}"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["errorType"], "RESOURCE_IN_USE");

    let user = json!({"username": "alice", "email": "alice@example.com", "password": "s3cret-pass"});
    let (status, _) = send(&app, "POST", "/api/v1/users", Some(user.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, body) = send(&app, "POST", "/api/v1/users", Some(user)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["errorType"], "DUPLICATE_ERROR");
}

#[tokio::test]
async fn users_login_and_hash_never_leaks() {
    let (_temp, app) = make_app(TOKEN).await;
    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/users",
        Some(json!({
            "username": "root",
            "email": "root@example.com",
            "password": "s3cret-pass",
            "role": "admin",
            "displayName": "Root"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(body["data"].get("password_hash").is_none());
    assert!(body["data"].get("password").is_none());
    let id = body["data"]["id"].as_i64().unwrap();

    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/users/login",
        Some(json!({"username": "root", "password": "wrong-pass"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["errorType"], "UNAUTHORIZED");

    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/users/login",
        Some(json!({"username": "root", "password": "s3cret-pass"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["last_login_at"].as_i64().is_some());

    let (status, body) = send(&app, "DELETE", &format!("/api/v1/users/{id}"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["errorType"], "RESOURCE_IN_USE");

    let (_, body) = send(&app, "GET", "/api/v1/change-logs?entityType=user", None).await;
    let created = &body["data"][0]["changes"];
    assert_eq!(created["username"], "root");
    assert!(created.get("password").is_none());
}

#[tokio::test]
async fn steps_reorder_actions_and_sessions() {
    let (_temp, app) = make_app(TOKEN).await;
    let (_, body) = send(&app, "POST", "/api/v1/problems", Some(json!({"title": "No sound"}))).await;
    let problem_id = body["data"]["id"].as_i64().unwrap();

    let mut ids = Vec::new();
    for title in ["Check mute", "Check volume", "Check cable"] {
        let (status, body) = send(
            &app,
            "POST",
            "/api/v1/steps",
            Some(json!({
                "problemId": problem_id,
                "title": title,
                "instruction": format!("{title} now"),
                "actions": [{"actionType": "press_button", "button": "mute"}]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        ids.push(body["data"]["id"].as_i64().unwrap());
    }

    let (status, body) = send(
        &app,
        "PUT",
        "/api/v1/steps/reorder",
        Some(json!({"problemId": problem_id, "orderedIds": [ids[2], ids[0], ids[1]]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["id"], ids[2]);
    assert_eq!(body["data"][0]["step_number"], 1);

    let (status, _) = send(
        &app,
        "PUT",
        "/api/v1/steps/reorder",
        Some(json!({"problemId": problem_id, "orderedIds": [ids[0]]})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &app,
        "PUT",
        &format!("/api/v1/steps/{}/actions", ids[0]),
        Some(json!({"actions": [{"actionType": "press_button"}]})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errorType"], "VALIDATION_ERROR");

    let (status, body) = send(&app, "GET", &format!("/api/v1/steps/{}/actions", ids[0]), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["button"], "mute");

    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/sessions/sess-42/steps",
        Some(json!({"stepId": ids[0], "outcome": "completed", "durationSeconds": 12})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["problem_id"], problem_id);

    let (_, body) = send(&app, "GET", "/api/v1/sessions/stats", None).await;
    assert_eq!(body["data"]["by_outcome"]["completed"], 1);
}

#[tokio::test]
async fn settings_upsert_and_delete() {
    let (_temp, app) = make_app(TOKEN).await;

    let (status, body) = send(
        &app,
        "PUT",
        "/api/v1/settings/site.title",
        Some(json!({"value": "TV Help", "description": "Header"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["value"], "TV Help");

    let (status, _) = send(
        &app,
        "PUT",
        "/api/v1/settings/Bad%20Key",
        Some(json!({"value": 1})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, body) = send(&app, "GET", "/api/v1/settings", None).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (status, _) = send(&app, "DELETE", "/api/v1/settings/site.title", None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, "GET", "/api/v1/settings/site.title", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn malformed_actor_header_is_rejected() {
    let (_temp, app) = make_app(TOKEN).await;

    for bad in ["abc", "0", "-4"] {
        let (status, body) = call(
            &app,
            "POST",
            "/api/v1/devices",
            Some(json!({"name": "Box A"})),
            &[("x-user-id", bad)],
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "x-user-id {bad}");
        assert_eq!(body["errorType"], "VALIDATION_ERROR");
    }

    let (_, body) = send(&app, "GET", "/api/v1/devices", None).await;
    assert_eq!(body["pagination"]["total"], 0);

    let (status, _) = call(
        &app,
        "POST",
        "/api/v1/devices",
        Some(json!({"name": "Box A"})),
        &[("x-user-id", "7")],
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let (_, body) = send(&app, "GET", "/api/v1/change-logs", None).await;
    assert_eq!(body["data"][0]["user_id"], 7);
}

#[tokio::test]
async fn search_uses_the_configured_page_size() {
    let temp = tempdir().unwrap();
    let db_path = temp.path().join("admin-search.db").to_string_lossy().to_string();
    let config = Config {
        db_path: db_path.clone(),
        api_token: TOKEN.to_string(),
        default_page_size: 1,
        ..Config::default()
    };
    let db = Database::open(&db_path).await.unwrap();
    let app = build_router(AppState::new(db, &config));

    for name in ["Arris Box", "Arris Mini"] {
        let (status, _) = send(&app, "POST", "/api/v1/devices", Some(json!({"name": name}))).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, body) = send(&app, "GET", "/api/v1/devices/search?q=arris", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (_, body) = send(&app, "GET", "/api/v1/devices/search?q=arris&limit=5", None).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 2);
}
