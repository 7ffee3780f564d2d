use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use httpmock::Method::GET;
use httpmock::MockServer;
use serde_json::{json, Value};
use tempfile::{tempdir, TempDir};
use tower::ServiceExt;

use firefly_panel::bot::BotWorker;
use firefly_panel::logging::LogBuffer;
use firefly_panel::panel::{custom_css, custom_js, ui, AppState};
use firefly_panel::settings::{save_settings, Settings, KEY_DISCORD_TOKEN};
use firefly_panel::token::{INVITE_PLACEHOLDER, INVALID_PREFIX, VALID_PREFIX};

// base64 of "80351110224678912"
const ID_SEGMENT: &str = "ODAzNTExMTAyMjQ2Nzg5MTI";

fn plausible_token() -> String {
    format!("{ID_SEGMENT}.{}.{}", "x".repeat(30), "y".repeat(30))
}

fn make_state(temp: &TempDir, api_base: Option<&str>) -> AppState {
    let settings_path = temp
        .path()
        .join("settings.json")
        .to_string_lossy()
        .to_string();
    save_settings(&settings_path, &Settings::convention_defaults()).unwrap();

    let mut worker = BotWorker::new(&settings_path, None);
    if let Some(base) = api_base {
        worker = worker.with_api_base(base);
    }

    AppState {
        worker: Arc::new(worker),
        settings_path,
        logs: LogBuffer::default(),
    }
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn health_and_page_render() {
    let temp = tempdir().unwrap();
    let app = ui(make_state(&temp, None));

    let response = app.clone().oneshot(get_request("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({"status": "ok"}));

    let response = app.clone().oneshot(get_request("/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let page = body_text(response).await;
    assert!(page.contains("token-input"));
    assert!(page.contains("Set up your Discord bot"));
    // Empty stored token: save is gated off and the placeholder shows.
    assert!(page.contains("<button id=\"save-token-button\" disabled>"));
    assert!(page.contains(INVITE_PLACEHOLDER));
}

#[tokio::test]
async fn static_assets_are_served_verbatim() {
    let temp = tempdir().unwrap();
    let app = ui(make_state(&temp, None));

    let response = app.clone().oneshot(get_request("/panel.css")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, custom_css());

    let response = app.clone().oneshot(get_request("/panel.js")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, custom_js());
}

#[tokio::test]
async fn initial_invite_is_placeholder_without_token() {
    let temp = tempdir().unwrap();
    let app = ui(make_state(&temp, None));

    let response = app.oneshot(get_request("/api/invite")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let state = body_json(response).await;
    assert_eq!(state["plausible"], json!(false));
    assert_eq!(state["tested"], json!(false));
    assert_eq!(state["invite_html"], json!(INVITE_PLACEHOLDER));
}

#[tokio::test]
async fn plausible_stored_token_links_without_checkmark() {
    let temp = tempdir().unwrap();
    let state = make_state(&temp, None);

    let mut settings = Settings::from_store(&state.settings_path).unwrap();
    settings.set_str(KEY_DISCORD_TOKEN, &plausible_token());
    save_settings(&state.settings_path, &settings).unwrap();

    let app = ui(state);
    let response = app.oneshot(get_request("/api/invite")).await.unwrap();
    let state = body_json(response).await;
    assert_eq!(state["plausible"], json!(true));
    assert_eq!(state["tested"], json!(false));
    let html = state["invite_html"].as_str().unwrap();
    assert!(html.contains("client_id=80351110224678912"));
    assert!(html.contains("invite your bot"));
    assert!(!html.contains(VALID_PREFIX));
}

#[tokio::test]
async fn save_token_confirms_against_api_and_persists() {
    let server = MockServer::start_async().await;
    let me_mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/users/@me")
                .header("authorization", format!("Bot {}", plausible_token()));
            then.status(200)
                .json_body(json!({"id": "80351110224678912", "bot": true}));
        })
        .await;

    let temp = tempdir().unwrap();
    let state = make_state(&temp, Some(&server.base_url()));
    let settings_path = state.settings_path.clone();
    let app = ui(state);

    let response = app
        .oneshot(post_json("/api/token", json!({"token": plausible_token()})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let result = body_json(response).await;
    assert_eq!(result["tested"], json!(true));
    assert_eq!(result["valid"], json!(true));
    let html = result["invite_html"].as_str().unwrap();
    assert!(html.starts_with(VALID_PREFIX));
    assert!(html.contains("client_id=80351110224678912"));

    me_mock.assert_async().await;

    // The token was persisted before the check ran.
    let stored = Settings::from_store(&settings_path).unwrap();
    assert_eq!(stored.get_str(KEY_DISCORD_TOKEN), plausible_token());
}

#[tokio::test]
async fn rejected_token_reports_failure_without_anchor() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/users/@me");
            then.status(401).json_body(json!({"message": "401: Unauthorized"}));
        })
        .await;

    let temp = tempdir().unwrap();
    let app = ui(make_state(&temp, Some(&server.base_url())));

    let response = app
        .oneshot(post_json("/api/token", json!({"token": plausible_token()})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let result = body_json(response).await;
    assert_eq!(result["valid"], json!(false));
    assert_eq!(result["tested"], json!(true));
    assert_eq!(result["invite_html"], json!(INVALID_PREFIX));
}

#[tokio::test]
async fn settings_roundtrip_through_api() {
    let temp = tempdir().unwrap();
    let app = ui(make_state(&temp, None));

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/settings",
            json!({"ai_name": "glowworm", "image_words": ["sketch", "render"]}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.oneshot(get_request("/api/settings")).await.unwrap();
    let values = body_json(response).await;
    assert_eq!(values["ai_name"], json!("glowworm"));
    assert_eq!(values["image_words"], json!(["sketch", "render"]));
    // Untouched defaults survive the merge.
    assert_eq!(values["wakewords"], json!(["firefly"]));
}

#[tokio::test]
async fn start_without_bot_binary_is_a_runtime_error() {
    let temp = tempdir().unwrap();
    // Keep the bot log under the test directory rather than the real app root.
    firefly_panel::runtime_paths::set_debug_app_root_override(Some(temp.path().to_path_buf()));
    let app = ui(make_state(&temp, None));

    let response = app.oneshot(post_json("/api/start", json!({}))).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let result = body_json(response).await;
    assert!(result["error"].as_str().unwrap().contains("not found"));
}

#[tokio::test]
async fn stop_is_safe_when_bot_is_idle() {
    let temp = tempdir().unwrap();
    let app = ui(make_state(&temp, None));

    let response = app.oneshot(post_json("/api/stop", json!({}))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let result = body_json(response).await;
    assert_eq!(result["status"], json!("stopped"));
    assert_eq!(result["running"], json!(false));
}

#[tokio::test]
async fn logs_endpoint_exposes_panel_buffer() {
    let temp = tempdir().unwrap();
    let state = make_state(&temp, None);
    state.logs.push_line("panel ready");
    state.logs.push_line("token tested");
    let app = ui(state);

    let response = app.oneshot(get_request("/api/logs")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let result = body_json(response).await;
    assert_eq!(result["panel"], json!(["panel ready", "token tested"]));
    assert!(result["bot"].is_array());
}
