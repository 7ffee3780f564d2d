use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::{Json, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Router,
};
use pulldown_cmark::{html, Options, Parser};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::bot::BotWorker;
use crate::error::FireflyPanelError;
use crate::logging::LogBuffer;
use crate::settings::{
    self, Settings, KEY_AI_NAME, KEY_DISCORD_TOKEN, KEY_IMAGE_WORDS, KEY_PERSONA, KEY_WAKEWORDS,
};
use crate::token::{token_is_plausible, update_invite_link};
use crate::Result;

const INSTRUCTIONS_MD: &str = include_str!("../assets/instructions.md");
const PANEL_CSS: &str = include_str!("../assets/panel.css");
const PANEL_JS: &str = include_str!("../assets/panel.js");

const TOKEN_INPUT_SPLIT: &str = "{{TOKEN_INPUT_BOX}}";

#[derive(Clone)]
pub struct AppState {
    pub worker: Arc<BotWorker>,
    pub settings_path: String,
    pub logs: LogBuffer,
}

pub fn custom_css() -> &'static str {
    PANEL_CSS
}

pub fn custom_js() -> &'static str {
    PANEL_JS
}

/// Instructions document in two parts, before and after the token input box.
pub fn instructions() -> (&'static str, &'static str) {
    INSTRUCTIONS_MD
        .split_once(TOKEN_INPUT_SPLIT)
        .unwrap_or((INSTRUCTIONS_MD, ""))
}

/// The panel's surface in the host: a router over the page, the static
/// assets, and the JSON API the client script talks to.
pub fn ui(state: AppState) -> Router {
    Router::new()
        .route("/", get(page))
        .route("/panel.css", get(css))
        .route("/panel.js", get(js))
        .route("/health", get(health))
        .route("/api/settings", get(get_settings).post(post_settings))
        .route("/api/token", post(save_token))
        .route("/api/invite", get(invite_state))
        .route("/api/start", post(start_bot))
        .route("/api/stop", post(stop_bot))
        .route("/api/logs", get(logs))
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Deserialize)]
struct SaveTokenRequest {
    token: String,
}

#[derive(Serialize)]
struct InviteStateResponse {
    plausible: bool,
    tested: bool,
    valid: bool,
    invite_html: String,
}

#[derive(Serialize)]
struct BotStatusResponse {
    status: String,
    running: bool,
}

#[derive(Serialize)]
struct LogsResponse {
    panel: Vec<String>,
    bot: Vec<String>,
}

fn internal_error(err: FireflyPanelError) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
        .into_response()
}

fn load_settings(state: &AppState) -> Settings {
    Settings::from_store(&state.settings_path).unwrap_or_else(|_| Settings::convention_defaults())
}

/// Runs the invite-state deriver with the worker as the optional generator
/// capability: absent when no client id can be derived from the token.
fn derive_invite_html(worker: &BotWorker, token: &str, is_valid: bool, is_tested: bool) -> String {
    let generate = |t: &str| worker.generate_invite_url(t).unwrap_or_default();
    let generator: Option<&dyn Fn(&str) -> String> =
        if worker.generate_invite_url(token).is_some() {
            Some(&generate)
        } else {
            None
        };
    update_invite_link(token, is_valid, is_tested, generator)
}

/// Invite state for a freshly loaded page: a plausible token is rendered as
/// if valid so the link shows up, but left untested so no check mark does.
fn initial_invite_state(worker: &BotWorker, settings: &Settings) -> InviteStateResponse {
    let token = settings.get_str(KEY_DISCORD_TOKEN);
    let plausible = token_is_plausible(&token);
    let invite_html = derive_invite_html(worker, &token, plausible, false);
    InviteStateResponse {
        plausible,
        tested: false,
        valid: plausible,
        invite_html,
    }
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

async fn css() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/css; charset=utf-8")], custom_css())
}

async fn js() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/javascript; charset=utf-8")],
        custom_js(),
    )
}

async fn page(State(state): State<AppState>) -> Html<String> {
    let settings = load_settings(&state);
    Html(render_page(&state, &settings))
}

async fn get_settings(State(state): State<AppState>) -> Json<Map<String, Value>> {
    Json(load_settings(&state).values().clone())
}

async fn post_settings(
    State(state): State<AppState>,
    Json(values): Json<Map<String, Value>>,
) -> Response {
    let mut settings = load_settings(&state);
    settings.merge_values(values);
    if let Err(err) = settings::save_settings(&state.settings_path, &settings) {
        return internal_error(err);
    }
    tracing::debug!("Settings saved");
    Json(BotStatusResponse {
        status: "saved".to_string(),
        running: state.worker.is_running(),
    })
    .into_response()
}

/// Save-token flow: persist first, then run the confirmed check, then derive
/// the displayed state with `tested = true`.
async fn save_token(
    State(state): State<AppState>,
    Json(request): Json<SaveTokenRequest>,
) -> Response {
    let token = request.token.trim().to_string();
    let mut settings = load_settings(&state);
    settings.set_str(KEY_DISCORD_TOKEN, &token);
    if let Err(err) = settings::save_settings(&state.settings_path, &settings) {
        return internal_error(err);
    }

    let valid = state.worker.test_discord_token(&token).await;
    let invite_html = derive_invite_html(&state.worker, &token, valid, true);
    tracing::info!(valid, "Discord token tested");
    Json(InviteStateResponse {
        plausible: token_is_plausible(&token),
        tested: true,
        valid,
        invite_html,
    })
    .into_response()
}

async fn invite_state(State(state): State<AppState>) -> Json<InviteStateResponse> {
    let settings = load_settings(&state);
    Json(initial_invite_state(&state.worker, &settings))
}

async fn start_bot(State(state): State<AppState>) -> Response {
    let worker = state.worker.clone();
    match tokio::task::spawn_blocking(move || worker.start()).await {
        Ok(Ok(())) => Json(BotStatusResponse {
            status: "started".to_string(),
            running: true,
        })
        .into_response(),
        Ok(Err(err)) => internal_error(err),
        Err(err) => internal_error(FireflyPanelError::Runtime(err.to_string())),
    }
}

async fn stop_bot(State(state): State<AppState>) -> Response {
    let worker = state.worker.clone();
    match tokio::task::spawn_blocking(move || worker.reload()).await {
        Ok(Ok(())) => Json(BotStatusResponse {
            status: "stopped".to_string(),
            running: state.worker.is_running(),
        })
        .into_response(),
        Ok(Err(err)) => internal_error(err),
        Err(err) => internal_error(FireflyPanelError::Runtime(err.to_string())),
    }
}

async fn logs(State(state): State<AppState>) -> Json<LogsResponse> {
    Json(LogsResponse {
        panel: state.logs.tail(200),
        bot: state.worker.logs(200),
    })
}

fn markdown_to_html(input: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    let parser = Parser::new_ext(input, options);
    let mut output = String::new();
    html::push_html(&mut output, parser);
    output
}

fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn render_page(state: &AppState, settings: &Settings) -> String {
    let (before, after) = instructions();
    let before_html = markdown_to_html(before);
    let after_html = markdown_to_html(after);

    let token = settings.get_str(KEY_DISCORD_TOKEN);
    let invite = initial_invite_state(&state.worker, settings);
    let plausible = invite.plausible;
    let running = state.worker.is_running();

    let token_attr = escape_attr(&token);
    let ai_name_attr = escape_attr(&settings.get_str(KEY_AI_NAME));
    let persona_text = escape_attr(&settings.get_str(KEY_PERSONA));
    let wakewords_attr = escape_attr(&settings.get_list(KEY_WAKEWORDS).join(", "));
    let image_words_attr = escape_attr(&settings.get_list(KEY_IMAGE_WORDS).join(", "));
    let invite_html = invite.invite_html;

    let save_disabled = if plausible { "" } else { " disabled" };
    let start_disabled = if plausible && !running { "" } else { " disabled" };
    let stop_disabled = if running { "" } else { " disabled" };

    format!(
        r#"<!doctype html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>firefly-panel</title>
<link rel="stylesheet" href="/panel.css">
</head>
<body>
<main>
{before_html}
<div class="token-row">
  <input type="password" id="token-input" value="{token_attr}"
         placeholder="Paste your Discord token here" autocomplete="off">
  <button id="save-token-button"{save_disabled}>Save token</button>
</div>
<div id="invite-state">{invite_html}</div>
{after_html}
<section id="settings-form">
  <h2>Bot settings</h2>
  <label>AI name <input type="text" id="ai-name" value="{ai_name_attr}"></label>
  <label>Persona <textarea id="persona" rows="3">{persona_text}</textarea></label>
  <label>Wake words (comma-separated)
    <input type="text" id="wakewords" value="{wakewords_attr}"></label>
  <label>Image words (comma-separated)
    <input type="text" id="image-words" value="{image_words_attr}"></label>
  <button id="save-settings-button">Save settings</button>
</section>
<section id="controls">
  <button id="start-button"{start_disabled}>Start</button>
  <button id="stop-button"{stop_disabled}>Stop</button>
  <span id="status-line"></span>
</section>
<section id="log-section">
  <h2>Logs</h2>
  <pre id="bot-log"></pre>
  <pre id="panel-log"></pre>
</section>
</main>
<script src="/panel.js"></script>
</body>
</html>
"#
    )
}

pub async fn run(host: &str, port: u16, state: AppState) -> Result<()> {
    run_with_shutdown(host, port, state, futures::future::pending::<()>()).await
}

pub async fn run_with_shutdown<F>(host: &str, port: u16, state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = ui(state);
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| FireflyPanelError::Runtime(e.to_string()))?;
    tracing::info!(address = %addr, "Panel listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| FireflyPanelError::Runtime(e.to_string()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instructions_split_on_token_placeholder() {
        let (before, after) = instructions();
        assert!(!before.is_empty());
        assert!(!after.is_empty());
        assert!(!before.contains(TOKEN_INPUT_SPLIT));
        assert!(!after.contains(TOKEN_INPUT_SPLIT));
    }

    #[test]
    fn assets_are_embedded() {
        assert!(custom_css().contains("#bot-log"));
        assert!(custom_js().contains("TOKEN_LEN_CHARS"));
    }

    #[test]
    fn attribute_escaping_covers_html_metacharacters() {
        assert_eq!(escape_attr(r#"a"<b>&"#), "a&quot;&lt;b&gt;&amp;");
    }
}
