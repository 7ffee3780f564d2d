use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;
use std::time::Duration;

use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use base64::Engine;

use crate::error::FireflyPanelError;
use crate::runtime_paths;
use crate::Result;

pub const DISCORD_API_BASE: &str = "https://discord.com/api/v10";

const BOT_BINARY: &str = "fireflyd";

/// Permissions requested in the invite link: enough for the bot to read,
/// reply, embed, and attach in the channels it is invited to.
const INVITE_PERMISSIONS: u64 = 0x0000_0400 // view channels
    | 0x0000_0800 // send messages
    | 0x0000_4000 // embed links
    | 0x0000_8000 // attach files
    | 0x0001_0000 // read message history
    | 0x0004_0000; // use external emojis

/// Extracts the bot's client id from a token. The first dot-separated
/// segment is the base64-encoded numeric application id; anything that does
/// not decode to ASCII digits is rejected.
pub fn client_id_from_token(token: &str) -> Option<String> {
    let first = token.trim().split('.').next()?.trim_end_matches('=');
    if first.is_empty() {
        return None;
    }
    let decoded = URL_SAFE_NO_PAD
        .decode(first)
        .ok()
        .or_else(|| STANDARD_NO_PAD.decode(first).ok())?;
    let id = String::from_utf8(decoded).ok()?;
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(id)
}

/// Owns the companion bot child process and the panel's view of Discord.
///
/// All process control is synchronous and single-shot; the bot's own
/// scheduling is its business. The panel only spawns, kills, and observes.
pub struct BotWorker {
    settings_path: String,
    exe_hint: Option<String>,
    api_base: String,
    http: reqwest::Client,
    child: Mutex<Option<Child>>,
}

impl BotWorker {
    pub fn new(settings_path: &str, exe_hint: Option<String>) -> Self {
        Self {
            settings_path: settings_path.to_string(),
            exe_hint,
            api_base: DISCORD_API_BASE.to_string(),
            http: reqwest::Client::new(),
            child: Mutex::new(None),
        }
    }

    /// Points the token check at a different API base. Tests use this to
    /// talk to a local mock server.
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    fn binary_candidates(&self) -> Vec<PathBuf> {
        let mut candidates = Vec::new();

        let mut push_candidate = |path: PathBuf| {
            if !candidates.iter().any(|existing| existing == &path) {
                candidates.push(path);
            }
        };

        if let Ok(explicit) = std::env::var("FIREFLYD_PATH") {
            let explicit = explicit.trim();
            if !explicit.is_empty() {
                push_candidate(PathBuf::from(explicit));
            }
        }

        if let Some(hint) = &self.exe_hint {
            let hint = hint.trim();
            if !hint.is_empty() {
                push_candidate(PathBuf::from(hint));
            }
        }

        if let Ok(current_exe) = std::env::current_exe() {
            if let Some(dir) = current_exe.parent() {
                push_candidate(dir.join(BOT_BINARY));
            }
        }

        if let Ok(cwd) = std::env::current_dir() {
            push_candidate(cwd.join("target").join("debug").join(BOT_BINARY));
            push_candidate(cwd.join("target").join("release").join(BOT_BINARY));
        }

        // PATH lookup last so local builds win.
        push_candidate(PathBuf::from(BOT_BINARY));

        candidates
    }

    fn spawn_bot_process(&self) -> Result<Child> {
        let candidates = self.binary_candidates();
        let mut not_found = Vec::new();
        let log_path = runtime_paths::bot_log_path();
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent).map_err(|err| {
                FireflyPanelError::Runtime(format!(
                    "failed to create bot log directory '{}': {err}",
                    parent.to_string_lossy()
                ))
            })?;
        }

        for candidate in candidates {
            let candidate_display = candidate.to_string_lossy().to_string();
            let log_file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_path)
                .map_err(|err| {
                    FireflyPanelError::Runtime(format!(
                        "failed to open bot log file '{}': {err}",
                        log_path.to_string_lossy()
                    ))
                })?;
            let stdout_log = log_file.try_clone().map_err(|err| {
                FireflyPanelError::Runtime(format!(
                    "failed to clone bot log file handle: {err}"
                ))
            })?;
            let result = Command::new(&candidate)
                .arg("--settings")
                .arg(&self.settings_path)
                .stdin(Stdio::null())
                .stdout(Stdio::from(stdout_log))
                .stderr(Stdio::from(log_file))
                .spawn();

            match result {
                Ok(child) => {
                    tracing::info!(bot = %candidate_display, "Spawned bot process");
                    return Ok(child);
                }
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    not_found.push(candidate_display);
                }
                Err(err) => {
                    return Err(FireflyPanelError::Runtime(format!(
                        "failed to start bot process via '{candidate_display}': {err} (log: {})",
                        log_path.to_string_lossy()
                    )));
                }
            }
        }

        Err(FireflyPanelError::Runtime(format!(
            "bot executable not found; tried: {}. Set FIREFLYD_PATH or install {BOT_BINARY}.",
            not_found.join(", ")
        )))
    }

    /// Starts the bot if it is not already running. The bot reads the
    /// settings file at startup, so a fresh start picks up saved edits.
    pub fn start(&self) -> Result<()> {
        let mut guard = self
            .child
            .lock()
            .map_err(|_| FireflyPanelError::Runtime("bot process lock unavailable".to_string()))?;
        if let Some(child) = guard.as_mut() {
            match child.try_wait() {
                Ok(Some(_)) => {
                    *guard = None;
                }
                Ok(None) => return Ok(()),
                Err(_) => {
                    *guard = None;
                }
            }
        }

        let mut child = self.spawn_bot_process()?;

        // Catch immediate exits (bad settings, rejected token) so the UI
        // reports a failed start instead of a silently dead child.
        std::thread::sleep(Duration::from_millis(200));
        if let Ok(Some(status)) = child.try_wait() {
            return Err(FireflyPanelError::Runtime(format!(
                "bot exited immediately ({status}); see log: {}",
                runtime_paths::bot_log_path().to_string_lossy()
            )));
        }

        *guard = Some(child);
        Ok(())
    }

    /// Tears the bot down if it is running. Idle is not an error: the stop
    /// control maps here and must be safe to press at any time.
    pub fn reload(&self) -> Result<()> {
        let mut guard = self
            .child
            .lock()
            .map_err(|_| FireflyPanelError::Runtime("bot process lock unavailable".to_string()))?;
        let Some(mut child) = guard.take() else {
            return Ok(());
        };

        if let Ok(Some(_)) = child.try_wait() {
            tracing::info!("Bot process already exited");
            return Ok(());
        }
        let _ = child.kill();
        tracing::info!("Sent kill signal to bot process");

        // Bounded wait so a wedged child cannot hang the UI callback.
        for _ in 0..80 {
            match child.try_wait() {
                Ok(Some(_)) => {
                    tracing::info!("Bot process exited");
                    return Ok(());
                }
                Ok(None) => std::thread::sleep(Duration::from_millis(25)),
                Err(err) => {
                    return Err(FireflyPanelError::Runtime(format!(
                        "failed waiting for bot shutdown: {err}"
                    )));
                }
            }
        }

        tracing::warn!("Bot process did not exit before shutdown timeout");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        let mut guard = match self.child.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match guard.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Confirmed token check against the real API. Only called on explicit
    /// user action; any transport or status failure reads as "not valid".
    pub async fn test_discord_token(&self, token: &str) -> bool {
        let token = token.trim();
        if token.is_empty() {
            return false;
        }
        let url = format!("{}/users/@me", self.api_base);
        let response = self
            .http
            .get(url)
            .header("authorization", format!("Bot {token}"))
            .send()
            .await;
        match response {
            Ok(resp) => resp.status().is_success(),
            Err(err) => {
                tracing::warn!(error = %err, "Token test request failed");
                false
            }
        }
    }

    /// Invite URL for the token, or `None` when no client id can be derived
    /// from it (the generator capability is then absent).
    pub fn generate_invite_url(&self, token: &str) -> Option<String> {
        let client_id = client_id_from_token(token)?;
        Some(format!(
            "https://discord.com/api/oauth2/authorize?client_id={client_id}&permissions={INVITE_PERMISSIONS}&scope=bot"
        ))
    }

    /// Last `limit` lines of the bot's log file, oldest first.
    pub fn logs(&self, limit: usize) -> Vec<String> {
        let path = runtime_paths::bot_log_path();
        let Ok(raw) = std::fs::read_to_string(&path) else {
            return Vec::new();
        };
        let lines: Vec<String> = raw.lines().map(str::to_string).collect();
        let skip = lines.len().saturating_sub(limit);
        lines[skip..].to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // base64 of "80351110224678912"
    const ID_SEGMENT: &str = "ODAzNTExMTAyMjQ2Nzg5MTI";

    fn token_with_id() -> String {
        format!("{ID_SEGMENT}.GqXhrc.{}", "x".repeat(40))
    }

    #[test]
    fn client_id_decodes_from_first_segment() {
        assert_eq!(
            client_id_from_token(&token_with_id()).as_deref(),
            Some("80351110224678912")
        );
        // Padded variants decode the same way.
        assert_eq!(
            client_id_from_token(&format!("{ID_SEGMENT}=.x.y")).as_deref(),
            Some("80351110224678912")
        );
    }

    #[test]
    fn client_id_rejects_undecodable_segments() {
        assert_eq!(client_id_from_token(""), None);
        assert_eq!(client_id_from_token("..."), None);
        assert_eq!(client_id_from_token("!!!.x.y"), None);
        // Decodes, but not to digits.
        assert_eq!(client_id_from_token("bm90LWFuLWlk.x.y"), None);
    }

    #[test]
    fn invite_url_embeds_client_id_and_scope() {
        let worker = BotWorker::new("settings.json", None);
        let url = worker.generate_invite_url(&token_with_id()).unwrap();
        assert!(url.contains("client_id=80351110224678912"));
        assert!(url.contains("scope=bot"));
        assert!(url.starts_with("https://discord.com/api/oauth2/authorize"));

        assert_eq!(worker.generate_invite_url("!!!.x.y"), None);
    }

    #[test]
    fn worker_starts_idle() {
        let worker = BotWorker::new("settings.json", None);
        assert!(!worker.is_running());
        // Stopping an idle worker is not an error.
        worker.reload().unwrap();
    }
}
