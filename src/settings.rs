use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;

use crate::error::FireflyPanelError;
use crate::Result;

pub const KEY_DISCORD_TOKEN: &str = "discord_token";
pub const KEY_AI_NAME: &str = "ai_name";
pub const KEY_PERSONA: &str = "persona";
pub const KEY_WAKEWORDS: &str = "wakewords";
pub const KEY_IMAGE_WORDS: &str = "image_words";

/// The settings file the panel and the bot process share. The panel only
/// touches it through the typed accessors; unknown keys written by the bot
/// are carried through untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(flatten)]
    values: Map<String, Value>,
}

impl Settings {
    pub fn convention_defaults() -> Self {
        let mut settings = Self::default();
        settings.set_str(KEY_DISCORD_TOKEN, "");
        settings.set_str(KEY_AI_NAME, "firefly");
        settings.set_str(KEY_PERSONA, "");
        settings.set_list(KEY_WAKEWORDS, &["firefly".to_string()]);
        settings.set_list(
            KEY_IMAGE_WORDS,
            &["draw me".to_string(), "show me a picture of".to_string()],
        );
        settings
    }

    pub fn from_store(path: &str) -> Result<Self> {
        let raw =
            fs::read_to_string(path).map_err(|e| FireflyPanelError::Config(e.to_string()))?;
        serde_json::from_str(&raw).map_err(|e| FireflyPanelError::Serialization(e.to_string()))
    }

    /// String value for `key`; missing or non-string keys read as empty.
    pub fn get_str(&self, key: &str) -> String {
        self.values
            .get(key)
            .and_then(|value| value.as_str())
            .unwrap_or_default()
            .to_string()
    }

    pub fn set_str(&mut self, key: &str, value: &str) {
        self.values
            .insert(key.to_string(), Value::String(value.to_string()));
    }

    /// String-list value for `key`; missing keys and non-string entries are
    /// dropped rather than reported.
    pub fn get_list(&self, key: &str) -> Vec<String> {
        self.values
            .get(key)
            .and_then(|value| value.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn set_list(&mut self, key: &str, values: &[String]) {
        self.values.insert(
            key.to_string(),
            Value::Array(values.iter().cloned().map(Value::String).collect()),
        );
    }

    pub fn merge_values(&mut self, values: Map<String, Value>) {
        for (key, value) in values {
            self.values.insert(key, value);
        }
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }
}

pub fn save_settings(path: &str, settings: &Settings) -> Result<()> {
    let pretty = serde_json::to_string_pretty(settings)
        .map_err(|e| FireflyPanelError::Serialization(e.to_string()))?;
    if let Some(parent) = Path::new(path).parent() {
        fs::create_dir_all(parent).map_err(|e| FireflyPanelError::Config(e.to_string()))?;
    }
    fs::write(path, pretty).map_err(|e| FireflyPanelError::Config(e.to_string()))
}

/// Loads the settings file, seeding it with defaults when absent.
pub fn ensure_default_settings(path: &str) -> Result<Settings> {
    match Settings::from_store(path) {
        Ok(settings) => Ok(settings),
        Err(_) => {
            let settings = Settings::convention_defaults();
            save_settings(path, &settings)?;
            Ok(settings)
        }
    }
}
