use directories::{BaseDirs, ProjectDirs};
use std::path::PathBuf;
use std::sync::{OnceLock, RwLock};

fn app_root_override_lock() -> &'static RwLock<Option<PathBuf>> {
    static OVERRIDE: OnceLock<RwLock<Option<PathBuf>>> = OnceLock::new();
    OVERRIDE.get_or_init(|| RwLock::new(None))
}

fn app_root_override() -> Option<PathBuf> {
    let lock = app_root_override_lock();
    match lock.read() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

pub fn set_debug_app_root_override(path: Option<PathBuf>) {
    let lock = app_root_override_lock();
    match lock.write() {
        Ok(mut guard) => *guard = path,
        Err(poisoned) => {
            let mut guard = poisoned.into_inner();
            *guard = path;
        }
    }
}

fn platform_app_root() -> PathBuf {
    if let Some(project_dirs) = ProjectDirs::from("", "", "firefly-panel") {
        return project_dirs.data_dir().to_path_buf();
    }

    if let Some(base_dirs) = BaseDirs::new() {
        return base_dirs.data_local_dir().join("firefly-panel");
    }

    std::env::temp_dir().join("firefly-panel")
}

pub fn app_root() -> PathBuf {
    app_root_override().unwrap_or_else(platform_app_root)
}

pub fn default_settings_path() -> String {
    app_root()
        .join("firefly-panel.json")
        .to_string_lossy()
        .to_string()
}

/// The spawned bot's stdout/stderr are appended here; the panel log pane
/// tails this file.
pub fn bot_log_path() -> PathBuf {
    app_root().join("logs").join("bot.log")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_redirects_derived_paths() {
        let root = std::env::temp_dir().join("firefly-panel-paths-test");
        set_debug_app_root_override(Some(root.clone()));

        assert_eq!(app_root(), root);
        assert!(default_settings_path().starts_with(&root.to_string_lossy().to_string()));
        assert_eq!(bot_log_path(), root.join("logs").join("bot.log"));

        set_debug_app_root_override(None);
        assert_ne!(app_root(), root);
    }
}
