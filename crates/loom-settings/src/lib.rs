//! # loom-settings
//!
//! Layered configuration for the loom kernel.
//!
//! Three layers, lowest priority first:
//! 1. Compiled defaults ([`LoomSettings::default()`])
//! 2. `~/.loom/settings.json`, deep-merged over the defaults
//! 3. `LOOM_*` environment variables
//!
//! [`get_settings`] caches the loaded value process-wide;
//! [`reload_settings_from_path`] swaps it.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

use std::path::Path;
use std::sync::{Arc, RwLock};

static SETTINGS: RwLock<Option<Arc<LoomSettings>>> = RwLock::new(None);

/// Shared settings, loaded on first access.
///
/// Falls back to defaults (with a warning) when the file cannot be loaded.
pub fn get_settings() -> Arc<LoomSettings> {
    {
        let guard = SETTINGS.read().expect("settings lock poisoned");
        if let Some(ref s) = *guard {
            return Arc::clone(s);
        }
    }

    let mut guard = SETTINGS.write().expect("settings lock poisoned");
    if let Some(ref s) = *guard {
        return Arc::clone(s);
    }

    let settings = Arc::new(load_settings().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load settings, using defaults");
        LoomSettings::default()
    }));
    *guard = Some(Arc::clone(&settings));
    settings
}

/// Replace the cached settings.
pub fn init_settings(settings: LoomSettings) {
    let mut guard = SETTINGS.write().expect("settings lock poisoned");
    *guard = Some(Arc::new(settings));
}

/// Re-read settings from `path` and swap the cached value.
///
/// Load failures fall back to defaults.
pub fn reload_settings_from_path(path: &Path) {
    let fresh = Arc::new(load_settings_from_path(path).unwrap_or_else(|e| {
        tracing::warn!(error = %e, ?path, "failed to reload settings, using defaults");
        LoomSettings::default()
    }));
    let mut guard = SETTINGS.write().expect("settings lock poisoned");
    *guard = Some(fresh);
    tracing::info!(?path, "settings reloaded");
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // Tests touching the global cache serialize on this.
    static SETTINGS_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

    #[test]
    fn init_then_get_returns_value() {
        let _lock = SETTINGS_MUTEX.lock().unwrap();
        let mut custom = LoomSettings::default();
        custom.kernel.message_limit = 3;
        init_settings(custom);
        assert_eq!(get_settings().kernel.message_limit, 3);
    }

    #[test]
    fn reload_swaps_cached_value() {
        let _lock = SETTINGS_MUTEX.lock().unwrap();
        init_settings(LoomSettings::default());
        let before = get_settings();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"kernel": {"eventCapacity": 64}}"#).unwrap();
        reload_settings_from_path(&path);

        assert_eq!(get_settings().kernel.event_capacity, 64);
        // Earlier snapshots are unaffected.
        assert_eq!(before.kernel.event_capacity, 1024);
    }

    #[test]
    fn reload_from_bad_file_falls_back_to_defaults() {
        let _lock = SETTINGS_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "[]]").unwrap();
        reload_settings_from_path(&path);
        assert_eq!(get_settings().kernel.message_limit, 100);
    }
}
