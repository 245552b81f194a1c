//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` for the JSON file format.
//! Each type implements [`Default`] with production default values, and
//! `#[serde(default)]` lets partial JSON fill missing fields from defaults.

mod kernel;
mod logging;

pub use kernel::*;
pub use logging::*;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// Loaded from `~/.loom/settings.json` with defaults applied for missing
/// fields. Environment variables can override specific values.
///
/// # JSON Format
///
/// ```json
/// {
///   "kernel": { "messageLimit": 200, "toolCallTimeoutMs": 0 },
///   "logging": { "level": "info" }
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoomSettings {
    /// Settings schema version.
    pub version: String,
    /// Kernel session settings.
    pub kernel: KernelSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl Default for LoomSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            kernel: KernelSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl LoomSettings {
    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.kernel.message_limit == 0 {
            return Err(SettingsError::InvalidValue(
                "kernel.messageLimit must be at least 1".into(),
            ));
        }
        if self.kernel.event_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "kernel.eventCapacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = LoomSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.kernel.message_limit, 100);
        assert_eq!(settings.logging.level, "warn");
    }

    #[test]
    fn zero_message_limit_rejected() {
        let mut settings = LoomSettings::default();
        settings.kernel.message_limit = 0;
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("messageLimit"));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let settings: LoomSettings =
            serde_json::from_str(r#"{"kernel": {"messageLimit": 5}}"#).unwrap();
        assert_eq!(settings.kernel.message_limit, 5);
        assert_eq!(settings.kernel.event_capacity, 1024);
        assert_eq!(settings.version, "0.1.0");
    }

    #[test]
    fn camel_case_wire_names() {
        let value = serde_json::to_value(LoomSettings::default()).unwrap();
        assert!(value["kernel"].get("messageLimit").is_some());
        assert!(value["kernel"].get("toolCallTimeoutMs").is_some());
        assert!(value["kernel"].get("instructions").is_none());
    }
}
