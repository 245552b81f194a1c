use serde::{Deserialize, Serialize};

/// Logging configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// `tracing` filter directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            json: false,
        }
    }
}

impl LoggingSettings {
    /// Install the global subscriber described by these settings.
    ///
    /// `RUST_LOG` still overrides `level`. Later calls are no-ops.
    pub fn init_subscriber(&self) {
        loom_core::logging::init_from_config(&self.level, self.json);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_subscriber_is_repeatable() {
        let settings = LoggingSettings {
            level: "debug".to_string(),
            json: true,
        };
        settings.init_subscriber();
        LoggingSettings::default().init_subscriber();
    }
}
