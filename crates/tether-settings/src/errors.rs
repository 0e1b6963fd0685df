//! Error types for configuration loading.

use thiserror::Error;

/// Errors while loading settings or the projects file.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// A required environment variable is absent.
    #[error("missing required environment variable: {0}")]
    MissingVar(&'static str),

    /// An environment variable has an unusable value.
    #[error("invalid value for {name}: {reason}")]
    InvalidVar {
        /// Variable name.
        name: &'static str,
        /// Why it failed.
        reason: String,
    },

    /// The projects file could not be read.
    #[error("failed to read projects file: {0}")]
    Io(#[from] std::io::Error),

    /// The projects file is not valid JSON.
    #[error("failed to parse projects file: {0}")]
    Parse(#[from] serde_json::Error),

    /// A project entry failed validation.
    #[error("invalid project entry: {0}")]
    InvalidProject(String),
}

/// Convenience alias for settings results.
pub type Result<T> = std::result::Result<T, SettingsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_var_display() {
        let err = SettingsError::MissingVar("TELEGRAM_BOT_TOKEN");
        assert!(err.to_string().contains("TELEGRAM_BOT_TOKEN"));
    }

    #[test]
    fn invalid_var_display() {
        let err = SettingsError::InvalidVar {
            name: "DASHBOARD_PORT",
            reason: "not a number".into(),
        };
        assert_eq!(
            err.to_string(),
            "invalid value for DASHBOARD_PORT: not a number"
        );
    }
}
