//! Settings structures.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default upload cap: 25 MiB.
pub const DEFAULT_MAX_UPLOAD_BYTES: i64 = 26_214_400;

/// Runtime configuration, sourced from the environment.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Settings {
    /// Chat transport credential (`TELEGRAM_BOT_TOKEN`).
    pub telegram_bot_token: String,
    /// The sole permitted user id (`TELEGRAM_OWNER_USER_ID`).
    pub telegram_owner_user_id: i64,
    /// Store file and upload sandbox root (`DATA_DIR`).
    pub data_dir: PathBuf,
    /// Project list location (`PROJECTS_CONFIG_PATH`).
    pub projects_config_path: PathBuf,
    /// HTTP listener port (`DASHBOARD_PORT`).
    pub dashboard_port: u16,
    /// HTTP bind host (`DASHBOARD_BIND_HOST`).
    pub dashboard_bind_host: String,
    /// Basic auth user for `/api/*` (`DASHBOARD_BASIC_AUTH_USER`).
    pub dashboard_basic_auth_user: Option<String>,
    /// Basic auth password for `/api/*` (`DASHBOARD_BASIC_AUTH_PASS`).
    pub dashboard_basic_auth_pass: Option<String>,
    /// Forbid new runs with a maintenance reply
    /// (`KILL_SWITCH_DISABLE_RUNS`).
    pub kill_switch_disable_runs: bool,
    /// Upload cap in bytes (`MAX_UPLOAD_BYTES`).
    pub max_upload_bytes: i64,
}

impl Settings {
    /// Path of the SQLite database file.
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("tether.db")
    }

    /// Root of the upload/download sandbox.
    #[must_use]
    pub fn files_dir(&self) -> PathBuf {
        self.data_dir.join("files")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Settings {
        Settings {
            telegram_bot_token: "123:abc".into(),
            telegram_owner_user_id: 42,
            data_dir: PathBuf::from("/var/lib/tether"),
            projects_config_path: PathBuf::from("/etc/tether/projects.json"),
            dashboard_port: 4312,
            dashboard_bind_host: "127.0.0.1".into(),
            dashboard_basic_auth_user: None,
            dashboard_basic_auth_pass: None,
            kill_switch_disable_runs: false,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }

    #[test]
    fn derived_paths() {
        let settings = sample();
        assert_eq!(settings.db_path(), PathBuf::from("/var/lib/tether/tether.db"));
        assert_eq!(settings.files_dir(), PathBuf::from("/var/lib/tether/files"));
    }

    #[test]
    fn serde_round_trip() {
        let settings = sample();
        let json = serde_json::to_string(&settings).unwrap();
        let back: Settings = serde_json::from_str(&json).unwrap();
        assert_eq!(back.telegram_owner_user_id, 42);
        assert_eq!(back.dashboard_port, 4312);
    }
}
