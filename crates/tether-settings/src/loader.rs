//! Settings and projects-file loading.
//!
//! Loading order: compiled defaults, then environment variables. The two
//! credentials are required; everything else has a default.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use tether_store::{Project, Provider};

use crate::errors::{Result, SettingsError};
use crate::types::{Settings, DEFAULT_MAX_UPLOAD_BYTES};

/// Load settings from the process environment.
pub fn load_settings() -> Result<Settings> {
    load_settings_from(std::env::vars().collect())
}

/// Load settings from an explicit variable map.
pub fn load_settings_from(vars: HashMap<String, String>) -> Result<Settings> {
    let telegram_bot_token = vars
        .get("TELEGRAM_BOT_TOKEN")
        .filter(|v| !v.is_empty())
        .cloned()
        .ok_or(SettingsError::MissingVar("TELEGRAM_BOT_TOKEN"))?;

    let telegram_owner_user_id = vars
        .get("TELEGRAM_OWNER_USER_ID")
        .filter(|v| !v.is_empty())
        .ok_or(SettingsError::MissingVar("TELEGRAM_OWNER_USER_ID"))?
        .parse::<i64>()
        .map_err(|e| SettingsError::InvalidVar {
            name: "TELEGRAM_OWNER_USER_ID",
            reason: e.to_string(),
        })?;

    let dashboard_port = match vars.get("DASHBOARD_PORT") {
        Some(raw) if !raw.is_empty() => {
            raw.parse::<u16>().map_err(|e| SettingsError::InvalidVar {
                name: "DASHBOARD_PORT",
                reason: e.to_string(),
            })?
        }
        _ => 4312,
    };

    let max_upload_bytes = match vars.get("MAX_UPLOAD_BYTES") {
        Some(raw) if !raw.is_empty() => {
            raw.parse::<i64>().map_err(|e| SettingsError::InvalidVar {
                name: "MAX_UPLOAD_BYTES",
                reason: e.to_string(),
            })?
        }
        _ => DEFAULT_MAX_UPLOAD_BYTES,
    };

    let kill_switch_disable_runs = vars
        .get("KILL_SWITCH_DISABLE_RUNS")
        .is_some_and(|v| matches!(v.as_str(), "1" | "true" | "yes"));

    let settings = Settings {
        telegram_bot_token,
        telegram_owner_user_id,
        data_dir: vars
            .get("DATA_DIR")
            .filter(|v| !v.is_empty())
            .map_or_else(|| PathBuf::from("./data"), PathBuf::from),
        projects_config_path: vars
            .get("PROJECTS_CONFIG_PATH")
            .filter(|v| !v.is_empty())
            .map_or_else(|| PathBuf::from("./config/projects.json"), PathBuf::from),
        dashboard_port,
        dashboard_bind_host: vars
            .get("DASHBOARD_BIND_HOST")
            .filter(|v| !v.is_empty())
            .cloned()
            .unwrap_or_else(|| "127.0.0.1".to_string()),
        dashboard_basic_auth_user: vars
            .get("DASHBOARD_BASIC_AUTH_USER")
            .filter(|v| !v.is_empty())
            .cloned(),
        dashboard_basic_auth_pass: vars
            .get("DASHBOARD_BASIC_AUTH_PASS")
            .filter(|v| !v.is_empty())
            .cloned(),
        kill_switch_disable_runs,
        max_upload_bytes,
    };

    debug!(
        data_dir = %settings.data_dir.display(),
        port = settings.dashboard_port,
        "settings loaded"
    );
    Ok(settings)
}

/// One entry of `projects.json`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectEntry {
    id: String,
    name: String,
    root_path: String,
    #[serde(default)]
    default_engine: Option<Provider>,
    #[serde(default)]
    opencode_attach_url: Option<String>,
}

/// Load and validate the projects file.
///
/// Entries must have non-empty ids and names, absolute root paths, and
/// unique ids. The default engine falls back to claude.
pub fn load_projects(path: &Path) -> Result<Vec<Project>> {
    let content = std::fs::read_to_string(path)?;
    let entries: Vec<ProjectEntry> = serde_json::from_str(&content)?;

    let mut projects = Vec::with_capacity(entries.len());
    for entry in entries {
        if entry.id.trim().is_empty() {
            return Err(SettingsError::InvalidProject("empty id".into()));
        }
        if entry.name.trim().is_empty() {
            return Err(SettingsError::InvalidProject(format!(
                "project {}: empty name",
                entry.id
            )));
        }
        if !Path::new(&entry.root_path).is_absolute() {
            return Err(SettingsError::InvalidProject(format!(
                "project {}: rootPath must be absolute, got {}",
                entry.id, entry.root_path
            )));
        }
        if projects.iter().any(|p: &Project| p.id == entry.id) {
            return Err(SettingsError::InvalidProject(format!(
                "duplicate id: {}",
                entry.id
            )));
        }
        projects.push(Project {
            id: entry.id,
            name: entry.name,
            root_path: entry.root_path,
            default_engine: entry.default_engine.unwrap_or(Provider::Claude),
            opencode_attach_url: entry.opencode_attach_url,
        });
    }
    Ok(projects)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn base_vars() -> HashMap<String, String> {
        let mut vars = HashMap::new();
        let _ = vars.insert("TELEGRAM_BOT_TOKEN".into(), "123:abc".into());
        let _ = vars.insert("TELEGRAM_OWNER_USER_ID".into(), "42".into());
        vars
    }

    #[test]
    fn defaults_applied() {
        let settings = load_settings_from(base_vars()).unwrap();
        assert_eq!(settings.data_dir, PathBuf::from("./data"));
        assert_eq!(
            settings.projects_config_path,
            PathBuf::from("./config/projects.json")
        );
        assert_eq!(settings.dashboard_port, 4312);
        assert_eq!(settings.dashboard_bind_host, "127.0.0.1");
        assert!(!settings.kill_switch_disable_runs);
        assert_eq!(settings.max_upload_bytes, DEFAULT_MAX_UPLOAD_BYTES);
    }

    #[test]
    fn missing_token_is_error() {
        let mut vars = base_vars();
        let _ = vars.remove("TELEGRAM_BOT_TOKEN");
        let err = load_settings_from(vars).unwrap_err();
        assert!(matches!(err, SettingsError::MissingVar("TELEGRAM_BOT_TOKEN")));
    }

    #[test]
    fn missing_owner_is_error() {
        let mut vars = base_vars();
        let _ = vars.remove("TELEGRAM_OWNER_USER_ID");
        assert!(load_settings_from(vars).is_err());
    }

    #[test]
    fn invalid_owner_id_is_error() {
        let mut vars = base_vars();
        let _ = vars.insert("TELEGRAM_OWNER_USER_ID".into(), "not-a-number".into());
        let err = load_settings_from(vars).unwrap_err();
        assert!(matches!(
            err,
            SettingsError::InvalidVar {
                name: "TELEGRAM_OWNER_USER_ID",
                ..
            }
        ));
    }

    #[test]
    fn overrides_applied() {
        let mut vars = base_vars();
        let _ = vars.insert("DATA_DIR".into(), "/srv/tether".into());
        let _ = vars.insert("DASHBOARD_PORT".into(), "9000".into());
        let _ = vars.insert("KILL_SWITCH_DISABLE_RUNS".into(), "true".into());
        let _ = vars.insert("DASHBOARD_BASIC_AUTH_USER".into(), "ops".into());
        let _ = vars.insert("DASHBOARD_BASIC_AUTH_PASS".into(), "hunter2".into());

        let settings = load_settings_from(vars).unwrap();
        assert_eq!(settings.data_dir, PathBuf::from("/srv/tether"));
        assert_eq!(settings.dashboard_port, 9000);
        assert!(settings.kill_switch_disable_runs);
        assert_eq!(settings.dashboard_basic_auth_user.as_deref(), Some("ops"));
    }

    fn write_projects(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn projects_parse_and_default_engine() {
        let file = write_projects(
            r#"[
                {"id":"web","name":"Web App","rootPath":"/srv/web"},
                {"id":"api","name":"API","rootPath":"/srv/api","defaultEngine":"opencode","opencodeAttachUrl":"http://127.0.0.1:8787"}
            ]"#,
        );
        let projects = load_projects(file.path()).unwrap();
        assert_eq!(projects.len(), 2);
        assert_eq!(projects[0].default_engine, Provider::Claude);
        assert_eq!(projects[1].default_engine, Provider::Opencode);
        assert_eq!(
            projects[1].opencode_attach_url.as_deref(),
            Some("http://127.0.0.1:8787")
        );
    }

    #[test]
    fn projects_reject_relative_root() {
        let file = write_projects(r#"[{"id":"a","name":"A","rootPath":"relative/path"}]"#);
        let err = load_projects(file.path()).unwrap_err();
        assert!(err.to_string().contains("absolute"));
    }

    #[test]
    fn projects_reject_duplicate_ids() {
        let file = write_projects(
            r#"[
                {"id":"a","name":"A","rootPath":"/srv/a"},
                {"id":"a","name":"A2","rootPath":"/srv/a2"}
            ]"#,
        );
        let err = load_projects(file.path()).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn projects_reject_empty_id() {
        let file = write_projects(r#"[{"id":"","name":"A","rootPath":"/srv/a"}]"#);
        assert!(load_projects(file.path()).is_err());
    }
}
