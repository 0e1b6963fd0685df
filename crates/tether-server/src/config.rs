//! Dashboard server configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the dashboard listener.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DashboardConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default 4312; 0 auto-assigns).
    pub port: u16,
    /// Basic-auth credentials for `/api/*`, when set.
    pub basic_auth_user: Option<String>,
    /// Basic-auth password.
    pub basic_auth_pass: Option<String>,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 4312,
            basic_auth_user: None,
            basic_auth_pass: None,
        }
    }
}

impl DashboardConfig {
    /// Credentials pair, when both halves are configured.
    #[must_use]
    pub fn credentials(&self) -> Option<(String, String)> {
        match (&self.basic_auth_user, &self.basic_auth_pass) {
            (Some(user), Some(pass)) => Some((user.clone(), pass.clone())),
            _ => None,
        }
    }
}
