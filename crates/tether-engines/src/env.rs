//! Child environment sanitization.

use std::collections::HashMap;

/// Directories that must prefix `PATH` for the engine binaries to resolve
/// under launchd/systemd-style minimal environments.
const PATH_PREFIXES: [&str; 2] = ["/opt/homebrew/bin", "/usr/local/bin"];

/// Build the child environment from the parent's:
///
/// - drop every `CLAUDECODE*` variable (a nested claude refuses to run
///   inside itself),
/// - make sure the common binary directories lead `PATH`.
#[must_use]
pub fn sanitized_env(
    parent: impl IntoIterator<Item = (String, String)>,
) -> HashMap<String, String> {
    let mut env: HashMap<String, String> = parent
        .into_iter()
        .filter(|(key, _)| !key.starts_with("CLAUDECODE"))
        .collect();

    let current_path = env.get("PATH").cloned().unwrap_or_default();
    env.insert("PATH".to_string(), prefixed_path(&current_path));
    env
}

fn prefixed_path(current: &str) -> String {
    let mut parts: Vec<String> = Vec::new();
    for prefix in PATH_PREFIXES {
        if !current.split(':').any(|p| p == prefix) {
            parts.push(prefix.to_string());
        }
    }
    if !current.is_empty() {
        parts.push(current.to_string());
    }
    parts.join(":")
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn env_of(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        sanitized_env(
            pairs
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string())),
        )
    }

    #[test]
    fn claudecode_vars_stripped() {
        let env = env_of(&[
            ("CLAUDECODE", "1"),
            ("CLAUDECODE_SESSION", "x"),
            ("HOME", "/root"),
        ]);
        assert!(!env.contains_key("CLAUDECODE"));
        assert!(!env.contains_key("CLAUDECODE_SESSION"));
        assert_eq!(env.get("HOME").map(String::as_str), Some("/root"));
    }

    #[test]
    fn path_gets_prefixed() {
        let env = env_of(&[("PATH", "/usr/bin:/bin")]);
        assert_eq!(
            env.get("PATH").map(String::as_str),
            Some("/opt/homebrew/bin:/usr/local/bin:/usr/bin:/bin")
        );
    }

    #[test]
    fn path_prefix_not_duplicated() {
        let env = env_of(&[("PATH", "/usr/local/bin:/usr/bin")]);
        assert_eq!(
            env.get("PATH").map(String::as_str),
            Some("/opt/homebrew/bin:/usr/local/bin:/usr/bin")
        );
    }

    #[test]
    fn missing_path_synthesized() {
        let env = env_of(&[("HOME", "/root")]);
        assert_eq!(
            env.get("PATH").map(String::as_str),
            Some("/opt/homebrew/bin:/usr/local/bin")
        );
    }
}
