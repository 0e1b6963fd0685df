//! Tool permission policy per engine.
//!
//! Safe mode grants read-only exploration; unsafe mode (time-bounded, per
//! chat) adds editing and a guarded bash allowlist. The OpenCode policy is
//! delivered as a JSON document through `OPENCODE_CONFIG_CONTENT`; it never
//! contains `"ask"` — the bridge has nobody at the terminal to answer.

use serde_json::{json, Value};

/// Claude tool CSV for safe mode.
pub const CLAUDE_SAFE_TOOLS: &str = "Read,Glob,Grep";

/// Claude tool CSV for unsafe mode.
pub const CLAUDE_UNSAFE_TOOLS: &str = "Bash,Read,Edit,Write,Glob,Grep";

/// Bash patterns allowed in unsafe mode.
const BASH_ALLOW: &str = "git *|pnpm *|npm *|cargo *|python *|node *";

/// Bash patterns always denied.
const BASH_DENY: &str = "rm *|sudo *|dd *|mkfs *";

/// Claude tool CSV for the given mode.
#[must_use]
pub fn claude_tools(unsafe_mode: bool) -> &'static str {
    if unsafe_mode {
        CLAUDE_UNSAFE_TOOLS
    } else {
        CLAUDE_SAFE_TOOLS
    }
}

/// The OpenCode permission document for the given mode.
#[must_use]
pub fn opencode_permissions(unsafe_mode: bool) -> Value {
    let mut permission = json!({
        "*": "deny",
        "read": "allow",
        "glob": "allow",
        "grep": "allow",
        "list": "allow",
        "external_directory": "deny",
    });

    if unsafe_mode {
        permission["edit"] = json!({ "*": "allow" });
        permission["bash"] = json!({
            "*": "deny",
            BASH_ALLOW: "allow",
            BASH_DENY: "deny",
        });
    }

    json!({ "permission": permission })
}

/// Serialized policy for `OPENCODE_CONFIG_CONTENT`.
#[must_use]
pub fn opencode_config_content(unsafe_mode: bool) -> String {
    opencode_permissions(unsafe_mode).to_string()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
