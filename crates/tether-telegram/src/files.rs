//! File sandbox helpers for `/get` and uploads.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::errors::{ChatError, Result};

/// Resolve a user-supplied relative path inside a root, refusing escapes.
///
/// The requested path is joined onto the root and canonicalized; the result
/// must still live under the canonicalized root. Symlinks pointing outside
/// are rejected by the same check.
pub fn resolve_in_root(root: &Path, requested: &str) -> Result<PathBuf> {
    if requested.trim().is_empty() {
        return Err(ChatError::Sandbox("empty path".into()));
    }
    let requested_path = Path::new(requested);
    if requested_path.is_absolute() {
        return Err(ChatError::Sandbox(format!(
            "absolute paths not allowed: {requested}"
        )));
    }

    let root = root
        .canonicalize()
        .map_err(|e| ChatError::Sandbox(format!("root unavailable: {e}")))?;
    let joined = root.join(requested_path);
    let resolved = joined
        .canonicalize()
        .map_err(|_| ChatError::Sandbox(format!("no such file: {requested}")))?;

    if !resolved.starts_with(&root) {
        return Err(ChatError::Sandbox(format!(
            "path escapes the project root: {requested}"
        )));
    }
    Ok(resolved)
}

/// Hex SHA-256 of a byte slice.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
