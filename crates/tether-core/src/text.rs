//! Text helpers shared by the chat-facing crates.

/// Strip ASCII control characters (except tab, LF, CR) and trim.
#[must_use]
pub fn sanitize(input: &str) -> String {
    input
        .chars()
        .filter(|&c| !c.is_ascii_control() || c == '\t' || c == '\n' || c == '\r')
        .collect::<String>()
        .trim()
        .to_string()
}

/// Truncate to at most `max_chars` characters, appending `…` when cut.
#[must_use]
pub fn truncate_str(input: &str, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input.to_string();
    }
    let mut out: String = input.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}

/// Last `max_chars` characters of `input`, on a char boundary.
#[must_use]
pub fn tail(input: &str, max_chars: usize) -> &str {
    let count = input.chars().count();
    if count <= max_chars {
        return input;
    }
    let skip = count - max_chars;
    match input.char_indices().nth(skip) {
        Some((idx, _)) => &input[idx..],
        None => input,
    }
}

/// Format a millisecond duration as `<s>s` under a minute, else `<m>m <s>s`.
#[must_use]
pub fn format_elapsed(duration_ms: u64) -> String {
    let total_secs = duration_ms / 1000;
    if total_secs < 60 {
        format!("{total_secs}s")
    } else {
        format!("{}m {}s", total_secs / 60, total_secs % 60)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
