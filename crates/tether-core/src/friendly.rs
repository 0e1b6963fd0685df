//! Friendly translations for known engine failure categories.
//!
//! Engine CLIs surface provider errors as free-form text. The chat surface
//! shows the owner a short human translation for the categories worth
//! recognizing; anything else passes through verbatim.

/// A recognized failure category.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCategory {
    RateLimit,
    Auth,
    Quota,
    Timeout,
    Overload,
    Unknown,
}

/// Substring markers checked in order of specificity.
const MARKERS: &[(&str, ErrorCategory)] = &[
    ("rate limit", ErrorCategory::RateLimit),
    ("rate_limit", ErrorCategory::RateLimit),
    ("429", ErrorCategory::RateLimit),
    ("unauthorized", ErrorCategory::Auth),
    ("authentication", ErrorCategory::Auth),
    ("api key", ErrorCategory::Auth),
    ("invalid_api_key", ErrorCategory::Auth),
    ("quota", ErrorCategory::Quota),
    ("billing", ErrorCategory::Quota),
    ("insufficient credit", ErrorCategory::Quota),
    ("timed out", ErrorCategory::Timeout),
    ("timeout", ErrorCategory::Timeout),
    ("overloaded", ErrorCategory::Overload),
    ("529", ErrorCategory::Overload),
    ("capacity", ErrorCategory::Overload),
];

/// Classify an error message by substring match (case-insensitive).
#[must_use]
pub fn categorize(message: &str) -> ErrorCategory {
    let lower = message.to_lowercase();
    for (marker, category) in MARKERS {
        if lower.contains(marker) {
            return *category;
        }
    }
    ErrorCategory::Unknown
}

/// A short owner-facing translation, or `None` for unknown categories.
#[must_use]
pub fn friendly_message(message: &str) -> Option<&'static str> {
    match categorize(message) {
        ErrorCategory::RateLimit => {
            Some("The engine hit a rate limit. Wait a bit and retry.")
        }
        ErrorCategory::Auth => {
            Some("The engine rejected its credentials. Check the API key on the host.")
        }
        ErrorCategory::Quota => {
            Some("The account is out of quota or has a billing problem.")
        }
        ErrorCategory::Timeout => Some("The engine timed out. Retry, or split the prompt."),
        ErrorCategory::Overload => {
            Some("The provider is overloaded right now. Retry shortly.")
        }
        ErrorCategory::Unknown => None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
