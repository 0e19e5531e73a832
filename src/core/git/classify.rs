//! Push failure classification.
//!
//! Decides from git's error text whether a rejected push looks like missing
//! or wrong credentials. Only that kind of failure earns a token retry.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PushErrorKind {
    Auth,
    Other,
}

pub type PushFailureClassifier = fn(&str) -> PushErrorKind;

/// Lowercase substrings that mark an authentication or access failure.
pub const AUTH_MARKERS: &[&str] = &[
    "repository not found",
    "authentication",
    "403",
    "401",
    "could not read username",
    "permission denied",
    "invalid username or password",
];

pub fn classify_push_failure(text: &str) -> PushErrorKind {
    let lower = text.to_lowercase();
    if AUTH_MARKERS.iter().any(|marker| lower.contains(marker)) {
        PushErrorKind::Auth
    } else {
        PushErrorKind::Other
    }
}
