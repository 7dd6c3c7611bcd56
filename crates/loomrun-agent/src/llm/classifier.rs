//! Transient-versus-permanent failure classification.
//!
//! Pure and synchronous: classification only inspects an error value and
//! its `source()` chain, so it is testable without any network I/O.
//!
//! An error is transient when any link in its chain is
//!
//! - an [`io::Error`] whose kind is a refused connection, a broken pipe or
//!   a timeout,
//! - a [`reqwest::Error`] that failed to connect or timed out, or
//! - rendered text containing one of [`TRANSIENT_PATTERNS`]
//!   (case-insensitive).
//!
//! Everything else, authorization failures included, is permanent.

use std::error::Error as StdError;
use std::io;
use std::sync::LazyLock;

use aho_corasick::AhoCorasick;

/// Case-insensitive substrings that mark a network-level failure.
pub const TRANSIENT_PATTERNS: &[&str] = &[
    "connection refused",
    "broken pipe",
    "timed out",
    "timeout",
    "connect to",
];

static MATCHER: LazyLock<Option<AhoCorasick>> = LazyLock::new(|| {
    match AhoCorasick::builder()
        .ascii_case_insensitive(true)
        .build(TRANSIENT_PATTERNS)
    {
        Ok(ac) => Some(ac),
        Err(e) => {
            tracing::error!(error = %e, "failed to build transient-error automaton");
            None
        }
    }
});

/// Outcome of classifying a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Worth one retry after a backoff.
    Transient,
    /// Retrying will not help; move on.
    Permanent,
}

impl ErrorClass {
    pub fn is_transient(self) -> bool {
        self == Self::Transient
    }
}

/// Classify an error by walking its whole cause chain.
pub fn classify(err: &(dyn StdError + 'static)) -> ErrorClass {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(link) = current {
        if is_transient_link(link) {
            return ErrorClass::Transient;
        }
        current = link.source();
    }
    ErrorClass::Permanent
}

/// Classify a bare error message.
pub fn classify_message(message: &str) -> ErrorClass {
    if matches_transient_text(message) {
        ErrorClass::Transient
    } else {
        ErrorClass::Permanent
    }
}

fn is_transient_link(link: &(dyn StdError + 'static)) -> bool {
    if let Some(io) = link.downcast_ref::<io::Error>()
        && matches!(
            io.kind(),
            io::ErrorKind::ConnectionRefused
                | io::ErrorKind::BrokenPipe
                | io::ErrorKind::TimedOut
        )
    {
        return true;
    }
    if let Some(http) = link.downcast_ref::<reqwest::Error>()
        && (http.is_connect() || http.is_timeout())
    {
        return true;
    }
    matches_transient_text(&link.to_string())
}

fn matches_transient_text(text: &str) -> bool {
    match MATCHER.as_ref() {
        Some(ac) => ac.is_match(text),
        None => {
            let lower = text.to_lowercase();
            TRANSIENT_PATTERNS.iter().any(|p| lower.contains(p))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("request failed")]
    struct Wrapper {
        #[source]
        inner: io::Error,
    }

    #[test]
    fn broken_pipe_text_is_transient() {
        assert_eq!(classify_message("Broken pipe"), ErrorClass::Transient);
        assert_eq!(classify_message("BROKEN PIPE (os error 32)"), ErrorClass::Transient);
    }

    #[test]
    fn network_phrases_are_transient() {
        for msg in [
            "Connection refused",
            "read timed out",
            "Request timeout after 30s",
            "failed to connect to localhost:11434",
        ] {
            assert_eq!(classify_message(msg), ErrorClass::Transient, "{msg}");
        }
    }

    #[test]
    fn authorization_failure_is_permanent() {
        assert_eq!(classify_message("http 401: Unauthorized"), ErrorClass::Permanent);
        assert_eq!(classify_message("invalid api key"), ErrorClass::Permanent);
    }

    #[test]
    fn io_kind_in_cause_chain_is_transient() {
        let err = Wrapper {
            inner: io::Error::new(io::ErrorKind::ConnectionRefused, "os error 111"),
        };
        assert_eq!(classify(&err), ErrorClass::Transient);
    }

    #[test]
    fn cause_chain_text_is_inspected() {
        let err = Wrapper {
            inner: io::Error::other("socket Timed Out"),
        };
        assert_eq!(classify(&err), ErrorClass::Transient);
    }

    #[test]
    fn connection_reset_without_matching_text_is_permanent() {
        let err = io::Error::new(io::ErrorKind::ConnectionReset, "peer reset");
        assert_eq!(classify(&err), ErrorClass::Permanent);

        let wrapped = Wrapper { inner: err };
        assert_eq!(classify(&wrapped), ErrorClass::Permanent);
    }

    #[test]
    fn unrelated_chain_is_permanent() {
        let err = Wrapper {
            inner: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        };
        assert_eq!(classify(&err), ErrorClass::Permanent);
        assert!(!classify(&err).is_transient());
    }
}
