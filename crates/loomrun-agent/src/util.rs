//! Small helpers shared across the crate.

/// Preview length used for user payloads in log lines.
pub const LOG_PREVIEW_CHARS: usize = 80;

/// Shorten `value` to at most `max_chars` characters followed by a size
/// annotation such as `...[45231 chars]`.
///
/// Tool results can embed whole base64-encoded images; logging them raw
/// buries everything else.  Values that already fit are returned as is.
pub fn truncate_for_log(value: &str, max_chars: usize) -> String {
    let total = value.chars().count();
    if total <= max_chars {
        return value.to_owned();
    }
    let prefix: String = value.chars().take(max_chars).collect();
    format!("{prefix}...[{total} chars]")
}
