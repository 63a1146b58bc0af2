//! Normalization of diagnostics printed by yt-dlp.
//!
//! yt-dlp reports fatal problems as `ERROR: [<extractor>] <id>: <reason>`,
//! optionally wrapped in terminal color codes. The supervising process only
//! wants `<reason>`.

use regex::Regex;
use std::sync::LazyLock;

/// Reason reported when a diagnostic has no recognizable shape.
pub const UNKNOWN_ERROR: &str = "Unknown error";

static SGR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;]*m").expect("valid SGR regex"));

static ERROR_REASON_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"ERROR: \[[^\]]+\] [^:]+: (.+)").expect("valid diagnostic regex")
});

/// Remove CSI SGR sequences (`ESC [ params m`) from `raw`.
pub fn strip_ansi(raw: &str) -> String {
    SGR_RE.replace_all(raw, "").into_owned()
}

/// Extract the human readable reason from a raw yt-dlp diagnostic.
///
/// Never fails: anything that does not look like an extractor error degrades
/// to [`UNKNOWN_ERROR`].
pub fn normalize(raw: &str) -> String {
    let cleaned = strip_ansi(raw);

    ERROR_REASON_RE
        .captures(&cleaned)
        .and_then(|caps| caps.get(1))
        .map(|reason| reason.as_str().trim())
        .filter(|reason| !reason.is_empty())
        .map_or_else(|| UNKNOWN_ERROR.to_string(), str::to_string)
}

/// True when the line (after color stripping) is a fatal yt-dlp error.
pub fn is_error_line(line: &str) -> bool {
    strip_ansi(line).trim_start().starts_with("ERROR:")
}

/// True when the line (after color stripping) is a yt-dlp warning.
pub fn is_warning_line(line: &str) -> bool {
    strip_ansi(line).trim_start().starts_with("WARNING:")
}
