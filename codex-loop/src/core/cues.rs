//! Failure-language detection in agent responses.

use std::sync::LazyLock;

use regex::RegexSet;

use crate::core::rate_limit::{is_ignorable, mentions_rate_limit};

static ERROR_CUES: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        r"(?i)\btraceback\b",
        r"(?i)\bexception\b",
        r"(?i)\bpanic\b",
        r"(?i)\bfatal\b",
        r"(?i)\bsegmentation\s+fault\b",
        r"(?i)\btests?\s+failed\b",
        r"(?i)\bbuild\s+failed\b",
        r"(?i)\bcompilation\s+failed\b",
        r"(?i)\blint\s+failed\b",
        r"(?i)\bmodule\s+not\s+found\b",
        r"(?i)\bnon[-\s]?zero\b",
        r"(?i)\bexit\s+code\b",
        // failed, error, exception, cannot, not found, error code
        r"\x{5931}\x{8d25}",
        r"\x{9519}\x{8bef}",
        r"\x{5f02}\x{5e38}",
        r"\x{65e0}\x{6cd5}",
        r"\x{627e}\x{4e0d}\x{5230}",
        r"\x{9519}\x{8bef}\x{7801}",
    ])
    .expect("error cue patterns")
});

/// Whether `text` reads like a failure report.
///
/// Lines mentioning a rate limit or matching known diagnostic noise are dropped
/// first, so quota messages never trigger a repair even when they also contain
/// failure words.
pub fn has_error_cue(text: &str) -> bool {
    let filtered: Vec<&str> = text
        .lines()
        .filter(|line| !mentions_rate_limit(line) && !is_ignorable(line))
        .collect();
    let filtered = filtered.join("\n");
    let filtered = filtered.trim();
    !filtered.is_empty() && ERROR_CUES.is_match(filtered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn english_failure_words_match() {
        assert!(has_error_cue("Running...\nerror: tests failed (3)"));
        assert!(has_error_cue("Traceback (most recent call last):"));
        assert!(has_error_cue("process exited with non-zero status"));
        assert!(has_error_cue("Build FAILED"));
    }

    #[test]
    fn clean_output_has_no_cue() {
        assert!(!has_error_cue(""));
        assert!(!has_error_cue("Summary: added tests\nNext Step: run CI"));
        assert!(!has_error_cue("all 12 tests passed"));
    }

    #[test]
    fn cjk_failure_phrasing_matches() {
        assert!(has_error_cue("构建失败"));
        assert!(has_error_cue("找不到文件"));
    }

    #[test]
    fn rate_limit_lines_are_filtered_before_matching() {
        assert!(!has_error_cue("stream error: usage_limit_reached; request failed with exit code 1"));
        assert!(!has_error_cue("HTTP 429 Too Many Requests: fatal"));
        // A failure on its own line still counts.
        assert!(has_error_cue("usage_limit_reached\nbuild failed"));
    }

    #[test]
    fn ignorable_noise_is_filtered() {
        assert!(!has_error_cue(
            "rmcp::transport::worker: fatal error: unexpected EOF during handshake"
        ));
    }
}
