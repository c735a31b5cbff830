//! Quota/backoff detection over the agent's diagnostic output.
//!
//! A detected rate limit is a scheduling event, not a task failure: the driver
//! sleeps for the advertised window plus [`RATE_LIMIT_MARGIN`] and reports the
//! invocation as successful. This also means a real failure that happens to be
//! reported next to a rate-limit phrase is masked. That trade-off is kept on
//! purpose and covered by tests below.

use std::sync::LazyLock;
use std::time::Duration;

use regex::{Regex, RegexSet};

/// Fixed margin added on top of the advertised reset window.
pub const RATE_LIMIT_MARGIN: Duration = Duration::from_secs(5);

/// Lowercase phrases that mark a line as quota chatter.
const RATE_LIMIT_MARKERS: [&str; 4] = [
    "usage_limit_reached",
    "too many requests",
    "http 429",
    "usage limit",
];

static RETRY_AFTER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)retry[-_ ]after"?\s*:\s*(\d+)"#).expect("retry-after regex")
});

static RESETS_IN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)resets_in_seconds"?\s*:\s*(\d+)"#).expect("resets_in regex")
});

static RESETS_AT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)resets_at"?\s*:\s*(\d+)"#).expect("resets_at regex")
});

/// Diagnostic noise from unrelated sub-tools (MCP transports, OAuth).
static IGNORABLE_RE: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        r"(?i)rmcp::transport::worker",
        r"(?i)AuthRequired\(AuthRequiredError",
        r"(?i)invalid_token",
        r"(?i)OAuth token exchange failed",
        r"(?i)mcp\.notion\.com/mcp",
        r"(?i)mcp\.linear\.app/mcp",
        r"(?i)unexpected EOF during handshake",
    ])
    .expect("ignorable patterns")
});

/// Seconds to wait advertised in `text`, or 0 when none is found.
///
/// Precedence: `retry-after`, then `resets_in_seconds`, then a `resets_at`
/// epoch relative to the current clock.
pub fn rate_limit_seconds(text: &str) -> u64 {
    rate_limit_seconds_at(text, chrono::Utc::now().timestamp())
}

/// [`rate_limit_seconds`] with an explicit `now` (unix seconds).
pub fn rate_limit_seconds_at(text: &str, now: i64) -> u64 {
    if text.is_empty() {
        return 0;
    }
    if let Some(secs) = first_number(&RETRY_AFTER_RE, text) {
        return secs;
    }
    if let Some(secs) = first_number(&RESETS_IN_RE, text) {
        return secs;
    }
    match first_number(&RESETS_AT_RE, text) {
        Some(reset_at) => {
            let reset_at = i64::try_from(reset_at).unwrap_or(i64::MAX);
            u64::try_from(reset_at.saturating_sub(now)).unwrap_or(0)
        }
        None => 0,
    }
}

fn first_number(re: &Regex, text: &str) -> Option<u64> {
    let caps = re.captures(text)?;
    // Out-of-range digit runs count as "no usable value".
    caps.get(1)?.as_str().parse().ok().or(Some(0))
}

/// Whether a line carries a quota/429 phrase.
pub fn mentions_rate_limit(line: &str) -> bool {
    let lowered = line.to_lowercase();
    RATE_LIMIT_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}

/// Whether a diagnostic line is known noise that should not be reported as an error.
pub fn is_ignorable(line: &str) -> bool {
    !line.is_empty() && IGNORABLE_RE.is_match(line)
}

/// Total sleep for a detected window, or `None` when no backoff applies.
pub fn backoff_for(seconds: u64) -> Option<Duration> {
    (seconds > 0).then(|| Duration::from_secs(seconds) + RATE_LIMIT_MARGIN)
}

/// Tracks the largest rate-limit window seen over one invocation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitWatch {
    max_seconds: u64,
    marker_seen: bool,
}

impl RateLimitWatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect one diagnostic line.
    ///
    /// Only lines carrying a quota phrase contribute a window; a bare
    /// `retry-after` from some other tool is ignored.
    pub fn observe(&mut self, line: &str) {
        if !mentions_rate_limit(line) {
            return;
        }
        self.marker_seen = true;
        self.max_seconds = self.max_seconds.max(rate_limit_seconds(line));
    }

    pub fn max_seconds(&self) -> u64 {
        self.max_seconds
    }

    pub fn marker_seen(&self) -> bool {
        self.marker_seen
    }

    /// Sleep owed after the child exits, if any marker crossed the threshold.
    pub fn backoff(&self) -> Option<Duration> {
        backoff_for(self.max_seconds)
    }
}

/// Exit code reported to callers once a rate limit was slept off.
pub fn effective_exit_code(exit_code: i32, backoff: Option<Duration>) -> i32 {
    if backoff.is_some() { 0 } else { exit_code }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    #[test]
    fn retry_after_is_read() {
        assert_eq!(rate_limit_seconds_at("HTTP 429; retry-after: 42", NOW), 42);
        assert_eq!(rate_limit_seconds_at(r#"{"Retry_After": 7}"#, NOW), 7);
    }

    #[test]
    fn resets_in_seconds_is_read() {
        assert_eq!(
            rate_limit_seconds_at(r#"{"error":{"resets_in_seconds": 100}}"#, NOW),
            100
        );
    }

    #[test]
    fn retry_after_takes_precedence() {
        let text = "resets_in_seconds: 100 retry-after: 3";
        assert_eq!(rate_limit_seconds_at(text, NOW), 3);
    }

    #[test]
    fn resets_at_is_relative_to_now() {
        let text = format!(r#""resets_at": {}"#, NOW + 30);
        assert_eq!(rate_limit_seconds_at(&text, NOW), 30);
        let past = format!("resets_at: {}", NOW - 30);
        assert_eq!(rate_limit_seconds_at(&past, NOW), 0);
    }

    #[test]
    fn resets_at_against_wall_clock() {
        let reset = chrono::Utc::now().timestamp() + 30;
        let secs = rate_limit_seconds(&format!("resets_at: {reset}"));
        assert!((28..=30).contains(&secs), "{secs}");
    }

    #[test]
    fn no_markers_yield_zero() {
        assert_eq!(rate_limit_seconds_at("", NOW), 0);
        assert_eq!(rate_limit_seconds_at("error: build failed", NOW), 0);
    }

    #[test]
    fn rate_limit_phrases_are_detected() {
        assert!(mentions_rate_limit("stream error: usage_limit_reached"));
        assert!(mentions_rate_limit("Too Many Requests"));
        assert!(mentions_rate_limit("got HTTP 429 from upstream"));
        assert!(!mentions_rate_limit("tests failed"));
    }

    #[test]
    fn ignorable_noise_matches_known_chatter() {
        assert!(is_ignorable(
            "ERROR rmcp::transport::worker: worker quit with fatal"
        ));
        assert!(is_ignorable("oauth token exchange failed for server"));
        assert!(!is_ignorable("error: could not compile `demo`"));
        assert!(!is_ignorable(""));
    }

    #[test]
    fn watch_keeps_largest_window_and_overrides_exit_code() {
        let mut watch = RateLimitWatch::new();
        watch.observe("stream error: usage_limit_reached retry-after: 2");
        watch.observe("HTTP 429 Too Many Requests retry-after: 9");
        watch.observe("unrelated");
        assert_eq!(watch.max_seconds(), 9);
        let backoff = watch.backoff();
        assert_eq!(backoff, Some(Duration::from_secs(14)));
        assert_eq!(effective_exit_code(1, backoff), 0);
        assert_eq!(effective_exit_code(1, RateLimitWatch::new().backoff()), 1);
    }

    #[test]
    fn marker_without_window_does_not_sleep() {
        let mut watch = RateLimitWatch::new();
        watch.observe("Too Many Requests");
        assert!(watch.marker_seen());
        assert_eq!(watch.backoff(), None);
    }

    /// Verifies a window advertised without a quota phrase neither sleeps nor
    /// hides the failing exit code.
    #[test]
    fn window_without_quota_phrase_is_ignored() {
        let mut watch = RateLimitWatch::new();
        watch.observe("warning: upstream proxy retry-after: 3 while fetching crate index");
        watch.observe(&format!("resets_at: {}", chrono::Utc::now().timestamp() + 60));
        assert!(!watch.marker_seen());
        assert_eq!(watch.backoff(), None);
        assert_eq!(effective_exit_code(1, watch.backoff()), 1);
    }
}
