//! Error classification for RPC responses (spec.md §4.1, §7): is an error
//! retryable, and — for `eth_getLogs` block-range errors specifically —
//! what block range does the provider say it will actually accept.
//!
//! The regex table is provider-specific knowledge the teacher's
//! `fetch_logs::retry_with_block_range` hard-codes because every major
//! RPC vendor phrases its "range too large" error differently and none of
//! them return a structured field for it.

use once_cell::sync::Lazy;
use regex::Regex;

/// Whether a request should be retried, and if so, a suggested delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Retry immediately (subject to the caller's own backoff/concurrency
    /// policy) — network blip, 5xx, or an explicitly retryable flag.
    Retryable,
    /// Retry with the block range narrowed to `suggested_range` blocks
    /// per call — provider rejected the range as too large.
    NarrowBlockRange { suggested_range: u64 },
    /// Rate-limited: the caller should back off via `AdaptiveConcurrency`.
    RateLimited,
    /// Propagate immediately — invalid params, unsupported method, etc.
    NonRetryable,
}

fn parse_group(captures: &regex::Captures, index: usize) -> Option<u64> {
    captures.get(index)?.as_str().parse().ok()
}

// Alchemy: "query returned more than 10000 results. Try with this block range [0x1, 0x2]."
static ALCHEMY_RANGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)query returned more than \d+ results").unwrap());

// Infura: "query returned more than 10000 results"; range-limited variant:
// "Log response size exceeded. You can make eth_getLogs requests with up to a 10 block range"
static INFURA_RANGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)up to a (\d+) block range").unwrap());

// Ankr: "block range is too wide, max 3000 blocks"
static ANKR_RANGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)max (\d+) blocks").unwrap());

// QuickNode: "eth_getLogs is limited to a 10,000 range"
static QUICKNODE_RANGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)limited to a ([\d,]+) range").unwrap());

// Base (and other OP-stack RPCs): "block range too large, maximum is 5000"
static BASE_RANGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)maximum is (\d+)").unwrap());

static RATE_LIMIT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)rate limit|too many requests|429").unwrap());

static RETRYABLE_GENERIC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)request failed|connection reset|timed out|timeout|5\d\d|temporarily unavailable")
        .unwrap()
});

/// Classifies a raw error message from an RPC response.
pub fn classify_error(message: &str, attempted_range: u64) -> RetryClass {
    if RATE_LIMIT.is_match(message) {
        return RetryClass::RateLimited;
    }

    if let Some(captures) = INFURA_RANGE.captures(message) {
        if let Some(range) = parse_group(&captures, 1) {
            return RetryClass::NarrowBlockRange { suggested_range: range };
        }
    }
    if let Some(captures) = ANKR_RANGE.captures(message) {
        if let Some(range) = parse_group(&captures, 1) {
            return RetryClass::NarrowBlockRange { suggested_range: range };
        }
    }
    if let Some(captures) = QUICKNODE_RANGE.captures(message) {
        let digits: String = captures.get(1).map(|m| m.as_str().replace(',', "")).unwrap_or_default();
        if let Ok(range) = digits.parse() {
            return RetryClass::NarrowBlockRange { suggested_range: range };
        }
    }
    if let Some(captures) = BASE_RANGE.captures(message) {
        if let Some(range) = parse_group(&captures, 1) {
            return RetryClass::NarrowBlockRange { suggested_range: range };
        }
    }
    if ALCHEMY_RANGE.is_match(message) {
        // Alchemy doesn't state a number; halve what we attempted.
        return RetryClass::NarrowBlockRange { suggested_range: (attempted_range / 2).max(1) };
    }

    if RETRYABLE_GENERIC.is_match(message) {
        return RetryClass::Retryable;
    }

    RetryClass::NonRetryable
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alchemy_message_narrows_range_by_half() {
        let class = classify_error("query returned more than 10000 results", 2_000);
        assert_eq!(class, RetryClass::NarrowBlockRange { suggested_range: 1_000 });
    }

    #[test]
    fn infura_message_extracts_suggested_range() {
        let class = classify_error(
            "Log response size exceeded. You can make eth_getLogs requests with up to a 10 block range",
            50,
        );
        assert_eq!(class, RetryClass::NarrowBlockRange { suggested_range: 10 });
    }

    #[test]
    fn ankr_message_extracts_suggested_range() {
        let class = classify_error("block range is too wide, max 3000 blocks", 5_000);
        assert_eq!(class, RetryClass::NarrowBlockRange { suggested_range: 3_000 });
    }

    #[test]
    fn quicknode_message_strips_thousands_separator() {
        let class = classify_error("eth_getLogs is limited to a 10,000 range", 20_000);
        assert_eq!(class, RetryClass::NarrowBlockRange { suggested_range: 10_000 });
    }

    #[test]
    fn base_message_extracts_maximum() {
        let class = classify_error("block range too large, maximum is 5000", 8_000);
        assert_eq!(class, RetryClass::NarrowBlockRange { suggested_range: 5_000 });
    }

    #[test]
    fn rate_limit_message_is_classified_distinctly() {
        assert_eq!(classify_error("429 Too Many Requests", 10), RetryClass::RateLimited);
    }

    #[test]
    fn generic_transient_message_is_retryable() {
        assert_eq!(classify_error("request failed, connection reset", 10), RetryClass::Retryable);
    }

    #[test]
    fn invalid_params_is_non_retryable() {
        assert_eq!(classify_error("invalid params: bad address", 10), RetryClass::NonRetryable);
    }
}
