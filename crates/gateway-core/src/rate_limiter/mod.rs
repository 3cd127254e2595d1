//! Sliding-window rate limiter with block state and an LRU-bounded client
//! table.
//!
//! All state lives behind a single `Mutex`; a `check` is amortized O(1)
//! because a client's timestamp vector is capped at `max_requests`.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Default cap on tracked client entries before LRU eviction kicks in.
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// Result of a single `check` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    /// Whether the request is admitted.
    pub allowed: bool,
    /// Requests remaining in the current window after this check.
    pub remaining: u32,
    /// Unix timestamp, in seconds, at which the window resets.
    pub reset_at: u64,
    /// Seconds the caller should wait before retrying, set only when denied.
    pub retry_after: Option<u64>,
}

#[derive(Debug)]
struct RateLimitEntry {
    /// Monotonic request timestamps, all within the current window.
    timestamps: Vec<Instant>,
    blocked: bool,
    blocked_until: Option<Instant>,
    last_activity: Instant,
}

impl RateLimitEntry {
    fn new(now: Instant) -> Self {
        Self {
            timestamps: Vec::new(),
            blocked: false,
            blocked_until: None,
            last_activity: now,
        }
    }

    fn is_evictable(&self) -> bool {
        self.timestamps.is_empty() && !self.blocked
    }
}

struct State {
    entries: HashMap<String, RateLimitEntry>,
}

/// A per-client sliding-window rate limiter.
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    max_entries: usize,
    enabled: bool,
    state: Mutex<State>,
}

impl RateLimiter {
    /// Construct a limiter with the given window and per-client request cap.
    pub fn new(max_requests: u32, window_ms: u64, enabled: bool) -> Self {
        Self::with_max_entries(max_requests, window_ms, enabled, DEFAULT_MAX_ENTRIES)
    }

    /// Construct a limiter with an explicit entry-count cap, mainly for
    /// tests that want to exercise LRU eviction without creating 10,000
    /// clients.
    pub fn with_max_entries(max_requests: u32, window_ms: u64, enabled: bool, max_entries: usize) -> Self {
        Self {
            max_requests,
            window: Duration::from_millis(window_ms),
            max_entries,
            enabled,
            state: Mutex::new(State {
                entries: HashMap::new(),
            }),
        }
    }

    /// Check whether `key` may proceed, recording the attempt if so.
    pub fn check(&self, key: &str) -> CheckResult {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> CheckResult {
        if !self.enabled {
            return CheckResult {
                allowed: true,
                remaining: self.max_requests,
                reset_at: instant_to_unix_secs(now + self.window),
                retry_after: None,
            };
        }

        let mut state = self.state.lock().expect("rate limiter mutex poisoned");
        let entry = state
            .entries
            .entry(key.to_string())
            .or_insert_with(|| RateLimitEntry::new(now));
        entry.last_activity = now;

        if entry.blocked {
            match entry.blocked_until {
                Some(until) if now < until => {
                    let retry_after = until.duration_since(now).as_secs_f64().ceil() as u64;
                    return CheckResult {
                        allowed: false,
                        remaining: 0,
                        reset_at: instant_to_unix_secs(until),
                        retry_after: Some(retry_after.max(1)),
                    };
                }
                _ => {
                    entry.blocked = false;
                    entry.blocked_until = None;
                }
            }
        }

        let window_start = now.checked_sub(self.window).unwrap_or(now);
        entry.timestamps.retain(|ts| *ts > window_start);

        if entry.timestamps.len() as u32 >= self.max_requests {
            let oldest = entry.timestamps.first().copied().unwrap_or(now);
            let until = oldest + self.window;
            entry.blocked = true;
            entry.blocked_until = Some(until);
            let retry_after = until.saturating_duration_since(now).as_secs_f64().ceil() as u64;
            return CheckResult {
                allowed: false,
                remaining: 0,
                reset_at: instant_to_unix_secs(until),
                retry_after: Some(retry_after.max(1)),
            };
        }

        entry.timestamps.push(now);
        let oldest = entry.timestamps.first().copied().unwrap_or(now);
        let reset_at = oldest + self.window;
        let remaining = self.max_requests.saturating_sub(entry.timestamps.len() as u32);

        CheckResult {
            allowed: true,
            remaining,
            reset_at: instant_to_unix_secs(reset_at),
            retry_after: None,
        }
    }

    /// Run one pass of the background cleanup sweep: prune each entry to
    /// the window, drop empty+unblocked entries, clear expired blocks, and
    /// LRU-evict down to `max_entries` if still over the cap.
    pub fn cleanup(&self) {
        self.cleanup_at(Instant::now());
    }

    fn cleanup_at(&self, now: Instant) {
        let mut state = self.state.lock().expect("rate limiter mutex poisoned");
        let window_start = now.checked_sub(self.window).unwrap_or(now);

        for entry in state.entries.values_mut() {
            entry.timestamps.retain(|ts| *ts > window_start);
            if let Some(until) = entry.blocked_until {
                if now >= until {
                    entry.blocked = false;
                    entry.blocked_until = None;
                }
            }
        }

        state.entries.retain(|_, entry| !entry.is_evictable());

        if state.entries.len() > self.max_entries {
            let overflow = state.entries.len() - self.max_entries;
            let mut by_activity: Vec<(String, Instant)> = state
                .entries
                .iter()
                .map(|(k, v)| (k.clone(), v.last_activity))
                .collect();
            by_activity.sort_by_key(|(_, last_activity)| *last_activity);
            for (key, _) in by_activity.into_iter().take(overflow) {
                state.entries.remove(&key);
            }
        }
    }

    /// Number of tracked client entries, for diagnostics and tests.
    pub fn entry_count(&self) -> usize {
        self.state.lock().expect("rate limiter mutex poisoned").entries.len()
    }

    /// The configured per-window request cap.
    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }
}

fn instant_to_unix_secs(instant: Instant) -> u64 {
    let now_instant = Instant::now();
    let now_unix = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    if instant >= now_instant {
        now_unix + instant.duration_since(now_instant).as_secs()
    } else {
        now_unix.saturating_sub(now_instant.duration_since(instant).as_secs())
    }
}

/// Extracts the rate-limit key from request headers and peer address,
/// following the fixed priority order: `X-API-Key` (first 20 chars),
/// `Authorization: Bearer` token (next 20 chars), first syntactically valid
/// `X-Forwarded-For` entry, the peer address, else `"anonymous"`.
///
/// Invalid candidates fall through to the next source silently; none of
/// them produce an error.
pub fn extract_key(headers: &http::HeaderMap, peer_addr: Option<&str>) -> String {
    if let Some(val) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        if !val.is_empty() {
            return take_chars(val, 20);
        }
    }

    if let Some(val) = headers.get(http::header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        if let Some(token) = val.strip_prefix("Bearer ") {
            if !token.is_empty() {
                return take_chars(token, 20);
            }
        }
    }

    if let Some(val) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = val.split(',').next() {
            let candidate = first.trim();
            if is_valid_address_candidate(candidate) {
                return candidate.to_string();
            }
        }
    }

    if let Some(addr) = peer_addr {
        if is_valid_address_candidate(addr) {
            return addr.to_string();
        }
    }

    "anonymous".to_string()
}

fn take_chars(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

/// Syntactic validation only: IPv4/IPv6 character class and a length cap,
/// matching the fixed priority rule that candidates never cause an error,
/// only a fallthrough.
fn is_valid_address_candidate(candidate: &str) -> bool {
    if candidate.is_empty() || candidate.len() > 45 {
        return false;
    }
    candidate
        .chars()
        .all(|c| c.is_ascii_hexdigit() || c == '.' || c == ':' || c == '%')
}
