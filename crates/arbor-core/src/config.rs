#![forbid(unsafe_code)]

//! Reconciler configuration.
//!
//! Defaults are documented per field. [`ReconcilerConfig::from_env`] layers
//! `ARBOR_*` environment variables over the defaults; unparsable values are
//! ignored with a `warn` event.

use std::env;

/// Environment variable overriding [`ReconcilerConfig::retry_cap`].
pub const ENV_RETRY_CAP: &str = "ARBOR_RETRY_CAP";
/// Environment variable overriding [`ReconcilerConfig::time_slicing`].
pub const ENV_TIME_SLICING: &str = "ARBOR_TIME_SLICING";
/// Environment variable overriding [`ReconcilerConfig::record_commits`].
pub const ENV_RECORD_COMMITS: &str = "ARBOR_RECORD_COMMITS";
/// Environment variable overriding [`ReconcilerConfig::commit_record_capacity`].
pub const ENV_COMMIT_RECORD_CAPACITY: &str = "ARBOR_COMMIT_RECORD_CAPACITY";

/// Configuration for a reconciler instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Maximum number of suspensions and failures handled within one render
    /// attempt before the lane is abandoned. Hitting it indicates a bug.
    /// Default: 20.
    pub retry_cap: u32,

    /// Poll the scheduler's yield signal between units of non-sync work.
    /// When disabled every render runs to completion.
    /// Default: true.
    pub time_slicing: bool,

    /// Capture a flag snapshot of every finished tree at commit time.
    /// Default: false.
    pub record_commits: bool,

    /// Maximum number of commit records retained.
    /// Default: 64.
    pub commit_record_capacity: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            retry_cap: 20,
            time_slicing: true,
            record_commits: false,
            commit_record_capacity: 64,
        }
    }
}

impl ReconcilerConfig {
    /// Defaults overlaid with `ARBOR_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| env::var(key).ok())
    }

    /// Overlay values produced by `lookup` (keyed by the `ENV_*` names).
    #[must_use]
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(val) = lookup(ENV_RETRY_CAP) {
            match val.trim().parse() {
                Ok(n) => self.retry_cap = n,
                Err(_) => warn_ignored(ENV_RETRY_CAP, &val),
            }
        }
        if let Some(val) = lookup(ENV_TIME_SLICING) {
            match parse_bool(&val) {
                Some(b) => self.time_slicing = b,
                None => warn_ignored(ENV_TIME_SLICING, &val),
            }
        }
        if let Some(val) = lookup(ENV_RECORD_COMMITS) {
            match parse_bool(&val) {
                Some(b) => self.record_commits = b,
                None => warn_ignored(ENV_RECORD_COMMITS, &val),
            }
        }
        if let Some(val) = lookup(ENV_COMMIT_RECORD_CAPACITY) {
            match val.trim().parse() {
                Ok(n) => self.commit_record_capacity = n,
                Err(_) => warn_ignored(ENV_COMMIT_RECORD_CAPACITY, &val),
            }
        }
        self
    }

    #[must_use]
    pub fn with_retry_cap(mut self, cap: u32) -> Self {
        self.retry_cap = cap;
        self
    }

    #[must_use]
    pub fn with_time_slicing(mut self, enabled: bool) -> Self {
        self.time_slicing = enabled;
        self
    }

    #[must_use]
    pub fn with_record_commits(mut self, enabled: bool) -> Self {
        self.record_commits = enabled;
        self
    }

    #[must_use]
    pub fn with_commit_record_capacity(mut self, capacity: usize) -> Self {
        self.commit_record_capacity = capacity;
        self
    }
}

fn parse_bool(val: &str) -> Option<bool> {
    let val = val.trim();
    if val == "1" || val.eq_ignore_ascii_case("true") || val.eq_ignore_ascii_case("on") {
        Some(true)
    } else if val == "0" || val.eq_ignore_ascii_case("false") || val.eq_ignore_ascii_case("off")
    {
        Some(false)
    } else {
        None
    }
}

fn warn_ignored(key: &str, val: &str) {
    tracing::warn!(message = "config.env_ignored", key, value = val);
}

// ---- Tests ----
