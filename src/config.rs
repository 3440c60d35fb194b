//! Policy knobs the spec leaves as config keys or open questions (§6, §9).
//!
//! The crate never reads a config file or owns a location for one — an
//! embedder decides that. `SyncConfig` is plain data so an embedder *can*
//! serialise it if it wants to, without the sync core depending on a format.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// §6: dotfiles are excluded from sync unless turned off.
    pub exclude_hidden_files: bool,
    /// §5: default worker pool size for the task executor.
    pub worker_count: usize,
    /// §5: per-request timeout for control-plane network calls (list/remove).
    pub control_timeout: Duration,
    /// §5: per-request timeout for data-plane calls (upload/download); `None`
    /// means no timeout, matching the spec's "configurable for data".
    pub data_timeout: Option<Duration>,
    /// §9 open question (a): cool-down before a quarantined node is retried.
    pub quarantine_duration: Duration,
    /// §4.6: consecutive permanent failures on the same node before it is
    /// quarantined rather than left to retry on every pass.
    pub quarantine_after_failures: u32,
    /// §4.8: IndexSaver's max write-retry attempts before giving up.
    pub max_save_retries: u32,
    /// §4.8: `SAVE_AFTER_INACTIVE_DURING`.
    pub save_debounce: Duration,
    /// §4.8: `MAX_TIMER_RESTART`.
    pub save_max_restarts: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            exclude_hidden_files: true,
            worker_count: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            control_timeout: Duration::from_secs(4),
            data_timeout: None,
            quarantine_duration: Duration::from_secs(24 * 3600),
            quarantine_after_failures: 5,
            max_save_retries: 6,
            save_debounce: Duration::from_secs_f64(1.0),
            save_max_restarts: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_constants() {
        let cfg = SyncConfig::default();
        assert!(cfg.exclude_hidden_files);
        assert_eq!(cfg.max_save_retries, 6);
        assert_eq!(cfg.save_max_restarts, 30);
        assert_eq!(cfg.save_debounce, Duration::from_secs_f64(1.0));
        assert_eq!(cfg.quarantine_duration, Duration::from_secs(24 * 3600));
        assert_eq!(cfg.quarantine_after_failures, 5);
    }

    #[test]
    fn round_trips_through_json() {
        let cfg = SyncConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: SyncConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg, back);
    }
}
