//! Run-scoped counters.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Counters owned by the scheduler for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopAnalytics {
    pub iterations: u32,
    pub provider_calls: u32,
    pub logic_retries: u32,
    pub transient_retries: u32,
    /// Provider events seen, keyed by event kind.
    pub event_counts: BTreeMap<String, u64>,
    pub criteria_passed: u32,
    pub criteria_failed: u32,
    pub criteria_duration_ms: u64,
    pub post_checks_run: u32,
    pub post_checks_failed: u32,
    pub baseline_cache_hits: u32,
    pub baseline_cache_misses: u32,
    pub noop_rejections: u32,
    pub commits: u32,
}

impl LoopAnalytics {
    /// Merge counts gathered elsewhere, e.g. across retried provider calls.
    pub fn add_event_counts(&mut self, counts: &BTreeMap<String, u64>) {
        for (kind, count) in counts {
            *self.event_counts.entry(kind.clone()).or_insert(0) += count;
        }
    }

    pub fn record_criteria(&mut self, passed: bool, elapsed: Duration) {
        if passed {
            self.criteria_passed += 1;
        } else {
            self.criteria_failed += 1;
        }
        self.criteria_duration_ms += u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
    }

    /// Record a post-check batch: `run` commands executed, whether one failed.
    pub fn record_post_checks(&mut self, run: u32, failed: bool) {
        self.post_checks_run += run;
        if failed {
            self.post_checks_failed += 1;
        }
    }

    pub fn event_count(&self, kind: &str) -> u64 {
        self.event_counts.get(kind).copied().unwrap_or(0)
    }

    /// Compact one-line summary for logs.
    pub fn summary_line(&self) -> String {
        format!(
            "iterations={} provider_calls={} logic_retries={} transient_retries={} \
             criteria={}/{} post_checks={}/{} baseline_cache={}/{} noop_rejections={} commits={}",
            self.iterations,
            self.provider_calls,
            self.logic_retries,
            self.transient_retries,
            self.criteria_passed,
            self.criteria_passed + self.criteria_failed,
            self.post_checks_run - self.post_checks_failed.min(self.post_checks_run),
            self.post_checks_run,
            self.baseline_cache_hits,
            self.baseline_cache_hits + self.baseline_cache_misses,
            self.noop_rejections,
            self.commits,
        )
    }
}
