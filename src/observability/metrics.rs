//! Atomic counters for quota activity.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Thread-safe atomic counter.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Thread-safe atomic gauge.
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicI64,
}

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::Relaxed);
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        self.value.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Quota engine metrics, shared across guard, dispatcher, workflow and sync.
#[derive(Debug, Default)]
pub struct QuotaMetrics {
    pub admissions_allowed: Counter,
    pub admissions_denied: Counter,
    pub integrity_failures: Counter,
    pub alerts_emitted: Counter,
    pub tier_changes: Counter,
    pub tier_change_failures: Counter,
    pub sync_runs: Counter,
    pub sync_failures: Counter,
    pub grace_expirations: Counter,
    pub workflows_applying: Gauge,
}

impl QuotaMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            admissions_allowed: self.admissions_allowed.get(),
            admissions_denied: self.admissions_denied.get(),
            integrity_failures: self.integrity_failures.get(),
            alerts_emitted: self.alerts_emitted.get(),
            tier_changes: self.tier_changes.get(),
            tier_change_failures: self.tier_change_failures.get(),
            sync_runs: self.sync_runs.get(),
            sync_failures: self.sync_failures.get(),
            grace_expirations: self.grace_expirations.get(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSummary {
    pub admissions_allowed: u64,
    pub admissions_denied: u64,
    pub integrity_failures: u64,
    pub alerts_emitted: u64,
    pub tier_changes: u64,
    pub tier_change_failures: u64,
    pub sync_runs: u64,
    pub sync_failures: u64,
    pub grace_expirations: u64,
}

impl MetricsSummary {
    pub fn denial_rate(&self) -> f64 {
        let total = self.admissions_allowed + self.admissions_denied;
        if total == 0 {
            0.0
        } else {
            self.admissions_denied as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_and_gauge() {
        let counter = Counter::new();
        counter.inc();
        counter.add(4);
        assert_eq!(counter.get(), 5);

        let gauge = Gauge::new();
        gauge.inc();
        gauge.inc();
        gauge.dec();
        assert_eq!(gauge.get(), 1);
        gauge.set(-3);
        assert_eq!(gauge.get(), -3);
    }

    #[test]
    fn test_denial_rate() {
        let metrics = QuotaMetrics::new();
        assert_eq!(metrics.summary().denial_rate(), 0.0);

        metrics.admissions_allowed.add(3);
        metrics.admissions_denied.inc();
        assert!((metrics.summary().denial_rate() - 0.25).abs() < f64::EPSILON);
    }
}
