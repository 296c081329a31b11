//! Structured span definitions for tracing.

use std::time::Instant;

use tracing::{Level, Span, field, span};

use crate::tiers::Resource;

/// Span factory bound to one subscriber.
#[derive(Debug, Clone)]
pub struct SpanContext {
    subscriber_id: String,
}

impl SpanContext {
    pub fn new(subscriber_id: impl Into<String>) -> Self {
        Self {
            subscriber_id: subscriber_id.into(),
        }
    }

    pub fn admit_span(&self, resources: &[Resource]) -> Span {
        let resources: Vec<&str> = resources.iter().map(|r| r.as_str()).collect();
        span!(
            Level::DEBUG,
            "quota.admit",
            subscriber_id = %self.subscriber_id,
            resources = %resources.join(","),
            allowed = field::Empty,
        )
    }

    pub fn tier_change_span(&self, from_tier: &str, to_tier: &str) -> TimedSpan {
        TimedSpan::new(span!(
            Level::INFO,
            "tier_change.apply",
            subscriber_id = %self.subscriber_id,
            from_tier = from_tier,
            to_tier = to_tier,
            outcome = field::Empty,
            latency_ms = field::Empty,
        ))
    }

    pub fn sync_span(&self) -> TimedSpan {
        TimedSpan::new(span!(
            Level::DEBUG,
            "status.sync",
            subscriber_id = %self.subscriber_id,
            outcome = field::Empty,
            latency_ms = field::Empty,
        ))
    }
}

/// Span that records its own latency and outcome when finished.
pub struct TimedSpan {
    span: Span,
    start: Instant,
}

impl TimedSpan {
    fn new(span: Span) -> Self {
        Self {
            span,
            start: Instant::now(),
        }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn finish(self, outcome: &str) {
        let latency_ms = self.start.elapsed().as_millis() as u64;
        self.span.record("outcome", outcome);
        self.span.record("latency_ms", latency_ms);
    }
}
