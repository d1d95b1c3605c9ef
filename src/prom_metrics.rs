//! # Prometheus Metrics — Exposition for Scraping
//!
//! Exposes quest and ticket activity in the Prometheus text exposition format.
//!
//! ## Metrics Exposed
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `onchain_quest_quests_completed_total` | Counter | `action` | Successful quest claims |
//! | `onchain_quest_quests_rejected_total` | Counter | `action`, `reason` | Refused quest claims |
//! | `onchain_quest_tickets_issued_total` | Counter | — | Ticket codes generated |
//! | `onchain_quest_tickets_associated_total` | Counter | — | Tickets bound to a profile |
//! | `onchain_quest_attestation_failures_total` | Counter | — | Best-effort attestations that failed |
//! | `onchain_quest_http_request_duration_seconds` | Histogram | `method`, `path` | Request latency |
//!
//! The `/metrics` endpoint renders the registry on each scrape. Paths are
//! normalised before labelling so numeric ids and ticket codes do not explode
//! label cardinality.

use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ActionLabel {
    pub action: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RejectionLabel {
    pub action: String,
    pub reason: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct HttpLabel {
    pub method: String,
    pub path: String,
}

fn duration_histogram() -> Histogram {
    // 5ms .. ~10s
    Histogram::new(exponential_buckets(0.005, 2.0, 12))
}

/// Thread-safe metrics registry.
///
/// All fields are atomic and safe to update from any task. `Family` creates a
/// metric instance per label set on first use.
pub struct Metrics {
    pub registry: Registry,
    pub quests_completed: Family<ActionLabel, Counter>,
    pub quests_rejected: Family<RejectionLabel, Counter>,
    pub tickets_issued: Counter,
    pub tickets_associated: Counter,
    pub attestation_failures: Counter,
    pub http_request_duration: Family<HttpLabel, Histogram, fn() -> Histogram>,
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("onchain_quest");

        let quests_completed = Family::<ActionLabel, Counter>::default();
        registry.register(
            "quests_completed",
            "Successful quest claims by action",
            quests_completed.clone(),
        );

        let quests_rejected = Family::<RejectionLabel, Counter>::default();
        registry.register(
            "quests_rejected",
            "Refused quest claims by action and reason",
            quests_rejected.clone(),
        );

        let tickets_issued = Counter::default();
        registry.register(
            "tickets_issued",
            "Ticket codes generated",
            tickets_issued.clone(),
        );

        let tickets_associated = Counter::default();
        registry.register(
            "tickets_associated",
            "Tickets bound to a profile",
            tickets_associated.clone(),
        );

        let attestation_failures = Counter::default();
        registry.register(
            "attestation_failures",
            "Ticket attestations that failed after association",
            attestation_failures.clone(),
        );

        let http_request_duration =
            Family::<HttpLabel, Histogram, fn() -> Histogram>::new_with_constructor(
                duration_histogram,
            );
        registry.register(
            "http_request_duration_seconds",
            "HTTP request latency by method and normalised path",
            http_request_duration.clone(),
        );

        Self {
            registry,
            quests_completed,
            quests_rejected,
            tickets_issued,
            tickets_associated,
            attestation_failures,
            http_request_duration,
        }
    }

    pub fn quest_completed(&self, action: &str) {
        self.quests_completed
            .get_or_create(&ActionLabel {
                action: action.to_string(),
            })
            .inc();
    }

    pub fn quest_rejected(&self, action: &str, reason: &str) {
        self.quests_rejected
            .get_or_create(&RejectionLabel {
                action: action.to_string(),
                reason: reason.to_string(),
            })
            .inc();
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buf = String::new();
        encode(&mut buf, &self.registry)?;
        Ok(buf)
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_includes_registered_families() {
        let m = Metrics::new();
        m.quest_completed("claim-poap");
        m.tickets_issued.inc_by(10);

        let output = m.encode().unwrap();
        assert!(output.contains("onchain_quest_quests_completed_total"));
        assert!(output.contains("claim-poap"));
        assert!(output.contains("onchain_quest_tickets_issued_total 10"));
    }

    #[test]
    fn rejections_are_labelled_by_reason() {
        let m = Metrics::new();
        m.quest_rejected("claim-subname", "conflict");
        m.quest_rejected("claim-subname", "rejected");
        m.quest_rejected("claim-subname", "rejected");

        let output = m.encode().unwrap();
        assert!(output.contains(r#"reason="conflict""#));
        assert!(output.contains(r#"reason="rejected""#));
    }

    #[test]
    fn http_histogram_records_observations() {
        let m = Metrics::new();
        m.http_request_duration
            .get_or_create(&HttpLabel {
                method: "GET".into(),
                path: "/api/leaderboard".into(),
            })
            .observe(0.012);
        let output = m.encode().unwrap();
        assert!(output.contains("onchain_quest_http_request_duration_seconds_count"));
        assert!(output.contains("/api/leaderboard"));
    }
}
