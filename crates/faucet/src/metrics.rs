//! Prometheus metrics for the faucet

use prometheus::{
    histogram_opts, opts, Counter, Encoder, Histogram, IntCounterVec, IntGauge, Registry,
    TextEncoder,
};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct FaucetMetrics {
    registry: Registry,

    /// Claims by outcome (`success` or an error label)
    pub claims_total: IntCounterVec,
    /// Wei disbursed by confirmed claims
    pub disbursed_wei_total: Counter,
    /// End-to-end claim latency, confirmation wait included
    pub claim_duration: Histogram,
    /// Addresses funded so far
    pub funded_addresses: IntGauge,
}

impl FaucetMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let claims_total = IntCounterVec::new(
            opts!("faucet_claims_total", "Faucet claims by outcome"),
            &["outcome"],
        )?;

        let disbursed_wei_total = Counter::with_opts(opts!(
            "faucet_disbursed_wei_total",
            "Total wei sent by confirmed claims"
        ))?;

        let claim_duration = Histogram::with_opts(histogram_opts!(
            "faucet_claim_duration_seconds",
            "Time from claim request to recorded claim",
            vec![0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0]
        ))?;

        let funded_addresses = IntGauge::with_opts(opts!(
            "faucet_funded_addresses",
            "Number of addresses that have received funds"
        ))?;

        registry.register(Box::new(claims_total.clone()))?;
        registry.register(Box::new(disbursed_wei_total.clone()))?;
        registry.register(Box::new(claim_duration.clone()))?;
        registry.register(Box::new(funded_addresses.clone()))?;

        Ok(Self {
            registry,
            claims_total,
            disbursed_wei_total,
            claim_duration,
            funded_addresses,
        })
    }

    /// Record a confirmed claim
    pub fn record_success(&self, amount_wei: u128, elapsed: Duration, funded: usize) {
        self.claims_total.with_label_values(&["success"]).inc();
        self.disbursed_wei_total.inc_by(amount_wei as f64);
        self.claim_duration.observe(elapsed.as_secs_f64());
        self.funded_addresses.set(funded as i64);
    }

    /// Record a rejected or failed claim
    pub fn record_failure(&self, outcome: &str) {
        self.claims_total.with_label_values(&[outcome]).inc();
    }

    /// Prometheus text exposition of all faucet metrics
    pub fn gather(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_contains_recorded_values() {
        let metrics = FaucetMetrics::new().unwrap();
        metrics.record_success(10_000_000_000_000_000, Duration::from_secs(3), 1);
        metrics.record_failure("already_claimed");

        let text = metrics.gather().unwrap();
        assert!(text.contains("faucet_claims_total{outcome=\"success\"} 1"));
        assert!(text.contains("faucet_claims_total{outcome=\"already_claimed\"} 1"));
        assert!(text.contains("faucet_funded_addresses 1"));
    }
}
