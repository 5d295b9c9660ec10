//! Prometheus counters shared by the ingress, workers and scheduler.

use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};
use smsgw_common::{Error, Result};

/// Process metrics registry
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    /// Messages accepted at ingress, by connection group
    pub messages_accepted: IntCounterVec,
    /// Broker publishes, by result
    pub broker_publishes: IntCounterVec,
    /// SMPP submissions, by connection and result
    pub smpp_submits: IntCounterVec,
    /// Delivery receipts, by mapped status
    pub receipts: IntCounterVec,
}

fn metric_err(e: prometheus::Error) -> Error {
    Error::Internal(format!("metrics: {}", e))
}

fn counter(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> Result<IntCounterVec> {
    let vec = IntCounterVec::new(Opts::new(name, help).namespace("smsgw"), labels)
        .map_err(metric_err)?;
    registry.register(Box::new(vec.clone())).map_err(metric_err)?;
    Ok(vec)
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        Ok(Self {
            messages_accepted: counter(
                &registry,
                "messages_accepted_total",
                "Messages accepted at ingress",
                &["group"],
            )?,
            broker_publishes: counter(
                &registry,
                "broker_publishes_total",
                "Queue items published to the broker",
                &["result"],
            )?,
            smpp_submits: counter(
                &registry,
                "smpp_submits_total",
                "submit_sm attempts",
                &["conn", "result"],
            )?,
            receipts: counter(
                &registry,
                "delivery_receipts_total",
                "Delivery receipts received",
                &["status"],
            )?,
            registry,
        })
    }

    pub fn publish_result(&self, ok: bool) {
        let result = if ok { "ok" } else { "error" };
        self.broker_publishes.with_label_values(&[result]).inc();
    }

    /// Render in the Prometheus text exposition format
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metric_err)?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_counters() {
        let metrics = Metrics::new().unwrap();
        metrics.smpp_submits.with_label_values(&["c1", "ok"]).inc();
        metrics.publish_result(false);

        let text = metrics.render().unwrap();
        assert!(text.contains("smsgw_smpp_submits_total{conn=\"c1\",result=\"ok\"} 1"));
        assert!(text.contains("smsgw_broker_publishes_total{result=\"error\"} 1"));
    }

    #[test]
    fn test_registries_are_independent() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.receipts.with_label_values(&["Delivered"]).inc();
        assert_eq!(b.receipts.with_label_values(&["Delivered"]).get(), 0);
    }
}
