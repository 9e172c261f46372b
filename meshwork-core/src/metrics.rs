//! Membership metrics through OpenTelemetry
//!
//! Enabled with the `observability` feature. Gauges are OpenTelemetry
//! up-down counters driven by deltas, so every node keeps a
//! [`MetricsUpdater`] remembering what it last reported.

use std::collections::BTreeMap;

use crate::cluster::quorum::datacenter_health;
use crate::cluster::view::ClusterView;

#[cfg(feature = "observability")]
mod otel {
    use opentelemetry::{
        global,
        metrics::{Counter, Meter, UpDownCounter},
    };
    use std::sync::OnceLock;

    use crate::error::{MeshworkError, MeshworkResult};

    static METRICS: OnceLock<Metrics> = OnceLock::new();

    static PROMETHEUS_REGISTRY: OnceLock<prometheus::Registry> = OnceLock::new();

    pub struct Metrics {
        #[allow(dead_code)]
        meter: Meter,

        // Membership gauges
        pub members: UpDownCounter<i64>,
        pub members_healthy: UpDownCounter<i64>,
        pub members_unhealthy: UpDownCounter<i64>,
        pub quorum_size: UpDownCounter<i64>,
        pub in_quorum: UpDownCounter<i64>,
        pub datacenter_healthy: UpDownCounter<i64>,

        // Protocol counters
        pub gossip_sent: Counter<u64>,
        pub gossip_rate_limited: Counter<u64>,
        pub join_rejected: Counter<u64>,
        pub members_removed: Counter<u64>,
    }

    impl Metrics {
        fn new(meter: Meter) -> Self {
            Self {
                members: meter
                    .i64_up_down_counter("cluster.members")
                    .with_description("Members in the local view")
                    .init(),
                members_healthy: meter
                    .i64_up_down_counter("cluster.members.healthy")
                    .with_description("Members with status Up")
                    .init(),
                members_unhealthy: meter
                    .i64_up_down_counter("cluster.members.unhealthy")
                    .with_description("Members not Up")
                    .init(),
                quorum_size: meter
                    .i64_up_down_counter("cluster.quorum.size")
                    .with_description("Healthy members needed for a majority")
                    .init(),
                in_quorum: meter
                    .i64_up_down_counter("cluster.quorum.in_quorum")
                    .with_description("1 while this node is in quorum")
                    .init(),
                datacenter_healthy: meter
                    .i64_up_down_counter("cluster.datacenter.healthy")
                    .with_description("Healthy members per datacenter")
                    .init(),

                gossip_sent: meter
                    .u64_counter("cluster.gossip.sent")
                    .with_description("Gossip messages sent")
                    .init(),
                gossip_rate_limited: meter
                    .u64_counter("cluster.gossip.rate_limited")
                    .with_description("Gossip sends dropped by the outbound rate limit")
                    .init(),
                join_rejected: meter
                    .u64_counter("cluster.join.rejected")
                    .with_description("Join requests refused, by reason")
                    .init(),
                members_removed: meter
                    .u64_counter("cluster.members.removed")
                    .with_description("Members removed by failure detection or force-down")
                    .init(),
                meter,
            }
        }
    }

    /// Initialize metrics with the Prometheus exporter
    pub fn init_prometheus() -> MeshworkResult<&'static Metrics> {
        use opentelemetry_sdk::metrics::MeterProvider;

        let registry = prometheus::Registry::new();
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()
            .map_err(|e| MeshworkError::internal(format!("prometheus exporter: {}", e)))?;

        PROMETHEUS_REGISTRY.set(registry).ok();

        let provider = MeterProvider::builder().with_reader(exporter).build();
        global::set_meter_provider(provider);

        install(Metrics::new(global::meter("meshwork")))
    }

    /// Initialize metrics without an exporter
    pub fn init_noop() -> MeshworkResult<&'static Metrics> {
        install(Metrics::new(global::meter("meshwork")))
    }

    fn install(metrics: Metrics) -> MeshworkResult<&'static Metrics> {
        METRICS
            .set(metrics)
            .map_err(|_| MeshworkError::internal("metrics already initialized"))?;
        METRICS
            .get()
            .ok_or_else(|| MeshworkError::internal("metrics not initialized"))
    }

    /// Global metrics, if initialized
    pub fn metrics() -> Option<&'static Metrics> {
        METRICS.get()
    }

    /// Prometheus text exposition of everything recorded so far
    pub fn prometheus_metrics() -> String {
        use prometheus::{Encoder, TextEncoder};

        match PROMETHEUS_REGISTRY.get() {
            Some(registry) => {
                let mut buffer = Vec::new();
                let encoder = TextEncoder::new();
                if let Err(e) = encoder.encode(&registry.gather(), &mut buffer) {
                    return format!("# Error encoding metrics: {}\n", e);
                }
                String::from_utf8(buffer)
                    .unwrap_or_else(|_| "# Error encoding metrics\n".to_string())
            }
            None => String::from("# Metrics not initialized\n"),
        }
    }

    pub mod attributes {
        use opentelemetry::KeyValue;

        pub fn node_id(id: &str) -> KeyValue {
            KeyValue::new("node.id", id.to_string())
        }

        pub fn datacenter(name: &str) -> KeyValue {
            KeyValue::new("datacenter", name.to_string())
        }

        pub fn reason(value: &str) -> KeyValue {
            KeyValue::new("reason", value.to_string())
        }
    }
}

#[cfg(feature = "observability")]
pub use otel::{attributes, init_noop, init_prometheus, metrics, prometheus_metrics, Metrics};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Reported {
    members: i64,
    healthy: i64,
    unhealthy: i64,
    quorum_size: i64,
    in_quorum: i64,
}

/// Per-node reporter of membership gauges and protocol counters
#[derive(Debug)]
pub struct MetricsUpdater {
    node_id: String,
    reported: Reported,
    datacenters: BTreeMap<String, i64>,
}

impl MetricsUpdater {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            reported: Reported::default(),
            datacenters: BTreeMap::new(),
        }
    }

    /// Bring gauges in line with `view`
    pub fn record_view(&mut self, view: &ClusterView, in_quorum: bool) {
        let current = Reported {
            members: view.len() as i64,
            healthy: view.healthy_count() as i64,
            unhealthy: view.unhealthy_count() as i64,
            quorum_size: view.quorum_size() as i64,
            in_quorum: i64::from(in_quorum),
        };
        let previous = std::mem::replace(&mut self.reported, current);

        let mut dc_deltas = Vec::new();
        let health = datacenter_health(view);
        for (dc, h) in &health {
            let healthy = h.healthy as i64;
            let before = self.datacenters.insert(dc.clone(), healthy).unwrap_or(0);
            if healthy != before {
                dc_deltas.push((dc.clone(), healthy - before));
            }
        }
        let vanished: Vec<String> = self
            .datacenters
            .keys()
            .filter(|dc| !health.contains_key(*dc))
            .cloned()
            .collect();
        for dc in vanished {
            if let Some(before) = self.datacenters.remove(&dc) {
                dc_deltas.push((dc, -before));
            }
        }

        self.emit_gauges(previous, current, &dc_deltas);
    }

    #[cfg(feature = "observability")]
    fn emit_gauges(&self, previous: Reported, current: Reported, dc_deltas: &[(String, i64)]) {
        let Some(m) = metrics() else { return };
        let node = [attributes::node_id(&self.node_id)];
        let pairs = [
            (&m.members, current.members - previous.members),
            (&m.members_healthy, current.healthy - previous.healthy),
            (&m.members_unhealthy, current.unhealthy - previous.unhealthy),
            (&m.quorum_size, current.quorum_size - previous.quorum_size),
            (&m.in_quorum, current.in_quorum - previous.in_quorum),
        ];
        for (gauge, delta) in pairs {
            if delta != 0 {
                gauge.add(delta, &node);
            }
        }
        for (dc, delta) in dc_deltas {
            m.datacenter_healthy.add(
                *delta,
                &[attributes::node_id(&self.node_id), attributes::datacenter(dc)],
            );
        }
    }

    #[cfg(not(feature = "observability"))]
    fn emit_gauges(&self, _previous: Reported, _current: Reported, _dc_deltas: &[(String, i64)]) {}

    /// Datacenters currently reported with their healthy counts
    pub fn reported_datacenters(&self) -> &BTreeMap<String, i64> {
        &self.datacenters
    }
}

#[cfg(feature = "observability")]
impl MetricsUpdater {
    pub fn gossip_sent(&self, count: usize) {
        if let Some(m) = metrics() {
            if count > 0 {
                m.gossip_sent.add(count as u64, &[attributes::node_id(&self.node_id)]);
            }
        }
    }

    pub fn gossip_rate_limited(&self) {
        if let Some(m) = metrics() {
            m.gossip_rate_limited.add(1, &[attributes::node_id(&self.node_id)]);
        }
    }

    pub fn join_rejected(&self, reason: &str) {
        if let Some(m) = metrics() {
            m.join_rejected.add(
                1,
                &[attributes::node_id(&self.node_id), attributes::reason(reason)],
            );
        }
    }

    pub fn members_removed(&self, count: usize) {
        if let Some(m) = metrics() {
            if count > 0 {
                m.members_removed.add(count as u64, &[attributes::node_id(&self.node_id)]);
            }
        }
    }
}

#[cfg(not(feature = "observability"))]
impl MetricsUpdater {
    pub fn gossip_sent(&self, _count: usize) {}

    pub fn gossip_rate_limited(&self) {}

    pub fn join_rejected(&self, _reason: &str) {}

    pub fn members_removed(&self, _count: usize) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::node_state::{MemberStatus, NodeState, LABEL_DATACENTER};

    fn member(id: &str, dc: &str) -> NodeState {
        let mut state = NodeState::new(id, "c", format!("{}:1", id), 0);
        state.status = MemberStatus::Up;
        state.labels.insert(LABEL_DATACENTER.to_string(), dc.to_string());
        state
    }

    #[test]
    fn test_updater_tracks_datacenters() {
        let mut updater = MetricsUpdater::new("n1");
        let mut view = ClusterView::new(0, 0);
        view.add_member(&member("a", "east"));
        view.add_member(&member("b", "west"));
        updater.record_view(&view, true);
        assert_eq!(updater.reported_datacenters().get("east"), Some(&1));

        view.remove_member("b");
        updater.record_view(&view, true);
        assert!(updater.reported_datacenters().get("west").is_none());
    }

    #[cfg(feature = "observability")]
    #[test]
    fn test_counters_without_init_are_noops() {
        let updater = MetricsUpdater::new("n1");
        updater.gossip_sent(3);
        updater.join_rejected("auth");
        updater.members_removed(1);
    }
}
