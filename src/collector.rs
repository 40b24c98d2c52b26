//! Network-dependency metric aggregation.
//!
//! One emission cycle reads the latest snapshot from every source task plus
//! the current local identity and turns them into labeled metric families.
//! Emission never performs network I/O and never fails: a source whose last
//! refresh failed (or which is disabled) contributes an empty snapshot and
//! only narrows the topology view.

use std::sync::Arc;

use prometheus::core::{Collector, Desc};
use prometheus::{proto, GaugeVec, Opts};
use tracing::error;

use crate::inventory::InventoryStore;
use crate::task::socket::{DependencyEdge, SocketStateTask};
use crate::task::traffic::TrafficTask;
use crate::METRIC_NAMESPACE;

const TRAFFIC_LABELS: [&str; 6] = [
    "local_hostgroup",
    "direction",
    "remote_hostgroup",
    "remote_ip",
    "local_domain",
    "remote_domain",
];

const EDGE_LABELS: [&str; 7] = [
    "local_hostgroup",
    "remote_hostgroup",
    "local_address",
    "remote_address",
    "port",
    "protocol",
    "process_name",
];

const PROCESS_LABELS: [&str; 4] = ["local_hostgroup", "bind", "process_name", "port"];

const SERVER_PROCESS_HELP: &str = "Server process that is listening on network interfaces";
const TRAFFIC_HELP: &str = "Total network traffic with peers";
const EBPF_TRAFFIC_HELP: &str = "Total network traffic with peers from the eBPF tracer";
const UPSTREAM_HELP: &str = "Upstream dependency of this machine";
const DOWNSTREAM_HELP: &str = "Downstream dependency of this machine";

/// Aggregates every source snapshot into the exported metric families.
/// All families carry this host's hostgroup in the `local_hostgroup` label.
pub struct NetworkDependencyCollector {
    traffic: Arc<TrafficTask>,
    ebpf_traffic: Arc<TrafficTask>,
    socket: Arc<SocketStateTask>,
    inventory: Arc<InventoryStore>,
    descs: Vec<Desc>,
}

impl NetworkDependencyCollector {
    pub fn new(
        traffic: Arc<TrafficTask>,
        ebpf_traffic: Arc<TrafficTask>,
        socket: Arc<SocketStateTask>,
        inventory: Arc<InventoryStore>,
    ) -> crate::Result<Self> {
        let desc = |name: &str, help: &str, labels: &[&str]| {
            Desc::new(
                format!("{}_{}", METRIC_NAMESPACE, name),
                help.to_string(),
                labels.iter().map(|l| l.to_string()).collect(),
                Default::default(),
            )
            .map_err(|e| crate::FleetmapError::MetricsError(e.to_string()))
        };

        let descs = vec![
            desc("server_process", SERVER_PROCESS_HELP, &PROCESS_LABELS)?,
            desc("traffic_bytes_total", TRAFFIC_HELP, &TRAFFIC_LABELS)?,
            desc("ebpf_traffic_bytes_total", EBPF_TRAFFIC_HELP, &TRAFFIC_LABELS)?,
            desc("upstream", UPSTREAM_HELP, &EDGE_LABELS)?,
            desc("downstream", DOWNSTREAM_HELP, &EDGE_LABELS)?,
        ];

        Ok(Self {
            traffic,
            ebpf_traffic,
            socket,
            inventory,
            descs,
        })
    }

    fn traffic_family(
        &self,
        name: &str,
        help: &str,
        task: &TrafficTask,
    ) -> Vec<proto::MetricFamily> {
        let gauges = match GaugeVec::new(
            Opts::new(name, help).namespace(METRIC_NAMESPACE),
            &TRAFFIC_LABELS,
        ) {
            Ok(g) => g,
            Err(e) => {
                error!("building {} family failed: {}", name, e);
                return Vec::new();
            }
        };

        // Snapshot rows that share a label set are summed; a gauge per
        // label set can hold only one value.
        for sample in task.get().iter() {
            gauges
                .with_label_values(&[
                    sample.local_hostgroup.as_str(),
                    sample.direction,
                    sample.remote_hostgroup.as_str(),
                    sample.remote_ip_addr.as_str(),
                    sample.local_domain.as_str(),
                    sample.remote_domain.as_str(),
                ])
                .add(sample.bandwidth);
        }

        gauges.collect()
    }

    fn edge_family(
        &self,
        name: &str,
        help: &str,
        edges: &[DependencyEdge],
    ) -> Vec<proto::MetricFamily> {
        let gauges = match GaugeVec::new(
            Opts::new(name, help).namespace(METRIC_NAMESPACE),
            &EDGE_LABELS,
        ) {
            Ok(g) => g,
            Err(e) => {
                error!("building {} family failed: {}", name, e);
                return Vec::new();
            }
        };

        for edge in edges {
            gauges
                .with_label_values(&[
                    edge.local_hostgroup.as_str(),
                    edge.remote_hostgroup.as_str(),
                    edge.local_address.as_str(),
                    edge.remote_address.as_str(),
                    edge.port.as_str(),
                    edge.protocol.as_str(),
                    edge.process_name.as_str(),
                ])
                .set(1.0);
        }

        gauges.collect()
    }
}

impl Collector for NetworkDependencyCollector {
    fn desc(&self) -> Vec<&Desc> {
        self.descs.iter().collect()
    }

    fn collect(&self) -> Vec<proto::MetricFamily> {
        let socket_snapshot = self.socket.get();
        let local = self.inventory.local_identity();

        let mut families = Vec::new();

        families.extend(self.traffic_family(
            "traffic_bytes_total",
            TRAFFIC_HELP,
            &self.traffic,
        ));
        families.extend(self.traffic_family(
            "ebpf_traffic_bytes_total",
            EBPF_TRAFFIC_HELP,
            &self.ebpf_traffic,
        ));
        families.extend(self.edge_family("upstream", UPSTREAM_HELP, &socket_snapshot.upstreams));
        families.extend(self.edge_family(
            "downstream",
            DOWNSTREAM_HELP,
            &socket_snapshot.downstreams,
        ));

        // Listening processes are labeled with the local identity's
        // hostgroup, not a per-sample remote one.
        let processes = match GaugeVec::new(
            Opts::new("server_process", SERVER_PROCESS_HELP).namespace(METRIC_NAMESPACE),
            &PROCESS_LABELS,
        ) {
            Ok(g) => g,
            Err(e) => {
                error!("building server_process family failed: {}", e);
                return families;
            }
        };
        for process in &socket_snapshot.processes {
            processes
                .with_label_values(&[
                    local.hostgroup.as_str(),
                    process.bind.as_str(),
                    process.process_name.as_str(),
                    process.port.as_str(),
                ])
                .set(1.0);
        }
        families.extend(processes.collect());

        families
    }
}
