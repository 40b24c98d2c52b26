//! Reclassification of scraped network-layer rows into fleet-topology
//! traffic samples.

use std::collections::HashMap;
use std::net::IpAddr;

use tracing::warn;

use crate::inventory::HostIdentity;
use crate::scrape::MetricFamily;

/// One observed peer for one refresh cycle, fully labeled with fleet
/// identities.
#[derive(Debug, Clone, PartialEq)]
pub struct TrafficSample {
    /// "ingress", "egress", or "" when the source label was unrecognized.
    pub direction: &'static str,
    pub local_hostgroup: String,
    pub remote_hostgroup: String,
    pub remote_ip_addr: String,
    pub local_domain: String,
    pub remote_domain: String,
    pub bandwidth: f64,
}

/// Map the scraped direction label into this host's logical direction.
///
/// The source reports from the packet filter's viewpoint, which mirrors
/// this host's send/receive viewpoint: the peer's "out" is our ingress and
/// its "in" is our egress. Unrecognized labels map to the empty string and
/// the sample is still emitted.
pub fn direction_from_filter(label: &str) -> &'static str {
    match label {
        "out" => "ingress",
        "in" => "egress",
        _ => "",
    }
}

/// Convert one scraped metric family into traffic samples, joining each
/// peer against the inventory map.
///
/// Rows are skipped when the peer IP is missing or unparseable, when the
/// peer is this host itself, or when the value does not parse as a number;
/// a skipped row never aborts the rest of the cycle.
pub fn samples_from_family(
    family: &MetricFamily,
    inventory: &HashMap<String, HostIdentity>,
    local_addr: IpAddr,
) -> Vec<TrafficSample> {
    let local_ip = local_addr.to_string();
    let local = inventory
        .get(&local_ip)
        .cloned()
        .unwrap_or_else(|| HostIdentity::unresolved(&local_ip));

    let mut samples = Vec::with_capacity(family.samples.len());

    for row in &family.samples {
        let Some(peer_label) = row.labels.get("ip") else {
            continue;
        };
        let Ok(peer_ip) = peer_label.parse::<IpAddr>() else {
            continue;
        };
        // No self-loops in the dependency map.
        if peer_ip == local_addr {
            continue;
        }

        let bandwidth = match row.value.parse::<f64>() {
            Ok(v) => v,
            Err(e) => {
                warn!(
                    "skipping {} row for {}: bad value {:?}: {}",
                    family.name, peer_label, row.value, e
                );
                continue;
            }
        };

        let peer = inventory
            .get(peer_label)
            .cloned()
            .unwrap_or_else(|| HostIdentity::unresolved(peer_label));

        let dir_label = row.labels.get("dir").map(String::as_str).unwrap_or("");

        samples.push(TrafficSample {
            direction: direction_from_filter(dir_label),
            local_hostgroup: local.hostgroup.clone(),
            remote_hostgroup: peer.hostgroup,
            remote_ip_addr: peer_label.clone(),
            local_domain: local.domain.clone(),
            remote_domain: peer.domain,
            bandwidth,
        });
    }

    samples
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scrape::Sample;

    fn family(rows: Vec<(&str, &str, &str)>) -> MetricFamily {
        MetricFamily {
            name: "host_bytes_total".to_string(),
            samples: rows
                .into_iter()
                .map(|(ip, dir, value)| Sample {
                    labels: HashMap::from([
                        ("ip".to_string(), ip.to_string()),
                        ("dir".to_string(), dir.to_string()),
                    ]),
                    value: value.to_string(),
                })
                .collect(),
        }
    }

    fn inventory_with(entries: &[(&str, &str, &str)]) -> HashMap<String, HostIdentity> {
        entries
            .iter()
            .map(|(ip, hostgroup, domain)| {
                (
                    ip.to_string(),
                    HostIdentity {
                        ip_address: ip.to_string(),
                        hostgroup: hostgroup.to_string(),
                        domain: domain.to_string(),
                    },
                )
            })
            .collect()
    }

    #[test]
    fn test_direction_inversion() {
        assert_eq!(direction_from_filter("out"), "ingress");
        assert_eq!(direction_from_filter("in"), "egress");
        assert_eq!(direction_from_filter("sideways"), "");
        assert_eq!(direction_from_filter(""), "");
    }

    #[test]
    fn test_known_peer_full_labeling() {
        let inventory = inventory_with(&[("10.0.0.5", "web", "svc.internal")]);
        let samples = samples_from_family(
            &family(vec![("10.0.0.5", "out", "120.5")]),
            &inventory,
            "10.0.0.1".parse().unwrap(),
        );

        assert_eq!(
            samples,
            vec![TrafficSample {
                direction: "ingress",
                local_hostgroup: "10.0.0.1".to_string(),
                remote_hostgroup: "web".to_string(),
                remote_ip_addr: "10.0.0.5".to_string(),
                local_domain: "10.0.0.1".to_string(),
                remote_domain: "svc.internal".to_string(),
                bandwidth: 120.5,
            }]
        );
    }

    #[test]
    fn test_unknown_peer_defaults_to_ip_string() {
        let samples = samples_from_family(
            &family(vec![("172.16.0.9", "in", "10")]),
            &HashMap::new(),
            "10.0.0.1".parse().unwrap(),
        );

        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].direction, "egress");
        assert_eq!(samples[0].remote_hostgroup, "172.16.0.9");
        assert_eq!(samples[0].remote_domain, "172.16.0.9");
    }

    #[test]
    fn test_self_loop_and_bad_rows_skipped() {
        let samples = samples_from_family(
            &family(vec![
                ("10.0.0.1", "out", "5"),     // self
                ("not-an-ip", "out", "5"),    // unparseable peer
                ("10.0.0.7", "out", "oops"),  // bad value
                ("10.0.0.8", "out", "42"),
            ]),
            &HashMap::new(),
            "10.0.0.1".parse().unwrap(),
        );

        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].remote_ip_addr, "10.0.0.8");
        assert_eq!(samples[0].bandwidth, 42.0);
    }

    #[test]
    fn test_unrecognized_direction_still_emitted() {
        let samples = samples_from_family(
            &family(vec![("10.0.0.9", "both", "1")]),
            &HashMap::new(),
            "10.0.0.1".parse().unwrap(),
        );

        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].direction, "");
    }

    #[test]
    fn test_local_identity_from_inventory() {
        let inventory = inventory_with(&[
            ("10.0.0.1", "edge", "edge.internal"),
            ("10.0.0.5", "web", "svc.internal"),
        ]);
        let samples = samples_from_family(
            &family(vec![("10.0.0.5", "out", "1")]),
            &inventory,
            "10.0.0.1".parse().unwrap(),
        );

        assert_eq!(samples[0].local_hostgroup, "edge");
        assert_eq!(samples[0].local_domain, "edge.internal");
    }
}
