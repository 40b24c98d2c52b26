//! Socket-state source task.
//!
//! Reads the local socket tables and classifies them into listening server
//! processes plus upstream and downstream dependency edges. Upstream and
//! downstream are roles: a connection from a local ephemeral port toward a
//! peer is a dependency we initiated (upstream); a connection arriving at
//! one of our listening ports is a peer depending on us (downstream).

use std::collections::{HashMap, HashSet};
use std::fs;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::SocketSourceConfig;
use crate::inventory::InventoryStore;
use crate::task::{SourceTask, TaskCache};
use crate::{FleetmapError, Result};

/// A process listening on a local network interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListeningProcess {
    pub bind: String,
    pub process_name: String,
    pub port: String,
}

/// One observed dependency relationship; the upstream/downstream role is
/// carried by which snapshot sequence the edge lives in, not by a field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DependencyEdge {
    pub local_hostgroup: String,
    pub remote_hostgroup: String,
    pub local_address: String,
    pub remote_address: String,
    pub port: String,
    pub protocol: String,
    pub process_name: String,
}

/// Whole-cycle snapshot of the socket-state source.
#[derive(Debug, Clone, Default)]
pub struct SocketSnapshot {
    pub processes: Vec<ListeningProcess>,
    pub upstreams: Vec<DependencyEdge>,
    pub downstreams: Vec<DependencyEdge>,
}

/// One row of a socket table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketEntry {
    pub local_addr: String,
    pub local_port: u16,
    pub remote_addr: String,
    pub remote_port: u16,
    pub protocol: &'static str,
    pub process_name: String,
}

/// Raw socket-table state split into listening and established rows.
#[derive(Debug, Clone, Default)]
pub struct SocketTables {
    pub listening: Vec<SocketEntry>,
    pub established: Vec<SocketEntry>,
}

/// Seam over the socket-table source so tests can substitute fixed tables.
pub trait SocketTableReader: Send + Sync {
    fn snapshot(&self) -> std::io::Result<SocketTables>;
}

const TCP_ESTABLISHED: u8 = 0x01;
const TCP_LISTEN: u8 = 0x0A;

/// Production reader over `/proc/net` with process attribution through the
/// socket-inode links under `/proc/<pid>/fd`.
pub struct ProcNetReader {
    proc_root: PathBuf,
}

impl ProcNetReader {
    pub fn new() -> Self {
        Self {
            proc_root: PathBuf::from("/proc"),
        }
    }

    pub fn with_root(proc_root: PathBuf) -> Self {
        Self { proc_root }
    }

    /// Walk `/proc/<pid>/fd` and map socket inodes to process names.
    fn inode_process_names(&self) -> HashMap<u64, String> {
        let mut names = HashMap::new();

        let Ok(entries) = fs::read_dir(&self.proc_root) else {
            return names;
        };
        for entry in entries.flatten() {
            let file_name = entry.file_name();
            let pid = file_name.to_string_lossy().to_string();
            if !pid.chars().all(|c| c.is_ascii_digit()) {
                continue;
            }

            let comm = fs::read_to_string(entry.path().join("comm"))
                .map(|s| s.trim().to_string())
                .unwrap_or_default();

            let Ok(fds) = fs::read_dir(entry.path().join("fd")) else {
                continue;
            };
            for fd in fds.flatten() {
                let Ok(link) = fs::read_link(fd.path()) else {
                    continue;
                };
                let link = link.to_string_lossy();
                let Some(inode) = link
                    .strip_prefix("socket:[")
                    .and_then(|s| s.strip_suffix(']'))
                else {
                    continue;
                };
                if let Ok(inode) = inode.parse::<u64>() {
                    names.insert(inode, comm.clone());
                }
            }
        }

        names
    }

    fn parse_table(
        &self,
        path: &Path,
        protocol: &'static str,
        ipv6: bool,
        names: &HashMap<u64, String>,
        tables: &mut SocketTables,
    ) {
        let Ok(content) = fs::read_to_string(path) else {
            return;
        };

        for line in content.lines().skip(1) {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 10 {
                continue;
            }

            let Some((local_addr, local_port)) = parse_hex_addr(fields[1], ipv6) else {
                continue;
            };
            let Some((remote_addr, remote_port)) = parse_hex_addr(fields[2], ipv6) else {
                continue;
            };
            let Ok(state) = u8::from_str_radix(fields[3], 16) else {
                continue;
            };
            let inode: u64 = fields[9].parse().unwrap_or(0);
            let process_name = names.get(&inode).cloned().unwrap_or_default();

            let entry = SocketEntry {
                local_addr,
                local_port,
                remote_addr,
                remote_port,
                protocol,
                process_name,
            };

            // UDP has no LISTEN state; a bound socket with a wildcard peer
            // plays the same role.
            let listening = match protocol {
                "tcp" => state == TCP_LISTEN,
                _ => remote_port == 0,
            };

            if listening {
                tables.listening.push(entry);
            } else if protocol != "tcp" || state == TCP_ESTABLISHED {
                tables.established.push(entry);
            }
        }
    }
}

impl Default for ProcNetReader {
    fn default() -> Self {
        Self::new()
    }
}

impl SocketTableReader for ProcNetReader {
    fn snapshot(&self) -> std::io::Result<SocketTables> {
        let names = self.inode_process_names();
        let net = self.proc_root.join("net");

        let mut tables = SocketTables::default();
        self.parse_table(&net.join("tcp"), "tcp", false, &names, &mut tables);
        self.parse_table(&net.join("tcp6"), "tcp", true, &names, &mut tables);
        self.parse_table(&net.join("udp"), "udp", false, &names, &mut tables);
        self.parse_table(&net.join("udp6"), "udp", true, &names, &mut tables);

        Ok(tables)
    }
}

/// Parse a kernel hex socket address such as `0100007F:0050`.
fn parse_hex_addr(field: &str, ipv6: bool) -> Option<(String, u16)> {
    let (ip_hex, port_hex) = field.split_once(':')?;
    let port = u16::from_str_radix(port_hex, 16).ok()?;

    let ip = if ipv6 {
        if ip_hex.len() != 32 {
            return None;
        }
        let mut bytes = [0u8; 16];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&ip_hex[i * 2..i * 2 + 2], 16).ok()?;
        }
        // The kernel writes each 32-bit group in host byte order.
        for chunk in bytes.chunks_exact_mut(4) {
            chunk.reverse();
        }
        Ipv6Addr::from(bytes).to_string()
    } else {
        if ip_hex.len() != 8 {
            return None;
        }
        let value = u32::from_str_radix(ip_hex, 16).ok()?;
        Ipv4Addr::from(value.swap_bytes()).to_string()
    };

    Some((ip, port))
}

fn is_wildcard(addr: &str) -> bool {
    addr.is_empty() || addr == "0.0.0.0" || addr == "::"
}

pub struct SocketStateTask {
    enabled: bool,
    reader: Box<dyn SocketTableReader>,
    inventory: Arc<InventoryStore>,
    cache: TaskCache<SocketSnapshot>,
}

impl SocketStateTask {
    pub fn new(
        config: &SocketSourceConfig,
        reader: Box<dyn SocketTableReader>,
        inventory: Arc<InventoryStore>,
    ) -> Self {
        Self {
            enabled: config.enabled,
            reader,
            inventory,
            cache: TaskCache::new(),
        }
    }

    /// Latest cached snapshot. Non-blocking; empty until the first
    /// successful collect.
    pub fn get(&self) -> Arc<SocketSnapshot> {
        self.cache.snapshot()
    }

    fn classify(&self, tables: SocketTables) -> SocketSnapshot {
        let local = self.inventory.local_identity();
        let inventory = self.inventory.get();

        let mut snapshot = SocketSnapshot::default();
        let mut listen_ports: HashSet<u16> = HashSet::new();
        let mut seen_processes: HashSet<(String, String, u16)> = HashSet::new();
        let mut seen_edges: HashSet<DependencyEdge> = HashSet::new();

        for entry in &tables.listening {
            listen_ports.insert(entry.local_port);
            let key = (
                entry.local_addr.clone(),
                entry.process_name.clone(),
                entry.local_port,
            );
            if seen_processes.insert(key) {
                snapshot.processes.push(ListeningProcess {
                    bind: entry.local_addr.clone(),
                    process_name: entry.process_name.clone(),
                    port: entry.local_port.to_string(),
                });
            }
        }

        for entry in tables.established {
            if is_wildcard(&entry.remote_addr) {
                continue;
            }

            let remote = inventory
                .get(&entry.remote_addr)
                .cloned()
                .unwrap_or_else(|| crate::inventory::HostIdentity::unresolved(&entry.remote_addr));

            // A connection landing on one of our listening ports was
            // initiated by the peer.
            let incoming = listen_ports.contains(&entry.local_port);
            let port = if incoming {
                entry.local_port
            } else {
                entry.remote_port
            };

            let edge = DependencyEdge {
                local_hostgroup: local.hostgroup.clone(),
                remote_hostgroup: remote.hostgroup,
                local_address: entry.local_addr,
                remote_address: entry.remote_addr,
                port: port.to_string(),
                protocol: entry.protocol.to_string(),
                process_name: entry.process_name,
            };

            if seen_edges.insert(edge.clone()) {
                if incoming {
                    snapshot.downstreams.push(edge);
                } else {
                    snapshot.upstreams.push(edge);
                }
            }
        }

        snapshot
    }
}

#[async_trait]
impl SourceTask for SocketStateTask {
    fn name(&self) -> &'static str {
        "socket"
    }

    async fn collect(&self, _cancel: &CancellationToken) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let started = Instant::now();
        let tables = self
            .reader
            .snapshot()
            .map_err(|e| FleetmapError::SocketTable(e.to_string()))?;

        let snapshot = self.classify(tables);

        debug!(
            "socket collect cached {} processes, {} upstreams, {} downstreams in {:?}",
            snapshot.processes.len(),
            snapshot.upstreams.len(),
            snapshot.downstreams.len(),
            started.elapsed()
        );
        self.cache.replace(snapshot);

        Ok(())
    }
}
