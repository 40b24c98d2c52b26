//! Service-inventory identities: the mapping from raw IP addresses to the
//! hostgroup and domain labels the dependency map is built from.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::net::LocalAddrResolver;
use crate::scrape::ScrapeClient;
use crate::task::SourceTask;
use crate::{FleetmapError, Result};

/// Business-level identity of one host, keyed by its IP address.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct HostIdentity {
    pub ip_address: String,
    pub hostgroup: String,
    pub domain: String,
}

impl HostIdentity {
    /// Identity for a host the inventory does not know: hostgroup and
    /// domain fall back to the IP string itself, never empty, so unresolved
    /// hosts stay visible in the dependency map.
    pub fn unresolved(ip: &str) -> Self {
        Self {
            ip_address: ip.to_string(),
            hostgroup: ip.to_string(),
            domain: ip.to_string(),
        }
    }
}

/// Read-side view of the inventory registry, shared by every source task
/// and the aggregator. The whole map is swapped on refresh so bulk joins
/// always see one consistent generation.
pub struct InventoryStore {
    hosts: RwLock<Arc<HashMap<String, HostIdentity>>>,
    resolver: Arc<dyn LocalAddrResolver>,
}

impl InventoryStore {
    pub fn new(resolver: Arc<dyn LocalAddrResolver>) -> Self {
        Self {
            hosts: RwLock::new(Arc::new(HashMap::new())),
            resolver,
        }
    }

    /// Bulk snapshot for joins during transform.
    pub fn get(&self) -> Arc<HashMap<String, HostIdentity>> {
        Arc::clone(&self.hosts.read())
    }

    /// Identity of one peer, defaulting to its IP string when unknown.
    pub fn identity_of(&self, ip: &str) -> HostIdentity {
        self.hosts
            .read()
            .get(ip)
            .cloned()
            .unwrap_or_else(|| HostIdentity::unresolved(ip))
    }

    /// This host's own identity, resolved through the local-address probe.
    /// A probe failure degrades to an empty identity rather than failing
    /// the emission path.
    pub fn local_identity(&self) -> HostIdentity {
        match self.resolver.local_addr() {
            Ok(addr) => self.identity_of(&addr.to_string()),
            Err(e) => {
                warn!("local address resolution failed: {}", e);
                HostIdentity::default()
            }
        }
    }

    /// Replace the whole identity map with a new generation.
    pub fn replace(&self, hosts: HashMap<String, HostIdentity>) {
        *self.hosts.write() = Arc::new(hosts);
    }
}

/// Background refresh of the inventory map from a registry endpoint
/// returning a JSON array of host identities.
pub struct InventoryRefresher {
    enabled: bool,
    address: Option<String>,
    client: ScrapeClient,
    store: Arc<InventoryStore>,
}

impl InventoryRefresher {
    pub fn new(
        enabled: bool,
        address: Option<String>,
        client: ScrapeClient,
        store: Arc<InventoryStore>,
    ) -> Self {
        Self {
            enabled,
            address,
            client,
            store,
        }
    }
}

#[async_trait]
impl SourceTask for InventoryRefresher {
    fn name(&self) -> &'static str {
        "inventory"
    }

    async fn collect(&self, cancel: &CancellationToken) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let addr = self
            .address
            .as_deref()
            .ok_or(FleetmapError::SourceUnconfigured {
                name: self.name(),
            })?;

        let hosts: Vec<HostIdentity> = tokio::select! {
            res = self.client.fetch_json(addr) => res?,
            _ = cancel.cancelled() => {
                return Err(FleetmapError::Cancelled { name: self.name() });
            }
        };

        let map: HashMap<String, HostIdentity> = hosts
            .into_iter()
            .filter(|h| !h.ip_address.is_empty())
            .map(|h| (h.ip_address.clone(), h))
            .collect();

        debug!("inventory refresh cached {} host identities", map.len());
        self.store.replace(map);

        Ok(())
    }
}
