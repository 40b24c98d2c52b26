//! Scrape-based traffic source task.
//!
//! Two instances of this task exist in a full deployment: one scraping the
//! netflow accounting daemon on each host, one scraping the eBPF
//! per-connection tracer's exporter. Both produce the same sample schema
//! and differ only in address and expected metric family.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::ScrapeSourceConfig;
use crate::inventory::InventoryStore;
use crate::net::LocalAddrResolver;
use crate::scrape::ScrapeClient;
use crate::task::transform::{samples_from_family, TrafficSample};
use crate::task::{SourceTask, TaskCache};
use crate::{FleetmapError, Result};

pub struct TrafficTask {
    name: &'static str,
    enabled: bool,
    address: Option<String>,
    family: String,
    client: ScrapeClient,
    inventory: Arc<InventoryStore>,
    resolver: Arc<dyn LocalAddrResolver>,
    cache: TaskCache<Vec<TrafficSample>>,
}

impl TrafficTask {
    pub fn new(
        name: &'static str,
        default_family: &str,
        config: &ScrapeSourceConfig,
        client: ScrapeClient,
        inventory: Arc<InventoryStore>,
        resolver: Arc<dyn LocalAddrResolver>,
    ) -> Self {
        Self {
            name,
            enabled: config.enabled,
            address: config.address.clone(),
            family: config
                .metric_family
                .clone()
                .unwrap_or_else(|| default_family.to_string()),
            client,
            inventory,
            resolver,
            cache: TaskCache::new(),
        }
    }

    /// Latest cached samples. Non-blocking; empty until the first
    /// successful collect.
    pub fn get(&self) -> Arc<Vec<TrafficSample>> {
        self.cache.snapshot()
    }
}

#[async_trait]
impl SourceTask for TrafficTask {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn collect(&self, cancel: &CancellationToken) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let addr = self
            .address
            .as_deref()
            .ok_or(FleetmapError::SourceUnconfigured { name: self.name })?;

        let started = Instant::now();

        let families = tokio::select! {
            res = self.client.scrape(addr) => res?,
            _ = cancel.cancelled() => {
                return Err(FleetmapError::Cancelled { name: self.name });
            }
        };

        // A document without the expected family means the source speaks a
        // different schema; worth operator attention, not a transient blip.
        let family = families
            .iter()
            .find(|f| f.name == self.family)
            .ok_or_else(|| FleetmapError::MissingMetricFamily {
                family: self.family.clone(),
            })?;

        let local_addr = self.resolver.local_addr()?;
        let samples = samples_from_family(family, &self.inventory.get(), local_addr);

        debug!(
            "{} collect cached {} samples in {:?}",
            self.name,
            samples.len(),
            started.elapsed()
        );
        self.cache.replace(samples);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::FixedAddrResolver;

    fn task(enabled: bool, address: Option<&str>) -> TrafficTask {
        let resolver: Arc<dyn LocalAddrResolver> =
            Arc::new(FixedAddrResolver::new("10.0.0.1".parse().unwrap()));
        let config = ScrapeSourceConfig {
            enabled,
            address: address.map(str::to_string),
            interval_secs: 30,
            metric_family: None,
        };
        TrafficTask::new(
            "traffic",
            "host_bytes_total",
            &config,
            ScrapeClient::new().unwrap(),
            Arc::new(InventoryStore::new(Arc::clone(&resolver))),
            resolver,
        )
    }

    #[tokio::test]
    async fn test_disabled_task_collect_is_noop() {
        let task = task(false, None);
        let cancel = CancellationToken::new();

        assert!(task.collect(&cancel).await.is_ok());
        assert!(task.get().is_empty());
    }

    #[tokio::test]
    async fn test_enabled_without_address_errors_and_keeps_cache() {
        let task = task(true, None);
        let cancel = CancellationToken::new();

        let err = task.collect(&cancel).await.unwrap_err();
        assert!(matches!(
            err,
            FleetmapError::SourceUnconfigured { name: "traffic" }
        ));
        assert!(task.get().is_empty());
    }

    #[tokio::test]
    async fn test_get_never_fails_after_transport_errors() {
        // Nothing listens on this port; collect fails with a transport
        // error and the cache stays at its prior (empty) value.
        let task = task(true, Some("http://127.0.0.1:1/metrics"));
        let cancel = CancellationToken::new();

        let err = task.collect(&cancel).await.unwrap_err();
        assert!(matches!(err, FleetmapError::Transport(_)));
        assert!(task.get().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_collect_keeps_cache() {
        let task = task(true, Some("http://203.0.113.1:9/metrics"));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = task.collect(&cancel).await.unwrap_err();
        assert!(matches!(
            err,
            FleetmapError::Cancelled { name: "traffic" } | FleetmapError::Transport(_)
        ));
        assert!(task.get().is_empty());
    }

    #[test]
    fn test_family_override() {
        let resolver: Arc<dyn LocalAddrResolver> =
            Arc::new(FixedAddrResolver::new("10.0.0.1".parse().unwrap()));
        let config = ScrapeSourceConfig {
            enabled: true,
            address: None,
            interval_secs: 30,
            metric_family: Some("custom_bytes".to_string()),
        };
        let task = TrafficTask::new(
            "ebpf_traffic",
            "ebpf_exporter_ipv4_bytes_total",
            &config,
            ScrapeClient::new().unwrap(),
            Arc::new(InventoryStore::new(Arc::clone(&resolver))),
            resolver,
        );
        assert_eq!(task.family, "custom_bytes");
    }
}
