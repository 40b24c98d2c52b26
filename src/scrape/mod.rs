//! HTTP(S) scrape client shared by the source tasks.
//!
//! Scraped endpoints live on a trusted fleet network, so certificate
//! validation is intentionally disabled; transport safety comes from
//! bounded dial, request, and idle-connection timeouts instead.

pub mod text;

use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::Result;
pub use text::{MetricFamily, Sample};

const DIAL_TIMEOUT: Duration = Duration::from_secs(30);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const IDLE_CONN_TIMEOUT: Duration = Duration::from_secs(90);

/// Stateless client fetching exposition-format documents and JSON payloads.
/// Cheap to clone; the underlying connection pool is shared.
#[derive(Clone)]
pub struct ScrapeClient {
    http: reqwest::Client,
}

impl ScrapeClient {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .connect_timeout(DIAL_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .pool_idle_timeout(IDLE_CONN_TIMEOUT)
            .tcp_keepalive(Duration::from_secs(30))
            .build()?;

        Ok(Self { http })
    }

    /// Fetch a metrics document and parse it into named metric families.
    pub async fn scrape(&self, addr: &str) -> Result<Vec<MetricFamily>> {
        let body = self
            .http
            .get(addr)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        Ok(text::parse_families(&body))
    }

    /// Fetch a JSON document, used for the inventory registry.
    pub async fn fetch_json<T: DeserializeOwned>(&self, addr: &str) -> Result<T> {
        let payload = self
            .http
            .get(addr)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(payload)
    }
}
