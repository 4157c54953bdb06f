//! Underlay address discovery for dependent bee nodes

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Polling settings for address discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Delay between polls while the node has no addresses yet
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Give up after this many requests (`None` polls forever)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: Option<u32>,
    /// API base URL of the edge node; derived from its port when unset
    #[serde(default)]
    pub base_url: Option<String>,
}

fn default_interval_ms() -> u64 {
    500
}

fn default_max_attempts() -> Option<u32> {
    Some(600)
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            max_attempts: default_max_attempts(),
            base_url: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct AddressesResponse {
    #[serde(default)]
    underlay: Option<Vec<String>>,
}

/// Polls a node's `/addresses` endpoint until it publishes an underlay address
#[derive(Debug, Clone)]
pub struct AddressDiscovery {
    client: reqwest::Client,
    interval: Duration,
    max_attempts: Option<u32>,
}

impl AddressDiscovery {
    pub fn new(config: &DiscoveryConfig) -> Result<Self, DiscoveryError> {
        // The node API is always local
        let client = reqwest::Client::builder().no_proxy().build()?;
        Ok(Self {
            client,
            interval: Duration::from_millis(config.interval_ms),
            max_attempts: config.max_attempts,
        })
    }

    /// Wait for the node at `base_url` to publish a routable underlay address.
    ///
    /// Empty address lists are retried after the configured interval. A
    /// non-success response ends the poll immediately.
    pub async fn poll_underlay_address(&self, base_url: &str) -> Result<String, DiscoveryError> {
        let url = format!("{}/addresses", base_url.trim_end_matches('/'));
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            let underlay = self.fetch_underlay(&url).await?;

            if !underlay.is_empty() {
                return underlay
                    .into_iter()
                    .find(|addr| !is_loopback(addr))
                    .ok_or(DiscoveryError::NoRoutableAddress { url });
            }

            if self.max_attempts.is_some_and(|max| attempts >= max) {
                return Err(DiscoveryError::Exhausted { url, attempts });
            }

            log::debug!("No underlay address at {} yet (attempt {})", url, attempts);
            tokio::time::sleep(self.interval).await;
        }
    }

    async fn fetch_underlay(&self, url: &str) -> Result<Vec<String>, DiscoveryError> {
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DiscoveryError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body: AddressesResponse = response.json().await?;
        Ok(body.underlay.unwrap_or_default())
    }
}

/// Loopback multiaddrs are only reachable from inside the node's container
fn is_loopback(addr: &str) -> bool {
    addr.contains("/ip4/127.") || addr.contains("/ip6/::1/")
}

/// Errors that can occur during address discovery
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to fetch addresses from {url}: HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("No routable underlay address in response from {url}")]
    NoRoutableAddress { url: String },

    #[error("No underlay address from {url} after {attempts} attempts")]
    Exhausted { url: String, attempts: u32 },
}
