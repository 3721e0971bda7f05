//! Bad-address feeds.
//!
//! Feeds are resolved once, when the engine is constructed, into an
//! immutable snapshot. Refreshing them is an external concern: reconstruct
//! the engine to pick up new lists.

use std::collections::HashSet;
use std::net::IpAddr;
use std::time::Duration;

use tracing::info;

use crate::config::FeedConfig;
use crate::providers::ProviderError;

/// Immutable snapshot of the inbound and outbound bad-address lists.
#[derive(Debug, Clone, Default)]
pub struct BadIpSets {
    inbound: HashSet<IpAddr>,
    outbound: HashSet<IpAddr>,
}

impl BadIpSets {
    /// Snapshot with no entries.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(inbound: HashSet<IpAddr>, outbound: HashSet<IpAddr>) -> Self {
        Self { inbound, outbound }
    }

    /// Fetch the feeds named by `config`. Only lists whose block rule is
    /// enabled are loaded; the others stay empty.
    pub async fn load(
        config: &FeedConfig,
        want_inbound: bool,
        want_outbound: bool,
    ) -> Result<Self, ProviderError> {
        let mut sets = Self::default();
        if want_inbound {
            sets.inbound = load_feed(&config.inbound, config.timeout_seconds).await?;
            info!(
                feed = %config.inbound,
                entries = sets.inbound.len(),
                "Inbound bad-address feed loaded"
            );
        }
        if want_outbound {
            sets.outbound = load_feed(&config.outbound, config.timeout_seconds).await?;
            info!(
                feed = %config.outbound,
                entries = sets.outbound.len(),
                "Outbound bad-address feed loaded"
            );
        }
        Ok(sets)
    }

    pub fn is_inbound(&self, ip: &IpAddr) -> bool {
        self.inbound.contains(ip)
    }

    pub fn is_outbound(&self, ip: &IpAddr) -> bool {
        self.outbound.contains(ip)
    }
}

/// Load one feed from a URL or a local file.
async fn load_feed(source: &str, timeout_seconds: u64) -> Result<HashSet<IpAddr>, ProviderError> {
    let content = if source.starts_with("http://") || source.starts_with("https://") {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .expect("Failed to create HTTP client");

        let response = client.get(source).send().await?;
        if !response.status().is_success() {
            return Err(ProviderError::InvalidResponse(format!(
                "HTTP {}",
                response.status()
            )));
        }
        response.text().await.map_err(|e| {
            ProviderError::InvalidResponse(format!("Failed to read response: {}", e))
        })?
    } else {
        std::fs::read_to_string(source)?
    };

    Ok(parse_feed(&content))
}

/// One address per line; blank lines, comments and unparsable lines are
/// skipped.
fn parse_feed(content: &str) -> HashSet<IpAddr> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.parse().ok())
        .collect()
}
