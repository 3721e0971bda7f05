//! ip-api.com attribute provider.

use super::{GeoAttributes, GeoProvider, ProviderError};
use crate::config::ProviderConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::net::IpAddr;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Fields requested from the upstream.
const FIELDS: &str = "status,message,continentCode,countryCode,as,reverse,proxy,hosting";

/// ip-api.com lookup response.
#[derive(Debug, Deserialize)]
struct IpApiResponse {
    /// "success" or "fail".
    status: String,

    /// Failure reason, only present when status is "fail".
    #[serde(default)]
    message: Option<String>,

    #[serde(rename = "continentCode", default)]
    continent_code: String,

    #[serde(rename = "countryCode", default)]
    country_code: String,

    /// AS number and organization, e.g. "AS13335 Cloudflare, Inc.".
    #[serde(rename = "as", default)]
    as_name: String,

    /// Reverse DNS hostname.
    #[serde(default)]
    reverse: String,

    #[serde(default)]
    proxy: bool,

    #[serde(default)]
    hosting: bool,
}

/// Attribute provider backed by ip-api.com.
pub struct IpApiProvider {
    config: ProviderConfig,
    client: Client,
    /// Instant until which the upstream quota is exhausted.
    rate_limit_reset: RwLock<Option<Instant>>,
}

impl IpApiProvider {
    /// Create a new ip-api provider.
    pub fn new(config: ProviderConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            config,
            client,
            rate_limit_reset: RwLock::new(None),
        }
    }

    /// Whether the free-tier quota is currently exhausted.
    fn is_rate_limited(&self) -> bool {
        match self.rate_limit_reset.read() {
            Ok(reset) => reset.map(|r| Instant::now() < r).unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Track the free-tier quota headers: `X-Rl` carries the requests
    /// remaining in the window, `X-Ttl` the seconds until it resets.
    fn note_quota(&self, remaining: Option<u64>, reset_seconds: Option<u64>) {
        if remaining != Some(0) {
            return;
        }
        let reset_seconds = reset_seconds.unwrap_or(60);
        if let Ok(mut reset) = self.rate_limit_reset.write() {
            *reset = Some(Instant::now() + Duration::from_secs(reset_seconds));
            warn!(reset_seconds, "provider quota exhausted, backing off");
        }
    }
}

#[async_trait]
impl GeoProvider for IpApiProvider {
    async fn fetch(&self, ip: IpAddr) -> Result<GeoAttributes, ProviderError> {
        if is_unresolvable(&ip) {
            debug!(ip = %ip, "address is private or reserved, skipping lookup");
            return Err(ProviderError::Unresolvable(ip));
        }

        if self.is_rate_limited() {
            return Err(ProviderError::RateLimited);
        }

        let url = format!(
            "{}/{}?fields={}",
            self.config.base_url.trim_end_matches('/'),
            ip,
            FIELDS
        );

        debug!(ip = %ip, "querying attribute provider");

        let response = self.client.get(&url).send().await?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            warn!("attribute provider rate limit exceeded");
            return Err(ProviderError::RateLimited);
        }

        if !response.status().is_success() {
            let status = response.status();
            return Err(ProviderError::InvalidResponse(format!("HTTP {}", status)));
        }

        self.note_quota(header_u64(&response, "X-Rl"), header_u64(&response, "X-Ttl"));

        let body: IpApiResponse = response.json().await.map_err(|e| {
            ProviderError::InvalidResponse(format!("Failed to parse response: {}", e))
        })?;

        if body.status != "success" {
            // The upstream reports "fail" for addresses it cannot resolve.
            let message = body.message.unwrap_or_else(|| "lookup failed".to_string());
            debug!(ip = %ip, message = %message, "provider could not resolve address");
            return Err(ProviderError::Unresolvable(ip));
        }

        let attrs = GeoAttributes {
            continent: body.continent_code,
            country: body.country_code,
            asn: parse_asn(&body.as_name),
            rdns: body.reverse,
            is_hosting: body.hosting,
            is_proxy: body.proxy,
        };

        debug!(
            ip = %ip,
            country = %attrs.country,
            asn = ?attrs.asn,
            hosting = attrs.is_hosting,
            proxy = attrs.is_proxy,
            "lookup complete"
        );

        Ok(attrs)
    }

    fn name(&self) -> &str {
        "ip-api"
    }
}

fn header_u64(response: &reqwest::Response, name: &str) -> Option<u64> {
    response.headers().get(name)?.to_str().ok()?.parse().ok()
}

/// Parse the AS number out of the upstream's "AS13335 Cloudflare, Inc."
/// label. The field is empty for addresses without an announced AS.
fn parse_asn(as_name: &str) -> Option<u32> {
    let first = as_name.split_whitespace().next()?;
    first.strip_prefix("AS")?.parse().ok()
}

/// Addresses the upstream cannot resolve: private, loopback, link-local
/// and otherwise reserved ranges. Checked locally so they never spend
/// provider quota.
fn is_unresolvable(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_documentation()
                || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                // fc00::/7 unique local, fe80::/10 link local
                || (v6.segments()[0] & 0xfe00) == 0xfc00
                || (v6.segments()[0] & 0xffc0) == 0xfe80
        }
    }
}
