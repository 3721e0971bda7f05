//! Configuration types for the filter engine.
//!
//! The engine consumes a fully validated [`Config`]; parse failures and
//! invalid values are rejected by [`Config::load`] before an engine is
//! ever constructed.

use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use crate::policy::RuleKind;

/// Root configuration for the filter engine.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Global settings.
    #[serde(default)]
    pub settings: Settings,

    /// Block rules, evaluated in a fixed order.
    #[serde(default)]
    pub rules: Rules,

    /// Exceptions that bypass every rule.
    #[serde(default)]
    pub exceptions: Exceptions,

    /// Response descriptors attached to block decisions.
    #[serde(default)]
    pub responses: Responses,

    /// Lookup cache parameters.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Attribute lookup provider.
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Bad-address feed sources.
    #[serde(default)]
    pub feeds: FeedConfig,
}

/// Global settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    /// Master enable/disable switch.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Log blocked requests.
    #[serde(default = "default_true")]
    pub log_blocked: bool,

    /// Log allowed requests.
    #[serde(default)]
    pub log_allowed: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enabled: true,
            log_blocked: true,
            log_allowed: false,
        }
    }
}

/// Block rules. List rules match when the resolved value is in the list;
/// the hosting and proxy switches block when set to `false` and the
/// corresponding attribute is true.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Rules {
    /// Explicitly blocked source addresses.
    #[serde(default)]
    pub block_ip: Vec<IpAddr>,

    /// Block addresses found on the inbound bad-address feed.
    #[serde(default)]
    pub block_inbound_bad_ip: bool,

    /// Block addresses found on the outbound bad-address feed.
    #[serde(default)]
    pub block_outbound_bad_ip: bool,

    /// Blocked continent codes.
    #[serde(default)]
    pub block_continent: Vec<String>,

    /// Blocked country codes.
    #[serde(default)]
    pub block_country: Vec<String>,

    /// Blocked autonomous system numbers.
    #[serde(default)]
    pub block_asn: Vec<u32>,

    /// Blocked reverse DNS hostnames.
    #[serde(default)]
    pub block_rdns_hostname: Vec<String>,

    /// Allow addresses in hosting/datacenter ranges.
    #[serde(default = "default_true")]
    pub allow_hosting: bool,

    /// Allow addresses flagged as proxies.
    #[serde(default = "default_true")]
    pub allow_proxy: bool,
}

impl Default for Rules {
    fn default() -> Self {
        Self {
            block_ip: Vec::new(),
            block_inbound_bad_ip: false,
            block_outbound_bad_ip: false,
            block_continent: Vec::new(),
            block_country: Vec::new(),
            block_asn: Vec::new(),
            block_rdns_hostname: Vec::new(),
            allow_hosting: true,
            allow_proxy: true,
        }
    }
}

/// Global exceptions. An excepted request is allowed before any rule is
/// evaluated and before any attribute lookup is made.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Exceptions {
    /// Excepted source addresses; single IPs or CIDR networks.
    #[serde(default)]
    pub ip: Vec<String>,

    /// Excepted request paths (exact match).
    #[serde(default)]
    pub path: Vec<String>,
}

impl Exceptions {
    /// Parse exception entries into IpAddr or IpNet.
    pub fn parse_ips(&self) -> Vec<ExceptionEntry> {
        self.ip
            .iter()
            .filter_map(|s| {
                let s = s.trim();
                if let Ok(ip) = s.parse::<IpAddr>() {
                    Some(ExceptionEntry::Single(ip))
                } else if let Ok(net) = s.parse::<IpNet>() {
                    Some(ExceptionEntry::Network(net))
                } else {
                    None
                }
            })
            .collect()
    }
}

/// Parsed exception address entry.
#[derive(Debug, Clone)]
pub enum ExceptionEntry {
    Single(IpAddr),
    Network(IpNet),
}

impl ExceptionEntry {
    /// Check if an IP address matches this exception entry.
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match self {
            ExceptionEntry::Single(excepted) => excepted == ip,
            ExceptionEntry::Network(net) => net.contains(ip),
        }
    }
}

/// Format hint for rendering a response body.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    #[default]
    Json,
    Html,
    Text,
}

/// Response descriptor carried on a decision. Opaque to the engine;
/// rendering it into a concrete wire response is the caller's job.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ResponseSpec {
    /// Response body.
    #[serde(default = "default_forbidden_body")]
    pub response: String,

    /// HTTP-style status code.
    #[serde(default = "default_forbidden_status")]
    pub status_code: u16,

    /// How the body should be rendered.
    #[serde(default)]
    pub return_as: ResponseFormat,
}

impl ResponseSpec {
    /// Default block response.
    pub fn forbidden() -> Self {
        Self {
            response: default_forbidden_body(),
            status_code: default_forbidden_status(),
            return_as: ResponseFormat::Json,
        }
    }

    /// Default response for failed lookups.
    pub fn service_unavailable() -> Self {
        Self {
            response: r#"{"detail": "Service Unavailable"}"#.to_string(),
            status_code: 503,
            return_as: ResponseFormat::Json,
        }
    }
}

impl Default for ResponseSpec {
    fn default() -> Self {
        Self::forbidden()
    }
}

fn default_forbidden_body() -> String {
    r#"{"detail": "Forbidden"}"#.to_string()
}

fn default_forbidden_status() -> u16 {
    403
}

/// Per-rule response descriptors.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Responses {
    /// When set, overrides every per-rule block response.
    #[serde(default)]
    pub all: Option<ResponseSpec>,

    #[serde(default)]
    pub ip: ResponseSpec,

    /// Shared by the inbound and outbound bad-address rules.
    #[serde(default)]
    pub bad_ip: ResponseSpec,

    #[serde(default)]
    pub continent: ResponseSpec,

    #[serde(default)]
    pub country: ResponseSpec,

    #[serde(default)]
    pub asn: ResponseSpec,

    #[serde(default)]
    pub rdns_hostname: ResponseSpec,

    #[serde(default)]
    pub hosting: ResponseSpec,

    #[serde(default)]
    pub proxy: ResponseSpec,

    /// Returned when attribute resolution fails. Deliberately uniform and
    /// never overridden by `all`: callers must not be able to tell which
    /// rule would have fired.
    #[serde(default = "ResponseSpec::service_unavailable")]
    pub lookup_failed: ResponseSpec,
}

impl Default for Responses {
    fn default() -> Self {
        Self {
            all: None,
            ip: ResponseSpec::forbidden(),
            bad_ip: ResponseSpec::forbidden(),
            continent: ResponseSpec::forbidden(),
            country: ResponseSpec::forbidden(),
            asn: ResponseSpec::forbidden(),
            rdns_hostname: ResponseSpec::forbidden(),
            hosting: ResponseSpec::forbidden(),
            proxy: ResponseSpec::forbidden(),
            lookup_failed: ResponseSpec::service_unavailable(),
        }
    }
}

impl Responses {
    /// Response descriptor for a block by `rule`, honoring the `all`
    /// override.
    pub fn for_rule(&self, rule: RuleKind) -> &ResponseSpec {
        if let Some(all) = &self.all {
            return all;
        }
        match rule {
            RuleKind::Ip => &self.ip,
            RuleKind::InboundBadIp | RuleKind::OutboundBadIp => &self.bad_ip,
            RuleKind::Continent => &self.continent,
            RuleKind::Country => &self.country,
            RuleKind::Asn => &self.asn,
            RuleKind::RdnsHostname => &self.rdns_hostname,
            RuleKind::Hosting => &self.hosting,
            RuleKind::Proxy => &self.proxy,
        }
    }

    fn named(&self) -> Vec<(&'static str, &ResponseSpec)> {
        let mut all = vec![
            ("ip", &self.ip),
            ("bad_ip", &self.bad_ip),
            ("continent", &self.continent),
            ("country", &self.country),
            ("asn", &self.asn),
            ("rdns_hostname", &self.rdns_hostname),
            ("hosting", &self.hosting),
            ("proxy", &self.proxy),
            ("lookup_failed", &self.lookup_failed),
        ];
        if let Some(spec) = &self.all {
            all.push(("all", spec));
        }
        all
    }
}

/// Lookup cache parameters.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Maximum number of cached addresses. 0 disables caching.
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,

    /// Seconds before a successful lookup is refreshed. 0 never refreshes.
    #[serde(default = "default_success_ttl")]
    pub success_ttl_seconds: u64,

    /// Seconds before a failed lookup is retried. 0 never retries.
    #[serde(default = "default_error_ttl")]
    pub error_ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
            success_ttl_seconds: default_success_ttl(),
            error_ttl_seconds: default_error_ttl(),
        }
    }
}

fn default_cache_capacity() -> usize {
    512
}

fn default_success_ttl() -> u64 {
    604800 // 7 days
}

fn default_error_ttl() -> u64 {
    3600 // 1 hour
}

/// Attribute lookup provider configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    /// Lookup endpoint; the address is appended as a path segment.
    #[serde(default = "default_provider_url")]
    pub base_url: String,

    /// Request timeout in milliseconds.
    #[serde(default = "default_provider_timeout")]
    pub timeout_ms: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_provider_url(),
            timeout_ms: default_provider_timeout(),
        }
    }
}

fn default_provider_url() -> String {
    "http://ip-api.com/json".to_string()
}

fn default_provider_timeout() -> u64 {
    5000
}

/// Bad-address feed sources, resolved once at engine construction.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeedConfig {
    /// Inbound bad-address list; URL or local file path.
    #[serde(default = "default_inbound_feed")]
    pub inbound: String,

    /// Outbound bad-address list; URL or local file path.
    #[serde(default = "default_outbound_feed")]
    pub outbound: String,

    /// Fetch timeout in seconds.
    #[serde(default = "default_feed_timeout")]
    pub timeout_seconds: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            inbound: default_inbound_feed(),
            outbound: default_outbound_feed(),
            timeout_seconds: default_feed_timeout(),
        }
    }
}

fn default_inbound_feed() -> String {
    "https://raw.githubusercontent.com/bitwire-it/ipblocklist/main/inbound.txt".to_string()
}

fn default_outbound_feed() -> String {
    "https://raw.githubusercontent.com/bitwire-it/ipblocklist/main/outbound.txt".to_string()
}

fn default_feed_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let expanded = expand_env_vars(&content);
        let config: Config = serde_yaml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        for entry in &self.exceptions.ip {
            let entry = entry.trim();
            if entry.parse::<IpAddr>().is_err() && entry.parse::<IpNet>().is_err() {
                anyhow::bail!("Invalid exception address: {}", entry);
            }
        }

        for (name, spec) in self.responses.named() {
            if !(100..=599).contains(&spec.status_code) {
                anyhow::bail!(
                    "Response '{}' has invalid status code {}",
                    name,
                    spec.status_code
                );
            }
            if spec.return_as == ResponseFormat::Json
                && serde_json::from_str::<serde_json::Value>(&spec.response).is_err()
            {
                anyhow::bail!("Response '{}' is marked as JSON but the body is not valid JSON", name);
            }
        }

        if self.rules.block_inbound_bad_ip && self.feeds.inbound.trim().is_empty() {
            anyhow::bail!("block_inbound_bad_ip is enabled but feeds.inbound is empty");
        }
        if self.rules.block_outbound_bad_ip && self.feeds.outbound.trim().is_empty() {
            anyhow::bail!("block_outbound_bad_ip is enabled but feeds.outbound is empty");
        }

        Ok(())
    }

    /// Generate example configuration YAML.
    pub fn example() -> String {
        r#"# Request filter configuration

settings:
  enabled: true
  log_blocked: true
  log_allowed: false

# Block rules, evaluated in a fixed order; the first match wins:
# ip, inbound bad IP, outbound bad IP, continent, country, ASN,
# rDNS hostname, hosting, proxy.
rules:
  block_ip:
    - "203.0.113.7"
  block_inbound_bad_ip: false
  block_outbound_bad_ip: false
  block_continent: []              # e.g. ["AF", "SA"]
  block_country: []                # e.g. ["CN", "RU"]
  block_asn: []                    # e.g. [13335]
  block_rdns_hostname: []          # e.g. ["crawler.example.com"]
  allow_hosting: true              # false blocks datacenter ranges
  allow_proxy: true                # false blocks known proxies

# Excepted addresses and paths bypass every rule above.
# Addresses support single IPs and CIDR notation; paths match exactly.
exceptions:
  ip:
    - "198.51.100.20"
    - "192.0.2.0/24"
  path:
    - "/healthz"

# Response descriptors returned with block decisions.
# return_as is json, html or text. `all` overrides every per-rule response.
responses:
  country:
    response: '{"detail": "Forbidden"}'
    status_code: 403
    return_as: json
  lookup_failed:
    response: '{"detail": "Service Unavailable"}'
    status_code: 503
    return_as: json

# Lookup cache. A TTL of 0 keeps entries forever; capacity 0 disables
# caching entirely.
cache:
  capacity: 512
  success_ttl_seconds: 604800      # 7 days
  error_ttl_seconds: 3600          # 1 hour

# Attribute lookup provider.
provider:
  base_url: "http://ip-api.com/json"
  timeout_ms: 5000

# Bad-address feeds, fetched once at startup when the matching rule is on.
# URLs or local file paths.
feeds:
  inbound: "https://raw.githubusercontent.com/bitwire-it/ipblocklist/main/inbound.txt"
  outbound: "https://raw.githubusercontent.com/bitwire-it/ipblocklist/main/outbound.txt"
  timeout_seconds: 30
"#
        .to_string()
    }
}

/// Expand environment variables in the format ${VAR_NAME}.
fn expand_env_vars(content: &str) -> String {
    let mut result = content.to_string();
    let re = regex::Regex::new(r"\$\{([^}]+)\}").unwrap();

    for cap in re.captures_iter(content) {
        let var_name = &cap[1];
        let var_value = std::env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}
