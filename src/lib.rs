//! Geolocation and reputation based request filtering.
//!
//! Classifies inbound requests by attributes of their source address
//! (continent, country, ASN, reverse DNS hostname, hosting and proxy
//! flags) and produces an allow/block decision from ordered, configurable
//! criteria, while bounding how often the external attribute provider is
//! consulted.
//!
//! # Features
//!
//! - **Ordered block rules** - explicit IP lists, inbound/outbound bad-IP
//!   feeds, continent/country/ASN/rDNS lists, hosting and proxy flags;
//!   first match wins
//! - **Exceptions** - excepted addresses (single IPs or CIDR ranges) and
//!   paths bypass every rule and never trigger a lookup
//! - **Lookup caching** - bounded LRU cache with independent TTLs for
//!   successful and failed lookups
//! - **Fetch deduplication** - concurrent requests for the same address
//!   share a single upstream lookup
//! - **Uniform failure handling** - lookup failures surface as a distinct
//!   decision, never as a specific rule's response
//!
//! # Example Configuration
//!
//! ```yaml
//! rules:
//!   block_country: ["CN", "RU"]
//!   block_asn: [13335]
//!   allow_proxy: false
//!
//! exceptions:
//!   ip:
//!     - "198.51.100.20"
//!     - "192.0.2.0/24"
//!   path:
//!     - "/healthz"
//!
//! cache:
//!   capacity: 512
//!   success_ttl_seconds: 604800
//!   error_ttl_seconds: 3600
//! ```

pub mod cache;
pub mod config;
pub mod engine;
pub mod feeds;
pub mod policy;
pub mod providers;

pub use config::Config;
pub use engine::FilterEngine;
pub use policy::{Decision, RuleKind};
