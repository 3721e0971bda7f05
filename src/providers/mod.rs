//! Geolocation attribute providers.

pub mod ipapi;

use async_trait::async_trait;
use std::net::IpAddr;

/// Attributes resolved for a single source address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeoAttributes {
    /// Two-letter continent code (e.g. "EU").
    pub continent: String,

    /// Two-letter country code (e.g. "DE").
    pub country: String,

    /// Autonomous system number, when the upstream reports one.
    pub asn: Option<u32>,

    /// Reverse DNS hostname; empty when none exists.
    pub rdns: String,

    /// Address belongs to a hosting/datacenter range.
    pub is_hosting: bool,

    /// Address is a known proxy exit.
    pub is_proxy: bool,
}

/// Error from an attribute provider.
#[derive(Debug)]
pub enum ProviderError {
    /// HTTP request failed.
    Http(reqwest::Error),
    /// Timeout.
    Timeout,
    /// Rate limited by the upstream.
    RateLimited,
    /// The address cannot be looked up at all (private, reserved, or
    /// rejected by the upstream as unresolvable).
    Unresolvable(IpAddr),
    /// Invalid response.
    InvalidResponse(String),
    /// IO error.
    Io(std::io::Error),
    /// Other error.
    Other(String),
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderError::Http(e) => write!(f, "HTTP error: {}", e),
            ProviderError::Timeout => write!(f, "Request timed out"),
            ProviderError::RateLimited => write!(f, "Rate limited"),
            ProviderError::Unresolvable(ip) => write!(f, "Address {} is not resolvable", ip),
            ProviderError::InvalidResponse(msg) => write!(f, "Invalid response: {}", msg),
            ProviderError::Io(e) => write!(f, "IO error: {}", e),
            ProviderError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for ProviderError {}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout
        } else {
            ProviderError::Http(e)
        }
    }
}

impl From<std::io::Error> for ProviderError {
    fn from(e: std::io::Error) -> Self {
        ProviderError::Io(e)
    }
}

/// Trait for address attribute providers.
#[async_trait]
pub trait GeoProvider: Send + Sync {
    /// Resolve the attribute set for an address.
    async fn fetch(&self, ip: IpAddr) -> Result<GeoAttributes, ProviderError>;

    /// Provider name for logging.
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = ProviderError::Unresolvable("10.0.0.1".parse().unwrap());
        assert_eq!(e.to_string(), "Address 10.0.0.1 is not resolvable");

        let e = ProviderError::RateLimited;
        assert_eq!(e.to_string(), "Rate limited");

        let e = ProviderError::InvalidResponse("HTTP 500".to_string());
        assert_eq!(e.to_string(), "Invalid response: HTTP 500");
    }
}
