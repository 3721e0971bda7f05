//! Request decision orchestration.
//!
//! The engine glues the rule set, the bad-address snapshot, the lookup
//! cache and the attribute provider together. Attributes are requested
//! lazily: excepted requests and requests matched by an address-only rule
//! never reach the provider at all.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::cache::{LookupCache, LookupOutcome};
use crate::config::Config;
use crate::feeds::BadIpSets;
use crate::policy::{Decision, RuleSet};
use crate::providers::ipapi::IpApiProvider;
use crate::providers::GeoProvider;

/// Request filtering engine.
pub struct FilterEngine {
    config: Arc<Config>,
    rules: RuleSet,
    bad_ips: BadIpSets,
    cache: LookupCache,
    provider: Arc<dyn GeoProvider>,
}

impl FilterEngine {
    /// Build an engine from a validated configuration and injected
    /// collaborators. `bad_ips` is an immutable snapshot for the engine's
    /// lifetime; rebuild the engine to refresh it.
    pub fn new(config: Config, provider: Arc<dyn GeoProvider>, bad_ips: BadIpSets) -> Self {
        let rules = RuleSet::from_config(&config);
        let cache = LookupCache::new(
            config.cache.capacity,
            Duration::from_secs(config.cache.success_ttl_seconds),
            Duration::from_secs(config.cache.error_ttl_seconds),
        );
        Self {
            config: Arc::new(config),
            rules,
            bad_ips,
            cache,
            provider,
        }
    }

    /// Build an engine with the default ip-api provider, fetching the
    /// bad-address feeds named by the configuration.
    pub async fn from_config(config: Config) -> anyhow::Result<Self> {
        let provider = Arc::new(IpApiProvider::new(config.provider.clone()));
        let bad_ips = BadIpSets::load(
            &config.feeds,
            config.rules.block_inbound_bad_ip,
            config.rules.block_outbound_bad_ip,
        )
        .await?;

        info!(
            cache_capacity = config.cache.capacity,
            provider = provider.name(),
            "Filter engine initialized"
        );

        Ok(Self::new(config, provider, bad_ips))
    }

    /// Decide whether to allow the request from `ip` for `path`.
    pub async fn decide(&self, ip: IpAddr, path: &str) -> Decision {
        if !self.config.settings.enabled {
            debug!("filtering disabled globally");
            return Decision::Allow;
        }

        if self.rules.is_excepted(&ip, path) {
            debug!(ip = %ip, path = %path, "request is excepted");
            return Decision::Allow;
        }

        if let Some(decision) = self.rules.match_address(&ip, &self.bad_ips) {
            return self.finish(ip, path, decision);
        }

        if !self.rules.needs_attributes() {
            return self.finish(ip, path, Decision::Allow);
        }

        let provider = Arc::clone(&self.provider);
        let outcome = self
            .cache
            .resolve(ip, move || async move { provider.fetch(ip).await })
            .await;

        let decision = match outcome {
            LookupOutcome::Success(attrs) => self.rules.match_attributes(&attrs),
            LookupOutcome::Failure(reason) => {
                warn!(ip = %ip, error = %reason, "attribute lookup failed");
                self.rules.lookup_failed()
            }
        };
        self.finish(ip, path, decision)
    }

    /// Number of addresses currently cached.
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    fn finish(&self, ip: IpAddr, path: &str, decision: Decision) -> Decision {
        match &decision {
            Decision::Allow => {
                if self.config.settings.log_allowed {
                    debug!(ip = %ip, path = %path, "request allowed");
                }
            }
            Decision::Block { rule, response } => {
                if self.config.settings.log_blocked {
                    info!(
                        ip = %ip,
                        path = %path,
                        rule = rule.as_str(),
                        status = response.status_code,
                        "request blocked"
                    );
                }
            }
            Decision::LookupFailed { response } => {
                if self.config.settings.log_blocked {
                    info!(
                        ip = %ip,
                        path = %path,
                        status = response.status_code,
                        "request rejected, lookup unavailable"
                    );
                }
            }
        }
        decision
    }
}
