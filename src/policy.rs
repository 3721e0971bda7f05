//! Ordered rule evaluation.
//!
//! Rules are evaluated in a fixed priority order and the first match wins,
//! so operators can always predict which configured response fires when a
//! request matches several conditions. Exceptions are not part of that
//! order: they short-circuit ahead of every rule.

use std::collections::HashSet;
use std::net::IpAddr;

use crate::cache::LookupOutcome;
use crate::config::{Config, ExceptionEntry, Responses, ResponseSpec};
use crate::feeds::BadIpSets;
use crate::providers::GeoAttributes;

/// The rule that produced a block, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    Ip,
    InboundBadIp,
    OutboundBadIp,
    Continent,
    Country,
    Asn,
    RdnsHostname,
    Hosting,
    Proxy,
}

impl RuleKind {
    /// Stable name for logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKind::Ip => "ip",
            RuleKind::InboundBadIp => "inbound-bad-ip",
            RuleKind::OutboundBadIp => "outbound-bad-ip",
            RuleKind::Continent => "continent",
            RuleKind::Country => "country",
            RuleKind::Asn => "asn",
            RuleKind::RdnsHostname => "rdns-hostname",
            RuleKind::Hosting => "hosting",
            RuleKind::Proxy => "proxy",
        }
    }
}

/// Outcome of evaluating a request.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// No rule matched, or the request is excepted.
    Allow,
    /// A block rule matched; carries the configured response descriptor.
    Block {
        rule: RuleKind,
        response: ResponseSpec,
    },
    /// Attribute resolution failed. A uniform outcome, never conflated
    /// with a specific rule's response.
    LookupFailed { response: ResponseSpec },
}

/// Compiled, normalized rule set.
///
/// Evaluation is pure: the same address, path, attributes and feeds always
/// yield the same decision.
#[derive(Debug, Clone)]
pub struct RuleSet {
    block_ip: HashSet<IpAddr>,
    block_inbound_bad_ip: bool,
    block_outbound_bad_ip: bool,
    block_continent: HashSet<String>,
    block_country: HashSet<String>,
    block_asn: HashSet<u32>,
    block_rdns_hostname: HashSet<String>,
    allow_hosting: bool,
    allow_proxy: bool,
    exception_ips: Vec<ExceptionEntry>,
    exception_paths: HashSet<String>,
    responses: Responses,
}

impl RuleSet {
    /// Compile a validated configuration into a rule set. Continent and
    /// country codes are uppercased, rDNS hostnames lowercased.
    pub fn from_config(config: &Config) -> Self {
        let rules = &config.rules;
        Self {
            block_ip: rules.block_ip.iter().copied().collect(),
            block_inbound_bad_ip: rules.block_inbound_bad_ip,
            block_outbound_bad_ip: rules.block_outbound_bad_ip,
            block_continent: rules
                .block_continent
                .iter()
                .map(|c| c.trim().to_uppercase())
                .collect(),
            block_country: rules
                .block_country
                .iter()
                .map(|c| c.trim().to_uppercase())
                .collect(),
            block_asn: rules.block_asn.iter().copied().collect(),
            block_rdns_hostname: rules
                .block_rdns_hostname
                .iter()
                .map(|h| h.trim().to_lowercase())
                .collect(),
            allow_hosting: rules.allow_hosting,
            allow_proxy: rules.allow_proxy,
            exception_ips: config.exceptions.parse_ips(),
            exception_paths: config
                .exceptions
                .path
                .iter()
                .map(|p| p.trim().to_string())
                .collect(),
            responses: config.responses.clone(),
        }
    }

    /// Whether the request bypasses every rule.
    pub fn is_excepted(&self, ip: &IpAddr, path: &str) -> bool {
        self.exception_ips.iter().any(|e| e.contains(ip)) || self.exception_paths.contains(path)
    }

    /// Evaluate the rules that need no attribute lookup: the explicit
    /// block list, then the inbound and outbound bad-address feeds.
    pub fn match_address(&self, ip: &IpAddr, bad_ips: &BadIpSets) -> Option<Decision> {
        if self.block_ip.contains(ip) {
            return Some(self.block(RuleKind::Ip));
        }
        if self.block_inbound_bad_ip && bad_ips.is_inbound(ip) {
            return Some(self.block(RuleKind::InboundBadIp));
        }
        if self.block_outbound_bad_ip && bad_ips.is_outbound(ip) {
            return Some(self.block(RuleKind::OutboundBadIp));
        }
        None
    }

    /// Whether any configured rule needs resolved attributes.
    pub fn needs_attributes(&self) -> bool {
        !self.block_continent.is_empty()
            || !self.block_country.is_empty()
            || !self.block_asn.is_empty()
            || !self.block_rdns_hostname.is_empty()
            || !self.allow_hosting
            || !self.allow_proxy
    }

    /// Evaluate the attribute-dependent rules in order: continent,
    /// country, ASN, rDNS hostname, hosting, proxy.
    pub fn match_attributes(&self, attrs: &GeoAttributes) -> Decision {
        if self.block_continent.contains(&attrs.continent) {
            return self.block(RuleKind::Continent);
        }
        if self.block_country.contains(&attrs.country) {
            return self.block(RuleKind::Country);
        }
        if let Some(asn) = attrs.asn {
            if self.block_asn.contains(&asn) {
                return self.block(RuleKind::Asn);
            }
        }
        if self.block_rdns_hostname.contains(&attrs.rdns) {
            return self.block(RuleKind::RdnsHostname);
        }
        if !self.allow_hosting && attrs.is_hosting {
            return self.block(RuleKind::Hosting);
        }
        if !self.allow_proxy && attrs.is_proxy {
            return self.block(RuleKind::Proxy);
        }
        Decision::Allow
    }

    /// Decision for a failed attribute lookup.
    pub fn lookup_failed(&self) -> Decision {
        Decision::LookupFailed {
            response: self.responses.lookup_failed.clone(),
        }
    }

    /// The full decision pipeline as one pure function.
    ///
    /// `lookup` may be `None` when the caller skipped attribute
    /// resolution; if an attribute-dependent rule is configured this is
    /// treated the same as a failed lookup.
    pub fn decide(
        &self,
        ip: &IpAddr,
        path: &str,
        bad_ips: &BadIpSets,
        lookup: Option<&LookupOutcome>,
    ) -> Decision {
        if self.is_excepted(ip, path) {
            return Decision::Allow;
        }
        if let Some(decision) = self.match_address(ip, bad_ips) {
            return decision;
        }
        if !self.needs_attributes() {
            return Decision::Allow;
        }
        match lookup {
            Some(LookupOutcome::Success(attrs)) => self.match_attributes(attrs),
            Some(LookupOutcome::Failure(_)) | None => self.lookup_failed(),
        }
    }

    fn block(&self, rule: RuleKind) -> Decision {
        Decision::Block {
            rule,
            response: self.responses.for_rule(rule).clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule_set(yaml: &str) -> RuleSet {
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();
        RuleSet::from_config(&config)
    }

    fn attrs() -> GeoAttributes {
        GeoAttributes {
            continent: "AS".to_string(),
            country: "CN".to_string(),
            asn: Some(4134),
            rdns: "crawler.example.com".to_string(),
            is_hosting: true,
            is_proxy: true,
        }
    }

    fn success() -> LookupOutcome {
        LookupOutcome::Success(attrs())
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_country_block_example() {
        let rules = rule_set(
            r#"
rules:
  block_country: ["CN"]
"#,
        );
        let decision = rules.decide(&ip("9.9.9.9"), "/", &BadIpSets::empty(), Some(&success()));
        match decision {
            Decision::Block { rule, response } => {
                assert_eq!(rule, RuleKind::Country);
                assert_eq!(response.status_code, 403);
            }
            other => panic!("expected country block, got {:?}", other),
        }
    }

    #[test]
    fn test_exception_address_overrides_block_list() {
        let rules = rule_set(
            r#"
rules:
  block_ip: ["9.9.9.9"]
exceptions:
  ip: ["9.9.9.9"]
"#,
        );
        let decision = rules.decide(&ip("9.9.9.9"), "/", &BadIpSets::empty(), None);
        assert_eq!(decision, Decision::Allow);
    }

    #[test]
    fn test_exception_address_overrides_attributes() {
        let rules = rule_set(
            r#"
rules:
  block_country: ["CN"]
  allow_proxy: false
exceptions:
  ip: ["9.9.9.9"]
"#,
        );
        let decision = rules.decide(&ip("9.9.9.9"), "/", &BadIpSets::empty(), Some(&success()));
        assert_eq!(decision, Decision::Allow);
    }

    #[test]
    fn test_exception_cidr() {
        let rules = rule_set(
            r#"
rules:
  block_ip: ["198.51.100.7"]
exceptions:
  ip: ["198.51.100.0/24"]
"#,
        );
        let decision = rules.decide(&ip("198.51.100.7"), "/", &BadIpSets::empty(), None);
        assert_eq!(decision, Decision::Allow);
    }

    #[test]
    fn test_exception_path() {
        let rules = rule_set(
            r#"
rules:
  block_country: ["CN"]
exceptions:
  path: ["/healthz"]
"#,
        );
        let excepted = rules.decide(&ip("9.9.9.9"), "/healthz", &BadIpSets::empty(), Some(&success()));
        assert_eq!(excepted, Decision::Allow);

        let blocked = rules.decide(&ip("9.9.9.9"), "/api", &BadIpSets::empty(), Some(&success()));
        assert!(matches!(blocked, Decision::Block { rule: RuleKind::Country, .. }));
    }

    #[test]
    fn test_first_match_country_before_asn() {
        // The sample attributes match both the country and the ASN rule;
        // the country response must fire.
        let rules = rule_set(
            r#"
rules:
  block_country: ["CN"]
  block_asn: [4134]
responses:
  country:
    response: '{"detail": "country"}'
    status_code: 451
  asn:
    response: '{"detail": "asn"}'
    status_code: 452
"#,
        );
        match rules.match_attributes(&attrs()) {
            Decision::Block { rule, response } => {
                assert_eq!(rule, RuleKind::Country);
                assert_eq!(response.status_code, 451);
            }
            other => panic!("expected block, got {:?}", other),
        }
    }

    #[test]
    fn test_address_rule_order() {
        let mut inbound = HashSet::new();
        inbound.insert(ip("5.5.5.5"));
        let mut outbound = HashSet::new();
        outbound.insert(ip("5.5.5.5"));
        let bad_ips = BadIpSets::new(inbound, outbound);

        let rules = rule_set(
            r#"
rules:
  block_inbound_bad_ip: true
  block_outbound_bad_ip: true
"#,
        );
        // Listed on both feeds: the inbound rule is evaluated first.
        match rules.match_address(&ip("5.5.5.5"), &bad_ips) {
            Some(Decision::Block { rule, .. }) => assert_eq!(rule, RuleKind::InboundBadIp),
            other => panic!("expected inbound block, got {:?}", other),
        }
    }

    #[test]
    fn test_block_ip_before_feeds() {
        let mut inbound = HashSet::new();
        inbound.insert(ip("5.5.5.5"));
        let bad_ips = BadIpSets::new(inbound, HashSet::new());

        let rules = rule_set(
            r#"
rules:
  block_ip: ["5.5.5.5"]
  block_inbound_bad_ip: true
"#,
        );
        match rules.match_address(&ip("5.5.5.5"), &bad_ips) {
            Some(Decision::Block { rule, .. }) => assert_eq!(rule, RuleKind::Ip),
            other => panic!("expected ip block, got {:?}", other),
        }
    }

    #[test]
    fn test_lookup_failure_is_uniform() {
        let rules = rule_set(
            r#"
rules:
  block_country: ["CN"]
"#,
        );
        let failure = LookupOutcome::Failure("Request timed out".to_string());
        let decision = rules.decide(&ip("9.9.9.9"), "/", &BadIpSets::empty(), Some(&failure));
        match decision {
            Decision::LookupFailed { response } => assert_eq!(response.status_code, 503),
            other => panic!("expected lookup failure, got {:?}", other),
        }

        // A missing lookup is treated the same way.
        let decision = rules.decide(&ip("9.9.9.9"), "/", &BadIpSets::empty(), None);
        assert!(matches!(decision, Decision::LookupFailed { .. }));
    }

    #[test]
    fn test_no_attribute_rules_no_lookup_needed() {
        let rules = rule_set(
            r#"
rules:
  block_ip: ["9.9.9.9"]
"#,
        );
        assert!(!rules.needs_attributes());
        // No lookup supplied and none needed: allow.
        let decision = rules.decide(&ip("1.1.1.1"), "/", &BadIpSets::empty(), None);
        assert_eq!(decision, Decision::Allow);
    }

    #[test]
    fn test_needs_attributes() {
        assert!(rule_set("rules:\n  block_continent: [\"EU\"]\n").needs_attributes());
        assert!(rule_set("rules:\n  block_asn: [13335]\n").needs_attributes());
        assert!(rule_set("rules:\n  allow_hosting: false\n").needs_attributes());
        assert!(rule_set("rules:\n  allow_proxy: false\n").needs_attributes());
        assert!(!rule_set("{}").needs_attributes());
    }

    #[test]
    fn test_hosting_before_proxy() {
        let rules = rule_set(
            r#"
rules:
  allow_hosting: false
  allow_proxy: false
"#,
        );
        // Sample attributes are both hosting and proxy; hosting wins.
        match rules.match_attributes(&attrs()) {
            Decision::Block { rule, .. } => assert_eq!(rule, RuleKind::Hosting),
            other => panic!("expected hosting block, got {:?}", other),
        }
    }

    #[test]
    fn test_rdns_match() {
        let rules = rule_set(
            r#"
rules:
  block_rdns_hostname: ["Crawler.Example.COM"]
"#,
        );
        // Config hostnames are normalized to lowercase at compile time.
        match rules.match_attributes(&attrs()) {
            Decision::Block { rule, .. } => assert_eq!(rule, RuleKind::RdnsHostname),
            other => panic!("expected rdns block, got {:?}", other),
        }
    }

    #[test]
    fn test_country_codes_normalized() {
        let rules = rule_set(
            r#"
rules:
  block_country: [" cn "]
"#,
        );
        assert!(matches!(
            rules.match_attributes(&attrs()),
            Decision::Block { rule: RuleKind::Country, .. }
        ));
    }

    #[test]
    fn test_absent_asn_never_matches() {
        let rules = rule_set(
            r#"
rules:
  block_asn: [4134]
"#,
        );
        let mut no_asn = attrs();
        no_asn.asn = None;
        assert_eq!(rules.match_attributes(&no_asn), Decision::Allow);
    }

    #[test]
    fn test_all_response_overrides_per_rule() {
        let rules = rule_set(
            r#"
rules:
  block_ip: ["9.9.9.9"]
  block_country: ["CN"]
responses:
  all:
    response: '{"detail": "nope"}'
    status_code: 410
  country:
    response: '{"detail": "country"}'
    status_code: 451
"#,
        );
        match rules.decide(&ip("9.9.9.9"), "/", &BadIpSets::empty(), None) {
            Decision::Block { rule, response } => {
                assert_eq!(rule, RuleKind::Ip);
                assert_eq!(response.status_code, 410);
            }
            other => panic!("expected block, got {:?}", other),
        }
        match rules.match_attributes(&attrs()) {
            Decision::Block { rule, response } => {
                assert_eq!(rule, RuleKind::Country);
                assert_eq!(response.status_code, 410);
            }
            other => panic!("expected block, got {:?}", other),
        }
    }

    #[test]
    fn test_no_rules_allows() {
        let rules = rule_set("{}");
        let decision = rules.decide(&ip("9.9.9.9"), "/", &BadIpSets::empty(), None);
        assert_eq!(decision, Decision::Allow);
    }
}
