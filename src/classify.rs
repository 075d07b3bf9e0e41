use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use thiserror::Error;

/// Organisation ranges treated as internal when no config overrides them.
pub const DEFAULT_INTERNAL_RANGES: &[&str] = &[
    "10.*",
    "192.168.*",
    "172.16-31.*",
    "151.*",
    "154.0-16.*",
    "155.8.*",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressScope {
    Internal,
    External,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuleError {
    #[error("address rule is empty")]
    Empty,
    #[error("invalid address rule '{rule}': {reason}")]
    Invalid { rule: String, reason: String },
}

/// One contiguous IPv4 interval, written either as CIDR (`172.16.0.0/12`)
/// or as an octet pattern (`172.16-31.*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressRule {
    start: u32,
    end: u32,
}

impl AddressRule {
    pub fn parse(text: &str) -> Result<Self, RuleError> {
        let rule = text.trim();
        if rule.is_empty() {
            return Err(RuleError::Empty);
        }
        if rule.contains('/') {
            let net = Ipv4Net::from_str(rule).map_err(|err| invalid(rule, err.to_string()))?;
            return Ok(Self {
                start: u32::from(net.network()),
                end: u32::from(net.broadcast()),
            });
        }
        parse_octet_pattern(rule)
    }
}

impl FromStr for AddressRule {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for AddressRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}",
            Ipv4Addr::from(self.start),
            Ipv4Addr::from(self.end)
        )
    }
}

fn invalid(rule: &str, reason: impl Into<String>) -> RuleError {
    RuleError::Invalid {
        rule: rule.to_string(),
        reason: reason.into(),
    }
}

fn parse_octet_pattern(rule: &str) -> Result<AddressRule, RuleError> {
    let parts: Vec<&str> = rule.split('.').collect();
    if parts.len() > 4 {
        return Err(invalid(rule, "more than four octets"));
    }

    let mut low = [0_u8; 4];
    let mut high = [255_u8; 4];
    let mut open_tail = false;
    let mut ranged = false;

    for (idx, part) in parts.iter().enumerate() {
        let part = part.trim();
        if part == "*" {
            if idx + 1 != parts.len() {
                return Err(invalid(rule, "'*' must be the last octet"));
            }
            open_tail = true;
            break;
        }
        if ranged {
            return Err(invalid(rule, "only '*' may follow an octet range"));
        }
        let (lo, hi) = match part.split_once('-') {
            Some((a, b)) => {
                ranged = true;
                (parse_octet(rule, a)?, parse_octet(rule, b)?)
            }
            None => {
                let v = parse_octet(rule, part)?;
                (v, v)
            }
        };
        if lo > hi {
            return Err(invalid(rule, format!("octet range {lo}-{hi} is reversed")));
        }
        low[idx] = lo;
        high[idx] = hi;
    }

    if !open_tail && parts.len() != 4 {
        return Err(invalid(rule, "pattern must have four octets or end with '*'"));
    }

    Ok(AddressRule {
        start: u32::from(Ipv4Addr::from(low)),
        end: u32::from(Ipv4Addr::from(high)),
    })
}

fn parse_octet(rule: &str, text: &str) -> Result<u8, RuleError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(invalid(rule, "empty octet"));
    }
    text.parse::<u8>()
        .map_err(|_| invalid(rule, format!("'{text}' is not an octet (0..255)")))
}

/// Decides whether a peer address belongs to the internal address space.
///
/// Rules are merged into one sorted interval table at construction, so every
/// lookup is a single parse plus a binary search regardless of how many rules
/// were configured.
#[derive(Debug, Clone)]
pub struct AddressClassifier {
    intervals: Vec<(u32, u32)>,
}

impl AddressClassifier {
    pub fn new(rules: impl IntoIterator<Item = AddressRule>) -> Self {
        let mut spans: Vec<(u32, u32)> = rules.into_iter().map(|r| (r.start, r.end)).collect();
        spans.sort_unstable();

        let mut intervals: Vec<(u32, u32)> = Vec::with_capacity(spans.len());
        for (start, end) in spans {
            match intervals.last_mut() {
                Some(last) if u64::from(start) <= u64::from(last.1) + 1 => {
                    last.1 = last.1.max(end);
                }
                _ => intervals.push((start, end)),
            }
        }

        Self { intervals }
    }

    pub fn from_patterns<I, S>(patterns: I) -> Result<Self, RuleError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let rules = patterns
            .into_iter()
            .map(|p| AddressRule::parse(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(rules))
    }

    pub fn classify(&self, remote_address: &str) -> AddressScope {
        let Some(addr) = ipv4_of(remote_address) else {
            return AddressScope::External;
        };
        let v = u32::from(addr);
        let idx = self.intervals.partition_point(|&(start, _)| start <= v);
        match idx.checked_sub(1).map(|i| self.intervals[i]) {
            Some((_, end)) if v <= end => AddressScope::Internal,
            _ => AddressScope::External,
        }
    }

    pub fn is_internal(&self, remote_address: &str) -> bool {
        self.classify(remote_address) == AddressScope::Internal
    }

    pub fn interval_count(&self) -> usize {
        self.intervals.len()
    }
}

impl Default for AddressClassifier {
    fn default() -> Self {
        let rules = DEFAULT_INTERNAL_RANGES
            .iter()
            .filter_map(|p| AddressRule::parse(p).ok());
        Self::new(rules)
    }
}

fn ipv4_of(text: &str) -> Option<Ipv4Addr> {
    match text.trim().parse::<IpAddr>().ok()? {
        IpAddr::V4(v4) => Some(v4),
        IpAddr::V6(v6) => v6.to_ipv4_mapped(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ranges_are_internal() {
        let c = AddressClassifier::default();
        for addr in [
            "10.0.0.1",
            "10.255.255.255",
            "192.168.1.20",
            "172.16.0.1",
            "172.31.255.254",
            "151.3.4.5",
            "154.0.0.1",
            "154.16.200.1",
            "155.8.9.10",
        ] {
            assert_eq!(c.classify(addr), AddressScope::Internal, "{addr}");
        }
    }

    #[test]
    fn outside_ranges_are_external() {
        let c = AddressClassifier::default();
        for addr in [
            "8.8.8.8",
            "1.1.1.1",
            "172.32.0.1",
            "172.15.255.255",
            "154.17.0.1",
            "155.9.0.1",
            "192.169.0.1",
            "11.0.0.1",
        ] {
            assert_eq!(c.classify(addr), AddressScope::External, "{addr}");
        }
    }

    #[test]
    fn default_table_matches_default_patterns() {
        let parsed = AddressClassifier::from_patterns(DEFAULT_INTERNAL_RANGES).unwrap();
        assert_eq!(parsed.intervals, AddressClassifier::default().intervals);
        assert_eq!(parsed.interval_count(), DEFAULT_INTERNAL_RANGES.len());
    }

    #[test]
    fn ipv6_literals() {
        let c = AddressClassifier::default();
        assert_eq!(c.classify("::ffff:10.1.2.3"), AddressScope::Internal);
        assert_eq!(c.classify("2001:4860:4860::8888"), AddressScope::External);
        assert_eq!(c.classify("not-an-ip"), AddressScope::External);
    }

    #[test]
    fn cidr_and_pattern_rules_agree() {
        let cidr = AddressRule::parse("172.16.0.0/12").unwrap();
        let pattern = AddressRule::parse("172.16-31.*").unwrap();
        assert_eq!(cidr, pattern);

        let host = AddressClassifier::from_patterns(["203.0.113.7"]).unwrap();
        assert!(host.is_internal("203.0.113.7"));
        assert!(!host.is_internal("203.0.113.8"));
    }

    #[test]
    fn rules_can_be_extended_without_code_changes() {
        let c = AddressClassifier::from_patterns(["10.*", "100.64.0.0/10"]).unwrap();
        assert!(c.is_internal("100.127.1.1"));
        assert!(!c.is_internal("192.168.1.1"));
    }

    #[test]
    fn overlapping_rules_are_merged() {
        let c = AddressClassifier::from_patterns(["10.*", "10.1.*", "11.0-3.*", "11.4.*"]).unwrap();
        assert_eq!(c.interval_count(), 1);
        assert!(c.is_internal("11.4.0.1"));
        assert!(!c.is_internal("11.5.0.1"));
    }

    #[test]
    fn malformed_rules_are_rejected() {
        assert_eq!(AddressRule::parse("  "), Err(RuleError::Empty));
        for bad in [
            "10",
            "10.*.1",
            "10.1-2.3.*",
            "300.*",
            "10.5-1.*",
            "1.2.3.4.5",
            "10..*",
            "10.0.0.0/40",
        ] {
            assert!(AddressRule::parse(bad).is_err(), "{bad}");
        }
    }
}
