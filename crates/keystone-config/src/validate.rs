//! Validation helpers turning untyped input into typed patches.

use std::net::IpAddr;
use std::time::Duration;

use serde_json::Value;

use crate::error::{ConfigError, ConfigResult};
use crate::model::{PasswordStrategy, PatchSet};

/// Convert a JSON object into a [`PatchSet`].
///
/// # Errors
///
/// Returns [`ConfigError::PatchNotObject`] for non-object input,
/// [`ConfigError::UnknownField`] for keys the record does not have, and
/// [`ConfigError::InvalidField`] for values of the wrong shape.
pub fn parse_patch(value: &Value) -> ConfigResult<PatchSet> {
    let map = value.as_object().ok_or(ConfigError::PatchNotObject)?;
    let mut patch = PatchSet::default();
    for (field, value) in map {
        match field.as_str() {
            "login_ttl" => patch.login_ttl = Some(parse_seconds(value, "login_ttl")?),
            "login_failures" => patch.login_failures = Some(parse_count(value, "login_failures")?),
            "ip_login_failures" => {
                patch.ip_login_failures = Some(parse_count(value, "ip_login_failures")?);
            }
            "ip_whitelist" => patch.ip_whitelist = Some(parse_ip_rules(value, "ip_whitelist")?),
            "ip_blacklist" => patch.ip_blacklist = Some(parse_ip_rules(value, "ip_blacklist")?),
            "pwd_strategy" => patch.pwd_strategy = Some(parse_strategy(value)?),
            "pwd_ttl" => patch.pwd_ttl = Some(parse_seconds(value, "pwd_ttl")?),
            "office" => patch.office = Some(parse_string(value, "office")?),
            other => {
                return Err(ConfigError::UnknownField {
                    field: other.to_string(),
                });
            }
        }
    }
    Ok(patch)
}

fn invalid(field: &'static str, reason: &'static str, value: &Value) -> ConfigError {
    ConfigError::InvalidField {
        field,
        reason,
        value: Some(value.to_string()),
    }
}

fn parse_seconds(value: &Value, field: &'static str) -> ConfigResult<Duration> {
    value
        .as_u64()
        .map(Duration::from_secs)
        .ok_or_else(|| invalid(field, "must be a non-negative integer of seconds", value))
}

fn parse_count(value: &Value, field: &'static str) -> ConfigResult<u32> {
    value
        .as_u64()
        .and_then(|count| u32::try_from(count).ok())
        .ok_or_else(|| invalid(field, "must be a non-negative 32-bit integer", value))
}

fn parse_strategy(value: &Value) -> ConfigResult<PasswordStrategy> {
    value
        .as_u64()
        .and_then(|raw| u8::try_from(raw).ok())
        .and_then(|raw| PasswordStrategy::try_from(raw).ok())
        .ok_or_else(|| invalid("pwd_strategy", "must be an integer between 0 and 3", value))
}

fn parse_string(value: &Value, field: &'static str) -> ConfigResult<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| invalid(field, "must be a string", value))
}

fn parse_ip_rules(value: &Value, field: &'static str) -> ConfigResult<Vec<String>> {
    let items = value
        .as_array()
        .ok_or_else(|| invalid(field, "must be an array of strings", value))?;
    items
        .iter()
        .map(|item| {
            let rule = item
                .as_str()
                .ok_or_else(|| invalid(field, "must be an array of strings", item))?;
            IpRule::parse(rule)
                .ok_or_else(|| invalid(field, "must be an IP address or CIDR", item))?;
            Ok(rule.trim().to_string())
        })
        .collect()
}

/// An IP address or CIDR range from the allow/deny lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpRule {
    network: IpAddr,
    prefix: u8,
}

impl IpRule {
    /// Parse `addr` or `addr/prefix`; returns `None` for malformed input.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        let (addr, prefix) = match value.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (value, None),
        };
        let network: IpAddr = addr.parse().ok()?;
        let max = if network.is_ipv4() { 32 } else { 128 };
        let prefix = match prefix {
            Some(prefix) => prefix.parse::<u8>().ok().filter(|prefix| *prefix <= max)?,
            None => max,
        };
        Some(Self { network, prefix })
    }

    /// Whether `ip` falls inside this rule.
    #[must_use]
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.network, ip) {
            (IpAddr::V4(network), IpAddr::V4(ip)) => {
                let mask = prefix_mask_u32(self.prefix);
                u32::from(network) & mask == u32::from(ip) & mask
            }
            (IpAddr::V6(network), IpAddr::V6(ip)) => {
                let mask = prefix_mask_u128(self.prefix);
                u128::from(network) & mask == u128::from(ip) & mask
            }
            _ => false,
        }
    }
}

fn prefix_mask_u32(prefix: u8) -> u32 {
    u32::MAX.checked_shl(32 - u32::from(prefix)).unwrap_or(0)
}

fn prefix_mask_u128(prefix: u8) -> u128 {
    u128::MAX.checked_shl(128 - u32::from(prefix)).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_patch_accepts_known_fields() {
        let patch = parse_patch(&json!({
            "office": "feishu",
            "login_ttl": 600,
            "pwd_strategy": 3,
            "ip_whitelist": ["10.0.0.0/8", " 192.168.1.4 "],
        }))
        .expect("patch should parse");

        assert_eq!(patch.office.as_deref(), Some("feishu"));
        assert_eq!(patch.login_ttl, Some(Duration::from_secs(600)));
        assert_eq!(
            patch.pwd_strategy,
            Some(PasswordStrategy::MixedCaseWithSymbols)
        );
        assert_eq!(
            patch.ip_whitelist,
            Some(vec!["10.0.0.0/8".to_string(), "192.168.1.4".to_string()])
        );
        assert!(patch.login_failures.is_none());
    }

    #[test]
    fn parse_patch_of_empty_object_is_empty() {
        assert!(parse_patch(&json!({})).expect("empty object").is_empty());
    }

    #[test]
    fn parse_patch_rejects_unknown_fields() {
        let err = parse_patch(&json!({ "office": "feishu", "colour": "blue" })).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownField { field } if field == "colour"));
    }

    #[test]
    fn parse_patch_rejects_wrong_shapes() {
        let cases = [
            (json!({ "login_ttl": "15m" }), "login_ttl"),
            (json!({ "login_failures": -1 }), "login_failures"),
            (json!({ "pwd_strategy": 4 }), "pwd_strategy"),
            (json!({ "office": null }), "office"),
            (json!({ "ip_blacklist": ["not-an-ip"] }), "ip_blacklist"),
            (json!({ "ip_blacklist": "10.0.0.1" }), "ip_blacklist"),
        ];
        for (input, expected) in cases {
            let err = parse_patch(&input).unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidField { field, .. } if field == expected),
                "unexpected error for {input}"
            );
        }
        assert!(matches!(
            parse_patch(&json!(["office"])),
            Err(ConfigError::PatchNotObject)
        ));
    }

    #[test]
    fn ip_rules_match_addresses_and_ranges() {
        let range = IpRule::parse("10.1.0.0/16").expect("cidr");
        assert!(range.contains("10.1.200.3".parse().expect("ip")));
        assert!(!range.contains("10.2.0.1".parse().expect("ip")));

        let single = IpRule::parse("192.168.1.4").expect("address");
        assert!(single.contains("192.168.1.4".parse().expect("ip")));
        assert!(!single.contains("192.168.1.5".parse().expect("ip")));

        let any = IpRule::parse("0.0.0.0/0").expect("catch-all");
        assert!(any.contains("8.8.8.8".parse().expect("ip")));

        let v6 = IpRule::parse("fd00::/8").expect("v6 cidr");
        assert!(v6.contains("fd12::1".parse().expect("ip")));
        assert!(!v6.contains("10.0.0.1".parse().expect("ip")));

        assert!(IpRule::parse("10.0.0.0/33").is_none());
        assert!(IpRule::parse("example.com").is_none());
    }
}
