//! Typed configuration record and partial updates.
//!
//! # Design
//! - `ConfigRecord` is the only shape ever written to the store.
//! - `PatchSet` carries one optional slot per record field; untyped input is
//!   converted in `validate.rs`, never here.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::defaults::{DEFAULT_BUCKET, DEFAULT_KEY, DEFAULTS};
use crate::error::UnknownStrategy;

/// Runtime-tunable settings shared by every service in a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigRecord {
    /// Lifetime of an authenticated session.
    #[serde(with = "duration_secs")]
    pub login_ttl: Duration,
    /// Consecutive failed logins tolerated before an account is locked.
    pub login_failures: u32,
    /// Failed logins tolerated from a single IP address.
    pub ip_login_failures: u32,
    /// Addresses or CIDR ranges exempt from IP lockout.
    pub ip_whitelist: Vec<String>,
    /// Addresses or CIDR ranges refused outright.
    pub ip_blacklist: Vec<String>,
    /// Password strength requirement.
    pub pwd_strategy: PasswordStrategy,
    /// Maximum password age; zero disables expiry.
    #[serde(with = "duration_secs")]
    pub pwd_ttl: Duration,
    /// Organisational integration identifier (for example `feishu`).
    pub office: String,
}

impl Default for ConfigRecord {
    fn default() -> Self {
        DEFAULTS
    }
}

/// Password strength levels, stored as small integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum PasswordStrategy {
    /// Any non-empty password.
    Unrestricted,
    /// Letters and digits.
    LettersAndDigits,
    /// Upper case, lower case, and digits.
    MixedCase,
    /// Upper case, lower case, digits, and symbols.
    MixedCaseWithSymbols,
}

impl PasswordStrategy {
    /// Wire value of the strategy.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Unrestricted => 0,
            Self::LettersAndDigits => 1,
            Self::MixedCase => 2,
            Self::MixedCaseWithSymbols => 3,
        }
    }
}

impl TryFrom<u8> for PasswordStrategy {
    type Error = UnknownStrategy;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Unrestricted),
            1 => Ok(Self::LettersAndDigits),
            2 => Ok(Self::MixedCase),
            3 => Ok(Self::MixedCaseWithSymbols),
            value => Err(UnknownStrategy { value }),
        }
    }
}

impl From<PasswordStrategy> for u8 {
    fn from(strategy: PasswordStrategy) -> Self {
        strategy.as_u8()
    }
}

/// Partial update applied by `SyncService::set`.
///
/// Fields left as `None` keep their stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchSet {
    /// New session lifetime.
    pub login_ttl: Option<Duration>,
    /// New account lockout threshold.
    pub login_failures: Option<u32>,
    /// New per-IP lockout threshold.
    pub ip_login_failures: Option<u32>,
    /// New IP allow-list.
    pub ip_whitelist: Option<Vec<String>>,
    /// New IP deny-list.
    pub ip_blacklist: Option<Vec<String>>,
    /// New password strength requirement.
    pub pwd_strategy: Option<PasswordStrategy>,
    /// New maximum password age.
    pub pwd_ttl: Option<Duration>,
    /// New integration identifier.
    pub office: Option<String>,
}

impl PatchSet {
    /// Wire names of every patchable field, in record order.
    pub const FIELDS: [&'static str; 8] = [
        "login_ttl",
        "login_failures",
        "ip_login_failures",
        "ip_whitelist",
        "ip_blacklist",
        "pwd_strategy",
        "pwd_ttl",
        "office",
    ];

    /// Whether the patch names no field at all.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.login_ttl.is_none()
            && self.login_failures.is_none()
            && self.ip_login_failures.is_none()
            && self.ip_whitelist.is_none()
            && self.ip_blacklist.is_none()
            && self.pwd_strategy.is_none()
            && self.pwd_ttl.is_none()
            && self.office.is_none()
    }

    /// Wire names of the fields this patch sets.
    #[must_use]
    pub fn field_names(&self) -> Vec<&'static str> {
        let present = [
            self.login_ttl.is_some(),
            self.login_failures.is_some(),
            self.ip_login_failures.is_some(),
            self.ip_whitelist.is_some(),
            self.ip_blacklist.is_some(),
            self.pwd_strategy.is_some(),
            self.pwd_ttl.is_some(),
            self.office.is_some(),
        ];
        Self::FIELDS
            .iter()
            .zip(present)
            .filter_map(|(name, set)| set.then_some(*name))
            .collect()
    }
}

/// Bucket and key that hold the configuration record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLocation {
    /// Bucket for the deployment environment.
    pub bucket: String,
    /// Key holding the record.
    pub key: String,
}

impl StoreLocation {
    /// Build a location from explicit names.
    #[must_use]
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl Default for StoreLocation {
    fn default() -> Self {
        Self::new(DEFAULT_BUCKET, DEFAULT_KEY)
    }
}

impl fmt::Display for StoreLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// Durations travel as whole seconds.
mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(value.as_secs())
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
