//! Read-only policy views derived from the configuration record.
//!
//! # Design
//! - Views are built from an owned record copy, so a check never observes a
//!   half-applied update.
//! - IP rules are parsed once per view; stored entries that fail to parse are
//!   skipped with a warning instead of failing the whole view.
//! - Thresholds of zero disable the corresponding lockout or expiry.

use std::net::IpAddr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::warn;

use crate::model::{ConfigRecord, PasswordStrategy};
use crate::snapshot::SnapshotReader;
use crate::validate::IpRule;

/// Minimum length for any strategy stricter than [`PasswordStrategy::Unrestricted`].
pub const MIN_PASSWORD_LEN: usize = 8;

/// Outcome of checking a client address against the allow/deny lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpAccess {
    /// Address is on the deny-list.
    Denied,
    /// Address is on the allow-list and exempt from IP lockout.
    Trusted,
    /// Address is on neither list.
    Default,
}

/// Login and session rules for authentication collaborators.
#[derive(Debug, Clone)]
pub struct SessionPolicy {
    login_ttl: Duration,
    login_failures: u32,
    ip_login_failures: u32,
    allow: Vec<IpRule>,
    deny: Vec<IpRule>,
}

impl SessionPolicy {
    /// Build a view from the reader's current record, or the defaults.
    #[must_use]
    pub fn from_reader(reader: &SnapshotReader) -> Self {
        Self::from(&reader.record_or_default())
    }

    /// Lifetime of a newly issued session.
    #[must_use]
    pub const fn session_ttl(&self) -> Duration {
        self.login_ttl
    }

    /// Whether `failures` consecutive failed logins lock the account.
    #[must_use]
    pub const fn is_account_locked(&self, failures: u32) -> bool {
        self.login_failures != 0 && failures >= self.login_failures
    }

    /// Whether `failures` failed logins from `ip` lock that address out.
    ///
    /// Trusted addresses are never locked; denied addresses always are.
    #[must_use]
    pub fn is_ip_locked(&self, ip: IpAddr, failures: u32) -> bool {
        match self.ip_access(ip) {
            IpAccess::Denied => true,
            IpAccess::Trusted => false,
            IpAccess::Default => self.ip_login_failures != 0 && failures >= self.ip_login_failures,
        }
    }

    /// Classify `ip` against the deny-list first, then the allow-list.
    #[must_use]
    pub fn ip_access(&self, ip: IpAddr) -> IpAccess {
        if self.deny.iter().any(|rule| rule.contains(ip)) {
            IpAccess::Denied
        } else if self.allow.iter().any(|rule| rule.contains(ip)) {
            IpAccess::Trusted
        } else {
            IpAccess::Default
        }
    }
}

impl From<&ConfigRecord> for SessionPolicy {
    fn from(record: &ConfigRecord) -> Self {
        Self {
            login_ttl: record.login_ttl,
            login_failures: record.login_failures,
            ip_login_failures: record.ip_login_failures,
            allow: parse_rules("ip_whitelist", &record.ip_whitelist),
            deny: parse_rules("ip_blacklist", &record.ip_blacklist),
        }
    }
}

fn parse_rules(list: &'static str, entries: &[String]) -> Vec<IpRule> {
    entries
        .iter()
        .filter_map(|entry| {
            let rule = IpRule::parse(entry);
            if rule.is_none() {
                warn!(list, entry = %entry, "ignoring malformed IP rule");
            }
            rule
        })
        .collect()
}

/// Reasons a candidate password is refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PasswordViolation {
    /// Password was empty.
    #[error("password is empty")]
    Empty,
    /// Password was shorter than the minimum.
    #[error("password is too short")]
    TooShort {
        /// Required minimum length in characters.
        min: usize,
    },
    /// No letter present.
    #[error("password must contain a letter")]
    MissingLetter,
    /// No digit present.
    #[error("password must contain a digit")]
    MissingDigit,
    /// No upper-case letter present.
    #[error("password must contain an upper-case letter")]
    MissingUppercase,
    /// No lower-case letter present.
    #[error("password must contain a lower-case letter")]
    MissingLowercase,
    /// No symbol present.
    #[error("password must contain a symbol")]
    MissingSymbol,
}

/// Password strength and rotation rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordPolicy {
    strategy: PasswordStrategy,
    ttl: Duration,
}

impl PasswordPolicy {
    /// Build a view from the reader's current record, or the defaults.
    #[must_use]
    pub fn from_reader(reader: &SnapshotReader) -> Self {
        Self::from(&reader.record_or_default())
    }

    /// Active strength requirement.
    #[must_use]
    pub const fn strategy(&self) -> PasswordStrategy {
        self.strategy
    }

    /// Check `candidate` against the active strategy.
    ///
    /// # Errors
    ///
    /// Returns the first [`PasswordViolation`] found.
    pub fn check(&self, candidate: &str) -> Result<(), PasswordViolation> {
        if candidate.is_empty() {
            return Err(PasswordViolation::Empty);
        }
        if self.strategy == PasswordStrategy::Unrestricted {
            return Ok(());
        }
        if candidate.chars().count() < MIN_PASSWORD_LEN {
            return Err(PasswordViolation::TooShort {
                min: MIN_PASSWORD_LEN,
            });
        }
        if !candidate.chars().any(char::is_numeric) {
            return Err(PasswordViolation::MissingDigit);
        }
        match self.strategy {
            PasswordStrategy::Unrestricted => Ok(()),
            PasswordStrategy::LettersAndDigits => {
                if candidate.chars().any(char::is_alphabetic) {
                    Ok(())
                } else {
                    Err(PasswordViolation::MissingLetter)
                }
            }
            PasswordStrategy::MixedCase => check_case(candidate),
            PasswordStrategy::MixedCaseWithSymbols => {
                check_case(candidate)?;
                if candidate.chars().any(|c| !c.is_alphanumeric()) {
                    Ok(())
                } else {
                    Err(PasswordViolation::MissingSymbol)
                }
            }
        }
    }

    /// When a password changed at `changed_at` expires, or `None` if expiry is
    /// disabled.
    #[must_use]
    pub fn expires_at(&self, changed_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.ttl.is_zero() {
            return None;
        }
        let ttl = chrono::Duration::from_std(self.ttl).ok()?;
        changed_at.checked_add_signed(ttl)
    }

    /// Whether a password changed at `changed_at` has expired by `now`.
    #[must_use]
    pub fn is_expired(&self, changed_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        self.expires_at(changed_at)
            .is_some_and(|expires_at| now >= expires_at)
    }
}

impl From<&ConfigRecord> for PasswordPolicy {
    fn from(record: &ConfigRecord) -> Self {
        Self {
            strategy: record.pwd_strategy,
            ttl: record.pwd_ttl,
        }
    }
}

fn check_case(candidate: &str) -> Result<(), PasswordViolation> {
    if !candidate.chars().any(char::is_uppercase) {
        return Err(PasswordViolation::MissingUppercase);
    }
    if !candidate.chars().any(char::is_lowercase) {
        return Err(PasswordViolation::MissingLowercase);
    }
    Ok(())
}
