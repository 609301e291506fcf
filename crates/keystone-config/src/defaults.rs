//! Default values and store coordinates for the configuration record.
//!
//! # Design
//! - Keep every default in one `const` so decode, bootstrap, and tests agree.
//! - The record lives under a single key; it is never split per field.

use std::time::Duration;

use crate::model::{ConfigRecord, PasswordStrategy};

/// Bucket used when the deployment does not name one.
pub const DEFAULT_BUCKET: &str = "dev";
/// Key holding the whole configuration record.
pub const DEFAULT_KEY: &str = "values";

const MINUTE: u64 = 60;
const DAY: u64 = 24 * 60 * MINUTE;

/// Defaults applied to every field missing from a stored record.
pub const DEFAULTS: ConfigRecord = ConfigRecord {
    login_ttl: Duration::from_secs(15 * MINUTE),
    login_failures: 5,
    ip_login_failures: 10,
    ip_whitelist: Vec::new(),
    ip_blacklist: Vec::new(),
    pwd_strategy: PasswordStrategy::LettersAndDigits,
    pwd_ttl: Duration::from_secs(365 * DAY),
    office: String::new(),
};
