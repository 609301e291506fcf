//! Wire codec for the configuration record.
//!
//! The stored blob is a JSON object keyed by field name. Missing fields take
//! their defaults and unknown fields are ignored; anything that is not an
//! object, or carries a field of the wrong type, is malformed.

use serde_json::{Map, Value};

use crate::error::{ConfigError, ConfigResult, DecodeError};
use crate::model::{ConfigRecord, PatchSet};

/// Decode a stored blob into a fully-defaulted record.
///
/// # Errors
///
/// Returns [`DecodeError`] if `bytes` is not a JSON object or any known field
/// has the wrong type.
pub fn decode(bytes: &[u8]) -> Result<ConfigRecord, DecodeError> {
    // Parsing into a map first keeps array payloads from matching the record
    // positionally.
    let fields: Map<String, Value> = serde_json::from_slice(bytes)?;
    let record = serde_json::from_value(Value::Object(fields))?;
    Ok(record)
}

/// Serialise a record into its canonical blob.
///
/// # Errors
///
/// Returns [`ConfigError::Encode`] if serialisation fails.
pub fn encode(record: &ConfigRecord) -> ConfigResult<Vec<u8>> {
    serde_json::to_vec(record).map_err(|source| ConfigError::Encode { source })
}

/// Apply `patch` on top of `current`, keeping every field the patch leaves unset.
#[must_use]
pub fn merge(current: &ConfigRecord, patch: &PatchSet) -> ConfigRecord {
    let mut merged = current.clone();
    if let Some(login_ttl) = patch.login_ttl {
        merged.login_ttl = login_ttl;
    }
    if let Some(login_failures) = patch.login_failures {
        merged.login_failures = login_failures;
    }
    if let Some(ip_login_failures) = patch.ip_login_failures {
        merged.ip_login_failures = ip_login_failures;
    }
    if let Some(ip_whitelist) = &patch.ip_whitelist {
        merged.ip_whitelist.clone_from(ip_whitelist);
    }
    if let Some(ip_blacklist) = &patch.ip_blacklist {
        merged.ip_blacklist.clone_from(ip_blacklist);
    }
    if let Some(pwd_strategy) = patch.pwd_strategy {
        merged.pwd_strategy = pwd_strategy;
    }
    if let Some(pwd_ttl) = patch.pwd_ttl {
        merged.pwd_ttl = pwd_ttl;
    }
    if let Some(office) = &patch.office {
        merged.office.clone_from(office);
    }
    merged
}
