//! Bounded receives on sync channels.
//!
//! Every helper fails after [`RECV_TIMEOUT`] instead of hanging a test.

use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use keystone_config::{ConfigRecord, DecodeError, SyncEvent, SyncReceiver};
use tokio::time::timeout;

/// Upper bound on how long a helper waits for a delivery.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// Wait for the next delivery on either channel.
///
/// # Errors
///
/// Returns an error on timeout or when both channels are closed.
pub async fn next_event(receiver: &mut SyncReceiver) -> Result<SyncEvent> {
    timeout(RECV_TIMEOUT, receiver.recv())
        .await
        .map_err(|_| anyhow!("no sync delivery within {RECV_TIMEOUT:?}"))?
        .ok_or_else(|| anyhow!("sync channels closed"))
}

/// Wait for the next delivery and require it to be an update.
///
/// # Errors
///
/// Returns an error on timeout, closed channels, or a decode failure.
pub async fn next_update(receiver: &mut SyncReceiver) -> Result<ConfigRecord> {
    match next_event(receiver).await? {
        SyncEvent::Updated(record) => Ok(record),
        SyncEvent::Failed(error) => bail!("expected an update, got decode failure: {error}"),
    }
}

/// Wait for the next delivery and require it to be a decode failure.
///
/// # Errors
///
/// Returns an error on timeout, closed channels, or an update.
pub async fn next_decode_error(receiver: &mut SyncReceiver) -> Result<DecodeError> {
    match next_event(receiver).await? {
        SyncEvent::Failed(error) => Ok(error),
        SyncEvent::Updated(record) => bail!("expected a decode failure, got update: {record:?}"),
    }
}

/// Require that nothing is delivered for `window`.
///
/// # Errors
///
/// Returns an error if a delivery arrives.
pub async fn assert_quiet(receiver: &mut SyncReceiver, window: Duration) -> Result<()> {
    match timeout(window, receiver.recv()).await {
        Err(_) | Ok(None) => Ok(()),
        Ok(Some(event)) => bail!("unexpected sync delivery: {event:?}"),
    }
}
