//! Watch session that streams decoded records to a consumer.
//!
//! # Design
//! - Two bounded channels of capacity one carry updates and decode failures.
//! - Each delivery is a rendezvous: the session reserves a slot, sends, then
//!   reserves the full capacity again, which only succeeds once the consumer
//!   has taken the value. The next store entry is not read before that, so
//!   at most one delivery is ever outstanding and both channels share a
//!   single order.
//! - Dropping both receivers cancels the session; dropping one discards the
//!   deliveries meant for it.

use std::fmt;
use std::panic;

use keystone_kv::{Entry, KeyValueStore, KvError, Revision, WatchStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::codec;
use crate::error::{ConfigError, ConfigResult, DecodeError};
use crate::model::{ConfigRecord, StoreLocation};
use crate::snapshot::{Snapshot, SnapshotCell};

/// Why a session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The subscription could not be established or broke mid-stream.
    StoreUnavailable,
    /// The consumer went away or the task was aborted.
    Cancelled,
}

/// Lifecycle of a sync session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Not yet subscribed.
    Idle,
    /// Subscribing to the store.
    Subscribing,
    /// Waiting for or delivering decoded records.
    Streaming,
    /// Delivering a decode failure.
    DeliveringError,
    /// Terminal state.
    Closed(CloseReason),
}

impl SessionState {
    /// Label for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Subscribing => "subscribing",
            Self::Streaming => "streaming",
            Self::DeliveringError => "delivering_error",
            Self::Closed(CloseReason::StoreUnavailable) => "closed_store_unavailable",
            Self::Closed(CloseReason::Cancelled) => "closed_cancelled",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Engine-side ends of the update and error channels.
#[derive(Debug, Clone)]
pub struct SyncSink {
    updated: mpsc::Sender<ConfigRecord>,
    errors: mpsc::Sender<DecodeError>,
}

impl SyncSink {
    /// Create a sink and its receiver with single-slot channels.
    #[must_use]
    pub fn channel() -> (Self, SyncReceiver) {
        let (updated_tx, updated_rx) = mpsc::channel(1);
        let (errors_tx, errors_rx) = mpsc::channel(1);
        (
            Self::new(updated_tx, errors_tx),
            SyncReceiver {
                updated: updated_rx,
                errors: errors_rx,
            },
        )
    }

    /// Wrap caller-supplied senders.
    #[must_use]
    pub const fn new(
        updated: mpsc::Sender<ConfigRecord>,
        errors: mpsc::Sender<DecodeError>,
    ) -> Self {
        Self { updated, errors }
    }

    /// Whether both receivers have been dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.updated.is_closed() && self.errors.is_closed()
    }

    /// Resolves once both receivers have been dropped.
    pub async fn closed(&self) {
        tokio::join!(self.updated.closed(), self.errors.closed());
    }
}

/// A single delivery observed by a consumer.
#[derive(Debug)]
pub enum SyncEvent {
    /// A newly decoded record.
    Updated(ConfigRecord),
    /// A stored value that failed to decode.
    Failed(DecodeError),
}

/// Consumer-side ends of the update and error channels.
#[derive(Debug)]
pub struct SyncReceiver {
    /// Decoded records, in revision order.
    pub updated: mpsc::Receiver<ConfigRecord>,
    /// Decode failures, in revision order.
    pub errors: mpsc::Receiver<DecodeError>,
}

impl SyncReceiver {
    /// Wait for the next delivery on either channel.
    ///
    /// Returns `None` once the session has stopped and both channels are
    /// drained.
    pub async fn recv(&mut self) -> Option<SyncEvent> {
        tokio::select! {
            Some(record) = self.updated.recv() => Some(SyncEvent::Updated(record)),
            Some(error) = self.errors.recv() => Some(SyncEvent::Failed(error)),
            else => None,
        }
    }
}

/// A watch of one record feeding a sink.
#[derive(Debug)]
pub struct SyncSession {
    stream: Option<WatchStream>,
    sink: SyncSink,
    snapshot: SnapshotCell,
    location: StoreLocation,
    state: SessionState,
    cursor: Option<Revision>,
}

impl SyncSession {
    pub(crate) const fn new(
        sink: SyncSink,
        snapshot: SnapshotCell,
        location: StoreLocation,
    ) -> Self {
        Self {
            stream: None,
            sink,
            snapshot,
            location,
            state: SessionState::Idle,
            cursor: None,
        }
    }

    /// Open the store watch, moving from `Idle` to `Streaming`.
    ///
    /// On failure the session is `Closed(StoreUnavailable)` and nothing has
    /// been delivered.
    pub(crate) async fn subscribe(&mut self, store: &dyn KeyValueStore) -> ConfigResult<()> {
        self.transition(SessionState::Subscribing);
        match store.watch(&self.location.bucket, &self.location.key).await {
            Ok(stream) => {
                info!(location = %self.location, "configuration watch established");
                self.attach(stream);
                Ok(())
            }
            Err(source) => Err(self.fail(source)),
        }
    }

    fn attach(&mut self, stream: WatchStream) {
        self.stream = Some(stream);
        self.transition(SessionState::Streaming);
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Revision of the last entry handed to the consumer.
    #[must_use]
    pub const fn last_revision(&self) -> Option<Revision> {
        self.cursor
    }

    /// Location being watched.
    #[must_use]
    pub const fn location(&self) -> &StoreLocation {
        &self.location
    }

    /// Deliver entries until the store fails or the consumer goes away.
    ///
    /// Cancellation by the consumer returns `Ok(())`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::StoreUnavailable`] when the subscription breaks
    /// or was never established.
    pub async fn run(&mut self) -> ConfigResult<()> {
        loop {
            if matches!(self.state, SessionState::Closed(_)) {
                return Ok(());
            }
            let Some(stream) = self.stream.as_mut() else {
                let source = KvError::WatchClosed {
                    bucket: self.location.bucket.clone(),
                };
                return Err(self.fail(source));
            };
            let next = tokio::select! {
                biased;
                () = self.sink.closed() => None,
                next = stream.next() => Some(next),
            };
            let Some(next) = next else {
                self.transition(SessionState::Closed(CloseReason::Cancelled));
                return Ok(());
            };
            let entry = match next {
                Some(Ok(entry)) => entry,
                Some(Err(source)) => return Err(self.fail(source)),
                None => {
                    let source = KvError::WatchClosed {
                        bucket: self.location.bucket.clone(),
                    };
                    return Err(self.fail(source));
                }
            };
            if !self.deliver(entry).await {
                self.transition(SessionState::Closed(CloseReason::Cancelled));
                return Ok(());
            }
        }
    }

    /// Returns `false` once nobody is listening any more.
    async fn deliver(&mut self, entry: Entry) -> bool {
        if self.cursor.is_some_and(|cursor| entry.revision <= cursor) {
            debug!(revision = entry.revision, "skipping already delivered revision");
            return true;
        }
        self.cursor = Some(entry.revision);
        let payload: &[u8] = if entry.is_delete() { &[] } else { &entry.value };
        match codec::decode(payload) {
            Ok(record) => {
                self.snapshot.replace(Snapshot {
                    revision: entry.revision,
                    record: record.clone(),
                });
                debug!(
                    location = %self.location,
                    revision = entry.revision,
                    "delivering configuration update"
                );
                handoff(&self.sink.updated, record).await || !self.sink.is_closed()
            }
            Err(error) => {
                self.transition(SessionState::DeliveringError);
                warn!(
                    location = %self.location,
                    revision = entry.revision,
                    operation = entry.operation.as_str(),
                    error = %error.source,
                    "configuration entry failed to decode"
                );
                let delivered = handoff(&self.sink.errors, error.at_revision(entry.revision))
                    .await
                    || !self.sink.is_closed();
                if delivered {
                    self.transition(SessionState::Streaming);
                }
                delivered
            }
        }
    }

    fn fail(&mut self, source: KvError) -> ConfigError {
        warn!(location = %self.location, error = %source, "configuration watch failed");
        self.transition(SessionState::Closed(CloseReason::StoreUnavailable));
        ConfigError::store("config.sync", source)
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            debug!(
                location = %self.location,
                from = %self.state,
                to = %next,
                "sync session state change"
            );
            self.state = next;
        }
    }
}

/// Send `value` and wait until the receiver has taken it.
///
/// Returns `false` if the receiver is gone.
async fn handoff<T>(sender: &mpsc::Sender<T>, value: T) -> bool {
    let Ok(permit) = sender.reserve().await else {
        return false;
    };
    permit.send(value);
    // Full capacity is only free again after the consumer received the value.
    sender.reserve_many(sender.max_capacity()).await.is_ok()
}

/// Handle to a session driven on a background task.
#[derive(Debug)]
pub struct SyncTask {
    handle: JoinHandle<ConfigResult<()>>,
}

impl SyncTask {
    pub(crate) fn spawn(mut session: SyncSession) -> Self {
        let handle = tokio::spawn(async move {
            let result = session.run().await;
            info!(
                location = %session.location(),
                state = %session.state(),
                "sync session finished"
            );
            result
        });
        Self { handle }
    }

    /// Stop the session at its next await point.
    pub fn abort(&self) {
        self.handle.abort();
    }

    /// Whether the session has stopped.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the session to stop.
    ///
    /// An aborted session resolves to `Ok(())`.
    ///
    /// # Errors
    ///
    /// Returns the session's [`ConfigError::StoreUnavailable`] failure.
    ///
    /// # Panics
    ///
    /// Re-raises a panic from the session task.
    pub async fn join(self) -> ConfigResult<()> {
        match self.handle.await {
            Ok(result) => result,
            Err(error) if error.is_cancelled() => Ok(()),
            Err(error) => panic::resume_unwind(error.into_panic()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defaults::DEFAULTS;
    use keystone_kv::{KvResult, MemoryStore, Operation, Revision};
    use std::time::Duration;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);

    fn entry(revision: Revision, value: &[u8], operation: Operation) -> KvResult<Entry> {
        Ok(Entry {
            bucket: "dev".into(),
            key: "values".into(),
            value: value.to_vec(),
            revision,
            operation,
        })
    }

    fn session() -> (
        mpsc::UnboundedSender<KvResult<Entry>>,
        SyncSession,
        SyncReceiver,
        SnapshotCell,
    ) {
        let (feed, stream) = WatchStream::channel();
        let (sink, receiver) = SyncSink::channel();
        let cell = SnapshotCell::new();
        let mut session = SyncSession::new(sink, cell.clone(), StoreLocation::default());
        session.attach(stream);
        (feed, session, receiver, cell)
    }

    async fn next_event(receiver: &mut SyncReceiver) -> SyncEvent {
        timeout(WAIT, receiver.recv())
            .await
            .expect("delivery timed out")
            .expect("session ended early")
    }

    #[tokio::test]
    async fn updates_and_failures_share_one_order() {
        let (feed, session, mut receiver, cell) = session();
        feed.send(entry(1, br#"{"office":"a"}"#, Operation::Put)).expect("feed");
        feed.send(entry(2, b"abc", Operation::Put)).expect("feed");
        feed.send(entry(3, br#"{"office":"c"}"#, Operation::Put)).expect("feed");
        feed.send(entry(4, b"", Operation::Delete)).expect("feed");
        let task = SyncTask::spawn(session);

        let SyncEvent::Updated(first) = next_event(&mut receiver).await else {
            panic!("expected update");
        };
        assert_eq!(first.office, "a");
        let SyncEvent::Failed(error) = next_event(&mut receiver).await else {
            panic!("expected failure");
        };
        assert_eq!(error.revision, Some(2));
        let SyncEvent::Updated(third) = next_event(&mut receiver).await else {
            panic!("expected update");
        };
        assert_eq!(third.office, "c");
        let SyncEvent::Failed(deleted) = next_event(&mut receiver).await else {
            panic!("expected failure for delete marker");
        };
        assert_eq!(deleted.revision, Some(4));

        let cached = cell.current().expect("cached snapshot");
        assert_eq!(cached.revision, 3);
        assert_eq!(cached.record.office, "c");

        drop(receiver);
        timeout(WAIT, task.join())
            .await
            .expect("session did not stop")
            .expect("cancellation is not an error");
    }

    #[tokio::test]
    async fn next_entry_waits_for_acceptance() {
        let (feed, session, mut receiver, cell) = session();
        feed.send(entry(1, br#"{"office":"a"}"#, Operation::Put)).expect("feed");
        feed.send(entry(2, br#"{"office":"b"}"#, Operation::Put)).expect("feed");
        let _task = SyncTask::spawn(session);

        // The first record sits in the channel; the second must not be read yet.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(cell.current().map(|snapshot| snapshot.revision), Some(1));

        let first = timeout(WAIT, receiver.updated.recv()).await.expect("first");
        assert_eq!(first.map(|record| record.office), Some("a".to_string()));
        let second = timeout(WAIT, receiver.updated.recv()).await.expect("second");
        assert_eq!(second.map(|record| record.office), Some("b".to_string()));
        assert_eq!(cell.current().map(|snapshot| snapshot.revision), Some(2));
    }

    #[tokio::test]
    async fn broken_watch_closes_with_store_unavailable() {
        let (feed, mut session, mut receiver, _cell) = session();
        feed.send(entry(1, b"{}", Operation::Put)).expect("feed");
        feed.send(Err(KvError::BucketDeleted {
            bucket: "dev".into(),
        }))
        .expect("feed");

        let consumer = tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(event) = receiver.recv().await {
                seen.push(event);
            }
            seen
        });

        let result = timeout(WAIT, session.run()).await.expect("session hung");
        assert!(matches!(
            result,
            Err(ConfigError::StoreUnavailable {
                source: KvError::BucketDeleted { .. },
                ..
            })
        ));
        assert_eq!(
            session.state(),
            SessionState::Closed(CloseReason::StoreUnavailable)
        );
        drop(session);

        let seen = timeout(WAIT, consumer).await.expect("consumer hung").expect("join");
        assert_eq!(seen.len(), 1);
        assert!(matches!(&seen[0], SyncEvent::Updated(record) if *record == DEFAULTS));
    }

    #[tokio::test]
    async fn ended_watch_is_store_unavailable() {
        let (feed, mut session, _receiver, _cell) = session();
        drop(feed);
        let result = timeout(WAIT, session.run()).await.expect("session hung");
        assert!(matches!(
            result,
            Err(ConfigError::StoreUnavailable {
                source: KvError::WatchClosed { .. },
                ..
            })
        ));
    }

    #[tokio::test]
    async fn dropping_receivers_cancels_idle_session() {
        let (_feed, mut session, receiver, _cell) = session();
        drop(receiver);
        timeout(WAIT, session.run())
            .await
            .expect("session hung")
            .expect("cancellation is not an error");
        assert_eq!(session.state(), SessionState::Closed(CloseReason::Cancelled));
    }

    #[tokio::test]
    async fn dropped_error_receiver_discards_failures_only() {
        let (feed, session, receiver, _cell) = session();
        let SyncReceiver {
            mut updated,
            errors,
        } = receiver;
        drop(errors);
        feed.send(entry(1, b"abc", Operation::Put)).expect("feed");
        feed.send(entry(2, br#"{"office":"b"}"#, Operation::Put)).expect("feed");
        let _task = SyncTask::spawn(session);

        let record = timeout(WAIT, updated.recv()).await.expect("update");
        assert_eq!(record.map(|record| record.office), Some("b".to_string()));
    }

    #[tokio::test]
    async fn aborted_task_joins_cleanly() {
        let (_feed, session, _receiver, _cell) = session();
        let task = SyncTask::spawn(session);
        task.abort();
        timeout(WAIT, task.join())
            .await
            .expect("join hung")
            .expect("abort is not an error");
    }

    #[test]
    fn state_labels_are_stable() {
        assert_eq!(SessionState::Idle.to_string(), "idle");
        assert_eq!(
            SessionState::Closed(CloseReason::Cancelled).to_string(),
            "closed_cancelled"
        );
    }

    #[tokio::test]
    async fn subscribe_moves_idle_session_to_streaming() {
        let store = MemoryStore::new();
        store.ensure_bucket("dev");
        let (sink, _receiver) = SyncSink::channel();
        let mut session = SyncSession::new(sink, SnapshotCell::new(), StoreLocation::default());
        assert_eq!(session.state(), SessionState::Idle);

        session.subscribe(&store).await.expect("watch established");
        assert_eq!(session.state(), SessionState::Streaming);
        assert_eq!(store.watcher_count("dev"), 1);
    }

    #[tokio::test]
    async fn failed_subscribe_closes_session() {
        let store = MemoryStore::new();
        let (sink, mut receiver) = SyncSink::channel();
        let mut session = SyncSession::new(sink, SnapshotCell::new(), StoreLocation::default());

        let err = session.subscribe(&store).await.unwrap_err();
        assert!(matches!(
            err,
            ConfigError::StoreUnavailable {
                source: KvError::BucketNotFound { .. },
                ..
            }
        ));
        assert_eq!(
            session.state(),
            SessionState::Closed(CloseReason::StoreUnavailable)
        );

        // A closed session neither runs nor delivers.
        session.run().await.expect("closed session returns at once");
        drop(session);
        assert!(receiver.recv().await.is_none());
    }

    #[tokio::test]
    async fn unsubscribed_session_reports_store_unavailable() {
        let (sink, _receiver) = SyncSink::channel();
        let mut session = SyncSession::new(sink, SnapshotCell::new(), StoreLocation::default());
        let result = session.run().await;
        assert!(matches!(
            result,
            Err(ConfigError::StoreUnavailable {
                source: KvError::WatchClosed { .. },
                ..
            })
        ));
    }
}
