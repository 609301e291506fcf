//! Stream of entries produced by a key watch.

use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::mpsc;
use tokio_stream::Stream;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::error::KvResult;
use crate::model::Entry;

/// Live feed of a key's values.
///
/// Yields `Ok(entry)` for the replayed current value and every later write.
/// A terminal `Err` is yielded when the subscription breaks; the stream ends
/// after it. Dropping the stream unsubscribes.
pub struct WatchStream {
    inner: UnboundedReceiverStream<KvResult<Entry>>,
}

impl WatchStream {
    /// Create a watch stream and the sender a backend uses to feed it.
    #[must_use]
    pub fn channel() -> (mpsc::UnboundedSender<KvResult<Entry>>, Self) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let stream = Self {
            inner: UnboundedReceiverStream::new(receiver),
        };
        (sender, stream)
    }
}

impl Stream for WatchStream {
    type Item = KvResult<Entry>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl std::fmt::Debug for WatchStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchStream").finish_non_exhaustive()
    }
}
