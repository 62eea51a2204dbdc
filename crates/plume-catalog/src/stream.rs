//! Merged live read streams across many open feeds.
//!
//! A [`RecordStream`] lazily merges records drawn from every currently-open
//! feed matching a predicate, and absorbs feeds that become available while
//! the stream is alive. It is a live, unbounded sequence across moving
//! membership — not a static snapshot.
//!
//! Each member feed gets a pump task that drains existing records and then
//! follows append events. Pumps and the membership watcher all shut down
//! when the stream is dropped: their sends fail and the catalog event
//! subscription is released.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use tokio::sync::{broadcast, mpsc};

use plume_core::keys::PublicKey;
use plume_core::resource::{LogEvent, LogResource};

use crate::descriptor::FeedDescriptor;

/// Options for a merged read stream.
#[derive(Debug, Clone, Copy)]
pub struct ReadStreamOptions {
    /// The sequence number each member feed starts reading from.
    pub start: u64,
    /// Whether to follow appends after draining existing records.
    ///
    /// A non-live pump stops at the length observed when its feed joined
    /// the stream; new feeds are still absorbed either way.
    pub live: bool,
}

impl Default for ReadStreamOptions {
    fn default() -> Self {
        Self {
            start: 0,
            live: true,
        }
    }
}

/// One record yielded by a merged read stream.
#[derive(Debug, Clone)]
pub struct StreamRecord {
    /// The path of the feed the record came from.
    pub path: String,
    /// The public identity of the feed the record came from.
    pub key: PublicKey,
    /// The record's sequence number within its feed.
    pub seq: u64,
    /// The record payload.
    pub data: Bytes,
}

/// A lazily-merged sequence of records across open feeds.
///
/// Ends only when dropped; feed membership can grow while it is alive.
pub struct RecordStream {
    rx: mpsc::Receiver<StreamRecord>,
}

impl RecordStream {
    pub(crate) fn new(rx: mpsc::Receiver<StreamRecord>) -> Self {
        Self { rx }
    }
}

impl Stream for RecordStream {
    type Item = StreamRecord;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl std::fmt::Debug for RecordStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStream").finish_non_exhaustive()
    }
}

/// Spawns the pump task for one member feed.
///
/// The pump drains records from `options.start`, then (when live) follows
/// append events. It exits as soon as the stream side of `tx` is dropped.
pub(crate) fn spawn_feed_pump(
    tx: mpsc::Sender<StreamRecord>,
    descriptor: FeedDescriptor,
    handle: std::sync::Arc<dyn LogResource>,
    options: ReadStreamOptions,
) {
    tokio::spawn(async move {
        // Subscribe before the initial drain so appends raised while
        // draining are not missed.
        let mut events = handle.subscribe();
        let mut seq = options.start;
        let mut target = handle.len();

        loop {
            while seq < target {
                let data = match handle.get(seq).await {
                    Ok(data) => data,
                    Err(_) => return,
                };
                let record = StreamRecord {
                    path: descriptor.path().to_string(),
                    key: descriptor.key(),
                    seq,
                    data,
                };
                if tx.send(record).await.is_err() {
                    return;
                }
                seq += 1;
            }

            if !options.live {
                return;
            }

            tokio::select! {
                () = tx.closed() => return,
                event = events.recv() => match event {
                    Ok(LogEvent::Append { length }) => target = target.max(length),
                    Ok(LogEvent::Download { .. }) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => target = handle.len(),
                    Err(broadcast::error::RecvError::Closed) => return,
                },
            }
        }
    });
}
