//! Pending request/subscribe stream registry with timeout enforcement.
//!
//! Every `send_and_request` / `send_and_subscribe` registers a [`Stream`]
//! under its sid. The registry is the sole mutator: it resolves a stream on
//! matching replies, fails it on alarms, expires it on timeout, and removes
//! it on explicit cancel. Exactly one of {resolve, timeout, alarm, cancel}
//! wins: terminal paths race on the atomic map removal (whichever path
//! removes the entry first governs the outcome), and a per-stream `done`
//! flag keeps in-flight non-terminal callbacks from firing after a terminal
//! event.
//!
//! Timers are per-stream, not global: each registration with a non-zero
//! timeout spawns a detached timer task on the current `compio` runtime,
//! raced against a cancellation channel that fires when the stream resolves
//! first.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::{self, Either};
use futures::pin_mut;
use tracing::{debug, trace};

use crate::error::SocketdError;
use crate::message::Message;

/// Outcome delivered to a stream callback: a reply message, or the error
/// (timeout, alarm, explicit failure) that terminated the stream.
pub type StreamOutcome = std::result::Result<Message, SocketdError>;

/// Stream resolution mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    /// Single-shot: the first reply resolves and removes the stream.
    Request,
    /// Persistent: replies re-invoke the callback until an end-of-stream
    /// reply, timeout, or alarm removes the stream.
    Subscribe,
}

/// A pending operation awaiting reply/replies.
pub struct Stream {
    sid: String,
    mode: StreamMode,
    timeout: Duration,
    done: AtomicBool,
    handler: Box<dyn Fn(StreamOutcome) + Send + Sync>,
}

impl Stream {
    /// Create a pending stream. `timeout` of zero means no deadline.
    pub fn new(
        sid: impl Into<String>,
        mode: StreamMode,
        timeout: Duration,
        handler: impl Fn(StreamOutcome) + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            sid: sid.into(),
            mode,
            timeout,
            done: AtomicBool::new(false),
            handler: Box::new(handler),
        })
    }

    #[must_use]
    pub fn sid(&self) -> &str {
        &self.sid
    }

    #[must_use]
    pub const fn mode(&self) -> StreamMode {
        self.mode
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// True once a terminal event (reply-end, first request reply, timeout,
    /// alarm) has been delivered.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Deliver a reply. Terminal delivery flips `done`; only the caller that
    /// wins the flip invokes the callback. Non-terminal delivery is skipped
    /// once `done` is set.
    fn accept(&self, message: Message, terminal: bool) {
        if terminal {
            if !self.done.swap(true, Ordering::AcqRel) {
                (self.handler)(Ok(message));
            }
        } else if !self.is_done() {
            (self.handler)(Ok(message));
        }
    }

    /// Deliver a terminal error (timeout, alarm, explicit failure).
    fn fail(&self, error: SocketdError) {
        if !self.done.swap(true, Ordering::AcqRel) {
            (self.handler)(Err(error));
        }
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("sid", &self.sid)
            .field("mode", &self.mode)
            .field("timeout", &self.timeout)
            .field("done", &self.is_done())
            .finish()
    }
}

struct Slot {
    stream: Arc<Stream>,
    cancel: Option<flume::Sender<()>>,
}

/// Registry of pending streams, keyed by sid.
///
/// Internally synchronized; exposes only atomic add/resolve/remove
/// operations, never raw iteration.
#[derive(Default)]
pub struct StreamRegistry {
    streams: DashMap<String, Slot>,
}

impl StreamRegistry {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a stream under its sid. Starts a per-stream timer when the
    /// stream carries a non-zero timeout (requires a running `compio`
    /// runtime on the current thread).
    pub fn add(self: &Arc<Self>, stream: Arc<Stream>) {
        let cancel = if stream.timeout().is_zero() {
            None
        } else {
            Some(self.spawn_timer(&stream))
        };

        self.streams
            .insert(stream.sid().to_string(), Slot { stream, cancel });
    }

    /// Look up a pending stream.
    #[must_use]
    pub fn get(&self, sid: &str) -> Option<Arc<Stream>> {
        self.streams.get(sid).map(|slot| Arc::clone(&slot.stream))
    }

    /// Remove a pending stream, cancelling its timer. Idempotent; the
    /// callback is not invoked (this is the explicit-cancel path).
    pub fn remove(&self, sid: &str) -> Option<Arc<Stream>> {
        self.streams.remove(sid).map(|(_, slot)| {
            if let Some(cancel) = slot.cancel {
                let _ = cancel.try_send(());
            }
            slot.stream
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Resolve a matching reply. Returns false when no stream is registered
    /// under the message's sid (late or duplicate replies are dropped
    /// silently — a tolerated case).
    pub fn on_reply(&self, message: Message, end: bool) -> bool {
        let sid = message.sid().to_string();
        let Some(stream) = self.get(&sid) else {
            trace!(sid = %sid, "reply without pending stream, dropped");
            return false;
        };

        let terminal = end || stream.mode() == StreamMode::Request;
        if terminal {
            // Remove-then-act: losing the removal race to the timer means
            // the timeout already resolved this stream.
            if self.remove(&sid).is_none() {
                return true;
            }
            stream.accept(message, true);
        } else {
            stream.accept(message, false);
        }
        true
    }

    /// Drop every pending stream without invoking callbacks, cancelling all
    /// timers. Used when the owning channel closes.
    pub fn clear(&self) {
        let sids: Vec<String> = self
            .streams
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for sid in sids {
            self.remove(&sid);
        }
    }

    /// Fail a pending stream with a terminal error (alarm or local error).
    /// Returns false when no stream is registered under the sid.
    pub fn fail(&self, sid: &str, error: SocketdError) -> bool {
        match self.remove(sid) {
            Some(stream) => {
                stream.fail(error);
                true
            }
            None => false,
        }
    }

    fn spawn_timer(self: &Arc<Self>, stream: &Arc<Stream>) -> flume::Sender<()> {
        let (cancel_tx, cancel_rx) = flume::bounded::<()>(1);
        let registry = Arc::clone(self);
        let sid = stream.sid().to_string();
        let timeout = stream.timeout();

        compio::runtime::spawn(async move {
            let sleep = compio::time::sleep(timeout);
            let cancelled = cancel_rx.recv_async();
            pin_mut!(sleep);
            pin_mut!(cancelled);

            if let Either::Left(..) = future::select(sleep, cancelled).await {
                if let Some(stream) = registry.remove(&sid) {
                    debug!(sid = %sid, ?timeout, "stream timed out");
                    stream.fail(SocketdError::Timeout(timeout));
                }
            }
        })
        .detach();

        cancel_tx
    }
}

/// Handle to a registered stream, returned by the session send operations.
#[derive(Clone)]
pub struct StreamHandle {
    sid: String,
    registry: Arc<StreamRegistry>,
}

impl StreamHandle {
    #[must_use]
    pub fn new(sid: impl Into<String>, registry: Arc<StreamRegistry>) -> Self {
        Self {
            sid: sid.into(),
            registry,
        }
    }

    #[must_use]
    pub fn sid(&self) -> &str {
        &self.sid
    }

    /// True when the stream is no longer pending (resolved, failed, or
    /// cancelled).
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.registry
            .get(&self.sid)
            .map_or(true, |stream| stream.is_done())
    }

    /// Cancel the stream: removes it from the registry before resolution so
    /// that no subsequent callback fires for this sid.
    pub fn cancel(&self) {
        self.registry.remove(&self.sid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Entity;
    use crate::frame::Flag;
    use crate::message::MessageBuilder;
    use std::sync::atomic::AtomicUsize;

    fn reply(sid: &str, text: &str, end: bool) -> Message {
        MessageBuilder::new()
            .flag(if end { Flag::ReplyEnd } else { Flag::Reply })
            .sid(sid)
            .entity(Entity::of_text(text))
            .build()
    }

    #[test]
    fn request_stream_resolves_exactly_once() {
        let registry = StreamRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = Arc::clone(&hits);

        registry.add(Stream::new("s1", StreamMode::Request, Duration::ZERO, move |out| {
            assert_eq!(out.unwrap().entity().data_as_string(), "first");
            hits2.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(registry.on_reply(reply("s1", "first", false), false));
        // A duplicate/late reply for the same sid is a silent no-op.
        assert!(!registry.on_reply(reply("s1", "second", false), false));

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn subscribe_stream_survives_until_end() {
        let registry = StreamRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = Arc::clone(&hits);

        registry.add(Stream::new("s2", StreamMode::Subscribe, Duration::ZERO, move |out| {
            out.unwrap();
            hits2.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(registry.on_reply(reply("s2", "a", false), false));
        assert!(registry.on_reply(reply("s2", "b", false), false));
        assert_eq!(registry.len(), 1);

        assert!(registry.on_reply(reply("s2", "c", true), true));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert!(registry.is_empty());

        // Nothing fires after the terminal event.
        assert!(!registry.on_reply(reply("s2", "d", false), false));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn fail_delivers_error_and_removes() {
        let registry = StreamRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = Arc::clone(&hits);

        registry.add(Stream::new("s3", StreamMode::Request, Duration::ZERO, move |out| {
            assert!(matches!(out, Err(SocketdError::Alarm(_))));
            hits2.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(registry.fail("s3", SocketdError::alarm("boom")));
        assert!(!registry.fail("s3", SocketdError::alarm("again")));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancel_prevents_subsequent_callbacks() {
        let registry = StreamRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = Arc::clone(&hits);

        registry.add(Stream::new("s4", StreamMode::Subscribe, Duration::ZERO, move |_| {
            hits2.fetch_add(1, Ordering::SeqCst);
        }));

        let handle = StreamHandle::new("s4", Arc::clone(&registry));
        assert!(!handle.is_done());
        handle.cancel();
        assert!(handle.is_done());

        assert!(!registry.on_reply(reply("s4", "late", true), true));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[compio::test]
    async fn timeout_fires_when_no_reply_arrives() {
        let registry = StreamRegistry::new();
        let (tx, rx) = flume::bounded::<StreamOutcome>(1);

        registry.add(Stream::new(
            "s5",
            StreamMode::Request,
            Duration::from_millis(20),
            move |out| {
                let _ = tx.try_send(out);
            },
        ));

        compio::time::sleep(Duration::from_millis(80)).await;

        let out = rx.try_recv().expect("timeout callback should have fired");
        assert!(matches!(out, Err(SocketdError::Timeout(_))));
        assert!(registry.is_empty());
    }

    #[compio::test]
    async fn resolution_cancels_the_timer() {
        let registry = StreamRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = Arc::clone(&hits);

        registry.add(Stream::new(
            "s6",
            StreamMode::Request,
            Duration::from_millis(20),
            move |out| {
                out.unwrap();
                hits2.fetch_add(1, Ordering::SeqCst);
            },
        ));

        assert!(registry.on_reply(reply("s6", "in time", false), false));
        compio::time::sleep(Duration::from_millis(80)).await;

        // The reply won; the timer was a no-op.
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }
}
