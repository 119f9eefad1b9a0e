//! The message bus: three hash-indexed routers inside every RPC/pubsub
//! endpoint — handlers by method, pending calls by msgid, subscriptions by
//! topic — plus a hit-counter snapshot.
//!
//! Grounded on an `OnceLock<Mutex<HashMap<...>>>` registry pattern used
//! elsewhere in this workspace, split into three maps and given hit
//! counters. `Bus` is `Send + Sync` for the same reason every transport
//! callback is (see `transport::lib`'s module doc): INPROC may call back
//! into it from a thread other than the endpoint's own reactor thread.

use std::collections::HashMap;
use std::time::Instant;

use indexmap::IndexMap;
use parking_lot::Mutex;

use reactor::error::Error;
use transport::{PeerToken, Transport};

/// A server-side request handler. Takes the decoded request params and a
/// [`ReplyToken`] it must consume exactly once.
pub type HandlerFn = std::sync::Arc<dyn Fn(Vec<u8>, ReplyToken) + Send + Sync>;

/// A client-side pending-call callback, invoked exactly once with the
/// eventual outcome of one `call()`.
pub type PendingCallback = std::sync::Arc<dyn Fn(PendingOutcome) + Send + Sync>;

/// A subscriber's per-topic delivery callback.
pub type SubscriptionFn = std::sync::Arc<dyn Fn(&[u8]) + Send + Sync>;

/// The one-of-three outcomes a pending call ever resolves with: response,
/// error, or cancellation/timeout — never zero, never twice.
#[derive(Debug, Clone)]
pub enum PendingOutcome {
    Response(Vec<u8>),
    Error { code: i32, message: String },
    Cancelled,
    Timeout,
}

/// A handler's one-shot reply capability. Every method here takes `self` by
/// value, so the type system enforces the "reply exactly once" rule: a
/// second reply attempt fails to compile instead of panicking at runtime.
pub struct ReplyToken {
    transport: std::sync::Arc<Transport>,
    /// `None` for a dispatched `NOTIFICATION` — it carries no msgid, so
    /// there is nothing to correlate a reply against and `reply_ok`/
    /// `reply_err` are no-ops.
    msgid: Option<u32>,
    peer: Option<PeerToken>,
}

impl ReplyToken {
    pub fn for_request(transport: std::sync::Arc<Transport>, msgid: u32, peer: Option<PeerToken>) -> Self {
        Self { transport, msgid: Some(msgid), peer }
    }

    pub fn for_notification(transport: std::sync::Arc<Transport>, peer: Option<PeerToken>) -> Self {
        Self { transport, msgid: None, peer }
    }

    pub fn reply_ok(self, result: Vec<u8>) -> Result<(), Error> {
        let Some(msgid) = self.msgid else { return Ok(()) };
        let frame = wire::Frame::Response { msgid, result };
        let bytes = wire::encode_frame(&frame)?;
        self.dispatch(bytes)
    }

    pub fn reply_err(self, code: i32, message: impl Into<String>) -> Result<(), Error> {
        let Some(msgid) = self.msgid else { return Ok(()) };
        let frame = wire::Frame::Error { msgid, code, message: message.into() };
        let bytes = wire::encode_frame(&frame)?;
        self.dispatch(bytes)
    }

    fn dispatch(self, bytes: Vec<u8>) -> Result<(), Error> {
        match self.peer {
            Some(peer) => self.transport.send_to(&bytes, peer),
            None => self.transport.send(&bytes),
        }
    }
}

struct PendingEntry {
    callback: PendingCallback,
    #[allow(dead_code)] // read by a future admission-control pass; kept as part of the pending-call record shape.
    submitted_at: Instant,
}

/// A read-only counter snapshot, pairable with `reset_stats`.
#[derive(Debug, Clone, Default)]
pub struct Stats {
    pub total_routed: u64,
    pub handler_hits: u64,
    pub pending_hits: u64,
    pub subscription_hits: u64,
    pub handlers_len: usize,
    pub pending_len: usize,
    pub subscriptions_len: usize,
}

struct BusInner {
    handlers: HashMap<String, HandlerFn>,
    pending: HashMap<u32, PendingEntry>,
    subscriptions: IndexMap<String, SubscriptionFn>,
    stats: Stats,
}

pub struct Bus {
    inner: Mutex<BusInner>,
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

impl Bus {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BusInner {
                handlers: HashMap::new(),
                pending: HashMap::new(),
                subscriptions: IndexMap::new(),
                stats: Stats::default(),
            }),
        }
    }

    /// Re-registration of an existing method replaces silently.
    pub fn register_handler(&self, method: impl Into<String>, handler: HandlerFn) {
        self.inner.lock().handlers.insert(method.into(), handler);
    }

    pub fn unregister_handler(&self, method: &str) -> bool {
        self.inner.lock().handlers.remove(method).is_some()
    }

    /// Registers a pending call under `msgid`. Returns `false` without
    /// touching the existing entry if `msgid` is already pending — the
    /// caller (`RpcClient::call`) must treat that as a collision and fail
    /// the call rather than silently dropping whichever callback loses.
    pub fn insert_pending(&self, msgid: u32, callback: PendingCallback) -> bool {
        let mut inner = self.inner.lock();
        if inner.pending.contains_key(&msgid) {
            return false;
        }
        inner.pending.insert(msgid, PendingEntry { callback, submitted_at: Instant::now() });
        true
    }

    /// Look up by msgid: if absent, drop (logged at debug level); if
    /// present, remove and return in the same locked step, so delivery
    /// happens strictly once even under concurrent lookups.
    pub fn take_pending(&self, msgid: u32) -> Option<PendingCallback> {
        let mut inner = self.inner.lock();
        inner.stats.total_routed += 1;
        match inner.pending.remove(&msgid) {
            Some(entry) => {
                inner.stats.pending_hits += 1;
                Some(entry.callback)
            }
            None => {
                tracing::debug!(msgid, "no pending call for msgid; dropping");
                None
            }
        }
    }

    /// Teardown cancellation: every still-pending callback, removed in one
    /// sweep so none can be matched by a late response.
    pub fn drain_pending(&self) -> Vec<PendingCallback> {
        self.inner.lock().pending.drain().map(|(_, entry)| entry.callback).collect()
    }

    pub fn pending_len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Dispatch one decoded request. Looks up `method`; the caller
    /// synthesizes a `METHOD_NOT_FOUND` `ERROR` frame when this returns
    /// `false`.
    pub fn dispatch_request(&self, method: &str, params: Vec<u8>, reply: ReplyToken) -> bool {
        let handler = {
            let mut inner = self.inner.lock();
            inner.stats.total_routed += 1;
            inner.handlers.get(method).cloned().map(|h| {
                inner.stats.handler_hits += 1;
                h
            })
        };
        match handler {
            Some(handler) => {
                handler(params, reply);
                true
            }
            None => false,
        }
    }

    pub fn subscribe(&self, topic: impl Into<String>, callback: SubscriptionFn) {
        self.inner.lock().subscriptions.insert(topic.into(), callback);
    }

    pub fn unsubscribe(&self, topic: &str) -> bool {
        self.inner.lock().subscriptions.shift_remove(topic).is_some()
    }

    /// Dispatch one broadcast: exact-match subscriber wins outright; with
    /// no exact match, every wildcard (`prefix*`) subscription registered
    /// so far whose prefix the topic shares is delivered to, in
    /// registration order. Returns the matched count.
    pub fn dispatch_broadcast(&self, topic: &str, payload: &[u8]) -> usize {
        let (exact, wildcards) = {
            let mut inner = self.inner.lock();
            inner.stats.total_routed += 1;
            if let Some(cb) = inner.subscriptions.get(topic).cloned() {
                inner.stats.subscription_hits += 1;
                (Some(cb), Vec::new())
            } else {
                let matches: Vec<SubscriptionFn> = inner
                    .subscriptions
                    .iter()
                    .filter(|(pattern, _)| {
                        pattern.ends_with('*') && topic.starts_with(&pattern[..pattern.len() - 1])
                    })
                    .map(|(_, cb)| cb.clone())
                    .collect();
                inner.stats.subscription_hits += matches.len() as u64;
                (None, matches)
            }
        };

        if let Some(cb) = exact {
            cb(payload);
            return 1;
        }
        let matched = wildcards.len();
        for cb in wildcards {
            cb(payload);
        }
        matched
    }

    pub fn snapshot(&self) -> Stats {
        let mut inner = self.inner.lock();
        inner.stats.handlers_len = inner.handlers.len();
        inner.stats.pending_len = inner.pending.len();
        inner.stats.subscriptions_len = inner.subscriptions.len();
        inner.stats.clone()
    }

    pub fn reset_stats(&self) {
        self.inner.lock().stats = Stats::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn unknown_method_reports_no_handler() {
        let bus = Bus::new();
        let transport = Arc::new(transport_stub());
        let token = ReplyToken::for_request(transport, 1, None);
        assert!(!bus.dispatch_request("Missing", vec![], token));
        let stats = bus.snapshot();
        assert_eq!(stats.handler_hits, 0);
        assert_eq!(stats.total_routed, 1);
    }

    #[test]
    fn exact_match_beats_wildcard() {
        let bus = Bus::new();
        let exact_hits = Arc::new(AtomicUsize::new(0));
        let wildcard_hits = Arc::new(AtomicUsize::new(0));
        {
            let exact_hits = exact_hits.clone();
            bus.subscribe("news.sports", Arc::new(move |_| { exact_hits.fetch_add(1, Ordering::SeqCst); }));
        }
        {
            let wildcard_hits = wildcard_hits.clone();
            bus.subscribe("news.*", Arc::new(move |_| { wildcard_hits.fetch_add(1, Ordering::SeqCst); }));
        }
        let matched = bus.dispatch_broadcast("news.sports", b"payload");
        assert_eq!(matched, 1);
        assert_eq!(exact_hits.load(Ordering::SeqCst), 1);
        assert_eq!(wildcard_hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn wildcard_delivers_to_every_matching_subscription() {
        let bus = Bus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        for prefix in ["news.*", "news.sp*"] {
            let hits = hits.clone();
            bus.subscribe(prefix, Arc::new(move |_| { hits.fetch_add(1, Ordering::SeqCst); }));
        }
        let matched = bus.dispatch_broadcast("news.sports", b"payload");
        assert_eq!(matched, 2);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn pending_delivers_exactly_once() {
        let bus = Bus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        {
            let hits = hits.clone();
            bus.insert_pending(7, Arc::new(move |_| { hits.fetch_add(1, Ordering::SeqCst); }));
        }
        assert!(bus.take_pending(7).is_some());
        assert!(bus.take_pending(7).is_none());
        assert_eq!(hits.load(Ordering::SeqCst), 0); // callback invocation is the caller's job, not take_pending's
    }

    fn transport_stub() -> Transport {
        // A live inproc client/server pair, purely so `ReplyToken` tests
        // have a `Transport` to carry; these tests never call
        // `reply_ok`/`reply_err`, so the send path is never exercised.
        let _server = transport::inproc::InprocTransport::listen("router-test-stub", Arc::new(|_, _| {})).unwrap();
        let client =
            transport::inproc::InprocTransport::connect("router-test-stub", Arc::new(|_| {}), Arc::new(|_, _| {}))
                .unwrap();
        Transport::Inproc(client)
    }
}
