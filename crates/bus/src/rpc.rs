//! Request/response RPC over any `transport::Transport`: `RpcServer` binds
//! a handler table behind an address, `RpcClient` issues calls against one
//! and correlates replies by msgid.
//!
//! Generalizes an in-process `mpsc`/`oneshot` dispatch shape to run over the
//! real transport + wire stack instead of a process-local registry; the
//! registry idea itself survives as `transport::inproc`'s server table, one
//! layer down.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use reactor::config::Address;
use reactor::error::{Error, ErrorKind};
use reactor::msgid::MsgIdAllocator;
use reactor::Reactor;
use transport::{ConnectCallback, PeerToken, ReceiveCallback, Transport};
use wire::Frame;

use crate::router::{Bus, HandlerFn, PendingCallback, PendingOutcome, ReplyToken, Stats};

/// An arbitrary, application-assigned code carried by synthesized
/// `METHOD_NOT_FOUND` replies. Not part of the wire format proper (spec
/// §6 only fixes the byte layout, not the code values) — picked to match
/// the JSON-RPC convention so it reads as "a reserved low code", not a
/// magic number invented here.
const METHOD_NOT_FOUND_CODE: i32 = -32601;

/// The outcome of [`RpcClient::call_sync`]: either the decoded result
/// bytes, a code+message the remote handler replied with, or the call
/// never resolving before the endpoint tore down.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error(transparent)]
    Transport(#[from] Error),
    #[error("remote error {code}: {message}")]
    Remote { code: i32, message: String },
    #[error("call cancelled before it resolved")]
    Cancelled,
}

fn dispatch_incoming_request(bus: &Bus, transport: &Arc<Transport>, payload: &[u8], peer: Option<PeerToken>) {
    let frame = match wire::decode_frame(payload) {
        Ok(f) => f,
        Err(e) => {
            tracing::debug!(error = %e, "rpc server received an undecodable frame");
            return;
        }
    };
    match frame {
        Frame::Request { msgid, method, params } => {
            let reply = ReplyToken::for_request(transport.clone(), msgid, peer);
            if !bus.dispatch_request(&method, params, reply) {
                let err = Frame::Error {
                    msgid,
                    code: METHOD_NOT_FOUND_CODE,
                    message: format!("method not found: {method}"),
                };
                if let Ok(bytes) = wire::encode_frame(&err) {
                    let _ = match peer {
                        Some(p) => transport.send_to(&bytes, p),
                        None => transport.send(&bytes),
                    };
                }
            }
        }
        Frame::Notification { method, params } => {
            let reply = ReplyToken::for_notification(transport.clone(), peer);
            bus.dispatch_request(&method, params, reply);
        }
        Frame::Response { .. } | Frame::Error { .. } => {
            tracing::debug!("rpc server received a reply-shaped frame; servers don't place calls, dropping");
        }
    }
}

fn dispatch_incoming_reply(bus: &Bus, payload: &[u8]) {
    let frame = match wire::decode_frame(payload) {
        Ok(f) => f,
        Err(e) => {
            tracing::debug!(error = %e, "rpc client received an undecodable frame");
            return;
        }
    };
    match frame {
        Frame::Response { msgid, result } => {
            if let Some(cb) = bus.take_pending(msgid) {
                cb(PendingOutcome::Response(result));
            }
        }
        Frame::Error { msgid, code, message } => {
            if let Some(cb) = bus.take_pending(msgid) {
                cb(PendingOutcome::Error { code, message });
            }
        }
        Frame::Request { .. } | Frame::Notification { .. } => {
            tracing::debug!("rpc client received a request-shaped frame; ignoring");
        }
    }
}

/// A bound server endpoint. Register handlers with [`RpcServer::on`];
/// every matching `REQUEST` is dispatched to them with a [`ReplyToken`]
/// they must consume exactly once. Unmatched methods get a synthesized
/// `METHOD_NOT_FOUND` reply automatically.
pub struct RpcServer {
    transport: Arc<Transport>,
    bus: Arc<Bus>,
}

impl RpcServer {
    pub async fn bind(address: &Address) -> Result<Self, Error> {
        let bus = Arc::new(Bus::new());

        // `Transport::listen` wants the receive callback before it hands
        // back the transport the callback needs to reply through; thread
        // it through a cell populated the instant `listen` returns. No
        // connection can produce a payload before that assignment lands —
        // a peer can't even exist yet.
        let transport_cell: Arc<Mutex<Option<Arc<Transport>>>> = Arc::new(Mutex::new(None));
        let bus_for_cb = bus.clone();
        let cell_for_cb = transport_cell.clone();
        let on_receive: ReceiveCallback = Arc::new(move |payload, peer| {
            let transport = match cell_for_cb.lock().clone() {
                Some(t) => t,
                None => return,
            };
            dispatch_incoming_request(&bus_for_cb, &transport, payload, peer);
        });

        let transport = Arc::new(Transport::listen(address, on_receive).await?);
        *transport_cell.lock() = Some(transport.clone());

        Ok(Self { transport, bus })
    }

    /// Register (or silently replace) the handler for `method`.
    pub fn on<F>(&self, method: impl Into<String>, handler: F)
    where
        F: Fn(Vec<u8>, ReplyToken) + Send + Sync + 'static,
    {
        let handler: HandlerFn = Arc::new(handler);
        self.bus.register_handler(method, handler);
    }

    pub fn unregister(&self, method: &str) -> bool {
        self.bus.unregister_handler(method)
    }

    pub fn stats(&self) -> Stats {
        self.bus.snapshot()
    }

    pub fn close(&self) {
        self.transport.close();
    }
}

/// A connected client endpoint. `call`/`notify` are fire-and-forget from
/// the caller's perspective; `call_sync` additionally blocks the calling
/// reactor until the matching reply lands or `timeout_ms` elapses.
pub struct RpcClient {
    transport: Arc<Transport>,
    bus: Arc<Bus>,
    msgid_alloc: Mutex<MsgIdAllocator>,
}

impl RpcClient {
    pub async fn connect(address: &Address, timeout_ms: u64, msgid_offset: u32) -> Result<Self, Error> {
        let bus = Arc::new(Bus::new());
        let bus_for_cb = bus.clone();
        let on_receive: ReceiveCallback = Arc::new(move |payload, _peer| {
            dispatch_incoming_reply(&bus_for_cb, payload);
        });

        // `TcpTransport::connect` (and its IPC sibling) still return `Ok`
        // on a watchdog timeout, delivering the failure only through
        // `on_connect` — a server-role `listen` has no such thing to
        // report. Capture it here so a client-role connect timeout surfaces
        // through this `Result`, per spec's connect_cb-and-Result
        // propagation policy, instead of silently handing back a transport
        // with no writer ever wired up.
        let connect_failure: Arc<Mutex<Option<Error>>> = Arc::new(Mutex::new(None));
        let failure_for_cb = connect_failure.clone();
        let on_connect: ConnectCallback = Arc::new(move |result| {
            if let Err(e) = result {
                *failure_for_cb.lock() = Some(e);
            }
        });

        let transport = Transport::connect(address, timeout_ms, on_connect, on_receive).await?;
        if let Some(err) = connect_failure.lock().take() {
            return Err(err);
        }
        let transport = Arc::new(transport);
        Ok(Self { transport, bus, msgid_alloc: Mutex::new(MsgIdAllocator::new(msgid_offset)) })
    }

    /// Issue one request, invoking `callback` exactly once with the
    /// eventual outcome. Returns the allocated msgid, useful for matching
    /// against out-of-band logging.
    pub fn call(&self, method: impl Into<String>, params: Vec<u8>, callback: PendingCallback) -> Result<u32, Error> {
        let msgid = self.msgid_alloc.lock().next();
        if !self.bus.insert_pending(msgid, callback) {
            return Err(Error::new(
                ErrorKind::Io,
                format!("msgid {msgid} collides with a still-pending call; refusing to overwrite it"),
            ));
        }
        let frame = Frame::Request { msgid, method: method.into(), params };
        let bytes = wire::encode_frame(&frame)?;
        if let Err(e) = self.transport.send(&bytes) {
            self.bus.take_pending(msgid);
            return Err(e);
        }
        Ok(msgid)
    }

    /// Fire-and-forget: no msgid, no reply ever expected.
    pub fn notify(&self, method: impl Into<String>, params: Vec<u8>) -> Result<(), Error> {
        let frame = Frame::Notification { method: method.into(), params };
        let bytes = wire::encode_frame(&frame)?;
        self.transport.send(&bytes)
    }

    /// Blocking convenience built on [`RpcClient::call`]: drives `reactor`
    /// until the reply lands or `timeout_ms` elapses.
    pub fn call_sync(
        &self,
        reactor: &Reactor,
        method: impl Into<String>,
        params: Vec<u8>,
        timeout_ms: u64,
    ) -> Result<Vec<u8>, CallError> {
        let (tx, rx) = tokio::sync::oneshot::channel::<PendingOutcome>();
        let tx = Mutex::new(Some(tx));
        let callback: PendingCallback = Arc::new(move |outcome| {
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send(outcome);
            }
        });
        self.call(method, params, callback)?;

        let outcome = reactor
            .block_on_timeout(Duration::from_millis(timeout_ms), rx)?
            .map_err(|_| CallError::Cancelled)?;
        match outcome {
            PendingOutcome::Response(bytes) => Ok(bytes),
            PendingOutcome::Error { code, message } => Err(CallError::Remote { code, message }),
            PendingOutcome::Cancelled | PendingOutcome::Timeout => Err(CallError::Cancelled),
        }
    }

    pub fn stats(&self) -> Stats {
        self.bus.snapshot()
    }

    /// Tear down the connection, resolving every still-pending call as
    /// cancelled so none of them hang forever.
    pub fn close(&self) {
        for cb in self.bus.drain_pending() {
            cb(PendingOutcome::Cancelled);
        }
        self.transport.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
    use std::sync::Arc as StdArc;

    #[tokio::test]
    async fn request_reaches_handler_and_reply_reaches_caller() {
        let addr = Address::parse("inproc://rpc-test-echo").unwrap();
        let server = RpcServer::bind(&addr).await.unwrap();
        server.on("Echo", |params, reply| {
            reply.reply_ok(params).unwrap();
        });

        let client = RpcClient::connect(&addr, 1_000, 0).await.unwrap();
        let got = StdArc::new(Mutex::new(None));
        let got_cb = got.clone();
        let done = StdArc::new(tokio::sync::Notify::new());
        let done_cb = done.clone();
        client
            .call(
                "Echo",
                b"hello".to_vec(),
                Arc::new(move |outcome| {
                    *got_cb.lock() = Some(outcome);
                    done_cb.notify_one();
                }),
            )
            .unwrap();
        done.notified().await;

        match got.lock().take().unwrap() {
            PendingOutcome::Response(bytes) => assert_eq!(bytes, b"hello"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        server.close();
    }

    #[tokio::test]
    async fn unknown_method_reports_method_not_found() {
        let addr = Address::parse("inproc://rpc-test-unknown").unwrap();
        let server = RpcServer::bind(&addr).await.unwrap();
        let client = RpcClient::connect(&addr, 1_000, 0).await.unwrap();

        let code = StdArc::new(AtomicI32::new(0));
        let code_cb = code.clone();
        let done = StdArc::new(tokio::sync::Notify::new());
        let done_cb = done.clone();
        client
            .call(
                "DoesNotExist",
                vec![],
                Arc::new(move |outcome| {
                    if let PendingOutcome::Error { code, .. } = outcome {
                        code_cb.store(code, Ordering::SeqCst);
                    }
                    done_cb.notify_one();
                }),
            )
            .unwrap();
        done.notified().await;
        assert_eq!(code.load(Ordering::SeqCst), METHOD_NOT_FOUND_CODE);
        server.close();
    }

    #[tokio::test]
    async fn closing_the_client_cancels_pending_calls() {
        let addr = Address::parse("inproc://rpc-test-teardown").unwrap();
        let server = RpcServer::bind(&addr).await.unwrap();
        // A handler that never replies, so the call stays pending until close().
        server.on("Hang", |_params, _reply| {});

        let client = RpcClient::connect(&addr, 1_000, 0).await.unwrap();
        let cancelled = StdArc::new(AtomicBool::new(false));
        let cancelled_cb = cancelled.clone();
        client
            .call(
                "Hang",
                vec![],
                Arc::new(move |outcome| {
                    if matches!(outcome, PendingOutcome::Cancelled) {
                        cancelled_cb.store(true, Ordering::SeqCst);
                    }
                }),
            )
            .unwrap();

        client.close();
        assert!(cancelled.load(Ordering::SeqCst));
        server.close();
    }
}
