//! The transport abstraction of spec §4.3: one shape, four implementations
//! (`tcp`, `udp`, `ipc`, `inproc`).
//!
//! The C source dispatched through a vtable plus a `union impl` of raw
//! pointers. Per Design Notes §9 we replace that with a sealed enum over
//! the four kind-specific structs and dispatch by `match` — runtime
//! polymorphism nobody needs here.
//!
//! Every transport is driven from inside a `reactor::Reactor`'s
//! single-threaded runtime — in practice, its connection tables are only
//! ever touched from that one thread. Their state is nonetheless `Arc`/
//! `Mutex` rather than `Rc`/`RefCell`, because every callback type below
//! is `Send + Sync`: that bound is what lets the INPROC transport's
//! registry (`inproc::registry`), which genuinely is process-wide shared
//! state (spec §3, §5), invoke a peer's receive callback from whichever
//! thread happens to call `send`.

pub mod ipc;
pub mod inproc;
pub mod tcp;
pub mod udp;

use std::sync::Arc;

use reactor::config::TransportKind;
use reactor::error::{Error, ErrorKind};

/// Opaque handle identifying one connection (stream transports) or one
/// source address (UDP); `None` on transports with exactly one peer
/// (clients, and INPROC).
pub type PeerToken = u64;

/// `receive(payload, peer)` — invoked on the reactor thread for every
/// payload unit delivered by the transport (one frame on stream
/// transports, one datagram on UDP, one direct call on INPROC) — except on
/// INPROC, where spec §4.3 explicitly allows the call to land on the
/// *sender's* thread. `Arc<dyn Fn + Send + Sync>` rather than `Rc<dyn Fn>`
/// is what makes that legal: it is the one place a callback genuinely
/// crosses a thread boundary, so every callback in this crate pays the
/// small atomic-refcount cost uniformly instead of special-casing INPROC.
pub type ReceiveCallback = Arc<dyn Fn(&[u8], Option<PeerToken>) + Send + Sync>;

/// `connect(result)` — fired once per `connect()` call, successful or not.
pub type ConnectCallback = Arc<dyn Fn(Result<(), Error>) + Send + Sync>;

/// `error(kind, message)` — fired for every transport-local failure that
/// is not immediately returned from the call that caused it (spec §7).
pub type ErrorCallback = Arc<dyn Fn(Error) + Send + Sync>;

/// Which side of an endpoint this transport instance plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

/// The sealed variant over the four transport kinds (spec §4.3).
///
/// All four implement the same operation set; this type simply forwards
/// to whichever variant is active. Constructed by `listen`/`connect`
/// below, never directly.
pub enum Transport {
    Tcp(tcp::TcpTransport),
    Udp(udp::UdpTransport),
    Ipc(ipc::IpcTransport),
    Inproc(inproc::InprocTransport),
}

impl Transport {
    /// Bind a server-role endpoint at `address` and begin accepting
    /// connections/datagrams/in-process clients, delivering payloads to
    /// `on_receive`.
    pub async fn listen(address: &reactor::config::Address, on_receive: ReceiveCallback) -> Result<Self, Error> {
        match address.kind {
            TransportKind::Tcp => tcp::TcpTransport::listen(&address.body, on_receive).await.map(Transport::Tcp),
            TransportKind::Udp => udp::UdpTransport::listen(&address.body, on_receive).await.map(Transport::Udp),
            TransportKind::Ipc => ipc::IpcTransport::listen(&address.body, on_receive).await.map(Transport::Ipc),
            TransportKind::Inproc => {
                inproc::InprocTransport::listen(&address.body, on_receive).map(Transport::Inproc)
            }
        }
    }

    /// Connect a client-role endpoint to `address`.
    pub async fn connect(
        address: &reactor::config::Address,
        timeout_ms: u64,
        on_connect: ConnectCallback,
        on_receive: ReceiveCallback,
    ) -> Result<Self, Error> {
        match address.kind {
            TransportKind::Tcp => {
                tcp::TcpTransport::connect(&address.body, timeout_ms, on_connect, on_receive).await.map(Transport::Tcp)
            }
            TransportKind::Udp => {
                udp::UdpTransport::connect(&address.body, on_connect, on_receive).await.map(Transport::Udp)
            }
            TransportKind::Ipc => {
                ipc::IpcTransport::connect(&address.body, timeout_ms, on_connect, on_receive).await.map(Transport::Ipc)
            }
            TransportKind::Inproc => {
                inproc::InprocTransport::connect(&address.body, on_connect, on_receive).map(Transport::Inproc)
            }
        }
    }

    /// Deliver one payload unit. On server-role stream transports this
    /// multicasts to every active connection (spec §9's third open
    /// question — kept because publishers depend on it; RPC servers
    /// should prefer [`Transport::send_to`]).
    pub fn send(&self, payload: &[u8]) -> Result<(), Error> {
        match self {
            Transport::Tcp(t) => t.send(payload),
            Transport::Udp(t) => t.send(payload),
            Transport::Ipc(t) => t.send(payload),
            Transport::Inproc(t) => t.send(payload),
        }
    }

    /// Server-side targeted send to exactly one connection/peer.
    pub fn send_to(&self, payload: &[u8], peer: PeerToken) -> Result<(), Error> {
        match self {
            Transport::Tcp(t) => t.send_to(payload, peer),
            Transport::Udp(t) => t.send_to(payload, peer),
            Transport::Ipc(t) => t.send_to(payload, peer),
            Transport::Inproc(t) => t.send_to(payload, peer),
        }
    }

    pub fn disconnect(&self) {
        match self {
            Transport::Tcp(t) => t.disconnect(),
            Transport::Udp(t) => t.disconnect(),
            Transport::Ipc(t) => t.disconnect(),
            Transport::Inproc(t) => t.disconnect(),
        }
    }

    pub fn set_error_callback(&self, cb: ErrorCallback) {
        match self {
            Transport::Tcp(t) => t.set_error_callback(cb),
            Transport::Udp(t) => t.set_error_callback(cb),
            Transport::Ipc(t) => t.set_error_callback(cb),
            Transport::Inproc(t) => t.set_error_callback(cb),
        }
    }

    pub fn close(&self) {
        match self {
            Transport::Tcp(t) => t.close(),
            Transport::Udp(t) => t.close(),
            Transport::Ipc(t) => t.close(),
            Transport::Inproc(t) => t.close(),
        }
    }
}

pub(crate) fn invalid_address(raw: &str) -> Error {
    Error::new(ErrorKind::InvalidParam, format!("invalid address body: '{raw}'"))
}
