//! UDP transport (spec §4.3): no backlog, no framing, one datagram is one
//! payload. Clients maintain a capped peer table and fan out `send` to
//! every peer they have ever heard from so that broadcast semantics work
//! without IGMP; servers require an explicit peer token on `send_to`.

use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;

use indexmap::IndexMap;
use tokio::net::UdpSocket;

use reactor::error::{Error, ErrorKind};

use crate::{invalid_address, ConnectCallback, ErrorCallback, PeerToken, ReceiveCallback, Role};

/// Spec §3: "capped at 1,000 entries to bound memory under hostile
/// traffic... the cap is enforced by refusing new peers once full."
const MAX_CLIENT_PEERS: usize = 1_000;

const MAX_DATAGRAM: usize = 65_536;

pub struct UdpTransport {
    role: Role,
    socket: Arc<UdpSocket>,
    peers: Arc<Mutex<IndexMap<PeerToken, SocketAddr>>>,
    peer_cap: Option<usize>,
    next_token: Arc<Mutex<u64>>,
    error_cb: Arc<Mutex<Option<ErrorCallback>>>,
}

fn learn_peer(
    peers: &Arc<Mutex<IndexMap<PeerToken, SocketAddr>>>,
    next_token: &Arc<Mutex<u64>>,
    cap: Option<usize>,
    addr: SocketAddr,
) -> Option<PeerToken> {
    let mut peers_mut = peers.lock();
    if let Some((&tok, _)) = peers_mut.iter().find(|(_, &a)| a == addr) {
        return Some(tok);
    }
    if let Some(cap) = cap {
        if peers_mut.len() >= cap {
            return None;
        }
    }
    let mut n = next_token.lock();
    let token = *n;
    *n += 1;
    peers_mut.insert(token, addr);
    Some(token)
}

fn spawn_recv_loop(
    socket: Arc<UdpSocket>,
    peers: Arc<Mutex<IndexMap<PeerToken, SocketAddr>>>,
    next_token: Arc<Mutex<u64>>,
    peer_cap: Option<usize>,
    on_receive: ReceiveCallback,
    error_cb: Arc<Mutex<Option<ErrorCallback>>>,
) {
    tokio::spawn(async move {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            match socket.recv_from(&mut buf).await {
                Ok((n, from)) => {
                    let token = learn_peer(&peers, &next_token, peer_cap, from);
                    on_receive(&buf[..n], token);
                }
                Err(e) => {
                    if let Some(cb) = error_cb.lock().as_ref() {
                        cb(Error::io("udp recv failed", e));
                    }
                    break;
                }
            }
        }
    });
}

impl UdpTransport {
    fn parse_sockaddr(body: &str) -> Result<SocketAddr, Error> {
        body.parse::<SocketAddr>().map_err(|_| invalid_address(body))
    }

    pub async fn listen(body: &str, on_receive: ReceiveCallback) -> Result<Self, Error> {
        let addr = Self::parse_sockaddr(body)?;
        let socket = Arc::new(UdpSocket::bind(addr).await.map_err(|e| Error::io("udp bind failed", e))?);
        let peers = Arc::new(Mutex::new(IndexMap::new()));
        let next_token = Arc::new(Mutex::new(1u64));
        let error_cb: Arc<Mutex<Option<ErrorCallback>>> = Arc::new(Mutex::new(None));

        spawn_recv_loop(socket.clone(), peers.clone(), next_token.clone(), None, on_receive, error_cb.clone());

        Ok(Self { role: Role::Server, socket, peers, peer_cap: None, next_token, error_cb })
    }

    pub async fn connect(body: &str, on_connect: ConnectCallback, on_receive: ReceiveCallback) -> Result<Self, Error> {
        let target = Self::parse_sockaddr(body)?;
        let local: SocketAddr = if target.is_ipv6() { "[::]:0" } else { "0.0.0.0:0" }.parse().unwrap();
        let socket = match UdpSocket::bind(local).await {
            Ok(s) => Arc::new(s),
            Err(e) => {
                on_connect(Err(Error::new(ErrorKind::Io, format!("udp bind failed: {e}"))));
                return Err(Error::io("udp bind failed", e));
            }
        };

        let peers = Arc::new(Mutex::new(IndexMap::new()));
        let next_token = Arc::new(Mutex::new(1u64));
        let error_cb: Arc<Mutex<Option<ErrorCallback>>> = Arc::new(Mutex::new(None));
        // The connect target is the client's first known peer: the one
        // `send` fans out to before any datagram has ever been received.
        learn_peer(&peers, &next_token, Some(MAX_CLIENT_PEERS), target);

        spawn_recv_loop(
            socket.clone(),
            peers.clone(),
            next_token.clone(),
            Some(MAX_CLIENT_PEERS),
            on_receive,
            error_cb.clone(),
        );

        on_connect(Ok(()));
        Ok(Self { role: Role::Client, socket, peers, peer_cap: Some(MAX_CLIENT_PEERS), next_token, error_cb })
    }

    pub fn send(&self, payload: &[u8]) -> Result<(), Error> {
        if payload.len() > MAX_DATAGRAM {
            return Err(Error::new(ErrorKind::InvalidParam, "payload exceeds max datagram size"));
        }
        let peers: Vec<SocketAddr> = self.peers.lock().values().copied().collect();
        if peers.is_empty() {
            return Err(Error::new(ErrorKind::NotConnected, "no known udp peers to send to"));
        }
        for addr in peers {
            self.try_send_one(payload, addr)?;
        }
        Ok(())
    }

    pub fn send_to(&self, payload: &[u8], peer: PeerToken) -> Result<(), Error> {
        let addr = *self
            .peers
            .lock()
            .get(&peer)
            .ok_or_else(|| Error::new(ErrorKind::NotFound, "unknown peer token"))?;
        self.try_send_one(payload, addr)
    }

    fn try_send_one(&self, payload: &[u8], addr: SocketAddr) -> Result<(), Error> {
        match self.socket.try_send_to(payload, addr) {
            Ok(_) => Ok(()),
            Err(e) => Err(Error::io("udp send failed", e)),
        }
    }

    pub fn disconnect(&self) {
        self.peers.lock().clear();
    }

    pub fn set_error_callback(&self, cb: ErrorCallback) {
        *self.error_cb.lock() = Some(cb);
    }

    pub fn close(&self) {
        self.disconnect();
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Number of currently-known peers; exposed for the subscriber's
    /// registration-sentinel logic (spec §4.7) and tests.
    pub fn peer_count(&self) -> usize {
        self.peers.lock().len()
    }

    /// `Some(1000)` on clients (spec §3's peer-table cap), `None` on
    /// servers, which track peers only to satisfy `send_to`.
    pub fn peer_cap(&self) -> Option<usize> {
        self.peer_cap
    }
}
