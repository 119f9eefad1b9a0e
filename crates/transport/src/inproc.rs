//! The in-memory fabric ("INPROC"): a process-wide name → server registry
//! and synchronous, zero-copy delivery between endpoints that share it
//! (spec §3, §4.3).
//!
//! `listen` installs a server entry; `connect` looks the name up and
//! appends a client entry. `send` never touches a socket — it calls the
//! peer's receive callback directly, inline, which means the callback may
//! run on whichever thread called `send` (documented at the type alias in
//! `lib.rs`). Grounded on the teacher's `crates/bus/src/rpc.rs`
//! `OnceLock<Mutex<HashMap<...>>>` `RPC_REGISTRY` pattern, reused for this
//! registry nearly verbatim.

use std::sync::{Arc, OnceLock};

use indexmap::IndexMap;
use parking_lot::Mutex;

use reactor::error::{Error, ErrorKind};

use crate::{ConnectCallback, ErrorCallback, PeerToken, ReceiveCallback, Role};

struct ServerEntry {
    /// The server's own receive callback, invoked when any client sends.
    on_receive: ReceiveCallback,
    /// Connected clients, keyed by the token handed to the server on
    /// `send_to`.
    clients: Mutex<IndexMap<PeerToken, ReceiveCallback>>,
    next_token: Mutex<u64>,
}

/// The process-wide registry (spec §3's "in-process endpoint registry").
/// The sole piece of cross-reactor shared mutable state in the system; all
/// mutation goes through this one `Mutex`, the single short critical
/// section spec §5 calls for.
static REGISTRY: OnceLock<Mutex<IndexMap<String, Arc<ServerEntry>>>> = OnceLock::new();

fn registry() -> &'static Mutex<IndexMap<String, Arc<ServerEntry>>> {
    REGISTRY.get_or_init(|| Mutex::new(IndexMap::new()))
}

enum State {
    Server { name: String, entry: Arc<ServerEntry> },
    Client { name: String, entry: Arc<ServerEntry>, token: PeerToken },
}

pub struct InprocTransport {
    role: Role,
    state: State,
    error_cb: Mutex<Option<ErrorCallback>>,
}

impl InprocTransport {
    /// Install a server entry under `name`. Fails with `ALREADY_EXISTS` if
    /// the name is already taken — spec §8 invariant 6: "INPROC server
    /// registration is mutually exclusive per name."
    pub fn listen(name: &str, on_receive: ReceiveCallback) -> Result<Self, Error> {
        let mut reg = registry().lock();
        if reg.contains_key(name) {
            return Err(Error::new(ErrorKind::AlreadyExists, format!("inproc name '{name}' is already bound")));
        }
        let entry = Arc::new(ServerEntry { on_receive, clients: Mutex::new(IndexMap::new()), next_token: Mutex::new(1) });
        reg.insert(name.to_string(), entry.clone());
        Ok(Self { role: Role::Server, state: State::Server { name: name.to_string(), entry }, error_cb: Mutex::new(None) })
    }

    /// Attach a client to the server bound at `name`. Fails with
    /// `NOT_FOUND` if no server is listening there.
    pub fn connect(name: &str, on_connect: ConnectCallback, on_receive: ReceiveCallback) -> Result<Self, Error> {
        let entry = {
            let reg = registry().lock();
            reg.get(name).cloned()
        };
        let entry = match entry {
            Some(e) => e,
            None => {
                let err = Error::new(ErrorKind::NotFound, format!("no inproc server bound at '{name}'"));
                on_connect(Err(Error::new(ErrorKind::NotFound, err.message.clone())));
                return Err(err);
            }
        };
        let token = {
            let mut n = entry.next_token.lock();
            let id = *n;
            *n += 1;
            id
        };
        entry.clients.lock().insert(token, on_receive);
        on_connect(Ok(()));
        Ok(Self {
            role: Role::Client,
            state: State::Client { name: name.to_string(), entry, token },
            error_cb: Mutex::new(None),
        })
    }

    /// Multicast-style send: on a server this calls every connected
    /// client's receive callback; on a client it calls the server's.
    pub fn send(&self, payload: &[u8]) -> Result<(), Error> {
        match &self.state {
            State::Server { entry, .. } => {
                let clients: Vec<ReceiveCallback> = entry.clients.lock().values().cloned().collect();
                for cb in clients {
                    cb(payload, None);
                }
                Ok(())
            }
            State::Client { entry, token, .. } => {
                (entry.on_receive)(payload, Some(*token));
                Ok(())
            }
        }
    }

    pub fn send_to(&self, payload: &[u8], peer: PeerToken) -> Result<(), Error> {
        match &self.state {
            State::Server { entry, .. } => {
                let cb = entry.clients.lock().get(&peer).cloned();
                match cb {
                    Some(cb) => {
                        cb(payload, None);
                        Ok(())
                    }
                    None => Err(Error::new(ErrorKind::NotFound, "unknown peer token")),
                }
            }
            State::Client { .. } => self.send(payload),
        }
    }

    pub fn disconnect(&self) {
        match &self.state {
            State::Server { entry, .. } => entry.clients.lock().clear(),
            State::Client { entry, token, .. } => {
                entry.clients.lock().swap_remove(token);
            }
        }
    }

    pub fn set_error_callback(&self, cb: ErrorCallback) {
        *self.error_cb.lock() = Some(cb);
    }

    /// Releases this endpoint's registry footprint. For a server, frees
    /// the name entirely (spec §3: "Registry entries are freed only when
    /// their server is freed") — any still-attached clients are left with
    /// a dangling `Arc<ServerEntry>` they keep alive until their own drop.
    pub fn close(&self) {
        self.disconnect();
        if let State::Server { name, .. } = &self.state {
            registry().lock().shift_remove(name);
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn noop_connect() -> ConnectCallback {
        Arc::new(|_| {})
    }

    #[test]
    fn duplicate_listen_name_is_rejected() {
        let name = "test-dup-listen";
        let _server = InprocTransport::listen(name, Arc::new(|_, _| {})).unwrap();
        let err = InprocTransport::listen(name, Arc::new(|_, _| {})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        registry().lock().shift_remove(name);
    }

    #[test]
    fn connect_without_server_is_not_found() {
        let err = InprocTransport::connect("test-missing-server", noop_connect(), Arc::new(|_, _| {})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn client_send_reaches_server_receive_callback() {
        let name = "test-client-to-server";
        let received = Arc::new(AtomicUsize::new(0));
        let received_clone = received.clone();
        let server = InprocTransport::listen(
            name,
            Arc::new(move |payload, _| {
                assert_eq!(payload, b"hello");
                received_clone.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();

        let client = InprocTransport::connect(name, noop_connect(), Arc::new(|_, _| {})).unwrap();
        client.send(b"hello").unwrap();
        assert_eq!(received.load(Ordering::SeqCst), 1);

        server.close();
    }

    #[test]
    fn server_send_multicasts_to_every_client() {
        let name = "test-server-multicast";
        let server = InprocTransport::listen(name, Arc::new(|_, _| {})).unwrap();

        let count = Arc::new(AtomicUsize::new(0));
        let mut clients = Vec::new();
        for _ in 0..3 {
            let count = count.clone();
            clients.push(
                InprocTransport::connect(name, noop_connect(), Arc::new(move |_, _| { count.fetch_add(1, Ordering::SeqCst); }))
                    .unwrap(),
            );
        }

        server.send(b"broadcast").unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 3);
        server.close();
    }
}
