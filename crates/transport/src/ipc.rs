//! Unix-domain pipe ("IPC") transport (spec §4.3): identical framing and
//! connection semantics to [`crate::tcp`], over `interprocess`'s local
//! sockets instead of `tokio::net::TcpStream`.
//!
//! Grounded on the teacher's `crates/ipc` local-socket helpers, generalized
//! from one-shot request/reply to a persistent, multi-frame connection the
//! way `tcp.rs` is.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use interprocess::local_socket::{
    tokio::{Listener, Stream},
    GenericNamespaced, ListenerOptions, ToNsName,
};
use tokio::io::{split, AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};

use reactor::error::{Error, ErrorKind};
use reactor::framing::{encode_frame, FrameDecoder};

use crate::{ConnectCallback, ErrorCallback, PeerToken, ReceiveCallback, Role};

const READ_CHUNK: usize = 32 * 1024;

struct Conn {
    writer: tokio::sync::mpsc::UnboundedSender<Vec<u8>>,
}

enum State {
    Server { connections: Arc<Mutex<IndexMap<PeerToken, Conn>>>, next_token: Arc<Mutex<u64>> },
    Client { writer: Arc<Mutex<Option<tokio::sync::mpsc::UnboundedSender<Vec<u8>>>>> },
}

pub struct IpcTransport {
    role: Role,
    state: State,
    error_cb: Arc<Mutex<Option<ErrorCallback>>>,
}

fn spawn_writer(mut half: WriteHalf<Stream>) -> tokio::sync::mpsc::UnboundedSender<Vec<u8>> {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Vec<u8>>();
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if half.write_all(&frame).await.is_err() {
                break;
            }
        }
    });
    tx
}

fn spawn_reader(
    mut half: ReadHalf<Stream>,
    on_receive: ReceiveCallback,
    on_eof_or_error: Arc<dyn Fn(Error)>,
    peer: Option<PeerToken>,
) {
    tokio::spawn(async move {
        let mut decoder = FrameDecoder::new();
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            match half.read(&mut buf).await {
                Ok(0) => {
                    on_eof_or_error(Error::new(ErrorKind::Io, "EOF"));
                    break;
                }
                Ok(n) => {
                    let (frames, err) = decoder.feed(&buf[..n]);
                    for frame in frames {
                        on_receive(&frame, peer);
                    }
                    if let Some(err) = err {
                        on_eof_or_error(err);
                        break;
                    }
                }
                Err(e) => {
                    on_eof_or_error(Error::io("ipc read failed", e));
                    break;
                }
            }
        }
    });
}

fn ns_name(body: &str) -> Result<interprocess::local_socket::Name<'static>, Error> {
    body.to_string()
        .to_ns_name::<GenericNamespaced>()
        .map_err(|e| Error::new(ErrorKind::InvalidParam, format!("invalid ipc path '{body}': {e}")))
}

impl IpcTransport {
    pub async fn listen(body: &str, on_receive: ReceiveCallback) -> Result<Self, Error> {
        let name = ns_name(body)?;
        let listener: Listener = ListenerOptions::new()
            .name(name)
            .create_tokio()
            .map_err(|e| Error::io("ipc listen failed", e))?;

        let connections: Arc<Mutex<IndexMap<PeerToken, Conn>>> = Arc::new(Mutex::new(IndexMap::new()));
        let next_token = Arc::new(Mutex::new(1u64));
        let error_cb: Arc<Mutex<Option<ErrorCallback>>> = Arc::new(Mutex::new(None));

        {
            let connections = connections.clone();
            let next_token = next_token.clone();
            let error_cb = error_cb.clone();
            tokio::spawn(async move {
                loop {
                    let stream = match listener.accept().await {
                        Ok(s) => s,
                        Err(e) => {
                            if let Some(cb) = error_cb.lock().as_ref() {
                                cb(Error::io("ipc accept failed", e));
                            }
                            continue;
                        }
                    };
                    let token = {
                        let mut n = next_token.lock();
                        let id = *n;
                        *n += 1;
                        id
                    };
                    let (read_half, write_half) = split(stream);
                    let writer = spawn_writer(write_half);
                    connections.lock().insert(token, Conn { writer });

                    let connections_for_close = connections.clone();
                    let error_cb_for_reader = error_cb.clone();
                    let on_receive = on_receive.clone();
                    let on_eof_or_error: Arc<dyn Fn(Error)> = Arc::new(move |err: Error| {
                        connections_for_close.lock().swap_remove(&token);
                        if let Some(cb) = error_cb_for_reader.lock().as_ref() {
                            cb(err);
                        }
                    });
                    spawn_reader(read_half, on_receive, on_eof_or_error, Some(token));
                }
            });
        }

        Ok(Self { role: Role::Server, state: State::Server { connections, next_token }, error_cb })
    }

    pub async fn connect(
        body: &str,
        timeout_ms: u64,
        on_connect: ConnectCallback,
        on_receive: ReceiveCallback,
    ) -> Result<Self, Error> {
        let name = ns_name(body)?;
        let error_cb: Arc<Mutex<Option<ErrorCallback>>> = Arc::new(Mutex::new(None));
        let writer_slot: Arc<Mutex<Option<tokio::sync::mpsc::UnboundedSender<Vec<u8>>>>> =
            Arc::new(Mutex::new(None));

        let connect_result = tokio::time::timeout(Duration::from_millis(timeout_ms), Stream::connect(name)).await;
        let stream = match connect_result {
            Err(_) => {
                on_connect(Err(Error::new(ErrorKind::Timeout, "connect timed out")));
                return Ok(Self { role: Role::Client, state: State::Client { writer: writer_slot }, error_cb });
            }
            Ok(Err(e)) => {
                on_connect(Err(Error::new(ErrorKind::Io, format!("ipc connect failed: {e}"))));
                return Err(Error::io("ipc connect failed", e));
            }
            Ok(Ok(stream)) => stream,
        };

        let (read_half, write_half) = split(stream);
        let writer = spawn_writer(write_half);
        *writer_slot.lock() = Some(writer);

        let error_cb_for_reader = error_cb.clone();
        let on_eof_or_error: Arc<dyn Fn(Error)> = Arc::new(move |err: Error| {
            if let Some(cb) = error_cb_for_reader.lock().as_ref() {
                cb(err);
            }
        });
        spawn_reader(read_half, on_receive, on_eof_or_error, None);

        on_connect(Ok(()));
        Ok(Self { role: Role::Client, state: State::Client { writer: writer_slot }, error_cb })
    }

    pub fn send(&self, payload: &[u8]) -> Result<(), Error> {
        let frame = encode_frame(payload)?;
        match &self.state {
            State::Server { connections, .. } => {
                for conn in connections.lock().values() {
                    let _ = conn.writer.send(frame.clone());
                }
                Ok(())
            }
            State::Client { writer } => match writer.lock().as_ref() {
                Some(w) => w.send(frame).map_err(|_| Error::new(ErrorKind::Io, "connection closed")),
                None => Err(Error::new(ErrorKind::NotConnected, "ipc client is not connected")),
            },
        }
    }

    pub fn send_to(&self, payload: &[u8], peer: PeerToken) -> Result<(), Error> {
        let frame = encode_frame(payload)?;
        match &self.state {
            State::Server { connections, .. } => {
                let connections = connections.lock();
                let conn = connections
                    .get(&peer)
                    .ok_or_else(|| Error::new(ErrorKind::NotFound, "unknown peer token"))?;
                conn.writer.send(frame).map_err(|_| Error::new(ErrorKind::Io, "connection closed"))
            }
            State::Client { .. } => self.send(payload),
        }
    }

    pub fn disconnect(&self) {
        match &self.state {
            State::Server { connections, .. } => connections.lock().clear(),
            State::Client { writer } => {
                *writer.lock() = None;
            }
        }
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
}
