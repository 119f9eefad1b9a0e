//! Frame record shapes and the leading type-tag byte that lets the bus
//! dispatch without a full decode.

use reactor::error::{Error, ErrorKind};

/// The discriminant written as the first byte of every encoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    Request = 0,
    Response = 1,
    Notification = 2,
    Error = 3,
}

impl FrameKind {
    pub fn from_tag(tag: u8) -> Result<Self, Error> {
        match tag {
            0 => Ok(FrameKind::Request),
            1 => Ok(FrameKind::Response),
            2 => Ok(FrameKind::Notification),
            3 => Ok(FrameKind::Error),
            other => Err(Error::new(ErrorKind::Framing, format!("unknown frame type tag {other}"))),
        }
    }
}

/// Inspect a frame's type byte without decoding anything past it.
pub fn peek_kind(bytes: &[u8]) -> Result<FrameKind, Error> {
    let tag = *bytes
        .first()
        .ok_or_else(|| Error::new(ErrorKind::Framing, "empty frame has no type tag"))?;
    FrameKind::from_tag(tag)
}

/// A decoded frame. The core never inspects `params`/`result`/`data` — those
/// are opaque bytes produced and consumed by the application's own
/// serializer (see `module-level docs in lib.rs`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Request { msgid: u32, method: String, params: Vec<u8> },
    Response { msgid: u32, result: Vec<u8> },
    Notification { method: String, params: Vec<u8> },
    Error { msgid: u32, code: i32, message: String },
}

impl Frame {
    pub fn kind(&self) -> FrameKind {
        match self {
            Frame::Request { .. } => FrameKind::Request,
            Frame::Response { .. } => FrameKind::Response,
            Frame::Notification { .. } => FrameKind::Notification,
            Frame::Error { .. } => FrameKind::Error,
        }
    }

    pub fn msgid(&self) -> Option<u32> {
        match self {
            Frame::Request { msgid, .. } | Frame::Response { msgid, .. } | Frame::Error { msgid, .. } => {
                Some(*msgid)
            }
            Frame::Notification { .. } => None,
        }
    }
}

/// A one-to-many publication: {topic, payload}. Encoded identically to the
/// request/response frames (same codec), but never msgid-correlated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Broadcast {
    pub topic: String,
    pub data: Vec<u8>,
}
