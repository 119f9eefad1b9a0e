//! Binary encode/decode for the four frame shapes.
//!
//! The core treats the codec as an opaque `encode_X`/`decode_X` pair: the
//! bus never inspects payload bytes past the leading type tag. We pin one
//! concrete codec here — `bincode` over `serde`-derived wire structs —
//! rather than expose a pluggable codec trait; mixed codecs between peers
//! would be indistinguishable from corruption, so one gets picked and
//! pinned.
//!
//! Every encoded frame begins with the `FrameKind` tag byte so a receiver
//! can select a dispatch path (request vs. response vs. error) without a
//! full decode.

use serde::{Deserialize, Serialize};

use reactor::error::{Error, ErrorKind};

use crate::frame::{Broadcast, Frame, FrameKind};

#[derive(Serialize, Deserialize)]
struct WireRequest {
    msgid: u32,
    method: String,
    params: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct WireResponse {
    msgid: u32,
    result: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct WireNotification {
    method: String,
    params: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct WireError {
    msgid: u32,
    code: i32,
    message: String,
}

#[derive(Serialize, Deserialize)]
struct WireBroadcast {
    topic: String,
    data: Vec<u8>,
}

fn codec_err(action: &str, source: bincode::Error) -> Error {
    Error::with_source(ErrorKind::Framing, format!("{action} failed"), source)
}

/// Encode any [`Frame`] into its tagged wire representation.
pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>, Error> {
    let mut out = vec![frame.kind() as u8];
    match frame {
        Frame::Request { msgid, method, params } => {
            let w = WireRequest { msgid: *msgid, method: method.clone(), params: params.clone() };
            bincode::serialize_into(&mut out, &w).map_err(|e| codec_err("encode_request", e))?;
        }
        Frame::Response { msgid, result } => {
            let w = WireResponse { msgid: *msgid, result: result.clone() };
            bincode::serialize_into(&mut out, &w).map_err(|e| codec_err("encode_response", e))?;
        }
        Frame::Notification { method, params } => {
            let w = WireNotification { method: method.clone(), params: params.clone() };
            bincode::serialize_into(&mut out, &w).map_err(|e| codec_err("encode_notification", e))?;
        }
        Frame::Error { msgid, code, message } => {
            let w = WireError { msgid: *msgid, code: *code, message: message.clone() };
            bincode::serialize_into(&mut out, &w).map_err(|e| codec_err("encode_error", e))?;
        }
    }
    Ok(out)
}

/// Decode a tagged frame previously produced by [`encode_frame`].
pub fn decode_frame(bytes: &[u8]) -> Result<Frame, Error> {
    let kind = crate::frame::peek_kind(bytes)?;
    let body = &bytes[1..];
    match kind {
        FrameKind::Request => {
            let w: WireRequest = bincode::deserialize(body).map_err(|e| codec_err("decode_request", e))?;
            Ok(Frame::Request { msgid: w.msgid, method: w.method, params: w.params })
        }
        FrameKind::Response => {
            let w: WireResponse = bincode::deserialize(body).map_err(|e| codec_err("decode_response", e))?;
            Ok(Frame::Response { msgid: w.msgid, result: w.result })
        }
        FrameKind::Notification => {
            let w: WireNotification =
                bincode::deserialize(body).map_err(|e| codec_err("decode_notification", e))?;
            Ok(Frame::Notification { method: w.method, params: w.params })
        }
        FrameKind::Error => {
            let w: WireError = bincode::deserialize(body).map_err(|e| codec_err("decode_error", e))?;
            Ok(Frame::Error { msgid: w.msgid, code: w.code, message: w.message })
        }
    }
}

/// Encode a broadcast `{topic, payload}` record. Broadcasts carry no msgid
/// and are never dispatch-tagged against the request/response kinds — the
/// publish/subscribe path decodes them directly rather than through
/// [`decode_frame`].
pub fn encode_broadcast(b: &Broadcast) -> Result<Vec<u8>, Error> {
    let w = WireBroadcast { topic: b.topic.clone(), data: b.data.clone() };
    bincode::serialize(&w).map_err(|e| codec_err("encode_broadcast", e))
}

pub fn decode_broadcast(bytes: &[u8]) -> Result<Broadcast, Error> {
    let w: WireBroadcast = bincode::deserialize(bytes).map_err(|e| codec_err("decode_broadcast", e))?;
    Ok(Broadcast { topic: w.topic, data: w.data })
}

/// Build an `ERROR` frame's payload in the fixed wire shape every peer
/// must agree on regardless of codec: `[i32 BE code][UTF-8 message,
/// NUL-terminated]`. Used by the bus when synthesizing `METHOD_NOT_FOUND`
/// replies and by handlers that want this exact layout rather than the
/// generic `bincode` encoding of [`encode_frame`]. Readers must
/// bounds-check; a zero-length payload is malformed.
pub fn encode_error_payload(code: i32, message: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + message.len() + 1);
    out.extend_from_slice(&code.to_be_bytes());
    out.extend_from_slice(message.as_bytes());
    out.push(0);
    out
}

pub fn decode_error_payload(bytes: &[u8]) -> Result<(i32, String), Error> {
    if bytes.len() < 5 {
        return Err(Error::new(ErrorKind::Framing, "malformed error payload: too short"));
    }
    let code = i32::from_be_bytes(bytes[..4].try_into().unwrap());
    let rest = &bytes[4..];
    let nul = rest
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| Error::new(ErrorKind::Framing, "malformed error payload: missing NUL terminator"))?;
    let message =
        String::from_utf8(rest[..nul].to_vec()).map_err(|e| Error::with_source(ErrorKind::Framing, "malformed error payload: not UTF-8", e))?;
    Ok((code, message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_request() {
        let f = Frame::Request { msgid: 7, method: "Add".into(), params: vec![1, 2, 3] };
        let bytes = encode_frame(&f).unwrap();
        assert_eq!(decode_frame(&bytes).unwrap(), f);
    }

    #[test]
    fn round_trips_response() {
        let f = Frame::Response { msgid: 7, result: vec![100] };
        let bytes = encode_frame(&f).unwrap();
        assert_eq!(decode_frame(&bytes).unwrap(), f);
    }

    #[test]
    fn round_trips_error() {
        let f = Frame::Error { msgid: 9, code: 42, message: "boom".into() };
        let bytes = encode_frame(&f).unwrap();
        assert_eq!(decode_frame(&bytes).unwrap(), f);
    }

    #[test]
    fn round_trips_broadcast() {
        let b = Broadcast { topic: "PublishNews".into(), data: vec![9, 9, 9] };
        let bytes = encode_broadcast(&b).unwrap();
        assert_eq!(decode_broadcast(&bytes).unwrap(), b);
    }

    #[test]
    fn error_payload_round_trips_per_wire_format() {
        let payload = encode_error_payload(404, "method not found");
        let (code, message) = decode_error_payload(&payload).unwrap();
        assert_eq!(code, 404);
        assert_eq!(message, "method not found");
    }

    #[test]
    fn empty_error_payload_is_malformed() {
        assert!(decode_error_payload(&[]).is_err());
    }
}
