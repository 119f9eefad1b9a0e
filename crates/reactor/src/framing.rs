//! Length-prefixed framing codec for stream transports.
//!
//! Each frame is a 4-byte big-endian length prefix `N` followed by exactly
//! `N` bytes of payload, `N <= MAX_FRAME_LEN`. UDP does not use this module
//! at all — one datagram is one payload there.

use bytes::{Buf, BytesMut};

use crate::error::{Error, ErrorKind};

/// Hard cap on a single frame's payload, bounding the staging buffer.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

const LEN_PREFIX: usize = 4;

/// Prefix `payload` with its big-endian u32 length.
///
/// Returns `ErrorKind::Framing` if the payload itself exceeds
/// [`MAX_FRAME_LEN`], since that frame could never be decoded back.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, Error> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(Error::new(
            ErrorKind::Framing,
            format!("payload of {} bytes exceeds max frame length {}", payload.len(), MAX_FRAME_LEN),
        ));
    }
    let mut buf = Vec::with_capacity(LEN_PREFIX + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Incremental decoder holding one connection's staging buffer.
///
/// `feed` appends newly-arrived bytes and returns every complete payload
/// that can now be extracted; a partial frame remains buffered for the next
/// call. An oversized length prefix is reported as `ErrorKind::Framing` —
/// the caller must close the connection after consuming whatever frames
/// `feed` already returned.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self { buf: BytesMut::new() }
    }

    /// Feed newly-arrived bytes. Returns every payload fully decoded from
    /// the buffer, *and* an error if an oversized length prefix was seen —
    /// any payloads decoded before that point are still returned; already-
    /// parsed frames are delivered before the connection is reset.
    pub fn feed(&mut self, data: &[u8]) -> (Vec<Vec<u8>>, Option<Error>) {
        self.buf.extend_from_slice(data);
        let mut out = Vec::new();
        loop {
            if self.buf.len() < LEN_PREFIX {
                break;
            }
            let len = u32::from_be_bytes(self.buf[..LEN_PREFIX].try_into().unwrap()) as usize;
            if len > MAX_FRAME_LEN {
                let err = Error::new(
                    ErrorKind::Framing,
                    format!("frame length {len} exceeds max frame length {MAX_FRAME_LEN}"),
                );
                return (out, Some(err));
            }
            if self.buf.len() < LEN_PREFIX + len {
                break;
            }
            self.buf.advance(LEN_PREFIX);
            let payload = self.buf.split_to(len);
            out.push(payload.to_vec());
        }
        (out, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_single_frame() {
        let frame = encode_frame(b"hello").unwrap();
        let mut dec = FrameDecoder::new();
        let (payloads, err) = dec.feed(&frame);
        assert!(err.is_none());
        assert_eq!(payloads, vec![b"hello".to_vec()]);
    }

    #[test]
    fn partial_frame_stays_buffered() {
        let frame = encode_frame(b"hello world").unwrap();
        let mut dec = FrameDecoder::new();
        let (first, err) = dec.feed(&frame[..6]);
        assert!(err.is_none());
        assert!(first.is_empty());
        let (payloads, err) = dec.feed(&frame[6..]);
        assert!(err.is_none());
        assert_eq!(payloads, vec![b"hello world".to_vec()]);
    }

    #[test]
    fn reassembles_arbitrary_byte_splits_across_many_frames() {
        let payloads: Vec<Vec<u8>> = (0..8).map(|i| vec![i as u8; 4096]).collect();
        let mut stream = Vec::new();
        for p in &payloads {
            stream.extend(encode_frame(p).unwrap());
        }

        // Split the combined stream at 16 arbitrary boundaries and feed them
        // one at a time, mirroring 16 kernel reads delivering 8 frames.
        let mut dec = FrameDecoder::new();
        let mut got = Vec::new();
        let chunk = stream.len() / 16 + 1;
        for window in stream.chunks(chunk) {
            let (frames, err) = dec.feed(window);
            assert!(err.is_none());
            got.extend(frames);
        }
        assert_eq!(got, payloads);
    }

    #[test]
    fn oversized_frame_is_a_framing_error() {
        let mut dec = FrameDecoder::new();
        let mut bogus = Vec::new();
        bogus.extend_from_slice(&((MAX_FRAME_LEN as u32) + 1).to_be_bytes());
        let (frames, err) = dec.feed(&bogus);
        assert!(frames.is_empty());
        assert_eq!(err.unwrap().kind(), ErrorKind::Framing);
    }

    #[test]
    fn already_parsed_frames_survive_a_later_oversized_frame() {
        let mut stream = encode_frame(b"first").unwrap();
        stream.extend_from_slice(&((MAX_FRAME_LEN as u32) + 1).to_be_bytes());

        let mut dec = FrameDecoder::new();
        let (frames, err) = dec.feed(&stream);
        assert_eq!(frames, vec![b"first".to_vec()]);
        assert!(err.is_some());
    }

    #[test]
    fn encode_rejects_oversized_payload() {
        let payload = vec![0u8; MAX_FRAME_LEN + 1];
        let err = encode_frame(&payload).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Framing);
    }
}
