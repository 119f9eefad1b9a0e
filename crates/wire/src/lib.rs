//! Wire frame shapes and the one pinned codec that (de)serializes them.
//! Everything above this crate treats `Frame`/`Broadcast` as opaque once
//! encoded — the bus dispatches on [`frame::peek_kind`] alone.

pub mod codec;
pub mod frame;

pub use codec::{decode_broadcast, decode_error_payload, decode_frame, encode_broadcast, encode_error_payload, encode_frame};
pub use frame::{Broadcast, Frame, FrameKind};
