//! Wire protocol for peermesh.
//!
//! This crate defines the two "languages" of the system:
//!
//! - **Peer frames** ([`Frame`], [`FrameCodec`]) — what two participants
//!   exchange over their direct channel: chat text and chunked files,
//!   each payload prefixed with a one-byte tag.
//! - **Relay messages** ([`ClientMessage`], [`RelayEvent`]) — the small
//!   JSON control messages carried by the relay: room membership and
//!   opaque signaling payloads, encoded through the [`Codec`] trait.
//!
//! # Architecture
//!
//! ```text
//! Relay link (bytes) → JsonCodec → RelayEvent  → mesh coordinator
//! Peer channel (bytes) → FrameCodec → Frame    → peer session
//! ```

mod codec;
mod error;
mod frame;
mod types;

pub use codec::{Codec, JsonCodec};
pub use error::ProtocolError;
pub use frame::{
    FileMeta, Frame, FrameCodec, TAG_FILE_CHUNK, TAG_FILE_END, TAG_FILE_META,
    TAG_TEXT,
};
pub use peermesh_transport::SignalData;
pub use types::{ClientMessage, PeerId, PeerInfo, RelayEvent, RoomId};
