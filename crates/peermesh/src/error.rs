//! Unified error type for peermesh, plus the relay's refusal reasons.

use peermesh_protocol::{PeerId, ProtocolError, RoomId};
use peermesh_room::RoomError;
use peermesh_session::SessionError;
use peermesh_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// Applications using the `peermesh` crate deal with this single type;
/// the `#[from]` variants let `?` convert sub-crate errors.
#[derive(Debug, thiserror::Error)]
pub enum PeermeshError {
    /// Relay link or peer channel failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Encode/decode failure or malformed frame.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A peer session could not be created or used.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The mesh refused a request or is gone.
    #[error(transparent)]
    Room(#[from] RoomError),

    /// The relay refused a request.
    #[error(transparent)]
    Relay(#[from] RelayError),

    /// The relay link did not complete its `Hello` / `Welcome` exchange.
    #[error("handshake failed: {0}")]
    Handshake(String),
}

/// Why the relay refused a client request.
///
/// Sent back to the client as a `RelayEvent::Error` (or
/// `RelayEvent::JoinRefused` for a refused join) carrying
/// [`code`](Self::code) and the display text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    /// The room already holds its maximum number of members.
    #[error("room {room} is full ({max} peers)")]
    RoomFull { room: RoomId, max: usize },

    /// The signal target is unknown or not in the sender's room.
    #[error("peer {0} is not in your room")]
    UnknownTarget(PeerId),

    /// The client asked for something it can't do yet.
    #[error("{0}")]
    BadRequest(String),
}

impl RelayError {
    /// HTTP-style status code for the error reply.
    pub fn code(&self) -> u16 {
        match self {
            Self::BadRequest(_) => 400,
            Self::UnknownTarget(_) => 404,
            Self::RoomFull { .. } => 409,
        }
    }
}
