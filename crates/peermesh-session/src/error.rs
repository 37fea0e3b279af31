//! Error types for the session layer.
//!
//! None of these are fatal: the unit of failure is a single peer session,
//! and even within a session most conditions only drop one frame.

use peermesh_protocol::{PeerId, ProtocolError};
use peermesh_transport::TransportError;

/// A frame arrived in an order the transfer state machine doesn't allow.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SequenceError {
    /// File metadata arrived while another transfer was still receiving.
    /// The partial transfer was discarded and the new one started.
    #[error("new file metadata while receiving {discarded:?}; partial transfer discarded")]
    UnexpectedMeta { discarded: String },

    /// A chunk arrived with no transfer in progress.
    #[error("file chunk without preceding metadata")]
    ChunkWithoutMeta,

    /// An end-of-file marker arrived with no transfer in progress.
    #[error("end of file without preceding metadata")]
    EndWithoutMeta,
}

/// Errors that can occur in a peer session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// A send was attempted before the channel connected (or after it
    /// closed). The frame was dropped.
    #[error("peer {0} is not connected")]
    NotConnected(PeerId),

    /// The channel refused a signaling payload.
    #[error("signal from {peer} rejected: {source}")]
    SignalRejected {
        peer: PeerId,
        #[source]
        source: TransportError,
    },

    /// The channel could not be opened.
    #[error("could not open channel to {peer}: {source}")]
    OpenFailed {
        peer: PeerId,
        #[source]
        source: TransportError,
    },

    /// The channel reported an error or a write failed.
    #[error("channel to {peer} failed: {reason}")]
    ChannelFailure { peer: PeerId, reason: String },

    /// The configuration asks for something sessions can't provide.
    #[error("invalid session config: {0}")]
    InvalidConfig(&'static str),

    /// A payload didn't decode into a frame.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A frame arrived out of sequence.
    #[error(transparent)]
    Sequence(#[from] SequenceError),
}
