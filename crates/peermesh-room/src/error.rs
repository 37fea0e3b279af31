//! Error types for the mesh layer.

use peermesh_protocol::RoomId;
use peermesh_session::SessionError;

/// Errors that can occur during mesh operations.
///
/// Per-peer failures never show up here; they become
/// [`MeshEvent`](crate::MeshEvent)s. These are the errors a caller of
/// the mesh can act on.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    /// The operation needs a joined room.
    #[error("not in a room")]
    NotJoined,

    /// Already in a room; leave it first.
    #[error("already in room {0}")]
    AlreadyJoined(RoomId),

    /// The mesh actor has stopped.
    #[error("mesh is unavailable")]
    Unavailable,

    /// Every recipient dropped out before the file was fully sent.
    #[error("transfer of {0:?} aborted: no recipients left")]
    TransferAborted(String),

    /// The configuration is unusable.
    #[error("invalid mesh config: {0}")]
    InvalidConfig(String),

    /// A peer session could not be created.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Reading a file source failed.
    #[error("file I/O failed: {0}")]
    Io(#[from] std::io::Error),
}
