//! Application-visible mesh events.
//!
//! Every condition the mesh handles ends up as one of these, and every
//! one renders a human-readable status line through `Display`.

use std::fmt;

use peermesh_protocol::{FileMeta, PeerInfo, RoomId};
use peermesh_session::CompletedTransfer;

/// Something happened in the mesh.
#[derive(Debug, Clone, PartialEq)]
pub enum MeshEvent {
    /// The local participant asked to join a room.
    Joined { room: RoomId },

    /// The local participant left its room. Every session was closed.
    Left { room: RoomId, sessions_closed: usize },

    /// A session toward a peer was created and is negotiating.
    PeerDiscovered { peer: PeerInfo, initiator: bool },

    /// The channel to a peer is ready.
    PeerConnected { peer: PeerInfo },

    /// The channel to a peer closed (`reason: None`) or failed.
    PeerDisconnected { peer: PeerInfo, reason: Option<String> },

    /// The relay reported that a peer left the room.
    PeerLeft { peer: PeerInfo },

    /// A chat message arrived.
    Message { from: PeerInfo, text: String },

    /// A peer started sending a file.
    TransferStarted { from: PeerInfo, meta: FileMeta },

    /// A chunk of an incoming file arrived.
    TransferProgress {
        from: PeerInfo,
        received: u64,
        expected: u64,
    },

    /// An incoming file is complete.
    FileReceived { from: PeerInfo, file: CompletedTransfer },

    /// An outgoing file was fully sent.
    FileSent { meta: FileMeta, recipients: usize },

    /// A recoverable problem: a dropped frame, a rejected signal, a relay
    /// error reply.
    Notice(String),
}

impl MeshEvent {
    /// The peer this event concerns, if any.
    pub fn peer(&self) -> Option<&PeerInfo> {
        match self {
            Self::PeerDiscovered { peer, .. }
            | Self::PeerConnected { peer }
            | Self::PeerDisconnected { peer, .. }
            | Self::PeerLeft { peer } => Some(peer),
            Self::Message { from, .. }
            | Self::TransferStarted { from, .. }
            | Self::TransferProgress { from, .. }
            | Self::FileReceived { from, .. } => Some(from),
            Self::Joined { .. }
            | Self::Left { .. }
            | Self::FileSent { .. }
            | Self::Notice(_) => None,
        }
    }
}

impl fmt::Display for MeshEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Joined { room } => write!(f, "joined room {room}"),
            Self::Left { room, sessions_closed } => {
                write!(f, "left room {room} ({sessions_closed} connection(s) closed)")
            }
            Self::PeerDiscovered { peer, initiator: true } => {
                write!(f, "connecting to {}", peer.label())
            }
            Self::PeerDiscovered { peer, initiator: false } => {
                write!(f, "waiting for {} to connect", peer.label())
            }
            Self::PeerConnected { peer } => {
                write!(f, "connection established with {}", peer.label())
            }
            Self::PeerDisconnected { peer, reason: None } => {
                write!(f, "connection with {} closed", peer.label())
            }
            Self::PeerDisconnected { peer, reason: Some(reason) } => {
                write!(f, "connection with {} failed: {reason}", peer.label())
            }
            Self::PeerLeft { peer } => write!(f, "{} left the room", peer.label()),
            Self::Message { from, text } => write!(f, "{}: {text}", from.label()),
            Self::TransferStarted { from, meta } => write!(
                f,
                "receiving file {} ({} bytes) from {}",
                meta.name,
                meta.size,
                from.label()
            ),
            Self::TransferProgress { from, received, expected } => {
                write!(f, "{}: {received}/{expected} bytes", from.label())
            }
            Self::FileReceived { from, file } => write!(
                f,
                "received file {} ({} bytes) from {}",
                file.meta.name,
                file.data.len(),
                from.label()
            ),
            Self::FileSent { meta, recipients } => {
                write!(f, "sent file {} to {recipients} peer(s)", meta.name)
            }
            Self::Notice(text) => f.write_str(text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ana() -> PeerInfo {
        PeerInfo::new("s1", Some("Ana".into()))
    }

    #[test]
    fn test_status_lines_use_display_name() {
        assert_eq!(
            MeshEvent::PeerConnected { peer: ana() }.to_string(),
            "connection established with Ana"
        );
        assert_eq!(
            MeshEvent::PeerLeft { peer: ana() }.to_string(),
            "Ana left the room"
        );
        assert_eq!(
            MeshEvent::Message { from: ana(), text: "hi".into() }.to_string(),
            "Ana: hi"
        );
    }

    #[test]
    fn test_status_line_falls_back_to_id() {
        let peer = PeerInfo::new("s9", None);
        assert_eq!(
            MeshEvent::PeerDiscovered { peer, initiator: true }.to_string(),
            "connecting to s9"
        );
    }

    #[test]
    fn test_transfer_status_lines() {
        let meta = FileMeta::new("a.pdf", 40_960, "application/pdf");
        assert_eq!(
            MeshEvent::TransferStarted { from: ana(), meta: meta.clone() }.to_string(),
            "receiving file a.pdf (40960 bytes) from Ana"
        );
        assert_eq!(
            MeshEvent::FileSent { meta, recipients: 2 }.to_string(),
            "sent file a.pdf to 2 peer(s)"
        );
    }

    #[test]
    fn test_disconnect_line_includes_reason() {
        let event = MeshEvent::PeerDisconnected {
            peer: ana(),
            reason: Some("link severed".into()),
        };
        assert_eq!(event.to_string(), "connection with Ana failed: link severed");
        assert_eq!(event.peer().map(|p| p.label()), Some("Ana"));
    }

    #[test]
    fn test_notice_has_no_peer() {
        let event = MeshEvent::Notice("relay error 404: unknown target".into());
        assert!(event.peer().is_none());
        assert_eq!(event.to_string(), "relay error 404: unknown target");
    }
}
