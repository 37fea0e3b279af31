//! Identity types and the relay control protocol.
//!
//! The relay only ever carries these small JSON messages: room membership
//! and opaque signaling payloads. Chat text and file bytes never touch it;
//! they travel as [`Frame`](crate::Frame)s over the direct peer channels.

use std::fmt;

use peermesh_transport::SignalData;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// The relay-assigned session id of a participant.
///
/// Opaque to everyone but the relay. `#[serde(transparent)]` keeps it a
/// plain JSON string on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub String);

impl PeerId {
    /// Creates a peer id from any string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrows the raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A room name. Operator-supplied; no reserved values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub String);

impl RoomId {
    /// Creates a room id from any string.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Borrows the raw name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A participant as the relay describes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    /// Relay session id.
    pub id: PeerId,
    /// Human-friendly name, if the participant gave one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl PeerInfo {
    /// Creates peer info with an optional display name.
    pub fn new(id: impl Into<PeerId>, display_name: Option<String>) -> Self {
        Self {
            id: id.into(),
            display_name,
        }
    }

    /// The display name, falling back to the id.
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(self.id.as_str())
    }
}

// ---------------------------------------------------------------------------
// Client → relay
// ---------------------------------------------------------------------------

/// Messages a participant sends to the relay.
///
/// Internally tagged: `{"type": "Join", "room": "lobby"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// First message on a relay link. The relay answers with
    /// [`RelayEvent::Welcome`].
    Hello {
        #[serde(default)]
        display_name: Option<String>,
    },

    /// Enter a room. The relay answers with [`RelayEvent::ExistingPeers`]
    /// and tells everyone else [`RelayEvent::PeerJoined`], or refuses
    /// with [`RelayEvent::JoinRefused`].
    Join { room: RoomId },

    /// Leave a room.
    Leave { room: RoomId },

    /// Relay an opaque signaling payload to one member of the same room.
    Signal { target: PeerId, payload: SignalData },
}

// ---------------------------------------------------------------------------
// Relay → client
// ---------------------------------------------------------------------------

/// Messages the relay sends to a participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RelayEvent {
    /// Handshake reply carrying the participant's own session id.
    Welcome { peer_id: PeerId },

    /// Sent once to a joiner: everyone already in the room, in join order.
    ExistingPeers { room: RoomId, peers: Vec<PeerInfo> },

    /// Someone joined the room after us.
    PeerJoined { peer: PeerInfo },

    /// Someone left the room (explicitly or by disconnecting).
    PeerLeft { peer: PeerInfo },

    /// A signaling payload from another member.
    Signal {
        from: PeerId,
        #[serde(default)]
        display_name: Option<String>,
        payload: SignalData,
    },

    /// A `Join` was refused and the participant is not in `room`.
    /// `code` is 409 when the room is full.
    JoinRefused {
        room: RoomId,
        code: u16,
        message: String,
    },

    /// A request other than `Join` was refused. `code` follows HTTP
    /// conventions (400 bad request, 404 unknown target).
    Error { code: u16, message: String },
}

// =========================================================================
// Tests
// =========================================================================
