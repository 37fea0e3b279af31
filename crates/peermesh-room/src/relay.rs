//! Binding between the relay protocol and the mesh coordinator.
//!
//! The relay speaks [`RelayEvent`] / [`ClientMessage`] as JSON. This
//! adapter decodes what the relay sends, turns it into coordinator calls,
//! and encodes what the coordinator wants the relay to carry. It holds no
//! state of its own.

use peermesh_protocol::{ClientMessage, Codec, JsonCodec, ProtocolError, RelayEvent};

use crate::MeshCoordinator;

/// Translates between relay messages and [`MeshCoordinator`] calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelayBinding {
    codec: JsonCodec,
}

impl RelayBinding {
    /// Creates a binding using the JSON relay codec.
    pub fn new() -> Self {
        Self::default()
    }

    /// Encodes a message for the relay link.
    pub fn encode(&self, msg: &ClientMessage) -> Result<Vec<u8>, ProtocolError> {
        self.codec.encode(msg)
    }

    /// Decodes one message received from the relay link.
    pub fn decode(&self, data: &[u8]) -> Result<RelayEvent, ProtocolError> {
        self.codec.decode(data)
    }

    /// Applies one relay event to the coordinator.
    pub fn dispatch(&self, mesh: &mut MeshCoordinator, event: RelayEvent) {
        match event {
            RelayEvent::Welcome { peer_id } => mesh.set_local_id(peer_id),
            RelayEvent::ExistingPeers { room, peers } => {
                mesh.on_existing_peers(room, peers);
            }
            RelayEvent::PeerJoined { peer } => mesh.on_peer_joined(peer),
            RelayEvent::PeerLeft { peer } => mesh.on_peer_left(peer),
            RelayEvent::Signal {
                from,
                display_name,
                payload,
            } => mesh.on_signal(from, display_name, payload),
            RelayEvent::JoinRefused {
                room,
                code,
                message,
            } => mesh.on_join_refused(room, &format!("{code} {message}")),
            RelayEvent::Error { code, message } => {
                tracing::warn!(code, %message, "relay error");
                mesh.notice(format!("relay error {code}: {message}"));
            }
        }
    }
}
