//! Relay-side bookkeeping: who is connected, who is in which room.
//!
//! The registry is synchronous. Each connection handler registers an
//! outbox when its handshake completes, and every relay decision is
//! delivered by pushing [`RelayEvent`]s into the outboxes involved. The
//! handler tasks drain their outbox onto the socket.
//!
//! A participant is in at most one room. Joining a second room leaves the
//! first one, with the usual `PeerLeft` broadcast.

use std::collections::HashMap;

use peermesh_protocol::{PeerId, PeerInfo, RelayEvent, RoomId, SignalData};
use rand::Rng;
use tokio::sync::mpsc;

use crate::RelayError;

/// Where the relay pushes events for one connected participant.
pub type Outbox = mpsc::UnboundedSender<RelayEvent>;

struct Member {
    info: PeerInfo,
    outbox: Outbox,
    room: Option<RoomId>,
}

/// All connected participants and the rooms they are in.
pub struct RelayRegistry {
    members: HashMap<PeerId, Member>,
    /// Room members in join order.
    rooms: HashMap<RoomId, Vec<PeerId>>,
    max_room_peers: Option<usize>,
}

impl RelayRegistry {
    /// Creates an empty registry. `max_room_peers` caps every room.
    pub fn new(max_room_peers: Option<usize>) -> Self {
        Self {
            members: HashMap::new(),
            rooms: HashMap::new(),
            max_room_peers,
        }
    }

    /// Registers a freshly handshaken connection and returns its new
    /// session id.
    pub fn register(&mut self, display_name: Option<String>, outbox: Outbox) -> PeerId {
        let mut id = PeerId::new(generate_peer_id());
        while self.members.contains_key(&id) {
            id = PeerId::new(generate_peer_id());
        }
        self.members.insert(
            id.clone(),
            Member {
                info: PeerInfo::new(id.clone(), display_name),
                outbox,
                room: None,
            },
        );
        id
    }

    /// Removes a participant, leaving its room first. Returns the room it
    /// was in.
    pub fn unregister(&mut self, id: &PeerId) -> Option<RoomId> {
        let room = self.leave_current(id);
        self.members.remove(id);
        room
    }

    /// Number of connected participants.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether nobody is connected.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Members of `room`, in join order.
    pub fn room_members(&self, room: &RoomId) -> Vec<PeerId> {
        self.rooms.get(room).cloned().unwrap_or_default()
    }

    /// The room `id` is currently in.
    pub fn room_of(&self, id: &PeerId) -> Option<&RoomId> {
        self.members.get(id).and_then(|m| m.room.as_ref())
    }

    // ---------------------------------------------------------------------
    // Client requests
    // ---------------------------------------------------------------------

    /// Puts `id` into `room`.
    ///
    /// The joiner receives `ExistingPeers` (everyone already there, in
    /// join order); everyone already there receives `PeerJoined`. Joining
    /// the room one is already in is a no-op.
    pub fn join(&mut self, id: &PeerId, room: RoomId) -> Result<(), RelayError> {
        let Some(member) = self.members.get(id) else {
            return Err(RelayError::BadRequest("say hello first".into()));
        };
        if member.room.as_ref() == Some(&room) {
            return Ok(());
        }

        let existing = self.room_members(&room);
        if let Some(max) = self.max_room_peers {
            if existing.len() >= max {
                return Err(RelayError::RoomFull { room, max });
            }
        }

        self.leave_current(id);

        let joiner = self.info(id);
        let peers: Vec<PeerInfo> = existing.iter().filter_map(|p| self.info(p)).collect();
        self.send(
            id,
            RelayEvent::ExistingPeers {
                room: room.clone(),
                peers,
            },
        );
        if let Some(joiner) = joiner {
            for peer in &existing {
                self.send(peer, RelayEvent::PeerJoined { peer: joiner.clone() });
            }
        }

        tracing::info!(peer = %id, %room, members = existing.len() + 1, "peer joined room");
        self.rooms.entry(room.clone()).or_default().push(id.clone());
        if let Some(member) = self.members.get_mut(id) {
            member.room = Some(room);
        }
        Ok(())
    }

    /// Takes `id` out of `room`. Returns `false` if it wasn't there.
    pub fn leave(&mut self, id: &PeerId, room: &RoomId) -> bool {
        if self.room_of(id) != Some(room) {
            return false;
        }
        self.leave_current(id).is_some()
    }

    /// Forwards a signaling payload to `target`, which must share a room
    /// with `from`.
    pub fn signal(
        &mut self,
        from: &PeerId,
        target: PeerId,
        payload: SignalData,
    ) -> Result<(), RelayError> {
        let same_room = match (self.room_of(from), self.room_of(&target)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        };
        if !same_room {
            return Err(RelayError::UnknownTarget(target));
        }

        let display_name = self.info(from).and_then(|p| p.display_name);
        self.send(
            &target,
            RelayEvent::Signal {
                from: from.clone(),
                display_name,
                payload,
            },
        );
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    fn leave_current(&mut self, id: &PeerId) -> Option<RoomId> {
        let room = self.members.get_mut(id)?.room.take()?;

        let remaining = match self.rooms.get_mut(&room) {
            Some(members) => {
                members.retain(|m| m != id);
                members.clone()
            }
            None => Vec::new(),
        };
        if remaining.is_empty() {
            self.rooms.remove(&room);
        }

        if let Some(leaver) = self.info(id) {
            for peer in &remaining {
                self.send(peer, RelayEvent::PeerLeft { peer: leaver.clone() });
            }
        }
        tracing::info!(peer = %id, %room, members = remaining.len(), "peer left room");
        Some(room)
    }

    fn info(&self, id: &PeerId) -> Option<PeerInfo> {
        self.members.get(id).map(|m| m.info.clone())
    }

    fn send(&self, to: &PeerId, event: RelayEvent) {
        if let Some(member) = self.members.get(to) {
            // A closed outbox means the handler is already tearing down.
            let _ = member.outbox.send(event);
        }
    }
}

/// Generates a random 32-character hex session id (128 bits).
fn generate_peer_id() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 16] = rng.random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

// =========================================================================
// Tests
// =========================================================================
