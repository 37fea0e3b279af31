//! A deterministic in-process room: coordinators wired to a fake relay
//! and a memory network, pumped by hand until nothing moves.

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use peermesh_protocol::{ClientMessage, PeerId, PeerInfo, RelayEvent, RoomId};
use peermesh_room::{MeshConfig, MeshCoordinator, MeshEvent, RelayBinding};
use peermesh_transport::{ChannelEventReceiver, MemoryNetwork};
use tokio::sync::mpsc;

pub struct Node {
    pub mesh: MeshCoordinator,
    pub name: String,
    channels: ChannelEventReceiver,
    relay_rx: mpsc::UnboundedReceiver<ClientMessage>,
    events_rx: mpsc::UnboundedReceiver<MeshEvent>,
    /// Every event this node has published so far.
    pub events: Vec<MeshEvent>,
}

pub struct Harness {
    pub net: MemoryNetwork,
    pub nodes: BTreeMap<String, Node>,
    /// Room members in join order.
    rooms: BTreeMap<String, Vec<String>>,
    binding: RelayBinding,
    /// Hold `PeerJoined` notifications back until everything else settled.
    pub delay_peer_joined: bool,
    held: VecDeque<(String, RelayEvent)>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            net: MemoryNetwork::new(),
            nodes: BTreeMap::new(),
            rooms: BTreeMap::new(),
            binding: RelayBinding::new(),
            delay_peer_joined: false,
            held: VecDeque::new(),
        }
    }

    /// Adds a participant whose relay id is `id`.
    pub fn add(&mut self, id: &str, name: &str) {
        let (relay_tx, relay_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (mut mesh, channels) = MeshCoordinator::new(
            Arc::new(self.net.endpoint(id)),
            MeshConfig::default(),
            relay_tx,
            events_tx,
        )
        .expect("default config is valid");
        mesh.set_local_id(PeerId::new(id));
        self.nodes.insert(
            id.to_string(),
            Node {
                mesh,
                name: name.to_string(),
                channels,
                relay_rx,
                events_rx,
                events: Vec::new(),
            },
        );
    }

    pub fn node(&mut self, id: &str) -> &mut Node {
        self.nodes.get_mut(id).expect("unknown node")
    }

    pub fn join(&mut self, id: &str, room: &str) {
        self.node(id).mesh.join(RoomId::new(room)).expect("join");
        self.pump();
    }

    /// Runs until no node has anything left to process.
    pub fn pump(&mut self) {
        loop {
            let mut busy = false;
            let ids: Vec<String> = self.nodes.keys().cloned().collect();

            // Channel events first; they may produce relay messages.
            for id in &ids {
                let node = self.node(id);
                while let Ok((conn, event)) = node.channels.try_recv() {
                    node.mesh.on_channel_event(conn, event);
                    busy = true;
                }
            }

            let mut outbound = Vec::new();
            for id in &ids {
                let node = self.node(id);
                while let Ok(msg) = node.relay_rx.try_recv() {
                    outbound.push((id.clone(), msg));
                }
            }
            let mut deliveries = Vec::new();
            for (from, msg) in outbound {
                busy = true;
                deliveries.extend(self.relay(&from, msg));
            }

            if deliveries.is_empty() && !busy {
                match self.held.pop_front() {
                    Some(held) => deliveries.push(held),
                    None => {
                        self.collect_events();
                        return;
                    }
                }
            }
            for (to, event) in deliveries {
                let binding = self.binding;
                if let Some(node) = self.nodes.get_mut(&to) {
                    binding.dispatch(&mut node.mesh, event);
                }
            }
            self.collect_events();
        }
    }

    fn collect_events(&mut self) {
        for node in self.nodes.values_mut() {
            while let Ok(event) = node.events_rx.try_recv() {
                node.events.push(event);
            }
        }
    }

    fn info(&self, id: &str) -> PeerInfo {
        PeerInfo::new(id, self.nodes.get(id).map(|n| n.name.clone()))
    }

    /// The fake relay: same room semantics as the real one.
    fn relay(&mut self, from: &str, msg: ClientMessage) -> Vec<(String, RelayEvent)> {
        let mut out = Vec::new();
        match msg {
            ClientMessage::Hello { .. } => {}
            ClientMessage::Join { room } => {
                let members = self.rooms.entry(room.0.clone()).or_default().clone();
                let peers = members.iter().map(|m| self.info(m)).collect();
                out.push((from.to_string(), RelayEvent::ExistingPeers { room: room.clone(), peers }));
                for member in &members {
                    let event = RelayEvent::PeerJoined { peer: self.info(from) };
                    if self.delay_peer_joined {
                        self.held.push_back((member.clone(), event));
                    } else {
                        out.push((member.clone(), event));
                    }
                }
                self.rooms.entry(room.0).or_default().push(from.to_string());
            }
            ClientMessage::Leave { room } => {
                let members = self.rooms.entry(room.0).or_default();
                members.retain(|m| m != from);
                let remaining = members.clone();
                for member in remaining {
                    out.push((member, RelayEvent::PeerLeft { peer: self.info(from) }));
                }
            }
            ClientMessage::Signal { target, payload } => {
                let same_room = self
                    .rooms
                    .values()
                    .any(|m| m.iter().any(|x| x == from) && m.contains(&target.0));
                if same_room {
                    out.push((
                        target.0,
                        RelayEvent::Signal {
                            from: PeerId::new(from),
                            display_name: self.nodes.get(from).map(|n| n.name.clone()),
                            payload,
                        },
                    ));
                }
            }
        }
        out
    }
}

impl Node {
    /// Events of one kind, by predicate.
    pub fn count(&self, pred: impl Fn(&MeshEvent) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }

    pub fn clear_events(&mut self) {
        self.events.clear();
    }
}

/// `a`, `b`, `c` in room "lobby", joined in that order.
pub fn three_in_lobby() -> Harness {
    let mut h = Harness::new();
    h.add("a", "Ana");
    h.add("b", "Bo");
    h.add("c", "Cy");
    h.join("a", "lobby");
    h.join("b", "lobby");
    h.join("c", "lobby");
    h
}
