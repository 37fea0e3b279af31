//! The mesh coordinator: one participant's set of peer sessions.
//!
//! The coordinator reacts to three inputs and nothing else:
//!
//! 1. **Relay events** (roster changes, relayed signals), usually through
//!    [`RelayBinding`](crate::RelayBinding)
//! 2. **Channel events** from the shared [`ChannelEventReceiver`]
//! 3. **Local requests** (join, leave, send text, send a file)
//!
//! It is deliberately synchronous. A single owner (the mesh actor, or a
//! test) calls it; no other task touches the session map.
//!
//! # Who initiates
//!
//! Glare (both sides sending an offer) is avoided with a fixed rule: the
//! participant that joins later initiates toward everyone already in the
//! room. Members already present only ever answer.
//!
//! ```text
//! existing roster on join   → session as initiator, per member
//! PeerJoined                → session as answerer
//! Signal from unknown peer  → session as answerer, then deliver
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use peermesh_protocol::{
    ClientMessage, FileMeta, Frame, PeerId, PeerInfo, RoomId, SignalData,
};
use peermesh_session::{PeerSession, SessionError, SessionEvent};
use peermesh_transport::{
    channel_events, ChannelEvent, ChannelEventReceiver, ChannelEventSender,
    ChannelFactory, ConnectionId,
};
use tokio::sync::mpsc;

use crate::file::ByteSource;
use crate::{MeshConfig, MeshEvent, RoomError};

/// Where relay-bound messages go.
pub type RelaySender = mpsc::UnboundedSender<ClientMessage>;

/// Where application events go.
pub type MeshEventSender = mpsc::UnboundedSender<MeshEvent>;

/// A snapshot of one session, for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerStatus {
    /// The remote participant.
    pub peer: PeerInfo,
    /// `true` if this side sent the offer.
    pub initiator: bool,
    /// `true` once the channel is ready for frames.
    pub connected: bool,
}

/// An outgoing file in flight.
///
/// Each target is pinned to the channel it received the metadata on. If
/// that session is closed or replaced mid-transfer, the target is dropped
/// rather than handed chunks of a file it never saw start.
#[derive(Debug)]
pub struct OutgoingTransfer {
    meta: FileMeta,
    targets: Vec<(PeerId, ConnectionId)>,
    sent: u64,
}

impl OutgoingTransfer {
    /// Metadata announced to the targets.
    pub fn meta(&self) -> &FileMeta {
        &self.meta
    }

    /// Number of targets still receiving.
    pub fn targets(&self) -> usize {
        self.targets.len()
    }

    /// `true` once no target is left.
    pub fn is_abandoned(&self) -> bool {
        self.targets.is_empty()
    }

    /// Chunk bytes sent so far.
    pub fn bytes_sent(&self) -> u64 {
        self.sent
    }
}

/// Owns every [`PeerSession`] of the local participant.
pub struct MeshCoordinator {
    local: Option<PeerId>,
    room: Option<RoomId>,
    sessions: HashMap<PeerId, PeerSession>,
    /// Live channel id → owning peer. Anything not in here is stale.
    channels: HashMap<ConnectionId, PeerId>,
    factory: Arc<dyn ChannelFactory>,
    channel_tx: mpsc::UnboundedSender<(ConnectionId, ChannelEvent)>,
    relay: RelaySender,
    events: MeshEventSender,
    config: MeshConfig,
}

impl MeshCoordinator {
    /// Creates a coordinator and the queue its channels report into.
    ///
    /// The caller must drain the returned receiver into
    /// [`on_channel_event`](Self::on_channel_event).
    pub fn new(
        factory: Arc<dyn ChannelFactory>,
        config: MeshConfig,
        relay: RelaySender,
        events: MeshEventSender,
    ) -> Result<(Self, ChannelEventReceiver), RoomError> {
        config.validate()?;
        let (channel_tx, channel_rx) = channel_events();
        let coordinator = Self {
            local: None,
            room: None,
            sessions: HashMap::new(),
            channels: HashMap::new(),
            factory,
            channel_tx,
            relay,
            events,
            config,
        };
        Ok((coordinator, channel_rx))
    }

    // -- Accessors ----------------------------------------------------------

    /// The relay-assigned id of the local participant, once known.
    pub fn local_id(&self) -> Option<&PeerId> {
        self.local.as_ref()
    }

    /// Records the local participant's id. Roster entries with this id
    /// are ignored.
    pub fn set_local_id(&mut self, id: PeerId) {
        tracing::debug!(peer_id = %id, "local id assigned");
        self.local = Some(id);
    }

    /// The room currently joined.
    pub fn room(&self) -> Option<&RoomId> {
        self.room.as_ref()
    }

    /// The active configuration.
    pub fn config(&self) -> &MeshConfig {
        &self.config
    }

    /// Number of sessions (negotiating or connected).
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Returns `true` if a session for `peer` exists.
    pub fn has_session(&self, peer: &PeerId) -> bool {
        self.sessions.contains_key(peer)
    }

    /// Ids of peers whose channel is connected, sorted.
    pub fn connected_peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self
            .sessions
            .values()
            .filter(|s| s.is_connected())
            .map(|s| s.peer_id().clone())
            .collect();
        peers.sort();
        peers
    }

    /// A snapshot of every session, sorted by peer id.
    pub fn peers(&self) -> Vec<PeerStatus> {
        let mut peers: Vec<PeerStatus> = self
            .sessions
            .values()
            .map(|s| PeerStatus {
                peer: s.remote().clone(),
                initiator: s.is_initiator(),
                connected: s.is_connected(),
            })
            .collect();
        peers.sort_by(|a, b| a.peer.id.cmp(&b.peer.id));
        peers
    }

    // -- Room membership ----------------------------------------------------

    /// Joins `room`. The relay answers with the existing roster.
    pub fn join(&mut self, room: RoomId) -> Result<(), RoomError> {
        if let Some(current) = &self.room {
            return Err(RoomError::AlreadyJoined(current.clone()));
        }
        tracing::info!(%room, "joining room");
        self.to_relay(ClientMessage::Join { room: room.clone() });
        self.room = Some(room.clone());
        self.emit(MeshEvent::Joined { room });
        Ok(())
    }

    /// Leaves the current room, closing every session.
    pub fn leave(&mut self) -> Result<RoomId, RoomError> {
        let room = self.room.take().ok_or(RoomError::NotJoined)?;
        let sessions_closed = self.close_all();
        self.to_relay(ClientMessage::Leave { room: room.clone() });
        tracing::info!(%room, sessions_closed, "left room");
        self.emit(MeshEvent::Left {
            room: room.clone(),
            sessions_closed,
        });
        Ok(room)
    }

    /// Closes every session without telling the relay. Used on shutdown.
    pub fn close_all(&mut self) -> usize {
        self.channels.clear();
        let count = self.sessions.len();
        for (_, mut session) in self.sessions.drain() {
            session.close();
        }
        count
    }

    // -- Relay input --------------------------------------------------------

    /// The roster of `room` at the time we joined. We initiate toward
    /// every member.
    pub fn on_existing_peers(&mut self, room: RoomId, peers: Vec<PeerInfo>) {
        if self.room.as_ref() != Some(&room) {
            tracing::debug!(%room, "roster for a room we are not in, ignoring");
            return;
        }
        tracing::info!(%room, peers = peers.len(), "received room roster");
        for peer in peers {
            if self.is_local(&peer.id) {
                continue;
            }
            let id = peer.id.clone();
            if let Err(e) = self.create_peer(peer, true) {
                tracing::debug!(peer = %id, error = %e, "session not created");
            }
        }
    }

    /// Someone joined after us. We answer their offer.
    pub fn on_peer_joined(&mut self, peer: PeerInfo) {
        if self.room.is_none() || self.is_local(&peer.id) {
            return;
        }

        // Their offer may have overtaken this notification, in which case
        // the answering session already exists and is mid-negotiation.
        if let Some(session) = self.sessions.get_mut(&peer.id) {
            if !session.is_initiator() {
                tracing::debug!(peer = %peer.id, "peer already known from its signal");
                session.set_display_name(peer.display_name);
                return;
            }
        }

        let id = peer.id.clone();
        if let Err(e) = self.create_peer(peer, false) {
            tracing::debug!(peer = %id, error = %e, "session not created");
        }
    }

    /// The relay turned down our `Join`. Undoes the optimistic join so a
    /// different room can be tried.
    pub fn on_join_refused(&mut self, room: RoomId, reason: &str) {
        if self.room.as_ref() != Some(&room) {
            tracing::debug!(%room, "refusal for a room we are not joining, ignoring");
            return;
        }
        self.room = None;
        self.close_all();
        tracing::warn!(%room, reason, "join refused");
        self.notice(format!("could not join {room}: {reason}"));
    }

    /// Someone left the room. Only their session is touched.
    pub fn on_peer_left(&mut self, peer: PeerInfo) {
        match self.remove_session(&peer.id) {
            Some(mut session) => {
                session.close();
                let peer = session.remote().clone();
                tracing::info!(peer = %peer.id, "peer left the room");
                self.emit(MeshEvent::PeerLeft { peer });
            }
            None => {
                tracing::debug!(peer = %peer.id, "unknown peer left, ignoring");
            }
        }
    }

    /// A signaling payload relayed from `from`.
    pub fn on_signal(
        &mut self,
        from: PeerId,
        display_name: Option<String>,
        payload: SignalData,
    ) {
        if self.room.is_none() {
            tracing::debug!(peer = %from, "signal outside a room, ignoring");
            return;
        }

        if !self.sessions.contains_key(&from) {
            let peer = PeerInfo::new(from.clone(), display_name.clone());
            if self.create_peer(peer, false).is_err() {
                return;
            }
        }

        let Some(session) = self.sessions.get_mut(&from) else {
            return;
        };
        session.set_display_name(display_name);
        if let Err(e) = session.handle_signal(payload) {
            tracing::warn!(peer = %from, error = %e, "signal rejected");
            self.emit(MeshEvent::Notice(e.to_string()));
        }
    }

    // -- Channel input ------------------------------------------------------

    /// Routes one event from the channel queue to its session.
    pub fn on_channel_event(&mut self, id: ConnectionId, event: ChannelEvent) {
        let Some(peer_id) = self.channels.get(&id).cloned() else {
            tracing::debug!(conn_id = %id, "event from stale channel ignored");
            return;
        };
        let Some(session) = self.sessions.get_mut(&peer_id) else {
            return;
        };

        let outputs = session.on_channel_event(event);
        let remote = session.remote().clone();
        for output in outputs {
            self.apply(&remote, output);
        }
    }

    // -- Sessions -----------------------------------------------------------

    /// Creates a session toward `peer`, replacing any existing one.
    ///
    /// Creation failures are also reported as a [`MeshEvent::Notice`].
    pub fn create_peer(&mut self, peer: PeerInfo, initiator: bool) -> Result<(), RoomError> {
        if let Some(mut old) = self.remove_session(&peer.id) {
            tracing::debug!(peer = %peer.id, old = %old.channel_id(), "replacing session");
            old.close();
        }

        let id = ConnectionId::next();
        let events = ChannelEventSender::new(id, self.channel_tx.clone());
        let session = match PeerSession::create(
            peer.clone(),
            initiator,
            self.factory.as_ref(),
            events,
            &self.config.session,
        ) {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(peer = %peer.id, error = %e, "could not create session");
                self.emit(MeshEvent::Notice(e.to_string()));
                return Err(e.into());
            }
        };

        tracing::info!(peer = %peer.id, conn_id = %id, initiator, "session created");
        self.channels.insert(id, peer.id.clone());
        self.sessions.insert(peer.id.clone(), session);
        self.emit(MeshEvent::PeerDiscovered { peer, initiator });
        Ok(())
    }

    // -- Outbound -----------------------------------------------------------

    /// Sends a chat message to every connected peer. Returns how many
    /// peers it was sent to.
    pub fn send_text(&mut self, text: impl Into<String>) -> Result<usize, RoomError> {
        self.ensure_joined()?;
        let targets = self.connected_targets();
        let delivered = self.send_to(&targets, &Frame::Text(text.into()));
        Ok(delivered.len())
    }

    /// Announces a file to every connected peer.
    ///
    /// The returned transfer is fed with
    /// [`send_chunk`](Self::send_chunk) and completed with
    /// [`finish_file`](Self::finish_file). No other file may be started
    /// until it finishes; frames of two files would interleave.
    pub fn begin_file(&mut self, meta: FileMeta) -> Result<OutgoingTransfer, RoomError> {
        self.ensure_joined()?;
        let targets = self.connected_targets();
        let targets = self.send_to(&targets, &Frame::FileMeta(meta.clone()));
        tracing::info!(
            file = %meta.name, size = meta.size, peers = targets.len(),
            "sending file"
        );
        Ok(OutgoingTransfer {
            meta,
            targets,
            sent: 0,
        })
    }

    /// Sends one chunk to the targets still present.
    ///
    /// Returns `false` once no target is left; the caller should stop
    /// reading the source.
    pub fn send_chunk(&mut self, transfer: &mut OutgoingTransfer, chunk: Vec<u8>) -> bool {
        self.prune_targets(transfer);
        if transfer.targets.is_empty() {
            return false;
        }
        let len = chunk.len() as u64;
        transfer.targets = self.send_to(&transfer.targets, &Frame::FileChunk(chunk));
        transfer.sent += len;
        !transfer.targets.is_empty()
    }

    /// Sends the end marker and reports the transfer. Returns how many
    /// peers received the whole file.
    pub fn finish_file(&mut self, mut transfer: OutgoingTransfer) -> usize {
        self.prune_targets(&mut transfer);
        let delivered = self.send_to(&transfer.targets, &Frame::FileEnd).len();
        tracing::info!(file = %transfer.meta.name, peers = delivered, "file sent");
        self.emit(MeshEvent::FileSent {
            meta: transfer.meta,
            recipients: delivered,
        });
        delivered
    }

    /// Sends a whole file to every connected peer.
    ///
    /// Chunks are read one at a time, each is sent to all remaining
    /// targets, and reading stops as soon as no target is left. Channel
    /// events are not processed while this runs; the mesh actor drives
    /// [`begin_file`](Self::begin_file) and friends itself so they are.
    ///
    /// # Errors
    /// [`RoomError::NotJoined`], [`RoomError::Io`] if the source fails,
    /// [`RoomError::TransferAborted`] if every target dropped out.
    pub async fn send_file<S: ByteSource>(&mut self, source: &mut S) -> Result<usize, RoomError> {
        let mut transfer = self.begin_file(source.meta())?;
        if transfer.is_abandoned() {
            return Ok(0);
        }
        while let Some(chunk) = source.next_chunk(self.config.chunk_size).await? {
            if !self.send_chunk(&mut transfer, chunk) {
                tracing::info!(file = %transfer.meta.name, "no recipients left, transfer aborted");
                return Err(RoomError::TransferAborted(transfer.meta.name));
            }
        }
        Ok(self.finish_file(transfer))
    }

    /// Publishes a status line.
    pub fn notice(&self, text: impl Into<String>) {
        self.emit(MeshEvent::Notice(text.into()));
    }

    // -- Private helpers ----------------------------------------------------

    fn apply(&mut self, remote: &PeerInfo, event: SessionEvent) {
        match event {
            SessionEvent::LocalSignal(payload) => {
                self.to_relay(ClientMessage::Signal {
                    target: remote.id.clone(),
                    payload,
                });
            }
            SessionEvent::Connected => {
                tracing::info!(peer = %remote.id, "channel connected");
                self.emit(MeshEvent::PeerConnected { peer: remote.clone() });
            }
            SessionEvent::Text(text) => {
                self.emit(MeshEvent::Message {
                    from: remote.clone(),
                    text,
                });
            }
            SessionEvent::TransferStarted(meta) => {
                tracing::info!(peer = %remote.id, file = %meta.name, size = meta.size, "receiving file");
                self.emit(MeshEvent::TransferStarted {
                    from: remote.clone(),
                    meta,
                });
            }
            SessionEvent::TransferProgress { received, expected } => {
                self.emit(MeshEvent::TransferProgress {
                    from: remote.clone(),
                    received,
                    expected,
                });
            }
            SessionEvent::TransferComplete(file) => {
                if !file.size_matches() {
                    tracing::warn!(
                        peer = %remote.id, file = %file.meta.name,
                        declared = file.meta.size, received = file.data.len(),
                        "received size differs from declared size"
                    );
                }
                tracing::info!(peer = %remote.id, file = %file.meta.name, "file received");
                self.emit(MeshEvent::FileReceived {
                    from: remote.clone(),
                    file,
                });
            }
            SessionEvent::Violation(e) => {
                tracing::warn!(peer = %remote.id, error = %e, "frame dropped");
                self.emit(MeshEvent::Notice(format!("{}: {e}", remote.label())));
            }
            SessionEvent::Closed => {
                self.remove_session(&remote.id);
                tracing::info!(peer = %remote.id, "channel closed");
                self.emit(MeshEvent::PeerDisconnected {
                    peer: remote.clone(),
                    reason: None,
                });
            }
            SessionEvent::Failed(reason) => {
                self.remove_session(&remote.id);
                tracing::warn!(peer = %remote.id, %reason, "channel failed");
                self.emit(MeshEvent::PeerDisconnected {
                    peer: remote.clone(),
                    reason: Some(reason),
                });
            }
        }
    }

    /// Sends `frame` to each target and returns the ones that took it.
    /// A write failure tears that session down.
    fn send_to(
        &mut self,
        targets: &[(PeerId, ConnectionId)],
        frame: &Frame,
    ) -> Vec<(PeerId, ConnectionId)> {
        let mut delivered = Vec::with_capacity(targets.len());
        let mut failed = Vec::new();

        for (peer, conn) in targets {
            let Some(session) = self.sessions.get_mut(peer) else {
                continue;
            };
            match session.send(frame) {
                Ok(()) => delivered.push((peer.clone(), *conn)),
                Err(SessionError::NotConnected(_)) => {
                    tracing::debug!(%peer, kind = frame.kind(), "send skipped, not connected");
                }
                Err(e) => failed.push((peer.clone(), e.to_string())),
            }
        }

        for (peer, reason) in failed {
            if let Some(mut session) = self.remove_session(&peer) {
                session.close();
                tracing::warn!(%peer, %reason, "send failed, session closed");
                self.emit(MeshEvent::PeerDisconnected {
                    peer: session.remote().clone(),
                    reason: Some(reason),
                });
            }
        }
        delivered
    }

    fn connected_targets(&self) -> Vec<(PeerId, ConnectionId)> {
        self.sessions
            .values()
            .filter(|s| s.is_connected())
            .map(|s| (s.peer_id().clone(), s.channel_id()))
            .collect()
    }

    /// Drops targets whose session is gone, replaced or no longer connected.
    fn prune_targets(&self, transfer: &mut OutgoingTransfer) {
        transfer.targets.retain(|(peer, conn)| {
            self.sessions
                .get(peer)
                .is_some_and(|s| s.channel_id() == *conn && s.is_connected())
        });
    }

    fn remove_session(&mut self, peer: &PeerId) -> Option<PeerSession> {
        let session = self.sessions.remove(peer)?;
        self.channels.remove(&session.channel_id());
        Some(session)
    }

    fn is_local(&self, peer: &PeerId) -> bool {
        self.local.as_ref() == Some(peer)
    }

    fn ensure_joined(&self) -> Result<(), RoomError> {
        if self.room.is_none() {
            return Err(RoomError::NotJoined);
        }
        Ok(())
    }

    fn to_relay(&self, msg: ClientMessage) {
        if self.relay.send(msg).is_err() {
            tracing::debug!("relay link gone, message dropped");
        }
    }

    fn emit(&self, event: MeshEvent) {
        let _ = self.events.send(event);
    }
}

impl Drop for MeshCoordinator {
    fn drop(&mut self) {
        self.close_all();
    }
}

impl std::fmt::Debug for MeshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshCoordinator")
            .field("local", &self.local)
            .field("room", &self.room)
            .field("sessions", &self.sessions.len())
            .finish_non_exhaustive()
    }
}
