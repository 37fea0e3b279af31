//! One participant's view of one remote peer.
//!
//! A [`PeerSession`] owns the direct channel to a remote peer, the
//! negotiation state of that channel, and the receive side of file
//! transfers from that peer. It does no I/O scheduling of its own: the
//! mesh feeds it channel events and relayed signals, and acts on the
//! [`SessionEvent`]s it returns.
//!
//! ```text
//!   Negotiating ──(Connect)──→ Connected ──(Close/Error/close())──→ Closed
//!        └───────────────(Close/Error/close())────────────────────────↗
//! ```

use peermesh_protocol::{FileMeta, Frame, FrameCodec, PeerId, PeerInfo, SignalData};
use peermesh_transport::{
    ChannelEvent, ChannelEventSender, ChannelFactory, ConnectionId,
    PeerChannel, TransportError,
};

use crate::reassembler::{CompletedTransfer, TransferReassembler};
use crate::{SessionConfig, SessionError};

// ---------------------------------------------------------------------------
// State and events
// ---------------------------------------------------------------------------

/// Lifecycle of the channel behind a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Signals are still being exchanged.
    Negotiating,
    /// Frames can flow both ways.
    Connected,
    /// Torn down. Terminal.
    Closed,
}

/// What a session wants the mesh to know after handling a channel event.
#[derive(Debug)]
pub enum SessionEvent {
    /// A signaling payload that must be relayed to the remote peer.
    LocalSignal(SignalData),
    /// The channel finished negotiating.
    Connected,
    /// A chat message arrived.
    Text(String),
    /// The remote peer started sending a file.
    TransferStarted(FileMeta),
    /// A file chunk arrived.
    TransferProgress { received: u64, expected: u64 },
    /// A file finished.
    TransferComplete(CompletedTransfer),
    /// A frame was dropped or a transfer was restarted. The session lives on.
    Violation(SessionError),
    /// The remote side closed the channel.
    Closed,
    /// The channel failed.
    Failed(String),
}

// ---------------------------------------------------------------------------
// PeerSession
// ---------------------------------------------------------------------------

/// The direct link to one remote participant.
pub struct PeerSession {
    remote: PeerInfo,
    initiator: bool,
    channel: Option<Box<dyn PeerChannel>>,
    channel_id: ConnectionId,
    state: ChannelState,
    transfer: TransferReassembler,
    codec: FrameCodec,
}

impl PeerSession {
    /// Opens a channel toward `remote` and wraps it in a session.
    ///
    /// The initiator side will shortly emit its first
    /// [`SessionEvent::LocalSignal`]; the answerer waits for
    /// [`handle_signal`](Self::handle_signal).
    ///
    /// # Errors
    /// [`SessionError::InvalidConfig`] if the config would allow
    /// out-of-order or lossy delivery, [`SessionError::OpenFailed`] if
    /// the factory refuses.
    pub fn create(
        remote: PeerInfo,
        initiator: bool,
        factory: &dyn ChannelFactory,
        events: ChannelEventSender,
        config: &SessionConfig,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        let channel_id = events.id();
        let channel = factory
            .open(remote.id.as_str(), config.channel_options(initiator), events)
            .map_err(|source| SessionError::OpenFailed {
                peer: remote.id.clone(),
                source,
            })?;

        tracing::debug!(
            peer = %remote.id, channel = %channel_id, initiator,
            "peer session created"
        );

        Ok(Self {
            remote,
            initiator,
            channel: Some(channel),
            channel_id,
            state: ChannelState::Negotiating,
            transfer: TransferReassembler::new(),
            codec: FrameCodec,
        })
    }

    /// The remote participant.
    pub fn remote(&self) -> &PeerInfo {
        &self.remote
    }

    /// The remote participant's id.
    pub fn peer_id(&self) -> &PeerId {
        &self.remote.id
    }

    /// Records a display name learned after the session was created.
    pub fn set_display_name(&mut self, name: Option<String>) {
        if name.is_some() {
            self.remote.display_name = name;
        }
    }

    /// `true` if this side originated the offer.
    pub fn is_initiator(&self) -> bool {
        self.initiator
    }

    /// Id of the channel this session owns. Events tagged with any other
    /// id are stale.
    pub fn channel_id(&self) -> ConnectionId {
        self.channel_id
    }

    /// Current channel state.
    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// `true` if frames can be sent.
    pub fn is_connected(&self) -> bool {
        self.state == ChannelState::Connected
    }

    /// `true` while a file from this peer is partially received.
    pub fn is_receiving(&self) -> bool {
        self.transfer.meta().is_some()
    }

    /// Feeds a signaling payload relayed from the remote peer.
    ///
    /// # Errors
    /// [`SessionError::SignalRejected`] if the session is closed or the
    /// channel refuses the payload. The session state is unchanged.
    pub fn handle_signal(&mut self, payload: SignalData) -> Result<(), SessionError> {
        let Some(channel) = self.channel.as_mut() else {
            return Err(SessionError::SignalRejected {
                peer: self.remote.id.clone(),
                source: TransportError::ConnectionClosed("session closed".into()),
            });
        };
        channel
            .signal(payload)
            .map_err(|source| SessionError::SignalRejected {
                peer: self.remote.id.clone(),
                source,
            })
    }

    /// Encodes and sends one frame.
    ///
    /// # Errors
    /// [`SessionError::NotConnected`] before negotiation finished or after
    /// close; [`SessionError::ChannelFailure`] if the write fails.
    pub fn send(&mut self, frame: &Frame) -> Result<(), SessionError> {
        if self.state != ChannelState::Connected {
            return Err(SessionError::NotConnected(self.remote.id.clone()));
        }
        let Some(channel) = self.channel.as_mut() else {
            return Err(SessionError::NotConnected(self.remote.id.clone()));
        };

        let payload = self.codec.encode(frame)?;
        channel.send(&payload).map_err(|e| match e {
            TransportError::NotConnected => {
                SessionError::NotConnected(self.remote.id.clone())
            }
            other => SessionError::ChannelFailure {
                peer: self.remote.id.clone(),
                reason: other.to_string(),
            },
        })
    }

    /// Destroys the channel and discards any partial transfer.
    ///
    /// Returns `false` if the session was already closed.
    pub fn close(&mut self) -> bool {
        if self.state == ChannelState::Closed {
            return false;
        }
        self.state = ChannelState::Closed;
        if let Some(mut channel) = self.channel.take() {
            channel.destroy();
        }
        if let Some(meta) = self.transfer.abort() {
            tracing::debug!(
                peer = %self.remote.id, file = %meta.name,
                "partial transfer discarded on close"
            );
        }
        tracing::debug!(peer = %self.remote.id, channel = %self.channel_id, "peer session closed");
        true
    }

    /// Handles one event from this session's channel.
    ///
    /// Events after close are ignored.
    pub fn on_channel_event(&mut self, event: ChannelEvent) -> Vec<SessionEvent> {
        if self.state == ChannelState::Closed {
            return Vec::new();
        }

        match event {
            ChannelEvent::Signal(payload) => vec![SessionEvent::LocalSignal(payload)],
            ChannelEvent::Connect => {
                if self.state == ChannelState::Negotiating {
                    self.state = ChannelState::Connected;
                    vec![SessionEvent::Connected]
                } else {
                    Vec::new()
                }
            }
            ChannelEvent::Data(payload) => self.on_payload(&payload),
            ChannelEvent::Close => {
                self.close();
                vec![SessionEvent::Closed]
            }
            ChannelEvent::Error(reason) => {
                self.close();
                vec![SessionEvent::Failed(reason)]
            }
        }
    }

    // -- Private helpers ---------------------------------------------------

    fn on_payload(&mut self, payload: &[u8]) -> Vec<SessionEvent> {
        let frame = match self.codec.decode(payload) {
            Ok(frame) => frame,
            Err(e) => return vec![SessionEvent::Violation(e.into())],
        };

        match frame {
            Frame::Text(text) => vec![SessionEvent::Text(text)],
            Frame::FileMeta(meta) => {
                let started = SessionEvent::TransferStarted(meta.clone());
                match self.transfer.on_meta(meta) {
                    Ok(()) => vec![started],
                    Err(e) => vec![SessionEvent::Violation(e.into()), started],
                }
            }
            Frame::FileChunk(bytes) => match self.transfer.on_chunk(bytes) {
                Ok(received) => {
                    let expected = self.transfer.meta().map_or(0, |m| m.size);
                    vec![SessionEvent::TransferProgress { received, expected }]
                }
                Err(e) => vec![SessionEvent::Violation(e.into())],
            },
            Frame::FileEnd => match self.transfer.on_end() {
                Ok(done) => vec![SessionEvent::TransferComplete(done)],
                Err(e) => vec![SessionEvent::Violation(e.into())],
            },
        }
    }
}

impl Drop for PeerSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerSession")
            .field("remote", &self.remote)
            .field("initiator", &self.initiator)
            .field("channel_id", &self.channel_id)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SequenceError;
    use peermesh_protocol::ProtocolError;
    use peermesh_transport::{
        channel_events, ChannelEventReceiver, MemoryNetwork,
    };

    /// Two sessions over a memory network, each with its own event queue.
    struct Pair {
        a: PeerSession,
        b: PeerSession,
        a_rx: ChannelEventReceiver,
        b_rx: ChannelEventReceiver,
    }

    fn open(
        net: &MemoryNetwork,
        local: &str,
        remote: &str,
        initiator: bool,
    ) -> (PeerSession, ChannelEventReceiver) {
        let (tx, rx) = channel_events();
        let events = ChannelEventSender::new(ConnectionId::next(), tx);
        let session = PeerSession::create(
            PeerInfo::new(remote, None),
            initiator,
            &net.endpoint(local),
            events,
            &SessionConfig::default(),
        )
        .unwrap();
        (session, rx)
    }

    /// Drains one queue into its session and returns the session events.
    fn drain(session: &mut PeerSession, rx: &mut ChannelEventReceiver) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Ok((id, event)) = rx.try_recv() {
            assert_eq!(id, session.channel_id());
            out.extend(session.on_channel_event(event));
        }
        out
    }

    fn signals(events: &[SessionEvent]) -> Vec<SignalData> {
        events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::LocalSignal(s) => Some(s.clone()),
                _ => None,
            })
            .collect()
    }

    /// Runs the offer/answer exchange by hand, acting as the relay.
    fn connected_pair() -> Pair {
        let net = MemoryNetwork::new();
        let (mut a, mut a_rx) = open(&net, "a", "b", true);
        let (mut b, mut b_rx) = open(&net, "b", "a", false);

        for offer in signals(&drain(&mut a, &mut a_rx)) {
            b.handle_signal(offer).unwrap();
        }
        for answer in signals(&drain(&mut b, &mut b_rx)) {
            a.handle_signal(answer).unwrap();
        }
        assert!(matches!(drain(&mut a, &mut a_rx).as_slice(), [SessionEvent::Connected]));
        assert!(matches!(drain(&mut b, &mut b_rx).as_slice(), [SessionEvent::Connected]));

        Pair { a, b, a_rx, b_rx }
    }

    fn send_raw(pair: &mut Pair, frame: &Frame) -> Vec<SessionEvent> {
        pair.a.send(frame).unwrap();
        drain(&mut pair.b, &mut pair.b_rx)
    }

    #[test]
    fn test_new_session_is_negotiating() {
        let net = MemoryNetwork::new();
        let (session, _rx) = open(&net, "a", "b", false);
        assert_eq!(session.state(), ChannelState::Negotiating);
        assert!(!session.is_connected());
        assert!(!session.is_initiator());
    }

    #[test]
    fn test_initiator_emits_local_signal() {
        let net = MemoryNetwork::new();
        let (mut a, mut rx) = open(&net, "a", "b", true);
        let events = drain(&mut a, &mut rx);
        assert_eq!(signals(&events).len(), 1);
    }

    #[test]
    fn test_send_before_connect_is_not_connected() {
        let net = MemoryNetwork::new();
        let (mut a, _rx) = open(&net, "a", "b", true);
        let err = a.send(&Frame::Text("early".into())).unwrap_err();
        assert!(matches!(err, SessionError::NotConnected(p) if p.as_str() == "b"));
    }

    #[test]
    fn test_text_reaches_remote() {
        let mut pair = connected_pair();
        let events = send_raw(&mut pair, &Frame::Text("hola".into()));
        assert!(matches!(events.as_slice(), [SessionEvent::Text(t)] if t == "hola"));
    }

    #[test]
    fn test_file_transfer_emits_progress_then_complete() {
        let mut pair = connected_pair();
        let meta = FileMeta::new("notes.txt", 5, "text/plain");

        let started = send_raw(&mut pair, &Frame::FileMeta(meta.clone()));
        assert!(matches!(started.as_slice(), [SessionEvent::TransferStarted(m)] if *m == meta));
        assert!(pair.b.is_receiving());

        let progress = send_raw(&mut pair, &Frame::FileChunk(b"hel".to_vec()));
        assert!(matches!(
            progress.as_slice(),
            [SessionEvent::TransferProgress { received: 3, expected: 5 }]
        ));
        send_raw(&mut pair, &Frame::FileChunk(b"lo".to_vec()));

        let done = send_raw(&mut pair, &Frame::FileEnd);
        match done.as_slice() {
            [SessionEvent::TransferComplete(t)] => {
                assert_eq!(t.meta, meta);
                assert_eq!(t.data, b"hello");
            }
            other => panic!("expected TransferComplete, got {other:?}"),
        }
        assert!(!pair.b.is_receiving());
    }

    #[test]
    fn test_chunk_without_meta_is_a_violation() {
        let mut pair = connected_pair();
        let events = send_raw(&mut pair, &Frame::FileChunk(vec![1, 2, 3]));
        assert!(matches!(
            events.as_slice(),
            [SessionEvent::Violation(SessionError::Sequence(SequenceError::ChunkWithoutMeta))]
        ));
        assert!(pair.b.is_connected());
    }

    #[test]
    fn test_second_meta_reports_violation_and_restarts() {
        let mut pair = connected_pair();
        send_raw(&mut pair, &Frame::FileMeta(FileMeta::new("one", 4, "")));
        send_raw(&mut pair, &Frame::FileChunk(vec![1, 1]));

        let events = send_raw(&mut pair, &Frame::FileMeta(FileMeta::new("two", 1, "")));
        assert!(matches!(
            events.as_slice(),
            [
                SessionEvent::Violation(SessionError::Sequence(SequenceError::UnexpectedMeta { .. })),
                SessionEvent::TransferStarted(m),
            ] if m.name == "two"
        ));

        send_raw(&mut pair, &Frame::FileChunk(vec![2]));
        let done = send_raw(&mut pair, &Frame::FileEnd);
        assert!(matches!(
            done.as_slice(),
            [SessionEvent::TransferComplete(t)] if t.data == vec![2]
        ));
    }

    #[test]
    fn test_malformed_payload_is_a_violation() {
        let mut pair = connected_pair();
        let events = pair.b.on_channel_event(ChannelEvent::Data(vec![0xee, 1]));
        assert!(matches!(
            events.as_slice(),
            [SessionEvent::Violation(SessionError::Protocol(ProtocolError::MalformedFrame(_)))]
        ));
        assert!(pair.b.is_connected());
    }

    #[test]
    fn test_remote_close_closes_session_and_drops_partial() {
        let mut pair = connected_pair();
        send_raw(&mut pair, &Frame::FileMeta(FileMeta::new("cut.bin", 10, "")));
        assert!(pair.b.is_receiving());

        assert!(pair.a.close());
        let events = drain(&mut pair.b, &mut pair.b_rx);
        assert!(matches!(events.as_slice(), [SessionEvent::Closed]));
        assert_eq!(pair.b.state(), ChannelState::Closed);
        assert!(!pair.b.is_receiving());
    }

    #[test]
    fn test_channel_error_fails_session() {
        let mut pair = connected_pair();
        let events = pair.a.on_channel_event(ChannelEvent::Error("boom".into()));
        assert!(matches!(events.as_slice(), [SessionEvent::Failed(r)] if r == "boom"));
        assert!(!pair.a.is_connected());
    }

    #[test]
    fn test_close_is_idempotent_and_silences_events() {
        let mut pair = connected_pair();
        assert!(pair.a.close());
        assert!(!pair.a.close());

        let after = pair.a.on_channel_event(ChannelEvent::Data(vec![0x01, b'x']));
        assert!(after.is_empty());
        assert!(pair.a.send(&Frame::FileEnd).is_err());
        // Nothing echoes back to the side that closed.
        assert!(pair.a_rx.try_recv().is_err());
    }

    #[test]
    fn test_signal_after_close_is_rejected() {
        let net = MemoryNetwork::new();
        let (mut a, _rx) = open(&net, "a", "b", false);
        a.close();
        let err = a.handle_signal(serde_json::json!({"type": "offer", "conn": 1}));
        assert!(matches!(err, Err(SessionError::SignalRejected { .. })));
    }

    #[test]
    fn test_unordered_config_refuses_to_open() {
        let net = MemoryNetwork::new();
        let (tx, _rx) = channel_events();
        let config = SessionConfig {
            ordered: false,
            ..SessionConfig::default()
        };
        let result = PeerSession::create(
            PeerInfo::new("b", None),
            true,
            &net.endpoint("a"),
            ChannelEventSender::new(ConnectionId::next(), tx),
            &config,
        );
        assert!(matches!(result, Err(SessionError::InvalidConfig(_))));
        assert_eq!(net.open_channels(), 0);
    }

    #[test]
    fn test_drop_destroys_channel() {
        let net = MemoryNetwork::new();
        {
            let (_a, _rx) = open(&net, "a", "b", true);
            assert_eq!(net.open_channels(), 1);
        }
        assert_eq!(net.open_channels(), 0);
    }
}
