//! The point-to-point peer channel contract.
//!
//! A [`PeerChannel`] is one direct link to one remote participant. It is
//! created in initiator or answerer mode by a [`ChannelFactory`], produces
//! signaling payloads that someone else has to relay, consumes the remote
//! side's payloads through [`PeerChannel::signal`], and reports everything
//! else through [`ChannelEvent`]s:
//!
//! ```text
//!  open(initiator) ──→ Signal(..)* ──→ Connect ──→ Data(..)* ──→ Close | Error
//! ```
//!
//! Events are pushed into a single unbounded queue shared by all channels
//! of a mesh. Each event is tagged with the [`ConnectionId`] of the channel
//! that produced it, so the consumer can route it (and drop it if that
//! channel has since been replaced).

use tokio::sync::mpsc;

use crate::{ConnectionId, TransportError};

/// An opaque signaling payload (offer, answer, candidate, ...).
///
/// The mesh never looks inside; it only carries it over the relay.
pub type SignalData = serde_json::Value;

/// Lifecycle events emitted by a peer channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// A local signaling payload that must be relayed to the remote peer.
    Signal(SignalData),
    /// Negotiation finished; `send` is now allowed.
    Connect,
    /// A payload arrived from the remote peer.
    Data(Vec<u8>),
    /// The remote side closed the channel.
    Close,
    /// The channel failed.
    Error(String),
}

/// Options a channel is opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelOptions {
    /// `true` if this side originates the offer.
    pub initiator: bool,
    /// Payloads must arrive in send order.
    pub ordered: bool,
    /// Payloads must not be lost.
    pub reliable: bool,
}

impl ChannelOptions {
    /// Ordered, reliable options in the given role.
    pub fn reliable(initiator: bool) -> Self {
        Self {
            initiator,
            ordered: true,
            reliable: true,
        }
    }
}

/// The receiving half of a mesh-wide channel event queue.
pub type ChannelEventReceiver =
    mpsc::UnboundedReceiver<(ConnectionId, ChannelEvent)>;

/// Creates a new channel event queue.
pub fn channel_events() -> (
    mpsc::UnboundedSender<(ConnectionId, ChannelEvent)>,
    ChannelEventReceiver,
) {
    mpsc::unbounded_channel()
}

/// The sending half handed to one channel. Tags every event with the
/// channel's id.
#[derive(Debug, Clone)]
pub struct ChannelEventSender {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<(ConnectionId, ChannelEvent)>,
}

impl ChannelEventSender {
    /// Binds a queue to a channel id.
    pub fn new(
        id: ConnectionId,
        tx: mpsc::UnboundedSender<(ConnectionId, ChannelEvent)>,
    ) -> Self {
        Self { id, tx }
    }

    /// The id of the channel this sender belongs to.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Pushes an event. Dropped silently if the consumer is gone.
    pub fn emit(&self, event: ChannelEvent) {
        let _ = self.tx.send((self.id, event));
    }
}

/// One direct link to one remote participant.
pub trait PeerChannel: Send + 'static {
    /// The id this channel tags its events with.
    fn id(&self) -> ConnectionId;

    /// Feeds a signaling payload received from the remote peer.
    ///
    /// # Errors
    /// [`TransportError::SignalRejected`] if the payload doesn't fit the
    /// negotiation state, [`TransportError::ConnectionClosed`] after
    /// `destroy`.
    fn signal(&mut self, data: SignalData) -> Result<(), TransportError>;

    /// Sends one payload to the remote peer.
    fn send(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Tears the channel down. Calling it again is a no-op.
    fn destroy(&mut self);

    /// `true` while negotiation has completed and neither side closed.
    fn is_connected(&self) -> bool;
}

/// Opens peer channels toward remote participants.
pub trait ChannelFactory: Send + Sync + 'static {
    /// Opens a channel toward `remote`.
    ///
    /// The channel must report its events through `events` and use
    /// `events.id()` as its own id.
    fn open(
        &self,
        remote: &str,
        options: ChannelOptions,
        events: ChannelEventSender,
    ) -> Result<Box<dyn PeerChannel>, TransportError>;
}
