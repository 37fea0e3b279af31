//! In-process peer channels.
//!
//! [`MemoryNetwork`] links [`PeerChannel`]s that live in the same process.
//! It runs a minimal offer/answer exchange so that channels only connect
//! after their signals have actually travelled through the relay, which
//! makes it a faithful stand-in for a real negotiated transport:
//!
//! ```text
//! A: open(B, initiator) ──→ Signal{offer, conn: a}
//!                                   │ relay
//! B: open(A, answerer) ◀── signal(offer) ──→ Signal{answer, conn: b}
//!                                   │ relay
//! A: signal(answer) ──→ Connect on A and B
//! ```
//!
//! Delivery is always ordered and reliable.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::json;

use crate::{
    ChannelEvent, ChannelEventSender, ChannelFactory, ChannelOptions,
    ConnectionId, PeerChannel, SignalData, TransportError,
};

/// One side of a link, keyed by `(local, remote)`.
struct Half {
    id: ConnectionId,
    events: ChannelEventSender,
    initiator: bool,
    /// Id of the remote channel this half negotiated with.
    remote_id: Option<ConnectionId>,
    connected: bool,
}

#[derive(Default)]
struct Links {
    halves: HashMap<(String, String), Half>,
}

/// A shared in-process network. Cheap to clone.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    links: Arc<Mutex<Links>>,
}

impl MemoryNetwork {
    /// Creates an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a channel factory for the participant `local`.
    pub fn endpoint(&self, local: impl Into<String>) -> MemoryEndpoint {
        MemoryEndpoint {
            local: local.into(),
            network: self.clone(),
        }
    }

    /// Simulates an abrupt link failure between `a` and `b`. Both sides
    /// get [`ChannelEvent::Error`].
    pub fn sever(&self, a: &str, b: &str) {
        let mut links = self.lock();
        for key in [(a.to_string(), b.to_string()), (b.to_string(), a.to_string())] {
            if let Some(half) = links.halves.get_mut(&key) {
                if half.connected {
                    half.connected = false;
                    half.events
                        .emit(ChannelEvent::Error("link severed".into()));
                }
            }
        }
        tracing::debug!(a, b, "memory link severed");
    }

    /// Number of channel halves that have not been destroyed.
    pub fn open_channels(&self) -> usize {
        self.lock().halves.len()
    }

    fn lock(&self) -> MutexGuard<'_, Links> {
        self.links.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A [`ChannelFactory`] bound to one participant of a [`MemoryNetwork`].
#[derive(Clone)]
pub struct MemoryEndpoint {
    local: String,
    network: MemoryNetwork,
}

impl MemoryEndpoint {
    /// The participant id this endpoint opens channels for.
    pub fn local(&self) -> &str {
        &self.local
    }
}

impl ChannelFactory for MemoryEndpoint {
    fn open(
        &self,
        remote: &str,
        options: ChannelOptions,
        events: ChannelEventSender,
    ) -> Result<Box<dyn PeerChannel>, TransportError> {
        let id = events.id();
        let key = (self.local.clone(), remote.to_string());

        if options.initiator {
            events.emit(ChannelEvent::Signal(json!({
                "type": "offer",
                "conn": id.into_inner(),
            })));
        }

        let previous = self.network.lock().halves.insert(
            key,
            Half {
                id,
                events,
                initiator: options.initiator,
                remote_id: None,
                connected: false,
            },
        );
        if let Some(old) = previous {
            tracing::debug!(
                local = %self.local, remote, old = %old.id,
                "memory channel replaced"
            );
        }

        Ok(Box::new(MemoryChannel {
            id,
            local: self.local.clone(),
            remote: remote.to_string(),
            initiator: options.initiator,
            network: self.network.clone(),
            destroyed: false,
        }))
    }
}

/// One in-process channel.
struct MemoryChannel {
    id: ConnectionId,
    local: String,
    remote: String,
    initiator: bool,
    network: MemoryNetwork,
    destroyed: bool,
}

impl MemoryChannel {
    fn key(&self) -> (String, String) {
        (self.local.clone(), self.remote.clone())
    }

    fn peer_key(&self) -> (String, String) {
        (self.remote.clone(), self.local.clone())
    }
}

impl PeerChannel for MemoryChannel {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn signal(&mut self, data: SignalData) -> Result<(), TransportError> {
        if self.destroyed {
            return Err(TransportError::ConnectionClosed(
                "channel destroyed".into(),
            ));
        }

        let kind = data.get("type").and_then(|t| t.as_str()).unwrap_or("");
        let remote_conn = data
            .get("conn")
            .and_then(|c| c.as_u64())
            .map(ConnectionId::new)
            .ok_or_else(|| {
                TransportError::SignalRejected("missing conn".into())
            })?;

        let mut links = self.network.lock();
        let (key, peer_key) = (self.key(), self.peer_key());

        match (kind, self.initiator) {
            ("offer", false) => {
                let half = links
                    .halves
                    .get_mut(&key)
                    .filter(|h| h.id == self.id)
                    .ok_or_else(|| {
                        TransportError::ConnectionClosed("channel gone".into())
                    })?;
                if half.connected {
                    return Err(TransportError::SignalRejected(
                        "already negotiated".into(),
                    ));
                }
                half.remote_id = Some(remote_conn);
                half.events.emit(ChannelEvent::Signal(json!({
                    "type": "answer",
                    "conn": self.id.into_inner(),
                })));
                Ok(())
            }
            ("answer", true) => {
                let peer_matches = links.halves.get(&peer_key).is_some_and(|p| {
                    p.id == remote_conn && p.remote_id == Some(self.id)
                });
                if !peer_matches {
                    return Err(TransportError::SignalRejected(
                        "answer from unknown channel".into(),
                    ));
                }
                let half = links
                    .halves
                    .get_mut(&key)
                    .filter(|h| h.id == self.id)
                    .ok_or_else(|| {
                        TransportError::ConnectionClosed("channel gone".into())
                    })?;
                half.remote_id = Some(remote_conn);
                half.connected = true;
                half.events.emit(ChannelEvent::Connect);

                if let Some(peer) = links.halves.get_mut(&peer_key) {
                    peer.connected = true;
                    peer.events.emit(ChannelEvent::Connect);
                }
                tracing::debug!(
                    local = %self.local, remote = %self.remote,
                    "memory channel connected"
                );
                Ok(())
            }
            (other, _) => Err(TransportError::SignalRejected(format!(
                "unexpected {other:?} signal for {} side",
                if self.initiator { "initiator" } else { "answerer" }
            ))),
        }
    }

    fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if self.destroyed {
            return Err(TransportError::ConnectionClosed(
                "channel destroyed".into(),
            ));
        }
        let links = self.network.lock();
        let remote_id = links
            .halves
            .get(&self.key())
            .filter(|h| h.id == self.id && h.connected)
            .and_then(|h| h.remote_id)
            .ok_or(TransportError::NotConnected)?;

        match links.halves.get(&self.peer_key()) {
            Some(peer) if peer.id == remote_id && peer.connected => {
                peer.events.emit(ChannelEvent::Data(data.to_vec()));
                Ok(())
            }
            _ => Err(TransportError::ConnectionClosed(
                "remote side closed".into(),
            )),
        }
    }

    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;

        let mut links = self.network.lock();
        let key = self.key();
        if links.halves.get(&key).is_some_and(|h| h.id == self.id) {
            links.halves.remove(&key);
        }
        if let Some(peer) = links.halves.get_mut(&self.peer_key()) {
            if peer.remote_id == Some(self.id) {
                peer.connected = false;
                peer.events.emit(ChannelEvent::Close);
            }
        }
        tracing::debug!(
            local = %self.local, remote = %self.remote, conn_id = %self.id,
            "memory channel destroyed"
        );
    }

    fn is_connected(&self) -> bool {
        !self.destroyed
            && self
                .network
                .lock()
                .halves
                .get(&self.key())
                .is_some_and(|h| h.id == self.id && h.connected)
    }
}

impl Drop for MemoryChannel {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{channel_events, ChannelEventReceiver};

    fn open(
        endpoint: &MemoryEndpoint,
        remote: &str,
        initiator: bool,
    ) -> (Box<dyn PeerChannel>, ChannelEventReceiver) {
        let (tx, rx) = channel_events();
        let events = ChannelEventSender::new(ConnectionId::next(), tx);
        let channel = endpoint
            .open(remote, ChannelOptions::reliable(initiator), events)
            .expect("open");
        (channel, rx)
    }

    fn next_signal(rx: &mut ChannelEventReceiver) -> SignalData {
        match rx.try_recv().expect("event").1 {
            ChannelEvent::Signal(s) => s,
            other => panic!("expected signal, got {other:?}"),
        }
    }

    /// Runs the full offer/answer exchange between `a` and `b`.
    fn connected_pair(
        net: &MemoryNetwork,
    ) -> (
        Box<dyn PeerChannel>,
        ChannelEventReceiver,
        Box<dyn PeerChannel>,
        ChannelEventReceiver,
    ) {
        let (mut a, mut a_rx) = open(&net.endpoint("a"), "b", true);
        let (mut b, mut b_rx) = open(&net.endpoint("b"), "a", false);

        let offer = next_signal(&mut a_rx);
        b.signal(offer).unwrap();
        let answer = next_signal(&mut b_rx);
        a.signal(answer).unwrap();

        assert_eq!(a_rx.try_recv().unwrap().1, ChannelEvent::Connect);
        assert_eq!(b_rx.try_recv().unwrap().1, ChannelEvent::Connect);
        (a, a_rx, b, b_rx)
    }

    #[test]
    fn test_initiator_emits_offer_on_open() {
        let net = MemoryNetwork::new();
        let (a, mut rx) = open(&net.endpoint("a"), "b", true);
        let offer = next_signal(&mut rx);
        assert_eq!(offer["type"], "offer");
        assert_eq!(offer["conn"], a.id().into_inner());
        assert!(!a.is_connected());
    }

    #[test]
    fn test_answerer_is_silent_until_offer() {
        let net = MemoryNetwork::new();
        let (_b, mut rx) = open(&net.endpoint("b"), "a", false);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_offer_answer_connects_both_sides() {
        let net = MemoryNetwork::new();
        let (a, _a_rx, b, _b_rx) = connected_pair(&net);
        assert!(a.is_connected());
        assert!(b.is_connected());
        assert_eq!(net.open_channels(), 2);
    }

    #[test]
    fn test_send_delivers_in_order() {
        let net = MemoryNetwork::new();
        let (mut a, _a_rx, _b, mut b_rx) = connected_pair(&net);

        a.send(b"one").unwrap();
        a.send(b"").unwrap();
        a.send(b"three").unwrap();

        assert_eq!(b_rx.try_recv().unwrap().1, ChannelEvent::Data(b"one".to_vec()));
        assert_eq!(b_rx.try_recv().unwrap().1, ChannelEvent::Data(vec![]));
        assert_eq!(b_rx.try_recv().unwrap().1, ChannelEvent::Data(b"three".to_vec()));
    }

    #[test]
    fn test_send_before_connect_fails() {
        let net = MemoryNetwork::new();
        let (mut a, _rx) = open(&net.endpoint("a"), "b", true);
        assert!(matches!(a.send(b"x"), Err(TransportError::NotConnected)));
    }

    #[test]
    fn test_offer_to_initiator_is_rejected() {
        let net = MemoryNetwork::new();
        let (mut a, _a_rx) = open(&net.endpoint("a"), "b", true);
        let (_b, mut b_rx) = open(&net.endpoint("b"), "a", true);
        let offer = next_signal(&mut b_rx);
        assert!(matches!(
            a.signal(offer),
            Err(TransportError::SignalRejected(_))
        ));
    }

    #[test]
    fn test_destroy_notifies_remote_once() {
        let net = MemoryNetwork::new();
        let (mut a, mut a_rx, b, mut b_rx) = connected_pair(&net);

        a.destroy();
        a.destroy();

        assert_eq!(b_rx.try_recv().unwrap().1, ChannelEvent::Close);
        assert!(b_rx.try_recv().is_err());
        assert!(a_rx.try_recv().is_err(), "no close echoed to the destroyer");
        assert!(!b.is_connected());
        assert_eq!(net.open_channels(), 1);
    }

    #[test]
    fn test_signal_after_destroy_is_rejected() {
        let net = MemoryNetwork::new();
        let (mut b, _rx) = open(&net.endpoint("b"), "a", false);
        b.destroy();
        let err = b.signal(json!({"type": "offer", "conn": 1})).unwrap_err();
        assert!(matches!(err, TransportError::ConnectionClosed(_)));
    }

    #[test]
    fn test_sever_reports_error_on_both_sides() {
        let net = MemoryNetwork::new();
        let (a, mut a_rx, b, mut b_rx) = connected_pair(&net);

        net.sever("a", "b");

        assert!(matches!(a_rx.try_recv().unwrap().1, ChannelEvent::Error(_)));
        assert!(matches!(b_rx.try_recv().unwrap().1, ChannelEvent::Error(_)));
        assert!(!a.is_connected());
        assert!(!b.is_connected());
    }

    #[test]
    fn test_drop_destroys_channel() {
        let net = MemoryNetwork::new();
        let (a, _a_rx, _b, mut b_rx) = connected_pair(&net);
        drop(a);
        assert_eq!(b_rx.try_recv().unwrap().1, ChannelEvent::Close);
    }
}
