//! Transport abstraction layer for peermesh.
//!
//! Two very different kinds of links live here:
//!
//! - The **relay link** ([`Transport`] / [`Connection`]): a server-mediated
//!   byte pipe that only carries small signaling/control messages. The
//!   WebSocket implementation backs both the relay server and the client.
//! - The **peer channel** ([`PeerChannel`] / [`ChannelFactory`]): one
//!   direct, negotiated byte channel per remote participant. Negotiation
//!   internals belong to the implementation; the mesh only consumes the
//!   signal/connect/data/close/error lifecycle.
//!
//! [`MemoryNetwork`] is an in-process peer channel implementation used by
//! tests and the demo.
//!
//! # Feature Flags
//!
//! - `websocket` (default) — WebSocket relay transport via `tokio-tungstenite`

#![allow(async_fn_in_trait)]

mod channel;
mod error;
mod memory;
#[cfg(feature = "websocket")]
mod websocket;

pub use channel::{
    channel_events, ChannelEvent, ChannelEventReceiver, ChannelEventSender,
    ChannelFactory, ChannelOptions, PeerChannel, SignalData,
};
pub use error::TransportError;
pub use memory::{MemoryEndpoint, MemoryNetwork};
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConnection, WebSocketTransport};

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counter for generating process-unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier for a connection or peer channel.
///
/// Every opened channel gets a fresh id, so an id doubles as the
/// channel's generation: events tagged with an id that no longer
/// belongs to a live session are stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocates the next unused id.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Accepts new incoming relay connections.
pub trait Transport: Send + Sync + 'static {
    /// The connection type produced by this transport.
    type Connection: Connection;
    /// The error type for transport operations.
    type Error: std::error::Error + Send + Sync;

    /// Waits for and accepts the next incoming connection.
    async fn accept(&mut self) -> Result<Self::Connection, Self::Error>;

    /// Returns the address the transport is listening on.
    fn local_addr(&self) -> std::io::Result<std::net::SocketAddr>;
}

/// A single relay connection that can send and receive bytes.
///
/// `send` and `recv` may be called concurrently from different tasks.
pub trait Connection: Send + Sync + 'static {
    /// The error type for connection operations.
    type Error: std::error::Error + Send + Sync;

    /// Sends data to the remote end.
    async fn send(&self, data: &[u8]) -> Result<(), Self::Error>;

    /// Receives the next message from the remote end.
    ///
    /// Returns `Ok(None)` when the connection is cleanly closed.
    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error>;

    /// Closes the connection.
    async fn close(&self) -> Result<(), Self::Error>;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_new_and_into_inner() {
        let id = ConnectionId::new(42);
        assert_eq!(id.into_inner(), 42);
    }

    #[test]
    fn test_connection_id_display() {
        let id = ConnectionId::new(7);
        assert_eq!(id.to_string(), "conn-7");
    }

    #[test]
    fn test_connection_id_next_is_unique() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert_ne!(a, b);
        assert!(b.into_inner() > a.into_inner());
    }

    #[test]
    fn test_connection_id_hash_works_as_map_key() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(ConnectionId::new(1), "alice");
        map.insert(ConnectionId::new(2), "bob");
        assert_eq!(map[&ConnectionId::new(1)], "alice");
    }
}
