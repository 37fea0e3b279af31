//! `RelayServer` builder and accept loop.
//!
//! The relay is the only server in a peermesh deployment. It never sees
//! chat text or file bytes: it tracks room membership and forwards
//! signaling payloads between members of the same room, so participants
//! can open their direct channels.

use std::sync::Arc;
use std::time::Duration;

use peermesh_protocol::JsonCodec;
use peermesh_transport::{Transport, WebSocketTransport};
use tokio::sync::Mutex;

use crate::handler::handle_connection;
use crate::registry::RelayRegistry;
use crate::PeermeshError;

/// Relay server settings.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to listen on.
    pub bind_addr: String,
    /// Maximum members per room. `None` means unlimited.
    pub max_room_peers: Option<usize>,
    /// How long a new connection may take to send `Hello`.
    pub handshake_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9000".to_string(),
            max_room_peers: None,
            handshake_timeout: Duration::from_secs(5),
        }
    }
}

/// Shared server state passed to each connection handler task.
pub(crate) struct RelayState {
    pub(crate) registry: Mutex<RelayRegistry>,
    pub(crate) codec: JsonCodec,
    pub(crate) config: RelayConfig,
}

/// Builder for configuring and starting a relay.
///
/// # Example
///
/// ```rust,no_run
/// use peermesh::prelude::*;
///
/// # async fn start() -> Result<(), PeermeshError> {
/// let server = RelayServer::builder()
///     .bind("0.0.0.0:9000")
///     .max_room_peers(8)
///     .build()
///     .await?;
/// server.run().await
/// # }
/// ```
pub struct RelayServerBuilder {
    config: RelayConfig,
}

impl RelayServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: RelayConfig::default(),
        }
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind_addr = addr.to_string();
        self
    }

    /// Caps every room at `max` members.
    pub fn max_room_peers(mut self, max: usize) -> Self {
        self.config.max_room_peers = Some(max);
        self
    }

    /// Sets how long a connection may take to say `Hello`.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: RelayConfig) -> Self {
        self.config = config;
        self
    }

    /// Binds the listener.
    pub async fn build(self) -> Result<RelayServer, PeermeshError> {
        let transport = WebSocketTransport::bind(&self.config.bind_addr).await?;

        let state = Arc::new(RelayState {
            registry: Mutex::new(RelayRegistry::new(self.config.max_room_peers)),
            codec: JsonCodec,
            config: self.config,
        });

        Ok(RelayServer { transport, state })
    }
}

impl Default for RelayServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound relay server.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct RelayServer {
    transport: WebSocketTransport,
    state: Arc<RelayState>,
}

impl RelayServer {
    /// Creates a new builder.
    pub fn builder() -> RelayServerBuilder {
        RelayServerBuilder::new()
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// The active configuration.
    pub fn config(&self) -> &RelayConfig {
        &self.state.config
    }

    /// Runs the accept loop, one handler task per connection. Runs until
    /// the task is dropped.
    pub async fn run(mut self) -> Result<(), PeermeshError> {
        tracing::info!(addr = %self.state.config.bind_addr, "relay running");

        loop {
            match self.transport.accept().await {
                Ok(conn) => {
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(conn, state).await {
                            tracing::debug!(error = %e, "connection ended with error");
                        }
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                }
            }
        }
    }
}
