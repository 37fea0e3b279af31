//! Client side of the relay link.
//!
//! [`MeshClient::connect`] dials a relay over WebSocket, says `Hello`,
//! waits for `Welcome`, then wires the link into a mesh actor through a
//! pump task:
//!
//! ```text
//! mesh actor ──ClientMessage──→ pump ──JSON──→ relay
//! mesh actor ←──RelayEvent───── pump ←──JSON── relay
//! ```
//!
//! When the mesh stops, the pump closes the link. When the link drops,
//! the pump exits and the mesh reports that the relay is gone; direct
//! peer channels that are already open keep working.

use std::sync::Arc;
use std::time::Duration;

use peermesh_protocol::{ClientMessage, PeerId, RelayEvent};
use peermesh_room::{spawn_mesh, MeshConfig, MeshEvents, MeshHandle, RelayBinding};
use peermesh_transport::{ChannelFactory, Connection, WebSocketConnection};
use tokio::sync::mpsc;

use crate::PeermeshError;

/// How long to wait for the relay's `Welcome`.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// A participant connected to a relay.
///
/// Room operations, chat and file sending go through [`handle`](Self::handle).
pub struct MeshClient {
    peer_id: PeerId,
    handle: MeshHandle,
}

impl MeshClient {
    /// Connects to the relay at `url` and starts a mesh actor.
    ///
    /// `factory` builds the peer channel factory once the relay has
    /// assigned this participant its id.
    pub async fn connect<F>(
        url: &str,
        display_name: Option<String>,
        factory: F,
        config: MeshConfig,
    ) -> Result<(Self, MeshEvents), PeermeshError>
    where
        F: FnOnce(&PeerId) -> Arc<dyn ChannelFactory>,
    {
        config.validate()?;
        let binding = RelayBinding::new();
        let conn = WebSocketConnection::connect(url).await?;

        // --- Handshake ---
        let hello = binding.encode(&ClientMessage::Hello { display_name })?;
        conn.send(&hello).await?;
        let peer_id = await_welcome(&conn, &binding).await?;
        tracing::info!(peer = %peer_id, url, "connected to relay");

        // --- Wiring ---
        let (relay_out, outbound) = mpsc::unbounded_channel();
        let (inbound, relay_in) = mpsc::unbounded_channel();
        // The actor learns its own id the same way it learns everything
        // else from the relay.
        let _ = inbound.send(RelayEvent::Welcome {
            peer_id: peer_id.clone(),
        });

        let (handle, events) = spawn_mesh(factory(&peer_id), config, relay_out, relay_in)?;
        tokio::spawn(pump(conn, binding, outbound, inbound));

        Ok((Self { peer_id, handle }, events))
    }

    /// The id the relay assigned to this participant.
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    /// Handle to the mesh actor.
    pub fn handle(&self) -> &MeshHandle {
        &self.handle
    }

    /// Stops the mesh: every session closes, the room is left and the
    /// relay link is closed.
    pub async fn shutdown(self) -> Result<(), PeermeshError> {
        self.handle.shutdown().await?;
        Ok(())
    }
}

async fn await_welcome(
    conn: &WebSocketConnection,
    binding: &RelayBinding,
) -> Result<PeerId, PeermeshError> {
    let data = match tokio::time::timeout(HANDSHAKE_TIMEOUT, conn.recv()).await {
        Ok(Ok(Some(data))) => data,
        Ok(Ok(None)) => {
            return Err(PeermeshError::Handshake(
                "relay closed the connection".into(),
            ));
        }
        Ok(Err(e)) => return Err(PeermeshError::Transport(e)),
        Err(_) => return Err(PeermeshError::Handshake("welcome timed out".into())),
    };

    match binding.decode(&data)? {
        RelayEvent::Welcome { peer_id } => Ok(peer_id),
        RelayEvent::Error { code, message } => Err(PeermeshError::Handshake(format!(
            "relay refused: {code} {message}"
        ))),
        other => Err(PeermeshError::Handshake(format!(
            "expected Welcome, got {other:?}"
        ))),
    }
}

/// Moves messages between the relay link and the mesh actor until either
/// side goes away.
async fn pump(
    conn: WebSocketConnection,
    binding: RelayBinding,
    mut outbound: mpsc::UnboundedReceiver<ClientMessage>,
    inbound: mpsc::UnboundedSender<RelayEvent>,
) {
    loop {
        tokio::select! {
            msg = outbound.recv() => {
                let Some(msg) = msg else {
                    tracing::debug!("mesh stopped, closing relay link");
                    break;
                };
                let bytes = match binding.encode(&msg) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to encode relay message");
                        continue;
                    }
                };
                if let Err(e) = conn.send(&bytes).await {
                    tracing::warn!(error = %e, "relay send failed");
                    break;
                }
            }
            received = conn.recv() => {
                let data = match received {
                    Ok(Some(data)) => data,
                    Ok(None) => {
                        tracing::info!("relay closed the connection");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "relay recv failed");
                        break;
                    }
                };
                match binding.decode(&data) {
                    Ok(event) => {
                        if inbound.send(event).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "dropping undecodable relay message");
                    }
                }
            }
        }
    }

    let _ = conn.close().await;
}
