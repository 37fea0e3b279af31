//! # peermesh
//!
//! Full-mesh peer sessions for small rooms: every participant opens one
//! direct channel to every other participant, and chat text and files
//! travel over those channels without touching the server.
//!
//! The server is a relay. It only tracks who is in which room and
//! forwards signaling payloads so participants can negotiate their
//! channels.
//!
//! ## Layers
//!
//! ```text
//! peermesh-transport   relay link (WebSocket), peer channels
//! peermesh-protocol    tagged peer frames, relay JSON messages
//! peermesh-session     one session per remote peer, file reassembly
//! peermesh-room        mesh coordinator + actor, relay binding, files
//! peermesh             relay server, relay client, this facade
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use peermesh::prelude::*;
//!
//! # async fn demo(net: MemoryNetwork) -> Result<(), PeermeshError> {
//! let (client, mut events) = MeshClient::connect(
//!     "ws://127.0.0.1:9000",
//!     Some("ana".into()),
//!     |id| Arc::new(net.endpoint(id.as_str())),
//!     MeshConfig::default(),
//! )
//! .await?;
//! client.handle().join("lobby").await?;
//! while let Some(event) = events.recv().await {
//!     println!("{event}");
//! }
//! # Ok(())
//! # }
//! ```

mod client;
mod error;
mod handler;
mod registry;
mod server;
mod telemetry;

pub use client::MeshClient;
pub use error::{PeermeshError, RelayError};
pub use registry::{Outbox, RelayRegistry};
pub use server::{RelayConfig, RelayServer, RelayServerBuilder};
pub use telemetry::init_tracing;

// Re-export sub-crates for direct access.
pub use peermesh_protocol as protocol;
pub use peermesh_room as room;
pub use peermesh_session as session;
pub use peermesh_transport as transport;

/// Everything an application usually needs.
pub mod prelude {
    pub use crate::{
        init_tracing, MeshClient, PeermeshError, RelayConfig, RelayError,
        RelayServer, RelayServerBuilder,
    };
    pub use peermesh_protocol::{FileMeta, PeerId, PeerInfo, RoomId};
    pub use peermesh_room::{
        ByteSink, ByteSource, DirectorySink, FileSource, MemorySource,
        MeshConfig, MeshEvent, MeshEvents, MeshHandle, RoomError,
    };
    pub use peermesh_session::{CompletedTransfer, SessionConfig};
    pub use peermesh_transport::{ChannelFactory, MemoryNetwork};
}
