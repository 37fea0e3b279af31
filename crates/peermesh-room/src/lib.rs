//! Mesh coordination for peermesh.
//!
//! Every participant of a room keeps one direct peer session per other
//! member. This crate decides when those sessions are created and torn
//! down, routes relay signals and channel events to them, and fans
//! outgoing messages and files out to every connected peer.
//!
//! # Key types
//!
//! - [`MeshCoordinator`] — the synchronous session map and its rules
//! - [`RelayBinding`] — relay messages in, coordinator calls out
//! - [`MeshHandle`] — talk to a running mesh actor ([`spawn_mesh`])
//! - [`MeshEvent`] — everything the application gets to see
//! - [`ByteSource`] / [`ByteSink`] — where files come from and go to
//! - [`MeshConfig`] — chunk size, queue sizes, channel options

mod actor;
mod config;
mod coordinator;
mod error;
mod events;
mod file;
mod relay;

pub use actor::{spawn_mesh, MeshEvents, MeshHandle};
pub use config::{MeshConfig, DEFAULT_CHUNK_SIZE};
pub use coordinator::{
    MeshCoordinator, MeshEventSender, OutgoingTransfer, PeerStatus, RelaySender,
};
pub use error::RoomError;
pub use events::MeshEvent;
pub use file::{ByteSink, ByteSource, DirectorySink, FileSource, MemorySource};
pub use relay::RelayBinding;
