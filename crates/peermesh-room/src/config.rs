//! Mesh configuration.

use peermesh_session::SessionConfig;

use crate::RoomError;

/// Default size of one outgoing file chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

/// Configuration for one mesh participant.
#[derive(Debug, Clone)]
pub struct MeshConfig {
    /// Maximum bytes per outgoing `FileChunk` frame.
    pub chunk_size: usize,

    /// Capacity of the actor's command queue. Callers of
    /// [`MeshHandle`](crate::MeshHandle) wait when it is full.
    pub command_buffer: usize,

    /// Options every peer channel is opened with.
    pub session: SessionConfig,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            command_buffer: 64,
            session: SessionConfig::default(),
        }
    }
}

impl MeshConfig {
    /// Checks the config before a mesh is started.
    pub fn validate(&self) -> Result<(), RoomError> {
        if self.chunk_size == 0 {
            return Err(RoomError::InvalidConfig("chunk_size must be > 0".into()));
        }
        if self.command_buffer == 0 {
            return Err(RoomError::InvalidConfig(
                "command_buffer must be > 0".into(),
            ));
        }
        self.session
            .validate()
            .map_err(|e| RoomError::InvalidConfig(e.to_string()))
    }
}
