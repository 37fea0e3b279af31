//! Session configuration.

use peermesh_transport::ChannelOptions;

use crate::SessionError;

/// Delivery requirements peer channels are opened with.
///
/// Frames of one transfer must arrive complete and in send order, or the
/// reassembled file is garbage. Both flags therefore default to `true`
/// and [`validate`](Self::validate) refuses anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Require in-order delivery on every channel.
    pub ordered: bool,
    /// Require lossless delivery on every channel.
    pub reliable: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ordered: true,
            reliable: true,
        }
    }
}

impl SessionConfig {
    /// Checks that the config can carry file transfers.
    pub fn validate(&self) -> Result<(), SessionError> {
        if !self.ordered {
            return Err(SessionError::InvalidConfig(
                "file transfer requires ordered channels",
            ));
        }
        if !self.reliable {
            return Err(SessionError::InvalidConfig(
                "file transfer requires reliable channels",
            ));
        }
        Ok(())
    }

    /// The options a channel in the given role is opened with.
    pub fn channel_options(&self, initiator: bool) -> ChannelOptions {
        ChannelOptions {
            initiator,
            ordered: self.ordered,
            reliable: self.reliable,
        }
    }
}
