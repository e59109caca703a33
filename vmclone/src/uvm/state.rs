//! Guest lifecycle status and state machine.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a guest on its way to becoming a template.
///
/// Transitions are strictly sequential:
/// `Running → NicsDetached → ChannelClosed → ConfigPersisted → Paused → Saved`.
/// A failed step leaves the guest in its current state for operator
/// inspection; nothing rolls back. `Saved` is terminal: a saved template
/// guest must never be resumed or reused, only cloned from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VmStatus {
    /// Guest is live and serving containers.
    Running,
    /// All network interfaces have been detached.
    NicsDetached,
    /// The guest control channel has been closed.
    ChannelClosed,
    /// The template config has been captured and durably stored.
    ConfigPersisted,
    /// Guest execution is paused.
    Paused,
    /// Guest state has been saved as a template. Terminal.
    Saved,
}

impl VmStatus {
    /// Terminal states permit no further operations.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Saved)
    }

    /// Guest can still accept hot-add/hot-remove device operations.
    pub fn is_live(self) -> bool {
        !matches!(self, Self::Paused | Self::Saved)
    }

    pub fn can_detach_nics(self) -> bool {
        matches!(self, Self::Running)
    }

    pub fn can_close_channel(self) -> bool {
        matches!(self, Self::Running | Self::NicsDetached)
    }

    pub fn can_persist_config(self) -> bool {
        matches!(self, Self::ChannelClosed)
    }

    pub fn can_pause(self) -> bool {
        !matches!(self, Self::Paused | Self::Saved)
    }

    pub fn can_save(self) -> bool {
        matches!(self, Self::Paused)
    }
}
