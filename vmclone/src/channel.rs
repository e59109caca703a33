//! Guest control channel interface.
//!
//! The channel is the control connection used to manage containers running
//! inside a guest. Transport details (vsock, hvsocket, ...) are the
//! embedder's concern; this crate only consumes the trait.

use async_trait::async_trait;
use vmclone_shared::VmcloneResult;

/// A container running inside a guest, as seen over the control channel.
pub trait Container: Send + Sync {
    /// The container's identifier inside the guest.
    fn id(&self) -> &str;
}

/// Control connection into a running guest.
#[async_trait]
pub trait GuestChannel: Send + Sync {
    /// Reconnect to a container the guest already hosts.
    ///
    /// A clone inherits its containers from the template's saved state, so
    /// the container process tree already exists; this call attaches to it
    /// rather than creating anything.
    async fn reconnect_container(&self, id: &str) -> VmcloneResult<Box<dyn Container>>;

    /// Close the channel. Further calls on it fail.
    async fn close(&self) -> VmcloneResult<()>;
}
