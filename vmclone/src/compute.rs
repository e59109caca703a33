//! Compute-system control plane interface.
//!
//! The platform layer that actually pauses, saves, and hot-modifies a guest
//! lives outside this crate. [`GuestVm`](crate::uvm::GuestVm) delegates to
//! this trait; embedders provide the real implementation and tests provide
//! recording mocks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use vmclone_shared::VmcloneResult;

use crate::net::{Endpoint, NetworkNamespace};

/// How the platform should snapshot a guest on [`ComputeSystem::save`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SaveType {
    /// Freeze the guest as a template; it can never run again, only be
    /// cloned from.
    AsTemplate,
}

/// Options document passed to the control plane's save operation.
///
/// Serializes to the JSON document the platform expects, e.g.
/// `{"SaveType":"AsTemplate"}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SaveOptions {
    pub save_type: SaveType,
}

impl SaveOptions {
    /// Options for freezing a guest into a template.
    pub fn as_template() -> Self {
        Self {
            save_type: SaveType::AsTemplate,
        }
    }
}

/// Control-plane operations on a single compute system (guest).
///
/// All calls block for the duration of a platform round-trip; cancellation
/// is caller-driven (drop the future). Implementations must be safe to call
/// from multiple tasks, though this crate issues at most one lifecycle
/// operation per guest at a time.
#[async_trait]
pub trait ComputeSystem: Send + Sync {
    /// Pause guest execution.
    async fn pause(&self) -> VmcloneResult<()>;

    /// Save the paused guest's state according to `options`.
    async fn save(&self, options: &SaveOptions) -> VmcloneResult<()>;

    /// Hot-add a network namespace object into the guest.
    async fn add_namespace(&self, namespace: &NetworkNamespace) -> VmcloneResult<()>;

    /// Hot-add endpoints into the guest under `namespace_id`.
    async fn add_endpoints(&self, namespace_id: &str, endpoints: &[Endpoint])
    -> VmcloneResult<()>;

    /// Hot-remove the namespace with `namespace_id` from the guest.
    async fn remove_namespace(&self, namespace_id: &str) -> VmcloneResult<()>;

    /// Detach every network interface from the guest.
    async fn remove_all_nics(&self) -> VmcloneResult<()>;
}
