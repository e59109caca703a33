//! Resource cloning protocol and template capture types.
//!
//! Not every attached resource can participate in cloning; the ones that can
//! implement [`CloneableResource`]. For some resources cloning means copying
//! backing data (block mounts duplicate their backing file into the clone's
//! scratch storage) while for others it only means attaching a reference
//! (file shares mount the same host backing again). Each variant owns those
//! details.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use vmclone_shared::{VmcloneError, VmcloneResult};

use super::GuestVm;
use super::block::BlockMount;
use super::share::FsShare;

/// Compute-system document for a clone under construction.
///
/// Resources append their device entries here while the platform spec is
/// being assembled, before the clone is handed to the control plane.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComputeSystemSpec {
    pub shares: Vec<FsShare>,
    pub block_devices: Vec<BlockMount>,
}

/// Per-clone transient data handed to every resource clone call.
///
/// Assembled fresh for each clone operation and never persisted.
#[derive(Debug)]
pub struct CloneContext {
    /// Spec document being assembled for the clone.
    pub spec: ComputeSystemSpec,
    /// Scratch storage directory for resources that copy backing data.
    pub scratch_dir: PathBuf,
    /// Identity of the guest being constructed.
    pub vm_id: String,
}

impl CloneContext {
    pub fn new(vm_id: impl Into<String>, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            spec: ComputeSystemSpec::default(),
            scratch_dir: scratch_dir.into(),
            vm_id: vm_id.into(),
        }
    }
}

/// Capability of an attached resource to re-establish itself on another
/// guest.
///
/// Implementations run against a deserialized value: they may use only their
/// own exported fields and the supplied [`CloneContext`]. The target guest
/// is still under construction, so implementations may add to it (inventory
/// entries, spec devices) but must not read state from it.
#[async_trait]
pub trait CloneableResource {
    /// Re-establish this resource on `vm`, returning the resource as it
    /// exists on the clone.
    async fn clone_onto(
        &self,
        vm: &mut GuestVm,
        ctx: &mut CloneContext,
    ) -> VmcloneResult<TemplateResource>;
}

/// The closed set of resource variants that participate in template capture.
///
/// Every variant that may appear in an encoded template config must also be
/// registered with the codec registry
/// ([`template::codec::init_registry`](crate::template::codec::init_registry)).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateResource {
    FsShare(FsShare),
    BlockMount(BlockMount),
}

impl TemplateResource {
    /// Stable tag identifying the file-share variant in encoded form.
    pub const FS_SHARE_KIND: &'static str = "fs-share";
    /// Stable tag identifying the block-mount variant in encoded form.
    pub const BLOCK_MOUNT_KIND: &'static str = "block-mount";

    /// Stable tag identifying this value's concrete variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FsShare(_) => Self::FS_SHARE_KIND,
            Self::BlockMount(_) => Self::BLOCK_MOUNT_KIND,
        }
    }
}

#[async_trait]
impl CloneableResource for TemplateResource {
    async fn clone_onto(
        &self,
        vm: &mut GuestVm,
        ctx: &mut CloneContext,
    ) -> VmcloneResult<TemplateResource> {
        match self {
            Self::FsShare(share) => share.clone_onto(vm, ctx).await,
            Self::BlockMount(mount) => mount.clone_onto(vm, ctx).await,
        }
    }
}

/// Everything required to later create clones from a saved template.
///
/// Owned by the guest being templated until persisted; each clone operation
/// reconstructs a fresh copy from storage, so no instance is ever shared
/// between template and clones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateConfig {
    /// Identity of the template guest.
    pub uvm_id: String,
    /// Resources to re-establish on every clone, in attachment order.
    pub resources: Vec<TemplateResource>,
}

/// Re-establish every template resource on a freshly-cloned guest.
///
/// Stops at the first failure; resources already cloned onto the target are
/// left in place (partial clone state is a known limitation, surfaced to the
/// caller rather than rolled back).
pub async fn clone_resources(
    vm: &mut GuestVm,
    resources: &[TemplateResource],
    ctx: &mut CloneContext,
) -> VmcloneResult<Vec<TemplateResource>> {
    let mut cloned = Vec::with_capacity(resources.len());

    for resource in resources {
        let handle = resource.clone_onto(vm, ctx).await.map_err(|e| {
            VmcloneError::ResourceClone(format!(
                "cloning {} onto guest {}: {}",
                resource.kind(),
                ctx.vm_id,
                e
            ))
        })?;
        cloned.push(handle);
    }

    tracing::info!(
        vm_id = %ctx.vm_id,
        count = cloned.len(),
        "cloned template resources onto guest"
    );
    Ok(cloned)
}
