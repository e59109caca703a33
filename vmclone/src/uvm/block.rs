//! Block-device attachments.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use vmclone_shared::{VmcloneError, VmcloneResult};

use super::GuestVm;
use super::clone::{CloneContext, CloneableResource, TemplateResource};

/// Number of block controllers a guest exposes.
pub const BLOCK_CONTROLLERS: usize = 4;
/// Attachment slots per controller.
pub const SLOTS_PER_CONTROLLER: usize = 64;

/// A block device attached to a guest at a fixed controller/slot location.
///
/// Like [`FsShare`](super::FsShare), this carries only exported
/// configuration: host backing path, guest mount path, and the attachment
/// location, which a clone inherits unchanged from the template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMount {
    /// Host-side backing file.
    pub host_path: PathBuf,
    /// Mount path inside the guest, if mounted.
    pub guest_path: Option<PathBuf>,
    pub controller: u8,
    pub slot: u8,
    pub read_only: bool,
}

impl BlockMount {
    pub fn new(host_path: impl AsRef<Path>, controller: u8, slot: u8) -> Self {
        Self {
            host_path: host_path.as_ref().to_path_buf(),
            guest_path: None,
            controller,
            slot,
            read_only: false,
        }
    }

    pub fn guest_path(mut self, path: impl AsRef<Path>) -> Self {
        self.guest_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}

#[async_trait]
impl CloneableResource for BlockMount {
    /// Block mounts clone by copy: the backing file is duplicated into the
    /// clone's scratch storage so writes on the clone never reach the
    /// template's backing. The attachment location is inherited unchanged.
    async fn clone_onto(
        &self,
        vm: &mut GuestVm,
        ctx: &mut CloneContext,
    ) -> VmcloneResult<TemplateResource> {
        let file_name = self.host_path.file_name().ok_or_else(|| {
            VmcloneError::ResourceClone(format!(
                "block mount {} has no backing file name",
                self.host_path.display()
            ))
        })?;
        let target = ctx.scratch_dir.join(file_name);

        std::fs::copy(&self.host_path, &target).map_err(|e| {
            VmcloneError::ResourceClone(format!(
                "copy backing file {} -> {}: {}",
                self.host_path.display(),
                target.display(),
                e
            ))
        })?;

        let mount = BlockMount {
            host_path: target,
            ..self.clone()
        };

        vm.insert_block_mount(mount.clone()).map_err(|e| {
            VmcloneError::ResourceClone(format!(
                "block mount {}/{} onto guest {}: {}",
                mount.controller, mount.slot, ctx.vm_id, e
            ))
        })?;
        ctx.spec.block_devices.push(mount.clone());

        tracing::debug!(
            controller = mount.controller,
            slot = mount.slot,
            host_path = %mount.host_path.display(),
            vm_id = %ctx.vm_id,
            "copied block mount to clone"
        );
        Ok(TemplateResource::BlockMount(mount))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders() {
        let mount = BlockMount::new("/data/scratch.img", 0, 3)
            .guest_path("/mnt/scratch")
            .read_only();
        assert_eq!(mount.controller, 0);
        assert_eq!(mount.slot, 3);
        assert!(mount.read_only);
        assert_eq!(mount.guest_path.as_deref(), Some(Path::new("/mnt/scratch")));
    }

    #[test]
    fn test_serde_roundtrip() {
        let mount = BlockMount::new("/data/scratch.img", 1, 7);
        let json = serde_json::to_string(&mount).unwrap();
        let back: BlockMount = serde_json::from_str(&json).unwrap();
        assert_eq!(back, mount);
    }
}
