//! File-share attachments.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use vmclone_shared::{VmcloneError, VmcloneResult};

use super::GuestVm;
use super::clone::{CloneContext, CloneableResource, TemplateResource};

/// Kind of backing object a share exposes into the guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShareKind {
    Directory,
    File,
}

/// A host directory or file shared into a guest.
///
/// Carries only the exported configuration needed to re-establish the share
/// on another guest; there is no handle into the guest it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsShare {
    /// Share name as seen by the guest. Unique per guest.
    pub name: String,
    /// Host-side backing path.
    pub host_path: PathBuf,
    pub kind: ShareKind,
    pub read_only: bool,
}

impl FsShare {
    /// Share a host directory into the guest.
    pub fn directory(name: impl Into<String>, host_path: impl AsRef<Path>) -> Self {
        Self {
            name: name.into(),
            host_path: host_path.as_ref().to_path_buf(),
            kind: ShareKind::Directory,
            read_only: false,
        }
    }

    /// Share a single host file into the guest.
    pub fn file(name: impl Into<String>, host_path: impl AsRef<Path>) -> Self {
        Self {
            name: name.into(),
            host_path: host_path.as_ref().to_path_buf(),
            kind: ShareKind::File,
            read_only: false,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}

#[async_trait]
impl CloneableResource for FsShare {
    /// Shares attach by reference: the clone mounts the same host backing,
    /// no data is copied.
    async fn clone_onto(
        &self,
        vm: &mut GuestVm,
        ctx: &mut CloneContext,
    ) -> VmcloneResult<TemplateResource> {
        let share = self.clone();

        vm.insert_share(share.clone()).map_err(|e| {
            VmcloneError::ResourceClone(format!(
                "share {} onto guest {}: {}",
                share.name, ctx.vm_id, e
            ))
        })?;
        ctx.spec.shares.push(share.clone());

        tracing::debug!(
            share = %share.name,
            vm_id = %ctx.vm_id,
            "attached share to clone"
        );
        Ok(TemplateResource::FsShare(share))
    }
}
