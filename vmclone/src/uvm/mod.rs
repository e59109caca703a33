//! Guest VM handle and attached-resource inventory.
//!
//! ## Architecture
//!
//! - `state`: lifecycle status and state machine
//! - `share` / `block`: the cloneable attachment kinds
//! - `clone`: the resource cloning protocol and template capture types
//!
//! [`GuestVm`] wraps the platform control plane and the guest control
//! channel behind lifecycle guards: once a guest has been saved as a
//! template it is terminal and every further operation is rejected.

mod block;
mod clone;
mod share;
mod state;

pub use block::{BLOCK_CONTROLLERS, BlockMount, SLOTS_PER_CONTROLLER};
pub use clone::{
    CloneContext, CloneableResource, ComputeSystemSpec, TemplateConfig, TemplateResource,
    clone_resources,
};
pub use share::{FsShare, ShareKind};
pub use state::VmStatus;

use std::collections::BTreeMap;
use std::sync::Arc;

use vmclone_shared::{VmcloneError, VmcloneResult};

use crate::channel::{Container, GuestChannel};
use crate::compute::{ComputeSystem, SaveOptions};
use crate::net::{Endpoint, NetworkNamespace};

/// Handle to a container-hosting utility VM.
///
/// Holds the guest's attached-resource inventory (file shares and block
/// mounts), its lifecycle status, and the handles to its two external
/// collaborators: the compute-system control plane and the guest control
/// channel.
pub struct GuestVm {
    id: String,
    status: VmStatus,
    compute: Arc<dyn ComputeSystem>,
    channel: Option<Arc<dyn GuestChannel>>,
    // Share maps are keyed by share name so enumeration order is stable.
    dir_shares: BTreeMap<String, FsShare>,
    file_shares: BTreeMap<String, FsShare>,
    // Fixed controller x slot grid; empty slots stay None.
    block_mounts: Vec<Vec<Option<BlockMount>>>,
}

impl GuestVm {
    /// Create a handle for a running guest.
    pub fn new(id: impl Into<String>, compute: Arc<dyn ComputeSystem>) -> Self {
        Self {
            id: id.into(),
            status: VmStatus::Running,
            compute,
            channel: None,
            dir_shares: BTreeMap::new(),
            file_shares: BTreeMap::new(),
            block_mounts: vec![vec![None; SLOTS_PER_CONTROLLER]; BLOCK_CONTROLLERS],
        }
    }

    /// Attach the guest control channel.
    pub fn set_guest_channel(&mut self, channel: Arc<dyn GuestChannel>) {
        self.channel = Some(channel);
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> VmStatus {
        self.status
    }

    fn ensure_live(&self, op: &str) -> VmcloneResult<()> {
        if !self.status.is_live() {
            return Err(VmcloneError::InvalidState(format!(
                "guest {}: cannot {} in {:?} state",
                self.id, op, self.status
            )));
        }
        Ok(())
    }

    // ========================================================================
    // ATTACHED-RESOURCE INVENTORY
    // ========================================================================

    /// Register a file share on this guest.
    ///
    /// # Errors
    ///
    /// `AlreadyExists` if a share with the same name is attached.
    pub fn insert_share(&mut self, share: FsShare) -> VmcloneResult<()> {
        self.ensure_live("add share")?;

        let shares = match share.kind {
            ShareKind::Directory => &mut self.dir_shares,
            ShareKind::File => &mut self.file_shares,
        };
        if shares.contains_key(&share.name) {
            return Err(VmcloneError::AlreadyExists(format!(
                "share {} on guest {}",
                share.name, self.id
            )));
        }

        tracing::debug!(vm_id = %self.id, share = %share.name, "registered share");
        shares.insert(share.name.clone(), share);
        Ok(())
    }

    /// Register a block mount at its controller/slot location.
    ///
    /// # Errors
    ///
    /// `InvalidState` for an out-of-range location, `AlreadyExists` for an
    /// occupied slot.
    pub fn insert_block_mount(&mut self, mount: BlockMount) -> VmcloneResult<()> {
        self.ensure_live("add block mount")?;

        let controller = mount.controller as usize;
        let slot = mount.slot as usize;
        if controller >= BLOCK_CONTROLLERS || slot >= SLOTS_PER_CONTROLLER {
            return Err(VmcloneError::InvalidState(format!(
                "guest {}: block location {}/{} out of range",
                self.id, mount.controller, mount.slot
            )));
        }
        if self.block_mounts[controller][slot].is_some() {
            return Err(VmcloneError::AlreadyExists(format!(
                "block slot {}/{} on guest {}",
                mount.controller, mount.slot, self.id
            )));
        }

        tracing::debug!(
            vm_id = %self.id,
            controller = mount.controller,
            slot = mount.slot,
            "registered block mount"
        );
        self.block_mounts[controller][slot] = Some(mount);
        Ok(())
    }

    /// Capture everything needed to later clone this guest.
    ///
    /// Pure and infallible: a guest with no attachments yields an empty
    /// resource list. Enumeration order is deterministic - directory shares,
    /// then file shares (each by share name), then block mounts by
    /// controller/slot - skipping empty slots.
    pub fn template_config(&self) -> TemplateConfig {
        let mut resources = Vec::new();

        for share in self.dir_shares.values() {
            resources.push(TemplateResource::FsShare(share.clone()));
        }
        for share in self.file_shares.values() {
            resources.push(TemplateResource::FsShare(share.clone()));
        }
        for controller in &self.block_mounts {
            for mount in controller.iter().flatten() {
                resources.push(TemplateResource::BlockMount(mount.clone()));
            }
        }

        TemplateConfig {
            uvm_id: self.id.clone(),
            resources,
        }
    }

    // ========================================================================
    // CAPABILITY SURFACE (delegates to the control plane with state guards)
    // ========================================================================

    /// Hot-add a network namespace object into the guest.
    pub async fn add_namespace(&self, namespace: &NetworkNamespace) -> VmcloneResult<()> {
        self.ensure_live("add namespace")?;
        tracing::debug!(vm_id = %self.id, nsid = %namespace.id, "hot-adding namespace");
        self.compute.add_namespace(namespace).await
    }

    /// Hot-add endpoints into the guest under `namespace_id`.
    pub async fn add_endpoints(
        &self,
        namespace_id: &str,
        endpoints: &[Endpoint],
    ) -> VmcloneResult<()> {
        self.ensure_live("add endpoints")?;
        tracing::debug!(
            vm_id = %self.id,
            nsid = %namespace_id,
            count = endpoints.len(),
            "hot-adding endpoints"
        );
        self.compute.add_endpoints(namespace_id, endpoints).await
    }

    /// Hot-remove the namespace with `namespace_id` from the guest.
    pub async fn remove_namespace(&self, namespace_id: &str) -> VmcloneResult<()> {
        self.ensure_live("remove namespace")?;
        tracing::debug!(vm_id = %self.id, nsid = %namespace_id, "removing namespace");
        self.compute.remove_namespace(namespace_id).await
    }

    /// Detach every network interface from the guest.
    pub async fn remove_all_nics(&mut self) -> VmcloneResult<()> {
        if !self.status.can_detach_nics() {
            return Err(VmcloneError::InvalidState(format!(
                "guest {}: cannot detach NICs in {:?} state",
                self.id, self.status
            )));
        }
        self.compute.remove_all_nics().await?;
        self.status = VmStatus::NicsDetached;
        tracing::info!(vm_id = %self.id, "detached all NICs");
        Ok(())
    }

    /// Close the guest control channel. Succeeds when no channel is
    /// attached; there is nothing to close then.
    pub async fn close_guest_channel(&mut self) -> VmcloneResult<()> {
        if !self.status.can_close_channel() {
            return Err(VmcloneError::InvalidState(format!(
                "guest {}: cannot close control channel in {:?} state",
                self.id, self.status
            )));
        }
        if let Some(channel) = self.channel.take() {
            channel.close().await?;
        }
        self.status = VmStatus::ChannelClosed;
        tracing::info!(vm_id = %self.id, "closed guest control channel");
        Ok(())
    }

    /// Record that the template config has been durably stored.
    pub(crate) fn note_config_persisted(&mut self) -> VmcloneResult<()> {
        if !self.status.can_persist_config() {
            return Err(VmcloneError::InvalidState(format!(
                "guest {}: config persisted out of order in {:?} state",
                self.id, self.status
            )));
        }
        self.status = VmStatus::ConfigPersisted;
        Ok(())
    }

    /// Pause guest execution.
    pub async fn pause(&mut self) -> VmcloneResult<()> {
        if !self.status.can_pause() {
            return Err(VmcloneError::InvalidState(format!(
                "guest {}: cannot pause in {:?} state",
                self.id, self.status
            )));
        }
        self.compute.pause().await?;
        self.status = VmStatus::Paused;
        tracing::info!(vm_id = %self.id, "paused guest");
        Ok(())
    }

    /// Save the paused guest's state. With
    /// [`SaveOptions::as_template`] this freezes the guest permanently: the
    /// handle becomes terminal and only clones derived from the saved state
    /// may run.
    pub async fn save(&mut self, options: &SaveOptions) -> VmcloneResult<()> {
        if !self.status.can_save() {
            return Err(VmcloneError::InvalidState(format!(
                "guest {}: cannot save in {:?} state",
                self.id, self.status
            )));
        }
        self.compute.save(options).await?;
        self.status = VmStatus::Saved;
        tracing::info!(vm_id = %self.id, "saved guest state");
        Ok(())
    }

    /// Attach to a container this (cloned) guest inherited from its
    /// template.
    ///
    /// The container's process tree already exists inside the guest because
    /// it was captured in the template; this reconnects the control channel
    /// to it, never creates it.
    ///
    /// # Errors
    ///
    /// `Connectivity` when no control channel is attached, or when the
    /// channel's reconnect fails (wrapped with the container id).
    pub async fn attach_cloned_container(
        &self,
        container_id: &str,
    ) -> VmcloneResult<Box<dyn Container>> {
        self.ensure_live("attach container")?;

        let channel = self.channel.as_ref().ok_or_else(|| {
            VmcloneError::Connectivity(format!(
                "guest {}: attaching to a cloned container requires an active control channel",
                self.id
            ))
        })?;

        channel.reconnect_container(container_id).await.map_err(|e| {
            VmcloneError::Connectivity(format!(
                "attach to cloned container {}: {}",
                container_id, e
            ))
        })
    }
}

impl std::fmt::Debug for GuestVm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuestVm")
            .field("id", &self.id)
            .field("status", &self.status)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Control plane that accepts everything and records nothing.
    pub(crate) struct NoopCompute;

    #[async_trait]
    impl ComputeSystem for NoopCompute {
        async fn pause(&self) -> VmcloneResult<()> {
            Ok(())
        }
        async fn save(&self, _options: &SaveOptions) -> VmcloneResult<()> {
            Ok(())
        }
        async fn add_namespace(&self, _namespace: &NetworkNamespace) -> VmcloneResult<()> {
            Ok(())
        }
        async fn add_endpoints(
            &self,
            _namespace_id: &str,
            _endpoints: &[Endpoint],
        ) -> VmcloneResult<()> {
            Ok(())
        }
        async fn remove_namespace(&self, _namespace_id: &str) -> VmcloneResult<()> {
            Ok(())
        }
        async fn remove_all_nics(&self) -> VmcloneResult<()> {
            Ok(())
        }
    }

    /// Control channel that records reconnects and can be told to fail.
    pub(crate) struct RecordingChannel {
        pub reconnects: Mutex<Vec<String>>,
        pub fail_reconnect: bool,
    }

    impl RecordingChannel {
        pub(crate) fn new() -> Self {
            Self {
                reconnects: Mutex::new(Vec::new()),
                fail_reconnect: false,
            }
        }
    }

    struct TestContainer {
        id: String,
    }

    impl Container for TestContainer {
        fn id(&self) -> &str {
            &self.id
        }
    }

    #[async_trait]
    impl GuestChannel for RecordingChannel {
        async fn reconnect_container(&self, id: &str) -> VmcloneResult<Box<dyn Container>> {
            self.reconnects.lock().push(id.to_string());
            if self.fail_reconnect {
                return Err(VmcloneError::Connectivity("channel reset".into()));
            }
            Ok(Box::new(TestContainer { id: id.to_string() }))
        }
        async fn close(&self) -> VmcloneResult<()> {
            Ok(())
        }
    }

    pub(crate) fn noop_compute() -> Arc<dyn ComputeSystem> {
        Arc::new(NoopCompute)
    }

    pub(crate) fn new_test_vm(id: &str) -> GuestVm {
        GuestVm::new(id, noop_compute())
    }

    #[test]
    fn test_template_config_empty_inventory() {
        let vm = new_test_vm("vm-empty");
        let config = vm.template_config();
        assert_eq!(config.uvm_id, "vm-empty");
        assert!(config.resources.is_empty());
    }

    #[test]
    fn test_template_config_order_is_deterministic() {
        let mut vm = new_test_vm("vm-ordered");
        // Insert out of order on purpose.
        vm.insert_block_mount(BlockMount::new("/d/b.img", 1, 0))
            .unwrap();
        vm.insert_block_mount(BlockMount::new("/d/a.img", 0, 2))
            .unwrap();
        vm.insert_share(FsShare::file("zz-config", "/etc/zz"))
            .unwrap();
        vm.insert_share(FsShare::directory("bb-layers", "/var/bb"))
            .unwrap();
        vm.insert_share(FsShare::directory("aa-layers", "/var/aa"))
            .unwrap();

        let kinds: Vec<String> = vm
            .template_config()
            .resources
            .iter()
            .map(|r| match r {
                TemplateResource::FsShare(s) => format!("share:{}", s.name),
                TemplateResource::BlockMount(m) => {
                    format!("block:{}/{}", m.controller, m.slot)
                }
            })
            .collect();

        // Directory shares by name, then file shares, then blocks by
        // controller/slot.
        assert_eq!(
            kinds,
            vec![
                "share:aa-layers",
                "share:bb-layers",
                "share:zz-config",
                "block:0/2",
                "block:1/0",
            ]
        );

        // Same inventory, same order, every time.
        assert_eq!(vm.template_config(), vm.template_config());
    }

    #[test]
    fn test_block_slot_collision() {
        let mut vm = new_test_vm("vm-slots");
        vm.insert_block_mount(BlockMount::new("/d/a.img", 0, 0))
            .unwrap();
        let err = vm
            .insert_block_mount(BlockMount::new("/d/b.img", 0, 0))
            .unwrap_err();
        assert!(err.is_already_exists());

        let err = vm
            .insert_block_mount(BlockMount::new("/d/c.img", 9, 0))
            .unwrap_err();
        assert!(matches!(err, VmcloneError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_lifecycle_sequence_and_terminality() {
        let mut vm = new_test_vm("vm-life");

        // Out of order: save before pause.
        assert!(matches!(
            vm.save(&SaveOptions::as_template()).await.unwrap_err(),
            VmcloneError::InvalidState(_)
        ));

        vm.remove_all_nics().await.unwrap();
        assert_eq!(vm.status(), VmStatus::NicsDetached);
        vm.close_guest_channel().await.unwrap();
        assert_eq!(vm.status(), VmStatus::ChannelClosed);
        vm.note_config_persisted().unwrap();
        vm.pause().await.unwrap();
        assert_eq!(vm.status(), VmStatus::Paused);
        vm.save(&SaveOptions::as_template()).await.unwrap();
        assert_eq!(vm.status(), VmStatus::Saved);

        // Terminal: everything is rejected now.
        assert!(vm.pause().await.is_err());
        assert!(vm.remove_all_nics().await.is_err());
        assert!(vm.insert_share(FsShare::directory("s", "/s")).is_err());
        assert!(vm.attach_cloned_container("c1").await.is_err());
    }

    #[tokio::test]
    async fn test_attach_cloned_container() {
        let mut vm = new_test_vm("vm-clone");
        let channel = Arc::new(RecordingChannel::new());
        vm.set_guest_channel(channel.clone());

        let container = vm.attach_cloned_container("ctr-7").await.unwrap();
        assert_eq!(container.id(), "ctr-7");
        assert_eq!(channel.reconnects.lock().as_slice(), ["ctr-7".to_string()]);
    }

    #[tokio::test]
    async fn test_attach_without_channel_is_connectivity_error() {
        let vm = new_test_vm("vm-nochan");
        let err = vm.attach_cloned_container("ctr-1").await.unwrap_err();
        assert!(matches!(err, VmcloneError::Connectivity(_)));
    }

    #[tokio::test]
    async fn test_attach_failure_wrapped_with_container_id() {
        let mut vm = new_test_vm("vm-failchan");
        let channel = Arc::new(RecordingChannel {
            reconnects: Mutex::new(Vec::new()),
            fail_reconnect: true,
        });
        vm.set_guest_channel(channel);

        let err = vm.attach_cloned_container("ctr-9").await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("ctr-9"));
        assert!(msg.contains("channel reset"));
    }
}
