//! vmclone - template and clone lifecycle for container-hosting utility VMs.
//!
//! A template is a guest whose state has been frozen (paused and saved) so
//! that new guests can be launched from it. This crate captures a running
//! guest's attached-resource state, persists it, and re-establishes it on
//! clones, while keeping the guest-visible network identity stable across
//! every clone.
//!
//! ## Architecture
//!
//! - `uvm`: the guest handle, its attached-resource inventory, the resource
//!   cloning protocol, and the lifecycle state machine
//! - `template`: capture, encoding, and durable persistence of template
//!   configs, plus the save-as-template sequence
//! - `net`: network namespace setup with the template/clone identity remap
//! - `db`: SQLite-backed keyed blob storage
//! - `compute` / `channel`: interfaces to the platform control plane and the
//!   guest control channel (implemented by embedders, mocked in tests)

pub mod channel;
pub mod compute;
pub mod db;
pub mod logging;
pub mod net;
pub mod template;
pub mod uvm;

mod util;

pub use channel::{Container, GuestChannel};
pub use compute::{ComputeSystem, SaveOptions, SaveType};
pub use db::{Database, KvStore};
pub use net::{
    CLONE_NAMESPACE_ID, Endpoint, GuestKind, NamespaceProvider, NetworkNamespace,
    setup_network_namespace,
};
pub use template::{PersistedTemplateRecord, TemplateStore, save_as_template};
pub use uvm::{
    BlockMount, CloneContext, CloneableResource, ComputeSystemSpec, FsShare, GuestVm, ShareKind,
    TemplateConfig, TemplateResource, VmStatus, clone_resources,
};
pub use vmclone_shared::{VmcloneError, VmcloneResult};

// Compile-time assertion: the guest handle crosses thread boundaries in
// embedding runtimes, so it must stay Send + Sync.
const _: () = {
    const fn assert_send_sync<T: Send + Sync>() {}
    let _ = assert_send_sync::<GuestVm>;
};
