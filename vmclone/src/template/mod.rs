//! Template capture, persistence, and the save-as-template sequence.
//!
//! A template's resource list is encoded to an opaque blob and stored under
//! the guest's identity in a fixed logical namespace of the keyed store.
//! Each clone operation reconstructs a fresh config from storage; the
//! template guest and its clones never share a live instance.

pub mod codec;

use vmclone_shared::{VmcloneError, VmcloneResult};

use crate::compute::SaveOptions;
use crate::db::KvStore;
use crate::uvm::{GuestVm, TemplateConfig};

/// Logical KV namespace holding persisted template configs.
const TEMPLATE_NAMESPACE: &str = "template-configs";

/// Durable record backing one template's resource list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedTemplateRecord {
    /// Encoded template config, opaque to the store.
    pub raw_data: Vec<u8>,
    /// False until the first successful store, true forever after. Governs
    /// create-vs-update dispatch: the existence check runs exactly once, at
    /// first save, so a retried re-save never fails on "already exists".
    pub stored: bool,
}

impl PersistedTemplateRecord {
    /// Fresh, not-yet-durable record.
    pub fn new(raw_data: Vec<u8>) -> Self {
        Self {
            raw_data,
            stored: false,
        }
    }
}

/// Durable storage of template configs, keyed by guest identity.
#[derive(Clone)]
pub struct TemplateStore {
    kv: KvStore,
}

impl TemplateStore {
    pub fn new(kv: KvStore) -> Self {
        Self { kv }
    }

    /// Load the record for a guest.
    ///
    /// A loaded record always has `stored = true`: anything that can be
    /// loaded is, by definition, durably stored.
    ///
    /// # Errors
    ///
    /// `NotFound` if no record exists for `id`.
    pub fn load(&self, id: &str) -> VmcloneResult<PersistedTemplateRecord> {
        let raw_data = self.kv.get(TEMPLATE_NAMESPACE, id)?;
        Ok(PersistedTemplateRecord {
            raw_data,
            stored: true,
        })
    }

    /// Store a record, creating on first save and overwriting thereafter.
    ///
    /// A `stored = false` record performs a create - a duplicate is detected
    /// by the backing store's constraint, not re-checked here - and flips
    /// `stored` on success. A `stored = true` record overwrites.
    pub fn store(&self, id: &str, record: &mut PersistedTemplateRecord) -> VmcloneResult<()> {
        if record.stored {
            self.kv.set(TEMPLATE_NAMESPACE, id, &record.raw_data)?;
        } else {
            self.kv.create(TEMPLATE_NAMESPACE, id, &record.raw_data)?;
        }
        record.stored = true;
        Ok(())
    }

    /// Remove a guest's record. Idempotent: an absent record is success.
    pub fn remove(&self, id: &str) -> VmcloneResult<()> {
        match self.kv.remove(TEMPLATE_NAMESPACE, id) {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        }
    }

    /// Persist everything required to create clones from this template.
    ///
    /// # Errors
    ///
    /// `AlreadyExists` if a record for this guest is already present -
    /// saving over a live template's resource list is a configuration
    /// error, never auto-resolved.
    pub fn save_template_config(&self, config: &TemplateConfig) -> VmcloneResult<()> {
        match self.load(&config.uvm_id) {
            Err(e) if e.is_not_found() => {}
            Ok(_) => {
                return Err(VmcloneError::AlreadyExists(format!(
                    "template config for guest {}; a template must not already exist",
                    config.uvm_id
                )));
            }
            Err(e) => return Err(e),
        }

        let raw_data = codec::encode(config)?;
        let mut record = PersistedTemplateRecord::new(raw_data);
        self.store(&config.uvm_id, &mut record)?;

        tracing::info!(
            vm_id = %config.uvm_id,
            resources = config.resources.len(),
            "saved template config"
        );
        Ok(())
    }

    /// Reconstruct the template config for a guest.
    ///
    /// # Errors
    ///
    /// `NotFound` propagated verbatim from the store; `Codec` surfaced
    /// as-is on decode failure.
    pub fn fetch_template_config(&self, id: &str) -> VmcloneResult<TemplateConfig> {
        let record = self.load(id)?;
        codec::decode(&record.raw_data)
    }

    /// Remove all persisted state for a template. Idempotent.
    pub fn remove_saved_template_config(&self, id: &str) -> VmcloneResult<()> {
        self.remove(id)
    }
}

/// Freeze a running guest into a template.
///
/// Sequence: detach every NIC, close the guest control channel, capture and
/// persist the template config, pause, save as template. Steps run strictly
/// in order; a failed step aborts the sequence and leaves the partially
/// quiesced guest as-is for operator inspection - earlier steps are not
/// rolled back. On success the guest is terminal: only clones derived from
/// its saved state may run.
pub async fn save_as_template(vm: &mut GuestVm, store: &TemplateStore) -> VmcloneResult<()> {
    tracing::info!(vm_id = %vm.id(), "saving guest as template");

    vm.remove_all_nics().await?;
    vm.close_guest_channel().await?;

    store.save_template_config(&vm.template_config())?;
    vm.note_config_persisted()?;

    vm.pause().await?;
    vm.save(&SaveOptions::as_template()).await?;

    tracing::info!(vm_id = %vm.id(), "guest saved as template");
    Ok(())
}
