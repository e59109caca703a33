//! Encoding and decoding of template configs.
//!
//! The resource list is polymorphic, so the encoded form is an explicit
//! tag-plus-payload document. A process-wide registry maps tags back to
//! decoders. Registration is not transmitted with the data, so every
//! process that encodes or decodes must call [`init_registry`] with the
//! identical (compiled-in) variant set before first use.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use vmclone_shared::{VmcloneError, VmcloneResult};

use crate::uvm::{BlockMount, FsShare, TemplateConfig, TemplateResource};

type DecodeFn = fn(&Value) -> VmcloneResult<TemplateResource>;

struct VariantRegistry {
    decoders: BTreeMap<&'static str, DecodeFn>,
}

static REGISTRY: OnceLock<VariantRegistry> = OnceLock::new();

/// Register every resource variant that may appear in an encoded template
/// config.
///
/// Must run once, before any encode or decode, in every process that
/// touches encoded configs. Calling it again is a no-op. The registry is
/// read-only after initialization, so no synchronization is needed on the
/// decode path.
pub fn init_registry() {
    REGISTRY.get_or_init(|| {
        let mut decoders: BTreeMap<&'static str, DecodeFn> = BTreeMap::new();
        decoders.insert(TemplateResource::FS_SHARE_KIND, decode_fs_share);
        decoders.insert(TemplateResource::BLOCK_MOUNT_KIND, decode_block_mount);
        VariantRegistry { decoders }
    });
}

fn registry() -> VmcloneResult<&'static VariantRegistry> {
    REGISTRY.get().ok_or_else(|| {
        VmcloneError::Codec(
            "variant registry not initialized; call codec::init_registry() at startup".into(),
        )
    })
}

fn decode_fs_share(payload: &Value) -> VmcloneResult<TemplateResource> {
    let share: FsShare = serde_json::from_value(payload.clone())
        .map_err(|e| VmcloneError::Codec(format!("fs-share payload: {}", e)))?;
    Ok(TemplateResource::FsShare(share))
}

fn decode_block_mount(payload: &Value) -> VmcloneResult<TemplateResource> {
    let mount: BlockMount = serde_json::from_value(payload.clone())
        .map_err(|e| VmcloneError::Codec(format!("block-mount payload: {}", e)))?;
    Ok(TemplateResource::BlockMount(mount))
}

#[derive(Serialize, Deserialize)]
struct EncodedResource {
    kind: String,
    payload: Value,
}

#[derive(Serialize, Deserialize)]
struct EncodedConfig {
    uvm_id: String,
    resources: Vec<EncodedResource>,
}

/// Encode a template config into an opaque byte blob.
///
/// # Errors
///
/// `Codec` if the registry is uninitialized or a resource's tag is not
/// registered - both indicate a producer/consumer registration mismatch and
/// are fatal to the call.
pub fn encode(config: &TemplateConfig) -> VmcloneResult<Vec<u8>> {
    let registry = registry()?;

    let mut resources = Vec::with_capacity(config.resources.len());
    for resource in &config.resources {
        let kind = resource.kind();
        if !registry.decoders.contains_key(kind) {
            return Err(VmcloneError::Codec(format!(
                "unregistered resource variant {}",
                kind
            )));
        }
        let payload = match resource {
            TemplateResource::FsShare(share) => serde_json::to_value(share),
            TemplateResource::BlockMount(mount) => serde_json::to_value(mount),
        }
        .map_err(|e| VmcloneError::Codec(format!("encode {} payload: {}", kind, e)))?;

        resources.push(EncodedResource {
            kind: kind.to_string(),
            payload,
        });
    }

    serde_json::to_vec(&EncodedConfig {
        uvm_id: config.uvm_id.clone(),
        resources,
    })
    .map_err(|e| VmcloneError::Codec(format!("encode template config: {}", e)))
}

/// Decode a byte blob back into a template config.
///
/// # Errors
///
/// `Codec` for a malformed stream or a tag with no registered decoder;
/// always fatal and non-retryable.
pub fn decode(data: &[u8]) -> VmcloneResult<TemplateConfig> {
    let registry = registry()?;

    let encoded: EncodedConfig = serde_json::from_slice(data)
        .map_err(|e| VmcloneError::Codec(format!("malformed template config: {}", e)))?;

    let mut resources = Vec::with_capacity(encoded.resources.len());
    for entry in &encoded.resources {
        let decode = registry.decoders.get(entry.kind.as_str()).ok_or_else(|| {
            VmcloneError::Codec(format!(
                "unregistered resource variant tag {:?}",
                entry.kind
            ))
        })?;
        resources.push(decode(&entry.payload)?);
    }

    Ok(TemplateConfig {
        uvm_id: encoded.uvm_id,
        resources,
    })
}
