//! Network namespace setup with the template/clone identity remap.
//!
//! Normally a guest gets a freshly-created namespace hot-added under its
//! real provider id, and the namespace's endpoints follow under the same id.
//! Cloning breaks that: processes already running inside a clone keep
//! referencing the namespace id they saw in the template, and nothing can
//! make them switch. So every template - and therefore every clone - is
//! given one reserved in-guest namespace id, [`CLONE_NAMESPACE_ID`], while
//! the provider keeps tracking each guest's namespace and endpoints under
//! their real, distinct ids. Host-side management stays unambiguous; the
//! in-guest identity stays stable across the whole template/clone family.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use vmclone_shared::{VmcloneError, VmcloneResult};

use crate::util::with_best_effort_cleanup;
use crate::uvm::GuestVm;

/// Reserved in-guest namespace id shared by every template and clone.
///
/// Distinct from anything the provider generates; seeing several guests with
/// this id immediately marks them as members of a template/clone family.
pub const CLONE_NAMESPACE_ID: &str = "D6FCF5C9-64A1-4E8B-9A31-7E52BB4AD0F2";

/// A host network namespace as tracked by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkNamespace {
    pub id: String,
    /// Host compartment backing this namespace, if assigned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compartment_id: Option<u32>,
}

impl NetworkNamespace {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            compartment_id: None,
        }
    }
}

/// A network endpoint bound to a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Namespace this endpoint believes it belongs to. Rewritten for
    /// templates and clones before hot-add.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

impl Endpoint {
    pub fn new(id: impl Into<String>, namespace_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            namespace_id: Some(namespace_id.into()),
            mac_address: None,
            ip_address: None,
        }
    }
}

/// Host namespace/endpoint provider.
///
/// The provider has no knowledge of the in-guest remap: every call here uses
/// real provider-side identifiers.
#[async_trait]
pub trait NamespaceProvider: Send + Sync {
    /// Create a fresh namespace and return its id.
    async fn create_namespace(&self) -> VmcloneResult<String>;

    /// Fetch a namespace object by its real id.
    async fn get_namespace_by_id(&self, id: &str) -> VmcloneResult<NetworkNamespace>;

    /// List the ids of all endpoints bound to a namespace.
    async fn get_namespace_endpoints(&self, id: &str) -> VmcloneResult<Vec<String>>;

    /// Fetch an endpoint object by id.
    async fn get_endpoint_by_id(&self, id: &str) -> VmcloneResult<Endpoint>;

    /// Bind an existing endpoint to a namespace.
    async fn add_namespace_endpoint(
        &self,
        namespace_id: &str,
        endpoint_id: &str,
    ) -> VmcloneResult<()>;
}

/// What role a guest plays in a template/clone family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuestKind {
    /// Ordinary guest: no identity remap.
    Standard,
    /// Guest being frozen into a template.
    Template,
    /// Guest launched from a template's saved state.
    Clone,
}

impl GuestKind {
    /// Translate the two independent role flags into a kind.
    ///
    /// # Errors
    ///
    /// `InvalidState` when both flags are set - a guest cannot be a template
    /// and a clone at once; that combination is a caller contract violation.
    pub fn from_flags(is_template: bool, is_clone: bool) -> VmcloneResult<Self> {
        match (is_template, is_clone) {
            (false, false) => Ok(Self::Standard),
            (true, false) => Ok(Self::Template),
            (false, true) => Ok(Self::Clone),
            (true, true) => Err(VmcloneError::InvalidState(
                "a guest cannot be both a template and a clone".into(),
            )),
        }
    }

    pub fn is_template(self) -> bool {
        matches!(self, Self::Template)
    }

    pub fn is_clone(self) -> bool {
        matches!(self, Self::Clone)
    }

    /// Templates and clones observe the reserved namespace id instead of the
    /// real one.
    pub fn remaps_namespace(self) -> bool {
        !matches!(self, Self::Standard)
    }
}

/// The namespace id a guest of the given kind observes.
///
/// Templates and clones always observe [`CLONE_NAMESPACE_ID`]; ordinary
/// guests observe the real provider id.
pub fn guest_visible_nsid(real_id: &str, kind: GuestKind) -> &str {
    if kind.remaps_namespace() {
        CLONE_NAMESPACE_ID
    } else {
        real_id
    }
}

/// Fetch the full endpoint objects bound to `nsid`.
pub async fn namespace_endpoints(
    provider: &dyn NamespaceProvider,
    nsid: &str,
) -> VmcloneResult<Vec<Endpoint>> {
    let ids = provider.get_namespace_endpoints(nsid).await?;
    let mut endpoints = Vec::with_capacity(ids.len());
    for id in ids {
        endpoints.push(provider.get_endpoint_by_id(&id).await?);
    }
    Ok(endpoints)
}

/// Create a fresh namespace and bind the given endpoints to it.
///
/// Returns the new namespace id. Host-side only; nothing is hot-added into
/// any guest here.
pub async fn create_network_namespace(
    provider: &dyn NamespaceProvider,
    endpoint_ids: &[String],
) -> VmcloneResult<String> {
    let nsid = provider.create_namespace().await?;
    tracing::info!(nsid = %nsid, "created network namespace");

    for endpoint_id in endpoint_ids {
        provider.add_namespace_endpoint(&nsid, endpoint_id).await?;
        tracing::debug!(nsid = %nsid, endpoint = %endpoint_id, "bound endpoint to namespace");
    }

    Ok(nsid)
}

/// Hot-add a namespace and its endpoints into a guest, remapping the
/// in-guest identity for templates and clones.
///
/// Steps:
/// 1. Endpoints are looked up under the **real** id - the provider knows
///    nothing about the remap.
/// 2. Clones skip the namespace hot-add entirely: they inherit the
///    namespace object from the template's saved state. Everyone else gets
///    the provider's namespace object, with its id overwritten to the
///    reserved value first when this guest is a template.
/// 3. For templates and clones, each endpoint's namespace reference is
///    rewritten to the guest-visible id before hot-add.
/// 4. Endpoints are hot-added under the guest-visible id. If that fails,
///    the namespace is best-effort removed from the guest and the hot-add
///    failure is reported regardless of the cleanup's outcome.
pub async fn setup_network_namespace(
    vm: &GuestVm,
    provider: &dyn NamespaceProvider,
    nsid: &str,
    kind: GuestKind,
) -> VmcloneResult<()> {
    let visible_id = guest_visible_nsid(nsid, kind).to_owned();
    tracing::debug!(
        vm_id = %vm.id(),
        nsid = %nsid,
        visible_id = %visible_id,
        kind = ?kind,
        "setting up network namespace"
    );

    let mut endpoints = namespace_endpoints(provider, nsid).await?;

    if !kind.is_clone() {
        let mut namespace = provider.get_namespace_by_id(nsid).await?;
        if kind.is_template() {
            namespace.id = visible_id.clone();
        }
        vm.add_namespace(&namespace).await?;
    }

    if kind.remaps_namespace() {
        for endpoint in &mut endpoints {
            endpoint.namespace_id = Some(visible_id.clone());
        }
    }

    let added = vm.add_endpoints(&visible_id, &endpoints).await;
    with_best_effort_cleanup(added, vm.remove_namespace(&visible_id), "namespace").await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::{ComputeSystem, SaveOptions};
    use crate::uvm::GuestVm;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    struct FakeProvider {
        namespaces: BTreeMap<String, NetworkNamespace>,
        endpoints: BTreeMap<String, Endpoint>,
        bindings: BTreeMap<String, Vec<String>>,
        created: Mutex<Vec<String>>,
    }

    impl FakeProvider {
        fn new() -> Self {
            Self {
                namespaces: BTreeMap::new(),
                endpoints: BTreeMap::new(),
                bindings: BTreeMap::new(),
                created: Mutex::new(Vec::new()),
            }
        }

        fn with_namespace(mut self, nsid: &str, endpoint_ids: &[&str]) -> Self {
            self.namespaces
                .insert(nsid.to_string(), NetworkNamespace::new(nsid));
            for id in endpoint_ids {
                self.endpoints
                    .insert(id.to_string(), Endpoint::new(*id, nsid));
            }
            self.bindings.insert(
                nsid.to_string(),
                endpoint_ids.iter().map(|s| s.to_string()).collect(),
            );
            self
        }
    }

    #[async_trait]
    impl NamespaceProvider for FakeProvider {
        async fn create_namespace(&self) -> VmcloneResult<String> {
            let id = uuid::Uuid::new_v4().to_string().to_uppercase();
            self.created.lock().push(id.clone());
            Ok(id)
        }

        async fn get_namespace_by_id(&self, id: &str) -> VmcloneResult<NetworkNamespace> {
            self.namespaces
                .get(id)
                .cloned()
                .ok_or_else(|| VmcloneError::NotFound(format!("namespace {}", id)))
        }

        async fn get_namespace_endpoints(&self, id: &str) -> VmcloneResult<Vec<String>> {
            self.bindings
                .get(id)
                .cloned()
                .ok_or_else(|| VmcloneError::NotFound(format!("namespace {}", id)))
        }

        async fn get_endpoint_by_id(&self, id: &str) -> VmcloneResult<Endpoint> {
            self.endpoints
                .get(id)
                .cloned()
                .ok_or_else(|| VmcloneError::NotFound(format!("endpoint {}", id)))
        }

        async fn add_namespace_endpoint(
            &self,
            _namespace_id: &str,
            endpoint_id: &str,
        ) -> VmcloneResult<()> {
            if self.endpoints.contains_key(endpoint_id) {
                Ok(())
            } else {
                Err(VmcloneError::NotFound(format!("endpoint {}", endpoint_id)))
            }
        }
    }

    /// Control plane recording hot-add/hot-remove calls, optionally failing
    /// the endpoint hot-add.
    #[derive(Default)]
    struct RecordingCompute {
        added_namespaces: Mutex<Vec<NetworkNamespace>>,
        added_endpoints: Mutex<Vec<(String, Vec<Endpoint>)>>,
        removed_namespaces: Mutex<Vec<String>>,
        fail_add_endpoints: bool,
        fail_remove_namespace: bool,
    }

    #[async_trait]
    impl ComputeSystem for RecordingCompute {
        async fn pause(&self) -> VmcloneResult<()> {
            Ok(())
        }
        async fn save(&self, _options: &SaveOptions) -> VmcloneResult<()> {
            Ok(())
        }
        async fn add_namespace(&self, namespace: &NetworkNamespace) -> VmcloneResult<()> {
            self.added_namespaces.lock().push(namespace.clone());
            Ok(())
        }
        async fn add_endpoints(
            &self,
            namespace_id: &str,
            endpoints: &[Endpoint],
        ) -> VmcloneResult<()> {
            self.added_endpoints
                .lock()
                .push((namespace_id.to_string(), endpoints.to_vec()));
            if self.fail_add_endpoints {
                return Err(VmcloneError::Provider("endpoint hot-add rejected".into()));
            }
            Ok(())
        }
        async fn remove_namespace(&self, namespace_id: &str) -> VmcloneResult<()> {
            self.removed_namespaces.lock().push(namespace_id.to_string());
            if self.fail_remove_namespace {
                return Err(VmcloneError::Provider("remove rejected".into()));
            }
            Ok(())
        }
        async fn remove_all_nics(&self) -> VmcloneResult<()> {
            Ok(())
        }
    }

    const REAL_NSID: &str = "7A3B1C55-0000-4AAA-B111-222233334444";

    fn setup() -> (Arc<RecordingCompute>, GuestVm, FakeProvider) {
        let compute = Arc::new(RecordingCompute::default());
        let vm = GuestVm::new("vm-net", compute.clone());
        let provider = FakeProvider::new().with_namespace(REAL_NSID, &["ep-1", "ep-2"]);
        (compute, vm, provider)
    }

    #[test]
    fn test_guest_kind_from_flags() {
        assert_eq!(
            GuestKind::from_flags(false, false).unwrap(),
            GuestKind::Standard
        );
        assert_eq!(
            GuestKind::from_flags(true, false).unwrap(),
            GuestKind::Template
        );
        assert_eq!(
            GuestKind::from_flags(false, true).unwrap(),
            GuestKind::Clone
        );
        assert!(matches!(
            GuestKind::from_flags(true, true).unwrap_err(),
            VmcloneError::InvalidState(_)
        ));
    }

    #[test]
    fn test_remap_is_pure() {
        assert_eq!(
            guest_visible_nsid(REAL_NSID, GuestKind::Standard),
            REAL_NSID
        );
        assert_eq!(
            guest_visible_nsid(REAL_NSID, GuestKind::Template),
            CLONE_NAMESPACE_ID
        );
        assert_eq!(
            guest_visible_nsid(REAL_NSID, GuestKind::Clone),
            CLONE_NAMESPACE_ID
        );
        assert_ne!(REAL_NSID, CLONE_NAMESPACE_ID);
    }

    #[tokio::test]
    async fn test_template_setup_rewrites_identity() {
        let (compute, vm, provider) = setup();

        setup_network_namespace(&vm, &provider, REAL_NSID, GuestKind::Template)
            .await
            .unwrap();

        // The namespace handed to the guest carries the reserved id even
        // though the provider lookup used the real one.
        let namespaces = compute.added_namespaces.lock();
        assert_eq!(namespaces.len(), 1);
        assert_eq!(namespaces[0].id, CLONE_NAMESPACE_ID);

        let endpoints = compute.added_endpoints.lock();
        assert_eq!(endpoints.len(), 1);
        let (nsid, eps) = &endpoints[0];
        assert_eq!(nsid, CLONE_NAMESPACE_ID);
        assert!(
            eps.iter()
                .all(|ep| ep.namespace_id.as_deref() == Some(CLONE_NAMESPACE_ID))
        );
    }

    #[tokio::test]
    async fn test_clone_setup_skips_namespace_hot_add() {
        let (compute, vm, provider) = setup();

        setup_network_namespace(&vm, &provider, REAL_NSID, GuestKind::Clone)
            .await
            .unwrap();

        // Clones inherit the namespace from the template's saved state.
        assert!(compute.added_namespaces.lock().is_empty());

        let endpoints = compute.added_endpoints.lock();
        assert_eq!(endpoints.len(), 1);
        let (nsid, eps) = &endpoints[0];
        assert_eq!(nsid, CLONE_NAMESPACE_ID);
        assert_eq!(eps.len(), 2);
        assert!(
            eps.iter()
                .all(|ep| ep.namespace_id.as_deref() == Some(CLONE_NAMESPACE_ID))
        );
    }

    #[tokio::test]
    async fn test_standard_setup_keeps_real_identity() {
        let (compute, vm, provider) = setup();

        setup_network_namespace(&vm, &provider, REAL_NSID, GuestKind::Standard)
            .await
            .unwrap();

        let namespaces = compute.added_namespaces.lock();
        assert_eq!(namespaces[0].id, REAL_NSID);

        let endpoints = compute.added_endpoints.lock();
        let (nsid, eps) = &endpoints[0];
        assert_eq!(nsid, REAL_NSID);
        assert!(
            eps.iter()
                .all(|ep| ep.namespace_id.as_deref() == Some(REAL_NSID))
        );
    }

    #[tokio::test]
    async fn test_endpoint_hot_add_failure_triggers_cleanup() {
        let compute = Arc::new(RecordingCompute {
            fail_add_endpoints: true,
            ..Default::default()
        });
        let vm = GuestVm::new("vm-net", compute.clone());
        let provider = FakeProvider::new().with_namespace(REAL_NSID, &["ep-1"]);

        let err = setup_network_namespace(&vm, &provider, REAL_NSID, GuestKind::Template)
            .await
            .unwrap_err();

        // The hot-add failure is reported, and a namespace removal was
        // attempted under the guest-visible id.
        assert!(err.to_string().contains("endpoint hot-add rejected"));
        assert_eq!(
            compute.removed_namespaces.lock().as_slice(),
            [CLONE_NAMESPACE_ID.to_string()]
        );
    }

    #[tokio::test]
    async fn test_cleanup_failure_does_not_mask_original_error() {
        let compute = Arc::new(RecordingCompute {
            fail_add_endpoints: true,
            fail_remove_namespace: true,
            ..Default::default()
        });
        let vm = GuestVm::new("vm-net", compute.clone());
        let provider = FakeProvider::new().with_namespace(REAL_NSID, &["ep-1"]);

        let err = setup_network_namespace(&vm, &provider, REAL_NSID, GuestKind::Clone)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("endpoint hot-add rejected"));
        assert_eq!(compute.removed_namespaces.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_namespace_propagates_not_found() {
        let (_compute, vm, provider) = setup();

        let err = setup_network_namespace(&vm, &provider, "missing", GuestKind::Standard)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_create_network_namespace_binds_endpoints() {
        let provider = FakeProvider::new().with_namespace(REAL_NSID, &["ep-1", "ep-2"]);

        let nsid = create_network_namespace(
            &provider,
            &["ep-1".to_string(), "ep-2".to_string()],
        )
        .await
        .unwrap();

        assert_eq!(provider.created.lock().as_slice(), [nsid.clone()]);
        assert_ne!(nsid, CLONE_NAMESPACE_ID);
    }

    #[tokio::test]
    async fn test_create_network_namespace_unknown_endpoint_fails() {
        let provider = FakeProvider::new().with_namespace(REAL_NSID, &["ep-1"]);

        let err = create_network_namespace(&provider, &["ep-missing".to_string()])
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
