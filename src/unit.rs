//! Per-suite test fixture
//!
//! A [`TestUnit`] owns the namespace a suite runs in, the object store and
//! session provider the suite talks through, and the configuration every
//! wait and check draws its budgets from. Suites build one in their setup and
//! pass it to every step instead of sharing global state.

use std::collections::BTreeSet;
use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use kube::api::DynamicObject;
use tracing::{info, instrument};

use crate::config::HarnessConfig;
use crate::error::{Error, Result};
use crate::fault;
use crate::mysql::{Credentials, MysqlSessionProvider, SessionProvider, SqlSession};
use crate::namespace::NamespaceManager;
use crate::store::{
    BackupSnapshot, ContainerId, KubeStore, ObjectPatch, ObjectStore, ResourceKind, SinceVersion,
    delete_with_timeout, get_cluster, get_pod,
};
use crate::verify::{CheckParams, Verifier};
use crate::wait::watch::{self, ClusterWaitParams};
use crate::wait::{ClusterExpectation, EventMatcher, PodPhase};

/// Longest namespace name Kubernetes accepts
const MAX_NAMESPACE_LEN: usize = 63;

/// Namespace name `<prefix>-<suite>-<random>` reduced to a DNS label.
pub fn generate_namespace(prefix: &str, suite: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    let base: String = format!("{prefix}-{suite}")
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let base = base.trim_matches('-');
    let keep = MAX_NAMESPACE_LEN - 9;
    let base = if base.len() > keep { &base[..keep] } else { base };
    let base = base.trim_end_matches('-');
    if base.is_empty() {
        return suffix[..8].to_string();
    }
    format!("{base}-{}", &suffix[..8])
}

pub struct TestUnit {
    config: HarnessConfig,
    store: Arc<dyn ObjectStore>,
    sessions: Arc<dyn SessionProvider>,
    namespace: String,
    aux_namespace: Option<String>,
}

impl TestUnit {
    pub fn new(
        config: HarnessConfig,
        store: Arc<dyn ObjectStore>,
        sessions: Arc<dyn SessionProvider>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            config,
            store,
            sessions,
            namespace: namespace.into(),
            aux_namespace: None,
        }
    }

    /// A second namespace wiped together with the main one.
    pub fn with_aux_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.aux_namespace = Some(namespace.into());
        self
    }

    /// Build a unit against the ambient Kubernetes cluster with a freshly
    /// generated namespace for `suite`.
    pub async fn connect(config: HarnessConfig, suite: &str) -> Result<Self> {
        let store = KubeStore::try_default().await?;
        let sessions = MysqlSessionProvider::new(store.client().clone(), config.session_retry);
        let namespace = generate_namespace(&config.namespace_prefix, suite);
        Ok(Self::new(config, Arc::new(store), Arc::new(sessions), namespace))
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn aux_namespace(&self) -> Option<&str> {
        self.aux_namespace.as_deref()
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn store(&self) -> &dyn ObjectStore {
        self.store.as_ref()
    }

    pub fn sessions(&self) -> &dyn SessionProvider {
        self.sessions.as_ref()
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(&self.config.root_user, &self.config.root_password)
    }

    fn namespaces(&self) -> NamespaceManager<'_> {
        NamespaceManager::new(self.store(), &self.config)
    }

    pub fn verifier(&self) -> Verifier<'_> {
        Verifier::new(self.store(), self.sessions(), &self.config)
    }

    /// Wipe leftovers of both namespaces and create the main one.
    #[instrument(skip(self), fields(namespace = %self.namespace))]
    pub async fn setup(&self) -> Result<()> {
        let namespaces = self.namespaces();
        if let Some(aux) = &self.aux_namespace {
            namespaces.wipe(aux).await?;
        }
        namespaces.setup(&self.namespace).await?;
        info!("Test unit ready");
        Ok(())
    }

    /// Wipe the auxiliary namespace, then the main one.
    #[instrument(skip(self), fields(namespace = %self.namespace))]
    pub async fn teardown(&self) -> Result<()> {
        let namespaces = self.namespaces();
        if let Some(aux) = &self.aux_namespace {
            namespaces.wipe(aux).await?;
        }
        namespaces.wipe(&self.namespace).await?;
        info!("Test unit torn down");
        Ok(())
    }

    /// Check parameters with no router or primary expectations and the
    /// configured root account.
    pub fn default_check_params(&self, cluster: &str) -> CheckParams {
        CheckParams::new(&self.namespace, cluster, self.credentials())
    }

    pub async fn check_all(&self, params: &CheckParams) -> Result<Vec<Pod>> {
        self.verifier().check_all(params).await
    }

    /// Apply a single-document YAML manifest into the unit's namespace.
    pub async fn apply_manifest(&self, yaml: &str) -> Result<DynamicObject> {
        let obj: DynamicObject = serde_yaml::from_str(yaml)
            .map_err(|e| Error::verification(format!("invalid manifest: {e}")))?;
        let kind_name = obj
            .types
            .as_ref()
            .map(|t| t.kind.as_str())
            .unwrap_or_default();
        let kind = ResourceKind::from_kind_name(kind_name).ok_or_else(|| Error::MissingField {
            object: "manifest".to_string(),
            path: format!("kind (unsupported value {kind_name:?})"),
        })?;
        Ok(self.store.apply(kind, &self.namespace, &obj).await?)
    }

    /// Current resource version of the cluster, for scoping later waits.
    pub async fn cluster_resource_version(&self, name: &str) -> Result<SinceVersion> {
        let cluster = get_cluster(self.store(), &self.namespace, name)
            .await?
            .ok_or_else(|| {
                Error::verification(format!("InnoDBCluster {}/{name} not found", self.namespace))
            })?;
        Ok(cluster
            .resource_version
            .map(SinceVersion::After)
            .unwrap_or_default())
    }

    pub async fn pod(&self, name: &str) -> Result<Pod> {
        get_pod(self.store(), &self.namespace, name)
            .await?
            .ok_or_else(|| Error::verification(format!("pod {}/{name} not found", self.namespace)))
    }

    /// Current resource version of a pod, so a wait after a fault skips the
    /// pod's earlier state.
    pub async fn pod_resource_version(&self, name: &str) -> Result<SinceVersion> {
        let pod = self.pod(name).await?;
        Ok(pod
            .metadata
            .resource_version
            .map(SinceVersion::After)
            .unwrap_or_default())
    }

    pub async fn wait_on_cluster(
        &self,
        name: &str,
        expectation: ClusterExpectation,
        since: SinceVersion,
    ) -> Result<()> {
        let params = ClusterWaitParams {
            namespace: self.namespace.clone(),
            name: name.to_string(),
            expectation,
            since,
            timeout: self.config.cluster_timeout(),
        };
        watch::wait_on_cluster(self.store(), &params).await
    }

    /// Wait for ONLINE with at least `instances` members online.
    pub async fn wait_on_cluster_online(&self, name: &str, instances: i64, since: SinceVersion) -> Result<()> {
        self.wait_on_cluster(name, ClusterExpectation::online(instances), since)
            .await
    }

    pub async fn wait_on_cluster_gone(&self, name: &str) -> Result<()> {
        watch::wait_on_cluster_gone(self.store(), &self.namespace, name, self.config.gone_timeout())
            .await
    }

    pub async fn wait_on_pod(&self, name: &str, phase: PodPhase, since: &SinceVersion) -> Result<()> {
        watch::wait_on_pod(
            self.store(),
            &self.namespace,
            name,
            since,
            phase,
            self.config.pod_timeout(),
        )
        .await
    }

    pub async fn wait_on_pod_gone(&self, name: &str) -> Result<()> {
        watch::wait_on_pod_gone(self.store(), &self.namespace, name, self.config.gone_timeout())
            .await
    }

    pub async fn wait_on_routers(&self, cluster: &str, expected: usize) -> Result<()> {
        watch::wait_on_routers(
            self.store(),
            &self.namespace,
            cluster,
            expected,
            self.config.routers.schedule(),
        )
        .await
    }

    pub async fn wait_on_routers_gone(&self, cluster: &str) -> Result<()> {
        watch::wait_on_routers_gone(
            self.store(),
            &self.namespace,
            cluster,
            self.config.routers.schedule(),
        )
        .await
    }

    pub async fn wait_for_cluster_event(
        &self,
        cluster: &str,
        since: &SinceVersion,
        matcher: &EventMatcher,
    ) -> Result<()> {
        watch::wait_for_cluster_event(
            self.store(),
            &self.namespace,
            cluster,
            since,
            matcher,
            self.config.events.schedule(),
        )
        .await
    }

    pub async fn patch_cluster(&self, name: &str, patch: &ObjectPatch) -> Result<()> {
        self.store
            .patch(ResourceKind::InnoDBCluster, &self.namespace, name, patch)
            .await?;
        Ok(())
    }

    pub async fn delete_cluster(&self, name: &str) -> Result<()> {
        delete_with_timeout(
            self.store(),
            ResourceKind::InnoDBCluster,
            &self.namespace,
            name,
            self.config.custom_resource_delete_timeout(),
        )
        .await?;
        Ok(())
    }

    pub async fn delete_pod(&self, name: &str) -> Result<()> {
        delete_with_timeout(
            self.store(),
            ResourceKind::Pod,
            &self.namespace,
            name,
            self.config.delete_timeout(),
        )
        .await?;
        Ok(())
    }

    pub async fn kill_process(
        &self,
        pod: &str,
        container: ContainerId,
        signal: i32,
        pid: u32,
    ) -> Result<()> {
        fault::kill_process(
            self.store(),
            self.config.kill_retry,
            &self.namespace,
            pod,
            container,
            signal,
            pid,
        )
        .await
    }

    /// Session to a pod of the unit's namespace as the configured root account.
    pub async fn open_session(&self, pod: &str) -> Result<Box<dyn SqlSession>> {
        let credentials = self.credentials();
        Ok(self
            .sessions
            .open(&self.namespace, pod, &credentials.user, &credentials.password)
            .await?)
    }

    pub async fn query_set(&self, pod: &str, query: &str, column: usize) -> Result<BTreeSet<String>> {
        crate::verify::data::query_set(
            self.sessions(),
            &self.namespace,
            pod,
            &self.credentials(),
            query,
            column,
        )
        .await
    }

    pub async fn cross_sync_gtids(&self, pods: &[String]) -> Result<()> {
        self.verifier()
            .cross_sync_gtids(&self.namespace, pods, &self.credentials())
            .await
    }

    pub async fn check_data(&self, pods: &[String], primary: usize) -> Result<()> {
        self.verifier()
            .check_data(&self.namespace, pods, primary, &self.credentials())
            .await
    }

    pub async fn check_backup(&self, name: &str) -> Result<BackupSnapshot> {
        self.verifier().check_backup(&self.namespace, name).await
    }

    pub async fn check_router_pods(&self, cluster: &str, expected: usize) -> Result<()> {
        self.verifier()
            .check_router_pods(&self.namespace, cluster, expected)
            .await
    }
}
