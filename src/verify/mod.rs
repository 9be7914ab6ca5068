//! Composite verification of a running InnoDB cluster
//!
//! [`Verifier::check_all`] walks the cluster from the outside in: the
//! custom resource, the workloads derived from it, the replication group as
//! seen from SQL, and finally each instance and router pod. The first failed
//! check aborts the run with a descriptive [`Error`].

pub mod cluster;
pub mod data;
pub mod group;
pub mod pod;

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tracing::{info, instrument};

use crate::config::HarnessConfig;
use crate::error::{Error, Result};
use crate::mysql::{Credentials, SessionProvider};
use crate::store::{BackupSnapshot, ObjectStore, ResourceKind, get_custom};

pub use group::{GroupInfo, InstanceExpectation};
pub use pod::MemberRole;

/// What [`Verifier::check_all`] should expect of a cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckParams {
    pub namespace: String,
    pub name: String,
    /// Declared instances; 0 skips the comparison with the spec
    pub instances: usize,
    /// Expected router pods; `None` skips the router checks
    pub routers: Option<usize>,
    /// Ordinal of the expected primary; `None` accepts whatever the group reports
    pub primary: Option<usize>,
    /// Expect exactly one client session on the primary and none elsewhere
    pub count_sessions: bool,
    pub restarts_expected: bool,
    pub credentials: Credentials,
    /// Other clusters may live in the namespace; server pods are then
    /// matched by cluster label instead of name prefix
    pub shared_namespace: bool,
    /// Expected server version
    pub version: Option<String>,
}

impl CheckParams {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            instances: 0,
            routers: None,
            primary: None,
            count_sessions: false,
            restarts_expected: false,
            credentials,
            shared_namespace: false,
            version: None,
        }
    }

    pub fn instances(mut self, instances: usize) -> Self {
        self.instances = instances;
        self
    }

    pub fn routers(mut self, routers: usize) -> Self {
        self.routers = Some(routers);
        self
    }

    pub fn primary(mut self, primary: usize) -> Self {
        self.primary = Some(primary);
        self
    }

    pub fn count_sessions(mut self, count: bool) -> Self {
        self.count_sessions = count;
        self
    }

    pub fn restarts_expected(mut self, expected: bool) -> Self {
        self.restarts_expected = expected;
        self
    }

    pub fn shared_namespace(mut self, shared: bool) -> Self {
        self.shared_namespace = shared;
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
}

pub struct Verifier<'a> {
    store: &'a dyn ObjectStore,
    sessions: &'a dyn SessionProvider,
    config: &'a HarnessConfig,
}

impl<'a> Verifier<'a> {
    pub fn new(
        store: &'a dyn ObjectStore,
        sessions: &'a dyn SessionProvider,
        config: &'a HarnessConfig,
    ) -> Self {
        Self {
            store,
            sessions,
            config,
        }
    }

    /// Run every cluster, group, instance and router check.
    ///
    /// Returns the server pods in ordinal order.
    #[instrument(skip(self, params), fields(namespace = %params.namespace, name = %params.name))]
    pub async fn check_all(&self, params: &CheckParams) -> Result<Vec<Pod>> {
        let (snapshot, pods) =
            cluster::fetch_cluster(self.store, &params.namespace, &params.name).await?;
        cluster::check_cluster_spec(&snapshot, params.instances, params.routers)?;
        cluster::check_spec_compliance(self.store, &snapshot, params.shared_namespace).await?;
        cluster::check_cluster_object(self.store, &snapshot).await?;

        let group = group::check_group(self.sessions, &snapshot, &params.credentials).await?;
        let primary = params.primary.unwrap_or(group.primary);
        if primary != group.primary {
            return Err(Error::mismatch("primary ordinal", primary, group.primary));
        }

        let version = params.version.clone();
        for (index, pod) in pods.iter().enumerate() {
            let expected_name = snapshot.pod_name(index);
            if pod.name_any() != expected_name {
                return Err(Error::mismatch("pod name", expected_name, pod.name_any()));
            }
            let role = MemberRole::for_index(index, primary);

            pod::check_online_pod(
                self.store,
                &snapshot,
                pod,
                params.restarts_expected,
                role,
                self.config.label_retry,
            )
            .await?;
            if let Some(version) = &version {
                pod::check_image_version(pod, version)?;
            }

            let expectation = InstanceExpectation {
                index,
                role,
                sessions: params
                    .count_sessions
                    .then_some(usize::from(role == MemberRole::Primary)),
                version: version.clone(),
            };
            group::check_instance(
                self.sessions,
                &snapshot,
                &pods,
                pod,
                &expectation,
                &params.credentials,
            )
            .await?;
            pod::check_sidecar_health(self.store, &params.namespace, &expected_name).await?;
        }

        if let Some(routers) = params.routers {
            cluster::check_routers(self.store, &params.namespace, &params.name, routers).await?;
        }

        info!(instances = pods.len(), primary, "Cluster verified");
        Ok(pods)
    }

    /// Only the number of router pods, without phase or container checks.
    pub async fn check_router_pods(&self, namespace: &str, cluster: &str, expected: usize) -> Result<()> {
        cluster::check_router_count(self.store, namespace, cluster, expected).await
    }

    /// The named MySQLBackup must exist and report a completed status.
    #[instrument(skip(self))]
    pub async fn check_backup(&self, namespace: &str, name: &str) -> Result<BackupSnapshot> {
        let backup = get_custom(self.store, ResourceKind::MySQLBackup, namespace, name)
            .await?
            .map(|obj| BackupSnapshot::from_object(&obj))
            .ok_or_else(|| Error::verification(format!("MySQLBackup {namespace}/{name} not found")))?;
        if !backup.is_completed() {
            return Err(Error::mismatch(
                format!("status of MySQLBackup {namespace}/{name}"),
                crate::store::custom::BACKUP_COMPLETED,
                backup.status.as_deref().unwrap_or("none"),
            ));
        }
        Ok(backup)
    }

    pub async fn cross_sync_gtids(
        &self,
        namespace: &str,
        pods: &[String],
        credentials: &Credentials,
    ) -> Result<()> {
        data::cross_sync_gtids(
            self.sessions,
            namespace,
            pods,
            credentials,
            self.config.gtid_wait_timeout,
        )
        .await
    }

    pub async fn check_data(
        &self,
        namespace: &str,
        pods: &[String],
        primary: usize,
        credentials: &Credentials,
    ) -> Result<()> {
        data::check_data(
            self.sessions,
            namespace,
            pods,
            primary,
            credentials,
            self.config.gtid_wait_timeout,
        )
        .await
    }
}
