//! Cluster-object store abstraction
//!
//! Every Kubernetes interaction of the harness goes through [`ObjectStore`]:
//! get/list/watch/patch/delete over a closed set of [`ResourceKind`]s, plus
//! namespace lifecycle, events, container logs and exec. Objects cross the
//! boundary as [`DynamicObject`] and are decoded into typed k8s-openapi
//! structs (or [`custom::ClusterSnapshot`]) right after the fetch.

pub mod container;
pub mod custom;
pub mod kube_store;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{Event, Pod, Service};
use kube::api::DynamicObject;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

pub use container::ContainerId;
pub use custom::{BackupSnapshot, ClusterSnapshot, CustomObject};
pub use kube_store::KubeStore;

/// API group of the operator's custom resources
pub const OPERATOR_GROUP: &str = "mysql.oracle.com";
/// API version of the operator's custom resources
pub const OPERATOR_VERSION: &str = "v2";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to decode {kind} {name}: {message}")]
    Decode {
        kind: &'static str,
        name: String,
        message: String,
    },

    #[error("Watch error: {0}")]
    Watch(String),

    #[error("Exec in {pod}/{container} failed: {message}")]
    Exec {
        pod: String,
        container: String,
        message: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Timed out: {0}")]
    Timeout(String),
}

impl StoreError {
    /// True for a 404 from the API server or an explicit not-found.
    pub fn is_not_found(&self) -> bool {
        match self {
            StoreError::Kube(kube::Error::Api(ae)) => ae.code == 404,
            StoreError::NotFound(_) => true,
            _ => false,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Kube(kube::Error::Api(ae)) => {
                let code = ae.code;
                if (400..500).contains(&code) {
                    return code == 409 || code == 429;
                }
                true
            }
            StoreError::Kube(_) | StoreError::Io(_) | StoreError::Watch(_) => true,
            StoreError::Exec { .. } | StoreError::Timeout(_) => true,
            StoreError::Serialization(_) | StoreError::Decode { .. } | StoreError::NotFound(_) => {
                false
            }
        }
    }
}

/// The object kinds the harness reads, watches or deletes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceKind {
    ConfigMap,
    Deployment,
    Job,
    PersistentVolumeClaim,
    PersistentVolume,
    Pod,
    ReplicaSet,
    Secret,
    ServiceAccount,
    Service,
    StatefulSet,
    InnoDBCluster,
    MySQLBackup,
}

/// Wire-format identity of a [`ResourceKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindInfo {
    pub group: &'static str,
    pub version: &'static str,
    pub kind: &'static str,
    pub plural: &'static str,
    pub namespaced: bool,
}

const fn core(kind: &'static str, plural: &'static str) -> KindInfo {
    KindInfo {
        group: "",
        version: "v1",
        kind,
        plural,
        namespaced: true,
    }
}

const fn apps(kind: &'static str, plural: &'static str) -> KindInfo {
    KindInfo {
        group: "apps",
        version: "v1",
        kind,
        plural,
        namespaced: true,
    }
}

const fn operator(kind: &'static str, plural: &'static str) -> KindInfo {
    KindInfo {
        group: OPERATOR_GROUP,
        version: OPERATOR_VERSION,
        kind,
        plural,
        namespaced: true,
    }
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 13] = [
        ResourceKind::ConfigMap,
        ResourceKind::Deployment,
        ResourceKind::Job,
        ResourceKind::PersistentVolumeClaim,
        ResourceKind::PersistentVolume,
        ResourceKind::Pod,
        ResourceKind::ReplicaSet,
        ResourceKind::Secret,
        ResourceKind::ServiceAccount,
        ResourceKind::Service,
        ResourceKind::StatefulSet,
        ResourceKind::InnoDBCluster,
        ResourceKind::MySQLBackup,
    ];

    pub const fn info(self) -> KindInfo {
        match self {
            ResourceKind::ConfigMap => core("ConfigMap", "configmaps"),
            ResourceKind::Deployment => apps("Deployment", "deployments"),
            ResourceKind::Job => KindInfo {
                group: "batch",
                version: "v1",
                kind: "Job",
                plural: "jobs",
                namespaced: true,
            },
            ResourceKind::PersistentVolumeClaim => {
                core("PersistentVolumeClaim", "persistentvolumeclaims")
            }
            ResourceKind::PersistentVolume => KindInfo {
                namespaced: false,
                ..core("PersistentVolume", "persistentvolumes")
            },
            ResourceKind::Pod => core("Pod", "pods"),
            ResourceKind::ReplicaSet => apps("ReplicaSet", "replicasets"),
            ResourceKind::Secret => core("Secret", "secrets"),
            ResourceKind::ServiceAccount => core("ServiceAccount", "serviceaccounts"),
            ResourceKind::Service => core("Service", "services"),
            ResourceKind::StatefulSet => apps("StatefulSet", "statefulsets"),
            ResourceKind::InnoDBCluster => operator("InnoDBCluster", "innodbclusters"),
            ResourceKind::MySQLBackup => operator("MySQLBackup", "mysqlbackups"),
        }
    }

    pub const fn plural(self) -> &'static str {
        self.info().plural
    }

    pub const fn kind_name(self) -> &'static str {
        self.info().kind
    }

    /// Look up a kind by its `kind` field, e.g. `InnoDBCluster`.
    pub fn from_kind_name(kind: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.kind_name() == kind)
    }

    pub const fn is_custom(self) -> bool {
        matches!(self, ResourceKind::InnoDBCluster | ResourceKind::MySQLBackup)
    }

    pub fn api_version(self) -> String {
        let info = self.info();
        if info.group.is_empty() {
            info.version.to_string()
        } else {
            format!("{}/{}", info.group, info.version)
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.plural())
    }
}

/// Lower bound for watches and event scans.
///
/// `Any` observes the current state (the server replays existing objects as
/// Added events); `After(rv)` only observes changes newer than `rv`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SinceVersion {
    #[default]
    Any,
    After(String),
}

impl SinceVersion {
    pub fn after(version: impl Into<String>) -> Self {
        SinceVersion::After(version.into())
    }

    /// Resource version parameter for a watch request
    pub fn as_watch_param(&self) -> &str {
        match self {
            SinceVersion::Any => "0",
            SinceVersion::After(v) => v,
        }
    }

    /// Whether an object carrying `version` is newer than this floor.
    ///
    /// Resource versions are opaque; when both sides are numeric they are
    /// compared numerically, otherwise only an identical version is excluded.
    pub fn admits(&self, version: Option<&str>) -> bool {
        match (self, version) {
            (SinceVersion::Any, _) => true,
            (SinceVersion::After(_), None) => true,
            (SinceVersion::After(floor), Some(v)) => {
                match (floor.parse::<u64>(), v.parse::<u64>()) {
                    (Ok(floor), Ok(v)) => v > floor,
                    _ => v != floor,
                }
            }
        }
    }
}

/// A change delivered by a watch.
#[derive(Debug, Clone)]
pub enum ObjectEvent {
    Added(DynamicObject),
    Modified(DynamicObject),
    Deleted(DynamicObject),
    /// Progress marker carrying only a resource version
    Bookmark(String),
}

impl ObjectEvent {
    pub fn object(&self) -> Option<&DynamicObject> {
        match self {
            ObjectEvent::Added(o) | ObjectEvent::Modified(o) | ObjectEvent::Deleted(o) => Some(o),
            ObjectEvent::Bookmark(_) => None,
        }
    }

    /// The object of an Added or Modified event.
    pub fn applied(&self) -> Option<&DynamicObject> {
        match self {
            ObjectEvent::Added(o) | ObjectEvent::Modified(o) => Some(o),
            _ => None,
        }
    }

    pub fn deleted(&self) -> Option<&DynamicObject> {
        match self {
            ObjectEvent::Deleted(o) => Some(o),
            _ => None,
        }
    }

    pub fn resource_version(&self) -> Option<&str> {
        match self {
            ObjectEvent::Bookmark(v) => Some(v),
            _ => self
                .object()
                .and_then(|o| o.metadata.resource_version.as_deref()),
        }
    }
}

pub type EventStream = BoxStream<'static, Result<ObjectEvent, StoreError>>;

/// One RFC 6902 operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum JsonPatchOp {
    Add {
        path: String,
        value: serde_json::Value,
    },
    Remove {
        path: String,
    },
    Replace {
        path: String,
        value: serde_json::Value,
    },
}

impl JsonPatchOp {
    pub fn remove(path: impl Into<String>) -> Self {
        JsonPatchOp::Remove { path: path.into() }
    }

    pub fn replace(path: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        JsonPatchOp::Replace {
            path: path.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ObjectPatch {
    Json(Vec<JsonPatchOp>),
    Merge(serde_json::Value),
}

/// Path removed when forcing an object past its finalizers
pub const FINALIZERS_PATH: &str = "/metadata/finalizers";

impl ObjectPatch {
    pub fn strip_finalizers() -> Self {
        ObjectPatch::Json(vec![JsonPatchOp::remove(FINALIZERS_PATH)])
    }
}

/// Narrow Kubernetes API surface consumed by the harness.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, StoreError>;

    /// List objects of a kind. Cluster-scoped kinds ignore `namespace`.
    async fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
    ) -> Result<Vec<DynamicObject>, StoreError>;

    async fn watch(
        &self,
        kind: ResourceKind,
        namespace: &str,
        since: &SinceVersion,
    ) -> Result<EventStream, StoreError>;

    async fn patch(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        patch: &ObjectPatch,
    ) -> Result<(), StoreError>;

    async fn delete(&self, kind: ResourceKind, namespace: &str, name: &str)
    -> Result<(), StoreError>;

    /// Create or update an object with server-side apply and return the result.
    async fn apply(
        &self,
        kind: ResourceKind,
        namespace: &str,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, StoreError>;

    async fn namespace_exists(&self, name: &str) -> Result<bool, StoreError>;

    async fn create_namespace(
        &self,
        name: &str,
        labels: BTreeMap<String, String>,
    ) -> Result<(), StoreError>;

    async fn delete_namespace(&self, name: &str) -> Result<(), StoreError>;

    async fn list_events(
        &self,
        namespace: &str,
        field_selector: &str,
    ) -> Result<Vec<Event>, StoreError>;

    async fn logs(&self, namespace: &str, pod: &str, container: &str)
    -> Result<String, StoreError>;

    /// Run a command in a container and return its stdout.
    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        command: Vec<String>,
    ) -> Result<String, StoreError>;
}

/// Decode a dynamic object into a typed resource.
pub fn decode<K: DeserializeOwned>(kind: ResourceKind, obj: &DynamicObject) -> Result<K, StoreError> {
    let value = serde_json::to_value(obj)?;
    serde_json::from_value(value).map_err(|e| StoreError::Decode {
        kind: kind.kind_name(),
        name: obj.metadata.name.clone().unwrap_or_default(),
        message: e.to_string(),
    })
}

/// Encode a typed resource as a dynamic object.
pub fn encode<K: Serialize>(obj: &K) -> Result<DynamicObject, StoreError> {
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}

pub async fn get_typed<K: DeserializeOwned>(
    store: &dyn ObjectStore,
    kind: ResourceKind,
    namespace: &str,
    name: &str,
) -> Result<Option<K>, StoreError> {
    store
        .get(kind, namespace, name)
        .await?
        .map(|obj| decode(kind, &obj))
        .transpose()
}

pub async fn list_typed<K: DeserializeOwned>(
    store: &dyn ObjectStore,
    kind: ResourceKind,
    namespace: &str,
) -> Result<Vec<K>, StoreError> {
    store
        .list(kind, namespace)
        .await?
        .iter()
        .map(|obj| decode(kind, obj))
        .collect()
}

pub async fn get_pod(
    store: &dyn ObjectStore,
    namespace: &str,
    name: &str,
) -> Result<Option<Pod>, StoreError> {
    get_typed(store, ResourceKind::Pod, namespace, name).await
}

pub async fn list_pods(store: &dyn ObjectStore, namespace: &str) -> Result<Vec<Pod>, StoreError> {
    list_typed(store, ResourceKind::Pod, namespace).await
}

pub async fn get_stateful_set(
    store: &dyn ObjectStore,
    namespace: &str,
    name: &str,
) -> Result<Option<StatefulSet>, StoreError> {
    get_typed(store, ResourceKind::StatefulSet, namespace, name).await
}

pub async fn get_deployment(
    store: &dyn ObjectStore,
    namespace: &str,
    name: &str,
) -> Result<Option<Deployment>, StoreError> {
    get_typed(store, ResourceKind::Deployment, namespace, name).await
}

pub async fn get_service(
    store: &dyn ObjectStore,
    namespace: &str,
    name: &str,
) -> Result<Option<Service>, StoreError> {
    get_typed(store, ResourceKind::Service, namespace, name).await
}

pub async fn get_custom(
    store: &dyn ObjectStore,
    kind: ResourceKind,
    namespace: &str,
    name: &str,
) -> Result<Option<CustomObject>, StoreError> {
    Ok(store
        .get(kind, namespace, name)
        .await?
        .map(CustomObject::new))
}

/// Get the InnoDBCluster and convert it to a snapshot.
pub async fn get_cluster(
    store: &dyn ObjectStore,
    namespace: &str,
    name: &str,
) -> Result<Option<ClusterSnapshot>, StoreError> {
    Ok(get_custom(store, ResourceKind::InnoDBCluster, namespace, name)
        .await?
        .map(|obj| ClusterSnapshot::from_object(&obj)))
}

/// Deletion deadline helper shared by teardown paths.
pub async fn delete_with_timeout(
    store: &dyn ObjectStore,
    kind: ResourceKind,
    namespace: &str,
    name: &str,
    timeout: Duration,
) -> Result<(), StoreError> {
    match tokio::time::timeout(timeout, store.delete(kind, namespace, name)).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(format!(
            "deleting {kind} {namespace}/{name} exceeded {timeout:?}"
        ))),
    }
}
