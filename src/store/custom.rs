//! Untyped access to the operator's custom resources

use kube::api::DynamicObject;
use serde_json::Value;

/// Finalizer the operator places on InnoDBCluster objects
pub const CLUSTER_FINALIZER: &str = "mysql.oracle.com/cluster";

/// Backup status value marking a finished backup
pub const BACKUP_COMPLETED: &str = "Completed";

/// Path-based accessor over a custom resource.
///
/// Paths are slices of map keys below the object root, e.g.
/// `["status", "cluster", "onlineInstances"]`.
#[derive(Debug, Clone)]
pub struct CustomObject {
    obj: DynamicObject,
}

impl CustomObject {
    pub fn new(obj: DynamicObject) -> Self {
        Self { obj }
    }

    pub fn name(&self) -> &str {
        self.obj.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        self.obj.metadata.namespace.as_deref().unwrap_or_default()
    }

    pub fn resource_version(&self) -> Option<&str> {
        self.obj.metadata.resource_version.as_deref()
    }

    pub fn finalizers(&self) -> &[String] {
        self.obj.metadata.finalizers.as_deref().unwrap_or_default()
    }

    pub fn inner(&self) -> &DynamicObject {
        &self.obj
    }

    pub fn into_inner(self) -> DynamicObject {
        self.obj
    }

    pub fn field(&self, path: &[&str]) -> Option<&Value> {
        path.iter()
            .try_fold(&self.obj.data, |value, key| value.as_object()?.get(*key))
    }

    pub fn has_field(&self, path: &[&str]) -> bool {
        self.field(path).is_some()
    }

    pub fn get_str(&self, path: &[&str]) -> Option<&str> {
        self.field(path)?.as_str()
    }

    pub fn get_i64(&self, path: &[&str]) -> Option<i64> {
        let value = self.field(path)?;
        value
            .as_i64()
            .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
    }

    pub fn get_bool(&self, path: &[&str]) -> Option<bool> {
        self.field(path)?.as_bool()
    }

    pub fn get_strings(&self, path: &[&str]) -> Option<Vec<String>> {
        self.field(path)?
            .as_array()?
            .iter()
            .map(|v| v.as_str().map(str::to_string))
            .collect()
    }

    /// `name` values of a list of `{name: ...}` maps, skipping entries without one.
    pub fn get_names(&self, path: &[&str]) -> Option<Vec<String>> {
        Some(
            self.field(path)?
                .as_array()?
                .iter()
                .filter_map(|v| v.get("name").and_then(Value::as_str).map(str::to_string))
                .collect(),
        )
    }
}

/// The InnoDBCluster fields the harness reasons about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterSnapshot {
    pub name: String,
    pub namespace: String,
    pub resource_version: Option<String>,
    pub finalizers: Vec<String>,
    /// `status.cluster.status`, e.g. ONLINE or PENDING
    pub status: Option<String>,
    pub online_instances: Option<i64>,
    pub spec_instances: Option<i64>,
    pub router_instances: Option<i64>,
    pub base_server_id: Option<i64>,
    pub image_pull_policy: Option<String>,
    pub image_pull_secrets: Option<Vec<String>>,
    pub version: Option<String>,
}

impl ClusterSnapshot {
    pub fn from_object(obj: &CustomObject) -> Self {
        Self {
            name: obj.name().to_string(),
            namespace: obj.namespace().to_string(),
            resource_version: obj.resource_version().map(str::to_string),
            finalizers: obj.finalizers().to_vec(),
            status: obj.get_str(&["status", "cluster", "status"]).map(str::to_string),
            online_instances: obj.get_i64(&["status", "cluster", "onlineInstances"]),
            spec_instances: obj.get_i64(&["spec", "instances"]),
            router_instances: obj.get_i64(&["spec", "router", "instances"]),
            base_server_id: obj.get_i64(&["spec", "baseServerId"]),
            image_pull_policy: obj.get_str(&["spec", "imagePullPolicy"]).map(str::to_string),
            image_pull_secrets: obj.get_names(&["spec", "imagePullSecrets"]),
            version: obj.get_str(&["spec", "version"]).map(str::to_string),
        }
    }

    /// Declared router count, zero when the spec names none.
    pub fn declared_routers(&self) -> i64 {
        self.router_instances.unwrap_or(0)
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers.iter().any(|f| f == finalizer)
    }

    pub fn stateful_set_name(&self) -> &str {
        &self.name
    }

    pub fn router_deployment_name(&self) -> String {
        format!("{}-router", self.name)
    }

    /// Headless service backing the per-instance DNS names
    pub fn instances_service_name(&self) -> String {
        format!("{}-instances", self.name)
    }

    pub fn pod_name(&self, index: usize) -> String {
        format!("{}-{}", self.name, index)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackupSnapshot {
    pub name: String,
    pub namespace: String,
    pub status: Option<String>,
    pub output: Option<String>,
    pub method: Option<String>,
}

impl BackupSnapshot {
    pub fn from_object(obj: &CustomObject) -> Self {
        Self {
            name: obj.name().to_string(),
            namespace: obj.namespace().to_string(),
            status: obj.get_str(&["status", "status"]).map(str::to_string),
            output: obj.get_str(&["status", "output"]).map(str::to_string),
            method: obj.get_str(&["status", "method"]).map(str::to_string),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status.as_deref() == Some(BACKUP_COMPLETED)
    }
}
