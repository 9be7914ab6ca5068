//! Per-pod checks of instance and router pods

use k8s_openapi::api::core::v1::{Container, ContainerStatus, Pod, PodCondition};
use kube::ResourceExt;
use tracing::debug;

use crate::config::RetrySecs;
use crate::error::{Error, Result};
use crate::store::container::SIDECAR_READY_MARKER;
use crate::store::{ClusterSnapshot, ContainerId, ObjectStore, get_pod};
use crate::wait::retry_fixed;

/// Finalizer the operator places on every instance pod
pub const MEMBERSHIP_FINALIZER: &str = "mysql.oracle.com/membership";
/// JSON annotation carrying the group member id of an instance
pub const MEMBERSHIP_INFO_ANNOTATION: &str = "mysql.oracle.com/membership-info";

pub const COMPONENT_LABEL: &str = "component";
pub const TIER_LABEL: &str = "tier";
pub const CLUSTER_LABEL: &str = "mysql.oracle.com/cluster";
pub const CLUSTER_ROLE_LABEL: &str = "mysql.oracle.com/cluster-role";

const EXPECTED_TERMINATION_GRACE_SECONDS: i64 = 30;
const EXPECTED_RESTART_POLICY: &str = "Always";
const EXPECTED_CONDITIONS: usize = 6;
const EXPECTED_INIT_CONTAINER_STATUSES: usize = 3;

/// Role of an instance in the replication group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberRole {
    Primary,
    Secondary,
}

impl MemberRole {
    pub fn for_index(index: usize, primary: usize) -> Self {
        if index == primary {
            MemberRole::Primary
        } else {
            MemberRole::Secondary
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            MemberRole::Primary => "PRIMARY",
            MemberRole::Secondary => "SECONDARY",
        }
    }
}

impl std::fmt::Display for MemberRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordinal suffix of a pod name, `mycluster-2` -> 2.
pub fn pod_index(name: &str) -> Option<usize> {
    name.rsplit('-').next()?.parse().ok()
}

/// A container spec together with its runtime status.
#[derive(Debug, Clone, Copy)]
pub struct ContainerInfo<'a> {
    pub container: &'a Container,
    pub status: &'a ContainerStatus,
}

impl ContainerInfo<'_> {
    pub fn is_running(&self) -> bool {
        self.status
            .state
            .as_ref()
            .is_some_and(|state| state.running.is_some())
    }

    pub fn restart_count(&self) -> i32 {
        self.status.restart_count
    }
}

pub fn container_info(pod: &Pod, id: ContainerId) -> Result<ContainerInfo<'_>> {
    let name = id.as_str();
    let pod_name = pod.name_any();
    let spec = pod
        .spec
        .as_ref()
        .ok_or_else(|| Error::verification(format!("pod {pod_name} has no spec")))?;
    let status = pod.status.as_ref();

    let (containers, statuses) = if id.is_init() {
        (
            spec.init_containers.as_deref().unwrap_or_default(),
            status.and_then(|s| s.init_container_statuses.as_deref()),
        )
    } else {
        (
            spec.containers.as_slice(),
            status.and_then(|s| s.container_statuses.as_deref()),
        )
    };

    let container = containers
        .iter()
        .find(|c| c.name == name)
        .ok_or_else(|| Error::verification(format!("container {name} not found in pod {pod_name}")))?;
    let status = statuses
        .unwrap_or_default()
        .iter()
        .find(|s| s.name == name)
        .ok_or_else(|| {
            Error::verification(format!("no status for container {name} in pod {pod_name}"))
        })?;
    Ok(ContainerInfo { container, status })
}

/// Check the restart count (when given) and running state of a container.
pub fn check_pod_container(
    pod: &Pod,
    id: ContainerId,
    restarts: Option<i32>,
    running: bool,
) -> Result<ContainerInfo<'_>> {
    let info = container_info(pod, id)?;
    if let Some(expected) = restarts
        && info.restart_count() != expected
    {
        return Err(Error::mismatch(
            format!("restart count of container {id} in pod {}", pod.name_any()),
            expected,
            info.restart_count(),
        ));
    }
    if running && !info.is_running() {
        return Err(Error::verification(format!(
            "container {id} of pod {} should be running but is not",
            pod.name_any()
        )));
    }
    Ok(info)
}

pub fn check_router_pod(pod: &Pod) -> Result<()> {
    let info = check_pod_container(pod, ContainerId::Router, Some(0), true)?;
    if !info.status.ready {
        return Err(Error::verification(format!(
            "router container of pod {} is not ready",
            pod.name_any()
        )));
    }
    Ok(())
}

/// Pod spec fields derived from the cluster spec or fixed by the operator.
pub fn check_pod_spec_compliant(cluster: &ClusterSnapshot, pod: &Pod) -> Result<()> {
    let name = pod.name_any();
    let spec = pod
        .spec
        .as_ref()
        .ok_or_else(|| Error::verification(format!("pod {name} has no spec")))?;

    let grace = spec.termination_grace_period_seconds.unwrap_or_default();
    if grace != EXPECTED_TERMINATION_GRACE_SECONDS {
        return Err(Error::mismatch(
            format!("terminationGracePeriodSeconds of pod {name}"),
            EXPECTED_TERMINATION_GRACE_SECONDS,
            grace,
        ));
    }

    let restart_policy = spec.restart_policy.as_deref().unwrap_or_default();
    if restart_policy != EXPECTED_RESTART_POLICY {
        return Err(Error::mismatch(
            format!("restartPolicy of pod {name}"),
            EXPECTED_RESTART_POLICY,
            restart_policy,
        ));
    }

    let expected_subdomain = cluster.instances_service_name();
    let subdomain = spec.subdomain.as_deref().unwrap_or_default();
    if subdomain != expected_subdomain {
        return Err(Error::mismatch(
            format!("subdomain of pod {name}"),
            expected_subdomain,
            subdomain,
        ));
    }

    let mysql = container_info(pod, ContainerId::Mysql)?;
    if let Some(policy) = &cluster.image_pull_policy {
        let actual = mysql.container.image_pull_policy.as_deref().unwrap_or_default();
        if actual != policy {
            return Err(Error::mismatch(
                format!("imagePullPolicy of mysql container in pod {name}"),
                policy,
                actual,
            ));
        }
    }

    if let Some(secrets) = &cluster.image_pull_secrets {
        let actual: Vec<String> = spec
            .image_pull_secrets
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|s| s.name.clone())
            .collect();
        if &actual != secrets {
            return Err(Error::mismatch(
                format!("imagePullSecrets of pod {name}"),
                format!("{secrets:?}"),
                format!("{actual:?}"),
            ));
        }
    }

    Ok(())
}

pub fn check_pod_object(pod: &Pod, expected_name: &str) -> Result<()> {
    let name = pod.name_any();
    if name != expected_name {
        return Err(Error::mismatch("pod name", expected_name, name));
    }
    if !pod.finalizers().iter().any(|f| f == MEMBERSHIP_FINALIZER) {
        return Err(Error::verification(format!(
            "pod {name} lacks finalizer {MEMBERSHIP_FINALIZER}, has {:?}",
            pod.finalizers()
        )));
    }
    Ok(())
}

/// A condition must be True, except Ready=False while readiness gates are pending.
pub fn check_pod_condition(condition: &PodCondition) -> Result<()> {
    if condition.status == "True" {
        return Ok(());
    }
    if condition.type_ == "Ready" && condition.reason.as_deref() == Some("ReadinessGatesNotReady") {
        return Ok(());
    }
    Err(Error::verification(format!(
        "condition {} should be True but is {} (reason {})",
        condition.type_,
        condition.status,
        condition.reason.as_deref().unwrap_or("none")
    )))
}

pub fn check_online_pod_status(pod: &Pod, restarts_expected: bool) -> Result<()> {
    let name = pod.name_any();
    let status = pod
        .status
        .as_ref()
        .ok_or_else(|| Error::verification(format!("pod {name} has no status")))?;

    let phase = status.phase.as_deref().unwrap_or_default();
    if phase != "Running" {
        return Err(Error::mismatch(format!("phase of pod {name}"), "Running", phase));
    }

    let conditions = status.conditions.as_deref().unwrap_or_default();
    if conditions.len() != EXPECTED_CONDITIONS {
        return Err(Error::mismatch(
            format!("status conditions of pod {name}"),
            EXPECTED_CONDITIONS,
            conditions.len(),
        ));
    }
    conditions.iter().try_for_each(check_pod_condition)?;

    let init_statuses = status.init_container_statuses.as_deref().unwrap_or_default();
    if init_statuses.len() != EXPECTED_INIT_CONTAINER_STATUSES {
        return Err(Error::mismatch(
            format!("init container statuses of pod {name}"),
            EXPECTED_INIT_CONTAINER_STATUSES,
            init_statuses.len(),
        ));
    }
    let init_conf = ContainerId::InitConf.as_str();
    if init_statuses[1].name != init_conf {
        return Err(Error::mismatch(
            format!("second init container of pod {name}"),
            init_conf,
            &init_statuses[1].name,
        ));
    }

    let mysql = status
        .container_statuses
        .as_deref()
        .and_then(|s| s.first())
        .ok_or_else(|| Error::verification(format!("pod {name} has no container statuses")))?;
    if mysql.name != ContainerId::Mysql.as_str() {
        return Err(Error::mismatch(
            format!("first container of pod {name}"),
            ContainerId::Mysql,
            &mysql.name,
        ));
    }
    if !mysql.ready {
        return Err(Error::verification(format!(
            "container mysql of pod {name} is not ready"
        )));
    }
    if mysql.restart_count != 0 && !restarts_expected {
        return Err(Error::verification(format!(
            "container mysql of pod {name} restarted {} time(s) unexpectedly",
            mysql.restart_count
        )));
    }
    if !mysql.state.as_ref().is_some_and(|s| s.running.is_some()) {
        return Err(Error::verification(format!(
            "container mysql of pod {name} is not in running state"
        )));
    }
    Ok(())
}

pub fn check_pod_labels(pod: &Pod, cluster: &str, role: MemberRole) -> Result<()> {
    let labels = pod.labels();
    let expected = [
        (COMPONENT_LABEL, "mysqld"),
        (TIER_LABEL, "mysql"),
        (CLUSTER_LABEL, cluster),
        (CLUSTER_ROLE_LABEL, role.as_str()),
    ];
    for (key, value) in expected {
        let actual = labels.get(key).map(String::as_str).unwrap_or_default();
        if actual != value {
            return Err(Error::mismatch(
                format!("label {key} of pod {}", pod.name_any()),
                value,
                actual,
            ));
        }
    }
    Ok(())
}

/// The mysql container image must end with `version`.
pub fn check_image_version(pod: &Pod, version: &str) -> Result<()> {
    let info = container_info(pod, ContainerId::Mysql)?;
    if !info.status.image.ends_with(version) {
        return Err(Error::verification(format!(
            "image of pod {} is {} but should end with {version}",
            pod.name_any(),
            info.status.image
        )));
    }
    Ok(())
}

/// Spec, finalizer, status and label checks of an online instance pod.
///
/// Labels can lag behind readiness, so a label mismatch is re-checked
/// against a freshly fetched pod according to `retry`.
pub async fn check_online_pod(
    store: &dyn ObjectStore,
    cluster: &ClusterSnapshot,
    pod: &Pod,
    restarts_expected: bool,
    role: MemberRole,
    retry: RetrySecs,
) -> Result<()> {
    let name = pod.name_any();
    check_pod_spec_compliant(cluster, pod)?;
    check_pod_object(pod, &name)?;
    check_online_pod_status(pod, restarts_expected)?;

    let namespace = cluster.namespace.as_str();
    let cluster_name = cluster.name.as_str();
    let pod_name = name.as_str();
    let what = format!("labels of pod {namespace}/{pod_name}");
    retry_fixed(&what, retry.attempts, retry.backoff(), |attempt| async move {
        if attempt == 1 {
            return check_pod_labels(pod, cluster_name, role);
        }
        let fresh = get_pod(store, namespace, pod_name)
            .await?
            .ok_or_else(|| Error::verification(format!("pod {namespace}/{pod_name} disappeared")))?;
        check_pod_labels(&fresh, cluster_name, role)
    })
    .await?;
    debug!(pod = pod_name, %role, "Pod checks passed");
    Ok(())
}

pub async fn check_sidecar_health(store: &dyn ObjectStore, namespace: &str, pod: &str) -> Result<()> {
    let logs = store
        .logs(namespace, pod, ContainerId::Sidecar.as_str())
        .await?;
    if !logs.contains(SIDECAR_READY_MARKER) {
        return Err(Error::verification(format!(
            "sidecar of pod {namespace}/{pod} is not healthy"
        )));
    }
    Ok(())
}
