//! Cluster-level object checks
//!
//! These compare the InnoDBCluster spec against the workload objects the
//! operator derived from it: the server stateful set, the router deployment,
//! the services and the pods.

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tracing::debug;

use super::pod::{CLUSTER_LABEL, check_router_pod};
use crate::error::{Error, Result};
use crate::store::custom::CLUSTER_FINALIZER;
use crate::store::{
    ClusterSnapshot, ObjectStore, get_cluster, get_deployment, get_pod, get_service,
    get_stateful_set, list_pods,
};
use crate::wait::PodPhase;
use crate::wait::conditions::{pod_phase, router_pods};

/// Fetch the cluster and its server pods `<name>-0 .. <name>-(n-1)`.
pub async fn fetch_cluster(
    store: &dyn ObjectStore,
    namespace: &str,
    name: &str,
) -> Result<(ClusterSnapshot, Vec<Pod>)> {
    let cluster = get_cluster(store, namespace, name)
        .await?
        .ok_or_else(|| Error::verification(format!("InnoDBCluster {namespace}/{name} not found")))?;
    if cluster.name != name {
        return Err(Error::mismatch("cluster name", name, &cluster.name));
    }
    if cluster.namespace != namespace {
        return Err(Error::mismatch("cluster namespace", namespace, &cluster.namespace));
    }

    let instances = spec_instances(&cluster)?;
    let mut pods = Vec::with_capacity(instances);
    for index in 0..instances {
        let pod_name = cluster.pod_name(index);
        let pod = get_pod(store, namespace, &pod_name)
            .await?
            .ok_or_else(|| Error::verification(format!("pod {namespace}/{pod_name} not found")))?;
        if pod.name_any() != pod_name {
            return Err(Error::mismatch("pod name", &pod_name, pod.name_any()));
        }
        let pod_namespace = pod.namespace().unwrap_or_default();
        if pod_namespace != namespace {
            return Err(Error::mismatch(
                format!("namespace of pod {pod_name}"),
                namespace,
                pod_namespace,
            ));
        }
        pods.push(pod);
    }
    Ok((cluster, pods))
}

pub fn spec_instances(cluster: &ClusterSnapshot) -> Result<usize> {
    let instances = cluster.spec_instances.ok_or_else(|| Error::MissingField {
        object: format!("InnoDBCluster {}/{}", cluster.namespace, cluster.name),
        path: "spec.instances".to_string(),
    })?;
    usize::try_from(instances).map_err(|_| {
        Error::verification(format!("spec.instances of {} is negative: {instances}", cluster.name))
    })
}

/// Compare the declared instance and router counts with the caller's.
///
/// `instances == 0` skips the instance comparison. The router comparison only
/// runs when routers are expected and the spec declares a router count.
pub fn check_cluster_spec(
    cluster: &ClusterSnapshot,
    instances: usize,
    routers: Option<usize>,
) -> Result<()> {
    if instances > 0 {
        let declared = spec_instances(cluster)?;
        if declared != instances {
            return Err(Error::mismatch("spec.instances", instances, declared));
        }
    }
    if let Some(expected) = routers.filter(|n| *n > 0)
        && let Some(declared) = cluster.router_instances
        && declared != expected as i64
    {
        return Err(Error::mismatch("spec.router.instances", expected, declared));
    }
    Ok(())
}

fn is_router_pod(pod: &Pod, cluster: &str) -> bool {
    pod.name_any().starts_with(&format!("{cluster}-router-"))
}

/// Server pods are matched by name prefix, or by cluster label when other
/// clusters may share the namespace and its name prefixes.
fn is_server_pod(pod: &Pod, cluster: &str, shared_namespace: bool) -> bool {
    let name = pod.name_any();
    if name.contains("router") {
        return false;
    }
    if shared_namespace {
        pod.labels().get(CLUSTER_LABEL).map(String::as_str) == Some(cluster)
    } else {
        name.starts_with(&format!("{cluster}-"))
    }
}

/// Replica counts of the derived workloads against the cluster spec.
pub fn check_replica_counts(
    cluster: &ClusterSnapshot,
    stateful_set: &StatefulSet,
    router_deployment: Option<&Deployment>,
    pods: &[Pod],
    shared_namespace: bool,
) -> Result<()> {
    let instances = cluster.spec_instances.unwrap_or_default();

    let replicas = stateful_set
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or_default();
    if i64::from(replicas) != instances {
        return Err(Error::mismatch("stateful set replicas", instances, replicas));
    }

    let routers = cluster.declared_routers();
    match router_deployment {
        Some(deployment) if routers > 0 => {
            let replicas = deployment
                .spec
                .as_ref()
                .and_then(|s| s.replicas)
                .unwrap_or_default();
            if i64::from(replicas) != routers {
                return Err(Error::mismatch("router deployment replicas", routers, replicas));
            }
        }
        Some(_) => {
            return Err(Error::verification(format!(
                "router deployment {} exists but no routers are declared",
                cluster.router_deployment_name()
            )));
        }
        None if routers > 0 => {
            return Err(Error::verification(format!(
                "router deployment {} not found",
                cluster.router_deployment_name()
            )));
        }
        None => {}
    }

    let online = cluster.online_instances.unwrap_or_default();
    if online != instances {
        return Err(Error::mismatch("status.cluster.onlineInstances", instances, online));
    }

    let server_pods = pods
        .iter()
        .filter(|p| is_server_pod(p, &cluster.name, shared_namespace))
        .count();
    if server_pods as i64 != instances {
        return Err(Error::mismatch("server pods", instances, server_pods));
    }

    let router_pods = pods.iter().filter(|p| is_router_pod(p, &cluster.name)).count();
    if router_pods as i64 != routers {
        return Err(Error::mismatch("router pods", routers, router_pods));
    }
    Ok(())
}

/// Fetch the derived workloads and check them with [`check_replica_counts`].
pub async fn check_spec_compliance(
    store: &dyn ObjectStore,
    cluster: &ClusterSnapshot,
    shared_namespace: bool,
) -> Result<()> {
    let namespace = cluster.namespace.as_str();
    let stateful_set = get_stateful_set(store, namespace, cluster.stateful_set_name())
        .await?
        .ok_or_else(|| {
            Error::verification(format!(
                "stateful set {namespace}/{} not found",
                cluster.stateful_set_name()
            ))
        })?;
    let router = get_deployment(store, namespace, &cluster.router_deployment_name()).await?;
    let pods = list_pods(store, namespace).await?;
    check_replica_counts(cluster, &stateful_set, router.as_ref(), &pods, shared_namespace)
}

/// Finalizer and presence of the objects the operator creates for a cluster.
pub async fn check_cluster_object(store: &dyn ObjectStore, cluster: &ClusterSnapshot) -> Result<()> {
    let namespace = cluster.namespace.as_str();
    if !cluster.has_finalizer(CLUSTER_FINALIZER) {
        return Err(Error::verification(format!(
            "InnoDBCluster {namespace}/{} lacks finalizer {CLUSTER_FINALIZER}, has {:?}",
            cluster.name, cluster.finalizers
        )));
    }

    if get_stateful_set(store, namespace, cluster.stateful_set_name())
        .await?
        .is_none()
    {
        return Err(Error::verification(format!(
            "stateful set {namespace}/{} not found",
            cluster.stateful_set_name()
        )));
    }

    let router_name = cluster.router_deployment_name();
    let router_exists = get_deployment(store, namespace, &router_name).await?.is_some();
    let routers_declared = cluster.declared_routers() > 0;
    if router_exists != routers_declared {
        return Err(Error::verification(format!(
            "router deployment {namespace}/{router_name} exists={router_exists} but declared routers={}",
            cluster.declared_routers()
        )));
    }

    for service in [cluster.name.clone(), cluster.instances_service_name()] {
        if get_service(store, namespace, &service).await?.is_none() {
            return Err(Error::verification(format!("service {namespace}/{service} not found")));
        }
    }
    debug!(cluster = %cluster.name, "Cluster objects present");
    Ok(())
}

/// Exact router pod count, nothing else.
pub async fn check_router_count(
    store: &dyn ObjectStore,
    namespace: &str,
    cluster: &str,
    expected: usize,
) -> Result<()> {
    let pods = list_pods(store, namespace).await?;
    let routers = router_pods(&pods, cluster)?;
    if routers.len() != expected {
        return Err(Error::mismatch(
            format!("router pods of {namespace}/{cluster}"),
            expected,
            routers.len(),
        ));
    }
    Ok(())
}

/// Router pod count, phase and router container state.
pub async fn check_routers(
    store: &dyn ObjectStore,
    namespace: &str,
    cluster: &str,
    expected: usize,
) -> Result<()> {
    let pods = list_pods(store, namespace).await?;
    let routers = router_pods(&pods, cluster)?;
    if routers.len() != expected {
        return Err(Error::mismatch(
            format!("router pods of {namespace}/{cluster}"),
            expected,
            routers.len(),
        ));
    }
    for pod in routers {
        let phase = pod_phase(pod);
        if phase != Some(PodPhase::Running.as_str()) {
            return Err(Error::mismatch(
                format!("phase of router pod {}", pod.name_any()),
                PodPhase::Running,
                phase.unwrap_or("unknown"),
            ));
        }
        check_router_pod(pod)?;
    }
    Ok(())
}
