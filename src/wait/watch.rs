//! Watch-driven waits
//!
//! Each wait opens a [`WatchSubscription`] scoped to one kind and namespace,
//! starting after an optional resource version, and resolves on the first
//! event satisfying its predicate. Subscription setup failures are returned
//! immediately; the subscription is cancelled on every exit path.

use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::api::DynamicObject;
use kube::runtime::wait::Condition;
use tracing::{debug, info, instrument, warn};

use super::conditions::{
    ClusterExpectation, EventMatcher, PodPhase, cluster_reached, involved_object_selector,
    is_pod_in_phase, routers_ready,
};
use super::{PollSchedule, wait_until};
use crate::error::{Error, Result};
use crate::store::{
    ClusterSnapshot, CustomObject, EventStream, ObjectEvent, ObjectStore, ResourceKind,
    SinceVersion, decode, list_pods,
};

/// Pause before reopening a watch the server closed
const REOPEN_DELAY: Duration = Duration::from_secs(1);

/// An open watch on one kind within one namespace.
///
/// When the server ends the stream the subscription reopens it from the last
/// resource version it delivered.
pub struct WatchSubscription {
    kind: ResourceKind,
    namespace: String,
    last_version: SinceVersion,
    stream: Option<EventStream>,
}

impl WatchSubscription {
    pub async fn open(
        store: &dyn ObjectStore,
        kind: ResourceKind,
        namespace: &str,
        since: SinceVersion,
    ) -> Result<Self> {
        let stream = store.watch(kind, namespace, &since).await?;
        debug!(%kind, namespace, since = since.as_watch_param(), "Watch subscription opened");
        Ok(Self {
            kind,
            namespace: namespace.to_string(),
            last_version: since,
            stream: Some(stream),
        })
    }

    pub fn last_version(&self) -> &SinceVersion {
        &self.last_version
    }

    /// Next non-bookmark event.
    pub async fn next_event(&mut self, store: &dyn ObjectStore) -> Result<ObjectEvent> {
        loop {
            let next = match self.stream.as_mut() {
                Some(stream) => stream.next().await,
                None => None,
            };
            match next {
                Some(Ok(event)) => {
                    if let Some(version) = event.resource_version() {
                        self.last_version = SinceVersion::after(version);
                    }
                    if matches!(event, ObjectEvent::Bookmark(_)) {
                        continue;
                    }
                    return Ok(event);
                }
                Some(Err(e)) => return Err(e.into()),
                None => {
                    warn!(kind = %self.kind, namespace = %self.namespace, "Watch stream ended, reopening");
                    self.stream = None;
                    tokio::time::sleep(REOPEN_DELAY).await;
                    self.stream = Some(
                        store
                            .watch(self.kind, &self.namespace, &self.last_version)
                            .await?,
                    );
                }
            }
        }
    }

    pub fn cancel(&mut self) {
        if self.stream.take().is_some() {
            debug!(kind = %self.kind, namespace = %self.namespace, "Watch subscription cancelled");
        }
    }
}

impl Drop for WatchSubscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Wait for the first event accepted by `matches`.
pub async fn wait_for_event<F>(
    store: &dyn ObjectStore,
    kind: ResourceKind,
    namespace: &str,
    since: &SinceVersion,
    timeout: Duration,
    what: &str,
    mut matches: F,
) -> Result<()>
where
    F: FnMut(&ObjectEvent) -> bool,
{
    let mut subscription = WatchSubscription::open(store, kind, namespace, since.clone()).await?;

    let outcome = tokio::time::timeout(timeout, async {
        loop {
            let event = subscription.next_event(store).await?;
            if matches(&event) {
                return Ok::<_, Error>(());
            }
        }
    })
    .await;
    subscription.cancel();

    match outcome {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout {
            what: what.to_string(),
            after: timeout,
        }),
    }
}

fn is_named(obj: &DynamicObject, name: &str) -> bool {
    obj.metadata.name.as_deref() == Some(name)
}

/// Wait until the named pod is observed in `phase`.
#[instrument(skip(store))]
pub async fn wait_on_pod(
    store: &dyn ObjectStore,
    namespace: &str,
    name: &str,
    since: &SinceVersion,
    phase: PodPhase,
    timeout: Duration,
) -> Result<()> {
    let condition = is_pod_in_phase(phase);
    let what = format!("pod {namespace}/{name} to reach phase {phase}");
    wait_for_event(store, ResourceKind::Pod, namespace, since, timeout, &what, |event| {
        event
            .applied()
            .filter(|obj| is_named(obj, name))
            .and_then(|obj| decode::<Pod>(ResourceKind::Pod, obj).ok())
            .is_some_and(|pod| condition.matches_object(Some(&pod)))
    })
    .await?;
    info!("Pod reached phase {}", phase);
    Ok(())
}

/// Wait until the named object of `kind` is deleted.
///
/// Returns at once when the object is already absent.
async fn wait_on_gone(
    store: &dyn ObjectStore,
    kind: ResourceKind,
    namespace: &str,
    name: &str,
    timeout: Duration,
) -> Result<()> {
    let Some(current) = store.get(kind, namespace, name).await? else {
        debug!(%kind, namespace, name, "Already gone");
        return Ok(());
    };
    let since = current
        .metadata
        .resource_version
        .map(SinceVersion::After)
        .unwrap_or_default();
    let what = format!("{} {namespace}/{name} to be deleted", kind.kind_name());
    wait_for_event(store, kind, namespace, &since, timeout, &what, |event| {
        event.deleted().is_some_and(|obj| is_named(obj, name))
    })
    .await?;
    info!(%kind, namespace, name, "Deleted");
    Ok(())
}

pub async fn wait_on_pod_gone(
    store: &dyn ObjectStore,
    namespace: &str,
    name: &str,
    timeout: Duration,
) -> Result<()> {
    wait_on_gone(store, ResourceKind::Pod, namespace, name, timeout).await
}

pub async fn wait_on_cluster_gone(
    store: &dyn ObjectStore,
    namespace: &str,
    name: &str,
    timeout: Duration,
) -> Result<()> {
    wait_on_gone(store, ResourceKind::InnoDBCluster, namespace, name, timeout).await
}

/// Parameters of a cluster status wait.
#[derive(Debug, Clone)]
pub struct ClusterWaitParams {
    pub namespace: String,
    pub name: String,
    pub expectation: ClusterExpectation,
    pub since: SinceVersion,
    pub timeout: Duration,
}

/// Wait until the cluster reports an accepted status and enough online
/// instances.
#[instrument(skip(store, params), fields(namespace = %params.namespace, name = %params.name))]
pub async fn wait_on_cluster(store: &dyn ObjectStore, params: &ClusterWaitParams) -> Result<()> {
    let condition = cluster_reached(params.expectation.clone());
    let what = format!(
        "InnoDBCluster {}/{} to reach {}",
        params.namespace, params.name, params.expectation
    );
    let mut observed: Option<ClusterSnapshot> = None;
    let result = wait_for_event(
        store,
        ResourceKind::InnoDBCluster,
        &params.namespace,
        &params.since,
        params.timeout,
        &what,
        |event| {
            let Some(obj) = event.applied().filter(|obj| is_named(obj, &params.name)) else {
                return false;
            };
            let snapshot = ClusterSnapshot::from_object(&CustomObject::new(obj.clone()));
            let matched = condition.matches_object(Some(&snapshot));
            observed = Some(snapshot);
            matched
        },
    )
    .await;

    match (&result, &observed) {
        (Ok(()), _) => info!(expectation = %params.expectation, "Cluster reached expected state"),
        (Err(e), Some(last)) => warn!(
            error = %e,
            status = ?last.status,
            online = ?last.online_instances,
            "Cluster wait failed"
        ),
        (Err(e), None) => warn!(error = %e, "Cluster wait failed without observing the cluster"),
    }
    result
}

/// Poll until exactly `expected` router pods exist and all are Running.
#[instrument(skip(store, schedule))]
pub async fn wait_on_routers(
    store: &dyn ObjectStore,
    namespace: &str,
    cluster: &str,
    expected: usize,
    schedule: PollSchedule,
) -> Result<()> {
    let what = format!("{expected} running router pods of {namespace}/{cluster}");
    wait_until(&what, schedule, || async move {
        let pods = list_pods(store, namespace).await?;
        routers_ready(&pods, cluster, expected)
    })
    .await
}

pub async fn wait_on_routers_gone(
    store: &dyn ObjectStore,
    namespace: &str,
    cluster: &str,
    schedule: PollSchedule,
) -> Result<()> {
    wait_on_routers(store, namespace, cluster, 0, schedule).await
}

/// Poll the cluster's events until one newer than `since` matches.
#[instrument(skip(store, matcher, schedule), fields(matcher = %matcher))]
pub async fn wait_for_cluster_event(
    store: &dyn ObjectStore,
    namespace: &str,
    cluster: &str,
    since: &SinceVersion,
    matcher: &EventMatcher,
    schedule: PollSchedule,
) -> Result<()> {
    let selector = involved_object_selector(ResourceKind::InnoDBCluster, cluster);
    let what = format!("{matcher} on InnoDBCluster {namespace}/{cluster}");
    let selector = selector.as_str();
    wait_until(&what, schedule, || async move {
        let events = store.list_events(namespace, selector).await?;
        Ok(matcher.matches_any(&events, since))
    })
    .await
}
