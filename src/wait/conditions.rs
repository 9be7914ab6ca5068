//! Predicates evaluated by the waits

use k8s_openapi::api::core::v1::{Event, Pod};
use kube::ResourceExt;
use kube::runtime::wait::Condition;
use regex::Regex;

use crate::error::Result;
use crate::store::{ClusterSnapshot, ResourceKind, SinceVersion};

/// Lifecycle phase reported in `status.phase` of a pod.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    pub const fn as_str(self) -> &'static str {
        match self {
            PodPhase::Pending => "Pending",
            PodPhase::Running => "Running",
            PodPhase::Succeeded => "Succeeded",
            PodPhase::Failed => "Failed",
            PodPhase::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for PodPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn pod_phase(pod: &Pod) -> Option<&str> {
    pod.status.as_ref()?.phase.as_deref()
}

/// Condition that checks if a pod reports the given phase
pub fn is_pod_in_phase(phase: PodPhase) -> impl Condition<Pod> {
    move |obj: Option<&Pod>| obj.and_then(pod_phase) == Some(phase.as_str())
}

/// Lower bound on `status.cluster.onlineInstances`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnlineCount {
    Any,
    AtLeast(i64),
}

impl OnlineCount {
    pub fn is_met_by(self, online: Option<i64>) -> bool {
        match self {
            OnlineCount::Any => true,
            OnlineCount::AtLeast(n) => online.is_some_and(|o| o >= n),
        }
    }
}

/// Target state for a cluster wait: one of the accepted statuses and,
/// optionally, a minimum number of online instances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterExpectation {
    pub statuses: Vec<String>,
    pub online: OnlineCount,
}

impl ClusterExpectation {
    pub fn new<S: AsRef<str>>(statuses: &[S], online: OnlineCount) -> Self {
        Self {
            statuses: statuses.iter().map(|s| s.as_ref().to_string()).collect(),
            online,
        }
    }

    /// `ONLINE` with at least `instances` members online.
    pub fn online(instances: i64) -> Self {
        Self::new(&["ONLINE"], OnlineCount::AtLeast(instances))
    }

    /// An empty status list never matches.
    pub fn is_met_by(&self, cluster: &ClusterSnapshot) -> bool {
        let status_ok = cluster
            .status
            .as_deref()
            .is_some_and(|status| self.statuses.iter().any(|s| s == status));
        status_ok && self.online.is_met_by(cluster.online_instances)
    }
}

impl std::fmt::Display for ClusterExpectation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "status in [{}]", self.statuses.join(", "))?;
        if let OnlineCount::AtLeast(n) = self.online {
            write!(f, " with at least {n} online")?;
        }
        Ok(())
    }
}

/// Condition that checks a cluster snapshot against an expectation
pub fn cluster_reached(expectation: ClusterExpectation) -> impl Condition<ClusterSnapshot> {
    move |obj: Option<&ClusterSnapshot>| obj.is_some_and(|c| expectation.is_met_by(c))
}

/// Pods named `<cluster>-router-*`.
pub fn router_pods<'a>(pods: &'a [Pod], cluster: &str) -> Result<Vec<&'a Pod>> {
    let pattern = Regex::new(&format!("^{}-router-", regex::escape(cluster)))?;
    Ok(pods
        .iter()
        .filter(|pod| pattern.is_match(&pod.name_any()))
        .collect())
}

/// Exactly `expected` router pods exist and all of them are Running.
pub fn routers_ready(pods: &[Pod], cluster: &str, expected: usize) -> Result<bool> {
    let routers = router_pods(pods, cluster)?;
    Ok(routers.len() == expected
        && routers
            .iter()
            .all(|pod| pod_phase(pod) == Some(PodPhase::Running.as_str())))
}

/// Field selector for the events of one object of a kind.
pub fn involved_object_selector(kind: ResourceKind, name: &str) -> String {
    format!(
        "involvedObject.kind={},involvedObject.name={}",
        kind.kind_name(),
        name
    )
}

/// Matches events by exact type and reason and a message regex.
#[derive(Debug, Clone)]
pub struct EventMatcher {
    pub event_type: String,
    pub reason: String,
    pub message: Regex,
}

impl EventMatcher {
    pub fn new(event_type: &str, reason: &str, message_pattern: &str) -> Result<Self> {
        Ok(Self {
            event_type: event_type.to_string(),
            reason: reason.to_string(),
            message: Regex::new(message_pattern)?,
        })
    }

    pub fn matches(&self, event: &Event) -> bool {
        event.type_.as_deref() == Some(self.event_type.as_str())
            && event.reason.as_deref() == Some(self.reason.as_str())
            && self.message.is_match(event.message.as_deref().unwrap_or_default())
    }

    /// Whether any event newer than `since` matches.
    pub fn matches_any(&self, events: &[Event], since: &SinceVersion) -> bool {
        events
            .iter()
            .filter(|e| since.admits(e.metadata.resource_version.as_deref()))
            .any(|e| self.matches(e))
    }
}

impl std::fmt::Display for EventMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "event type={} reason={} message=~/{}/",
            self.event_type, self.reason, self.message
        )
    }
}
