//! Replication group and per-instance server checks

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use serde::Deserialize;
use tracing::{debug, instrument};

use super::pod::{MEMBERSHIP_INFO_ANNOTATION, MemberRole};
use crate::error::{Error, Result};
use crate::mysql::{Credentials, Records, Row, SessionProvider, SqlSession, close_session};
use crate::store::ClusterSnapshot;

pub const GROUP_MEMBERS_QUERY: &str = "SELECT member_id, member_host, member_port, member_state, member_role \
     FROM performance_schema.replication_group_members ORDER BY member_host";
pub const SERVER_IDENTITY_QUERY: &str =
    "SELECT @@server_id, @@server_uuid, @@report_host, @@super_read_only, @@version";
pub const GROUP_VARIABLES_QUERY: &str = "SHOW GLOBAL VARIABLES LIKE 'group_replication%'";
pub const RECOVERY_CHANNEL_QUERY: &str = "SELECT ssl_allowed, COALESCE(tls_version, '') \
     FROM performance_schema.replication_connection_configuration \
     WHERE channel_name = 'group_replication_recovery'";
pub const PROCESS_LIST_QUERY: &str = "SHOW PROCESSLIST";

/// Server id offset used when the cluster spec sets none
pub const DEFAULT_BASE_SERVER_ID: i64 = 1000;

const IGNORED_SESSION_USERS: [&str; 2] = ["event_scheduler", "system user"];
const IGNORED_SESSION_COMMANDS: [&str; 1] = ["Binlog Dump GTID"];

/// Group replication settings every instance must carry
const REQUIRED_GROUP_VARIABLES: [(&str, &str); 4] = [
    ("group_replication_start_on_boot", "OFF"),
    ("group_replication_single_primary_mode", "ON"),
    ("group_replication_bootstrap_group", "OFF"),
    ("group_replication_ssl_mode", "REQUIRED"),
];

const GROUP_SEEDS_VARIABLE: &str = "group_replication_group_seeds";

/// One row of `performance_schema.replication_group_members`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMember {
    pub member_id: String,
    pub host: String,
    pub port: String,
    pub state: String,
    pub role: String,
}

fn cell(row: &Row, index: usize, column: &str) -> Result<String> {
    row.get(index)
        .cloned()
        .flatten()
        .ok_or_else(|| Error::verification(format!("column {column} is NULL or missing")))
}

impl GroupMember {
    pub fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            member_id: cell(row, 0, "member_id")?,
            host: cell(row, 1, "member_host")?,
            port: cell(row, 2, "member_port")?,
            state: cell(row, 3, "member_state")?,
            role: cell(row, 4, "member_role")?,
        })
    }

    pub fn is_primary(&self) -> bool {
        self.role == MemberRole::Primary.as_str()
    }
}

pub fn parse_members(records: &Records) -> Result<Vec<GroupMember>> {
    records.rows().iter().map(GroupMember::from_row).collect()
}

/// Pod ordinal of a member host such as `mycluster-1.mycluster-instances.e2e.svc.cluster.local`.
pub fn extract_index(host: &str) -> Result<usize> {
    let pod = host.split('.').next().unwrap_or_default();
    pod.rsplit('-')
        .next()
        .and_then(|index| index.parse().ok())
        .ok_or_else(|| Error::verification(format!("cannot extract pod index from host {host}")))
}

/// Outcome of a successful group check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupInfo {
    /// Ordinal of the primary's pod
    pub primary: usize,
    pub members: Vec<GroupMember>,
}

/// All members ONLINE, exactly one PRIMARY, and the member count matching
/// both the declared and the reported online instance counts.
pub fn evaluate_group(members: Vec<GroupMember>, cluster: &ClusterSnapshot) -> Result<GroupInfo> {
    if let Some(member) = members.iter().find(|m| m.state != "ONLINE") {
        return Err(Error::mismatch(
            format!("state of group member {}", member.host),
            "ONLINE",
            &member.state,
        ));
    }

    let primaries: Vec<&GroupMember> = members.iter().filter(|m| m.is_primary()).collect();
    let [primary] = primaries.as_slice() else {
        return Err(Error::mismatch("number of PRIMARY members", 1, primaries.len()));
    };
    let primary = extract_index(&primary.host)?;

    let declared = cluster.spec_instances.unwrap_or_default();
    if members.len() as i64 != declared {
        return Err(Error::mismatch("group members vs spec.instances", declared, members.len()));
    }
    let online = cluster.online_instances.unwrap_or_default();
    if members.len() as i64 != online {
        return Err(Error::mismatch(
            "group members vs status.cluster.onlineInstances",
            online,
            members.len(),
        ));
    }

    Ok(GroupInfo { primary, members })
}

/// Query the group membership through the first instance.
#[instrument(skip_all, fields(cluster = %cluster.name))]
pub async fn check_group(
    sessions: &dyn SessionProvider,
    cluster: &ClusterSnapshot,
    credentials: &Credentials,
) -> Result<GroupInfo> {
    let pod = cluster.pod_name(0);
    let mut session = sessions
        .open(&cluster.namespace, &pod, &credentials.user, &credentials.password)
        .await?;
    let records = session.fetch_all(GROUP_MEMBERS_QUERY, &[]).await;
    close_session(session).await;

    let info = evaluate_group(parse_members(&records?)?, cluster)?;
    debug!(primary = info.primary, members = info.members.len(), "Group is healthy");
    Ok(info)
}

/// Identity values a server reports about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerIdentity {
    pub server_id: i64,
    pub server_uuid: String,
    pub report_host: String,
    pub super_read_only: bool,
    pub version: String,
}

fn parse_switch(value: &str) -> Option<bool> {
    match value {
        "1" | "ON" => Some(true),
        "0" | "OFF" => Some(false),
        _ => None,
    }
}

impl ServerIdentity {
    pub fn from_row(row: &Row) -> Result<Self> {
        let server_id = cell(row, 0, "@@server_id")?;
        let super_read_only = cell(row, 3, "@@super_read_only")?;
        Ok(Self {
            server_id: server_id
                .parse()
                .map_err(|_| Error::verification(format!("invalid server_id {server_id}")))?,
            server_uuid: cell(row, 1, "@@server_uuid")?,
            report_host: cell(row, 2, "@@report_host")?,
            super_read_only: parse_switch(&super_read_only).ok_or_else(|| {
                Error::verification(format!("invalid super_read_only {super_read_only}"))
            })?,
            version: cell(row, 4, "@@version")?,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MembershipInfo {
    member_id: Option<String>,
}

/// Read-only mode, member id annotation and server id of one instance.
///
/// Member id and server id are only compared when the pod carries the
/// membership-info annotation.
pub fn check_server_identity(
    identity: &ServerIdentity,
    pod: &Pod,
    cluster: &ClusterSnapshot,
    index: usize,
    role: MemberRole,
) -> Result<()> {
    let name = pod.name_any();
    let expect_read_only = role == MemberRole::Secondary;
    if identity.super_read_only != expect_read_only {
        return Err(Error::mismatch(
            format!("super_read_only of {role} {name}"),
            expect_read_only,
            identity.super_read_only,
        ));
    }

    // Absent while the instance is being removed.
    let Some(annotation) = pod.annotations().get(MEMBERSHIP_INFO_ANNOTATION) else {
        return Ok(());
    };
    let info: MembershipInfo = serde_json::from_str(annotation).map_err(|e| {
        Error::verification(format!("invalid {MEMBERSHIP_INFO_ANNOTATION} on pod {name}: {e}"))
    })?;
    let member_id = info.member_id.unwrap_or_default();
    if member_id != identity.server_uuid {
        return Err(Error::mismatch(
            format!("memberId of pod {name}"),
            &identity.server_uuid,
            member_id,
        ));
    }

    let base = cluster.base_server_id.unwrap_or(DEFAULT_BASE_SERVER_ID);
    let expected_id = base + index as i64;
    if identity.server_id != expected_id {
        return Err(Error::mismatch(
            format!("server_id of pod {name}"),
            expected_id,
            identity.server_id,
        ));
    }
    Ok(())
}

/// Compare versions up to the first `-`, so `8.0.36-commercial` matches `8.0.36`.
pub fn check_server_version(live: &str, expected: &str) -> Result<()> {
    let prefix = |v: &str| v.split('-').next().unwrap_or_default().to_string();
    if prefix(live) != prefix(expected) {
        return Err(Error::mismatch("server version", expected, live));
    }
    Ok(())
}

pub fn variables_map(records: &Records) -> BTreeMap<String, String> {
    records
        .rows()
        .iter()
        .filter_map(|row| match row.as_slice() {
            [Some(name), value, ..] => Some((name.clone(), value.clone().unwrap_or_default())),
            _ => None,
        })
        .collect()
}

pub fn check_group_var(vars: &BTreeMap<String, String>, name: &str, expected: &str) -> Result<()> {
    let actual = vars
        .get(name)
        .ok_or_else(|| Error::verification(format!("variable {name} not reported")))?;
    if actual != expected {
        return Err(Error::mismatch(format!("variable {name}"), expected, actual));
    }
    Ok(())
}

/// Fully qualified `host:port` of an instance pod as used in group seeds.
pub fn seed_address(cluster: &ClusterSnapshot, pod: &str) -> String {
    format!(
        "{pod}.{}.{}.svc.cluster.local:3306",
        cluster.instances_service_name(),
        cluster.namespace
    )
}

/// Sorted seeds expected on `current`: every other instance of the cluster.
pub fn expected_group_seeds(cluster: &ClusterSnapshot, pods: &[Pod], current: &str) -> Vec<String> {
    let mut seeds: Vec<String> = pods
        .iter()
        .map(|p| p.name_any())
        .filter(|name| name != current)
        .map(|name| seed_address(cluster, &name))
        .collect();
    seeds.sort();
    seeds
}

pub fn check_group_seeds(vars: &BTreeMap<String, String>, expected: &[String]) -> Result<()> {
    let raw = vars.get(GROUP_SEEDS_VARIABLE).map(String::as_str).unwrap_or_default();
    let mut actual: Vec<&str> = raw.split(',').map(str::trim).filter(|s| !s.is_empty()).collect();
    actual.sort_unstable();
    if actual != expected {
        return Err(Error::mismatch(
            GROUP_SEEDS_VARIABLE,
            expected.join(","),
            actual.join(","),
        ));
    }
    Ok(())
}

/// The recovery channel, when configured, must allow SSL and negotiate TLS.
pub fn check_recovery_channel(row: Option<&Row>, pod: &str) -> Result<()> {
    let Some(row) = row else {
        return Ok(());
    };
    let ssl_allowed = row.first().cloned().flatten().unwrap_or_default();
    if ssl_allowed != "YES" {
        return Err(Error::mismatch(
            format!("recovery channel ssl_allowed on {pod}"),
            "YES",
            ssl_allowed,
        ));
    }
    let tls_version = row.get(1).cloned().flatten().unwrap_or_default();
    if tls_version.is_empty() {
        return Err(Error::verification(format!(
            "recovery channel on {pod} has no TLS version"
        )));
    }
    Ok(())
}

/// Client sessions in a process list, excluding server threads and
/// replication dump threads.
pub fn count_sessions(records: &Records) -> usize {
    records
        .rows()
        .iter()
        .filter(|row| {
            let user = row.get(1).cloned().flatten().unwrap_or_default();
            let command = row.get(4).cloned().flatten().unwrap_or_default();
            !IGNORED_SESSION_USERS.contains(&user.as_str())
                && !IGNORED_SESSION_COMMANDS.contains(&command.as_str())
        })
        .count()
}

/// `expected` counts sessions besides the checker's own.
pub fn check_process_list(records: &Records, expected: usize, pod: &str) -> Result<()> {
    let actual = count_sessions(records);
    if actual != expected + 1 {
        return Err(Error::mismatch(
            format!("client sessions on {pod}"),
            expected + 1,
            actual,
        ));
    }
    Ok(())
}

/// What [`check_instance`] expects of one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceExpectation {
    pub index: usize,
    pub role: MemberRole,
    /// Other client sessions, when they should be counted
    pub sessions: Option<usize>,
    pub version: Option<String>,
}

async fn inspect_instance(
    session: &mut dyn SqlSession,
    cluster: &ClusterSnapshot,
    pods: &[Pod],
    pod: &Pod,
    expectation: &InstanceExpectation,
) -> Result<()> {
    let name = pod.name_any();

    let row = session
        .fetch_one(SERVER_IDENTITY_QUERY, &[])
        .await?
        .ok_or_else(|| Error::verification(format!("no server identity from {name}")))?;
    let identity = ServerIdentity::from_row(&row)?;
    check_server_identity(&identity, pod, cluster, expectation.index, expectation.role)?;
    if let Some(version) = &expectation.version {
        check_server_version(&identity.version, version)?;
    }

    let vars = variables_map(&session.fetch_all(GROUP_VARIABLES_QUERY, &[]).await?);
    for (variable, value) in REQUIRED_GROUP_VARIABLES {
        check_group_var(&vars, variable, value)?;
    }
    check_group_seeds(&vars, &expected_group_seeds(cluster, pods, &name))?;

    let recovery = session.fetch_one(RECOVERY_CHANNEL_QUERY, &[]).await?;
    check_recovery_channel(recovery.as_ref(), &name)?;

    if let Some(expected) = expectation.sessions {
        let processes = session.fetch_all(PROCESS_LIST_QUERY, &[]).await?;
        check_process_list(&processes, expected, &name)?;
    }
    Ok(())
}

/// Server identity, group settings, recovery channel and session count of
/// one instance, checked through its own session.
#[instrument(skip_all, fields(pod = %pod.name_any(), role = %expectation.role))]
pub async fn check_instance(
    sessions: &dyn SessionProvider,
    cluster: &ClusterSnapshot,
    pods: &[Pod],
    pod: &Pod,
    expectation: &InstanceExpectation,
    credentials: &Credentials,
) -> Result<()> {
    let mut session = sessions
        .open(
            &cluster.namespace,
            &pod.name_any(),
            &credentials.user,
            &credentials.password,
        )
        .await?;
    let result = inspect_instance(session.as_mut(), cluster, pods, pod, expectation).await;
    close_session(session).await;
    result
}
