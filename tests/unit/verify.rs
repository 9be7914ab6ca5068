//! Unit tests for cluster, instance and router verification

use mysql_operator_e2e::config::RetrySecs;
use mysql_operator_e2e::mysql::Records;
use mysql_operator_e2e::store::{ClusterSnapshot, CustomObject};
use mysql_operator_e2e::verify::group::{
    DEFAULT_BASE_SERVER_ID, GROUP_MEMBERS_QUERY, ServerIdentity, check_server_identity, GROUP_VARIABLES_QUERY, PROCESS_LIST_QUERY, RECOVERY_CHANNEL_QUERY,
    SERVER_IDENTITY_QUERY,
};
use mysql_operator_e2e::verify::pod::{self, CLUSTER_LABEL, CLUSTER_ROLE_LABEL};
use mysql_operator_e2e::{
    CheckParams, Credentials, Error, HarnessConfig, MemberRole, ResourceKind, Verifier,
};

use crate::common::*;

fn host(index: usize) -> String {
    format!("mycluster-{index}.mycluster-instances.e2e.svc.cluster.local")
}

fn seeds_without(instances: usize, current: usize) -> String {
    (0..instances)
        .filter(|i| *i != current)
        .map(|i| format!("{}:3306", host(i)))
        .collect::<Vec<_>>()
        .join(",")
}

fn members(instances: usize, primary: usize, states: &[(usize, &str)]) -> Records {
    let rows: Vec<Vec<Option<String>>> = (0..instances)
        .map(|i| {
            let state = states
                .iter()
                .find(|(index, _)| *index == i)
                .map_or("ONLINE", |(_, s)| *s);
            let member_id = member_uuid(i);
            let member_host = host(i);
            row(&[
                Some(member_id.as_str()),
                Some(member_host.as_str()),
                Some("3306"),
                Some(state),
                Some(MemberRole::for_index(i, primary).as_str()),
            ])
        })
        .collect();
    Records::new(
        ["member_id", "member_host", "member_port", "member_state", "member_role"]
            .map(String::from)
            .to_vec(),
        rows,
    )
}

fn identity(index: usize, read_only: &str) -> Records {
    let server_id = (1000 + index).to_string();
    let uuid = member_uuid(index);
    let report_host = host(index);
    Records::from_cells(
        &["@@server_id", "@@server_uuid", "@@report_host", "@@super_read_only", "@@version"],
        &[&[
            Some(server_id.as_str()),
            Some(uuid.as_str()),
            Some(report_host.as_str()),
            Some(read_only),
            Some("8.0.36"),
        ]],
    )
}

fn group_variables(instances: usize, index: usize) -> Records {
    let seeds = seeds_without(instances, index);
    Records::from_cells(
        &["Variable_name", "Value"],
        &[
            &[Some("group_replication_bootstrap_group"), Some("OFF")],
            &[Some("group_replication_group_seeds"), Some(seeds.as_str())],
            &[Some("group_replication_single_primary_mode"), Some("ON")],
            &[Some("group_replication_ssl_mode"), Some("REQUIRED")],
            &[Some("group_replication_start_on_boot"), Some("OFF")],
        ],
    )
}

/// `SHOW PROCESSLIST` with the checker's own session plus `clients` others,
/// padded with threads that never count.
fn process_list(clients: usize) -> Records {
    let mut rows = vec![
        row(&[Some("5"), Some("event_scheduler"), Some("localhost"), None, Some("Daemon")]),
        row(&[Some("9"), Some("mysql_innodb_cs_1"), Some("10.0.0.2"), None, Some("Binlog Dump GTID")]),
        row(&[Some("20"), Some("root"), Some("localhost"), None, Some("Query")]),
    ];
    for i in 0..clients {
        let id = (30 + i).to_string();
        rows.push(row(&[Some(id.as_str()), Some("app"), Some("10.0.0.9"), Some("sakila"), Some("Sleep")]));
    }
    Records::new(
        ["Id", "User", "Host", "db", "Command"].map(String::from).to_vec(),
        rows,
    )
}

/// Store and sessions describing a healthy cluster.
struct Scenario {
    store: FakeStore,
    sessions: FakeSessions,
    config: HarnessConfig,
    instances: usize,
}

impl Scenario {
    fn healthy(instances: usize, primary: usize) -> Self {
        let store = FakeStore::new();
        let sessions = FakeSessions::new();
        let count = instances as i64;

        store.insert(
            ResourceKind::InnoDBCluster,
            ClusterBuilder::online_cluster(NAMESPACE, CLUSTER, count).build(),
        );
        store.insert_typed(
            ResourceKind::StatefulSet,
            &stateful_set(NAMESPACE, CLUSTER, instances as i32),
        );
        store.insert_typed(ResourceKind::Service, &service(NAMESPACE, CLUSTER));
        store.insert_typed(ResourceKind::Service, &service(NAMESPACE, "mycluster-instances"));

        for index in 0..instances {
            let name = format!("mycluster-{index}");
            let role = MemberRole::for_index(index, primary);
            store.insert_typed(
                ResourceKind::Pod,
                &PodBuilder::instance(NAMESPACE, CLUSTER, index).role(role).build(),
            );
            store.set_logs(&name, "sidecar", "Starting Operator request handler...\n");

            let read_only = if role == MemberRole::Primary { "0" } else { "1" };
            sessions.answer(&name, SERVER_IDENTITY_QUERY, identity(index, read_only));
            sessions.answer(&name, GROUP_VARIABLES_QUERY, group_variables(instances, index));
            sessions.answer(
                &name,
                RECOVERY_CHANNEL_QUERY,
                Records::from_cells(&["ssl_allowed", "tls_version"], &[&[Some("YES"), Some("TLSv1.3")]]),
            );
            let clients = usize::from(role == MemberRole::Primary);
            sessions.answer(&name, PROCESS_LIST_QUERY, process_list(clients));
        }
        sessions.answer("mycluster-0", GROUP_MEMBERS_QUERY, members(instances, primary, &[]));

        Self {
            store,
            sessions,
            config: HarnessConfig {
                label_retry: RetrySecs::new(3, 1),
                ..Default::default()
            },
            instances,
        }
    }

    /// `routers` running router pods with their deployment.
    fn with_routers(self, routers: i64) -> Self {
        let count = self.instances as i64;
        self.store.insert(
            ResourceKind::InnoDBCluster,
            ClusterBuilder::online_cluster(NAMESPACE, CLUSTER, count)
                .routers(routers)
                .build(),
        );
        self.store.insert_typed(
            ResourceKind::Deployment,
            &deployment(NAMESPACE, "mycluster-router", routers as i32),
        );
        for i in 0..routers {
            self.store.insert_typed(
                ResourceKind::Pod,
                &PodBuilder::router(NAMESPACE, CLUSTER, &format!("7d9f8-{i}")).build(),
            );
        }
        self
    }

    fn replace_pod(&self, pod: k8s_openapi::api::core::v1::Pod) {
        self.store.insert_typed(ResourceKind::Pod, &pod);
    }

    fn params(&self) -> CheckParams {
        CheckParams::new(NAMESPACE, CLUSTER, Credentials::new("root", "sakila"))
            .instances(self.instances)
    }

    async fn check(&self, params: &CheckParams) -> mysql_operator_e2e::Result<Vec<String>> {
        let pods = Verifier::new(&self.store, &self.sessions, &self.config)
            .check_all(params)
            .await?;
        Ok(pods
            .into_iter()
            .filter_map(|p| p.metadata.name)
            .collect())
    }
}

fn assert_mismatch(err: Error, what_contains: &str) {
    match err {
        Error::Mismatch { what, .. } => assert!(
            what.contains(what_contains),
            "mismatch on {what:?}, expected it to mention {what_contains:?}"
        ),
        other => panic!("expected mismatch on {what_contains}, got {other:?}"),
    }
}

mod check_all_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_healthy_cluster_passes() {
        let scenario = Scenario::healthy(3, 0);
        let pods = scenario.check(&scenario.params()).await.unwrap();
        assert_eq!(pods, vec!["mycluster-0", "mycluster-1", "mycluster-2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_session_is_closed() {
        let scenario = Scenario::healthy(3, 0);
        scenario.check(&scenario.params()).await.unwrap();

        // One group session plus one per instance
        assert_eq!(scenario.sessions.opened().len(), 4);
        assert_eq!(scenario.sessions.closed(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_instances_skips_spec_comparison() {
        let scenario = Scenario::healthy(1, 0);
        let params = CheckParams::new(NAMESPACE, CLUSTER, Credentials::new("root", "sakila"));
        scenario.check(&params).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_declared_instances_mismatch() {
        let scenario = Scenario::healthy(3, 0);
        let err = scenario
            .check(&scenario.params().instances(5))
            .await
            .unwrap_err();
        assert_mismatch(err, "spec.instances");
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_cluster() {
        let scenario = Scenario::healthy(3, 0);
        scenario.store.remove(ResourceKind::InnoDBCluster, NAMESPACE, CLUSTER);
        let err = scenario.check(&scenario.params()).await.unwrap_err();
        assert!(err.to_string().contains("InnoDBCluster e2e/mycluster not found"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_pod() {
        let scenario = Scenario::healthy(3, 0);
        scenario.store.remove(ResourceKind::Pod, NAMESPACE, "mycluster-2");
        let err = scenario.check(&scenario.params()).await.unwrap_err();
        assert!(err.to_string().contains("pod e2e/mycluster-2 not found"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stateful_set_replicas_must_match() {
        let scenario = Scenario::healthy(3, 0);
        scenario
            .store
            .insert_typed(ResourceKind::StatefulSet, &stateful_set(NAMESPACE, CLUSTER, 2));
        let err = scenario.check(&scenario.params()).await.unwrap_err();
        assert_mismatch(err, "stateful set replicas");
    }

    #[tokio::test(start_paused = true)]
    async fn test_online_instances_must_match() {
        let scenario = Scenario::healthy(3, 0);
        scenario.store.insert(
            ResourceKind::InnoDBCluster,
            ClusterBuilder::new(NAMESPACE, CLUSTER)
                .instances(3)
                .status("ONLINE_PARTIAL")
                .online(2)
                .build(),
        );
        let err = scenario.check(&scenario.params()).await.unwrap_err();
        assert_mismatch(err, "onlineInstances");
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_cluster_finalizer() {
        let scenario = Scenario::healthy(3, 0);
        scenario.store.insert(
            ResourceKind::InnoDBCluster,
            ClusterBuilder::online_cluster(NAMESPACE, CLUSTER, 3)
                .without_finalizers()
                .build(),
        );
        let err = scenario.check(&scenario.params()).await.unwrap_err();
        assert!(err.to_string().contains("lacks finalizer mysql.oracle.com/cluster"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_instances_service() {
        let scenario = Scenario::healthy(3, 0);
        scenario
            .store
            .remove(ResourceKind::Service, NAMESPACE, "mycluster-instances");
        let err = scenario.check(&scenario.params()).await.unwrap_err();
        assert!(err.to_string().contains("service e2e/mycluster-instances not found"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unexpected_router_deployment() {
        let scenario = Scenario::healthy(3, 0);
        scenario.store.insert_typed(
            ResourceKind::Deployment,
            &deployment(NAMESPACE, "mycluster-router", 1),
        );
        let err = scenario.check(&scenario.params()).await.unwrap_err();
        assert!(err.to_string().contains("no routers are declared"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_member_not_online() {
        let scenario = Scenario::healthy(3, 0);
        scenario.sessions.answer(
            "mycluster-0",
            GROUP_MEMBERS_QUERY,
            members(3, 0, &[(2, "RECOVERING")]),
        );
        // The first scripted answer is consumed before the replacement
        scenario.check(&scenario.params()).await.unwrap();
        let err = scenario.check(&scenario.params()).await.unwrap_err();
        assert_mismatch(err, "state of group member");
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_primaries_rejected() {
        let scenario = Scenario::healthy(3, 0);
        let healthy = members(3, 0, &[]);
        let records = Records::new(
            healthy.columns().to_vec(),
            healthy
                .rows()
                .iter()
                .map(|r| {
                    let mut r = r.clone();
                    r[4] = Some("PRIMARY".to_string());
                    r
                })
                .collect(),
        );
        let sessions = FakeSessions::new();
        sessions.answer("mycluster-0", GROUP_MEMBERS_QUERY, records);
        let err = Verifier::new(&scenario.store, &sessions, &scenario.config)
            .check_all(&scenario.params())
            .await
            .unwrap_err();
        assert_mismatch(err, "number of PRIMARY members");
        assert_eq!(sessions.closed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_primary_must_match_group() {
        let scenario = Scenario::healthy(3, 0);
        let err = scenario
            .check(&scenario.params().primary(1))
            .await
            .unwrap_err();
        assert_mismatch(err, "primary ordinal");
    }

    #[tokio::test(start_paused = true)]
    async fn test_primary_on_other_ordinal() {
        let scenario = Scenario::healthy(3, 2);
        scenario
            .check(&scenario.params().primary(2))
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_secondary_must_be_super_read_only() {
        let scenario = Scenario::healthy(3, 0);
        let sessions = scenario.sessions.clone();
        sessions.answer("mycluster-1", SERVER_IDENTITY_QUERY, identity(1, "OFF"));
        // Drain the healthy answer queued first
        scenario.check(&scenario.params()).await.unwrap();

        let err = scenario.check(&scenario.params()).await.unwrap_err();
        assert_mismatch(err, "super_read_only");
    }

    #[tokio::test(start_paused = true)]
    async fn test_group_seeds_must_list_other_members() {
        let scenario = Scenario::healthy(3, 0);
        let sessions = FakeSessions::new();
        for index in 0..3 {
            let name = format!("mycluster-{index}");
            let read_only = if index == 0 { "0" } else { "1" };
            sessions.answer(&name, SERVER_IDENTITY_QUERY, identity(index, read_only));
            // Every instance reports the seeds of instance 0
            sessions.answer(&name, GROUP_VARIABLES_QUERY, group_variables(3, 0));
            sessions.answer(
                &name,
                RECOVERY_CHANNEL_QUERY,
                Records::from_cells(&["ssl_allowed", "tls_version"], &[&[Some("YES"), Some("TLSv1.2")]]),
            );
        }
        sessions.answer("mycluster-0", GROUP_MEMBERS_QUERY, members(3, 0, &[]));

        let err = Verifier::new(&scenario.store, &sessions, &scenario.config)
            .check_all(&scenario.params())
            .await
            .unwrap_err();
        assert_mismatch(err, "group_replication_group_seeds");
    }

    #[tokio::test(start_paused = true)]
    async fn test_unhealthy_sidecar() {
        let scenario = Scenario::healthy(3, 0);
        scenario
            .store
            .set_logs("mycluster-1", "sidecar", "Traceback (most recent call last):");
        let err = scenario.check(&scenario.params()).await.unwrap_err();
        assert!(err.to_string().contains("sidecar of pod e2e/mycluster-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unexpected_restart() {
        let scenario = Scenario::healthy(3, 0);
        scenario.replace_pod(
            PodBuilder::instance(NAMESPACE, CLUSTER, 1)
                .role(MemberRole::Secondary)
                .restarts(1)
                .build(),
        );
        let err = scenario.check(&scenario.params()).await.unwrap_err();
        assert!(err.to_string().contains("restarted 1 time(s) unexpectedly"));

        scenario
            .check(&scenario.params().restarts_expected(true))
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_version_compared_when_requested() {
        let scenario = Scenario::healthy(3, 0);
        scenario
            .check(&scenario.params().version(SERVER_VERSION))
            .await
            .unwrap();

        let err = scenario
            .check(&scenario.params().version("8.0.37"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("should end with 8.0.37"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_namespace_matches_pods_by_label() {
        let scenario = Scenario::healthy(3, 0);
        scenario.store.insert_typed(
            ResourceKind::Pod,
            &PodBuilder::instance(NAMESPACE, "mycluster-extra", 0).build(),
        );

        let err = scenario.check(&scenario.params()).await.unwrap_err();
        assert_mismatch(err, "server pods");

        scenario
            .check(&scenario.params().shared_namespace(true))
            .await
            .unwrap();
    }
}

mod session_count_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_primary_has_one_client_session() {
        let scenario = Scenario::healthy(3, 0);
        scenario
            .check(&scenario.params().count_sessions(true))
            .await
            .unwrap();

        let process_lists = scenario
            .sessions
            .queries()
            .into_iter()
            .filter(|q| q.sql == PROCESS_LIST_QUERY)
            .count();
        assert_eq!(process_lists, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_extra_session_on_secondary_fails() {
        let scenario = Scenario::healthy(3, 0);
        let sessions = scenario.sessions.clone();
        sessions.answer("mycluster-2", PROCESS_LIST_QUERY, process_list(1));
        // First answer of the queue is the healthy one
        scenario
            .check(&scenario.params().count_sessions(true))
            .await
            .unwrap();

        let err = scenario
            .check(&scenario.params().count_sessions(true))
            .await
            .unwrap_err();
        assert_mismatch(err, "client sessions on mycluster-2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_process_list_not_queried_by_default() {
        let scenario = Scenario::healthy(3, 0);
        scenario.check(&scenario.params()).await.unwrap();
        assert!(
            scenario
                .sessions
                .queries()
                .iter()
                .all(|q| q.sql != PROCESS_LIST_QUERY)
        );
    }
}

mod router_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_cluster_with_routers_passes() {
        let scenario = Scenario::healthy(3, 0).with_routers(2);
        scenario
            .check(&scenario.params().routers(2))
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_router_count_against_spec() {
        let scenario = Scenario::healthy(3, 0).with_routers(2);
        let err = scenario
            .check(&scenario.params().routers(1))
            .await
            .unwrap_err();
        assert_mismatch(err, "spec.router.instances");
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiting_router_container_fails() {
        let scenario = Scenario::healthy(3, 0).with_routers(1);
        scenario.replace_pod(
            PodBuilder::router(NAMESPACE, CLUSTER, "7d9f8-0")
                .waiting()
                .build(),
        );
        let err = scenario
            .check(&scenario.params().routers(1))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("should be running"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_router_pod_count_only() {
        let scenario = Scenario::healthy(1, 0).with_routers(2);
        let verifier = Verifier::new(&scenario.store, &scenario.sessions, &scenario.config);
        verifier
            .check_router_pods(NAMESPACE, CLUSTER, 2)
            .await
            .unwrap();
        let err = verifier
            .check_router_pods(NAMESPACE, CLUSTER, 3)
            .await
            .unwrap_err();
        assert_mismatch(err, "router pods of e2e/mycluster");
    }
}

mod server_identity_tests {
    use super::*;

    fn snapshot() -> ClusterSnapshot {
        ClusterSnapshot::from_object(&CustomObject::new(
            ClusterBuilder::online_cluster(NAMESPACE, CLUSTER, 3).build(),
        ))
    }

    fn server(index: usize, server_id: i64, uuid: &str) -> ServerIdentity {
        ServerIdentity {
            server_id,
            server_uuid: uuid.to_string(),
            report_host: host(index),
            super_read_only: true,
            version: SERVER_VERSION.to_string(),
        }
    }

    #[test]
    fn test_matching_identity_passes() {
        let pod = PodBuilder::instance(NAMESPACE, CLUSTER, 1).build();
        let identity = server(1, DEFAULT_BASE_SERVER_ID + 1, &member_uuid(1));
        check_server_identity(&identity, &pod, &snapshot(), 1, MemberRole::Secondary).unwrap();
    }

    #[test]
    fn test_member_id_must_match_annotation() {
        let pod = PodBuilder::instance(NAMESPACE, CLUSTER, 1).build();
        let identity = server(1, DEFAULT_BASE_SERVER_ID + 1, &member_uuid(2));
        let err = check_server_identity(&identity, &pod, &snapshot(), 1, MemberRole::Secondary)
            .unwrap_err();
        assert_mismatch(err, "memberId");
    }

    #[test]
    fn test_server_id_follows_base_and_index() {
        let pod = PodBuilder::instance(NAMESPACE, CLUSTER, 1).build();
        let identity = server(1, DEFAULT_BASE_SERVER_ID + 2, &member_uuid(1));
        let err = check_server_identity(&identity, &pod, &snapshot(), 1, MemberRole::Secondary)
            .unwrap_err();
        assert_mismatch(err, "server_id");
    }

    #[test]
    fn test_missing_membership_info_skips_id_checks() {
        let pod = PodBuilder::instance(NAMESPACE, CLUSTER, 1)
            .without_membership_info()
            .build();
        let identity = server(1, 7, "not-the-member-id");
        check_server_identity(&identity, &pod, &snapshot(), 1, MemberRole::Secondary).unwrap();
    }

    #[test]
    fn test_missing_membership_info_still_checks_read_only() {
        let pod = PodBuilder::instance(NAMESPACE, CLUSTER, 1)
            .without_membership_info()
            .build();
        let identity = ServerIdentity {
            super_read_only: false,
            ..server(1, 7, "not-the-member-id")
        };
        let err = check_server_identity(&identity, &pod, &snapshot(), 1, MemberRole::Secondary)
            .unwrap_err();
        assert_mismatch(err, "super_read_only");
    }
}

mod pod_tests {
    use super::*;

    fn snapshot() -> ClusterSnapshot {
        ClusterSnapshot::from_object(&CustomObject::new(
            ClusterBuilder::online_cluster(NAMESPACE, CLUSTER, 3).build(),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_labels_are_rechecked_on_fresh_pod() {
        let store = FakeStore::new();
        let fresh = PodBuilder::instance(NAMESPACE, CLUSTER, 1).build();
        store.insert_typed(ResourceKind::Pod, &fresh);
        let stale = PodBuilder::instance(NAMESPACE, CLUSTER, 1)
            .role(MemberRole::Primary)
            .build();

        pod::check_online_pod(
            &store,
            &snapshot(),
            &stale,
            false,
            MemberRole::Secondary,
            RetrySecs::new(3, 1),
        )
        .await
        .unwrap();
        assert_eq!(store.gets_of(ResourceKind::Pod, "mycluster-1"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrong_labels_fail_after_retries() {
        let store = FakeStore::new();
        let wrong = PodBuilder::instance(NAMESPACE, CLUSTER, 1)
            .label(CLUSTER_LABEL, "othercluster")
            .build();
        store.insert_typed(ResourceKind::Pod, &wrong);

        let err = pod::check_online_pod(
            &store,
            &snapshot(),
            &wrong,
            false,
            MemberRole::Secondary,
            RetrySecs::new(3, 1),
        )
        .await
        .unwrap_err();
        assert_mismatch(err, CLUSTER_LABEL);
        assert_eq!(store.gets_of(ResourceKind::Pod, "mycluster-1"), 2);
    }

    #[test]
    fn test_role_label_values() {
        let pod = PodBuilder::instance(NAMESPACE, CLUSTER, 0)
            .role(MemberRole::Primary)
            .build();
        pod::check_pod_labels(&pod, CLUSTER, MemberRole::Primary).unwrap();
        let err = pod::check_pod_labels(&pod, CLUSTER, MemberRole::Secondary).unwrap_err();
        assert_mismatch(err, CLUSTER_ROLE_LABEL);
    }

    #[test]
    fn test_image_pull_secrets_follow_spec() {
        let cluster = ClusterSnapshot::from_object(&CustomObject::new(
            ClusterBuilder::online_cluster(NAMESPACE, CLUSTER, 3)
                .spec_field("imagePullSecrets", serde_json::json!([{"name": "regcred"}]))
                .build(),
        ));
        let without = PodBuilder::instance(NAMESPACE, CLUSTER, 0).build();
        let err = pod::check_pod_spec_compliant(&cluster, &without).unwrap_err();
        assert_mismatch(err, "imagePullSecrets");

        let with = PodBuilder::instance(NAMESPACE, CLUSTER, 0)
            .image_pull_secrets(&["regcred"])
            .build();
        pod::check_pod_spec_compliant(&cluster, &with).unwrap();
    }

    #[test]
    fn test_image_pull_policy_follows_spec() {
        let cluster = ClusterSnapshot::from_object(&CustomObject::new(
            ClusterBuilder::online_cluster(NAMESPACE, CLUSTER, 3)
                .spec_field("imagePullPolicy", serde_json::json!("Always"))
                .build(),
        ));
        let pod = PodBuilder::instance(NAMESPACE, CLUSTER, 0).build();
        let err = pod::check_pod_spec_compliant(&cluster, &pod).unwrap_err();
        assert_mismatch(err, "imagePullPolicy");
    }

    #[test]
    fn test_pending_pod_is_not_online() {
        let pod = PodBuilder::instance(NAMESPACE, CLUSTER, 0).phase("Pending").build();
        let err = pod::check_online_pod_status(&pod, false).unwrap_err();
        assert_mismatch(err, "phase of pod mycluster-0");
    }
}

mod backup_tests {
    use super::*;

    #[tokio::test]
    async fn test_completed_backup_passes() {
        let scenario = Scenario::healthy(1, 0);
        scenario.store.insert(
            ResourceKind::MySQLBackup,
            backup_object(NAMESPACE, "dump-1", Some("Completed")),
        );
        let backup = Verifier::new(&scenario.store, &scenario.sessions, &scenario.config)
            .check_backup(NAMESPACE, "dump-1")
            .await
            .unwrap();
        assert!(backup.is_completed());
    }

    #[tokio::test]
    async fn test_running_backup_fails() {
        let scenario = Scenario::healthy(1, 0);
        scenario.store.insert(
            ResourceKind::MySQLBackup,
            backup_object(NAMESPACE, "dump-1", Some("Running")),
        );
        let err = Verifier::new(&scenario.store, &scenario.sessions, &scenario.config)
            .check_backup(NAMESPACE, "dump-1")
            .await
            .unwrap_err();
        assert_mismatch(err, "status of MySQLBackup e2e/dump-1");
    }

    #[tokio::test]
    async fn test_missing_backup_fails() {
        let scenario = Scenario::healthy(1, 0);
        let err = Verifier::new(&scenario.store, &scenario.sessions, &scenario.config)
            .check_backup(NAMESPACE, "dump-1")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("MySQLBackup e2e/dump-1 not found"));
    }
}
