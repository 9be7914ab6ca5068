//! Integration tests for cluster deletion and namespace cleanup
//!
//! Run with: cargo test --test integration teardown -- --ignored

use crate::{CLUSTER, create_online_cluster, start_unit};

/// Test: Deleting the cluster removes its pods and the namespace wipes clean
#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires Kubernetes cluster"]
async fn test_delete_cluster_removes_pods() {
    let unit = start_unit("teardown").await;
    create_online_cluster(&unit, 2, 1).await;

    unit.delete_cluster(CLUSTER).await.expect("delete cluster");
    unit.wait_on_cluster_gone(CLUSTER)
        .await
        .expect("cluster should be gone");
    unit.wait_on_pod_gone("mycluster-0")
        .await
        .expect("pod 0 should be gone");
    unit.wait_on_pod_gone("mycluster-1")
        .await
        .expect("pod 1 should be gone");
    unit.wait_on_routers_gone(CLUSTER)
        .await
        .expect("routers should be gone");

    unit.teardown().await.expect("teardown");
}

/// Test: Teardown succeeds with a live cluster still in the namespace
#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires Kubernetes cluster"]
async fn test_teardown_with_live_cluster() {
    let unit = start_unit("teardown-live").await;
    create_online_cluster(&unit, 1, 0).await;

    unit.teardown().await.expect("teardown should wipe a live cluster");
}
