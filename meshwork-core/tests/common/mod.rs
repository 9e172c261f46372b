#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use meshwork_core::cluster::{Cluster, ClusterHandle, ClusterMessage, ClusterRuntime, MemberStatus, NODE_PATH};
use meshwork_core::config::ClusterConfig;
use meshwork_core::error::MeshworkResult;
use meshwork_core::runtime::{ActorPath, InMemoryNetwork, Transport};

/// Address of the `index`-th test node; index 0 sorts first and leads
pub fn node_address(index: usize) -> String {
    format!("127.0.0.1:{}", 7101 + index)
}

/// Test config for node `index` seeded by node 0
pub fn node_config(index: usize) -> ClusterConfig {
    let mut config = ClusterConfig::test(node_address(index));
    config.node.id = format!("node-{}", index + 1);
    config.discovery.seeds = vec![node_address(0)];
    config
}

pub async fn start_node(network: &Arc<InMemoryNetwork>, config: ClusterConfig) -> ClusterHandle {
    let runtime = ClusterRuntime::new(network.transport(config.node.address.clone()));
    start_with_runtime(config, runtime).await
}

pub async fn start_with_runtime(config: ClusterConfig, runtime: ClusterRuntime) -> ClusterHandle {
    Cluster::start(config, runtime).await.expect("node should start")
}

/// Start `count` nodes sequentially and wait until every node sees all of
/// them Up
pub async fn start_cluster(network: &Arc<InMemoryNetwork>, count: usize) -> Vec<ClusterHandle> {
    let mut nodes = Vec::with_capacity(count);
    for i in 0..count {
        nodes.push(start_node(network, node_config(i)).await);
    }
    wait_for_up_members(&nodes, count).await;
    nodes
}

pub async fn wait_for_up_members(nodes: &[ClusterHandle], expected: usize) {
    let converged = wait_until(Duration::from_secs(5), || async {
        for node in nodes {
            let Ok(state) = node.state().await else {
                return false;
            };
            let up = state
                .view
                .members()
                .filter(|m| m.status == MemberStatus::Up)
                .count();
            if up != expected || !state.in_quorum {
                return false;
            }
        }
        true
    })
    .await;
    assert!(converged, "cluster did not converge to {} members", expected);
}

/// Poll `condition` every 20ms until it holds or `timeout` passes
pub async fn wait_until<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Ask node `index` directly from an outside address and decode the reply
pub async fn ask_node(
    network: &Arc<InMemoryNetwork>,
    from: &str,
    index: usize,
    message: ClusterMessage,
) -> MeshworkResult<ClusterMessage> {
    network
        .transport(from)
        .ask(
            &ActorPath::new(node_address(index), NODE_PATH),
            Some(ActorPath::new(from, NODE_PATH)),
            message,
            Duration::from_secs(1),
        )
        .await
        .and_then(ClusterMessage::into_result)
}

pub async fn shutdown_all(nodes: &[ClusterHandle]) {
    for node in nodes {
        node.shutdown().await.expect("shutdown should succeed");
    }
}
