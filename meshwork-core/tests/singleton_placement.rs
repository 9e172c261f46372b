// Singleton placement on the leader and proxy routing

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

use meshwork_core::cluster::{ClusterHandle, ClusterMessage, ClusterRuntime};
use meshwork_core::runtime::{Actor, ActorContext, ActorPath, Envelope, InMemoryNetwork, Transport};
use meshwork_core::singleton::{singleton_path, SingletonProvider};

mod common;
use common::*;

/// Answers every ask with the address it runs on
struct WhereAmI;

#[async_trait]
impl Actor for WhereAmI {
    async fn handle(&mut self, ctx: &mut ActorContext, mut envelope: Envelope) {
        let here = Bytes::from(ctx.path().address.clone());
        envelope.respond(ClusterMessage::User { payload: here });
    }
}

fn provider() -> Arc<dyn SingletonProvider> {
    Arc::new(|| Box::new(WhereAmI) as Box<dyn Actor>)
}

async fn start_with_singleton(network: &Arc<InMemoryNetwork>, count: usize) -> Vec<ClusterHandle> {
    let mut nodes = Vec::with_capacity(count);
    for i in 0..count {
        let config = node_config(i);
        let runtime = ClusterRuntime::new(network.transport(config.node.address.clone()))
            .with_singleton("registry", provider());
        nodes.push(start_with_runtime(config, runtime).await);
    }
    wait_for_up_members(&nodes, count).await;
    nodes
}

fn instance_at(index: usize) -> ActorPath {
    ActorPath::new(node_address(index), singleton_path("registry"))
}

/// Ask the proxy on `via` where the singleton runs
async fn locate(network: &Arc<InMemoryNetwork>, via: usize, proxy: &ActorPath) -> Option<String> {
    let client = network.transport(node_address(via));
    match client
        .ask(
            proxy,
            None,
            ClusterMessage::User {
                payload: Bytes::from_static(b"where"),
            },
            Duration::from_millis(500),
        )
        .await
    {
        Ok(ClusterMessage::User { payload }) => String::from_utf8(payload.to_vec()).ok(),
        _ => None,
    }
}

#[tokio::test]
async fn test_singleton_runs_only_on_leader() {
    let network = InMemoryNetwork::new();
    let nodes = start_with_singleton(&network, 3).await;

    let net = Arc::clone(&network);
    let placed = wait_until(Duration::from_secs(3), || {
        let net = Arc::clone(&net);
        async move { net.is_registered(&instance_at(0)) }
    })
    .await;
    assert!(placed, "singleton never started on the leader");
    assert!(!network.is_registered(&instance_at(1)));
    assert!(!network.is_registered(&instance_at(2)));

    shutdown_all(&nodes).await;
    assert!(!network.is_registered(&instance_at(0)));
}

#[tokio::test]
async fn test_proxy_routes_to_leader_and_follows_failover() {
    let network = InMemoryNetwork::new();
    let nodes = start_with_singleton(&network, 3).await;

    let proxy = nodes[2].singleton_proxy("registry").unwrap();
    // Same proxy for repeated lookups
    assert_eq!(nodes[2].singleton_proxy("registry").unwrap(), proxy);

    let leader = node_address(0);
    let net = Arc::clone(&network);
    let routed = wait_until(Duration::from_secs(3), || {
        let net = Arc::clone(&net);
        let proxy = proxy.clone();
        let leader = leader.clone();
        async move { locate(&net, 2, &proxy).await.as_deref() == Some(leader.as_str()) }
    })
    .await;
    assert!(routed, "proxy never reached the singleton on the leader");

    network.isolate(&node_address(0));

    let next_leader = node_address(1);
    let net = Arc::clone(&network);
    let moved = wait_until(Duration::from_secs(5), || {
        let net = Arc::clone(&net);
        let proxy = proxy.clone();
        let next_leader = next_leader.clone();
        async move { locate(&net, 2, &proxy).await.as_deref() == Some(next_leader.as_str()) }
    })
    .await;
    assert!(moved, "proxy did not follow the singleton to the new leader");
    assert!(network.is_registered(&instance_at(1)));
    assert!(!network.is_registered(&instance_at(2)));

    network.heal_all();
    shutdown_all(&nodes).await;
}
