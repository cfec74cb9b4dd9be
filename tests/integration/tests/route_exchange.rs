//! Integration test: route exchange between several routing services.
//!
//! Nodes run real `RoutingService`s connected through the in-memory
//! transport from the harness crate.

use std::time::Duration;

use meridian_core::{AccountId, AccountInfo, Relation};
use uuid::Uuid;
use meridian_integration_tests::{eventually, wait_until, MemoryNetwork, TestNode, CONVERGENCE};
use meridian_routing::{StaticRoute, MINIMUM_UPDATE_INTERVAL};

fn peer(id: &str) -> AccountInfo {
    AccountInfo::new(AccountId::from(id), Relation::Peer)
}

fn parent(id: &str) -> AccountInfo {
    AccountInfo::new(AccountId::from(id), Relation::Parent)
}

/// A child account exchanging routes in both directions.
fn child(id: &str) -> AccountInfo {
    AccountInfo {
        send_routes: Some(true),
        receive_routes: Some(true),
        ..AccountInfo::new(AccountId::from(id), Relation::Child)
    }
}

fn has_prefix(node: &TestNode, prefix: &str) -> bool {
    node.handle.routing_table().get(prefix).is_some()
}

/// Long enough for a few rounds of triggered updates.
async fn settle() {
    tokio::time::sleep(MINIMUM_UPDATE_INTERVAL * 6).await;
}

// =========================================================================
// Propagation
// =========================================================================

#[tokio::test]
async fn test_routes_propagate_along_a_chain() {
    let network = MemoryNetwork::new();
    let a = network.spawn_node("a", "g.a", vec![peer("b")]);
    let b = network.spawn_node("b", "g.b", vec![peer("a"), peer("c")]);
    let c = network.spawn_node("c", "g.c", vec![peer("b")]);
    network.link(&a, "b", &b, "a").await;
    network.link(&b, "c", &c, "b").await;

    assert!(wait_until(CONVERGENCE, || a.next_hop("g.c.alice").as_deref() == Some("b")).await);
    assert!(wait_until(CONVERGENCE, || c.next_hop("g.a").as_deref() == Some("b")).await);

    let route = a.resolve("g.c").unwrap();
    assert_eq!(route.path, vec!["g.b".to_string(), "g.c".to_string()]);
    assert!(a.resolve("g.a").unwrap().next_hop.is_local());
}

#[tokio::test]
async fn test_disconnect_withdraws_downstream_routes() {
    let network = MemoryNetwork::new();
    let a = network.spawn_node("a", "g.a", vec![peer("b")]);
    let b = network.spawn_node("b", "g.b", vec![peer("a"), peer("c")]);
    let c = network.spawn_node("c", "g.c", vec![peer("b")]);
    network.link(&a, "b", &b, "a").await;
    network.link(&b, "c", &c, "b").await;
    assert!(wait_until(CONVERGENCE, || has_prefix(&a, "g.c")).await);

    network.unlink(&b, "c", &c, "b").await;

    assert!(wait_until(CONVERGENCE, || !has_prefix(&a, "g.c")).await);
    assert!(a.resolve("g.c.alice").is_none());
    assert!(has_prefix(&a, "g.b"));
}

// =========================================================================
// Loop prevention
// =========================================================================

#[tokio::test]
async fn test_triangle_has_no_loops() {
    let network = MemoryNetwork::new();
    let a = network.spawn_node("a", "g.a", vec![peer("b"), peer("c")]);
    let b = network.spawn_node("b", "g.b", vec![peer("a"), peer("c")]);
    let c = network.spawn_node("c", "g.c", vec![peer("a"), peer("b")]);
    network.link(&a, "b", &b, "a").await;
    network.link(&b, "c", &c, "b").await;
    network.link(&a, "c", &c, "a").await;

    assert!(wait_until(CONVERGENCE, || a.next_hop("g.c").as_deref() == Some("c")).await);
    assert!(wait_until(CONVERGENCE, || b.next_hop("g.a").as_deref() == Some("a")).await);
    assert!(wait_until(CONVERGENCE, || c.next_hop("g.b").as_deref() == Some("b")).await);
    settle().await;

    for node in [&a, &b, &c] {
        let status = node.status().await;
        for (prefix, route) in &status.local_routes {
            assert!(
                !route.path.contains(&node.address),
                "{} has a looping route for {}: {:?}",
                node.name,
                prefix,
                route.path
            );
        }
    }

    // Losing the direct link falls back to the two-hop path.
    network.unlink(&a, "c", &c, "a").await;
    assert!(wait_until(CONVERGENCE, || a.next_hop("g.c").as_deref() == Some("b")).await);
    assert_eq!(a.resolve("g.c").unwrap().path, vec!["g.b".to_string(), "g.c".to_string()]);
}

// =========================================================================
// Relation policy
// =========================================================================

#[tokio::test]
async fn test_peer_routes_are_not_exported_to_parents() {
    let network = MemoryNetwork::new();
    let p = network.spawn_node("p", "g.p", vec![child("m")]);
    let m = network.spawn_node("m", "g.m", vec![parent("p"), peer("q")]);
    let q = network.spawn_node("q", "g.q", vec![peer("m")]);
    network.link(&p, "m", &m, "p").await;
    network.link(&m, "q", &q, "m").await;

    assert!(wait_until(CONVERGENCE, || m.next_hop("g.q").as_deref() == Some("q")).await);
    assert!(wait_until(CONVERGENCE, || p.next_hop("g.m").as_deref() == Some("m")).await);
    assert!(wait_until(CONVERGENCE, || q.next_hop("g.p").as_deref() == Some("m")).await);
    settle().await;

    assert!(!has_prefix(&p, "g.q"));
    assert_eq!(q.resolve("g.p").unwrap().path, vec!["g.m".to_string(), "g.p".to_string()]);
    // The parent is the default route.
    assert_eq!(m.next_hop("g.somewhere.else").as_deref(), Some("p"));
    // The child route on the parent stays local to it.
    assert_eq!(p.next_hop("g.p.m").as_deref(), Some("m"));
}

#[tokio::test]
async fn test_customer_route_preferred_over_shorter_peer_route() {
    let network = MemoryNetwork::new();
    let a = network.spawn_node("a", "g.a", vec![peer("t"), child("c")]);
    let c = network.spawn_node("c", "g.c", vec![parent("a"), child("t")]);
    let t = network.spawn_node("t", "g.t", vec![peer("a"), parent("c")]);
    network.link(&a, "t", &t, "a").await;
    network.link(&a, "c", &c, "a").await;
    network.link(&c, "t", &t, "c").await;

    // One hop through the peer, two through the customer.
    assert!(wait_until(CONVERGENCE, || a.next_hop("g.t").as_deref() == Some("c")).await);
    assert_eq!(a.resolve("g.t").unwrap().path, vec!["g.c".to_string(), "g.t".to_string()]);

    network.unlink(&a, "c", &c, "a").await;
    assert!(wait_until(CONVERGENCE, || a.next_hop("g.t").as_deref() == Some("t")).await);
}

#[tokio::test]
async fn test_static_route_takes_precedence() {
    let network = MemoryNetwork::new();
    let a = network.spawn_node_with("a", "g.a", vec![peer("b"), peer("c")], |config| {
        config.static_routes = vec![StaticRoute {
            target_prefix: "g.c".into(),
            peer_id: AccountId::from("b"),
        }];
    });
    let b = network.spawn_node("b", "g.b", vec![peer("a")]);
    let c = network.spawn_node("c", "g.c", vec![peer("a")]);
    network.link(&a, "b", &b, "a").await;
    network.link(&a, "c", &c, "a").await;

    assert!(wait_until(CONVERGENCE, || has_prefix(&a, "g.b")).await);
    settle().await;
    assert_eq!(a.next_hop("g.c.alice").as_deref(), Some("b"));
}

// =========================================================================
// DRAGON filtering
// =========================================================================

#[tokio::test]
async fn test_dragon_hides_covered_prefix_from_peers() {
    let network = MemoryNetwork::new();
    let a = network.spawn_node("a", "g.a", vec![peer("b"), peer("d"), peer("e")]);
    let b = network.spawn_node("b", "g.b", vec![peer("a")]);
    let d = network.spawn_node("d", "g.d", vec![peer("a"), child("c")]);
    let c = network.spawn_node("c", "g.b.sub", vec![parent("d")]);
    let e = network.spawn_node("e", "g.e", vec![peer("a")]);
    network.link(&a, "b", &b, "a").await;
    network.link(&a, "d", &d, "a").await;
    network.link(&d, "c", &c, "d").await;
    network.link(&a, "e", &e, "a").await;

    assert!(wait_until(CONVERGENCE, || a.next_hop("g.b.sub").as_deref() == Some("d")).await);
    assert!(wait_until(CONVERGENCE, || a.next_hop("g.b").as_deref() == Some("b")).await);
    assert!(wait_until(CONVERGENCE, || e.next_hop("g.b").as_deref() == Some("a")).await);

    // The specific prefix is covered by an equally preferred aggregate on a.
    assert!(wait_until(CONVERGENCE, || !has_prefix(&e, "g.b.sub")).await);
    let status = a.status().await;
    assert!(status.local_routes.contains_key("g.b.sub"));
    assert!(!status.forwarding_routes.contains_key("g.b.sub"));
    // Traffic still reaches a, which forwards on the specific route.
    assert_eq!(e.next_hop("g.b.sub.x").as_deref(), Some("a"));
}

// =========================================================================
// Resynchronization
// =========================================================================

async fn receiver_table(node: &TestNode, account: &str) -> Option<Uuid> {
    node.status()
        .await
        .peers
        .into_iter()
        .find(|peer| peer.account.as_str() == account)
        .and_then(|peer| peer.receiver)
        .map(|receiver| receiver.routing_table_id)
}

#[tokio::test]
async fn test_peer_reconnect_after_disconnect() {
    let network = MemoryNetwork::new();
    let a = network.spawn_node("a", "g.a", vec![peer("b")]);
    let b = network.spawn_node("b", "g.b", vec![peer("a")]);
    network.link(&a, "b", &b, "a").await;
    assert!(wait_until(CONVERGENCE, || has_prefix(&a, "g.b")).await);

    network.unlink(&a, "b", &b, "a").await;
    assert!(wait_until(CONVERGENCE, || !has_prefix(&a, "g.b")).await);
    assert!(wait_until(CONVERGENCE, || !has_prefix(&b, "g.a")).await);

    network.link(&a, "b", &b, "a").await;
    assert!(wait_until(CONVERGENCE, || has_prefix(&a, "g.b")).await);
    assert!(wait_until(CONVERGENCE, || has_prefix(&b, "g.a")).await);
}

#[tokio::test]
async fn test_restarted_peer_resyncs() {
    let network = MemoryNetwork::new();
    let a = network.spawn_node("a", "g.a", vec![peer("b")]);
    let b = network.spawn_node("b", "g.b", vec![peer("a"), peer("x")]);
    let x = network.spawn_node("x", "g.x", vec![peer("b")]);
    network.link(&a, "b", &b, "a").await;
    network.link(&b, "x", &x, "b").await;
    assert!(wait_until(CONVERGENCE, || has_prefix(&a, "g.x")).await);
    let old_table = b.status().await.routing_table_id;

    // b restarts without a noticing a disconnect, and without x this time.
    network.shutdown(&b).await;
    let b = network.spawn_node("b", "g.b", vec![peer("a")]);
    network.link(&a, "b", &b, "a").await;
    let new_table = b.status().await.routing_table_id;
    assert_ne!(old_table, new_table);

    let node = &a;
    assert!(eventually(CONVERGENCE, move || async move { receiver_table(node, "b").await == Some(new_table) }).await);
    assert!(wait_until(CONVERGENCE, || !has_prefix(&a, "g.x")).await);
    assert_eq!(a.next_hop("g.b").as_deref(), Some("b"));
}

#[tokio::test]
async fn test_routes_expire_without_heartbeats() {
    let network = MemoryNetwork::new();
    let a = network.spawn_node_with("a", "g.a", vec![peer("b")], |config| {
        config.cleanup_interval = Duration::from_millis(50);
    });
    let b = network.spawn_node_with("b", "g.b", vec![peer("a")], |config| {
        config.broadcast_interval = Duration::from_millis(300);
        config.route_expiry = Duration::from_millis(900);
    });
    network.link(&a, "b", &b, "a").await;
    assert!(wait_until(CONVERGENCE, || has_prefix(&a, "g.b")).await);

    // Heartbeats keep the routes alive past the hold-down time.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(has_prefix(&a, "g.b"));

    // b goes silent without a being told.
    network.shutdown(&b).await;
    assert!(wait_until(CONVERGENCE, || !has_prefix(&a, "g.b")).await);
}
