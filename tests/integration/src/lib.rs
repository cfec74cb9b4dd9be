//! In-memory test network for routing services.
//!
//! Each [`TestNode`] runs a real [`RoutingService`]; their transports deliver
//! CCP messages by calling the receiving node's [`RoutingHandle`] directly.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use meridian_core::{AccountId, AccountInfo};
use meridian_routing::{
    AccountRegistry, BroadcasterConfig, CcpTransport, Route, RouteControlRequest, RouteUpdateRequest,
    RoutingError, RoutingHandle, RoutingSecret, RoutingService, RoutingStatus,
};

/// Where messages sent to a local account end up.
#[derive(Debug, Clone)]
struct Link {
    /// Name of the remote node.
    node: String,
    /// The id the remote node knows us by.
    account: AccountId,
}

/// Registry of running nodes, keyed by name.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    nodes: Arc<DashMap<String, RoutingHandle>>,
}

/// Transport delivering CCP messages to other nodes of a [`MemoryNetwork`].
pub struct MemoryTransport {
    network: MemoryNetwork,
    links: DashMap<AccountId, Link>,
}

impl MemoryTransport {
    fn target(&self, account: &AccountId) -> Result<(RoutingHandle, AccountId), RoutingError> {
        let link = self
            .links
            .get(account)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| RoutingError::Transport(format!("no link to {}", account)))?;
        let handle = self
            .network
            .nodes
            .get(&link.node)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| RoutingError::Transport(format!("node {} is down", link.node)))?;
        Ok((handle, link.account))
    }
}

#[async_trait]
impl CcpTransport for MemoryTransport {
    fn is_connected(&self, account: &AccountId) -> bool {
        self.links.contains_key(account)
    }

    async fn send_route_control(
        &self,
        account: &AccountId,
        request: RouteControlRequest,
    ) -> Result<(), RoutingError> {
        let (handle, from) = self.target(account)?;
        handle.handle_route_control(from, request).await
    }

    async fn send_route_update(
        &self,
        account: &AccountId,
        request: RouteUpdateRequest,
    ) -> Result<(), RoutingError> {
        let (handle, from) = self.target(account)?;
        handle.handle_route_update(from, request).await
    }
}

/// A routing service running inside a [`MemoryNetwork`].
pub struct TestNode {
    pub name: String,
    pub address: String,
    pub handle: RoutingHandle,
    pub accounts: Arc<AccountRegistry>,
    transport: Arc<MemoryTransport>,
}

impl TestNode {
    pub fn resolve(&self, address: &str) -> Option<Route> {
        self.handle.resolve(address)
    }

    /// Next hop for `address`, as a plain string.
    pub fn next_hop(&self, address: &str) -> Option<String> {
        self.resolve(address).map(|route| route.next_hop.to_string())
    }

    pub async fn status(&self) -> RoutingStatus {
        self.handle.status().await.expect("routing service running")
    }
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a node with default broadcaster settings.
    pub fn spawn_node(&self, name: &str, address: &str, accounts: Vec<AccountInfo>) -> TestNode {
        self.spawn_node_with(name, address, accounts, |_| {})
    }

    /// Start a node, letting the caller adjust its broadcaster settings.
    pub fn spawn_node_with<F>(&self, name: &str, address: &str, accounts: Vec<AccountInfo>, configure: F) -> TestNode
    where
        F: FnOnce(&mut BroadcasterConfig),
    {
        let mut config = BroadcasterConfig {
            own_address: address.to_string(),
            routing_secret: Some(RoutingSecret::generate()),
            broadcast_interval: Duration::from_secs(5),
            route_control_retry: Duration::from_millis(200),
            ..BroadcasterConfig::default()
        };
        configure(&mut config);

        let accounts = Arc::new(AccountRegistry::from_accounts(accounts));
        let transport = Arc::new(MemoryTransport {
            network: self.clone(),
            links: DashMap::new(),
        });
        let handle = RoutingService::spawn(config, Arc::clone(&accounts), transport.clone());
        self.nodes.insert(name.to_string(), handle.clone());
        tracing::debug!(name, address, "spawned test node");

        TestNode {
            name: name.to_string(),
            address: address.to_string(),
            handle,
            accounts,
            transport,
        }
    }

    /// Connect `a` and `b`. `a_account` is `b`'s id on `a`, and the reverse.
    pub async fn link(&self, a: &TestNode, a_account: &str, b: &TestNode, b_account: &str) {
        a.transport.links.insert(
            AccountId::from(a_account),
            Link {
                node: b.name.clone(),
                account: AccountId::from(b_account),
            },
        );
        b.transport.links.insert(
            AccountId::from(b_account),
            Link {
                node: a.name.clone(),
                account: AccountId::from(a_account),
            },
        );
        a.handle
            .account_connected(AccountId::from(a_account))
            .await
            .expect("routing service running");
        b.handle
            .account_connected(AccountId::from(b_account))
            .await
            .expect("routing service running");
    }

    /// Disconnect `a` and `b`.
    pub async fn unlink(&self, a: &TestNode, a_account: &str, b: &TestNode, b_account: &str) {
        a.transport.links.remove(&AccountId::from(a_account));
        b.transport.links.remove(&AccountId::from(b_account));
        // Either side may already be shut down.
        let _ = a.handle.account_disconnected(AccountId::from(a_account)).await;
        let _ = b.handle.account_disconnected(AccountId::from(b_account)).await;
    }

    /// Stop a node and remove it from the network.
    pub async fn shutdown(&self, node: &TestNode) {
        self.nodes.remove(&node.name);
        node.handle.shutdown().await.expect("routing service running");
    }
}

/// Poll `check` until it returns true or `timeout` passes.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

/// Poll a synchronous `check` until it returns true or `timeout` passes.
pub async fn wait_until<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    eventually(timeout, || std::future::ready(check())).await
}

/// Default timeout for convergence in tests.
pub const CONVERGENCE: Duration = Duration::from_secs(5);
