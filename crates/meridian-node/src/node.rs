//! The Meridian node orchestrator.
//!
//! Ties together the account registry, the HTTP transport, the routing
//! service and the HTTP API. The main loop probes peers and feeds
//! connect/disconnect events into the routing service.

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use meridian_routing::{AccountRegistry, RoutingHandle, RoutingService};

use crate::api::ApiState;
use crate::config::MeridianConfig;
use crate::transport::HttpTransport;

/// A routing node.
pub struct MeridianNode {
    /// Node configuration.
    config: MeridianConfig,
    /// Configured accounts, shared with the routing service.
    accounts: Arc<AccountRegistry>,
    /// Peer transport, shared with the routing service.
    transport: Arc<HttpTransport>,
    /// Handle to the routing service (None until started).
    routing: Option<RoutingHandle>,
}

impl MeridianNode {
    /// Create a new node with the given config.
    pub fn new(config: MeridianConfig) -> Result<Self> {
        let accounts = Arc::new(AccountRegistry::from_accounts(config.account_infos()?));
        let transport = Arc::new(HttpTransport::from_config(&config)?);

        tracing::info!(
            address = %config.node.address,
            accounts = accounts.len(),
            "Meridian node created"
        );

        Ok(Self {
            config,
            accounts,
            transport,
            routing: None,
        })
    }

    /// Start the routing service and the HTTP API.
    pub async fn start(&mut self) -> Result<()> {
        tracing::info!("starting Meridian node");

        let broadcaster_config = self.config.broadcaster_config()?;
        let routing = RoutingService::spawn(
            broadcaster_config,
            Arc::clone(&self.accounts),
            self.transport.clone(),
        );

        let api_addr: SocketAddr = self.config.api_addr().parse()?;
        let api_state = Arc::new(ApiState {
            routing: routing.clone(),
            own_address: self.config.node.address.clone(),
            start_time: Instant::now(),
        });
        tokio::spawn(async move {
            if let Err(e) = crate::api::start_api_server(api_addr, api_state).await {
                tracing::error!(error = %e, "HTTP API server error");
            }
        });

        self.routing = Some(routing);
        Ok(())
    }

    /// Run the node's main loop: probe peers and report connectivity changes.
    pub async fn run(&mut self) -> Result<()> {
        let routing = self
            .routing
            .clone()
            .ok_or_else(|| anyhow::anyhow!("node not started"))?;
        let peers = self.transport.accounts();
        let mut probe = tokio::time::interval(Duration::from_millis(self.config.transport.probe_interval_ms));

        tracing::info!(peers = peers.len(), "entering main event loop");

        loop {
            probe.tick().await;
            let results = futures::future::join_all(peers.iter().map(|account| self.transport.probe(account))).await;
            for (account, change) in peers.iter().zip(results) {
                let Some(connected) = change else {
                    continue;
                };
                let sent = if connected {
                    tracing::info!(%account, "peer connected");
                    routing.account_connected(account.clone()).await
                } else {
                    tracing::info!(%account, "peer disconnected");
                    routing.account_disconnected(account.clone()).await
                };
                if sent.is_err() {
                    tracing::info!("routing service stopped, leaving main loop");
                    return Ok(());
                }
            }
        }
    }

    /// Gracefully shut down the node.
    pub async fn shutdown(&mut self) -> Result<()> {
        tracing::info!("shutting down Meridian node");
        if let Some(routing) = self.routing.take() {
            routing.shutdown().await?;
        }
        tracing::info!("Meridian node shut down");
        Ok(())
    }

    /// Handle to the running routing service, if started.
    pub fn routing(&self) -> Option<&RoutingHandle> {
        self.routing.as_ref()
    }
}
