//! CCP over HTTP.
//!
//! Route control and route update messages are posted as JSON to the peer's
//! `/ccp/*` endpoints. Connectivity is derived from periodic probes of the
//! peer's health endpoint.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashSet;
use serde::Serialize;

use meridian_core::AccountId;
use meridian_routing::{CcpTransport, RouteControlRequest, RouteUpdateRequest, RoutingError};

use crate::config::MeridianConfig;

/// Header carrying the sender's account id as known by the receiver.
pub const ACCOUNT_HEADER: &str = "x-meridian-account";

#[derive(Debug, Clone)]
struct PeerEndpoint {
    url: String,
    remote_account_id: String,
}

/// HTTP implementation of [`CcpTransport`].
pub struct HttpTransport {
    client: reqwest::Client,
    endpoints: HashMap<AccountId, PeerEndpoint>,
    connected: DashSet<AccountId>,
}

impl HttpTransport {
    /// Build a transport for every configured account that has a URL.
    pub fn from_config(config: &MeridianConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.transport.request_timeout_ms))
            .build()?;

        let endpoints = config
            .accounts
            .iter()
            .filter_map(|account| {
                let url = account.url.as_ref()?;
                Some((
                    AccountId::from(account.id.as_str()),
                    PeerEndpoint {
                        url: url.trim_end_matches('/').to_string(),
                        remote_account_id: account.remote_id(&config.node.address),
                    },
                ))
            })
            .collect();

        Ok(Self {
            client,
            endpoints,
            connected: DashSet::new(),
        })
    }

    /// Accounts this transport can reach.
    pub fn accounts(&self) -> Vec<AccountId> {
        let mut accounts: Vec<AccountId> = self.endpoints.keys().cloned().collect();
        accounts.sort();
        accounts
    }

    /// Probe one peer's health endpoint and record the result.
    ///
    /// Returns `Some(connected)` when the connection state changed.
    pub async fn probe(&self, account: &AccountId) -> Option<bool> {
        let endpoint = self.endpoints.get(account)?;
        let url = format!("{}/api/v1/health", endpoint.url);
        let up = match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::trace!(%account, error = %e, "health probe failed");
                false
            }
        };

        let changed = if up {
            self.connected.insert(account.clone())
        } else {
            self.connected.remove(account).is_some()
        };
        changed.then_some(up)
    }

    async fn post<T: Serialize>(&self, account: &AccountId, path: &str, body: &T) -> Result<(), RoutingError> {
        let endpoint = self
            .endpoints
            .get(account)
            .ok_or_else(|| RoutingError::UnknownAccount { account: account.clone() })?;
        let url = format!("{}{}", endpoint.url, path);

        let response = self
            .client
            .post(&url)
            .header(ACCOUNT_HEADER, &endpoint.remote_account_id)
            .json(body)
            .send()
            .await
            .map_err(|e| RoutingError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let detail = response.text().await.unwrap_or_default();
            Err(RoutingError::Transport(format!("{} returned {}: {}", url, status, detail)))
        }
    }
}

#[async_trait]
impl CcpTransport for HttpTransport {
    fn is_connected(&self, account: &AccountId) -> bool {
        self.connected.contains(account)
    }

    async fn send_route_control(
        &self,
        account: &AccountId,
        request: RouteControlRequest,
    ) -> Result<(), RoutingError> {
        self.post(account, "/ccp/route-control", &request).await
    }

    async fn send_route_update(
        &self,
        account: &AccountId,
        request: RouteUpdateRequest,
    ) -> Result<(), RoutingError> {
        self.post(account, "/ccp/route-update", &request).await
    }
}
