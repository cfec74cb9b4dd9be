use async_trait::async_trait;
use meridian_core::AccountId;

use crate::error::RoutingError;
use crate::message::{RouteControlRequest, RouteUpdateRequest};

/// Transport interface for exchanging CCP messages with connected accounts.
///
/// Each implementation bridges the routing service to a concrete link
/// (HTTP, an in-process channel, a plugin, etc.). Sends resolve once the peer
/// has accepted or rejected the message; retries, encoding and encryption are
/// the implementation's concern.
#[async_trait]
pub trait CcpTransport: Send + Sync {
    /// Whether the link to `account` is currently up.
    fn is_connected(&self, account: &AccountId) -> bool;

    /// Ask `account` to start or pause sending us route updates.
    async fn send_route_control(
        &self,
        account: &AccountId,
        request: RouteControlRequest,
    ) -> Result<(), RoutingError>;

    /// Deliver a batch of route changes to `account`.
    async fn send_route_update(
        &self,
        account: &AccountId,
        request: RouteUpdateRequest,
    ) -> Result<(), RoutingError>;
}
