use std::time::Duration;

use meridian_core::AccountId;
use serde::{Deserialize, Serialize};

use crate::relation::RelationPolicy;
use crate::route::RoutingSecret;

/// Which account the default route for the global prefix points at.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DefaultRoute {
    /// The first parent account by id, if any.
    #[default]
    Auto,
    /// No default route.
    Disabled,
    /// A specific account.
    Account(AccountId),
}

impl DefaultRoute {
    /// Parse the configured value: `"auto"`, empty for none, or an account id.
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "auto" => Self::Auto,
            "" => Self::Disabled,
            other => Self::Account(AccountId::from(other)),
        }
    }
}

/// A configured route that overrides anything learned from peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticRoute {
    pub target_prefix: String,
    pub peer_id: AccountId,
}

/// Configuration for the route broadcaster.
#[derive(Debug, Clone)]
pub struct BroadcasterConfig {
    /// This node's address; also the first hop of every exported path.
    pub own_address: String,
    /// Prefix that every importable or exportable route must extend.
    pub global_prefix: String,
    /// When false, received route changes never trigger outgoing updates.
    pub broadcast_enabled: bool,
    /// Heartbeat period per peer; also the timeout for CCP sends.
    pub broadcast_interval: Duration,
    /// Hold-down time advertised to peers.
    pub route_expiry: Duration,
    /// How often receivers are checked for expired routes.
    pub cleanup_interval: Duration,
    /// Delay before retrying a failed route control request.
    pub route_control_retry: Duration,
    pub default_route: DefaultRoute,
    pub static_routes: Vec<StaticRoute>,
    pub relation_policy: RelationPolicy,
    /// Key for route auth values. A random one is generated when absent.
    pub routing_secret: Option<RoutingSecret>,
}

impl BroadcasterConfig {
    /// Hold-down time in milliseconds as carried in route updates.
    pub fn hold_down_time_ms(&self) -> u32 {
        u32::try_from(self.route_expiry.as_millis()).unwrap_or(u32::MAX)
    }
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            own_address: "g.local".into(),
            global_prefix: "g".into(),
            broadcast_enabled: true,
            broadcast_interval: Duration::from_secs(30),
            route_expiry: Duration::from_secs(45),
            cleanup_interval: Duration::from_secs(1),
            route_control_retry: Duration::from_secs(30),
            default_route: DefaultRoute::Auto,
            static_routes: Vec::new(),
            relation_policy: RelationPolicy::default(),
            routing_secret: None,
        }
    }
}
