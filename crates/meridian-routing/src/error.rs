use meridian_core::AccountId;

/// Errors that can occur within the routing layer.
#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    #[error("account {account} is not a routing peer")]
    NotAPeer { account: AccountId },

    #[error("routes are not sent to {account}")]
    NotSendingRoutes { account: AccountId },

    #[error("routes are not received from {account}")]
    NotReceivingRoutes { account: AccountId },

    #[error("unknown account: {account}")]
    UnknownAccount { account: AccountId },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("request to {account} timed out after {timeout_ms}ms")]
    Timeout { account: AccountId, timeout_ms: u64 },

    #[error("routing service stopped")]
    ServiceStopped,

    #[error("relation priorities must satisfy child > peer > parent, got parent={parent} peer={peer} child={child}")]
    InvalidRelationPolicy { parent: i32, peer: i32, child: i32 },

    #[error("routing secret must be 32 hex-encoded bytes: {reason}")]
    InvalidRoutingSecret { reason: String },
}
