//! CCP wire messages exchanged between directly connected peers.
//!
//! Route control flows from the route receiver to the route sender and
//! (re)starts or pauses synchronization. Route updates flow the other way and
//! carry one contiguous epoch range of the sender's forwarding log.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::route::BroadcastRoute;

/// Synchronization mode requested by a route receiver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mode {
    /// Do not send route updates.
    #[default]
    Idle,
    /// Send route updates continuously.
    Sync,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => f.write_str("IDLE"),
            Self::Sync => f.write_str("SYNC"),
        }
    }
}

/// Request asking a sender to synchronize from a given epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteControlRequest {
    pub mode: Mode,
    pub last_known_routing_table_id: Uuid,
    pub last_known_epoch: u32,
    #[serde(default)]
    pub features: Vec<String>,
}

/// A batch of new and withdrawn routes for the range `[from, to)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteUpdateRequest {
    /// Address of the advertising node.
    pub speaker: String,
    pub routing_table_id: Uuid,
    /// Milliseconds the receiver keeps these routes without a refresh.
    pub hold_down_time: u32,
    pub current_epoch_index: u32,
    pub from_epoch_index: u32,
    pub to_epoch_index: u32,
    #[serde(default)]
    pub new_routes: Vec<BroadcastRoute>,
    #[serde(default)]
    pub withdrawn_routes: Vec<String>,
}

impl RouteUpdateRequest {
    /// Returns true if the update carries no route changes.
    pub fn is_heartbeat(&self) -> bool {
        self.new_routes.is_empty() && self.withdrawn_routes.is_empty()
    }
}
