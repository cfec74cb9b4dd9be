use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use meridian_core::AccountId;
use serde::Serialize;
use uuid::Uuid;

use crate::forwarding::RouteUpdate;
use crate::message::Mode;
use crate::route::Route;

/// Point-in-time view of the routing state, for operators.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingStatus {
    pub own_address: String,
    pub routing_table_id: Uuid,
    pub current_epoch: u32,
    /// Best route per prefix, as used for forwarding decisions.
    pub local_routes: BTreeMap<String, Route>,
    /// Routes currently advertised to peers.
    pub forwarding_routes: BTreeMap<String, Route>,
    pub log: Vec<RouteUpdate>,
    pub peers: Vec<PeerStatus>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerStatus {
    pub account: AccountId,
    pub sender: Option<SenderStatus>,
    pub receiver: Option<ReceiverStatus>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SenderStatus {
    pub mode: Mode,
    pub last_known_epoch: u32,
    pub last_update: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiverStatus {
    pub routing_table_id: Uuid,
    pub epoch: u32,
    pub expiry: DateTime<Utc>,
    pub prefixes: Vec<String>,
}
