use chrono::{DateTime, Utc};
use meridian_core::AccountId;
use uuid::Uuid;

use crate::message::{Mode, RouteControlRequest, RouteUpdateRequest};
use crate::prefix_map::PrefixMap;
use crate::route::IncomingRoute;
use crate::task::ScheduledTask;

/// Outcome of applying a route update from a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceivedUpdate {
    /// Routes were applied; lists the prefixes whose route actually changed.
    Applied { changed: Vec<String> },
    /// No route changes; epoch advanced.
    Heartbeat,
    /// The update starts after the epoch we expect; nothing applied.
    Gap { expected: u32 },
    /// The update ends before the epoch we expect; nothing applied.
    Stale,
}

impl ReceivedUpdate {
    pub fn changed_prefixes(&self) -> &[String] {
        match self {
            Self::Applied { changed } => changed,
            _ => &[],
        }
    }
}

/// Per-peer state for routes learned from that peer.
#[derive(Debug)]
pub struct CcpReceiver {
    account: AccountId,
    routing_table_id: Uuid,
    epoch: u32,
    routes: PrefixMap<IncomingRoute>,
    expiry: DateTime<Utc>,
    retry: Option<ScheduledTask>,
}

impl CcpReceiver {
    pub fn new(account: AccountId) -> Self {
        Self {
            account,
            routing_table_id: Uuid::nil(),
            epoch: 0,
            routes: PrefixMap::new(),
            expiry: DateTime::<Utc>::MIN_UTC,
            retry: None,
        }
    }

    pub fn account(&self) -> &AccountId {
        &self.account
    }

    pub fn routing_table_id(&self) -> Uuid {
        self.routing_table_id
    }

    /// Next epoch expected from the peer.
    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    pub fn expiry(&self) -> DateTime<Utc> {
        self.expiry
    }

    /// Route learned from this peer for exactly `prefix`.
    pub fn get_prefix(&self, prefix: &str) -> Option<&IncomingRoute> {
        self.routes.get(prefix)
    }

    pub fn prefixes(&self) -> Vec<String> {
        self.routes.keys().map(str::to_string).collect()
    }

    pub fn routes(&self) -> &PrefixMap<IncomingRoute> {
        &self.routes
    }

    /// Extend the hold-down deadline; never moves it backwards.
    pub fn bump(&mut self, hold_down_time_ms: u32, now: DateTime<Utc>) {
        let deadline = now + chrono::Duration::milliseconds(i64::from(hold_down_time_ms));
        self.expiry = self.expiry.max(deadline);
    }

    /// Apply one route update from the peer.
    pub fn handle_route_update(&mut self, update: RouteUpdateRequest, now: DateTime<Utc>) -> ReceivedUpdate {
        self.bump(update.hold_down_time, now);

        if self.routing_table_id != update.routing_table_id {
            tracing::debug!(
                account = %self.account,
                old = %self.routing_table_id,
                new = %update.routing_table_id,
                "saw new routing table"
            );
            self.routing_table_id = update.routing_table_id;
            self.epoch = 0;
        }

        if update.from_epoch_index > self.epoch {
            tracing::debug!(
                account = %self.account,
                expected = self.epoch,
                from = update.from_epoch_index,
                "gap in route updates"
            );
            return ReceivedUpdate::Gap { expected: self.epoch };
        }

        if self.epoch > update.to_epoch_index {
            tracing::trace!(
                account = %self.account,
                epoch = self.epoch,
                to = update.to_epoch_index,
                "stale route update, ignoring"
            );
            return ReceivedUpdate::Stale;
        }

        if update.is_heartbeat() {
            tracing::trace!(account = %self.account, epoch = update.to_epoch_index, "pure heartbeat");
            self.epoch = update.to_epoch_index;
            return ReceivedUpdate::Heartbeat;
        }

        let mut changed = Vec::new();
        for prefix in update.withdrawn_routes {
            if self.routes.delete(&prefix).is_some() {
                changed.push(prefix);
            }
        }
        for route in update.new_routes {
            let incoming = IncomingRoute::from_broadcast(self.account.clone(), route);
            if self.routes.get(&incoming.prefix) != Some(&incoming) {
                let prefix = incoming.prefix.clone();
                self.routes.insert(prefix.clone(), incoming);
                if !changed.contains(&prefix) {
                    changed.push(prefix);
                }
            }
        }

        self.epoch = update.to_epoch_index;
        tracing::trace!(
            account = %self.account,
            epoch = self.epoch,
            changed = changed.len(),
            "applied route update"
        );
        ReceivedUpdate::Applied { changed }
    }

    /// The route control request describing what we already have.
    pub fn route_control_request(&self) -> RouteControlRequest {
        RouteControlRequest {
            mode: Mode::Sync,
            last_known_routing_table_id: self.routing_table_id,
            last_known_epoch: self.epoch,
            features: Vec::new(),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry < now
    }

    /// Drop every learned route and forget the sync position.
    ///
    /// Returns the prefixes that were removed.
    pub fn expire(&mut self) -> Vec<String> {
        let prefixes = self.prefixes();
        self.routes = PrefixMap::new();
        self.routing_table_id = Uuid::nil();
        self.epoch = 0;
        prefixes
    }

    pub fn set_retry(&mut self, task: ScheduledTask) {
        self.retry = Some(task);
    }

    pub fn cancel_retry(&mut self) {
        if let Some(task) = self.retry.take() {
            task.cancel();
        }
    }
}
