use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use meridian_core::{AccountId, Relation};
use uuid::Uuid;

use crate::forwarding::ForwardingRoutingTable;
use crate::message::{Mode, RouteControlRequest, RouteUpdateRequest};
use crate::route::{BroadcastRoute, Route};
use crate::task::ScheduledTask;

/// Lower bound between two route updates to the same peer.
pub const MINIMUM_UPDATE_INTERVAL: Duration = Duration::from_millis(150);

/// Maximum number of log epochs carried by a single route update.
pub const MAX_EPOCHS_PER_UPDATE: usize = 50;

/// A route update that has been built and is waiting on the transport.
#[derive(Debug, Clone)]
pub struct PendingUpdate {
    pub request: RouteUpdateRequest,
    /// Epoch to roll back to if the send fails.
    pub previous_epoch: u32,
    /// Epoch the sender advanced to when the update was built.
    pub sent_epoch: u32,
}

/// Per-peer state for advertising our forwarding table to that peer.
#[derive(Debug)]
pub struct CcpSender {
    account: AccountId,
    mode: Mode,
    last_known_epoch: u32,
    last_update: Option<DateTime<Utc>>,
    in_flight: bool,
    timer: Option<ScheduledTask>,
}

impl CcpSender {
    pub fn new(account: AccountId) -> Self {
        Self {
            account,
            mode: Mode::Idle,
            last_known_epoch: 0,
            last_update: None,
            in_flight: false,
            timer: None,
        }
    }

    pub fn account(&self) -> &AccountId {
        &self.account
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Next epoch the peer wants from us.
    pub fn last_known_epoch(&self) -> u32 {
        self.last_known_epoch
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.last_update
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Adopt the mode and position requested by the peer.
    ///
    /// A peer that last synced against a different routing table id starts
    /// over from epoch 0. Returns true if updates should now be scheduled.
    pub fn handle_route_control(&mut self, request: &RouteControlRequest, routing_table_id: Uuid) -> bool {
        if self.mode != request.mode {
            tracing::debug!(
                account = %self.account,
                from = %self.mode,
                to = %request.mode,
                "peer requested changing routing mode"
            );
        }
        self.mode = request.mode;

        if request.last_known_routing_table_id != routing_table_id {
            tracing::debug!(
                account = %self.account,
                theirs = %request.last_known_routing_table_id,
                ours = %routing_table_id,
                "peer has old routing table id, resetting epoch"
            );
            self.last_known_epoch = 0;
        } else {
            tracing::trace!(account = %self.account, epoch = request.last_known_epoch, "peer epoch set");
            self.last_known_epoch = request.last_known_epoch;
        }

        if self.mode == Mode::Sync {
            true
        } else {
            self.cancel_timer();
            false
        }
    }

    /// Delay before the next route update should go out.
    pub fn next_delay(&self, now: DateTime<Utc>, current_epoch: u32, broadcast_interval: Duration) -> Duration {
        let delay = if self.last_known_epoch < current_epoch {
            Duration::ZERO
        } else {
            let elapsed = self
                .last_update
                .and_then(|last| (now - last).to_std().ok())
                .unwrap_or(broadcast_interval);
            broadcast_interval.saturating_sub(elapsed)
        };
        delay.max(MINIMUM_UPDATE_INTERVAL)
    }

    /// Record that an update attempt is being made now.
    pub fn mark_attempt(&mut self, now: DateTime<Utc>) {
        self.last_update = Some(now);
    }

    /// Build the next route update and optimistically advance the epoch.
    ///
    /// Routes are withdrawn instead of advertised when their next hop is this
    /// peer, or when this peer is a parent and the next hop is a peer or a
    /// parent. Only the latest entry per prefix in the slice is sent.
    pub fn build_route_update<F>(
        &mut self,
        table: &ForwardingRoutingTable,
        own_address: &str,
        hold_down_time: u32,
        relation_of: F,
    ) -> PendingUpdate
    where
        F: Fn(&AccountId) -> Option<Relation>,
    {
        let from_epoch = self.last_known_epoch;
        let entries = table.log_slice(from_epoch, MAX_EPOCHS_PER_UPDATE);
        let to_epoch = from_epoch + entries.len() as u32;
        let to_parent = relation_of(&self.account) == Some(Relation::Parent);

        let mut order: Vec<&str> = Vec::new();
        let mut latest: HashMap<&str, Option<&Route>> = HashMap::new();
        for entry in entries {
            let route = entry.route.as_ref().filter(|route| {
                let own_route = route.next_hop == self.account;
                let provider_filtered = to_parent
                    && matches!(
                        relation_of(&route.next_hop),
                        Some(Relation::Peer) | Some(Relation::Parent)
                    );
                !own_route && !provider_filtered
            });
            if latest.insert(entry.prefix.as_str(), route).is_none() {
                order.push(entry.prefix.as_str());
            }
        }

        let mut new_routes = Vec::new();
        let mut withdrawn_routes = Vec::new();
        for prefix in order {
            match latest.get(prefix).copied().flatten() {
                Some(route) => new_routes.push(BroadcastRoute::from_route(prefix, route)),
                None => withdrawn_routes.push(prefix.to_string()),
            }
        }

        tracing::trace!(
            account = %self.account,
            from = from_epoch,
            to = to_epoch,
            new = new_routes.len(),
            withdrawn = withdrawn_routes.len(),
            "built route update"
        );

        let request = RouteUpdateRequest {
            speaker: own_address.to_string(),
            routing_table_id: table.routing_table_id(),
            hold_down_time,
            current_epoch_index: table.current_epoch(),
            from_epoch_index: from_epoch,
            to_epoch_index: to_epoch,
            new_routes,
            withdrawn_routes,
        };

        self.last_known_epoch = to_epoch;
        self.in_flight = true;
        PendingUpdate {
            request,
            previous_epoch: from_epoch,
            sent_epoch: to_epoch,
        }
    }

    /// Settle an in-flight update; on failure the same range is resent next time.
    ///
    /// The rollback is skipped when a route control moved the epoch while the
    /// update was in flight.
    pub fn finish_update(&mut self, previous_epoch: u32, sent_epoch: u32, succeeded: bool) {
        self.in_flight = false;
        if !succeeded && self.last_known_epoch == sent_epoch {
            self.last_known_epoch = previous_epoch;
        }
    }

    pub fn set_timer(&mut self, task: ScheduledTask) {
        self.timer = Some(task);
    }

    pub fn cancel_timer(&mut self) {
        if let Some(task) = self.timer.take() {
            task.cancel();
        }
    }

    pub fn has_timer(&self) -> bool {
        self.timer.is_some()
    }

    /// Stop all scheduled work for this peer.
    pub fn stop(&mut self) {
        self.cancel_timer();
        self.mode = Mode::Idle;
    }
}
