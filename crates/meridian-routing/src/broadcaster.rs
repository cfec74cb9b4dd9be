use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use meridian_core::{child_address, is_covered_by, AccountId, Relation};

use crate::accounts::AccountRegistry;
use crate::config::{BroadcasterConfig, DefaultRoute};
use crate::error::RoutingError;
use crate::forwarding::ForwardingRoutingTable;
use crate::message::{Mode, RouteControlRequest, RouteUpdateRequest};
use crate::peer::Peer;
use crate::prefix_map::PrefixMap;
use crate::receiver::{CcpReceiver, ReceivedUpdate};
use crate::route::{Route, RoutingSecret};
use crate::service::{Mailbox, RoutingCommand};
use crate::status::{PeerStatus, ReceiverStatus, RoutingStatus, SenderStatus};
use crate::task::ScheduledTask;
use crate::transport::CcpTransport;

/// Owns all routing state of a node: the peers it exchanges routes with,
/// the local decision table and the forwarding table it exports.
///
/// Every method runs on the routing service task. Timers and transport
/// sends never touch this state directly; they post a [`RoutingCommand`]
/// back through the mailbox and the service calls the matching method.
pub struct RouteBroadcaster {
    config: BroadcasterConfig,
    secret: RoutingSecret,
    accounts: Arc<AccountRegistry>,
    transport: Arc<dyn CcpTransport>,
    mailbox: Mailbox,
    tracked: HashSet<AccountId>,
    peers: HashMap<AccountId, Peer>,
    /// Routes this node originates: its own address, the default route and
    /// one route per child account.
    local_routes: HashMap<String, Route>,
    /// Best route per prefix.
    routing_table: PrefixMap<Route>,
    forwarding: ForwardingRoutingTable,
    next_session: u64,
    table_version: u64,
}

impl RouteBroadcaster {
    pub(crate) fn new(
        config: BroadcasterConfig,
        accounts: Arc<AccountRegistry>,
        transport: Arc<dyn CcpTransport>,
        mailbox: Mailbox,
    ) -> Self {
        let secret = config.routing_secret.clone().unwrap_or_else(RoutingSecret::generate);
        Self {
            config,
            secret,
            accounts,
            transport,
            mailbox,
            tracked: HashSet::new(),
            peers: HashMap::new(),
            local_routes: HashMap::new(),
            routing_table: PrefixMap::new(),
            forwarding: ForwardingRoutingTable::new(),
            next_session: 0,
            table_version: 0,
        }
    }

    pub fn config(&self) -> &BroadcasterConfig {
        &self.config
    }

    pub fn routing_table(&self) -> &PrefixMap<Route> {
        &self.routing_table
    }

    pub fn forwarding_table(&self) -> &ForwardingRoutingTable {
        &self.forwarding
    }

    pub fn peer(&self, account: &AccountId) -> Option<&Peer> {
        self.peers.get(account)
    }

    pub fn is_tracked(&self, account: &AccountId) -> bool {
        self.tracked.contains(account)
    }

    /// Incremented every time the local routing table changes.
    pub fn table_version(&self) -> u64 {
        self.table_version
    }

    /// Best route for a destination address.
    pub fn resolve(&self, address: &str) -> Option<&Route> {
        self.routing_table.resolve(address)
    }

    /// Originate local routes and start tracking every configured account.
    pub fn start(&mut self) {
        tracing::info!(
            address = %self.config.own_address,
            routing_table_id = %self.forwarding.routing_table_id(),
            "starting route broadcaster"
        );
        self.reload_local_routes();
        for account in self.accounts.ids() {
            self.track(account);
        }
    }

    /// Stop every peer and forget all tracked accounts.
    pub fn stop(&mut self) {
        for (account, mut peer) in self.peers.drain() {
            tracing::debug!(%account, "stopping routing peer");
            peer.stop();
        }
        self.tracked.clear();
        tracing::info!("route broadcaster stopped");
    }

    /// Follow an account's connection state; adds it as a peer when connected.
    pub fn track(&mut self, account: AccountId) {
        if account.is_local() {
            return;
        }
        if !self.tracked.insert(account.clone()) {
            tracing::trace!(%account, "account already tracked");
            return;
        }
        tracing::debug!(%account, "tracking account");
        if self.transport.is_connected(&account) {
            self.add(&account);
        }
    }

    pub fn untrack(&mut self, account: &AccountId) {
        if !self.tracked.remove(account) {
            return;
        }
        tracing::debug!(%account, "no longer tracking account");
        self.remove(account);
        self.reload_local_routes();
    }

    pub fn account_connected(&mut self, account: &AccountId) {
        if self.tracked.contains(account) {
            self.add(account);
        }
    }

    pub fn account_disconnected(&mut self, account: &AccountId) {
        if self.tracked.contains(account) {
            self.remove(account);
        }
    }

    /// Create a peer for a connected account, or resync an existing one.
    pub fn add(&mut self, account: &AccountId) {
        let Some(info) = self.accounts.get(account) else {
            tracing::warn!(%account, "cannot add routing peer for unknown account");
            return;
        };
        let send_routes = info.sends_routes();
        let receive_routes = info.receives_routes();
        if !send_routes && !receive_routes {
            tracing::debug!(%account, relation = %info.relation, "not exchanging routes with account");
            return;
        }

        if let Some(peer) = self.peers.get(account) {
            if peer.receiver().is_some() {
                tracing::debug!(%account, "routing peer reconnected, requesting resync");
                self.send_route_control(account);
            }
            return;
        }

        if !self.transport.is_connected(account) {
            tracing::debug!(%account, "account not connected, not adding routing peer");
            return;
        }

        self.next_session += 1;
        let Some(peer) = Peer::new(account.clone(), self.next_session, send_routes, receive_routes) else {
            return;
        };
        tracing::info!(
            %account,
            relation = %info.relation,
            send_routes,
            receive_routes,
            "added routing peer"
        );
        self.peers.insert(account.clone(), peer);

        if receive_routes {
            self.send_route_control(account);
        }
        self.reload_local_routes();
    }

    /// Tear down a peer and recompute every prefix it provided.
    pub fn remove(&mut self, account: &AccountId) {
        let Some(mut peer) = self.peers.remove(account) else {
            return;
        };
        peer.stop();
        let mut prefixes = peer.receiver().map(CcpReceiver::prefixes).unwrap_or_default();
        drop(peer);
        tracing::info!(%account, routes = prefixes.len(), "removed routing peer");

        if self.accounts.relation(account) == Some(Relation::Child) {
            prefixes.push(child_address(&self.config.own_address, account));
        }
        self.update_prefixes(prefixes);
    }

    /// Apply a route control request from a peer that receives our routes.
    pub fn handle_route_control(
        &mut self,
        from: &AccountId,
        request: &RouteControlRequest,
    ) -> Result<(), RoutingError> {
        let routing_table_id = self.forwarding.routing_table_id();
        let peer = self
            .peers
            .get_mut(from)
            .ok_or_else(|| RoutingError::NotAPeer { account: from.clone() })?;
        let sender = peer
            .sender_mut()
            .ok_or_else(|| RoutingError::NotSendingRoutes { account: from.clone() })?;

        if sender.handle_route_control(request, routing_table_id) {
            self.schedule_route_update(from);
        }
        Ok(())
    }

    /// Import a route update from a peer we receive routes from.
    ///
    /// Routes outside the global prefix, and routes whose path already
    /// contains our address, are treated as withdrawn. An update under a new
    /// routing table id that starts at epoch 0 replaces everything learned
    /// from that peer.
    pub fn handle_route_update(
        &mut self,
        from: &AccountId,
        mut request: RouteUpdateRequest,
    ) -> Result<(), RoutingError> {
        let global_prefix = self.config.global_prefix.as_str();
        let own_address = self.config.own_address.as_str();
        let peer = self
            .peers
            .get_mut(from)
            .ok_or_else(|| RoutingError::NotAPeer { account: from.clone() })?;
        let receiver = peer
            .receiver_mut()
            .ok_or_else(|| RoutingError::NotReceivingRoutes { account: from.clone() })?;

        let mut rejected = Vec::new();
        request.new_routes.retain(|route| {
            if !is_covered_by(&route.prefix, global_prefix) || route.prefix.len() <= global_prefix.len() {
                tracing::debug!(account = %from, prefix = %route.prefix, "ignoring route outside the global prefix");
                rejected.push(route.prefix.clone());
                return false;
            }
            if route.traverses(own_address) {
                tracing::debug!(account = %from, prefix = %route.prefix, "ignoring route that contains our own address");
                rejected.push(route.prefix.clone());
                return false;
            }
            true
        });
        request.withdrawn_routes.extend(rejected);

        // A new table id starting from scratch means the peer restarted and its
        // old routes are stale. Anything else under another id is a gap or a
        // late message and leaves the routes in place until the resync.
        let mut changed = Vec::new();
        if receiver.routing_table_id() != request.routing_table_id
            && request.from_epoch_index == 0
            && !receiver.routes().is_empty()
        {
            tracing::info!(account = %from, "peer has a new routing table, dropping its old routes");
            changed = receiver.expire();
        }

        let outcome = receiver.handle_route_update(request, Utc::now());
        if let ReceivedUpdate::Gap { expected } = outcome {
            tracing::debug!(account = %from, expected, "requesting resync after gap");
            self.send_route_control(from);
        }
        changed.extend(outcome.changed_prefixes().iter().cloned());
        self.update_prefixes(changed);
        Ok(())
    }

    /// Rebuild the routes this node originates and recompute their prefixes.
    pub fn reload_local_routes(&mut self) {
        let own_address = self.config.own_address.clone();
        let global_prefix = self.config.global_prefix.clone();

        let mut local_routes = HashMap::new();
        local_routes.insert(
            own_address.clone(),
            Route::originate(AccountId::local(), &own_address, &self.secret),
        );
        if let Some(parent) = self.default_route_account() {
            tracing::debug!(account = %parent, prefix = %global_prefix, "using default route");
            let route = Route::originate(parent, &global_prefix, &self.secret);
            local_routes.insert(global_prefix, route);
        }
        for child in self.accounts.with_relation(Relation::Child) {
            let address = child_address(&own_address, &child);
            let route = Route::originate(child, &address, &self.secret);
            local_routes.insert(address, route);
        }

        let mut prefixes: Vec<String> = local_routes.keys().chain(self.local_routes.keys()).cloned().collect();
        prefixes.extend(self.config.static_routes.iter().map(|route| route.target_prefix.clone()));
        prefixes.sort();
        prefixes.dedup();

        self.local_routes = local_routes;
        self.update_prefixes(prefixes);
    }

    fn default_route_account(&self) -> Option<AccountId> {
        match &self.config.default_route {
            DefaultRoute::Auto => self.accounts.with_relation(Relation::Parent).into_iter().next(),
            DefaultRoute::Disabled => None,
            DefaultRoute::Account(account) if self.accounts.exists(account) => Some(account.clone()),
            DefaultRoute::Account(account) => {
                tracing::warn!(%account, "default route account does not exist");
                None
            }
        }
    }

    fn update_prefixes(&mut self, prefixes: impl IntoIterator<Item = String>) {
        let mut changed = false;
        for prefix in prefixes {
            changed |= self.update_prefix(&prefix);
        }
        if changed && self.config.broadcast_enabled {
            self.schedule_all_route_updates();
        }
    }

    /// Recompute the best route for `prefix`. Returns true if it changed.
    pub fn update_prefix(&mut self, prefix: &str) -> bool {
        let best = self.best_route_for_prefix(prefix);
        self.update_local_route(prefix, best)
    }

    /// Static route, then local route, then the best route offered by a peer.
    ///
    /// Peer routes are ranked by relation priority of the peer, then by path
    /// length, then by peer id.
    pub fn best_route_for_prefix(&self, prefix: &str) -> Option<Route> {
        if let Some(configured) = self.config.static_routes.iter().find(|r| r.target_prefix == prefix) {
            if self.accounts.exists(&configured.peer_id) {
                return Some(Route::originate(configured.peer_id.clone(), prefix, &self.secret));
            }
            tracing::warn!(prefix, account = %configured.peer_id, "ignoring static route to unknown account");
        }

        if let Some(local) = self.local_routes.get(prefix) {
            return Some(local.clone());
        }

        self.peers
            .values()
            .filter_map(|peer| peer.receiver()?.get_prefix(prefix))
            .map(|route| (self.priority(&route.peer), route))
            .min_by(|(a_priority, a), (b_priority, b)| {
                b_priority
                    .cmp(a_priority)
                    .then_with(|| a.path.len().cmp(&b.path.len()))
                    .then_with(|| a.peer.cmp(&b.peer))
            })
            .map(|(_, route)| route.to_route())
    }

    fn update_local_route(&mut self, prefix: &str, route: Option<Route>) -> bool {
        if self.routing_table.get(prefix) == route.as_ref() {
            return false;
        }
        match &route {
            Some(route) => {
                tracing::debug!(prefix, next_hop = %route.next_hop, "new best route for prefix");
                self.routing_table.insert(prefix, route.clone());
            }
            None => {
                tracing::debug!(prefix, "no more route available for prefix");
                self.routing_table.delete(prefix);
            }
        }
        self.table_version += 1;
        self.update_forwarding_route(prefix, route.as_ref());
        true
    }

    /// Export a local route change into the forwarding table.
    ///
    /// A change here can toggle the filtering of more specific prefixes, so
    /// those are re-evaluated from their local routes afterwards.
    fn update_forwarding_route(&mut self, prefix: &str, route: Option<&Route>) {
        let exported = route
            .map(|route| route.exported(&self.config.own_address))
            .filter(|exported| !self.is_export_suppressed(prefix, exported));

        if self.forwarding.get(prefix) == exported.as_ref() {
            return;
        }
        let withdrawn = exported.is_none();
        let epoch = self.forwarding.record(prefix, exported);
        tracing::debug!(prefix, epoch, withdrawn, "forwarding route changed");

        let more_specific: Vec<String> = self
            .routing_table
            .keys_starting_with(prefix)
            .filter(|key| *key != prefix)
            .map(str::to_string)
            .collect();
        for sub_prefix in more_specific {
            let local = self.routing_table.get(&sub_prefix).cloned();
            self.update_forwarding_route(&sub_prefix, local.as_ref());
        }
    }

    fn is_export_suppressed(&self, prefix: &str, exported: &Route) -> bool {
        let global_prefix = self.config.global_prefix.as_str();
        if !is_covered_by(prefix, global_prefix) || prefix == global_prefix {
            return true;
        }
        let own_customer = prefix
            .strip_prefix(self.config.own_address.as_str())
            .is_some_and(|rest| rest.starts_with('.'));
        if own_customer && exported.path.len() == 1 {
            return true;
        }
        self.can_dragon_filter(prefix, exported)
    }

    /// True if a less specific exported route already covers `prefix` with
    /// a next hop that is at least as preferred as `route`'s.
    pub fn can_dragon_filter(&self, prefix: &str, route: &Route) -> bool {
        let route_priority = self.priority(&route.next_hop);
        for (parent_prefix, parent_route) in self.forwarding.covering_prefixes(prefix) {
            if parent_route.next_hop.is_local() {
                continue;
            }
            if self.priority(&parent_route.next_hop) >= route_priority {
                tracing::trace!(prefix, parent_prefix, "applied DRAGON route filter");
                return true;
            }
        }
        false
    }

    fn priority(&self, next_hop: &AccountId) -> i32 {
        self.config
            .relation_policy
            .priority_of(self.accounts.relation(next_hop))
    }

    fn schedule_all_route_updates(&mut self) {
        let accounts: Vec<AccountId> = self
            .peers
            .values()
            .filter(|peer| peer.sender().is_some())
            .map(|peer| peer.account().clone())
            .collect();
        for account in accounts {
            self.schedule_route_update(&account);
        }
    }

    fn schedule_route_update(&mut self, account: &AccountId) {
        let current_epoch = self.forwarding.current_epoch();
        let interval = self.config.broadcast_interval;
        let mailbox = self.mailbox.clone();
        let Some(peer) = self.peers.get_mut(account) else {
            return;
        };
        let session = peer.session();
        let Some(sender) = peer.sender_mut() else {
            return;
        };

        sender.cancel_timer();
        if sender.mode() != Mode::Sync {
            return;
        }
        let delay = sender.next_delay(Utc::now(), current_epoch, interval);
        tracing::trace!(%account, delay_ms = delay.as_millis() as u64, "scheduling route update");

        let account = account.clone();
        sender.set_timer(ScheduledTask::after(delay, async move {
            mailbox.post(RoutingCommand::RouteUpdateDue { account, session }).await;
        }));
    }

    pub(crate) fn route_update_due(&mut self, account: &AccountId, session: u64) {
        if self.is_current(account, session) {
            self.send_single_route_update(account);
        }
    }

    /// Send the next slice of the forwarding log to a peer in SYNC mode.
    ///
    /// Only one update per peer is in flight at a time; the completion is
    /// posted back as [`RoutingCommand::RouteUpdateSent`].
    pub fn send_single_route_update(&mut self, account: &AccountId) {
        let connected = self.transport.is_connected(account);
        let hold_down_time = self.config.hold_down_time_ms();
        let timeout = self.config.broadcast_interval;
        let accounts = Arc::clone(&self.accounts);
        let Some(peer) = self.peers.get_mut(account) else {
            return;
        };
        let session = peer.session();
        let Some(sender) = peer.sender_mut() else {
            return;
        };

        sender.cancel_timer();
        if sender.mode() != Mode::Sync {
            return;
        }
        if sender.is_in_flight() {
            tracing::trace!(%account, "route update already in flight");
            return;
        }
        sender.mark_attempt(Utc::now());

        if !connected {
            tracing::debug!(%account, "cannot send routes, account not connected");
            self.schedule_route_update(account);
            return;
        }

        let pending = sender.build_route_update(
            &self.forwarding,
            &self.config.own_address,
            hold_down_time,
            |id| accounts.relation(id),
        );
        tracing::trace!(
            %account,
            from = pending.request.from_epoch_index,
            to = pending.request.to_epoch_index,
            current = pending.request.current_epoch_index,
            "sending route update"
        );

        let transport = Arc::clone(&self.transport);
        let mailbox = self.mailbox.clone();
        let account = account.clone();
        tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, transport.send_route_update(&account, pending.request)).await {
                Ok(result) => result,
                Err(_) => Err(RoutingError::Timeout {
                    account: account.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                }),
            };
            mailbox
                .post(RoutingCommand::RouteUpdateSent {
                    account,
                    session,
                    previous_epoch: pending.previous_epoch,
                    sent_epoch: pending.sent_epoch,
                    result,
                })
                .await;
        });
    }

    /// Settle an in-flight route update and schedule the next one.
    pub(crate) fn route_update_sent(
        &mut self,
        account: &AccountId,
        session: u64,
        previous_epoch: u32,
        sent_epoch: u32,
        result: Result<(), RoutingError>,
    ) {
        let Some(sender) = self.current_peer_mut(account, session).and_then(Peer::sender_mut) else {
            return;
        };
        sender.finish_update(previous_epoch, sent_epoch, result.is_ok());
        match result {
            Ok(()) => tracing::trace!(%account, epoch = sender.last_known_epoch(), "route update delivered"),
            Err(err) => tracing::debug!(%account, error = %err, "failed to broadcast route information to peer"),
        }
        self.schedule_route_update(account);
    }

    /// Ask a peer to (re)start sending us routes from our current position.
    pub fn send_route_control(&mut self, account: &AccountId) {
        if !self.transport.is_connected(account) {
            tracing::debug!(%account, "cannot send route control, account not connected");
            return;
        }
        let timeout = self.config.broadcast_interval;
        let Some(peer) = self.peers.get_mut(account) else {
            return;
        };
        let session = peer.session();
        let Some(receiver) = peer.receiver_mut() else {
            return;
        };
        receiver.cancel_retry();
        let request = receiver.route_control_request();
        tracing::trace!(
            %account,
            routing_table_id = %request.last_known_routing_table_id,
            epoch = request.last_known_epoch,
            "sending route control"
        );

        let transport = Arc::clone(&self.transport);
        let mailbox = self.mailbox.clone();
        let account = account.clone();
        tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, transport.send_route_control(&account, request)).await {
                Ok(result) => result,
                Err(_) => Err(RoutingError::Timeout {
                    account: account.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                }),
            };
            match result {
                Ok(()) => tracing::trace!(%account, "route control accepted"),
                Err(err) => {
                    tracing::debug!(%account, error = %err, "failed to send route control message");
                    mailbox.post(RoutingCommand::RouteControlFailed { account, session }).await;
                }
            }
        });
    }

    pub(crate) fn route_control_failed(&mut self, account: &AccountId, session: u64) {
        let retry = self.config.route_control_retry;
        let mailbox = self.mailbox.clone();
        let Some(receiver) = self.current_peer_mut(account, session).and_then(Peer::receiver_mut) else {
            return;
        };
        let account = account.clone();
        receiver.set_retry(ScheduledTask::after(retry, async move {
            mailbox.post(RoutingCommand::RouteControlDue { account, session }).await;
        }));
    }

    pub(crate) fn route_control_due(&mut self, account: &AccountId, session: u64) {
        if self.is_current(account, session) {
            self.send_route_control(account);
        }
    }

    /// Drop routes from peers whose hold-down time has passed and ask them
    /// to resync.
    pub fn sweep_expired(&mut self, now: DateTime<Utc>) {
        let expired: Vec<AccountId> = self
            .peers
            .values()
            .filter_map(|peer| {
                let receiver = peer.receiver()?;
                (receiver.is_expired(now) && !receiver.routes().is_empty()).then(|| peer.account().clone())
            })
            .collect();
        if expired.is_empty() {
            return;
        }

        let mut prefixes = Vec::new();
        for account in &expired {
            if let Some(receiver) = self.peers.get_mut(account).and_then(Peer::receiver_mut) {
                let dropped = receiver.expire();
                tracing::info!(%account, routes = dropped.len(), "routes from peer expired");
                prefixes.extend(dropped);
            }
        }
        self.update_prefixes(prefixes);

        for account in &expired {
            self.send_route_control(account);
        }
    }

    fn is_current(&self, account: &AccountId, session: u64) -> bool {
        self.peers.get(account).is_some_and(|peer| peer.session() == session)
    }

    fn current_peer_mut(&mut self, account: &AccountId, session: u64) -> Option<&mut Peer> {
        self.peers.get_mut(account).filter(|peer| peer.session() == session)
    }

    pub fn status(&self) -> RoutingStatus {
        let mut peers: Vec<PeerStatus> = self
            .peers
            .values()
            .map(|peer| PeerStatus {
                account: peer.account().clone(),
                sender: peer.sender().map(|sender| SenderStatus {
                    mode: sender.mode(),
                    last_known_epoch: sender.last_known_epoch(),
                    last_update: sender.last_update(),
                }),
                receiver: peer.receiver().map(|receiver| ReceiverStatus {
                    routing_table_id: receiver.routing_table_id(),
                    epoch: receiver.epoch(),
                    expiry: receiver.expiry(),
                    prefixes: receiver.prefixes(),
                }),
            })
            .collect();
        peers.sort_by(|a, b| a.account.cmp(&b.account));

        RoutingStatus {
            own_address: self.config.own_address.clone(),
            routing_table_id: self.forwarding.routing_table_id(),
            current_epoch: self.forwarding.current_epoch(),
            local_routes: self
                .routing_table
                .iter()
                .map(|(prefix, route)| (prefix.to_string(), route.clone()))
                .collect(),
            forwarding_routes: self
                .forwarding
                .routes()
                .iter()
                .map(|(prefix, route)| (prefix.to_string(), route.clone()))
                .collect(),
            log: self.forwarding.log().to_vec(),
            peers,
        }
    }
}
