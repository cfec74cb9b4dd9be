use serde::Serialize;
use uuid::Uuid;

use crate::prefix_map::PrefixMap;
use crate::route::Route;

/// One entry of the forwarding log. `route: None` withdraws the prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteUpdate {
    pub epoch: u32,
    pub prefix: String,
    pub route: Option<Route>,
}

/// The table of routes this node exports, with its append-only change log.
///
/// `log[i].epoch == i` for every entry, and the map holds the route of the
/// latest log entry for each prefix unless that entry is a withdrawal. The
/// table id is fresh per process so that peers notice restarts.
#[derive(Debug)]
pub struct ForwardingRoutingTable {
    routing_table_id: Uuid,
    routes: PrefixMap<Route>,
    log: Vec<RouteUpdate>,
}

impl ForwardingRoutingTable {
    pub fn new() -> Self {
        Self::with_id(Uuid::now_v7())
    }

    pub fn with_id(routing_table_id: Uuid) -> Self {
        Self {
            routing_table_id,
            routes: PrefixMap::new(),
            log: Vec::new(),
        }
    }

    pub fn routing_table_id(&self) -> Uuid {
        self.routing_table_id
    }

    /// The epoch the next change will be recorded under.
    pub fn current_epoch(&self) -> u32 {
        self.log.len() as u32
    }

    /// Currently exported route for exactly `prefix`.
    pub fn get(&self, prefix: &str) -> Option<&Route> {
        self.routes.get(prefix)
    }

    pub fn routes(&self) -> &PrefixMap<Route> {
        &self.routes
    }

    /// Record a new exported value for `prefix` and return its epoch.
    pub fn record(&mut self, prefix: &str, route: Option<Route>) -> u32 {
        let epoch = self.current_epoch();
        match &route {
            Some(route) => {
                self.routes.insert(prefix, route.clone());
            }
            None => {
                self.routes.delete(prefix);
            }
        }
        self.log.push(RouteUpdate {
            epoch,
            prefix: prefix.to_string(),
            route,
        });
        tracing::trace!(epoch, prefix, "recorded forwarding route update");
        epoch
    }

    /// Up to `max` log entries starting at epoch `from`.
    pub fn log_slice(&self, from: u32, max: usize) -> &[RouteUpdate] {
        let start = (from as usize).min(self.log.len());
        let end = start.saturating_add(max).min(self.log.len());
        &self.log[start..end]
    }

    pub fn log(&self) -> &[RouteUpdate] {
        &self.log
    }

    /// Exported prefixes strictly less specific than `prefix`.
    pub fn covering_prefixes<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = (&'a str, &'a Route)> + 'a {
        self.routes
            .iter()
            .filter(move |(key, _)| *key != prefix && prefix.starts_with(*key))
    }
}

impl Default for ForwardingRoutingTable {
    fn default() -> Self {
        Self::new()
    }
}
