//! The routing service task.
//!
//! All routing state lives in a [`RouteBroadcaster`] owned by one tokio task.
//! API handlers, connection events, timers and transport completions reach it
//! only through the command queue, so state is never shared across tasks.
//! The best-route table is published after every change for lock-free reads.

use std::sync::Arc;

use chrono::Utc;
use meridian_core::AccountId;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;

use crate::accounts::AccountRegistry;
use crate::broadcaster::RouteBroadcaster;
use crate::config::BroadcasterConfig;
use crate::error::RoutingError;
use crate::message::{RouteControlRequest, RouteUpdateRequest};
use crate::prefix_map::PrefixMap;
use crate::route::Route;
use crate::status::RoutingStatus;
use crate::transport::CcpTransport;

const COMMAND_CHANNEL_CAPACITY: usize = 1024;

/// Messages processed by the routing service task.
pub(crate) enum RoutingCommand {
    Track(AccountId),
    Untrack(AccountId),
    Connected(AccountId),
    Disconnected(AccountId),
    ReloadLocalRoutes,
    RouteControl {
        from: AccountId,
        request: RouteControlRequest,
        reply: oneshot::Sender<Result<(), RoutingError>>,
    },
    RouteUpdate {
        from: AccountId,
        request: RouteUpdateRequest,
        reply: oneshot::Sender<Result<(), RoutingError>>,
    },
    Status {
        reply: oneshot::Sender<RoutingStatus>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
    RouteUpdateDue {
        account: AccountId,
        session: u64,
    },
    RouteUpdateSent {
        account: AccountId,
        session: u64,
        previous_epoch: u32,
        sent_epoch: u32,
        result: Result<(), RoutingError>,
    },
    RouteControlDue {
        account: AccountId,
        session: u64,
    },
    RouteControlFailed {
        account: AccountId,
        session: u64,
    },
}

/// Posting side of the command queue used by timers and background sends.
///
/// Holds a weak reference so that pending work does not keep the service
/// alive once every [`RoutingHandle`] is gone.
#[derive(Clone)]
pub(crate) struct Mailbox(mpsc::WeakSender<RoutingCommand>);

impl Mailbox {
    pub(crate) fn new(sender: &mpsc::Sender<RoutingCommand>) -> Self {
        Self(sender.downgrade())
    }

    pub(crate) async fn post(&self, command: RoutingCommand) {
        let Some(sender) = self.0.upgrade() else {
            return;
        };
        if sender.send(command).await.is_err() {
            tracing::trace!("routing service gone, dropping command");
        }
    }
}

/// Spawns and runs the routing service.
pub struct RoutingService {
    broadcaster: RouteBroadcaster,
    commands: mpsc::Receiver<RoutingCommand>,
    snapshot: watch::Sender<Arc<PrefixMap<Route>>>,
    published_version: u64,
}

impl RoutingService {
    /// Start the service on the current runtime and return a handle to it.
    pub fn spawn(
        config: BroadcasterConfig,
        accounts: Arc<AccountRegistry>,
        transport: Arc<dyn CcpTransport>,
    ) -> RoutingHandle {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(PrefixMap::new()));
        let broadcaster = RouteBroadcaster::new(config, accounts, transport, Mailbox::new(&command_tx));

        let service = Self {
            broadcaster,
            commands: command_rx,
            snapshot: snapshot_tx,
            published_version: u64::MAX,
        };
        tokio::spawn(service.run());

        RoutingHandle {
            commands: command_tx,
            snapshot: snapshot_rx,
        }
    }

    async fn run(mut self) {
        self.broadcaster.start();
        self.publish();

        let mut cleanup = tokio::time::interval(self.broadcaster.config().cleanup_interval);
        cleanup.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!("routing service running");
        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    match command {
                        Some(RoutingCommand::Shutdown { reply }) => {
                            self.broadcaster.stop();
                            let _ = reply.send(());
                            break;
                        }
                        Some(command) => self.dispatch(command),
                        None => {
                            tracing::info!("all routing handles dropped");
                            self.broadcaster.stop();
                            break;
                        }
                    }
                }
                _ = cleanup.tick() => {
                    self.broadcaster.sweep_expired(Utc::now());
                }
            }
            self.publish();
        }
        tracing::info!("routing service stopped");
    }

    fn dispatch(&mut self, command: RoutingCommand) {
        match command {
            RoutingCommand::Track(account) => self.broadcaster.track(account),
            RoutingCommand::Untrack(account) => self.broadcaster.untrack(&account),
            RoutingCommand::Connected(account) => self.broadcaster.account_connected(&account),
            RoutingCommand::Disconnected(account) => self.broadcaster.account_disconnected(&account),
            RoutingCommand::ReloadLocalRoutes => self.broadcaster.reload_local_routes(),
            RoutingCommand::RouteControl { from, request, reply } => {
                let result = self.broadcaster.handle_route_control(&from, &request);
                if let Err(e) = &result {
                    tracing::debug!(account = %from, error = %e, "rejected route control");
                }
                self.publish();
                let _ = reply.send(result);
            }
            RoutingCommand::RouteUpdate { from, request, reply } => {
                let result = self.broadcaster.handle_route_update(&from, request);
                if let Err(e) = &result {
                    tracing::debug!(account = %from, error = %e, "rejected route update");
                }
                // Callers may resolve as soon as the reply arrives.
                self.publish();
                let _ = reply.send(result);
            }
            RoutingCommand::Status { reply } => {
                let _ = reply.send(self.broadcaster.status());
            }
            RoutingCommand::RouteUpdateDue { account, session } => {
                self.broadcaster.route_update_due(&account, session);
            }
            RoutingCommand::RouteUpdateSent {
                account,
                session,
                previous_epoch,
                sent_epoch,
                result,
            } => {
                self.broadcaster.route_update_sent(&account, session, previous_epoch, sent_epoch, result);
            }
            RoutingCommand::RouteControlDue { account, session } => {
                self.broadcaster.route_control_due(&account, session);
            }
            RoutingCommand::RouteControlFailed { account, session } => {
                self.broadcaster.route_control_failed(&account, session);
            }
            RoutingCommand::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    fn publish(&mut self) {
        let version = self.broadcaster.table_version();
        if version == self.published_version {
            return;
        }
        self.published_version = version;
        self.snapshot
            .send_replace(Arc::new(self.broadcaster.routing_table().clone()));
    }
}

/// Cloneable handle for talking to the routing service.
#[derive(Clone)]
pub struct RoutingHandle {
    commands: mpsc::Sender<RoutingCommand>,
    snapshot: watch::Receiver<Arc<PrefixMap<Route>>>,
}

impl RoutingHandle {
    async fn send(&self, command: RoutingCommand) -> Result<(), RoutingError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| RoutingError::ServiceStopped)
    }

    pub async fn track(&self, account: AccountId) -> Result<(), RoutingError> {
        self.send(RoutingCommand::Track(account)).await
    }

    pub async fn untrack(&self, account: AccountId) -> Result<(), RoutingError> {
        self.send(RoutingCommand::Untrack(account)).await
    }

    pub async fn account_connected(&self, account: AccountId) -> Result<(), RoutingError> {
        self.send(RoutingCommand::Connected(account)).await
    }

    pub async fn account_disconnected(&self, account: AccountId) -> Result<(), RoutingError> {
        self.send(RoutingCommand::Disconnected(account)).await
    }

    pub async fn reload_local_routes(&self) -> Result<(), RoutingError> {
        self.send(RoutingCommand::ReloadLocalRoutes).await
    }

    /// Deliver a route control request received from `from`.
    pub async fn handle_route_control(
        &self,
        from: AccountId,
        request: RouteControlRequest,
    ) -> Result<(), RoutingError> {
        let (reply, rx) = oneshot::channel();
        self.send(RoutingCommand::RouteControl { from, request, reply }).await?;
        rx.await.map_err(|_| RoutingError::ServiceStopped)?
    }

    /// Deliver a route update received from `from`.
    pub async fn handle_route_update(
        &self,
        from: AccountId,
        request: RouteUpdateRequest,
    ) -> Result<(), RoutingError> {
        let (reply, rx) = oneshot::channel();
        self.send(RoutingCommand::RouteUpdate { from, request, reply }).await?;
        rx.await.map_err(|_| RoutingError::ServiceStopped)?
    }

    pub async fn status(&self) -> Result<RoutingStatus, RoutingError> {
        let (reply, rx) = oneshot::channel();
        self.send(RoutingCommand::Status { reply }).await?;
        rx.await.map_err(|_| RoutingError::ServiceStopped)
    }

    /// Best route for a destination address from the latest published table.
    pub fn resolve(&self, address: &str) -> Option<Route> {
        self.snapshot.borrow().resolve(address).cloned()
    }

    /// The latest published best-route table.
    pub fn routing_table(&self) -> Arc<PrefixMap<Route>> {
        Arc::clone(&self.snapshot.borrow())
    }

    /// Wait until the published table changes.
    pub async fn changed(&mut self) -> Result<(), RoutingError> {
        self.snapshot
            .changed()
            .await
            .map_err(|_| RoutingError::ServiceStopped)
    }

    /// Stop the service and wait for it to finish its current command.
    pub async fn shutdown(&self) -> Result<(), RoutingError> {
        let (reply, rx) = oneshot::channel();
        self.send(RoutingCommand::Shutdown { reply }).await?;
        rx.await.map_err(|_| RoutingError::ServiceStopped)
    }
}
