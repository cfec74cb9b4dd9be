//! Meridian Routing: CCP route exchange between directly connected accounts.
//!
//! This crate provides:
//! - [`PrefixMap`]: longest-prefix-match map over hierarchical addresses.
//! - [`ForwardingRoutingTable`]: the exported route table and its epoch log.
//! - [`CcpSender`] / [`CcpReceiver`]: per-peer synchronization state machines.
//! - [`RouteBroadcaster`]: route selection, export filtering and peer lifecycle.
//! - [`RoutingService`] / [`RoutingHandle`]: the single-writer task that owns
//!   all of the above, and the handle used to talk to it.

pub mod accounts;
pub mod broadcaster;
pub mod config;
pub mod error;
pub mod forwarding;
pub mod message;
pub mod peer;
pub mod prefix_map;
pub mod receiver;
pub mod relation;
pub mod route;
pub mod sender;
pub mod service;
pub mod status;
pub mod task;
pub mod transport;

// Re-exports for convenience.
pub use accounts::AccountRegistry;
pub use broadcaster::RouteBroadcaster;
pub use config::{BroadcasterConfig, DefaultRoute, StaticRoute};
pub use error::RoutingError;
pub use forwarding::{ForwardingRoutingTable, RouteUpdate};
pub use message::{Mode, RouteControlRequest, RouteUpdateRequest};
pub use prefix_map::PrefixMap;
pub use receiver::{CcpReceiver, ReceivedUpdate};
pub use relation::RelationPolicy;
pub use route::{BroadcastRoute, IncomingRoute, Route, RouteAuth, RoutingSecret};
pub use sender::{CcpSender, MAX_EPOCHS_PER_UPDATE, MINIMUM_UPDATE_INTERVAL};
pub use service::{RoutingHandle, RoutingService};
pub use status::{PeerStatus, ReceiverStatus, RoutingStatus, SenderStatus};
pub use transport::CcpTransport;
