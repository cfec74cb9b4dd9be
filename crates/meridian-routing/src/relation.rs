use meridian_core::Relation;
use serde::{Deserialize, Serialize};

use crate::error::RoutingError;

/// Route-preference weights per next-hop relation. Higher is preferred.
///
/// Customers are preferred over lateral peers, which are preferred over
/// providers. Routes through accounts the node does not know about rank
/// below every relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationPolicy {
    #[serde(default = "default_parent")]
    pub parent: i32,
    #[serde(default = "default_peer")]
    pub peer: i32,
    #[serde(default = "default_child")]
    pub child: i32,
    #[serde(default = "default_local")]
    pub local: i32,
}

fn default_parent() -> i32 {
    0
}
fn default_peer() -> i32 {
    1
}
fn default_child() -> i32 {
    2
}
fn default_local() -> i32 {
    3
}

impl RelationPolicy {
    /// Weight assigned to next hops that are not configured accounts.
    pub const UNKNOWN: i32 = i32::MIN;

    /// Create a policy, validating the customer/peer/provider ordering.
    pub fn new(parent: i32, peer: i32, child: i32, local: i32) -> Result<Self, RoutingError> {
        let policy = Self {
            parent,
            peer,
            child,
            local,
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Check that `child > peer > parent`.
    pub fn validate(&self) -> Result<(), RoutingError> {
        if self.child > self.peer && self.peer > self.parent {
            Ok(())
        } else {
            Err(RoutingError::InvalidRelationPolicy {
                parent: self.parent,
                peer: self.peer,
                child: self.child,
            })
        }
    }

    pub fn priority(&self, relation: Relation) -> i32 {
        match relation {
            Relation::Parent => self.parent,
            Relation::Peer => self.peer,
            Relation::Child => self.child,
            Relation::Local => self.local,
        }
    }

    /// Priority of an optional relation; `None` means the account is unknown.
    pub fn priority_of(&self, relation: Option<Relation>) -> i32 {
        relation.map_or(Self::UNKNOWN, |r| self.priority(r))
    }
}

impl Default for RelationPolicy {
    fn default() -> Self {
        Self {
            parent: default_parent(),
            peer: default_peer(),
            child: default_child(),
            local: default_local(),
        }
    }
}
