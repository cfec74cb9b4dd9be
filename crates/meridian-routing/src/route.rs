use std::fmt;

use meridian_core::AccountId;
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::RoutingError;

/// Per-process key used to tag routes originated by this node.
#[derive(Clone)]
pub struct RoutingSecret([u8; 32]);

impl RoutingSecret {
    /// Generate a fresh random secret.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Parse a hex-encoded 32-byte secret.
    pub fn from_hex(encoded: &str) -> Result<Self, RoutingError> {
        let bytes = hex::decode(encoded).map_err(|e| RoutingError::InvalidRoutingSecret {
            reason: e.to_string(),
        })?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| RoutingError::InvalidRoutingSecret {
                reason: format!("expected 32 bytes, got {}", b.len()),
            })?;
        Ok(Self(bytes))
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for RoutingSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RoutingSecret(..)")
    }
}

/// Opaque 32-byte route tag forwarded alongside every route.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RouteAuth([u8; 32]);

impl RouteAuth {
    /// Tag for a route this node originates for `prefix`.
    pub fn originate(secret: &RoutingSecret, prefix: &str) -> Self {
        Self(*blake3::keyed_hash(&secret.0, prefix.as_bytes()).as_bytes())
    }

    /// Tag carried by the re-advertised form of a route with this tag.
    pub fn forwarded(&self) -> Self {
        Self(*blake3::hash(&self.0).as_bytes())
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for RouteAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RouteAuth({})", self.to_hex())
    }
}

impl Serialize for RouteAuth {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for RouteAuth {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let bytes = hex::decode(&encoded).map_err(serde::de::Error::custom)?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("route auth must be 32 bytes"))?;
        Ok(Self(bytes))
    }
}

/// A route as held in the local decision table and the forwarding table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// The connected account packets for this prefix go to. Local for
    /// routes that terminate at this node.
    pub next_hop: AccountId,
    /// Addresses already traversed, most recent first.
    pub path: Vec<String>,
    pub auth: RouteAuth,
}

impl Route {
    /// A route originated by this node.
    pub fn originate(next_hop: AccountId, prefix: &str, secret: &RoutingSecret) -> Self {
        Self {
            next_hop,
            path: Vec::new(),
            auth: RouteAuth::originate(secret, prefix),
        }
    }

    /// The form of this route advertised onward: own address prepended.
    pub fn exported(&self, own_address: &str) -> Self {
        let mut path = Vec::with_capacity(self.path.len() + 1);
        path.push(own_address.to_string());
        path.extend(self.path.iter().cloned());
        Self {
            next_hop: self.next_hop.clone(),
            path,
            auth: self.auth.forwarded(),
        }
    }
}

/// A route learned from a peer, stored in that peer's receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingRoute {
    pub peer: AccountId,
    pub prefix: String,
    pub path: Vec<String>,
    pub auth: RouteAuth,
}

impl IncomingRoute {
    pub fn from_broadcast(peer: AccountId, route: BroadcastRoute) -> Self {
        Self {
            peer,
            prefix: route.prefix,
            path: route.path,
            auth: route.auth,
        }
    }

    /// The candidate route this learned route offers for its prefix.
    pub fn to_route(&self) -> Route {
        Route {
            next_hop: self.peer.clone(),
            path: self.path.clone(),
            auth: self.auth,
        }
    }
}

/// Wire form of an advertised route. The next hop is never sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastRoute {
    pub prefix: String,
    pub path: Vec<String>,
    pub auth: RouteAuth,
}

impl BroadcastRoute {
    pub fn from_route(prefix: &str, route: &Route) -> Self {
        Self {
            prefix: prefix.to_string(),
            path: route.path.clone(),
            auth: route.auth,
        }
    }

    /// Returns true if `address` already appears in the path.
    pub fn traverses(&self, address: &str) -> bool {
        self.path.iter().any(|hop| hop == address)
    }
}
