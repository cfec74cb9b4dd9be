use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Characters allowed inside a single address segment.
fn is_segment_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '~' | '-')
}

/// Identifier of a directly connected account.
///
/// The empty id is reserved for the local node itself: routes whose next hop
/// is [`AccountId::local`] were originated here.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    /// Create an account id, validating that it can be used as an address segment.
    pub fn new(id: impl Into<String>) -> Result<Self, CoreError> {
        let id = id.into();
        if id.is_empty() || !id.chars().all(is_segment_char) {
            return Err(CoreError::InvalidAccountId(id));
        }
        Ok(Self(id))
    }

    /// The id standing for this node.
    pub fn local() -> Self {
        Self(String::new())
    }

    /// Returns true if this is the local node's id.
    pub fn is_local(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for AccountId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl Borrow<str> for AccountId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for AccountId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Business relation of a directly connected account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Relation {
    /// Upstream provider.
    Parent,
    /// Lateral peer.
    Peer,
    /// Downstream customer.
    Child,
    /// The node itself.
    Local,
}

impl Relation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Parent => "parent",
            Self::Peer => "peer",
            Self::Child => "child",
            Self::Local => "local",
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Relation {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "parent" => Ok(Self::Parent),
            "peer" => Ok(Self::Peer),
            "child" => Ok(Self::Child),
            "local" => Ok(Self::Local),
            other => Err(CoreError::InvalidRelation(other.to_string())),
        }
    }
}

/// Static information about a configured account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub id: AccountId,
    pub relation: Relation,
    /// Explicit override for advertising our routes to this account.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send_routes: Option<bool>,
    /// Explicit override for accepting routes from this account.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receive_routes: Option<bool>,
}

impl AccountInfo {
    pub fn new(id: AccountId, relation: Relation) -> Self {
        Self {
            id,
            relation,
            send_routes: None,
            receive_routes: None,
        }
    }

    /// Whether routes are advertised to this account. Children default to no.
    pub fn sends_routes(&self) -> bool {
        self.send_routes.unwrap_or(self.relation != Relation::Child)
    }

    /// Whether routes are accepted from this account. Children default to no.
    pub fn receives_routes(&self) -> bool {
        self.receive_routes.unwrap_or(self.relation != Relation::Child)
    }
}

/// Validate a full hierarchical address such as `g.usd.alice`.
pub fn validate_address(address: &str) -> Result<(), CoreError> {
    let valid = !address.is_empty()
        && address
            .split('.')
            .all(|segment| !segment.is_empty() && segment.chars().all(is_segment_char));
    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidAddress(address.to_string()))
    }
}

/// Address allocated to a child account underneath our own address.
pub fn child_address(own_address: &str, account: &AccountId) -> String {
    format!("{}.{}", own_address, account)
}

/// Returns true if `prefix` is covered by (starts with) `by`.
pub fn is_covered_by(prefix: &str, by: &str) -> bool {
    prefix.starts_with(by)
}
