use dashmap::DashMap;
use meridian_core::{AccountId, AccountInfo, Relation};

/// Concurrent directory of configured accounts.
///
/// Shared between the routing service and whatever manages account
/// configuration; relation lookups never block on the routing task.
#[derive(Debug, Default)]
pub struct AccountRegistry {
    accounts: DashMap<AccountId, AccountInfo>,
}

impl AccountRegistry {
    pub fn new() -> Self {
        Self {
            accounts: DashMap::new(),
        }
    }

    /// Build a registry from a list of accounts.
    pub fn from_accounts(accounts: impl IntoIterator<Item = AccountInfo>) -> Self {
        let registry = Self::new();
        for info in accounts {
            registry.insert(info);
        }
        registry
    }

    /// Insert or replace an account. Returns the previous entry.
    pub fn insert(&self, info: AccountInfo) -> Option<AccountInfo> {
        self.accounts.insert(info.id.clone(), info)
    }

    pub fn remove(&self, id: &AccountId) -> Option<AccountInfo> {
        self.accounts.remove(id).map(|(_id, info)| info)
    }

    pub fn get(&self, id: &AccountId) -> Option<AccountInfo> {
        self.accounts.get(id).map(|entry| entry.value().clone())
    }

    pub fn exists(&self, id: &AccountId) -> bool {
        self.accounts.contains_key(id)
    }

    /// Relation of a next hop. The local id maps to [`Relation::Local`].
    pub fn relation(&self, id: &AccountId) -> Option<Relation> {
        if id.is_local() {
            return Some(Relation::Local);
        }
        self.accounts.get(id).map(|entry| entry.relation)
    }

    /// All account ids, sorted.
    pub fn ids(&self) -> Vec<AccountId> {
        let mut ids: Vec<AccountId> = self.accounts.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Accounts with the given relation, sorted by id.
    pub fn with_relation(&self, relation: Relation) -> Vec<AccountId> {
        let mut ids: Vec<AccountId> = self
            .accounts
            .iter()
            .filter(|entry| entry.relation == relation)
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}
