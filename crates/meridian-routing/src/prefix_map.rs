use std::cmp::Ordering;
use std::collections::HashMap;

/// Key order used by [`PrefixMap`]: longer prefixes first, equal lengths
/// reverse-lexicographic.
fn prefix_order(a: &str, b: &str) -> Ordering {
    b.len().cmp(&a.len()).then_with(|| b.cmp(a))
}

/// An associative container keyed by address prefixes.
///
/// Besides exact lookup it supports longest-prefix-match resolution. Keys are
/// kept sorted most-specific first, so the first stored prefix that `key`
/// starts with is always the longest match. Operations are linear in the
/// number of stored prefixes, which is bounded by configured and learned
/// routes rather than by traffic.
#[derive(Debug, Clone)]
pub struct PrefixMap<T> {
    prefixes: Vec<String>,
    items: HashMap<String, T>,
}

impl<T> PrefixMap<T> {
    /// Create a new, empty map.
    pub fn new() -> Self {
        Self {
            prefixes: Vec::new(),
            items: HashMap::new(),
        }
    }

    /// Insert or overwrite the item for `prefix`. Returns the previous item.
    pub fn insert(&mut self, prefix: impl Into<String>, item: T) -> Option<T> {
        let prefix = prefix.into();
        if let Err(position) = self
            .prefixes
            .binary_search_by(|probe| prefix_order(probe, &prefix))
        {
            self.prefixes.insert(position, prefix.clone());
        }
        self.items.insert(prefix, item)
    }

    /// Exact-match lookup. Never falls back to a shorter prefix.
    pub fn get(&self, prefix: &str) -> Option<&T> {
        self.items.get(prefix)
    }

    /// Item stored under the longest prefix of `key`, if any.
    pub fn resolve(&self, key: &str) -> Option<&T> {
        self.resolve_prefix(key).and_then(|prefix| self.items.get(prefix))
    }

    /// The longest stored prefix of `key`, if any.
    pub fn resolve_prefix(&self, key: &str) -> Option<&str> {
        self.prefixes
            .iter()
            .find(|prefix| key.starts_with(prefix.as_str()))
            .map(String::as_str)
    }

    /// Remove the item for `prefix`. Deleting a missing prefix is a no-op.
    pub fn delete(&mut self, prefix: &str) -> Option<T> {
        let item = self.items.remove(prefix)?;
        if let Ok(position) = self
            .prefixes
            .binary_search_by(|probe| prefix_order(probe, prefix))
        {
            self.prefixes.remove(position);
        }
        Some(item)
    }

    /// Stored prefixes in map order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.prefixes.iter().map(String::as_str)
    }

    /// Stored prefixes that start with `prefix` (including `prefix` itself).
    pub fn keys_starting_with<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.keys().filter(move |key| key.starts_with(prefix))
    }

    /// `(prefix, item)` pairs in map order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.prefixes
            .iter()
            .filter_map(|prefix| self.items.get(prefix).map(|item| (prefix.as_str(), item)))
    }

    /// Call `f` for every entry in map order.
    pub fn each<F>(&self, mut f: F)
    where
        F: FnMut(&str, &T),
    {
        for (prefix, item) in self.iter() {
            f(prefix, item);
        }
    }

    pub fn len(&self) -> usize {
        self.prefixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }
}

impl<T> Default for PrefixMap<T> {
    fn default() -> Self {
        Self::new()
    }
}
