//! In-memory object stores behind the `db_*` requests.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;

use crate::errors::{RelayError, RelayResult};

pub const KNOWN_STORES: [&str; 4] = ["jsonservers", "htmlservers", "meta", "panel"];

/// A fixed set of named key/value stores. Values are listed in key order.
#[derive(Debug)]
pub struct KvStore {
    stores: HashMap<&'static str, BTreeMap<String, Value>>,
}

impl Default for KvStore {
    fn default() -> Self {
        Self {
            stores: KNOWN_STORES
                .iter()
                .map(|name| (*name, BTreeMap::new()))
                .collect(),
        }
    }
}

impl KvStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn store(&self, name: &str) -> RelayResult<&BTreeMap<String, Value>> {
        self.stores
            .get(name)
            .ok_or_else(|| RelayError::UnknownStore(name.to_string()))
    }

    fn store_mut(&mut self, name: &str) -> RelayResult<&mut BTreeMap<String, Value>> {
        self.stores
            .get_mut(name)
            .ok_or_else(|| RelayError::UnknownStore(name.to_string()))
    }

    pub fn get(&self, store: &str, key: &str) -> RelayResult<Option<Value>> {
        Ok(self.store(store)?.get(key).cloned())
    }

    pub fn set(&mut self, store: &str, key: String, value: Value) -> RelayResult<()> {
        self.store_mut(store)?.insert(key, value);
        Ok(())
    }

    /// Returns whether the key was present.
    pub fn delete(&mut self, store: &str, key: &str) -> RelayResult<bool> {
        Ok(self.store_mut(store)?.remove(key).is_some())
    }

    pub fn list(&self, store: &str) -> RelayResult<Vec<Value>> {
        Ok(self.store(store)?.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_get_delete() {
        let mut store = KvStore::new();
        assert_eq!(store.get("meta", "db_seeded").unwrap(), None);

        store.set("meta", "db_seeded".into(), json!(true)).unwrap();
        assert_eq!(store.get("meta", "db_seeded").unwrap(), Some(json!(true)));

        assert!(store.delete("meta", "db_seeded").unwrap());
        assert!(!store.delete("meta", "db_seeded").unwrap());
    }

    #[test]
    fn list_is_key_ordered() {
        let mut store = KvStore::new();
        store.set("jsonservers", "server-2".into(), json!({"n": 2})).unwrap();
        store.set("jsonservers", "server-1".into(), json!({"n": 1})).unwrap();
        assert_eq!(
            store.list("jsonservers").unwrap(),
            vec![json!({"n": 1}), json!({"n": 2})]
        );
        assert!(store.list("htmlservers").unwrap().is_empty());
    }

    #[test]
    fn unknown_store_is_an_error() {
        let mut store = KvStore::new();
        assert!(matches!(store.get("users", "k"), Err(RelayError::UnknownStore(name)) if name == "users"));
        assert!(store.set("users", "k".into(), json!(1)).is_err());
        assert!(store.list("users").is_err());
    }
}
