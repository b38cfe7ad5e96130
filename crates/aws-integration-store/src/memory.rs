//! In-memory key-value store.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::KeyValueStore;
use aws_integration_core::Result;

/// Process-local store. Contents are lost when dropped.
#[derive(Default)]
pub struct MemoryKv {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryKv {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn unset(&self, key: &str) -> Result<bool> {
        Ok(self.entries.write().remove(key).is_some())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .entries
            .read()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_and_unset() {
        let store = MemoryKv::new();
        store.set("a", "1").unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some("1"));
        assert!(store.unset("a").unwrap());
        assert!(store.is_empty());
    }

    #[test]
    fn test_keys_with_prefix() {
        let store = MemoryKv::new();
        store.set("p.b", "").unwrap();
        store.set("p.a", "").unwrap();
        store.set("q.a", "").unwrap();
        assert_eq!(store.keys_with_prefix("p.").unwrap(), vec!["p.a", "p.b"]);
    }
}
