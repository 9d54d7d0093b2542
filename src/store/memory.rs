use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use super::{CredentialStore, StoreError, StoreSession};

/// Store backed by a table shared between its sessions. Nothing persists
/// past the process.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    table: Arc<Mutex<BTreeMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users<I, K, V>(users: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let table = users
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            table: Arc::new(Mutex::new(table)),
        }
    }

    pub fn password_of(&self, name: &str) -> Option<String> {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }
}

impl CredentialStore for MemoryStore {
    fn connect(&self) -> Result<Box<dyn StoreSession>, StoreError> {
        Ok(Box::new(MemorySession {
            table: self.table.clone(),
        }))
    }
}

struct MemorySession {
    table: Arc<Mutex<BTreeMap<String, String>>>,
}

impl StoreSession for MemorySession {
    fn load_users(&mut self) -> Result<Vec<(String, String)>, StoreError> {
        let table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(table.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    fn insert_user(&mut self, name: &str, passwd: &str) -> Result<(), StoreError> {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        if table.contains_key(name) {
            return Err(StoreError::Duplicate(name.to_string()));
        }
        table.insert(name.to_string(), passwd.to_string());
        Ok(())
    }
}
