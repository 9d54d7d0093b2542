use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{info, warn};

use super::{StoreError, StoreSession};

/// In-process copy of the user table.
///
/// Filled once from the store at startup and extended on every successful
/// registration. Registration holds the lock across the duplicate check,
/// the store insert and the cache insert, so two concurrent registrations of
/// one name cannot both succeed.
#[derive(Debug, Default)]
pub struct CredentialCache {
    users: Mutex<HashMap<String, String>>,
}

impl CredentialCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the cache contents with every user in the store.
    pub fn load(&self, session: &mut dyn StoreSession) -> Result<usize, StoreError> {
        let users = session.load_users()?;
        let count = users.len();
        *self.lock() = users.into_iter().collect();
        info!(users = count, "Loaded credential cache");
        Ok(count)
    }

    /// Inserts a new user into the store, then into the cache.
    pub fn register(
        &self,
        session: &mut dyn StoreSession,
        name: &str,
        passwd: &str,
    ) -> Result<(), StoreError> {
        let mut users = self.lock();
        if users.contains_key(name) {
            return Err(StoreError::Duplicate(name.to_string()));
        }
        if let Err(e) = session.insert_user(name, passwd) {
            warn!(user = name, error = %e, "Store insert failed");
            return Err(e);
        }
        users.insert(name.to_string(), passwd.to_string());
        Ok(())
    }

    pub fn verify(&self, name: &str, passwd: &str) -> bool {
        self.lock().get(name).is_some_and(|p| p == passwd)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.users.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
