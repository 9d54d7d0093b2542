//! Credential store collaborator.
//!
//! The engine talks to the persistent store only through [`StoreSession`]s
//! checked out of a [`ResourcePool`]: a bulk load of every user at startup,
//! and a single insert per successful registration. Logins never reach the
//! store; they are answered from the in-process [`CredentialCache`].

pub mod cache;
pub mod file;
pub mod memory;

use thiserror::Error;

use crate::pool::{PoolError, ResourcePool};

pub use cache::CredentialCache;
pub use file::FileStore;
pub use memory::MemoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("user {0:?} already exists")]
    Duplicate(String),
    #[error("store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("store data is malformed: {0}")]
    Format(#[from] serde_yaml::Error),
}

/// One open connection to the store.
pub trait StoreSession: Send {
    /// Every `(username, password)` pair in the store.
    fn load_users(&mut self) -> Result<Vec<(String, String)>, StoreError>;

    fn insert_user(&mut self, name: &str, passwd: &str) -> Result<(), StoreError>;
}

pub trait CredentialStore: Send + Sync {
    fn connect(&self) -> Result<Box<dyn StoreSession>, StoreError>;
}

pub type SessionPool = ResourcePool<Box<dyn StoreSession>>;

#[derive(Debug, Error)]
pub enum SessionPoolError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// Opens `size` sessions and pools them.
pub fn open_sessions(store: &dyn CredentialStore, size: usize) -> Result<SessionPool, SessionPoolError> {
    let sessions = (0..size)
        .map(|_| store.connect())
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ResourcePool::new(sessions)?)
}
