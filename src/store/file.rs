//! YAML-file credential store.
//!
//! The whole file is read once when the store is opened and rewritten after
//! every insert:
//!
//! ```yaml
//! users:
//!   alice: secret
//! ```

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{CredentialStore, StoreError, StoreSession};

#[derive(Debug, Default, Serialize, Deserialize)]
struct UsersFile {
    #[serde(default)]
    users: BTreeMap<String, String>,
}

#[derive(Debug)]
struct Shared {
    path: PathBuf,
    contents: Mutex<UsersFile>,
}

#[derive(Debug, Clone)]
pub struct FileStore {
    shared: Arc<Shared>,
}

impl FileStore {
    /// Opens the users file at `path`. A missing file starts out empty and is
    /// created on the first insert.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let contents = match std::fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => UsersFile::default(),
            Ok(text) => serde_yaml::from_str(&text)?,
            Err(e) if e.kind() == ErrorKind::NotFound => UsersFile::default(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), users = contents.users.len(), "Opened users file");
        Ok(Self {
            shared: Arc::new(Shared {
                path,
                contents: Mutex::new(contents),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }
}

impl CredentialStore for FileStore {
    fn connect(&self) -> Result<Box<dyn StoreSession>, StoreError> {
        Ok(Box::new(FileSession {
            shared: self.shared.clone(),
        }))
    }
}

struct FileSession {
    shared: Arc<Shared>,
}

impl StoreSession for FileSession {
    fn load_users(&mut self) -> Result<Vec<(String, String)>, StoreError> {
        let contents = self.shared.contents.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(contents
            .users
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn insert_user(&mut self, name: &str, passwd: &str) -> Result<(), StoreError> {
        let mut contents = self.shared.contents.lock().unwrap_or_else(PoisonError::into_inner);
        if contents.users.contains_key(name) {
            return Err(StoreError::Duplicate(name.to_string()));
        }
        contents.users.insert(name.to_string(), passwd.to_string());
        let text = match serde_yaml::to_string(&*contents) {
            Ok(text) => text,
            Err(e) => {
                contents.users.remove(name);
                return Err(e.into());
            }
        };
        if let Err(e) = std::fs::write(&self.shared.path, text) {
            contents.users.remove(name);
            return Err(e.into());
        }
        Ok(())
    }
}
