//! Server configuration.
//!
//! Configuration is read from an optional YAML file. Every field has a
//! default, so a missing file (or a file that only sets a few keys) is valid.
//! The `LISTEN` environment variable overrides the listen address.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the YAML configuration file.
pub const CONFIG_ENV: &str = "WARDEN_CONFIG";

/// Environment variable overriding `server.listen_addr`.
pub const LISTEN_ENV: &str = "LISTEN";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub workers: WorkerConfig,
    pub store: StoreConfig,
    pub static_files: StaticFilesConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// Live connections allowed at once; accepts beyond this are refused.
    pub max_connections: usize,
    /// Readiness events fetched per wait.
    pub max_events: usize,
    /// Length of one timer tick in seconds.
    pub tick_secs: u64,
    /// Idle budget, in ticks, granted on accept and after every read.
    pub idle_ticks: u32,
    /// Idle budget, in ticks, granted after every write.
    pub write_idle_ticks: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:9006".to_string(),
            max_connections: 65536,
            max_events: 10000,
            tick_secs: 5,
            idle_ticks: 5,
            write_idle_ticks: 3,
        }
    }
}

impl ServerConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        self.tick() * self.idle_ticks
    }

    pub fn write_idle_timeout(&self) -> Duration {
        self.tick() * self.write_idle_ticks
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub threads: usize,
    /// Maximum number of jobs waiting in the queue.
    pub max_requests: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            threads: 8,
            max_requests: 10000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    File,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Number of pooled store sessions.
    pub pool_size: usize,
    pub backend: StoreBackend,
    /// Users file for the `file` backend.
    pub path: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            pool_size: 8,
            backend: StoreBackend::Memory,
            path: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StaticFilesConfig {
    pub doc_root: PathBuf,
}

impl Default for StaticFilesConfig {
    fn default() -> Self {
        Self {
            doc_root: PathBuf::from("./resources"),
        }
    }
}

impl Config {
    /// Loads the configuration named by `WARDEN_CONFIG` (defaults when unset),
    /// then applies the `LISTEN` override.
    pub fn load() -> Result<Self> {
        let mut cfg = match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        cfg.apply_env();
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        // An empty document deserializes to unit, not to a mapping.
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn apply_env(&mut self) {
        if let Ok(addr) = std::env::var(LISTEN_ENV) {
            self.server.listen_addr = addr;
        }
    }

    /// Replaces only the port of the listen address.
    pub fn override_port(&mut self, port: u16) -> Result<()> {
        let mut addr = self.listen_addr()?;
        addr.set_port(port);
        self.server.listen_addr = addr.to_string();
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.server
            .listen_addr
            .parse()
            .with_context(|| format!("invalid listen address {:?}", self.server.listen_addr))
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers.threads == 0 {
            bail!("workers.threads must be positive");
        }
        if self.workers.max_requests == 0 {
            bail!("workers.max_requests must be positive");
        }
        if self.store.pool_size == 0 {
            bail!("store.pool_size must be positive");
        }
        if self.server.tick_secs == 0 {
            bail!("server.tick_secs must be positive");
        }
        if self.server.max_connections == 0 || self.server.max_events == 0 {
            bail!("server.max_connections and server.max_events must be positive");
        }
        if self.store.backend == StoreBackend::File && self.store.path.is_none() {
            bail!("store.path is required for the file backend");
        }
        self.listen_addr()?;
        Ok(())
    }
}
