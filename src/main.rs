use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use warden::config::{Config, StoreBackend};
use warden::http::resolve::Resolver;
use warden::server::{Server, start_ticker};
use warden::store::{self, CredentialCache, CredentialStore, FileStore, MemoryStore};

#[derive(Debug, Parser)]
#[command(name = "warden", version, about = "Static file server with a login/registration flow")]
struct Cli {
    /// YAML configuration file. Defaults to $WARDEN_CONFIG, then built-in defaults.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on, replacing the configured one.
    port: Option<u16>,
}

fn open_store(cfg: &Config) -> Result<Box<dyn CredentialStore>> {
    Ok(match cfg.store.backend {
        StoreBackend::Memory => Box::new(MemoryStore::new()),
        StoreBackend::File => {
            let path = cfg
                .store
                .path
                .as_ref()
                .context("store.path is required for the file backend")?;
            Box::new(FileStore::open(path)?)
        }
    })
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_level(true)
        .init();

    let cli = Cli::parse();
    let mut cfg = match &cli.config {
        Some(path) => {
            let mut cfg = Config::from_file(path)?;
            cfg.apply_env();
            cfg
        }
        None => Config::load()?,
    };
    if let Some(port) = cli.port {
        cfg.override_port(port)?;
    }
    cfg.validate()?;

    let backend = open_store(&cfg)?;
    let sessions = Arc::new(store::open_sessions(backend.as_ref(), cfg.store.pool_size)?);
    let cache = Arc::new(CredentialCache::new());
    {
        let mut session = sessions.acquire();
        cache
            .load(&mut **session)
            .context("failed to load users from the store")?;
    }
    let resolver = Arc::new(Resolver::new(&cfg.static_files.doc_root, cache));

    let mut server = Server::new(&cfg, resolver, sessions)?;
    server
        .control_pipe()
        .install_handlers()
        .context("failed to install signal handlers")?;
    start_ticker(cfg.server.tick()).context("failed to start tick timer")?;

    info!(addr = %server.local_addr(), doc_root = %cfg.static_files.doc_root.display(), "Warden started");
    server.run()
}
