//! Neo N3 TEE service layer worker node.
//!
//! Boots the coordination engine against a configured network and serves
//! the operational HTTP endpoints. Exit codes: 0 normal stop, 64
//! configuration error, 69 dependency unavailable at boot, 70 internal
//! failure.

mod ops;

use anyhow::Context;
use clap::Parser;
use nsl_chain::{ChainClient, NeoRpcClient};
use nsl_config::{
    ServiceLayerConfig, SignerMode, StorageBackend, EXIT_CONFIG_ERROR,
    EXIT_DEPENDENCY_UNAVAILABLE, EXIT_INTERNAL, EXIT_OK,
};
use nsl_engine::Engine;
use nsl_signer::{LocalSigner, RemoteSigner, RemoteSignerConfig, ServiceSigner, SharedSigner};
use nsl_store::{MemoryStore, RocksDbStore, SharedStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "nsl-node",
    about = "Neo N3 TEE service layer worker",
    version
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "service_layer.toml", value_name = "PATH")]
    config: PathBuf,

    /// Replaces the configured RPC endpoints (comma separated).
    #[arg(long = "rpc", value_delimiter = ',', value_name = "URL")]
    rpc_endpoints: Vec<String>,

    /// Overrides the storage backend (memory, rocksdb).
    #[arg(long, value_name = "BACKEND")]
    backend: Option<String>,

    /// Overrides the storage path.
    #[arg(long, value_name = "PATH")]
    storage: Option<PathBuf>,

    /// Overrides the operational endpoint port.
    #[arg(long, value_name = "PORT")]
    ops_port: Option<u16>,

    /// Overrides the dispatcher worker pool width.
    #[arg(long, value_name = "N")]
    workers: Option<usize>,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_config(cli: &Cli) -> anyhow::Result<ServiceLayerConfig> {
    let mut config = ServiceLayerConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    if !cli.rpc_endpoints.is_empty() {
        config.network.rpc_endpoints = cli.rpc_endpoints.clone();
    }
    if let Some(backend) = &cli.backend {
        config.storage.backend = match backend.to_ascii_lowercase().as_str() {
            "memory" => StorageBackend::Memory,
            "rocksdb" => StorageBackend::Rocksdb,
            other => anyhow::bail!("unknown storage backend: {other}"),
        };
    }
    if let Some(path) = &cli.storage {
        config.storage.path = path.display().to_string();
    }
    if let Some(port) = cli.ops_port {
        config.ops.port = port;
    }
    if let Some(workers) = cli.workers {
        config.engine.worker_pool_width = workers;
    }

    config.validate()?;
    Ok(config)
}

fn open_store(config: &ServiceLayerConfig) -> anyhow::Result<SharedStore> {
    match config.storage.backend {
        StorageBackend::Memory => {
            warn!("memory storage configured; state will not survive a restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        StorageBackend::Rocksdb => {
            let store = RocksDbStore::open(&config.storage.path)
                .with_context(|| format!("opening rocksdb at {}", config.storage.path))?;
            Ok(Arc::new(store))
        }
    }
}

fn build_signer(config: &ServiceLayerConfig) -> anyhow::Result<SharedSigner> {
    let ttl = Duration::from_secs(config.signer.attestation_cache_ttl_secs);
    match config.signer.mode {
        SignerMode::Local => {
            let signer = match &config.signer.local_key_hex {
                Some(key_hex) => LocalSigner::from_hex(key_hex, 1, ttl)?,
                None => {
                    warn!("no local key configured, generating an ephemeral one");
                    LocalSigner::generate()
                }
            };
            Ok(Arc::new(signer))
        }
        SignerMode::Remote => {
            let endpoint = config
                .signer
                .endpoint
                .clone()
                .context("remote signer endpoint missing")?;
            let signer = RemoteSigner::new(RemoteSignerConfig {
                endpoint,
                timeout: Duration::from_secs(config.signer.timeout_secs),
                retry_attempts: config.signer.retry_attempts,
                attestation_ttl: ttl,
            })?;
            Ok(Arc::new(signer))
        }
    }
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

async fn run(cli: Cli) -> i32 {
    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "configuration error");
            return EXIT_CONFIG_ERROR;
        }
    };

    let store = match open_store(&config) {
        Ok(store) => store,
        Err(err) => {
            error!(error = %err, "storage unavailable");
            return EXIT_DEPENDENCY_UNAVAILABLE;
        }
    };

    let chain = match NeoRpcClient::new(
        &config.network.rpc_endpoints,
        Duration::from_secs(nsl_config::DEFAULT_LISTENER_RPC_TIMEOUT_SECS),
    ) {
        Ok(client) => Arc::new(client),
        Err(err) => {
            error!(error = %err, "chain client construction failed");
            return EXIT_DEPENDENCY_UNAVAILABLE;
        }
    };

    // Boot probe: at least one endpoint must answer.
    match chain.block_count().await {
        Ok(count) => info!(block_count = count, "chain reachable"),
        Err(err) => {
            error!(error = %err, "no rpc endpoint reachable at boot");
            return EXIT_DEPENDENCY_UNAVAILABLE;
        }
    }

    let signer = match build_signer(&config) {
        Ok(signer) => signer,
        Err(err) => {
            error!(error = %err, "signer construction failed");
            return EXIT_DEPENDENCY_UNAVAILABLE;
        }
    };
    if config.signer.mode == SignerMode::Remote {
        if let Err(err) = signer.attestation().await {
            error!(error = %err, "remote signer not attested at boot");
            return EXIT_DEPENDENCY_UNAVAILABLE;
        }
    }

    let engine = match Engine::new(config.clone(), store, chain, signer) {
        Ok(engine) => engine,
        Err(err) => {
            error!(error = %err, "engine assembly failed");
            return EXIT_INTERNAL;
        }
    };
    if let Err(err) = engine.start().await {
        error!(error = %err, "engine start failed");
        return EXIT_INTERNAL;
    }

    let ops_handle = match ops::serve(Arc::clone(&engine), &config).await {
        Ok(handle) => handle,
        Err(err) => {
            error!(error = %err, "ops server failed to bind");
            engine.stop().await;
            return EXIT_DEPENDENCY_UNAVAILABLE;
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        gateway = %config.network.gateway_contract,
        ops_port = config.ops.port,
        "service layer running"
    );

    wait_for_shutdown_signal().await;
    info!("shutdown signal received");

    ops_handle.shutdown();
    engine.stop().await;
    EXIT_OK
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let code = run(cli).await;
    std::process::exit(code);
}
