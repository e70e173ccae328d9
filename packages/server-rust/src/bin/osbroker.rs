//! `osbroker` -- Open Service Broker v2 server backed by the in-memory driver.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use osbroker_core::{Catalog, CompletionMode, DriverCapabilities};
use osbroker_server::driver::{builtin_catalog, InMemoryDriver};
use osbroker_server::network::{BrokerServer, NetworkConfig};
use osbroker_server::service::{
    BindingCascade, BrokerConfig, BrokerCore, DuplicatePolicy, OperationSweeper,
};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DuplicateArg {
    Conflict,
    ReturnExisting,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CascadeArg {
    Cascade,
    Reject,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Synchronous,
    Optional,
    Asynchronous,
}

/// Open Service Broker v2 server.
#[derive(Parser, Debug)]
#[command(name = "osbroker")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Bind address
    #[arg(long, env = "OSBROKER_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Listen port (0 = OS-assigned)
    #[arg(long, env = "OSBROKER_PORT", default_value_t = 8080)]
    port: u16,

    /// Catalog JSON file; the built-in catalog is served when absent
    #[arg(long, env = "OSBROKER_CATALOG")]
    catalog: Option<PathBuf>,

    /// Maximum number of service instances
    #[arg(long, env = "OSBROKER_INSTANCE_LIMIT")]
    instance_limit: Option<usize>,

    /// Behaviour of a repeated provision or bind
    #[arg(long, env = "OSBROKER_DUPLICATE_POLICY", value_enum, default_value = "return-existing")]
    duplicate_policy: DuplicateArg,

    /// Behaviour of deprovision while bindings exist
    #[arg(long, env = "OSBROKER_BINDING_CASCADE", value_enum, default_value = "cascade")]
    binding_cascade: CascadeArg,

    /// Do not ask the driver to clean up unknown instances on deprovision
    #[arg(long, env = "OSBROKER_NO_ORPHAN_CLEANUP")]
    no_orphan_cleanup: bool,

    /// Concurrent operations before requests are shed
    #[arg(long, env = "OSBROKER_MAX_CONCURRENT", default_value_t = 1000)]
    max_concurrent_operations: u32,

    /// Seconds finished asynchronous operations stay pollable
    #[arg(long, env = "OSBROKER_OPERATION_RETENTION_SECS", default_value_t = 3600)]
    operation_retention_secs: u64,

    /// Completion mode of the in-memory driver
    #[arg(long, env = "OSBROKER_DRIVER_MODE", value_enum, default_value = "synchronous")]
    driver_mode: ModeArg,

    /// Polls before in-memory asynchronous work finishes
    #[arg(long, env = "OSBROKER_DRIVER_POLLS", default_value_t = 1)]
    driver_polls: u32,

    /// Dashboard URL template; `{instance_id}` is substituted
    #[arg(long, env = "OSBROKER_DASHBOARD_URL")]
    dashboard_url: Option<String>,

    /// Require a 2.x `X-Broker-API-Version` header
    #[arg(long, env = "OSBROKER_REQUIRE_API_VERSION")]
    require_api_version: bool,

    /// Seconds to wait for in-flight requests on shutdown
    #[arg(long, env = "OSBROKER_DRAIN_TIMEOUT_SECS", default_value_t = 30)]
    drain_timeout_secs: u64,

    /// Log level filter (overridden by RUST_LOG)
    #[arg(long, env = "OSBROKER_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, env = "OSBROKER_LOG_FORMAT", value_enum, default_value = "pretty")]
    log_format: LogFormat,
}

impl Cli {
    fn broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            instance_limit: self.instance_limit,
            duplicate_policy: match self.duplicate_policy {
                DuplicateArg::Conflict => DuplicatePolicy::Conflict,
                DuplicateArg::ReturnExisting => DuplicatePolicy::ReturnExisting,
            },
            binding_cascade: match self.binding_cascade {
                CascadeArg::Cascade => BindingCascade::Cascade,
                CascadeArg::Reject => BindingCascade::Reject,
            },
            cleanup_orphans: !self.no_orphan_cleanup,
            max_concurrent_operations: self.max_concurrent_operations,
            operation_retention_ms: self.operation_retention_secs.saturating_mul(1000),
            ..BrokerConfig::default()
        }
    }

    fn network_config(&self) -> NetworkConfig {
        NetworkConfig {
            host: self.host.clone(),
            port: self.port,
            require_api_version: self.require_api_version,
            drain_timeout: Duration::from_secs(self.drain_timeout_secs),
            ..NetworkConfig::default()
        }
    }

    fn driver(&self) -> InMemoryDriver {
        let mode = match self.driver_mode {
            ModeArg::Synchronous => CompletionMode::Synchronous,
            ModeArg::Optional => CompletionMode::Optional,
            ModeArg::Asynchronous => CompletionMode::Asynchronous,
        };
        let driver = InMemoryDriver::new(DriverCapabilities::uniform(mode))
            .with_polls_to_complete(self.driver_polls);
        match &self.dashboard_url {
            Some(template) => driver.with_dashboard_url(template.clone()),
            None => driver,
        }
    }
}

fn init_tracing(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    match cli.log_format {
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

fn load_catalog(path: Option<&PathBuf>) -> anyhow::Result<Catalog> {
    let Some(path) = path else {
        info!("no catalog file configured, serving the built-in catalog");
        return Ok(builtin_catalog());
    };
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("reading catalog {}", path.display()))?;
    let catalog = Catalog::from_json(&json)
        .with_context(|| format!("parsing catalog {}", path.display()))?;
    info!(path = %path.display(), services = catalog.services.len(), "catalog loaded");
    Ok(catalog)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl+C"),
        () = terminate => info!("received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    let catalog = load_catalog(cli.catalog.as_ref())?;
    let config = cli.broker_config();
    let sweep_interval = config.sweep_interval();
    let core = Arc::new(BrokerCore::new(
        Arc::new(config),
        Arc::new(catalog),
        Arc::new(cli.driver()),
    ));

    let mut sweeper =
        OperationSweeper::new(core.shared_operations(), core.config().operation_retention())
            .spawn(sweep_interval);

    let mut server = BrokerServer::new(cli.network_config(), Arc::clone(&core));
    let port = server.start().await?;
    info!(port, "osbroker started");

    let result = server.serve(shutdown_signal()).await;
    sweeper.stop().await;
    info!(stats = ?core.stats(), "osbroker stopped");
    result
}
