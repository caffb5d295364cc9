use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use scanwatch::config::Config;
use scanwatch::debouncer::{Debouncer, HttpScanDispatcher};
use scanwatch::health::{HealthServer, HealthState};
use scanwatch::manager::{shutdown_signal, Manager};
use scanwatch::metrics;
use scanwatch::monitor::{
    self, CachedClusterIdentity, KubeClusterIdentity, MonitorContext, ResourceKey, ResourceKind,
};
use scanwatch::scan_api::{ScanApiStore, ScanApiWatcher};

#[derive(Parser)]
#[command(
    name = "scanwatch",
    version,
    about = "Triggers debounced security scans for changed Kubernetes resources",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); overrides the configured format
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the cluster and dispatch scans
    Run {
        /// TOML config file; environment variables are used when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Load and validate configuration, then print it
    CheckConfig {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Print the debouncer key for a resource
    Key {
        /// Resource kind (pod, deployment, node, ...)
        kind: String,

        /// Namespace; empty for cluster-scoped resources
        namespace: String,

        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = match &cli.command {
        Commands::Run { config } | Commands::CheckConfig { config } => config.clone(),
        Commands::Key { .. } => None,
    };
    let config = load_config(config_path.as_deref())?;

    let format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| config.logging.format.clone());
    setup_tracing(&format, &config.logging.level, cli.verbose)?;

    match cli.command {
        Commands::Run { .. } => {
            tracing::info!(kinds = ?config.monitor.kinds, "scanwatch starting");
            run(config).await?;
        }

        Commands::CheckConfig { .. } => {
            config.validate()?;
            println!("{}", toml::to_string_pretty(&config.redacted())?);
        }

        Commands::Key {
            kind,
            namespace,
            name,
        } => {
            let kind = ResourceKind::new(&kind)?;
            println!("{}", ResourceKey::new(&kind, &namespace, &name));
        }
    }

    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(path),
        None => Config::from_env(),
    }
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let default_directive = if verbose {
        "scanwatch=debug,info".to_string()
    } else {
        format!("scanwatch={level},warn")
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}

async fn run(config: Config) -> Result<()> {
    config.validate()?;
    metrics::init_metrics().context("Failed to register metrics")?;

    let client = kube::Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let store = Arc::new(ScanApiStore::default());
    let dispatcher = Arc::new(HttpScanDispatcher::from_config(&config.dispatch)?);
    let debouncer = Arc::new(Debouncer::new(
        store.clone(),
        dispatcher,
        config.debouncer.clone(),
    ));

    let ctx = MonitorContext {
        client: client.clone(),
        identity: Arc::new(CachedClusterIdentity::new(
            KubeClusterIdentity::with_namespace(
                client.clone(),
                config.monitor.identity_namespace.clone(),
            ),
        )),
        debouncer: debouncer.clone(),
        managed_by_prefix: config.monitor.managed_by_prefix.clone(),
    };

    let mut manager = Manager::new();

    for kind in &config.monitor.kinds {
        monitor::register_kind(&mut manager, &ctx, kind)
            .with_context(|| format!("Failed to register monitor for '{kind}'"))?;
    }

    manager.add(Arc::new(ScanApiWatcher::new(
        client,
        store.clone(),
        config.scan_api.clone(),
        config.dispatch.token.clone(),
    )));

    if config.health.enabled {
        manager.add(Arc::new(HealthServer::new(
            config.health.bind_address,
            HealthState::new(debouncer, store),
        )));
    }

    manager.run(shutdown_signal()).await?;

    tracing::info!("scanwatch stopped");
    Ok(())
}
