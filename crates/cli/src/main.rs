use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::signal;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use vkube_core::{gvk_key, parse_gvk_key};
use vkube_syncer::KubeCluster;

mod compose;
mod config;

use config::Config;

#[derive(Parser, Debug)]
#[command(name = "vkubectl", version, about = "Virtual cluster syncer")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Config file
    #[arg(short = 'c', long = "config", global = true, env = "VKUBE_CONFIG", default_value = "vkube.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Sync virtual objects into the host cluster until Ctrl-C
    Run {
        /// Kubeconfig of the virtual cluster (default: inferred)
        #[arg(long = "virtual-kubeconfig", env = "VKUBE_VIRTUAL_KUBECONFIG")]
        virtual_kubeconfig: Option<PathBuf>,
        #[arg(long = "virtual-context", env = "VKUBE_VIRTUAL_CONTEXT")]
        virtual_context: Option<String>,
        /// Kubeconfig of the host cluster (default: inferred)
        #[arg(long = "host-kubeconfig", env = "VKUBE_HOST_KUBECONFIG")]
        host_kubeconfig: Option<PathBuf>,
        #[arg(long = "host-context", env = "VKUBE_HOST_CONTEXT")]
        host_context: Option<String>,
    },
    /// Load and validate the config, then print what would be synced
    Validate,
    /// Print the host identity of a virtual object
    Translate {
        name: String,
        namespace: String,
        /// GVK key, e.g. "v1/Secret" or "storage.k8s.io/v1/StorageClass"
        #[arg(long = "kind", default_value = "v1/Secret")]
        kind: String,
    },
}

fn init_tracing() {
    let env = std::env::var("VKUBE_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("VKUBE_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid VKUBE_METRICS_ADDR; expected host:port");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let cfg = Config::load(&cli.config)?;
    let exports = cfg.validate().context("invalid config")?;

    match cli.command {
        Commands::Validate => {
            info!(exports = exports.len(), "validate invoked");
            match cli.output {
                Output::Human => {
                    println!("name: {}  hostNamespace: {}  workers: {}", cfg.name, cfg.host_namespace, cfg.workers);
                    println!("sync: secrets={} configMaps={} storageClasses={}", cfg.sync.secrets, cfg.sync.config_maps, cfg.sync.storage_classes);
                    for e in &exports {
                        println!("export {:<40} patches={} reversePatches={}", gvk_key(&e.gvk), e.patches.len(), e.reverse_patches.len());
                    }
                }
                Output::Json => {
                    let rows: Vec<_> = exports
                        .iter()
                        .map(|e| serde_json::json!({ "gvk": gvk_key(&e.gvk), "patches": e.patches.len(), "reversePatches": e.reverse_patches.len() }))
                        .collect();
                    println!("{}", serde_json::to_string_pretty(&serde_json::json!({ "name": cfg.name, "hostNamespace": cfg.host_namespace, "exports": rows }))?);
                }
            }
        }
        Commands::Translate { name, namespace, kind } => {
            let gvk = parse_gvk_key(&kind)?;
            let translator = Arc::new(cfg.translator());
            let registry = compose::registry(translator, &exports);
            let host = registry.virtual_to_host(&gvk, &name, &namespace)?;
            match cli.output {
                Output::Human => println!("{} -> {}", vkube_core::NamespacedName::new(namespace, name), host),
                Output::Json => println!("{}", serde_json::to_string_pretty(&serde_json::json!({ "gvk": gvk_key(&gvk), "virtual": { "namespace": namespace, "name": name }, "host": host }))?),
            }
        }
        Commands::Run { virtual_kubeconfig, virtual_context, host_kubeconfig, host_context } => {
            init_metrics();
            let virt = KubeCluster::from_kubeconfig(virtual_kubeconfig.as_deref(), virtual_context.as_deref()).await.context("virtual cluster")?;
            let host = KubeCluster::from_kubeconfig(host_kubeconfig.as_deref(), host_context.as_deref()).await.context("host cluster")?;
            let (_root, controllers) = compose::controllers(&cfg, exports, Arc::new(virt), Arc::new(host));
            let workers = cfg.workers;
            info!(controllers = controllers.len(), workers, "run invoked");

            let shutdown = CancellationToken::new();
            let mut set = JoinSet::new();
            for c in controllers {
                let name = c.name().to_string();
                let shutdown = shutdown.clone();
                set.spawn(async move { (name, c.run(workers, shutdown).await) });
            }

            let mut failed = None;
            loop {
                tokio::select! {
                    _ = signal::ctrl_c(), if !shutdown.is_cancelled() => {
                        info!("Ctrl-C received; stopping controllers");
                        shutdown.cancel();
                    }
                    joined = set.join_next() => match joined {
                        Some(Ok((_, Ok(())))) => {}
                        Some(Ok((name, Err(e)))) => {
                            error!(controller = %name, error = %e, "controller stopped on fatal error; stopping all");
                            shutdown.cancel();
                            failed.get_or_insert(anyhow::Error::new(e).context(format!("controller {name}")));
                        }
                        Some(Err(e)) => {
                            error!(error = %e, "controller task panicked");
                            shutdown.cancel();
                        }
                        None => break,
                    },
                }
            }
            if let Some(e) = failed {
                return Err(e);
            }
            warn!("all controllers stopped (graceful shutdown)");
        }
    }

    Ok(())
}
