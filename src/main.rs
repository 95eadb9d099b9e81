use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use kube::{Api, ResourceExt};
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use vault_k8s::controller::{self, Context, HttpHealthProbe, KubeStore};
use vault_k8s::{crd::Vault, Error};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the operator
    Run(RunArgs),
    /// Show version information
    Version,
    /// List the managed Vault clusters
    Info(InfoArgs),
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Only watch Vaults in this namespace (all namespaces when unset)
    #[arg(long, env = "WATCH_NAMESPACE")]
    namespace: Option<String>,

    /// Timeout in seconds for each replica health check
    #[arg(long, env = "PROBE_TIMEOUT_SECS", default_value_t = 2)]
    probe_timeout_secs: u64,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

#[derive(Parser, Debug)]
struct InfoArgs {
    /// Namespace to list (all namespaces when unset)
    #[arg(long, env = "WATCH_NAMESPACE")]
    namespace: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    match args.command {
        Commands::Version => {
            println!("Vault-K8s Operator v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Info(info_args) => run_info(info_args).await,
        Commands::Run(run_args) => run_operator(run_args).await,
    }
}

async fn run_info(args: InfoArgs) -> Result<(), Error> {
    let client = kube::Client::try_default()
        .await
        .map_err(Error::KubeError)?;

    let api: Api<Vault> = match &args.namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    };
    let vaults = api
        .list(&Default::default())
        .await
        .map_err(Error::KubeError)?;

    println!("Managed Vaults: {}", vaults.items.len());
    for vault in &vaults.items {
        let leader = vault
            .status
            .as_ref()
            .map(|s| s.leader.as_str())
            .filter(|l| !l.is_empty())
            .unwrap_or("<none>");
        println!(
            "  {}/{} size={} leader={}",
            vault.namespace().unwrap_or_default(),
            vault.name_any(),
            vault.spec.size,
            leader
        );
    }
    Ok(())
}

async fn run_operator(args: RunArgs) -> Result<(), Error> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    let registry = tracing_subscriber::registry().with(env_filter);
    if args.log_json {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }

    info!("Starting Vault-K8s Operator v{}", env!("CARGO_PKG_VERSION"));

    let client = kube::Client::try_default()
        .await
        .map_err(Error::KubeError)?;

    info!("Connected to Kubernetes cluster");

    let probe = HttpHealthProbe::new(Duration::from_secs(args.probe_timeout_secs))?;
    let ctx = Arc::new(Context::new(
        Arc::new(KubeStore::new(client.clone())),
        Arc::new(probe),
    ));

    controller::run_controller(client, args.namespace, ctx).await?;

    info!("Operator shutdown complete");
    Ok(())
}
