use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use rollguard_cluster::{KubectlConfig, KubectlGateway};
use rollguard_core::{RollguardConfig, StrategyKind};
use rollguard_ctl::{Orchestrator, OutputFormat, StdinConfirmer};
use rollguard_rollback::{Confirmer, FixedAnswer};
use rollguard_state::StateStore;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(
    name = "rollguard",
    about = "rollguard: guarded rollouts and rollbacks for cluster workloads",
    version,
    propagate_version = true
)]
struct Cli {
    /// Path to rollguard.toml
    #[arg(short, long, global = true, default_value = "rollguard.toml")]
    config: PathBuf,

    /// Override the namespace from the config file
    #[arg(short, long, global = true)]
    namespace: Option<String>,

    /// Override the environment (production/prod require confirmation)
    #[arg(short, long, global = true)]
    environment: Option<String>,

    /// Kubeconfig passed to kubectl
    #[arg(long, global = true)]
    kubeconfig: Option<PathBuf>,

    /// kubectl context
    #[arg(long, global = true)]
    context: Option<String>,

    /// Log line format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Outcome format on stdout
    #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Roll the workload out to a new image.
    ///
    /// Strategy is read from [rollout].strategy unless --strategy is given.
    /// A failed rollout that already touched the live workload is rolled
    /// back unless --no-rollback is set.
    Deploy {
        /// Target image for the app
        #[arg(short, long)]
        image: String,
        /// Target image for the worker (default: the app image)
        #[arg(long)]
        worker_image: Option<String>,
        /// rolling, blue-green, or canary
        #[arg(short, long)]
        strategy: Option<StrategyKind>,
        /// Leave a failed rollout as it is
        #[arg(long)]
        no_rollback: bool,
        /// Watch trigger signals after a successful rollout
        #[arg(long)]
        monitor: bool,
        /// Stop monitoring after this long (e.g. 30m)
        #[arg(long, value_parser = parse_duration_arg)]
        monitor_duration: Option<Duration>,
        #[arg(long)]
        skip_preflight: bool,
    },
    /// Revert components to a previous state.
    Rollback {
        /// application, database, infrastructure, monitoring, full, or
        /// partial:COMP[,COMP...]
        #[arg(short = 't', long = "type", default_value = "full")]
        rollback_type: String,
        /// previous, revision:N, or backup:NAME
        #[arg(long, default_value = "previous")]
        target: String,
        #[arg(short, long, default_value = "manual rollback")]
        reason: String,
        /// Skip the production confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Watch trigger signals and roll back when one fires.
    Monitor {
        /// Stop after this long without a breach (e.g. 1h)
        #[arg(long, value_parser = parse_duration_arg)]
        max_duration: Option<Duration>,
    },
    /// Manage backups
    Backup {
        #[command(subcommand)]
        action: BackupAction,
    },
    /// Show recorded deployments and rollbacks, newest first
    History {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum BackupAction {
    /// Snapshot every managed component
    Create {
        /// Backup name (default: generated)
        #[arg(long)]
        name: Option<String>,
    },
    /// List backups, newest first
    List,
    /// Show one backup
    Show { name: String },
}

fn parse_duration_arg(s: &str) -> Result<Duration, String> {
    rollguard_core::parse_duration(s).ok_or_else(|| format!("invalid duration {s:?}"))
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,rollguard=debug"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<RollguardConfig> {
    let mut config = if cli.config.exists() {
        RollguardConfig::load(&cli.config)
            .with_context(|| format!("loading {}", cli.config.display()))?
    } else {
        RollguardConfig::default()
    };
    if let Some(ns) = &cli.namespace {
        config.namespace = ns.clone();
    }
    if let Some(env) = &cli.environment {
        config.environment = env.clone();
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = load_config(&cli)?;
    let data_dir = PathBuf::from(&config.data_dir);
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data dir {}", data_dir.display()))?;
    let state = StateStore::open(&data_dir.join("state.redb"))?;

    let gateway = Arc::new(KubectlGateway::new(KubectlConfig {
        kubeconfig: cli.kubeconfig.clone(),
        context: cli.context.clone(),
        ..Default::default()
    }));
    let confirmer: Arc<dyn Confirmer> = match &cli.command {
        Commands::Rollback { yes: true, .. } => Arc::new(FixedAnswer(true)),
        _ => Arc::new(StdinConfirmer),
    };
    info!(
        environment = %config.environment,
        namespace = %config.namespace,
        workload = %config.workload.app,
        "rollguard starting"
    );
    let orchestrator =
        Orchestrator::new(config, gateway, state, data_dir.join("backups"), confirmer);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received shutdown signal");
            let _ = shutdown_tx.send(true);
        }
    });

    let output = cli.output;
    match cli.command {
        Commands::Deploy {
            image,
            worker_image,
            strategy,
            no_rollback,
            monitor,
            monitor_duration,
            skip_preflight,
        } => {
            let args = commands::deploy::DeployArgs {
                image,
                worker_image,
                strategy,
                no_rollback,
                monitor,
                monitor_duration,
                skip_preflight,
            };
            commands::deploy::deploy(&orchestrator, args, output, shutdown_rx).await
        }
        Commands::Rollback {
            rollback_type,
            target,
            reason,
            yes: _,
        } => {
            commands::rollback::rollback(&orchestrator, &rollback_type, &target, &reason, output)
                .await
        }
        Commands::Monitor { max_duration } => {
            commands::monitor::monitor(&orchestrator, max_duration, output, shutdown_rx).await
        }
        Commands::Backup { action } => match action {
            BackupAction::Create { name } => {
                commands::backup::create(&orchestrator, name.as_deref(), output).await
            }
            BackupAction::List => commands::backup::list(&orchestrator, output),
            BackupAction::Show { name } => commands::backup::show(&orchestrator, &name, output),
        },
        Commands::History { limit } => commands::history::history(&orchestrator, limit, output),
    }
}
