use std::time::Duration;

use rollguard_core::{OutcomeStatus, StrategyKind};
use rollguard_ctl::report::{format_deploy, render};
use rollguard_ctl::{DeployRequest, Orchestrator, OutputFormat};
use tokio::sync::watch;

pub struct DeployArgs {
    pub image: String,
    pub worker_image: Option<String>,
    pub strategy: Option<StrategyKind>,
    pub no_rollback: bool,
    pub monitor: bool,
    pub monitor_duration: Option<Duration>,
    pub skip_preflight: bool,
}

pub async fn deploy(
    orchestrator: &Orchestrator,
    args: DeployArgs,
    output: OutputFormat,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let mut request = DeployRequest::new(orchestrator.config(), &args.image);
    request.worker_image = args.worker_image;
    if let Some(strategy) = args.strategy {
        request.strategy = strategy;
    }
    request.rollback_on_failure &= !args.no_rollback;
    request.preflight = !args.skip_preflight;
    request.monitor = args.monitor;
    if args.monitor_duration.is_some() {
        request.monitor_duration = args.monitor_duration;
    }

    let report = orchestrator.deploy(&request, shutdown).await?;
    println!("{}", render(output, &report, format_deploy)?);

    match report.status() {
        OutcomeStatus::Success => Ok(()),
        status => anyhow::bail!("deployment {} ended {:?}", report.deployment.id, status),
    }
}
