use std::time::Duration;

use rollguard_ctl::report::{format_monitor, render};
use rollguard_ctl::{MonitorReport, Orchestrator, OutputFormat};
use tokio::sync::watch;

pub async fn monitor(
    orchestrator: &Orchestrator,
    max_duration: Option<Duration>,
    output: OutputFormat,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let max_duration = max_duration.or(orchestrator.config().triggers.max_duration());
    let report = orchestrator.monitor(max_duration, shutdown).await?;
    println!("{}", render(output, &report, format_monitor)?);

    // A rollback the monitor ran is a failure of the release it watched.
    match &report {
        MonitorReport::RolledBack { outcome, .. } => {
            anyhow::bail!("trigger fired; rollback {} ended {:?}", outcome.id, outcome.status)
        }
        MonitorReport::RollbackErrored { request, error } => {
            anyhow::bail!("trigger fired; rollback {} could not run: {error}", request.id)
        }
        MonitorReport::Completed | MonitorReport::Cancelled => Ok(()),
    }
}
