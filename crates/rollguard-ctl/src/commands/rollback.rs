use rollguard_core::{OutcomeStatus, RollbackRequest, RollbackTarget, RollbackType};
use rollguard_ctl::report::{format_rollback, render};
use rollguard_ctl::{Orchestrator, OutputFormat};

pub async fn rollback(
    orchestrator: &Orchestrator,
    rollback_type: &str,
    target: &str,
    reason: &str,
    output: OutputFormat,
) -> anyhow::Result<()> {
    let rollback_type: RollbackType = rollback_type.parse()?;
    let target: RollbackTarget = target.parse()?;
    let initiated_by = std::env::var("USER").unwrap_or_else(|_| "operator".to_string());
    let request = RollbackRequest::new(rollback_type, target, reason, &initiated_by, false);

    let outcome = orchestrator.rollback(&request).await?;
    println!("{}", render(output, &outcome, format_rollback)?);

    match outcome.status {
        OutcomeStatus::Success => Ok(()),
        status => anyhow::bail!("rollback {} ended {:?}", outcome.id, status),
    }
}
