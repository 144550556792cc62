//! Human-readable and JSON rendering of outcomes.

use clap::ValueEnum;
use rollguard_core::{
    AutoRollback, Backup, BackupContents, ComponentStatus, DeploymentState, OutcomeStatus,
    PhaseStatus, RollbackOutcome,
};
use rollguard_state::HistoryEntry;
use serde::Serialize;

use crate::orchestrator::{DeployReport, MonitorReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Render `value` as pretty JSON, or with `text` otherwise.
pub fn render<T: Serialize>(
    format: OutputFormat,
    value: &T,
    text: impl FnOnce(&T) -> String,
) -> serde_json::Result<String> {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(value),
        OutputFormat::Text => Ok(text(value)),
    }
}

fn status_label(status: OutcomeStatus) -> &'static str {
    match status {
        OutcomeStatus::Success => "success",
        OutcomeStatus::Partial => "partial",
        OutcomeStatus::Failed => "failed",
    }
}

fn state_label(state: DeploymentState) -> &'static str {
    match state {
        DeploymentState::Pending => "pending",
        DeploymentState::Running => "running",
        DeploymentState::Succeeded => "succeeded",
        DeploymentState::Failed => "failed",
        DeploymentState::RolledBack => "rolled back",
    }
}

fn mark(status: PhaseStatus) -> &'static str {
    match status {
        PhaseStatus::Started => "…",
        PhaseStatus::Completed => "✓",
        PhaseStatus::Failed => "✗",
    }
}

pub fn format_rollback(outcome: &RollbackOutcome) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Rollback {} ({} → {}): {} in {}ms\n",
        outcome.id,
        outcome.rollback_type,
        outcome.target,
        status_label(outcome.status),
        outcome.duration_ms
    ));
    if let Some(error) = &outcome.error {
        out.push_str(&format!("  Aborted: {error}\n"));
    }
    if let Some(backup) = &outcome.pre_rollback_backup {
        out.push_str(&format!("  Safety backup: {backup}\n"));
    }
    for (component, result) in &outcome.component_results {
        let status = match result.status {
            ComponentStatus::Reverted => "reverted",
            ComponentStatus::AlreadyAtTarget => "already at target",
            ComponentStatus::Failed => "FAILED",
        };
        let validated = match result.validated {
            Some(true) => ", validated",
            Some(false) => ", validation FAILED",
            None => "",
        };
        out.push_str(&format!(
            "  {:<15} {status}{validated}: {}\n",
            component.as_str(),
            result.detail
        ));
    }
    out
}

pub fn format_deploy(report: &DeployReport) -> String {
    let d = &report.deployment;
    let mut out = String::new();
    out.push_str(&format!(
        "Deployment {} of {}/{} ({}): {} in {}ms\n",
        d.id,
        d.namespace,
        d.workload,
        d.strategy,
        state_label(d.final_state),
        d.duration_ms
    ));
    for phase in &d.phases {
        out.push_str(&format!("  {} {}", mark(phase.status), phase.name));
        if let Some(error) = &phase.error {
            out.push_str(&format!(": {error}"));
        }
        out.push('\n');
    }
    if let Some(backup) = &d.baseline_backup {
        out.push_str(&format!("Baseline backup: {backup}\n"));
    }
    match &d.rollback {
        AutoRollback::NotApplicable => {}
        AutoRollback::Disabled => out.push_str("Rollback on failure: disabled\n"),
        AutoRollback::NotRequired => {
            out.push_str("Rollback on failure: not required (live workload untouched)\n")
        }
        AutoRollback::Errored { error } => {
            out.push_str(&format!("Rollback on failure: could not run: {error}\n"))
        }
        AutoRollback::Attempted { outcome } => out.push_str(&format_rollback(outcome)),
    }
    if let Some(monitor) = &report.monitor {
        out.push_str(&format_monitor(monitor));
    }
    out
}

pub fn format_monitor(report: &MonitorReport) -> String {
    match report {
        MonitorReport::Completed => "Monitor: completed without a breach\n".to_string(),
        MonitorReport::Cancelled => "Monitor: cancelled\n".to_string(),
        MonitorReport::RolledBack { request, outcome } => format!(
            "Monitor: {} triggered a rollback ({})\n{}",
            request.initiated_by,
            request.reason,
            format_rollback(outcome)
        ),
        MonitorReport::RollbackErrored { request, error } => format!(
            "Monitor: {} triggered a rollback ({}) that could not run: {error}\n",
            request.initiated_by, request.reason
        ),
    }
}

pub fn format_backups(backups: &[Backup]) -> String {
    if backups.is_empty() {
        return "No backups.\n".to_string();
    }
    let mut out = String::new();
    for backup in backups {
        let components = backup
            .metadata
            .get("components")
            .map(String::as_str)
            .unwrap_or("-");
        out.push_str(&format!(
            "{:<48} {:>15}  {components}\n",
            backup.id, backup.created_at
        ));
    }
    out
}

pub fn format_backup(backup: &Backup, contents: &BackupContents) -> String {
    let mut out = String::new();
    out.push_str(&format!("Backup:    {}\n", backup.id));
    out.push_str(&format!("Namespace: {}\n", contents.namespace));
    out.push_str(&format!("Created:   {}\n", backup.created_at));
    out.push_str(&format!("Path:      {}\n", backup.path.display()));
    if let Some(version) = contents.database_version {
        out.push_str(&format!("Database:  version {version}\n"));
    }
    for (component, objects) in &contents.objects {
        out.push_str(&format!("{component} ({} objects)\n", objects.len()));
        for object in objects {
            out.push_str(&format!(
                "  {}/{}\n",
                object["kind"].as_str().unwrap_or("?"),
                object["metadata"]["name"].as_str().unwrap_or("?")
            ));
        }
    }
    for (key, value) in &backup.metadata {
        out.push_str(&format!("  {key} = {value}\n"));
    }
    out
}

pub fn format_history(entries: &[HistoryEntry]) -> String {
    if entries.is_empty() {
        return "No history.\n".to_string();
    }
    let mut out = String::new();
    for entry in entries {
        match entry {
            HistoryEntry::Deployment { recorded_at, outcome } => out.push_str(&format!(
                "{recorded_at}  deploy    {:<40} {} {}\n",
                outcome.id,
                outcome.strategy,
                state_label(outcome.final_state)
            )),
            HistoryEntry::Rollback { recorded_at, outcome } => out.push_str(&format!(
                "{recorded_at}  rollback  {:<40} {} {}\n",
                outcome.id,
                outcome.rollback_type,
                status_label(outcome.status)
            )),
        }
    }
    out
}
