use rollguard_ctl::report::{format_backup, format_backups, render};
use rollguard_ctl::{Orchestrator, OutputFormat};

pub async fn create(
    orchestrator: &Orchestrator,
    name: Option<&str>,
    output: OutputFormat,
) -> anyhow::Result<()> {
    let backup = orchestrator.create_backup(name).await?;
    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&backup)?),
        OutputFormat::Text => println!("✓ Backup {} written to {}", backup.id, backup.path.display()),
    }
    Ok(())
}

pub fn list(orchestrator: &Orchestrator, output: OutputFormat) -> anyhow::Result<()> {
    let backups = orchestrator.list_backups()?;
    println!("{}", render(output, &backups, |b| format_backups(b))?);
    Ok(())
}

pub fn show(orchestrator: &Orchestrator, name: &str, output: OutputFormat) -> anyhow::Result<()> {
    let (backup, contents) = orchestrator.show_backup(name)?;
    match output {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "backup": backup,
                "contents": contents,
            }))?
        ),
        OutputFormat::Text => println!("{}", format_backup(&backup, &contents)),
    }
    Ok(())
}
