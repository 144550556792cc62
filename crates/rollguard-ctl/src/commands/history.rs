use rollguard_ctl::report::{format_history, render};
use rollguard_ctl::{Orchestrator, OutputFormat};

pub fn history(orchestrator: &Orchestrator, limit: usize, output: OutputFormat) -> anyhow::Result<()> {
    let entries = orchestrator.history(limit)?;
    println!("{}", render(output, &entries, |e| format_history(e))?);
    Ok(())
}
