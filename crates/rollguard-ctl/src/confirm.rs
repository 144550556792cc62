//! Operator confirmation on the terminal.

use std::io::{BufRead, Write};

use async_trait::async_trait;
use rollguard_core::RollbackRequest;
use rollguard_rollback::Confirmer;
use tracing::warn;

/// Asks on stderr and reads the answer from stdin. Only `yes` confirms.
pub struct StdinConfirmer;

fn ask(request: &RollbackRequest) -> std::io::Result<bool> {
    let mut stderr = std::io::stderr().lock();
    writeln!(
        stderr,
        "About to run a {} rollback to {} in production.\nReason: {}",
        request.rollback_type, request.target, request.reason
    )?;
    write!(stderr, "Type 'yes' to continue: ")?;
    stderr.flush()?;

    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(answer.trim() == "yes")
}

#[async_trait]
impl Confirmer for StdinConfirmer {
    async fn confirm(&self, request: &RollbackRequest) -> bool {
        let request = request.clone();
        match tokio::task::spawn_blocking(move || ask(&request)).await {
            Ok(Ok(answer)) => answer,
            Ok(Err(e)) => {
                warn!(error = %e, "could not read confirmation");
                false
            }
            Err(e) => {
                warn!(error = %e, "confirmation prompt panicked");
                false
            }
        }
    }
}
