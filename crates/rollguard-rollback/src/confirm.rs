//! Operator confirmation.

use async_trait::async_trait;
use rollguard_core::RollbackRequest;

/// Asks an operator whether a rollback may proceed.
#[async_trait]
pub trait Confirmer: Send + Sync {
    async fn confirm(&self, request: &RollbackRequest) -> bool;
}

/// Always gives the same answer. Used for `--yes` and in tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedAnswer(pub bool);

#[async_trait]
impl Confirmer for FixedAnswer {
    async fn confirm(&self, _request: &RollbackRequest) -> bool {
        self.0
    }
}
