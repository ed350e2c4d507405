// Quota Ledger - plan allowance and purchased-credit accounting per tenant account
use quota_common::Denial;
use thiserror::Error;
use uuid::Uuid;

mod admission;
mod batch;
mod config;
mod consume;
mod ledger;
mod locks;
mod plan;
mod storage;
mod types;

pub use config::LedgerConfig;
pub use ledger::QuotaLedger;
pub use locks::{AccountGuard, AccountLocks};
pub use plan::{default_catalog, Plan, PlanFeatures, FREE_PLAN_ID};
pub use storage::{AccountStore, FileUsage, InMemoryFileUsage, InMemoryPlanStore, InMemoryStorage, PlanStore};
pub use types::*;

// Error Types
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Account not found: {0}")]
    AccountNotFound(String),
    #[error("Account already exists: {0}")]
    AccountExists(String),
    #[error("Plan not found: {0}")]
    PlanNotFound(String),
    #[error("Default plan '{0}' is not configured")]
    DefaultPlanMissing(String),
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("Reservation not found: {0}")]
    ReservationNotFound(Uuid),
    #[error("Operation denied: {0}")]
    Denied(Denial),
    #[error("Concurrent modification of account {0}")]
    Conflict(String),
    #[error("Storage error: {0}")]
    Storage(String),
}

impl LedgerError {
    /// Store-level failures; the caller's view of the account is unknown and
    /// must be re-read before retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::Conflict(_) | LedgerError::Storage(_))
    }

    pub fn denial(&self) -> Option<&Denial> {
        match self {
            LedgerError::Denied(denial) => Some(denial),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use quota_common::Category;

    #[test]
    fn test_transient_classification() {
        assert!(LedgerError::Storage("connection reset".into()).is_transient());
        assert!(LedgerError::Conflict("acct".into()).is_transient());
        assert!(!LedgerError::AccountNotFound("acct".into()).is_transient());

        let denied = LedgerError::Denied(Denial::QuotaExhausted {
            category: Category::Conversion,
            used: 10,
            limit: 10,
        });
        assert!(!denied.is_transient());
        assert!(denied.denial().is_some());
    }
}
