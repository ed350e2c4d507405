use crate::admission::{file_size_denial, subscription_denial};
use crate::consume::{allocate, validate_count};
use crate::ledger::Prepared;
use crate::{BatchOutcome, LedgerError, QuotaLedger, Result};
use quota_common::{BatchOperation, ConsumptionBreakdown, Denial};
use tracing::{info, instrument, warn};

impl QuotaLedger {
    /// Validates every operation against the account as loaded once, and
    /// persists all of them in a single write only if every one passes.
    ///
    /// Operations in the same category draw on the capacity left by the ones
    /// before them. Any failure leaves the account exactly as it was.
    #[instrument(skip(self, operations), fields(operations = operations.len()))]
    pub async fn consume_batch(
        &self,
        account_id: &str,
        operations: &[BatchOperation],
    ) -> Result<BatchOutcome> {
        if operations.is_empty() {
            return Err(LedgerError::InvalidAmount("batch is empty".to_string()));
        }
        for op in operations {
            validate_count(op.count)?;
        }

        let _guard = self.locks.acquire(account_id).await;
        let Prepared {
            mut account,
            plan,
            reset_applied,
            ..
        } = self.prepare(account_id).await?;

        let reject = |denial: Denial| {
            warn!(account_id, reason = %denial, "batch rejected");
            LedgerError::Denied(denial)
        };

        if let Some(denial) = subscription_denial(&plan, &account) {
            return Err(reject(denial));
        }
        if let Some(denial) = operations
            .iter()
            .find_map(|op| file_size_denial(&plan, op.requested_bytes))
        {
            return Err(reject(denial));
        }

        let total_bytes = operations
            .iter()
            .try_fold(0u64, |total, op| total.checked_add(op.requested_bytes))
            .ok_or_else(|| {
                warn!(account_id, "batch rejected: requested bytes overflow");
                LedgerError::InvalidAmount("total requested bytes overflow".to_string())
            })?;
        if total_bytes > 0 {
            if let Some(denial) = self.storage_denial(&plan, account_id, total_bytes).await? {
                return Err(reject(denial));
            }
        }

        let mut breakdowns = Vec::with_capacity(operations.len());
        for op in operations {
            let allowance = plan.allowance(op.category);
            let (from_plan, from_credits) = allocate(
                op.category,
                allowance,
                account.usage.used(op.category),
                account.credit_pool.balance(op.category),
                op.count,
            )
            .map_err(reject)?;

            if !account.apply_debit(op.category, allowance, from_plan, from_credits) {
                return Err(reject(Denial::InsufficientCapacity {
                    category: op.category,
                    requested: op.count,
                    available: account.credit_pool.balance(op.category),
                }));
            }

            breakdowns.push(ConsumptionBreakdown {
                category: op.category,
                from_plan,
                from_credits,
                credits_remaining: account.credit_pool.balance(op.category),
            });
        }

        self.persist(&account).await?;

        info!(account_id, operations = breakdowns.len(), reset_applied, "batch applied");
        Ok(BatchOutcome {
            breakdowns,
            reset_applied,
        })
    }
}
