//! The write path: debits plan allowance first, then purchased credits.

use crate::ledger::Prepared;
use crate::{LedgerError, QuotaLedger, Reservation, Result};
use chrono::Utc;
use quota_common::{Allowance, Category, ConsumptionBreakdown, Denial};
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Splits `count` units across remaining plan allowance and credits.
///
/// Returns the denial when the two together cannot cover the full amount;
/// a consume is never partially applied.
pub(crate) fn allocate(
    category: Category,
    allowance: Allowance,
    used: u64,
    credits: u64,
    count: u64,
) -> std::result::Result<(u64, u64), Denial> {
    let Some(plan_remaining) = allowance.remaining(used) else {
        return Ok((count, 0));
    };

    let from_plan = count.min(plan_remaining);
    let remaining = count - from_plan;
    if remaining > credits {
        return Err(if plan_remaining == 0 && credits == 0 {
            Denial::QuotaExhausted {
                category,
                used,
                limit: allowance.limit().unwrap_or(0),
            }
        } else {
            Denial::InsufficientCapacity {
                category,
                requested: count,
                available: plan_remaining.saturating_add(credits),
            }
        });
    }

    Ok((from_plan, remaining))
}

pub(crate) fn validate_count(count: u64) -> Result<()> {
    if count == 0 {
        return Err(LedgerError::InvalidAmount(
            "consume count must be positive".to_string(),
        ));
    }
    Ok(())
}

impl QuotaLedger {
    async fn debit(
        &self,
        account_id: &str,
        category: Category,
        count: u64,
        hold: bool,
    ) -> Result<(ConsumptionBreakdown, Option<Reservation>)> {
        validate_count(count)?;

        let _guard = self.locks.acquire(account_id).await;
        let Prepared {
            mut account, plan, ..
        } = self.prepare(account_id).await?;

        let allowance = plan.allowance(category);
        let (from_plan, from_credits) = allocate(
            category,
            allowance,
            account.usage.used(category),
            account.credit_pool.balance(category),
            count,
        )
        .map_err(|denial| {
            warn!(account_id, %category, count, reason = %denial, "consume rejected");
            LedgerError::Denied(denial)
        })?;

        if !account.apply_debit(category, allowance, from_plan, from_credits) {
            // allocate() already bounded from_credits by the balance
            return Err(LedgerError::Denied(Denial::InsufficientCapacity {
                category,
                requested: count,
                available: account.credit_pool.balance(category),
            }));
        }

        let reservation = hold.then(|| Reservation {
            reservation_id: Uuid::new_v4(),
            category,
            from_plan,
            from_credits,
            plan_charged: if allowance.is_unlimited() { 0 } else { from_plan },
            cycle_anchor: account.usage.reset_date,
            created_at: Utc::now(),
        });
        if let Some(reservation) = &reservation {
            account
                .reservations
                .insert(reservation.reservation_id, reservation.clone());
        }

        let account = self.persist(&account).await?;

        let breakdown = ConsumptionBreakdown {
            category,
            from_plan,
            from_credits,
            credits_remaining: account.credit_pool.balance(category),
        };
        info!(
            account_id,
            %category,
            from_plan,
            from_credits,
            credits_remaining = breakdown.credits_remaining,
            reserved = hold,
            "usage debited"
        );
        Ok((breakdown, reservation))
    }

    /// Debits `count` units for an operation that has completed.
    ///
    /// Not idempotent: call exactly once per real operation. On a transient
    /// error the outcome is unknown until usage is re-read.
    #[instrument(skip(self))]
    pub async fn consume(
        &self,
        account_id: &str,
        category: Category,
        count: u64,
    ) -> Result<ConsumptionBreakdown> {
        let (breakdown, _) = self.debit(account_id, category, count, false).await?;
        Ok(breakdown)
    }

    /// Debits capacity before the operation runs. Settle the reservation with
    /// [`commit`](Self::commit) on success or [`refund`](Self::refund) on failure.
    #[instrument(skip(self))]
    pub async fn reserve(
        &self,
        account_id: &str,
        category: Category,
        count: u64,
    ) -> Result<Reservation> {
        let (_, reservation) = self.debit(account_id, category, count, true).await?;
        reservation.ok_or_else(|| LedgerError::Storage("reservation was not recorded".to_string()))
    }

    /// Keeps the debit of a reservation. Fails with `ReservationNotFound` once
    /// the reservation has expired and been refunded.
    #[instrument(skip(self))]
    pub async fn commit(&self, account_id: &str, reservation_id: Uuid) -> Result<Reservation> {
        let _guard = self.locks.acquire(account_id).await;
        let Prepared { mut account, .. } = self.prepare(account_id).await?;

        let reservation = account
            .reservations
            .remove(&reservation_id)
            .ok_or(LedgerError::ReservationNotFound(reservation_id))?;
        self.persist(&account).await?;

        info!(account_id, %reservation_id, "reservation committed");
        Ok(reservation)
    }

    /// Returns a reservation's debit. Credits always go back to the pool;
    /// plan units only if the cycle they came from is still current.
    #[instrument(skip(self))]
    pub async fn refund(
        &self,
        account_id: &str,
        reservation_id: Uuid,
    ) -> Result<ConsumptionBreakdown> {
        let _guard = self.locks.acquire(account_id).await;
        let Prepared { mut account, .. } = self.prepare(account_id).await?;

        let reservation = account
            .reservations
            .get(&reservation_id)
            .cloned()
            .ok_or(LedgerError::ReservationNotFound(reservation_id))?;
        let category = reservation.category;
        let plan_restored = account.release_reservation(&reservation);

        let account = self.persist(&account).await?;

        let refunded = ConsumptionBreakdown {
            category,
            from_plan: plan_restored,
            from_credits: reservation.from_credits,
            credits_remaining: account.credit_pool.balance(category),
        };
        info!(account_id, %reservation_id, %refunded, "reservation refunded");
        Ok(refunded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_plan_then_credits() {
        let split = allocate(Category::EditTools, Allowance::Limited(5), 4, 10, 3);
        assert_eq!(split, Ok((1, 2)));

        let split = allocate(Category::EditTools, Allowance::Limited(5), 0, 0, 5);
        assert_eq!(split, Ok((5, 0)));

        let split = allocate(Category::EditTools, Allowance::Limited(5), 5, 1, 1);
        assert_eq!(split, Ok((0, 1)));
    }

    #[test]
    fn test_allocate_rejects_shortfall() {
        let denial = allocate(Category::EditTools, Allowance::Limited(5), 4, 1, 3).unwrap_err();
        assert_eq!(
            denial,
            Denial::InsufficientCapacity {
                category: Category::EditTools,
                requested: 3,
                available: 2,
            }
        );

        let denial = allocate(Category::Conversion, Allowance::Limited(10), 10, 0, 1).unwrap_err();
        assert!(matches!(denial, Denial::QuotaExhausted { used: 10, limit: 10, .. }));
    }

    #[test]
    fn test_allocate_unlimited_ignores_credits() {
        let split = allocate(Category::Conversion, Allowance::Unlimited, 50, 9, 4);
        assert_eq!(split, Ok((4, 0)));
    }

    #[test]
    fn test_zero_count_rejected() {
        assert!(matches!(validate_count(0), Err(LedgerError::InvalidAmount(_))));
        assert!(validate_count(1).is_ok());
    }
}
