//! Admission: decides whether a metered operation may start.
//!
//! A check reports capacity, it does not reserve it. The amount actually
//! taken is fixed when the operation is consumed, under the same account lock.

use crate::ledger::Prepared;
use crate::{Account, FeatureCheck, Plan, QuotaLedger, Result};
use quota_common::{AdmissionResult, Category, Denial, PlanFeature, SubscriptionStatus};
use tracing::{debug, instrument, warn};

pub(crate) fn subscription_denial(plan: &Plan, account: &Account) -> Option<Denial> {
    (plan.is_paid() && account.subscription_status != SubscriptionStatus::Active).then_some(
        Denial::SubscriptionInactive {
            status: account.subscription_status,
        },
    )
}

pub(crate) fn file_size_denial(plan: &Plan, requested_bytes: u64) -> Option<Denial> {
    let limit = plan.max_file_size_bytes()?;
    (requested_bytes > 0 && requested_bytes > limit).then_some(Denial::FileTooLarge {
        limit_mb: plan.max_file_size_mb,
        file_bytes: requested_bytes,
    })
}

/// Capacity view of one category, before any deny decision.
pub(crate) fn capacity(plan: &Plan, account: &Account, category: Category) -> AdmissionResult {
    let allowance = plan.allowance(category);
    let used = account.usage.used(category);
    let credits = account.credit_pool.balance(category);
    let plan_remaining = allowance.remaining(used);

    let allowed = match plan_remaining {
        None => true,
        Some(remaining) => remaining > 0 || credits > 0,
    };

    AdmissionResult {
        allowed,
        reason: None,
        denial: None,
        upgrade_required: false,
        category,
        plan_limit: allowance,
        plan_used: used,
        plan_remaining,
        topup_available: credits,
        total_available: plan_remaining.map(|r| r.saturating_add(credits)),
        using_topup: allowed && plan_remaining == Some(0),
    }
}

impl QuotaLedger {
    pub(crate) async fn storage_denial(
        &self,
        plan: &Plan,
        account_id: &str,
        requested_bytes: u64,
    ) -> Result<Option<Denial>> {
        let Some(limit_bytes) = plan.storage_limit_bytes() else {
            return Ok(None);
        };

        // Read outside the ledger record; concurrent uploads may make this stale.
        let used_bytes = self.files.stored_bytes(account_id).await?;
        Ok((used_bytes.saturating_add(requested_bytes) > limit_bytes).then_some(
            Denial::StorageExceeded {
                used_bytes,
                requested_bytes,
                limit_bytes,
            },
        ))
    }

    /// Decides whether an operation in `category` may proceed.
    ///
    /// Denials come back as `allowed = false` with a structured reason; only
    /// a missing account or plan, or a store failure, is an `Err`.
    #[instrument(skip(self))]
    pub async fn check(
        &self,
        account_id: &str,
        category: Category,
        requested_bytes: u64,
    ) -> Result<AdmissionResult> {
        let _guard = self.locks.acquire(account_id).await;
        let Prepared {
            mut account,
            plan,
            dirty,
            ..
        } = self.prepare(account_id).await?;
        if dirty {
            account = self.persist(&account).await?;
        }

        let result = capacity(&plan, &account, category);

        let denial = match subscription_denial(&plan, &account)
            .or_else(|| file_size_denial(&plan, requested_bytes))
        {
            Some(denial) => Some(denial),
            None => match self.storage_denial(&plan, account_id, requested_bytes).await? {
                Some(denial) => Some(denial),
                None if !result.allowed => Some(Denial::QuotaExhausted {
                    category,
                    used: result.plan_used,
                    limit: result.plan_limit.limit().unwrap_or(0),
                }),
                None => None,
            },
        };

        match denial {
            Some(denial) => {
                warn!(account_id, %category, reason = %denial, "operation not admitted");
                Ok(result.deny(denial))
            }
            None => {
                debug!(
                    account_id,
                    %category,
                    plan_remaining = ?result.plan_remaining,
                    topup = result.topup_available,
                    "operation admitted"
                );
                Ok(result)
            }
        }
    }

    /// Gates a plan feature such as OCR or digital signatures.
    #[instrument(skip(self))]
    pub async fn check_feature(
        &self,
        account_id: &str,
        feature: PlanFeature,
    ) -> Result<FeatureCheck> {
        let account = self.accounts.get_account(account_id).await?;
        let plan = self.resolve_plan(&account).await?;

        let denial = subscription_denial(&plan, &account).or_else(|| {
            (!plan.features.has(feature)).then_some(Denial::FeatureUnavailable { feature })
        });

        Ok(FeatureCheck {
            allowed: denial.is_none(),
            feature,
            plan_id: plan.plan_id,
            reason: denial.as_ref().map(Denial::reason),
            denial,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::default_catalog;
    use quota_common::Allowance;

    fn plan(id: &str) -> Plan {
        default_catalog()
            .into_iter()
            .find(|p| p.plan_id == id)
            .unwrap()
    }

    #[test]
    fn test_capacity_plan_then_topup() {
        let free = plan("free");
        let mut account = Account::new("acct", "free", "Free");

        account.usage.counts.insert(Category::EditTools, 4);
        let result = capacity(&free, &account, Category::EditTools);
        assert!(result.allowed);
        assert!(!result.using_topup);
        assert_eq!(result.plan_remaining, Some(1));

        account.usage.counts.insert(Category::EditTools, 5);
        assert!(!capacity(&free, &account, Category::EditTools).allowed);

        assert!(account.credit_pool.add(Category::EditTools, 2));
        let result = capacity(&free, &account, Category::EditTools);
        assert!(result.allowed);
        assert!(result.using_topup);
        assert_eq!(result.total_available, Some(2));
    }

    #[test]
    fn test_capacity_unlimited() {
        let business = plan("business");
        let mut account = Account::new("acct", "business", "Business");
        account.usage.counts.insert(Category::Conversion, 1_000_000);

        let result = capacity(&business, &account, Category::Conversion);
        assert!(result.allowed);
        assert_eq!(result.plan_limit, Allowance::Unlimited);
        assert_eq!(result.total_available, None);
        assert!(!result.using_topup);
    }

    #[test]
    fn test_subscription_and_file_size_rules() {
        let starter = plan("starter");
        let mut account = Account::new("acct", "starter", "Starter");
        assert!(matches!(
            subscription_denial(&starter, &account),
            Some(Denial::SubscriptionInactive { .. })
        ));
        account.subscription_status = SubscriptionStatus::Active;
        assert!(subscription_denial(&starter, &account).is_none());

        // Free plans ignore subscription status.
        assert!(subscription_denial(&plan("free"), &Account::new("f", "free", "Free")).is_none());

        let mb = 1024 * 1024;
        assert!(file_size_denial(&starter, 50 * mb).is_none());
        assert!(matches!(
            file_size_denial(&starter, 50 * mb + 1),
            Some(Denial::FileTooLarge { limit_mb: 50, .. })
        ));
        assert!(file_size_denial(&starter, 0).is_none());
    }
}
