use crate::{
    Account, AccountLocks, AccountStore, CategoryStats, CycleInfo, FileUsage, LedgerConfig,
    LedgerError, Plan, PlanStore, Result, UsageStats,
};
use chrono::Utc;
use quota_common::{Category, SubscriptionStatus};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Account state loaded under the account lock, with its resolved plan and
/// any housekeeping (migration, cycle reset) already applied in memory.
pub(crate) struct Prepared {
    pub account: Account,
    pub plan: Plan,
    pub dirty: bool,
    pub reset_applied: bool,
}

/// Entry point for admission checks and ledger mutations.
pub struct QuotaLedger {
    pub(crate) accounts: Arc<dyn AccountStore>,
    pub(crate) plans: Arc<dyn PlanStore>,
    pub(crate) files: Arc<dyn FileUsage>,
    pub(crate) locks: AccountLocks,
    pub(crate) config: LedgerConfig,
}

impl QuotaLedger {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        plans: Arc<dyn PlanStore>,
        files: Arc<dyn FileUsage>,
        config: LedgerConfig,
    ) -> Self {
        Self {
            accounts,
            plans,
            files,
            locks: AccountLocks::new(),
            config,
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Accounts with an operation in flight or queued.
    pub fn active_accounts(&self) -> usize {
        self.locks.tracked_accounts()
    }

    /// Resolves the effective plan: explicit reference, then stored plan
    /// name, then the configured default. A missing default is an error and
    /// must deny the operation.
    pub async fn resolve_plan(&self, account: &Account) -> Result<Plan> {
        if let Some(plan_id) = account.plan_id.as_deref() {
            if let Some(plan) = self.plans.get_plan(plan_id).await? {
                return Ok(plan);
            }
            debug!(account_id = %account.account_id, plan_id, "plan reference unresolved, trying name");
        }

        if let Some(name) = account.plan_name.as_deref() {
            if let Some(plan) = self.plans.get_plan(&name.to_lowercase()).await? {
                return Ok(plan);
            }
            if let Some(plan) = self.plans.find_plan_by_name(name).await? {
                return Ok(plan);
            }
        }

        self.plans
            .get_plan(&self.config.default_plan_id)
            .await?
            .ok_or_else(|| LedgerError::DefaultPlanMissing(self.config.default_plan_id.clone()))
    }

    /// Loads the account, resolves its plan, migrates old records, rolls
    /// the usage cycle over when it has expired and refunds reservations
    /// older than the configured TTL. Nothing is persisted here;
    /// `dirty` tells the caller whether housekeeping changed the record.
    pub(crate) async fn prepare(&self, account_id: &str) -> Result<Prepared> {
        let mut account = self.accounts.get_account(account_id).await?;
        let plan = self.resolve_plan(&account).await?;

        let mut dirty = account.migrate();

        let now = Utc::now();
        let reset_applied = account
            .usage
            .cycle_expired(now, self.config.cycle_length());
        if reset_applied {
            info!(account_id, previous_reset = %account.usage.reset_date, "usage cycle rolled over");
            account.reset_cycle(now);
            dirty = true;
        }

        let expired = account.expire_reservations(now - self.config.reservation_ttl());
        for reservation in &expired {
            warn!(
                account_id,
                reservation_id = %reservation.reservation_id,
                category = %reservation.category,
                "unsettled reservation expired and refunded"
            );
        }
        dirty |= !expired.is_empty();

        Ok(Prepared {
            account,
            plan,
            dirty,
            reset_applied,
        })
    }

    /// Writes the account back; a failed write leaves the stored record as it was.
    pub(crate) async fn persist(&self, account: &Account) -> Result<Account> {
        self.accounts.update_account(account).await.map_err(|e| {
            warn!(account_id = %account.account_id, error = %e, "ledger write aborted");
            e
        })
    }

    /// Creates an account at signup: default plan unless one is named, zero
    /// usage, zero credits.
    #[instrument(skip(self))]
    pub async fn open_account(
        &self,
        account_id: Option<String>,
        plan: Option<&str>,
    ) -> Result<Account> {
        let account_id = account_id.unwrap_or_else(|| Uuid::new_v4().to_string());

        let plan = match plan {
            Some(reference) => self.lookup_plan(reference).await?,
            None => self
                .plans
                .get_plan(&self.config.default_plan_id)
                .await?
                .ok_or_else(|| {
                    LedgerError::DefaultPlanMissing(self.config.default_plan_id.clone())
                })?,
        };

        let account = Account::new(account_id, &plan.plan_id, &plan.name);
        self.accounts.insert_account(&account).await?;
        info!(account_id = %account.account_id, plan = %plan.plan_id, "account opened");
        Ok(account)
    }

    pub async fn get_account(&self, account_id: &str) -> Result<Account> {
        self.accounts.get_account(account_id).await
    }

    pub async fn list_plans(&self) -> Result<Vec<Plan>> {
        self.plans.list_plans().await
    }

    async fn lookup_plan(&self, reference: &str) -> Result<Plan> {
        if let Some(plan) = self.plans.get_plan(reference).await? {
            return Ok(plan);
        }
        self.plans
            .find_plan_by_name(reference)
            .await?
            .ok_or_else(|| LedgerError::PlanNotFound(reference.to_string()))
    }

    /// Adds purchased credits after the payment collaborator has captured
    /// the payment. Returns the new balance for the category.
    #[instrument(skip(self))]
    pub async fn purchase_credits(
        &self,
        account_id: &str,
        category: Category,
        amount: u64,
    ) -> Result<u64> {
        if amount == 0 {
            return Err(LedgerError::InvalidAmount(
                "credit purchase must be positive".to_string(),
            ));
        }

        let _guard = self.locks.acquire(account_id).await;
        let Prepared { mut account, .. } = self.prepare(account_id).await?;

        if !account.credit_pool.add(category, amount) {
            warn!(account_id, %category, amount, "credit purchase would overflow the pool");
            return Err(LedgerError::InvalidAmount(format!(
                "purchasing {amount} {category} credits exceeds the maximum pool size"
            )));
        }
        let account = self.persist(&account).await?;
        let balance = account.credit_pool.balance(category);

        info!(account_id, %category, amount, balance, "credits purchased");
        Ok(balance)
    }

    /// Moves the account to another plan. Usage counters and credits carry
    /// over unchanged.
    #[instrument(skip(self))]
    pub async fn change_plan(&self, account_id: &str, plan_ref: &str) -> Result<Plan> {
        let plan = self.lookup_plan(plan_ref).await?;

        let _guard = self.locks.acquire(account_id).await;
        let Prepared { mut account, .. } = self.prepare(account_id).await?;

        account.plan_id = Some(plan.plan_id.clone());
        account.plan_name = Some(plan.name.clone());
        self.persist(&account).await?;

        info!(account_id, plan = %plan.plan_id, "plan changed");
        Ok(plan)
    }

    #[instrument(skip(self))]
    pub async fn set_subscription_status(
        &self,
        account_id: &str,
        status: SubscriptionStatus,
    ) -> Result<Account> {
        let _guard = self.locks.acquire(account_id).await;
        let Prepared { mut account, .. } = self.prepare(account_id).await?;

        account.subscription_status = status;
        let account = self.persist(&account).await?;

        info!(account_id, ?status, "subscription status updated");
        Ok(account)
    }

    /// Plan usage, credit pool and cycle position for display.
    #[instrument(skip(self))]
    pub async fn usage_stats(&self, account_id: &str) -> Result<UsageStats> {
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

        let storage_used_bytes = self.files.stored_bytes(account_id).await?;

        let categories = Category::ALL
            .into_iter()
            .map(|category| {
                let allowance = plan.allowance(category);
                let used = account.usage.used(category);
                let credits = account.credit_pool.entry(category);
                CategoryStats {
                    category,
                    plan_limit: allowance,
                    plan_used: used,
                    plan_remaining: allowance.remaining(used),
                    credits_purchased: credits.purchased,
                    credits_consumed: credits.consumed,
                    credits_balance: credits.balance(),
                }
            })
            .collect();

        let cycle_start = account.usage.reset_date;
        let elapsed_days = (Utc::now() - cycle_start).num_days();

        Ok(UsageStats {
            account_id: account.account_id.clone(),
            plan_id: plan.plan_id.clone(),
            plan_name: plan.name.clone(),
            subscription_status: account.subscription_status,
            categories,
            lifetime_credits_purchased: account.credit_pool.lifetime_purchased(),
            lifetime_credits_consumed: account.credit_pool.lifetime_consumed(),
            max_file_size_mb: plan.max_file_size_mb,
            storage_gb: plan.storage_gb,
            storage_used_bytes,
            cycle: CycleInfo {
                cycle_start,
                cycle_end: cycle_start + self.config.cycle_length(),
                days_remaining: (self.config.cycle_days - elapsed_days).max(0),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemoryFileUsage, InMemoryPlanStore, InMemoryStorage};

    fn ledger_with(plans: InMemoryPlanStore) -> (Arc<InMemoryStorage>, QuotaLedger) {
        let storage = Arc::new(InMemoryStorage::new());
        let ledger = QuotaLedger::new(
            storage.clone(),
            Arc::new(plans),
            Arc::new(InMemoryFileUsage::new()),
            LedgerConfig::default(),
        );
        (storage, ledger)
    }

    #[tokio::test]
    async fn test_plan_resolution_fallback_chain() {
        let (_, ledger) = ledger_with(InMemoryPlanStore::with_defaults());

        let mut account = Account::new("acct", "starter", "Starter");
        assert_eq!(ledger.resolve_plan(&account).await.unwrap().plan_id, "starter");

        // Dangling reference falls back to the stored name.
        account.plan_id = Some("retired-plan".to_string());
        account.plan_name = Some("PROFESSIONAL".to_string());
        assert_eq!(ledger.resolve_plan(&account).await.unwrap().plan_id, "professional");

        // Neither resolves: default plan.
        account.plan_name = Some("Legacy Gold".to_string());
        assert_eq!(ledger.resolve_plan(&account).await.unwrap().plan_id, "free");

        account.plan_id = None;
        account.plan_name = None;
        assert_eq!(ledger.resolve_plan(&account).await.unwrap().plan_id, "free");
    }

    #[tokio::test]
    async fn test_missing_default_plan_is_an_error() {
        let plans = InMemoryPlanStore::with_defaults();
        plans.remove_plan("free").await;
        let (_, ledger) = ledger_with(plans);

        let account = Account::new("acct", "gone", "Gone");
        let result = ledger.resolve_plan(&account).await;
        assert!(matches!(result, Err(LedgerError::DefaultPlanMissing(_))));

        let opened = ledger.open_account(Some("new".to_string()), None).await;
        assert!(matches!(opened, Err(LedgerError::DefaultPlanMissing(_))));
    }

    #[tokio::test]
    async fn test_open_account_defaults() {
        let (storage, ledger) = ledger_with(InMemoryPlanStore::with_defaults());

        let account = ledger.open_account(None, None).await.unwrap();
        assert!(Uuid::parse_str(&account.account_id).is_ok());
        assert_eq!(account.plan_id.as_deref(), Some("free"));
        assert!(Category::ALL
            .iter()
            .all(|c| account.usage.used(*c) == 0 && account.credit_pool.balance(*c) == 0));

        let stored = storage.get_account(&account.account_id).await.unwrap();
        assert_eq!(stored.revision, 0);

        let named = ledger
            .open_account(Some("pro".to_string()), Some("Professional"))
            .await
            .unwrap();
        assert_eq!(named.plan_id.as_deref(), Some("professional"));

        let unknown = ledger.open_account(Some("x".to_string()), Some("platinum")).await;
        assert!(matches!(unknown, Err(LedgerError::PlanNotFound(_))));
    }
}
