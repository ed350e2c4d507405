use chrono::{DateTime, Duration, Utc};
use quota_common::{
    Allowance, Category, ConsumptionBreakdown, Denial, PlanFeature, SubscriptionStatus,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Version written by this build. Older records are upgraded by
/// [`Account::migrate`] when they are loaded.
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

fn unix_epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

// Plan usage for the current cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageCounters {
    #[serde(default)]
    pub counts: BTreeMap<Category, u64>,
    /// Start of the current cycle. Records without one are treated as
    /// long expired so the next access starts a fresh cycle.
    #[serde(default = "unix_epoch")]
    pub reset_date: DateTime<Utc>,
}

impl Default for UsageCounters {
    fn default() -> Self {
        Self::starting_at(unix_epoch())
    }
}

impl UsageCounters {
    pub fn starting_at(reset_date: DateTime<Utc>) -> Self {
        Self {
            counts: Category::ALL.into_iter().map(|c| (c, 0)).collect(),
            reset_date,
        }
    }

    pub fn used(&self, category: Category) -> u64 {
        self.counts.get(&category).copied().unwrap_or(0)
    }

    pub fn cycle_expired(&self, now: DateTime<Utc>, cycle: Duration) -> bool {
        now >= self.reset_date + cycle
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditBalance {
    pub purchased: u64,
    pub consumed: u64,
}

impl CreditBalance {
    pub fn balance(&self) -> u64 {
        self.purchased.saturating_sub(self.consumed)
    }
}

/// Purchased, non-expiring capacity. Balance is always `purchased - consumed`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditPool {
    #[serde(default)]
    pub entries: BTreeMap<Category, CreditBalance>,
}

impl CreditPool {
    pub fn entry(&self, category: Category) -> CreditBalance {
        self.entries.get(&category).copied().unwrap_or_default()
    }

    pub fn balance(&self, category: Category) -> u64 {
        self.entry(category).balance()
    }

    pub fn lifetime_purchased(&self) -> u64 {
        self.entries
            .values()
            .fold(0, |total, e| total.saturating_add(e.purchased))
    }

    pub fn lifetime_consumed(&self) -> u64 {
        self.entries
            .values()
            .fold(0, |total, e| total.saturating_add(e.consumed))
    }

    /// Returns `false`, leaving the pool untouched, when `purchased` would overflow.
    #[must_use]
    pub(crate) fn add(&mut self, category: Category, amount: u64) -> bool {
        let entry = self.entries.entry(category).or_default();
        match entry.purchased.checked_add(amount) {
            Some(purchased) => {
                entry.purchased = purchased;
                true
            }
            None => false,
        }
    }

    /// Returns `false`, leaving the pool untouched, when the balance is short.
    pub(crate) fn debit(&mut self, category: Category, amount: u64) -> bool {
        let entry = self.entries.entry(category).or_default();
        if entry.balance() < amount {
            return false;
        }
        entry.consumed += amount;
        true
    }

    pub(crate) fn restore(&mut self, category: Category, amount: u64) {
        let entry = self.entries.entry(category).or_default();
        entry.consumed = entry.consumed.saturating_sub(amount);
    }
}

/// Capacity debited ahead of a metered operation, settled later by
/// commit or refund.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub reservation_id: Uuid,
    pub category: Category,
    pub from_plan: u64,
    pub from_credits: u64,
    /// Units actually added to the usage counter; zero for unlimited categories.
    #[serde(default)]
    pub plan_charged: u64,
    /// Reset date of the cycle the plan units were taken from.
    pub cycle_anchor: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub account_id: String,
    #[serde(default)]
    pub plan_id: Option<String>,
    #[serde(default)]
    pub plan_name: Option<String>,
    #[serde(default)]
    pub subscription_status: SubscriptionStatus,
    #[serde(default)]
    pub usage: UsageCounters,
    #[serde(default)]
    pub credit_pool: CreditPool,
    #[serde(default)]
    pub reservations: BTreeMap<Uuid, Reservation>,

    // Metadata
    #[serde(default)]
    pub schema_version: u32,
    /// Bumped by the store on every successful write.
    #[serde(default)]
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl Account {
    pub fn new(account_id: impl Into<String>, plan_id: &str, plan_name: &str) -> Self {
        let now = Utc::now();
        Self {
            account_id: account_id.into(),
            plan_id: Some(plan_id.to_string()),
            plan_name: Some(plan_name.to_string()),
            subscription_status: SubscriptionStatus::Inactive,
            usage: UsageCounters::starting_at(now),
            credit_pool: CreditPool {
                entries: Category::ALL
                    .into_iter()
                    .map(|c| (c, CreditBalance::default()))
                    .collect(),
            },
            reservations: BTreeMap::new(),
            schema_version: CURRENT_SCHEMA_VERSION,
            revision: 0,
            created_at: now,
            last_updated: now,
        }
    }

    /// Brings a record written by an older schema up to date. Returns whether
    /// anything changed and the record needs to be written back.
    pub fn migrate(&mut self) -> bool {
        let mut changed = false;
        for category in Category::ALL {
            if !self.usage.counts.contains_key(&category) {
                self.usage.counts.insert(category, 0);
                changed = true;
            }
            if !self.credit_pool.entries.contains_key(&category) {
                self.credit_pool.entries.insert(category, CreditBalance::default());
                changed = true;
            }
        }
        if self.schema_version < CURRENT_SCHEMA_VERSION {
            self.schema_version = CURRENT_SCHEMA_VERSION;
            changed = true;
        }
        changed
    }

    /// Zeroes plan usage and starts a new cycle at `now`. The credit pool is
    /// never touched by cycle rollover.
    pub fn reset_cycle(&mut self, now: DateTime<Utc>) {
        self.usage = UsageCounters::starting_at(now);
    }

    /// Returns a reservation's debit and drops it from the record. Credits
    /// always go back to the pool; plan units only while the cycle they were
    /// charged to is still current. Returns the plan units restored.
    pub(crate) fn release_reservation(&mut self, reservation: &Reservation) -> u64 {
        let category = reservation.category;
        self.reservations.remove(&reservation.reservation_id);

        let plan_restored = if reservation.cycle_anchor == self.usage.reset_date {
            let used = self.usage.counts.entry(category).or_insert(0);
            let restored = reservation.plan_charged.min(*used);
            *used -= restored;
            restored
        } else {
            0
        };
        self.credit_pool.restore(category, reservation.from_credits);
        plan_restored
    }

    /// Releases every reservation created at or before `cutoff`.
    pub(crate) fn expire_reservations(&mut self, cutoff: DateTime<Utc>) -> Vec<Reservation> {
        let expired: Vec<Reservation> = self
            .reservations
            .values()
            .filter(|r| r.created_at <= cutoff)
            .cloned()
            .collect();
        for reservation in &expired {
            self.release_reservation(reservation);
        }
        expired
    }

    /// Applies an already validated split. Unlimited categories are not tracked.
    pub(crate) fn apply_debit(
        &mut self,
        category: Category,
        allowance: Allowance,
        from_plan: u64,
        from_credits: u64,
    ) -> bool {
        if from_credits > 0 && !self.credit_pool.debit(category, from_credits) {
            return false;
        }
        if !allowance.is_unlimited() && from_plan > 0 {
            *self.usage.counts.entry(category).or_insert(0) += from_plan;
        }
        true
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleInfo {
    pub cycle_start: DateTime<Utc>,
    pub cycle_end: DateTime<Utc>,
    pub days_remaining: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryStats {
    pub category: Category,
    pub plan_limit: Allowance,
    pub plan_used: u64,
    pub plan_remaining: Option<u64>,
    pub credits_purchased: u64,
    pub credits_consumed: u64,
    pub credits_balance: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageStats {
    pub account_id: String,
    pub plan_id: String,
    pub plan_name: String,
    pub subscription_status: SubscriptionStatus,
    pub categories: Vec<CategoryStats>,
    pub lifetime_credits_purchased: u64,
    pub lifetime_credits_consumed: u64,
    pub max_file_size_mb: u64,
    pub storage_gb: u64,
    pub storage_used_bytes: u64,
    pub cycle: CycleInfo,
}

impl UsageStats {
    pub fn category(&self, category: Category) -> Option<&CategoryStats> {
        self.categories.iter().find(|c| c.category == category)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub breakdowns: Vec<ConsumptionBreakdown>,
    pub reset_applied: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureCheck {
    pub allowed: bool,
    pub feature: PlanFeature,
    pub plan_id: String,
    pub reason: Option<String>,
    pub denial: Option<Denial>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credit_pool_never_overdrawn() {
        let mut pool = CreditPool::default();
        assert!(pool.add(Category::EditTools, 3));
        assert!(pool.debit(Category::EditTools, 2));
        assert!(!pool.debit(Category::EditTools, 2));
        assert_eq!(pool.balance(Category::EditTools), 1);
        assert_eq!(pool.entry(Category::EditTools).consumed, 2);

        pool.restore(Category::EditTools, 2);
        assert_eq!(pool.balance(Category::EditTools), 3);
        assert_eq!(pool.lifetime_purchased(), 3);
    }

    #[test]
    fn test_migrate_legacy_record() {
        let legacy = serde_json::json!({
            "account_id": "legacy",
            "plan_name": "Free",
            "usage": { "counts": { "edit-tools": 4 } },
            "created_at": "2024-01-01T00:00:00Z",
            "last_updated": "2024-01-01T00:00:00Z"
        });
        let mut account: Account = serde_json::from_value(legacy).unwrap();
        assert_eq!(account.schema_version, 0);
        assert_eq!(account.usage.reset_date, DateTime::<Utc>::UNIX_EPOCH);

        assert!(account.migrate());
        assert_eq!(account.schema_version, CURRENT_SCHEMA_VERSION);
        assert_eq!(account.usage.used(Category::EditTools), 4);
        assert_eq!(account.usage.counts.len(), Category::ALL.len());
        assert_eq!(account.credit_pool.entries.len(), Category::ALL.len());
        assert!(!account.migrate());
    }

    #[test]
    fn test_reset_preserves_credits() {
        let mut account = Account::new("acct", "free", "Free");
        assert!(account.credit_pool.add(Category::Conversion, 7));
        account.usage.counts.insert(Category::Conversion, 9);

        let now = Utc::now();
        account.reset_cycle(now);
        assert_eq!(account.usage.used(Category::Conversion), 0);
        assert_eq!(account.usage.reset_date, now);
        assert_eq!(account.credit_pool.balance(Category::Conversion), 7);
    }

    #[test]
    fn test_credit_purchase_overflow_is_refused() {
        let mut pool = CreditPool::default();
        assert!(pool.add(Category::Conversion, u64::MAX));
        assert!(!pool.add(Category::Conversion, 10));
        assert_eq!(pool.entry(Category::Conversion).purchased, u64::MAX);

        assert!(pool.add(Category::EditTools, 5));
        assert_eq!(pool.lifetime_purchased(), u64::MAX);
    }

    fn reservation(account: &Account, plan_charged: u64, from_credits: u64) -> Reservation {
        Reservation {
            reservation_id: Uuid::new_v4(),
            category: Category::EditTools,
            from_plan: 3,
            from_credits,
            plan_charged,
            cycle_anchor: account.usage.reset_date,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_release_only_returns_charged_plan_units() {
        let mut account = Account::new("acct", "business", "Business");
        account.usage.counts.insert(Category::EditTools, 5);

        let uncharged = reservation(&account, 0, 0);
        account
            .reservations
            .insert(uncharged.reservation_id, uncharged.clone());
        assert_eq!(account.release_reservation(&uncharged), 0);
        assert_eq!(account.usage.used(Category::EditTools), 5);
        assert!(account.reservations.is_empty());

        let charged = reservation(&account, 2, 0);
        assert_eq!(account.release_reservation(&charged), 2);
        assert_eq!(account.usage.used(Category::EditTools), 3);
    }

    #[test]
    fn test_expire_reservations_by_age() {
        let mut account = Account::new("acct", "free", "Free");
        assert!(account.credit_pool.add(Category::EditTools, 4));
        assert!(account.credit_pool.debit(Category::EditTools, 2));

        let mut stale = reservation(&account, 0, 2);
        stale.created_at = Utc::now() - Duration::hours(3);
        let fresh = reservation(&account, 0, 0);
        account.reservations.insert(stale.reservation_id, stale.clone());
        account.reservations.insert(fresh.reservation_id, fresh.clone());

        let expired = account.expire_reservations(Utc::now() - Duration::hours(1));
        assert_eq!(expired, vec![stale]);
        assert!(account.reservations.contains_key(&fresh.reservation_id));
        assert_eq!(account.credit_pool.balance(Category::EditTools), 4);
    }

    #[test]
    fn test_unlimited_debit_is_untracked() {
        let mut account = Account::new("acct", "business", "Business");
        assert!(account.apply_debit(Category::Conversion, Allowance::Unlimited, 4, 0));
        assert_eq!(account.usage.used(Category::Conversion), 0);

        assert!(account.apply_debit(Category::Conversion, Allowance::Limited(10), 4, 0));
        assert_eq!(account.usage.used(Category::Conversion), 4);
    }
}
