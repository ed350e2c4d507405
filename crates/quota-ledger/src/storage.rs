use crate::{default_catalog, Account, LedgerError, Plan, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Persistence for account ledgers.
///
/// `update_account` is a compare-and-swap on [`Account::revision`]: a write
/// based on a stale read fails with [`LedgerError::Conflict`] and nothing is
/// stored. The returned record carries the new revision.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn get_account(&self, account_id: &str) -> Result<Account>;
    async fn insert_account(&self, account: &Account) -> Result<()>;
    async fn update_account(&self, account: &Account) -> Result<Account>;
}

#[async_trait]
pub trait PlanStore: Send + Sync {
    async fn get_plan(&self, plan_id: &str) -> Result<Option<Plan>>;
    /// Case-insensitive match on plan id or display name.
    async fn find_plan_by_name(&self, name: &str) -> Result<Option<Plan>>;
    async fn list_plans(&self) -> Result<Vec<Plan>>;
}

/// Aggregate of bytes an account currently keeps in file storage.
#[async_trait]
pub trait FileUsage: Send + Sync {
    async fn stored_bytes(&self, account_id: &str) -> Result<u64>;
}

// In-memory storage implementation for development/testing
pub struct InMemoryStorage {
    accounts: Arc<RwLock<HashMap<String, Account>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            accounts: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AccountStore for InMemoryStorage {
    async fn get_account(&self, account_id: &str) -> Result<Account> {
        self.accounts
            .read()
            .await
            .get(account_id)
            .cloned()
            .ok_or_else(|| LedgerError::AccountNotFound(account_id.to_string()))
    }

    async fn insert_account(&self, account: &Account) -> Result<()> {
        let mut accounts = self.accounts.write().await;
        if accounts.contains_key(&account.account_id) {
            return Err(LedgerError::AccountExists(account.account_id.clone()));
        }
        accounts.insert(account.account_id.clone(), account.clone());
        Ok(())
    }

    async fn update_account(&self, account: &Account) -> Result<Account> {
        let mut accounts = self.accounts.write().await;
        let stored = accounts
            .get_mut(&account.account_id)
            .ok_or_else(|| LedgerError::AccountNotFound(account.account_id.clone()))?;

        if stored.revision != account.revision {
            return Err(LedgerError::Conflict(account.account_id.clone()));
        }

        let mut next = account.clone();
        next.revision += 1;
        next.last_updated = Utc::now();
        *stored = next.clone();
        Ok(next)
    }
}

pub struct InMemoryPlanStore {
    plans: Arc<RwLock<Vec<Plan>>>,
}

impl InMemoryPlanStore {
    pub fn new(plans: Vec<Plan>) -> Self {
        Self {
            plans: Arc::new(RwLock::new(plans)),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(default_catalog())
    }

    /// Inserts or replaces a plan by id.
    pub async fn upsert_plan(&self, plan: Plan) {
        let mut plans = self.plans.write().await;
        match plans.iter_mut().find(|p| p.plan_id == plan.plan_id) {
            Some(existing) => *existing = plan,
            None => plans.push(plan),
        }
    }

    pub async fn remove_plan(&self, plan_id: &str) {
        self.plans.write().await.retain(|p| p.plan_id != plan_id);
    }
}

#[async_trait]
impl PlanStore for InMemoryPlanStore {
    async fn get_plan(&self, plan_id: &str) -> Result<Option<Plan>> {
        Ok(self
            .plans
            .read()
            .await
            .iter()
            .find(|p| p.plan_id == plan_id)
            .cloned())
    }

    async fn find_plan_by_name(&self, name: &str) -> Result<Option<Plan>> {
        Ok(self
            .plans
            .read()
            .await
            .iter()
            .find(|p| p.matches_name(name))
            .cloned())
    }

    async fn list_plans(&self) -> Result<Vec<Plan>> {
        Ok(self.plans.read().await.clone())
    }
}

/// Tracks file sizes per account in memory.
pub struct InMemoryFileUsage {
    files: Arc<RwLock<HashMap<String, HashMap<String, u64>>>>,
}

impl InMemoryFileUsage {
    pub fn new() -> Self {
        Self {
            files: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn record_file(&self, account_id: &str, file_id: &str, size_bytes: u64) {
        self.files
            .write()
            .await
            .entry(account_id.to_string())
            .or_default()
            .insert(file_id.to_string(), size_bytes);
    }

    pub async fn remove_file(&self, account_id: &str, file_id: &str) {
        if let Some(files) = self.files.write().await.get_mut(account_id) {
            files.remove(file_id);
        }
    }
}

impl Default for InMemoryFileUsage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileUsage for InMemoryFileUsage {
    async fn stored_bytes(&self, account_id: &str) -> Result<u64> {
        Ok(self
            .files
            .read()
            .await
            .get(account_id)
            .map(|files| files.values().sum())
            .unwrap_or(0))
    }
}
