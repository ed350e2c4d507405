use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockMap = DashMap<String, Arc<Mutex<()>>>;

/// One async mutex per account. Every read-compute-write sequence on an
/// account runs while holding its guard; different accounts never contend.
///
/// Entries only live while some task holds or waits on them, so lookups of
/// unknown account ids leave nothing behind.
#[derive(Clone, Default)]
pub struct AccountLocks {
    inner: Arc<LockMap>,
}

/// Held for the duration of an account operation. Dropping it releases the
/// account and prunes the map entry once nobody else is queued on it.
pub struct AccountGuard {
    guard: Option<OwnedMutexGuard<()>>,
    map: Arc<LockMap>,
    account_id: String,
}

impl Drop for AccountGuard {
    fn drop(&mut self) {
        // Unlock first so our own Arc no longer counts as a holder.
        drop(self.guard.take());
        // The map's Arc is the only one left: no holder, no waiter. Runs under
        // the shard lock, so a concurrent acquire cannot clone it in between.
        self.map
            .remove_if(&self.account_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, account_id: &str) -> AccountGuard {
        // Clone the Arc out so the shard lock is released before awaiting.
        let lock = self
            .inner
            .entry(account_id.to_string())
            .or_default()
            .value()
            .clone();
        let guard = lock.lock_owned().await;
        AccountGuard {
            guard: Some(guard),
            map: self.inner.clone(),
            account_id: account_id.to_string(),
        }
    }

    pub fn tracked_accounts(&self) -> usize {
        self.inner.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_account_serializes() {
        let locks = AccountLocks::new();
        let guard = locks.acquire("acct").await;

        let contender = locks.clone();
        let waiting = tokio::spawn(async move {
            let _guard = contender.acquire("acct").await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiting.is_finished());

        // The waiter keeps the entry alive after the first guard is gone.
        drop(guard);
        waiting.await.unwrap();
        assert_eq!(locks.tracked_accounts(), 0);
    }

    #[tokio::test]
    async fn test_different_accounts_do_not_contend() {
        let locks = AccountLocks::new();
        let _a = locks.acquire("a").await;
        let _b = tokio::time::timeout(Duration::from_millis(50), locks.acquire("b"))
            .await
            .expect("independent accounts must not block each other");
        assert_eq!(locks.tracked_accounts(), 2);
    }

    #[tokio::test]
    async fn test_entries_pruned_after_release() {
        let locks = AccountLocks::new();
        for i in 0..1000 {
            let _guard = locks.acquire(&format!("acct-{i}")).await;
        }
        assert_eq!(locks.tracked_accounts(), 0);

        let held = locks.acquire("held").await;
        assert_eq!(locks.tracked_accounts(), 1);
        drop(held);
        assert_eq!(locks.tracked_accounts(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_pruning_keeps_mutual_exclusion() {
        let locks = AccountLocks::new();
        let counter = Arc::new(std::sync::Mutex::new((0u32, 0u32)));

        let tasks = (0..200).map(|_| {
            let locks = locks.clone();
            let counter = counter.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire("acct").await;
                {
                    let mut c = counter.lock().unwrap();
                    c.0 += 1;
                    c.1 = c.1.max(c.0);
                }
                tokio::task::yield_now().await;
                counter.lock().unwrap().0 -= 1;
            })
        });
        for task in futures::future::join_all(tasks).await {
            task.unwrap();
        }

        let (inside, max_inside) = *counter.lock().unwrap();
        assert_eq!(inside, 0);
        assert_eq!(max_inside, 1);
        assert_eq!(locks.tracked_accounts(), 0);
    }
}
