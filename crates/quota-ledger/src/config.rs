use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::plan::FREE_PLAN_ID;

fn default_reservation_ttl_secs() -> i64 {
    3600
}

/// Ledger tuning shared by every operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Length of the rolling usage cycle anchored at the account's reset date.
    pub cycle_days: i64,
    /// Plan used when an account's own plan reference cannot be resolved.
    pub default_plan_id: String,
    /// Reservations left unsettled this long are refunded on the next access.
    #[serde(default = "default_reservation_ttl_secs")]
    pub reservation_ttl_secs: i64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            cycle_days: 30,
            default_plan_id: FREE_PLAN_ID.to_string(),
            reservation_ttl_secs: default_reservation_ttl_secs(),
        }
    }
}

impl LedgerConfig {
    pub fn cycle_length(&self) -> Duration {
        Duration::days(self.cycle_days)
    }

    pub fn reservation_ttl(&self) -> Duration {
        Duration::seconds(self.reservation_ttl_secs)
    }
}
