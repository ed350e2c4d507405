use quota_common::{Allowance, Category, PlanFeature};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const FREE_PLAN_ID: &str = "free";

const BYTES_PER_MB: u64 = 1024 * 1024;
const BYTES_PER_GB: u64 = 1024 * 1024 * 1024;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanFeatures {
    #[serde(default)]
    pub watermarks: bool,
    #[serde(default)]
    pub batch_processing: bool,
    #[serde(default)]
    pub ocr: bool,
    #[serde(default)]
    pub digital_signatures: bool,
    #[serde(default)]
    pub api_access: bool,
    #[serde(default)]
    pub team_collaboration: bool,
}

impl PlanFeatures {
    pub fn has(&self, feature: PlanFeature) -> bool {
        match feature {
            PlanFeature::Watermarks => self.watermarks,
            PlanFeature::BatchProcessing => self.batch_processing,
            PlanFeature::Ocr => self.ocr,
            PlanFeature::DigitalSignatures => self.digital_signatures,
            PlanFeature::ApiAccess => self.api_access,
            PlanFeature::TeamCollaboration => self.team_collaboration,
        }
    }
}

/// A subscription tier: monthly allowance per category plus upload limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: String,
    pub name: String,
    pub monthly_price_cents: u64,
    pub allowances: BTreeMap<Category, Allowance>,
    /// Largest single upload in MB; `0` disables the check.
    #[serde(default)]
    pub max_file_size_mb: u64,
    /// Total stored bytes quota in GB; `0` disables the check.
    #[serde(default)]
    pub storage_gb: u64,
    #[serde(default)]
    pub features: PlanFeatures,
}

impl Plan {
    /// A category missing from the plan grants nothing.
    pub fn allowance(&self, category: Category) -> Allowance {
        self.allowances
            .get(&category)
            .copied()
            .unwrap_or(Allowance::Limited(0))
    }

    pub fn is_paid(&self) -> bool {
        self.monthly_price_cents > 0
    }

    pub fn max_file_size_bytes(&self) -> Option<u64> {
        // A limit too large to express in bytes cannot be exceeded.
        (self.max_file_size_mb > 0).then(|| {
            self.max_file_size_mb
                .checked_mul(BYTES_PER_MB)
                .unwrap_or(u64::MAX)
        })
    }

    pub fn storage_limit_bytes(&self) -> Option<u64> {
        (self.storage_gb > 0).then(|| {
            self.storage_gb
                .checked_mul(BYTES_PER_GB)
                .unwrap_or(u64::MAX)
        })
    }

    /// Matches the plan id or display name, ignoring case.
    pub fn matches_name(&self, name: &str) -> bool {
        let name = name.trim();
        self.plan_id.eq_ignore_ascii_case(name) || self.name.eq_ignore_ascii_case(name)
    }
}

fn allowances(limits: [Allowance; 6]) -> BTreeMap<Category, Allowance> {
    Category::ALL.into_iter().zip(limits).collect()
}

/// Plans shipped with the service; operators may replace them in the plan store.
pub fn default_catalog() -> Vec<Plan> {
    use Allowance::{Limited, Unlimited};

    vec![
        Plan {
            plan_id: FREE_PLAN_ID.to_string(),
            name: "Free".to_string(),
            monthly_price_cents: 0,
            // convert, edit, organize, security, optimize, advanced
            allowances: allowances([
                Limited(10),
                Limited(5),
                Limited(5),
                Limited(3),
                Limited(5),
                Limited(2),
            ]),
            max_file_size_mb: 10,
            storage_gb: 1,
            features: PlanFeatures::default(),
        },
        Plan {
            plan_id: "starter".to_string(),
            name: "Starter".to_string(),
            monthly_price_cents: 999,
            allowances: allowances([
                Limited(100),
                Limited(50),
                Limited(50),
                Limited(30),
                Limited(50),
                Limited(20),
            ]),
            max_file_size_mb: 50,
            storage_gb: 10,
            features: PlanFeatures {
                watermarks: true,
                ..PlanFeatures::default()
            },
        },
        Plan {
            plan_id: "professional".to_string(),
            name: "Professional".to_string(),
            monthly_price_cents: 1999,
            allowances: allowances([
                Unlimited,
                Limited(500),
                Limited(500),
                Limited(300),
                Limited(500),
                Limited(200),
            ]),
            max_file_size_mb: 200,
            storage_gb: 50,
            features: PlanFeatures {
                watermarks: true,
                batch_processing: true,
                ocr: true,
                digital_signatures: true,
                api_access: false,
                team_collaboration: false,
            },
        },
        Plan {
            plan_id: "business".to_string(),
            name: "Business".to_string(),
            monthly_price_cents: 4999,
            allowances: allowances([Unlimited; 6]),
            max_file_size_mb: 500,
            storage_gb: 0,
            features: PlanFeatures {
                watermarks: true,
                batch_processing: true,
                ocr: true,
                digital_signatures: true,
                api_access: true,
                team_collaboration: true,
            },
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_limits() {
        let catalog = default_catalog();
        let free = catalog.iter().find(|p| p.plan_id == FREE_PLAN_ID).unwrap();
        assert!(!free.is_paid());
        assert_eq!(free.allowance(Category::EditTools), Allowance::Limited(5));
        assert_eq!(free.max_file_size_bytes(), Some(10 * 1024 * 1024));

        let business = catalog.iter().find(|p| p.plan_id == "business").unwrap();
        assert!(business.is_paid());
        assert!(business.allowance(Category::AdvancedTools).is_unlimited());
        assert_eq!(business.storage_limit_bytes(), None);
        assert!(business.features.has(PlanFeature::Ocr));
    }

    #[test]
    fn test_oversized_limits_clamp_to_max_bytes() {
        let mut plan = default_catalog().remove(0);
        plan.max_file_size_mb = u64::MAX;
        plan.storage_gb = u64::MAX / 1024;
        assert_eq!(plan.max_file_size_bytes(), Some(u64::MAX));
        assert_eq!(plan.storage_limit_bytes(), Some(u64::MAX));
    }

    #[test]
    fn test_missing_allowance_grants_nothing() {
        let mut plan = default_catalog().remove(0);
        plan.allowances.remove(&Category::SecurityTools);
        assert_eq!(plan.allowance(Category::SecurityTools), Allowance::Limited(0));
    }

    #[test]
    fn test_name_matching() {
        let plan = default_catalog().remove(2);
        assert!(plan.matches_name("PROFESSIONAL"));
        assert!(plan.matches_name("Professional "));
        assert!(!plan.matches_name("pro"));
    }
}
