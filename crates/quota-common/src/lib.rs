// Shared vocabulary for the quota ledger and the services that call it.

use std::fmt::{self, Display};
use std::str::FromStr;

pub use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Allowance value older plan records used to mean "no limit".
pub const LEGACY_UNLIMITED_SENTINEL: u64 = 99_999;

const BYTES_PER_MB: u64 = 1024 * 1024;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Unknown category: {0}")]
    UnknownCategory(String),

    #[error("Unknown plan feature: {0}")]
    UnknownFeature(String),

    #[error("Unknown subscription status: {0}")]
    UnknownStatus(String),
}

/// An independently metered class of tool operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "convert", alias = "conversions", alias = "conversion")]
    Conversion,
    #[serde(rename = "edit-tools", alias = "editTools")]
    EditTools,
    #[serde(rename = "organize-tools", alias = "organizeTools")]
    OrganizeTools,
    #[serde(rename = "security-tools", alias = "securityTools")]
    SecurityTools,
    #[serde(rename = "optimize-tools", alias = "optimizeTools")]
    OptimizeTools,
    #[serde(rename = "advanced-tools", alias = "advancedTools")]
    AdvancedTools,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Conversion,
        Category::EditTools,
        Category::OrganizeTools,
        Category::SecurityTools,
        Category::OptimizeTools,
        Category::AdvancedTools,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Conversion => "convert",
            Category::EditTools => "edit-tools",
            Category::OrganizeTools => "organize-tools",
            Category::SecurityTools => "security-tools",
            Category::OptimizeTools => "optimize-tools",
            Category::AdvancedTools => "advanced-tools",
        }
    }

    /// Label used in denial messages.
    pub fn display_name(&self) -> &'static str {
        match self {
            Category::Conversion => "Conversion",
            Category::EditTools => "Edit tools",
            Category::OrganizeTools => "Organize tools",
            Category::SecurityTools => "Security tools",
            Category::OptimizeTools => "Optimize tools",
            Category::AdvancedTools => "Advanced tools",
        }
    }
}

impl Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "convert" | "conversions" | "conversion" => Ok(Category::Conversion),
            "edit-tools" | "editTools" => Ok(Category::EditTools),
            "organize-tools" | "organizeTools" => Ok(Category::OrganizeTools),
            "security-tools" | "securityTools" => Ok(Category::SecurityTools),
            "optimize-tools" | "optimizeTools" => Ok(Category::OptimizeTools),
            "advanced-tools" | "advancedTools" => Ok(Category::AdvancedTools),
            other => Err(ParseError::UnknownCategory(other.to_string())),
        }
    }
}

/// Monthly allowance of a plan for one category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Allowance {
    Limited(u64),
    Unlimited,
}

impl Allowance {
    /// Decodes the numeric limits stored by older plan records, where both
    /// `0` and the `99999` sentinel meant unlimited.
    pub fn from_legacy(limit: u64) -> Self {
        if limit == 0 || limit == LEGACY_UNLIMITED_SENTINEL {
            Allowance::Unlimited
        } else {
            Allowance::Limited(limit)
        }
    }

    pub fn is_unlimited(&self) -> bool {
        matches!(self, Allowance::Unlimited)
    }

    /// Plan units still available after `used`; `None` when unlimited.
    pub fn remaining(&self, used: u64) -> Option<u64> {
        match self {
            Allowance::Limited(limit) => Some(limit.saturating_sub(used)),
            Allowance::Unlimited => None,
        }
    }

    pub fn limit(&self) -> Option<u64> {
        match self {
            Allowance::Limited(limit) => Some(*limit),
            Allowance::Unlimited => None,
        }
    }
}

impl Default for Allowance {
    fn default() -> Self {
        Allowance::Limited(0)
    }
}

/// Plan-level capability flags, gated independently of category allowances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanFeature {
    Watermarks,
    BatchProcessing,
    Ocr,
    DigitalSignatures,
    ApiAccess,
    TeamCollaboration,
}

impl PlanFeature {
    pub fn description(&self) -> &'static str {
        match self {
            PlanFeature::Watermarks => "Security tools",
            PlanFeature::BatchProcessing => "Batch processing",
            PlanFeature::Ocr => "OCR text recognition",
            PlanFeature::DigitalSignatures => "Digital signatures",
            PlanFeature::ApiAccess => "API access",
            PlanFeature::TeamCollaboration => "Team collaboration",
        }
    }
}

impl FromStr for PlanFeature {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "watermarks" | "security" => Ok(PlanFeature::Watermarks),
            "batch_processing" | "batch" => Ok(PlanFeature::BatchProcessing),
            "ocr" => Ok(PlanFeature::Ocr),
            "digital_signatures" | "signature" => Ok(PlanFeature::DigitalSignatures),
            "api_access" => Ok(PlanFeature::ApiAccess),
            "team_collaboration" => Ok(PlanFeature::TeamCollaboration),
            _ => Err(ParseError::UnknownFeature(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    #[default]
    Inactive,
    Expired,
    Cancelled,
}

impl FromStr for SubscriptionStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "active" => Ok(SubscriptionStatus::Active),
            "inactive" => Ok(SubscriptionStatus::Inactive),
            "expired" => Ok(SubscriptionStatus::Expired),
            "cancelled" | "canceled" => Ok(SubscriptionStatus::Cancelled),
            _ => Err(ParseError::UnknownStatus(s.to_string())),
        }
    }
}

/// Why an operation was not admitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Denial {
    SubscriptionInactive {
        status: SubscriptionStatus,
    },
    FileTooLarge {
        limit_mb: u64,
        file_bytes: u64,
    },
    StorageExceeded {
        used_bytes: u64,
        requested_bytes: u64,
        limit_bytes: u64,
    },
    QuotaExhausted {
        category: Category,
        used: u64,
        limit: u64,
    },
    InsufficientCapacity {
        category: Category,
        requested: u64,
        available: u64,
    },
    FeatureUnavailable {
        feature: PlanFeature,
    },
}

impl Denial {
    pub fn reason(&self) -> String {
        match self {
            Denial::SubscriptionInactive { .. } => {
                "Subscription inactive. Please renew your subscription.".to_string()
            }
            Denial::FileTooLarge {
                limit_mb,
                file_bytes,
            } => format!(
                "Max upload limit {limit_mb} MB exceeded (file is {:.1} MB)",
                *file_bytes as f64 / BYTES_PER_MB as f64
            ),
            Denial::StorageExceeded { .. } => "Storage limit exceeded".to_string(),
            Denial::QuotaExhausted { category, .. } => {
                format!("{} limit reached", category.display_name())
            }
            Denial::InsufficientCapacity {
                category,
                requested,
                available,
            } => format!(
                "{} capacity insufficient: requested {requested}, available {available}",
                category.display_name()
            ),
            Denial::FeatureUnavailable { feature } => {
                format!("{} is not included in your plan", feature.description())
            }
        }
    }

    /// Whether the caller should render an upgrade prompt.
    pub fn upgrade_required(&self) -> bool {
        !matches!(self, Denial::StorageExceeded { .. })
    }

    /// `(current, limit)` pair for progress-bar style display.
    pub fn usage_pair(&self) -> Option<(u64, u64)> {
        match self {
            Denial::FileTooLarge {
                limit_mb,
                file_bytes,
            } => Some((file_bytes / BYTES_PER_MB, *limit_mb)),
            Denial::StorageExceeded {
                used_bytes,
                limit_bytes,
                ..
            } => Some((*used_bytes, *limit_bytes)),
            Denial::QuotaExhausted { used, limit, .. } => Some((*used, *limit)),
            Denial::InsufficientCapacity {
                requested,
                available,
                ..
            } => Some((*requested, *available)),
            Denial::SubscriptionInactive { .. } | Denial::FeatureUnavailable { .. } => None,
        }
    }
}

impl Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason())
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdmissionResult {
    pub allowed: bool,
    pub reason: Option<String>,
    pub denial: Option<Denial>,
    pub upgrade_required: bool,
    pub category: Category,
    pub plan_limit: Allowance,
    pub plan_used: u64,
    /// `None` when the category is unlimited.
    pub plan_remaining: Option<u64>,
    pub topup_available: u64,
    /// `None` when the category is unlimited.
    pub total_available: Option<u64>,
    pub using_topup: bool,
}

impl AdmissionResult {
    pub fn deny(mut self, denial: Denial) -> Self {
        self.allowed = false;
        self.reason = Some(denial.reason());
        self.upgrade_required = denial.upgrade_required();
        self.using_topup = false;
        self.denial = Some(denial);
        self
    }
}

/// How a consume was split between plan allowance and purchased credits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumptionBreakdown {
    pub category: Category,
    pub from_plan: u64,
    pub from_credits: u64,
    pub credits_remaining: u64,
}

impl ConsumptionBreakdown {
    pub fn total(&self) -> u64 {
        self.from_plan.saturating_add(self.from_credits)
    }
}

impl Display for ConsumptionBreakdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} from plan, {} from top-up, {} top-up credits remaining",
            self.from_plan, self.from_credits, self.credits_remaining
        )
    }
}

fn default_count() -> u64 {
    1
}

/// One entry of an all-or-nothing batch consume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOperation {
    pub category: Category,
    #[serde(default = "default_count")]
    pub count: u64,
    #[serde(default)]
    pub requested_bytes: u64,
}

impl BatchOperation {
    pub fn new(category: Category, count: u64) -> Self {
        Self {
            category,
            count,
            requested_bytes: 0,
        }
    }

    pub fn with_bytes(mut self, requested_bytes: u64) -> Self {
        self.requested_bytes = requested_bytes;
        self
    }
}
