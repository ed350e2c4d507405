use quota_common::{BatchOperation, Category, ConsumptionBreakdown};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

// Request bodies take categories as strings so legacy spellings and unknown
// values are reported through ApiError like every other bad input.

#[derive(Debug, Serialize, Deserialize)]
pub struct OpenAccountRequest {
    pub account_id: Option<String>,
    pub plan: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CheckRequest {
    pub category: String,
    #[serde(default)]
    pub requested_bytes: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FeatureRequest {
    pub feature: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConsumeRequest {
    pub category: String,
    pub count: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchOperationRequest {
    pub category: String,
    pub count: Option<u64>,
    #[serde(default)]
    pub requested_bytes: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchRequest {
    pub operations: Vec<BatchOperationRequest>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PurchaseCreditsRequest {
    pub category: String,
    pub amount: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChangePlanRequest {
    pub plan: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubscriptionRequest {
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConsumeResponse {
    #[serde(flatten)]
    pub breakdown: ConsumptionBreakdown,
    pub message: String,
}

impl From<ConsumptionBreakdown> for ConsumeResponse {
    fn from(breakdown: ConsumptionBreakdown) -> Self {
        Self {
            message: breakdown.to_string(),
            breakdown,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreditBalanceResponse {
    pub account_id: String,
    pub category: Category,
    pub balance: u64,
}

impl BatchRequest {
    pub fn into_operations(self) -> Result<Vec<BatchOperation>, ApiError> {
        self.operations
            .into_iter()
            .map(|op| -> Result<BatchOperation, ApiError> {
                let category: Category = op.category.parse()?;
                Ok(BatchOperation::new(category, op.count.unwrap_or(1))
                    .with_bytes(op.requested_bytes))
            })
            .collect()
    }
}
