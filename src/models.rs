use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One row of the Data API `/positions` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataApiPosition {
    #[serde(rename = "conditionId")]
    pub condition_id: Option<String>,
    /// Position id of the held outcome, as a decimal string.
    #[serde(default)]
    pub asset: Option<String>,
    #[serde(rename = "oppositeAsset", default)]
    pub opposite_asset: Option<String>,
    #[serde(rename = "outcomeIndex", default)]
    pub outcome_index: Option<i64>,
    #[serde(default)]
    pub size: Decimal,
    #[serde(default)]
    pub redeemable: bool,
    #[serde(rename = "negativeRisk", default)]
    pub negative_risk: bool,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub outcome: Option<String>,
}
