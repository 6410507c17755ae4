use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::literature::LiteratureAbstract;

/// Ordinal risk category. Ordering is meaningful (low < moderate < high);
/// there is no numeric score behind it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Moderate,
    High,
}

/// A literature reference backing an insight. The url must match one of
/// the abstracts retrieved in the same request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub title: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskInsight {
    pub cancer_type: String,
    pub risk_level: RiskLevel,
    pub explanation: String,
    pub citations: Vec<Citation>,
    pub recommendation: String,
}

/// Final per-request analysis. `insights` may be empty when the model finds
/// no correlations; that is a valid outcome, not an error. The disclaimer
/// is injected by the synthesizer, never model-generated, and the full
/// retrieved abstract set is attached for attribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub analysis_id: Uuid,
    pub insights: Vec<RiskInsight>,
    pub disclaimer: String,
    pub searched_abstracts: Vec<LiteratureAbstract>,
    pub timestamp: DateTime<Utc>,
}
