use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, Result};

const AGE_RANGE: std::ops::RangeInclusive<u32> = 18..=100;
const BMI_RANGE: std::ops::RangeInclusive<f64> = 10.0..=80.0;

/// User health profile as submitted by the caller. Immutable once received;
/// validated with [`HealthProfile::validate`] before any pipeline stage runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthProfile {
    pub age: u32,
    pub bmi: f64,
    pub sex: Sex,
    pub smoking_status: SmokingStatus,
    pub alcohol_consumption: AlcoholConsumption,
    pub dietary_pattern: DietaryPattern,
    #[serde(default)]
    pub family_history: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sex {
    Male,
    Female,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmokingStatus {
    Never,
    Former,
    Current,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlcoholConsumption {
    None,
    Light,
    Moderate,
    Heavy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DietaryPattern {
    Mediterranean,
    Western,
    Vegetarian,
    Vegan,
    Other,
}

impl HealthProfile {
    /// Validate numeric fields against plausible human ranges and reject
    /// blank family-history entries. Out-of-range values are a client
    /// error, never clamped.
    pub fn validate(&self) -> Result<()> {
        let mut violations = Vec::new();

        if !AGE_RANGE.contains(&self.age) {
            violations.push(format!(
                "age {} out of range [{}, {}]",
                self.age,
                AGE_RANGE.start(),
                AGE_RANGE.end()
            ));
        }
        if !self.bmi.is_finite() {
            violations.push(format!("bmi {} is not a finite number", self.bmi));
        } else if !BMI_RANGE.contains(&self.bmi) {
            violations.push(format!(
                "bmi {} out of range [{}, {}]",
                self.bmi,
                BMI_RANGE.start(),
                BMI_RANGE.end()
            ));
        }
        for condition in &self.family_history {
            if condition.trim().is_empty() {
                violations.push("family history contains a blank entry".to_string());
                break;
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(AnalysisError::InvalidProfile(violations.join("; ")))
        }
    }
}
