use serde::{Deserialize, Serialize};

use crate::profile::{AlcoholConsumption, DietaryPattern, HealthProfile, Sex, SmokingStatus};

/// Ordered, non-empty, de-duplicated list of literature search terms.
/// Order determines which terms are tried first when the downstream search
/// budget is exhausted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub terms: Vec<String>,
}

impl SearchQuery {
    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

/// Search term used when no specific rule fires, so the query is never empty.
const FALLBACK_TERM: &str = "lifestyle cancer risk prevention epidemiology";

/// Derive literature search terms from a validated profile.
///
/// Pure and deterministic. The risk rules are a declarative table of
/// condition/term rows evaluated in a fixed priority order: biometric rules
/// first, then habit rules, then one hereditary term per family-history
/// entry. Terms are de-duplicated preserving first occurrence.
pub fn build_queries(profile: &HealthProfile) -> SearchQuery {
    let biometric_rules = [
        (
            profile.bmi >= 30.0,
            "obesity BMI cancer risk endometrial breast colorectal",
        ),
        (
            (25.0..30.0).contains(&profile.bmi),
            "overweight cancer risk metabolic syndrome",
        ),
        (
            profile.age >= 50 && profile.sex == Sex::Male,
            "prostate cancer age risk screening men",
        ),
        (
            profile.age >= 40 && profile.sex == Sex::Female,
            "breast cancer age risk screening women mammography",
        ),
        (
            profile.age >= 45,
            "colorectal cancer age risk colonoscopy screening",
        ),
    ];

    let habit_rules = [
        (
            profile.smoking_status == SmokingStatus::Current,
            "smoking lung cancer risk factors epidemiology",
        ),
        (
            profile.smoking_status == SmokingStatus::Former,
            "former smoker cancer risk reduction",
        ),
        (
            matches!(
                profile.alcohol_consumption,
                AlcoholConsumption::Moderate | AlcoholConsumption::Heavy
            ),
            "alcohol consumption cancer risk liver colorectal",
        ),
        (
            profile.dietary_pattern == DietaryPattern::Western,
            "western diet processed food cancer risk",
        ),
        (
            matches!(
                profile.dietary_pattern,
                DietaryPattern::Mediterranean | DietaryPattern::Vegetarian | DietaryPattern::Vegan
            ),
            "plant based diet cancer prevention",
        ),
    ];

    let mut terms: Vec<String> = Vec::new();
    let fixed_rules = biometric_rules.iter().chain(habit_rules.iter());
    for (fired, term) in fixed_rules {
        if *fired {
            push_unique(&mut terms, (*term).to_string());
        }
    }

    for condition in &profile.family_history {
        let condition = condition.trim();
        if !condition.is_empty() {
            push_unique(
                &mut terms,
                format!("hereditary {} cancer genetic risk", condition.to_lowercase()),
            );
        }
    }

    if terms.is_empty() {
        terms.push(FALLBACK_TERM.to_string());
    }

    SearchQuery { terms }
}

fn push_unique(terms: &mut Vec<String>, term: String) {
    if !terms.contains(&term) {
        terms.push(term);
    }
}
