//! Builds one constrained prompt from the profile and retrieved abstracts,
//! invokes the generative backend exactly once, and coerces the returned
//! text into the result schema. Citations that cannot be traced back to a
//! supplied abstract are dropped; insights left without provenance are
//! dropped with them.

use async_trait::async_trait;
use chrono::Utc;
use rig::client::CompletionClient;
use rig::completion::Prompt;
use rig::providers::openrouter;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{AnalysisError, Result};
use crate::insight::{AnalysisResult, Citation, RiskInsight, RiskLevel};
use crate::literature::LiteratureAbstract;
use crate::profile::HealthProfile;

const SYSTEM_PROMPT: &str = r#"You are a clinical informatics assistant. Your role is to analyze
user health data alongside peer-reviewed research abstracts and identify potential cancer risk
correlations.

STRICT RULES:
1. You MUST NOT provide a definitive medical diagnosis under any circumstances.
2. Always frame insights as "research suggests a potential correlation" or "evidence indicates
   an elevated association" - never as certainties.
3. Every insight MUST cite at least one source abstract by the exact URL supplied with it.
4. Recommend consulting a licensed oncologist or primary care physician for all concerns.
5. Maintain clinical objectivity - do not minimize or exaggerate risk factors.
6. Structure your response as valid JSON only, no markdown or prose outside the JSON.

OUTPUT FORMAT (strict JSON):
{
  "insights": [
    {
      "cancerType": "string",
      "riskLevel": "low|moderate|high",
      "explanation": "string - evidence-based, non-diagnostic explanation",
      "citations": [{"title": "string", "url": "string"}],
      "recommendation": "string - actionable, physician-referral-oriented"
    }
  ]
}"#;

const DISCLAIMER: &str = "This analysis is generated from published research abstracts and is \
not a medical diagnosis. Correlations reported in the literature do not establish individual \
risk. Discuss any concerns with a licensed physician.";

/// Seam for the generative inference call, so the synthesizer can be
/// exercised against a scripted backend in tests.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, system: &str, input: &str) -> Result<String>;
}

/// Production backend over OpenRouter via rig.
pub struct OpenRouterBackend {
    api_key: String,
    model: String,
}

impl OpenRouterBackend {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl CompletionBackend for OpenRouterBackend {
    async fn complete(&self, system: &str, input: &str) -> Result<String> {
        let client = openrouter::Client::new(&self.api_key);
        let agent = client.agent(&self.model).preamble(system).build();
        agent
            .prompt(input)
            .await
            .map_err(|e| AnalysisError::InferenceUnavailable(e.to_string()))
    }
}

pub struct InsightSynthesizer {
    backend: Arc<dyn CompletionBackend>,
    timeout: Duration,
}

impl InsightSynthesizer {
    pub fn new(backend: Arc<dyn CompletionBackend>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    /// One inference call, then schema validation and grounding. No retry
    /// loop: an unparsable response surfaces as
    /// [`AnalysisError::MalformedModelOutput`] immediately.
    pub async fn synthesize(
        &self,
        profile: &HealthProfile,
        abstracts: Vec<LiteratureAbstract>,
    ) -> Result<AnalysisResult> {
        let input = build_task_input(profile, &abstracts);

        let raw = tokio::time::timeout(self.timeout, self.backend.complete(SYSTEM_PROMPT, &input))
            .await
            .map_err(|_| {
                AnalysisError::InferenceUnavailable(format!(
                    "inference call exceeded {}s budget",
                    self.timeout.as_secs()
                ))
            })??;

        let parsed = match decode_model_output(&raw) {
            DecodedOutput::Valid(analysis) => analysis,
            DecodedOutput::Invalid { reason, raw } => {
                error!(%reason, raw_output = %raw, "model output failed schema validation");
                return Err(AnalysisError::MalformedModelOutput {
                    reason,
                    raw_output: raw,
                });
            }
        };

        let insights = ground_insights(parsed, &abstracts);
        info!(insights = insights.len(), "synthesis completed");

        Ok(AnalysisResult {
            analysis_id: Uuid::new_v4(),
            insights,
            disclaimer: DISCLAIMER.to_string(),
            searched_abstracts: abstracts,
            timestamp: Utc::now(),
        })
    }
}

/// Serialize the profile and abstract set into the task input block.
fn build_task_input(profile: &HealthProfile, abstracts: &[LiteratureAbstract]) -> String {
    let family_history = if profile.family_history.is_empty() {
        "None reported".to_string()
    } else {
        profile.family_history.join(", ")
    };

    let sources = abstracts
        .iter()
        .enumerate()
        .map(|(i, a)| {
            format!(
                "SOURCE [{}]: {}\nURL: {}\n\nABSTRACT: {}",
                i + 1,
                a.title,
                a.url,
                a.abstract_text
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "PATIENT PROFILE:\n\
         - Age: {}\n\
         - Sex: {:?}\n\
         - BMI: {}\n\
         - Smoking Status: {:?}\n\
         - Alcohol Consumption: {:?}\n\
         - Dietary Pattern: {:?}\n\
         - Family History of Conditions: {}\n\n\
         RESEARCH ABSTRACTS:\n{}\n\n\
         Based on the patient profile and the provided research abstracts, generate a \
         cancer risk correlation analysis. Cite only the sources provided above.",
        profile.age,
        profile.sex,
        profile.bmi,
        profile.smoking_status,
        profile.alcohol_consumption,
        profile.dietary_pattern,
        family_history,
        sources
    )
}

/// Model response shape before grounding. A model-emitted disclaimer is
/// ignored; the static one always wins.
#[derive(Debug, Deserialize)]
struct ModelAnalysis {
    insights: Vec<ModelInsight>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelInsight {
    cancer_type: String,
    risk_level: RiskLevel,
    explanation: String,
    #[serde(default)]
    citations: Vec<Citation>,
    recommendation: String,
}

enum DecodedOutput {
    Valid(ModelAnalysis),
    Invalid { reason: String, raw: String },
}

/// Decode-with-repair: strip known non-schema wrapping (fenced code
/// blocks), then attempt schema decoding. Always hands the raw text back on
/// failure so it can be logged rather than silently discarded.
fn decode_model_output(raw: &str) -> DecodedOutput {
    let cleaned = strip_code_fences(raw);

    match serde_json::from_str::<ModelAnalysis>(cleaned) {
        Ok(analysis) => DecodedOutput::Valid(analysis),
        Err(e) => DecodedOutput::Invalid {
            reason: e.to_string(),
            raw: raw.to_string(),
        },
    }
}

fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let trimmed = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix("```").unwrap_or(trimmed);
    trimmed.trim()
}

/// Enforce the grounding invariant: keep only citations whose url matches a
/// retrieved abstract, and drop any insight left without a surviving
/// citation. Partial-citation insights are preferable to a total failure;
/// an insight with no provenance is not.
fn ground_insights(parsed: ModelAnalysis, abstracts: &[LiteratureAbstract]) -> Vec<RiskInsight> {
    let known_urls: HashSet<&str> = abstracts.iter().map(|a| a.url.as_str()).collect();

    let mut insights = Vec::new();
    for insight in parsed.insights {
        let (kept, fabricated): (Vec<Citation>, Vec<Citation>) = insight
            .citations
            .into_iter()
            .partition(|c| known_urls.contains(c.url.as_str()));

        for citation in &fabricated {
            warn!(url = %citation.url, cancer_type = %insight.cancer_type,
                "dropping citation not present in retrieved abstracts");
        }

        if kept.is_empty() {
            warn!(cancer_type = %insight.cancer_type,
                "dropping insight left without any valid citation");
            continue;
        }

        if !has_physician_clause(&insight.recommendation) {
            warn!(cancer_type = %insight.cancer_type,
                "recommendation lacks a physician-consultation clause");
        }

        insights.push(RiskInsight {
            cancer_type: insight.cancer_type,
            risk_level: insight.risk_level,
            explanation: insight.explanation,
            citations: kept,
            recommendation: insight.recommendation,
        });
    }

    insights
}

fn has_physician_clause(recommendation: &str) -> bool {
    let lowered = recommendation.to_lowercase();
    ["physician", "doctor", "oncologist", "healthcare provider"]
        .iter()
        .any(|term| lowered.contains(term))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{AlcoholConsumption, DietaryPattern, Sex, SmokingStatus};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedBackend {
        response: String,
        calls: AtomicUsize,
    }

    impl ScriptedBackend {
        fn new(response: &str) -> Self {
            Self {
                response: response.to_string(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CompletionBackend for ScriptedBackend {
        async fn complete(&self, _system: &str, _input: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.response.clone())
        }
    }

    fn profile() -> HealthProfile {
        HealthProfile {
            age: 58,
            bmi: 31.2,
            sex: Sex::Male,
            smoking_status: SmokingStatus::Current,
            alcohol_consumption: AlcoholConsumption::Moderate,
            dietary_pattern: DietaryPattern::Western,
            family_history: vec!["colon cancer".to_string()],
        }
    }

    fn abstracts() -> Vec<LiteratureAbstract> {
        vec![
            LiteratureAbstract {
                title: "Smoking and lung cancer incidence".to_string(),
                abstract_text: "Large cohort analysis.".to_string(),
                pmid: "1001".to_string(),
                doi: None,
                url: "https://pubmed.ncbi.nlm.nih.gov/1001/".to_string(),
                year: Some(2022),
            },
            LiteratureAbstract {
                title: "Adiposity and colorectal cancer".to_string(),
                abstract_text: "Meta-analysis of BMI cohorts.".to_string(),
                pmid: "1002".to_string(),
                doi: None,
                url: "https://pubmed.ncbi.nlm.nih.gov/1002/".to_string(),
                year: Some(2021),
            },
        ]
    }

    fn model_json(citation_urls: &[(&str, &str)]) -> String {
        let citations = citation_urls
            .iter()
            .map(|(title, url)| format!(r#"{{"title": "{title}", "url": "{url}"}}"#))
            .collect::<Vec<_>>()
            .join(",");
        format!(
            r#"{{"insights": [{{
                "cancerType": "lung",
                "riskLevel": "high",
                "explanation": "Research suggests a potential correlation with current smoking.",
                "citations": [{citations}],
                "recommendation": "Discuss lung cancer screening with your physician."
            }}]}}"#
        )
    }

    #[tokio::test]
    async fn valid_response_produces_grounded_result() {
        let response = model_json(&[(
            "Smoking and lung cancer incidence",
            "https://pubmed.ncbi.nlm.nih.gov/1001/",
        )]);
        let backend = Arc::new(ScriptedBackend::new(&response));
        let synthesizer = InsightSynthesizer::new(backend.clone(), Duration::from_secs(5));

        let result = synthesizer.synthesize(&profile(), abstracts()).await.unwrap();

        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.insights.len(), 1);
        assert_eq!(result.insights[0].risk_level, RiskLevel::High);
        assert_eq!(result.searched_abstracts.len(), 2);
        assert_eq!(result.disclaimer, DISCLAIMER);
    }

    #[tokio::test]
    async fn fenced_response_is_accepted() {
        let response = format!(
            "```json\n{}\n```",
            model_json(&[(
                "Smoking and lung cancer incidence",
                "https://pubmed.ncbi.nlm.nih.gov/1001/",
            )])
        );
        let backend = Arc::new(ScriptedBackend::new(&response));
        let synthesizer = InsightSynthesizer::new(backend, Duration::from_secs(5));

        let result = synthesizer.synthesize(&profile(), abstracts()).await.unwrap();
        assert_eq!(result.insights.len(), 1);
    }

    #[tokio::test]
    async fn fabricated_citation_is_dropped_but_insight_survives() {
        let response = model_json(&[
            (
                "Smoking and lung cancer incidence",
                "https://pubmed.ncbi.nlm.nih.gov/1001/",
            ),
            ("Made up study", "https://example.com/fabricated"),
        ]);
        let backend = Arc::new(ScriptedBackend::new(&response));
        let synthesizer = InsightSynthesizer::new(backend, Duration::from_secs(5));

        let result = synthesizer.synthesize(&profile(), abstracts()).await.unwrap();

        assert_eq!(result.insights.len(), 1);
        let citations = &result.insights[0].citations;
        assert_eq!(citations.len(), 1);
        assert_eq!(citations[0].url, "https://pubmed.ncbi.nlm.nih.gov/1001/");
    }

    #[tokio::test]
    async fn insight_with_only_fabricated_citations_is_dropped() {
        let response = model_json(&[("Made up study", "https://example.com/fabricated")]);
        let backend = Arc::new(ScriptedBackend::new(&response));
        let synthesizer = InsightSynthesizer::new(backend, Duration::from_secs(5));

        let result = synthesizer.synthesize(&profile(), abstracts()).await.unwrap();
        assert!(result.insights.is_empty());
        assert_eq!(result.searched_abstracts.len(), 2);
    }

    #[tokio::test]
    async fn unparsable_response_preserves_raw_text() {
        let backend = Arc::new(ScriptedBackend::new(
            "I am sorry, I cannot produce JSON today.",
        ));
        let synthesizer = InsightSynthesizer::new(backend, Duration::from_secs(5));

        let err = synthesizer
            .synthesize(&profile(), abstracts())
            .await
            .unwrap_err();

        match err {
            AnalysisError::MalformedModelOutput { raw_output, .. } => {
                assert!(raw_output.contains("cannot produce JSON"));
            }
            other => panic!("expected MalformedModelOutput, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_insight_list_is_a_valid_result() {
        let backend = Arc::new(ScriptedBackend::new(r#"{"insights": []}"#));
        let synthesizer = InsightSynthesizer::new(backend, Duration::from_secs(5));

        let result = synthesizer.synthesize(&profile(), abstracts()).await.unwrap();
        assert!(result.insights.is_empty());
    }

    #[test]
    fn strip_code_fences_handles_common_wrappers() {
        assert_eq!(strip_code_fences("```json\n{}\n```"), "{}");
        assert_eq!(strip_code_fences("```\n{}\n```"), "{}");
        assert_eq!(strip_code_fences("  {} "), "{}");
    }

    #[test]
    fn task_input_lists_every_source_url() {
        let input = build_task_input(&profile(), &abstracts());
        assert!(input.contains("SOURCE [1]"));
        assert!(input.contains("SOURCE [2]"));
        assert!(input.contains("https://pubmed.ncbi.nlm.nih.gov/1001/"));
        assert!(input.contains("https://pubmed.ncbi.nlm.nih.gov/1002/"));
        assert!(input.contains("Family History of Conditions: colon cancer"));
    }

    #[test]
    fn physician_clause_detection() {
        assert!(has_physician_clause("Please consult your doctor."));
        assert!(has_physician_clause("See an oncologist for screening."));
        assert!(!has_physician_clause("Eat more vegetables."));
    }
}
