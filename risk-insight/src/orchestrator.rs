use std::sync::Arc;
use tracing::{error, info};

use crate::error::Result;
use crate::insight::AnalysisResult;
use crate::literature::{LiteratureSearch, MAX_ABSTRACTS};
use crate::profile::HealthProfile;
use crate::query::build_queries;
use crate::synthesizer::InsightSynthesizer;

/// Per-request pipeline state. Linear: each stage either advances or moves
/// the request to its errored terminal state; nothing is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisStage {
    BuildingQuery,
    FetchingAbstracts,
    Synthesizing,
    Complete,
}

/// Sequences query building, literature retrieval and synthesis for one
/// request. All-or-nothing: no partial pipeline state reaches the caller.
pub struct Orchestrator {
    literature: Arc<dyn LiteratureSearch>,
    synthesizer: InsightSynthesizer,
    max_abstracts: usize,
}

impl Orchestrator {
    pub fn new(literature: Arc<dyn LiteratureSearch>, synthesizer: InsightSynthesizer) -> Self {
        Self {
            literature,
            synthesizer,
            max_abstracts: MAX_ABSTRACTS,
        }
    }

    pub fn with_max_abstracts(mut self, max_abstracts: usize) -> Self {
        self.max_abstracts = max_abstracts;
        self
    }

    pub async fn analyze(&self, profile: HealthProfile) -> Result<AnalysisResult> {
        // Fail fast on malformed input; nothing downstream runs.
        profile.validate()?;

        let mut stage = AnalysisStage::BuildingQuery;
        info!(stage = ?stage, "starting analysis");
        let query = build_queries(&profile);
        info!(terms = query.len(), "search query built");

        stage = AnalysisStage::FetchingAbstracts;
        info!(stage = ?stage, "retrieving literature");
        let abstracts = match self.literature.fetch_abstracts(&query, self.max_abstracts).await {
            Ok(abstracts) => abstracts,
            Err(e) => {
                error!(stage = ?stage, error = %e, "analysis aborted");
                return Err(e);
            }
        };

        stage = AnalysisStage::Synthesizing;
        info!(stage = ?stage, abstracts = abstracts.len(), "invoking synthesis");
        let result = match self.synthesizer.synthesize(&profile, abstracts).await {
            Ok(result) => result,
            Err(e) => {
                error!(stage = ?stage, error = %e, "analysis aborted");
                return Err(e);
            }
        };

        stage = AnalysisStage::Complete;
        info!(stage = ?stage, analysis_id = %result.analysis_id, "analysis complete");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AnalysisError;
    use crate::literature::LiteratureAbstract;
    use crate::profile::{AlcoholConsumption, DietaryPattern, Sex, SmokingStatus};
    use crate::query::SearchQuery;
    use crate::synthesizer::CompletionBackend;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct MockLiterature {
        outcome: fn() -> Result<Vec<LiteratureAbstract>>,
        calls: AtomicUsize,
    }

    impl MockLiterature {
        fn new(outcome: fn() -> Result<Vec<LiteratureAbstract>>) -> Self {
            Self {
                outcome,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LiteratureSearch for MockLiterature {
        async fn fetch_abstracts(
            &self,
            _query: &SearchQuery,
            _max_results: usize,
        ) -> Result<Vec<LiteratureAbstract>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.outcome)()
        }
    }

    struct CountingBackend {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CompletionBackend for CountingBackend {
        async fn complete(&self, _system: &str, _input: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(r#"{"insights": []}"#.to_string())
        }
    }

    fn sample_abstracts() -> Result<Vec<LiteratureAbstract>> {
        Ok(vec![LiteratureAbstract {
            title: "Alcohol and liver cancer".to_string(),
            abstract_text: "Cohort study.".to_string(),
            pmid: "2001".to_string(),
            doi: None,
            url: "https://pubmed.ncbi.nlm.nih.gov/2001/".to_string(),
            year: Some(2020),
        }])
    }

    fn valid_profile() -> HealthProfile {
        HealthProfile {
            age: 48,
            bmi: 26.0,
            sex: Sex::Female,
            smoking_status: SmokingStatus::Never,
            alcohol_consumption: AlcoholConsumption::Moderate,
            dietary_pattern: DietaryPattern::Western,
            family_history: vec![],
        }
    }

    fn orchestrator(
        literature: Arc<MockLiterature>,
        backend: Arc<CountingBackend>,
    ) -> Orchestrator {
        let synthesizer = InsightSynthesizer::new(backend, Duration::from_secs(1));
        Orchestrator::new(literature, synthesizer)
    }

    #[tokio::test]
    async fn invalid_profile_fails_before_any_network_call() {
        let literature = Arc::new(MockLiterature::new(sample_abstracts));
        let backend = Arc::new(CountingBackend {
            calls: AtomicUsize::new(0),
        });
        let orch = orchestrator(literature.clone(), backend.clone());

        let profile = HealthProfile {
            age: 200,
            ..valid_profile()
        };
        let err = orch.analyze(profile).await.unwrap_err();

        assert!(matches!(err, AnalysisError::InvalidProfile(_)));
        assert_eq!(literature.calls.load(Ordering::SeqCst), 0);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn no_abstracts_short_circuits_before_inference() {
        let literature = Arc::new(MockLiterature::new(|| {
            Err(AnalysisError::NoAbstractsFound)
        }));
        let backend = Arc::new(CountingBackend {
            calls: AtomicUsize::new(0),
        });
        let orch = orchestrator(literature.clone(), backend.clone());

        let err = orch.analyze(valid_profile()).await.unwrap_err();

        assert!(matches!(err, AnalysisError::NoAbstractsFound));
        assert_eq!(literature.calls.load(Ordering::SeqCst), 1);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn literature_outage_is_surfaced_as_unavailable() {
        let literature = Arc::new(MockLiterature::new(|| {
            Err(AnalysisError::LiteratureUnavailable(
                "connection refused".to_string(),
            ))
        }));
        let backend = Arc::new(CountingBackend {
            calls: AtomicUsize::new(0),
        });
        let orch = orchestrator(literature, backend.clone());

        let err = orch.analyze(valid_profile()).await.unwrap_err();

        assert!(matches!(err, AnalysisError::LiteratureUnavailable(_)));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn happy_path_runs_each_stage_exactly_once() {
        let literature = Arc::new(MockLiterature::new(sample_abstracts));
        let backend = Arc::new(CountingBackend {
            calls: AtomicUsize::new(0),
        });
        let orch = orchestrator(literature.clone(), backend.clone());

        let result = orch.analyze(valid_profile()).await.unwrap();

        assert_eq!(literature.calls.load(Ordering::SeqCst), 1);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        assert!(result.insights.is_empty());
        assert_eq!(result.searched_abstracts.len(), 1);
    }
}
