use std::collections::HashSet;
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use sift_infer::{HypothesisRequest, Oracle, OracleError, MAX_HYPOTHESES};
use sift_plan::PlanExecutor;
use sift_store::DataLocation;
use sift_types::{
    Hypothesis, HypothesisDraft, InvestigationResult, QueryIntent, Row, SchemaContext,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::evidence::evaluate_evidence;
use crate::rank::rank;
use crate::retry::{retry_async, RetryPolicy};

/// Baseline rows shown to the hypothesis oracle.
pub const SAMPLE_ROWS: usize = 5;

pub type HypothesisOracle = dyn Oracle<HypothesisRequest, Vec<HypothesisDraft>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Generating,
    Testing,
    Ranked,
}

#[derive(Debug, Error)]
pub enum InvestigationError {
    #[error("hypothesis oracle failed {attempts} times: {last}")]
    OracleExhausted { attempts: u32, last: OracleError },
}

#[derive(Clone, Debug)]
pub struct InvestigationSettings {
    pub max_hypotheses: usize,
    pub retry: RetryPolicy,
    /// Hypothesis tests in flight at once. 1 runs them sequentially.
    pub test_concurrency: usize,
}

impl Default for InvestigationSettings {
    fn default() -> Self {
        Self {
            max_hypotheses: MAX_HYPOTHESES,
            retry: RetryPolicy::default(),
            test_concurrency: 1,
        }
    }
}

/// What a causal question is asked about.
#[derive(Clone, Debug)]
pub struct InvestigationInput<'a> {
    pub question: &'a str,
    pub schema: &'a SchemaContext,
    pub location: &'a DataLocation,
    pub baseline: &'a [Row],
    pub interpretation: Option<&'a QueryIntent>,
}

/// Drives GENERATING → TESTING → RANKED for one causal question.
pub struct InvestigationEngine {
    oracle: Arc<HypothesisOracle>,
    executor: PlanExecutor,
    settings: InvestigationSettings,
}

impl InvestigationEngine {
    pub fn new(oracle: Arc<HypothesisOracle>, executor: PlanExecutor) -> Self {
        Self {
            oracle,
            executor,
            settings: InvestigationSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: InvestigationSettings) -> Self {
        self.settings = settings;
        self
    }

    pub async fn investigate(
        &self,
        input: InvestigationInput<'_>,
    ) -> Result<InvestigationResult, InvestigationError> {
        debug!(phase = ?Phase::Generating, question = input.question, "investigation started");
        let drafts = self.generate(&input).await?;

        debug!(phase = ?Phase::Testing, hypotheses = drafts.len(), "testing hypotheses");
        let tested = self.test_all(drafts, input.location).await;

        let result = rank(tested);
        info!(
            phase = ?Phase::Ranked,
            primary = result.primary_cause.as_ref().map(|h| h.id.as_str()),
            secondary = result.secondary_causes.len(),
            unproven = result.unproven_hypotheses.len(),
            overall_confidence = result.overall_confidence,
            "investigation ranked"
        );
        Ok(result)
    }

    /// Consult the oracle with retries. An empty usable list counts as a failure.
    pub async fn generate(
        &self,
        input: &InvestigationInput<'_>,
    ) -> Result<Vec<HypothesisDraft>, InvestigationError> {
        let max = self.settings.max_hypotheses.clamp(1, MAX_HYPOTHESES);
        let request = HypothesisRequest {
            schema: input.schema.clone(),
            question: input.question.to_string(),
            sample_rows: input.baseline.iter().take(SAMPLE_ROWS).cloned().collect(),
            interpretation: input.interpretation.cloned(),
            max_hypotheses: max,
        };

        let request = &request;
        let oracle = &self.oracle;
        retry_async("hypothesis oracle", &self.settings.retry, move || async move {
            let drafts = distinct(oracle.consult(request).await?, max);
            if drafts.is_empty() {
                Err(OracleError::Empty)
            } else {
                Ok(drafts)
            }
        })
        .await
        .map_err(|exhausted| InvestigationError::OracleExhausted {
            attempts: exhausted.attempts,
            last: exhausted.last,
        })
    }

    /// Run every test query. Failures score zero; output order follows input order.
    pub async fn test_all(
        &self,
        drafts: Vec<HypothesisDraft>,
        location: &DataLocation,
    ) -> Vec<Hypothesis> {
        let concurrency = self.settings.test_concurrency.max(1);
        stream::iter(
            drafts
                .into_iter()
                .enumerate()
                .map(|(idx, draft)| self.test_one(format!("h{}", idx + 1), draft, location)),
        )
        .buffered(concurrency)
        .collect()
        .await
    }

    async fn test_one(
        &self,
        id: String,
        draft: HypothesisDraft,
        location: &DataLocation,
    ) -> Hypothesis {
        match self.executor.execute(&draft.test_query, location).await {
            Ok(rows) => {
                let evidence = evaluate_evidence(&rows);
                debug!(
                    %id,
                    rows = rows.len(),
                    strength = evidence.strength,
                    confidence = evidence.confidence,
                    "hypothesis tested"
                );
                Hypothesis {
                    id,
                    hypothesis: draft.hypothesis,
                    test_query: draft.test_query,
                    evidence: Some(rows),
                    strength: evidence.strength,
                    confidence: evidence.confidence,
                    conclusion: evidence.conclusion,
                }
            }
            Err(err) => {
                warn!(%id, statement = err.statement(), error = %err, "hypothesis test failed");
                Hypothesis {
                    id,
                    hypothesis: draft.hypothesis,
                    test_query: draft.test_query,
                    evidence: None,
                    strength: 0,
                    confidence: 0,
                    conclusion: format!("Test could not run: {err}"),
                }
            }
        }
    }
}

fn distinct(drafts: Vec<HypothesisDraft>, max: usize) -> Vec<HypothesisDraft> {
    let mut seen = HashSet::new();
    drafts
        .into_iter()
        .filter(|d| !d.hypothesis.trim().is_empty() && !d.test_query.trim().is_empty())
        .filter(|d| seen.insert(d.hypothesis.trim().to_lowercase()))
        .take(max)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sift_store::DataFusionEngine;
    use std::collections::VecDeque;
    use std::io::Write;
    use std::time::Duration;
    use tokio::sync::Mutex;

    struct CannedOracle {
        replies: Mutex<VecDeque<Result<Vec<HypothesisDraft>, OracleError>>>,
        calls: Mutex<u32>,
    }

    impl CannedOracle {
        fn new(replies: Vec<Result<Vec<HypothesisDraft>, OracleError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(0),
            })
        }
    }

    #[async_trait]
    impl Oracle<HypothesisRequest, Vec<HypothesisDraft>> for CannedOracle {
        async fn consult(
            &self,
            _request: &HypothesisRequest,
        ) -> Result<Vec<HypothesisDraft>, OracleError> {
            *self.calls.lock().await += 1;
            self.replies
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| Err(OracleError::Unreachable("offline".into())))
        }
    }

    fn draft(hypothesis: &str, test_query: &str) -> HypothesisDraft {
        HypothesisDraft {
            hypothesis: hypothesis.into(),
            test_query: test_query.into(),
        }
    }

    fn sales_csv() -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "month,region,revenue").unwrap();
        writeln!(file, "1,EU,200").unwrap();
        writeln!(file, "1,US,100").unwrap();
        writeln!(file, "2,EU,100").unwrap();
        writeln!(file, "2,US,108").unwrap();
        file
    }

    fn schema() -> SchemaContext {
        SchemaContext {
            metrics: vec!["revenue".into()],
            dimensions: vec!["region".into()],
            time_column: None,
            domain: "retail".into(),
        }
    }

    fn engine(oracle: Arc<CannedOracle>) -> InvestigationEngine {
        InvestigationEngine::new(oracle, PlanExecutor::new(Arc::new(DataFusionEngine::new())))
    }

    #[tokio::test]
    async fn tests_and_ranks_hypotheses() {
        let by_region = |region: &str| {
            format!(
                "SELECT SUM(revenue) AS revenue FROM {{{{DATASET}}}} WHERE region = '{region}' \
                 GROUP BY month ORDER BY month DESC"
            )
        };
        let oracle = CannedOracle::new(vec![Ok(vec![
            draft("US held steady", &by_region("US")),
            draft("EU demand collapsed", &by_region("EU")),
            draft("eu demand collapsed", &by_region("EU")),
            draft("Discount column explains it", "SELECT discount FROM {{DATASET}}"),
        ])]);
        let file = sales_csv();
        let location = DataLocation::from_path(file.path()).unwrap();

        let result = engine(oracle)
            .investigate(InvestigationInput {
                question: "Why did revenue drop?",
                schema: &schema(),
                location: &location,
                baseline: &[],
                interpretation: None,
            })
            .await
            .unwrap();

        let primary = result.primary_cause.expect("EU drop should be primary");
        assert_eq!(primary.id, "h2");
        assert_eq!((primary.strength, primary.confidence), (90, 70));
        assert!(primary.conclusion.contains("decreased by 50.0%"));

        // US moved 8%: strength 30, confidence 70 → secondary.
        assert_eq!(result.secondary_causes.len(), 1);
        assert_eq!(result.secondary_causes[0].id, "h1");

        let failed = &result.unproven_hypotheses[0];
        assert_eq!(failed.id, "h3");
        assert_eq!((failed.strength, failed.confidence), (0, 0));
        assert!(failed.evidence.is_none());
        assert!(failed.conclusion.starts_with("Test could not run"));
        assert_eq!(result.overall_confidence, 70);
    }

    #[tokio::test(start_paused = true)]
    async fn oracle_exhaustion_aborts_after_backoff() {
        let oracle = CannedOracle::new(vec![
            Err(OracleError::Malformed("prose".into())),
            Ok(vec![draft("  ", "SELECT 1")]),
        ]);
        let location = DataLocation::from_path("unused.csv").unwrap();
        let started = tokio::time::Instant::now();

        let err = engine(oracle.clone())
            .investigate(InvestigationInput {
                question: "Why?",
                schema: &schema(),
                location: &location,
                baseline: &[],
                interpretation: None,
            })
            .await
            .unwrap_err();

        let InvestigationError::OracleExhausted { attempts, last } = err;
        assert_eq!(attempts, 3);
        assert!(matches!(last, OracleError::Unreachable(_)));
        assert_eq!(*oracle.calls.lock().await, 3);
        // 1s after the first failure, 2s after the second.
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test]
    async fn concurrent_testing_keeps_order() {
        let oracle = CannedOracle::new(vec![Ok((1..=5)
            .map(|i| draft(&format!("cause {i}"), &format!("SELECT {i} AS v FROM {{{{DATASET}}}} LIMIT 1")))
            .collect())]);
        let file = sales_csv();
        let location = DataLocation::from_path(file.path()).unwrap();
        let engine = engine(oracle).with_settings(InvestigationSettings {
            test_concurrency: 3,
            ..InvestigationSettings::default()
        });

        let drafts = engine
            .generate(&InvestigationInput {
                question: "Why?",
                schema: &schema(),
                location: &location,
                baseline: &[],
                interpretation: None,
            })
            .await
            .unwrap();
        let tested = engine.test_all(drafts, &location).await;

        let ids: Vec<_> = tested.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["h1", "h2", "h3", "h4", "h5"]);
        assert!(tested.iter().all(|h| h.strength == 40));
    }
}
