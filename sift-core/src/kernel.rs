use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use sift_cache::{
    spawn_sweeper, CacheKey, FixedWindowRateLimiter, InMemoryQueryCache, RateLimiter,
    ResultCache,
};
use sift_chart::{synthetic_series, validate_points, ChartNormalizer, PointNormalizer};
use sift_infer::{
    consult_or_default, HypothesisPrompt, InterpretationPrompt, InterpretationRequest, LlmEngine,
    LlmOracle, Oracle,
};
use sift_investigate::{
    HypothesisOracle, InvestigationEngine, InvestigationInput, InvestigationSettings,
};
use sift_plan::{PlanCompiler, PlanExecutor};
use sift_store::{ColumnarEngine, DatasetCatalog, DatasetEntry};
use sift_types::{
    ChartDataPoint, FallbackReason, InvestigationResult, QueryIntent, ResultOrigin, Row,
};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::causal::is_causal_question;
use crate::config::SiftConfig;
use crate::error::AnalysisError;

pub type InterpretationOracle = dyn Oracle<InterpretationRequest, QueryIntent>;

/// Answer to one analysis question.
#[derive(Clone, Debug, Serialize)]
pub struct AnalysisResponse {
    pub interpretation: QueryIntent,
    /// The executed statement, with the dataset placeholder still in place.
    pub sql: String,
    pub data: Vec<ChartDataPoint>,
    pub cached: bool,
    #[serde(flatten)]
    pub origin: ResultOrigin,
}

/// Analysis plus, for causal questions, the investigation that followed it.
#[derive(Clone, Debug, Serialize)]
pub struct AskResponse {
    #[serde(flatten)]
    pub analysis: AnalysisResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub investigation: Option<InvestigationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub investigation_error: Option<String>,
}

/// Wires catalog, oracles, compiler, engine, normalizer, cache and limiter together.
pub struct AnalysisKernel {
    catalog: Arc<dyn DatasetCatalog>,
    interpreter: Arc<InterpretationOracle>,
    hypothesis_oracle: Arc<HypothesisOracle>,
    compiler: PlanCompiler,
    executor: PlanExecutor,
    normalizer: Arc<dyn PointNormalizer>,
    analysis_cache: Arc<dyn ResultCache<AnalysisResponse>>,
    investigation_cache: Arc<dyn ResultCache<InvestigationResult>>,
    rate_limiter: Arc<dyn RateLimiter>,
    investigation: InvestigationSettings,
    cache_ttl: Duration,
    sweep_interval: Duration,
}

impl AnalysisKernel {
    pub fn new(
        config: &SiftConfig,
        catalog: Arc<dyn DatasetCatalog>,
        engine: Arc<dyn ColumnarEngine>,
        llm: Arc<dyn LlmEngine>,
    ) -> Self {
        let max_tokens = config.llm.max_tokens;
        Self {
            catalog,
            interpreter: Arc::new(
                LlmOracle::new(llm.clone(), InterpretationPrompt).with_max_tokens(max_tokens),
            ),
            hypothesis_oracle: Arc::new(
                LlmOracle::new(llm, HypothesisPrompt).with_max_tokens(max_tokens),
            ),
            compiler: PlanCompiler::new(config.engine.max_rows),
            executor: PlanExecutor::new(engine)
                .with_timeout(Duration::from_secs(config.engine.query_timeout_secs)),
            normalizer: Arc::new(ChartNormalizer::default()),
            analysis_cache: Arc::new(InMemoryQueryCache::new(config.cache.capacity)),
            investigation_cache: Arc::new(InMemoryQueryCache::new(config.cache.capacity)),
            rate_limiter: Arc::new(FixedWindowRateLimiter::new(
                config.rate_limit.max_requests,
                Duration::from_secs(config.rate_limit.window_secs),
            )),
            investigation: config.investigation.settings(),
            cache_ttl: config.cache_ttl(),
            sweep_interval: Duration::from_secs(config.rate_limit.sweep_interval_secs.max(1)),
        }
    }

    pub fn with_interpretation_oracle(mut self, oracle: Arc<InterpretationOracle>) -> Self {
        self.interpreter = oracle;
        self
    }

    pub fn with_hypothesis_oracle(mut self, oracle: Arc<HypothesisOracle>) -> Self {
        self.hypothesis_oracle = oracle;
        self
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.rate_limiter = limiter;
        self
    }

    pub fn with_normalizer(mut self, normalizer: Arc<dyn PointNormalizer>) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn with_analysis_cache(mut self, cache: Arc<dyn ResultCache<AnalysisResponse>>) -> Self {
        self.analysis_cache = cache;
        self
    }

    /// Periodic rate limiter sweep. Call once from the embedding host.
    pub fn spawn_maintenance(&self) -> JoinHandle<()> {
        spawn_sweeper(self.rate_limiter.clone(), self.sweep_interval)
    }

    /// Question → chart-ready answer. Only rate limiting and an unknown dataset fail.
    pub async fn run_analysis(
        &self,
        dataset_id: &str,
        user_id: &str,
        question: &str,
    ) -> Result<AnalysisResponse, AnalysisError> {
        self.rate_limiter.check(user_id).await?;
        let entry = self.catalog.lookup(dataset_id).await?;
        Ok(self.analyze(&entry, question).await)
    }

    /// Explain a causal question given the rows the analysis already produced.
    pub async fn investigate(
        &self,
        dataset_id: &str,
        user_id: &str,
        question: &str,
        initial_data: &[Row],
        interpretation: Option<&QueryIntent>,
    ) -> Result<InvestigationResult, AnalysisError> {
        self.rate_limiter.check(user_id).await?;
        let entry = self.catalog.lookup(dataset_id).await?;
        self.explain(&entry, question, initial_data, interpretation)
            .await
    }

    /// One metered request: analysis, followed by an investigation when the question
    /// is causal. A failed investigation is reported next to the analysis.
    pub async fn ask(
        &self,
        dataset_id: &str,
        user_id: &str,
        question: &str,
    ) -> Result<AskResponse, AnalysisError> {
        self.rate_limiter.check(user_id).await?;
        let entry = self.catalog.lookup(dataset_id).await?;
        let analysis = self.analyze(&entry, question).await;

        let mut response = AskResponse {
            analysis,
            investigation: None,
            investigation_error: None,
        };
        if is_causal_question(question) {
            let baseline = points_as_rows(&response.analysis.data);
            match self
                .explain(
                    &entry,
                    question,
                    &baseline,
                    Some(&response.analysis.interpretation),
                )
                .await
            {
                Ok(result) => response.investigation = Some(result),
                Err(err) => {
                    warn!(dataset_id, error = %err, "investigation aborted");
                    response.investigation_error = Some(err.to_string());
                }
            }
        }
        Ok(response)
    }

    /// Drop every cached answer for `dataset_id`.
    pub async fn invalidate_dataset(&self, dataset_id: &str) -> usize {
        let analyses = self.analysis_cache.invalidate_dataset(dataset_id).await;
        let investigations = self.investigation_cache.invalidate_dataset(dataset_id).await;
        info!(dataset_id, analyses, investigations, "cache invalidated");
        analyses + investigations
    }

    async fn analyze(&self, entry: &DatasetEntry, question: &str) -> AnalysisResponse {
        let key = CacheKey::new(&entry.id, question);
        if let Some(mut hit) = self.analysis_cache.get(&key).await {
            info!(dataset_id = %entry.id, "analysis served from cache");
            hit.cached = true;
            return hit;
        }

        let request = InterpretationRequest {
            schema: entry.schema.clone(),
            question: question.to_string(),
        };
        let consulted = consult_or_default(self.interpreter.as_ref(), &request).await;
        if let Some(failure) = &consulted.failure {
            warn!(dataset_id = %entry.id, error = %failure, "interpretation failed, using synthetic data");
            return synthetic(consulted.value, String::new(), FallbackReason::InterpretationFailure);
        }

        let plan = self.compiler.compile(&consulted.value, &entry.schema);
        let rows = match self.executor.execute(&plan.statement, &entry.location).await {
            Ok(rows) => rows,
            Err(err) => {
                warn!(
                    dataset_id = %entry.id,
                    statement = err.statement(),
                    error = %err,
                    "plan execution failed, using synthetic data"
                );
                return synthetic(plan.intent, plan.statement, FallbackReason::ExecutionError);
            }
        };

        let data = self
            .normalizer
            .normalize(&rows, &plan.metrics, &plan.dimensions);
        if let Err(err) = validate_points(&data) {
            warn!(dataset_id = %entry.id, error = %err, "chart data invalid, using synthetic data");
            return synthetic(plan.intent, plan.statement, FallbackReason::ValidationFailure);
        }

        let origin = if data.is_empty() {
            ResultOrigin::NoMatches
        } else {
            ResultOrigin::Live
        };
        let response = AnalysisResponse {
            interpretation: plan.intent,
            sql: plan.statement,
            data,
            cached: false,
            origin,
        };
        self.analysis_cache
            .set(key, response.clone(), self.cache_ttl)
            .await;
        info!(
            dataset_id = %entry.id,
            points = response.data.len(),
            origin = ?response.origin,
            "analysis complete"
        );
        response
    }

    async fn explain(
        &self,
        entry: &DatasetEntry,
        question: &str,
        initial_data: &[Row],
        interpretation: Option<&QueryIntent>,
    ) -> Result<InvestigationResult, AnalysisError> {
        let key = CacheKey::new(&entry.id, question);
        if let Some(hit) = self.investigation_cache.get(&key).await {
            info!(dataset_id = %entry.id, "investigation served from cache");
            return Ok(hit);
        }

        let engine = InvestigationEngine::new(self.hypothesis_oracle.clone(), self.executor.clone())
            .with_settings(self.investigation.clone());
        let result = engine
            .investigate(InvestigationInput {
                question,
                schema: &entry.schema,
                location: &entry.location,
                baseline: initial_data,
                interpretation,
            })
            .await?;

        self.investigation_cache
            .set(key, result.clone(), self.cache_ttl)
            .await;
        Ok(result)
    }
}

fn synthetic(intent: QueryIntent, sql: String, reason: FallbackReason) -> AnalysisResponse {
    AnalysisResponse {
        data: synthetic_series(&intent),
        interpretation: intent,
        sql,
        cached: false,
        origin: ResultOrigin::Synthetic {
            fallback_reason: reason,
        },
    }
}

/// Chart points as rows, for handing an analysis result to the investigation.
pub fn points_as_rows(points: &[ChartDataPoint]) -> Vec<Row> {
    points
        .iter()
        .filter_map(|p| match serde_json::to_value(p) {
            Ok(serde_json::Value::Object(map)) => Some(map),
            _ => None,
        })
        .collect()
}
