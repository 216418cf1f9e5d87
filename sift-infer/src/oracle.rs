//! Oracles: LLM-backed functions that map a prompt to loosely-typed JSON.
//!
//! Nothing past [`Oracle::consult`] trusts the shape of what the model produced. Each
//! prompt owns its parser, and callers that can tolerate a degraded answer go through
//! [`consult_or_default`], which never fails.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use sift_types::{HypothesisDraft, QueryIntent, Row, SchemaContext};
use thiserror::Error;
use tracing::warn;

use crate::{collect_text, LlmEngine, LlmError, LlmRequest};

/// Server-side cap on hypotheses accepted from one consultation.
pub const MAX_HYPOTHESES: usize = 5;

pub use sift_types::DATASET_PLACEHOLDER;

#[derive(Clone, Debug, Error)]
pub enum OracleError {
    #[error("oracle unreachable: {0}")]
    Unreachable(String),
    #[error("oracle returned malformed output: {0}")]
    Malformed(String),
    #[error("oracle returned no usable content")]
    Empty,
}

impl From<LlmError> for OracleError {
    fn from(err: LlmError) -> Self {
        OracleError::Unreachable(err.message)
    }
}

/// Capability interface for a non-deterministic external function.
#[async_trait]
pub trait Oracle<Req, Resp>: Send + Sync
where
    Req: Send + Sync,
{
    async fn consult(&self, request: &Req) -> Result<Resp, OracleError>;
}

/// Result of a consultation that is allowed to degrade.
#[derive(Clone, Debug)]
pub struct Consulted<T> {
    pub value: T,
    /// Set when `value` is the default because the oracle failed.
    pub failure: Option<OracleError>,
}

impl<T> Consulted<T> {
    pub fn is_degraded(&self) -> bool {
        self.failure.is_some()
    }
}

/// Consult once and fall back to `Resp::default()` on any failure.
pub async fn consult_or_default<O, Req, Resp>(oracle: &O, request: &Req) -> Consulted<Resp>
where
    O: Oracle<Req, Resp> + ?Sized,
    Req: Send + Sync,
    Resp: Default,
{
    match oracle.consult(request).await {
        Ok(value) => Consulted {
            value,
            failure: None,
        },
        Err(err) => {
            warn!(error = %err, "oracle failed, using default response");
            Consulted {
                value: Resp::default(),
                failure: Some(err),
            }
        }
    }
}

/// Parse model output as JSON, tolerating prose or markdown fences around it.
pub fn parse_oracle_json<T: DeserializeOwned>(text: &str) -> Result<T, OracleError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(OracleError::Empty);
    }
    if let Ok(v) = serde_json::from_str(trimmed) {
        return Ok(v);
    }
    let candidate = extract_json_block(trimmed)
        .ok_or_else(|| OracleError::Malformed("no JSON value found".into()))?;
    serde_json::from_str(candidate).map_err(|e| OracleError::Malformed(e.to_string()))
}

/// First balanced `{...}` or `[...]` block, skipping brackets inside strings.
fn extract_json_block(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let mut depth: i64 = 0;
    let mut in_string = false;
    let mut escape = false;

    for (idx, ch) in text.char_indices().skip_while(|(i, _)| *i < start) {
        if in_string {
            if escape {
                escape = false;
            } else if ch == '\\' {
                escape = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=idx]);
                }
            }
            _ => {}
        }
    }
    None
}

/// A prompt template paired with the parser for its answer.
pub trait OraclePrompt<Req>: Send + Sync {
    type Response: Send;

    fn system(&self) -> &str;
    fn render(&self, request: &Req) -> String;
    fn parse(&self, text: &str) -> Result<Self::Response, OracleError>;
}

/// Oracle backed by an [`LlmEngine`].
pub struct LlmOracle<P> {
    engine: Arc<dyn LlmEngine>,
    prompt: P,
    max_tokens: usize,
}

impl<P> LlmOracle<P> {
    pub fn new(engine: Arc<dyn LlmEngine>, prompt: P) -> Self {
        Self {
            engine,
            prompt,
            max_tokens: 1024,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

#[async_trait]
impl<Req, P> Oracle<Req, P::Response> for LlmOracle<P>
where
    Req: Send + Sync,
    P: OraclePrompt<Req>,
{
    async fn consult(&self, request: &Req) -> Result<P::Response, OracleError> {
        let req = LlmRequest {
            system: Some(self.prompt.system().to_string()),
            prompt: self.prompt.render(request),
            max_tokens: self.max_tokens,
            json_mode: true,
        };
        let stream = self.engine.generate(req).await?;
        let text = collect_text(stream).await?;
        self.prompt.parse(&text)
    }
}

fn render_schema(schema: &SchemaContext) -> String {
    format!(
        "Domain: {}\nMetric columns (numeric): {}\nDimension columns (categorical): {}\nTime column: {}",
        if schema.domain.is_empty() { "general" } else { schema.domain.as_str() },
        join_or_none(&schema.metrics),
        join_or_none(&schema.dimensions),
        schema.time_column.as_deref().unwrap_or("none"),
    )
}

fn join_or_none(names: &[String]) -> String {
    if names.is_empty() {
        "none".to_string()
    } else {
        names.join(", ")
    }
}

#[derive(Clone, Debug)]
pub struct InterpretationRequest {
    pub schema: SchemaContext,
    pub question: String,
}

/// Question → [`QueryIntent`].
#[derive(Clone, Debug, Default)]
pub struct InterpretationPrompt;

impl OraclePrompt<InterpretationRequest> for InterpretationPrompt {
    type Response = QueryIntent;

    fn system(&self) -> &str {
        "You translate business questions about a single table into a JSON query intent. \
         Use only column names from the schema. Reply with one JSON object and nothing else."
    }

    fn render(&self, request: &InterpretationRequest) -> String {
        format!(
            "{schema}\n\nQuestion: {question}\n\n\
             Return JSON with keys:\n\
             - intent: one of summary, trend, comparison, ranking, distribution\n\
             - metrics: metric column names\n\
             - dimensions: dimension column names to group by\n\
             - aggregation: one of SUM, AVG, COUNT, MIN, MAX\n\
             - filters: list of {{\"column\", \"operator\", \"value\"}} with operator one of =, !=, >, >=, <, <=, contains\n\
             - time_dimension: the time column or null\n\
             - time_grain: one of day, week, month, quarter, year\n\
             - limit: a number or null",
            schema = render_schema(&request.schema),
            question = request.question.trim(),
        )
    }

    fn parse(&self, text: &str) -> Result<QueryIntent, OracleError> {
        parse_oracle_json(text)
    }
}

#[derive(Clone, Debug)]
pub struct HypothesisRequest {
    pub schema: SchemaContext,
    pub question: String,
    pub sample_rows: Vec<Row>,
    /// Interpretation behind `sample_rows`, when the caller has one.
    pub interpretation: Option<QueryIntent>,
    pub max_hypotheses: usize,
}

/// (question, schema, sample rows) → falsifiable hypotheses with test queries.
#[derive(Clone, Debug, Default)]
pub struct HypothesisPrompt;

#[derive(Deserialize)]
#[serde(untagged)]
enum HypothesisEnvelope {
    Wrapped { hypotheses: Vec<Value> },
    Bare(Vec<Value>),
}

impl OraclePrompt<HypothesisRequest> for HypothesisPrompt {
    type Response = Vec<HypothesisDraft>;

    fn system(&self) -> &str {
        "You are a data analyst explaining changes in business metrics. You propose distinct, \
         falsifiable hypotheses and one read-only SQL query per hypothesis that tests it. \
         Reply with one JSON object and nothing else."
    }

    fn render(&self, request: &HypothesisRequest) -> String {
        let sample = serde_json::to_string(&request.sample_rows)
            .unwrap_or_else(|_| "[]".to_string());
        let max = request.max_hypotheses.clamp(1, MAX_HYPOTHESES);
        let analysis = request
            .interpretation
            .as_ref()
            .and_then(|intent| serde_json::to_string(intent).ok())
            .map(|json| format!("\nAnalysis that produced them: {json}"))
            .unwrap_or_default();
        format!(
            "{schema}\n\nQuestion: {question}\n\nSample of the current result rows: {sample}{analysis}\n\n\
             Propose up to {max} distinct hypotheses. For each, write one self-contained SELECT \
             statement over the table {placeholder} that compares the current period with the \
             prior period. The query must return exactly two rows with a single numeric column: \
             the current period value first, the prior period value second.\n\
             Return JSON: {{\"hypotheses\": [{{\"hypothesis\": \"...\", \"test_query\": \"...\"}}]}}",
            schema = render_schema(&request.schema),
            question = request.question.trim(),
            placeholder = DATASET_PLACEHOLDER,
        )
    }

    fn parse(&self, text: &str) -> Result<Vec<HypothesisDraft>, OracleError> {
        let envelope: HypothesisEnvelope = parse_oracle_json(text)?;
        let raw = match envelope {
            HypothesisEnvelope::Wrapped { hypotheses } => hypotheses,
            HypothesisEnvelope::Bare(items) => items,
        };

        let mut seen = HashSet::new();
        let drafts: Vec<HypothesisDraft> = raw
            .into_iter()
            .filter_map(|v| serde_json::from_value::<HypothesisDraft>(v).ok())
            .filter(|d| !d.hypothesis.trim().is_empty() && !d.test_query.trim().is_empty())
            .filter(|d| seen.insert(d.hypothesis.trim().to_lowercase()))
            .take(MAX_HYPOTHESES)
            .collect();

        if drafts.is_empty() {
            return Err(OracleError::Empty);
        }
        Ok(drafts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ScriptedLlmEngine;
    use sift_types::IntentKind;

    fn schema() -> SchemaContext {
        SchemaContext {
            metrics: vec!["revenue".into()],
            dimensions: vec!["region".into()],
            time_column: Some("order_date".into()),
            domain: "retail".into(),
        }
    }

    #[test]
    fn json_is_found_inside_prose() {
        let text = "Sure! Here it is:\n```json\n{\"intent\": \"trend\", \"note\": \"a } in a string\"}\n```";
        let intent: QueryIntent = parse_oracle_json(text).unwrap();
        assert_eq!(intent.intent, IntentKind::Trend);
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(
            parse_oracle_json::<QueryIntent>("I cannot help with that."),
            Err(OracleError::Malformed(_))
        ));
        assert!(matches!(
            parse_oracle_json::<QueryIntent>("   "),
            Err(OracleError::Empty)
        ));
    }

    #[test]
    fn hypotheses_are_deduplicated_and_capped() {
        let items: Vec<Value> = (0..8)
            .map(|i| {
                serde_json::json!({
                    "hypothesis": format!("Cause {}", i % 6),
                    "test_query": "SELECT 1 FROM {{DATASET}}"
                })
            })
            .chain(std::iter::once(serde_json::json!({"hypothesis": "no query"})))
            .collect();
        let text = serde_json::json!({ "hypotheses": items }).to_string();

        let drafts = HypothesisPrompt.parse(&text).unwrap();
        assert_eq!(drafts.len(), MAX_HYPOTHESES);
        assert_eq!(drafts[0].hypothesis, "Cause 0");
        assert_eq!(drafts[4].hypothesis, "Cause 4");
    }

    #[test]
    fn bare_array_is_accepted() {
        let text = r#"[{"hypothesis": "Fewer orders", "test_query": "SELECT 1"}]"#;
        assert_eq!(HypothesisPrompt.parse(text).unwrap().len(), 1);
        assert!(matches!(
            HypothesisPrompt.parse(r#"{"hypotheses": []}"#),
            Err(OracleError::Empty)
        ));
    }

    #[tokio::test]
    async fn unreachable_oracle_degrades_to_default() {
        let engine = Arc::new(ScriptedLlmEngine::new());
        let oracle = LlmOracle::new(engine, InterpretationPrompt);
        let request = InterpretationRequest {
            schema: schema(),
            question: "total revenue".into(),
        };

        let consulted = consult_or_default(&oracle, &request).await;
        assert!(consulted.is_degraded());
        assert_eq!(consulted.value, QueryIntent::default());
    }

    #[tokio::test]
    async fn prompt_carries_schema_and_question() {
        let engine = Arc::new(ScriptedLlmEngine::with_replies([
            r#"{"intent":"ranking","metrics":["revenue"],"dimensions":["region"]}"#,
        ]));
        let oracle = LlmOracle::new(engine.clone(), InterpretationPrompt);
        let request = InterpretationRequest {
            schema: schema(),
            question: "top regions by revenue".into(),
        };

        let intent = oracle.consult(&request).await.unwrap();
        assert_eq!(intent.intent, IntentKind::Ranking);

        let prompts = engine.prompts().await;
        assert!(prompts[0].contains("top regions by revenue"));
        assert!(prompts[0].contains("order_date"));
    }
}
