use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use sift_infer::{HttpVllmEngine, LlmEngine, NullLlmEngine};
use sift_investigate::{InvestigationSettings, RetryPolicy};
use sift_store::{profile_schema, DataLocation, DatasetEntry, InMemoryCatalog};
use sift_types::SchemaContext;
use tracing::info;

/// Process configuration. Every section has defaults, so an empty file is valid.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct SiftConfig {
    pub server: ServerSettings,
    pub llm: LlmSettings,
    pub cache: CacheSettings,
    pub rate_limit: RateLimitSettings,
    pub engine: EngineSettings,
    pub investigation: InvestigationConfig,
    pub datasets: Vec<DatasetConfig>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:7000".into(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub deterministic: bool,
    pub seed: Option<u64>,
    /// Use the null engine: every oracle call fails and the pipeline degrades.
    pub stub: bool,
    pub max_tokens: usize,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            url: "http://localhost:8000/v1".into(),
            model: "mistralai/Mistral-7B-Instruct-v0.3".into(),
            api_key: None,
            deterministic: false,
            seed: None,
            stub: false,
            max_tokens: 1024,
        }
    }
}

impl LlmSettings {
    pub fn build_engine(&self) -> Arc<dyn LlmEngine> {
        if self.stub {
            return Arc::new(NullLlmEngine);
        }
        if self.deterministic {
            info!(seed = ?self.seed, "LLM deterministic preset enabled");
        }
        Arc::new(
            HttpVllmEngine::new(
                self.url.clone(),
                self.model.clone(),
                self.deterministic,
                self.seed,
            )
            .with_api_key(self.api_key.clone()),
        )
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub capacity: usize,
    pub ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            capacity: sift_cache::DEFAULT_CAPACITY,
            ttl_secs: sift_cache::DEFAULT_TTL.as_secs(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub max_requests: u32,
    pub window_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_requests: sift_cache::DEFAULT_MAX_REQUESTS,
            window_secs: sift_cache::DEFAULT_WINDOW.as_secs(),
            sweep_interval_secs: sift_cache::DEFAULT_SWEEP_INTERVAL.as_secs(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub query_timeout_secs: u64,
    pub max_rows: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            query_timeout_secs: sift_plan::DEFAULT_STATEMENT_TIMEOUT.as_secs(),
            max_rows: sift_plan::DEFAULT_MAX_ROWS,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct InvestigationConfig {
    pub max_hypotheses: usize,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub test_concurrency: usize,
}

impl Default for InvestigationConfig {
    fn default() -> Self {
        Self {
            max_hypotheses: sift_infer::MAX_HYPOTHESES,
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 10_000,
            test_concurrency: 1,
        }
    }
}

impl InvestigationConfig {
    pub fn settings(&self) -> InvestigationSettings {
        InvestigationSettings {
            max_hypotheses: self.max_hypotheses,
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                base_delay: Duration::from_millis(self.base_delay_ms),
                max_delay: Duration::from_millis(self.max_delay_ms),
            },
            test_concurrency: self.test_concurrency,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct DatasetConfig {
    pub id: String,
    pub path: PathBuf,
    #[serde(default)]
    pub domain: Option<String>,
    /// Explicit schema context. Profiled from the file when absent.
    #[serde(default)]
    pub schema: Option<SchemaContext>,
}

impl SiftConfig {
    pub fn from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)?;
        let cfg: SiftConfig = serde_yaml::from_str(&text)?;
        Ok(cfg)
    }

    /// File named by `SIFT_CONFIG` (defaults otherwise), then environment overrides.
    pub fn load() -> anyhow::Result<Self> {
        let mut cfg = match std::env::var("SIFT_CONFIG") {
            Ok(path) if !path.is_empty() => Self::from_path(path)?,
            _ => Self::default(),
        };
        cfg.apply_env(|key| std::env::var(key).ok());
        Ok(cfg)
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("LLM_LOCAL_URL") {
            self.llm.url = url;
        }
        if let Some(model) = lookup("LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(key) = lookup("LLM_API_KEY") {
            self.llm.api_key = Some(key);
        }
        if let Some(flag) = lookup("LLM_DETERMINISTIC") {
            self.llm.deterministic = is_truthy(&flag);
        }
        if let Some(seed) = lookup("LLM_SEED").and_then(|v| v.parse().ok()) {
            self.llm.seed = Some(seed);
        }
        if let Some(flag) = lookup("LLM_STUB") {
            self.llm.stub = is_truthy(&flag);
        }
        if let Some(bind) = lookup("SIFT_BIND") {
            self.server.bind = bind;
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }

    /// Register every configured dataset, profiling those without an explicit schema.
    pub async fn build_catalog(&self) -> anyhow::Result<InMemoryCatalog> {
        let catalog = InMemoryCatalog::new();
        for dataset in &self.datasets {
            let location = DataLocation::from_path(&dataset.path)?;
            let domain = dataset.domain.clone().unwrap_or_default();
            let schema = match &dataset.schema {
                Some(schema) => schema.clone(),
                None => profile_schema(&location, &domain).await?,
            };
            info!(
                dataset_id = %dataset.id,
                path = %dataset.path.display(),
                metrics = ?schema.metrics,
                dimensions = ?schema.dimensions,
                "dataset registered"
            );
            catalog
                .register(DatasetEntry {
                    id: dataset.id.clone(),
                    location,
                    schema,
                })
                .await;
        }
        Ok(catalog)
    }
}

fn is_truthy(v: &str) -> bool {
    v == "1" || v.eq_ignore_ascii_case("true")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn empty_yaml_is_all_defaults() {
        let cfg: SiftConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(cfg.cache.capacity, 100);
        assert_eq!(cfg.cache.ttl_secs, 3600);
        assert_eq!(cfg.rate_limit.max_requests, 50);
        assert_eq!(cfg.engine.max_rows, 500);
        assert_eq!(cfg.investigation.max_attempts, 3);
        assert!(cfg.datasets.is_empty());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let yaml = "
rate_limit:
  max_requests: 5
investigation:
  test_concurrency: 4
datasets:
  - id: sales
    path: data/sales.csv
    schema:
      metrics: [revenue]
      dimensions: [region]
      timeColumn: order_date
";
        let cfg: SiftConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.rate_limit.max_requests, 5);
        assert_eq!(cfg.rate_limit.window_secs, 3600);
        assert_eq!(cfg.investigation.settings().test_concurrency, 4);
        let schema = cfg.datasets[0].schema.as_ref().unwrap();
        assert_eq!(schema.time_column.as_deref(), Some("order_date"));
    }

    #[test]
    fn environment_overrides_file() {
        let env: HashMap<&str, &str> = [
            ("LLM_MODEL", "local-model"),
            ("LLM_STUB", "TRUE"),
            ("LLM_SEED", "7"),
            ("SIFT_BIND", "127.0.0.1:9000"),
        ]
        .into_iter()
        .collect();
        let mut cfg = SiftConfig::default();
        cfg.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(cfg.llm.model, "local-model");
        assert!(cfg.llm.stub);
        assert_eq!(cfg.llm.seed, Some(7));
        assert_eq!(cfg.server.bind, "127.0.0.1:9000");
        assert_eq!(cfg.llm.url, "http://localhost:8000/v1");
    }

    #[tokio::test]
    async fn catalog_profiles_datasets_without_schema() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "region,revenue").unwrap();
        writeln!(file, "EU,10").unwrap();

        let cfg = SiftConfig {
            datasets: vec![DatasetConfig {
                id: "sales".into(),
                path: file.path().to_path_buf(),
                domain: Some("retail".into()),
                schema: None,
            }],
            ..SiftConfig::default()
        };
        let catalog = cfg.build_catalog().await.unwrap();
        let entry = sift_store::DatasetCatalog::lookup(&catalog, "sales").await.unwrap();
        assert_eq!(entry.schema.metrics, vec!["revenue"]);
        assert_eq!(entry.schema.dimensions, vec!["region"]);
        assert_eq!(entry.schema.domain, "retail");
    }
}
