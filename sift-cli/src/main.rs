use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use sift_core::{AnalysisKernel, SiftConfig};
use sift_infer::{LlmEngine, ScriptedLlmEngine};
use sift_store::{profile_schema, DataFusionEngine, DataLocation, DatasetEntry};
use sift_types::Row;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sift", about = "Ask questions of tabular datasets")]
struct Cli {
    /// YAML configuration file. Falls back to SIFT_CONFIG, then defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct DatasetArgs {
    /// Dataset id from the configuration.
    #[arg(long, default_value = "local")]
    dataset: String,
    /// CSV or Parquet file registered under `--dataset`, profiled on the fly.
    #[arg(long)]
    file: Option<PathBuf>,
    #[arg(long, default_value = "cli")]
    user: String,
}

#[derive(Subcommand)]
enum Command {
    /// Interpret a question, run it and print chart data (plus an investigation for "why" questions).
    Analyze {
        #[command(flatten)]
        target: DatasetArgs,
        question: String,
    },
    /// Generate and test hypotheses for a causal question.
    Investigate {
        #[command(flatten)]
        target: DatasetArgs,
        /// JSON array of rows the earlier analysis produced.
        #[arg(long)]
        baseline: Option<PathBuf>,
        question: String,
    },
    /// Print the schema context inferred for a data file.
    Profile {
        file: PathBuf,
        #[arg(long, default_value = "")]
        domain: String,
    },
    /// Run a causal question end to end against a bundled dataset and scripted oracle.
    Demo,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => {
            let mut cfg = SiftConfig::from_path(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            cfg.apply_env(|key| std::env::var(key).ok());
            cfg
        }
        None => SiftConfig::load()?,
    };

    match cli.command {
        Command::Analyze { target, question } => {
            let kernel = kernel_for(&config, &target, config.llm.build_engine()).await?;
            let response = kernel.ask(&target.dataset, &target.user, &question).await?;
            print_json(&response)?;
        }
        Command::Investigate {
            target,
            baseline,
            question,
        } => {
            let baseline: Vec<Row> = match baseline {
                Some(path) => {
                    let text = std::fs::read_to_string(&path)
                        .with_context(|| format!("reading baseline {}", path.display()))?;
                    serde_json::from_str(&text)?
                }
                None => Vec::new(),
            };
            let kernel = kernel_for(&config, &target, config.llm.build_engine()).await?;
            let result = kernel
                .investigate(&target.dataset, &target.user, &question, &baseline, None)
                .await?;
            print_json(&result)?;
        }
        Command::Profile { file, domain } => {
            let location = DataLocation::from_path(&file)?;
            let schema = profile_schema(&location, &domain).await?;
            print_json(&schema)?;
        }
        Command::Demo => run_demo(&config).await?,
    }

    Ok(())
}

async fn kernel_for(
    config: &SiftConfig,
    target: &DatasetArgs,
    llm: Arc<dyn LlmEngine>,
) -> anyhow::Result<AnalysisKernel> {
    let catalog = config.build_catalog().await?;
    if let Some(file) = &target.file {
        let location = DataLocation::from_path(file)?;
        let schema = profile_schema(&location, "").await?;
        info!(dataset_id = %target.dataset, path = %file.display(), "ad hoc dataset registered");
        catalog
            .register(DatasetEntry {
                id: target.dataset.clone(),
                location,
                schema,
            })
            .await;
    }
    Ok(AnalysisKernel::new(
        config,
        Arc::new(catalog),
        Arc::new(DataFusionEngine::new()),
        llm,
    ))
}

const DEMO_ROWS: &str = "\
order_date,month,region,revenue
2024-01-08,1,EU,220
2024-01-19,1,US,140
2024-02-06,2,EU,90
2024-02-21,2,US,146
";

const DEMO_INTERPRETATION: &str =
    r#"{"intent":"trend","metrics":["revenue"],"time_grain":"month"}"#;

const DEMO_HYPOTHESES: &str = r#"{"hypotheses": [
  {"hypothesis": "EU demand fell",
   "test_query": "SELECT SUM(revenue) AS revenue FROM {{DATASET}} WHERE region = 'EU' GROUP BY month ORDER BY month DESC"},
  {"hypothesis": "US sales held steady",
   "test_query": "SELECT SUM(revenue) AS revenue FROM {{DATASET}} WHERE region = 'US' GROUP BY month ORDER BY month DESC"}
]}"#;

async fn run_demo(config: &SiftConfig) -> anyhow::Result<()> {
    let mut file = tempfile::Builder::new().suffix(".csv").tempfile()?;
    file.write_all(DEMO_ROWS.as_bytes())?;
    file.flush()?;

    let target = DatasetArgs {
        dataset: "demo".into(),
        file: Some(file.path().to_path_buf()),
        user: "demo".into(),
    };
    let llm = Arc::new(ScriptedLlmEngine::with_replies([
        DEMO_INTERPRETATION,
        DEMO_HYPOTHESES,
    ]));
    let demo_config = SiftConfig {
        datasets: Vec::new(),
        ..config.clone()
    };
    let kernel = kernel_for(&demo_config, &target, llm).await?;

    let question = "Why did revenue drop in February?";
    let response = kernel.ask(&target.dataset, &target.user, question).await?;
    print_json(&json!({ "question": question, "answer": response }))?;
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
