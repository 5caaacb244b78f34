use analysis_sandbox::{AsyncSandbox, Dataset, ExecutionReport, SandboxConfig};
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "analysis-sandbox")]
#[command(about = "Run an analysis script against a CSV dataset and print the execution report")]
struct Args {
    /// CSV file with a header row
    #[arg(short, long)]
    data: PathBuf,

    /// Script to execute
    #[arg(short, long)]
    script: PathBuf,

    /// The question the script answers, echoed into the report
    #[arg(short, long)]
    query: Option<String>,

    /// Override the execution timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = SandboxConfig::from_env().context("Invalid sandbox configuration")?;
    if let Some(ms) = args.timeout_ms {
        config.limits.timeout = std::time::Duration::from_millis(ms);
    }

    let dataset = Dataset::from_csv(&args.data)
        .with_context(|| format!("Failed to load dataset {}", args.data.display()))?;
    let source = std::fs::read_to_string(&args.script)
        .with_context(|| format!("Failed to read script {}", args.script.display()))?;

    info!(
        "Loaded {} rows x {} columns from {}",
        dataset.height(),
        dataset.column_names().len(),
        args.data.display()
    );

    let sandbox = AsyncSandbox::new(config);
    let result = sandbox.execute(source.clone(), Arc::new(dataset)).await;

    let report = ExecutionReport::new(args.query.as_deref(), &source, &result);
    println!("{}", report.to_json()?);

    Ok(())
}
