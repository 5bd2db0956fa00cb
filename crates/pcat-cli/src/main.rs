use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use pcat_core::MatchStrength;
use pcat_sync::{CatalogPipeline, PipelineConfig, RunOptions, RunSummary};
use tracing::error;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "pcat")]
#[command(about = "Rebuild the product catalog from curated, scraped and legacy sources")]
struct Cli {
    /// Workspace root holding pipeline.yaml, data/, rules/ and public/.
    #[arg(long, global = true)]
    workspace_root: Option<PathBuf>,

    /// Catalog output path, overriding pipeline.yaml.
    #[arg(long, global = true)]
    output: Option<PathBuf>,

    #[command(flatten)]
    stages: StageArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the full pipeline and write the catalog (the default).
    Build,
    /// Run the full pipeline and report violations without writing.
    Audit,
    /// Download remote images for products that resolve to a placeholder.
    FetchImages,
}

#[derive(Debug, Args, Default)]
struct StageArgs {
    #[arg(long, global = true)]
    skip_images: bool,
    #[arg(long, global = true)]
    skip_documents: bool,
    #[arg(long, global = true)]
    skip_classification: bool,
    /// Compute and report without writing the catalog.
    #[arg(long, global = true)]
    dry_run: bool,
}

impl StageArgs {
    fn options(&self, force_dry_run: bool) -> RunOptions {
        RunOptions {
            images: !self.skip_images,
            documents: !self.skip_documents,
            classification: !self.skip_classification,
            dry_run: self.dry_run || force_dry_run,
        }
    }
}

fn init_tracing() {
    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .try_init();
}

fn config_for(cli: &Cli) -> PipelineConfig {
    let mut config = PipelineConfig::from_env();
    if let Some(root) = &cli.workspace_root {
        config.workspace_root = root.clone();
    }
    if let Some(output) = &cli.output {
        config.output = Some(output.clone());
    }
    config
}

fn print_summary(summary: &RunSummary) {
    let count = |strength| summary.metadata.match_counts.get(&strength).copied().unwrap_or(0);
    let written = match summary.write_outcome {
        Some(outcome) => format!("{outcome:?}").to_lowercase(),
        None => "dry-run".to_string(),
    };
    println!(
        "catalog {}: products={} rejected={} exact={} normalized={} fuzzy={} orphans={} hard={} soft={} output={}",
        written,
        summary.products_written,
        summary.products_rejected,
        count(MatchStrength::Exact),
        count(MatchStrength::Normalized),
        count(MatchStrength::Fuzzy),
        summary.orphans.len(),
        summary.report.hard_count(),
        summary.report.soft_count(),
        summary.output_path.display()
    );
    for source in &summary.degraded_sources {
        println!("degraded: {source}");
    }
}

async fn run(cli: Cli) -> Result<u8> {
    let pipeline = CatalogPipeline::new(config_for(&cli));
    match cli.command.unwrap_or(Commands::Build) {
        Commands::Build => {
            let summary = pipeline.run(cli.stages.options(false)).await?;
            print_summary(&summary);
            Ok(summary.exit_code() as u8)
        }
        Commands::Audit => {
            let summary = pipeline.run(cli.stages.options(true)).await?;
            for violation in &summary.report.violations {
                println!(
                    "{:?} {} {}: {}",
                    violation.severity, violation.rule, violation.product_id, violation.message
                );
            }
            print_summary(&summary);
            Ok(summary.exit_code() as u8)
        }
        Commands::FetchImages => {
            let report = pipeline.fetch_images().await?;
            println!(
                "images: downloaded={} skipped={} failed={}",
                report.downloaded.len(),
                report.skipped_existing.len(),
                report.failed.len()
            );
            for (product_id, reason) in &report.failed {
                println!("failed: {product_id}: {reason}");
            }
            Ok(0)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            error!(error = %format!("{err:#}"), "pipeline failed");
            ExitCode::from(1)
        }
    }
}
