//! faithful: score RAG answers for faithfulness to their contexts.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use faithful_core::{Sample, Score};
use faithful_runtime::prompts::{find_template, ALL_TEMPLATES};
use faithful_runtime::{
    FaithfulnessConfig, FaithfulnessPipeline, FaithfulnessReport, PromptTemplate,
    ProviderRegistry,
};

#[derive(Parser)]
#[command(name = "faithful")]
#[command(about = "Faithfulness scoring for retrieval-augmented answers")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score samples from a JSONL file
    Score {
        /// One `{"question", "answer", "contexts"}` object per line
        #[arg(short, long)]
        input: PathBuf,

        /// YAML configuration (defaults apply when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the configured batch size
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Write results here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write full per-sample outcomes (statements, verdicts, provenance)
        #[arg(long)]
        detailed: bool,
    },

    /// Print the prompt templates
    Prompts {
        /// Only print this template
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Load and validate a configuration file
    CheckConfig {
        #[arg(short, long)]
        config: PathBuf,
    },
}

/// One line of `score` output.
#[derive(Serialize)]
struct ScoreLine {
    index: usize,
    score: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    undefined: Option<&'static str>,
}

impl ScoreLine {
    fn new(index: usize, score: Score) -> Self {
        Self {
            index,
            score: score.value(),
            undefined: score.undefined_reason().map(|r| r.as_str()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Score {
            input,
            config,
            batch_size,
            output,
            detailed,
        } => run_score(&input, config.as_deref(), batch_size, output.as_deref(), detailed).await,
        Commands::Prompts { name } => print_prompts(name.as_deref()),
        Commands::CheckConfig { config } => check_config(&config),
    }
}

fn load_config(path: Option<&Path>) -> Result<FaithfulnessConfig> {
    match path {
        Some(path) => FaithfulnessConfig::from_yaml_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(FaithfulnessConfig::default()),
    }
}

fn load_samples(path: &Path) -> Result<Vec<Sample>> {
    let file =
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;

    let mut samples = Vec::new();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let sample: Sample = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: invalid sample", path.display(), i + 1))?;
        samples.push(sample);
    }

    Ok(samples)
}

async fn run_score(
    input: &Path,
    config_path: Option<&Path>,
    batch_size: Option<usize>,
    output: Option<&Path>,
    detailed: bool,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(batch_size) = batch_size {
        config.batch_size = batch_size;
    }

    let samples = load_samples(input)?;
    tracing::info!(samples = samples.len(), input = %input.display(), "Loaded samples");

    let pipeline = FaithfulnessPipeline::from_config(config, &ProviderRegistry::with_defaults())
        .context("Failed to build scoring pipeline")?;

    let report = pipeline.evaluate(&samples).await;

    let writer: Box<dyn Write> = match output {
        Some(path) => Box::new(
            File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?,
        ),
        None => Box::new(io::stdout().lock()),
    };
    write_report(BufWriter::new(writer), &report, detailed)?;

    let usage = &report.usage;
    tracing::info!(
        scored = report.summary.defined,
        no_statements = report.summary.no_statements,
        client_failures = report.summary.client_failures,
        mean = ?report.summary.mean,
        llm_calls = usage.llm_calls,
        failed_calls = usage.failed_calls,
        repair_calls = usage.repair_calls,
        total_tokens = usage.total_tokens,
        estimated_cost = usage.estimated_cost,
        "Scoring complete"
    );

    Ok(())
}

fn write_report<W: Write>(mut out: W, report: &FaithfulnessReport, detailed: bool) -> Result<()> {
    for outcome in &report.outcomes {
        let line = if detailed {
            serde_json::to_string(outcome)?
        } else {
            serde_json::to_string(&ScoreLine::new(outcome.index, outcome.score))?
        };
        writeln!(out, "{line}").context("Failed to write results")?;
    }
    out.flush().context("Failed to write results")?;
    Ok(())
}

fn print_template(template: &PromptTemplate) {
    println!("=== {} (v{}) ===", template.name, template.version);
    println!("slots: {}", template.slots.join(", "));
    println!();
    println!("{}", template.text);
}

fn print_prompts(name: Option<&str>) -> Result<()> {
    match name {
        Some(name) => {
            let Some(template) = find_template(name) else {
                let known: Vec<&str> = ALL_TEMPLATES.iter().map(|t| t.name).collect();
                bail!("Unknown template '{name}'. Available: {}", known.join(", "));
            };
            print_template(template);
        }
        None => ALL_TEMPLATES.iter().copied().for_each(print_template),
    }
    Ok(())
}

fn check_config(path: &Path) -> Result<()> {
    let config = load_config(Some(path))?;

    let registry = ProviderRegistry::with_defaults();
    registry
        .validate(&config.provider.kind, &config.provider.options_json())
        .with_context(|| format!("Invalid provider settings in {}", path.display()))?;

    println!("{} is valid", path.display());
    print!("{}", config.to_yaml()?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use faithful_core::UndefinedReason;

    #[test]
    fn test_score_line_format() {
        let defined = serde_json::to_string(&ScoreLine::new(0, Score::Defined(0.5))).unwrap();
        assert_eq!(defined, r#"{"index":0,"score":0.5}"#);

        let failed = ScoreLine::new(3, Score::Undefined(UndefinedReason::ClientFailure));
        assert_eq!(
            serde_json::to_string(&failed).unwrap(),
            r#"{"index":3,"score":null,"undefined":"client_failure"}"#
        );
    }

    #[test]
    fn test_unknown_template() {
        assert!(print_prompts(Some("nope")).is_err());
    }
}
