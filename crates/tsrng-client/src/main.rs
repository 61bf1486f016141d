use std::num::NonZeroU32;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use tracing::{info, warn};

use tsrng_client::config::{check_service, ServiceConfig};
use tsrng_client::service::{
    AnalysisSummary, HeavyBattery, HttpRoundService, RoundId, RoundServiceClient,
};
use tsrng_client::{classify, OutputLength, RoundConfig, RoundOrchestrator, RunResult};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Drive TSRNG rounds and submit sequences for analysis",
    long_about = None
)]
struct Cli {
    /// Service base URL (overrides TSRNG_API_URL)
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Per-request timeout in seconds (overrides TSRNG_TIMEOUT_SECS)
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true, default_value_t = false)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a full round and draw unique numbers
    Generate(GenerateArgs),
    /// Classify a pasted sequence (or upload a file) and analyze it
    Analyze(AnalyzeArgs),
    /// Show the server-side stage of a round
    Status { round_id: String },
}

#[derive(Args, Debug)]
struct GenerateArgs {
    #[arg(long, default_value_t = 1, allow_hyphen_values = true)]
    start: i64,

    #[arg(long, default_value_t = 42, allow_hyphen_values = true)]
    end: i64,

    /// How many unique numbers to draw
    #[arg(long, default_value_t = 6)]
    count: u32,

    /// Output bits to finalize (ignored when the artifact is fetched)
    #[arg(long, conflicts_with = "canonical")]
    bits: Option<NonZeroU32>,

    /// Finalize at the canonical maximum length
    #[arg(long, default_value_t = false)]
    canonical: bool,

    /// Skip downloading the canonical-length artifact
    #[arg(long, default_value_t = false)]
    no_artifact: bool,

    /// Write the artifact to this path
    #[arg(long)]
    save_artifact: Option<PathBuf>,

    /// Do not ask the service to persist raw source payloads
    #[arg(long, default_value_t = false)]
    no_persist_raw: bool,

    #[arg(long, value_enum, default_value_t = HeavyBattery::Dieharder)]
    battery: HeavyBattery,

    /// Extra arguments forwarded to the heavy battery
    #[arg(long = "battery-arg", allow_hyphen_values = true)]
    battery_args: Vec<String>,

    #[arg(long, default_value = "tsrng-client")]
    label: String,

    #[arg(long, default_value = "default")]
    domain: String,

    #[arg(long)]
    context: Option<String>,
}

#[derive(Args, Debug)]
struct AnalyzeArgs {
    /// Sequence as bits, decimal bytes, hex, or base64
    #[arg(required_unless_present = "file", conflicts_with = "file")]
    text: Option<String>,

    /// Upload a file instead of pasting text
    #[arg(long)]
    file: Option<PathBuf>,

    /// Cap on the number of bits analyzed
    #[arg(long)]
    limit_bits: Option<u32>,
}

impl GenerateArgs {
    fn round_config(&self) -> RoundConfig {
        let output_length = match (self.canonical, self.bits) {
            (true, _) => OutputLength::Canonical,
            (false, Some(bits)) => OutputLength::Bits(bits),
            (false, None) => RoundConfig::default().output_length,
        };
        RoundConfig {
            round_label: self.label.clone(),
            range_start: self.start,
            range_end: self.end,
            range_count: self.count,
            range_domain: self.domain.clone(),
            range_context: self.context.clone(),
            output_length,
            full_artifact: !self.no_artifact,
            persist_raw: !self.no_persist_raw,
            heavy_battery: self.battery,
            heavy_args: (!self.battery_args.is_empty()).then(|| self.battery_args.clone()),
            ..RoundConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = ServiceConfig::default().with_overrides(cli.api_url.clone(), cli.timeout_secs);
    info!(api = %config.base_url, timeout_secs = config.timeout.as_secs(), "tsrng starting");

    if !check_service(&config).await {
        warn!(api = %config.base_url, "Service did not answer the health check; continuing anyway");
    }

    let service = Arc::new(HttpRoundService::new(config)?);

    match cli.command {
        Command::Generate(args) => generate(service, &args, cli.json).await,
        Command::Analyze(args) => analyze(service.as_ref(), &args, cli.json).await,
        Command::Status { round_id } => {
            let status = service
                .round_status(&RoundId::new(round_id))
                .await
                .context("Failed to fetch round status")?;
            if cli.json {
                let view = json!({
                    "round_id": status.round_id.as_str(),
                    "stage": status.stage,
                    "info": status.info,
                });
                println!("{view}");
            } else {
                println!("{}: {}", status.round_id, status.stage);
            }
            Ok(())
        }
    }
}

async fn generate(
    service: Arc<HttpRoundService>,
    args: &GenerateArgs,
    as_json: bool,
) -> Result<()> {
    let orchestrator = RoundOrchestrator::new(service);

    let mut stages = orchestrator.subscribe();
    let progress = tokio::spawn(async move {
        while stages.changed().await.is_ok() {
            let stage = stages.borrow_and_update().stage();
            info!(%stage, "Round progress");
        }
    });

    let result = orchestrator
        .run(args.round_config())
        .await
        .context("Round generation failed")?;

    if let Some(path) = &args.save_artifact {
        match result.artifact.as_ref().and_then(|h| h.bytes()) {
            Some(data) => {
                tokio::fs::write(path, &data)
                    .await
                    .with_context(|| format!("Failed to write artifact to {}", path.display()))?;
                info!(path = %path.display(), bytes = data.len(), "Artifact saved");
            }
            None => warn!("No artifact available to save"),
        }
    }

    print_result(&result, as_json);
    orchestrator.dispose();
    drop(orchestrator);
    progress.await.ok();
    Ok(())
}

async fn analyze(service: &HttpRoundService, args: &AnalyzeArgs, as_json: bool) -> Result<()> {
    let summary = match (&args.text, &args.file) {
        (_, Some(path)) => {
            let data = tokio::fs::read(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "upload.bin".to_string());
            service
                .analyze_upload(&filename, data.into(), args.limit_bits)
                .await
                .context("Upload analysis failed")?
        }
        (Some(text), None) => {
            let payload = classify(text)?.with_limit_bits(args.limit_bits);
            info!(kind = payload.data.kind(), "Submitting sequence");
            service
                .analyze_sequence(&payload)
                .await
                .context("Sequence analysis failed")?
        }
        (None, None) => anyhow::bail!("Provide a sequence or --file"),
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }
    Ok(())
}

fn print_result(result: &RunResult, as_json: bool) {
    if as_json {
        let view = json!({
            "round_id": result.round_id.as_str(),
            "seed_hex": result.seed_hex,
            "numbers": result.numbers,
            "range_info": result.range_info,
            "analysis": result.analysis,
            "artifact_bytes": result.artifact.as_ref().map(|a| a.len()),
            "heavy": result.heavy.as_ref().map(|h| json!({
                "status": h.status,
                "result_path": h.result_path,
                "result": h.result,
            })),
            "warnings": result.soft_failures.iter().map(ToString::to_string).collect::<Vec<_>>(),
            "stages": result.stages(),
        });
        println!("{view:#}");
        return;
    }

    println!("Round:   {}", result.round_id);
    println!("Seed:    {}", result.seed_hex);
    let numbers: Vec<String> = result.numbers.iter().map(ToString::to_string).collect();
    println!("Numbers: {}", numbers.join(", "));
    if let Some(artifact) = &result.artifact {
        println!("Output:  {} bytes", artifact.len());
    }
    if let Some(summary) = &result.analysis {
        print_summary(summary);
    }
    if let Some(heavy) = &result.heavy {
        println!("Heavy:   {:?}", heavy.status);
    }
    for warning in &result.soft_failures {
        println!("Warning: {warning}");
    }
}

fn print_summary(summary: &AnalysisSummary) {
    println!(
        "Bits: {}  ones: {}  zeros: {}  p(1): {:.4}  all passed: {}",
        summary.bit_length, summary.ones, summary.zeros, summary.proportion_ones, summary.all_passed
    );
    for test in &summary.tests {
        let p = test
            .p_value
            .map(|p| format!("{p:.4}"))
            .unwrap_or_else(|| "-".into());
        println!("  {:<24} {:<5} p={p}", test.name, if test.passed { "ok" } else { "FAIL" });
    }
}
