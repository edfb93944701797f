//! CLI binary for twostage-ocr.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig`, reads the input document and prints the JSON report.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use twostage_ocr::{
    CancelFlag, DocumentAiConfig, ItemError, MappingMode, OcrTier, PdfiumRasterizer, Pipeline,
    PipelineConfig, PipelineInput, PipelineOutcome, PipelineProgressCallback, ProgressCallback,
    Stage,
};

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner that names the running stage and logs one line per finished
/// stage and per failed item.
struct CliProgressCallback {
    bar: ProgressBar,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  ⏱ {elapsed}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Preparing");
        bar.set_message("Decoding input…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            errors: AtomicUsize::new(0),
        })
    }
}

fn stage_label(stage: Stage) -> &'static str {
    match stage {
        Stage::Rasterize => "Rasterizing pages",
        Stage::Extract => "Detecting entities",
        Stage::Crop => "Cropping regions",
        Stage::Compile => "Compiling PDF",
        Stage::Enhance => "Premium OCR",
        Stage::Map => "Mapping text",
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_stage_start(&self, stage: Stage) {
        self.bar.set_prefix(stage.to_string());
        self.bar.set_message(format!("{}…", stage_label(stage)));
    }

    fn on_stage_complete(&self, stage: Stage, items: usize, elapsed_ms: u64) {
        self.bar.println(format!(
            "  {} {:<10} {:<12} {}",
            green("✓"),
            stage.to_string(),
            dim(&format!("{items:>4} items")),
            dim(&format!("{:.1}s", elapsed_ms as f64 / 1000.0)),
        ));
    }

    fn on_entity_cropped(&self, _original_index: usize, done: usize, total: usize) {
        self.bar.set_message(format!("Cropping {done}/{total}…"));
    }

    fn on_item_error(&self, stage: Stage, error: &ItemError) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        let msg = error.to_string();
        // Truncate very long error messages to keep output tidy.
        let msg = match msg.char_indices().nth(79) {
            Some((cut, _)) => format!("{}\u{2026}", &msg[..cut]),
            None => msg,
        };
        self.bar
            .println(format!("  {} {:<10} {}", red("✗"), stage.to_string(), red(&msg)));
    }

    fn on_pipeline_complete(&self, outcome: PipelineOutcome) {
        self.bar.finish_and_clear();
        let errors = self.errors.load(Ordering::SeqCst);
        let (mark, label) = match outcome {
            PipelineOutcome::Full => (green("✔"), "both stages completed"),
            PipelineOutcome::Stage1Only => (cyan("⚠"), "stage 1 only"),
            PipelineOutcome::Partial => (cyan("⚠"), "no entities detected"),
        };
        if errors == 0 {
            eprintln!("{} {}", mark, bold(label));
        } else {
            eprintln!("{} {}  ({} item errors)", mark, bold(label), red(&errors.to_string()));
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Run both stages, report to stdout
  twostage-ocr paper.pdf

  # Write the report to a file
  twostage-ocr paper.pdf -o paper.report.json

  # Request payload instead of a PDF ({"pdfBase64": "...", "filename": "..."})
  twostage-ocr --json-input request.json -o report.json

  # One record per compiled page, no slot splitting
  twostage-ocr --mapping page-order paper.pdf

  # Stage 1 only (no premium OCR spend)
  twostage-ocr --no-stage2 paper.pdf

ENVIRONMENT VARIABLES:
  DOCUMENTAI_ACCESS_TOKEN          OAuth2 bearer token for Document AI
  DOCUMENTAI_PROJECT_ID            Google Cloud project
  DOCUMENTAI_LOCATION              Processor location (e.g. us, eu)
  DOCUMENTAI_BASIC_PROCESSOR_ID    Processor used for the basic tier
  DOCUMENTAI_PREMIUM_PROCESSOR_ID  Processor used for the premium tier
  DOCUMENTAI_ENDPOINT              Override the API base URL
  PDFIUM_LIB_PATH                  Path to libpdfium
  RUST_LOG                         Log filter (overrides -v / -q)
"#;

/// Two-stage OCR for scanned exam papers.
#[derive(Parser, Debug)]
#[command(
    name = "twostage-ocr",
    version,
    about = "Two-stage OCR for scanned exam papers",
    long_about = "Detect question and answer regions with basic OCR, pack them four to a page \
into a compact PDF, run premium (math-aware) OCR over that PDF only, and map the enhanced text \
back to every question and answer.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// PDF file, or a JSON request file with --json-input.
    input: PathBuf,

    /// Treat INPUT as a JSON request `{pdfBase64, filename}`.
    #[arg(long)]
    json_input: bool,

    /// Write the JSON report to this file instead of stdout.
    #[arg(short, long, env = "TWOSTAGE_OUTPUT")]
    output: Option<PathBuf>,

    /// How enhanced text is attributed to entities.
    #[arg(long, env = "TWOSTAGE_MAPPING", value_enum, default_value = "slot-layout")]
    mapping: MappingArg,

    /// Tier requested for entity detection.
    #[arg(long, env = "TWOSTAGE_EXTRACTION_TIER", value_enum, default_value = "basic")]
    extraction_tier: TierArg,

    /// Per-call OCR timeout in seconds (1–600).
    #[arg(long, env = "TWOSTAGE_TIMEOUT", default_value_t = 45,
          value_parser = clap::value_parser!(u64).range(1..=600))]
    timeout: u64,

    /// Longest edge of a rendered page, in pixels.
    #[arg(long, env = "TWOSTAGE_MAX_PIXELS", default_value_t = 2000)]
    max_pixels: u32,

    /// Crop worker count (default: number of CPUs).
    #[arg(short, long, env = "TWOSTAGE_CONCURRENCY")]
    concurrency: Option<usize>,

    /// Padding around each page's question/answer region, in pixels.
    #[arg(long, env = "TWOSTAGE_REGION_PADDING", default_value_t = 20)]
    region_padding: u32,

    /// Don't segment paragraphs when the service detects no entities.
    #[arg(long, env = "TWOSTAGE_NO_HEURISTICS")]
    no_heuristics: bool,

    /// Skip the premium pass; report stage 1 only.
    #[arg(long, env = "TWOSTAGE_NO_STAGE2")]
    no_stage2: bool,

    /// Path to libpdfium.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,

    /// Disable progress spinner.
    #[arg(long, env = "TWOSTAGE_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "TWOSTAGE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "TWOSTAGE_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum MappingArg {
    SlotLayout,
    PageOrder,
}

impl From<MappingArg> for MappingMode {
    fn from(v: MappingArg) -> Self {
        match v {
            MappingArg::SlotLayout => MappingMode::SlotLayout,
            MappingArg::PageOrder => MappingMode::PageOrder,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum TierArg {
    Basic,
    Premium,
}

impl From<TierArg> for OcrTier {
    fn from(v: TierArg) -> Self {
        match v {
            TierArg::Basic => OcrTier::Basic,
            TierArg::Premium => OcrTier::Premium,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the spinner is active; it
    // already reports every stage.
    let show_progress = !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Input ────────────────────────────────────────────────────────────
    let input = read_input(&cli).await?;

    // ── Build pipeline ───────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn PipelineProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    let ocr_config = DocumentAiConfig::from_env().context("Document AI is not configured")?;
    let mut rasterizer = PdfiumRasterizer::new(config.max_rendered_pixels);
    if let Some(ref lib) = cli.pdfium_lib {
        rasterizer = rasterizer.with_library_path(lib);
    }
    let ocr = twostage_ocr::DocumentAiClient::new(ocr_config, config.ocr_timeout())
        .context("Failed to build Document AI client")?;
    let pipeline = Pipeline::new(config, Arc::new(ocr), Arc::new(rasterizer));

    // Ctrl-C cancels at the next stage boundary and keeps finished work.
    let cancel = CancelFlag::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    // ── Run ──────────────────────────────────────────────────────────────
    if let Some(ref output_path) = cli.output {
        let stats = pipeline
            .run_to_file(&input, output_path, &cancel)
            .await
            .context("Pipeline failed")?;

        if !cli.quiet {
            eprintln!(
                "{}  {} entities  {} enhanced  {}ms  →  {}",
                if stats.failed_items == 0 {
                    green("✔")
                } else {
                    cyan("⚠")
                },
                stats.entities,
                stats.enhanced_entities,
                stats.total_ms,
                bold(&output_path.display().to_string()),
            );
        }
    } else {
        let report = pipeline
            .run(&input, &cancel)
            .await
            .context("Pipeline failed")?;

        let json = serde_json::to_string_pretty(&report).context("Failed to serialise report")?;
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(json.as_bytes())
            .and_then(|_| handle.write_all(b"\n"))
            .context("Failed to write to stdout")?;

        if !cli.quiet && !show_progress {
            eprintln!(
                "{:?}: {} entities, {} enhanced in {}ms",
                report.outcome,
                report.stats.entities,
                report.stats.enhanced_entities,
                report.stats.total_ms
            );
            if report.stats.failed_items > 0 {
                eprintln!("  {} item errors", report.stats.failed_items);
            }
        }
    }

    Ok(())
}

/// Read the PDF or JSON request named by `cli.input`.
async fn read_input(cli: &Cli) -> Result<PipelineInput> {
    let bytes = tokio::fs::read(&cli.input)
        .await
        .with_context(|| format!("Failed to read {:?}", cli.input))?;

    if cli.json_input {
        return serde_json::from_slice(&bytes)
            .with_context(|| format!("{:?} is not a {{pdfBase64, filename}} request", cli.input));
    }

    let filename = cli
        .input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "input.pdf".to_string());
    Ok(PipelineInput::from_bytes(&bytes, filename))
}

/// Map CLI args to `PipelineConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .ocr_timeout_secs(cli.timeout)
        .max_rendered_pixels(cli.max_pixels)
        .extraction_tier(cli.extraction_tier.into())
        .mapping_mode(cli.mapping.into())
        .master_region_padding(cli.region_padding)
        .heuristic_segmentation(!cli.no_heuristics)
        .enable_stage2(!cli.no_stage2);

    if let Some(n) = cli.concurrency {
        builder = builder.crop_concurrency(n);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
