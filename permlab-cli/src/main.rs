//! PermLab CLI — permutation matrix generation and empirical p-values.
//!
//! Commands:
//! - `perms`: generate a permutation set (optionally blocked, optionally
//!   sign-flipped) and write it as a signed-index CSV matrix or JSON
//! - `pvalue`: compute the empirical p-value and null summary for a true
//!   score against a file of permutation scores

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use permlab_core::{generate_seeded, NullSummary, RandomizationMode};
use permlab_runner::{
    export_permutations_csv, export_permutations_json, load_blocks_csv, load_scores_csv,
    write_artifact, PermutationTestConfig,
};

#[derive(Parser)]
#[command(
    name = "permlab",
    version,
    about = "PermLab CLI — permutation sets and empirical p-values for permutation tests"
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace). RUST_LOG overrides.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a permutation set.
    Perms(PermsArgs),
    /// Compute the empirical p-value of a true score against permutation scores.
    Pvalue {
        /// Score obtained on the true labels.
        #[arg(long, allow_negative_numbers = true)]
        true_score: f64,

        /// Headerless CSV with one permutation score per line.
        #[arg(long)]
        scores: PathBuf,
    },
}

#[derive(clap::Args)]
struct PermsArgs {
    /// Number of samples (rows). Mutually exclusive with --blocks.
    #[arg(long, conflicts_with = "blocks", required_unless_present = "blocks")]
    samples: Option<usize>,

    /// Headerless CSV whose first column is the block id of each row.
    #[arg(long)]
    blocks: Option<PathBuf>,

    /// Number of permutations. Defaults to the config value (100).
    #[arg(long)]
    count: Option<usize>,

    /// Generator seed. Defaults to the config value (0).
    #[arg(long)]
    seed: Option<u64>,

    /// Permute rows and flip signs.
    #[arg(long, conflicts_with = "sign_flip_only")]
    sign_flip: bool,

    /// Flip signs only; rows stay in place.
    #[arg(long)]
    sign_flip_only: bool,

    /// Allow rows to map to themselves inside a block.
    #[arg(long)]
    allow_repeat_rows: bool,

    /// Allow the same permutation to appear more than once.
    #[arg(long)]
    allow_repeat_perms: bool,

    /// Consecutive rejected draws before giving up.
    #[arg(long)]
    max_rejections: Option<usize>,

    /// Output format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Csv)]
    format: OutputFormat,

    /// Output file. Defaults to stdout.
    #[arg(long)]
    output: Option<PathBuf>,

    /// TOML config; command-line flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Csv,
    Json,
}

/// JSON report printed by `pvalue`.
#[derive(Serialize)]
struct PvalueReport {
    generated_at: String,
    scores_file: String,
    metrics: BTreeMap<String, f64>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Perms(args) => run_perms(args),
        Commands::Pvalue { true_score, scores } => run_pvalue(true_score, &scores),
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .init();
}

// ─── perms ──────────────────────────────────────────────────────────

fn run_perms(args: PermsArgs) -> Result<()> {
    let config = resolve_config(&args)?;

    let (n_samples, blocks) = match (&args.blocks, args.samples) {
        (Some(path), _) => {
            let blocks = load_blocks_csv(path)?;
            (blocks.len(), Some(blocks))
        }
        (None, Some(n)) => (n, None),
        (None, None) => bail!("either --samples or --blocks is required"),
    };

    let set = generate_seeded(
        n_samples,
        blocks.as_deref(),
        &config.generator_config(),
        config.seed,
    )
    .context("permutation generation failed")?;

    tracing::info!(
        n_samples,
        n_permutations = set.len(),
        seed = config.seed,
        fingerprint = %set.fingerprint(),
        "generated permutation set"
    );

    let rendered = match args.format {
        OutputFormat::Csv => export_permutations_csv(&set)?,
        OutputFormat::Json => export_permutations_json(&set)?,
    };
    emit(&rendered, args.output.as_deref())
}

fn resolve_config(args: &PermsArgs) -> Result<PermutationTestConfig> {
    let mut config = match &args.config {
        Some(path) => PermutationTestConfig::from_file(path)?,
        None => PermutationTestConfig::default(),
    };

    if let Some(count) = args.count {
        config.n_permutations = count;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if args.sign_flip {
        config.mode = RandomizationMode::ExchangeableAndSignFlip;
    }
    if args.sign_flip_only {
        config.mode = RandomizationMode::SignFlipOnly;
    }
    config.allow_repeat_rows |= args.allow_repeat_rows;
    config.allow_repeat_perms |= args.allow_repeat_perms;
    if let Some(max) = args.max_rejections {
        config.max_consecutive_rejections = max;
    }

    config.validate()?;
    Ok(config)
}

// ─── pvalue ─────────────────────────────────────────────────────────

fn run_pvalue(true_score: f64, scores_path: &Path) -> Result<()> {
    if !true_score.is_finite() {
        bail!("--true-score must be finite, got {true_score}");
    }
    let scores = load_scores_csv(scores_path)?;
    let summary = NullSummary::compute(true_score, &scores);

    tracing::info!(
        pvalue = summary.pvalue,
        n_permutations = summary.n_permutations,
        "computed empirical p-value"
    );

    let report = PvalueReport {
        generated_at: chrono::Utc::now().to_rfc3339(),
        scores_file: scores_path.display().to_string(),
        metrics: summary.to_metrics(),
    };
    let json = serde_json::to_string_pretty(&report).context("failed to serialize report")?;
    emit(&json, None)
}

fn emit(content: &str, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            write_artifact(path, content)?;
            eprintln!("Wrote {}", path.display());
        }
        None => {
            print!("{content}");
            if !content.ends_with('\n') {
                println!();
            }
        }
    }
    Ok(())
}
