// src/main.rs
//
// Experiment harness CLI for Highway Guard.
//
// Constraints:
// - Config precedence: --config file, else preset; HIGHWAY_GUARD_* env
//   overrides on top; --mode switches layers last.
// - Deterministic runs via --seed (episode i uses seed + i).
// - Print concise run header (preset, mode, cfg version/hash).
// - Write the JSON summary and, optionally, the override log as JSONL.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use highway_guard::config::{ExperimentMode, GuardConfig, Preset};
use highway_guard::rl::{run_safe_pipeline, OverrideLog};

#[derive(Copy, Clone, Debug, ValueEnum)]
enum PresetArg {
    Highway,
    Roundabout,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ModeArg {
    Baseline,
    Noise,
    NoiseIntent,
    Safe,
    SafeSkill,
}

#[derive(Debug, Parser)]
#[command(
    name = "highway_guard",
    about = "Confidence-gated safety arbitration for driving policies (experiment harness)",
    version
)]
struct Args {
    /// Scenario preset. Ignored when --config is given.
    #[arg(long, value_enum, default_value_t = PresetArg::Highway)]
    preset: PresetArg,

    /// YAML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Experiment mode. Defaults to `safe` unless --config is given, in
    /// which case the file's layer switches are used as-is.
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,

    /// Number of evaluation episodes.
    #[arg(long, default_value_t = 10)]
    episodes: u64,

    /// Base seed.
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Summary JSON output path.
    #[arg(long, default_value = "runs/highway_guard/summary.json")]
    out: PathBuf,

    /// Optional override log output (JSONL).
    #[arg(long)]
    override_log: Option<PathBuf>,

    /// Verbosity: -v, -vv
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "highway_guard=info",
        1 => "highway_guard=debug",
        _ => "highway_guard=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn effective_mode(args: &Args) -> Option<ExperimentMode> {
    let mode = match (args.mode, &args.config) {
        (Some(m), _) => m,
        (None, None) => ModeArg::Safe,
        (None, Some(_)) => return None,
    };
    Some(match mode {
        ModeArg::Baseline => ExperimentMode::Baseline,
        ModeArg::Noise => ExperimentMode::Noise,
        ModeArg::NoiseIntent => ExperimentMode::NoiseIntent,
        ModeArg::Safe => ExperimentMode::Safe,
        ModeArg::SafeSkill => ExperimentMode::SafeSkill,
    })
}

fn resolve_config(args: &Args) -> Result<GuardConfig> {
    let mut cfg = match &args.config {
        Some(path) => GuardConfig::from_yaml_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => GuardConfig::for_preset(match args.preset {
            PresetArg::Highway => Preset::Highway,
            PresetArg::Roundabout => Preset::Roundabout,
        }),
    };
    cfg.apply_env_overrides();

    if let Some(mode) = effective_mode(args) {
        cfg = cfg.with_mode(mode);
    }

    cfg.validate().context("invalid configuration")?;
    Ok(cfg)
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let cfg = resolve_config(&args)?;

    println!(
        "highway_guard | cfg={} | cfg_hash=0x{:016x} | preset={} | mode={} | episodes={} | seed={}",
        cfg.version,
        cfg.fingerprint(),
        cfg.preset.as_str(),
        effective_mode(&args).map_or("config", |m| m.as_str()),
        args.episodes,
        args.seed
    );

    let summary = run_safe_pipeline(&cfg, args.seed, args.episodes).context("pipeline run failed")?;

    info!(
        mean_reward = summary.eval.mean_reward,
        std_reward = summary.eval.std_reward,
        crash_rate = summary.eval.crash_rate,
        overrides = summary.eval.total_overrides,
        "evaluation finished"
    );

    if let Some(parent) = args.out.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating output directory {}", parent.display()))?;
    }
    let payload = serde_json::to_string_pretty(&summary).context("serializing summary")?;
    fs::write(&args.out, payload).with_context(|| format!("writing {}", args.out.display()))?;
    println!("highway_guard: wrote {}", args.out.display());

    if let Some(path) = &args.override_log {
        let log = OverrideLog::from_entries(summary.overrides.clone())
            .context("rebuilding override log")?;
        log.write_jsonl(path)
            .with_context(|| format!("writing override log {}", path.display()))?;
        println!(
            "highway_guard: wrote {} overrides to {}",
            log.len(),
            path.display()
        );
    }

    Ok(())
}
