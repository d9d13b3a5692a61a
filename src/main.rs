use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};

use baseline_engine::baseline::parse_timestamp;
use baseline_engine::clock::SystemClock;
use baseline_engine::config::BaselineConfig;
use baseline_engine::demo::{generate_train_and_score, DemoConfig};
use baseline_engine::explain::{explain_event, find_event};
use baseline_engine::ingest::load_events;
use baseline_engine::report::{
    anomalies_by_entity, anomalies_by_hour, render_markdown, score_events_with_store,
    top_anomalies, ReportContext,
};
use baseline_engine::storage::{BaselineStore, SqliteStore};

#[derive(Parser)]
#[command(
    name = "baseline",
    about = "Baseline-first behavior modeling and deviation scoring",
    version,
    long_about = None
)]
struct Cli {
    /// TOML config file (falls back to $BASELINE_CONFIG, then defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Overrides applied on top of the resolved config file.
#[derive(Args, Debug, Default)]
struct Tuning {
    /// Minimum events per key required to train a baseline
    #[arg(long)]
    min_samples: Option<usize>,

    /// Anomaly cutoff in MAD units
    #[arg(long)]
    mad_threshold: Option<f64>,

    /// Floor applied to the MAD of every baseline
    #[arg(long)]
    min_mad: Option<f64>,

    /// Disable hour-of-day bucketing
    #[arg(long)]
    no_hour_of_day: bool,
}

#[derive(Args, Debug)]
struct DbArg {
    /// SQLite baseline database
    #[arg(long, env = "BASELINE_DB", default_value = "baselines.db")]
    db: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Train baselines from historical events and store them
    Train {
        /// Input events (.csv or .jsonl)
        #[arg(long)]
        input: PathBuf,

        #[command(flatten)]
        db: DbArg,

        #[command(flatten)]
        tuning: Tuning,
    },

    /// Score events against stored baselines (one JSON result per line)
    Score {
        /// Input events (.csv or .jsonl)
        #[arg(long)]
        input: PathBuf,

        #[command(flatten)]
        db: DbArg,

        /// Only print anomalous results
        #[arg(long)]
        only_anomalies: bool,

        #[command(flatten)]
        tuning: Tuning,
    },

    /// List stored baseline keys
    Keys {
        #[command(flatten)]
        db: DbArg,
    },

    /// List stored keys with their version counts
    List {
        #[command(flatten)]
        db: DbArg,
    },

    /// Show the latest baseline for a key as JSON
    Show {
        #[command(flatten)]
        db: DbArg,

        /// Canonical key, e.g. `/login:latency_p95_ms:hour=13`
        #[arg(long)]
        key: String,
    },

    /// Explain how a single event scores against its baseline
    Explain {
        /// Input events (.csv or .jsonl)
        #[arg(long)]
        input: PathBuf,

        #[command(flatten)]
        db: DbArg,

        /// Event timestamp, e.g. 2026-01-08T13:00:00
        #[arg(long)]
        timestamp: String,

        #[arg(long)]
        entity: String,

        #[arg(long)]
        metric: String,

        #[command(flatten)]
        tuning: Tuning,
    },

    /// Score events and write a Markdown report
    Report {
        /// Input events (.csv or .jsonl)
        #[arg(long)]
        input: PathBuf,

        #[command(flatten)]
        db: DbArg,

        /// Output Markdown file
        #[arg(long, default_value = "report.md")]
        out: PathBuf,

        /// Number of top anomalies to list
        #[arg(long, default_value = "10")]
        top: usize,

        #[command(flatten)]
        tuning: Tuning,
    },

    /// Generate synthetic training and scoring CSVs
    Demo {
        #[arg(long, default_value = "data/train.csv")]
        train_out: PathBuf,

        #[arg(long, default_value = "data/score.csv")]
        score_out: PathBuf,

        /// Start of the training window
        #[arg(long, default_value = "2026-01-01T00:00:00")]
        start: String,

        #[arg(long, default_value = "7")]
        train_days: i64,

        #[arg(long, default_value = "2")]
        score_days: i64,

        #[arg(long, default_value = "5")]
        interval_minutes: i64,

        #[arg(long, default_value = "42")]
        seed: u64,
    },
}

/// Resolve the config file, apply CLI overrides, then validate.
fn resolve_config(path: Option<&Path>, tuning: &Tuning) -> Result<BaselineConfig> {
    let mut config = BaselineConfig::resolve(path)?;
    if let Some(n) = tuning.min_samples {
        config.min_samples = n;
    }
    if let Some(t) = tuning.mad_threshold {
        config.mad_threshold = t;
    }
    if let Some(m) = tuning.min_mad {
        config.min_mad = m;
    }
    if tuning.no_hour_of_day {
        config.use_hour_of_day = false;
    }
    config.validate()?;
    tracing::debug!(?config, "effective configuration");
    Ok(config)
}

/// Logs go to stderr; stdout carries command output.
fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Train { input, db, tuning } => {
            let config = resolve_config(config_path, &tuning)?;
            let events = load_events(&input)?;
            let store = SqliteStore::open(&db.db)?;
            let (summary, inserted) =
                baseline_engine::run_training(&events, &store, &config, &SystemClock)?;
            println!(
                "Trained {} baselines from {} events ({} keys skipped for fewer than {} samples); stored {} in {}",
                summary.baselines,
                summary.events,
                summary.skipped_groups,
                config.min_samples,
                inserted,
                db.db.display()
            );
        }
        Commands::Score {
            input,
            db,
            only_anomalies,
            tuning,
        } => {
            let config = resolve_config(config_path, &tuning)?;
            let events = load_events(&input)?;
            let store = SqliteStore::open_existing(&db.db)?;
            let (results, _stats) = score_events_with_store(&events, &store, &config)?;
            for result in results.iter().filter(|r| !only_anomalies || r.is_anomaly) {
                println!("{}", serde_json::to_string(result)?);
            }
        }
        Commands::Keys { db } => {
            let store = SqliteStore::open_existing(&db.db)?;
            for key in store.list_keys()? {
                println!("{}", key);
            }
        }
        Commands::List { db } => {
            let store = SqliteStore::open_existing(&db.db)?;
            let counts = store.list_with_counts()?;
            if counts.is_empty() {
                println!("No baselines stored in {}", db.db.display());
            } else {
                println!("{:<50} | Versions", "Key");
                println!("{:-<50}-|-{:-<8}", "", "");
                for (key, count) in counts {
                    println!("{:<50} | {}", key, count);
                }
            }
        }
        Commands::Show { db, key } => {
            let store = SqliteStore::open_existing(&db.db)?;
            let Some(baseline) = store.get_latest(&key)? else {
                bail!("no baseline stored for key '{}'", key);
            };
            println!("{}", serde_json::to_string_pretty(&baseline)?);
        }
        Commands::Explain {
            input,
            db,
            timestamp,
            entity,
            metric,
            tuning,
        } => {
            let config = resolve_config(config_path, &tuning)?;
            let ts = parse_timestamp(&timestamp)?;
            let events = load_events(&input)?;
            let Some(event) = find_event(&events, ts, &entity, &metric) else {
                bail!(
                    "no event matching timestamp={} entity={} metric={} in {}",
                    timestamp,
                    entity,
                    metric,
                    input.display()
                );
            };
            let store = SqliteStore::open_existing(&db.db)?;
            let explanation = explain_event(event, &store, &config)?;
            print!("{}", explanation);
        }
        Commands::Report {
            input,
            db,
            out,
            top,
            tuning,
        } => {
            let config = resolve_config(config_path, &tuning)?;
            let events = load_events(&input)?;
            let store = SqliteStore::open_existing(&db.db)?;
            let (results, stats) = score_events_with_store(&events, &store, &config)?;

            let by_entity = anomalies_by_entity(&results);
            let by_hour = anomalies_by_hour(&results, config.use_hour_of_day);
            let top = top_anomalies(&results, top);
            let input_path = input.display().to_string();
            let db_path = db.db.display().to_string();

            let markdown = render_markdown(&ReportContext {
                input_path: &input_path,
                db_path: &db_path,
                config: &config,
                stats,
                by_entity: &by_entity,
                by_hour: &by_hour,
                top: &top,
            })?;

            if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            std::fs::write(&out, markdown)
                .with_context(|| format!("failed to write report: {}", out.display()))?;
            println!(
                "Wrote report to {} ({} anomalies in {} scored events)",
                out.display(),
                stats.anomalies,
                stats.scored
            );
        }
        Commands::Demo {
            train_out,
            score_out,
            start,
            train_days,
            score_days,
            interval_minutes,
            seed,
        } => {
            let start = parse_timestamp(&start)?;
            let cfg = DemoConfig {
                train_days,
                score_days,
                interval_minutes,
                seed,
                ..DemoConfig::new(start)
            };
            generate_train_and_score(&train_out, &score_out, &cfg)?;
            println!("Wrote demo training data to {}", train_out.display());
            println!("Wrote demo scoring data to {}", score_out.display());
        }
    }

    Ok(())
}
