mod config;
mod dates;
mod estimate;
mod extract;
mod fallback;
mod observation;
mod pacer;
mod runner;
mod session;
mod store;
mod summary;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::observation::RateSource;
use crate::pacer::RequestPacer;
use crate::runner::{PipelineRunner, RunOptions};
use crate::session::http::HttpEngine;
use crate::session::spider::SpiderEngine;
use crate::session::BrowserEngine;
use crate::summary::RunSummary;

#[derive(Parser)]
#[command(name = "comp_rates", about = "Competitor nightly rate collection with estimated fallback")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect rates for every property over the horizon
    Run {
        /// First night (default: today)
        #[arg(long)]
        start: Option<NaiveDate>,
        /// Last night (default: 26 weeks after start)
        #[arg(long)]
        end: Option<NaiveDate>,
        #[arg(short, long, default_value = config::CONFIG_PATH)]
        config: PathBuf,
        #[arg(short, long, default_value = store::DEFAULT_OUTPUT)]
        output: PathBuf,
        /// Keep cells already in the output file and collect only the rest
        #[arg(long)]
        resume: bool,
        /// Write the output file every N cells
        #[arg(long, default_value_t = runner::FLUSH_EVERY)]
        flush_every: usize,
        /// Hide progress bars
        #[arg(short, long)]
        quiet: bool,
    },
    /// Print the date pairs a run would cover
    Dates {
        #[arg(long)]
        start: Option<NaiveDate>,
        #[arg(long)]
        end: Option<NaiveDate>,
    },
    /// Per-property summary of a run file
    Summary {
        #[arg(short, long, default_value = store::DEFAULT_OUTPUT)]
        output: PathBuf,
    },
    /// Merge run files; later files win for the same cell
    Merge {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            start,
            end,
            config,
            output,
            resume,
            flush_every,
            quiet,
        } => {
            let settings = config::load(&config)?;
            let today = chrono::Local::now().date_naive();
            let (start, end) = dates::resolve_horizon(start, end, today);
            let pairs = dates::generate(start, end);
            if pairs.is_empty() {
                println!("No date pairs between {} and {}.", start, end);
                return Ok(());
            }
            println!(
                "Collecting {} properties × {} date pairs ({} to {})...",
                settings.properties.len(),
                pairs.len(),
                start,
                end
            );

            let mut engine = select_engine()?;
            let cancel = cancel_on_interrupt();
            let options = RunOptions {
                resume,
                flush_every,
                progress: !quiet,
                ..RunOptions::new(output)
            };
            let pacer = RequestPacer::new(settings.pacing.clone());
            let report = PipelineRunner::new(&settings, pairs, pacer, options, cancel)
                .run(engine.as_mut())
                .await?;

            print_summary(&report.file.summary);
            if report.resumed > 0 {
                println!("Resumed {} cells from the previous run.", report.resumed);
            }
            if !report.skipped.is_empty() {
                println!("Skipped (no session): {}", report.skipped.join(", "));
            }
            if report.cancelled {
                println!("Run cancelled; partial results saved.");
            }
            Ok(())
        }
        Commands::Dates { start, end } => {
            let today = chrono::Local::now().date_naive();
            let (start, end) = dates::resolve_horizon(start, end, today);
            let pairs = dates::generate(start, end);
            println!("{:<12} {:<12} {:<8}", "Check-in", "Check-out", "Type");
            println!("{}", "-".repeat(34));
            for p in &pairs {
                println!(
                    "{:<12} {:<12} {:<8}",
                    p.check_in().to_string(),
                    p.check_out().to_string(),
                    p.day_type().as_str()
                );
            }
            println!("\n{} pairs from {} to {}", pairs.len(), start, end);
            Ok(())
        }
        Commands::Summary { output } => {
            let file = store::load(&output)?;
            println!(
                "{} observations, collected {}",
                file.total_data_points,
                file.scraped_at.format("%Y-%m-%d %H:%M UTC")
            );
            print_summary(&RunSummary::all_in(&file.results));
            Ok(())
        }
        Commands::Merge { files, output } => {
            let runs = files
                .iter()
                .map(|p| store::load(p))
                .collect::<anyhow::Result<Vec<_>>>()?;
            let merged = store::merge(&runs);
            store::save(&output, &merged)
                .with_context(|| format!("Failed to write merged file {}", output.display()))?;
            print_summary(&merged.summary);
            println!("Merged {} files into {}", files.len(), output.display());
            Ok(())
        }
    };

    eprintln!("Done in {}", format_duration(t0.elapsed()));
    result
}

/// spider.cloud rendering when `SPIDER_API_KEY` is set, plain HTTP otherwise.
fn select_engine() -> anyhow::Result<Box<dyn BrowserEngine>> {
    match SpiderEngine::from_env() {
        Some(engine) => Ok(Box::new(engine?)),
        None => {
            warn!(
                "{} not set; fetching pages over plain HTTP (no script execution)",
                session::spider::API_KEY_VAR
            );
            Ok(Box::new(HttpEngine::new()))
        }
    }
}

/// Token cancelled on Ctrl-C; the runner stops between cells.
fn cancel_on_interrupt() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; finishing the current cell");
            trigger.cancel();
        }
    });
    cancel
}

fn print_summary(summaries: &[RunSummary]) {
    println!(
        "\n{:<24} {:>6} {:>7} {:>7} {:>7} {:>7} {:>7} {:>9} {:>15}",
        "Property", "Cells", "Direct", "Aggr", "Widget", "Est", "Live%", "Avg", "Range"
    );
    println!("{}", "-".repeat(98));
    for s in summaries {
        let cells = match s.expected_cells {
            Some(e) => format!("{}/{}", s.total_attempts, e),
            None => s.total_attempts.to_string(),
        };
        let range = match (s.min_rate, s.max_rate) {
            (Some(lo), Some(hi)) => format!("${:.0}-${:.0}", lo, hi),
            _ => "-".into(),
        };
        println!(
            "{:<24} {:>6} {:>7} {:>7} {:>7} {:>7} {:>7.1} {:>9} {:>15}",
            truncate(&s.property_name, 24),
            cells,
            s.count(RateSource::Direct),
            s.count(RateSource::Aggregator),
            s.count(RateSource::EmbeddedWidget),
            s.count(RateSource::Estimated),
            s.live_rate,
            s.average_lowest_rate
                .map(|r| format!("${:.2}", r))
                .unwrap_or_else(|| "-".into()),
            range
        );
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max - 3).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
