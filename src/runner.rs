use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;

use anyhow::Result;
use futures::FutureExt;
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{PropertyProfile, Settings};
use crate::dates::DatePair;
use crate::fallback::FallbackController;
use crate::observation::{cell_key, CellKey, RateObservation};
use crate::pacer::RequestPacer;
use crate::session::{BrowserEngine, Timeouts};
use crate::store::{self, RunFile};
use crate::summary::RunSummary;

pub const FLUSH_EVERY: usize = 10;

pub struct RunOptions {
    pub output: PathBuf,
    /// Seed cells already present in `output` instead of scraping them again.
    pub resume: bool,
    pub flush_every: usize,
    pub progress: bool,
}

impl RunOptions {
    pub fn new(output: PathBuf) -> Self {
        Self {
            output,
            resume: false,
            flush_every: FLUSH_EVERY,
            progress: true,
        }
    }
}

/// What a finished run produced.
#[derive(Debug)]
pub struct RunReport {
    pub file: RunFile,
    pub resumed: usize,
    pub skipped: Vec<String>,
    pub cancelled: bool,
}

/// Walks every property over the date plan, one cell at a time.
pub struct PipelineRunner<'a> {
    settings: &'a Settings,
    pairs: Vec<DatePair>,
    pacer: RequestPacer,
    options: RunOptions,
    cancel: CancellationToken,
    observations: Vec<RateObservation>,
    unflushed: usize,
}

impl<'a> PipelineRunner<'a> {
    pub fn new(
        settings: &'a Settings,
        pairs: Vec<DatePair>,
        pacer: RequestPacer,
        options: RunOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            settings,
            pairs,
            pacer,
            options,
            cancel,
            observations: Vec::new(),
            unflushed: 0,
        }
    }

    /// Run to completion (or cancellation). The engine is closed on every
    /// path out of here, errors and panics included.
    pub async fn run(mut self, engine: &mut dyn BrowserEngine) -> Result<RunReport> {
        info!(
            "Starting run: {} properties × {} date pairs via {} engine",
            self.settings.properties.len(),
            self.pairs.len(),
            engine.name()
        );
        let outcome = AssertUnwindSafe(self.run_properties(engine)).catch_unwind().await;
        if let Err(e) = engine.close().await {
            warn!("Failed to close {} engine: {}", engine.name(), e);
        }
        let (resumed, skipped) = match outcome {
            Ok(result) => result?,
            Err(payload) => {
                error!("Run aborted by a panic; engine closed");
                panic::resume_unwind(payload)
            }
        };

        let file = self.flush()?;
        let cancelled = self.cancel.is_cancelled();
        info!("── Run summary ──");
        for s in &file.summary {
            log_summary(s);
        }
        info!(
            "Saved {} observations to {}{}",
            file.total_data_points,
            self.options.output.display(),
            if cancelled { " (cancelled)" } else { "" }
        );
        Ok(RunReport {
            file,
            resumed,
            skipped,
            cancelled,
        })
    }

    async fn run_properties(&mut self, engine: &mut dyn BrowserEngine) -> Result<(usize, Vec<String>)> {
        let resumed = if self.options.resume { self.seed()? } else { 0 };
        let done: HashSet<CellKey> = self.observations.iter().map(RateObservation::key).collect();
        let timeouts = Timeouts {
            navigation: self.pacer.nav_timeout(),
            content: self.pacer.content_timeout(),
        };
        let settings = self.settings;

        let mut skipped = Vec::new();
        let mut visited_any = false;
        for profile in &settings.properties {
            if self.cancel.is_cancelled() {
                break;
            }
            let pending: Vec<DatePair> = self
                .pairs
                .iter()
                .filter(|p| !done.contains(&cell_key(&profile.id, p)))
                .copied()
                .collect();
            if pending.is_empty() {
                info!("{}: all {} cells already recorded", profile.id, self.pairs.len());
                continue;
            }

            if visited_any {
                self.pacer.before_property().await;
            }
            visited_any = true;

            let identity = self.pacer.identity();
            let mut session = match engine.open_session(&identity, timeouts).await {
                Ok(s) => s,
                Err(e) => {
                    error!("{}: could not open a browsing session, skipping property: {}", profile.id, e);
                    skipped.push(profile.id.clone());
                    continue;
                }
            };

            info!("{}: {} cells ({} already recorded)", profile.name, pending.len(), self.pairs.len() - pending.len());
            let controller = FallbackController::new(profile, settings.adults);
            let pb = self.progress_bar(profile, pending.len())?;

            for (i, pair) in pending.iter().enumerate() {
                if self.cancel.is_cancelled() {
                    warn!("Cancelled; stopping before {} {}", profile.id, pair.check_in());
                    break;
                }
                if i > 0 {
                    self.pacer.before_request().await;
                }
                let obs = controller.observe(&mut *session, &mut self.pacer, pair).await;
                pb.set_message(format!("{} {}", pair.check_in(), obs.source.as_str()));
                self.record(obs)?;
                pb.inc(1);
            }
            pb.finish_and_clear();

            log_summary(&RunSummary::for_profile(profile, self.pairs.len(), &self.observations));
        }
        Ok((resumed, skipped))
    }

    /// Load observations from a previous run whose cells are still in the plan.
    fn seed(&mut self) -> Result<usize> {
        if !self.options.output.exists() {
            info!("Nothing to resume at {}", self.options.output.display());
            return Ok(0);
        }
        let previous = store::load(&self.options.output)?;
        let planned: HashSet<CellKey> = self
            .settings
            .properties
            .iter()
            .flat_map(|p| self.pairs.iter().map(move |pair| cell_key(&p.id, pair)))
            .collect();

        let mut seen = HashSet::new();
        self.observations = previous
            .results
            .into_iter()
            .filter(|o| planned.contains(&o.key()) && seen.insert(o.key()))
            .collect();
        info!(
            "Resuming with {} recorded cells from {}",
            self.observations.len(),
            self.options.output.display()
        );
        Ok(self.observations.len())
    }

    fn record(&mut self, obs: RateObservation) -> Result<()> {
        self.observations.push(obs);
        self.unflushed += 1;
        if self.unflushed >= self.options.flush_every.max(1) {
            self.flush()?;
        }
        Ok(())
    }

    /// Overwrite the output file with everything observed so far.
    fn flush(&mut self) -> Result<RunFile> {
        let summary = self
            .settings
            .properties
            .iter()
            .map(|p| RunSummary::for_profile(p, self.pairs.len(), &self.observations))
            .collect();
        let file = RunFile::new(summary, self.observations.clone());
        store::save(&self.options.output, &file)?;
        info!("Flushed {} observations to {}", file.total_data_points, self.options.output.display());
        self.unflushed = 0;
        Ok(file)
    }

    fn progress_bar(&self, profile: &PropertyProfile, len: usize) -> Result<ProgressBar> {
        if !self.options.progress {
            return Ok(ProgressBar::hidden());
        }
        let pb = ProgressBar::new(len as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{prefix:.bold} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")?
                .progress_chars("=> "),
        );
        pb.set_prefix(profile.id.clone());
        Ok(pb)
    }
}

fn log_summary(s: &RunSummary) {
    info!(
        "{}: {}/{} cells, {}% live (direct {}, aggregator {}, widget {}, estimated {}), avg ${}",
        s.property_name,
        s.total_attempts,
        s.expected_cells.unwrap_or(s.total_attempts),
        s.live_rate,
        s.by_source.get("direct").copied().unwrap_or(0),
        s.by_source.get("aggregator").copied().unwrap_or(0),
        s.by_source.get("embedded-widget").copied().unwrap_or(0),
        s.by_source.get("estimated").copied().unwrap_or(0),
        s.average_lowest_rate.map(|r| format!("{:.2}", r)).unwrap_or_else(|| "-".into())
    );
    if s.missing_cells() > 0 {
        warn!("{}: {} planned cells missing", s.property_id, s.missing_cells());
    }
}
