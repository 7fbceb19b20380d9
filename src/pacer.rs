use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
];

const ACCEPT_LANGUAGES: &[&str] = &["en-US,en;q=0.9", "en-US,en;q=0.8", "en-GB,en;q=0.9,en-US;q=0.8"];

const VIEWPORTS: &[(u32, u32)] = &[(1920, 1080), (1680, 1050), (1536, 864), (1440, 900)];

/// Delay and timeout policy. All fields fall back to defaults when omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    pub cell_base_ms: u64,
    pub cell_jitter_ms: u64,
    pub property_base_ms: u64,
    pub property_jitter_ms: u64,
    pub nav_timeout_secs: u64,
    pub content_timeout_secs: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            cell_base_ms: 1000,
            cell_jitter_ms: 2000,
            property_base_ms: 5000,
            property_jitter_ms: 2000,
            nav_timeout_secs: 30,
            content_timeout_secs: 15,
        }
    }
}

impl PacingConfig {
    /// No delays at all.
    #[cfg(test)]
    pub fn immediate() -> Self {
        Self {
            cell_base_ms: 0,
            cell_jitter_ms: 0,
            property_base_ms: 0,
            property_jitter_ms: 0,
            ..Self::default()
        }
    }
}

/// Browser identity presented by one browsing session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_agent: &'static str,
    pub accept_language: &'static str,
    pub viewport: (u32, u32),
}

/// Owns request cadence and identity rotation for a run.
pub struct RequestPacer {
    config: PacingConfig,
    rng: StdRng,
}

impl RequestPacer {
    pub fn new(config: PacingConfig) -> Self {
        Self {
            config,
            rng: StdRng::from_entropy(),
        }
    }

    #[cfg(test)]
    pub fn with_seed(config: PacingConfig, seed: u64) -> Self {
        Self {
            config,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn nav_timeout(&self) -> Duration {
        Duration::from_secs(self.config.nav_timeout_secs)
    }

    pub fn content_timeout(&self) -> Duration {
        Duration::from_secs(self.config.content_timeout_secs)
    }

    /// Wait before the next navigation within a property.
    pub async fn before_request(&mut self) -> Duration {
        let delay = self.draw(self.config.cell_base_ms, self.config.cell_jitter_ms);
        self.wait(delay).await
    }

    /// Wait before moving on to the next property.
    pub async fn before_property(&mut self) -> Duration {
        let delay = self.draw(self.config.property_base_ms, self.config.property_jitter_ms);
        self.wait(delay).await
    }

    /// Fresh identity for a new browsing session, drawn uniformly from fixed pools.
    pub fn identity(&mut self) -> Identity {
        Identity {
            user_agent: pick(&mut self.rng, USER_AGENTS),
            accept_language: pick(&mut self.rng, ACCEPT_LANGUAGES),
            viewport: *VIEWPORTS.choose(&mut self.rng).unwrap_or(&VIEWPORTS[0]),
        }
    }

    fn draw(&mut self, base_ms: u64, jitter_ms: u64) -> Duration {
        Duration::from_millis(base_ms + self.rng.gen_range(0..=jitter_ms))
    }

    async fn wait(&self, delay: Duration) -> Duration {
        if !delay.is_zero() {
            debug!("Pacing {}ms", delay.as_millis());
            tokio::time::sleep(delay).await;
        }
        delay
    }
}

fn pick(rng: &mut StdRng, pool: &[&'static str]) -> &'static str {
    pool.choose(rng).copied().unwrap_or(pool[0])
}
