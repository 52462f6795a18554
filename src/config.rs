//! Engine configuration.
//!
//! All knobs have working defaults; `from_env` overlays `TASKLOOM_*`
//! environment variables (loading a `.env` file first when present) for
//! deployments that configure through the environment.

use std::time::Duration;

use crate::ledger::BudgetConfig;
use crate::runtimes::checkpointer::DEFAULT_CHECKPOINT_TTL;
use crate::runtimes::events::DEFAULT_EVENT_BUFFER;

/// Tunables for the workflow engine.
#[derive(Clone, Copy, Debug)]
pub struct EngineConfig {
    /// Retention for session checkpoints (default seven days).
    pub checkpoint_ttl: Duration,
    /// Per-invocation model timeout (default 60s).
    pub model_timeout: Duration,
    /// Bound of each session's event channel.
    pub event_buffer: usize,
    pub budget: BudgetConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            checkpoint_ttl: DEFAULT_CHECKPOINT_TTL,
            model_timeout: Duration::from_secs(60),
            event_buffer: DEFAULT_EVENT_BUFFER,
            budget: BudgetConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Defaults overlaid with `TASKLOOM_*` environment variables.
    ///
    /// Recognized variables: `TASKLOOM_CHECKPOINT_TTL_SECS`,
    /// `TASKLOOM_MODEL_TIMEOUT_SECS`, `TASKLOOM_EVENT_BUFFER`,
    /// `TASKLOOM_DAILY_BUDGET`, `TASKLOOM_MONTHLY_BUDGET`,
    /// `TASKLOOM_THROTTLE_RATIO`. Unparsable values are logged and
    /// ignored.
    #[must_use]
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let mut config = Self::default();

        if let Some(secs) = env_parse::<u64>("TASKLOOM_CHECKPOINT_TTL_SECS") {
            config.checkpoint_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("TASKLOOM_MODEL_TIMEOUT_SECS") {
            config.model_timeout = Duration::from_secs(secs);
        }
        if let Some(buffer) = env_parse::<usize>("TASKLOOM_EVENT_BUFFER") {
            config.event_buffer = buffer.max(1);
        }
        if let Some(ceiling) = env_parse::<f64>("TASKLOOM_DAILY_BUDGET") {
            config.budget.daily_ceiling = ceiling;
        }
        if let Some(ceiling) = env_parse::<f64>("TASKLOOM_MONTHLY_BUDGET") {
            config.budget.monthly_ceiling = ceiling;
        }
        if let Some(ratio) = env_parse::<f64>("TASKLOOM_THROTTLE_RATIO") {
            config.budget.throttle_ratio = ratio.clamp(0.0, 1.0);
        }
        config
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, raw = %raw, "unparsable configuration value ignored");
            None
        }
    }
}
