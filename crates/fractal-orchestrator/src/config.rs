use fractal_core::telemetry::LoggingConfig;
use fractal_core::{ExecutionStrategy, FractalError, FractalResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// How a decomposed task's sub-results are merged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisPolicy {
    /// Any failed sub-result fails the parent, naming the first failure.
    #[default]
    FailFast,
    /// The parent completes when strictly more than half of its sub-results completed.
    Majority,
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Recursion bounds.
    #[serde(default)]
    pub recursion: RecursionConfig,
    /// Built-in decomposer settings.
    #[serde(default)]
    pub decomposition: DecompositionConfig,
    /// Retry backoff.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Message loop and bus settings.
    #[serde(default)]
    pub mailbox: MailboxConfig,
    /// Population monitor settings.
    #[serde(default)]
    pub population: PopulationConfig,
    /// Tracing subscriber settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Bounds on how far decomposition may recurse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecursionConfig {
    /// Deepest level that may still split.
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    /// Descent limit along one chain.
    #[serde(default = "default_max_decompositions")]
    pub max_decompositions: u32,
    /// Multiplicative budget decay per descent, in (0, 1).
    #[serde(default = "default_decay")]
    pub decay: f64,
    /// Decomposition stops once the budget is at or below this floor.
    #[serde(default = "default_budget_floor")]
    pub budget_floor: f64,
    /// Deadline for one submission, shared by every descent.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Defaults for the built-in decomposition policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecompositionConfig {
    /// Tasks whose complexity estimate is below this run atomically.
    #[serde(default = "default_complexity_threshold")]
    pub complexity_threshold: f64,
    /// Number of parts synthesized when a task has no pre-defined sub-tasks.
    #[serde(default = "default_synthesized_parts")]
    pub synthesized_parts: usize,
    /// Strategy for tasks without a hint.
    #[serde(default)]
    pub default_strategy: ExecutionStrategy,
    /// How sub-results are merged.
    #[serde(default)]
    pub synthesis: SynthesisPolicy,
    /// Words that raise the complexity estimate.
    #[serde(default = "default_keywords")]
    pub keywords: Vec<String>,
}

/// Backoff between retries of a failed sub-task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Delay before the first retry; doubles per attempt.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Backoff ceiling.
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

/// Agent mailbox settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailboxConfig {
    /// Receive timeout of the message loop; bounds shutdown latency.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Unread messages kept per bus subscriber.
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
}

/// Population monitor settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopulationConfig {
    /// Snapshot refresh period.
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,
}

fn default_max_depth() -> u32 {
    5
}
fn default_max_decompositions() -> u32 {
    20
}
fn default_decay() -> f64 {
    0.9
}
fn default_budget_floor() -> f64 {
    0.1
}
fn default_timeout_secs() -> u64 {
    300
}
fn default_complexity_threshold() -> f64 {
    0.5
}
fn default_synthesized_parts() -> usize {
    2
}
fn default_keywords() -> Vec<String> {
    [
        "complex",
        "multiple",
        "integrate",
        "system",
        "analyze",
        "design",
        "comprehensive",
    ]
    .iter()
    .map(|s| (*s).to_string())
    .collect()
}
fn default_backoff_base_ms() -> u64 {
    10
}
fn default_backoff_max_ms() -> u64 {
    1_000
}
fn default_poll_interval_ms() -> u64 {
    100
}
fn default_broadcast_capacity() -> usize {
    256
}
fn default_refresh_interval_ms() -> u64 {
    1_000
}

impl Default for RecursionConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            max_decompositions: default_max_decompositions(),
            decay: default_decay(),
            budget_floor: default_budget_floor(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl RecursionConfig {
    /// `timeout_secs` as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for DecompositionConfig {
    fn default() -> Self {
        Self {
            complexity_threshold: default_complexity_threshold(),
            synthesized_parts: default_synthesized_parts(),
            default_strategy: ExecutionStrategy::default(),
            synthesis: SynthesisPolicy::default(),
            keywords: default_keywords(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

impl RetryConfig {
    /// Exponential backoff for `attempt` (0-based), capped at `backoff_max_ms`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let delay = self
            .backoff_base_ms
            .saturating_mul(2u64.saturating_pow(attempt));
        Duration::from_millis(delay.min(self.backoff_max_ms))
    }
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            broadcast_capacity: default_broadcast_capacity(),
        }
    }
}

impl MailboxConfig {
    /// `poll_interval_ms` as a duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            refresh_interval_ms: default_refresh_interval_ms(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> FractalResult<Self> {
        let config: EngineConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub async fn load(path: impl AsRef<Path>) -> FractalResult<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            FractalError::Config(format!("failed to read '{}': {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Reject values that would break termination or make no sense.
    pub fn validate(&self) -> FractalResult<()> {
        let r = &self.recursion;
        if r.max_depth == 0 {
            return Err(invalid("recursion.max_depth", "must be greater than 0"));
        }
        if r.max_decompositions == 0 {
            return Err(invalid("recursion.max_decompositions", "must be greater than 0"));
        }
        if !(r.decay > 0.0 && r.decay < 1.0) {
            return Err(invalid("recursion.decay", "must be within (0, 1)"));
        }
        if !(0.0..1.0).contains(&r.budget_floor) {
            return Err(invalid("recursion.budget_floor", "must be within [0, 1)"));
        }

        let d = &self.decomposition;
        if !(0.0..=1.0).contains(&d.complexity_threshold) {
            return Err(invalid("decomposition.complexity_threshold", "must be within [0, 1]"));
        }
        if d.synthesized_parts < 2 {
            return Err(invalid("decomposition.synthesized_parts", "must be at least 2"));
        }

        if self.retry.backoff_base_ms > self.retry.backoff_max_ms {
            return Err(invalid("retry.backoff_base_ms", "must not exceed retry.backoff_max_ms"));
        }
        if self.mailbox.poll_interval_ms == 0 {
            return Err(invalid("mailbox.poll_interval_ms", "must be greater than 0"));
        }
        if self.mailbox.broadcast_capacity == 0 {
            return Err(invalid("mailbox.broadcast_capacity", "must be greater than 0"));
        }
        if self.population.refresh_interval_ms == 0 {
            return Err(invalid("population.refresh_interval_ms", "must be greater than 0"));
        }
        Ok(())
    }
}

fn invalid(key: &str, why: &str) -> FractalError {
    FractalError::Config(format!("{key} {why}"))
}
