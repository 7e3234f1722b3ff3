use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::Result;

/// Prefix of the environment variables overriding file settings,
/// e.g. `AC_SVRG__AGENT__GROUP_SIZE=20`.
pub const ENV_PREFIX: &str = "AC_SVRG";

/// Hyperparameters of the actor-critic agent.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Discount factor.
    pub gamma: f64,
    /// SGD step size of the policy.
    pub actor_learning_rate: f64,
    /// Step size of the SVRG critic updates.
    pub critic_learning_rate: f64,
    /// Width of the hidden layer of both models.
    pub hidden_dim: usize,
    /// Episodes per SVRG phase.
    pub group_size: usize,
    /// Variance-reduced critic updates per SVRG phase.
    pub update_count: usize,
    /// Seed of the agent's random source.
    pub seed: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            gamma: 0.95,
            actor_learning_rate: 1e-4,
            critic_learning_rate: 1e-4,
            hidden_dim: 16,
            group_size: 10,
            update_count: 20,
            seed: 33,
        }
    }
}

/// Settings of one training run.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Number of groups to collect and update on.
    pub num_steps: usize,
    /// Log progress every this many groups; 0 disables it.
    pub log_interval: usize,
    /// Seed of the environment.
    pub env_seed: u64,
    /// File the per-episode rewards are appended to as one row.
    pub results: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            num_steps: 300,
            log_interval: 5,
            env_seed: 33,
            results: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub agent: AgentConfig,
    pub run: RunConfig,
}

/// One labelled reward file to aggregate.
#[derive(Debug, Clone, Deserialize)]
pub struct Series {
    pub label: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AggregateConfig {
    pub series: Vec<Series>,
    #[serde(default = "default_bands_output")]
    pub output: PathBuf,
}

fn default_bands_output() -> PathBuf {
    PathBuf::from("bands.csv")
}

fn load<T>(path: Option<&Path>) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let mut builder = Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(File::from(path).required(false));
    }

    let config = builder
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    Ok(config.try_deserialize()?)
}

impl TrainConfig {
    /// Defaults, overridden by `path` (when it exists) and then by the
    /// environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        load(path)
    }
}

impl AggregateConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        load(path)
    }
}
