use std::path::PathBuf;

use ac_svrg::{agent, config::TrainConfig, env, logging, panic_hook, results};
use tracing::info;

/// Environment variable naming the TOML configuration file.
const CONFIG_VAR: &str = "AC_SVRG_CONFIG";
const DEFAULT_CONFIG: &str = "ac_svrg.toml";

fn main() -> ac_svrg::Result<()> {
    logging::init();
    panic_hook::init();

    let path = std::env::var_os(CONFIG_VAR)
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG), PathBuf::from);
    let TrainConfig {
        agent: agent_config,
        run,
    } = TrainConfig::load(Some(path.as_path()))?;
    info!(?agent_config, ?run, "starting run");

    let mut ac = agent::Builder::init()
        .set_env(env::CartPole::new(run.env_seed))
        .set_config(&agent_config)
        .set_log_interval(run.log_interval)
        .build()?;

    ac.train(run.num_steps)?;

    let rewards = ac.episode_rewards();
    let group_size = agent_config.group_size;
    let last_group_mean =
        rewards.iter().rev().take(group_size).sum::<f64>() / group_size as f64;
    info!(episodes = rewards.len(), last_group_mean, "run finished");

    if let Some(out) = &run.results {
        results::append_run(out, rewards)?;
    }

    Ok(())
}
