use std::path::PathBuf;

use ac_svrg::{
    config::AggregateConfig,
    logging, panic_hook,
    results::{self, Band},
};
use tracing::info;

/// Environment variable naming the TOML configuration file.
const CONFIG_VAR: &str = "AC_SVRG_AGGREGATE_CONFIG";
const DEFAULT_CONFIG: &str = "aggregate.toml";

fn main() -> ac_svrg::Result<()> {
    logging::init();
    panic_hook::init();

    let path = std::env::var_os(CONFIG_VAR)
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG), PathBuf::from);
    let config = AggregateConfig::load(Some(path.as_path()))?;

    let mut bands = Vec::with_capacity(config.series.len());
    for series in &config.series {
        let runs = results::load_runs(&series.path)?;
        let band = Band::from_runs(&runs)?;

        info!(
            label = %series.label,
            runs = runs.nrows(),
            episodes = band.len(),
            final_mean = band.mean.iter().next_back().copied().unwrap_or_default(),
            "series loaded"
        );
        bands.push((series.label.clone(), band));
    }

    results::write_bands(&config.output, &bands)
}
