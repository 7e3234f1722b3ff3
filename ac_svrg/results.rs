use std::{
    fs::{self, OpenOptions},
    io::Write as _,
    path::Path,
};

use ndarray::{Array1, Array2, Axis};
use tracing::info;

use crate::error::{Error, Result};

/// Appends the per-episode rewards of one run as a single whitespace
/// separated row, creating the file and its parent directories if needed.
pub fn append_run(path: &Path, rewards: &[f64]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let mut row = rewards
        .iter()
        .map(f64::to_string)
        .collect::<Vec<_>>()
        .join(" ");
    row.push('\n');

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(row.as_bytes())?;

    info!(path = %path.display(), episodes = rewards.len(), "run appended");
    Ok(())
}

/// Reads every run stored in `path` into a `runs x episodes` matrix. Blank
/// lines are skipped; rows of different lengths are rejected.
pub fn load_runs(path: &Path) -> Result<Array2<f64>> {
    let text = fs::read_to_string(path)?;

    let mut data = Vec::new();
    let mut runs = 0;
    let mut episodes = None;

    for (i, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }

        let row = line
            .split_whitespace()
            .map(str::parse::<f64>)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|source| Error::Parse {
                path: path.to_path_buf(),
                line: i + 1,
                source,
            })?;

        let expected = *episodes.get_or_insert(row.len());
        if row.len() != expected {
            return Err(Error::RaggedRuns {
                path: path.to_path_buf(),
                row: runs,
                expected,
                found: row.len(),
            });
        }

        data.extend(row);
        runs += 1;
    }

    let episodes = episodes.unwrap_or(0);
    Ok(Array2::from_shape_vec((runs, episodes), data)?)
}

/// Per-episode mean and population standard deviation across runs.
#[derive(Debug, Clone, PartialEq)]
pub struct Band {
    pub mean: Array1<f64>,
    pub std: Array1<f64>,
}

impl Band {
    /// Fails with [`Error::NoSeries`] when `runs` holds no run.
    pub fn from_runs(runs: &Array2<f64>) -> Result<Band> {
        let mean = runs.mean_axis(Axis(0)).ok_or(Error::NoSeries)?;
        let std = runs.std_axis(Axis(0), 0.0);
        Ok(Band { mean, std })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.mean.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mean.is_empty()
    }

    #[must_use]
    pub fn upper(&self) -> Array1<f64> {
        &self.mean + &self.std
    }

    #[must_use]
    pub fn lower(&self) -> Array1<f64> {
        &self.mean - &self.std
    }
}

/// Writes labelled bands side by side as CSV, one row per episode. Series of
/// different lengths are cut to the shortest one.
pub fn write_bands(path: &Path, bands: &[(String, Band)]) -> Result<()> {
    let episodes = bands
        .iter()
        .map(|(_, band)| band.len())
        .min()
        .ok_or(Error::NoSeries)?;

    let mut csv = String::from("episode");
    for (label, _) in bands {
        csv.push_str(&format!(",{label}_mean,{label}_std"));
    }
    csv.push('\n');

    for i in 0..episodes {
        csv.push_str(&i.to_string());
        for (_, band) in bands {
            csv.push_str(&format!(",{},{}", band.mean[i], band.std[i]));
        }
        csv.push('\n');
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, csv)?;

    info!(path = %path.display(), series = bands.len(), episodes, "bands written");
    Ok(())
}
