use std::{num::ParseFloatError, path::PathBuf};

use thiserror::Error;

/// Errors raised while training the agent or handling reward logs.
#[derive(Error, Debug)]
pub enum Error {
    #[error("episode has {steps} recorded steps but {rewards} rewards")]
    Misaligned { steps: usize, rewards: usize },

    #[error("episode finished without any recorded step")]
    EmptyEpisode,

    #[error("no episodes collected in the current group")]
    EmptyGroup,

    #[error("{episodes} episodes are still open from a previous group")]
    LeftoverGroup { episodes: usize },

    #[error("missing parameter: {0}")]
    MissingParameter(&'static str),

    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("cannot sample an action: {0}")]
    Sampling(#[from] rand::distributions::WeightedError),

    #[error("torch error: {0}")]
    Torch(#[from] tch::TchError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("{}:{line}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        source: ParseFloatError,
    },

    #[error("{}: row {row} has {found} episodes, expected {expected}", .path.display())]
    RaggedRuns {
        path: PathBuf,
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("reward matrix shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("no reward series to aggregate")]
    NoSeries,
}

pub type Result<T> = std::result::Result<T, Error>;
