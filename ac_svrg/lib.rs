pub mod agent;
pub mod config;
pub mod env;
pub mod episode;
pub mod error;
pub mod gradient;
pub mod group;
pub mod logging;
pub mod model;
pub mod panic_hook;
pub mod results;

pub use agent::AcSvrg;
pub use error::{Error, Result};
