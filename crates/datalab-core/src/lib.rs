pub mod config;
pub mod error;
pub mod models;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::DatalabConfig;
pub use error::{DatalabError, Result};
pub use models::{DataQualityAnalysis, Dataset, DatasetFile, Experiment, Project, User};
