//! Configuration, paths, feature flags and logging bootstrap for engage.

mod config;
mod error;
mod features;
mod logging;
mod paths;

pub use config::{Config, RetrySettings, DEFAULT_ENDPOINT_BASE, DEFAULT_LOG_LEVEL};
pub use error::{CoreError, CoreResult};
pub use features::{ExperimentalFeature, ExperimentalFeatures};
pub use logging::{init_logging, parse_level};
pub use paths::Paths;
