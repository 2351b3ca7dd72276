pub mod config;
pub mod duration;
pub mod error;
pub mod types;

pub use config::{ActionConfig, BackendConfig, ClusterConfig, Config, HttpConfig, ScalerConfig};
pub use duration::parse_duration;
pub use error::{ConfigError, ConfigResult, DurationError};
pub use types::*;
