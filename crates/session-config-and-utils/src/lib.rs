//! Configuration, paths, logging bootstrap and core error types shared by the
//! session subsystem crates.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{
    Config, ConnectivityConfig, RealtimeConfig, RefreshSettings, DEFAULT_API_BASE_URL,
    DEFAULT_LOG_LEVEL, DEFAULT_REALTIME_URL, DEFAULT_TOPIC_KEY,
};
pub use error::{CoreError, CoreResult};
pub use logging::init_logging;
pub use paths::Paths;
