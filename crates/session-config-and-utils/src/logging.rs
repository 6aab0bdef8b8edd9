//! Logging initialization for the session runtime.
//!
//! Thin wrapper over the observability crate so hosts only pass a level and
//! the resolved paths.

use crate::Paths;
use observability::LogConfig;

/// Service name written into every log line.
const SERVICE_NAME: &str = "recipe-session";

/// Initialize logging.
///
/// Writes JSONL to `<base>/logs/session.jsonl`; `also_stderr` mirrors events
/// to stderr in compact form for foreground use.
pub fn init_logging(level: &str, paths: &Paths, also_stderr: bool) {
    observability::init_with_config(LogConfig {
        service_name: SERVICE_NAME.into(),
        default_level: level.into(),
        log_path: Some(paths.log_file()),
        file_output: true,
        also_stderr,
    });
}
