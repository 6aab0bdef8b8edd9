//! Network reachability as a stream of booleans.
//!
//! A [`NetworkSource`] delivers raw reachability callbacks (from platform
//! bindings or a TCP probe). [`ConnectivityMonitor::observe`] turns them into a
//! deduplicated [`ConnectivityStream`] that owns its callback registration.

mod manual;
mod monitor;
mod probe;
mod source;

pub use manual::ManualNetworkSource;
pub use monitor::{ConnectivityMonitor, ConnectivityStream};
pub use probe::ProbeNetworkSource;
pub use source::{NetworkSource, ReachabilityCallback, RegistrationId};
