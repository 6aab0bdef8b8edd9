//! TCP reachability probing for hosts without OS network callbacks.

use crate::{NetworkSource, ReachabilityCallback, RegistrationId};
use parking_lot::Mutex;
use session_config_and_utils::{Config, CoreResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Periodically opens a TCP connection to `addr`; success means reachable.
///
/// Each registration owns one probe task, aborted on deregistration.
pub struct ProbeNetworkSource {
    addr: String,
    interval: Duration,
    timeout: Duration,
    last: Arc<Mutex<Option<bool>>>,
    tasks: Mutex<HashMap<RegistrationId, JoinHandle<()>>>,
    next_id: AtomicU64,
}

impl ProbeNetworkSource {
    pub fn new(addr: impl Into<String>, interval: Duration, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            interval,
            timeout,
            last: Arc::new(Mutex::new(None)),
            tasks: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Probe the configured (or API-derived) address with configured timings.
    pub fn from_config(config: &Config) -> CoreResult<Self> {
        Ok(Self::new(
            config.probe_addr()?,
            Duration::from_millis(config.connectivity.probe_interval_ms),
            Duration::from_millis(config.connectivity.probe_timeout_ms),
        ))
    }

    async fn probe(addr: &str, timeout: Duration) -> bool {
        matches!(
            tokio::time::timeout(timeout, TcpStream::connect(addr)).await,
            Ok(Ok(_))
        )
    }
}

impl NetworkSource for ProbeNetworkSource {
    fn current(&self) -> Option<bool> {
        *self.last.lock()
    }

    fn register(&self, callback: ReachabilityCallback) -> RegistrationId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No Tokio runtime available, reachability probe not started");
            return id;
        };

        let addr = self.addr.clone();
        let interval = self.interval;
        let timeout = self.timeout;
        let last = Arc::clone(&self.last);

        let task = runtime.spawn(async move {
            loop {
                let reachable = Self::probe(&addr, timeout).await;
                let previous = last.lock().replace(reachable);
                if previous != Some(reachable) {
                    debug!(addr = %addr, reachable, "Reachability changed");
                }
                callback(reachable);
                tokio::time::sleep(interval).await;
            }
        });

        self.tasks.lock().insert(id, task);
        id
    }

    fn deregister(&self, id: RegistrationId) {
        if let Some(task) = self.tasks.lock().remove(&id) {
            task.abort();
        }
    }
}

impl Drop for ProbeNetworkSource {
    fn drop(&mut self) {
        for (_, task) in self.tasks.lock().drain() {
            task.abort();
        }
    }
}
