use std::sync::Arc;

/// Identifies one callback registration with a [`NetworkSource`].
pub type RegistrationId = u64;

/// Invoked with `true` when the network is reachable and `false` otherwise.
/// Sources may repeat values.
pub type ReachabilityCallback = Arc<dyn Fn(bool) + Send + Sync>;

/// Platform reachability notifications.
pub trait NetworkSource: Send + Sync {
    /// Last known reachability, `None` until the source has an answer.
    fn current(&self) -> Option<bool>;

    /// Install a callback. It stays installed until [`deregister`](Self::deregister).
    fn register(&self, callback: ReachabilityCallback) -> RegistrationId;

    /// Remove a callback. Unknown ids are ignored.
    fn deregister(&self, id: RegistrationId);
}
