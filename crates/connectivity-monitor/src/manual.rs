use crate::{NetworkSource, ReachabilityCallback, RegistrationId};
use parking_lot::{Mutex, ReentrantMutex};
use std::collections::HashMap;

#[derive(Default)]
struct ManualState {
    available: Option<bool>,
    callbacks: HashMap<RegistrationId, ReachabilityCallback>,
    next_id: RegistrationId,
}

/// Source fed by the host: platform bindings call
/// [`set_available`](Self::set_available) whenever the OS reports a change.
#[derive(Default)]
pub struct ManualNetworkSource {
    state: Mutex<ManualState>,
    /// Held while one event is recorded and delivered, so callbacks see
    /// events in the order `current()` reflects them.
    delivery: ReentrantMutex<()>,
}

impl ManualNetworkSource {
    /// Source with unknown initial reachability.
    pub fn new() -> Self {
        Self::default()
    }

    /// Source that starts out with a known state.
    pub fn with_state(available: bool) -> Self {
        let source = Self::default();
        source.state.lock().available = Some(available);
        source
    }

    /// Record a reachability event and notify every registered callback.
    pub fn set_available(&self, available: bool) {
        let _delivery = self.delivery.lock();
        let callbacks: Vec<ReachabilityCallback> = {
            let mut state = self.state.lock();
            state.available = Some(available);
            state.callbacks.values().cloned().collect()
        };

        for callback in callbacks {
            callback(available);
        }
    }

    /// Number of callbacks currently installed.
    pub fn registration_count(&self) -> usize {
        self.state.lock().callbacks.len()
    }
}

impl NetworkSource for ManualNetworkSource {
    fn current(&self) -> Option<bool> {
        self.state.lock().available
    }

    fn register(&self, callback: ReachabilityCallback) -> RegistrationId {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = state.next_id;
        state.callbacks.insert(id, callback);
        id
    }

    fn deregister(&self, id: RegistrationId) {
        self.state.lock().callbacks.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn callbacks_fire_until_deregistered() {
        let source = ManualNetworkSource::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&hits);
        let id = source.register(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(source.registration_count(), 1);

        source.set_available(true);
        source.set_available(false);
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        source.deregister(id);
        source.set_available(true);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(source.registration_count(), 0);
        assert_eq!(source.current(), Some(true));
    }

    #[test]
    fn concurrent_events_are_delivered_in_recorded_order() {
        let source = Arc::new(ManualNetworkSource::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&seen);
        source.register(Arc::new(move |available| {
            std::thread::yield_now();
            log.lock().push(available);
        }));

        for _ in 0..20 {
            let writers: Vec<_> = [true, false]
                .into_iter()
                .map(|available| {
                    let source = Arc::clone(&source);
                    std::thread::spawn(move || {
                        for _ in 0..50 {
                            source.set_available(available);
                        }
                    })
                })
                .collect();
            for writer in writers {
                writer.join().unwrap();
            }

            assert_eq!(seen.lock().last().copied(), source.current());
        }
        assert_eq!(seen.lock().len(), 20 * 2 * 50);
    }

    #[test]
    fn callback_may_report_a_follow_up_event() {
        let source = Arc::new(ManualNetworkSource::new());
        let weak = Arc::downgrade(&source);
        source.register(Arc::new(move |available| {
            if available {
                if let Some(source) = weak.upgrade() {
                    source.set_available(false);
                }
            }
        }));

        source.set_available(true);
        assert_eq!(source.current(), Some(false));
    }
}
