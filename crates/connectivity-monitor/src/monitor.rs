use crate::{NetworkSource, RegistrationId};
use futures_util::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::debug;

/// Hands out reachability streams for one network source.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    source: Arc<dyn NetworkSource>,
}

impl ConnectivityMonitor {
    pub fn new(source: Arc<dyn NetworkSource>) -> Self {
        Self { source }
    }

    /// Stream of reachability changes.
    ///
    /// Nothing is registered until the stream is first polled. It then yields
    /// the current state (when the source knows it) followed by every change.
    /// Dropping the stream removes its registration.
    pub fn observe(&self) -> ConnectivityStream {
        ConnectivityStream {
            source: Arc::clone(&self.source),
            registration: None,
            pending: None,
            last: None,
        }
    }

    /// Last known reachability without subscribing.
    pub fn current(&self) -> Option<bool> {
        self.source.current()
    }
}

struct Registration {
    id: RegistrationId,
    rx: mpsc::UnboundedReceiver<bool>,
}

/// Deduplicated reachability stream returned by [`ConnectivityMonitor::observe`].
pub struct ConnectivityStream {
    source: Arc<dyn NetworkSource>,
    registration: Option<Registration>,
    pending: Option<bool>,
    last: Option<bool>,
}

impl ConnectivityStream {
    fn start(&mut self) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.source.register(Arc::new(move |available| {
            let _ = tx.send(available);
        }));
        debug!(registration = id, "Connectivity observer registered");
        self.pending = self.source.current();
        self.registration = Some(Registration { id, rx });
    }
}

impl Stream for ConnectivityStream {
    type Item = bool;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<bool>> {
        let this = self.get_mut();
        if this.registration.is_none() {
            this.start();
        }

        if let Some(available) = this.pending.take() {
            this.last = Some(available);
            return Poll::Ready(Some(available));
        }

        let Some(registration) = this.registration.as_mut() else {
            return Poll::Ready(None);
        };

        loop {
            match registration.rx.poll_recv(cx) {
                Poll::Ready(Some(available)) if this.last == Some(available) => continue,
                Poll::Ready(Some(available)) => {
                    this.last = Some(available);
                    return Poll::Ready(Some(available));
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl Drop for ConnectivityStream {
    fn drop(&mut self) {
        if let Some(registration) = self.registration.take() {
            self.source.deregister(registration.id);
            debug!(registration = registration.id, "Connectivity observer removed");
        }
    }
}
