use connectivity_monitor::{ConnectivityMonitor, ManualNetworkSource, ProbeNetworkSource};
use futures_util::{FutureExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::timeout;

async fn next_value(stream: &mut connectivity_monitor::ConnectivityStream) -> bool {
    timeout(Duration::from_secs(2), stream.next())
        .await
        .expect("stream produced no value")
        .expect("stream ended")
}

#[tokio::test]
async fn emits_current_state_first() {
    let source = Arc::new(ManualNetworkSource::with_state(true));
    let monitor = ConnectivityMonitor::new(source.clone());

    let mut stream = monitor.observe();
    assert!(next_value(&mut stream).await);

    source.set_available(false);
    assert!(!next_value(&mut stream).await);
}

#[tokio::test]
async fn suppresses_repeated_values() {
    let source = Arc::new(ManualNetworkSource::new());
    let monitor = ConnectivityMonitor::new(source.clone());
    let mut stream = monitor.observe();

    // Unknown initial state: first poll registers and yields nothing.
    assert!(stream.next().now_or_never().is_none());

    for available in [true, true, false, false, true] {
        source.set_available(available);
    }

    assert!(next_value(&mut stream).await);
    assert!(!next_value(&mut stream).await);
    assert!(next_value(&mut stream).await);
    assert!(stream.next().now_or_never().is_none());
}

#[tokio::test]
async fn registration_is_lazy_and_removed_on_drop() {
    let source = Arc::new(ManualNetworkSource::with_state(false));
    let monitor = ConnectivityMonitor::new(source.clone());

    let mut first = monitor.observe();
    assert_eq!(source.registration_count(), 0);

    assert!(!next_value(&mut first).await);
    assert_eq!(source.registration_count(), 1);

    let mut second = monitor.observe();
    assert!(!next_value(&mut second).await);
    assert_eq!(source.registration_count(), 2);

    drop(first);
    assert_eq!(source.registration_count(), 1);
    drop(second);
    assert_eq!(source.registration_count(), 0);
}

#[tokio::test]
async fn observing_again_restarts_with_current_state() {
    let source = Arc::new(ManualNetworkSource::with_state(true));
    let monitor = ConnectivityMonitor::new(source.clone());

    let mut stream = monitor.observe();
    assert!(next_value(&mut stream).await);
    source.set_available(false);
    assert!(!next_value(&mut stream).await);
    drop(stream);

    let mut restarted = monitor.observe();
    assert!(!next_value(&mut restarted).await);
}

#[tokio::test]
async fn probe_reports_reachable_listener() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            if listener.accept().await.is_err() {
                break;
            }
        }
    });

    let source = Arc::new(ProbeNetworkSource::new(
        addr.to_string(),
        Duration::from_millis(50),
        Duration::from_millis(500),
    ));
    let monitor = ConnectivityMonitor::new(source.clone());

    let mut stream = monitor.observe();
    assert!(next_value(&mut stream).await);
    assert_eq!(monitor.current(), Some(true));
}

#[tokio::test]
async fn probe_reports_unreachable_port() {
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };

    let source = Arc::new(ProbeNetworkSource::new(
        addr.to_string(),
        Duration::from_millis(50),
        Duration::from_millis(500),
    ));
    let monitor = ConnectivityMonitor::new(source);

    let mut stream = monitor.observe();
    assert!(!next_value(&mut stream).await);
}
