//! Pong watcher
//!
//! After the first CONNECT the broker sends a PING and expects the client's
//! PONG before anything else. The watcher is a background task that polls
//! the connection's awaiting-pong flag and closes the connection if the
//! answer does not arrive in time.

use gnat_core::protocol::err_frame;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::session::Connection;

/// Diagnostic written when the initial PONG never arrives
pub const PONG_TIMEOUT: &str = "Pong timeout";

/// Handle to a running pong watcher task
#[derive(Debug)]
pub struct PongWatcher {
    stop_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl PongWatcher {
    /// Spawn the watcher task. Must be called from within a tokio runtime.
    pub fn spawn(
        connection: Arc<Connection>,
        awaiting_pong: Arc<AtomicBool>,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Self {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let deadline = Instant::now() + timeout;
            let mut ticker = interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut stop_rx => {
                        debug!(client_id = connection.id, "Pong watcher stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if !awaiting_pong.load(Ordering::SeqCst) {
                            debug!(client_id = connection.id, "Initial PONG received");
                            break;
                        }
                        if Instant::now() >= deadline {
                            warn!(client_id = connection.id, "No PONG within {:?}, closing", timeout);
                            connection.send(err_frame(PONG_TIMEOUT));
                            connection.close().await;
                            break;
                        }
                    }
                }
            }
        });

        Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        }
    }

    /// Ask the task to stop without waiting for it
    pub fn signal_stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Stop the task and wait for it to finish
    pub async fn stop(mut self) {
        self.signal_stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for PongWatcher {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use gnat_transport::{Result as TransportResult, TransportSender};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Capture {
        frames: Mutex<Vec<Bytes>>,
        closed: AtomicBool,
    }

    impl Capture {
        fn frames(&self) -> Vec<Bytes> {
            self.frames.lock().clone()
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TransportSender for Capture {
        async fn send(&self, data: Bytes) -> TransportResult<()> {
            self.try_send(data)
        }

        fn try_send(&self, data: Bytes) -> TransportResult<()> {
            self.frames.lock().push(data);
            Ok(())
        }

        fn is_connected(&self) -> bool {
            !self.is_closed()
        }

        async fn close(&self) -> TransportResult<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn watch(timeout_ms: u64) -> (PongWatcher, Arc<Capture>, Arc<AtomicBool>) {
        let capture = Arc::new(Capture::default());
        let connection = Arc::new(Connection::new(
            7,
            "127.0.0.1:4222".parse().unwrap(),
            capture.clone(),
        ));
        let awaiting_pong = Arc::new(AtomicBool::new(true));
        let watcher = PongWatcher::spawn(
            connection,
            awaiting_pong.clone(),
            Duration::from_millis(5),
            Duration::from_millis(timeout_ms),
        );
        (watcher, capture, awaiting_pong)
    }

    fn task_finished(watcher: &PongWatcher) -> bool {
        watcher.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    #[tokio::test]
    async fn test_timeout_sends_error_and_closes() {
        let (watcher, capture, _awaiting) = watch(30);

        tokio::time::timeout(Duration::from_secs(2), async {
            while !capture.is_closed() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(capture.frames(), vec![err_frame(PONG_TIMEOUT)]);
        watcher.stop().await;
    }

    #[tokio::test]
    async fn test_pong_received_ends_task() {
        let (watcher, capture, awaiting) = watch(1_000);

        awaiting.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(task_finished(&watcher));
        assert!(capture.frames().is_empty());
        assert!(!capture.is_closed());
    }

    #[tokio::test]
    async fn test_stop_joins_task_before_timeout() {
        let (watcher, capture, _awaiting) = watch(50);

        watcher.stop().await;
        tokio::time::sleep(Duration::from_millis(120)).await;

        assert!(capture.frames().is_empty());
        assert!(!capture.is_closed());
    }

    #[tokio::test]
    async fn test_signal_stop_ends_task() {
        let (mut watcher, capture, _awaiting) = watch(50);

        watcher.signal_stop();
        watcher.signal_stop();
        tokio::time::sleep(Duration::from_millis(120)).await;

        assert!(task_finished(&watcher));
        assert!(capture.frames().is_empty());
        assert!(!capture.is_closed());
    }

    #[tokio::test]
    async fn test_drop_aborts_task() {
        let (watcher, capture, _awaiting) = watch(50);

        drop(watcher);
        tokio::time::sleep(Duration::from_millis(120)).await;

        assert!(capture.frames().is_empty());
        assert!(!capture.is_closed());
    }
}
