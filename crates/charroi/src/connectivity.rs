//! Connectivity monitoring.
//!
//! A [`ConnectivityMonitor`] polls a [`ConnectivityProbe`] and reports
//! transitions between connected and disconnected. [`sync_on_reconnect`]
//! consumes those transitions and drains the queue every time the link
//! comes back.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, info, trace, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::queue::OfflineQueue;

/// Network state as seen by a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectivityState {
    /// The server is reachable.
    Connected,

    /// The server is not reachable.
    Disconnected,
}

impl ConnectivityState {
    /// Build a state from a probe result.
    #[must_use]
    pub fn from_reachable(reachable: bool) -> Self {
        if reachable {
            Self::Connected
        } else {
            Self::Disconnected
        }
    }

    /// Whether this is [`ConnectivityState::Connected`].
    #[must_use]
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }
}

impl std::fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connected => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// Something that can tell whether the server is reachable right now.
#[async_trait::async_trait]
pub trait ConnectivityProbe: Send + Sync {
    /// Check reachability once.
    async fn is_connected(&self) -> bool;
}

/// Probe that issues a GET and treats any HTTP response as connected.
///
/// A 404 or 500 still proves the network path works; only transport
/// failures (refused, timeout, DNS) count as disconnected.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    url: reqwest::Url,
}

impl HttpProbe {
    /// Create a probe for the given URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL does not parse or the client cannot be
    /// built.
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let url = reqwest::Url::parse(url).map_err(|e| Error::invalid_url(url, e.to_string()))?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url })
    }

    /// Create a probe from the application configuration.
    ///
    /// # Errors
    ///
    /// See [`HttpProbe::new`].
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(&config.probe_url(), config.probe_timeout())
    }

    /// The URL being probed.
    #[must_use]
    pub fn url(&self) -> &str {
        self.url.as_str()
    }
}

#[async_trait::async_trait]
impl ConnectivityProbe for HttpProbe {
    async fn is_connected(&self) -> bool {
        match self.client.get(self.url.clone()).send().await {
            Ok(response) => {
                trace!(status = response.status().as_u16(), "Probe answered");
                true
            }
            Err(e) => {
                trace!(error = %e, "Probe failed");
                false
            }
        }
    }
}

/// One-shot connectivity check.
pub async fn is_online(probe: &dyn ConnectivityProbe) -> bool {
    probe.is_connected().await
}

/// Polls a probe and reports connectivity transitions.
///
/// The first observation is always reported; after that only changes are.
pub struct ConnectivityMonitor {
    probe: Arc<dyn ConnectivityProbe>,
    poll_interval: Duration,
    running: Arc<AtomicBool>,
    last: Option<ConnectivityState>,
}

impl std::fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectivityMonitor")
            .field("poll_interval", &self.poll_interval)
            .field("running", &self.is_running())
            .field("last", &self.last)
            .finish_non_exhaustive()
    }
}

impl ConnectivityMonitor {
    /// Create a monitor around a probe.
    #[must_use]
    pub fn new(probe: Arc<dyn ConnectivityProbe>, poll_interval: Duration) -> Self {
        Self {
            probe,
            poll_interval,
            running: Arc::new(AtomicBool::new(false)),
            last: None,
        }
    }

    /// Create a monitor with an [`HttpProbe`] built from the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the probe cannot be built.
    pub fn from_config(config: &Config) -> Result<Self> {
        let probe = HttpProbe::from_config(config)?;
        Ok(Self::new(Arc::new(probe), config.poll_interval()))
    }

    /// Check if the monitor is currently running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Last state observed, if any.
    #[must_use]
    pub fn last_state(&self) -> Option<ConnectivityState> {
        self.last
    }

    /// Probe once and return the state if it differs from the last one.
    pub async fn check_for_transition(&mut self) -> Option<ConnectivityState> {
        let state = ConnectivityState::from_reachable(self.probe.is_connected().await);
        if self.last == Some(state) {
            trace!(%state, "Connectivity unchanged");
            return None;
        }
        debug!(%state, previous = ?self.last, "Connectivity changed");
        self.last = Some(state);
        Some(state)
    }

    /// Poll the probe and send transitions through the channel.
    ///
    /// Runs until `stop()` is called or the receiver is dropped.
    pub async fn start(&mut self, tx: mpsc::Sender<ConnectivityState>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Connectivity monitor already running");
            return;
        }

        debug!(
            interval_ms = self.poll_interval.as_millis(),
            "Starting connectivity monitor"
        );

        let mut ticker = interval(self.poll_interval);

        while self.running.load(Ordering::SeqCst) {
            ticker.tick().await;

            if let Some(state) = self.check_for_transition().await {
                if tx.send(state).await.is_err() {
                    debug!("Connectivity channel closed, stopping monitor");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        debug!("Connectivity monitor stopped");
    }

    /// Stop the monitor.
    pub fn stop(&self) {
        debug!("Stopping connectivity monitor");
        self.running.store(false, Ordering::SeqCst);
    }

    /// Get a handle that can be used to stop the monitor from another task.
    #[must_use]
    pub fn stop_handle(&self) -> MonitorHandle {
        MonitorHandle {
            running: Arc::clone(&self.running),
        }
    }
}

/// A handle to control a running connectivity monitor.
#[derive(Debug, Clone)]
pub struct MonitorHandle {
    running: Arc<AtomicBool>,
}

impl MonitorHandle {
    /// Stop the associated monitor.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Check if the monitor is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// What [`sync_on_reconnect`] did before its channel closed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TriggerSummary {
    /// Sync runs that completed.
    pub runs: usize,

    /// Entries submitted across all runs.
    pub submitted: usize,

    /// Runs that stopped on an error.
    pub failures: usize,
}

/// Run a sync every time the connection comes back.
///
/// Consumes transitions until the sender side is dropped. A sync that is
/// already running when a reconnect arrives is left alone.
pub async fn sync_on_reconnect(
    queue: OfflineQueue,
    mut rx: mpsc::Receiver<ConnectivityState>,
) -> TriggerSummary {
    let mut summary = TriggerSummary::default();

    while let Some(state) = rx.recv().await {
        if !state.is_connected() {
            info!("Connection lost, validations will be queued");
            continue;
        }

        info!("Connection available, syncing pending validations");
        match queue.sync().await {
            Ok(report) => {
                summary.runs += 1;
                summary.submitted += report.submitted;
                info!(
                    submitted = report.submitted,
                    dead_lettered = report.dead_lettered,
                    remaining = report.remaining,
                    "Pending validations synced"
                );
            }
            Err(e) if e.is_sync_in_progress() => {
                debug!("Sync already running, skipping reconnect trigger");
            }
            Err(e) => {
                summary.failures += 1;
                warn!(error = %e, "Sync after reconnect failed");
            }
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::tests::AcceptAll;
    use crate::storage::Storage;
    use crate::sync::SyncOptions;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Returns scripted results, repeating the last one once exhausted.
    struct ScriptedProbe {
        script: Mutex<VecDeque<bool>>,
        last: Mutex<bool>,
    }

    impl ScriptedProbe {
        fn new(script: &[bool]) -> Self {
            Self {
                script: Mutex::new(script.iter().copied().collect()),
                last: Mutex::new(false),
            }
        }
    }

    #[async_trait::async_trait]
    impl ConnectivityProbe for ScriptedProbe {
        async fn is_connected(&self) -> bool {
            let mut last = self.last.lock().unwrap();
            if let Some(next) = self.script.lock().unwrap().pop_front() {
                *last = next;
            }
            *last
        }
    }

    fn create_test_queue() -> OfflineQueue {
        OfflineQueue::new(
            Storage::open_in_memory().unwrap(),
            Arc::new(AcceptAll),
            SyncOptions::default(),
        )
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectivityState::Connected.to_string(), "connected");
        assert_eq!(ConnectivityState::Disconnected.to_string(), "disconnected");
        assert!(ConnectivityState::from_reachable(true).is_connected());
        assert!(!ConnectivityState::from_reachable(false).is_connected());
    }

    #[tokio::test]
    async fn test_is_online_uses_probe() {
        assert!(is_online(&ScriptedProbe::new(&[true])).await);
        assert!(!is_online(&ScriptedProbe::new(&[false])).await);
    }

    #[tokio::test]
    async fn test_first_observation_is_reported() {
        let mut monitor = ConnectivityMonitor::new(
            Arc::new(ScriptedProbe::new(&[false, false])),
            Duration::from_millis(10),
        );

        assert_eq!(
            monitor.check_for_transition().await,
            Some(ConnectivityState::Disconnected)
        );
        assert_eq!(monitor.check_for_transition().await, None);
        assert_eq!(monitor.last_state(), Some(ConnectivityState::Disconnected));
    }

    #[tokio::test]
    async fn test_monitor_emits_transitions_only() {
        let probe = ScriptedProbe::new(&[false, false, true, true, true, false]);
        let mut monitor = ConnectivityMonitor::new(Arc::new(probe), Duration::from_millis(10));
        let handle = monitor.stop_handle();
        let (tx, mut rx) = mpsc::channel(16);

        let task = tokio::spawn(async move { monitor.start(tx).await });

        let mut seen = Vec::new();
        for _ in 0..3 {
            let state = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            seen.push(state);
        }
        handle.stop();
        task.await.unwrap();

        assert_eq!(
            seen,
            vec![
                ConnectivityState::Disconnected,
                ConnectivityState::Connected,
                ConnectivityState::Disconnected,
            ]
        );
        assert!(!handle.is_running());
    }

    #[tokio::test]
    async fn test_monitor_stops_when_receiver_dropped() {
        let probe = ScriptedProbe::new(&[true, false, true, false]);
        let mut monitor = ConnectivityMonitor::new(Arc::new(probe), Duration::from_millis(10));
        let handle = monitor.stop_handle();
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        tokio::time::timeout(Duration::from_secs(5), monitor.start(tx))
            .await
            .unwrap();
        assert!(!handle.is_running());
    }

    #[test]
    fn test_stop_handle_shares_state() {
        let monitor = ConnectivityMonitor::new(
            Arc::new(ScriptedProbe::new(&[])),
            Duration::from_millis(10),
        );
        let handle = monitor.stop_handle();
        monitor.running.store(true, Ordering::SeqCst);
        assert!(handle.is_running());

        handle.stop();
        assert!(!monitor.is_running());
    }

    #[tokio::test]
    async fn test_reconnect_triggers_sync() {
        let queue = create_test_queue();
        queue.store(json!({"id_bande_sortie": 1})).await.unwrap();
        queue.store(json!({"id_bande_sortie": 2})).await.unwrap();

        let (tx, rx) = mpsc::channel(4);
        tx.send(ConnectivityState::Disconnected).await.unwrap();
        tx.send(ConnectivityState::Connected).await.unwrap();
        drop(tx);

        let summary = sync_on_reconnect(queue.clone(), rx).await;
        assert_eq!(summary.runs, 1);
        assert_eq!(summary.submitted, 2);
        assert_eq!(summary.failures, 0);
        assert!(queue.pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_does_not_sync() {
        let queue = create_test_queue();
        queue.store(json!("a")).await.unwrap();

        let (tx, rx) = mpsc::channel(4);
        tx.send(ConnectivityState::Disconnected).await.unwrap();
        drop(tx);

        let summary = sync_on_reconnect(queue.clone(), rx).await;
        assert_eq!(summary, TriggerSummary::default());
        assert_eq!(queue.pending().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_http_probe_unreachable() {
        let probe = HttpProbe::new("http://127.0.0.1:9/", Duration::from_secs(2)).unwrap();
        assert_eq!(probe.url(), "http://127.0.0.1:9/");
        assert!(!probe.is_connected().await);
    }

    #[test]
    fn test_http_probe_rejects_bad_url() {
        let err = HttpProbe::new("::nope::", Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, Error::InvalidUrl { .. }));
    }
}
