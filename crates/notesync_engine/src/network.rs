//! Network connectivity monitoring.

use crate::config::NetworkConfig;
use crate::error::SyncResult;
use crate::http::{join_url, parse_base_url, HttpClient, HttpRequest, Method};
use crate::observe::{Observable, Subscription};
use notesync_protocol::{now, Timestamp};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// What the platform reports about the current connection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionInfo {
    /// Whether the platform believes it is online.
    pub online: bool,
    /// Physical link type, e.g. `wifi`.
    pub connection_type: Option<String>,
    /// Effective quality class, e.g. `4g`.
    pub effective_type: Option<String>,
    /// Estimated downlink in Mbit/s.
    pub downlink: Option<f64>,
    /// Estimated round-trip time in milliseconds.
    pub rtt: Option<u32>,
}

impl ConnectionInfo {
    /// An online connection with no quality information.
    pub fn online() -> Self {
        Self {
            online: true,
            ..Self::default()
        }
    }

    /// An offline connection.
    pub fn offline() -> Self {
        Self::default()
    }
}

/// A point-in-time view of connectivity.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkState {
    /// Whether the device is considered online.
    pub is_online: bool,
    /// Physical link type.
    pub connection_type: Option<String>,
    /// Effective quality class.
    pub effective_type: Option<String>,
    /// Estimated downlink in Mbit/s.
    pub downlink: Option<f64>,
    /// Estimated round-trip time in milliseconds.
    pub rtt: Option<u32>,
    /// When this state was computed.
    pub last_checked: Timestamp,
}

impl NetworkState {
    fn from_info(info: ConnectionInfo, is_online: bool) -> Self {
        Self {
            is_online,
            connection_type: info.connection_type,
            effective_type: info.effective_type,
            downlink: info.downlink,
            rtt: info.rtt,
            last_checked: now(),
        }
    }
}

/// Result of [`NetworkMonitor::measure_latency`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Latency {
    /// Whether the health probe succeeded.
    pub connected: bool,
    /// Round-trip time of the probe in milliseconds.
    pub latency_ms: u64,
}

/// Read-only view of the platform's connection.
pub trait ConnectionSource: Send + Sync {
    /// Returns the current connection snapshot.
    fn snapshot(&self) -> ConnectionInfo;
}

/// A connection source driven by hand.
///
/// Every change notifies the receivers returned by
/// [`ManualConnection::events`], which is what [`NetworkMonitor::run`]
/// listens to.
#[derive(Default)]
pub struct ManualConnection {
    info: Mutex<ConnectionInfo>,
    listeners: Mutex<Vec<UnboundedSender<()>>>,
}

impl ManualConnection {
    /// Creates a source reporting `info`.
    pub fn new(info: ConnectionInfo) -> Self {
        Self {
            info: Mutex::new(info),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Returns a stream of connectivity events.
    pub fn events(&self) -> UnboundedReceiver<()> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.lock().push(tx);
        rx
    }

    /// Flips the online flag and emits an event.
    pub fn set_online(&self, online: bool) {
        self.info.lock().online = online;
        self.notify();
    }

    /// Replaces the whole snapshot and emits an event.
    pub fn set_info(&self, info: ConnectionInfo) {
        *self.info.lock() = info;
        self.notify();
    }

    fn notify(&self) {
        self.listeners.lock().retain(|tx| tx.send(()).is_ok());
    }
}

impl ConnectionSource for ManualConnection {
    fn snapshot(&self) -> ConnectionInfo {
        self.info.lock().clone()
    }
}

struct Probe {
    client: Arc<dyn HttpClient>,
    url: String,
}

/// Observes connectivity and publishes it as streams.
///
/// The online stream is de-duplicated: subscribers see the current value
/// and then only real transitions. The state stream carries every
/// re-evaluation.
pub struct NetworkMonitor {
    source: Arc<dyn ConnectionSource>,
    config: NetworkConfig,
    probe: Option<Probe>,
    state: Observable<NetworkState>,
    online: Observable<bool>,
}

impl NetworkMonitor {
    /// Creates a monitor reading `source`.
    pub fn new(source: Arc<dyn ConnectionSource>, config: NetworkConfig) -> Self {
        let info = source.snapshot();
        let online = info.online;
        Self {
            source,
            config,
            probe: None,
            state: Observable::new(NetworkState::from_info(info, online)),
            online: Observable::new(online),
        }
    }

    /// Enables the health probe against `{server_url}{health_path}`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::SyncError::InvalidUrl`] if the URL cannot be built.
    pub fn with_probe(mut self, client: Arc<dyn HttpClient>, server_url: &str) -> SyncResult<Self> {
        let base = parse_base_url(server_url)?;
        let segments: Vec<&str> = self
            .config
            .health_path
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();
        let url = join_url(&base, &segments)?;
        self.probe = Some(Probe { client, url });
        Ok(self)
    }

    /// Returns whether the device is currently considered online.
    pub fn is_online(&self) -> bool {
        self.online.get()
    }

    /// De-duplicated stream of online flags.
    pub fn online(&self) -> Subscription<bool> {
        self.online.subscribe()
    }

    /// Returns the latest state.
    pub fn state(&self) -> NetworkState {
        self.state.get()
    }

    /// Stream of every published state.
    pub fn subscribe_state(&self) -> Subscription<NetworkState> {
        self.state.subscribe()
    }

    /// Re-reads the connection source and publishes the result.
    pub fn refresh(&self) {
        let info = self.source.snapshot();
        let online = info.online;
        self.publish(info, online);
    }

    /// Sends a no-cache `HEAD` to the health endpoint.
    ///
    /// Any failure, timeout or non-2xx status reads as `false`. Without a
    /// configured probe the platform flag is returned.
    pub async fn check_connectivity(&self) -> bool {
        let Some(probe) = &self.probe else {
            return self.source.snapshot().online;
        };
        let request = HttpRequest::new(Method::Head, probe.url.clone())
            .with_header("cache-control", "no-cache")
            .with_header("pragma", "no-cache")
            .with_timeout(self.config.probe_timeout);

        match time::timeout(self.config.probe_timeout, probe.client.send(request)).await {
            Ok(Ok(response)) => response.is_success(),
            Ok(Err(e)) => {
                debug!(error = %e, "health probe failed");
                false
            }
            Err(_) => {
                debug!("health probe timed out");
                false
            }
        }
    }

    /// Times a connectivity check.
    pub async fn measure_latency(&self) -> Latency {
        let started = Instant::now();
        let connected = self.check_connectivity().await;
        Latency {
            connected,
            latency_ms: started.elapsed().as_millis() as u64,
        }
    }

    /// Periodic re-evaluation: the platform flag, confirmed by the health
    /// probe when one is configured.
    async fn recheck(&self) {
        let info = self.source.snapshot();
        let online = if info.online && self.probe.is_some() {
            self.check_connectivity().await
        } else {
            info.online
        };
        self.publish(info, online);
    }

    fn publish(&self, info: ConnectionInfo, online: bool) {
        self.state.set(NetworkState::from_info(info, online));
        if self.online.set_if_changed(online) {
            info!(online, "connectivity changed");
        }
    }

    /// Re-evaluates on every platform event and on the check interval.
    ///
    /// Runs until the task is dropped. Probe failures only ever mark the
    /// device offline.
    pub async fn run(&self, mut events: UnboundedReceiver<()>) {
        let mut interval = time::interval(self.config.check_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut events_open = true;

        loop {
            tokio::select! {
                event = events.recv(), if events_open => match event {
                    Some(()) => self.refresh(),
                    None => events_open = false,
                },
                _ = interval.tick() => self.recheck().await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::http::HttpResponse;
    use async_trait::async_trait;
    use std::time::Duration;

    struct FixedClient {
        status: Option<u16>,
        seen: Mutex<Vec<HttpRequest>>,
    }

    #[async_trait]
    impl HttpClient for FixedClient {
        async fn send(&self, request: HttpRequest) -> SyncResult<HttpResponse> {
            self.seen.lock().push(request);
            match self.status {
                Some(status) => Ok(HttpResponse {
                    status,
                    body: Vec::new(),
                }),
                None => Err(SyncError::Network("unreachable".into())),
            }
        }
    }

    fn fixed(status: Option<u16>) -> Arc<FixedClient> {
        Arc::new(FixedClient {
            status,
            seen: Mutex::new(Vec::new()),
        })
    }

    fn drain<T>(rx: &mut Subscription<T>) -> Vec<T> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    #[test]
    fn online_stream_is_deduplicated() {
        let source = Arc::new(ManualConnection::new(ConnectionInfo::offline()));
        let monitor = NetworkMonitor::new(source.clone(), NetworkConfig::default());
        let mut online = monitor.online();
        let mut states = monitor.subscribe_state();

        source.set_online(true);
        monitor.refresh();
        monitor.refresh();
        source.set_online(false);
        monitor.refresh();

        assert_eq!(drain(&mut online), vec![false, true, false]);
        assert_eq!(drain(&mut states).len(), 4);
        assert!(!monitor.is_online());
    }

    #[test]
    fn state_carries_quality_fields() {
        let source = Arc::new(ManualConnection::new(ConnectionInfo::offline()));
        let monitor = NetworkMonitor::new(source.clone(), NetworkConfig::default());
        source.set_info(ConnectionInfo {
            online: true,
            connection_type: Some("wifi".into()),
            effective_type: Some("4g".into()),
            downlink: Some(10.0),
            rtt: Some(50),
        });
        monitor.refresh();

        let state = monitor.state();
        assert!(state.is_online);
        assert_eq!(state.effective_type.as_deref(), Some("4g"));
        assert_eq!(state.rtt, Some(50));
    }

    #[tokio::test]
    async fn probe_uses_head_without_cache() {
        let client = fixed(Some(204));
        let source = Arc::new(ManualConnection::new(ConnectionInfo::online()));
        let monitor = NetworkMonitor::new(source, NetworkConfig::default())
            .with_probe(client.clone(), "https://notes.example.com/api")
            .unwrap();

        assert!(monitor.check_connectivity().await);
        let seen = client.seen.lock();
        assert_eq!(seen[0].method, Method::Head);
        assert_eq!(seen[0].url, "https://notes.example.com/api/health");
        assert!(seen[0]
            .headers
            .iter()
            .any(|(k, v)| *k == "cache-control" && v == "no-cache"));
    }

    #[tokio::test]
    async fn probe_failures_read_as_offline() {
        for client in [fixed(Some(503)), fixed(None)] {
            let source = Arc::new(ManualConnection::new(ConnectionInfo::online()));
            let monitor = NetworkMonitor::new(source, NetworkConfig::default())
                .with_probe(client, "https://notes.example.com")
                .unwrap();
            assert!(!monitor.check_connectivity().await);
            assert!(!monitor.measure_latency().await.connected);

            monitor.recheck().await;
            assert!(!monitor.is_online());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn run_reacts_to_events() {
        let source = Arc::new(ManualConnection::new(ConnectionInfo::offline()));
        let monitor = Arc::new(NetworkMonitor::new(
            source.clone(),
            NetworkConfig::default().with_check_interval(Duration::from_secs(30)),
        ));
        let mut online = monitor.online();
        let events = source.events();

        let task = tokio::spawn({
            let monitor = monitor.clone();
            async move { monitor.run(events).await }
        });
        tokio::task::yield_now().await;

        source.set_online(true);
        assert_eq!(online.recv().await, Some(false));
        assert_eq!(online.recv().await, Some(true));
        task.abort();
    }
}
