//! Daemon reachability tracking.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use parley_daemon::DaemonClient;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::RelayConfig;

const EVENT_CAPACITY: usize = 16;

/// Last known reachability of the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectivityState {
    /// No check has completed yet.
    #[default]
    Unknown,
    Reachable,
    Unreachable,
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectivityState::Unknown => f.write_str("unknown"),
            ConnectivityState::Reachable => f.write_str("reachable"),
            ConnectivityState::Unreachable => f.write_str("unreachable"),
        }
    }
}

/// State plus when it was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectivityStatus {
    pub state: ConnectivityState,
    /// Number of the check that produced `state`, counting from 1.
    pub check: u64,
    pub last_checked: Option<Instant>,
}

/// A change between `Reachable` and `Unreachable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectivityEvent {
    pub from: ConnectivityState,
    pub to: ConnectivityState,
}

type CheckFuture = Shared<BoxFuture<'static, ConnectivityState>>;

struct MonitorInner {
    client: DaemonClient,
    status: watch::Sender<ConnectivityStatus>,
    events: broadcast::Sender<ConnectivityEvent>,
    checks: AtomicU64,
}

impl MonitorInner {
    /// Publish a check result. Checks are numbered in completion order, so
    /// the stored status always belongs to the latest finished check.
    fn record(&self, state: ConnectivityState) {
        let check = self.checks.fetch_add(1, Ordering::SeqCst) + 1;
        let previous = self.status.send_replace(ConnectivityStatus {
            state,
            check,
            last_checked: Some(Instant::now()),
        });

        if previous.state != ConnectivityState::Unknown && previous.state != state {
            info!(from = %previous.state, to = %state, "Daemon connectivity changed");
            // No subscribers is fine.
            let _ = self.events.send(ConnectivityEvent {
                from: previous.state,
                to: state,
            });
        }
    }
}

/// Tracks whether the daemon answers health checks.
///
/// Clones share state. Checks run on demand or on an interval; concurrent
/// checks share one probe. Subscribers are notified only when the state
/// flips between reachable and unreachable.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    inner: Arc<MonitorInner>,
    interval: Duration,
    in_flight: Arc<Mutex<Option<CheckFuture>>>,
}

impl ConnectivityMonitor {
    pub fn new(client: DaemonClient, interval: Duration) -> Self {
        let (status, _) = watch::channel(ConnectivityStatus::default());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(MonitorInner {
                client,
                status,
                events,
                checks: AtomicU64::new(0),
            }),
            interval,
            in_flight: Arc::new(Mutex::new(None)),
        }
    }

    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(config.client(), config.health_interval)
    }

    pub fn base_url(&self) -> &str {
        self.inner.client.base_url()
    }

    /// Most recent status.
    pub fn current(&self) -> ConnectivityStatus {
        *self.inner.status.borrow()
    }

    /// Receiver that always holds the most recent status.
    pub fn watch(&self) -> watch::Receiver<ConnectivityStatus> {
        self.inner.status.subscribe()
    }

    /// Receive reachable/unreachable transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.inner.events.subscribe()
    }

    /// Probe the daemon now, joining a probe already in progress.
    pub async fn check(&self) -> ConnectivityState {
        let probe = {
            let mut in_flight = self.in_flight.lock();
            match in_flight.as_ref() {
                Some(existing) => existing.clone(),
                None => {
                    let fresh = run_probe(self.inner.clone()).boxed().shared();
                    *in_flight = Some(fresh.clone());
                    fresh
                }
            }
        };

        let state = probe.clone().await;

        let mut in_flight = self.in_flight.lock();
        if in_flight.as_ref().is_some_and(|p| p.ptr_eq(&probe)) {
            *in_flight = None;
        }

        state
    }

    /// Check on the configured interval until the handle is aborted.
    pub fn spawn(&self) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(monitor.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                monitor.check().await;
            }
        })
    }
}

async fn run_probe(inner: Arc<MonitorInner>) -> ConnectivityState {
    let state = match inner.client.check_health().await {
        Ok(()) => ConnectivityState::Reachable,
        Err(e) => {
            debug!(error = %e, "Health check failed");
            ConnectivityState::Unreachable
        }
    };
    if state == ConnectivityState::Unreachable
        && inner.status.borrow().state != ConnectivityState::Unreachable
    {
        warn!(url = %inner.client.base_url(), "Daemon is not reachable");
    }
    inner.record(state);
    state
}

impl fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectivityMonitor")
            .field("base_url", &self.base_url())
            .field("interval", &self.interval)
            .field("status", &self.current())
            .finish()
    }
}
