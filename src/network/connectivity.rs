//! WiFi station connectivity supervisor.
//!
//! Station events (started, got IP, disconnected) arrive on a channel from the
//! platform event loop. The supervisor feeds them through the [`Connectivity`]
//! state machine and issues connect attempts on the [`StationDriver`],
//! waiting out the reconnect backoff without blocking the event loop.
//!
//! ```text
//!              start                 IP acquired
//! Disconnected ------> Connecting -----------------> Connected
//!      ^                 ^    |                          |
//!      |                 |    | connect error            | disconnected
//!      |                 +----+ (retry after backoff)    |
//!      +-------------------------------------------------+
//!             (reconnect attempt issued right away)
//! ```

use super::backoff::{BackoffConfig, ReconnectBackoff};
use super::stats_server::GatewayStats;
use super::NetworkError;
use log::{debug, info, warn};
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

/// Link state as seen by the rest of the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    /// No link and no attempt in progress.
    Disconnected,
    /// Association or DHCP in progress.
    Connecting,
    /// Associated with an IP address.
    Connected { ip: Ipv4Addr },
}

impl ConnectivityState {
    /// Whether the station holds an IP address.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected { ip } => write!(f, "connected ({})", ip),
        }
    }
}

/// Events reported by the station driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StationEvent {
    /// The station interface came up.
    Started,
    /// DHCP assigned an address.
    GotIp(Ipv4Addr),
    /// The link dropped or an association attempt failed.
    Disconnected,
}

/// What the supervisor should do after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Nothing to do.
    None,
    /// Issue a connect attempt after the given delay.
    Connect { after: Duration },
}

/// Station driver operations the supervisor needs.
pub trait StationDriver {
    /// Driver error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Bring the station interface up. Must eventually report
    /// [`StationEvent::Started`].
    fn start(&mut self) -> Result<(), Self::Error>;

    /// Begin associating with the configured access point.
    ///
    /// Completion is reported through events, not the return value.
    fn connect(&mut self) -> Result<(), Self::Error>;
}

/// Connectivity state machine.
#[derive(Debug)]
pub struct Connectivity {
    state: ConnectivityState,
    backoff: ReconnectBackoff,
}

impl Connectivity {
    /// Create a state machine in the `Disconnected` state.
    pub fn new(backoff: BackoffConfig) -> Self {
        Self {
            state: ConnectivityState::Disconnected,
            backoff: ReconnectBackoff::new(backoff),
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectivityState {
        self.state
    }

    /// Apply a station event.
    pub fn handle(&mut self, event: StationEvent) -> Action {
        match event {
            StationEvent::Started => {
                info!("WiFi station started, connecting...");
                self.transition(ConnectivityState::Connecting);
                Action::Connect {
                    after: Duration::ZERO,
                }
            }
            StationEvent::GotIp(ip) => {
                info!("WiFi connected with IP: {}", ip);
                self.backoff.reset();
                self.transition(ConnectivityState::Connected { ip });
                Action::None
            }
            StationEvent::Disconnected => {
                self.transition(ConnectivityState::Disconnected);
                let after = self.backoff.next_delay();
                if after.is_zero() {
                    warn!("WiFi disconnected, reconnecting...");
                } else {
                    warn!(
                        "WiFi disconnected, reconnecting in {} ms (failure {})",
                        after.as_millis(),
                        self.backoff.failures()
                    );
                }
                self.transition(ConnectivityState::Connecting);
                Action::Connect { after }
            }
        }
    }

    /// A connect call failed before any event was produced.
    pub fn attempt_failed(&mut self) -> Action {
        let after = self.backoff.next_delay();
        self.transition(ConnectivityState::Connecting);
        Action::Connect { after }
    }

    fn transition(&mut self, next: ConnectivityState) {
        if self.state != next {
            debug!("WiFi state: {} -> {}", self.state, next);
            self.state = next;
        }
    }
}

/// Read-only view of the supervisor's state.
#[derive(Debug, Clone)]
pub struct ConnectivityHandle {
    state: watch::Receiver<ConnectivityState>,
}

impl ConnectivityHandle {
    /// Current state.
    pub fn state(&self) -> ConnectivityState {
        *self.state.borrow()
    }

    /// Whether the station currently holds an IP address.
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Current IP address, if connected.
    pub fn ip_addr(&self) -> Option<Ipv4Addr> {
        match self.state() {
            ConnectivityState::Connected { ip } => Some(ip),
            _ => None,
        }
    }

    /// Wait until the station is connected.
    ///
    /// Fails only if the supervisor stopped.
    pub async fn wait_connected(&self) -> Result<Ipv4Addr, NetworkError> {
        let mut state = self.state.clone();
        let connected = state
            .wait_for(ConnectivityState::is_connected)
            .await
            .map_err(|_| NetworkError::SupervisorStopped)?;
        match *connected {
            ConnectivityState::Connected { ip } => Ok(ip),
            _ => Err(NetworkError::SupervisorStopped),
        }
    }
}

/// Drives a [`StationDriver`] from its event stream.
pub struct ConnectivityManager<D: StationDriver> {
    driver: D,
    events: mpsc::UnboundedReceiver<StationEvent>,
    machine: Connectivity,
    state: watch::Sender<ConnectivityState>,
    stats: Option<Arc<GatewayStats>>,
}

impl<D: StationDriver> ConnectivityManager<D> {
    /// Create a supervisor and a handle observing it.
    pub fn new(
        driver: D,
        events: mpsc::UnboundedReceiver<StationEvent>,
        backoff: BackoffConfig,
    ) -> Result<(Self, ConnectivityHandle), NetworkError> {
        backoff.validate()?;
        let (state, receiver) = watch::channel(ConnectivityState::Disconnected);
        let manager = Self {
            driver,
            events,
            machine: Connectivity::new(backoff),
            state,
            stats: None,
        };
        Ok((manager, ConnectivityHandle { state: receiver }))
    }

    /// Count connect attempts in the gateway statistics.
    pub fn with_stats(mut self, stats: Arc<GatewayStats>) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Start the station and supervise it until cancelled.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), NetworkError> {
        self.driver
            .start()
            .map_err(|e| NetworkError::Driver(Box::new(e)))?;

        let mut pending: Option<Instant> = None;

        loop {
            let action = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Connectivity supervisor shutting down");
                    break;
                }
                event = self.events.recv() => match event {
                    Some(event) => {
                        let action = self.machine.handle(event);
                        self.publish_state();
                        action
                    }
                    None => {
                        warn!("Station event source closed");
                        break;
                    }
                },
                _ = sleep_until(pending.unwrap_or_else(Instant::now)), if pending.is_some() => {
                    pending = None;
                    self.attempt()
                }
            };

            if self.machine.state().is_connected() {
                // A retry scheduled before the link came up must not fire
                pending = None;
            }

            match action {
                Action::None => {}
                Action::Connect { after } if after.is_zero() => {
                    pending = None;
                    if let Action::Connect { after } = self.attempt() {
                        // Always go through the timer so a failing driver cannot spin
                        pending = Some(Instant::now() + after);
                    }
                }
                Action::Connect { after } => {
                    pending = Some(Instant::now() + after);
                }
            }
        }

        Ok(())
    }

    /// Issue one connect attempt.
    fn attempt(&mut self) -> Action {
        if let Some(stats) = &self.stats {
            stats.record_wifi_attempt();
        }
        match self.driver.connect() {
            Ok(()) => {
                debug!("WiFi connect attempt issued");
                Action::None
            }
            Err(e) => {
                warn!("WiFi connect attempt failed: {}", e);
                let action = self.machine.attempt_failed();
                self.publish_state();
                action
            }
        }
    }

    fn publish_state(&self) {
        let state = self.machine.state();
        self.state.send_if_modified(|current| {
            if *current != state {
                *current = state;
                true
            } else {
                false
            }
        });
    }
}

/// Spawn the supervisor and wait until the station has an IP address.
///
/// Reconnection continues in the background for as long as the returned task
/// runs.
pub async fn connect<D>(
    driver: D,
    events: mpsc::UnboundedReceiver<StationEvent>,
    backoff: BackoffConfig,
    stats: Arc<GatewayStats>,
    cancel: CancellationToken,
) -> Result<(ConnectivityHandle, JoinHandle<Result<(), NetworkError>>), NetworkError>
where
    D: StationDriver + Send + 'static,
{
    let (manager, handle) = ConnectivityManager::new(driver, events, backoff)?;
    let task = tokio::spawn(manager.with_stats(stats).run(cancel));

    info!("Connecting to WiFi...");
    match handle.wait_connected().await {
        Ok(ip) => {
            info!("WiFi ready, IP: {}", ip);
            Ok((handle, task))
        }
        Err(e) => match task.await {
            Ok(Err(run_error)) => Err(run_error),
            _ => Err(e),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    const IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 50);

    #[derive(Debug)]
    struct FakeError;

    impl fmt::Display for FakeError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "fake driver error")
        }
    }

    impl std::error::Error for FakeError {}

    /// Station that reports `Started` on start and records connect attempts.
    struct FakeStation {
        events: mpsc::UnboundedSender<StationEvent>,
        attempts: Arc<Mutex<Vec<Instant>>>,
        fail_start: bool,
        fail_connect: bool,
    }

    impl StationDriver for FakeStation {
        type Error = FakeError;

        fn start(&mut self) -> Result<(), FakeError> {
            if self.fail_start {
                return Err(FakeError);
            }
            let _ = self.events.send(StationEvent::Started);
            Ok(())
        }

        fn connect(&mut self) -> Result<(), FakeError> {
            self.attempts.lock().unwrap().push(Instant::now());
            if self.fail_connect {
                Err(FakeError)
            } else {
                Ok(())
            }
        }
    }

    struct Harness {
        events: mpsc::UnboundedSender<StationEvent>,
        attempts: Arc<Mutex<Vec<Instant>>>,
        handle: ConnectivityHandle,
        cancel: CancellationToken,
        task: JoinHandle<Result<(), NetworkError>>,
    }

    impl Harness {
        fn attempt_count(&self) -> usize {
            self.attempts.lock().unwrap().len()
        }
    }

    fn spawn_manager(fail_connect: bool) -> Harness {
        let (tx, rx) = mpsc::unbounded_channel();
        let attempts = Arc::new(Mutex::new(Vec::new()));
        let driver = FakeStation {
            events: tx.clone(),
            attempts: attempts.clone(),
            fail_start: false,
            fail_connect,
        };
        let (manager, handle) =
            ConnectivityManager::new(driver, rx, BackoffConfig::default()).unwrap();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(manager.run(cancel.clone()));
        Harness {
            events: tx,
            attempts,
            handle,
            cancel,
            task,
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn test_state_machine_transitions() {
        let mut machine = Connectivity::new(BackoffConfig::default());
        assert_eq!(machine.state(), ConnectivityState::Disconnected);

        assert_eq!(
            machine.handle(StationEvent::Started),
            Action::Connect {
                after: Duration::ZERO
            }
        );
        assert_eq!(machine.state(), ConnectivityState::Connecting);

        assert_eq!(machine.handle(StationEvent::GotIp(IP)), Action::None);
        assert_eq!(machine.state(), ConnectivityState::Connected { ip: IP });

        // Disconnect loops straight back to connecting
        assert_eq!(
            machine.handle(StationEvent::Disconnected),
            Action::Connect {
                after: Duration::ZERO
            }
        );
        assert_eq!(machine.state(), ConnectivityState::Connecting);
    }

    #[test]
    fn test_repeated_failures_back_off() {
        let mut machine = Connectivity::new(BackoffConfig::default());
        machine.handle(StationEvent::Started);

        let delays: Vec<_> = (0..4)
            .map(|_| match machine.handle(StationEvent::Disconnected) {
                Action::Connect { after } => after,
                Action::None => panic!("expected reconnect"),
            })
            .collect();
        assert_eq!(
            delays,
            vec![
                Duration::ZERO,
                Duration::from_millis(500),
                Duration::from_secs(1),
                Duration::from_secs(2)
            ]
        );

        // A successful connection resets the backoff
        machine.handle(StationEvent::GotIp(IP));
        assert_eq!(
            machine.handle(StationEvent::Disconnected),
            Action::Connect {
                after: Duration::ZERO
            }
        );
    }

    #[test]
    fn test_immediate_policy_never_delays() {
        let mut machine = Connectivity::new(BackoffConfig::immediate());
        for _ in 0..5 {
            assert_eq!(
                machine.handle(StationEvent::Disconnected),
                Action::Connect {
                    after: Duration::ZERO
                }
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_issues_first_attempt() {
        let harness = spawn_manager(false);
        settle().await;

        assert_eq!(harness.attempt_count(), 1);
        assert_eq!(harness.handle.state(), ConnectivityState::Connecting);
        assert!(!harness.handle.is_connected());

        harness.events.send(StationEvent::GotIp(IP)).unwrap();
        assert_eq!(harness.handle.wait_connected().await.unwrap(), IP);
        assert_eq!(harness.handle.ip_addr(), Some(IP));

        harness.cancel.cancel();
        assert!(harness.task.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_reconnects_immediately() {
        let harness = spawn_manager(false);
        settle().await;
        harness.events.send(StationEvent::GotIp(IP)).unwrap();
        harness.handle.wait_connected().await.unwrap();

        let disconnected_at = Instant::now();
        harness.events.send(StationEvent::Disconnected).unwrap();
        settle().await;

        let attempts = harness.attempts.lock().unwrap().clone();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[1], disconnected_at);
        assert!(!harness.handle.is_connected());

        harness.cancel.cancel();
        harness.task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_reassociation_waits_for_backoff() {
        let harness = spawn_manager(false);
        settle().await;
        harness.events.send(StationEvent::GotIp(IP)).unwrap();
        harness.handle.wait_connected().await.unwrap();

        // First drop: immediate retry
        harness.events.send(StationEvent::Disconnected).unwrap();
        settle().await;
        assert_eq!(harness.attempt_count(), 2);

        // Retry fails too: next attempt waits 500 ms
        harness.events.send(StationEvent::Disconnected).unwrap();
        settle().await;
        assert_eq!(harness.attempt_count(), 2);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(harness.attempt_count(), 2);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(harness.attempt_count(), 3);

        harness.cancel.cancel();
        harness.task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_errors_are_retried_with_backoff() {
        let harness = spawn_manager(true);
        settle().await;
        assert!(harness.attempt_count() >= 1);

        // Failed calls: retries at +0 (via timer), +500 ms, +1 s
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(harness.attempt_count(), 2);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(harness.attempt_count(), 3);
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(harness.attempt_count(), 4);

        harness.cancel.cancel();
        harness.task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_up_cancels_scheduled_retry() {
        let harness = spawn_manager(true);
        settle().await;

        // Both initial attempts fail; the next one is due at +500 ms
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(harness.attempt_count(), 2);

        // The association still completes
        harness.events.send(StationEvent::GotIp(IP)).unwrap();
        harness.handle.wait_connected().await.unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(harness.attempt_count(), 2);
        assert_eq!(harness.handle.ip_addr(), Some(IP));

        harness.cancel.cancel();
        harness.task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_waits_for_ip() {
        let (tx, rx) = mpsc::unbounded_channel();
        let attempts = Arc::new(Mutex::new(Vec::new()));
        let driver = FakeStation {
            events: tx.clone(),
            attempts: attempts.clone(),
            fail_start: false,
            fail_connect: false,
        };
        let stats = Arc::new(GatewayStats::default());
        let cancel = CancellationToken::new();

        let sender = tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            let _ = sender.send(StationEvent::GotIp(IP));
        });

        let (handle, task) = connect(
            driver,
            rx,
            BackoffConfig::default(),
            stats.clone(),
            cancel.clone(),
        )
        .await
        .unwrap();

        assert_eq!(handle.ip_addr(), Some(IP));
        assert_eq!(stats.snapshot().wifi_connect_attempts, 1);

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_connect_reports_start_failure() {
        let (tx, rx) = mpsc::unbounded_channel();
        let driver = FakeStation {
            events: tx,
            attempts: Arc::new(Mutex::new(Vec::new())),
            fail_start: true,
            fail_connect: false,
        };

        let result = connect(
            driver,
            rx,
            BackoffConfig::default(),
            Arc::new(GatewayStats::default()),
            CancellationToken::new(),
        )
        .await;

        assert!(matches!(result, Err(NetworkError::Driver(_))));
    }

    #[test]
    fn test_invalid_backoff_rejected() {
        let (tx, rx) = mpsc::unbounded_channel();
        let driver = FakeStation {
            events: tx,
            attempts: Arc::new(Mutex::new(Vec::new())),
            fail_start: false,
            fail_connect: false,
        };
        let backoff = BackoffConfig {
            multiplier: 0,
            ..Default::default()
        };
        assert!(matches!(
            ConnectivityManager::new(driver, rx, backoff),
            Err(NetworkError::Config(_))
        ));
    }
}
