//! HTTP stats server for gateway monitoring.
//!
//! Provides a simple `/stats` endpoint that returns gateway statistics as JSON.
//! Uses `tiny_http` which works on both host and ESP32 (via std::net).
//!
//! # Example Response
//!
//! ```json
//! {
//!   "uptime_secs": 3600,
//!   "wifi": { "state": "connected", "ip": "192.168.1.50" },
//!   "radio": {
//!     "packets_received": 230,
//!     "empty_reads": 0,
//!     "oversized_reads": 1,
//!     "errors": 0
//!   },
//!   "payloads": { "decode_failures": 4, "empty": 2 },
//!   "mqtt": { "published": 223, "errors": 0, "skipped_no_client": 0 },
//!   "wifi_connect_attempts": 3
//! }
//! ```

use super::connectivity::{ConnectivityHandle, ConnectivityState};
use log::{error, info, warn};
use serde::Serialize;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tiny_http::{Header, Method, Response, Server};

/// Default port for the stats server.
pub const DEFAULT_STATS_PORT: u16 = 8080;

/// Gateway statistics container.
///
/// Shared across the application and updated by the ingest loop and the
/// connectivity supervisor. All counters are atomics, so no locking is needed.
#[derive(Debug)]
pub struct GatewayStats {
    start_time: Instant,
    packets_received: AtomicUsize,
    empty_reads: AtomicUsize,
    oversized_reads: AtomicUsize,
    radio_errors: AtomicUsize,
    decode_failures: AtomicUsize,
    empty_payloads: AtomicUsize,
    published: AtomicUsize,
    publish_errors: AtomicUsize,
    skipped_no_client: AtomicUsize,
    wifi_connect_attempts: AtomicUsize,
}

impl Default for GatewayStats {
    fn default() -> Self {
        Self {
            start_time: Instant::now(),
            packets_received: AtomicUsize::new(0),
            empty_reads: AtomicUsize::new(0),
            oversized_reads: AtomicUsize::new(0),
            radio_errors: AtomicUsize::new(0),
            decode_failures: AtomicUsize::new(0),
            empty_payloads: AtomicUsize::new(0),
            published: AtomicUsize::new(0),
            publish_errors: AtomicUsize::new(0),
            skipped_no_client: AtomicUsize::new(0),
            wifi_connect_attempts: AtomicUsize::new(0),
        }
    }
}

fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl GatewayStats {
    /// Create new, zeroed statistics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// A packet with a usable length was read from the radio.
    pub fn record_packet(&self) {
        bump(&self.packets_received);
    }

    pub fn record_empty_read(&self) {
        bump(&self.empty_reads);
    }

    pub fn record_oversized_read(&self) {
        bump(&self.oversized_reads);
    }

    pub fn record_radio_error(&self) {
        bump(&self.radio_errors);
    }

    pub fn record_decode_failure(&self) {
        bump(&self.decode_failures);
    }

    pub fn record_empty_payload(&self) {
        bump(&self.empty_payloads);
    }

    pub fn record_published(&self) {
        bump(&self.published);
    }

    pub fn record_publish_error(&self) {
        bump(&self.publish_errors);
    }

    pub fn record_skipped_no_client(&self) {
        bump(&self.skipped_no_client);
    }

    pub fn record_wifi_attempt(&self) {
        bump(&self.wifi_connect_attempts);
    }

    /// Point-in-time copy of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicUsize| c.load(Ordering::Relaxed);
        StatsSnapshot {
            uptime_secs: self.uptime_secs(),
            packets_received: load(&self.packets_received),
            empty_reads: load(&self.empty_reads),
            oversized_reads: load(&self.oversized_reads),
            radio_errors: load(&self.radio_errors),
            decode_failures: load(&self.decode_failures),
            empty_payloads: load(&self.empty_payloads),
            published: load(&self.published),
            publish_errors: load(&self.publish_errors),
            skipped_no_client: load(&self.skipped_no_client),
            wifi_connect_attempts: load(&self.wifi_connect_attempts),
        }
    }

    /// Serialize all statistics to JSON, including the link state if known.
    pub fn to_json(&self, connectivity: Option<&ConnectivityHandle>) -> String {
        let snapshot = self.snapshot();
        let wifi = connectivity.map(|handle| WifiReport::from(handle.state()));
        let report = StatsReport {
            uptime_secs: snapshot.uptime_secs,
            wifi,
            radio: RadioReport {
                packets_received: snapshot.packets_received,
                empty_reads: snapshot.empty_reads,
                oversized_reads: snapshot.oversized_reads,
                errors: snapshot.radio_errors,
            },
            payloads: PayloadReport {
                decode_failures: snapshot.decode_failures,
                empty: snapshot.empty_payloads,
            },
            mqtt: MqttReport {
                published: snapshot.published,
                errors: snapshot.publish_errors,
                skipped_no_client: snapshot.skipped_no_client,
            },
            wifi_connect_attempts: snapshot.wifi_connect_attempts,
        };
        // Only plain integers and strings; serialization cannot fail
        serde_json::to_string(&report).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Plain copy of the gateway counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub uptime_secs: u64,
    pub packets_received: usize,
    pub empty_reads: usize,
    pub oversized_reads: usize,
    pub radio_errors: usize,
    pub decode_failures: usize,
    pub empty_payloads: usize,
    pub published: usize,
    pub publish_errors: usize,
    pub skipped_no_client: usize,
    pub wifi_connect_attempts: usize,
}

#[derive(Serialize)]
struct StatsReport {
    uptime_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    wifi: Option<WifiReport>,
    radio: RadioReport,
    payloads: PayloadReport,
    mqtt: MqttReport,
    wifi_connect_attempts: usize,
}

#[derive(Serialize)]
struct WifiReport {
    state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    ip: Option<String>,
}

impl From<ConnectivityState> for WifiReport {
    fn from(state: ConnectivityState) -> Self {
        match state {
            ConnectivityState::Disconnected => Self {
                state: "disconnected",
                ip: None,
            },
            ConnectivityState::Connecting => Self {
                state: "connecting",
                ip: None,
            },
            ConnectivityState::Connected { ip } => Self {
                state: "connected",
                ip: Some(ip.to_string()),
            },
        }
    }
}

#[derive(Serialize)]
struct RadioReport {
    packets_received: usize,
    empty_reads: usize,
    oversized_reads: usize,
    errors: usize,
}

#[derive(Serialize)]
struct PayloadReport {
    decode_failures: usize,
    empty: usize,
}

#[derive(Serialize)]
struct MqttReport {
    published: usize,
    errors: usize,
    skipped_no_client: usize,
}

/// HTTP stats server.
///
/// Runs in a background thread and serves gateway statistics as JSON.
pub struct StatsServer {
    handle: Option<thread::JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    port: u16,
}

impl StatsServer {
    /// Start the stats server.
    ///
    /// # Arguments
    ///
    /// * `bind_addr` - IP address to bind to (use `None` for 0.0.0.0)
    /// * `port` - Port to listen on (0 picks a free port)
    /// * `stats` - Shared statistics to serve
    /// * `connectivity` - Link state to report, if available
    ///
    /// # Returns
    ///
    /// A handle to the running server. Drop it to stop the server.
    pub fn start(
        bind_addr: Option<IpAddr>,
        port: u16,
        stats: Arc<GatewayStats>,
        connectivity: Option<ConnectivityHandle>,
    ) -> Result<Self, std::io::Error> {
        let addr = match bind_addr {
            Some(ip) => format!("{}:{}", ip, port),
            None => format!("0.0.0.0:{}", port),
        };

        let server = Server::http(&addr)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::AddrInUse, format!("{}", e)))?;
        let port = server
            .server_addr()
            .to_ip()
            .map(|a| a.port())
            .unwrap_or(port);

        info!("Stats server listening on port {} (/stats)", port);

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();

        let handle = thread::Builder::new()
            .name("stats-http".into())
            .spawn(move || {
                Self::run_server(server, stats, connectivity, shutdown_clone);
            })?;

        Ok(Self {
            handle: Some(handle),
            shutdown,
            port,
        })
    }

    /// Port the server is bound to.
    pub fn port(&self) -> u16 {
        self.port
    }

    fn run_server(
        server: Server,
        stats: Arc<GatewayStats>,
        connectivity: Option<ConnectivityHandle>,
        shutdown: Arc<AtomicBool>,
    ) {
        let (content_type, location, allow_get) = match static_headers() {
            Some(headers) => headers,
            None => {
                error!("Failed to build response headers");
                return;
            }
        };

        loop {
            if shutdown.load(Ordering::Acquire) {
                info!("Stats server shutting down");
                break;
            }

            match server.recv_timeout(Duration::from_millis(100)) {
                Ok(Some(request)) => {
                    if request.method() != &Method::Get {
                        let response = Response::from_string("Method Not Allowed")
                            .with_status_code(405)
                            .with_header(allow_get.clone());
                        let _ = request.respond(response);
                        continue;
                    }

                    let path = request.url();

                    if path == "/stats" || path == "/stats/" {
                        let json = stats.to_json(connectivity.as_ref());
                        let response = Response::from_string(json)
                            .with_header(content_type.clone())
                            .with_status_code(200);

                        if let Err(e) = request.respond(response) {
                            warn!("Failed to send response: {}", e);
                        }
                    } else if path == "/" {
                        let response = Response::from_string("See /stats for gateway statistics")
                            .with_status_code(302)
                            .with_header(location.clone());

                        if let Err(e) = request.respond(response) {
                            warn!("Failed to send redirect: {}", e);
                        }
                    } else {
                        let response = Response::from_string("Not Found").with_status_code(404);

                        if let Err(e) = request.respond(response) {
                            warn!("Failed to send 404: {}", e);
                        }
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    error!("Server error: {}", e);
                    break;
                }
            }
        }
    }

    /// Stop the server.
    ///
    /// May take up to 100ms due to the polling interval.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for StatsServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn static_headers() -> Option<(Header, Header, Header)> {
    let content_type = Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]).ok()?;
    let location = Header::from_bytes(&b"Location"[..], &b"/stats"[..]).ok()?;
    let allow_get = Header::from_bytes(&b"Allow"[..], &b"GET"[..]).ok()?;
    Some((content_type, location, allow_get))
}
