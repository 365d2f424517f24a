//! Host-based gateway for development and testing.
//!
//! Runs the ingest pipeline without radio or broker hardware:
//! - Each stdin line is treated as one received LoRa packet
//! - Publishes are logged instead of sent
//! - HTTP stats endpoint at http://localhost:8080/stats
//!
//! # Usage
//!
//! ```bash
//! echo "SGVsbG8=" | cargo run --bin host-gateway
//! ```

#[cfg(not(target_os = "espidf"))]
mod host {
    use log::{info, warn};
    use lora_mqtt_gateway::{
        GatewayStats, IngestLoop, LogPublisher, PacketSource, StatsServer, DEFAULT_STATS_PORT,
    };
    use std::fmt;
    use std::sync::Arc;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::sync::mpsc;
    use tokio::sync::mpsc::error::TryRecvError;
    use tokio_util::sync::CancellationToken;

    /// Stdin closed; no more packets will arrive.
    #[derive(Debug)]
    pub struct InputClosed;

    impl fmt::Display for InputClosed {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "input closed")
        }
    }

    impl std::error::Error for InputClosed {}

    /// Packet source fed from stdin lines.
    struct StdinRadio {
        lines: mpsc::UnboundedReceiver<Vec<u8>>,
        pending: Option<Vec<u8>>,
        cancel: CancellationToken,
    }

    impl PacketSource for StdinRadio {
        type Error = InputClosed;

        fn arm_receive(&mut self) -> Result<(), InputClosed> {
            Ok(())
        }

        fn packet_available(&mut self) -> Result<bool, InputClosed> {
            if self.pending.is_some() {
                return Ok(true);
            }
            match self.lines.try_recv() {
                Ok(line) => {
                    self.pending = Some(line);
                    Ok(true)
                }
                Err(TryRecvError::Empty) => Ok(false),
                Err(TryRecvError::Disconnected) => {
                    info!("End of input, stopping");
                    self.cancel.cancel();
                    Ok(false)
                }
            }
        }

        fn read_packet(&mut self, buf: &mut [u8]) -> Result<usize, InputClosed> {
            let packet = self.pending.take().ok_or(InputClosed)?;
            let n = packet.len().min(buf.len());
            buf[..n].copy_from_slice(&packet[..n]);
            Ok(packet.len())
        }
    }

    pub async fn run() {
        info!("=== LoRa MQTT host gateway starting ===");

        let stats = Arc::new(GatewayStats::new());
        let _stats_server = match StatsServer::start(None, DEFAULT_STATS_PORT, stats.clone(), None)
        {
            Ok(server) => {
                info!(
                    "Stats server at http://localhost:{}/stats",
                    server.port()
                );
                Some(server)
            }
            Err(e) => {
                warn!("Failed to start stats server: {}", e);
                None
            }
        };

        let cancel = CancellationToken::new();

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if tx.send(line.into_bytes()).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Failed to read stdin: {}", e);
                        break;
                    }
                }
            }
        });

        let ctrl_c_cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutting down...");
                ctrl_c_cancel.cancel();
            }
        });

        let radio = StdinRadio {
            lines: rx,
            pending: None,
            cancel: cancel.clone(),
        };
        IngestLoop::new(radio, Some(LogPublisher::new()), stats.clone())
            .run(cancel)
            .await;

        let snapshot = stats.snapshot();
        info!(
            "Done: {} packets, {} published, {} decode failures",
            snapshot.packets_received, snapshot.published, snapshot.decode_failures
        );
    }
}

#[cfg(not(target_os = "espidf"))]
#[tokio::main(flavor = "current_thread")]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    host::run().await;
}

#[cfg(target_os = "espidf")]
fn main() {
    println!("host-gateway runs on the host only; flash the 'gateway' binary instead.");
}
