//! LoRa to MQTT ingest loop.
//!
//! Polls the radio, decodes each packet's Base64 text and forwards the decoded
//! bytes to the publish client:
//!
//! ```text
//! arm receive ──► packet available? ──no──► sleep 10 ms ──┐
//!      ▲                │ yes                             │
//!      │                ▼                                 │
//!      │          read ≤ 64 bytes                         │
//!      │                │                                 │
//!      │      decode ─► publish "lora/data"               │
//!      │                │                                 │
//!      │          sleep 500 ms ─► next packet             │
//!      └──────────────────────────────────────────────────┘
//! ```
//!
//! Every failure on the way (radio error, empty or oversized read, bad Base64,
//! missing client, rejected publish) is logged, counted and dropped.

use crate::config::{PUBLISH_QOS, PUBLISH_RETAIN, PUBLISH_TOPIC};
use crate::lora::{PacketSource, MAX_PACKET_LEN};
use crate::mqtt::Publisher;
use crate::network::GatewayStats;
use crate::payload::{self, DECODED_CAPACITY};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Pause after each handled packet.
pub const PACKET_PAUSE: Duration = Duration::from_millis(500);

/// Pause between polls when nothing was received.
pub const IDLE_POLL: Duration = Duration::from_millis(10);

/// What happened to a single received packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketOutcome {
    /// Decoded and handed to the publish client.
    Published { len: usize },
    /// The radio reported a zero-length packet.
    Empty,
    /// The radio reported more bytes than the packet buffer holds.
    Oversized { reported: usize },
    /// Reading the packet from the radio failed.
    ReadFailed,
    /// The packet text is not valid Base64 or decodes past capacity.
    DecodeFailed,
    /// The packet decoded to zero bytes.
    EmptyPayload,
    /// Decoded, but no publish client is available.
    NoClient,
    /// The publish client refused the message.
    PublishFailed,
}

/// Receive-decode-publish pipeline.
pub struct IngestLoop<S, P> {
    radio: S,
    publisher: Option<P>,
    stats: Arc<GatewayStats>,
}

impl<S: PacketSource, P: Publisher> IngestLoop<S, P> {
    /// Create a loop over `radio`.
    ///
    /// `publisher` is `None` when the MQTT client could not be created;
    /// decoded packets are then logged and dropped.
    pub fn new(radio: S, publisher: Option<P>, stats: Arc<GatewayStats>) -> Self {
        Self {
            radio,
            publisher,
            stats,
        }
    }

    /// Shared statistics.
    pub fn stats(&self) -> &Arc<GatewayStats> {
        &self.stats
    }

    /// Run until `cancel` fires. On the device it never does.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            "Ingest loop started (publishing to '{}', QoS {})",
            PUBLISH_TOPIC,
            PUBLISH_QOS.level()
        );
        if self.publisher.is_none() {
            warn!("No MQTT client, decoded packets will be dropped");
        }

        while !cancel.is_cancelled() {
            if let Err(e) = self.radio.arm_receive() {
                warn!("Failed to enter receive mode: {}", e);
                self.stats.record_radio_error();
            } else {
                loop {
                    match self.radio.packet_available() {
                        Ok(true) => {}
                        Ok(false) => break,
                        Err(e) => {
                            warn!("Radio status poll failed: {}", e);
                            self.stats.record_radio_error();
                            break;
                        }
                    }

                    let outcome = self.receive_one();
                    debug!("Packet outcome: {:?}", outcome);

                    if pause(PACKET_PAUSE, &cancel).await {
                        break;
                    }
                }
            }

            if pause(IDLE_POLL, &cancel).await {
                break;
            }
        }

        info!("Ingest loop stopped");
    }

    /// Read and handle the pending packet.
    pub fn receive_one(&mut self) -> PacketOutcome {
        let mut raw = [0u8; MAX_PACKET_LEN];
        match self.radio.read_packet(&mut raw) {
            Ok(len) => self.process_packet(&raw, len),
            Err(e) => {
                warn!("Failed to read packet: {}", e);
                self.stats.record_radio_error();
                PacketOutcome::ReadFailed
            }
        }
    }

    /// Handle one packet.
    ///
    /// `buf` is the packet buffer as filled by the radio and `reported_len`
    /// the length the radio claims. A length beyond the buffer is never
    /// trusted.
    pub fn process_packet(&mut self, buf: &[u8], reported_len: usize) -> PacketOutcome {
        if reported_len == 0 {
            warn!("Received empty packet, skipping");
            self.stats.record_empty_read();
            return PacketOutcome::Empty;
        }
        if reported_len > buf.len() {
            warn!(
                "Packet length {} exceeds buffer of {} bytes, skipping",
                reported_len,
                buf.len()
            );
            self.stats.record_oversized_read();
            return PacketOutcome::Oversized {
                reported: reported_len,
            };
        }

        let packet = &buf[..reported_len];
        self.stats.record_packet();
        info!(
            "Received packet ({} bytes): {}",
            reported_len,
            String::from_utf8_lossy(payload::c_text(packet))
        );
        info!("Raw bytes:\n{}", payload::hex_dump(packet));

        let mut decoded = [0u8; DECODED_CAPACITY];
        let len = match payload::decode(packet, &mut decoded) {
            Ok(0) => {
                warn!("Decoded payload is empty, dropping");
                self.stats.record_empty_payload();
                return PacketOutcome::EmptyPayload;
            }
            Ok(len) => len,
            Err(e) => {
                warn!("Failed to decode packet: {}", e);
                self.stats.record_decode_failure();
                return PacketOutcome::DecodeFailed;
            }
        };
        let message = &decoded[..len];
        info!(
            "Decoded payload ({} bytes): {}",
            len,
            String::from_utf8_lossy(payload::c_text(message))
        );

        let Some(publisher) = self.publisher.as_mut() else {
            warn!("MQTT client not initialized, dropping message");
            self.stats.record_skipped_no_client();
            return PacketOutcome::NoClient;
        };

        match publisher.publish(PUBLISH_TOPIC, message, PUBLISH_QOS, PUBLISH_RETAIN) {
            Ok(()) => {
                debug!("Published {} bytes to '{}'", len, PUBLISH_TOPIC);
                self.stats.record_published();
                PacketOutcome::Published { len }
            }
            Err(e) => {
                warn!("Failed to publish to '{}': {}", PUBLISH_TOPIC, e);
                self.stats.record_publish_error();
                PacketOutcome::PublishFailed
            }
        }
    }
}

/// Sleep for `duration`; returns `true` if cancelled first.
async fn pause(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::{PublishError, QoS};
    use crate::network::{BackoffConfig, ConnectivityManager, StationDriver, StationEvent};
    use std::collections::VecDeque;
    use std::fmt;
    use std::net::Ipv4Addr;
    use std::sync::Mutex;
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    #[derive(Debug)]
    struct FakeError(&'static str);

    impl fmt::Display for FakeError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl std::error::Error for FakeError {}

    enum Step {
        Packet(Vec<u8>),
        Oversized(usize),
        ReadError,
        PollError,
    }

    /// Radio that plays back a script and cancels the loop once it runs dry.
    struct ScriptedRadio {
        steps: VecDeque<Step>,
        cancel: CancellationToken,
        armed: usize,
    }

    impl ScriptedRadio {
        fn new(steps: Vec<Step>, cancel: &CancellationToken) -> Self {
            Self {
                steps: steps.into(),
                cancel: cancel.clone(),
                armed: 0,
            }
        }
    }

    impl PacketSource for ScriptedRadio {
        type Error = FakeError;

        fn arm_receive(&mut self) -> Result<(), FakeError> {
            self.armed += 1;
            Ok(())
        }

        fn packet_available(&mut self) -> Result<bool, FakeError> {
            match self.steps.front() {
                None => {
                    self.cancel.cancel();
                    Ok(false)
                }
                Some(Step::PollError) => {
                    self.steps.pop_front();
                    Err(FakeError("poll failed"))
                }
                Some(_) => Ok(true),
            }
        }

        fn read_packet(&mut self, buf: &mut [u8]) -> Result<usize, FakeError> {
            match self.steps.pop_front() {
                Some(Step::Packet(bytes)) => {
                    let n = bytes.len().min(buf.len());
                    buf[..n].copy_from_slice(&bytes[..n]);
                    Ok(bytes.len())
                }
                Some(Step::Oversized(len)) => Ok(len),
                Some(Step::ReadError) => Err(FakeError("read failed")),
                _ => Err(FakeError("nothing to read")),
            }
        }
    }

    #[derive(Debug, Clone)]
    struct Sent {
        topic: String,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
        at: Instant,
    }

    #[derive(Clone, Default)]
    struct RecordingPublisher {
        sent: Arc<Mutex<Vec<Sent>>>,
        reject: bool,
    }

    impl RecordingPublisher {
        fn sent(&self) -> Vec<Sent> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl Publisher for RecordingPublisher {
        fn publish(
            &mut self,
            topic: &str,
            payload: &[u8],
            qos: QoS,
            retain: bool,
        ) -> Result<(), PublishError> {
            if self.reject {
                return Err(PublishError::Rejected("outbox full".into()));
            }
            self.sent.lock().unwrap().push(Sent {
                topic: topic.to_string(),
                payload: payload.to_vec(),
                qos,
                retain,
                at: Instant::now(),
            });
            Ok(())
        }
    }

    fn packet(text: &str) -> Step {
        Step::Packet(text.as_bytes().to_vec())
    }

    fn ingest(
        publisher: Option<RecordingPublisher>,
    ) -> IngestLoop<ScriptedRadio, RecordingPublisher> {
        let cancel = CancellationToken::new();
        IngestLoop::new(
            ScriptedRadio::new(Vec::new(), &cancel),
            publisher,
            Arc::new(GatewayStats::new()),
        )
    }

    fn process(
        ingest: &mut IngestLoop<ScriptedRadio, RecordingPublisher>,
        bytes: &[u8],
    ) -> PacketOutcome {
        let mut buf = [0u8; MAX_PACKET_LEN];
        buf[..bytes.len()].copy_from_slice(bytes);
        ingest.process_packet(&buf, bytes.len())
    }

    #[test]
    fn test_hello_is_published() {
        let publisher = RecordingPublisher::default();
        let mut ingest = ingest(Some(publisher.clone()));

        assert_eq!(
            process(&mut ingest, b"SGVsbG8="),
            PacketOutcome::Published { len: 5 }
        );

        let sent = publisher.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].topic, "lora/data");
        assert_eq!(sent[0].payload, b"Hello");
        assert_eq!(sent[0].qos, QoS::AtLeastOnce);
        assert!(!sent[0].retain);
        assert_eq!(ingest.stats().snapshot().published, 1);
    }

    #[test]
    fn test_published_length_matches_decoded_length() {
        let publisher = RecordingPublisher::default();
        let mut ingest = ingest(Some(publisher.clone()));

        // Embedded NUL survives: the payload is binary, not a C string
        process(&mut ingest, b"AAEC/w==");
        let sent = publisher.sent();
        assert_eq!(sent[0].payload, vec![0x00, 0x01, 0x02, 0xff]);
    }

    #[test]
    fn test_invalid_base64_is_dropped() {
        let publisher = RecordingPublisher::default();
        let mut ingest = ingest(Some(publisher.clone()));

        assert_eq!(
            process(&mut ingest, b"!!!notbase64"),
            PacketOutcome::DecodeFailed
        );
        assert!(publisher.sent().is_empty());
        assert_eq!(ingest.stats().snapshot().decode_failures, 1);
    }

    #[test]
    fn test_empty_read_never_decodes() {
        let publisher = RecordingPublisher::default();
        let mut ingest = ingest(Some(publisher.clone()));

        let buf = [0u8; MAX_PACKET_LEN];
        assert_eq!(ingest.process_packet(&buf, 0), PacketOutcome::Empty);
        assert!(publisher.sent().is_empty());

        let snapshot = ingest.stats().snapshot();
        assert_eq!(snapshot.empty_reads, 1);
        assert_eq!(snapshot.packets_received, 0);
        assert_eq!(snapshot.decode_failures, 0);
    }

    #[test]
    fn test_oversized_read_is_rejected() {
        let mut ingest = ingest(Some(RecordingPublisher::default()));

        let buf = [b'A'; MAX_PACKET_LEN];
        assert_eq!(
            ingest.process_packet(&buf, MAX_PACKET_LEN + 1),
            PacketOutcome::Oversized {
                reported: MAX_PACKET_LEN + 1
            }
        );
        assert_eq!(ingest.stats().snapshot().oversized_reads, 1);
    }

    #[test]
    fn test_padding_only_payload_is_dropped() {
        let publisher = RecordingPublisher::default();
        let mut ingest = ingest(Some(publisher.clone()));

        // Whitespace trims down to nothing
        assert_eq!(process(&mut ingest, b"\r\n"), PacketOutcome::EmptyPayload);
        assert!(publisher.sent().is_empty());
    }

    #[test]
    fn test_missing_client_skips_publish() {
        let mut ingest = ingest(None);
        assert_eq!(process(&mut ingest, b"SGVsbG8="), PacketOutcome::NoClient);
        assert_eq!(ingest.stats().snapshot().skipped_no_client, 1);
    }

    #[test]
    fn test_publish_error_is_counted() {
        let publisher = RecordingPublisher {
            reject: true,
            ..Default::default()
        };
        let mut ingest = ingest(Some(publisher));
        assert_eq!(
            process(&mut ingest, b"SGVsbG8="),
            PacketOutcome::PublishFailed
        );
        assert_eq!(ingest.stats().snapshot().publish_errors, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_handles_scripted_packets() {
        let cancel = CancellationToken::new();
        let radio = ScriptedRadio::new(
            vec![
                packet("SGVsbG8="),
                packet("!!!notbase64"),
                Step::Packet(Vec::new()),
                Step::ReadError,
                Step::Oversized(200),
                Step::PollError,
                packet("V29ybGQ="),
            ],
            &cancel,
        );
        let publisher = RecordingPublisher::default();
        let stats = Arc::new(GatewayStats::new());

        IngestLoop::new(radio, Some(publisher.clone()), stats.clone())
            .run(cancel)
            .await;

        let payloads: Vec<_> = publisher.sent().into_iter().map(|s| s.payload).collect();
        assert_eq!(payloads, vec![b"Hello".to_vec(), b"World".to_vec()]);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.published, 2);
        assert_eq!(snapshot.decode_failures, 1);
        assert_eq!(snapshot.empty_reads, 1);
        assert_eq!(snapshot.oversized_reads, 1);
        assert_eq!(snapshot.radio_errors, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_between_packets() {
        let cancel = CancellationToken::new();
        let radio = ScriptedRadio::new(vec![packet("SGVsbG8="), packet("V29ybGQ=")], &cancel);
        let publisher = RecordingPublisher::default();

        IngestLoop::new(radio, Some(publisher.clone()), Arc::new(GatewayStats::new()))
            .run(cancel)
            .await;

        let sent = publisher.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[1].at - sent[0].at >= PACKET_PAUSE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_radio_is_rearmed() {
        let cancel = CancellationToken::new();
        // The radio's own token is not the loop's, so it idles until stopped
        let mut radio = ScriptedRadio::new(Vec::new(), &CancellationToken::new());

        let stop = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(105)).await;
            stop.cancel();
        });

        let ingest: IngestLoop<&mut ScriptedRadio, RecordingPublisher> =
            IngestLoop::new(&mut radio, None, Arc::new(GatewayStats::new()));
        ingest.run(cancel).await;

        // One arm per 10 ms idle poll
        assert!(radio.armed >= 10);
        assert!(radio.armed <= 12);
    }

    struct Station {
        events: mpsc::UnboundedSender<StationEvent>,
        attempts: Arc<Mutex<Vec<Instant>>>,
    }

    impl StationDriver for Station {
        type Error = FakeError;

        fn start(&mut self) -> Result<(), FakeError> {
            let _ = self.events.send(StationEvent::Started);
            Ok(())
        }

        fn connect(&mut self) -> Result<(), FakeError> {
            self.attempts.lock().unwrap().push(Instant::now());
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wifi_drop_reconnects_while_ingesting() {
        let (tx, rx) = mpsc::unbounded_channel();
        let attempts = Arc::new(Mutex::new(Vec::new()));
        let station = Station {
            events: tx.clone(),
            attempts: attempts.clone(),
        };
        let (manager, handle) =
            ConnectivityManager::new(station, rx, BackoffConfig::default()).unwrap();
        let supervisor_cancel = CancellationToken::new();
        let supervisor = tokio::spawn(manager.run(supervisor_cancel.clone()));

        tx.send(StationEvent::GotIp(Ipv4Addr::new(192, 168, 1, 50)))
            .unwrap();
        handle.wait_connected().await.unwrap();

        let cancel = CancellationToken::new();
        let radio = ScriptedRadio::new(
            vec![
                packet("SGVsbG8="),
                packet("V29ybGQ="),
                packet("QWdhaW4="),
            ],
            &cancel,
        );
        let publisher = RecordingPublisher::default();
        let ingest = tokio::spawn(
            IngestLoop::new(radio, Some(publisher.clone()), Arc::new(GatewayStats::new()))
                .run(cancel),
        );

        // Link drops while the first packet pause is running
        tokio::time::sleep(Duration::from_millis(100)).await;
        let dropped_at = Instant::now();
        tx.send(StationEvent::Disconnected).unwrap();
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        {
            let attempts = attempts.lock().unwrap();
            assert_eq!(attempts.len(), 2);
            assert_eq!(attempts[1], dropped_at);
        }
        assert!(!handle.is_connected());

        ingest.await.unwrap();
        assert_eq!(publisher.sent().len(), 3);

        supervisor_cancel.cancel();
        supervisor.await.unwrap().unwrap();
    }
}
