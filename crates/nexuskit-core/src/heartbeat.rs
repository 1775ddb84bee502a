//! Heartbeat management: fixed or adaptive keep-alive timer, RTT
//! accounting and timeout-driven disconnects.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use nexuskit_proto::{ControlEvent, ProtocolAdapter};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{HeartbeatConfig, HeartbeatMode};
use crate::state::DisconnectReason;
use crate::window::SuccessRateWindow;

/// Running keep-alive statistics, reset on every connect.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeartbeatStats {
    pub sent: u64,
    pub received: u64,
    pub failed: u64,
    pub avg_rtt: Duration,
}

impl HeartbeatStats {
    fn record_rtt(&mut self, rtt: Duration) {
        self.received += 1;
        if self.received == 1 {
            self.avg_rtt = rtt;
        } else {
            // Running mean: avg += (sample - avg) / n.
            let n = self.received as f64;
            let avg_secs =
                self.avg_rtt.as_secs_f64() + (rtt.as_secs_f64() - self.avg_rtt.as_secs_f64()) / n;
            self.avg_rtt = Duration::from_secs_f64(avg_secs.max(0.0));
        }
    }
}

const ADAPTIVE_WINDOW: Duration = Duration::from_secs(300);
const ADAPTIVE_MAX_DELAY: Duration = Duration::from_secs(120);

/// Drives the heartbeat timer loop for one connection. Owns nothing about
/// the transport itself: it hands encoded frames to `outbound` and expects
/// the caller's reader task to forward [`ControlEvent`]s it observes via
/// `acks`.
pub struct HeartbeatManager {
    config: HeartbeatConfig,
    adapter: Arc<ProtocolAdapter>,
    stats: Arc<Mutex<HeartbeatStats>>,
    window: Mutex<SuccessRateWindow>,
}

impl HeartbeatManager {
    pub fn new(config: HeartbeatConfig, adapter: Arc<ProtocolAdapter>) -> Self {
        Self {
            config,
            adapter,
            stats: Arc::new(Mutex::new(HeartbeatStats::default())),
            window: Mutex::new(SuccessRateWindow::new(ADAPTIVE_WINDOW)),
        }
    }

    pub fn stats(&self) -> HeartbeatStats {
        *self.stats.lock()
    }

    fn next_interval(&self) -> Duration {
        if !self.config.adaptive {
            return self.config.interval;
        }
        let mut window = self.window.lock();
        let rate = window.success_rate(Instant::now().into_std());
        let base = SuccessRateWindow::multiplier_base(rate);
        let scaled = self.config.interval.mul_f64(base);
        scaled.min(ADAPTIVE_MAX_DELAY)
    }

    fn record_failure(&self) {
        self.stats.lock().failed += 1;
        self.window.lock().record(false, Instant::now().into_std());
    }

    /// Spawn the cooperative timer loop. `outbound` carries raw frame bytes
    /// to the connection's writer path; `acks` delivers control events
    /// observed by the reader task; `disconnect` signals an ack timeout.
    ///
    /// A heartbeat left unanswered past `config.timeout` fails the
    /// connection with [`DisconnectReason::HeartbeatTimeout`].
    pub fn spawn(
        self: Arc<Self>,
        outbound: mpsc::Sender<Bytes>,
        mut acks: mpsc::Receiver<ControlEvent>,
        disconnect: mpsc::Sender<DisconnectReason>,
        token: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            if !self.config.enabled {
                // Keep the outbound sender alive so the writer loop's
                // heartbeat arm stays quiescent rather than closed.
                token.cancelled().await;
                return;
            }

            let originates = matches!(
                self.config.mode,
                HeartbeatMode::Client | HeartbeatMode::Both
            );

            let mut last_sent_at: Option<Instant> = None;
            let mut awaiting_ack = false;
            let mut next_tick = Instant::now() + self.next_interval();
            // Placeholder deadline while no ack is outstanding; the arm
            // below is gated on `awaiting_ack`.
            let idle_deadline = || Instant::now() + Duration::from_secs(86400);

            loop {
                let ack_deadline = last_sent_at
                    .map(|sent| sent + self.config.timeout)
                    .unwrap_or_else(idle_deadline);

                tokio::select! {
                    _ = token.cancelled() => break,

                    _ = tokio::time::sleep_until(next_tick), if originates => {
                        if !awaiting_ack {
                            let frame = self.adapter.create_heartbeat();
                            last_sent_at = Some(Instant::now());
                            awaiting_ack = true;
                            self.stats.lock().sent += 1;
                            if outbound.send(Bytes::from(frame)).await.is_err() {
                                break;
                            }
                        }
                        next_tick = Instant::now() + self.next_interval();
                    }

                    _ = tokio::time::sleep_until(ack_deadline), if awaiting_ack => {
                        self.record_failure();
                        warn!(timeout = ?self.config.timeout, "heartbeat ack overdue");
                        let _ = disconnect.send(DisconnectReason::HeartbeatTimeout).await;
                        break;
                    }

                    event = acks.recv() => {
                        match event {
                            Some(ControlEvent::HeartbeatAck) => {
                                if let Some(sent_at) = last_sent_at.take() {
                                    let rtt = sent_at.elapsed();
                                    self.stats.lock().record_rtt(rtt);
                                    self.window.lock().record(true, Instant::now().into_std());
                                    debug!(?rtt, "heartbeat ack received");
                                }
                                awaiting_ack = false;
                            }
                            // Requests are answered by the reader task,
                            // which holds the request_id; nothing to do.
                            Some(ControlEvent::HeartbeatReq) => {}
                            None => break,
                        }
                    }
                }
            }
        })
    }
}
