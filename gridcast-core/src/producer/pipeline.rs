//! The producer pipeline: capture intake on one side, a sender task
//! on the other, one frame slot in between.
//!
//! Shutdown is two-phase. Phase one stops admitting captures so the
//! slot drains naturally; phase two cancels the sender, waits a
//! bounded time for its in-flight request, then closes the sockets.
//! The host network stack itself is released only when this producer
//! owns it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::GridcastError;
use crate::producer::capture::{downsample, CaptureSlot, CaptureThrottle, SourceFrame};
use crate::producer::encoder::{FrameEncoder, Outgoing};
use crate::producer::transport::{NetOwnership, PanelClient};

/// How long phase two waits for the sender's in-flight request.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Rate the capture callback fires at.
    pub host_fps: u32,
    /// Rate frames should reach the panel at.
    pub target_fps: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            host_fps: 60,
            target_fps: 30,
        }
    }
}

// ── StreamService ────────────────────────────────────────────────

/// A running producer. Capture callbacks feed [`offer_capture`]
/// (cheap, never blocks on the network); an owned task drains the
/// slot toward the panel.
///
/// [`offer_capture`]: StreamService::offer_capture
pub struct StreamService {
    slot: Arc<CaptureSlot>,
    accepting: Arc<AtomicBool>,
    throttle: Mutex<CaptureThrottle>,
    cancel: CancellationToken,
    sender: JoinHandle<PanelClient>,
}

impl StreamService {
    /// Spawn the sender task over an already-connected client.
    pub fn start(client: PanelClient, config: StreamConfig) -> Self {
        let slot = Arc::new(CaptureSlot::new());
        let cancel = CancellationToken::new();
        // Rates above 1000 fps would floor to a zero tick, which the
        // interval timer rejects; the sender just runs every 1 ms.
        let tick = Duration::from_millis((1000 / config.target_fps.max(1) as u64).max(1));
        let sender = tokio::spawn(run_sender(slot.clone(), client, tick, cancel.clone()));
        info!(
            host_fps = config.host_fps,
            target_fps = config.target_fps,
            "stream service started"
        );
        Self {
            slot,
            accepting: Arc::new(AtomicBool::new(true)),
            throttle: Mutex::new(CaptureThrottle::new(config.host_fps, config.target_fps)),
            cancel,
            sender,
        }
    }

    /// Capture-side entry point. Returns whether the frame made it
    /// into the slot (throttled, shut-down and overrun frames do not,
    /// and none of those are errors).
    pub fn offer_capture(&self, source: &SourceFrame) -> Result<bool, GridcastError> {
        if !self.accepting.load(Ordering::Acquire) {
            return Ok(false);
        }
        if !self.throttle.lock().expect("throttle poisoned").admit() {
            return Ok(false);
        }
        let frame = downsample(source)?;
        Ok(self.slot.offer(frame))
    }

    /// Orderly stop; returns once everything is down or the grace
    /// period expires.
    pub async fn shutdown(self) -> Result<(), GridcastError> {
        // Phase one: no new work.
        self.accepting.store(false, Ordering::Release);
        debug!("capture intake stopped");

        // Phase two: stop the sender, bounded wait for its in-flight
        // request, then drop the sockets.
        self.cancel.cancel();
        let mut client = match tokio::time::timeout(SHUTDOWN_GRACE, self.sender).await {
            Ok(Ok(client)) => client,
            Ok(Err(e)) => {
                warn!(error = %e, "sender task panicked");
                return Err(GridcastError::ChannelClosed);
            }
            Err(_) => {
                warn!("sender did not stop in time");
                return Err(GridcastError::Timeout(SHUTDOWN_GRACE));
            }
        };
        client.close();
        match client.ownership() {
            NetOwnership::Owned => {
                info!("releasing network stack");
                // Socket teardown above is the release on hosted
                // targets; embedded hosts hook deinit here.
            }
            NetOwnership::Borrowed => debug!("leaving borrowed network up"),
        }
        info!("stream service stopped");
        Ok(())
    }
}

/// Sender task body: drain the slot at the target cadence.
async fn run_sender(
    slot: Arc<CaptureSlot>,
    mut client: PanelClient,
    tick: Duration,
    cancel: CancellationToken,
) -> PanelClient {
    let mut encoder = FrameEncoder::new();
    let mut timer = tokio::time::interval(tick);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return client,
            _ = timer.tick() => {}
        }
        let Some(frame) = slot.take() else {
            continue;
        };
        let outgoing = encoder.encode(&frame);
        if matches!(outgoing, Outgoing::Unchanged) {
            continue;
        }
        match client.send(&outgoing).await {
            Ok(path) => debug!(?path, "frame shipped"),
            Err(GridcastError::PanelRejected(reason)) => {
                // Panel busy: the next capture supersedes this one.
                debug!(reason, "panel refused frame");
            }
            Err(e) => {
                // Hard failure. The panel's display state is unknown
                // now, so the next success must re-baseline.
                debug!(error = %e, "send failed, will resend full frame");
                encoder.reset();
            }
        }
    }
}
