//! Render loop consuming the frame store.
//!
//! Runs opposite the network side: every tick it feeds the watchdog,
//! applies staged brightness, and paints either the latest external
//! frame or a locally generated fallback. Reboot requests staged by
//! the HTTP handlers are honored here, from render context, so the
//! shutdown is orderly rather than mid-request.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::GridcastError;
use crate::frame::Frame;
use crate::server::{PanelContext, RebootKind};

/// Target cadence of the loop; external frames arriving faster than
/// this are naturally coalesced by the store's single pending slot.
pub const TICK: Duration = Duration::from_millis(20);

// ── Seams ────────────────────────────────────────────────────────

/// Output device. Implementations range from real matrix hardware to
/// a terminal preview to a test recorder.
pub trait DisplaySink: Send {
    /// Paint the frame. `changed` lists the indices a delta touched;
    /// `None` means repaint everything.
    fn draw(&mut self, frame: &Frame, changed: Option<&[u16]>) -> Result<(), GridcastError>;

    fn set_brightness(&mut self, value: f32);
}

/// Fallback animation shown until the first external frame arrives.
///
/// The loop consults a single fallback; a host with more than one
/// local source (say a shader engine plus an idle animation) wraps
/// them in one implementation that picks the shader when it has
/// output and the idle animation otherwise.
pub trait FrameSource: Send {
    /// Produce the frame for `elapsed` time since start, or `None` to
    /// leave the panel dark.
    fn next_frame(&mut self, elapsed: Duration) -> Option<Frame>;
}

/// Hardware watchdog seam. Fed once per tick; a stalled loop stops
/// feeding and the device resets itself.
pub trait Watchdog: Send {
    fn feed(&mut self);
}

/// Watchdog for hosts without one.
pub struct NoopWatchdog;

impl Watchdog for NoopWatchdog {
    fn feed(&mut self) {}
}

/// A source that never produces a frame; the panel stays dark until
/// streamed to.
pub struct DarkSource;

impl FrameSource for DarkSource {
    fn next_frame(&mut self, _elapsed: Duration) -> Option<Frame> {
        None
    }
}

// ── RenderLoop ───────────────────────────────────────────────────

/// Why the loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderExit {
    /// Cancellation token fired.
    Cancelled,
    /// A reboot was requested; the caller performs it after shutdown.
    Reboot(RebootKind),
}

pub struct RenderLoop<D, S, W> {
    ctx: Arc<PanelContext>,
    sink: D,
    fallback: S,
    watchdog: W,
    tick: Duration,
}

impl<D: DisplaySink, S: FrameSource, W: Watchdog> RenderLoop<D, S, W> {
    pub fn new(ctx: Arc<PanelContext>, sink: D, fallback: S, watchdog: W) -> Self {
        Self {
            ctx,
            sink,
            fallback,
            watchdog,
            tick: TICK,
        }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Run until cancelled or a reboot is staged. The sink is returned
    /// with the exit reason so the caller can blank it before a reboot.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(D, RenderExit), GridcastError> {
        let started = tokio::time::Instant::now();
        let mut timer = tokio::time::interval(self.tick);
        info!(tick_ms = self.tick.as_millis() as u64, "render loop started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("render loop cancelled");
                    return Ok((self.sink, RenderExit::Cancelled));
                }
                _ = timer.tick() => {}
            }

            self.watchdog.feed();

            if let Some(value) = self.ctx.brightness.take_pending() {
                debug!(value, "applying brightness");
                self.sink.set_brightness(value);
            }

            if let Some(kind) = self.ctx.reboot.take() {
                info!(?kind, "reboot requested, leaving render loop");
                return Ok((self.sink, RenderExit::Reboot(kind)));
            }

            // External frames always win over the local fallback; the
            // fallback only runs until the first frame ever arrives.
            if let Some(update) = self.ctx.store.take_pending() {
                self.sink.draw(&update.pixels, update.changed.as_deref())?;
            } else if !self.ctx.store.has_frame() {
                if let Some(frame) = self.fallback.next_frame(started.elapsed()) {
                    self.sink.draw(&frame, None)?;
                }
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Rgb, FRAME_SIZE};
    use crate::server::gate::BootloaderGate;
    use crate::wire;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        draws: Arc<Mutex<Vec<(u8, Option<usize>)>>>,
        brightness: Arc<Mutex<Vec<f32>>>,
    }

    impl DisplaySink for Recorder {
        fn draw(&mut self, frame: &Frame, changed: Option<&[u16]>) -> Result<(), GridcastError> {
            self.draws
                .lock()
                .unwrap()
                .push((frame.as_bytes()[0], changed.map(|c| c.len())));
            Ok(())
        }
        fn set_brightness(&mut self, value: f32) {
            self.brightness.lock().unwrap().push(value);
        }
    }

    struct Pulse;
    impl FrameSource for Pulse {
        fn next_frame(&mut self, _elapsed: Duration) -> Option<Frame> {
            let mut f = Frame::black();
            f.set_pixel(0, Rgb { r: 1, g: 1, b: 1 });
            Some(f)
        }
    }

    fn ctx() -> Arc<PanelContext> {
        Arc::new(PanelContext::new(BootloaderGate::localhost_only()))
    }

    #[tokio::test(start_paused = true)]
    async fn external_frame_wins_over_fallback() {
        let ctx = ctx();
        let sink = Recorder::default();
        let draws = sink.draws.clone();
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(
            RenderLoop::new(ctx.clone(), sink, Pulse, NoopWatchdog).run(cancel.clone()),
        );

        // Fallback paints first.
        tokio::time::sleep(TICK * 3).await;
        assert!(draws.lock().unwrap().iter().any(|(b, _)| *b == 1));

        // One external frame, then the fallback must stay silent.
        let frame = wire::decode_full(&[7u8; FRAME_SIZE]).unwrap();
        ctx.store.offer_full(&frame);
        tokio::time::sleep(TICK * 3).await;
        draws.lock().unwrap().clear();
        tokio::time::sleep(TICK * 5).await;
        assert!(draws.lock().unwrap().is_empty(), "fallback ran after first frame");

        cancel.cancel();
        let (_, exit) = handle.await.unwrap().unwrap();
        assert_eq!(exit, RenderExit::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn brightness_applied_once() {
        let ctx = ctx();
        let sink = Recorder::default();
        let brightness = sink.brightness.clone();
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(
            RenderLoop::new(ctx.clone(), sink, DarkSource, NoopWatchdog).run(cancel.clone()),
        );

        ctx.brightness.set(0.3);
        tokio::time::sleep(TICK * 4).await;
        assert_eq!(brightness.lock().unwrap().as_slice(), &[0.3]);

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn reboot_request_exits_loop() {
        let ctx = ctx();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(
            RenderLoop::new(ctx.clone(), Recorder::default(), DarkSource, NoopWatchdog)
                .run(cancel.clone()),
        );

        ctx.reboot.request(RebootKind::Bootloader);
        tokio::time::sleep(TICK * 3).await;
        let (_, exit) = handle.await.unwrap().unwrap();
        assert_eq!(exit, RenderExit::Reboot(RebootKind::Bootloader));
        // The request was consumed on the way out.
        assert!(!ctx.reboot.pending());
    }

    #[tokio::test(start_paused = true)]
    async fn delta_changed_indices_reach_sink() {
        let ctx = ctx();
        let sink = Recorder::default();
        let draws = sink.draws.clone();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(
            RenderLoop::new(ctx.clone(), sink, DarkSource, NoopWatchdog).run(cancel.clone()),
        );

        let frame = wire::decode_full(&[0u8; FRAME_SIZE]).unwrap();
        ctx.store.offer_full(&frame);
        tokio::time::sleep(TICK * 2).await;

        let update = crate::frame::DeltaUpdate {
            entries: vec![crate::frame::DeltaEntry {
                index: 4,
                rgb: Rgb { r: 5, g: 5, b: 5 },
            }],
        };
        ctx.store.offer_delta(&update);
        tokio::time::sleep(TICK * 2).await;

        let recorded = draws.lock().unwrap();
        assert!(recorded.contains(&(0, None)));
        assert!(recorded.contains(&(0, Some(1))));
        drop(recorded);

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }
}
