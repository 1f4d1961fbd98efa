use super::source::FrameSource;
use crate::error::MediaError;
use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, trace};

pub const DEFAULT_CAPTURE_FPS: u32 = 8;
/// Highest rate a camera collaborator is driven at
pub const MAX_CAPTURE_FPS: u32 = 120;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchedulerStats {
    pub ticks: u64,
    pub frames_captured: u64,
    /// Ticks that produced no frame because analysis was paused
    pub frames_skipped: u64,
    pub capture_errors: u64,
}

/// Fixed-rate frame capture. Frames are only produced while both
/// `streaming` and `analyzing` are set.
pub struct FrameScheduler {
    source: Box<dyn FrameSource>,
    fps: u32,
    interval: Option<Interval>,
    streaming: bool,
    analyzing: bool,
    stats: SchedulerStats,
}

impl FrameScheduler {
    pub fn new(source: Box<dyn FrameSource>, fps: u32) -> Self {
        Self {
            source,
            fps: fps.clamp(1, MAX_CAPTURE_FPS),
            interval: None,
            streaming: false,
            analyzing: false,
            stats: SchedulerStats::default(),
        }
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    pub fn period(&self) -> Duration {
        Duration::from_micros(1_000_000 / self.fps as u64)
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn is_analyzing(&self) -> bool {
        self.analyzing
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats.clone()
    }

    /// Acquire the media stream and (re)start the capture timer. Calling it
    /// while running replaces the previous timer.
    pub async fn start(&mut self) -> Result<(), MediaError> {
        if !self.source.is_acquired() {
            self.source.acquire().await?;
        }

        let period = self.period();
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        if self.interval.replace(interval).is_some() {
            debug!("Capture timer replaced");
        }
        self.streaming = true;
        info!("Frame capture started at {} fps", self.fps);
        Ok(())
    }

    /// Stop the timer and release the media stream. Idempotent.
    pub fn stop(&mut self) {
        let was_running = self.interval.take().is_some();
        self.streaming = false;
        if self.source.is_acquired() {
            self.source.release();
        }
        if was_running {
            info!("Frame capture stopped");
        }
    }

    pub fn set_analyzing(&mut self, analyzing: bool) {
        if self.analyzing != analyzing {
            debug!("Analysis {}", if analyzing { "resumed" } else { "paused" });
        }
        self.analyzing = analyzing;
    }

    /// Change the rate, restarting the timer if it is running
    pub fn set_fps(&mut self, fps: u32) {
        self.fps = fps.clamp(1, MAX_CAPTURE_FPS);
        if self.interval.is_some() {
            let period = self.period();
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            self.interval = Some(interval);
        }
    }

    /// Resolves on the next capture tick; never resolves while stopped.
    /// Cancel-safe.
    pub async fn next_tick(&mut self) {
        match self.interval.as_mut() {
            Some(interval) => {
                interval.tick().await;
                self.stats.ticks += 1;
            }
            None => std::future::pending().await,
        }
    }

    /// Capture one frame for streaming, or `None` when streaming or analysis
    /// is off
    pub async fn capture_frame(&mut self) -> Result<Option<String>, MediaError> {
        if !(self.streaming && self.analyzing) {
            self.stats.frames_skipped += 1;
            trace!("Skipping capture (streaming={}, analyzing={})", self.streaming, self.analyzing);
            return Ok(None);
        }
        self.capture().await.map(Some)
    }

    /// Capture a single frame for calibration, independent of analysis.
    /// The camera is only held afterwards if streaming holds it.
    pub async fn capture_calibration_frame(&mut self) -> Result<String, MediaError> {
        if !self.source.is_acquired() {
            self.source.acquire().await?;
        }
        let frame = self.capture().await;
        if !self.streaming {
            self.source.release();
        }
        frame
    }

    async fn capture(&mut self) -> Result<String, MediaError> {
        match self.source.capture().await {
            Ok(frame) => {
                self.stats.frames_captured += 1;
                Ok(frame)
            }
            Err(e) => {
                self.stats.capture_errors += 1;
                Err(e)
            }
        }
    }
}

impl Drop for FrameScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
