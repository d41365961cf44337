use std::time::{Duration, Instant};

/// Longest step handed to the renderer; a stalled frame (window drag,
/// breakpoint) must not fling particles across the scene.
const MAX_FRAME_STEP: f32 = 0.1;
const REPORT_INTERVAL: Duration = Duration::from_secs(5);

/// Frame delta and periodic frame-rate logging for the demo loop.
pub struct FrameTimer {
    start: Instant,
    last_frame: Instant,
    last_report: Instant,
    frames_since_report: u32,
}

impl FrameTimer {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_frame: now,
            last_report: now,
            frames_since_report: 0,
        }
    }

    /// Seconds since the previous call, clamped to [`MAX_FRAME_STEP`].
    pub fn tick(&mut self) -> f32 {
        let now = Instant::now();
        let dt = now.duration_since(self.last_frame).as_secs_f32();
        self.last_frame = now;

        self.frames_since_report += 1;
        let since_report = now.duration_since(self.last_report);
        if since_report >= REPORT_INTERVAL {
            let fps = self.frames_since_report as f32 / since_report.as_secs_f32();
            log::info!("{fps:.1} fps");
            self.frames_since_report = 0;
            self.last_report = now;
        }

        dt.min(MAX_FRAME_STEP)
    }

    pub fn elapsed(&self) -> f32 {
        self.start.elapsed().as_secs_f32()
    }
}

impl Default for FrameTimer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_tick_is_small_and_clamped() {
        let mut timer = FrameTimer::new();
        let dt = timer.tick();
        assert!((0.0..=MAX_FRAME_STEP).contains(&dt));
    }
}
