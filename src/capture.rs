use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use image::{DynamicImage, ImageFormat, RgbaImage};
use log::{debug, info, warn};
use tiny_skia::{Color, Paint, PathBuilder, Pixmap, Stroke, Transform};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    Capture,
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSchedule {
    /// Zero disables capture ticks.
    pub capture_period: Duration,
    pub quit_after: Duration,
}

/// Deadlines of the repeating capture timer and the single-shot quit timer,
/// in firing order. A capture due at the same instant as quit fires first.
#[derive(Debug, Clone)]
pub struct TimerQueue {
    capture_period: Duration,
    quit_after: Duration,
    next_capture: Option<Duration>,
    quit_fired: bool,
}

impl TimerQueue {
    pub fn new(schedule: CaptureSchedule) -> Self {
        let next_capture = (!schedule.capture_period.is_zero()).then_some(schedule.capture_period);
        Self {
            capture_period: schedule.capture_period,
            quit_after: schedule.quit_after,
            next_capture,
            quit_fired: false,
        }
    }
}

impl Iterator for TimerQueue {
    type Item = (Duration, TimerEvent);

    fn next(&mut self) -> Option<Self::Item> {
        if self.quit_fired {
            return None;
        }
        match self.next_capture {
            Some(at) if at <= self.quit_after => {
                self.next_capture = at.checked_add(self.capture_period);
                Some((at, TimerEvent::Capture))
            }
            _ => {
                self.quit_fired = true;
                Some((self.quit_after, TimerEvent::Quit))
            }
        }
    }
}

pub trait Clock {
    /// Time since the scheduler started.
    fn elapsed(&self) -> Duration;
    fn sleep(&mut self, duration: Duration);
}

pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    fn sleep(&mut self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Something that can be drawn offscreen at an arbitrary size.
pub trait SnapshotView {
    fn render(&mut self, width: u32, height: u32) -> Result<RgbaImage>;
}

/// The capture container: a solid background with the chart wheel outline.
#[derive(Debug, Clone, Copy)]
pub struct BackdropView {
    background: [u8; 3],
}

impl BackdropView {
    pub fn new(background: [u8; 3]) -> Self {
        Self { background }
    }
}

impl SnapshotView for BackdropView {
    fn render(&mut self, width: u32, height: u32) -> Result<RgbaImage> {
        let mut pixmap = Pixmap::new(width, height)
            .ok_or_else(|| anyhow!("invalid snapshot size {}x{}", width, height))?;
        let [r, g, b] = self.background;
        pixmap.fill(Color::from_rgba8(r, g, b, 255));

        let mut paint = Paint::default();
        paint.set_color_rgba8(255, 255, 255, 255);
        paint.anti_alias = true;
        let outer = width.min(height) as f32 * 0.45;
        let stroke = Stroke {
            width: (outer / 60.0).max(1.0),
            ..Stroke::default()
        };
        // Zodiac ring and house ring.
        for radius in [outer, outer * 0.6] {
            if let Some(ring) =
                PathBuilder::from_circle(width as f32 / 2.0, height as f32 / 2.0, radius)
            {
                pixmap.stroke_path(&ring, &paint, &stroke, Transform::identity(), None);
            }
        }

        RgbaImage::from_raw(width, height, pixmap.take())
            .ok_or_else(|| anyhow!("snapshot buffer does not match {}x{}", width, height))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureTarget {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureReport {
    pub captures: u32,
    pub failures: u32,
}

/// Renders `view` and overwrites the target image. The encoding follows the
/// file extension, PNG when there is none.
pub fn capture_once(view: &mut dyn SnapshotView, target: &CaptureTarget) -> Result<()> {
    let image = view.render(target.width, target.height)?;
    write_snapshot(&target.path, image)
}

fn write_snapshot(path: &Path, image: RgbaImage) -> Result<()> {
    let format = ImageFormat::from_path(path).unwrap_or(ImageFormat::Png);
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let result = match format {
        ImageFormat::Jpeg => DynamicImage::ImageRgba8(image)
            .to_rgb8()
            .save_with_format(path, format),
        _ => image.save_with_format(path, format),
    };
    result.with_context(|| format!("failed to write snapshot {}", path.display()))
}

/// Drives the capture and quit timers on the calling thread until quit fires.
pub struct CaptureScheduler {
    schedule: CaptureSchedule,
    target: CaptureTarget,
}

impl CaptureScheduler {
    pub fn new(schedule: CaptureSchedule, target: CaptureTarget) -> Self {
        Self { schedule, target }
    }

    /// A failed capture is logged and the next tick tries again.
    pub fn run(&self, view: &mut dyn SnapshotView, clock: &mut dyn Clock) -> CaptureReport {
        let mut report = CaptureReport::default();
        info!(
            "capturing {}x{} to {} every {:?}, quitting after {:?}",
            self.target.width,
            self.target.height,
            self.target.path.display(),
            self.schedule.capture_period,
            self.schedule.quit_after
        );

        for (deadline, event) in TimerQueue::new(self.schedule) {
            let now = clock.elapsed();
            if deadline > now {
                clock.sleep(deadline - now);
            }
            match event {
                TimerEvent::Capture => match capture_once(view, &self.target) {
                    Ok(()) => {
                        report.captures += 1;
                        debug!("snapshot {} written", report.captures);
                    }
                    Err(error) => {
                        report.failures += 1;
                        warn!("snapshot failed: {error:#}");
                    }
                },
                TimerEvent::Quit => {
                    info!(
                        "quit timer fired after {} snapshot(s)",
                        report.captures
                    );
                    break;
                }
            }
        }
        report
    }
}
