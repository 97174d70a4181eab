//! Terminal progress output for the CLI.
//!
//! Pretty mode draws indicatif spinners on stderr; plain mode prints one line
//! per event. `Auto` picks pretty only on a TTY without `NO_COLOR`.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::IsTerminal;
use std::time::{Duration, Instant};

use crate::frame::{Frame, PixelLayout};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum UiMode {
    #[default]
    Auto,
    Plain,
    Pretty,
}

#[derive(Clone, Debug)]
pub struct Ui {
    pretty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool, no_color: bool) -> Self {
        let pretty = is_tty
            && match mode {
                UiMode::Pretty => true,
                UiMode::Auto => !no_color,
                UiMode::Plain => false,
            };
        Self { pretty }
    }

    /// Resolve `mode` against the current stderr and environment.
    pub fn detect(mode: UiMode) -> Self {
        let no_color = std::env::var_os("NO_COLOR").is_some();
        Self::new(mode, std::io::stderr().is_terminal(), no_color)
    }

    pub fn is_pretty(&self) -> bool {
        self.pretty
    }

    /// Report a named step. The step's duration is printed when the guard drops.
    pub fn stage(&self, name: &str) -> StageGuard {
        if self.pretty {
            let spinner = spinner("{spinner} {msg}");
            spinner.set_message(format!("{name}…"));
            StageGuard::new(name.to_string(), Some(spinner))
        } else {
            eprintln!("==> {}", name);
            StageGuard::new(name.to_string(), None)
        }
    }

    /// Live counter for frames pulled from a stream.
    pub fn frame_counter(&self) -> FrameCounter {
        let spinner = self
            .pretty
            .then(|| spinner("{spinner} {pos} frames {msg}"));
        FrameCounter {
            spinner,
            frames: 0,
            latency: Duration::ZERO,
            started: Instant::now(),
        }
    }
}

fn spinner(template: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_draw_target(ProgressDrawTarget::stderr());
    spinner.enable_steady_tick(Duration::from_millis(120));
    let style =
        ProgressStyle::with_template(template).unwrap_or_else(|_| ProgressStyle::default_spinner());
    spinner.set_style(style);
    spinner
}

pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
    failed: bool,
}

impl StageGuard {
    fn new(name: String, spinner: Option<ProgressBar>) -> Self {
        Self {
            name,
            start: Instant::now(),
            spinner,
            failed: false,
        }
    }

    /// Mark the stage as failed; the closing line shows a cross instead of a tick.
    pub fn fail(mut self) {
        self.failed = true;
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let mark = if self.failed { "✘" } else { "✔" };
        let message = format!(
            "{} {} ({})",
            mark,
            self.name,
            format_duration(self.start.elapsed())
        );
        if let Some(spinner) = &self.spinner {
            spinner.finish_with_message(message);
        } else {
            eprintln!("{message}");
        }
    }
}

pub struct FrameCounter {
    spinner: Option<ProgressBar>,
    frames: u64,
    /// Capture-to-display delay of the most recent frame.
    latency: Duration,
    started: Instant,
}

impl FrameCounter {
    pub fn record(&mut self, frame: &Frame) {
        self.frames += 1;
        self.latency = frame.age();
        let layout = match frame.layout() {
            PixelLayout::Rgb8 => "rgb",
            PixelLayout::Gray8 => "gray",
        };
        match &self.spinner {
            Some(spinner) => {
                spinner.set_position(self.frames);
                spinner.set_message(format!(
                    "{}x{} {} ({:.1} fps, {} behind capture)",
                    frame.width,
                    frame.height,
                    layout,
                    self.fps(),
                    format_duration(self.latency)
                ));
            }
            None => {
                if self.frames == 1 || self.frames % 30 == 0 {
                    eprintln!(
                        "frame {} {}x{} {} ({:.1} fps, {} behind capture)",
                        frame.sequence(),
                        frame.width,
                        frame.height,
                        layout,
                        self.fps(),
                        format_duration(self.latency)
                    );
                }
            }
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn latency(&self) -> Duration {
        self.latency
    }

    pub fn fps(&self) -> f64 {
        let secs = self.started.elapsed().as_secs_f64();
        if secs > 0.0 {
            self.frames as f64 / secs
        } else {
            0.0
        }
    }

    pub fn finish(self) {
        let message = format!(
            "{} frames displayed in {} ({:.1} fps)",
            self.frames,
            format_duration(self.started.elapsed()),
            self.fps()
        );
        match &self.spinner {
            Some(spinner) => spinner.finish_with_message(message),
            None => eprintln!("{message}"),
        }
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pretty_requires_a_tty() {
        assert!(!Ui::new(UiMode::Pretty, false, false).is_pretty());
        assert!(Ui::new(UiMode::Pretty, true, true).is_pretty());
        assert!(!Ui::new(UiMode::Auto, true, true).is_pretty());
        assert!(!Ui::new(UiMode::Plain, true, false).is_pretty());
    }

    #[test]
    fn plain_counter_tracks_frames() {
        let ui = Ui::new(UiMode::Plain, false, false);
        let mut counter = ui.frame_counter();
        let frame = Frame::from_gray(2, 2, vec![0; 4]).expect("gray frame");
        counter.record(&frame);
        counter.record(&frame);
        assert_eq!(counter.frames(), 2);
        counter.finish();
    }

    #[test]
    fn counter_reports_frame_latency() {
        let ui = Ui::new(UiMode::Plain, false, false);
        let mut counter = ui.frame_counter();
        let frame = Frame::from_gray(2, 2, vec![0; 4]).expect("gray frame");
        std::thread::sleep(Duration::from_millis(20));
        counter.record(&frame);
        assert!(counter.latency() >= Duration::from_millis(20));
    }

    #[test]
    fn duration_formatting() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
    }
}
