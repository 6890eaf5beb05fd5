//! Progress reporting for firmware upgrades.
//! Terminal rendering of the percentages a transport reports while flashing.

use std::io::{self, IsTerminal, Write};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Progress indicator types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressStyle {
    /// Simple percentage display
    Percentage,
    /// Progress bar with percentage
    ProgressBar,
    /// Silent mode (no visual indicator)
    Silent,
}

/// Progress reporter for long-running device operations
pub trait ProgressReporter: Send + Sync {
    /// Update progress with a percentage in `[0.0, 100.0]`
    fn update(&self, percent: f32);

    /// Set the current status message
    fn set_message(&self, message: &str);

    /// Mark the operation as completed
    fn finish(&self);

    /// Mark the operation as failed with error message
    fn finish_with_error(&self, error: &str);
}

/// Adapt a reporter to the `FnMut(f32)` callback transports expect.
pub fn progress_callback(reporter: Arc<dyn ProgressReporter>) -> impl FnMut(f32) + Send {
    move |percent| reporter.update(percent.clamp(0.0, 100.0))
}

/// Terminal-based progress indicator
pub struct TerminalProgress {
    style: ProgressStyle,
    start_time: Instant,
    last_render: Mutex<Option<Instant>>,
    current_message: Mutex<String>,
    is_finished: Mutex<bool>,
    bar_width: usize,
}

impl TerminalProgress {
    /// Create a new terminal progress indicator
    #[must_use]
    pub fn new(style: ProgressStyle) -> Self {
        Self {
            style,
            start_time: Instant::now(),
            last_render: Mutex::new(None),
            current_message: Mutex::new(String::new()),
            is_finished: Mutex::new(false),
            bar_width: 40,
        }
    }

    /// Create progress indicator with custom bar width
    #[must_use]
    pub fn with_bar_width(style: ProgressStyle, width: usize) -> Self {
        let mut progress = Self::new(style);
        progress.bar_width = width;
        progress
    }

    fn render(&self, percent: f32) {
        if *lock(&self.is_finished) {
            return;
        }

        // Throttle redraws, but always draw the final state
        {
            let mut last = lock(&self.last_render);
            let now = Instant::now();
            if percent < 100.0
                && last.is_some_and(|t| now.duration_since(t) < Duration::from_millis(100))
            {
                return;
            }
            *last = Some(now);
        }

        let message = lock(&self.current_message).clone();
        let line = match self.style {
            ProgressStyle::Percentage => format!("\r{message} - {percent:.0}%"),
            ProgressStyle::ProgressBar => format!(
                "\r{message} [{}] {percent:.1}% - {:.1}s",
                render_bar(self.bar_width, percent),
                self.start_time.elapsed().as_secs_f64()
            ),
            ProgressStyle::Silent => return,
        };

        let mut stdout = io::stdout();
        let _ = write!(stdout, "{line}");
        let _ = stdout.flush();
    }

    fn clear_line(&self) {
        if self.style == ProgressStyle::Silent {
            return;
        }
        let mut stdout = io::stdout();
        let _ = write!(stdout, "\r{}\r", " ".repeat(self.bar_width + 40));
        let _ = stdout.flush();
    }
}

impl ProgressReporter for TerminalProgress {
    fn update(&self, percent: f32) {
        self.render(percent);
    }

    fn set_message(&self, message: &str) {
        *lock(&self.current_message) = message.to_string();
    }

    fn finish(&self) {
        *lock(&self.is_finished) = true;
        self.clear_line();
        if self.style != ProgressStyle::Silent {
            println!(
                "[+] {} - Completed in {:.1}s",
                lock(&self.current_message),
                self.start_time.elapsed().as_secs_f64()
            );
        }
    }

    fn finish_with_error(&self, error: &str) {
        *lock(&self.is_finished) = true;
        self.clear_line();
        if self.style != ProgressStyle::Silent {
            println!(
                "[!] {} - Failed after {:.1}s: {error}",
                lock(&self.current_message),
                self.start_time.elapsed().as_secs_f64()
            );
        }
    }
}

/// Null progress reporter for silent operations
pub struct NullProgress;

impl ProgressReporter for NullProgress {
    fn update(&self, _percent: f32) {}
    fn set_message(&self, _message: &str) {}
    fn finish(&self) {}
    fn finish_with_error(&self, _error: &str) {}
}

/// Pick a reporter: terminal output when stdout is a terminal, silent otherwise.
#[must_use]
pub fn create_reporter(style: ProgressStyle) -> Arc<dyn ProgressReporter> {
    if style != ProgressStyle::Silent && io::stdout().is_terminal() {
        Arc::new(TerminalProgress::new(style))
    } else {
        Arc::new(NullProgress)
    }
}

/// Filled/empty bar for a percentage.
#[must_use]
pub fn render_bar(width: usize, percent: f32) -> String {
    let fraction = f64::from(percent.clamp(0.0, 100.0)) / 100.0;
    #[allow(clippy::cast_sign_loss)]
    let filled = ((width as f64 * fraction).round() as usize).min(width);
    format!("{}{}", "█".repeat(filled), "░".repeat(width - filled))
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}
