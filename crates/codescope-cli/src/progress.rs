//! Progress feedback for CLI commands.
//!
//! One [`StatusLine`] per long-running command: a spinner that the command
//! updates as pipeline phases change and resolves as done or failed. Silent
//! when the user asked for --quiet or --json output, in which case every
//! method is a no-op.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

/// Spinner animation frames.
const FRAMES: &str = "◐◓◑◒·";

/// Animation period.
const TICK: Duration = Duration::from_millis(120);

/// A status line for one long-running command.
///
/// Cloning shares the underlying bar, so a progress callback can update the
/// same line the command later resolves.
#[derive(Clone)]
pub struct StatusLine {
    bar: Option<ProgressBar>,
}

impl StatusLine {
    /// Start a spinner, or a silent no-op line under --quiet/--json.
    pub fn start(message: impl Into<String>, silent: bool) -> Self {
        if silent {
            return Self { bar: None };
        }
        let bar = ProgressBar::new_spinner().with_message(message.into());
        bar.set_style(
            ProgressStyle::with_template("{spinner:.green} {msg} [{elapsed}]")
                .expect("status line template")
                .tick_chars(FRAMES),
        );
        bar.enable_steady_tick(TICK);
        Self { bar: Some(bar) }
    }

    /// Whether this line renders anything.
    pub fn is_silent(&self) -> bool {
        self.bar.is_none()
    }

    /// Replace the message while the spinner keeps running.
    pub fn update(&self, message: impl Into<String>) {
        if let Some(bar) = &self.bar {
            bar.set_message(message.into());
        }
    }

    /// Resolve the line successfully.
    pub fn done(&self, message: impl Into<String>) {
        if let Some(bar) = &self.bar {
            bar.finish_with_message(format!("✔ {}", message.into()));
        }
    }

    /// Resolve the line as failed, keeping the message visible.
    pub fn fail(&self, message: impl Into<String>) {
        if let Some(bar) = &self.bar {
            bar.abandon_with_message(format!("✖ {}", message.into()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silent_under_quiet() {
        let status = StatusLine::start("working", true);
        assert!(status.is_silent());
    }

    #[test]
    fn visible_when_not_quiet() {
        let status = StatusLine::start("working", false);
        assert!(!status.is_silent());
        status.done("finished");
    }

    #[test]
    fn silent_line_ignores_every_call() {
        let status = StatusLine::start("working", true);
        status.update("still working");
        status.done("finished");
        status.fail("never rendered");
        assert!(status.is_silent());
    }

    #[test]
    fn clones_share_the_line() {
        let status = StatusLine::start("working", false);
        let shared = status.clone();
        shared.update("phase two");
        assert!(!shared.is_silent());
        status.done("finished");
    }

    #[test]
    fn fail_resolves_without_panicking() {
        let status = StatusLine::start("working", false);
        status.fail("broke");
    }
}
