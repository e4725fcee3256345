//! Startup progress for `sentryd`.
//!
//! Each startup step (load config, load detector, open output, connect) runs
//! inside a `Stage`. On a terminal the stage shows a spinner; otherwise it
//! prints `==> step` / `ok step (12ms)` lines to stderr. A stage that is
//! dropped without `finish()` is reported as failed.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::IsTerminal;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum UiMode {
    /// Spinners on a terminal, plain lines otherwise.
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
    pub fn new(mode: UiMode, is_tty: bool) -> Self {
        let pretty = is_tty
            && match mode {
                UiMode::Pretty => true,
                UiMode::Auto => std::env::var_os("NO_COLOR").is_none(),
                UiMode::Plain => false,
            };
        Self { pretty }
    }

    /// Detect whether stderr is a terminal.
    pub fn for_stderr(mode: UiMode) -> Self {
        Self::new(mode, std::io::stderr().is_terminal())
    }

    pub fn is_pretty(&self) -> bool {
        self.pretty
    }

    pub fn stage(&self, name: &str) -> Stage {
        let spinner = if self.pretty {
            let spinner = ProgressBar::new_spinner();
            spinner.set_draw_target(ProgressDrawTarget::stderr());
            spinner.enable_steady_tick(Duration::from_millis(120));
            let style = ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            spinner.set_style(style);
            spinner.set_message(format!("{name}…"));
            Some(spinner)
        } else {
            eprintln!("==> {}", name);
            None
        };
        Stage {
            name: name.to_string(),
            start: Instant::now(),
            spinner,
            done: false,
        }
    }
}

pub struct Stage {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
    done: bool,
}

impl Stage {
    /// Mark the step as completed, optionally with a detail such as a backend name.
    pub fn finish(mut self, detail: Option<&str>) {
        self.done = true;
        let elapsed = format_duration(self.start.elapsed());
        let message = match detail {
            Some(detail) => format!("✔ {}: {} ({})", self.name, detail, elapsed),
            None => format!("✔ {} ({})", self.name, elapsed),
        };
        self.report(message);
    }

    fn report(&self, message: String) {
        match &self.spinner {
            Some(spinner) => spinner.finish_with_message(message),
            None => eprintln!("{message}"),
        }
    }
}

impl Drop for Stage {
    fn drop(&mut self) {
        if !self.done {
            let message = format!(
                "✘ {} ({})",
                self.name,
                format_duration(self.start.elapsed())
            );
            self.report(message);
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
    fn plain_mode_never_uses_spinners() {
        assert!(!Ui::new(UiMode::Plain, true).is_pretty());
        assert!(!Ui::new(UiMode::Pretty, false).is_pretty());
        assert!(Ui::new(UiMode::Pretty, true).is_pretty());
    }

    #[test]
    fn durations_are_human_readable() {
        assert_eq!(format_duration(Duration::from_millis(42)), "42ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
    }
}
