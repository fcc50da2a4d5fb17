//! Terminal output for `sentimod`.
//!
//! One `Console` covers the whole run: startup stages first, then a live
//! status line for the published state. In pretty mode both share a single
//! spinner line; finished stages are printed above it. Plain mode writes one
//! stderr line per stage and per change of state.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

use crate::overlay::status_line;
use crate::publish::Observation;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UiMode {
    #[default]
    Auto,
    Plain,
    Pretty,
}

impl UiMode {
    /// `--ui` value; anything unrecognised falls back to `Auto`.
    pub fn from_flag(flag: Option<&str>) -> Self {
        match flag {
            Some("plain") => UiMode::Plain,
            Some("pretty") => UiMode::Pretty,
            _ => UiMode::Auto,
        }
    }

    /// Whether to draw a spinner line. Never without a terminal; `Auto`
    /// also backs off when `NO_COLOR` is set.
    pub fn wants_spinner(self, is_tty: bool, no_color: bool) -> bool {
        is_tty
            && match self {
                UiMode::Pretty => true,
                UiMode::Auto => !no_color,
                UiMode::Plain => false,
            }
    }
}

pub struct Console {
    line: Option<ProgressBar>,
    last_text: String,
    last_version: Option<u64>,
}

impl Console {
    pub fn new(mode: UiMode, is_tty: bool, no_color: bool) -> Self {
        let line = mode.wants_spinner(is_tty, no_color).then(live_line);
        Self {
            line,
            last_text: String::new(),
            last_version: None,
        }
    }

    pub fn is_pretty(&self) -> bool {
        self.line.is_some()
    }

    /// Announce a startup stage. Dropping the guard reports how long it took.
    pub fn stage(&self, name: &str) -> Stage<'_> {
        match &self.line {
            Some(line) => line.set_message(format!("{name}…")),
            None => eprintln!("==> {name}"),
        }
        Stage {
            console: self,
            name: name.to_string(),
            started: Instant::now(),
        }
    }

    /// Render `observation` if it is newer than what is on screen and reads
    /// differently. Returns `true` when something was drawn.
    pub fn show(&mut self, observation: &Observation) -> bool {
        if self.last_version == Some(observation.version) {
            return false;
        }
        self.last_version = Some(observation.version);
        let text = status_line(observation);
        if text == self.last_text {
            return false;
        }
        match &self.line {
            Some(line) => line.set_message(text.clone()),
            None => eprintln!("{text}"),
        }
        self.last_text = text;
        true
    }

    pub fn finish(self, summary: &str) {
        match &self.line {
            Some(line) => line.finish_with_message(summary.to_string()),
            None => eprintln!("{summary}"),
        }
    }

    fn note(&self, text: String) {
        match &self.line {
            Some(line) => line.println(text),
            None => eprintln!("{text}"),
        }
    }
}

pub struct Stage<'a> {
    console: &'a Console,
    name: String,
    started: Instant,
}

impl Drop for Stage<'_> {
    fn drop(&mut self) {
        let took = elapsed_label(self.started.elapsed());
        self.console.note(format!("✔ {} ({})", self.name, took));
    }
}

fn live_line() -> ProgressBar {
    let line = ProgressBar::new_spinner();
    line.set_draw_target(ProgressDrawTarget::stderr());
    line.set_style(
        ProgressStyle::with_template("{spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    line.enable_steady_tick(Duration::from_millis(120));
    line
}

fn elapsed_label(elapsed: Duration) -> String {
    match elapsed.as_millis() {
        ms if ms < 1_000 => format!("{ms}ms"),
        _ => format!("{:.1}s", elapsed.as_secs_f64()),
    }
}
