//! Progress rendering for a followed training run.
//!
//! On a terminal the run gets an indicatif bar with trainer output printed
//! above it. Otherwise progress is written as throttled, timestamped lines.

use std::fmt::Write as _;
use std::io::{self, IsTerminal};
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use tagtrack_core::{JobState, ProgressRecord};

/// Longest run name shown before truncation.
const MAX_LABEL: usize = 32;

/// Minimum gap between two plain progress lines.
const PLAIN_INTERVAL: Duration = Duration::from_secs(2);

/// Progress display that picks terminal or plain output.
pub struct TrainingProgressPrinter {
    inner: ProgressRender,
}

enum ProgressRender {
    Fancy(FancyProgress),
    Plain(PlainProgress),
}

impl TrainingProgressPrinter {
    /// Printer for the run called `label`, detecting terminal support.
    pub fn new(label: &str) -> Self {
        let label = format_label(label);
        let inner = if io::stdout().is_terminal() {
            ProgressRender::Fancy(FancyProgress::new(label))
        } else {
            ProgressRender::Plain(PlainProgress::new(label))
        };
        Self { inner }
    }

    /// Print one line of trainer output.
    pub fn log(&self, line: &str) {
        match &self.inner {
            ProgressRender::Fancy(inner) => inner.bar.println(line),
            ProgressRender::Plain(_) => println!("{line}"),
        }
    }

    /// Print a status message that is not trainer output.
    pub fn note(&self, message: &str) {
        match &self.inner {
            ProgressRender::Fancy(inner) => inner.bar.println(format!("» {message}")),
            ProgressRender::Plain(inner) => inner.emit(message),
        }
    }

    pub fn update(&mut self, record: &ProgressRecord) {
        match &mut self.inner {
            ProgressRender::Fancy(inner) => inner.update(record),
            ProgressRender::Plain(inner) => inner.update(record),
        }
    }

    /// Tear down the display after the run reached `state`.
    pub fn finish(&mut self, state: JobState) {
        match &mut self.inner {
            ProgressRender::Fancy(inner) => inner.finish(state),
            ProgressRender::Plain(inner) => inner.emit(&format!("finished: {state}")),
        }
    }
}

struct FancyProgress {
    bar: ProgressBar,
    label: String,
    saw_total: bool,
}

impl FancyProgress {
    fn new(label: String) -> Self {
        let bar = ProgressBar::with_draw_target(None, ProgressDrawTarget::stdout());
        bar.set_style(spinner_style());
        bar.set_message(format!("{label} (waiting for trainer)"));
        bar.enable_steady_tick(Duration::from_millis(120));
        Self {
            bar,
            label,
            saw_total: false,
        }
    }

    fn update(&mut self, record: &ProgressRecord) {
        if !self.saw_total && record.total_steps > 0 {
            self.bar.set_style(bar_style());
            self.saw_total = true;
        }
        if record.total_steps > 0 && self.bar.length() != Some(record.total_steps) {
            self.bar.set_length(record.total_steps);
        }
        self.bar.set_position(record.step);
        self.bar
            .set_message(format!("{} {}", self.label, describe_progress(record)));
    }

    fn finish(&self, state: JobState) {
        match state {
            JobState::Completed => self.bar.finish_with_message(format!("{} done", self.label)),
            _ => self.bar.abandon_with_message(format!("{} {state}", self.label)),
        }
    }
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner} {msg}").unwrap_or_else(|_| ProgressStyle::default_spinner())
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template("{bar:28.cyan/blue} {pos:>6}/{len:6} ({percent:>3}%) {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}

struct PlainProgress {
    label: String,
    last_emit: Option<Instant>,
}

impl PlainProgress {
    const fn new(label: String) -> Self {
        Self {
            label,
            last_emit: None,
        }
    }

    fn update(&mut self, record: &ProgressRecord) {
        let now = Instant::now();
        let last_step = record.total_steps > 0 && record.step >= record.total_steps;
        if !last_step
            && self
                .last_emit
                .is_some_and(|last| now.duration_since(last) < PLAIN_INTERVAL)
        {
            return;
        }
        self.last_emit = Some(now);

        let mut line = format!("step {}/{}", record.step, record.total_steps);
        if let Some(fraction) = record.fraction() {
            let _ = write!(line, " ({:.1}%)", fraction * 100.0);
        }
        let details = describe_progress(record);
        if !details.is_empty() {
            let _ = write!(line, " {details}");
        }
        self.emit(&line);
    }

    fn emit(&self, message: &str) {
        let now = chrono::Local::now();
        println!("[{}] {}: {message}", now.format("%H:%M:%S"), self.label);
    }
}

/// Epoch, loss, speed and ETA of `record`, leaving out what is unknown.
pub fn describe_progress(record: &ProgressRecord) -> String {
    let mut parts = Vec::new();
    match (record.epoch, record.total_epochs) {
        (Some(epoch), Some(total)) => parts.push(format!("epoch {epoch}/{total}")),
        (Some(epoch), None) => parts.push(format!("epoch {epoch}")),
        _ => {}
    }
    if let Some(loss) = record.loss {
        parts.push(format!("loss {loss:.4}"));
    }
    if let Some(lr) = record.lr {
        parts.push(format!("lr {lr:.1e}"));
    }
    if let Some(ips) = record.ips {
        parts.push(format!("{ips:.2} it/s"));
    }
    if let Some(eta) = record.eta_secs {
        parts.push(format!("ETA {}", format_eta(eta)));
    }
    parts.join(" | ")
}

/// `m:ss`, or `h:mm:ss` from an hour up.
pub fn format_eta(secs: u64) -> String {
    let (hours, rest) = (secs / 3600, secs % 3600);
    let (minutes, seconds) = (rest / 60, rest % 60);
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}

fn format_label(raw: &str) -> String {
    if raw.chars().count() <= MAX_LABEL {
        return raw.to_string();
    }
    let mut label: String = raw.chars().take(MAX_LABEL - 1).collect();
    label.push('…');
    label
}
