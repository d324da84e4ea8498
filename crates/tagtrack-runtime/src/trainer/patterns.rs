//! Progress extraction from trainer output.
//!
//! A [`PatternTable`] is an ordered list of `(regex, field)` rules. For each
//! line, the first rule that matches a field wins; later rules for the same
//! field are skipped. [`ProgressTracker`] turns the per-line fields into
//! [`ProgressRecord`]s, carrying forward the last known values.
//!
//! Trainers print more than one tqdm bar (caching, sample generation), so
//! only the training bar counts as a step, and a step never goes backwards.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;
use tracing::debug;

use tagtrack_core::ProgressRecord;

/// Which part of a progress record a pattern extracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressField {
    /// `(\d+)` current step, optionally `(\d+)` total.
    Step,
    /// `(\d+)` current epoch, optionally `(\d+)` total.
    Epoch,
    /// Remaining whole seconds.
    EtaSeconds,
    /// Remaining time as `MM:SS` or `HH:MM:SS`.
    EtaClock,
    /// Iterations per second.
    Throughput,
    /// Seconds per iteration, inverted into throughput.
    SecondsPerIteration,
    Loss,
    LearningRate,
}

#[derive(Debug, Error)]
pub enum PatternError {
    #[error("Invalid progress pattern {pattern:?}: {source}")]
    Invalid {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Fields extracted from a single line.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LineFields {
    pub step: Option<(u64, Option<u64>)>,
    pub epoch: Option<(u32, Option<u32>)>,
    pub eta_secs: Option<u64>,
    pub ips: Option<f64>,
    pub loss: Option<f64>,
    pub lr: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct PatternTable {
    rules: Vec<(Regex, ProgressField)>,
}

impl PatternTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rule. Rules added earlier take precedence.
    pub fn with(mut self, pattern: &str, field: ProgressField) -> Result<Self, PatternError> {
        let regex = Regex::new(pattern).map_err(|source| PatternError::Invalid {
            pattern: pattern.to_string(),
            source,
        })?;
        self.rules.push((regex, field));
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Musubi-Tuner output: its own `step X/Y` log lines plus the `steps:`
    /// tqdm bar.
    pub fn musubi() -> Result<Self, PatternError> {
        const NUM: &str = r"(\d+(?:\.\d+)?(?:[eE][-+]?\d+)?)";
        Self::new()
            .with(r"(?i)\bstep\s+(\d+)\s*/\s*(\d+)", ProgressField::Step)?
            .with(r"(?i)\bsteps:.*?(\d+)/(\d+)\s*\[", ProgressField::Step)?
            .with(r"(?i)\bepoch\s+(\d+)\s*/\s*(\d+)", ProgressField::Epoch)?
            .with(r"\bETA\s+(\d+)s\b", ProgressField::EtaSeconds)?
            .with(r"\bETA:?\s*(\d+(?::\d{2}){1,2})", ProgressField::EtaClock)?
            .with(r"<(\d+(?::\d{2}){1,2})", ProgressField::EtaClock)?
            .with(&format!(r"\bips\s*=\s*{NUM}"), ProgressField::Throughput)?
            .with(&format!(r"{NUM}\s*it/s"), ProgressField::Throughput)?
            .with(&format!(r"{NUM}\s*s/it"), ProgressField::SecondsPerIteration)?
            .with(&format!(r"(?i)\b(?:avr_)?loss\s*[=:]\s*{NUM}"), ProgressField::Loss)?
            .with(&format!(r"(?i)\blr\s*[=:]?\s*{NUM}"), ProgressField::LearningRate)
    }

    pub fn extract(&self, line: &str) -> LineFields {
        let mut fields = LineFields::default();
        for (regex, field) in &self.rules {
            if fields.has(*field) {
                continue;
            }
            let Some(caps) = regex.captures(line) else {
                continue;
            };
            let first = caps.get(1).map_or("", |m| m.as_str());
            let second = caps.get(2).map(|m| m.as_str());

            let parsed = match field {
                ProgressField::Step => first.parse::<u64>().ok().map(|step| {
                    fields.step = Some((step, second.and_then(|s| s.parse().ok())));
                }),
                ProgressField::Epoch => first.parse::<u32>().ok().map(|epoch| {
                    fields.epoch = Some((epoch, second.and_then(|s| s.parse().ok())));
                }),
                ProgressField::EtaSeconds => first.parse().ok().map(|secs| {
                    fields.eta_secs = Some(secs);
                }),
                ProgressField::EtaClock => parse_clock(first).map(|secs| {
                    fields.eta_secs = Some(secs);
                }),
                ProgressField::Throughput => parse_finite(first).map(|ips| {
                    fields.ips = Some(ips);
                }),
                ProgressField::SecondsPerIteration => parse_finite(first)
                    .filter(|secs| *secs > 0.0)
                    .map(|secs| {
                        fields.ips = Some(1.0 / secs);
                    }),
                ProgressField::Loss => parse_finite(first).map(|loss| {
                    fields.loss = Some(loss);
                }),
                ProgressField::LearningRate => parse_finite(first).map(|lr| {
                    fields.lr = Some(lr);
                }),
            };

            if parsed.is_none() {
                debug!(target: "tagtrack.trainer", ?field, value = first, "Ignoring unparseable progress value");
            }
        }
        fields
    }
}

impl LineFields {
    const fn has(&self, field: ProgressField) -> bool {
        match field {
            ProgressField::Step => self.step.is_some(),
            ProgressField::Epoch => self.epoch.is_some(),
            ProgressField::EtaSeconds | ProgressField::EtaClock => self.eta_secs.is_some(),
            ProgressField::Throughput | ProgressField::SecondsPerIteration => self.ips.is_some(),
            ProgressField::Loss => self.loss.is_some(),
            ProgressField::LearningRate => self.lr.is_some(),
        }
    }
}

/// Shared table for all Musubi-Tuner backends.
pub static MUSUBI_PATTERNS: LazyLock<PatternTable> =
    LazyLock::new(|| PatternTable::musubi().expect("built-in progress patterns are valid"));

fn parse_finite(value: &str) -> Option<f64> {
    value.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// `MM:SS` or `HH:MM:SS` to seconds.
fn parse_clock(value: &str) -> Option<u64> {
    value
        .split(':')
        .try_fold(0_u64, |acc, part| Some(acc.checked_mul(60)? + part.parse::<u64>().ok()?))
}

/// Folds parsed lines into progress records for one run.
#[derive(Debug)]
pub struct ProgressTracker<'a> {
    table: &'a PatternTable,
    total_steps: u64,
    epoch: u32,
    total_epochs: u32,
    last_step: u64,
    ips: Option<f64>,
    eta_secs: Option<u64>,
    loss: Option<f64>,
    lr: Option<f64>,
}

impl<'a> ProgressTracker<'a> {
    pub const fn new(table: &'a PatternTable, total_steps: u64, total_epochs: u32) -> Self {
        Self {
            table,
            total_steps,
            epoch: 1,
            total_epochs: if total_epochs == 0 { 1 } else { total_epochs },
            last_step: 0,
            ips: None,
            eta_secs: None,
            loss: None,
            lr: None,
        }
    }

    /// Record `line`; returns a progress record when it carried a step.
    ///
    /// The step total printed by the trainer is ignored in favor of the
    /// locally computed one. Speed and ETA describe the step rate, so they
    /// are only taken from lines with an accepted step. A step below the
    /// last one yields nothing.
    pub fn observe(&mut self, line: &str) -> Option<ProgressRecord> {
        let fields = self.table.extract(line);

        if let Some((epoch, total)) = fields.epoch {
            self.epoch = epoch;
            if let Some(total) = total.filter(|t| *t > 0) {
                self.total_epochs = total;
            }
        }
        self.loss = fields.loss.or(self.loss);
        self.lr = fields.lr.or(self.lr);

        let (step, _) = fields.step?;
        if step < self.last_step {
            debug!(target: "tagtrack.trainer", step, last = self.last_step, "Ignoring step behind the last one");
            return None;
        }
        self.last_step = step;
        self.ips = fields.ips.or(self.ips);
        self.eta_secs = fields.eta_secs.or(self.eta_secs);

        Some(ProgressRecord {
            step,
            total_steps: self.total_steps,
            epoch: Some(self.epoch),
            total_epochs: Some(self.total_epochs),
            ips: self.ips,
            eta_secs: self.eta_secs,
            loss: self.loss,
            lr: self.lr,
        })
    }
}
