//! Fallback ETA for trainers that do not report one.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use tagtrack_core::{JobId, ProgressRecord};

use crate::trainer::TrainerOutput;

/// Last observed `(instant, step)` per job.
#[derive(Debug, Default)]
pub struct SpeedCache {
    entries: Mutex<HashMap<JobId, (Instant, u64)>>,
}

impl SpeedCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp `record` with the authoritative total and, when the trainer
    /// gave no usable ETA, one derived from the speed since the last record.
    ///
    /// A nonzero trainer ETA passes through and leaves the cache untouched.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn enrich(&self, id: JobId, mut record: ProgressRecord, total_steps: u64, now: Instant) -> ProgressRecord {
        record.total_steps = total_steps;
        if record.eta_secs.is_some_and(|eta| eta > 0) {
            return record;
        }

        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let fallback = entries.get(&id).and_then(|&(t0, s0)| {
            let dt = now.saturating_duration_since(t0).as_secs_f64().max(1e-3);
            let ds = record.step.saturating_sub(s0) as f64;
            let sps = ds / dt;
            let remain = total_steps.saturating_sub(record.step) as f64;
            (sps > 0.0).then(|| (remain / sps) as u64)
        });
        entries.insert(id, (now, record.step));
        drop(entries);

        record.eta_secs = fallback.or(record.eta_secs);
        record
    }

    /// Drop the entry of a finished job.
    pub fn forget(&self, id: JobId) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Output wrapper that enriches progress before passing it on.
pub struct EnrichingOutput<'a> {
    pub inner: &'a dyn TrainerOutput,
    pub cache: &'a SpeedCache,
    pub id: JobId,
    pub total_steps: u64,
}

impl TrainerOutput for EnrichingOutput<'_> {
    fn log(&self, line: String) {
        self.inner.log(line);
    }

    fn progress(&self, record: ProgressRecord) {
        let record = self
            .cache
            .enrich(self.id, record, self.total_steps, Instant::now());
        self.inner.progress(record);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_fallback_eta_from_observed_speed() {
        let cache = SpeedCache::new();
        let id = JobId::new();
        let t0 = Instant::now();

        let first = cache.enrich(id, ProgressRecord::at_step(10, 0), 100, t0);
        assert_eq!(first.eta_secs, None);
        assert_eq!(first.total_steps, 100);

        let second = cache.enrich(
            id,
            ProgressRecord::at_step(20, 0),
            100,
            t0 + Duration::from_secs(10),
        );
        assert_eq!(second.eta_secs, Some(80));
    }

    #[test]
    fn test_trainer_eta_passes_through() {
        let cache = SpeedCache::new();
        let id = JobId::new();
        let mut record = ProgressRecord::at_step(5, 999);
        record.eta_secs = Some(42);

        let enriched = cache.enrich(id, record, 50, Instant::now());
        assert_eq!(enriched.eta_secs, Some(42));
        assert_eq!(enriched.total_steps, 50);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_eta_triggers_fallback() {
        let cache = SpeedCache::new();
        let id = JobId::new();
        let t0 = Instant::now();
        cache.enrich(id, ProgressRecord::at_step(0, 0), 10, t0);

        let mut record = ProgressRecord::at_step(5, 0);
        record.eta_secs = Some(0);
        let enriched = cache.enrich(id, record, 10, t0 + Duration::from_secs(5));
        assert_eq!(enriched.eta_secs, Some(5));
    }

    #[test]
    fn test_stalled_or_overshooting_steps() {
        let cache = SpeedCache::new();
        let id = JobId::new();
        let t0 = Instant::now();
        cache.enrich(id, ProgressRecord::at_step(30, 0), 20, t0);

        // No progress since last record: speed unknown.
        let same = cache.enrich(id, ProgressRecord::at_step(30, 0), 20, t0 + Duration::from_secs(1));
        assert_eq!(same.eta_secs, None);

        // Beyond the local total: nothing remains.
        let past = cache.enrich(id, ProgressRecord::at_step(40, 0), 20, t0 + Duration::from_secs(2));
        assert_eq!(past.eta_secs, Some(0));
    }

    #[test]
    fn test_forget_removes_entry() {
        let cache = SpeedCache::new();
        let id = JobId::new();
        cache.enrich(id, ProgressRecord::at_step(1, 0), 10, Instant::now());
        assert_eq!(cache.len(), 1);

        cache.forget(id);
        assert!(cache.is_empty());
    }
}
