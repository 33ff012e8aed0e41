//! In-memory phase recording
//!
//! [`RecordingTracer`] keeps every traced phase in memory so tests and
//! development tooling can check how a loader drives its tracer: which phases
//! ran, with which keys, how they nested, and whether each one was finished.

use super::tracer::{
    render, BatchFinish, Finish, LoadFinish, LoadManyFinish, Phase, ResultSummary, Tracer,
    WaitFinish,
};
use dataloader_core::{LoadResult, Thunk, ThunkMany, Value};
use opentelemetry::Context;
use parking_lot::RwLock;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How a recorded phase was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseOutcome {
    /// Finished with a result
    Finished(ResultSummary),

    /// The finish handle was dropped without a result
    Dropped,
}

/// One traced phase
#[derive(Debug, Clone)]
pub struct RecordedPhase {
    pub id: u64,

    /// Phase whose context this phase was started from
    pub parent_id: Option<u64>,

    pub phase: Phase,

    /// Rendered keys; for waits this is filled in at finish
    pub keys: Option<String>,

    pub started_at: Instant,

    pub finished_at: Option<Instant>,

    pub outcome: Option<PhaseOutcome>,
}

impl RecordedPhase {
    /// Get phase duration
    pub fn duration(&self) -> Option<Duration> {
        self.finished_at
            .map(|end| end.duration_since(self.started_at))
    }

    /// Check if phase is finished
    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }
}

/// Context entry identifying the enclosing recorded phase
#[derive(Debug, Clone, Copy)]
struct PhaseId(u64);

/// In-memory tracer for testing and development
#[derive(Debug, Clone, Default)]
pub struct RecordingTracer {
    next_id: Arc<AtomicU64>,
    phases: Arc<RwLock<Vec<RecordedPhase>>>,
}

impl RecordingTracer {
    /// Create a new recording tracer
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all recorded phases in start order
    pub fn phases(&self) -> Vec<RecordedPhase> {
        self.phases.read().clone()
    }

    /// Recorded phases of one kind
    pub fn phases_of(&self, phase: Phase) -> Vec<RecordedPhase> {
        self.phases
            .read()
            .iter()
            .filter(|recorded| recorded.phase == phase)
            .cloned()
            .collect()
    }

    /// Phases that have not been closed yet
    pub fn open(&self) -> Vec<RecordedPhase> {
        self.phases
            .read()
            .iter()
            .filter(|recorded| !recorded.is_finished())
            .cloned()
            .collect()
    }

    pub fn finished_count(&self) -> usize {
        self.phases
            .read()
            .iter()
            .filter(|recorded| recorded.is_finished())
            .count()
    }

    /// Clear all phases
    pub fn clear(&self) {
        self.phases.write().clear();
    }

    /// Id of the recorded phase `cx` was derived from
    pub fn phase_id(cx: &Context) -> Option<u64> {
        cx.get::<PhaseId>().map(|id| id.0)
    }

    fn start(&self, cx: Context, phase: Phase, keys: Option<String>) -> (Context, PhaseHandle) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.phases.write().push(RecordedPhase {
            id,
            parent_id: Self::phase_id(&cx),
            phase,
            keys,
            started_at: Instant::now(),
            finished_at: None,
            outcome: None,
        });

        let handle = PhaseHandle {
            id,
            phases: self.phases.clone(),
        };
        (cx.with_value(PhaseId(id)), handle)
    }
}

/// Closes one recorded phase
struct PhaseHandle {
    id: u64,
    phases: Arc<RwLock<Vec<RecordedPhase>>>,
}

impl PhaseHandle {
    fn close(self, outcome: PhaseOutcome, keys: Option<String>) {
        let mut phases = self.phases.write();
        let Some(recorded) = phases.iter_mut().find(|recorded| recorded.id == self.id) else {
            // Cleared while in flight.
            return;
        };
        if recorded.is_finished() {
            tracing::warn!(phase = %recorded.phase, id = self.id, "phase closed twice");
            return;
        }
        recorded.finished_at = Some(Instant::now());
        recorded.outcome = Some(outcome);
        if keys.is_some() {
            recorded.keys = keys;
        }
    }
}

fn outcome<T: ?Sized>(
    result: Option<&T>,
    summarize: impl FnOnce(&T) -> ResultSummary,
) -> PhaseOutcome {
    match result {
        Some(result) => PhaseOutcome::Finished(summarize(result)),
        None => PhaseOutcome::Dropped,
    }
}

impl<K, V> Tracer<K, V> for RecordingTracer
where
    K: Debug + 'static,
    V: Value,
{
    fn trace_load(&self, cx: Context, key: &K) -> (Context, LoadFinish<V>) {
        let (cx, handle) = self.start(cx, Phase::Load, Some(render(key)));
        let finish = Finish::new(move |thunk: Option<&Thunk<V>>| {
            handle.close(outcome(thunk, ResultSummary::of_thunk), None);
        });
        (cx, finish)
    }

    fn trace_load_many(&self, cx: Context, keys: &[K]) -> (Context, LoadManyFinish<V>) {
        let (cx, handle) = self.start(cx, Phase::LoadMany, Some(render(keys)));
        let finish = Finish::new(move |thunk: Option<&ThunkMany<V>>| {
            handle.close(outcome(thunk, ResultSummary::of_thunk_many), None);
        });
        (cx, finish)
    }

    fn trace_batch(&self, cx: Context, keys: &[K]) -> (Context, BatchFinish<V>) {
        let (cx, handle) = self.start(cx, Phase::Batch, Some(render(keys)));
        let finish = Finish::new(move |results: Option<&[LoadResult<V>]>| {
            handle.close(outcome(results, ResultSummary::of_results), None);
        });
        (cx, finish)
    }

    fn trace_wait(&self, cx: Context) -> (Context, WaitFinish<K>) {
        let (cx, handle) = self.start(cx, Phase::Wait, None);
        let finish = Finish::new(move |keys: Option<&[K]>| {
            let rendered = keys.map(render);
            handle.close(outcome(keys, ResultSummary::of_keys), rendered);
        });
        (cx, finish)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dataloader_core::LoadError;

    #[test]
    fn test_records_load_with_outcome() {
        let tracer = RecordingTracer::new();

        let (_cx, finish) = Tracer::<u32, String>::trace_load(&tracer, Context::new(), &7);
        assert_eq!(tracer.open().len(), 1);

        finish.finish(&Thunk::ready(Err(LoadError::NotFound("7".to_string()))));

        let phases = tracer.phases();
        assert_eq!(phases.len(), 1);
        assert_eq!(phases[0].phase, Phase::Load);
        assert_eq!(phases[0].keys.as_deref(), Some("7"));
        assert_eq!(
            phases[0].outcome,
            Some(PhaseOutcome::Finished(ResultSummary {
                items: 1,
                errors: 1
            }))
        );
        assert!(phases[0].duration().is_some());
    }

    #[test]
    fn test_nested_phases_record_parent() {
        let tracer = RecordingTracer::new();

        let (load_cx, load_finish) = Tracer::<&str, u8>::trace_load(&tracer, Context::new(), &"a");
        let (wait_cx, wait_finish) = Tracer::<&str, u8>::trace_wait(&tracer, load_cx.clone());
        let (_batch_cx, batch_finish) = Tracer::<&str, u8>::trace_batch(&tracer, wait_cx, &["a"]);

        batch_finish.finish(&[Ok(1)]);
        wait_finish.finish(&["a"]);
        load_finish.finish(&Thunk::ready(Ok(1)));

        let phases = tracer.phases();
        assert_eq!(phases[0].parent_id, None);
        assert_eq!(phases[1].parent_id, Some(phases[0].id));
        assert_eq!(phases[2].parent_id, Some(phases[1].id));
        assert_eq!(phases[1].keys.as_deref(), Some("[\"a\"]"));
        assert_eq!(RecordingTracer::phase_id(&load_cx), Some(phases[0].id));
        assert!(tracer.open().is_empty());
    }

    #[test]
    fn test_dropped_handle_is_recorded() {
        let tracer = RecordingTracer::new();

        let (_cx, finish) = Tracer::<u32, u32>::trace_wait(&tracer, Context::new());
        drop(finish);

        let waits = tracer.phases_of(Phase::Wait);
        assert_eq!(waits[0].outcome, Some(PhaseOutcome::Dropped));
        assert_eq!(waits[0].keys, None);
    }

    #[test]
    fn test_clear() {
        let tracer = RecordingTracer::new();

        let (_cx, finish) = Tracer::<u32, u32>::trace_batch(&tracer, Context::new(), &[1, 2]);
        tracer.clear();
        finish.finish(&[]);

        assert_eq!(tracer.phases().len(), 0);
        assert_eq!(tracer.finished_count(), 0);
    }
}
