//! Loader phase tracing
//!
//! A loader calls into a [`Tracer`] at the start of each phase. The tracer
//! hands back the context to run the phase under and a [`Finish`] handle
//! that must be consumed with the phase's result once the work is done.
//!
//! | Phase | Started with | Finished with |
//! |---|---|---|
//! | load | one key | the key's [`Thunk`] |
//! | load many | keys | the [`ThunkMany`] |
//! | batch | keys | one [`LoadResult`] per key |
//! | wait | nothing | the keys that ended up in the batch |
//!
//! The wait phase learns its keys only when the batching window closes.

use dataloader_core::{LoadResult, Thunk, ThunkMany, Value};
use opentelemetry::Context;
use std::fmt::{self, Debug, Write as _};
use std::sync::Arc;

/// Attribute carrying a single rendered key
pub const KEY_ATTRIBUTE: &str = "dataloader.key";

/// Attribute carrying a rendered key sequence
pub const KEYS_ATTRIBUTE: &str = "dataloader.keys";

/// A traced loader phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Load,
    LoadMany,
    Batch,
    Wait,
}

impl Phase {
    /// Span name used by the tracing backends
    pub fn span_name(&self) -> &'static str {
        match self {
            Phase::Load => "Dataloader: load",
            Phase::LoadMany => "Dataloader: loadmany",
            Phase::Batch => "Dataloader: batch",
            Phase::Wait => "Dataloader: wait",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.span_name())
    }
}

/// Single-use handle that closes one in-flight observation.
///
/// [`Finish::finish`] consumes the handle, so an observation cannot be closed
/// twice. A handle dropped without being finished still closes its
/// observation, just without a result.
pub struct Finish<T: ?Sized> {
    on_finish: Option<Box<dyn FnOnce(Option<&T>) + Send>>,
}

impl<T: ?Sized> Finish<T> {
    /// Handle that does nothing when finished
    pub fn noop() -> Self {
        Self { on_finish: None }
    }

    /// Handle that runs `on_finish` exactly once, with `None` if dropped unfinished
    pub fn new<F>(on_finish: F) -> Self
    where
        F: FnOnce(Option<&T>) + Send + 'static,
    {
        Self {
            on_finish: Some(Box::new(on_finish)),
        }
    }

    /// Close the observation with the phase result
    pub fn finish(mut self, result: &T) {
        if let Some(on_finish) = self.on_finish.take() {
            on_finish(Some(result));
        }
    }

    pub fn is_noop(&self) -> bool {
        self.on_finish.is_none()
    }
}

impl<T: ?Sized> Drop for Finish<T> {
    fn drop(&mut self) {
        if let Some(on_finish) = self.on_finish.take() {
            on_finish(None);
        }
    }
}

impl<T: ?Sized> Debug for Finish<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Finish")
            .field("noop", &self.is_noop())
            .finish()
    }
}

pub type LoadFinish<V> = Finish<Thunk<V>>;
pub type LoadManyFinish<V> = Finish<ThunkMany<V>>;
pub type BatchFinish<V> = Finish<[LoadResult<V>]>;
pub type WaitFinish<K> = Finish<[K]>;

/// Observer of loader phases.
///
/// Implementations must not panic for any input, including empty key
/// sequences, and every start call must produce an independent
/// context/finish pair.
pub trait Tracer<K, V>: Send + Sync {
    /// Trace a call to load a single key
    fn trace_load(&self, cx: Context, key: &K) -> (Context, LoadFinish<V>);

    /// Trace a call to load many keys
    fn trace_load_many(&self, cx: Context, keys: &[K]) -> (Context, LoadManyFinish<V>);

    /// Trace one batch dispatched to the backing fetch
    fn trace_batch(&self, cx: Context, keys: &[K]) -> (Context, BatchFinish<V>);

    /// Trace the wait between a load and the batch it lands in
    fn trace_wait(&self, cx: Context) -> (Context, WaitFinish<K>);
}

impl<K, V, T> Tracer<K, V> for Arc<T>
where
    T: Tracer<K, V> + ?Sized,
{
    fn trace_load(&self, cx: Context, key: &K) -> (Context, LoadFinish<V>) {
        (**self).trace_load(cx, key)
    }

    fn trace_load_many(&self, cx: Context, keys: &[K]) -> (Context, LoadManyFinish<V>) {
        (**self).trace_load_many(cx, keys)
    }

    fn trace_batch(&self, cx: Context, keys: &[K]) -> (Context, BatchFinish<V>) {
        (**self).trace_batch(cx, keys)
    }

    fn trace_wait(&self, cx: Context) -> (Context, WaitFinish<K>) {
        (**self).trace_wait(cx)
    }
}

/// Default tracer: passes the context through and observes nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl<K, V> Tracer<K, V> for NoopTracer {
    fn trace_load(&self, cx: Context, _key: &K) -> (Context, LoadFinish<V>) {
        (cx, Finish::noop())
    }

    fn trace_load_many(&self, cx: Context, _keys: &[K]) -> (Context, LoadManyFinish<V>) {
        (cx, Finish::noop())
    }

    fn trace_batch(&self, cx: Context, _keys: &[K]) -> (Context, BatchFinish<V>) {
        (cx, Finish::noop())
    }

    fn trace_wait(&self, cx: Context) -> (Context, WaitFinish<K>) {
        (cx, Finish::noop())
    }
}

/// Render a key or key sequence with its `Debug` formatting.
///
/// A failing `Debug` impl yields a placeholder instead of panicking.
pub fn render<K: Debug + ?Sized>(value: &K) -> String {
    let mut out = String::new();
    match write!(out, "{:?}", value) {
        Ok(()) => out,
        Err(_) => String::from("<unrenderable>"),
    }
}

/// Number of items and failed items in a phase result
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResultSummary {
    pub items: usize,
    pub errors: usize,
}

impl ResultSummary {
    /// Summarize a thunk. Unresolved thunks count as one item without error.
    pub fn of_thunk<V: Value>(thunk: &Thunk<V>) -> Self {
        let errors = match thunk.peek() {
            Some(Err(_)) => 1,
            _ => 0,
        };
        Self { items: 1, errors }
    }

    /// Summarize a batch thunk. A failed request counts as a single error.
    pub fn of_thunk_many<V: Value>(thunk: &ThunkMany<V>) -> Self {
        match thunk.peek() {
            Some(Ok(results)) => Self::of_results(results),
            Some(Err(_)) => Self {
                items: 0,
                errors: 1,
            },
            None => Self::default(),
        }
    }

    pub fn of_results<V>(results: &[LoadResult<V>]) -> Self {
        Self {
            items: results.len(),
            errors: results.iter().filter(|result| result.is_err()).count(),
        }
    }

    pub fn of_keys<K>(keys: &[K]) -> Self {
        Self {
            items: keys.len(),
            errors: 0,
        }
    }

    pub fn has_errors(&self) -> bool {
        self.errors > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dataloader_core::LoadError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Unrenderable;

    impl Debug for Unrenderable {
        fn fmt(&self, _f: &mut fmt::Formatter<'_>) -> fmt::Result {
            Err(fmt::Error)
        }
    }

    #[test]
    fn test_render() {
        assert_eq!(render(&42u32), "42");
        assert_eq!(render(&["a", "b"][..]), "[\"a\", \"b\"]");
        assert_eq!(render::<[u8]>(&[]), "[]");
        assert_eq!(render(&Unrenderable), "<unrenderable>");
    }

    #[test]
    fn test_finish_runs_once_with_result() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let finish: Finish<[u32]> = Finish::new(move |keys: Option<&[u32]>| {
            assert_eq!(keys, Some(&[1u32, 2][..]));
            seen.fetch_add(1, Ordering::SeqCst);
        });

        finish.finish(&[1, 2]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dropped_finish_closes_without_result() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let finish: Finish<[u32]> = Finish::new(move |keys: Option<&[u32]>| {
            assert!(keys.is_none());
            seen.fetch_add(1, Ordering::SeqCst);
        });

        drop(finish);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_noop_finish() {
        let finish: Finish<Thunk<u32>> = Finish::noop();
        assert!(finish.is_noop());
        finish.finish(&Thunk::ready(Ok(1)));
    }

    #[test]
    fn test_phase_span_names() {
        assert_eq!(Phase::Load.span_name(), "Dataloader: load");
        assert_eq!(Phase::LoadMany.to_string(), "Dataloader: loadmany");
        assert_eq!(Phase::Batch.span_name(), "Dataloader: batch");
        assert_eq!(Phase::Wait.span_name(), "Dataloader: wait");
    }

    #[test]
    fn test_result_summary() {
        let results: Vec<LoadResult<u32>> = vec![
            Ok(1),
            Err(LoadError::NotFound("2".to_string())),
            Ok(3),
        ];
        assert_eq!(
            ResultSummary::of_results(&results),
            ResultSummary {
                items: 3,
                errors: 1
            }
        );

        let failed: ThunkMany<u32> = ThunkMany::ready(Err(LoadError::Canceled));
        assert!(ResultSummary::of_thunk_many(&failed).has_errors());

        let (_resolver, pending) = Thunk::<u32>::channel();
        assert_eq!(
            ResultSummary::of_thunk(&pending),
            ResultSummary {
                items: 1,
                errors: 0
            }
        );
        assert_eq!(ResultSummary::of_keys::<u8>(&[]), ResultSummary::default());
    }
}
