//! `tracing` span backend
//!
//! Each phase opens a span named after the phase. Keys are recorded as
//! `Debug` strings under `dataloader.key` / `dataloader.keys`. The span is
//! parented on the span carried by the incoming context, or on the current
//! span when the context carries none.
//!
//! The derived context holds the span in a slot that the finish handle
//! empties, so once the handle is consumed (or dropped) the context no
//! longer keeps the span open.

use super::config::SpanLevel;
use super::tracer::{render, BatchFinish, Finish, LoadFinish, LoadManyFinish, Tracer, WaitFinish};
use opentelemetry::Context;
use parking_lot::Mutex;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::field::Empty;
use tracing::Span;

macro_rules! phase_span {
    ($level:expr, $parent:expr, $name:expr, $($fields:tt)*) => {
        match $level {
            SpanLevel::Trace => tracing::trace_span!(parent: $parent, $name, $($fields)*),
            SpanLevel::Debug => tracing::debug_span!(parent: $parent, $name, $($fields)*),
            SpanLevel::Info => tracing::info_span!(parent: $parent, $name, $($fields)*),
        }
    };
}

/// Context entry holding the span of an in-flight phase
#[derive(Debug, Clone)]
struct SpanSlot(Arc<Mutex<Option<Span>>>);

impl SpanSlot {
    fn new(span: Span) -> Self {
        Self(Arc::new(Mutex::new(Some(span))))
    }

    fn span(&self) -> Option<Span> {
        self.0.lock().clone()
    }

    fn close(&self) {
        let span = self.0.lock().take();
        drop(span);
    }
}

/// Tracer emitting `tracing` spans
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSpanTracer {
    level: SpanLevel,
}

impl TracingSpanTracer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(level: SpanLevel) -> Self {
        Self { level }
    }

    /// Span of the innermost open phase carried by `cx`.
    ///
    /// Useful to `.instrument()` the phase's work.
    pub fn span_of(cx: &Context) -> Option<Span> {
        cx.get::<SpanSlot>().and_then(SpanSlot::span)
    }

    fn parent(cx: &Context) -> Span {
        Self::span_of(cx).unwrap_or_else(Span::current)
    }

    fn enter_phase(cx: Context, span: Span) -> (Context, SpanSlot) {
        let slot = SpanSlot::new(span);
        (cx.with_value(slot.clone()), slot)
    }
}

impl<K, V> Tracer<K, V> for TracingSpanTracer
where
    K: Debug + 'static,
    V: 'static,
{
    fn trace_load(&self, cx: Context, key: &K) -> (Context, LoadFinish<V>) {
        let parent = Self::parent(&cx);
        let span = phase_span!(
            self.level,
            &parent,
            "Dataloader: load",
            dataloader.key = %render(key)
        );
        let (cx, slot) = Self::enter_phase(cx, span);
        (cx, Finish::new(move |_thunk| slot.close()))
    }

    fn trace_load_many(&self, cx: Context, keys: &[K]) -> (Context, LoadManyFinish<V>) {
        let parent = Self::parent(&cx);
        let span = phase_span!(
            self.level,
            &parent,
            "Dataloader: loadmany",
            dataloader.keys = %render(keys)
        );
        let (cx, slot) = Self::enter_phase(cx, span);
        (cx, Finish::new(move |_thunk| slot.close()))
    }

    fn trace_batch(&self, cx: Context, keys: &[K]) -> (Context, BatchFinish<V>) {
        let parent = Self::parent(&cx);
        let span = phase_span!(
            self.level,
            &parent,
            "Dataloader: batch",
            dataloader.keys = %render(keys)
        );
        let (cx, slot) = Self::enter_phase(cx, span);
        (cx, Finish::new(move |_results| slot.close()))
    }

    fn trace_wait(&self, cx: Context) -> (Context, WaitFinish<K>) {
        let parent = Self::parent(&cx);
        let span = phase_span!(
            self.level,
            &parent,
            "Dataloader: wait",
            dataloader.keys = Empty
        );
        let (cx, slot) = Self::enter_phase(cx, span);
        let finish = Finish::new(move |keys: Option<&[K]>| {
            if let (Some(keys), Some(span)) = (keys, slot.span()) {
                span.record("dataloader.keys", render(keys).as_str());
            }
            slot.close();
        });
        (cx, finish)
    }
}
