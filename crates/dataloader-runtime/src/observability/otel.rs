//! OpenTelemetry span backend
//!
//! Spans are started from the incoming context and the returned context
//! carries the new span as its active span. Besides the rendered keys, spans
//! get numeric attributes (key, result and error counts) and an error status
//! when a phase resolved with failures.

use super::config::DEFAULT_TRACER_NAME;
use super::tracer::{
    render, BatchFinish, Finish, LoadFinish, LoadManyFinish, Phase, ResultSummary, Tracer,
    WaitFinish, KEYS_ATTRIBUTE, KEY_ATTRIBUTE,
};
use dataloader_core::{LoadResult, Thunk, ThunkMany, Value};
use opentelemetry::global::{self, BoxedTracer};
use opentelemetry::trace::{SpanBuilder, Status, TraceContextExt, Tracer as OtelApiTracer};
use opentelemetry::{Context, KeyValue};
use std::borrow::Cow;
use std::fmt::{self, Debug};

pub const KEYS_COUNT_ATTRIBUTE: &str = "dataloader.keys.count";
pub const RESULTS_COUNT_ATTRIBUTE: &str = "dataloader.results.count";
pub const ERRORS_COUNT_ATTRIBUTE: &str = "dataloader.errors.count";

/// Tracer emitting OpenTelemetry spans through any `opentelemetry` tracer
#[derive(Clone)]
pub struct OtelTracer<T = BoxedTracer> {
    tracer: T,
}

impl OtelTracer<BoxedTracer> {
    /// Use the globally registered provider.
    ///
    /// Until a provider is installed the global one is a no-op, so spans are
    /// inert rather than failing.
    pub fn global() -> Self {
        Self::global_named(DEFAULT_TRACER_NAME)
    }

    pub fn global_named(name: impl Into<Cow<'static, str>>) -> Self {
        Self::new(global::tracer(name))
    }
}

impl<T> OtelTracer<T> {
    pub fn new(tracer: T) -> Self {
        Self { tracer }
    }

    pub fn inner(&self) -> &T {
        &self.tracer
    }
}

impl<T> Debug for OtelTracer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OtelTracer").finish_non_exhaustive()
    }
}

impl<T> OtelTracer<T>
where
    T: OtelApiTracer,
    T::Span: Send + Sync + 'static,
{
    fn start(&self, cx: &Context, phase: Phase, attributes: Vec<KeyValue>) -> Context {
        let span = SpanBuilder::from_name(phase.span_name())
            .with_attributes(attributes)
            .start_with_context(&self.tracer, cx);
        cx.with_span(span)
    }
}

fn count(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn end_span(cx: &Context, summary: Option<ResultSummary>, failure: Option<String>) {
    let span = cx.span();
    if let Some(summary) = summary {
        span.set_attribute(KeyValue::new(RESULTS_COUNT_ATTRIBUTE, count(summary.items)));
        span.set_attribute(KeyValue::new(ERRORS_COUNT_ATTRIBUTE, count(summary.errors)));
    }
    if let Some(description) = failure {
        span.set_status(Status::error(description));
    }
    span.end();
}

impl<K, V, T> Tracer<K, V> for OtelTracer<T>
where
    K: Debug + 'static,
    V: Value,
    T: OtelApiTracer + Send + Sync + 'static,
    T::Span: Send + Sync + 'static,
{
    fn trace_load(&self, cx: Context, key: &K) -> (Context, LoadFinish<V>) {
        let span_cx = self.start(
            &cx,
            Phase::Load,
            vec![KeyValue::new(KEY_ATTRIBUTE, render(key))],
        );
        let finish_cx = span_cx.clone();
        let finish = Finish::new(move |thunk: Option<&Thunk<V>>| {
            let failure = thunk
                .and_then(|thunk| thunk.peek())
                .and_then(|result| result.as_ref().err())
                .map(ToString::to_string);
            end_span(&finish_cx, None, failure);
        });
        (span_cx, finish)
    }

    fn trace_load_many(&self, cx: Context, keys: &[K]) -> (Context, LoadManyFinish<V>) {
        let span_cx = self.start(
            &cx,
            Phase::LoadMany,
            vec![
                KeyValue::new(KEYS_ATTRIBUTE, render(keys)),
                KeyValue::new(KEYS_COUNT_ATTRIBUTE, count(keys.len())),
            ],
        );
        let finish_cx = span_cx.clone();
        let finish = Finish::new(move |thunk: Option<&ThunkMany<V>>| {
            let Some(thunk) = thunk else {
                end_span(&finish_cx, None, None);
                return;
            };
            let failure = match thunk.peek() {
                Some(Err(error)) => Some(error.to_string()),
                _ => None,
            };
            let summary = ResultSummary::of_thunk_many(thunk);
            let failure = failure.or_else(|| {
                summary
                    .has_errors()
                    .then(|| format!("{} of {} keys failed", summary.errors, summary.items))
            });
            end_span(&finish_cx, thunk.is_resolved().then_some(summary), failure);
        });
        (span_cx, finish)
    }

    fn trace_batch(&self, cx: Context, keys: &[K]) -> (Context, BatchFinish<V>) {
        let span_cx = self.start(
            &cx,
            Phase::Batch,
            vec![
                KeyValue::new(KEYS_ATTRIBUTE, render(keys)),
                KeyValue::new(KEYS_COUNT_ATTRIBUTE, count(keys.len())),
            ],
        );
        let finish_cx = span_cx.clone();
        let finish = Finish::new(move |results: Option<&[LoadResult<V>]>| {
            let summary = results.map(ResultSummary::of_results);
            let failure = summary
                .filter(ResultSummary::has_errors)
                .map(|summary| format!("{} of {} keys failed", summary.errors, summary.items));
            end_span(&finish_cx, summary, failure);
        });
        (span_cx, finish)
    }

    fn trace_wait(&self, cx: Context) -> (Context, WaitFinish<K>) {
        let span_cx = self.start(&cx, Phase::Wait, Vec::new());
        let finish_cx = span_cx.clone();
        let finish = Finish::new(move |keys: Option<&[K]>| {
            if let Some(keys) = keys {
                let span = finish_cx.span();
                span.set_attribute(KeyValue::new(KEYS_ATTRIBUTE, render(keys)));
                span.set_attribute(KeyValue::new(KEYS_COUNT_ATTRIBUTE, count(keys.len())));
            }
            end_span(&finish_cx, None, None);
        });
        (span_cx, finish)
    }
}
