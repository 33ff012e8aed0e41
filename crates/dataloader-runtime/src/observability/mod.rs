//! Observability module
//!
//! Provides lock-hold metrics and loader phase tracing.
//!
//! This module includes:
//! - `MeteredMutex` and duration histograms
//! - The `Tracer` contract with no-op, `tracing`, OpenTelemetry and in-memory adapters
//! - Telemetry configuration and tracer selection
//! - OpenTelemetry SDK bootstrap (with `otel` feature)

pub mod config;
pub mod lock;
pub mod metrics;
pub mod otel;
pub mod recording;
pub mod telemetry;
pub mod tracer;
pub mod tracing_spans;

pub use config::{LockMetricConfig, SpanLevel, TelemetryConfig, TracerBackend};
pub use lock::{ExclusiveLock, LockMetrics, MeteredGuard, MeteredMutex};
pub use metrics::{DurationHistogram, Histogram};
pub use otel::OtelTracer;
pub use recording::{PhaseOutcome, RecordedPhase, RecordingTracer};
pub use telemetry::{init_opentelemetry, OtelConfig, OtelContext};
pub use tracer::{
    BatchFinish, Finish, LoadFinish, LoadManyFinish, NoopTracer, Phase, ResultSummary, Tracer,
    WaitFinish,
};
pub use tracing_spans::TracingSpanTracer;
