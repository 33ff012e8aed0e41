//! Dataloader Runtime - Instrumentation for batching data loaders
//!
//! This crate measures how long a loader's shared lock is held and lets
//! tracing backends observe load, batch and wait phases. The loader engine
//! itself is not part of this crate; it is consumed through the types in
//! `dataloader-core`.

pub mod error;
pub mod observability;

// Re-export main types
pub use error::{Result, RuntimeError};
pub use observability::{
    Finish, LockMetrics, MeteredMutex, NoopTracer, OtelTracer, RecordingTracer, TelemetryConfig,
    Tracer, TracerBackend, TracingSpanTracer,
};
