//! Telemetry configuration and tracer selection

use super::otel::OtelTracer;
use super::tracer::{NoopTracer, Tracer};
use super::tracing_spans::TracingSpanTracer;
use crate::error::{Result, RuntimeError};
use dataloader_core::Value;
use opentelemetry::trace::Tracer as OtelApiTracer;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;

pub const DEFAULT_TRACER_NAME: &str = "dataloader";

/// Which tracing backend observes loader phases
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TracerBackend {
    /// No observation
    #[default]
    Noop,

    /// `tracing` crate spans
    Tracing,

    /// OpenTelemetry spans
    Otel,
}

/// Level of the spans emitted by the `tracing` backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanLevel {
    Trace,
    Debug,
    #[default]
    Info,
}

/// Lock-hold histogram configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockMetricConfig {
    /// Instrumentation scope the histogram is created under
    #[serde(default = "default_meter_name")]
    pub meter_name: String,

    #[serde(default = "default_instrument_name")]
    pub instrument_name: String,

    #[serde(default = "default_description")]
    pub description: String,

    #[serde(default = "default_unit")]
    pub unit: String,
}

fn default_meter_name() -> String {
    "cache".to_string()
}

fn default_instrument_name() -> String {
    "mutex.lock.duration".to_string()
}

fn default_description() -> String {
    "Time spent holding the mutex lock in seconds".to_string()
}

fn default_unit() -> String {
    "s".to_string()
}

impl Default for LockMetricConfig {
    fn default() -> Self {
        Self {
            meter_name: default_meter_name(),
            instrument_name: default_instrument_name(),
            description: default_description(),
            unit: default_unit(),
        }
    }
}

impl LockMetricConfig {
    /// Set the histogram name
    pub fn with_instrument_name(mut self, name: impl Into<String>) -> Self {
        self.instrument_name = name.into();
        self
    }

    /// Set the histogram description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Loader telemetry configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub tracer: TracerBackend,

    #[serde(default)]
    pub span_level: SpanLevel,

    /// Name passed to the global OpenTelemetry tracer provider
    #[serde(default = "default_tracer_name")]
    pub tracer_name: String,

    #[serde(default)]
    pub lock: LockMetricConfig,
}

fn default_tracer_name() -> String {
    DEFAULT_TRACER_NAME.to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            tracer: TracerBackend::default(),
            span_level: SpanLevel::default(),
            tracer_name: default_tracer_name(),
            lock: LockMetricConfig::default(),
        }
    }
}

impl TelemetryConfig {
    /// Create a config using the given tracer backend
    pub fn new(tracer: TracerBackend) -> Self {
        Self {
            tracer,
            ..Default::default()
        }
    }

    /// Set span level for the `tracing` backend
    pub fn with_span_level(mut self, level: SpanLevel) -> Self {
        self.span_level = level;
        self
    }

    /// Set the OpenTelemetry tracer name
    pub fn with_tracer_name(mut self, name: impl Into<String>) -> Self {
        self.tracer_name = name.into();
        self
    }

    /// Set lock metric configuration
    pub fn with_lock(mut self, lock: LockMetricConfig) -> Self {
        self.lock = lock;
        self
    }

    /// Check the configuration before any instrument is built
    pub fn validate(&self) -> Result<()> {
        if self.tracer_name.trim().is_empty() {
            return Err(RuntimeError::InvalidConfig(
                "tracer_name must not be empty".to_string(),
            ));
        }
        if self.lock.meter_name.trim().is_empty() {
            return Err(RuntimeError::InvalidConfig(
                "lock.meter_name must not be empty".to_string(),
            ));
        }
        super::lock::validate_instrument_name(&self.lock.instrument_name)
    }

    /// Build the configured tracer.
    ///
    /// The `Otel` backend uses the globally registered provider, which is a
    /// no-op until one is installed.
    pub fn build_tracer<K, V>(&self) -> Arc<dyn Tracer<K, V>>
    where
        K: Debug + Send + Sync + 'static,
        V: Value,
    {
        self.build_tracer_with(OtelTracer::global_named(self.tracer_name.clone()))
    }

    /// Build the configured tracer, using `otel` when the `Otel` backend is selected
    pub fn build_tracer_with<K, V, T>(&self, otel: OtelTracer<T>) -> Arc<dyn Tracer<K, V>>
    where
        K: Debug + Send + Sync + 'static,
        V: Value,
        T: OtelApiTracer + Send + Sync + 'static,
        T::Span: Send + Sync + 'static,
    {
        let tracer: Arc<dyn Tracer<K, V>> = match self.tracer {
            TracerBackend::Noop => Arc::new(NoopTracer),
            TracerBackend::Tracing => Arc::new(TracingSpanTracer::with_level(self.span_level)),
            TracerBackend::Otel => Arc::new(otel),
        };
        tracing::debug!(backend = ?self.tracer, "loader tracer selected");
        tracer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_telemetry_config_default() {
        let config = TelemetryConfig::default();
        assert_eq!(config.tracer, TracerBackend::Noop);
        assert_eq!(config.span_level, SpanLevel::Info);
        assert_eq!(config.tracer_name, "dataloader");
        assert_eq!(config.lock.instrument_name, "mutex.lock.duration");
        assert_eq!(config.lock.meter_name, "cache");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_telemetry_config_builder() {
        let config = TelemetryConfig::new(TracerBackend::Tracing)
            .with_span_level(SpanLevel::Debug)
            .with_tracer_name("users-loader")
            .with_lock(LockMetricConfig::default().with_instrument_name("users.lock.duration"));

        assert_eq!(config.tracer, TracerBackend::Tracing);
        assert_eq!(config.span_level, SpanLevel::Debug);
        assert_eq!(config.tracer_name, "users-loader");
        assert_eq!(config.lock.instrument_name, "users.lock.duration");
    }

    #[test]
    fn test_validate_rejects_bad_names() {
        let config = TelemetryConfig::default().with_tracer_name("  ");
        assert!(matches!(
            config.validate(),
            Err(RuntimeError::InvalidConfig(_))
        ));

        let config = TelemetryConfig::default()
            .with_lock(LockMetricConfig::default().with_instrument_name("9lives"));
        assert!(matches!(
            config.validate(),
            Err(RuntimeError::InvalidInstrument { .. })
        ));
    }
}
