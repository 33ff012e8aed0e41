//! Tests for telemetry configuration loading and tracer selection

use dataloader_core::Thunk;
use dataloader_runtime::observability::{
    LockMetricConfig, OtelTracer, SpanLevel, TelemetryConfig, Tracer, TracerBackend,
};
use dataloader_runtime::RuntimeError;
use opentelemetry::trace::{TraceContextExt, TracerProvider as _};
use opentelemetry::Context;
use opentelemetry_sdk::testing::trace::InMemorySpanExporter;
use opentelemetry_sdk::trace::TracerProvider;

#[test]
fn test_json_config_with_defaults() {
    let config: TelemetryConfig = serde_json::from_str(r#"{"tracer": "otel"}"#).unwrap();

    assert_eq!(config.tracer, TracerBackend::Otel);
    assert_eq!(config.span_level, SpanLevel::Info);
    assert_eq!(config.tracer_name, "dataloader");
    assert_eq!(config.lock, LockMetricConfig::default());
}

#[test]
fn test_yaml_config() {
    let yaml = r#"
tracer: tracing
span_level: debug
tracer_name: users-loader
lock:
  instrument_name: users.lock.duration
"#;
    let config: TelemetryConfig = serde_yaml::from_str(yaml).unwrap();

    assert_eq!(config.tracer, TracerBackend::Tracing);
    assert_eq!(config.span_level, SpanLevel::Debug);
    assert_eq!(config.tracer_name, "users-loader");
    assert_eq!(config.lock.instrument_name, "users.lock.duration");
    assert_eq!(config.lock.meter_name, "cache");
    assert_eq!(config.lock.unit, "s");
    assert!(config.validate().is_ok());
}

#[test]
fn test_empty_config_is_noop() {
    let config: TelemetryConfig = serde_json::from_str("{}").unwrap();
    assert_eq!(config, TelemetryConfig::default());
}

#[test]
fn test_unknown_backend_is_rejected() {
    let result = serde_json::from_str::<TelemetryConfig>(r#"{"tracer": "jaeger"}"#);
    assert!(result.is_err());
}

#[test]
fn test_config_serialization_round_trip() {
    let config = TelemetryConfig::new(TracerBackend::Otel).with_span_level(SpanLevel::Trace);
    let json = serde_json::to_value(&config).unwrap();

    assert_eq!(json["tracer"], "otel");
    assert_eq!(json["span_level"], "trace");
    assert_eq!(json["lock"]["instrument_name"], "mutex.lock.duration");
}

#[test]
fn test_invalid_lock_name_fails_validation() {
    let config: TelemetryConfig =
        serde_json::from_str(r#"{"lock": {"instrument_name": "mutex lock"}}"#).unwrap();

    match config.validate() {
        Err(RuntimeError::InvalidInstrument { name, .. }) => assert_eq!(name, "mutex lock"),
        other => panic!("unexpected validation result: {other:?}"),
    }
}

#[test]
fn test_noop_backend_passes_context_through() {
    let config = TelemetryConfig::new(TracerBackend::Noop);
    let tracer = config.build_tracer::<u32, u32>();

    let (cx, finish) = tracer.trace_load(Context::new(), &1);
    assert!(finish.is_noop());
    assert!(!cx.has_active_span());
}

#[test]
fn test_otel_backend_uses_given_tracer() {
    let exporter = InMemorySpanExporter::default();
    let provider = TracerProvider::builder()
        .with_simple_exporter(exporter.clone())
        .build();
    let config = TelemetryConfig::new(TracerBackend::Otel);
    let tracer = config.build_tracer_with::<u32, u32, _>(OtelTracer::new(provider.tracer("test")));

    let (cx, finish) = tracer.trace_load(Context::new(), &1);
    assert!(cx.has_active_span());
    assert!(!finish.is_noop());
    finish.finish(&Thunk::ready(Ok(1)));

    assert_eq!(exporter.get_finished_spans().unwrap().len(), 1);
}

#[test]
fn test_tracing_backend_ignores_given_otel_tracer() {
    let exporter = InMemorySpanExporter::default();
    let provider = TracerProvider::builder()
        .with_simple_exporter(exporter.clone())
        .build();
    let config = TelemetryConfig::new(TracerBackend::Tracing);
    let tracer = config.build_tracer_with::<u32, u32, _>(OtelTracer::new(provider.tracer("test")));

    let (cx, finish) = tracer.trace_batch(Context::new(), &[1, 2]);
    assert!(!cx.has_active_span());
    finish.finish(&[Ok(1), Ok(2)]);

    assert!(exporter.get_finished_spans().unwrap().is_empty());
}
