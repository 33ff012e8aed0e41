//! OpenTelemetry SDK bootstrap
//!
//! This module builds SDK providers for hosts that do not bring their own:
//! - Metrics export to Prometheus
//! - Distributed tracing with OTLP
//!
//! Providers are handed back in an [`OtelContext`] and are only installed as
//! the process-wide providers when the host asks for it.

#[cfg(feature = "otel")]
use opentelemetry::{
    metrics::MeterProvider as _,
    trace::TracerProvider as _,
    KeyValue,
};
use opentelemetry::{global, metrics::Meter};
#[cfg(feature = "otel")]
use opentelemetry_otlp::WithExportConfig;
#[cfg(feature = "otel")]
use opentelemetry_sdk::{
    metrics::SdkMeterProvider,
    runtime,
    trace::{Tracer as SdkTracer, TracerProvider},
    Resource,
};
#[cfg(feature = "otel")]
use opentelemetry_semantic_conventions::resource::{SERVICE_NAME, SERVICE_VERSION};
#[cfg(feature = "otel")]
use prometheus::{Encoder, Registry, TextEncoder};

/// OpenTelemetry configuration
#[derive(Debug, Clone)]
pub struct OtelConfig {
    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Enable metrics export to Prometheus
    pub enable_metrics: bool,

    /// Enable distributed tracing
    pub enable_tracing: bool,

    /// OTLP endpoint for traces (e.g., "http://localhost:4317")
    pub otlp_endpoint: Option<String>,
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            service_name: "dataloader".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            enable_metrics: true,
            enable_tracing: true,
            otlp_endpoint: None,
        }
    }
}

impl OtelConfig {
    /// Create a new config with service name
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    /// Set service version
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.service_version = version.into();
        self
    }

    /// Enable/disable metrics
    pub fn with_metrics(mut self, enable: bool) -> Self {
        self.enable_metrics = enable;
        self
    }

    /// Enable/disable tracing
    pub fn with_tracing(mut self, enable: bool) -> Self {
        self.enable_tracing = enable;
        self
    }

    /// Set OTLP endpoint for traces
    pub fn with_otlp_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.otlp_endpoint = Some(endpoint.into());
        self
    }
}

/// Initialized OpenTelemetry providers
#[cfg(feature = "otel")]
pub struct OtelContext {
    registry: Option<Registry>,
    meter_provider: Option<SdkMeterProvider>,
    tracer_provider: Option<TracerProvider>,
}

#[cfg(feature = "otel")]
impl OtelContext {
    /// Meter from the SDK provider, or from the global provider when metrics are disabled
    pub fn meter(&self, name: &'static str) -> Meter {
        match &self.meter_provider {
            Some(provider) => provider.meter(name),
            None => global::meter(name),
        }
    }

    /// Tracer from the SDK provider, if tracing is enabled
    pub fn tracer(&self, name: &'static str) -> Option<SdkTracer> {
        self.tracer_provider
            .as_ref()
            .map(|provider| provider.tracer(name))
    }

    /// Register the providers as the process-wide ones
    pub fn install_global(&self) {
        if let Some(provider) = &self.meter_provider {
            global::set_meter_provider(provider.clone());
        }
        if let Some(provider) = &self.tracer_provider {
            global::set_tracer_provider(provider.clone());
        }
    }

    /// Get Prometheus metrics in text format
    pub fn metrics(&self) -> Result<String, anyhow::Error> {
        let Some(registry) = &self.registry else {
            return Ok("# Metrics disabled\n".to_string());
        };

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    /// Shutdown OpenTelemetry (call on application exit)
    pub fn shutdown(self) -> Result<(), anyhow::Error> {
        if let Some(provider) = self.meter_provider {
            provider.shutdown()?;
        }
        if let Some(provider) = self.tracer_provider {
            provider.shutdown()?;
        }
        Ok(())
    }
}

/// Initialize OpenTelemetry with the given configuration
#[cfg(feature = "otel")]
pub fn init_opentelemetry(config: OtelConfig) -> Result<OtelContext, anyhow::Error> {
    let resource = Resource::new(vec![
        KeyValue::new(SERVICE_NAME, config.service_name.clone()),
        KeyValue::new(SERVICE_VERSION, config.service_version.clone()),
    ]);

    let (registry, meter_provider) = if config.enable_metrics {
        let registry = Registry::new();
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()?;
        let provider = SdkMeterProvider::builder()
            .with_resource(resource.clone())
            .with_reader(exporter)
            .build();

        tracing::info!("Prometheus metrics exporter initialized");
        (Some(registry), Some(provider))
    } else {
        (None, None)
    };

    let tracer_provider = match (config.enable_tracing, config.otlp_endpoint) {
        (true, Some(endpoint)) => {
            tracing::info!(endpoint = %endpoint, "Initializing OTLP tracing");

            let exporter = opentelemetry_otlp::SpanExporter::builder()
                .with_tonic()
                .with_endpoint(endpoint)
                .build()?;
            let provider = TracerProvider::builder()
                .with_resource(resource)
                .with_batch_exporter(exporter, runtime::Tokio)
                .build();

            Some(provider)
        }
        (true, None) => {
            tracing::warn!("OTLP endpoint not configured, tracing will be disabled");
            None
        }
        (false, _) => None,
    };

    tracing::info!(
        service_name = %config.service_name,
        metrics_enabled = meter_provider.is_some(),
        tracing_enabled = tracer_provider.is_some(),
        "OpenTelemetry initialized"
    );

    Ok(OtelContext {
        registry,
        meter_provider,
        tracer_provider,
    })
}

#[cfg(not(feature = "otel"))]
pub struct OtelContext;

#[cfg(not(feature = "otel"))]
impl OtelContext {
    pub fn meter(&self, name: &'static str) -> Meter {
        global::meter(name)
    }

    pub fn install_global(&self) {}

    pub fn metrics(&self) -> Result<String, anyhow::Error> {
        Ok("# OpenTelemetry feature not enabled\n".to_string())
    }

    pub fn shutdown(self) -> Result<(), anyhow::Error> {
        Ok(())
    }
}

#[cfg(not(feature = "otel"))]
pub fn init_opentelemetry(_config: OtelConfig) -> Result<OtelContext, anyhow::Error> {
    tracing::warn!("OpenTelemetry feature not enabled");
    Ok(OtelContext)
}
