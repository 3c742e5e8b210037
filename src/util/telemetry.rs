//! Logging and trace export.
//!
//! Logs always go to stdout through `tracing-subscriber`, filtered by `RUST_LOG`
//! (default `info`). With the `telemetry` feature and any `OTEL_EXPORTER_OTLP_*`
//! variable set, spans are also exported over OTLP.

use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[cfg(feature = "telemetry")]
use opentelemetry_sdk::trace::SdkTracerProvider;

const DEFAULT_FILTER: &str = "info";

/// Owns the installed exporters and flushes them on drop.
pub struct Telemetry {
    name: &'static str,
    version: &'static str,
    #[cfg(feature = "telemetry")]
    tracer_provider: Option<SdkTracerProvider>,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl Telemetry {
    pub fn new() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            #[cfg(feature = "telemetry")]
            tracer_provider: None,
        }
    }

    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    pub fn with_version(mut self, version: &'static str) -> Self {
        self.version = version;
        self
    }

    /// Installs the global subscriber. A second registration in the same process is ignored.
    #[cfg(not(feature = "telemetry"))]
    pub fn register(self) -> Self {
        let installed = tracing_subscriber::registry()
            .with(env_filter())
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .is_ok();
        if installed {
            tracing::info!(service = self.name, version = self.version, "logging initialized");
        }
        self
    }

    /// Installs the global subscriber. A second registration in the same process is ignored.
    #[cfg(feature = "telemetry")]
    pub fn register(mut self) -> Self {
        use opentelemetry::trace::TracerProvider as _;

        let tracer_provider = match otel::TelemetryProtocol::from_env() {
            Some(protocol) => match otel::init_tracer_provider(protocol, self.name, self.version) {
                Ok(provider) => Some(provider),
                Err(err) => {
                    eprintln!("OTLP exporter unavailable, logging locally only: {err}");
                    None
                }
            },
            None => None,
        };
        let otel_layer = tracer_provider
            .as_ref()
            .map(|provider| tracing_opentelemetry::layer().with_tracer(provider.tracer(self.name)));
        let installed = tracing_subscriber::registry()
            .with(env_filter())
            .with(tracing_subscriber::fmt::layer())
            .with(otel_layer)
            .try_init()
            .is_ok();
        if installed {
            tracing::info!(
                service = self.name,
                version = self.version,
                otlp = tracer_provider.is_some(),
                "logging initialized"
            );
        }
        self.tracer_provider = tracer_provider;
        self
    }

    /// Per-request HTTP spans for the axum router.
    pub fn http_tracing(&self) -> TraceLayer<SharedClassifier<ServerErrorsAsFailures>> {
        TraceLayer::new_for_http()
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

#[cfg(feature = "telemetry")]
impl Drop for Telemetry {
    fn drop(&mut self) {
        if let Some(tracer_provider) = self.tracer_provider.take() {
            if let Err(err) = tracer_provider.shutdown() {
                eprintln!("{err:?}");
            }
        }
    }
}

#[cfg(feature = "telemetry")]
mod otel {
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::ExporterBuildError;
    use opentelemetry_sdk::Resource;
    use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, SdkTracerProvider};
    use opentelemetry_semantic_conventions::SCHEMA_URL;
    use opentelemetry_semantic_conventions::attribute::{
        DEPLOYMENT_ENVIRONMENT_NAME, SERVICE_VERSION,
    };
    use std::env;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum TelemetryProtocol {
        Http,
        Grpc,
    }

    impl TelemetryProtocol {
        /// `None` unless one of the OTLP exporter variables is set.
        pub fn from_env() -> Option<Self> {
            let enabled = ["ENDPOINT", "HEADERS", "PROTOCOL"]
                .iter()
                .any(|suffix| env::var(format!("OTEL_EXPORTER_OTLP_{suffix}")).is_ok());
            if !enabled {
                return None;
            }
            match env::var("OTEL_EXPORTER_OTLP_PROTOCOL").as_deref() {
                Ok("grpc") => Some(TelemetryProtocol::Grpc),
                _ => Some(TelemetryProtocol::Http),
            }
        }
    }

    fn resource(name: &'static str, version: &'static str) -> Resource {
        let deployment_env = env::var("DEPLOYMENT_ENV").unwrap_or_else(|_| "develop".to_string());
        Resource::builder()
            .with_service_name(name)
            .with_schema_url(
                [
                    KeyValue::new(SERVICE_VERSION, version),
                    KeyValue::new(DEPLOYMENT_ENVIRONMENT_NAME, deployment_env),
                ],
                SCHEMA_URL,
            )
            .build()
    }

    pub fn init_tracer_provider(
        protocol: TelemetryProtocol,
        name: &'static str,
        version: &'static str,
    ) -> Result<SdkTracerProvider, ExporterBuildError> {
        let exporter = opentelemetry_otlp::SpanExporter::builder();
        let exporter = match protocol {
            TelemetryProtocol::Http => exporter.with_http().build()?,
            TelemetryProtocol::Grpc => exporter.with_tonic().build()?,
        };
        Ok(SdkTracerProvider::builder()
            .with_sampler(Sampler::ParentBased(Box::new(Sampler::AlwaysOn)))
            .with_id_generator(RandomIdGenerator::default())
            .with_resource(resource(name, version))
            .with_batch_exporter(exporter)
            .build())
    }
}
