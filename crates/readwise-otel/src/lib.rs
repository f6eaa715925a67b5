use std::sync::OnceLock;

use anyhow::Context as _;
use http::HeaderMap;
use opentelemetry::Context;
use opentelemetry::propagation::Extractor;

static PROPAGATOR_INSTALLED: OnceLock<()> = OnceLock::new();

#[derive(Debug, Clone)]
pub struct TracingInitOptions<'a> {
    pub service_name: &'a str,
    pub service_version: &'a str,
    pub default_env_filter: &'a str,
}

fn ensure_propagator_installed() {
    PROPAGATOR_INSTALLED.get_or_init(|| {
        opentelemetry::global::set_text_map_propagator(
            opentelemetry_sdk::propagation::TraceContextPropagator::new(),
        );
    });
}

fn env_true(name: &str) -> bool {
    let Ok(v) = std::env::var(name) else {
        return false;
    };
    matches!(
        v.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn otel_enabled() -> bool {
    non_empty_env("OTEL_EXPORTER_OTLP_ENDPOINT").is_some() || env_true("READWISE_MCP_OTEL")
}

fn join_otlp_endpoint(base: &str, path: &str) -> String {
    format!("{}{path}", base.trim_end_matches('/'))
}

fn otlp_signal_endpoint(signal_var: &str, path: &str) -> String {
    non_empty_env(signal_var).unwrap_or_else(|| {
        // Local collector default, only reached when READWISE_MCP_OTEL is set.
        let base = non_empty_env("OTEL_EXPORTER_OTLP_ENDPOINT")
            .unwrap_or_else(|| "http://127.0.0.1:4318".to_string());
        join_otlp_endpoint(&base, path)
    })
}

/// Install the global subscriber: JSON logs filtered by `RUST_LOG`, plus OTLP
/// traces and metrics when an exporter endpoint is configured.
pub fn init_tracing(opts: TracingInitOptions<'_>) -> anyhow::Result<()> {
    ensure_propagator_installed();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| opts.default_env_filter.into());

    if !otel_enabled() {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .json()
            .init();
        return Ok(());
    }

    use opentelemetry::KeyValue;
    use opentelemetry_otlp::{Protocol, WithExportConfig as _};
    use opentelemetry_sdk::trace::{Sampler, SdkTracerProvider};
    use tracing_subscriber::layer::SubscriberExt as _;
    use tracing_subscriber::util::SubscriberInitExt as _;

    let resource = opentelemetry_sdk::Resource::builder()
        .with_service_name(opts.service_name.to_string())
        .with_attributes([KeyValue::new(
            "service.version",
            opts.service_version.to_string(),
        )])
        .build();

    let span_exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(otlp_signal_endpoint(
            "OTEL_EXPORTER_OTLP_TRACES_ENDPOINT",
            "/v1/traces",
        ))
        .with_protocol(Protocol::HttpBinary)
        .build()
        .context("build otlp span exporter")?;

    let tracer_provider = SdkTracerProvider::builder()
        .with_batch_exporter(span_exporter)
        .with_sampler(Sampler::ParentBased(Box::new(Sampler::AlwaysOn)))
        .with_resource(resource.clone())
        .build();
    let otel = otel_layer(&tracer_provider, opts.service_name);
    opentelemetry::global::set_tracer_provider(tracer_provider);

    let metric_exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_http()
        .with_endpoint(otlp_signal_endpoint(
            "OTEL_EXPORTER_OTLP_METRICS_ENDPOINT",
            "/v1/metrics",
        ))
        .with_protocol(Protocol::HttpBinary)
        .build()
        .context("build otlp metric exporter")?;
    let meter_provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder()
        .with_periodic_exporter(metric_exporter)
        .with_resource(resource)
        .build();
    opentelemetry::global::set_meter_provider(meter_provider);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .with(otel)
        .init();
    Ok(())
}

/// Bridge `tracing` spans into OpenTelemetry.
///
/// Takes the tracer from the SDK provider itself: the boxed tracer handed out by
/// `opentelemetry::global` cannot pre-sample, which the layer requires.
fn otel_layer<S>(
    provider: &opentelemetry_sdk::trace::SdkTracerProvider,
    service_name: &str,
) -> impl tracing_subscriber::Layer<S>
where
    S: tracing::Subscriber + for<'span> tracing_subscriber::registry::LookupSpan<'span>,
{
    use opentelemetry::trace::TracerProvider as _;

    tracing_opentelemetry::layer().with_tracer(provider.tracer(service_name.to_string()))
}

/// Pull a W3C trace context out of inbound request headers.
pub fn extract_trace_context(headers: &HeaderMap) -> Context {
    ensure_propagator_installed();
    opentelemetry::global::get_text_map_propagator(|prop| {
        prop.extract(&HeaderExtractor { headers })
    })
}

struct HeaderExtractor<'a> {
    headers: &'a HeaderMap,
}

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.headers.get(key).and_then(|v| v.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.headers.keys().map(|k| k.as_str()).collect()
    }
}

#[derive(Debug, Clone)]
pub struct Metrics {
    tool_calls_total: opentelemetry::metrics::Counter<u64>,
    sse_connections_total: opentelemetry::metrics::Counter<u64>,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Process-wide counters. No-ops until a meter provider is installed.
pub fn metrics() -> &'static Metrics {
    METRICS.get_or_init(|| {
        let meter = opentelemetry::global::meter("readwise-mcp");

        let tool_calls_total = meter
            .u64_counter("mcp_tool_calls_total")
            .with_description("Count of tools/call invocations by tool and outcome.")
            .build();

        let sse_connections_total = meter
            .u64_counter("mcp_sse_connections_total")
            .with_description("Count of event streams opened.")
            .build();

        Metrics {
            tool_calls_total,
            sse_connections_total,
        }
    })
}

impl Metrics {
    pub fn record_tool_call(&self, tool: &str, outcome: &'static str) {
        self.tool_calls_total.add(
            1,
            &[
                opentelemetry::KeyValue::new("tool", tool.to_string()),
                opentelemetry::KeyValue::new("outcome", outcome),
            ],
        );
    }

    pub fn record_sse_connection(&self) {
        self.sse_connections_total.add(1, &[]);
    }
}
