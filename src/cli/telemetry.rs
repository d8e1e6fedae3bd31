//! Logging and OTLP trace export.
//!
//! Console logs always go through `tracing-subscriber`. Spans are additionally
//! exported over gRPC when `OTEL_EXPORTER_OTLP_ENDPOINT` is set.

use anyhow::{anyhow, Context, Result};
use base64ct::{Base64, Encoding};
use opentelemetry::{global, trace::TracerProvider as _, KeyValue};
use opentelemetry_otlp::{WithExportConfig, WithTonicConfig};
use opentelemetry_sdk::{
    propagation::TraceContextPropagator,
    runtime::Tokio,
    trace::{self, Tracer, TracerProvider},
    Resource,
};
use std::{env, sync::OnceLock, time::Duration};
use tonic::{
    metadata::{Ascii, Binary, MetadataKey, MetadataMap, MetadataValue},
    transport::ClientTlsConfig,
};
use tracing::{debug, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};
use ulid::Ulid;

const ENV_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";
const ENV_HEADERS: &str = "OTEL_EXPORTER_OTLP_HEADERS";
const ENV_PROTOCOL: &str = "OTEL_EXPORTER_OTLP_PROTOCOL";
const ENV_INSTANCE_ID: &str = "OTEL_SERVICE_INSTANCE_ID";
const DEFAULT_ENDPOINT: &str = "http://localhost:4317";
const EXPORT_TIMEOUT: Duration = Duration::from_secs(3);

static TRACER_PROVIDER: OnceLock<TracerProvider> = OnceLock::new();

/// Exporter settings resolved from the standard `OTEL_*` variables.
#[derive(Debug, PartialEq, Eq)]
struct OtlpSettings {
    endpoint: String,
    headers: Vec<(String, String)>,
    instance_id: String,
}

impl OtlpSettings {
    fn from_env() -> Self {
        if let Ok(protocol) = env::var(ENV_PROTOCOL) {
            if protocol != "grpc" {
                debug!("{ENV_PROTOCOL}='{protocol}' ignored: only 'grpc' is supported");
            }
        }

        let endpoint = env::var(ENV_ENDPOINT).unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string());
        Self {
            endpoint: with_scheme(&endpoint),
            headers: env::var(ENV_HEADERS)
                .map(|raw| split_headers(&raw))
                .unwrap_or_default(),
            instance_id: env::var(ENV_INSTANCE_ID).unwrap_or_else(|_| Ulid::new().to_string()),
        }
    }

    /// Host to verify against when the endpoint uses TLS.
    fn tls_domain(&self) -> Option<&str> {
        let rest = self.endpoint.strip_prefix("https://")?;
        let authority = rest.split('/').next()?;
        authority.split(':').next().filter(|host| !host.is_empty())
    }
}

/// `key=value` pairs separated by commas; malformed pairs are skipped.
fn split_headers(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            let key = key.trim();
            (!key.is_empty()).then(|| (key.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Endpoints without a scheme are treated as TLS endpoints.
fn with_scheme(endpoint: &str) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("https://{}", endpoint.trim_end_matches('/'))
    }
}

/// gRPC metadata from header pairs. Keys ending in `-bin` carry base64 values.
fn grpc_metadata(headers: &[(String, String)]) -> Result<MetadataMap> {
    let mut metadata = MetadataMap::with_capacity(headers.len());

    for (key, value) in headers {
        let key = key.to_ascii_lowercase();
        if key.ends_with("-bin") {
            let bytes = Base64::decode_vec(value)
                .map_err(|err| anyhow!("failed to base64-decode value for key {key}: {err}"))?;
            let name = MetadataKey::<Binary>::from_bytes(key.as_bytes())
                .with_context(|| format!("invalid binary metadata key {key}"))?;
            metadata.insert_bin(name, MetadataValue::from_bytes(&bytes));
        } else {
            let name = MetadataKey::<Ascii>::from_bytes(key.as_bytes())
                .with_context(|| format!("invalid metadata key {key}"))?;
            let value: MetadataValue<Ascii> = value
                .parse()
                .with_context(|| format!("invalid metadata value for key {key}"))?;
            metadata.insert(name, value);
        }
    }

    Ok(metadata)
}

fn service_resource(instance_id: String) -> Resource {
    Resource::new(vec![
        KeyValue::new("service.name", env!("CARGO_PKG_NAME")),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
        KeyValue::new("service.instance.id", instance_id),
    ])
}

fn init_tracer(settings: OtlpSettings) -> Result<Tracer> {
    let mut builder = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&settings.endpoint)
        .with_timeout(EXPORT_TIMEOUT);

    if let Some(domain) = settings.tls_domain() {
        builder = builder.with_tls_config(
            ClientTlsConfig::new()
                .domain_name(domain.to_string())
                .with_native_roots(),
        );
    }

    if !settings.headers.is_empty() {
        builder = builder.with_metadata(grpc_metadata(&settings.headers)?);
    }

    let exporter = builder.build().context("failed to build OTLP span exporter")?;

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, Tokio)
        .with_config(trace::Config::default().with_resource(service_resource(settings.instance_id)))
        .build();

    let _ = TRACER_PROVIDER.set(provider.clone());
    global::set_tracer_provider(provider.clone());
    global::set_text_map_propagator(TraceContextPropagator::new());

    Ok(provider.tracer(env!("CARGO_PKG_NAME")))
}

/// Initialize logging and, when `OTEL_EXPORTER_OTLP_ENDPOINT` is set, the OTLP
/// trace exporter.
///
/// # Errors
///
/// Returns an error if tracer or subscriber initialization fails
pub fn init(verbosity_level: Option<Level>) -> Result<()> {
    let fmt_layer = fmt::layer()
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_target(false)
        .pretty();

    let filter = EnvFilter::builder()
        .with_default_directive(verbosity_level.unwrap_or(Level::ERROR).into())
        .from_env_lossy()
        .add_directive("hyper=error".parse()?)
        .add_directive("tokio=error".parse()?)
        .add_directive("sqlx=warn".parse()?)
        .add_directive("opentelemetry_sdk=warn".parse()?);

    let otel_layer = if env::var(ENV_ENDPOINT).is_ok() {
        let tracer = init_tracer(OtlpSettings::from_env())?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    let subscriber = Registry::default()
        .with(fmt_layer)
        .with(otel_layer)
        .with(filter);
    tracing::subscriber::set_global_default(subscriber)?;

    Ok(())
}

/// Flush and stop the tracer provider, a no-op when tracing was never enabled.
pub fn shutdown_tracer() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        debug!("shutting down tracer provider");
        let _ = provider.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect()
    }

    #[test]
    fn split_headers_trims_and_skips_malformed() {
        assert!(split_headers("").is_empty());
        assert_eq!(
            split_headers(" api-key = secret ,broken, x-tenant=acme=1"),
            pairs(&[("api-key", "secret"), ("x-tenant", "acme=1")])
        );
    }

    #[test]
    fn grpc_metadata_handles_binary_keys() -> Result<()> {
        let metadata = grpc_metadata(&pairs(&[
            ("Authorization", "Bearer abc"),
            ("trace-bin", "YmluYXJ5"),
        ]))?;
        assert_eq!(metadata.len(), 2);
        assert!(metadata.get("authorization").is_some());
        assert!(metadata.get_bin("trace-bin").is_some());
        Ok(())
    }

    #[test]
    fn grpc_metadata_rejects_bad_base64() {
        let result = grpc_metadata(&pairs(&[("trace-bin", "%%%")]));
        assert!(result.is_err_and(|err| err.to_string().contains("base64")));
    }

    #[test]
    fn endpoints_without_scheme_use_tls() {
        assert_eq!(with_scheme("http://collector:4317"), "http://collector:4317");
        assert_eq!(with_scheme("collector.example.com:4317/"), "https://collector.example.com:4317");
    }

    #[test]
    fn settings_from_env() {
        temp_env::with_vars(
            [
                (ENV_ENDPOINT, Some("otel.example.com:4317")),
                (ENV_HEADERS, Some("x-team=profiles")),
                (ENV_INSTANCE_ID, Some("instance-1")),
                (ENV_PROTOCOL, None),
            ],
            || {
                let settings = OtlpSettings::from_env();
                assert_eq!(settings.endpoint, "https://otel.example.com:4317");
                assert_eq!(settings.tls_domain(), Some("otel.example.com"));
                assert_eq!(settings.headers, pairs(&[("x-team", "profiles")]));
                assert_eq!(settings.instance_id, "instance-1");
            },
        );
    }

    #[test]
    fn plain_http_endpoints_skip_tls() {
        temp_env::with_vars([(ENV_ENDPOINT, None::<&str>)], || {
            let settings = OtlpSettings::from_env();
            assert_eq!(settings.endpoint, DEFAULT_ENDPOINT);
            assert_eq!(settings.tls_domain(), None);
        });
    }

    #[test]
    fn shutdown_without_provider_is_noop() {
        shutdown_tracer();
    }
}
