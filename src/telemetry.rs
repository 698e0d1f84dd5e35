use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber.
///
/// Exports spans over OTLP when OTEL_EXPORTER_OTLP_ENDPOINT is set; always
/// logs to stdout, filtered by RUST_LOG. SSO_LOG_FORMAT=json switches stdout
/// to one JSON object per line.
pub fn init() -> anyhow::Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "sso-gateway"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .map_err(|e| anyhow::anyhow!("failed to install OpenTelemetry tracer: {}", e))?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    let json = std::env::var("SSO_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "sso_gateway=debug,tower_http=debug".into()),
        ))
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .with(telemetry_layer)
        .try_init()?;

    Ok(())
}

/// Shorten an identifier for logging. At most a quarter of its characters
/// (and never more than 8) survive, split between head and tail. Anything of
/// 8 characters or fewer is fully masked.
pub fn mask_id(id: &str) -> String {
    let chars: Vec<char> = id.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let keep = (chars.len() / 4).min(8);
    let head: String = chars[..keep - keep / 2].iter().collect();
    let tail: String = chars[chars.len() - keep / 2..].iter().collect();
    format!("{}…{}", head, tail)
}
