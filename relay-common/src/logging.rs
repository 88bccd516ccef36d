//! Logging setup and request tracing helpers.
//!
//! Library crates that chatter at `info` (hyper, reqwest, rustls...) are
//! capped at `warn` so chat turns stay readable. `RUST_LOG`, when set,
//! replaces the computed filter entirely.

use crate::config::ObservabilityConfig;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Header carrying a caller-supplied trace ID.
pub const TRACE_ID_HEADER: &str = "X-Trace-Id";

/// Modules capped at `warn`.
pub const NOISY_MODULES: &[&str] = &[
    "hyper",
    "hyper_util",
    "reqwest",
    "h2",
    "rustls",
    "tokio_util",
    "tower_http",
];

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, colored
    Pretty,
    /// One JSON object per event, with span close timings
    Json,
}

impl LogFormat {
    /// Anything other than `json` falls back to pretty output.
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Pretty
        }
    }
}

fn build_directives(log_level: &str, excluded_targets: &[String]) -> String {
    let capped = NOISY_MODULES
        .iter()
        .copied()
        .chain(excluded_targets.iter().map(String::as_str))
        .map(|target| format!(",{target}=warn"));

    std::iter::once(log_level.to_string()).chain(capped).collect()
}

/// Initialize logging from the observability section of the config.
pub fn init_from_config(config: &ObservabilityConfig) {
    init_logging_with_exclusions(
        &config.log_level,
        &config.log_format,
        &config.excluded_targets,
    );
}

/// Initialize logging at `log_level` in `log_format` (`json` or `pretty`).
pub fn init_logging(log_level: &str, log_format: &str) {
    init_logging_with_exclusions(log_level, log_format, &[]);
}

/// Like [`init_logging`], additionally capping `excluded_targets` at `warn`.
///
/// Calling this more than once is harmless; only the first subscriber is
/// installed.
pub fn init_logging_with_exclusions(
    log_level: &str,
    log_format: &str,
    excluded_targets: &[String],
) {
    let directives = build_directives(log_level, excluded_targets);
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&directives));
    let registry = tracing_subscriber::registry().with(filter);

    let format = LogFormat::parse(log_format);
    let installed = match format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_span_events(FmtSpan::CLOSE)
                    .with_current_span(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init()
            .is_ok(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_ansi(true).with_target(true))
            .try_init()
            .is_ok(),
    };

    if installed {
        tracing::info!(
            log_level = %log_level,
            format = ?format,
            capped_targets = NOISY_MODULES.len() + excluded_targets.len(),
            "Logging initialized"
        );
    }
}

/// Run `f` with a temporary stderr subscriber at `info`.
///
/// Used for work that happens before the configured subscriber exists, such
/// as loading the config file itself.
pub fn with_bootstrap<T>(f: impl FnOnce() -> T) -> T {
    let _guard = bootstrap_subscriber(std::io::stderr).set_default();
    f()
}

fn bootstrap_subscriber<W>(make_writer: W) -> impl tracing::Subscriber + Send + Sync + 'static
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(build_directives("info", &[])));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(make_writer)
        .finish()
}

/// Generate a new trace ID for request tracing.
pub fn generate_trace_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ============================================================================
// Request Context
// ============================================================================

/// Identity of one HTTP request in the logs.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Propagated from `X-Trace-Id` when the caller sends one
    pub trace_id: String,
    pub service: &'static str,
}

impl RequestContext {
    pub fn new(service: &'static str) -> Self {
        Self {
            trace_id: generate_trace_id(),
            service,
        }
    }

    /// Reuse the caller's trace ID if present and non-blank.
    pub fn from_headers(headers: &http::HeaderMap, service: &'static str) -> Self {
        match headers
            .get(TRACE_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
        {
            Some(trace_id) => Self {
                trace_id: trace_id.to_string(),
                service,
            },
            None => Self::new(service),
        }
    }
}

/// Open an `info` span tagged with a [`RequestContext`].
///
/// ```ignore
/// let span = request_span!("chat", ctx, user_id = %user_id);
/// handle(request).instrument(span).await;
/// ```
#[macro_export]
macro_rules! request_span {
    ($name:expr, $ctx:expr) => {
        tracing::info_span!($name, trace_id = %$ctx.trace_id, service = $ctx.service)
    };
    ($name:expr, $ctx:expr, $($field:tt)*) => {
        tracing::info_span!(
            $name,
            trace_id = %$ctx.trace_id,
            service = $ctx.service,
            $($field)*
        )
    };
}
