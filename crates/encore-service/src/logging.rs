use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::prelude::*;
use tracing_subscriber::util::SubscriberInitExt;

/// Installs a global subscriber that writes one JSON object per event to `make_writer`.
///
/// Only the JSON output is filtered by `env_filter`. Events are forwarded to Sentry as well, so
/// errors logged by the fetch pipeline end up there once a client is bound.
pub fn init_json_logging<W>(env_filter: &str, make_writer: W)
where
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .flatten_event(true)
        .with_timer(UtcTime::rfc_3339())
        .with_file(true)
        .with_line_number(true)
        .with_writer(make_writer)
        .with_filter(EnvFilter::new(env_filter));

    tracing_subscriber::registry()
        .with(json_layer)
        .with(sentry::integrations::tracing::layer())
        .init();
}
