//! Statsd reporting for the fetch pipeline.
//!
//! Nothing is reported until [`configure_statsd`] installed a client. Until then, and in all
//! tests, the [`metric!`](crate::metric) macro does nothing.
use std::collections::BTreeMap;
use std::net::{ToSocketAddrs, UdpSocket};
use std::sync::OnceLock;

use anyhow::Context;
use cadence::{QueuingMetricSink, StatsdClient, UdpMetricSink};

static CLIENT: OnceLock<StatsdClient> = OnceLock::new();

/// Traits the [`metric!`](crate::metric) macro needs in scope.
pub mod prelude {
    pub use cadence::prelude::*;
}

/// Installs the process-wide statsd client.
///
/// Every metric is prefixed with `prefix` and carries `tags` in addition to its own. Metrics are
/// queued and sent from a background thread, so emitting one never blocks a fetch.
pub fn configure_statsd<A: ToSocketAddrs>(
    prefix: &str,
    host: A,
    tags: BTreeMap<String, String>,
) -> anyhow::Result<()> {
    let addr = host
        .to_socket_addrs()
        .context("invalid statsd address")?
        .next()
        .context("statsd address did not resolve")?;
    tracing::info!("Reporting metrics to statsd at {addr}");

    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.set_nonblocking(true)?;
    let sink = QueuingMetricSink::from(UdpMetricSink::from(addr, socket)?);

    let mut builder = StatsdClient::builder(prefix, sink)
        .with_error_handler(|error| tracing::debug!(%error, "Failed to send metric"));
    for (key, value) in tags {
        builder = builder.with_tag(key, value);
    }

    CLIENT
        .set(builder.build())
        .map_err(|_| anyhow::anyhow!("statsd is already configured"))
}

/// Calls `f` with the statsd client, or returns the default if none is configured.
///
/// Prefer the [`metric!`](crate::metric) macro.
#[inline(always)]
pub fn with_client<F, R>(f: F) -> R
where
    F: FnOnce(&StatsdClient) -> R,
    R: Default,
{
    CLIENT.get().map(f).unwrap_or_default()
}

/// Emits a counter or timer, with optional `key => value` tags.
///
/// ```ignore
/// metric!(counter("fetch.access") += 1, "resource" => "artist_profile");
/// metric!(timer("warmup.duration") = start.elapsed());
/// ```
#[macro_export]
macro_rules! metric {
    (counter($id:expr) += $value:expr $(, $k:expr => $v:expr)* $(,)?) => {
        $crate::metrics::with_client(|client| {
            use $crate::metrics::prelude::*;
            client.count_with_tags($id, $value)$(.with_tag($k, $v))*.send();
        })
    };

    (timer($id:expr) = $value:expr $(, $k:expr => $v:expr)* $(,)?) => {
        $crate::metrics::with_client(|client| {
            use $crate::metrics::prelude::*;
            client.time_with_tags($id, $value)$(.with_tag($k, $v))*.send();
        })
    };
}
