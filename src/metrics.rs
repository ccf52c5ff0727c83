use std::net::SocketAddr;

use metrics::counter;
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and register all application counters.
///
/// With an address the exporter also serves `/metrics` over HTTP; without one
/// the counters are recorded but only reachable in-process.
pub fn init_metrics(listen: Option<SocketAddr>) -> anyhow::Result<()> {
    let mut builder = PrometheusBuilder::new();
    if let Some(addr) = listen {
        builder = builder.with_http_listener(addr);
        builder.install()?;
        tracing::info!(%addr, "Prometheus exporter listening");
    } else {
        builder.install_recorder()?;
    }

    // Pre-register counters so they appear even before the first increment.
    counter!("quotes_updated_total").absolute(0);
    counter!("feed_payloads_rejected_total", "kind" => "orderbook").absolute(0);
    counter!("feed_payloads_rejected_total", "kind" => "trade").absolute(0);
    counter!("whale_alerts_total", "trigger" => "single").absolute(0);
    counter!("whale_alerts_total", "trigger" => "aggregate").absolute(0);
    counter!("flair_changes_total").absolute(0);
    counter!("flair_margin_calls_total").absolute(0);

    Ok(())
}
