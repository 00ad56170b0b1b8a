use tracing_subscriber::EnvFilter;

pub const MESSAGES_TOTAL: &str = "depthsync_messages_total";
pub const MESSAGES_DROPPED: &str = "depthsync_messages_dropped_total";
pub const STALE_DISCARDED: &str = "depthsync_stale_discarded_total";
pub const SESSIONS_OPENED: &str = "depthsync_sessions_opened_total";
pub const TRANSPORT_ERRORS: &str = "depthsync_transport_errors_total";
pub const MID_PRICE: &str = "depthsync_mid_price";

pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    // try_init: a second call (tests, embedding apps) keeps the first subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .compact()
        .try_init();
}

#[cfg(feature = "metrics-exporter")]
pub fn init_metrics(port: u16) -> anyhow::Result<()> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()?;

    tracing::info!(port, "Prometheus exporter listening on /metrics");
    metrics::gauge!("depthsync_up").set(1.0);
    Ok(())
}

#[cfg(not(feature = "metrics-exporter"))]
pub fn init_metrics(_port: u16) -> anyhow::Result<()> {
    Ok(())
}
