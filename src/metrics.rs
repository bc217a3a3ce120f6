//! Alert and capture counters, exported over HTTP when built with the
//! `metrics` feature. Without it the same statics are no-ops.

#[cfg(feature = "metrics")]
mod enabled {
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::{routing::get, Json, Router};
    use once_cell::sync::Lazy;
    use prometheus::core::Collector;
    use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
    use serde_json::{json, Value};
    use std::net::SocketAddr;
    use tokio::sync::watch;
    use tracing::{error, info, warn};

    static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

    /// Add `metric` to the watchpost registry. A duplicate registration
    /// leaves the metric usable but unexported.
    fn registered<M: Collector + Clone + 'static>(metric: M) -> M {
        if let Err(e) = REGISTRY.register(Box::new(metric.clone())) {
            warn!(error = %e, "Metric registration failed");
        }
        metric
    }

    // Names below are compile-time constants, so construction cannot fail.
    fn counter(name: &str, help: &str) -> IntCounter {
        registered(IntCounter::new(name, help).expect("valid metric name"))
    }

    fn gauge(name: &str, help: &str) -> IntGauge {
        registered(IntGauge::new(name, help).expect("valid metric name"))
    }

    pub static ALERTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
        let opts = Opts::new("watchpost_alerts_total", "Alerts recorded, by kind");
        registered(IntCounterVec::new(opts, &["kind"]).expect("valid metric name"))
    });

    pub static ALERTS_SUPPRESSED: Lazy<IntCounter> = Lazy::new(|| {
        counter("watchpost_alerts_suppressed_total", "Network alerts dropped by the dedup window")
    });

    pub static PACKETS_INSPECTED: Lazy<IntCounter> =
        Lazy::new(|| counter("watchpost_packets_inspected_total", "Packets run through the rule set"));

    pub static ACTIVE_MONITORS: Lazy<IntGauge> =
        Lazy::new(|| gauge("watchpost_active_monitors", "Monitors currently running"));

    static START_TIME: Lazy<IntGauge> = Lazy::new(|| {
        let g = gauge("watchpost_start_time_seconds", "Daemon start, seconds since the epoch");
        g.set(chrono::Utc::now().timestamp());
        g
    });

    /// Prometheus text exposition of every registered metric.
    pub fn render() -> String {
        TextEncoder::new()
            .encode_to_string(&REGISTRY.gather())
            .unwrap_or_default()
    }

    async fn health() -> Json<Value> {
        Json(json!({
            "status": "ok",
            "active_monitors": ACTIVE_MONITORS.get(),
            "started_at": START_TIME.get(),
        }))
    }

    async fn ready(State(started): State<watch::Receiver<bool>>) -> StatusCode {
        if *started.borrow() && ACTIVE_MONITORS.get() > 0 {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        }
    }

    /// Serve `/health`, `/ready` and `/metrics` until the process exits.
    /// `started` flips to true once the supervisor has started its monitors.
    pub async fn start_server(addr: SocketAddr, started: watch::Receiver<bool>) {
        Lazy::force(&START_TIME);
        Lazy::force(&ALERTS_TOTAL);

        let app = Router::new()
            .route("/health", get(health))
            .route("/ready", get(ready))
            .route("/metrics", get(|| async { render() }))
            .with_state(started);

        let listener = match tokio::net::TcpListener::bind(addr).await {
            Ok(l) => l,
            Err(e) => {
                error!(%addr, error = %e, "Could not bind metrics endpoint");
                return;
            }
        };
        info!(%addr, "Metrics endpoint up");

        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "Metrics endpoint stopped");
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_render_includes_alert_counter() {
            ALERTS_TOTAL.with_label_values(&["NIDS_ALERT"]).inc();
            ACTIVE_MONITORS.set(2);

            let text = render();
            assert!(text.contains("watchpost_alerts_total{kind=\"NIDS_ALERT\"}"));
            assert!(text.contains("watchpost_active_monitors 2"));
        }
    }
}

#[cfg(feature = "metrics")]
pub use enabled::*;

#[cfg(not(feature = "metrics"))]
mod disabled {
    use std::net::SocketAddr;
    use tokio::sync::watch;

    pub struct Counter;

    impl Counter {
        pub fn inc(&self) {}

        pub fn with_label_values(&self, _: &[&str]) -> &Self {
            self
        }
    }

    pub struct Gauge;

    impl Gauge {
        pub fn set(&self, _: i64) {}
    }

    pub static ALERTS_TOTAL: Counter = Counter;
    pub static ALERTS_SUPPRESSED: Counter = Counter;
    pub static PACKETS_INSPECTED: Counter = Counter;
    pub static ACTIVE_MONITORS: Gauge = Gauge;

    pub async fn start_server(_addr: SocketAddr, _started: watch::Receiver<bool>) {}
}

#[cfg(not(feature = "metrics"))]
pub use disabled::*;
