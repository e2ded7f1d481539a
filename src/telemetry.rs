//! Logging and metrics bootstrap.

use actix_web::HttpResponse;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use tracing::Level;
use tracing_subscriber::EnvFilter;

static PROMETHEUS: OnceCell<PrometheusHandle> = OnceCell::new();

/// `RUST_LOG` filtering on top of an INFO baseline.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .try_init();
}

/// Installs the global Prometheus recorder once; later calls return the same handle.
pub fn install_metrics() -> Result<&'static PrometheusHandle, BuildError> {
    PROMETHEUS.get_or_try_init(|| PrometheusBuilder::new().install_recorder())
}

pub async fn metrics_endpoint() -> HttpResponse {
    match PROMETHEUS.get() {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(handle.render()),
        None => HttpResponse::NotFound().finish(),
    }
}
