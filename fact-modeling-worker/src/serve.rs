use axum::{routing::get, Router};
use health::HealthRegistry;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Probe and metrics surface. Everything this service exports is a counter,
/// so the recorder is installed with default buckets and no request-level
/// instrumentation; the routes themselves are not worth measuring.
pub fn app(liveness: HealthRegistry) -> Router {
    let recorder = setup_metrics_recorder();
    Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route(
            "/_liveness",
            get(move || std::future::ready(liveness.get_status())),
        )
        .route(
            "/metrics",
            get(move || std::future::ready(recorder.render())),
        )
}

async fn index() -> &'static str {
    "fact modeling worker"
}

pub async fn serve(router: Router, bind: &str) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

fn setup_metrics_recorder() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("metrics recorder installed twice")
}
