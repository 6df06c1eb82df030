use std::future::ready;
use std::time::Instant;

use axum::body::Body;
use axum::extract::MatchedPath;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use health::HealthRegistry;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

pub async fn index() -> &'static str {
    "campaign notifier"
}

/// Routes for probes and, when a recorder is installed, Prometheus scraping.
pub fn router(liveness: HealthRegistry, recorder: Option<PrometheusHandle>) -> Router {
    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/_liveness", get(move || ready(liveness.get_status())));

    match recorder {
        Some(recorder) => router
            .route("/metrics", get(move || ready(recorder.render())))
            .layer(axum::middleware::from_fn(track_metrics)),
        None => router,
    }
}

/// Installs the global Prometheus recorder. Can only succeed once per process.
pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    const BUCKETS: &[f64] = &[
        1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0,
    ];

    PrometheusBuilder::new()
        .set_buckets(BUCKETS)?
        .install_recorder()
}

pub async fn serve(router: Router, bind: &str) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, router).await
}

async fn track_metrics(req: Request<Body>, next: Next) -> impl IntoResponse {
    let start = Instant::now();

    let path = match req.extensions().get::<MatchedPath>() {
        Some(matched_path) => matched_path.as_str().to_owned(),
        None => req.uri().path().to_owned(),
    };
    let method = req.method().to_string();

    let response = next.run(req).await;

    let labels = [
        ("method", method),
        ("path", path),
        ("status", response.status().as_u16().to_string()),
    ];
    metrics::counter!("http_requests_total", &labels).increment(1);
    metrics::histogram!("http_requests_duration_seconds", &labels)
        .record(start.elapsed().as_secs_f64());

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tower::ServiceExt;

    async fn get_path(router: Router, path: &str) -> (StatusCode, String) {
        let response = router
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn index_and_readiness() {
        let registry = HealthRegistry::new("liveness");

        let (status, body) = get_path(router(registry.clone(), None), "/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "campaign notifier");

        let (status, _) = get_path(router(registry, None), "/_readiness").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn liveness_follows_registry() {
        let registry = HealthRegistry::new("liveness");
        let handle = registry.register("pipeline", Duration::from_secs(30));

        let (status, body) = get_path(router(registry.clone(), None), "/_liveness").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.contains("Starting"));

        handle.report_healthy();
        let (status, _) = get_path(router(registry, None), "/_liveness").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_route_needs_a_recorder() {
        let registry = HealthRegistry::new("liveness");
        let (status, _) = get_path(router(registry, None), "/metrics").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
