use std::time::Instant;

use axum::body::Body;
use axum::extract::{MatchedPath, State};
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tokio::sync::watch;

use crate::connection::ConnectionState;

pub async fn index() -> &'static str {
    "rail feed consumer"
}

/// Alive until the consumer has given up reconnecting for good.
pub fn liveness_status(state: ConnectionState) -> StatusCode {
    match state {
        ConnectionState::Failed => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    }
}

/// Ready only while the subscription is up.
pub fn readiness_status(state: ConnectionState) -> StatusCode {
    match state {
        ConnectionState::Subscribed => StatusCode::OK,
        _ => StatusCode::SERVICE_UNAVAILABLE,
    }
}

async fn liveness(State(state): State<watch::Receiver<ConnectionState>>) -> impl IntoResponse {
    let current = *state.borrow();
    (liveness_status(current), current.as_str())
}

async fn readiness(State(state): State<watch::Receiver<ConnectionState>>) -> impl IntoResponse {
    let current = *state.borrow();
    (readiness_status(current), current.as_str())
}

pub fn health_router(state: watch::Receiver<ConnectionState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/_liveness", get(liveness))
        .route("/_readiness", get(readiness))
        .with_state(state)
}

/// Add the prometheus endpoint and request metrics to a router, should be called last.
pub fn setup_metrics_routes(router: Router, handle: PrometheusHandle) -> Router {
    router
        .route(
            "/metrics",
            get(move || std::future::ready(handle.render())),
        )
        .layer(axum::middleware::from_fn(track_metrics))
}

pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

pub async fn track_metrics(req: Request<Body>, next: Next) -> impl IntoResponse {
    let start = Instant::now();

    let path = if let Some(matched_path) = req.extensions().get::<MatchedPath>() {
        matched_path.as_str().to_owned()
    } else {
        req.uri().path().to_owned()
    };
    let method = req.method().clone();

    let response = next.run(req).await;

    let labels = [
        ("method", method.to_string()),
        ("path", path),
        ("status", response.status().as_u16().to_string()),
    ];
    metrics::counter!("http_requests_total", &labels).increment(1);
    metrics::histogram!("http_requests_duration_seconds", &labels)
        .record(start.elapsed().as_secs_f64());

    response
}

pub async fn serve(router: Router, bind: &str) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_liveness_only_fails_once_failed() {
        assert_eq!(liveness_status(ConnectionState::Disconnected), StatusCode::OK);
        assert_eq!(liveness_status(ConnectionState::Connecting), StatusCode::OK);
        assert_eq!(liveness_status(ConnectionState::Subscribed), StatusCode::OK);
        assert_eq!(
            liveness_status(ConnectionState::Failed),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_readiness_requires_subscription() {
        assert_eq!(readiness_status(ConnectionState::Subscribed), StatusCode::OK);
        for state in [
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Failed,
        ] {
            assert_eq!(readiness_status(state), StatusCode::SERVICE_UNAVAILABLE);
        }
    }

    #[tokio::test]
    async fn test_health_endpoints_follow_the_connection() {
        let (tx, rx) = watch::channel(ConnectionState::Connecting);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, health_router(rx)).await.unwrap();
        });

        let status = |path: &'static str| async move {
            let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
            let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
            tokio::io::AsyncWriteExt::write_all(&mut stream, request.as_bytes())
                .await
                .unwrap();
            let mut response = String::new();
            tokio::io::AsyncReadExt::read_to_string(&mut stream, &mut response)
                .await
                .unwrap();
            response
        };

        assert!(status("/_readiness").await.starts_with("HTTP/1.1 503"));
        assert!(status("/_liveness").await.starts_with("HTTP/1.1 200"));

        tx.send_replace(ConnectionState::Subscribed);
        assert!(status("/_readiness").await.starts_with("HTTP/1.1 200"));

        tx.send_replace(ConnectionState::Failed);
        assert!(status("/_liveness").await.starts_with("HTTP/1.1 503"));
    }
}
