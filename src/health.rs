use std::net::SocketAddr;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::{error, info};

async fn ok() -> &'static str {
    "OK"
}

pub fn router() -> Router {
    Router::new().route("/", get(ok)).route("/health", get(ok))
}

/// Serves the liveness probe until the process exits. Bind failures are logged, not fatal.
pub async fn serve(addr: SocketAddr) {
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("Health endpoint could not bind {addr}: {err}");
            return;
        }
    };
    info!("Health endpoint listening on {addr}");
    if let Err(err) = axum::serve(listener, router()).await {
        error!("Health endpoint stopped: {err}");
    }
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;

    #[tokio::test]
    async fn answers_ok_on_both_routes() {
        for uri in ["/", "/health"] {
            let response = router()
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let body = to_bytes(response.into_body(), 1024).await.unwrap();
            assert_eq!(&body[..], b"OK");
        }
    }

    #[tokio::test]
    async fn unknown_routes_are_not_found() {
        let response = router()
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
