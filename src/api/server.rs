//! HTTP Server
//!
//! axum front end: every request under `/v1/` is handed to the gateway and
//! the reply is written back with end-to-end headers only.

use crate::error::RoxyError;
use crate::{Gateway, GatewayReply};
use axum::body::Body;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, HeaderName, Method, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use bytes::Bytes;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{debug, info, warn};

/// Largest accepted request body
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Response headers scoped to the upstream connection
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "te",
    "trailer",
    "upgrade",
    "content-length",
];

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/// Build the gateway router
pub fn router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/v1/*path", any(proxy))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(gateway)
}

async fn proxy(
    State(gateway): State<Arc<Gateway>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    debug!(%method, %uri, bytes = body.len(), "inbound request");

    match gateway.handle(&method, &headers, body).await {
        Ok(reply) => reply.into_response(),
        Err(e) => {
            log_failure(&e);
            e.into_response()
        }
    }
}

fn log_failure(error: &RoxyError) {
    match error {
        RoxyError::Internal(_) | RoxyError::UpstreamUnreachable { .. } => {
            warn!(error = %error, status = error.status().as_u16(), "request failed")
        }
        _ => debug!(error = %error, status = error.status().as_u16(), "request rejected"),
    }
}

impl IntoResponse for GatewayReply {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        let headers = response.headers_mut();
        for (name, value) in self.headers.iter() {
            if !is_hop_by_hop(name) {
                headers.append(name.clone(), value.clone());
            }
        }
        response
    }
}

/// Bind `addr` and serve until `shutdown` resolves
pub async fn serve<F>(gateway: Arc<Gateway>, addr: &str, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr).await?;
    info!(address = %listener.local_addr()?, "Server listening");

    axum::serve(listener, router(gateway))
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        () = terminate => {
            info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigLoader;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn app() -> Router {
        let config = ConfigLoader::from_yaml(
            r#"
listen_addr: ":8080"
api_keys:
  - key: "sk-test"
    provider: openai
    max_rpm: 1
    max_tpm: 1000
"#,
        )
        .unwrap()
        .into_config();
        router(Arc::new(Gateway::from_config(&config).unwrap()))
    }

    #[tokio::test]
    async fn test_malformed_body_renders_error_envelope() {
        let response = app()
            .oneshot(
                Request::post("/v1/chat/completions")
                    .body(Body::from("not json"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"]["type"], "invalid_request_error");
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let response = app()
            .oneshot(
                Request::post("/v1/chat/completions")
                    .body(Body::from(vec![b'a'; MAX_BODY_BYTES + 1]))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_paths_outside_v1_not_routed() {
        let response = app()
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_reply_drops_hop_by_hop_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", "keep-alive".parse().unwrap());
        headers.insert("transfer-encoding", "chunked".parse().unwrap());
        headers.insert("x-request-id", "abc".parse().unwrap());

        let reply = GatewayReply {
            status: StatusCode::CREATED,
            headers,
            body: Bytes::from_static(b"{}"),
            source: crate::ReplySource::Cache,
        };
        let response = reply.into_response();

        assert_eq!(response.status(), StatusCode::CREATED);
        assert!(response.headers().get("connection").is_none());
        assert!(response.headers().get("transfer-encoding").is_none());
        assert_eq!(response.headers()["x-request-id"], "abc");
    }
}
