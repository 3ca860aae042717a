//! HTTP ingestion endpoint
//!
//! Routes:
//! - POST /telemetry  base64 envelope with one gateway event
//! - POST /anomalies  JSON array of anomaly records
//! - GET  /health
//! - GET  /metrics    Prometheus text format
//!
//! Each connection is served on its own task, so events reconcile
//! concurrently.

use crate::io::prometheus::format_prometheus_metrics;
use crate::services::orchestrator::Orchestrator;
use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Body;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Upper bound on a request body
const MAX_BODY_BYTES: usize = 256 * 1024;

fn response(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response<Full<Bytes>> {
    response(status, "application/json", body.to_string())
}

/// Handle one HTTP request
pub async fn handle_request<B>(
    req: Request<B>,
    orchestrator: Arc<Orchestrator>,
    site_id: Arc<String>,
) -> Result<Response<Full<Bytes>>, Infallible>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = match (method, path.as_str()) {
        (Method::GET, "/health") => response(StatusCode::OK, "text/plain", "ok"),
        (Method::GET, "/metrics") => response(
            StatusCode::OK,
            "text/plain; version=0.0.4; charset=utf-8",
            format_prometheus_metrics(orchestrator.metrics(), &site_id),
        ),
        (Method::POST, "/telemetry") => match read_body(req).await {
            Ok(body) => telemetry(&orchestrator, &body).await,
            Err(rejection) => rejection,
        },
        (Method::POST, "/anomalies") => match read_body(req).await {
            Ok(body) => anomalies(&orchestrator, &body).await,
            Err(rejection) => rejection,
        },
        _ => response(StatusCode::NOT_FOUND, "text/plain", "Not Found"),
    };

    Ok(response)
}

async fn read_body<B>(req: Request<B>) -> Result<Bytes, Response<Full<Bytes>>>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match Limited::new(req.into_body(), MAX_BODY_BYTES).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) => {
            warn!(error = %e, "request_body_rejected");
            Err(json_response(
                StatusCode::PAYLOAD_TOO_LARGE,
                json!({"ok": false, "error": e.to_string()}),
            ))
        }
    }
}

async fn telemetry(orchestrator: &Orchestrator, body: &[u8]) -> Response<Full<Bytes>> {
    match orchestrator.handle_envelope(body).await {
        Ok(outcome) => json_response(
            StatusCode::ACCEPTED,
            json!({
                "ok": true,
                "event_id": outcome.event_id.to_string(),
                "door_state": outcome.door_state.as_str(),
                "entities_updated": outcome.entities_updated,
                "failures": outcome.failures,
            }),
        ),
        Err(e) => json_response(StatusCode::BAD_REQUEST, json!({"ok": false, "error": e.to_string()})),
    }
}

async fn anomalies(orchestrator: &Orchestrator, body: &[u8]) -> Response<Full<Bytes>> {
    match orchestrator.handle_anomaly_batch(body).await {
        Ok(outcome) => {
            let status = if outcome.is_success() { StatusCode::OK } else { StatusCode::BAD_GATEWAY };
            json_response(status, json!({"ok": outcome.is_success(), "updated": outcome.updated}))
        }
        Err(e) => json_response(StatusCode::BAD_REQUEST, json!({"ok": false, "error": e.to_string()})),
    }
}

/// Start the ingestion HTTP server
pub async fn start_http_server(
    bind_address: &str,
    port: u16,
    orchestrator: Arc<Orchestrator>,
    site_id: String,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr: SocketAddr = format!("{bind_address}:{port}").parse()?;
    let listener = TcpListener::bind(addr).await?;
    let site_id = Arc::new(site_id);

    info!(addr = %addr, site = %site_id, "http_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let orchestrator = orchestrator.clone();
                        let site_id = site_id.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let orchestrator = orchestrator.clone();
                                let site_id = site_id.clone();
                                async move { handle_request(req, orchestrator, site_id).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "http_connection_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "http_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("http_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}
