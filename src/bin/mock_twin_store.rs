//! Mock twin store HTTP server
//!
//! Serves the digital twin GET/PATCH interface from memory for local
//! end-to-end runs of the reconciler.
//!
//! Routes:
//! - GET   /digitaltwins/{id}  current twin document
//! - PATCH /digitaltwins/{id}  JSON Patch body of replace ops
//! - GET   /patches            every patch received so far
//!
//! Usage:
//!   cargo run --bin mock_twin_store -- --port 9000
//!   TWIN_STORE_URL=http://localhost:9000 cargo run --bin twin-reconciler

use bytes::Bytes;
use clap::Parser;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
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
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use twin_reconciler::domain::TwinError;
use twin_reconciler::io::{InMemoryTwinStore, PatchOp, TwinStore};

#[derive(Parser, Debug)]
#[command(name = "mock_twin_store")]
#[command(about = "In-memory digital twin store for local simulation")]
struct Args {
    /// HTTP port to listen on
    #[arg(short, long, default_value = "9000")]
    port: u16,

    /// Twins created empty at startup
    #[arg(long, value_delimiter = ',', default_value = "Door,Room1,Room2")]
    twins: Vec<String>,

    /// Artificial latency per call (ms)
    #[arg(long, default_value = "0")]
    latency_ms: u64,
}

fn response(status: StatusCode, body: serde_json::Value) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body.to_string())));
    *response.status_mut() = status;
    response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn error_response(e: &TwinError) -> Response<Full<Bytes>> {
    let status = match e {
        TwinError::NotFound(_) => StatusCode::NOT_FOUND,
        TwinError::Conflict(_) => StatusCode::CONFLICT,
        TwinError::Unavailable(_) | TwinError::Timeout(_) => StatusCode::SERVICE_UNAVAILABLE,
    };
    response(status, json!({"error": {"code": e.kind(), "message": e.to_string()}}))
}

async fn handle_request(
    req: Request<Incoming>,
    store: Arc<InMemoryTwinStore>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    if method == Method::GET && path == "/patches" {
        let patches: Vec<_> = store
            .patches()
            .into_iter()
            .map(|p| json!({"twin_id": p.twin_id, "ops": p.ops}))
            .collect();
        return Ok(response(StatusCode::OK, json!(patches)));
    }

    let Some(twin_id) = path.strip_prefix("/digitaltwins/").filter(|id| !id.is_empty()) else {
        return Ok(response(StatusCode::NOT_FOUND, json!({"error": "not found"})));
    };

    let resp = match method {
        Method::GET => match store.get_twin(twin_id).await {
            Ok(snapshot) => {
                let mut doc = snapshot.to_value();
                if let Some(obj) = doc.as_object_mut() {
                    obj.insert("$dtId".to_string(), json!(twin_id));
                }
                response(StatusCode::OK, doc)
            }
            Err(e) => error_response(&e),
        },
        Method::PATCH => {
            let body = match req.into_body().collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(e) => {
                    warn!(error = %e, "patch_body_read_failed");
                    return Ok(response(StatusCode::BAD_REQUEST, json!({"error": e.to_string()})));
                }
            };
            match serde_json::from_slice::<Vec<PatchOp>>(&body) {
                Ok(ops) => match store.apply_patch(twin_id, &ops).await {
                    Ok(()) => {
                        let properties: Vec<&str> = ops.iter().map(PatchOp::property).collect();
                        info!(twin_id = %twin_id, properties = ?properties, "twin_patched");
                        let mut resp = Response::new(Full::new(Bytes::new()));
                        *resp.status_mut() = StatusCode::NO_CONTENT;
                        resp
                    }
                    Err(e) => error_response(&e),
                },
                Err(e) => response(StatusCode::BAD_REQUEST, json!({"error": e.to_string()})),
            }
        }
        _ => response(StatusCode::METHOD_NOT_ALLOWED, json!({"error": "method not allowed"})),
    };

    Ok(resp)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    let args = Args::parse();

    let ids: Vec<&str> = args.twins.iter().map(String::as_str).collect();
    let store = Arc::new(InMemoryTwinStore::with_twins(&ids));
    if args.latency_ms > 0 {
        store.set_latency(Some(std::time::Duration::from_millis(args.latency_ms)));
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = TcpListener::bind(addr).await?;
    info!(port = %args.port, twins = ?store.twin_ids(), "mock_twin_store_started");

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let store = store.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let store = store.clone();
                async move { handle_request(req, store).await }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!(error = %e, "mock_http_error");
            }
        });
    }
}
