//! HTTP/JSON query endpoint.
//!
//! A small hyper server that keeps one store resident and exposes the five
//! query operations. Every query runs on the blocking pool; the store itself
//! is loaded once through [`SharedStore`] before the listener accepts
//! connections.
//!
//! Routes:
//! - `GET  /healthz`
//! - `GET  /status`
//! - `POST /outbound-predicates` `{ "subject" }`
//! - `POST /entity-names` `{ "mids": [..] }`
//! - `POST /neighborhood` `{ "subject", "max_per_predicate"?, "follow_cvt"? }`
//! - `POST /filtered` `{ "subject", "predicate" }`
//! - `POST /chain` `{ "subject", "chain": [..] }`

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::CONTENT_TYPE;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

use rdfpages_store::{QueryService, SharedStore, StoreConfig, Subgraph};

use crate::logging::DEFAULT_LOG_FILE;

/// Default port of the query service.
pub const DEFAULT_PORT: u16 = 9358;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServeConfig {
    pub listen: SocketAddr,
    /// Empty disables the log file.
    pub log_file: PathBuf,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            log_file: PathBuf::from(DEFAULT_LOG_FILE),
        }
    }
}

struct ServerState {
    store: Arc<SharedStore>,
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct SubjectRequest {
    subject: String,
}

#[derive(Debug, Deserialize)]
struct NamesRequest {
    mids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct NeighborhoodRequest {
    subject: String,
    #[serde(default)]
    max_per_predicate: Option<usize>,
    #[serde(default = "default_follow_cvt")]
    follow_cvt: bool,
}

fn default_follow_cvt() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct FilteredRequest {
    subject: String,
    predicate: String,
}

#[derive(Debug, Deserialize)]
struct ChainRequest {
    subject: String,
    chain: Vec<String>,
}

#[derive(Debug, Serialize)]
struct PredicatesResponse {
    predicates: Vec<String>,
}

#[derive(Debug, Serialize)]
struct NamesResponse {
    names: Vec<String>,
}

#[derive(Debug, Serialize)]
struct GraphResponse {
    graph: Option<Subgraph>,
}

#[derive(Debug, Serialize)]
struct ChainResponse {
    sequences: Option<Vec<Vec<String>>>,
}

// ============================================================================
// Server
// ============================================================================

pub fn cmd_serve(store: StoreConfig, config: ServeConfig) -> Result<()> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| anyhow!("failed to initialize tokio runtime: {e}"))?;

    rt.block_on(async move { serve_async(store, config).await })
}

async fn serve_async(store: StoreConfig, config: ServeConfig) -> Result<()> {
    let shared = Arc::new(SharedStore::new(store));
    tokio::task::spawn_blocking({
        let shared = shared.clone();
        move || shared.get_or_init()
    })
    .await
    .map_err(|e| anyhow!("serve: failed to join loader task: {e}"))??;

    let listener = TcpListener::bind(config.listen)
        .await
        .map_err(|e| anyhow!("serve: failed to bind {}: {e}", config.listen))?;
    let bound = listener
        .local_addr()
        .map_err(|e| anyhow!("serve: failed to read bound addr: {e}"))?;
    tracing::info!(addr = %bound, "listening");

    accept_loop(listener, Arc::new(ServerState { store: shared })).await
}

async fn accept_loop(listener: TcpListener, state: Arc<ServerState>) -> Result<()> {
    loop {
        let (stream, _peer) = listener
            .accept()
            .await
            .map_err(|e| anyhow!("serve: accept failed: {e}"))?;
        let io = TokioIo::new(stream);
        let state = state.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| handle_request(req, state.clone()));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                tracing::warn!(error = %e, "connection error");
            }
        });
    }
}

async fn handle_request(
    req: Request<Incoming>,
    state: Arc<ServerState>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let resp = match (method, path.as_str()) {
        (Method::GET, "/healthz") => text_response(StatusCode::OK, "ok\n"),
        (Method::GET, "/status") => json_response(StatusCode::OK, &status_payload(&state)),
        (Method::POST, "/outbound-predicates") => {
            let body = read_body(req).await?;
            respond(
                run_query(&state, &body, |service, req: SubjectRequest| PredicatesResponse {
                    predicates: service.get_outbound_predicates(&req.subject),
                })
                .await,
            )
        }
        (Method::POST, "/entity-names") => {
            let body = read_body(req).await?;
            respond(
                run_query(&state, &body, |service, req: NamesRequest| NamesResponse {
                    names: service.get_entity_names(&req.mids),
                })
                .await,
            )
        }
        (Method::POST, "/neighborhood") => {
            let body = read_body(req).await?;
            respond(
                run_query(&state, &body, |service, req: NeighborhoodRequest| GraphResponse {
                    graph: service.get_simple_object_predicates_and_cvts(
                        &req.subject,
                        req.max_per_predicate,
                        req.follow_cvt,
                    ),
                })
                .await,
            )
        }
        (Method::POST, "/filtered") => {
            let body = read_body(req).await?;
            respond(
                run_query(&state, &body, |service, req: FilteredRequest| GraphResponse {
                    graph: service
                        .get_simple_object_filtered_predicate_and_objects(&req.subject, &req.predicate),
                })
                .await,
            )
        }
        (Method::POST, "/chain") => {
            let body = read_body(req).await?;
            respond(
                run_query(&state, &body, |service, req: ChainRequest| ChainResponse {
                    sequences: service.find_node_sequences_on_predicate_chain(&req.subject, &req.chain),
                })
                .await,
            )
        }
        _ => json_error(StatusCode::NOT_FOUND, "not found"),
    };
    Ok(resp)
}

async fn read_body(req: Request<Incoming>) -> Result<Vec<u8>, hyper::Error> {
    Ok(req.into_body().collect().await?.to_bytes().to_vec())
}

/// Parse the request, then run `op` against the loaded store on the
/// blocking pool.
async fn run_query<Req, Resp, F>(state: &Arc<ServerState>, body: &[u8], op: F) -> Result<Resp>
where
    Req: DeserializeOwned + Send + 'static,
    Resp: Send + 'static,
    F: FnOnce(&QueryService, Req) -> Resp + Send + 'static,
{
    let request: Req = serde_json::from_slice(body)
        .map_err(|e| anyhow!("failed to parse request JSON: {e}"))?;
    let shared = state.store.clone();
    tokio::task::spawn_blocking(move || -> Result<Resp> {
        let service = QueryService::new(shared.get_or_init()?);
        Ok(op(&service, request))
    })
    .await
    .map_err(|e| anyhow!("query task failed: {e}"))?
}

fn status_payload(state: &ServerState) -> serde_json::Value {
    match state.store.get() {
        Some(store) => {
            let tables = store.tables();
            serde_json::json!({
                "loaded": true,
                "dir": state.store.config().dir.display().to_string(),
                "subjects": tables.primary.len(),
                "split_subjects": tables.overflow.len(),
                "cvts": tables.cvt.len(),
                "names": tables.names.len(),
                "ghosts": tables.ghosts.len(),
                "data_bytes": store.arena().len(),
            })
        }
        None => serde_json::json!({ "loaded": false }),
    }
}

fn respond<T: Serialize>(result: Result<T>) -> Response<Full<Bytes>> {
    match result {
        Ok(v) => json_response(StatusCode::OK, &v),
        Err(e) => json_error(StatusCode::BAD_REQUEST, &e.to_string()),
    }
}

fn text_response(status: StatusCode, body: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::from_static(b"internal error"))))
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<Full<Bytes>> {
    let body = serde_json::to_vec(value).unwrap_or_else(|_| b"{\"error\":\"serialize\"}".to_vec());
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body)))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::from_static(b"{\"error\":\"internal\"}"))))
}

fn json_error(status: StatusCode, msg: &str) -> Response<Full<Bytes>> {
    let v = serde_json::json!({ "error": msg });
    json_response(status, &v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn built_store(dir: &std::path::Path) -> StoreConfig {
        let input = dir.join("fb_en.txt");
        std::fs::write(
            &input,
            "m.a\ttype.object.name\tAlpha\n\
             m.a\tp.knows\tm.b\n\
             m.a\tp.role\tm.cvt\n\
             m.b\ttype.object.name\tBeta\n\
             m.cvt\tp.who\tm.b\n",
        )
        .unwrap();
        rdfpages_store::build_store(&Default::default(), dir, &[input]).unwrap();
        StoreConfig::new(dir)
    }

    async fn start(dir: &std::path::Path) -> SocketAddr {
        let shared = Arc::new(SharedStore::new(built_store(dir)));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(accept_loop(listener, Arc::new(ServerState { store: shared })));
        addr
    }

    async fn post(addr: SocketAddr, path: &str, body: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!(
            "POST {path} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\n\
             Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    fn json_body(response: &str) -> serde_json::Value {
        let (_, body) = response.split_once("\r\n\r\n").unwrap();
        serde_json::from_str(body).unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_query_routes() {
        let dir = tempfile::tempdir().unwrap();
        let addr = start(dir.path()).await;

        let names = json_body(&post(addr, "/entity-names", r#"{"mids":["m.b","m.zz"]}"#).await);
        assert_eq!(names["names"], serde_json::json!(["Beta", ""]));

        let outbound =
            json_body(&post(addr, "/outbound-predicates", r#"{"subject":"m.a"}"#).await);
        assert_eq!(outbound["predicates"], serde_json::json!(["p.knows", "p.role p.who"]));

        let chain = json_body(
            &post(addr, "/chain", r#"{"subject":"m.a","chain":["p.role","p.who"]}"#).await,
        );
        assert_eq!(chain["sequences"], serde_json::json!([["m.cvt", "m.b"]]));

        let graph = json_body(&post(addr, "/neighborhood", r#"{"subject":"m.a"}"#).await);
        assert_eq!(graph["graph"]["root"], 0);
        assert_eq!(graph["graph"]["nodes"][0]["mid"], "m.a");
        assert_eq!(graph["graph"]["nodes"][0]["name"], "Alpha");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_bad_request_and_unknown_route() {
        let dir = tempfile::tempdir().unwrap();
        let addr = start(dir.path()).await;

        let bad = post(addr, "/filtered", r#"{"subject":"m.a"}"#).await;
        assert!(bad.starts_with("HTTP/1.1 400"));
        assert!(json_body(&bad)["error"].as_str().unwrap().contains("predicate"));

        let missing = post(addr, "/nope", "{}").await;
        assert!(missing.starts_with("HTTP/1.1 404"));
    }
}
