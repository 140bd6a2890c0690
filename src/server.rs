//! HTTP surface: the LFS REST API behind the smart-HTTP dispatcher.

use axum::body::{Body, Bytes};
use axum::extract::{Path, Request, State};
use axum::http::header::{HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_lite::StreamExt;
use serde_json::{json, Value};
use std::future::Future;
use std::io::{self, Write};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;

use crate::backend::{BackendRequest, GitHttpBackend, SmartHttpBackend};
use crate::batch::{negotiate, BatchRequest, BatchRequestObject, LFS_MEDIA_TYPE};
use crate::config::{Config, Links};
use crate::dispatch::{self, Target};
use crate::store::ObjectStore;
use crate::stream::reader_stream;
use crate::{Error, Oid, Result};

/// Header a trusted reverse proxy sets to the authenticated user.
pub const FORWARDED_USER_HEADER: &str = "x-forwarded-user";

/// Body chunks buffered between the connection and the disk writer.
const UPLOAD_QUEUE_DEPTH: usize = 16;

#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    links: Arc<Links>,
    backend: Arc<dyn SmartHttpBackend>,
}

/// Git LFS server.
pub struct LfsServer {
    state: AppState,
}

impl LfsServer {
    /// Server using `git http-backend` for smart-HTTP requests.
    pub fn new(config: Config) -> Result<Self> {
        let backend = GitHttpBackend::new(&config.project_root, &config.git_http_backend);
        Self::with_backend(config, Arc::new(backend))
    }

    /// Server using a custom smart-HTTP backend.
    pub fn with_backend(config: Config, backend: Arc<dyn SmartHttpBackend>) -> Result<Self> {
        let links = config.links()?;
        Ok(Self {
            state: AppState {
                config: Arc::new(config),
                links: Arc::new(links),
                backend,
            },
        })
    }

    pub fn config(&self) -> &Config {
        &self.state.config
    }

    /// Build the router (useful for testing).
    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    /// Serve on the configured address until Ctrl-C.
    pub async fn serve(self) -> Result<()> {
        let listener = TcpListener::bind(self.state.config.bind_addr).await?;
        self.serve_on(listener, shutdown_signal()).await
    }

    /// Serve on an already bound listener until `shutdown` resolves.
    pub async fn serve_on<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tracing::info!(
            addr = %listener.local_addr()?,
            project_root = %self.state.config.project_root.display(),
            server_url = %self.state.config.server_url,
            "LFS server listening"
        );
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "cannot listen for Ctrl-C, running until killed");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

/// The LFS routes sit behind an empty outer router so the dispatcher sees
/// every request before any LFS route is matched.
fn build_router(state: AppState) -> Router {
    let lfs = Router::new()
        .route("/:repo/info/lfs/objects", post(create_object))
        .route("/:repo/info/lfs/objects/batch", post(batch))
        .route("/:repo/info/lfs/objects/:oid", get(object_metadata))
        .route("/:repo/lfs/:oid", get(download).put(upload))
        .fallback(not_found)
        .with_state(state.clone());

    Router::new()
        .fallback_service(lfs)
        .layer(middleware::from_fn_with_state(state, dispatch_request))
        .layer(TraceLayer::new_for_http())
}

/// Send smart-HTTP paths to the backend before any LFS routing happens.
async fn dispatch_request(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    if dispatch::route(&path) == Target::Lfs {
        return next.run(request).await;
    }

    tracing::debug!(
        repo = dispatch::repo_of(&path).unwrap_or("-"),
        %path,
        "forwarding to smart-HTTP backend"
    );
    let (parts, body) = request.into_parts();
    let remote_user = parts
        .headers
        .get(FORWARDED_USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let backend_request = BackendRequest {
        method: parts.method,
        path,
        query: parts.uri.query().map(str::to_string),
        headers: parts.headers,
        remote_user,
        body,
    };

    state
        .backend
        .serve(backend_request)
        .await
        .unwrap_or_else(IntoResponse::into_response)
}

async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "message": "Not Found" }))).into_response()
}

/// Legacy API: announce an upload, get its URL.
async fn create_object(
    State(state): State<AppState>,
    Path(repo): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>)> {
    let object: BatchRequestObject = serde_json::from_slice(&body)?;
    ObjectStore::validate_repo(&repo)?;
    let oid = Oid::parse(&object.oid)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "_links": {
                "upload": { "href": state.links.object_href(&repo, oid.as_str()) },
            },
        })),
    ))
}

/// Legacy API: metadata of a stored object.
async fn object_metadata(
    State(state): State<AppState>,
    Path((repo, oid)): Path<(String, String)>,
) -> Result<Json<Value>> {
    let store = state.config.store(&repo)?;
    let size = {
        let oid = oid.clone();
        blocking(move || store.size(&oid)).await?
    };

    Ok(Json(json!({
        "oid": oid,
        "size": size,
        "_links": {
            "download": { "href": state.links.object_href(&repo, &oid) },
        },
    })))
}

async fn batch(
    State(state): State<AppState>,
    Path(repo): Path<String>,
    body: Bytes,
) -> Result<Response> {
    let request: BatchRequest = serde_json::from_slice(&body)?;
    let store = state.config.store(&repo)?;
    let links = state.links.clone();
    let response = blocking(move || negotiate(&store, &links, &repo, &request)).await?;

    Ok(([(CONTENT_TYPE, LFS_MEDIA_TYPE)], Json(response)).into_response())
}

/// Stream the request body into the store.
///
/// The body is forwarded chunk by chunk to a blocking writer. If the client
/// goes away mid-upload the writer sees an error and the staged file is
/// discarded.
async fn upload(
    State(state): State<AppState>,
    Path((repo, oid)): Path<(String, String)>,
    body: Body,
) -> Result<Json<Value>> {
    let store = state.config.store(&repo)?;
    Oid::parse(&oid)?;

    let (tx, mut rx) = mpsc::channel::<io::Result<Bytes>>(UPLOAD_QUEUE_DEPTH);
    let writer = tokio::task::spawn_blocking(move || -> Result<u64> {
        let mut staged = store.writer(&oid)?;
        while let Some(chunk) = rx.blocking_recv() {
            staged.write_all(&chunk?)?;
        }
        staged.commit()
    });

    let mut stream = body.into_data_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| io::Error::new(io::ErrorKind::ConnectionAborted, e));
        let aborted = chunk.is_err();
        // A closed channel means the writer already failed.
        if tx.send(chunk).await.is_err() || aborted {
            break;
        }
    }
    drop(tx);

    writer.await.map_err(join_error)??;
    Ok(Json(json!({ "ok": true })))
}

async fn download(
    State(state): State<AppState>,
    Path((repo, oid)): Path<(String, String)>,
) -> Result<Response> {
    let store = state.config.store(&repo)?;
    let (file, size) = blocking(move || {
        let file = store.open(&oid)?;
        let size = file.metadata()?.len();
        Ok((file, size))
    })
    .await?;

    let body = Body::from_stream(reader_stream(tokio::fs::File::from_std(file)));
    let headers = [
        (CONTENT_TYPE, HeaderValue::from_static("application/octet-stream")),
        (CONTENT_LENGTH, HeaderValue::from(size)),
    ];
    Ok((headers, body).into_response())
}

/// Run filesystem work off the async workers.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(join_error)?
}

fn join_error(e: tokio::task::JoinError) -> Error {
    Error::Io(io::Error::new(io::ErrorKind::Other, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_construction() {
        let server = LfsServer::new(Config::default()).unwrap();
        assert_eq!(server.config().bind_addr.port(), 5000);
    }

    #[test]
    fn rejects_bad_server_url() {
        let config = Config {
            server_url: "not a url".into(),
            ..Config::default()
        };
        assert!(LfsServer::new(config).is_err());
    }

    #[test]
    fn router_builds() {
        let server = LfsServer::new(Config::default()).unwrap();
        let _router = server.router();
    }
}
