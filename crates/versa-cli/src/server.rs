//! Dev Server Shim, per spec.md §4 ("Dev Server Shim" bullet) and §6
//! ("HTTP middleware"): serves compiled output from the in-memory HMR
//! cache when available, otherwise falls through to static files or an
//! upstream proxy, and broadcasts HMR events over a WebSocket.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Request, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::sync::broadcast;
use tower::ServiceExt;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use versa_core::VersaCore;
use versa_core::hmr::HmrEvent;

const HMR_LOADER_PATH: &str = "/__versa/hmr-loader.js";
const HMR_SOCKET_PATH: &str = "/__versa/hmr";
const HMR_LOADER_JS: &str = include_str!("../assets/hmr-loader.js");

/// JSON shape for spec.md §6's "Dev-server wire protocol".
fn event_to_json(event: &HmrEvent) -> String {
    let value = match event {
        HmrEvent::CssReload => serde_json::json!({ "kind": "css-reload" }),
        HmrEvent::ModuleUpdate { path } => serde_json::json!({ "kind": "module-update", "path": path }),
        HmrEvent::SfcUpdate { path } => serde_json::json!({ "kind": "sfc-update", "path": path }),
    };
    value.to_string()
}

struct ServerState {
    core: Arc<VersaCore>,
    hmr_tx: broadcast::Sender<HmrEvent>,
    proxy_url: Option<String>,
    assets_omit: bool,
}

/// Builds the dev server's router, per spec.md §6's middleware
/// responsibilities.
pub fn build_router(core: Arc<VersaCore>, hmr_tx: broadcast::Sender<HmrEvent>, proxy_url: Option<String>, assets_omit: bool) -> Router {
    let state = Arc::new(ServerState { core, hmr_tx, proxy_url, assets_omit });

    Router::new()
        .route(HMR_LOADER_PATH, get(hmr_loader))
        .route(HMR_SOCKET_PATH, get(hmr_socket))
        .fallback(fallback)
        .with_state(state)
        .layer(middleware::from_fn(cache_control_for_js))
        .layer(CorsLayer::permissive())
}

async fn hmr_loader() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "application/javascript; charset=utf-8")], HMR_LOADER_JS)
}

async fn hmr_socket(ws: WebSocketUpgrade, State(state): State<Arc<ServerState>>) -> Response {
    let rx = state.hmr_tx.subscribe();
    ws.on_upgrade(move |socket| broadcast_to_socket(socket, rx))
}

async fn broadcast_to_socket(mut socket: WebSocket, mut rx: broadcast::Receiver<HmrEvent>) {
    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Ok(event) => {
                        if socket.send(Message::Text(event_to_json(&event).into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = socket.recv() => {
                if incoming.is_none() {
                    break;
                }
            }
        }
    }
}

/// `Cache-Control: no-cache, no-store, must-revalidate` on every `.js`
/// response, per spec.md §6.
async fn cache_control_for_js(req: Request, next: Next) -> Response {
    let is_js = req.uri().path().ends_with(".js");
    let mut response = next.run(req).await;
    if is_js {
        response.headers_mut().insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache, no-store, must-revalidate"));
    }
    response
}

/// Serve the request path from the HMR cache if it names an
/// HMR-instrumented SFC's output, per spec.md §4.5 "Dev server
/// interception"; otherwise fall through to static files or a
/// configured reverse proxy.
async fn fallback(State(state): State<Arc<ServerState>>, req: Request) -> Response {
    let path = req.uri().path().to_string();
    let out_dir = state.core.config().compiler_options.out_dir.clone();
    let dest = out_dir.join(path.trim_start_matches('/'));

    if let Some(entry) = state.core.hmr().find_by_dest(&dest) {
        return ([(header::CONTENT_TYPE, "application/javascript; charset=utf-8")], entry.code).into_response();
    }

    if let Some(proxy_url) = &state.proxy_url {
        if !(state.assets_omit && looks_like_static_asset(&path)) {
            return proxy_upstream(proxy_url, &path).await;
        }
    }

    let service = ServeDir::new(&out_dir);
    match service.oneshot(req).await {
        Ok(response) => response.into_response(),
        Err(infallible) => match infallible {},
    }
}

fn looks_like_static_asset(path: &str) -> bool {
    matches!(path.rsplit('.').next(), Some("png" | "jpg" | "jpeg" | "svg" | "gif" | "ico" | "woff" | "woff2"))
}

async fn proxy_upstream(proxy_url: &str, path: &str) -> Response {
    let url = format!("{}{}", proxy_url.trim_end_matches('/'), path);
    match reqwest::get(&url).await {
        Ok(upstream) => {
            let status = StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
            let content_type = upstream.headers().get(header::CONTENT_TYPE).cloned();
            let bytes = upstream.bytes().await.unwrap_or_default();
            let mut response = Response::builder().status(status);
            if let Some(content_type) = content_type {
                response = response.header(header::CONTENT_TYPE, content_type);
            }
            response.body(Body::from(bytes)).unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response())
        }
        Err(_) => StatusCode::BAD_GATEWAY.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use axum::http::Request as HttpRequest;
    use std::sync::Arc as StdArc;
    use tempfile::tempdir;
    use tower::ServiceExt as _;
    use versa_core::config::{CliMode, ResolvedConfig};
    use versa_core::hmr::SfcCacheEntry;
    use versa_core::typecheck::NullTypeChecker;

    fn core_for(dir: &std::path::Path) -> Arc<VersaCore> {
        let mut config = ResolvedConfig::default();
        config.compiler_options.source_root = dir.join("src");
        config.compiler_options.out_dir = dir.join("dist");
        StdArc::new(VersaCore::init(config, CliMode::Watch, dir.join("node_modules"), std::sync::Arc::new(NullTypeChecker)))
    }

    #[tokio::test]
    async fn serves_embedded_hmr_loader() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("dist")).unwrap();
        let core = core_for(dir.path());
        let (tx, _rx) = broadcast::channel(16);
        let app = build_router(core, tx, None, false);

        let response = app.oneshot(HttpRequest::builder().uri(HMR_LOADER_PATH).body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8(body.to_vec()).unwrap().contains("WebSocket"));
    }

    #[tokio::test]
    async fn sets_no_cache_headers_on_js_responses() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("dist")).unwrap();
        std::fs::write(dir.path().join("dist/app.js"), b"console.log(1);").unwrap();
        let core = core_for(dir.path());
        let (tx, _rx) = broadcast::channel(16);
        let app = build_router(core, tx, None, false);

        let response = app.oneshot(HttpRequest::builder().uri("/app.js").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.headers().get(header::CACHE_CONTROL).unwrap(), "no-cache, no-store, must-revalidate");
    }

    #[tokio::test]
    async fn serves_hmr_cache_entry_over_static_fallback() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("dist")).unwrap();
        std::fs::write(dir.path().join("dist/App.js"), b"stale on-disk bytes").unwrap();
        let core = core_for(dir.path());
        core.hmr().store(
            dir.path().join("src/App.sfc"),
            SfcCacheEntry { dest_path: dir.path().join("dist/App.js"), code: "fresh hmr bytes".to_string(), hmr_deps: Vec::new() },
        );
        let (tx, _rx) = broadcast::channel(16);
        let app = build_router(core, tx, None, false);

        let response = app.oneshot(HttpRequest::builder().uri("/App.js").body(Body::empty()).unwrap()).await.unwrap();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body, "fresh hmr bytes");
    }
}
