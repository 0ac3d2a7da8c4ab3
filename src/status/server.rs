//! HTTP surface of the status interface: the websocket upgrade route and
//! the embedded static documents for the status page.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{header, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::manager::Manager;
use crate::status::session::status_ws;

/// Static documents served to the status page.
const ASSETS: &[(&str, &str)] = &[("/status.html", include_str!("status.html"))];

pub fn build_router(manager: Arc<Manager>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/status_ws", get(status_ws))
        .fallback(static_asset)
        .layer(cors)
        .with_state(manager)
}

/// Serve the status interface until the token is cancelled.
pub async fn run_status_server(
    addr: SocketAddr,
    manager: Arc<Manager>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let app = build_router(manager);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "status interface listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

async fn static_asset(uri: Uri) -> impl IntoResponse {
    // our home page is /status.html
    let mut path = uri.path().to_string();
    if path == "/" || path == "/status" {
        path = "/status.html".to_string();
    }

    match ASSETS.iter().find(|(asset, _)| *asset == path) {
        Some((_, body)) => {
            ([(header::CONTENT_TYPE, content_type_for(&path))], *body).into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Content type inferred from how the status page lays out its files.
pub fn content_type_for(path: &str) -> &'static str {
    if path.starts_with("/js") {
        "application/json; charset=utf-8"
    } else if path.starts_with("/css") {
        "text/css; charset=utf-8"
    } else if path.starts_with("/fonts") {
        if path.ends_with(".eot") {
            "application/vnd.ms-fontobject"
        } else if path.ends_with(".svg") {
            "image/svg+xml"
        } else if path.ends_with(".ttf") {
            "application/x-font-truetype"
        } else if path.ends_with(".woff2") {
            "application/font-woff2"
        } else if path.ends_with(".woff") {
            "application/font-woff"
        } else {
            "application/octet-stream"
        }
    } else if path.ends_with("favicon.ico") {
        "image/x-icon"
    } else {
        "text/html; charset=utf-8"
    }
}
