//! Liveness endpoint for container orchestration.
//!
//! `GET /health` answers `200 OK` with body `OK`; every other path is `404`.

use crate::error::Result;
use axum::{Router, routing::get};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::info;

#[must_use]
pub fn router() -> Router {
    Router::new().route("/health", get(health))
}

async fn health() -> &'static str {
    "OK"
}

/// Bind `0.0.0.0:port` and serve until the process exits.
///
/// # Errors
///
/// Returns `Error::Io` if the port cannot be bound or the server fails.
pub async fn serve(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    serve_on(listener).await
}

/// Serve on an already bound listener.
///
/// # Errors
///
/// Returns `Error::Io` if the server fails.
pub async fn serve_on(listener: TcpListener) -> Result<()> {
    info!(addr = %listener.local_addr()?, "health server listening");
    axum::serve(listener, router()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[tokio::test]
    async fn health_endpoint() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve_on(listener));

        let ok = reqwest::get(format!("http://{addr}/health")).await.unwrap();
        assert_eq!(ok.status(), StatusCode::OK);
        assert_eq!(ok.text().await.unwrap(), "OK");

        let missing = reqwest::get(format!("http://{addr}/")).await.unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }
}
