/// HTTP server exposing the jump service

use super::handlers::*;
use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{debug, info};

/// Build the route table
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(status))
        // Hosts files
        .route("/hosts.txt", get(hosts_file))
        .route("/peer-hosts.txt", get(peer_hosts_file))
        .route("/:file", get(single_peer_hosts_file))
        .route("/trust", get(trust))
        // Rate-limited submissions
        .route("/announce", post(announce))
        .route("/hostadd", post(host_add))
        // Jump redirects, under the paths browsers and other services expect
        .route("/jump", get(jump))
        .route("/jump.cgi", get(jump))
        .route("/cgi-bin/jump.cgi", get(jump))
        .route("/recheck", get(recheck))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// HTTP listener the transport forwards inbound streams to
pub struct HttpServer {
    listener: TcpListener,
}

impl HttpServer {
    /// Bind the listener
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until `shutdown` resolves
    pub async fn serve<F>(self, state: AppState, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!("HTTP server listening on {}", self.local_addr()?);

        let limiter = state.limiter.clone();
        let purge = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(limiter.interval() * 10);
            loop {
                ticker.tick().await;
                let purged = limiter.purge_idle().await;
                if purged > 0 {
                    debug!("Forgot {} idle clients", purged);
                }
            }
        });

        let app = router(state);
        let result = axum::serve(
            self.listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e));

        purge.abort();
        result
    }
}
