// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! HTTP surface for the feed and the episode catalog
//!
//! # Routes
//!
//! - `GET /api/rss` - Upstream feed, verbatim, with revalidation headers
//! - `GET /api/episodes` - Normalized catalog as JSON (`?limit=N` to cap it)

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::catalog::EpisodeCatalog;
use crate::config::ServerConfig;
use crate::http::HttpClient;

/// Shared state for the handlers
pub struct AppState<C> {
    pub catalog: Arc<EpisodeCatalog<C>>,
}

impl<C> Clone for AppState<C> {
    fn clone(&self) -> Self {
        Self {
            catalog: Arc::clone(&self.catalog),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct EpisodesQuery {
    pub limit: Option<usize>,
}

/// Create the router with all route definitions
pub fn create_router<C: HttpClient + 'static>(catalog: Arc<EpisodeCatalog<C>>) -> Router {
    Router::new()
        .route("/api/rss", get(rss_feed::<C>))
        .route("/api/episodes", get(list_episodes::<C>))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { catalog })
}

/// Bind and serve until the task is dropped
pub async fn serve<C: HttpClient + 'static>(
    catalog: Arc<EpisodeCatalog<C>>,
    config: &ServerConfig,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(config.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "serving podcast catalog");
    axum::serve(listener, create_router(catalog)).await
}

/// GET /api/rss - Proxy the upstream feed
async fn rss_feed<C: HttpClient + 'static>(State(state): State<AppState<C>>) -> Response {
    let fetcher = state.catalog.fetcher();
    match fetcher.fetch().await {
        Ok(body) => {
            let cache_control = HeaderValue::from_str(&fetcher.cache_policy().cache_control_header())
                .unwrap_or_else(|_| HeaderValue::from_static("no-cache"));
            (
                [
                    (header::CONTENT_TYPE, HeaderValue::from_static("application/xml")),
                    (header::CACHE_CONTROL, cache_control),
                ],
                body,
            )
                .into_response()
        }
        Err(e) => {
            tracing::error!(url = %fetcher.url(), error = %e, "RSS proxy failed");
            let status = e
                .upstream_status()
                .and_then(|status| StatusCode::from_u16(status).ok())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (
                status,
                Json(json!({ "error": format!("Failed to fetch RSS feed: {e}") })),
            )
                .into_response()
        }
    }
}

/// GET /api/episodes - Normalized catalog; falls back rather than failing
async fn list_episodes<C: HttpClient + 'static>(
    State(state): State<AppState<C>>,
    Query(query): Query<EpisodesQuery>,
) -> Response {
    let mut episodes = state.catalog.fetch_episodes().await;
    if let Some(limit) = query.limit {
        episodes.truncate(limit);
    }
    Json(episodes).into_response()
}
