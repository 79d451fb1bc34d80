//! Axum router configuration: channel listing, live TS fanout, HLS
//! playlist/segment retrieval, and on-demand EPG lookups.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::{header, Method},
    routing::get,
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

use super::handlers::{get_epg, get_segment, list_channels, live_playlist, stream_channel_ts};

/// Build the router. CORS is wide open since this serves a local/LAN
/// playback client.
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS, Method::HEAD])
        .allow_headers([
            header::ACCEPT,
            header::RANGE,
            header::CONTENT_TYPE,
            header::ORIGIN,
        ])
        .allow_private_network(true)
        .max_age(Duration::from_secs(3600));

    Router::new()
        .route("/channels", get(list_channels))
        .route("/channel/{id}.ts", get(stream_channel_ts))
        .route("/hls/{id}/live.m3u8", get(live_playlist))
        .route("/hls/{id}/{seg_name}", get(get_segment))
        .route("/api/epg", get(get_epg))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::InMemoryAssetResolver;
    use crate::config::ServerConfig;
    use crate::time::ControllableMasterClock;

    #[test]
    fn router_builds_without_panicking() {
        let state = Arc::new(AppState::new(
            ServerConfig::default(),
            Arc::new(ControllableMasterClock::new(0)),
            Arc::new(InMemoryAssetResolver::new()),
        ));
        let _router = create_router(state);
    }
}
