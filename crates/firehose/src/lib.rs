//! Firehose streaming server (spec §4.8). The teacher serves its JSON-RPC
//! surface through `jsonrpsee::server` (`crates/api_server/src/server.rs`),
//! which is shaped around discrete request/response method calls and
//! doesn't fit a long-lived binary push stream. `axum` is the ecosystem's
//! standard fit for that shape instead (enriched from the pack: `reifydb`'s
//! `sub-server-ws` crate is a dedicated WebSocket streaming subsystem built
//! the same way), while CORS stays on `tower_http::cors::CorsLayer` exactly
//! as the teacher's own server wires it.

mod stream;

pub use stream::{FirehoseError, FrameSink};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use evmingest_storage::BlockStore;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};

/// Shared server state (spec §4.8).
pub struct FirehoseState {
    pub store: Arc<dyn BlockStore>,
    pub chain_id: u64,
    pub batch_size: u64,
    /// Updated by the accept-hook driver / head tracker whenever a new
    /// block becomes visible, so `/info` never has to touch storage to
    /// answer (spec §4.8: "UpdateLatestBlock notification hook").
    latest_block: AtomicU64,
    poll_interval: Duration,
}

impl FirehoseState {
    pub fn new(store: Arc<dyn BlockStore>, chain_id: u64, batch_size: u64, poll_interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            store,
            chain_id,
            batch_size,
            latest_block: AtomicU64::new(0),
            poll_interval,
        })
    }

    /// Called whenever a new block becomes visible, independent of the
    /// request/response path that serves `/info`.
    pub fn update_latest_block(&self, height: u64) {
        self.latest_block.fetch_max(height, Ordering::SeqCst);
    }

    pub fn latest_block(&self) -> u64 {
        self.latest_block.load(Ordering::SeqCst)
    }
}

pub fn router(state: Arc<FirehoseState>) -> Router {
    Router::new()
        .route("/info", get(info_handler))
        .route("/ws", get(ws_handler))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any))
        .with_state(state)
}

/// Spec §6: `GET /info` body is `{"chainID": string, "latestBlock": number}`
/// — the chain id travels as a string on the wire, unlike `latestBlock`.
#[derive(Debug, Serialize)]
struct InfoResponse {
    #[serde(rename = "chainID")]
    chain_id: String,
    #[serde(rename = "latestBlock")]
    latest_block: u64,
}

async fn info_handler(State(state): State<Arc<FirehoseState>>) -> impl IntoResponse {
    Json(InfoResponse {
        chain_id: state.chain_id.to_string(),
        latest_block: state.latest_block(),
    })
}

fn default_from() -> u64 {
    1
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    #[serde(default = "default_from")]
    from: u64,
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<Arc<FirehoseState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query.from))
}

async fn handle_socket(socket: WebSocket, state: Arc<FirehoseState>, from: u64) {
    let mut sink = AxumSink(socket);
    if let Err(err) = stream::stream_blocks(
        state.store.clone(),
        state.batch_size,
        state.poll_interval,
        from,
        &mut sink,
    )
    .await
    {
        tracing::debug!(error = %err, "firehose stream ended");
    }
}

struct AxumSink(WebSocket);

#[async_trait::async_trait]
impl FrameSink for AxumSink {
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), FirehoseError> {
        self.0
            .send(Message::Binary(frame))
            .await
            .map_err(|e| FirehoseError::Transport(e.to_string()))
    }
}
