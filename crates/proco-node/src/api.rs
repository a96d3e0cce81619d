//! JSON-over-HTTP surface. Every handler is a thin call into [`Node`].

use crate::error::NodeError;
use crate::node::Node;
use crate::peers::PeerInfo;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use proco_core::{Accepted, Block, ChainValidity, Transaction};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
struct AppState {
    node: Arc<Node>,
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    address: String,
    height: u64,
}

#[derive(Serialize)]
struct Head {
    height: u64,
    hash: String,
}

#[derive(Serialize)]
struct Validation {
    valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    index: Option<u64>,
    detail: String,
}

#[derive(Serialize)]
struct TxAccepted {
    accepted: bool,
    id: String,
    peers: usize,
}

#[derive(Serialize)]
struct TxReceived {
    accepted: bool,
    new: bool,
}

#[derive(Deserialize)]
struct MineRequest {
    #[serde(default)]
    data: Option<String>,
}

#[derive(Serialize)]
struct BlockAccepted {
    accepted: bool,
    outcome: &'static str,
}

#[derive(Deserialize)]
struct AddPeer {
    address: String,
}

#[derive(Serialize)]
struct ChainSynced {
    accepted: bool,
    length: usize,
}

/// Rejections render as `{"accepted": false, "reason": ...}`.
pub struct ApiError {
    status: StatusCode,
    reason: String,
}

impl From<NodeError> for ApiError {
    fn from(error: NodeError) -> Self {
        let status = match &error {
            NodeError::InvalidTransaction(_) | NodeError::NothingToMine => StatusCode::BAD_REQUEST,
            NodeError::Rejected(_)
            | NodeError::DuplicateTransaction(_)
            | NodeError::AlreadyIncluded(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            reason: error.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({ "accepted": false, "reason": self.reason })),
        )
            .into_response()
    }
}

pub fn router(node: Arc<Node>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/chain", get(chain))
        .route("/chain/head", get(head))
        .route("/chain/validate", get(validate))
        .route("/chain/sync", post(sync_chain))
        .route("/tx", post(create_tx))
        .route("/tx/receive", post(receive_tx))
        .route("/mempool", get(mempool))
        .route("/blocks", post(create_block))
        .route("/blocks/receive", post(receive_block))
        .route("/peers", get(peers).post(add_peer))
        .route("/peers/{addr}", delete(remove_peer))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { node })
}

async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "ok",
        address: state.node.address(),
        height: state.node.chain().height(),
    })
}

async fn chain(State(state): State<AppState>) -> Json<Vec<Block>> {
    Json(state.node.get_chain())
}

async fn head(State(state): State<AppState>) -> Result<Json<Head>, ApiError> {
    let tip = state.node.chain().tip().map_err(NodeError::from)?;
    Ok(Json(Head {
        height: tip.index,
        hash: tip.hash,
    }))
}

async fn validate(State(state): State<AppState>) -> Json<Validation> {
    let validity = state.node.validate_chain();
    let index = match &validity {
        ChainValidity::Valid => None,
        ChainValidity::InvalidAt { index, .. } => Some(*index),
    };
    Json(Validation {
        valid: validity.is_valid(),
        index,
        detail: validity.to_string(),
    })
}

async fn sync_chain(
    State(state): State<AppState>,
    Json(blocks): Json<Vec<Block>>,
) -> Result<Json<ChainSynced>, ApiError> {
    let length = state.node.sync_chain(blocks)?;
    Ok(Json(ChainSynced {
        accepted: true,
        length,
    }))
}

async fn create_tx(
    State(state): State<AppState>,
    Json(tx): Json<Transaction>,
) -> Result<Json<TxAccepted>, ApiError> {
    let published = state.node.create_transaction(tx).await?;
    Ok(Json(TxAccepted {
        accepted: true,
        id: published.value,
        peers: published.deliveries.len(),
    }))
}

async fn receive_tx(
    State(state): State<AppState>,
    Json(tx): Json<Transaction>,
) -> Result<Json<TxReceived>, ApiError> {
    let published = state.node.receive_transaction(tx).await?;
    Ok(Json(TxReceived {
        accepted: true,
        new: published.value,
    }))
}

async fn mempool(State(state): State<AppState>) -> Json<Vec<Transaction>> {
    Json(state.node.pending_transactions())
}

async fn create_block(
    State(state): State<AppState>,
    Json(request): Json<MineRequest>,
) -> Result<Json<Block>, ApiError> {
    let published = state.node.create_block(request.data).await?;
    Ok(Json(published.value))
}

async fn receive_block(
    State(state): State<AppState>,
    Json(block): Json<Block>,
) -> Result<Json<BlockAccepted>, ApiError> {
    let published = state.node.receive_block(block).await?;
    let outcome = match published.value {
        Accepted::Extended => "extended",
        Accepted::Replaced { .. } => "replaced",
    };
    Ok(Json(BlockAccepted {
        accepted: true,
        outcome,
    }))
}

async fn peers(State(state): State<AppState>) -> Json<Vec<PeerInfo>> {
    Json(state.node.peers())
}

async fn add_peer(
    State(state): State<AppState>,
    Json(request): Json<AddPeer>,
) -> Json<serde_json::Value> {
    let added = state.node.add_peer(&request.address);
    Json(json!({ "added": added }))
}

async fn remove_peer(State(state): State<AppState>, Path(addr): Path<String>) -> StatusCode {
    if state.node.remove_peer(&addr) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}
