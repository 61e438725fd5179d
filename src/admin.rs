//! Operator HTTP API.

use std::{net::SocketAddr, sync::Arc};

use alloy_primitives::Bytes;
use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::broadcaster::{BroadcastOutcome, MultiRelayBroadcaster};
use crate::bundle::{BundleLeg, LegSigner, UnsignedLeg};
use crate::chain::ChainProvider;
use crate::conflict::{ConflictAnalyzer, ConflictReport};
use crate::error::BundleError;
use crate::relay::BundleOptions;

#[derive(Clone)]
pub struct AdminState {
    pub broadcaster: Arc<MultiRelayBroadcaster>,
    pub analyzer: Arc<ConflictAnalyzer>,
    pub chain: Arc<dyn ChainProvider>,
    /// Signs JSON request legs. Without it only raw legs are accepted.
    pub wallet: Option<Arc<dyn LegSigner>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum LegInput {
    Raw(Bytes),
    Request(Value),
}

#[derive(Debug, Deserialize)]
pub struct SubmitBundleBody {
    pub legs: Vec<LegInput>,
    #[serde(default = "default_blocks_ahead")]
    pub blocks_ahead: u64,
    #[serde(default)]
    pub options: BundleOptions,
}

fn default_blocks_ahead() -> u64 {
    1
}

#[derive(Debug, Deserialize)]
pub struct ConflictBody {
    pub txs: Vec<Bytes>,
    pub target_block: u64,
}

pub struct AdminError(BundleError);

impl From<BundleError> for AdminError {
    fn from(err: BundleError) -> Self {
        Self(err)
    }
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let status = if self.0.is_input_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::BAD_GATEWAY
        };
        warn!("admin request failed ({}): {}", status, self.0);
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

pub fn router(state: AdminState) -> Router {
    Router::new()
        .route("/relays", get(list_relays))
        .route("/bundles", post(submit_bundle))
        .route("/conflicts", post(find_conflict))
        .with_state(state)
}

pub async fn serve_admin(state: AdminState, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind admin API on {addr}"))?;
    info!("🛠️ admin API listening on {}", addr);
    axum::serve(listener, router(state))
        .await
        .context("admin API stopped")
}

async fn list_relays(State(state): State<AdminState>) -> Json<Vec<String>> {
    Json(state.broadcaster.endpoints())
}

async fn submit_bundle(
    State(state): State<AdminState>,
    Json(body): Json<SubmitBundleBody>,
) -> Result<Json<BroadcastOutcome>, AdminError> {
    let legs = body
        .legs
        .into_iter()
        .enumerate()
        .map(|(index, leg)| match leg {
            LegInput::Raw(raw) => Ok(BundleLeg::Signed(raw)),
            LegInput::Request(value) => {
                let signer = state.wallet.clone().ok_or_else(|| BundleError::InvalidLeg {
                    index,
                    reason: "no wallet configured for unsigned legs".to_string(),
                })?;
                Ok(BundleLeg::Unsigned(UnsignedLeg::from_json(index, value, signer)?))
            }
        })
        .collect::<Result<Vec<_>, BundleError>>()?;

    let head = state.chain.block_number().await?;
    let target = head.checked_add(body.blocks_ahead.max(1)).ok_or_else(|| {
        BundleError::InvalidTargetBlock(format!("{} blocks after {} is past the last block", body.blocks_ahead, head))
    })?;
    info!("📦 admin bundle with {} leg(s) for block {}", legs.len(), target);
    let outcome = state.broadcaster.broadcast(&legs, target, body.options).await?;
    Ok(Json(outcome))
}

async fn find_conflict(
    State(state): State<AdminState>,
    Json(body): Json<ConflictBody>,
) -> Result<Json<ConflictReport>, AdminError> {
    let report = state
        .analyzer
        .conflicting_bundle(&body.txs, body.target_block)
        .await?;
    Ok(Json(report))
}
