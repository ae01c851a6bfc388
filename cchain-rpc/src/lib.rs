use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use cchain_core::{Account, Address, Amount, Block, ChainError, Height, Transaction, ValidatorInfo};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

/// The subset of `cchain-node::Node`'s surface the REST facade needs.
/// Kept as a trait here (rather than depending on the node crate directly)
/// so `cchain-node` can depend on `cchain-rpc` without a cycle.
pub trait NodeApi: Send + Sync {
    fn submit_tx(&self, tx: Transaction) -> Result<(), ChainError>;
    fn get_balance(&self, addr: &Address) -> Amount;
    fn list_accounts(&self) -> Vec<(Address, Account)>;
    fn chain_height(&self) -> Height;
    fn chain_supply(&self) -> (Amount, Amount);
    fn validator_count(&self) -> usize;
    fn mempool_sizes(&self) -> (usize, usize);
    fn list_blocks(&self, from: Height, to: Height) -> Vec<Block>;
    fn verify_chain(&self) -> Result<(), ChainError>;
    fn lock_stake(&self, addr: Address, amount: Amount, locked_until: Height) -> Result<(), ChainError>;
    fn stake_info(&self, addr: &Address) -> Result<ValidatorInfo, ChainError>;
    fn call_proto_contract(&self, name: &str, params: &HashMap<String, Value>) -> Result<String, ChainError>;
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(err: ChainError) -> (StatusCode, Json<ErrorBody>) {
    let status = match &err {
        ChainError::BadMnemonic
        | ChainError::BadAddress
        | ChainError::BadPayload(_)
        | ChainError::BadNonce
        | ChainError::FeeTooLow => StatusCode::BAD_REQUEST,
        ChainError::UnknownSender | ChainError::UnknownAddress | ChainError::UnknownContract(_) => {
            StatusCode::NOT_FOUND
        }
        ChainError::InsufficientBalance | ChainError::InsufficientStake | ChainError::MempoolFull => {
            StatusCode::BAD_REQUEST
        }
        ChainError::InvalidSignature
        | ChainError::InvalidPrevHash
        | ChainError::InvalidHeight
        | ChainError::InvalidTimestamp
        | ChainError::ConsensusViolation
        | ChainError::MerkleMismatch
        | ChainError::StateRootMismatch => StatusCode::BAD_REQUEST,
        ChainError::SnapshotIO(_) | ChainError::CorruptFile => StatusCode::INTERNAL_SERVER_ERROR,
        ChainError::TxInvalid(_) => StatusCode::BAD_REQUEST,
    };
    (status, Json(ErrorBody { error: err.to_string() }))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct StatusResponse {
    height: Height,
    total_supply: Amount,
    circulating: Amount,
    validator_count: usize,
    mempool_standard: usize,
    mempool_contract: usize,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn status<N: NodeApi>(State(node): State<Arc<N>>) -> Json<StatusResponse> {
    let (total_supply, circulating) = node.chain_supply();
    let (mempool_standard, mempool_contract) = node.mempool_sizes();
    Json(StatusResponse {
        height: node.chain_height(),
        total_supply,
        circulating,
        validator_count: node.validator_count(),
        mempool_standard,
        mempool_contract,
    })
}

async fn get_balance<N: NodeApi>(
    State(node): State<Arc<N>>,
    Path(addr): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<ErrorBody>)> {
    let address = Address::from_hex(&addr).map_err(error_response)?;
    Ok(Json(serde_json::json!({ "balance": node.get_balance(&address) })))
}

async fn list_accounts<N: NodeApi>(State(node): State<Arc<N>>) -> Json<Value> {
    let accounts: HashMap<String, Account> = node
        .list_accounts()
        .into_iter()
        .map(|(addr, acc)| (addr.to_hex(), acc))
        .collect();
    Json(serde_json::json!({ "accounts": accounts }))
}

#[derive(Deserialize)]
struct BlockRange {
    from: Option<Height>,
    to: Option<Height>,
}

async fn list_blocks<N: NodeApi>(
    State(node): State<Arc<N>>,
    axum::extract::Query(range): axum::extract::Query<BlockRange>,
) -> Json<Value> {
    let from = range.from.unwrap_or(0);
    let to = range.to.unwrap_or(node.chain_height());
    Json(serde_json::json!({ "blocks": node.list_blocks(from, to) }))
}

async fn submit_tx<N: NodeApi>(
    State(node): State<Arc<N>>,
    Json(tx): Json<Transaction>,
) -> Result<Json<Value>, (StatusCode, Json<ErrorBody>)> {
    node.submit_tx(tx).map_err(error_response)?;
    Ok(Json(serde_json::json!({ "accepted": true })))
}

async fn verify_chain<N: NodeApi>(State(node): State<Arc<N>>) -> Result<Json<Value>, (StatusCode, Json<ErrorBody>)> {
    node.verify_chain().map_err(error_response)?;
    Ok(Json(serde_json::json!({ "valid": true })))
}

#[derive(Deserialize)]
struct StakeRequest {
    address: String,
    amount: Amount,
    locked_until: Height,
}

async fn lock_stake<N: NodeApi>(
    State(node): State<Arc<N>>,
    Json(req): Json<StakeRequest>,
) -> Result<Json<Value>, (StatusCode, Json<ErrorBody>)> {
    let address = Address::from_hex(&req.address).map_err(error_response)?;
    node.lock_stake(address, req.amount, req.locked_until).map_err(error_response)?;
    Ok(Json(serde_json::json!({ "staked": true })))
}

async fn stake_info<N: NodeApi>(
    State(node): State<Arc<N>>,
    Path(addr): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<ErrorBody>)> {
    let address = Address::from_hex(&addr).map_err(error_response)?;
    let info = node.stake_info(&address).map_err(error_response)?;
    Ok(Json(serde_json::json!({ "validator": info })))
}

#[derive(Deserialize)]
struct ContractCallRequest {
    contract: String,
    params: HashMap<String, Value>,
}

async fn call_contract<N: NodeApi>(
    State(node): State<Arc<N>>,
    Json(req): Json<ContractCallRequest>,
) -> Result<Json<Value>, (StatusCode, Json<ErrorBody>)> {
    let result = node.call_proto_contract(&req.contract, &req.params).map_err(error_response)?;
    Ok(Json(serde_json::json!({ "result": result })))
}

pub fn router<N: NodeApi + 'static>(node: Arc<N>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status::<N>))
        .route("/accounts", get(list_accounts::<N>))
        .route("/balance/:address", get(get_balance::<N>))
        .route("/blocks", get(list_blocks::<N>))
        .route("/tx", post(submit_tx::<N>))
        .route("/chain/verify", post(verify_chain::<N>))
        .route("/stake", post(lock_stake::<N>))
        .route("/stake/:address", get(stake_info::<N>))
        .route("/contract/call", post(call_contract::<N>))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(node)
}

pub async fn serve<N: NodeApi + 'static>(addr: String, node: Arc<N>) -> Result<()> {
    let socket_addr: SocketAddr = addr.parse()?;
    let app = router(node);
    info!("REST API listening on {socket_addr}");
    let listener = tokio::net::TcpListener::bind(socket_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tower::ServiceExt;

    struct StubNode {
        balance: Mutex<Amount>,
    }

    impl NodeApi for StubNode {
        fn submit_tx(&self, _tx: Transaction) -> Result<(), ChainError> {
            Ok(())
        }
        fn get_balance(&self, _addr: &Address) -> Amount {
            *self.balance.lock().unwrap()
        }
        fn list_accounts(&self) -> Vec<(Address, Account)> {
            Vec::new()
        }
        fn chain_height(&self) -> Height {
            0
        }
        fn chain_supply(&self) -> (Amount, Amount) {
            (0, 0)
        }
        fn validator_count(&self) -> usize {
            1
        }
        fn mempool_sizes(&self) -> (usize, usize) {
            (0, 0)
        }
        fn list_blocks(&self, _from: Height, _to: Height) -> Vec<Block> {
            Vec::new()
        }
        fn verify_chain(&self) -> Result<(), ChainError> {
            Ok(())
        }
        fn lock_stake(&self, _addr: Address, _amount: Amount, _locked_until: Height) -> Result<(), ChainError> {
            Ok(())
        }
        fn stake_info(&self, _addr: &Address) -> Result<ValidatorInfo, ChainError> {
            Err(ChainError::UnknownAddress)
        }
        fn call_proto_contract(&self, _name: &str, _params: &HashMap<String, Value>) -> Result<String, ChainError> {
            Ok("ok".to_string())
        }
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let node = Arc::new(StubNode { balance: Mutex::new(5) });
        let app = router(node);
        let response = app
            .oneshot(axum::http::Request::builder().uri("/health").body(axum::body::Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
