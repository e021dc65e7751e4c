use std::collections::BTreeMap;

use actix_web::{web, HttpResponse, Responder};
use log::error;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::blockchain::miner::MiningError;
use crate::blockchain::repair::RepairReport;
use crate::blockchain::storage::StorageError;
use crate::blockchain::{Account, Block, Blockchain, BlockchainError, CancelToken, ChainBreak, Session, Window};

/// Shared state of the HTTP server
pub struct AppState {
    pub blockchain: Blockchain,

    /// Cancelled on shutdown to abort running searches
    pub cancel: CancelToken,
}

pub type AppData = web::Data<AppState>;

/// Blocks returned when no limit is given
const DEFAULT_CHAIN_LIMIT: usize = 100;

/// Response for the chain endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ChainResponse {
    /// The number of blocks in the chain
    pub length: u64,

    /// The newest blocks, newest first
    pub blocks: Vec<Block>,
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ChainQuery {
    /// Maximum number of blocks to return
    pub limit: Option<usize>,
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ValidateQuery {
    /// Only check the newest `last` blocks
    pub last: Option<usize>,
}

/// Response for the validate endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ValidationResponse {
    pub valid: bool,

    /// The first broken block, if any
    pub broken: Option<ChainBreak>,
}

/// Request for the repair endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct RepairRequest {
    /// First block to relink and re-mine
    pub from_block: u64,
}

/// Request for the genesis endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct GenesisRequest {
    /// Account receiving the minted amount
    pub to_id: String,
    pub amount: u64,
    pub miner_id: String,
}

/// Request for the transaction endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TransferRequest {
    /// The sender's account id
    pub from_id: String,

    /// The recipient's account id
    pub to_id: String,

    /// PisitiCoins to transfer
    pub amount: u64,

    /// Account rewarded for mining; a random registered account if omitted
    pub miner_id: Option<String>,
}

/// Request for the register account endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct RegisterRequest {
    pub id: String,
    pub username: Option<String>,
}

/// Response for the balance endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct BalanceResponse {
    pub id: String,

    /// Balance recomputed from the chain
    pub balance: i64,
}

/// Response for the reconcile endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct BalancesResponse {
    pub balances: BTreeMap<String, i64>,
}

/// Maps a ledger error to an HTTP response with an `error` message
pub fn error_response(err: &BlockchainError) -> HttpResponse {
    let body = serde_json::json!({ "error": err.to_string() });

    match err {
        BlockchainError::MalformedInput(_) | BlockchainError::InsufficientFunds { .. } => {
            HttpResponse::BadRequest().json(body)
        }
        BlockchainError::LookupFailure(_) => HttpResponse::NotFound().json(body),
        BlockchainError::ChainInconsistency { .. }
        | BlockchainError::StorageError(StorageError::Conflict(_)) => HttpResponse::Conflict().json(body),
        BlockchainError::MiningError(MiningError::Cancelled { .. }) => {
            HttpResponse::ServiceUnavailable().json(body)
        }
        _ => {
            error!("Request failed: {}", err);
            HttpResponse::InternalServerError().json(body)
        }
    }
}

/// Runs a ledger operation on the blocking thread pool
///
/// Mining and full-chain scans are CPU bound and must not stall the
/// async workers.
async fn run_blocking<F, T>(operation: F) -> Result<T, HttpResponse>
where
    F: FnOnce() -> Result<T, BlockchainError> + Send + 'static,
    T: Send + 'static,
{
    match web::block(operation).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(error_response(&err)),
        Err(err) => {
            error!("Blocking task failed: {}", err);
            Err(HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Blocking task failed"
            })))
        }
    }
}

/// Get the newest blocks
#[utoipa::path(
    get,
    path = "/api/v1/chain",
    params(ChainQuery),
    responses(
        (status = 200, description = "Blocks retrieved successfully", body = ChainResponse),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn get_chain(state: AppData, query: web::Query<ChainQuery>) -> impl Responder {
    let blockchain = state.blockchain.clone();
    let limit = query.limit.unwrap_or(DEFAULT_CHAIN_LIMIT);

    let result = run_blocking(move || {
        Ok(ChainResponse {
            length: blockchain.len()?,
            blocks: blockchain.latest_blocks(limit)?,
        })
    })
    .await;

    match result {
        Ok(response) => HttpResponse::Ok().json(response),
        Err(response) => response,
    }
}

/// Check the chain for broken links and digests
///
/// Reports the first broken block in the checked range
#[utoipa::path(
    get,
    path = "/api/v1/chain/validate",
    params(ValidateQuery),
    responses(
        (status = 200, description = "Validation result", body = ValidationResponse),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn validate_chain(state: AppData, query: web::Query<ValidateQuery>) -> impl Responder {
    let blockchain = state.blockchain.clone();
    let window = query.last.map_or(Window::All, Window::Latest);

    match run_blocking(move || blockchain.check(window)).await {
        Ok(broken) => HttpResponse::Ok().json(ValidationResponse {
            valid: broken.is_none(),
            broken,
        }),
        Err(response) => response,
    }
}

/// Repair the chain from a block
///
/// Relinks and re-mines every block from `from_block` to the tip, keeping
/// their content
#[utoipa::path(
    post,
    path = "/api/v1/chain/repair",
    request_body = RepairRequest,
    responses(
        (status = 200, description = "Chain repaired", body = RepairReport),
        (status = 404, description = "Block not found"),
        (status = 503, description = "Mining cancelled")
    )
)]
pub async fn repair_chain(state: AppData, request: web::Json<RepairRequest>) -> impl Responder {
    let blockchain = state.blockchain.clone();
    let cancel = state.cancel.clone();
    let from_block = request.from_block;

    match run_blocking(move || blockchain.repair(from_block, &cancel)).await {
        Ok(report) => HttpResponse::Ok().json(report),
        Err(response) => response,
    }
}

/// Re-mine the whole chain from genesis
#[utoipa::path(
    post,
    path = "/api/v1/chain/remine",
    responses(
        (status = 200, description = "Chain re-mined", body = RepairReport),
        (status = 404, description = "Chain is empty"),
        (status = 503, description = "Mining cancelled")
    )
)]
pub async fn remine_chain(state: AppData) -> impl Responder {
    let blockchain = state.blockchain.clone();
    let cancel = state.cancel.clone();

    match run_blocking(move || blockchain.remine_all(&cancel)).await {
        Ok(report) => HttpResponse::Ok().json(report),
        Err(response) => response,
    }
}

/// Mine the genesis block
///
/// Mints the requested amount from the mint account
#[utoipa::path(
    post,
    path = "/api/v1/genesis",
    request_body = GenesisRequest,
    responses(
        (status = 201, description = "Genesis block mined", body = Block),
        (status = 400, description = "Chain already started or invalid request"),
        (status = 404, description = "Account not found")
    )
)]
pub async fn mine_genesis(state: AppData, request: web::Json<GenesisRequest>) -> impl Responder {
    let blockchain = state.blockchain.clone();
    let cancel = state.cancel.clone();
    let request = request.into_inner();

    let result = run_blocking(move || {
        blockchain.mine_genesis(&request.to_id, request.amount, &request.miner_id, &cancel)
    })
    .await;

    match result {
        Ok(block) => HttpResponse::Created().json(block),
        Err(response) => response,
    }
}

/// Transfer PisitiCoins
///
/// Mines a new block moving `amount` from the sender to the recipient
#[utoipa::path(
    post,
    path = "/api/v1/transactions",
    request_body = TransferRequest,
    responses(
        (status = 201, description = "Transfer mined", body = Block),
        (status = 400, description = "Invalid amount or insufficient funds"),
        (status = 404, description = "Account not found or no genesis block"),
        (status = 503, description = "Mining cancelled")
    )
)]
pub async fn new_transaction(state: AppData, request: web::Json<TransferRequest>) -> impl Responder {
    let blockchain = state.blockchain.clone();
    let cancel = state.cancel.clone();
    let request = request.into_inner();

    let result = run_blocking(move || {
        let session = Session::new(request.from_id);
        blockchain.transfer(
            &session,
            &request.to_id,
            request.amount,
            request.miner_id.as_deref(),
            &cancel,
        )
    })
    .await;

    match result {
        Ok(block) => HttpResponse::Created().json(block),
        Err(response) => response,
    }
}

/// Register an account
#[utoipa::path(
    post,
    path = "/api/v1/accounts",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account registered", body = Account),
        (status = 400, description = "Invalid account id"),
        (status = 409, description = "Account already exists")
    )
)]
pub async fn register_account(state: AppData, request: web::Json<RegisterRequest>) -> impl Responder {
    let request = request.into_inner();

    match state.blockchain.register_account(&request.id, request.username) {
        Ok(account) => HttpResponse::Created().json(account),
        Err(err) => error_response(&err),
    }
}

/// Get all accounts
///
/// Balances are the cached values from the last reconciliation
#[utoipa::path(
    get,
    path = "/api/v1/accounts",
    responses(
        (status = 200, description = "Accounts retrieved successfully", body = Vec<Account>)
    )
)]
pub async fn get_all_accounts(state: AppData) -> impl Responder {
    match state.blockchain.accounts() {
        Ok(accounts) => HttpResponse::Ok().json(accounts),
        Err(err) => error_response(&err),
    }
}

/// Get an account balance
///
/// Recomputes the balance from the chain and stores it
#[utoipa::path(
    get,
    path = "/api/v1/accounts/{id}/balance",
    params(
        ("id" = String, Path, description = "Account id")
    ),
    responses(
        (status = 200, description = "Balance recomputed", body = BalanceResponse),
        (status = 404, description = "Account not found")
    )
)]
pub async fn get_balance(state: AppData, id: web::Path<String>) -> impl Responder {
    let blockchain = state.blockchain.clone();
    let id = id.into_inner();

    let result = run_blocking(move || {
        let balance = blockchain.balance(&id)?;
        Ok(BalanceResponse { id, balance })
    })
    .await;

    match result {
        Ok(response) => HttpResponse::Ok().json(response),
        Err(response) => response,
    }
}

/// Reconcile every account
///
/// Recomputes all balances in a single pass over the chain
#[utoipa::path(
    post,
    path = "/api/v1/accounts/reconcile",
    responses(
        (status = 200, description = "Balances recomputed", body = BalancesResponse)
    )
)]
pub async fn reconcile_accounts(state: AppData) -> impl Responder {
    let blockchain = state.blockchain.clone();

    match run_blocking(move || blockchain.reconcile_all()).await {
        Ok(balances) => HttpResponse::Ok().json(BalancesResponse { balances }),
        Err(response) => response,
    }
}
