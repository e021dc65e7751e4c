// API module
//
// This module contains the HTTP API over the ledger

use actix_web::{HttpResponse, Responder};
use utoipa::OpenApi;

pub mod handlers;
pub mod routes;

// Re-export main components for easier access
pub use handlers::{AppData, AppState};
pub use routes::configure_routes;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::get_chain,
        handlers::validate_chain,
        handlers::repair_chain,
        handlers::remine_chain,
        handlers::mine_genesis,
        handlers::new_transaction,
        handlers::register_account,
        handlers::get_all_accounts,
        handlers::get_balance,
        handlers::reconcile_accounts
    ),
    components(
        schemas(
            crate::blockchain::Block,
            crate::blockchain::Account,
            crate::blockchain::ChainBreak,
            crate::blockchain::BreakKind,
            crate::blockchain::repair::RepairReport,
            handlers::ChainResponse,
            handlers::ValidationResponse,
            handlers::RepairRequest,
            handlers::GenesisRequest,
            handlers::TransferRequest,
            handlers::RegisterRequest,
            handlers::BalanceResponse,
            handlers::BalancesResponse
        )
    ),
    tags(
        (name = "pisiticoin", description = "PisitiCoin ledger endpoints")
    ),
    info(
        title = "PisitiCoin API",
        version = "0.1.0",
        description = "An append-only ledger secured by a proof-of-work hash chain",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    )
)]
pub struct ApiDoc;

/// Serves the OpenAPI document
pub async fn openapi_json() -> impl Responder {
    HttpResponse::Ok().json(ApiDoc::openapi())
}
