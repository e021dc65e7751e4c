use actix_web::web;

use super::handlers;
use super::openapi_json;

/// Configures the API routes
///
/// # Arguments
///
/// * `cfg` - The service configuration
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/chain", web::get().to(handlers::get_chain))
            .route("/chain/validate", web::get().to(handlers::validate_chain))
            .route("/chain/repair", web::post().to(handlers::repair_chain))
            .route("/chain/remine", web::post().to(handlers::remine_chain))
            .route("/genesis", web::post().to(handlers::mine_genesis))
            .route("/transactions", web::post().to(handlers::new_transaction))
            .route("/accounts", web::get().to(handlers::get_all_accounts))
            .route("/accounts", web::post().to(handlers::register_account))
            .route("/accounts/reconcile", web::post().to(handlers::reconcile_accounts))
            .route("/accounts/{id}/balance", web::get().to(handlers::get_balance)),
    )
    .route("/api-docs/openapi.json", web::get().to(openapi_json));
}
