use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use log::{error, info, warn};

use pisiticoin::api::{self, AppState};
use pisiticoin::blockchain::{Blockchain, CancelToken};
use pisiticoin::config::NodeConfig;

// Open the ledger database, falling back to an in-memory chain
fn initialize_blockchain(config: &NodeConfig) -> std::io::Result<Blockchain> {
    let params = config.chain_params();

    if let Err(e) = std::fs::create_dir_all(&config.data_dir) {
        warn!("Failed to create data directory: {}", e);
    }

    match Blockchain::with_storage(&config.data_dir, params.clone()) {
        Ok(blockchain) => {
            info!("Loaded ledger from storage at {}", config.data_dir.display());
            Ok(blockchain)
        }
        Err(err) => {
            warn!("Failed to load ledger from storage: {}", err);
            warn!("Creating in-memory ledger instead");

            Blockchain::in_memory(params).map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err))
        }
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load .env before the logger so RUST_LOG can come from it
    let _ = dotenvy::dotenv();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = NodeConfig::from_env().map_err(|err| {
        error!("{}", err);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, err)
    })?;

    let blockchain = initialize_blockchain(&config)?;
    info!(
        "Ledger has {} blocks, difficulty {}, {} mining threads",
        blockchain.len().unwrap_or_default(),
        config.difficulty,
        config.mining_threads
    );

    let cancel = CancelToken::new();
    let state = web::Data::new(AppState {
        blockchain,
        cancel: cancel.clone(),
    });

    // Abort running searches on shutdown so blocking workers can exit
    actix_web::rt::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down, cancelling running searches");
            cancel.cancel();
        }
    });

    info!("Starting HTTP server at http://{}:{}", config.host, config.port);

    HttpServer::new(move || {
        // Configure CORS
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .app_data(state.clone())
            .configure(api::configure_routes)
    })
    .bind((config.host.as_str(), config.port))?
    .run()
    .await
}
