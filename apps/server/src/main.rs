#![warn(clippy::all, clippy::pedantic)]

use std::net::SocketAddr;
use std::sync::Arc;

use actix_web::{App, HttpServer, web};
use tracing::info;

mod error;
mod owner;
mod routes;

#[cfg(test)]
mod test_support;

use error::{ApiError, AppError};
use logger::init_tracing;
use pingwatch_service::{Config, Orchestrator, open_local};

#[actix_web::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config_path = std::env::var("PINGWATCH_CONFIG").ok();
    let mut config = Config::from_config(config_path.as_ref())?;
    config.apply_env_overrides()?;

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;

    info!(path = %config.database.path, "Opening database");
    let database = open_local(&config.database.path).await?;
    let orchestrator =
        web::Data::new(Orchestrator::start(config.monitoring.clone(), Arc::new(database)).await?);

    run_server(addr, orchestrator.clone()).await?;

    orchestrator.shutdown().await;
    Ok(())
}

/// JSON extractor settings; malformed bodies get the same error shape as
/// every other failure
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .error_handler(|err, _req| ApiError::BadRequest(err.to_string()).into())
}

async fn run_server(addr: SocketAddr, orchestrator: web::Data<Orchestrator>) -> Result<(), AppError> {
    info!(%addr, "Starting HTTP server");

    HttpServer::new(move || {
        App::new()
            .app_data(orchestrator.clone())
            .app_data(json_config())
            .configure(routes::routes)
    })
    .bind(addr)?
    .run()
    .await?;

    Ok(())
}
