use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;

use crate::{
    background_tasks::spawn_poll_retention_task,
    config::Config,
    engine::VotingEngine,
    form::IncrementalFormBuilder,
    store::{MemoryPollStore, PgPollStore, PollStore},
};

mod config;
mod engine;
mod error;
mod form;
mod models;
mod routes;
mod store;

mod background_tasks;

struct AppData {
    engine: VotingEngine,
    forms: IncrementalFormBuilder,
    public_url: String,
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let store: Arc<dyn PollStore> = match &config.database_url {
        Some(database_url) => Arc::new(
            PgPollStore::connect(database_url)
                .await
                .context("Failed to connect to database")?,
        ),
        None => {
            log::warn!("DATABASE_URL is not set, polls are kept in memory only");
            Arc::new(MemoryPollStore::new())
        }
    };

    let app_data = web::Data::new(AppData {
        engine: VotingEngine::new(store, config.policy()),
        forms: IncrementalFormBuilder::new(config.draft_batch_size, config.max_choices),
        public_url: config.public_url.clone(),
    });

    if let Some(retention) = config.retention {
        spawn_poll_retention_task(app_data.clone(), retention);
    }

    let api_prefix = "/";

    log::info!("Listening on {}:{}", config.bind_address, config.port);
    HttpServer::new(move || {
        App::new()
            .app_data(app_data.clone())
            .wrap(middleware::NormalizePath::new(
                middleware::TrailingSlash::Trim,
            ))
            .wrap(middleware::Logger::default())
            .wrap(Cors::permissive())
            .configure(|service_config| routes::configure_app(service_config, api_prefix))
    })
    .bind((config.bind_address.as_str(), config.port))
    .with_context(|| format!("Could not bind {}:{}", config.bind_address, config.port))?
    .run()
    .await?;

    Ok(())
}
