use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use vitals_backend::{config::Config, db::Db, web};

#[actix_web::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_env()?;
    let db = Db::connect(&config.database_url)
        .with_context(|| format!("failed to open database '{}'", config.database_url))?;
    log::info!("using database {}", config.database_url);

    web::new_http_server(Arc::new(Mutex::new(db)), &config)
        .await
        .context("http server failed")?;

    Ok(())
}
