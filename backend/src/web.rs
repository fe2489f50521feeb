use actix_cors::Cors;
use actix_web::{
    http::header,
    middleware,
    web::{self, Data},
    App, HttpServer,
};

use crate::{
    api::{self, SharedDb},
    config::{Config, SensorSource},
    error::{json_error_handler, query_error_handler},
};

/// Everything an `App` needs apart from middleware, shared with the tests.
pub fn app_config(cfg: &mut web::ServiceConfig, db: SharedDb, source: SensorSource) {
    cfg.app_data(Data::new(db))
        .app_data(Data::new(source))
        .app_data(
            web::JsonConfig::default()
                .content_type_required(false)
                .error_handler(json_error_handler),
        )
        .app_data(web::QueryConfig::default().error_handler(query_error_handler))
        .configure(api::services);
}

/// Device firmware posts to `/api/sensors/bulk/`; trailing slashes are dropped
/// before routing.
pub fn normalize_path() -> middleware::NormalizePath {
    middleware::NormalizePath::trim()
}

fn cors(allowed_origin: Option<&str>) -> Cors {
    let cors = match allowed_origin {
        Some(origin) => Cors::default().allowed_origin(origin),
        None => Cors::default().allow_any_origin(),
    };
    cors.allowed_methods(vec!["GET", "POST", "PUT", "DELETE"])
        .allowed_headers(vec![header::AUTHORIZATION, header::ACCEPT])
        .allowed_header(header::CONTENT_TYPE)
        .max_age(3600)
}

pub async fn new_http_server(db: SharedDb, config: &Config) -> std::io::Result<()> {
    let source = config.sensor_source;
    let origin = config.cors_allowed_origin.clone();

    log::info!(
        "listening on {}:{} ({:?} sensor values)",
        config.bind_address,
        config.port,
        source
    );

    HttpServer::new(move || {
        App::new()
            .configure(|cfg| app_config(cfg, db.clone(), source))
            .wrap(normalize_path())
            .wrap(cors(origin.as_deref()))
            .wrap(middleware::Logger::default())
    })
    .bind((config.bind_address.as_str(), config.port))?
    .run()
    .await
}
