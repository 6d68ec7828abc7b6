// API route configuration

use crate::api::handlers;
use actix_web::web;

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg
        // Health check (no auth required)
        .route("/health", web::get().to(handlers::health_check))
        .route("/", web::get().to(handlers::health_check))
        .service(
            web::scope("/api/v1")
                .route("/auth/login", web::post().to(handlers::login))
                .route("/platforms", web::get().to(handlers::list_platforms))
                .route("/libraries", web::get().to(handlers::list_libraries))
                .route("/libraries", web::post().to(handlers::create_library))
                .route("/libraries/{id}", web::get().to(handlers::get_library))
                .route("/libraries/{id}", web::patch().to(handlers::update_library))
                .route("/libraries/{id}", web::delete().to(handlers::delete_library))
                .route("/libraries/{id}/sync", web::post().to(handlers::trigger_sync))
                .route(
                    "/libraries/{id}/sync/status",
                    web::get().to(handlers::sync_status),
                )
                .route(
                    "/libraries/{id}/sync/cancel",
                    web::post().to(handlers::cancel_sync),
                )
                .route("/games", web::get().to(handlers::list_games))
                .route("/games/search", web::get().to(handlers::search_games))
                .route("/games/{id}", web::get().to(handlers::get_game)),
        );
}
