// API server implementation using actix-web

use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use tracing::info;

use crate::api::auth::AuthState;
use crate::api::handlers::AppState;
use crate::api::{auth, middleware, routes};
use crate::catalog::Db;
use crate::config::AppConfig;
use crate::queue::SyncQueues;

pub struct ApiServer {
    pub host: String,
    pub port: u16,
    pub allowed_origins: String,
}

impl ApiServer {
    pub fn from_config(cfg: &AppConfig) -> Self {
        let allowed_origins = crate::util::env::env_opt("ALLOWED_ORIGINS")
            .unwrap_or_else(|| "http://localhost:3000,http://localhost:5173".to_string());
        Self {
            host: cfg.api_host.clone(),
            port: cfg.api_port,
            allowed_origins,
        }
    }

    /// Start the HTTP server; blocks until shutdown.
    pub async fn run(self, db: Db, queues: SyncQueues, config: AppConfig) -> Result<()> {
        let bind_addr = format!("{}:{}", self.host, self.port);
        let auth_state = Arc::new(AuthState::from_config(&config));

        info!(
            host = %self.host,
            port = %self.port,
            auth_enabled = auth_state.enabled(),
            "starting API server"
        );

        let app_state = web::Data::new(AppState { db, queues, config });
        let auth_data = web::Data::new(auth_state.clone());
        let allowed_origins = self.allowed_origins.clone();

        HttpServer::new(move || {
            let (logger, compress) = middleware::setup_middleware();
            let cors = middleware::setup_cors(&allowed_origins);
            let auth = auth::Auth::new(auth_state.clone());

            App::new()
                .app_data(app_state.clone())
                .app_data(auth_data.clone())
                .wrap(logger)
                .wrap(compress)
                .wrap(cors)
                .wrap(auth)
                .configure(routes::configure_routes)
        })
        .bind(&bind_addr)
        .with_context(|| format!("failed to bind to {}", bind_addr))?
        .run()
        .await
        .context("HTTP server error")?;

        Ok(())
    }
}
