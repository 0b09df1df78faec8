// src/bin/api_server.rs

use entity_store::infra::config;
use entity_store::transport;
use entity_store::{
    BroadcastInvalidator, ConnectionManager, EntityService, HttpInvoker, MemoryAdapter, PostgresAdapter,
    RemoteInvoker, ServiceBroker, StorageAdapter,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // --- Configuration ---
    let pagination = config::pagination_defaults()?;
    let retry_interval = config::reconnect_interval()?;
    let request_timeout = config::request_timeout()?;
    let database_url = config::database_url();
    let max_connections = config::database_max_connections()?;

    let definitions = match config::entity_services_file() {
        Some(path) => config::load_service_definitions(&path)?,
        None => {
            tracing::warn!("ENTITY_SERVICES_FILE is not set; no entity services will be registered");
            Vec::new()
        }
    };

    // --- Broker, invoker and cache signal ---
    let broker = ServiceBroker::new();
    let invoker: Arc<dyn RemoteInvoker> = match config::populate_base_url() {
        Some(base_url) => {
            tracing::info!(%base_url, "populate calls go over HTTP");
            Arc::new(HttpInvoker::new(base_url, request_timeout.unwrap_or(Duration::from_secs(30)))?)
        }
        None => broker.invoker(),
    };

    let cache = Arc::new(BroadcastInvalidator::default());
    let mut invalidations = cache.subscribe();
    tokio::spawn(async move {
        loop {
            match invalidations.recv().await {
                Ok(pattern) => tracing::debug!(%pattern, "cache invalidated"),
                Err(RecvError::Lagged(skipped)) => tracing::warn!(skipped, "cache listener lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    // --- Entity services ---
    let mut connections = Vec::with_capacity(definitions.len());
    for definition in definitions {
        let service_config = definition.into_config(&pagination)?;
        let adapter: Arc<dyn StorageAdapter> = match &database_url {
            Some(url) => Arc::new(PostgresAdapter::new(
                url.clone(),
                service_config.name(),
                service_config.primary_key_field(),
                max_connections,
            )?),
            None => Arc::new(MemoryAdapter::new(service_config.primary_key_field())),
        };

        let manager = Arc::new(ConnectionManager::new(
            service_config.name(),
            adapter.clone(),
            retry_interval,
        ));
        manager.start();
        connections.push(manager);

        let service = EntityService::new(service_config, adapter)
            .with_invoker(invoker.clone())
            .with_cache(cache.clone());
        broker.register(service).await;
    }
    tracing::info!(
        services = ?broker.service_names().await,
        backend = if database_url.is_some() { "postgres" } else { "memory" },
        "entity services initialized"
    );

    let app_state = transport::http::AppState {
        broker: broker.clone(),
        connections: Arc::new(connections),
        request_timeout,
    };

    // --- API Server ---
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
    let app = transport::http::create_router(app_state.clone())
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", transport::http::ApiDoc::openapi()))
        .layer(cors);

    let bind_addr = config::bind_addr();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(%bind_addr, "API server listening; Swagger UI at /swagger-ui");

    tokio::select! {
        result = axum::serve(listener, app) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received, disconnecting entity services");
        }
    }

    for manager in app_state.connections.iter() {
        if let Err(e) = manager.disconnect().await {
            tracing::error!(service = %manager.name(), error = %e, "disconnect failed");
        }
    }
    tracing::info!("graceful shutdown complete");
    Ok(())
}
