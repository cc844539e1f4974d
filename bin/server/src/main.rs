use rootcause::Report;
use shopgate_access::RouteTable;
use shopgate_server::{
    app,
    auth::{AccessStore, AppState, IdentityProviderClient, db::PgAccessStore},
    config::ServerConfig,
    error::StartupError,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(report) = run().await {
        tracing::error!(error = %report, "server exited");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Report<StartupError>> {
    let config = ServerConfig::from_env().map_err(|e| StartupError::Configuration {
        details: e.to_string(),
    })?;
    tracing::info!("Loaded configuration");

    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .map_err(|e| StartupError::Database {
            details: e.to_string(),
        })?;

    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .map_err(|e| StartupError::Migration {
            details: e.to_string(),
        })?;

    let provider = IdentityProviderClient::new(&config.provider).map_err(|e| {
        StartupError::Provider {
            details: e.to_string(),
        }
    })?;
    let store = PgAccessStore::new(db_pool);
    let routes = RouteTable::storefront();

    // Roles the table accepts but the catalog leaves empty can never match.
    let model = store
        .load_permission_model()
        .await
        .map_err(|e| StartupError::PermissionModel {
            details: e.to_string(),
        })?;
    for (pattern, role) in routes.unresolvable_roles(&model) {
        tracing::warn!(pattern, role, "route accepts a role with no permissions");
    }

    let redirect_uri = config.provider.redirect_uri().to_string();
    let state = Arc::new(AppState::new(
        Arc::new(provider),
        Arc::new(store),
        redirect_uri,
        &config.session,
        config.access,
        routes,
    ));

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .map_err(|e| StartupError::Serve {
            details: e.to_string(),
        })?;
    tracing::info!("listening on http://{}", config.listen_addr);

    axum::serve(listener, app::router(state).into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| StartupError::Serve {
            details: e.to_string(),
        })?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
    }
    tracing::info!("shutting down");
}
