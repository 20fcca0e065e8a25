//! HTTP server bootstrap for the Notary Service.
//!
//! This module wires together:
//! - configuration
//! - database connection pool
//! - core services (credential store, signing authority, interceptor,
//!   audit consumer)
//! - the Axum router

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderValue, Method};
use axum::routing::get;
use axum::Router;
use rand::RngCore;
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::AllowOrigin;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::audit::{AuditConsumer, AuditConsumerConfig, AuditVerifier, PgAuditStore};
use crate::auth::{AuthMiddlewareState, JwtValidator};
use crate::authority::{LocalKeyBackend, PgSignatureRecordStore, SigningAuthority};
use crate::bus::PgAuditQueue;
use crate::credential::PgSecretStore;
use crate::crypto::NotarySigningKey;
use crate::infra::PgDeadLetterQueue;
use crate::pipeline::SigningInterceptor;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection URL.
    pub database_url: String,
    /// Server listen address.
    pub listen_addr: SocketAddr,
    /// Maximum database connections.
    pub max_connections: u32,
    /// Bound on a single signing backend call.
    pub signing_timeout: Duration,
    /// Delivery attempts before an audit event is dead-lettered.
    pub audit_max_attempts: i32,
    /// Audit consumer poll interval.
    pub audit_poll_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/notary_service".to_string());

        let port: u16 = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);

        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let listen_addr: SocketAddr = format!("{host}:{port}")
            .parse()
            .expect("Invalid listen address");

        let max_connections: u32 = std::env::var("MAX_DB_CONNECTIONS")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(10);

        let signing_timeout = std::env::var("SIGNING_TIMEOUT_MS")
            .ok()
            .and_then(|p| p.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_secs(5));

        let audit_max_attempts: i32 = std::env::var("AUDIT_MAX_ATTEMPTS")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(5);

        let audit_poll_interval = std::env::var("AUDIT_POLL_INTERVAL_MS")
            .ok()
            .and_then(|p| p.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_millis(500));

        Self {
            database_url,
            listen_addr,
            max_connections,
            signing_timeout,
            audit_max_attempts,
            audit_poll_interval,
        }
    }
}

/// Start the HTTP server and the audit consumer.
pub async fn run() -> anyhow::Result<()> {
    init_tracing();

    info!("Starting Notary Service v{}", env!("CARGO_PKG_VERSION"));

    // Auth configuration
    let auth_mode = std::env::var("AUTH_MODE").unwrap_or_else(|_| "required".to_string());
    let require_auth = auth_mode != "disabled";

    let jwt_validator = match std::env::var("JWT_SECRET") {
        Ok(secret) => {
            let issuer =
                std::env::var("JWT_ISSUER").unwrap_or_else(|_| "notary-service".to_string());
            let audience =
                std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "notary-api".to_string());
            Some(Arc::new(JwtValidator::new(
                secret.as_bytes(),
                &issuer,
                &audience,
            )))
        }
        Err(_) => None,
    };

    let jwt_validator = match jwt_validator {
        Some(jwt) => jwt,
        None if require_auth => {
            anyhow::bail!(
                "AUTH_MODE=required but JWT_SECRET is not set (set AUTH_MODE=disabled for local dev)"
            );
        }
        None => {
            warn!("JWT_SECRET not set, using an ephemeral secret (dev mode)");
            let mut ephemeral = [0u8; 32];
            rand::rngs::OsRng.fill_bytes(&mut ephemeral);
            Arc::new(JwtValidator::new(&ephemeral, "notary-service", "notary-api"))
        }
    };

    let auth_state = AuthMiddlewareState {
        jwt_validator,
        require_auth,
    };

    // Load configuration
    let config = Config::from_env();
    info!("Configuration loaded");
    info!("  Listen address: {}", config.listen_addr);
    info!("  Max connections: {}", config.max_connections);
    info!("  Signing timeout: {:?}", config.signing_timeout);

    // Connect to PostgreSQL
    info!("Connecting to PostgreSQL...");
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await?;
    info!("Connected to PostgreSQL");

    let migrate_on_startup = std::env::var("DB_MIGRATE_ON_STARTUP")
        .ok()
        .map(|v| {
            !matches!(
                v.trim().to_ascii_lowercase().as_str(),
                "0" | "false" | "off"
            )
        })
        .unwrap_or(true);
    if migrate_on_startup {
        info!("Running database migrations...");
        crate::migrations::run_postgres(&pool).await?;
        info!("Database migrations applied");
    } else {
        info!("DB migrations skipped (DB_MIGRATE_ON_STARTUP=0)");
    }

    // Signing key: hex-encoded 32-byte secret, or an ephemeral key for dev.
    // An ephemeral key means signatures do not verify across restarts.
    let signing_key = match std::env::var("NOTARY_SIGNING_KEY") {
        Ok(hex_key) => {
            let bytes: [u8; 32] = hex::decode(hex_key.trim())
                .map_err(|e| anyhow::anyhow!("NOTARY_SIGNING_KEY is not valid hex: {e}"))?
                .try_into()
                .map_err(|_| anyhow::anyhow!("NOTARY_SIGNING_KEY must be 32 bytes"))?;
            NotarySigningKey::from_bytes(&bytes)
        }
        Err(_) => {
            warn!("NOTARY_SIGNING_KEY not set, generating an ephemeral signing key");
            NotarySigningKey::generate()
        }
    };

    // Initialize services
    let secrets = Arc::new(PgSecretStore::new(pool.clone()));
    let backend = Arc::new(LocalKeyBackend::new(signing_key));
    let records = Arc::new(PgSignatureRecordStore::new(pool.clone()));
    let authority = Arc::new(
        SigningAuthority::new(secrets.clone(), backend, records)
            .with_backend_timeout(config.signing_timeout),
    );
    info!("Signing authority ready, key id {}", authority.key_id());

    let queue = Arc::new(PgAuditQueue::new(pool.clone()));
    let audit_store = Arc::new(PgAuditStore::new(pool.clone()));
    let dead_letters = Arc::new(PgDeadLetterQueue::new(pool.clone()));
    let verifier = Arc::new(AuditVerifier::new(audit_store.clone(), authority.clone()));
    let interceptor = Arc::new(SigningInterceptor::new(authority.clone(), queue.clone()));

    // Start the audit consumer
    let consumer = Arc::new(AuditConsumer::new(
        queue,
        audit_store.clone(),
        authority.clone(),
        dead_letters,
        AuditConsumerConfig {
            poll_interval: config.audit_poll_interval,
            max_attempts: config.audit_max_attempts,
            ..Default::default()
        },
    ));
    let consumer_handle = {
        let consumer = consumer.clone();
        tokio::spawn(async move { consumer.run().await })
    };

    // Create application state
    let state = AppState {
        authority,
        secrets,
        audit_store,
        verifier,
        interceptor,
    };

    // Build router
    let app = build_router(auth_state)?.with_state(state);

    // Start server
    info!("Starting HTTP server on {}", config.listen_addr);
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;

    info!("Notary Service is ready to accept connections");
    axum::serve(listener, app).await?;

    consumer.shutdown();
    consumer_handle.await?;

    Ok(())
}

fn build_router(auth_state: AuthMiddlewareState) -> anyhow::Result<Router<AppState>> {
    let api = crate::api::router().layer(axum::middleware::from_fn_with_state(
        auth_state,
        crate::auth::auth_middleware,
    ));

    let mut router = Router::new()
        .nest("/api", api)
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .layer(axum::extract::DefaultBodyLimit::max(1024 * 1024))
        .layer(TraceLayer::new_for_http());

    if let Some(cors_layer) = cors_layer_from_env()? {
        router = router.layer(cors_layer);
    }

    Ok(router)
}

fn cors_layer_from_env() -> anyhow::Result<Option<CorsLayer>> {
    let origins = match std::env::var("CORS_ALLOW_ORIGINS") {
        Ok(v) => v,
        Err(_) => return Ok(None),
    };

    let origins = origins.trim();
    if origins.is_empty() {
        return Ok(None);
    }

    let allow_origin = if origins == "*" {
        AllowOrigin::any()
    } else {
        let origins: Vec<HeaderValue> = origins
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<HeaderValue>()
                    .map_err(|e| anyhow::anyhow!("Invalid CORS origin {s:?}: {e}"))
            })
            .collect::<anyhow::Result<_>>()?;
        AllowOrigin::list(origins)
    };

    Ok(Some(
        CorsLayer::new()
            .allow_origin(allow_origin)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([
                axum::http::header::AUTHORIZATION,
                axum::http::header::CONTENT_TYPE,
            ]),
    ))
}

/// Health check endpoint.
async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "healthy",
        "service": "notary-service",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Readiness check endpoint.
async fn readiness_check(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Result<axum::Json<serde_json::Value>, (axum::http::StatusCode, String)> {
    // Check database connectivity with a known-miss lookup.
    match state.audit_store.get(uuid::Uuid::nil()).await {
        Ok(_) => Ok(axum::Json(serde_json::json!({
            "status": "ready",
            "database": "connected",
        }))),
        Err(e) => Err((
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            format!("Database unavailable: {}", e),
        )),
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string()));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();
}
