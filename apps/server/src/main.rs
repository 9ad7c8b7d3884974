mod alerts;
mod auth;
mod clock;
mod db;
mod error;
mod handlers;
mod lifecycle;
mod models;
mod rate_limit;
mod reconcile;
mod schedule;

use axum::{
    middleware::from_fn_with_state,
    routing::{delete, get, post, put},
    Router,
};
use sqlx::sqlite::SqlitePoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use rate_limit::{rate_limit, RateLimiter, TierConfig};

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub db: sqlx::SqlitePool,
    pub auth_secret: String,
    pub admin_password: String,
    pub webhook_url: String,
    pub started_at: Instant,
}

/// Rate limit cleanup interval (seconds).
const RATE_LIMIT_CLEANUP_SECS: u64 = 300;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // ── Required env vars ──
    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:navalha.db?mode=rwc".into());
    let auth_secret = std::env::var("AUTH_SECRET").expect("AUTH_SECRET must be set");
    let admin_password = std::env::var("ADMIN_PASSWORD").expect("ADMIN_PASSWORD must be set");

    // ── Tracing: console + optional webhook error notifications ──
    let webhook_url = std::env::var("ALERT_WEBHOOK_URL").unwrap_or_default();

    let env_filter = EnvFilter::from_default_env().add_directive("info".parse()?);
    let fmt_layer = tracing_subscriber::fmt::layer();
    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer);

    if !webhook_url.is_empty() {
        let alert_layer = alerts::AlertLayer::new(webhook_url.clone());
        registry.with(alert_layer).init();
    } else {
        registry.init();
    }

    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".into());
    let webapp_url = std::env::var("WEBAPP_URL").unwrap_or_default();

    // ── Database ──
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;

    db::run_migrations(&pool).await?;

    let state = Arc::new(AppState {
        db: pool,
        auth_secret,
        admin_password,
        webhook_url,
        started_at: Instant::now(),
    });

    // ── Rate limiter ──
    let rate_limiter = RateLimiter::new();
    rate_limiter.add_tier(
        "public",
        TierConfig {
            max_requests: 60,
            window: Duration::from_secs(60),
        },
    );
    rate_limiter.add_tier(
        "auth",
        TierConfig {
            max_requests: 30,
            window: Duration::from_secs(60),
        },
    );
    rate_limiter.add_tier(
        "booking",
        TierConfig {
            max_requests: 5,
            window: Duration::from_secs(300),
        },
    );
    rate_limiter.add_tier(
        "admin",
        TierConfig {
            max_requests: 120,
            window: Duration::from_secs(60),
        },
    );

    // ── Background task: cleanup stale rate limit entries ──
    let cleanup_limiter = rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(tokio::time::Duration::from_secs(RATE_LIMIT_CLEANUP_SECS));
        loop {
            interval.tick().await;
            cleanup_limiter.cleanup();
        }
    });

    // ── CORS: whitelist WEBAPP_URL when configured, otherwise allow any ──
    let cors = if !webapp_url.is_empty() {
        let origins: Vec<axum::http::HeaderValue> = vec![
            webapp_url.parse().expect("WEBAPP_URL must be a valid URL"),
            "http://localhost:5173".parse().unwrap(), // Vite dev server
        ];
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    // ── Router (5 groups with per-group rate limits) ──

    // 1. No-limit: health checks
    let no_limit_routes = Router::new().route("/api/health", get(handlers::health::health));

    // 2. Public: read-only endpoints (no auth, 60 req/min)
    let public_routes = Router::new()
        .route("/api/services", get(handlers::booking::list_services))
        .route(
            "/api/available-times",
            get(handlers::booking::available_times),
        )
        .layer(from_fn_with_state(rate_limiter.tier("public"), rate_limit));

    // 3. Booking creation: strictest limit (5 req/5min)
    let booking_routes = Router::new()
        .route(
            "/api/appointments",
            post(handlers::booking::create_appointment),
        )
        .layer(from_fn_with_state(rate_limiter.tier("booking"), rate_limit));

    // 4. Auth: account + authenticated client endpoints (30 req/min)
    let auth_routes = Router::new()
        .route("/api/clients/register", post(handlers::clients::register))
        .route("/api/clients/login", post(handlers::clients::login))
        .route("/api/auth/admin", post(handlers::clients::admin_login))
        .route(
            "/api/appointments/my",
            get(handlers::appointments::my_appointments),
        )
        .route(
            "/api/appointments/{id}",
            delete(handlers::appointments::cancel_appointment),
        )
        .route("/api/clients/{id}", get(handlers::clients::get_client))
        .layer(from_fn_with_state(rate_limiter.tier("auth"), rate_limit));

    // 5. Admin: all admin endpoints (120 req/min)
    let admin_routes = Router::new()
        .route(
            "/api/admin/appointments",
            get(handlers::appointments::list_appointments),
        )
        .route(
            "/api/admin/appointments/{id}",
            put(handlers::appointments::update_appointment),
        )
        .route("/api/admin/clients", get(handlers::clients::list_clients))
        .route(
            "/api/admin/clients/{id}",
            put(handlers::clients::update_client),
        )
        .route(
            "/api/admin/services",
            get(handlers::settings::list_all_services),
        )
        .route(
            "/api/admin/services",
            post(handlers::settings::create_service),
        )
        .route(
            "/api/admin/services/{id}",
            put(handlers::settings::update_service),
        )
        .route("/api/admin/settings", get(handlers::settings::get_settings))
        .route(
            "/api/admin/settings",
            put(handlers::settings::update_settings),
        )
        .layer(from_fn_with_state(rate_limiter.tier("admin"), rate_limit));

    let app = Router::new()
        .merge(no_limit_routes)
        .merge(public_routes)
        .merge(booking_routes)
        .merge(auth_routes)
        .merge(admin_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    let addr = format!("{}:{}", host, port);
    tracing::info!("Navalha server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
