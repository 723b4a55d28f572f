//! HTTP API server with observability for the checkout core.
//!
//! Exposes the checkout session lifecycle, idempotent order placement,
//! gateway payment reconciliation and admin seeding over REST, with
//! structured logging (tracing) and Prometheus metrics.
//!
//! The stores are held as trait objects so the same router runs over
//! the in-memory stack (tests, local development) and the PostgreSQL
//! stack (production, `DATABASE_URL` set).

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use chrono::Duration;
use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::PgPool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use checkout::{
    CheckoutOrchestrator, IdempotencyGuard, PaymentReconciler, SignatureVerifier, Sweeper,
};
use store::{
    DiscountStore, IdempotencyStore, InMemoryDiscountStore, InMemoryIdempotencyStore,
    InMemoryInventoryStore, InMemoryOrderStore, InMemorySessionStore, InventoryStore, OrderStore,
    PostgresDiscountStore, PostgresIdempotencyStore, PostgresInventoryStore, PostgresOrderStore,
    PostgresSessionStore, SessionStore,
};

use config::Config;

pub type DynSessionStore = Arc<dyn SessionStore>;
pub type DynInventoryStore = Arc<dyn InventoryStore>;
pub type DynDiscountStore = Arc<dyn DiscountStore>;
pub type DynOrderStore = Arc<dyn OrderStore>;
pub type DynIdempotencyStore = Arc<dyn IdempotencyStore>;

/// The expiry sweeper over the trait-object stores.
pub type AppSweeper = Sweeper<DynSessionStore, DynInventoryStore, DynOrderStore, DynIdempotencyStore>;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub orchestrator:
        CheckoutOrchestrator<DynSessionStore, DynInventoryStore, DynDiscountStore, DynOrderStore>,
    pub guard: IdempotencyGuard<DynIdempotencyStore>,
    pub reconciler: Arc<PaymentReconciler<DynInventoryStore, DynOrderStore>>,
    pub inventory: DynInventoryStore,
    pub discounts: DynDiscountStore,
}

/// Wires the checkout components over a set of stores.
pub fn create_state(
    sessions: DynSessionStore,
    inventory: DynInventoryStore,
    discounts: DynDiscountStore,
    orders: DynOrderStore,
    idempotency: DynIdempotencyStore,
    config: &Config,
) -> (Arc<AppState>, AppSweeper) {
    let verifier = SignatureVerifier::new(config.gateway_secret.as_bytes());
    let reconciler = Arc::new(PaymentReconciler::new(
        inventory.clone(),
        orders.clone(),
        verifier,
    ));
    let orchestrator = CheckoutOrchestrator::new(
        sessions.clone(),
        inventory.clone(),
        discounts.clone(),
        orders.clone(),
        config.checkout_config(),
    );
    let guard = IdempotencyGuard::with_ttl(
        idempotency.clone(),
        Duration::seconds(config.idempotency_ttl_secs),
    );
    let sweeper = Sweeper::new(
        sessions,
        inventory.clone(),
        orders,
        idempotency,
        reconciler.clone(),
    );

    let state = Arc::new(AppState {
        orchestrator,
        guard,
        reconciler,
        inventory,
        discounts,
    });
    (state, sweeper)
}

/// State over the in-memory stores (tests and local development).
pub fn create_memory_state(config: &Config) -> (Arc<AppState>, AppSweeper) {
    create_state(
        Arc::new(InMemorySessionStore::new()),
        Arc::new(InMemoryInventoryStore::new()),
        Arc::new(InMemoryDiscountStore::new()),
        Arc::new(InMemoryOrderStore::new()),
        Arc::new(InMemoryIdempotencyStore::new()),
        config,
    )
}

/// State over the PostgreSQL stores.
pub fn create_postgres_state(pool: PgPool, config: &Config) -> (Arc<AppState>, AppSweeper) {
    create_state(
        Arc::new(PostgresSessionStore::new(pool.clone())),
        Arc::new(PostgresInventoryStore::new(pool.clone())),
        Arc::new(PostgresDiscountStore::new(pool.clone())),
        Arc::new(PostgresOrderStore::new(pool.clone())),
        Arc::new(PostgresIdempotencyStore::new(pool)),
        config,
    )
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/checkout/sessions", post(routes::checkout::create))
        .route("/checkout/sessions/{id}", get(routes::checkout::get))
        .route(
            "/checkout/sessions/{id}/discount",
            post(routes::checkout::apply_discount).delete(routes::checkout::remove_discount),
        )
        .route(
            "/checkout/sessions/{id}/shipping",
            post(routes::checkout::select_shipping),
        )
        .route(
            "/checkout/sessions/{id}/payment-method",
            post(routes::checkout::select_payment_method),
        )
        .route("/checkout/sessions/{id}/place", post(routes::checkout::place))
        .route("/orders/{id}", get(routes::payments::order_status))
        .route("/payments/{order_id}/check", get(routes::payments::check))
        .route("/payments/notify", post(routes::payments::notify))
        .route("/admin/stock", post(routes::admin::set_stock))
        .route("/admin/discounts", post(routes::admin::create_discount))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
