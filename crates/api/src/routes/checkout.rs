//! Checkout session endpoints and idempotent order placement.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use checkout::{CheckoutError, PlacementConfirmation};
use common::{CustomerId, Money, SessionId};
use domain::{CartLine, CheckoutSession, PaymentMethod, ShippingMethod};

use crate::error::ApiError;
use crate::AppState;

// -- Request types --

#[derive(Deserialize)]
pub struct CreateSessionRequest {
    pub customer_id: Option<uuid::Uuid>,
    pub items: Vec<LineRequest>,
}

#[derive(Deserialize)]
pub struct LineRequest {
    pub variant_id: String,
    pub name: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
}

#[derive(Deserialize)]
pub struct ApplyDiscountRequest {
    pub code: String,
}

#[derive(Deserialize)]
pub struct ShippingRequest {
    pub method: ShippingMethod,
}

#[derive(Deserialize)]
pub struct PaymentMethodRequest {
    pub method: PaymentMethod,
}

// -- Response types --

#[derive(Serialize)]
pub struct LineResponse {
    pub variant_id: String,
    pub name: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
}

#[derive(Serialize)]
pub struct SessionResponse {
    pub id: String,
    pub customer_id: String,
    pub state: String,
    pub items: Vec<LineResponse>,
    pub discount_code: Option<String>,
    pub discount_amount_cents: i64,
    pub shipping_method: Option<ShippingMethod>,
    pub payment_method: Option<PaymentMethod>,
    pub subtotal_cents: i64,
    pub shipping_fee_cents: i64,
    pub total_cents: i64,
    pub expires_at: DateTime<Utc>,
}

impl From<&CheckoutSession> for SessionResponse {
    fn from(session: &CheckoutSession) -> Self {
        Self {
            id: session.id.to_string(),
            customer_id: session.customer_id.to_string(),
            state: session.state.to_string(),
            items: session
                .lines
                .iter()
                .map(|l| LineResponse {
                    variant_id: l.variant_id.to_string(),
                    name: l.name.clone(),
                    quantity: l.quantity,
                    unit_price_cents: l.unit_price.cents(),
                })
                .collect(),
            discount_code: session.discount_code.clone(),
            discount_amount_cents: session.discount_amount.cents(),
            shipping_method: session.shipping_method,
            payment_method: session.payment_method,
            subtotal_cents: session.subtotal().cents(),
            shipping_fee_cents: session.shipping_fee().cents(),
            total_cents: session.total().cents(),
            expires_at: session.expires_at,
        }
    }
}

#[derive(Serialize)]
pub struct PlaceResponse {
    pub order_id: String,
    pub payment_id: String,
    pub amount_cents: i64,
    pub order_status: String,
    pub payment_status: String,
}

impl From<PlacementConfirmation> for PlaceResponse {
    fn from(c: PlacementConfirmation) -> Self {
        Self {
            order_id: c.order_id.to_string(),
            payment_id: c.payment_id.to_string(),
            amount_cents: c.amount.cents(),
            order_status: c.order_status.to_string(),
            payment_status: c.payment_status.to_string(),
        }
    }
}

// -- Handlers --

/// POST /checkout/sessions — create a session from a cart payload.
#[tracing::instrument(skip(state, req))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<SessionResponse>), ApiError> {
    let customer_id = req
        .customer_id
        .map(CustomerId::from_uuid)
        .unwrap_or_else(CustomerId::new);
    let lines: Vec<CartLine> = req
        .items
        .iter()
        .map(|i| {
            CartLine::new(
                i.variant_id.as_str(),
                i.name.as_str(),
                Money::from_cents(i.unit_price_cents),
                i.quantity,
            )
        })
        .collect();

    let session = state
        .orchestrator
        .create_session(customer_id, lines, Utc::now())
        .await?;
    Ok((StatusCode::CREATED, Json(SessionResponse::from(&session))))
}

/// GET /checkout/sessions/:id — load a session.
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<uuid::Uuid>,
) -> Result<Json<SessionResponse>, ApiError> {
    let session = state
        .orchestrator
        .get_session(SessionId::from_uuid(id))
        .await?;
    Ok(Json(SessionResponse::from(&session)))
}

/// POST /checkout/sessions/:id/discount — validate and apply a code.
#[tracing::instrument(skip(state, req))]
pub async fn apply_discount(
    State(state): State<Arc<AppState>>,
    Path(id): Path<uuid::Uuid>,
    Json(req): Json<ApplyDiscountRequest>,
) -> Result<Json<SessionResponse>, ApiError> {
    let session = state
        .orchestrator
        .apply_discount(SessionId::from_uuid(id), &req.code, Utc::now())
        .await?;
    Ok(Json(SessionResponse::from(&session)))
}

/// DELETE /checkout/sessions/:id/discount — remove the applied code.
#[tracing::instrument(skip(state))]
pub async fn remove_discount(
    State(state): State<Arc<AppState>>,
    Path(id): Path<uuid::Uuid>,
) -> Result<Json<SessionResponse>, ApiError> {
    let session = state
        .orchestrator
        .remove_discount(SessionId::from_uuid(id), Utc::now())
        .await?;
    Ok(Json(SessionResponse::from(&session)))
}

/// POST /checkout/sessions/:id/shipping — select the shipping method.
#[tracing::instrument(skip(state, req))]
pub async fn select_shipping(
    State(state): State<Arc<AppState>>,
    Path(id): Path<uuid::Uuid>,
    Json(req): Json<ShippingRequest>,
) -> Result<Json<SessionResponse>, ApiError> {
    let session = state
        .orchestrator
        .select_shipping(SessionId::from_uuid(id), req.method, Utc::now())
        .await?;
    Ok(Json(SessionResponse::from(&session)))
}

/// POST /checkout/sessions/:id/payment-method — select the payment method.
#[tracing::instrument(skip(state, req))]
pub async fn select_payment_method(
    State(state): State<Arc<AppState>>,
    Path(id): Path<uuid::Uuid>,
    Json(req): Json<PaymentMethodRequest>,
) -> Result<Json<SessionResponse>, ApiError> {
    let session = state
        .orchestrator
        .select_payment_method(SessionId::from_uuid(id), req.method, Utc::now())
        .await?;
    Ok(Json(SessionResponse::from(&session)))
}

/// POST /checkout/sessions/:id/place — place the order, guarded by the
/// required `Idempotency-Key` header. A replayed key returns the stored
/// confirmation byte for byte.
#[tracing::instrument(skip(state, headers))]
pub async fn place(
    State(state): State<Arc<AppState>>,
    Path(id): Path<uuid::Uuid>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<PlaceResponse>), ApiError> {
    let key = headers
        .get("Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .ok_or_else(|| {
            CheckoutError::Validation("missing Idempotency-Key header".to_string())
        })?;

    let session_id = SessionId::from_uuid(id);
    let outcome = state
        .guard
        .execute(key, &session_id.to_string(), || async {
            state.orchestrator.place(session_id, Utc::now()).await
        })
        .await?;

    let status = if outcome.is_replay() {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(PlaceResponse::from(outcome.into_inner()))))
}
