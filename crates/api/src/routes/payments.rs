//! Payment reconciliation endpoints.
//!
//! The gateway reports an outcome on two channels: the synchronous
//! return path (GET with query parameters, the customer's redirect)
//! and the asynchronous webhook (POST with a JSON body). Both carry
//! the same signed fields and both go through the same reconciler, so
//! whichever lands second is answered from the final state.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use checkout::{ConfirmOutcome, GatewayStatus};
use common::{Money, OrderId};

use crate::error::ApiError;
use crate::AppState;

#[derive(Deserialize)]
pub struct CheckQuery {
    pub amount_cents: i64,
    pub status: GatewayStatus,
    pub signature: String,
}

#[derive(Deserialize)]
pub struct NotifyRequest {
    pub order_id: uuid::Uuid,
    pub amount_cents: i64,
    pub status: GatewayStatus,
    pub signature: String,
}

#[derive(Serialize)]
pub struct ConfirmResponse {
    pub order_id: String,
    pub order_status: String,
    pub payment_status: String,
    /// True when the payment was already final and nothing changed.
    pub duplicate: bool,
}

impl ConfirmResponse {
    fn new(order_id: OrderId, outcome: ConfirmOutcome) -> Self {
        let (order_status, payment_status, duplicate) = match outcome {
            ConfirmOutcome::Applied {
                order_status,
                payment_status,
            } => (order_status, payment_status, false),
            ConfirmOutcome::AlreadyFinal {
                order_status,
                payment_status,
            } => (order_status, payment_status, true),
        };
        Self {
            order_id: order_id.to_string(),
            order_status: order_status.to_string(),
            payment_status: payment_status.to_string(),
            duplicate,
        }
    }
}

#[derive(Serialize)]
pub struct OrderStatusResponse {
    pub order_id: String,
    pub order_status: String,
    pub payment_status: String,
    pub total_cents: i64,
}

// -- Handlers --

/// GET /payments/:order_id/check — synchronous return-path confirmation.
#[tracing::instrument(skip(state, query))]
pub async fn check(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<uuid::Uuid>,
    Query(query): Query<CheckQuery>,
) -> Result<Json<ConfirmResponse>, ApiError> {
    let order_id = OrderId::from_uuid(order_id);
    let outcome = state
        .reconciler
        .confirm(
            order_id,
            Money::from_cents(query.amount_cents),
            query.status,
            &query.signature,
            Utc::now(),
        )
        .await?;
    Ok(Json(ConfirmResponse::new(order_id, outcome)))
}

/// POST /payments/notify — asynchronous gateway webhook.
#[tracing::instrument(skip(state, req))]
pub async fn notify(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NotifyRequest>,
) -> Result<Json<ConfirmResponse>, ApiError> {
    let order_id = OrderId::from_uuid(req.order_id);
    let outcome = state
        .reconciler
        .confirm(
            order_id,
            Money::from_cents(req.amount_cents),
            req.status,
            &req.signature,
            Utc::now(),
        )
        .await?;
    Ok(Json(ConfirmResponse::new(order_id, outcome)))
}

/// GET /orders/:id — current order and payment state, expiring an
/// overdue pending payment lazily.
#[tracing::instrument(skip(state))]
pub async fn order_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<uuid::Uuid>,
) -> Result<Json<OrderStatusResponse>, ApiError> {
    let (order, payment) = state
        .reconciler
        .check(OrderId::from_uuid(id), Utc::now())
        .await?;
    Ok(Json(OrderStatusResponse {
        order_id: order.id.to_string(),
        order_status: order.status.to_string(),
        payment_status: payment.status.to_string(),
        total_cents: order.total.cents(),
    }))
}
