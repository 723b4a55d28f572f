//! Admin endpoints for seeding stock and discount definitions.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use checkout::CheckoutError;
use common::{DiscountId, Money, VariantId};
use domain::{Discount, DiscountKind};
use store::{DiscountStore, InventoryStore};

use crate::error::ApiError;
use crate::AppState;

#[derive(Deserialize)]
pub struct StockRequest {
    pub variant_id: String,
    pub on_hand: u32,
}

#[derive(Deserialize)]
pub struct DiscountRequest {
    pub code: String,
    /// Exactly one of `percent_off` and `amount_off_cents` is required.
    pub percent_off: Option<u32>,
    pub amount_off_cents: Option<i64>,
    #[serde(default = "default_active")]
    pub active: bool,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub max_redemptions: Option<u32>,
    pub per_user_limit: Option<u32>,
    #[serde(default)]
    pub min_order_amount_cents: i64,
    #[serde(default)]
    pub variant_ids: Vec<String>,
}

fn default_active() -> bool {
    true
}

#[derive(Serialize)]
pub struct DiscountCreatedResponse {
    pub id: String,
    pub code: String,
}

/// POST /admin/stock — set the on-hand quantity for a variant.
#[tracing::instrument(skip(state, req))]
pub async fn set_stock(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StockRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .inventory
        .set_on_hand(VariantId::new(req.variant_id), req.on_hand)
        .await
        .map_err(CheckoutError::from)?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /admin/discounts — create a discount definition.
#[tracing::instrument(skip(state, req))]
pub async fn create_discount(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DiscountRequest>,
) -> Result<(StatusCode, Json<DiscountCreatedResponse>), ApiError> {
    let kind = match (req.percent_off, req.amount_off_cents) {
        (Some(p), None) if p > 0 && p <= 100 => DiscountKind::Percentage(p),
        (None, Some(cents)) if cents > 0 => DiscountKind::FixedAmount(Money::from_cents(cents)),
        _ => {
            return Err(CheckoutError::Validation(
                "exactly one of percent_off (1-100) or amount_off_cents (> 0) is required"
                    .to_string(),
            )
            .into());
        }
    };

    let now = Utc::now();
    let discount = Discount {
        id: DiscountId::new(),
        code: req.code.clone(),
        kind,
        active: req.active,
        starts_at: req.starts_at.unwrap_or(now),
        ends_at: req.ends_at.unwrap_or(now + Duration::days(365)),
        max_redemptions: req.max_redemptions,
        per_user_limit: req.per_user_limit,
        min_order_amount: Money::from_cents(req.min_order_amount_cents),
        scope_variants: req.variant_ids.into_iter().map(VariantId::new).collect(),
    };
    let id = discount.id;

    state
        .discounts
        .insert_discount(discount)
        .await
        .map_err(CheckoutError::from)?;

    Ok((
        StatusCode::CREATED,
        Json(DiscountCreatedResponse {
            id: id.to_string(),
            code: req.code,
        }),
    ))
}
