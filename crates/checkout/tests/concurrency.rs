//! Contention tests for the placement and payment pipeline.
//!
//! These drive the real components against the in-memory stores, which
//! give the same atomic check-and-write guarantees as the PostgreSQL
//! stores, so races observed here are races the production stack would
//! have too.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::task::JoinSet;

use checkout::{
    CheckoutConfig, CheckoutOrchestrator, ConfirmOutcome, GatewayStatus, IdempotencyGuard,
    PaymentReconciler, PlacementConfirmation, SignatureVerifier, Sweeper,
};
use common::{CustomerId, Money, VariantId};
use domain::{
    CartLine, Discount, DiscountKind, OrderStatus, PaymentMethod, PaymentStatus,
    ReservationStatus, SessionState, ShippingMethod,
};
use store::{
    DiscountStore, InMemoryDiscountStore, InMemoryIdempotencyStore, InMemoryInventoryStore,
    InMemoryOrderStore, InMemorySessionStore, InventoryStore, OrderStore,
};

type Orchestrator = CheckoutOrchestrator<
    InMemorySessionStore,
    InMemoryInventoryStore,
    InMemoryDiscountStore,
    InMemoryOrderStore,
>;

struct Ctx {
    orchestrator: Arc<Orchestrator>,
    guard: Arc<IdempotencyGuard<InMemoryIdempotencyStore>>,
    reconciler: Arc<PaymentReconciler<InMemoryInventoryStore, InMemoryOrderStore>>,
    verifier: SignatureVerifier,
    inventory: InMemoryInventoryStore,
    discounts: InMemoryDiscountStore,
    orders: InMemoryOrderStore,
    sessions: InMemorySessionStore,
    idempotency: InMemoryIdempotencyStore,
}

fn ctx() -> Ctx {
    let sessions = InMemorySessionStore::new();
    let inventory = InMemoryInventoryStore::new();
    let discounts = InMemoryDiscountStore::new();
    let orders = InMemoryOrderStore::new();
    let idempotency = InMemoryIdempotencyStore::new();
    let verifier = SignatureVerifier::new(b"contention-secret".to_vec());

    Ctx {
        orchestrator: Arc::new(CheckoutOrchestrator::new(
            sessions.clone(),
            inventory.clone(),
            discounts.clone(),
            orders.clone(),
            CheckoutConfig::default(),
        )),
        guard: Arc::new(IdempotencyGuard::new(idempotency.clone())),
        reconciler: Arc::new(PaymentReconciler::new(
            inventory.clone(),
            orders.clone(),
            verifier.clone(),
        )),
        verifier,
        inventory,
        discounts,
        orders,
        sessions,
        idempotency,
    }
}

async fn seed_stock(ctx: &Ctx, sku: &str, on_hand: u32) {
    ctx.inventory
        .set_on_hand(VariantId::new(sku), on_hand)
        .await
        .unwrap();
}

/// Builds a session that is ready to place: one line, shipping and
/// payment method selected.
async fn ready_session(ctx: &Ctx, sku: &str, quantity: u32, method: PaymentMethod) -> domain::CheckoutSession {
    let now = Utc::now();
    let session = ctx
        .orchestrator
        .create_session(
            CustomerId::new(),
            vec![CartLine::new(sku, "Widget", Money::from_cents(1000), quantity)],
            now,
        )
        .await
        .unwrap();
    ctx.orchestrator
        .select_shipping(session.id, ShippingMethod::Standard, now)
        .await
        .unwrap();
    ctx.orchestrator
        .select_payment_method(session.id, method, now)
        .await
        .unwrap()
}

fn percent_off(code: &str, cap: Option<u32>) -> Discount {
    let now = Utc::now();
    Discount {
        id: common::DiscountId::new(),
        code: code.to_string(),
        kind: DiscountKind::Percentage(10),
        active: true,
        starts_at: now - Duration::days(1),
        ends_at: now + Duration::days(1),
        max_redemptions: cap,
        per_user_limit: None,
        min_order_amount: Money::zero(),
        scope_variants: vec![],
    }
}

#[tokio::test]
async fn shared_key_concurrent_placements_create_one_order() {
    let ctx = ctx();
    seed_stock(&ctx, "SKU-001", 100).await;
    let session = ready_session(&ctx, "SKU-001", 1, PaymentMethod::Gateway).await;
    let scope = session.id.to_string();

    let mut tasks = JoinSet::new();
    for _ in 0..16 {
        let guard = ctx.guard.clone();
        let orchestrator = ctx.orchestrator.clone();
        let scope = scope.clone();
        let session_id = session.id;
        tasks.spawn(async move {
            guard
                .execute("place-key-1", &scope, || async move {
                    orchestrator.place(session_id, Utc::now()).await
                })
                .await
        });
    }

    let mut confirmations: Vec<PlacementConfirmation> = Vec::new();
    let mut conflicts = 0;
    while let Some(result) = tasks.join_next().await {
        match result.unwrap() {
            Ok(outcome) => confirmations.push(outcome.into_inner()),
            // Losers that arrive while the winner is still in flight.
            Err(e) => {
                assert_eq!(e.code(), "CONFLICT");
                conflicts += 1;
            }
        }
    }

    assert!(!confirmations.is_empty());
    assert_eq!(confirmations.len() + conflicts, 16);
    let order_id = confirmations[0].order_id;
    assert!(confirmations.iter().all(|c| c.order_id == order_id));
    assert_eq!(ctx.orders.order_count().await, 1);
}

#[tokio::test]
async fn replayed_key_returns_identical_confirmation() {
    let ctx = ctx();
    seed_stock(&ctx, "SKU-001", 10).await;
    let session = ready_session(&ctx, "SKU-001", 2, PaymentMethod::Gateway).await;
    let scope = session.id.to_string();

    let first = ctx
        .guard
        .execute("place-key-1", &scope, || async {
            ctx.orchestrator.place(session.id, Utc::now()).await
        })
        .await
        .unwrap();
    assert!(!first.is_replay());

    let second = ctx
        .guard
        .execute("place-key-1", &scope, || async {
            ctx.orchestrator.place(session.id, Utc::now()).await
        })
        .await
        .unwrap();
    assert!(second.is_replay());

    let (a, b) = (first.into_inner(), second.into_inner());
    assert_eq!(a.order_id, b.order_id);
    assert_eq!(a.payment_id, b.payment_id);
    assert_eq!(a.amount, b.amount);
    assert_eq!(ctx.orders.order_count().await, 1);

    // The placement held exactly one batch of stock.
    assert_eq!(
        ctx.inventory
            .active_reserved(&VariantId::new("SKU-001"), Utc::now())
            .await
            .unwrap(),
        2
    );
}

#[tokio::test]
async fn concurrent_placements_never_oversell() {
    let ctx = ctx();
    let on_hand = 5;
    seed_stock(&ctx, "SKU-001", on_hand).await;

    // Twice as many buyers as units, one unit each, distinct keys.
    let mut sessions = Vec::new();
    for _ in 0..10 {
        sessions.push(ready_session(&ctx, "SKU-001", 1, PaymentMethod::Gateway).await);
    }

    let mut tasks = JoinSet::new();
    for (i, session) in sessions.into_iter().enumerate() {
        let guard = ctx.guard.clone();
        let orchestrator = ctx.orchestrator.clone();
        tasks.spawn(async move {
            guard
                .execute(&format!("buyer-{i}"), &session.id.to_string(), || async move {
                    orchestrator.place(session.id, Utc::now()).await
                })
                .await
        });
    }

    let mut placed = 0;
    while let Some(result) = tasks.join_next().await {
        match result.unwrap() {
            Ok(_) => placed += 1,
            Err(e) => assert_eq!(e.code(), "CONFLICT"),
        }
    }

    assert_eq!(placed, on_hand as usize);
    assert_eq!(ctx.orders.order_count().await, placed);
    assert!(
        ctx.inventory
            .active_reserved(&VariantId::new("SKU-001"), Utc::now())
            .await
            .unwrap()
            <= on_hand
    );
}

#[tokio::test]
async fn discount_cap_holds_under_contention() {
    let ctx = ctx();
    seed_stock(&ctx, "SKU-001", 100).await;
    let cap = 3;
    let discount = percent_off("LIMITED", Some(cap));
    ctx.discounts.insert_discount(discount.clone()).await.unwrap();

    let mut sessions = Vec::new();
    for _ in 0..10 {
        let session = ready_session(&ctx, "SKU-001", 1, PaymentMethod::Gateway).await;
        ctx.orchestrator
            .apply_discount(session.id, "LIMITED", Utc::now())
            .await
            .unwrap();
        sessions.push(session);
    }

    let mut tasks = JoinSet::new();
    for session in sessions {
        let orchestrator = ctx.orchestrator.clone();
        tasks.spawn(async move { orchestrator.place(session.id, Utc::now()).await });
    }

    let mut placed = 0;
    while let Some(result) = tasks.join_next().await {
        match result.unwrap() {
            Ok(_) => placed += 1,
            Err(e) => assert_eq!(e.code(), "CONFLICT"),
        }
    }

    assert_eq!(placed, cap as usize);
    assert_eq!(ctx.discounts.redemption_count(discount.id).await.unwrap(), cap);
    // Losers compensated their holds.
    assert_eq!(
        ctx.inventory
            .active_reserved(&VariantId::new("SKU-001"), Utc::now())
            .await
            .unwrap(),
        cap
    );
}

#[tokio::test]
async fn duplicate_gateway_notifications_capture_once() {
    let ctx = ctx();
    seed_stock(&ctx, "SKU-001", 10).await;
    let session = ready_session(&ctx, "SKU-001", 1, PaymentMethod::Gateway).await;
    let confirmation = ctx
        .orchestrator
        .place(session.id, Utc::now())
        .await
        .unwrap();

    let signature = ctx
        .verifier
        .sign(confirmation.order_id, confirmation.amount, GatewayStatus::Success);

    let mut tasks = JoinSet::new();
    for _ in 0..8 {
        let reconciler = ctx.reconciler.clone();
        let signature = signature.clone();
        let order_id = confirmation.order_id;
        let amount = confirmation.amount;
        tasks.spawn(async move {
            reconciler
                .confirm(order_id, amount, GatewayStatus::Success, &signature, Utc::now())
                .await
        });
    }

    let mut applied = 0;
    let mut already_final = 0;
    while let Some(result) = tasks.join_next().await {
        match result.unwrap().unwrap() {
            ConfirmOutcome::Applied { payment_status, .. } => {
                assert_eq!(payment_status, PaymentStatus::Captured);
                applied += 1;
            }
            ConfirmOutcome::AlreadyFinal { payment_status, .. } => {
                assert_eq!(payment_status, PaymentStatus::Captured);
                already_final += 1;
            }
        }
    }

    assert_eq!(applied, 1);
    assert_eq!(already_final, 7);

    let order = ctx
        .orders
        .get_order(confirmation.order_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, OrderStatus::Confirmed);
    for id in &order.reservation_ids {
        let r = ctx.inventory.get(*id).await.unwrap().unwrap();
        assert_eq!(r.status, ReservationStatus::Committed);
    }
}

#[tokio::test]
async fn sweep_and_late_notification_agree_on_failure() {
    let ctx = ctx();
    seed_stock(&ctx, "SKU-001", 10).await;
    let session = ready_session(&ctx, "SKU-001", 1, PaymentMethod::Gateway).await;
    let confirmation = ctx
        .orchestrator
        .place(session.id, Utc::now())
        .await
        .unwrap();

    let sweeper = Sweeper::new(
        ctx.sessions.clone(),
        ctx.inventory.clone(),
        ctx.orders.clone(),
        ctx.idempotency.clone(),
        ctx.reconciler.clone(),
    );

    // Both the sweep and a late success notification race after the
    // payment window closed. Whoever wins, the payment fails.
    let late = Utc::now() + Duration::minutes(16);
    let signature = ctx
        .verifier
        .sign(confirmation.order_id, confirmation.amount, GatewayStatus::Success);

    let sweep = tokio::spawn(async move { sweeper.sweep_once(late).await });
    let reconciler = ctx.reconciler.clone();
    let order_id = confirmation.order_id;
    let amount = confirmation.amount;
    let notify = tokio::spawn(async move {
        reconciler
            .confirm(order_id, amount, GatewayStatus::Success, &signature, late)
            .await
    });

    sweep.await.unwrap().unwrap();
    match notify.await.unwrap() {
        // The notification lost to the sweep and saw the final state.
        Ok(ConfirmOutcome::AlreadyFinal { payment_status, .. }) => {
            assert_eq!(payment_status, PaymentStatus::Failed);
        }
        // The notification arrived after the window and expired the
        // payment itself.
        Err(e) => assert_eq!(e.code(), "EXPIRED"),
        Ok(other) => panic!("late success must never capture, got {other:?}"),
    }

    let payment = ctx
        .orders
        .get_payment_for_order(confirmation.order_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Failed);
    let order = ctx
        .orders
        .get_order(confirmation.order_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);

    // The unit went back on sale.
    assert_eq!(
        ctx.inventory
            .active_reserved(&VariantId::new("SKU-001"), late)
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn placed_session_rejects_a_second_placement() {
    let ctx = ctx();
    seed_stock(&ctx, "SKU-001", 10).await;
    let session = ready_session(&ctx, "SKU-001", 1, PaymentMethod::Gateway).await;
    let scope = session.id.to_string();

    ctx.guard
        .execute("key-a", &scope, || async {
            ctx.orchestrator.place(session.id, Utc::now()).await
        })
        .await
        .unwrap();

    // A different key does not replay; it reruns against the session,
    // which is already Placed.
    let err = ctx
        .guard
        .execute("key-b", &scope, || async {
            ctx.orchestrator.place(session.id, Utc::now()).await
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), "CONFLICT");
    assert_eq!(ctx.orders.order_count().await, 1);

    let stored = ctx.orchestrator.get_session(session.id).await.unwrap();
    assert_eq!(stored.state, SessionState::Placed);
}

#[tokio::test]
async fn cash_on_delivery_is_immune_to_the_payment_sweep() {
    let ctx = ctx();
    seed_stock(&ctx, "SKU-001", 10).await;
    let session = ready_session(&ctx, "SKU-001", 1, PaymentMethod::CashOnDelivery).await;
    let confirmation = ctx
        .orchestrator
        .place(session.id, Utc::now())
        .await
        .unwrap();
    assert_eq!(confirmation.order_status, OrderStatus::Confirmed);

    let sweeper = Sweeper::new(
        ctx.sessions.clone(),
        ctx.inventory.clone(),
        ctx.orders.clone(),
        ctx.idempotency.clone(),
        ctx.reconciler.clone(),
    );
    let report = sweeper
        .sweep_once(Utc::now() + Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(report.expired_payments, 0);

    let order = ctx
        .orders
        .get_order(confirmation.order_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, OrderStatus::Confirmed);
}
