//! Integration tests for cart checkout, order queries and status changes.

#![allow(clippy::unwrap_used)]

use zalo_shop_core::{Money, OrderStatus, PaymentMethod, PaymentStatus};
use zalo_shop_integration_tests::{FakeHost, Harness, product, user};
use zalo_shop_storefront::error::AppError;
use zalo_shop_storefront::models::{Actor, SelectedOptions, ShippingForm};
use zalo_shop_storefront::services::orders::{ORDER_CREATED_NOTE, OrderError};

fn form() -> ShippingForm {
    ShippingForm {
        name: " Nguyễn Văn A ".to_string(),
        phone: "0901234567".to_string(),
        address: "12 Lê Lợi, Quận 1, TP.HCM".to_string(),
        note: Some("Giao giờ hành chính".to_string()),
        payment_method: PaymentMethod::Cod,
    }
}

fn size(value: &str) -> SelectedOptions {
    SelectedOptions {
        size: Some(value.to_string()),
        color: None,
    }
}

async fn logged_in() -> Harness {
    let h = Harness::builder(FakeHost::user("1001", "Lan")).build();
    h.state.profiles().login().await.unwrap();
    h
}

// =============================================================================
// Submission
// =============================================================================

#[tokio::test]
async fn test_checkout_creates_order_items_and_history() {
    let h = logged_in().await;
    h.state.with_cart(|cart| {
        cart.add_or_update(&product(1, 150_000), size("M"), 2, None).unwrap();
        cart.add_or_update(&product(2, 90_000), SelectedOptions::default(), 1, None)
            .unwrap();
    });

    let order = h.state.checkout(&form()).await.unwrap();

    assert!(order.order_number.starts_with("ORD"));
    assert_eq!(order.user_id, user("1001"));
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.payment_status, PaymentStatus::Pending);
    assert_eq!(order.payment_method, PaymentMethod::Cod);
    assert_eq!(order.shipping_name, "Nguyễn Văn A");
    assert_eq!(order.total_amount, Money::vnd(390_000));
    assert_eq!(order.shipping_fee, Money::vnd(30_000));
    assert_eq!(order.discount_amount, Money::ZERO);
    assert_eq!(order.final_amount, Money::vnd(420_000));

    let details = h
        .state
        .orders()
        .order_details(&user("1001"), order.id)
        .await
        .unwrap();
    assert_eq!(details.items.len(), 2);
    let first = details.items.first().unwrap();
    assert_eq!(first.product_name, "Áo thun 1");
    assert_eq!(first.selected_size.as_deref(), Some("M"));
    // Colour was left out and normalised to the product default
    assert_eq!(first.selected_color.as_deref(), Some("Trắng"));
    assert_eq!(first.subtotal, Money::vnd(300_000));

    let history = h.orders.history_of(order.id);
    assert_eq!(history.len(), 1);
    assert_eq!(history.first().unwrap().note.as_deref(), Some(ORDER_CREATED_NOTE));
    assert_eq!(history.first().unwrap().created_by, "user:1001");

    assert!(h.state.cart().is_empty());
}

#[tokio::test]
async fn test_checkout_only_submits_selected_lines() {
    let h = logged_in().await;
    let (kept, submitted) = h.state.with_cart(|cart| {
        let kept = cart
            .add_or_update(&product(1, 150_000), size("M"), 1, None)
            .unwrap()
            .unwrap();
        let submitted = cart
            .add_or_update(&product(2, 90_000), size("L"), 3, None)
            .unwrap()
            .unwrap();
        cart.select(submitted).unwrap();
        (kept, submitted)
    });

    let order = h.state.checkout(&form()).await.unwrap();

    assert_eq!(order.total_amount, Money::vnd(270_000));
    let cart = h.state.cart();
    assert!(cart.line(kept).is_some());
    assert!(cart.line(submitted).is_none());
}

#[tokio::test]
async fn test_anonymous_checkout_is_rejected() {
    let h = Harness::builder(FakeHost::user("1001", "Lan")).build();
    h.state.with_cart(|cart| {
        cart.add_or_update(&product(1, 150_000), size("M"), 1, None).unwrap();
    });

    let err = h.state.checkout(&form()).await.unwrap_err();

    assert!(matches!(err, AppError::Order(OrderError::NotAuthenticated)));
    assert_eq!(h.orders.order_count(), 0);
    assert_eq!(h.state.cart().len(), 1);
}

#[tokio::test]
async fn test_empty_cart_is_rejected() {
    let h = logged_in().await;
    let err = h.state.checkout(&form()).await.unwrap_err();
    assert!(matches!(err, AppError::Order(OrderError::EmptyCart)));
}

#[tokio::test]
async fn test_incomplete_shipping_writes_nothing() {
    let h = logged_in().await;
    h.state.with_cart(|cart| {
        cart.add_or_update(&product(1, 150_000), size("M"), 1, None).unwrap();
    });

    let mut incomplete = form();
    incomplete.phone = "   ".to_string();
    let err = h.state.checkout(&incomplete).await.unwrap_err();

    match err {
        AppError::Order(OrderError::IncompleteShippingInfo { missing }) => {
            assert_eq!(missing, vec!["phone"]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(h.orders.order_count(), 0);
    assert_eq!(h.state.cart().len(), 1);
}

#[tokio::test]
async fn test_failed_order_row_keeps_cart() {
    let h = logged_in().await;
    h.state.with_cart(|cart| {
        cart.add_or_update(&product(1, 150_000), size("M"), 1, None).unwrap();
    });
    *h.orders.fail_order.lock().unwrap() = true;

    let err = h.state.checkout(&form()).await.unwrap_err();

    assert!(matches!(err, AppError::Order(OrderError::OrderPersistFailed(_))));
    assert!(err.is_server_error());
    assert_eq!(h.state.cart().len(), 1);
}

#[tokio::test]
async fn test_failed_items_report_the_created_order() {
    let h = logged_in().await;
    h.state.with_cart(|cart| {
        cart.add_or_update(&product(1, 150_000), size("M"), 1, None).unwrap();
    });
    *h.orders.fail_items.lock().unwrap() = true;

    let err = h.state.checkout(&form()).await.unwrap_err();

    let AppError::Order(OrderError::OrderItemsPersistFailed { order_id, .. }) = err else {
        panic!("unexpected error: {err}");
    };
    // The order row stays for manual reconciliation; no history was written
    assert_eq!(h.orders.order_count(), 1);
    assert!(h.orders.history_of(order_id).is_empty());
    assert_eq!(h.state.cart().len(), 1);
}

#[tokio::test]
async fn test_failed_history_is_reported() {
    let h = logged_in().await;
    h.state.with_cart(|cart| {
        cart.add_or_update(&product(1, 150_000), size("M"), 1, None).unwrap();
    });
    *h.orders.fail_history.lock().unwrap() = true;

    let err = h.state.checkout(&form()).await.unwrap_err();

    assert!(matches!(
        err,
        AppError::Order(OrderError::StatusHistoryPersistFailed { .. })
    ));
    assert!(err.user_message().contains("liên hệ"));
}

#[tokio::test]
async fn test_order_numbers_are_unique() {
    let h = logged_in().await;
    let mut numbers = Vec::new();
    for _ in 0..5 {
        h.state.with_cart(|cart| {
            cart.add_or_update(&product(1, 150_000), size("M"), 1, None).unwrap();
        });
        numbers.push(h.state.checkout(&form()).await.unwrap().order_number);
    }

    let mut deduped = numbers.clone();
    deduped.sort();
    deduped.dedup();
    assert_eq!(deduped.len(), numbers.len());
}

#[tokio::test]
async fn test_line_added_during_submission_survives() {
    let h = logged_in().await;
    h.state.with_cart(|cart| {
        cart.add_or_update(&product(1, 150_000), size("M"), 1, None).unwrap();
    });
    let gate = h.orders.pause_submissions();

    let state = h.state.clone();
    let submission = tokio::spawn(async move { state.checkout(&form()).await });
    gate.reached().await;

    let late = h.state.with_cart(|cart| {
        cart.add_or_update(&product(2, 90_000), size("S"), 1, None)
            .unwrap()
            .unwrap()
    });
    gate.open();

    let order = submission.await.unwrap().unwrap();
    assert_eq!(order.total_amount, Money::vnd(150_000));
    let cart = h.state.cart();
    assert_eq!(cart.len(), 1);
    assert!(cart.line(late).is_some());
}

#[tokio::test]
async fn test_units_merged_during_submission_stay_in_cart() {
    let h = logged_in().await;
    let line = h.state.with_cart(|cart| {
        cart.add_or_update(&product(1, 150_000), size("M"), 1, None)
            .unwrap()
            .unwrap()
    });
    let gate = h.orders.pause_submissions();

    let state = h.state.clone();
    let submission = tokio::spawn(async move { state.checkout(&form()).await });
    gate.reached().await;

    h.state.with_cart(|cart| {
        cart.add_or_update(&product(1, 150_000), size("M"), 2, None)
            .unwrap();
    });
    gate.open();

    let order = submission.await.unwrap().unwrap();
    assert_eq!(order.total_amount, Money::vnd(150_000));
    let cart = h.state.cart();
    assert_eq!(cart.len(), 1);
    assert_eq!(cart.line(line).unwrap().quantity, 2);
    assert_eq!(cart.total_quantity(), 2);
}

// =============================================================================
// Queries
// =============================================================================

#[tokio::test]
async fn test_order_queries() {
    let h = logged_in().await;
    let mut ids = Vec::new();
    for _ in 0..2 {
        h.state.with_cart(|cart| {
            cart.add_or_update(&product(1, 150_000), size("M"), 1, None).unwrap();
        });
        ids.push(h.state.checkout(&form()).await.unwrap().id);
    }
    let (older, newer) = (*ids.first().unwrap(), *ids.last().unwrap());

    let orders = h.state.orders().orders_for_user(&user("1001")).await.unwrap();
    assert_eq!(orders.len(), 2);
    assert!(orders.windows(2).all(|pair| pair.first().unwrap().created_at >= pair.last().unwrap().created_at));

    h.state
        .orders()
        .transition(older, OrderStatus::Cancelled, None, Actor::Admin("mai".into()))
        .await
        .unwrap();
    let active = h.state.orders().active_orders(&user("1001")).await.unwrap();
    assert_eq!(active.iter().map(|o| o.id).collect::<Vec<_>>(), vec![newer]);

    // Someone else's order is invisible
    let err = h
        .state
        .orders()
        .order_details(&user("2002"), newer)
        .await
        .unwrap_err();
    assert!(matches!(err, OrderError::NotFound(id) if id == newer));
}

// =============================================================================
// Status changes
// =============================================================================

async fn placed_order(h: &Harness) -> zalo_shop_storefront::models::Order {
    h.state.with_cart(|cart| {
        cart.add_or_update(&product(1, 150_000), size("M"), 1, None).unwrap();
    });
    h.state.checkout(&form()).await.unwrap()
}

#[tokio::test]
async fn test_forward_transitions_append_history() {
    let h = logged_in().await;
    let order = placed_order(&h).await;
    let pipeline = h.state.orders();

    for status in [
        OrderStatus::Confirmed,
        OrderStatus::Processing,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
    ] {
        pipeline
            .transition(order.id, status, Some("ok".into()), Actor::System)
            .await
            .unwrap();
    }

    let history = pipeline.status_history(&user("1001"), order.id).await.unwrap();
    assert_eq!(history.len(), 5);
    assert_eq!(history.last().unwrap().status, OrderStatus::Delivered);
    assert_eq!(history.last().unwrap().created_by, "system");

    let delivered = pipeline.order_details(&user("1001"), order.id).await.unwrap();
    assert!(delivered.order.completed_at.is_some());
}

#[tokio::test]
async fn test_illegal_transition_appends_nothing() {
    let h = logged_in().await;
    let order = placed_order(&h).await;

    let err = h
        .state
        .orders()
        .transition(order.id, OrderStatus::Shipped, None, Actor::System)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        OrderError::IllegalTransition {
            from: OrderStatus::Pending,
            to: OrderStatus::Shipped
        }
    ));
    assert_eq!(h.orders.history_of(order.id).len(), 1);
}

#[tokio::test]
async fn test_cancellation_request_records_reason() {
    let h = logged_in().await;
    let order = placed_order(&h).await;

    h.state
        .request_cancellation(order.id, "  Đặt nhầm kích cỡ áo  ")
        .await
        .unwrap();

    let history = h.orders.history_of(order.id);
    assert_eq!(history.len(), 2);
    let request = history.last().unwrap();
    assert_eq!(request.status, OrderStatus::Pending);
    assert_eq!(
        request.note.as_deref(),
        Some("cancellation requested: Đặt nhầm kích cỡ áo")
    );

    // The status itself is left to the back office
    let details = h
        .state
        .orders()
        .order_details(&user("1001"), order.id)
        .await
        .unwrap();
    assert_eq!(details.order.status, OrderStatus::Pending);
}

#[tokio::test]
async fn test_short_cancellation_reason_is_rejected() {
    let h = logged_in().await;
    let order = placed_order(&h).await;

    let err = h
        .state
        .request_cancellation(order.id, "   đổi ý   ")
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AppError::Order(OrderError::InvalidCancellationReason)
    ));
    assert_eq!(h.orders.history_of(order.id).len(), 1);
}

#[tokio::test]
async fn test_confirmed_order_cannot_be_cancelled_by_customer() {
    let h = logged_in().await;
    let order = placed_order(&h).await;
    h.state
        .orders()
        .transition(order.id, OrderStatus::Confirmed, None, Actor::System)
        .await
        .unwrap();

    let err = h
        .state
        .request_cancellation(order.id, "Không muốn mua nữa")
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AppError::Order(OrderError::CancellationNotAllowed {
            status: OrderStatus::Confirmed
        })
    ));
}

#[tokio::test]
async fn test_rejected_cancellation_of_shipped_order_appends_nothing() {
    let h = logged_in().await;
    let order = placed_order(&h).await;
    for status in [
        OrderStatus::Confirmed,
        OrderStatus::Processing,
        OrderStatus::Shipped,
    ] {
        h.state
            .orders()
            .transition(order.id, status, None, Actor::System)
            .await
            .unwrap();
    }
    let before = h.orders.history_of(order.id).len();

    let err = h
        .state
        .request_cancellation(order.id, "Giao hàng quá chậm")
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AppError::Order(OrderError::CancellationNotAllowed {
            status: OrderStatus::Shipped
        })
    ));
    assert_eq!(before, 4);
    assert_eq!(h.orders.history_of(order.id).len(), before);
}

#[tokio::test]
async fn test_confirmation_during_cancellation_request_wins() {
    let h = logged_in().await;
    let order = placed_order(&h).await;
    let gate = h.orders.pause_guarded_history();

    let state = h.state.clone();
    let request = tokio::spawn(async move {
        state
            .request_cancellation(order.id, "Đặt nhầm kích cỡ áo")
            .await
    });
    gate.reached().await;

    // The back office confirms after the status was read
    h.state
        .orders()
        .transition(order.id, OrderStatus::Confirmed, None, Actor::System)
        .await
        .unwrap();
    gate.open();

    let err = request.await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        AppError::Order(OrderError::CancellationNotAllowed {
            status: OrderStatus::Confirmed
        })
    ));
    let history = h.orders.history_of(order.id);
    assert_eq!(history.len(), 2);
    assert!(
        history
            .iter()
            .all(|entry| !entry.note.as_deref().unwrap_or_default().starts_with("cancellation"))
    );
}
