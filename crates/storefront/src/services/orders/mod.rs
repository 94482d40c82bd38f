//! Order submission pipeline and order queries.
//!
//! Submission writes the order row, then one item snapshot per cart line,
//! then the initial status history row. The hosted database offers no
//! cross-table transaction to the client, so a failure after the order row
//! exists is reported with the order id for manual reconciliation; nothing
//! is rolled back here.

pub mod number;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::instrument;

use zalo_shop_core::{Money, OrderId, OrderStatus, PaymentStatus, UserId};

use crate::db::RepositoryError;
use crate::models::{
    Actor, NewOrder, NewOrderItem, NewStatusHistoryEntry, Order, OrderItem, OrderWithItems,
    ShippingForm, StatusHistoryEntry,
};
use crate::services::cart::CartLine;

pub use number::OrderNumberGenerator;

/// Minimum length of a cancellation reason, in characters.
pub const MIN_CANCELLATION_REASON_CHARS: usize = 10;

/// Note of the first history row of every order.
pub const ORDER_CREATED_NOTE: &str = "Order created";

/// Access to the `orders`, `order_items` and `order_status_history` tables.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Insert an order row.
    async fn insert_order(&self, order: &NewOrder) -> Result<Order, RepositoryError>;

    /// Insert the item snapshots of an order.
    async fn insert_items(
        &self,
        order_id: OrderId,
        items: &[NewOrderItem],
    ) -> Result<Vec<OrderItem>, RepositoryError>;

    /// Append a status history row.
    async fn append_history(
        &self,
        entry: &NewStatusHistoryEntry,
    ) -> Result<StatusHistoryEntry, RepositoryError>;

    /// Append `entry` only while the order is still in `expected`.
    ///
    /// Returns [`RepositoryError::Conflict`] when the stored status is no
    /// longer `expected`; nothing is appended then.
    async fn append_history_while(
        &self,
        expected: OrderStatus,
        entry: &NewStatusHistoryEntry,
    ) -> Result<StatusHistoryEntry, RepositoryError>;

    /// Set the status of an order still in `expected` and append `entry`,
    /// both or neither.
    ///
    /// Returns [`RepositoryError::Conflict`] when the stored status is no
    /// longer `expected`.
    async fn update_status(
        &self,
        expected: OrderStatus,
        entry: &NewStatusHistoryEntry,
    ) -> Result<Order, RepositoryError>;

    /// Orders of a user, newest first.
    async fn orders_for_user(&self, user_id: &UserId) -> Result<Vec<Order>, RepositoryError>;

    /// A single order.
    async fn order(&self, order_id: OrderId) -> Result<Option<Order>, RepositoryError>;

    /// Item snapshots of an order.
    async fn items(&self, order_id: OrderId) -> Result<Vec<OrderItem>, RepositoryError>;

    /// Status history of an order, oldest first.
    async fn history(&self, order_id: OrderId) -> Result<Vec<StatusHistoryEntry>, RepositoryError>;
}

/// Order pipeline errors.
#[derive(Debug, Error)]
pub enum OrderError {
    /// No lines to submit.
    #[error("cart is empty")]
    EmptyCart,

    /// No authenticated user.
    #[error("not authenticated")]
    NotAuthenticated,

    /// Required shipping fields are blank.
    #[error("incomplete shipping info: missing {}", .missing.join(", "))]
    IncompleteShippingInfo { missing: Vec<&'static str> },

    /// The order row could not be written; nothing was created.
    #[error("failed to create order: {0}")]
    OrderPersistFailed(#[source] RepositoryError),

    /// The order row exists but its items could not be written.
    #[error("order {order_id} created but its items failed to persist: {cause}")]
    OrderItemsPersistFailed {
        order_id: OrderId,
        #[source]
        cause: RepositoryError,
    },

    /// The order and items exist but the initial history row failed.
    #[error("order {order_id} created but its status history failed to persist: {cause}")]
    StatusHistoryPersistFailed {
        order_id: OrderId,
        #[source]
        cause: RepositoryError,
    },

    /// No such order for this user.
    #[error("order {0} not found")]
    NotFound(OrderId),

    /// The transition table forbids this status change.
    #[error("illegal status transition {from} -> {to}")]
    IllegalTransition { from: OrderStatus, to: OrderStatus },

    /// Cancellation requested for an order that is not `pending`.
    #[error("order in status {status} cannot be cancelled")]
    CancellationNotAllowed { status: OrderStatus },

    /// Cancellation reason too short or blank.
    #[error("cancellation reason must be at least {MIN_CANCELLATION_REASON_CHARS} characters")]
    InvalidCancellationReason,

    /// Any other storage failure.
    #[error("order storage error: {0}")]
    Repository(#[from] RepositoryError),
}

/// Totals of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderTotals {
    pub total_amount: Money,
    pub shipping_fee: Money,
    pub discount_amount: Money,
    pub final_amount: Money,
}

impl OrderTotals {
    /// Totals for `lines` with a flat `shipping_fee`. Discounts are not
    /// offered yet and are always zero.
    #[must_use]
    pub fn compute(lines: &[CartLine], shipping_fee: Money) -> Self {
        let total_amount: Money = lines.iter().map(CartLine::subtotal).sum();
        let discount_amount = Money::ZERO;
        Self {
            total_amount,
            shipping_fee,
            discount_amount,
            final_amount: total_amount + shipping_fee - discount_amount,
        }
    }
}

/// Order submission, queries and status changes.
#[derive(Clone)]
pub struct OrderPipeline {
    store: Arc<dyn OrderStore>,
    shipping_fee: Money,
    numbers: Arc<OrderNumberGenerator>,
}

impl OrderPipeline {
    #[must_use]
    pub fn new(store: Arc<dyn OrderStore>, shipping_fee: Money) -> Self {
        Self {
            store,
            shipping_fee,
            numbers: Arc::new(OrderNumberGenerator::new()),
        }
    }

    /// Submit `lines` as a new order for `user_id`.
    ///
    /// Preconditions are checked before anything is written. The caller
    /// clears the submitted cart lines on success.
    ///
    /// # Errors
    ///
    /// - `OrderError::EmptyCart`, `NotAuthenticated`, `IncompleteShippingInfo`
    ///   when a precondition fails (nothing written)
    /// - `OrderError::OrderPersistFailed` if the order row fails (nothing written)
    /// - `OrderError::OrderItemsPersistFailed` / `StatusHistoryPersistFailed`
    ///   with the id of the order row already created
    #[instrument(skip(self, lines, form), fields(lines = lines.len()))]
    pub async fn submit(
        &self,
        user_id: Option<&UserId>,
        lines: &[CartLine],
        form: &ShippingForm,
    ) -> Result<Order, OrderError> {
        if lines.is_empty() {
            return Err(OrderError::EmptyCart);
        }
        let user_id = user_id.ok_or(OrderError::NotAuthenticated)?;

        let missing = form.missing_fields();
        if !missing.is_empty() {
            return Err(OrderError::IncompleteShippingInfo { missing });
        }

        let totals = OrderTotals::compute(lines, self.shipping_fee);
        let new_order = NewOrder {
            user_id: user_id.clone(),
            order_number: self.numbers.issue(),
            status: OrderStatus::Pending,
            total_amount: totals.total_amount,
            shipping_fee: totals.shipping_fee,
            discount_amount: totals.discount_amount,
            final_amount: totals.final_amount,
            shipping: form.normalized(),
            payment_status: PaymentStatus::Pending,
        };

        let order = self
            .store
            .insert_order(&new_order)
            .await
            .map_err(OrderError::OrderPersistFailed)?;
        tracing::info!(order_id = %order.id, order_number = %order.order_number, "Order created");

        let items: Vec<NewOrderItem> = lines.iter().map(snapshot).collect();
        if let Err(cause) = self.store.insert_items(order.id, &items).await {
            tracing::error!(order_id = %order.id, error = %cause, "Order items failed to persist");
            return Err(OrderError::OrderItemsPersistFailed {
                order_id: order.id,
                cause,
            });
        }

        let entry = NewStatusHistoryEntry {
            order_id: order.id,
            status: OrderStatus::Pending,
            note: Some(ORDER_CREATED_NOTE.to_owned()),
            created_by: Actor::User(user_id.clone()),
        };
        if let Err(cause) = self.store.append_history(&entry).await {
            tracing::error!(order_id = %order.id, error = %cause, "Initial status history failed to persist");
            return Err(OrderError::StatusHistoryPersistFailed {
                order_id: order.id,
                cause,
            });
        }

        Ok(order)
    }

    /// Orders of a user, newest first.
    ///
    /// # Errors
    ///
    /// Returns `OrderError::Repository` if the query fails.
    pub async fn orders_for_user(&self, user_id: &UserId) -> Result<Vec<Order>, OrderError> {
        let mut orders = self.store.orders_for_user(user_id).await?;
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    /// Orders still in progress (not delivered, cancelled or refunded).
    ///
    /// # Errors
    ///
    /// Returns `OrderError::Repository` if the query fails.
    pub async fn active_orders(&self, user_id: &UserId) -> Result<Vec<Order>, OrderError> {
        let mut orders = self.orders_for_user(user_id).await?;
        orders.retain(|order| !order.status.is_terminal());
        Ok(orders)
    }

    /// An order of `user_id` with its item snapshots.
    ///
    /// # Errors
    ///
    /// Returns `OrderError::NotFound` if the order does not exist or belongs
    /// to someone else.
    pub async fn order_details(
        &self,
        user_id: &UserId,
        order_id: OrderId,
    ) -> Result<OrderWithItems, OrderError> {
        let order = self.owned_order(user_id, order_id).await?;
        let items = self.store.items(order_id).await?;
        Ok(OrderWithItems { order, items })
    }

    /// Status history of an order of `user_id`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `OrderError::NotFound` if the order does not exist or belongs
    /// to someone else.
    pub async fn status_history(
        &self,
        user_id: &UserId,
        order_id: OrderId,
    ) -> Result<Vec<StatusHistoryEntry>, OrderError> {
        self.owned_order(user_id, order_id).await?;
        Ok(self.store.history(order_id).await?)
    }

    /// Administrative status change.
    ///
    /// Appends exactly one history row on success and none on rejection.
    ///
    /// # Errors
    ///
    /// Returns `OrderError::IllegalTransition` if the transition table
    /// forbids it, `OrderError::NotFound` for an unknown order.
    #[instrument(skip(self, note), fields(order_id = %order_id, to = %to, actor = %actor))]
    pub async fn transition(
        &self,
        order_id: OrderId,
        to: OrderStatus,
        note: Option<String>,
        actor: Actor,
    ) -> Result<Order, OrderError> {
        let order = self
            .store
            .order(order_id)
            .await?
            .ok_or(OrderError::NotFound(order_id))?;

        let from = order.status;
        if !from.can_transition_to(to) {
            tracing::warn!(%from, "Rejected illegal status transition");
            return Err(OrderError::IllegalTransition { from, to });
        }

        let entry = NewStatusHistoryEntry {
            order_id,
            status: to,
            note: crate::models::profile::non_blank(note.as_deref()),
            created_by: actor,
        };
        let updated = self.store.update_status(from, &entry).await?;
        tracing::info!(%from, "Order status changed");
        Ok(updated)
    }

    /// Record a customer's cancellation request for back-office review.
    ///
    /// The status is not changed: one history row with status `pending` and
    /// the reason in its note is appended.
    ///
    /// # Errors
    ///
    /// - `OrderError::InvalidCancellationReason` for a reason shorter than
    ///   [`MIN_CANCELLATION_REASON_CHARS`] after trimming
    /// - `OrderError::NotFound` if the order does not belong to `user_id`
    /// - `OrderError::CancellationNotAllowed` unless the order is `pending`
    #[instrument(skip(self, reason), fields(order_id = %order_id, user_id = %user_id))]
    pub async fn request_cancellation(
        &self,
        order_id: OrderId,
        user_id: &UserId,
        reason: &str,
    ) -> Result<StatusHistoryEntry, OrderError> {
        let reason = reason.trim();
        if reason.chars().count() < MIN_CANCELLATION_REASON_CHARS {
            return Err(OrderError::InvalidCancellationReason);
        }

        let order = self.owned_order(user_id, order_id).await?;
        if !order.status.is_user_cancellable() {
            return Err(OrderError::CancellationNotAllowed {
                status: order.status,
            });
        }

        let entry = NewStatusHistoryEntry {
            order_id,
            status: OrderStatus::Pending,
            note: Some(format!("cancellation requested: {reason}")),
            created_by: Actor::User(user_id.clone()),
        };
        let recorded = match self
            .store
            .append_history_while(OrderStatus::Pending, &entry)
            .await
        {
            Ok(recorded) => recorded,
            Err(RepositoryError::Conflict(_)) => {
                // Moved on since it was read; report the status it has now
                let status = self
                    .store
                    .order(order_id)
                    .await?
                    .map_or(order.status, |current| current.status);
                tracing::warn!(%status, "Order left pending before the cancellation request");
                return Err(OrderError::CancellationNotAllowed { status });
            }
            Err(e) => return Err(e.into()),
        };
        tracing::info!("Cancellation requested");
        Ok(recorded)
    }

    async fn owned_order(&self, user_id: &UserId, order_id: OrderId) -> Result<Order, OrderError> {
        match self.store.order(order_id).await? {
            Some(order) if order.user_id == *user_id => Ok(order),
            _ => Err(OrderError::NotFound(order_id)),
        }
    }
}

/// Denormalized copy of a cart line.
fn snapshot(line: &CartLine) -> NewOrderItem {
    NewOrderItem {
        product_id: line.product.id,
        product_name: line.product.name.clone(),
        product_image: line.product.image.clone(),
        product_price: line.product.price,
        selected_size: line.options.size.clone(),
        selected_color: line.options.color.clone(),
        quantity: line.quantity,
        subtotal: line.subtotal(),
    }
}
