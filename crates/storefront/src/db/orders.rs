//! `orders`, `order_items` and `order_status_history` repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};

use zalo_shop_core::{
    Money, OrderId, OrderItemId, OrderStatus, PaymentMethod, PaymentStatus, ProductId,
    StatusHistoryId, UserId,
};

use super::{RepositoryError, quantity_from_db, quantity_to_db};
use crate::models::{
    NewOrder, NewOrderItem, NewStatusHistoryEntry, Order, OrderItem, StatusHistoryEntry,
};
use crate::services::orders::OrderStore;

const ORDER_COLUMNS: &str = "id, user_id, order_number, status, total_amount, shipping_fee, \
     discount_amount, final_amount, shipping_name, shipping_phone, shipping_address, \
     shipping_note, payment_method, payment_status, zalo_transaction_id, created_at, \
     updated_at, completed_at";

const ITEM_COLUMNS: &str = "id, order_id, product_id, product_name, product_image, \
     product_price, selected_size, selected_color, quantity, subtotal";

const HISTORY_COLUMNS: &str = "id, order_id, status, note, created_by, created_at";

/// Repository for order rows.
#[derive(Clone)]
pub struct OrderRepository {
    pool: PgPool,
}

impl OrderRepository {
    /// Create a new order repository.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// =============================================================================
// Rows
// =============================================================================

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: OrderId,
    user_id: String,
    order_number: String,
    status: String,
    total_amount: Money,
    shipping_fee: Money,
    discount_amount: Money,
    final_amount: Money,
    shipping_name: String,
    shipping_phone: String,
    shipping_address: String,
    shipping_note: Option<String>,
    payment_method: String,
    payment_status: String,
    zalo_transaction_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

#[derive(sqlx::FromRow)]
struct OrderItemRow {
    id: OrderItemId,
    order_id: OrderId,
    product_id: ProductId,
    product_name: String,
    product_image: String,
    product_price: Money,
    selected_size: Option<String>,
    selected_color: Option<String>,
    quantity: i32,
    subtotal: Money,
}

#[derive(sqlx::FromRow)]
struct HistoryRow {
    id: StatusHistoryId,
    order_id: OrderId,
    status: String,
    note: Option<String>,
    created_by: String,
    created_at: DateTime<Utc>,
}

/// Parse a text column into a domain enum.
fn parse_column<T>(column: &str, value: &str) -> Result<T, RepositoryError>
where
    T: std::str::FromStr<Err = String>,
{
    value
        .parse()
        .map_err(|e| RepositoryError::DataCorruption(format!("invalid {column} in database: {e}")))
}

impl TryFrom<OrderRow> for Order {
    type Error = RepositoryError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let user_id = UserId::parse(&row.user_id).map_err(|e| {
            RepositoryError::DataCorruption(format!("invalid user id in database: {e}"))
        })?;

        Ok(Self {
            id: row.id,
            user_id,
            order_number: row.order_number,
            status: parse_column("status", &row.status)?,
            total_amount: row.total_amount,
            shipping_fee: row.shipping_fee,
            discount_amount: row.discount_amount,
            final_amount: row.final_amount,
            shipping_name: row.shipping_name,
            shipping_phone: row.shipping_phone,
            shipping_address: row.shipping_address,
            shipping_note: row.shipping_note,
            payment_method: parse_column::<PaymentMethod>("payment method", &row.payment_method)?,
            payment_status: parse_column::<PaymentStatus>("payment status", &row.payment_status)?,
            zalo_transaction_id: row.zalo_transaction_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
        })
    }
}

impl TryFrom<OrderItemRow> for OrderItem {
    type Error = RepositoryError;

    fn try_from(row: OrderItemRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            order_id: row.order_id,
            product_id: row.product_id,
            product_name: row.product_name,
            product_image: row.product_image,
            product_price: row.product_price,
            selected_size: row.selected_size,
            selected_color: row.selected_color,
            quantity: quantity_from_db(row.quantity)?,
            subtotal: row.subtotal,
        })
    }
}

impl TryFrom<HistoryRow> for StatusHistoryEntry {
    type Error = RepositoryError;

    fn try_from(row: HistoryRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            order_id: row.order_id,
            status: parse_column("status", &row.status)?,
            note: row.note,
            created_by: row.created_by,
            created_at: row.created_at,
        })
    }
}

fn collect<R, T>(rows: Vec<R>) -> Result<Vec<T>, RepositoryError>
where
    T: TryFrom<R, Error = RepositoryError>,
{
    rows.into_iter().map(T::try_from).collect()
}

// =============================================================================
// Queries
// =============================================================================

#[async_trait]
impl OrderStore for OrderRepository {
    async fn insert_order(&self, order: &NewOrder) -> Result<Order, RepositoryError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            r"
            INSERT INTO orders (
                id, user_id, order_number, status, total_amount, shipping_fee,
                discount_amount, final_amount, shipping_name, shipping_phone,
                shipping_address, shipping_note, payment_method, payment_status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING {ORDER_COLUMNS}
            "
        ))
        .bind(OrderId::generate())
        .bind(&order.user_id)
        .bind(&order.order_number)
        .bind(order.status.as_str())
        .bind(order.total_amount)
        .bind(order.shipping_fee)
        .bind(order.discount_amount)
        .bind(order.final_amount)
        .bind(&order.shipping.name)
        .bind(&order.shipping.phone)
        .bind(&order.shipping.address)
        .bind(order.shipping.note.as_deref())
        .bind(order.shipping.payment_method.to_string())
        .bind(order.payment_status.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            RepositoryError::from_sqlx(
                e,
                &format!("order number '{}' already exists", order.order_number),
            )
        })?;

        row.try_into()
    }

    async fn insert_items(
        &self,
        order_id: OrderId,
        items: &[NewOrderItem],
    ) -> Result<Vec<OrderItem>, RepositoryError> {
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let quantities = items
            .iter()
            .map(|item| quantity_to_db(item.quantity))
            .collect::<Result<Vec<_>, _>>()?;

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO order_items (id, order_id, product_id, product_name, product_image, \
             product_price, selected_size, selected_color, quantity, subtotal) ",
        );
        // Time-ordered ids keep the cart order when reading back by id
        builder.push_values(items.iter().zip(quantities), |mut b, (item, quantity)| {
            b.push_bind(OrderItemId::generate())
                .push_bind(order_id)
                .push_bind(item.product_id)
                .push_bind(item.product_name.clone())
                .push_bind(item.product_image.clone())
                .push_bind(item.product_price)
                .push_bind(item.selected_size.clone())
                .push_bind(item.selected_color.clone())
                .push_bind(quantity)
                .push_bind(item.subtotal);
        });
        builder.push(format!(" RETURNING {ITEM_COLUMNS}"));

        let rows = builder
            .build_query_as::<OrderItemRow>()
            .fetch_all(&self.pool)
            .await?;

        collect(rows)
    }

    async fn append_history(
        &self,
        entry: &NewStatusHistoryEntry,
    ) -> Result<StatusHistoryEntry, RepositoryError> {
        let row = sqlx::query_as::<_, HistoryRow>(&format!(
            r"
            INSERT INTO order_status_history (order_id, status, note, created_by)
            VALUES ($1, $2, $3, $4)
            RETURNING {HISTORY_COLUMNS}
            "
        ))
        .bind(entry.order_id)
        .bind(entry.status.as_str())
        .bind(entry.note.as_deref())
        .bind(entry.created_by.to_string())
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn append_history_while(
        &self,
        expected: OrderStatus,
        entry: &NewStatusHistoryEntry,
    ) -> Result<StatusHistoryEntry, RepositoryError> {
        let row = sqlx::query_as::<_, HistoryRow>(&format!(
            r"
            INSERT INTO order_status_history (order_id, status, note, created_by)
            SELECT $1, $3, $4, $5
            WHERE EXISTS (SELECT 1 FROM orders WHERE id = $1 AND status = $2)
            RETURNING {HISTORY_COLUMNS}
            "
        ))
        .bind(entry.order_id)
        .bind(expected.as_str())
        .bind(entry.status.as_str())
        .bind(entry.note.as_deref())
        .bind(entry.created_by.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| {
            RepositoryError::Conflict(format!(
                "order {} is no longer {expected}",
                entry.order_id
            ))
        })?;

        row.try_into()
    }

    async fn update_status(
        &self,
        expected: OrderStatus,
        entry: &NewStatusHistoryEntry,
    ) -> Result<Order, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, OrderRow>(&format!(
            r"
            UPDATE orders SET
                status = $3,
                updated_at = now(),
                completed_at = CASE WHEN $3 = 'delivered' THEN now() ELSE completed_at END
            WHERE id = $1 AND status = $2
            RETURNING {ORDER_COLUMNS}
            "
        ))
        .bind(entry.order_id)
        .bind(expected.as_str())
        .bind(entry.status.as_str())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| {
            RepositoryError::Conflict(format!(
                "order {} is no longer {expected}",
                entry.order_id
            ))
        })?;

        sqlx::query(
            r"
            INSERT INTO order_status_history (order_id, status, note, created_by)
            VALUES ($1, $2, $3, $4)
            ",
        )
        .bind(entry.order_id)
        .bind(entry.status.as_str())
        .bind(entry.note.as_deref())
        .bind(entry.created_by.to_string())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        row.try_into()
    }

    async fn orders_for_user(&self, user_id: &UserId) -> Result<Vec<Order>, RepositoryError> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        collect(rows)
    }

    async fn order(&self, order_id: OrderId) -> Result<Option<Order>, RepositoryError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Order::try_from).transpose()
    }

    async fn items(&self, order_id: OrderId) -> Result<Vec<OrderItem>, RepositoryError> {
        let rows = sqlx::query_as::<_, OrderItemRow>(&format!(
            "SELECT {ITEM_COLUMNS} FROM order_items WHERE order_id = $1 ORDER BY id"
        ))
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        collect(rows)
    }

    async fn history(&self, order_id: OrderId) -> Result<Vec<StatusHistoryEntry>, RepositoryError> {
        let rows = sqlx::query_as::<_, HistoryRow>(&format!(
            "SELECT {HISTORY_COLUMNS} FROM order_status_history \
             WHERE order_id = $1 ORDER BY created_at, id"
        ))
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        collect(rows)
    }
}
