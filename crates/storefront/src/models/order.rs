//! Order domain types.
//!
//! Orders own denormalized item snapshots and an append-only status history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use zalo_shop_core::{
    Money, OrderId, OrderItemId, OrderStatus, PaymentMethod, PaymentStatus, ProductId,
    StatusHistoryId, UserId,
};

/// A persisted order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    /// Customer-facing number, e.g. `ORD1718000000000`.
    pub order_number: String,
    pub status: OrderStatus,
    /// Sum of item subtotals.
    pub total_amount: Money,
    pub shipping_fee: Money,
    pub discount_amount: Money,
    /// `total_amount + shipping_fee - discount_amount`.
    pub final_amount: Money,
    pub shipping_name: String,
    pub shipping_phone: String,
    pub shipping_address: String,
    pub shipping_note: Option<String>,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub zalo_transaction_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set when the order reaches `delivered`.
    pub completed_at: Option<DateTime<Utc>>,
}

/// An order row about to be inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub user_id: UserId,
    pub order_number: String,
    pub status: OrderStatus,
    pub total_amount: Money,
    pub shipping_fee: Money,
    pub discount_amount: Money,
    pub final_amount: Money,
    pub shipping: ShippingForm,
    pub payment_status: PaymentStatus,
}

/// Snapshot of one purchased line.
///
/// Copies product data at purchase time so later catalog edits never
/// alter historical orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderItem {
    pub id: OrderItemId,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub product_name: String,
    pub product_image: String,
    pub product_price: Money,
    pub selected_size: Option<String>,
    pub selected_color: Option<String>,
    pub quantity: u32,
    pub subtotal: Money,
}

/// An order item about to be inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrderItem {
    pub product_id: ProductId,
    pub product_name: String,
    pub product_image: String,
    pub product_price: Money,
    pub selected_size: Option<String>,
    pub selected_color: Option<String>,
    pub quantity: u32,
    pub subtotal: Money,
}

/// One row of the status audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusHistoryEntry {
    pub id: StatusHistoryId,
    pub order_id: OrderId,
    pub status: OrderStatus,
    pub note: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

/// A status history row about to be appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewStatusHistoryEntry {
    pub order_id: OrderId,
    pub status: OrderStatus,
    pub note: Option<String>,
    pub created_by: Actor,
}

/// Who caused a status history row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actor {
    /// The customer who owns the order.
    User(UserId),
    /// A back-office operator.
    Admin(String),
    /// Automated processes.
    System,
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User(id) => write!(f, "user:{id}"),
            Self::Admin(name) => write!(f, "admin:{name}"),
            Self::System => write!(f, "system"),
        }
    }
}

/// Shipping details entered at checkout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingForm {
    pub name: String,
    pub phone: String,
    pub address: String,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub payment_method: PaymentMethod,
}

impl ShippingForm {
    /// Trim every field; a blank note becomes `None`.
    #[must_use]
    pub fn normalized(&self) -> Self {
        Self {
            name: self.name.trim().to_string(),
            phone: self.phone.trim().to_string(),
            address: self.address.trim().to_string(),
            note: super::profile::non_blank(self.note.as_deref()),
            payment_method: self.payment_method,
        }
    }

    /// Names of required fields that are blank.
    #[must_use]
    pub fn missing_fields(&self) -> Vec<&'static str> {
        [
            ("name", &self.name),
            ("phone", &self.phone),
            ("address", &self.address),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(field, _)| field)
        .collect()
    }
}

/// An order together with its item snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderWithItems {
    pub order: Order,
    pub items: Vec<OrderItem>,
}
