//! Domain models for the storefront.
//!
//! These types are validated domain objects, separate from database row types.

pub mod order;
pub mod product;
pub mod profile;

pub use order::{
    Actor, NewOrder, NewOrderItem, NewStatusHistoryEntry, Order, OrderItem, OrderWithItems,
    ShippingForm, StatusHistoryEntry,
};
pub use product::{Product, SelectedOptions};
pub use profile::{FieldUpdate, PartialProfile, ProfileFields, ProfilePatch, UserProfile};
