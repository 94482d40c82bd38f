//! Unified error handling with Sentry integration.
//!
//! Provides a unified `AppError` type for the operations the mini-app screens
//! invoke. Server-side failures are captured to Sentry before a localized
//! message is shown to the customer.

use thiserror::Error;

use crate::config::ConfigError;
use crate::db::RepositoryError;
use crate::services::cart::CartError;
use crate::services::identity::IdentityError;
use crate::services::orders::OrderError;
use crate::services::profile::{ProfileError, ReconcileError};
use crate::services::session::SessionError;
use crate::services::verify::VerifyError;

/// Application-level error type for the storefront.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration could not be loaded.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] RepositoryError),

    /// Host identity was unavailable.
    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    /// Login or profile reconciliation failed.
    #[error("Reconcile error: {0}")]
    Reconcile(#[from] ReconcileError),

    /// Profile storage failed.
    #[error("Profile error: {0}")]
    Profile(#[from] ProfileError),

    /// Session storage failed.
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Cart operation rejected.
    #[error("Cart error: {0}")]
    Cart(#[from] CartError),

    /// Order operation failed.
    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    /// Backend verification failed.
    #[error("Verify error: {0}")]
    Verify(#[from] VerifyError),
}

impl AppError {
    /// Whether this failure is on our side (storage, config, backend) rather
    /// than a rejected customer input.
    #[must_use]
    pub const fn is_server_error(&self) -> bool {
        match self {
            Self::Config(_)
            | Self::Database(_)
            | Self::Profile(_)
            | Self::Session(_)
            | Self::Verify(_) => true,
            Self::Reconcile(err) => matches!(
                err,
                ReconcileError::Profile(_) | ReconcileError::Session(_)
            ),
            Self::Order(err) => matches!(
                err,
                OrderError::OrderPersistFailed(_)
                    | OrderError::OrderItemsPersistFailed { .. }
                    | OrderError::StatusHistoryPersistFailed { .. }
                    | OrderError::Repository(_)
            ),
            Self::Identity(_) | Self::Cart(_) => false,
        }
    }

    /// Customer-facing message. Never exposes internal details.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Identity(_) | Self::Reconcile(ReconcileError::Identity(_)) => {
                "Không thể lấy thông tin tài khoản Zalo. Vui lòng thử lại.".to_string()
            }
            Self::Reconcile(ReconcileError::NotAuthenticated)
            | Self::Order(OrderError::NotAuthenticated) => {
                "Vui lòng đăng nhập để tiếp tục.".to_string()
            }
            Self::Reconcile(ReconcileError::Superseded | ReconcileError::IdentityChanged { .. }) => {
                "Phiên đăng nhập đã thay đổi.".to_string()
            }
            Self::Cart(CartError::InvalidQuantity) => "Số lượng không hợp lệ.".to_string(),
            Self::Cart(CartError::UnknownLine(_)) => {
                "Sản phẩm không còn trong giỏ hàng.".to_string()
            }
            Self::Order(OrderError::EmptyCart) => "Giỏ hàng trống.".to_string(),
            Self::Order(OrderError::IncompleteShippingInfo { .. }) => {
                "Vui lòng điền đầy đủ thông tin giao hàng.".to_string()
            }
            Self::Order(OrderError::NotFound(_)) => "Không tìm thấy đơn hàng.".to_string(),
            Self::Order(OrderError::CancellationNotAllowed { .. }) => {
                "Đơn hàng này không thể hủy.".to_string()
            }
            Self::Order(OrderError::InvalidCancellationReason) => format!(
                "Lý do hủy đơn phải có ít nhất {} ký tự.",
                crate::services::orders::MIN_CANCELLATION_REASON_CHARS
            ),
            Self::Order(OrderError::IllegalTransition { .. }) => {
                "Không thể chuyển trạng thái đơn hàng.".to_string()
            }
            Self::Order(
                OrderError::OrderItemsPersistFailed { order_id, .. }
                | OrderError::StatusHistoryPersistFailed { order_id, .. },
            ) => format!("Đơn hàng {order_id} chưa được lưu đầy đủ. Vui lòng liên hệ hỗ trợ."),
            _ => "Đã có lỗi xảy ra. Vui lòng thử lại sau.".to_string(),
        }
    }

    /// Capture server-side failures to Sentry and log them; returns the
    /// customer-facing message.
    pub fn report(&self) -> String {
        if self.is_server_error() {
            let event_id = sentry::capture_error(self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Operation failed"
            );
        } else {
            tracing::debug!(error = %self, "Operation rejected");
        }
        self.user_message()
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

/// Set the Sentry user context from a user ID.
///
/// Call this after successful login to associate errors with users.
pub fn set_sentry_user(user_id: &impl ToString) {
    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            id: Some(user_id.to_string()),
            ..Default::default()
        }));
    });
}

/// Clear the Sentry user context.
///
/// Call this on logout to stop associating errors with the user.
pub fn clear_sentry_user() {
    sentry::configure_scope(|scope| {
        scope.set_user(None);
    });
}

/// Record a navigation or lifecycle breadcrumb.
pub fn add_breadcrumb(category: &str, message: impl Into<String>) {
    sentry::add_breadcrumb(sentry::Breadcrumb {
        category: Some(category.to_string()),
        message: Some(message.into()),
        level: sentry::Level::Info,
        ..Default::default()
    });
}
