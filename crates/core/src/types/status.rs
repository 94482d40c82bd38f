//! Status enums for orders and payments.
//!
//! The hosted database stores these as `text` columns holding the
//! `snake_case` names, so each enum round-trips through `Display`/`FromStr`.

use serde::{Deserialize, Serialize};

/// Order lifecycle status.
///
/// Forward path: `pending → confirmed → processing → shipped → delivered`.
/// `cancelled` is reachable from `pending` only; `refunded` from any
/// non-terminal status as an administrative override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Pending,
    Confirmed,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    /// All statuses in lifecycle order.
    pub const ALL: [Self; 7] = [
        Self::Pending,
        Self::Confirmed,
        Self::Processing,
        Self::Shipped,
        Self::Delivered,
        Self::Cancelled,
        Self::Refunded,
    ];

    /// Whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::Cancelled | Self::Refunded)
    }

    /// The next status on the forward path, if any.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Pending => Some(Self::Confirmed),
            Self::Confirmed => Some(Self::Processing),
            Self::Processing => Some(Self::Shipped),
            Self::Shipped => Some(Self::Delivered),
            Self::Delivered | Self::Cancelled | Self::Refunded => None,
        }
    }

    /// Whether `self → to` is a legal transition.
    ///
    /// No backward transitions, no skipping, no self-transitions.
    #[must_use]
    pub fn can_transition_to(self, to: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        match to {
            Self::Cancelled => self == Self::Pending,
            Self::Refunded => true,
            _ => self.next() == Some(to),
        }
    }

    /// Whether the customer may ask for a cancellation.
    #[must_use]
    pub const fn is_user_cancellable(self) -> bool {
        matches!(self, Self::Pending)
    }

    /// Label shown to customers in order tracking.
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Pending => "Đang chờ xử lý",
            Self::Confirmed => "Đã xác nhận",
            Self::Processing => "Đang xử lý",
            Self::Shipped => "Đã giao hàng",
            Self::Delivered => "Đã nhận hàng",
            Self::Cancelled => "Đã hủy",
            Self::Refunded => "Đã hoàn tiền",
        }
    }

    /// The `snake_case` name stored in the database.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Processing => "processing",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("invalid order status: {s}"))
    }
}

/// Payment status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Paid,
    Failed,
    Refunded,
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Paid => write!(f, "paid"),
            Self::Failed => write!(f, "failed"),
            Self::Refunded => write!(f, "refunded"),
        }
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "paid" => Ok(Self::Paid),
            "failed" => Ok(Self::Failed),
            "refunded" => Ok(Self::Refunded),
            _ => Err(format!("invalid payment status: {s}")),
        }
    }
}

/// How the customer pays for an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Zalo Pay wallet.
    #[default]
    ZaloPay,
    /// Cash on delivery.
    Cod,
    /// Bank transfer.
    BankTransfer,
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ZaloPay => write!(f, "zalo_pay"),
            Self::Cod => write!(f, "cod"),
            Self::BankTransfer => write!(f, "bank_transfer"),
        }
    }
}

impl std::str::FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "zalo_pay" => Ok(Self::ZaloPay),
            "cod" => Ok(Self::Cod),
            "bank_transfer" => Ok(Self::BankTransfer),
            _ => Err(format!("invalid payment method: {s}")),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_path_is_one_step_at_a_time() {
        use OrderStatus::*;

        assert!(Pending.can_transition_to(Confirmed));
        assert!(Confirmed.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Shipped));
        assert!(Shipped.can_transition_to(Delivered));

        assert!(!Pending.can_transition_to(Processing));
        assert!(!Confirmed.can_transition_to(Delivered));
        assert!(!Shipped.can_transition_to(Confirmed));
        assert!(!Pending.can_transition_to(Pending));
    }

    #[test]
    fn test_cancel_only_from_pending() {
        use OrderStatus::*;

        assert!(Pending.can_transition_to(Cancelled));
        for from in [Confirmed, Processing, Shipped, Delivered, Refunded] {
            assert!(!from.can_transition_to(Cancelled), "{from} -> cancelled");
        }
    }

    #[test]
    fn test_refund_from_any_non_terminal() {
        use OrderStatus::*;

        for from in [Pending, Confirmed, Processing, Shipped] {
            assert!(from.can_transition_to(Refunded), "{from} -> refunded");
        }
        for from in [Delivered, Cancelled, Refunded] {
            assert!(!from.can_transition_to(Refunded), "{from} -> refunded");
        }
    }

    #[test]
    fn test_terminal_statuses_have_no_exits() {
        for from in OrderStatus::ALL.into_iter().filter(|s| s.is_terminal()) {
            for to in OrderStatus::ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_user_cancellable() {
        assert!(OrderStatus::Pending.is_user_cancellable());
        assert!(!OrderStatus::Shipped.is_user_cancellable());
    }

    #[test]
    fn test_order_status_text_roundtrip() {
        for status in OrderStatus::ALL {
            assert_eq!(status.to_string().parse::<OrderStatus>().unwrap(), status);
        }
        assert!("lost".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn test_order_status_serde_matches_database_names() {
        let json = serde_json::to_string(&OrderStatus::Shipped).unwrap();
        assert_eq!(json, "\"shipped\"");
    }

    #[test]
    fn test_payment_method_roundtrip() {
        for method in [
            PaymentMethod::ZaloPay,
            PaymentMethod::Cod,
            PaymentMethod::BankTransfer,
        ] {
            assert_eq!(method.to_string().parse::<PaymentMethod>().unwrap(), method);
        }
        assert_eq!(PaymentMethod::default(), PaymentMethod::ZaloPay);
    }

    #[test]
    fn test_payment_status_from_str() {
        assert_eq!("paid".parse::<PaymentStatus>().unwrap(), PaymentStatus::Paid);
        assert!("PAID".parse::<PaymentStatus>().is_err());
    }
}
