//! Host mini-app SDK seam.
//!
//! The storefront runs inside the Zalo host app and reads identity, phone
//! number and capability grants through the host's SDK. The SDK is consumed,
//! not implemented, here: the embedder supplies a [`HostSdk`] and every
//! response is raw JSON because field names and shapes vary across host
//! versions. [`fields`] normalises them.

pub mod fields;

use async_trait::async_trait;
use thiserror::Error;

/// A capability the user grants to the mini-app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Display name and avatar.
    UserInfo,
    /// Phone number.
    UserPhoneNumber,
}

impl Scope {
    /// The scope name the host SDK expects.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UserInfo => "scope.userInfo",
            Self::UserPhoneNumber => "scope.userPhonenumber",
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reported by a host SDK call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HostError {
    /// The user declined a capability prompt (e.g. `-201`, `-1401`).
    #[error("permission declined by user (code {code})")]
    PermissionDeclined {
        /// Host error code.
        code: i64,
    },

    /// The call failed for any other reason (not in a host, network, etc.).
    #[error("host SDK unavailable: {0}")]
    Unavailable(String),
}

/// The host SDK functions the storefront consumes.
///
/// Each call is a single-shot asynchronous request to the host app. Results
/// are the SDK's raw JSON responses.
#[async_trait]
pub trait HostSdk: Send + Sync {
    /// Current user's identity and display profile
    /// (e.g. `{"userInfo": {"id", "name", "avatar"}}`).
    async fn get_user_info(&self) -> Result<serde_json::Value, HostError>;

    /// Current user's id; a bare string or `{"id"}` / `{"userID"}`
    /// depending on the host version.
    async fn get_user_id(&self) -> Result<serde_json::Value, HostError>;

    /// Phone number (capability-gated, e.g. `{"number"}`).
    async fn get_phone_number(&self) -> Result<serde_json::Value, HostError>;

    /// Host login; returns an opaque token for backend verification.
    async fn login(&self) -> Result<serde_json::Value, HostError>;

    /// Explicit capability prompt.
    async fn authorize(&self, scopes: &[Scope]) -> Result<serde_json::Value, HostError>;

    /// Currently granted capabilities (`{"authSetting": {"scope.userInfo": true}}`).
    async fn get_setting(&self) -> Result<serde_json::Value, HostError>;
}
