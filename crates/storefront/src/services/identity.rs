//! Identity provider adapter.
//!
//! Wraps the host SDK calls for identity, display profile, phone number and
//! login token. Capability failures are swallowed here and surface as absent
//! fields; only a missing user id is an error.

use std::sync::Arc;

use thiserror::Error;
use tracing::instrument;

use zalo_shop_core::UserId;

use crate::host::{HostError, HostSdk, Scope, fields};

/// Identity retrieval errors.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// The host yielded no usable user id.
    #[error("host identity unavailable: {0}")]
    Unavailable(String),
}

/// Identity and display data read from the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostIdentity {
    pub id: UserId,
    pub name: Option<String>,
    pub avatar: Option<String>,
}

/// Normalising adapter over a [`HostSdk`].
#[derive(Clone)]
pub struct IdentityAdapter {
    sdk: Arc<dyn HostSdk>,
}

impl IdentityAdapter {
    #[must_use]
    pub fn new(sdk: Arc<dyn HostSdk>) -> Self {
        Self { sdk }
    }

    /// Read the current user's identity.
    ///
    /// Makes sure the `scope.userInfo` grant exists first (prompting only
    /// when it is missing). If user info cannot be read but the host still
    /// reports a user id, the identity carries the id alone.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::Unavailable` when no user id can be obtained.
    #[instrument(skip(self))]
    pub async fn fetch_identity(&self) -> Result<HostIdentity, IdentityError> {
        self.ensure_grant(Scope::UserInfo).await;

        let (mut name, mut avatar) = (None, None);
        match self.sdk.get_user_info().await {
            Ok(info) => {
                name = fields::first_non_blank(&info, fields::NAME_PATHS);
                avatar = fields::first_non_blank(&info, fields::AVATAR_PATHS);
                if let Some(id) = fields::first_non_blank(&info, fields::ID_PATHS) {
                    return Ok(HostIdentity {
                        id: parse_id(&id)?,
                        name,
                        avatar,
                    });
                }
                tracing::debug!("User info carried no id, asking for the id directly");
            }
            Err(e) => log_host_failure("get_user_info", &e),
        }

        let raw = self
            .sdk
            .get_user_id()
            .await
            .map_err(|e| IdentityError::Unavailable(e.to_string()))?;
        let id = fields::user_id(&raw)
            .ok_or_else(|| IdentityError::Unavailable("host returned an empty user id".to_owned()))?;

        Ok(HostIdentity {
            id: parse_id(&id)?,
            name,
            avatar,
        })
    }

    /// Read the phone number; any failure means "absent".
    #[instrument(skip(self))]
    pub async fn fetch_phone(&self) -> Option<String> {
        match self.sdk.get_phone_number().await {
            Ok(value) => fields::first_non_blank(&value, fields::PHONE_PATHS),
            Err(e) => {
                log_host_failure("get_phone_number", &e);
                None
            }
        }
    }

    /// Prompt for the phone capability, then read the phone number.
    ///
    /// A declined prompt is not fatal by itself: the read is still attempted
    /// so the host reports the definitive outcome.
    #[instrument(skip(self))]
    pub async fn request_phone(&self) -> Option<String> {
        if let Err(e) = self.sdk.authorize(&[Scope::UserPhoneNumber]).await {
            log_host_failure("authorize", &e);
        }
        self.fetch_phone().await
    }

    /// Host login token for backend verification, if the host issues one.
    #[instrument(skip(self))]
    pub async fn login_token(&self) -> Option<String> {
        match self.sdk.login().await {
            Ok(value) => fields::first_non_blank(&value, fields::TOKEN_PATHS),
            Err(e) => {
                log_host_failure("login", &e);
                None
            }
        }
    }

    /// Prompt for `scope` unless the settings already show it granted.
    async fn ensure_grant(&self, scope: Scope) {
        match self.sdk.get_setting().await {
            Ok(settings) if fields::is_granted(&settings, scope) => return,
            Ok(_) => {}
            Err(e) => log_host_failure("get_setting", &e),
        }

        if let Err(e) = self.sdk.authorize(&[scope]).await {
            log_host_failure("authorize", &e);
        }
    }
}

fn parse_id(raw: &str) -> Result<UserId, IdentityError> {
    UserId::parse(raw).map_err(|e| IdentityError::Unavailable(format!("invalid user id: {e}")))
}

fn log_host_failure(call: &'static str, error: &HostError) {
    match error {
        HostError::PermissionDeclined { code } => {
            tracing::warn!(call, code, "Permission declined, treating field as absent");
        }
        HostError::Unavailable(reason) => {
            tracing::warn!(call, reason = %reason, "Host SDK call failed");
        }
    }
}
