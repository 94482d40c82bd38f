//! Profile reconciliation engine.
//!
//! Produces the canonical profile by merging, per field and in strictly
//! descending priority, the backend-verified profile, the host's live data
//! and the stored row. Only fields with a live or verified contribution are
//! written, so data known only to the stored row survives.
//!
//! Login cycle: identity, then phone and verification concurrently, then
//! merge and a single persist. The session flips to authenticated only after
//! the persist succeeded and only if nothing (e.g. logout) changed the
//! session meanwhile.

use std::sync::Arc;

use moka::future::Cache;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::instrument;

use zalo_shop_core::UserId;

use super::{ProfileError, ProfileStore};
use crate::error::{clear_sentry_user, set_sentry_user};
use crate::models::profile::non_blank;
use crate::models::{PartialProfile, ProfileFields, ProfilePatch, UserProfile};
use crate::services::identity::{IdentityAdapter, IdentityError};
use crate::services::session::{SessionError, SessionStore, SessionTicket, StoreEvent};
use crate::services::verify::ProfileVerifier;

/// Maximum number of cached profiles.
const PROFILE_CACHE_CAPACITY: u64 = 1000;

/// Reconciliation errors.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Host identity could not be read; nothing was written.
    #[error(transparent)]
    Identity(#[from] IdentityError),

    /// The profile store failed.
    #[error(transparent)]
    Profile(#[from] ProfileError),

    /// Session storage failed or the session was in the wrong state.
    #[error(transparent)]
    Session(SessionError),

    /// The session changed (e.g. logout) while the operation was in flight;
    /// its result was discarded.
    #[error("superseded by a concurrent session change")]
    Superseded,

    /// The operation needs a logged-in user.
    #[error("not authenticated")]
    NotAuthenticated,

    /// The host reports a different account than the logged-in user.
    #[error("host user {host_user} differs from session user {session_user}")]
    IdentityChanged {
        session_user: UserId,
        host_user: UserId,
    },
}

impl From<SessionError> for ReconcileError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::Superseded => Self::Superseded,
            other => Self::Session(other),
        }
    }
}

/// Merge profile sources field by field: `verified` beats `live`.
///
/// Blank strings never contribute. The stored row is the implicit lowest
/// priority: absent fields are kept, not written.
#[must_use]
pub fn merge(verified: Option<&PartialProfile>, live: &PartialProfile) -> PartialProfile {
    let pick = |field: fn(&PartialProfile) -> Option<&str>| {
        verified
            .and_then(|v| non_blank(field(v)))
            .or_else(|| non_blank(field(live)))
    };

    PartialProfile {
        name: pick(|p| p.name.as_deref()),
        avatar: pick(|p| p.avatar.as_deref()),
        phone: pick(|p| p.phone.as_deref()),
        default_address: pick(|p| p.default_address.as_deref()),
    }
}

/// Coordinates identity, verification, storage and session for profiles.
pub struct ProfileEngine {
    identity: IdentityAdapter,
    verifier: Option<Arc<dyn ProfileVerifier>>,
    store: ProfileStore,
    session: Arc<SessionStore>,
    cache: Cache<UserId, UserProfile>,
}

impl ProfileEngine {
    /// Create an engine. Canonical profiles stay cached for `cache_ttl`.
    #[must_use]
    pub fn new(
        identity: IdentityAdapter,
        verifier: Option<Arc<dyn ProfileVerifier>>,
        store: ProfileStore,
        session: Arc<SessionStore>,
        cache_ttl: std::time::Duration,
    ) -> Self {
        let cache = Cache::builder()
            .max_capacity(PROFILE_CACHE_CAPACITY)
            .time_to_live(cache_ttl)
            .build();

        Self {
            identity,
            verifier,
            store,
            session,
            cache,
        }
    }

    /// The session this engine drives.
    #[must_use]
    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    /// Full login: reconcile, persist once, then mark the session logged in.
    ///
    /// # Errors
    ///
    /// - `ReconcileError::Identity` if no host identity is available
    /// - `ReconcileError::Profile` if the merged profile could not be
    ///   persisted (the session is not authenticated)
    /// - `ReconcileError::Superseded` if logout happened meanwhile
    #[instrument(skip(self))]
    pub async fn login(&self) -> Result<UserProfile, ReconcileError> {
        let ticket = self.session.begin_login()?;

        let profile = match self.reconcile(ticket, None).await {
            Ok(profile) => profile,
            Err(e) => {
                tracing::warn!(error = %e, "Login failed");
                self.session.fail_login(ticket, e.to_string());
                return Err(e);
            }
        };

        if let Err(e) = self.session.complete_login(ticket, &profile.id) {
            let e = ReconcileError::from(e);
            if !matches!(e, ReconcileError::Superseded) {
                self.session.fail_login(ticket, e.to_string());
            }
            return Err(e);
        }

        self.cache.insert(profile.id.clone(), profile.clone()).await;
        set_sentry_user(&profile.id);
        tracing::info!(user_id = %profile.id, "Logged in");
        Ok(profile)
    }

    /// Lightweight refresh for screen visits.
    ///
    /// Uses the stored row unless it is missing or lacks a display field, in
    /// which case the full reconciliation runs. When that fallback fails but
    /// a stored or cached profile exists, the stale profile is returned.
    /// `Ok(None)` when logged out.
    ///
    /// # Errors
    ///
    /// Returns the underlying failure only when no profile is known at all,
    /// and `ReconcileError::Superseded` if logout happened meanwhile. A host
    /// now reporting another account is such a failure
    /// (`ReconcileError::IdentityChanged`); that account's row is never
    /// written.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> Result<Option<UserProfile>, ReconcileError> {
        let Some(user_id) = self.session.current_user() else {
            return Ok(None);
        };
        let ticket = self.session.ticket();

        let stored = match self.store.fetch(&user_id).await {
            Ok(stored) => stored,
            Err(e) => {
                let cached = self.cache.get(&user_id).await;
                return match cached {
                    Some(profile) => {
                        tracing::warn!(error = %e, "Refresh failed, serving cached profile");
                        Ok(Some(profile))
                    }
                    None => Err(e.into()),
                };
            }
        };

        let profile = match stored {
            Some(profile) if !profile.needs_backfill() => profile,
            stale => {
                tracing::debug!(found = stale.is_some(), "Stored profile incomplete, reconciling");
                match self.reconcile(ticket, Some(&user_id)).await {
                    Ok(profile) => profile,
                    Err(ReconcileError::Superseded) => return Err(ReconcileError::Superseded),
                    Err(e) => {
                        let fallback = match stale {
                            Some(profile) => Some(profile),
                            None => self.cache.get(&user_id).await,
                        };
                        return match fallback {
                            Some(profile) => {
                                tracing::warn!(error = %e, "Reconciliation failed, serving stale profile");
                                Ok(Some(profile))
                            }
                            None => Err(e),
                        };
                    }
                }
            }
        };

        if !self.session.is_current(ticket) {
            return Err(ReconcileError::Superseded);
        }
        self.cache.insert(profile.id.clone(), profile.clone()).await;
        Ok(Some(profile))
    }

    /// Log out. Clears the local session only; the stored profile stays.
    #[instrument(skip(self))]
    pub async fn logout(&self) {
        if let Some(user_id) = self.session.logout() {
            self.cache.invalidate(&user_id).await;
            tracing::info!(user_id = %user_id, "Logged out");
        }
        clear_sentry_user();
    }

    /// Explicit profile edit of the logged-in user.
    ///
    /// Publishes [`StoreEvent::ProfileUpdated`] on success.
    ///
    /// # Errors
    ///
    /// Returns `ReconcileError::NotAuthenticated` when logged out,
    /// `ReconcileError::Profile` if the write failed.
    #[instrument(skip(self, fields))]
    pub async fn update_profile(&self, fields: ProfileFields) -> Result<UserProfile, ReconcileError> {
        let user_id = self
            .session
            .current_user()
            .ok_or(ReconcileError::NotAuthenticated)?;
        let ticket = self.session.ticket();

        let profile = self
            .store
            .write(&ProfilePatch {
                id: user_id.clone(),
                fields,
            })
            .await?;

        if !self.session.is_current(ticket) {
            return Err(ReconcileError::Superseded);
        }

        self.cache.insert(user_id.clone(), profile.clone()).await;
        self.session.notify_profile_updated(user_id);
        Ok(profile)
    }

    /// Prompt for the phone number and store it for the logged-in user.
    ///
    /// Returns the phone number even when storing it failed; a declined
    /// prompt yields `None`.
    #[instrument(skip(self))]
    pub async fn request_phone_number(&self) -> Option<String> {
        let phone = self.identity.request_phone().await?;

        let Some(user_id) = self.session.current_user() else {
            return Some(phone);
        };
        let ticket = self.session.ticket();

        match self
            .store
            .write(&ProfilePatch::new(user_id.clone()).phone(&phone))
            .await
        {
            Ok(profile) if self.session.is_current(ticket) => {
                self.cache.insert(user_id.clone(), profile).await;
                self.session.notify_profile_updated(user_id);
            }
            Ok(_) => tracing::debug!("Session changed while storing phone number"),
            Err(e) => tracing::warn!(error = %e, "Failed to store phone number"),
        }

        Some(phone)
    }

    /// The cached canonical profile of the logged-in user.
    pub async fn current_profile(&self) -> Option<UserProfile> {
        let user_id = self.session.current_user()?;
        self.cache.get(&user_id).await
    }

    /// Refresh on [`StoreEvent::ProfileUpdated`] for the current user and on
    /// [`StoreEvent::Resumed`]. Runs until the event bus closes.
    pub fn spawn_refresh_listener(self: Arc<Self>) -> JoinHandle<()> {
        let mut events = self.session.subscribe();

        tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Closed) => break,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Refresh listener lagged behind events");
                        continue;
                    }
                };

                let relevant = match &event {
                    StoreEvent::ProfileUpdated { user_id } => {
                        self.session.current_user().as_ref() == Some(user_id)
                    }
                    StoreEvent::Resumed => true,
                    StoreEvent::SessionChanged(_) => false,
                };
                if !relevant {
                    continue;
                }

                if let Err(e) = self.refresh().await {
                    tracing::debug!(error = %e, ?event, "Background refresh failed");
                }
            }
        })
    }

    /// One reconciliation cycle, persisted once.
    ///
    /// With `expected` set, a host identity for any other user aborts before
    /// anything is written.
    async fn reconcile(
        &self,
        ticket: SessionTicket,
        expected: Option<&UserId>,
    ) -> Result<UserProfile, ReconcileError> {
        let identity = self.identity.fetch_identity().await?;
        if let Some(session_user) = expected.filter(|user| **user != identity.id) {
            return Err(ReconcileError::IdentityChanged {
                session_user: session_user.clone(),
                host_user: identity.id,
            });
        }

        let (phone, verified) = tokio::join!(self.identity.fetch_phone(), self.verified_profile());

        let live = PartialProfile {
            name: identity.name,
            avatar: identity.avatar,
            phone,
            default_address: None,
        };
        let merged = merge(verified.as_ref(), &live);

        let patch = ProfilePatch {
            id: identity.id,
            fields: ProfileFields::from_contribution(&merged),
        };

        // Re-validate right before the write: a logout must not resurrect state
        if !self.session.is_current(ticket) {
            return Err(ReconcileError::Superseded);
        }

        Ok(self.store.write(&patch).await?)
    }

    /// Backend-verified profile; every failure contributes nothing.
    async fn verified_profile(&self) -> Option<PartialProfile> {
        let verifier = self.verifier.as_ref()?;
        let token = self.identity.login_token().await?;

        match verifier.verify(&token).await {
            Ok(profile) => Some(profile),
            Err(e) => {
                tracing::warn!(error = %e, "Verification unavailable, continuing without it");
                None
            }
        }
    }
}
