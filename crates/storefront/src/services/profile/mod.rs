//! Remote profile store and reconciliation.
//!
//! [`ProfileStore`] writes partial profiles through an ordered list of
//! strategies (server-side upsert function, plain update, upsert), stopping
//! at the first success. [`reconcile`] merges host, verified and stored data
//! into the canonical profile.

pub mod reconcile;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::instrument;

use zalo_shop_core::UserId;

use crate::db::RepositoryError;
use crate::models::{ProfilePatch, UserProfile};

pub use reconcile::{ProfileEngine, ReconcileError, merge};

/// Row-level access to the `users` table.
///
/// Every write sets `updated_at`. Implemented by
/// [`UserRepository`](crate::db::UserRepository) and by in-memory tables in
/// tests.
#[async_trait]
pub trait ProfileTable: Send + Sync {
    /// Single-row lookup.
    async fn fetch(&self, id: &UserId) -> Result<Option<UserProfile>, RepositoryError>;

    /// Call the server-side upsert function `function(id, changes)`.
    ///
    /// Returns [`RepositoryError::Unsupported`] when the function does not exist.
    async fn call_upsert_fn(
        &self,
        function: &str,
        patch: &ProfilePatch,
    ) -> Result<UserProfile, RepositoryError>;

    /// Update an existing row. `Ok(None)` when no row has this id.
    async fn update(&self, patch: &ProfilePatch) -> Result<Option<UserProfile>, RepositoryError>;

    /// Insert the row or update it when it exists.
    async fn upsert(&self, patch: &ProfilePatch) -> Result<UserProfile, RepositoryError>;
}

/// One way of persisting a profile patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStrategy {
    /// Atomic server-side upsert function.
    Rpc,
    /// Row update keyed by id.
    Update,
    /// Insert-or-update keyed by id.
    Upsert,
}

impl std::fmt::Display for WriteStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rpc => write!(f, "rpc"),
            Self::Update => write!(f, "update"),
            Self::Upsert => write!(f, "upsert"),
        }
    }
}

/// Profile store errors.
#[derive(Debug, Error)]
pub enum ProfileError {
    /// Reading the stored profile failed.
    #[error("profile lookup failed: {0}")]
    Fetch(#[source] RepositoryError),

    /// Every write strategy failed.
    #[error("profile write failed after {}: {cause}", describe(.attempted))]
    WriteFailed {
        /// Strategies tried, in order.
        attempted: Vec<WriteStrategy>,
        /// Failure of the last strategy.
        #[source]
        cause: RepositoryError,
    },
}

fn describe(attempted: &[WriteStrategy]) -> String {
    attempted
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// CRUD against the `users` table with the write fallback chain.
#[derive(Clone)]
pub struct ProfileStore {
    table: Arc<dyn ProfileTable>,
    upsert_fn: Option<String>,
}

impl ProfileStore {
    /// Create a store. `upsert_fn` names the server-side upsert function, if any.
    #[must_use]
    pub fn new(table: Arc<dyn ProfileTable>, upsert_fn: Option<String>) -> Self {
        Self { table, upsert_fn }
    }

    /// The strategies a write tries, in order.
    #[must_use]
    pub fn strategies(&self) -> Vec<WriteStrategy> {
        let mut strategies = Vec::with_capacity(3);
        if self.upsert_fn.is_some() {
            strategies.push(WriteStrategy::Rpc);
        }
        strategies.extend([WriteStrategy::Update, WriteStrategy::Upsert]);
        strategies
    }

    /// Fetch a profile. Absent and "present with every field empty" are both
    /// valid outcomes.
    ///
    /// # Errors
    ///
    /// Returns `ProfileError::Fetch` if the lookup fails.
    #[instrument(skip(self), fields(user_id = %id))]
    pub async fn fetch(&self, id: &UserId) -> Result<Option<UserProfile>, ProfileError> {
        self.table.fetch(id).await.map_err(ProfileError::Fetch)
    }

    /// Persist a partial profile and return the stored row.
    ///
    /// Fields the patch keeps are never overwritten. Strategies are tried in
    /// order; a later one only runs after the previous one failed. No retry
    /// beyond that chain.
    ///
    /// # Errors
    ///
    /// Returns `ProfileError::WriteFailed` with the last cause when every
    /// strategy failed.
    #[instrument(skip(self, patch), fields(user_id = %patch.id))]
    pub async fn write(&self, patch: &ProfilePatch) -> Result<UserProfile, ProfileError> {
        let mut attempted = Vec::with_capacity(3);
        let mut last_error = None;

        for strategy in self.strategies() {
            attempted.push(strategy);
            match self.attempt(strategy, patch).await {
                Ok(profile) => {
                    tracing::debug!(%strategy, "Profile written");
                    return Ok(profile);
                }
                Err(e) => {
                    tracing::debug!(%strategy, error = %e, "Profile write strategy failed");
                    last_error = Some(e);
                }
            }
        }

        let cause = last_error.unwrap_or(RepositoryError::NotFound);
        tracing::error!(error = %cause, ?attempted, "Profile write failed");
        Err(ProfileError::WriteFailed { attempted, cause })
    }

    async fn attempt(
        &self,
        strategy: WriteStrategy,
        patch: &ProfilePatch,
    ) -> Result<UserProfile, RepositoryError> {
        match strategy {
            WriteStrategy::Rpc => {
                let function = self
                    .upsert_fn
                    .as_deref()
                    .ok_or_else(|| RepositoryError::Unsupported("no upsert function".to_owned()))?;
                self.table.call_upsert_fn(function, patch).await
            }
            WriteStrategy::Update => self
                .table
                .update(patch)
                .await?
                .ok_or(RepositoryError::NotFound),
            WriteStrategy::Upsert => self.table.upsert(patch).await,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    /// Table that records calls and fails the strategies it is told to.
    #[derive(Default)]
    struct ScriptedTable {
        rows: Mutex<HashMap<UserId, UserProfile>>,
        fail: Vec<WriteStrategy>,
        calls: Mutex<Vec<WriteStrategy>>,
    }

    impl ScriptedTable {
        fn failing(fail: &[WriteStrategy]) -> Self {
            Self {
                fail: fail.to_vec(),
                ..Self::default()
            }
        }

        fn record(&self, strategy: WriteStrategy) -> Result<(), RepositoryError> {
            self.calls.lock().unwrap().push(strategy);
            if self.fail.contains(&strategy) {
                return Err(RepositoryError::Conflict(format!("{strategy} refused")));
            }
            Ok(())
        }

        fn store(&self, patch: &ProfilePatch) -> UserProfile {
            let mut rows = self.rows.lock().unwrap();
            let row = patch.apply_to(rows.get(&patch.id));
            rows.insert(patch.id.clone(), row.clone());
            row
        }
    }

    #[async_trait]
    impl ProfileTable for ScriptedTable {
        async fn fetch(&self, id: &UserId) -> Result<Option<UserProfile>, RepositoryError> {
            Ok(self.rows.lock().unwrap().get(id).cloned())
        }

        async fn call_upsert_fn(
            &self,
            _function: &str,
            patch: &ProfilePatch,
        ) -> Result<UserProfile, RepositoryError> {
            self.record(WriteStrategy::Rpc)?;
            Ok(self.store(patch))
        }

        async fn update(
            &self,
            patch: &ProfilePatch,
        ) -> Result<Option<UserProfile>, RepositoryError> {
            self.record(WriteStrategy::Update)?;
            if !self.rows.lock().unwrap().contains_key(&patch.id) {
                return Ok(None);
            }
            Ok(Some(self.store(patch)))
        }

        async fn upsert(&self, patch: &ProfilePatch) -> Result<UserProfile, RepositoryError> {
            self.record(WriteStrategy::Upsert)?;
            Ok(self.store(patch))
        }
    }

    fn patch() -> ProfilePatch {
        ProfilePatch::new(UserId::parse("u1").unwrap()).name("Lan")
    }

    #[test]
    fn test_strategies_order() {
        let table = Arc::new(ScriptedTable::default());
        let without = ProfileStore::new(table.clone(), None);
        assert_eq!(
            without.strategies(),
            vec![WriteStrategy::Update, WriteStrategy::Upsert]
        );

        let with = ProfileStore::new(table, Some("upsert_user_profile".to_string()));
        assert_eq!(
            with.strategies(),
            vec![
                WriteStrategy::Rpc,
                WriteStrategy::Update,
                WriteStrategy::Upsert
            ]
        );
    }

    #[tokio::test]
    async fn test_rpc_success_stops_the_chain() {
        let table = Arc::new(ScriptedTable::default());
        let store = ProfileStore::new(table.clone(), Some("upsert_user_profile".to_string()));

        store.write(&patch()).await.unwrap();
        assert_eq!(*table.calls.lock().unwrap(), vec![WriteStrategy::Rpc]);
    }

    #[tokio::test]
    async fn test_missing_row_falls_back_to_upsert() {
        let table = Arc::new(ScriptedTable::default());
        let store = ProfileStore::new(table.clone(), None);

        let profile = store.write(&patch()).await.unwrap();
        assert_eq!(profile.name.as_deref(), Some("Lan"));
        assert_eq!(
            *table.calls.lock().unwrap(),
            vec![WriteStrategy::Update, WriteStrategy::Upsert]
        );
    }

    #[tokio::test]
    async fn test_all_strategies_failing() {
        let table = Arc::new(ScriptedTable::failing(&[
            WriteStrategy::Rpc,
            WriteStrategy::Update,
            WriteStrategy::Upsert,
        ]));
        let store = ProfileStore::new(table, Some("upsert_user_profile".to_string()));

        let err = store.write(&patch()).await.unwrap_err();
        match err {
            ProfileError::WriteFailed { attempted, cause } => {
                assert_eq!(attempted.len(), 3);
                assert!(cause.to_string().contains("upsert refused"));
            }
            ProfileError::Fetch(_) => panic!("expected WriteFailed"),
        }
    }

    #[tokio::test]
    async fn test_write_failed_message_lists_strategies() {
        let table = Arc::new(ScriptedTable::failing(&[
            WriteStrategy::Update,
            WriteStrategy::Upsert,
        ]));
        let store = ProfileStore::new(table, None);

        let err = store.write(&patch()).await.unwrap_err();
        assert!(err.to_string().contains("update -> upsert"));
    }
}
