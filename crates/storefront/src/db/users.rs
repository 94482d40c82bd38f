//! `users` table repository.
//!
//! Partial writes use `CASE WHEN keep THEN column ELSE value END` per field
//! so a field the patch does not mention is never overwritten.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use zalo_shop_core::UserId;

use super::RepositoryError;
use crate::models::{FieldUpdate, ProfilePatch, UserProfile};
use crate::services::profile::ProfileTable;

const PROFILE_COLUMNS: &str = "id, name, avatar, phone, default_address, updated_at";

/// Repository for profile rows.
#[derive(Clone)]
pub struct UserRepository {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: String,
    name: Option<String>,
    avatar: Option<String>,
    phone: Option<String>,
    default_address: Option<String>,
    updated_at: Option<DateTime<Utc>>,
}

impl TryFrom<UserRow> for UserProfile {
    type Error = RepositoryError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let id = UserId::parse(&row.id).map_err(|e| {
            RepositoryError::DataCorruption(format!("invalid user id in database: {e}"))
        })?;

        Ok(Self {
            id,
            name: row.name,
            avatar: row.avatar,
            phone: row.phone,
            default_address: row.default_address,
            updated_at: row.updated_at,
        })
    }
}

/// `(keep, value)` bind pair for one field.
fn bind_pair(update: &FieldUpdate<String>) -> (bool, Option<String>) {
    match update.new_value() {
        None => (true, None),
        Some(value) => (false, value.cloned()),
    }
}

impl UserRepository {
    /// Create a new user repository.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProfileTable for UserRepository {
    async fn fetch(&self, id: &UserId) -> Result<Option<UserProfile>, RepositoryError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {PROFILE_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(UserProfile::try_from).transpose()
    }

    async fn call_upsert_fn(
        &self,
        function: &str,
        patch: &ProfilePatch,
    ) -> Result<UserProfile, RepositoryError> {
        // `function` is validated as a plain identifier when config loads
        let sql = format!("SELECT {PROFILE_COLUMNS} FROM {function}($1, ($2::text)::jsonb)");

        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(&patch.id)
            .bind(patch.changes_json().to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| RepositoryError::from_sqlx(e, "profile already exists"))?;

        row.try_into()
    }

    async fn update(&self, patch: &ProfilePatch) -> Result<Option<UserProfile>, RepositoryError> {
        let (keep_name, name) = bind_pair(&patch.fields.name);
        let (keep_avatar, avatar) = bind_pair(&patch.fields.avatar);
        let (keep_phone, phone) = bind_pair(&patch.fields.phone);
        let (keep_address, address) = bind_pair(&patch.fields.default_address);

        let row = sqlx::query_as::<_, UserRow>(&format!(
            r"
            UPDATE users SET
                name = CASE WHEN $2 THEN name ELSE $3 END,
                avatar = CASE WHEN $4 THEN avatar ELSE $5 END,
                phone = CASE WHEN $6 THEN phone ELSE $7 END,
                default_address = CASE WHEN $8 THEN default_address ELSE $9 END,
                updated_at = now()
            WHERE id = $1
            RETURNING {PROFILE_COLUMNS}
            "
        ))
        .bind(&patch.id)
        .bind(keep_name)
        .bind(name)
        .bind(keep_avatar)
        .bind(avatar)
        .bind(keep_phone)
        .bind(phone)
        .bind(keep_address)
        .bind(address)
        .fetch_optional(&self.pool)
        .await?;

        row.map(UserProfile::try_from).transpose()
    }

    async fn upsert(&self, patch: &ProfilePatch) -> Result<UserProfile, RepositoryError> {
        let (keep_name, name) = bind_pair(&patch.fields.name);
        let (keep_avatar, avatar) = bind_pair(&patch.fields.avatar);
        let (keep_phone, phone) = bind_pair(&patch.fields.phone);
        let (keep_address, address) = bind_pair(&patch.fields.default_address);

        let row = sqlx::query_as::<_, UserRow>(&format!(
            r"
            INSERT INTO users (id, name, avatar, phone, default_address, updated_at)
            VALUES ($1, $3, $5, $7, $9, now())
            ON CONFLICT (id) DO UPDATE SET
                name = CASE WHEN $2 THEN users.name ELSE EXCLUDED.name END,
                avatar = CASE WHEN $4 THEN users.avatar ELSE EXCLUDED.avatar END,
                phone = CASE WHEN $6 THEN users.phone ELSE EXCLUDED.phone END,
                default_address = CASE WHEN $8 THEN users.default_address
                                       ELSE EXCLUDED.default_address END,
                updated_at = EXCLUDED.updated_at
            RETURNING {PROFILE_COLUMNS}
            "
        ))
        .bind(&patch.id)
        .bind(keep_name)
        .bind(name)
        .bind(keep_avatar)
        .bind(avatar)
        .bind(keep_phone)
        .bind(phone)
        .bind(keep_address)
        .bind(address)
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_pair() {
        assert_eq!(bind_pair(&FieldUpdate::Keep), (true, None));
        assert_eq!(bind_pair(&FieldUpdate::Clear), (false, None));
        assert_eq!(
            bind_pair(&FieldUpdate::Set("Lan".to_string())),
            (false, Some("Lan".to_string()))
        );
    }

    #[test]
    fn test_row_with_blank_id_is_corrupt() {
        let row = UserRow {
            id: "  ".to_string(),
            name: None,
            avatar: None,
            phone: None,
            default_address: None,
            updated_at: None,
        };
        assert!(matches!(
            UserProfile::try_from(row),
            Err(RepositoryError::DataCorruption(_))
        ));
    }
}
