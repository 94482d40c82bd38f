//! Customer profile domain types.
//!
//! A profile row is keyed by the host account id and holds the display data
//! the storefront shows on the account screen and pre-fills at checkout.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use zalo_shop_core::UserId;

/// The canonical, persisted profile of a customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Host account id (immutable once created).
    pub id: UserId,
    /// Display name.
    pub name: Option<String>,
    /// Avatar URI.
    pub avatar: Option<String>,
    /// Phone number.
    pub phone: Option<String>,
    /// Address pre-filled at checkout.
    pub default_address: Option<String>,
    /// When the row was last written.
    pub updated_at: Option<DateTime<Utc>>,
}

impl UserProfile {
    /// An empty profile for `id`.
    #[must_use]
    pub const fn empty(id: UserId) -> Self {
        Self {
            id,
            name: None,
            avatar: None,
            phone: None,
            default_address: None,
            updated_at: None,
        }
    }

    /// Whether any display field the account screen needs is missing.
    ///
    /// A refresh only falls back to the full host round-trip in that case.
    #[must_use]
    pub const fn needs_backfill(&self) -> bool {
        self.name.is_none() || self.avatar.is_none() || self.phone.is_none()
    }
}

/// Profile fields contributed by one source during reconciliation.
///
/// Used both for host-provided data and for the body returned by the
/// verification endpoint. A blank string is "no contribution".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialProfile {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub default_address: Option<String>,
}

impl PartialProfile {
    /// Whether no field carries a non-blank value.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        [&self.name, &self.avatar, &self.phone, &self.default_address]
            .into_iter()
            .all(|field| non_blank(field.as_deref()).is_none())
    }
}

/// How a write treats one stored field.
///
/// Absence and explicit null are different requests: `Keep` leaves the
/// stored value alone, `Clear` stores null.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FieldUpdate<T> {
    #[default]
    Keep,
    Clear,
    Set(T),
}

impl<T> FieldUpdate<T> {
    /// Whether the stored value must be left untouched.
    #[must_use]
    pub const fn is_keep(&self) -> bool {
        matches!(self, Self::Keep)
    }

    /// The new stored value, or `None` for [`FieldUpdate::Keep`].
    ///
    /// `Some(None)` means "store null".
    #[must_use]
    pub const fn new_value(&self) -> Option<Option<&T>> {
        match self {
            Self::Keep => None,
            Self::Clear => Some(None),
            Self::Set(value) => Some(Some(value)),
        }
    }

    /// Apply the update on top of a stored value.
    #[must_use]
    pub fn apply(self, stored: Option<T>) -> Option<T> {
        match self {
            Self::Keep => stored,
            Self::Clear => None,
            Self::Set(value) => Some(value),
        }
    }
}

impl FieldUpdate<String> {
    /// Store `value`, trimmed. A blank string means "clear this field".
    #[must_use]
    pub fn set(value: impl AsRef<str>) -> Self {
        non_blank(Some(value.as_ref())).map_or(Self::Clear, Self::Set)
    }

    /// Interpret form input where `None` means the field was not edited.
    #[must_use]
    pub fn from_input(value: Option<&str>) -> Self {
        value.map_or(Self::Keep, Self::set)
    }
}

/// The writable profile fields, each with its own [`FieldUpdate`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileFields {
    pub name: FieldUpdate<String>,
    pub avatar: FieldUpdate<String>,
    pub phone: FieldUpdate<String>,
    pub default_address: FieldUpdate<String>,
}

impl ProfileFields {
    /// Fields to send for a reconciled profile: every present contribution
    /// is set, everything else is kept.
    #[must_use]
    pub fn from_contribution(merged: &PartialProfile) -> Self {
        let contribute = |value: &Option<String>| {
            non_blank(value.as_deref()).map_or(FieldUpdate::Keep, FieldUpdate::Set)
        };

        Self {
            name: contribute(&merged.name),
            avatar: contribute(&merged.avatar),
            phone: contribute(&merged.phone),
            default_address: contribute(&merged.default_address),
        }
    }

    /// Whether every field is [`FieldUpdate::Keep`].
    #[must_use]
    pub const fn is_noop(&self) -> bool {
        self.name.is_keep()
            && self.avatar.is_keep()
            && self.phone.is_keep()
            && self.default_address.is_keep()
    }
}

/// A partial write against one profile row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfilePatch {
    /// Row to write (mandatory).
    pub id: UserId,
    /// Field updates.
    pub fields: ProfileFields,
}

impl ProfilePatch {
    /// A patch that keeps every field.
    #[must_use]
    pub fn new(id: UserId) -> Self {
        Self {
            id,
            fields: ProfileFields::default(),
        }
    }

    /// Set the display name (blank clears it).
    #[must_use]
    pub fn name(mut self, value: impl AsRef<str>) -> Self {
        self.fields.name = FieldUpdate::set(value);
        self
    }

    /// Set the avatar URI (blank clears it).
    #[must_use]
    pub fn avatar(mut self, value: impl AsRef<str>) -> Self {
        self.fields.avatar = FieldUpdate::set(value);
        self
    }

    /// Set the phone number (blank clears it).
    #[must_use]
    pub fn phone(mut self, value: impl AsRef<str>) -> Self {
        self.fields.phone = FieldUpdate::set(value);
        self
    }

    /// Set the default address (blank clears it).
    #[must_use]
    pub fn default_address(mut self, value: impl AsRef<str>) -> Self {
        self.fields.default_address = FieldUpdate::set(value);
        self
    }

    /// The row that results from applying this patch on top of `stored`.
    ///
    /// `updated_at` is left to the caller.
    #[must_use]
    pub fn apply_to(&self, stored: Option<&UserProfile>) -> UserProfile {
        let base = stored
            .cloned()
            .unwrap_or_else(|| UserProfile::empty(self.id.clone()));
        let fields = self.fields.clone();

        UserProfile {
            id: self.id.clone(),
            name: fields.name.apply(base.name),
            avatar: fields.avatar.apply(base.avatar),
            phone: fields.phone.apply(base.phone),
            default_address: fields.default_address.apply(base.default_address),
            updated_at: base.updated_at,
        }
    }

    /// JSON object holding only the fields that change; cleared fields
    /// are explicit `null`s.
    #[must_use]
    pub fn changes_json(&self) -> serde_json::Value {
        let mut changes = serde_json::Map::new();
        let entries = [
            ("name", &self.fields.name),
            ("avatar", &self.fields.avatar),
            ("phone", &self.fields.phone),
            ("default_address", &self.fields.default_address),
        ];

        for (key, update) in entries {
            if let Some(value) = update.new_value() {
                let json = value.map_or(serde_json::Value::Null, |v| {
                    serde_json::Value::String(v.clone())
                });
                changes.insert(key.to_string(), json);
            }
        }

        serde_json::Value::Object(changes)
    }
}

/// Trim `value`; blank or missing yields `None`.
#[must_use]
pub fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}
