//! Integration tests for Zalo Shop.
//!
//! The storefront's collaborators (host SDK, `users` table, order tables,
//! verification endpoint) are replaced by scriptable in-memory fakes so the
//! end-to-end flows run without a host app or a database.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p zalo-shop-integration-tests
//! ```
//!
//! # Test Categories
//!
//! - `login_flow` - Reconciliation, write fallback and refresh
//! - `checkout_flow` - Cart to order submission and order queries
//! - `session_races` - Logout and concurrent login ordering

#![allow(clippy::unwrap_used, clippy::missing_panics_doc)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::sync::{Notify, Semaphore};

use zalo_shop_core::{Money, OrderId, OrderItemId, OrderStatus, ProductId, StatusHistoryId, UserId};
use zalo_shop_storefront::config::{SentryConfig, StorefrontConfig};
use zalo_shop_storefront::db::RepositoryError;
use zalo_shop_storefront::host::{HostError, HostSdk, Scope};
use zalo_shop_storefront::models::{
    NewOrder, NewOrderItem, NewStatusHistoryEntry, Order, OrderItem, PartialProfile, Product,
    ProfilePatch, StatusHistoryEntry, UserProfile,
};
use zalo_shop_storefront::services::orders::OrderStore;
use zalo_shop_storefront::services::profile::ProfileTable;
use zalo_shop_storefront::services::session::{MemorySessionStorage, SessionStorage};
use zalo_shop_storefront::services::verify::{ProfileVerifier, VerifyError};
use zalo_shop_storefront::state::{AppState, Collaborators};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Gate
// =============================================================================

/// Pauses a fake call until the test releases it.
pub struct Gate {
    entered: Notify,
    release: Semaphore,
}

impl Default for Gate {
    fn default() -> Self {
        Self {
            entered: Notify::new(),
            release: Semaphore::new(0),
        }
    }
}

impl Gate {
    /// Called by the fake: announce arrival, then wait for release.
    async fn pass(&self) {
        self.entered.notify_one();
        let permit = self.release.acquire().await.unwrap();
        permit.forget();
    }

    /// Wait until a call reached the gate.
    pub async fn reached(&self) {
        self.entered.notified().await;
    }

    /// Let one paused call continue.
    pub fn open(&self) {
        self.release.add_permits(1);
    }
}

// =============================================================================
// Host
// =============================================================================

/// Scriptable host SDK.
#[derive(Default)]
pub struct FakeHost {
    pub user_info: Mutex<Option<Value>>,
    pub user_id: Mutex<Option<Value>>,
    pub phone: Mutex<Option<Value>>,
    pub token: Mutex<Option<String>>,
    /// When set, `get_user_info` waits here.
    pub identity_gate: Mutex<Option<Arc<Gate>>>,
    pub prompts: Mutex<Vec<Scope>>,
    pub identity_calls: AtomicUsize,
}

impl FakeHost {
    /// A host reporting user `id` with a name and avatar; phone declined.
    #[must_use]
    pub fn user(id: &str, name: &str) -> Self {
        let host = Self::default();
        *lock(&host.user_info) = Some(json!({
            "userInfo": { "id": id, "name": name, "avatar": format!("https://avatar.zalo.me/{id}.jpg") }
        }));
        *lock(&host.user_id) = Some(json!(id));
        host
    }

    #[must_use]
    pub fn with_phone(self, phone: &str) -> Self {
        *lock(&self.phone) = Some(json!({ "number": phone }));
        self
    }

    #[must_use]
    pub fn with_token(self, token: &str) -> Self {
        *lock(&self.token) = Some(token.to_string());
        self
    }

    /// Host where the user declined the user-info prompt.
    #[must_use]
    pub fn declined_info(id: &str) -> Self {
        let host = Self::default();
        *lock(&host.user_id) = Some(json!({ "userID": id }));
        host
    }

    pub fn set_name(&self, name: &str) {
        if let Some(Value::Object(info)) = lock(&self.user_info).as_mut()
            && let Some(Value::Object(user)) = info.get_mut("userInfo")
        {
            user.insert("name".to_string(), json!(name));
        }
    }

    pub fn pause_identity(&self) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        *lock(&self.identity_gate) = Some(Arc::clone(&gate));
        gate
    }

    pub fn identity_calls(&self) -> usize {
        self.identity_calls.load(Ordering::SeqCst)
    }
}

fn declined() -> HostError {
    HostError::PermissionDeclined { code: -1401 }
}

#[async_trait]
impl HostSdk for FakeHost {
    async fn get_user_info(&self) -> Result<Value, HostError> {
        self.identity_calls.fetch_add(1, Ordering::SeqCst);
        let gate = lock(&self.identity_gate).clone();
        if let Some(gate) = gate {
            gate.pass().await;
        }
        lock(&self.user_info).clone().ok_or_else(declined)
    }

    async fn get_user_id(&self) -> Result<Value, HostError> {
        lock(&self.user_id)
            .clone()
            .ok_or_else(|| HostError::Unavailable("not running inside the host".into()))
    }

    async fn get_phone_number(&self) -> Result<Value, HostError> {
        lock(&self.phone).clone().ok_or_else(declined)
    }

    async fn login(&self) -> Result<Value, HostError> {
        lock(&self.token)
            .clone()
            .map(|token| json!({ "accessToken": token }))
            .ok_or_else(|| HostError::Unavailable("login unavailable".into()))
    }

    async fn authorize(&self, scopes: &[Scope]) -> Result<Value, HostError> {
        lock(&self.prompts).extend_from_slice(scopes);
        Err(HostError::PermissionDeclined { code: -201 })
    }

    async fn get_setting(&self) -> Result<Value, HostError> {
        Ok(json!({ "authSetting": { "scope.userInfo": lock(&self.user_info).is_some() } }))
    }
}

// =============================================================================
// Profiles
// =============================================================================

/// In-memory `users` table with failure injection.
#[derive(Default)]
pub struct MemoryProfileTable {
    rows: Mutex<HashMap<UserId, UserProfile>>,
    pub rpc_supported: Mutex<bool>,
    pub fail_fetch: Mutex<bool>,
    pub fail_update: Mutex<bool>,
    pub fail_upsert: Mutex<bool>,
    /// When set, every write waits here before touching the rows.
    pub write_gate: Mutex<Option<Arc<Gate>>>,
    pub calls: Mutex<Vec<&'static str>>,
}

impl MemoryProfileTable {
    pub fn insert(&self, profile: UserProfile) {
        lock(&self.rows).insert(profile.id.clone(), profile);
    }

    #[must_use]
    pub fn get(&self, id: &UserId) -> Option<UserProfile> {
        lock(&self.rows).get(id).cloned()
    }

    pub fn writes(&self) -> usize {
        lock(&self.calls).iter().filter(|call| **call != "fetch").count()
    }

    pub fn pause_writes(&self) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        *lock(&self.write_gate) = Some(Arc::clone(&gate));
        gate
    }

    async fn before_write(&self, call: &'static str) {
        lock(&self.calls).push(call);
        let gate = lock(&self.write_gate).clone();
        if let Some(gate) = gate {
            gate.pass().await;
        }
    }

    fn apply(&self, patch: &ProfilePatch) -> UserProfile {
        let mut rows = lock(&self.rows);
        let mut profile = patch.apply_to(rows.get(&patch.id));
        profile.updated_at = Some(Utc::now());
        rows.insert(patch.id.clone(), profile.clone());
        profile
    }
}

/// A transport-level database failure.
fn unavailable() -> RepositoryError {
    RepositoryError::Database(sqlx::Error::PoolTimedOut)
}

#[async_trait]
impl ProfileTable for MemoryProfileTable {
    async fn fetch(&self, id: &UserId) -> Result<Option<UserProfile>, RepositoryError> {
        lock(&self.calls).push("fetch");
        if *lock(&self.fail_fetch) {
            return Err(unavailable());
        }
        Ok(self.get(id))
    }

    async fn call_upsert_fn(
        &self,
        function: &str,
        patch: &ProfilePatch,
    ) -> Result<UserProfile, RepositoryError> {
        self.before_write("rpc").await;
        if !*lock(&self.rpc_supported) {
            return Err(RepositoryError::Unsupported(format!(
                "function {function}(text, jsonb) does not exist"
            )));
        }
        Ok(self.apply(patch))
    }

    async fn update(&self, patch: &ProfilePatch) -> Result<Option<UserProfile>, RepositoryError> {
        self.before_write("update").await;
        if *lock(&self.fail_update) {
            return Err(unavailable());
        }
        if !lock(&self.rows).contains_key(&patch.id) {
            return Ok(None);
        }
        Ok(Some(self.apply(patch)))
    }

    async fn upsert(&self, patch: &ProfilePatch) -> Result<UserProfile, RepositoryError> {
        self.before_write("upsert").await;
        if *lock(&self.fail_upsert) {
            return Err(unavailable());
        }
        Ok(self.apply(patch))
    }
}

// =============================================================================
// Orders
// =============================================================================

/// In-memory order tables with failure injection.
#[derive(Default)]
pub struct MemoryOrderStore {
    pub orders: Mutex<Vec<Order>>,
    pub items: Mutex<Vec<OrderItem>>,
    pub history: Mutex<Vec<StatusHistoryEntry>>,
    pub fail_order: Mutex<bool>,
    pub fail_items: Mutex<bool>,
    pub fail_history: Mutex<bool>,
    /// When set, `insert_order` waits here.
    pub submit_gate: Mutex<Option<Arc<Gate>>>,
    /// When set, `append_history_while` waits here before checking status.
    pub guarded_history_gate: Mutex<Option<Arc<Gate>>>,
}

impl MemoryOrderStore {
    pub fn pause_submissions(&self) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        *lock(&self.submit_gate) = Some(Arc::clone(&gate));
        gate
    }

    pub fn pause_guarded_history(&self) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        *lock(&self.guarded_history_gate) = Some(Arc::clone(&gate));
        gate
    }

    #[must_use]
    pub fn order_count(&self) -> usize {
        lock(&self.orders).len()
    }

    #[must_use]
    pub fn history_of(&self, order_id: OrderId) -> Vec<StatusHistoryEntry> {
        lock(&self.history)
            .iter()
            .filter(|entry| entry.order_id == order_id)
            .cloned()
            .collect()
    }

    fn history_row(entry: &NewStatusHistoryEntry) -> StatusHistoryEntry {
        StatusHistoryEntry {
            id: StatusHistoryId::new(uuid::Uuid::new_v4()),
            order_id: entry.order_id,
            status: entry.status,
            note: entry.note.clone(),
            created_by: entry.created_by.to_string(),
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn insert_order(&self, order: &NewOrder) -> Result<Order, RepositoryError> {
        let gate = lock(&self.submit_gate).clone();
        if let Some(gate) = gate {
            gate.pass().await;
        }
        if *lock(&self.fail_order) {
            return Err(unavailable());
        }

        let mut orders = lock(&self.orders);
        if orders.iter().any(|o| o.order_number == order.order_number) {
            return Err(RepositoryError::Conflict("duplicate order number".into()));
        }

        let now = Utc::now();
        let row = Order {
            id: OrderId::generate(),
            user_id: order.user_id.clone(),
            order_number: order.order_number.clone(),
            status: order.status,
            total_amount: order.total_amount,
            shipping_fee: order.shipping_fee,
            discount_amount: order.discount_amount,
            final_amount: order.final_amount,
            shipping_name: order.shipping.name.clone(),
            shipping_phone: order.shipping.phone.clone(),
            shipping_address: order.shipping.address.clone(),
            shipping_note: order.shipping.note.clone(),
            payment_method: order.shipping.payment_method,
            payment_status: order.payment_status,
            zalo_transaction_id: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        orders.push(row.clone());
        Ok(row)
    }

    async fn insert_items(
        &self,
        order_id: OrderId,
        items: &[NewOrderItem],
    ) -> Result<Vec<OrderItem>, RepositoryError> {
        if *lock(&self.fail_items) {
            return Err(unavailable());
        }

        let rows: Vec<OrderItem> = items
            .iter()
            .map(|item| OrderItem {
                id: OrderItemId::new(uuid::Uuid::new_v4()),
                order_id,
                product_id: item.product_id,
                product_name: item.product_name.clone(),
                product_image: item.product_image.clone(),
                product_price: item.product_price,
                selected_size: item.selected_size.clone(),
                selected_color: item.selected_color.clone(),
                quantity: item.quantity,
                subtotal: item.subtotal,
            })
            .collect();
        lock(&self.items).extend(rows.iter().cloned());
        Ok(rows)
    }

    async fn append_history(
        &self,
        entry: &NewStatusHistoryEntry,
    ) -> Result<StatusHistoryEntry, RepositoryError> {
        if *lock(&self.fail_history) {
            return Err(unavailable());
        }
        let row = Self::history_row(entry);
        lock(&self.history).push(row.clone());
        Ok(row)
    }

    async fn append_history_while(
        &self,
        expected: OrderStatus,
        entry: &NewStatusHistoryEntry,
    ) -> Result<StatusHistoryEntry, RepositoryError> {
        let gate = lock(&self.guarded_history_gate).clone();
        if let Some(gate) = gate {
            gate.pass().await;
        }
        if *lock(&self.fail_history) {
            return Err(unavailable());
        }

        let orders = lock(&self.orders);
        if !orders
            .iter()
            .any(|o| o.id == entry.order_id && o.status == expected)
        {
            return Err(RepositoryError::Conflict("status changed".into()));
        }
        let row = Self::history_row(entry);
        lock(&self.history).push(row.clone());
        drop(orders);
        Ok(row)
    }

    async fn update_status(
        &self,
        expected: OrderStatus,
        entry: &NewStatusHistoryEntry,
    ) -> Result<Order, RepositoryError> {
        let updated = {
            let mut orders = lock(&self.orders);
            let order = orders
                .iter_mut()
                .find(|o| o.id == entry.order_id && o.status == expected)
                .ok_or_else(|| RepositoryError::Conflict("status changed".into()))?;
            order.status = entry.status;
            order.updated_at = Utc::now();
            if entry.status == OrderStatus::Delivered {
                order.completed_at = Some(order.updated_at);
            }
            order.clone()
        };
        lock(&self.history).push(Self::history_row(entry));
        Ok(updated)
    }

    async fn orders_for_user(&self, user_id: &UserId) -> Result<Vec<Order>, RepositoryError> {
        Ok(lock(&self.orders)
            .iter()
            .filter(|o| o.user_id == *user_id)
            .cloned()
            .collect())
    }

    async fn order(&self, order_id: OrderId) -> Result<Option<Order>, RepositoryError> {
        Ok(lock(&self.orders).iter().find(|o| o.id == order_id).cloned())
    }

    async fn items(&self, order_id: OrderId) -> Result<Vec<OrderItem>, RepositoryError> {
        Ok(lock(&self.items)
            .iter()
            .filter(|item| item.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn history(&self, order_id: OrderId) -> Result<Vec<StatusHistoryEntry>, RepositoryError> {
        Ok(self.history_of(order_id))
    }
}

// =============================================================================
// Verification
// =============================================================================

/// Verifier answering with a fixed profile, or rejecting every token.
pub struct StaticVerifier {
    pub profile: Option<PartialProfile>,
    pub tokens: Mutex<Vec<String>>,
}

impl StaticVerifier {
    #[must_use]
    pub fn answering(profile: PartialProfile) -> Self {
        Self {
            profile: Some(profile),
            tokens: Mutex::default(),
        }
    }

    #[must_use]
    pub fn rejecting() -> Self {
        Self {
            profile: None,
            tokens: Mutex::default(),
        }
    }
}

#[async_trait]
impl ProfileVerifier for StaticVerifier {
    async fn verify(&self, token: &str) -> Result<PartialProfile, VerifyError> {
        lock(&self.tokens).push(token.to_string());
        self.profile.clone().ok_or(VerifyError::Rejected(401))
    }
}

// =============================================================================
// Harness
// =============================================================================

/// Configuration for tests; nothing is read from the environment.
#[must_use]
pub fn test_config() -> StorefrontConfig {
    StorefrontConfig {
        database_url: SecretString::from("postgres://unused"),
        verify: None,
        profile_upsert_rpc: Some("upsert_user_profile".to_string()),
        profile_cache_ttl: Duration::from_secs(300),
        shipping_fee: Money::vnd(30_000),
        session_file: PathBuf::from("unused-session.json"),
        sentry: SentryConfig::default(),
    }
}

/// A state wired to fakes, with handles to every fake.
pub struct Harness {
    pub state: AppState,
    pub host: Arc<FakeHost>,
    pub profiles: Arc<MemoryProfileTable>,
    pub orders: Arc<MemoryOrderStore>,
    pub storage: Arc<MemorySessionStorage>,
}

/// Builder for a [`Harness`].
pub struct HarnessBuilder {
    host: FakeHost,
    profiles: MemoryProfileTable,
    verifier: Option<Arc<dyn ProfileVerifier>>,
    storage: MemorySessionStorage,
}

impl Harness {
    #[must_use]
    pub fn builder(host: FakeHost) -> HarnessBuilder {
        HarnessBuilder {
            host,
            profiles: MemoryProfileTable::default(),
            verifier: None,
            storage: MemorySessionStorage::default(),
        }
    }
}

impl HarnessBuilder {
    #[must_use]
    pub fn profiles(mut self, profiles: MemoryProfileTable) -> Self {
        self.profiles = profiles;
        self
    }

    #[must_use]
    pub fn verifier(mut self, verifier: impl ProfileVerifier + 'static) -> Self {
        self.verifier = Some(Arc::new(verifier));
        self
    }

    #[must_use]
    pub fn storage(mut self, storage: MemorySessionStorage) -> Self {
        self.storage = storage;
        self
    }

    #[must_use]
    pub fn build(self) -> Harness {
        let host = Arc::new(self.host);
        let profiles = Arc::new(self.profiles);
        let orders = Arc::new(MemoryOrderStore::default());
        let storage = Arc::new(self.storage);

        let state = AppState::from_parts(
            test_config(),
            Collaborators {
                host: Arc::clone(&host) as Arc<dyn HostSdk>,
                profiles: Arc::clone(&profiles) as Arc<dyn ProfileTable>,
                orders: Arc::clone(&orders) as Arc<dyn OrderStore>,
                verifier: self.verifier,
                session_storage: Arc::clone(&storage) as Arc<dyn SessionStorage>,
            },
        )
        .unwrap();

        Harness {
            state,
            host,
            profiles,
            orders,
            storage,
        }
    }
}

impl Harness {
    /// What the session storage currently holds.
    #[must_use]
    pub fn persisted(&self) -> zalo_shop_storefront::services::session::PersistedSession {
        self.storage.load().unwrap()
    }
}

/// A catalog product with sizes and colours.
#[must_use]
pub fn product(id: i32, price: i64) -> Product {
    Product {
        id: ProductId::new(id),
        name: format!("Áo thun {id}"),
        image: format!("https://cdn.zalo-shop.vn/products/{id}.jpg"),
        price: Money::vnd(price),
        sizes: vec!["S".to_string(), "M".to_string(), "L".to_string()],
        colors: vec!["Trắng".to_string(), "Đen".to_string()],
    }
}

#[must_use]
pub fn user(id: &str) -> UserId {
    UserId::parse(id).unwrap()
}
