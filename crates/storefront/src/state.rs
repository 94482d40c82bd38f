//! Application state shared across screens.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use zalo_shop_core::OrderId;

use crate::config::StorefrontConfig;
use crate::db::{self, OrderRepository, RepositoryError, UserRepository};
use crate::error::AppError;
use crate::host::HostSdk;
use crate::models::{Order, ShippingForm};
use crate::services::cart::Cart;
use crate::services::identity::IdentityAdapter;
use crate::services::orders::{OrderError, OrderPipeline, OrderStore};
use crate::services::profile::{ProfileEngine, ProfileStore, ProfileTable};
use crate::services::session::{FileSessionStorage, SessionStorage, SessionStore};
use crate::services::verify::{HttpVerifier, ProfileVerifier};

/// Collaborators the state is assembled from.
///
/// [`AppState::connect`] builds the production set; tests pass in-memory
/// implementations.
pub struct Collaborators {
    pub host: Arc<dyn HostSdk>,
    pub profiles: Arc<dyn ProfileTable>,
    pub orders: Arc<dyn OrderStore>,
    pub verifier: Option<Arc<dyn ProfileVerifier>>,
    pub session_storage: Arc<dyn SessionStorage>,
}

/// Application state shared across all screens.
///
/// This struct is cheaply cloneable via `Arc` and provides access to the
/// session, profile engine, order pipeline and cart.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: StorefrontConfig,
    session: Arc<SessionStore>,
    profiles: Arc<ProfileEngine>,
    orders: OrderPipeline,
    cart: Mutex<Cart>,
}

impl AppState {
    /// Connect to the database and assemble the production state.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot be created, the verification
    /// client cannot be built or the session file cannot be read.
    pub async fn connect(config: StorefrontConfig, host: Arc<dyn HostSdk>) -> Result<Self, AppError> {
        let pool = db::create_pool(&config.database_url)
            .await
            .map_err(RepositoryError::from)?;

        let verifier = match &config.verify {
            Some(verify) => Some(Arc::new(HttpVerifier::new(verify)?) as Arc<dyn ProfileVerifier>),
            None => {
                tracing::info!("No verification endpoint configured, using host data only");
                None
            }
        };

        let collaborators = Collaborators {
            host,
            profiles: Arc::new(UserRepository::new(pool.clone())),
            orders: Arc::new(OrderRepository::new(pool)),
            verifier,
            session_storage: Arc::new(FileSessionStorage::new(config.session_file.clone())),
        };

        Self::from_parts(config, collaborators)
    }

    /// Assemble the state from explicit collaborators.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Session` if the persisted session cannot be read.
    pub fn from_parts(config: StorefrontConfig, parts: Collaborators) -> Result<Self, AppError> {
        let session = Arc::new(SessionStore::restore(parts.session_storage)?);

        let profiles = Arc::new(ProfileEngine::new(
            IdentityAdapter::new(parts.host),
            parts.verifier,
            ProfileStore::new(parts.profiles, config.profile_upsert_rpc.clone()),
            Arc::clone(&session),
            config.profile_cache_ttl,
        ));

        let orders = OrderPipeline::new(parts.orders, config.shipping_fee);

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                session,
                profiles,
                orders,
                cart: Mutex::new(Cart::new()),
            }),
        })
    }

    /// Get a reference to the storefront configuration.
    #[must_use]
    pub fn config(&self) -> &StorefrontConfig {
        &self.inner.config
    }

    /// Path of the durable session marker.
    #[must_use]
    pub fn session_file(&self) -> &Path {
        &self.inner.config.session_file
    }

    /// Get a reference to the session store.
    #[must_use]
    pub fn session(&self) -> &Arc<SessionStore> {
        &self.inner.session
    }

    /// Get a reference to the profile engine.
    #[must_use]
    pub fn profiles(&self) -> &Arc<ProfileEngine> {
        &self.inner.profiles
    }

    /// Get a reference to the order pipeline.
    #[must_use]
    pub fn orders(&self) -> &OrderPipeline {
        &self.inner.orders
    }

    /// Run `f` with exclusive access to the cart.
    ///
    /// `f` must not block; it runs under the cart lock.
    pub fn with_cart<R>(&self, f: impl FnOnce(&mut Cart) -> R) -> R {
        let mut cart = self
            .inner
            .cart
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut cart)
    }

    /// Copy of the current cart.
    #[must_use]
    pub fn cart(&self) -> Cart {
        self.with_cart(|cart| cart.clone())
    }

    /// Submit the selected cart lines (all lines when none are selected) as
    /// an order for the logged-in user.
    ///
    /// On success exactly the submitted quantities leave the cart, so lines
    /// added or bumped while the submission was in flight survive. On failure
    /// the cart is untouched.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Order` for any failed precondition or write.
    pub async fn checkout(&self, form: &ShippingForm) -> Result<Order, AppError> {
        let lines = self.with_cart(|cart| cart.checkout_lines());
        let user_id = self.inner.session.current_user();

        let order = self
            .inner
            .orders
            .submit(user_id.as_ref(), &lines, form)
            .await?;

        self.with_cart(|cart| cart.remove_submitted(&lines));
        crate::error::add_breadcrumb("checkout", format!("order {} submitted", order.order_number));
        Ok(order)
    }

    /// Ask for cancellation of an order of the logged-in user.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Order` when logged out or the request is rejected.
    pub async fn request_cancellation(&self, order_id: OrderId, reason: &str) -> Result<(), AppError> {
        let user_id = self
            .inner
            .session
            .current_user()
            .ok_or(OrderError::NotAuthenticated)?;

        self.inner
            .orders
            .request_cancellation(order_id, &user_id, reason)
            .await?;
        Ok(())
    }

    /// The app returned to the foreground.
    pub fn resume(&self) {
        self.inner.session.notify_resumed();
    }
}
