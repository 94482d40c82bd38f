//! Process-wide session state.
//!
//! [`SessionStore`] owns the logged-in marker and the remembered user id,
//! persists them through a [`SessionStorage`], and publishes every change on
//! a `watch` channel (current state) and a `broadcast` bus ([`StoreEvent`]).
//!
//! # Staleness
//!
//! Every state mutation bumps a generation counter. Asynchronous work that
//! wants to apply a result later takes a [`SessionTicket`] first and may only
//! apply it while the generation is unchanged. Logout always bumps the
//! generation, so it wins over any in-flight login or refresh.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, watch};

use zalo_shop_core::UserId;

/// Capacity of the event bus before slow subscribers start lagging.
const EVENT_CAPACITY: usize = 64;

/// Session errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Reading or writing the session file failed.
    #[error("session storage error: {0}")]
    Io(#[from] std::io::Error),

    /// The session file is not valid JSON.
    #[error("session storage corrupted: {0}")]
    Corrupted(#[from] serde_json::Error),

    /// The session changed (e.g. logout) while the operation was in flight.
    #[error("session changed while the operation was in flight")]
    Superseded,

    /// A login was started while already logged in.
    #[error("already authenticated")]
    AlreadyAuthenticated,
}

/// Observable session state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Anonymous,
    Authenticating,
    Authenticated { user_id: UserId },
    /// The last login attempt failed; retrying is allowed.
    Failed { cause: String },
}

impl SessionState {
    /// The logged-in user, if any.
    #[must_use]
    pub const fn user_id(&self) -> Option<&UserId> {
        match self {
            Self::Authenticated { user_id } => Some(user_id),
            _ => None,
        }
    }
}

/// Typed in-process notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// The session state changed.
    SessionChanged(SessionState),
    /// A profile was edited out of band; interested parties should refresh.
    ProfileUpdated { user_id: UserId },
    /// The host surface became visible again after being backgrounded.
    Resumed,
}

/// What survives a process restart.
///
/// `logged_in` implies `user_id` is present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSession {
    pub logged_in: bool,
    pub user_id: Option<UserId>,
}

/// Durable local storage for the session marker.
pub trait SessionStorage: Send + Sync {
    /// Load the stored session; a missing record is the default session.
    ///
    /// # Errors
    ///
    /// Returns `SessionError` if the storage cannot be read or parsed.
    fn load(&self) -> Result<PersistedSession, SessionError>;

    /// Replace the stored session.
    ///
    /// # Errors
    ///
    /// Returns `SessionError` if the storage cannot be written.
    fn save(&self, session: &PersistedSession) -> Result<(), SessionError>;
}

/// Session stored as a JSON file.
#[derive(Debug, Clone)]
pub struct FileSessionStorage {
    path: PathBuf,
}

impl FileSessionStorage {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SessionStorage for FileSessionStorage {
    fn load(&self) -> Result<PersistedSession, SessionError> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(PersistedSession::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, session: &PersistedSession) -> Result<(), SessionError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // Write then rename so a crash never leaves a truncated file
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec(session)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Session kept in memory only.
#[derive(Debug, Default)]
pub struct MemorySessionStorage {
    session: Mutex<PersistedSession>,
}

impl MemorySessionStorage {
    /// Storage pre-loaded with `session`.
    #[must_use]
    pub fn with(session: PersistedSession) -> Self {
        Self {
            session: Mutex::new(session),
        }
    }
}

impl SessionStorage for MemorySessionStorage {
    fn load(&self) -> Result<PersistedSession, SessionError> {
        Ok(lock(&self.session).clone())
    }

    fn save(&self, session: &PersistedSession) -> Result<(), SessionError> {
        *lock(&self.session) = session.clone();
        Ok(())
    }
}

/// Proof of the session generation an operation started under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct SessionTicket {
    generation: u64,
}

struct Inner {
    generation: u64,
    remembered: Option<UserId>,
}

/// The single session store of the process.
pub struct SessionStore {
    inner: Mutex<Inner>,
    state: watch::Sender<SessionState>,
    events: broadcast::Sender<StoreEvent>,
    storage: Arc<dyn SessionStorage>,
}

impl SessionStore {
    /// Restore the session persisted in `storage`.
    ///
    /// A stored `logged_in` without a user id violates the session invariant
    /// and restores as anonymous.
    ///
    /// # Errors
    ///
    /// Returns `SessionError` if the storage cannot be read.
    pub fn restore(storage: Arc<dyn SessionStorage>) -> Result<Self, SessionError> {
        let persisted = storage.load()?;

        let state = match (&persisted.user_id, persisted.logged_in) {
            (Some(user_id), true) => SessionState::Authenticated {
                user_id: user_id.clone(),
            },
            (None, true) => {
                tracing::warn!("Stored session is logged in without a user id, ignoring");
                SessionState::Anonymous
            }
            (_, false) => SessionState::Anonymous,
        };
        tracing::debug!(?state, "Session restored");

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            inner: Mutex::new(Inner {
                generation: 0,
                remembered: persisted.user_id,
            }),
            state: watch::Sender::new(state),
            events,
            storage,
        })
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// The logged-in user, if any.
    #[must_use]
    pub fn current_user(&self) -> Option<UserId> {
        self.state.borrow().user_id().cloned()
    }

    /// The last user id seen on this device, logged in or not.
    #[must_use]
    pub fn remembered_user(&self) -> Option<UserId> {
        lock(&self.inner).remembered.clone()
    }

    /// Watch the current state.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Subscribe to the event bus.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: StoreEvent) {
        let _ = self.events.send(event);
    }

    /// Announce that the host surface is visible again.
    pub fn notify_resumed(&self) {
        self.publish(StoreEvent::Resumed);
    }

    /// Announce an out-of-band profile edit.
    pub fn notify_profile_updated(&self, user_id: UserId) {
        self.publish(StoreEvent::ProfileUpdated { user_id });
    }

    /// Ticket for the current generation.
    pub fn ticket(&self) -> SessionTicket {
        SessionTicket {
            generation: lock(&self.inner).generation,
        }
    }

    /// Whether nothing changed the session since `ticket` was taken.
    #[must_use]
    pub fn is_current(&self, ticket: SessionTicket) -> bool {
        lock(&self.inner).generation == ticket.generation
    }

    /// Start a login attempt: `anonymous`/`failed` → `authenticating`.
    ///
    /// A second concurrent attempt supersedes the first.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::AlreadyAuthenticated` when logged in.
    pub fn begin_login(&self) -> Result<SessionTicket, SessionError> {
        let mut inner = lock(&self.inner);
        if self.state.borrow().user_id().is_some() {
            return Err(SessionError::AlreadyAuthenticated);
        }

        inner.generation += 1;
        self.set_state(SessionState::Authenticating);
        Ok(SessionTicket {
            generation: inner.generation,
        })
    }

    /// Finish a login: persist the marker and flip to `authenticated`.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Superseded` if the session changed since
    /// `ticket` was taken, or a storage error if the marker could not be
    /// persisted (the state then stays unauthenticated).
    pub fn complete_login(&self, ticket: SessionTicket, user_id: &UserId) -> Result<(), SessionError> {
        let mut inner = lock(&self.inner);
        if inner.generation != ticket.generation {
            return Err(SessionError::Superseded);
        }

        self.storage.save(&PersistedSession {
            logged_in: true,
            user_id: Some(user_id.clone()),
        })?;

        inner.generation += 1;
        inner.remembered = Some(user_id.clone());
        self.set_state(SessionState::Authenticated {
            user_id: user_id.clone(),
        });
        Ok(())
    }

    /// Record a failed login attempt: `authenticating` → `failed`.
    ///
    /// Ignored when the attempt was superseded.
    pub fn fail_login(&self, ticket: SessionTicket, cause: impl Into<String>) {
        let mut inner = lock(&self.inner);
        if inner.generation != ticket.generation {
            return;
        }
        inner.generation += 1;
        self.set_state(SessionState::Failed {
            cause: cause.into(),
        });
    }

    /// Log out: clear the local marker and remembered id, state `anonymous`.
    ///
    /// The remote profile is untouched. Always succeeds; a storage failure is
    /// logged. Returns the user that was logged in.
    pub fn logout(&self) -> Option<UserId> {
        let mut inner = lock(&self.inner);
        let previous = self.state.borrow().user_id().cloned();

        inner.generation += 1;
        inner.remembered = None;
        if let Err(e) = self.storage.save(&PersistedSession::default()) {
            tracing::warn!(error = %e, "Failed to clear stored session");
        }
        self.set_state(SessionState::Anonymous);
        previous
    }

    /// Publish a new state on both channels. Called with `inner` locked so
    /// observers see changes in mutation order.
    fn set_state(&self, state: SessionState) {
        self.state.send_replace(state.clone());
        self.publish(StoreEvent::SessionChanged(state));
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
