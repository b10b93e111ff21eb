//! Session lifecycle per execution context.
//!
//! [`SessionManager`] owns one automation session per execution context (a
//! test, a scenario, a task). Contexts are named by [`ContextId`]; the
//! manager keeps an explicit table from context to session slot and is
//! passed to whoever needs it, so there is no hidden global state.
//!
//! # Lifecycle
//!
//! Each context moves through:
//!
//! ```text
//! Absent ──get_session──▶ Initializing ──ok──▶ Active ──quit_session──▶ Closed
//!                               │
//!                               └──all attempts failed──▶ Failed
//! ```
//!
//! - Initialization resolves the capability bundle, then tries to create the
//!   remote session up to [`SessionManagerConfig::max_attempts`] times with a
//!   fixed delay between attempts, and applies the implicit wait.
//! - `Failed` and `Closed` are terminal: the context never starts another
//!   session on its own. A new context starts fresh.
//! - Teardown is best-effort and never returns an error.
//!
//! # Example
//!
//! ```no_run
//! use mobdrive_core::config::ConfigSource;
//! use mobdrive_core::session::{ContextId, SessionManager};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = SessionManager::with_webdriver(ConfigSource::load())?;
//! let ctx = ContextId::named("login-scenario");
//!
//! let session = manager.get_session(&ctx).await?;
//! println!("session {} on {}", session.id(), session.platform());
//!
//! manager.quit_session(&ctx).await;
//! # Ok(())
//! # }
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::capabilities::{self, CapabilityBundle, ConfigurationError, PlatformKind};
use crate::config::ConfigSource;
use crate::driver::{DriverError, RemoteDriver, SessionEndpoint, SessionId};
use crate::wait::WaitPolicy;
use crate::webdriver::WebDriverClient;

// ---------------------------------------------------------------------------
// Identifiers and state
// ---------------------------------------------------------------------------

/// Identifier of one execution context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(String);

impl ContextId {
    /// A fresh, unique context id.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// A context id with a caller-chosen name (e.g. a scenario name).
    pub fn named(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Observable state of a context's session slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Absent,
    Initializing,
    Active,
    Failed,
    Closed,
}

/// Errors raised by [`SessionManager`].
#[derive(Error, Debug)]
pub enum SessionError {
    /// Configuration could not be resolved; no attempt was made.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// Every creation attempt failed.
    #[error("Failed to initialize session for context '{context}' after {attempts} attempts")]
    InitFailed {
        context: ContextId,
        attempts: u32,
        /// The error of the last attempt.
        #[source]
        source: DriverError,
    },

    /// Initialization already failed for this context.
    #[error("Session initialization already failed for context '{context}': {reason}")]
    ContextFailed { context: ContextId, reason: String },

    /// The context's session was quit; the context cannot start another one.
    #[error("Context '{0}' is closed")]
    ContextClosed(ContextId),
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// A live connection to the automation server, owned by one context.
pub struct Session {
    endpoint: SessionEndpoint,
    context: ContextId,
    platform: PlatformKind,
    capabilities: Arc<CapabilityBundle>,
    default_wait: WaitPolicy,
    implicit_wait: Duration,
    created_at: DateTime<Utc>,
    driver: Arc<dyn RemoteDriver>,
}

impl Session {
    pub fn id(&self) -> &SessionId {
        &self.endpoint.id
    }

    pub fn endpoint(&self) -> &SessionEndpoint {
        &self.endpoint
    }

    pub fn server(&self) -> &Url {
        &self.endpoint.server
    }

    /// The context that owns this session.
    pub fn context(&self) -> &ContextId {
        &self.context
    }

    pub fn platform(&self) -> PlatformKind {
        self.platform
    }

    /// The capabilities the session was created with.
    pub fn capabilities(&self) -> &Arc<CapabilityBundle> {
        &self.capabilities
    }

    /// Wait policy for interactions that do not specify one.
    pub fn default_wait(&self) -> WaitPolicy {
        self.default_wait
    }

    /// The implicit wait configured on the server side.
    pub fn implicit_wait(&self) -> Duration {
        self.implicit_wait
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn driver(&self) -> &Arc<dyn RemoteDriver> {
        &self.driver
    }

    /// Capture a PNG screenshot of the device.
    pub async fn screenshot(&self) -> Result<Vec<u8>, DriverError> {
        self.driver.screenshot(&self.endpoint).await
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.endpoint.id)
            .field("server", &self.endpoint.server.as_str())
            .field("context", &self.context)
            .field("platform", &self.platform)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tunables for session creation.
#[derive(Debug, Clone)]
pub struct SessionManagerConfig {
    /// Total number of creation attempts (not retries).
    pub max_attempts: u32,
    /// Fixed delay between two attempts.
    pub retry_delay: Duration,
    /// Implicit wait applied to every new session.
    pub implicit_wait: Duration,
    /// Default wait policy handed to sessions.
    pub default_wait: WaitPolicy,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_secs(1),
            implicit_wait: Duration::from_secs(10),
            default_wait: WaitPolicy::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// SessionManager
// ---------------------------------------------------------------------------

enum SlotState {
    Absent,
    Initializing,
    Active(Arc<Session>),
    Failed(String),
    Closed,
}

impl SlotState {
    fn public(&self) -> SessionState {
        match self {
            SlotState::Absent => SessionState::Absent,
            SlotState::Initializing => SessionState::Initializing,
            SlotState::Active(_) => SessionState::Active,
            SlotState::Failed(_) => SessionState::Failed,
            SlotState::Closed => SessionState::Closed,
        }
    }
}

/// One context's slot. `gate` serialises lifecycle transitions for the
/// context; `state` is readable at any time.
struct ContextSlot {
    gate: Mutex<()>,
    state: StdMutex<SlotState>,
}

impl ContextSlot {
    fn new() -> Self {
        Self::with_state(SlotState::Absent)
    }

    fn closed() -> Self {
        Self::with_state(SlotState::Closed)
    }

    fn with_state(state: SlotState) -> Self {
        Self {
            gate: Mutex::new(()),
            state: StdMutex::new(state),
        }
    }

    fn state(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set(&self, state: SlotState) {
        *self.state() = state;
    }
}

/// Live slots plus the ids of contexts that were quit.
///
/// A quit context gives up its slot and keeps only its id, so that it stays
/// closed without holding on to per-context state.
#[derive(Default)]
struct ContextTable {
    slots: HashMap<ContextId, Arc<ContextSlot>>,
    closed: HashSet<ContextId>,
}

/// Creates, caches and destroys one session per execution context.
///
/// Closed contexts are remembered by id for the life of the manager. Failed
/// contexts keep their slot (and failure reason) until they are quit.
pub struct SessionManager {
    config: ConfigSource,
    driver: Arc<dyn RemoteDriver>,
    settings: SessionManagerConfig,
    contexts: StdMutex<ContextTable>,
}

impl SessionManager {
    /// Create a manager with default settings.
    pub fn new(config: ConfigSource, driver: Arc<dyn RemoteDriver>) -> Self {
        Self::with_settings(config, driver, SessionManagerConfig::default())
    }

    pub fn with_settings(
        config: ConfigSource,
        driver: Arc<dyn RemoteDriver>,
        settings: SessionManagerConfig,
    ) -> Self {
        Self {
            config,
            driver,
            settings,
            contexts: StdMutex::new(ContextTable::default()),
        }
    }

    /// Convenience constructor: a manager backed by a [`WebDriverClient`].
    pub fn with_webdriver(config: ConfigSource) -> Result<Self, DriverError> {
        Ok(Self::new(config, Arc::new(WebDriverClient::new()?)))
    }

    pub fn config(&self) -> &ConfigSource {
        &self.config
    }

    pub fn settings(&self) -> &SessionManagerConfig {
        &self.settings
    }

    fn contexts(&self) -> MutexGuard<'_, ContextTable> {
        self.contexts.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The context's slot, created on first use. A closed context gets a
    /// detached slot that is already closed.
    fn slot(&self, ctx: &ContextId) -> Arc<ContextSlot> {
        let mut contexts = self.contexts();
        if contexts.closed.contains(ctx) {
            return Arc::new(ContextSlot::closed());
        }
        contexts
            .slots
            .entry(ctx.clone())
            .or_insert_with(|| Arc::new(ContextSlot::new()))
            .clone()
    }

    fn existing_slot(&self, ctx: &ContextId) -> Option<Arc<ContextSlot>> {
        let contexts = self.contexts();
        if contexts.closed.contains(ctx) {
            return Some(Arc::new(ContextSlot::closed()));
        }
        contexts.slots.get(ctx).cloned()
    }

    /// Drop the context's slot and remember it as closed.
    fn retire(&self, ctx: &ContextId) {
        let mut contexts = self.contexts();
        contexts.slots.remove(ctx);
        contexts.closed.insert(ctx.clone());
    }

    /// The current state of `ctx`.
    pub fn state(&self, ctx: &ContextId) -> SessionState {
        self.existing_slot(ctx)
            .map(|slot| slot.state().public())
            .unwrap_or(SessionState::Absent)
    }

    /// Contexts that currently hold an active session.
    pub fn active_contexts(&self) -> Vec<ContextId> {
        let mut contexts: Vec<ContextId> = self
            .contexts()
            .slots
            .iter()
            .filter(|(_, slot)| matches!(*slot.state(), SlotState::Active(_)))
            .map(|(ctx, _)| ctx.clone())
            .collect();
        contexts.sort();
        contexts
    }

    /// Return the context's session, creating it on first use.
    ///
    /// Repeated calls return the same `Arc<Session>` until
    /// [`quit_session`](Self::quit_session). Concurrent calls for one context
    /// wait for a single initialization.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Configuration`] / [`SessionError::InitFailed`] if initialization fails
    /// - [`SessionError::ContextFailed`] if an earlier initialization failed
    /// - [`SessionError::ContextClosed`] if the context was quit
    pub async fn get_session(&self, ctx: &ContextId) -> Result<Arc<Session>, SessionError> {
        self.initialize_session(ctx).await
    }

    /// Start the context's session now (e.g. from a setup hook).
    ///
    /// If the context already has an active session it is returned as is; a
    /// context never holds two sessions.
    pub async fn initialize_session(&self, ctx: &ContextId) -> Result<Arc<Session>, SessionError> {
        let slot = self.slot(ctx);
        let _gate = slot.gate.lock().await;

        {
            let state = slot.state();
            match &*state {
                SlotState::Active(session) => return Ok(session.clone()),
                SlotState::Failed(reason) => {
                    return Err(SessionError::ContextFailed {
                        context: ctx.clone(),
                        reason: reason.clone(),
                    })
                }
                SlotState::Closed => return Err(SessionError::ContextClosed(ctx.clone())),
                SlotState::Absent | SlotState::Initializing => {}
            }
        }

        self.start(ctx, &slot).await
    }

    /// Quit the context's session.
    ///
    /// Remote destruction is best-effort: failures are logged and swallowed.
    /// The context always ends up closed. Without a session this is a no-op.
    pub async fn quit_session(&self, ctx: &ContextId) {
        let Some(slot) = self.existing_slot(ctx) else {
            return;
        };
        let _gate = slot.gate.lock().await;

        let previous = std::mem::replace(&mut *slot.state(), SlotState::Closed);
        match previous {
            SlotState::Active(session) => {
                self.destroy(&session).await;
                info!(context = %ctx, session = %session.id(), "session closed");
                self.retire(ctx);
            }
            SlotState::Absent => slot.set(SlotState::Absent),
            SlotState::Failed(_) | SlotState::Initializing => {
                debug!(context = %ctx, "context closed without an active session");
                self.retire(ctx);
            }
            SlotState::Closed => {}
        }
    }

    /// Quit every active session (process teardown).
    pub async fn quit_all(&self) {
        for ctx in self.active_contexts() {
            self.quit_session(&ctx).await;
        }
    }

    /// Discard a corrupted session and start a new one in the same context.
    ///
    /// The old session is deleted best-effort first.
    pub async fn replace_session(&self, ctx: &ContextId) -> Result<Arc<Session>, SessionError> {
        let slot = self.slot(ctx);
        let _gate = slot.gate.lock().await;

        let previous = std::mem::replace(&mut *slot.state(), SlotState::Absent);
        match previous {
            SlotState::Active(old) => {
                warn!(context = %ctx, session = %old.id(), "replacing session");
                self.destroy(&old).await;
            }
            SlotState::Closed => {
                slot.set(SlotState::Closed);
                return Err(SessionError::ContextClosed(ctx.clone()));
            }
            SlotState::Absent | SlotState::Initializing | SlotState::Failed(_) => {}
        }

        self.start(ctx, &slot).await
    }

    /// Run `f` with the context's session, then always quit the session.
    ///
    /// The session is quit whether `f` succeeds or fails, and also when the
    /// session could not be started.
    pub async fn scoped<F, Fut, T, E>(&self, ctx: &ContextId, f: F) -> Result<T, E>
    where
        F: FnOnce(Arc<Session>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<SessionError>,
    {
        let result = match self.get_session(ctx).await {
            Ok(session) => f(session).await,
            Err(e) => Err(E::from(e)),
        };
        self.quit_session(ctx).await;
        result
    }

    /// Initialize into `slot`. The caller holds the slot's gate.
    async fn start(&self, ctx: &ContextId, slot: &ContextSlot) -> Result<Arc<Session>, SessionError> {
        slot.set(SlotState::Initializing);
        let span = info_span!("initialize_session", context = %ctx);
        match self.connect_with_retry(ctx).instrument(span).await {
            Ok(session) => {
                let session = Arc::new(session);
                slot.set(SlotState::Active(session.clone()));
                Ok(session)
            }
            Err(e) => {
                slot.set(SlotState::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    async fn connect_with_retry(&self, ctx: &ContextId) -> Result<Session, SessionError> {
        let platform = capabilities::resolve_platform(&self.config)?;
        let bundle = Arc::new(capabilities::resolve(platform, &self.config)?);
        let server = capabilities::server_url(platform, &self.config)?;
        let max_attempts = self.settings.max_attempts.max(1);

        let mut last_error = None;
        for attempt in 1..=max_attempts {
            match self.try_create(&server, &bundle).await {
                Ok(endpoint) => {
                    info!(
                        session = %endpoint.id,
                        %server,
                        %platform,
                        attempt,
                        "session created"
                    );
                    return Ok(Session {
                        endpoint,
                        context: ctx.clone(),
                        platform,
                        capabilities: bundle,
                        default_wait: self.settings.default_wait,
                        implicit_wait: self.settings.implicit_wait,
                        created_at: Utc::now(),
                        driver: self.driver.clone(),
                    });
                }
                Err(e) => {
                    warn!(attempt, max_attempts, error = %e, "failed to initialize session");
                    last_error = Some(e);
                    if attempt < max_attempts {
                        tokio::time::sleep(self.settings.retry_delay).await;
                    }
                }
            }
        }

        Err(SessionError::InitFailed {
            context: ctx.clone(),
            attempts: max_attempts,
            source: last_error.unwrap_or(DriverError::Timeout),
        })
    }

    /// One creation attempt: create the session, then apply the implicit wait.
    async fn try_create(&self, server: &Url, bundle: &CapabilityBundle) -> Result<SessionEndpoint, DriverError> {
        let endpoint = self.driver.create_session(server, bundle).await?;
        if let Err(e) = self
            .driver
            .set_implicit_wait(&endpoint, self.settings.implicit_wait)
            .await
        {
            // Do not leak a half-configured session on the server.
            if let Err(cleanup) = self.driver.delete_session(&endpoint).await {
                debug!(session = %endpoint.id, error = %cleanup, "cleanup of half-configured session failed");
            }
            return Err(e);
        }
        Ok(endpoint)
    }

    async fn destroy(&self, session: &Session) {
        if let Err(e) = self.driver.delete_session(session.endpoint()).await {
            warn!(session = %session.id(), error = %e, "failed to delete session, ignoring");
        }
    }
}
