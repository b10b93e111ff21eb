//! Screen objects by composition.
//!
//! A screen object (login screen, product list, ...) holds a
//! [`ScreenContext`] and implements [`Screen`] by returning it from
//! [`Screen::context`]. Every other method has a default implementation that
//! locates the element through the [`LocatorResolver`] and acts on it through
//! the [`InteractionGuard`].
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use mobdrive_core::locator::LocatorSpec;
//! use mobdrive_core::screen::{Screen, ScreenContext};
//! use mobdrive_core::session::Session;
//!
//! struct LoginScreen {
//!     ctx: ScreenContext,
//! }
//!
//! impl Screen for LoginScreen {
//!     fn context(&self) -> &ScreenContext {
//!         &self.ctx
//!     }
//! }
//!
//! impl LoginScreen {
//!     async fn login(&self, user: &str, password: &str) -> mobdrive_core::Result<()> {
//!         self.input(&LocatorSpec::accessibility_id("test-Username"), user).await?;
//!         self.input(&LocatorSpec::accessibility_id("test-Password"), password).await?;
//!         self.click(&LocatorSpec::accessibility_id("test-LOGIN")).await
//!     }
//! }
//!
//! # async fn example(session: Arc<Session>) -> mobdrive_core::Result<()> {
//! let screen = LoginScreen { ctx: ScreenContext::new(session) };
//! screen.login("standard_user", "secret_sauce").await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::element::ElementHandle;
use crate::error::Result;
use crate::interaction::InteractionGuard;
use crate::locator::{LocatorResolver, LocatorSpec};
use crate::session::Session;
use crate::wait::WaitPolicy;

/// Everything a screen needs to act on one session.
#[derive(Debug, Clone)]
pub struct ScreenContext {
    session: Arc<Session>,
    resolver: LocatorResolver,
    guard: InteractionGuard,
    /// Budget for presence and absence checks.
    short_wait: WaitPolicy,
}

impl ScreenContext {
    /// A context using the session's default wait policy.
    pub fn new(session: Arc<Session>) -> Self {
        let wait = session.default_wait();
        let platform = session.platform();
        Self {
            session,
            resolver: LocatorResolver::new(wait),
            guard: InteractionGuard::for_platform(wait, platform),
            short_wait: WaitPolicy::short(),
        }
    }

    pub fn with_resolver(mut self, resolver: LocatorResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_guard(mut self, guard: InteractionGuard) -> Self {
        self.guard = guard;
        self
    }

    pub fn with_short_wait(mut self, short_wait: WaitPolicy) -> Self {
        self.short_wait = short_wait;
        self
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn resolver(&self) -> &LocatorResolver {
        &self.resolver
    }

    pub fn guard(&self) -> &InteractionGuard {
        &self.guard
    }

    pub fn short_wait(&self) -> &WaitPolicy {
        &self.short_wait
    }
}

/// Locator-level interactions shared by all screen objects.
#[async_trait]
pub trait Screen: Send + Sync {
    fn context(&self) -> &ScreenContext;

    /// Find the element under the default wait policy.
    async fn locate(&self, spec: &LocatorSpec) -> Result<ElementHandle> {
        let ctx = self.context();
        Ok(ctx.resolver.find(&ctx.session, spec).await?)
    }

    async fn click(&self, spec: &LocatorSpec) -> Result<()> {
        let handle = self.locate(spec).await?;
        let ctx = self.context();
        Ok(ctx.guard.click(&ctx.session, &handle).await?)
    }

    async fn input(&self, spec: &LocatorSpec, text: &str) -> Result<()> {
        let handle = self.locate(spec).await?;
        let ctx = self.context();
        Ok(ctx.guard.input(&ctx.session, &handle, text).await?)
    }

    async fn read_text(&self, spec: &LocatorSpec) -> Result<String> {
        let handle = self.locate(spec).await?;
        let ctx = self.context();
        Ok(ctx.guard.read_text(&ctx.session, &handle).await?)
    }

    /// Whether the element shows up within the short wait. Never fails.
    async fn is_displayed(&self, spec: &LocatorSpec) -> bool {
        let ctx = self.context();
        match ctx.resolver.locate(&ctx.session, spec, &ctx.short_wait).await {
            Ok(handle) => ctx.guard.is_displayed(&ctx.session, &handle).await,
            Err(e) => {
                debug!(%spec, error = %e, "element not displayed");
                false
            }
        }
    }

    /// Wait, under the short wait, until no step of `spec` finds a displayed element.
    async fn wait_for_disappearance(&self, spec: &LocatorSpec) -> Result<()> {
        let ctx = self.context();
        Ok(ctx
            .guard
            .wait_for_disappearance(&ctx.session, spec, &ctx.short_wait)
            .await?)
    }
}

impl Screen for ScreenContext {
    fn context(&self) -> &ScreenContext {
        self
    }
}
