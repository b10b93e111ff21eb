//! Guarded element interactions.
//!
//! [`InteractionGuard`] wraps the raw element commands of a [`RemoteDriver`]
//! with readiness waits and, for clicks, a one-shot fallback:
//!
//! - `click` waits until the element is displayed and enabled, then clicks.
//!   If waiting or clicking fails, the click is retried once through a
//!   platform-specific script ([`ClickFallback`]).
//! - `input` and `read_text` wait until the element is displayed.
//! - `is_displayed` is a single probe that never fails.
//! - `wait_for_disappearance` polls until an element is gone or hidden.
//!
//! Handles are only valid in the session that produced them; every operation
//! rejects a handle from another session with
//! [`InteractionError::ForeignHandle`].
//!
//! [`RemoteDriver`]: crate::driver::RemoteDriver

use std::fmt;
use std::time::Duration;

use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::capabilities::PlatformKind;
use crate::driver::{DriverError, ElementId, SessionId};
use crate::element::ElementHandle;
use crate::locator::{LocatorResolver, LocatorSpec};
use crate::protocol;
use crate::session::Session;
use crate::wait::{poll_until, Probe, WaitError, WaitPolicy};

/// The interaction that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Click,
    Input,
    ReadText,
    WaitForDisappearance,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::Click => "click",
            Action::Input => "input",
            Action::ReadText => "read text",
            Action::WaitForDisappearance => "wait for disappearance",
        };
        f.write_str(name)
    }
}

/// Errors from [`InteractionGuard`].
#[derive(Error, Debug)]
pub enum InteractionError {
    /// The interaction (including any fallback) failed.
    #[error("{action} failed on {element}")]
    Failed {
        action: Action,
        /// Description of the element or locator.
        element: String,
        #[source]
        source: DriverError,
    },

    /// The target was still displayed when the wait ran out.
    #[error("{target} still displayed after {}ms", .timeout.as_millis())]
    Timeout {
        target: String,
        timeout: Duration,
        #[source]
        last_error: Option<DriverError>,
    },

    /// The handle was produced by another session.
    #[error("{element} belongs to session {owner}, not {session}")]
    ForeignHandle {
        element: String,
        owner: SessionId,
        session: SessionId,
    },
}

/// Script-level click used when a regular click fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickFallback {
    /// Appium's `mobile: clickGesture` extension, addressed by element id.
    ClickGesture,
    /// A script run with the element reference as `arguments[0]`.
    Script(String),
}

impl ClickFallback {
    pub const CLICK_GESTURE: &'static str = "mobile: clickGesture";
    pub const SCRIPT_CLICK: &'static str = "arguments[0].click();";

    /// The fallback that works on `platform`.
    pub fn for_platform(platform: PlatformKind) -> Self {
        match platform {
            PlatformKind::Android => ClickFallback::ClickGesture,
            PlatformKind::Ios => ClickFallback::Script(Self::SCRIPT_CLICK.to_string()),
        }
    }

    /// The script and arguments to execute for `element`.
    pub fn command(&self, element: &ElementId) -> (&str, Vec<Value>) {
        match self {
            ClickFallback::ClickGesture => (
                Self::CLICK_GESTURE,
                vec![json!({ "elementId": element.as_str() })],
            ),
            ClickFallback::Script(script) => (script.as_str(), vec![protocol::element_reference(element)]),
        }
    }
}

impl fmt::Display for ClickFallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClickFallback::ClickGesture => f.write_str(Self::CLICK_GESTURE),
            ClickFallback::Script(script) => write!(f, "script '{}'", script),
        }
    }
}

/// What [`InteractionGuard::wait_for_disappearance`] waits on.
#[derive(Debug, Clone, Copy)]
pub enum Target<'a> {
    /// Gone when no step of the chain finds a displayed element.
    Locator(&'a LocatorSpec),
    /// Gone when the handle is missing, stale or hidden.
    Handle(&'a ElementHandle),
}

impl<'a> From<&'a LocatorSpec> for Target<'a> {
    fn from(spec: &'a LocatorSpec) -> Self {
        Target::Locator(spec)
    }
}

impl<'a> From<&'a ElementHandle> for Target<'a> {
    fn from(handle: &'a ElementHandle) -> Self {
        Target::Handle(handle)
    }
}

impl fmt::Display for Target<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Locator(spec) => write!(f, "{}", spec),
            Target::Handle(handle) => write!(f, "{}", handle),
        }
    }
}

/// Performs element interactions with readiness waits.
#[derive(Debug, Clone, Default)]
pub struct InteractionGuard {
    policy: WaitPolicy,
    /// `None` picks the fallback from the session's platform.
    click_fallback: Option<ClickFallback>,
}

impl InteractionGuard {
    pub fn new(policy: WaitPolicy) -> Self {
        Self {
            policy,
            click_fallback: None,
        }
    }

    /// A guard with the click fallback for `platform`.
    pub fn for_platform(policy: WaitPolicy, platform: PlatformKind) -> Self {
        Self::new(policy).with_click_fallback(ClickFallback::for_platform(platform))
    }

    pub fn with_click_fallback(mut self, fallback: ClickFallback) -> Self {
        self.click_fallback = Some(fallback);
        self
    }

    pub fn policy(&self) -> &WaitPolicy {
        &self.policy
    }

    fn fallback_for(&self, session: &Session) -> ClickFallback {
        self.click_fallback
            .clone()
            .unwrap_or_else(|| ClickFallback::for_platform(session.platform()))
    }

    /// Click `handle`, falling back to a script click once if needed.
    ///
    /// # Errors
    ///
    /// [`InteractionError::Failed`] with [`Action::Click`] if the fallback
    /// fails too. The error carries the fallback's cause; the primary failure
    /// is logged.
    #[instrument(skip_all, fields(session = %session.id(), element = %handle))]
    pub async fn click(&self, session: &Session, handle: &ElementHandle) -> Result<(), InteractionError> {
        check_owner(session, handle)?;
        let driver = session.driver();
        let endpoint = session.endpoint();

        let primary = match self.wait_until_visible(session, handle, true).await {
            Ok(()) => driver.click(endpoint, handle.element_id()).await,
            Err(e) => Err(e),
        };
        let error = match primary {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        let fallback = self.fallback_for(session);
        warn!(error = %error, %fallback, "click failed, retrying with fallback");
        let (script, args) = fallback.command(handle.element_id());
        driver
            .execute_script(endpoint, script, args)
            .await
            .map(|_| ())
            .map_err(|source| InteractionError::Failed {
                action: Action::Click,
                element: handle.to_string(),
                source,
            })
    }

    /// Replace the element's content with `text`.
    #[instrument(skip_all, fields(session = %session.id(), element = %handle))]
    pub async fn input(&self, session: &Session, handle: &ElementHandle, text: &str) -> Result<(), InteractionError> {
        check_owner(session, handle)?;
        let driver = session.driver();
        let endpoint = session.endpoint();

        let result = async {
            self.wait_until_visible(session, handle, false).await?;
            driver.clear(endpoint, handle.element_id()).await?;
            driver.send_keys(endpoint, handle.element_id(), text).await
        }
        .await;

        result.map_err(|source| InteractionError::Failed {
            action: Action::Input,
            element: handle.to_string(),
            source,
        })
    }

    /// The element's visible text.
    #[instrument(skip_all, fields(session = %session.id(), element = %handle))]
    pub async fn read_text(&self, session: &Session, handle: &ElementHandle) -> Result<String, InteractionError> {
        check_owner(session, handle)?;
        let result = async {
            self.wait_until_visible(session, handle, false).await?;
            session.driver().text(session.endpoint(), handle.element_id()).await
        }
        .await;

        result.map_err(|source| InteractionError::Failed {
            action: Action::ReadText,
            element: handle.to_string(),
            source,
        })
    }

    /// Whether the element is displayed right now.
    ///
    /// Any failure (missing, stale, lost session, foreign handle) reads as
    /// `false`.
    pub async fn is_displayed(&self, session: &Session, handle: &ElementHandle) -> bool {
        if !handle.belongs_to(session.id()) {
            return false;
        }
        match session.driver().is_displayed(session.endpoint(), handle.element_id()).await {
            Ok(displayed) => displayed,
            Err(e) => {
                debug!(element = %handle, error = %e, "visibility probe failed");
                false
            }
        }
    }

    /// Wait until `target` is absent or hidden.
    ///
    /// # Errors
    ///
    /// - [`InteractionError::Timeout`] if it is still displayed after `policy.timeout`
    /// - [`InteractionError::Failed`] if the session was lost
    /// - [`InteractionError::ForeignHandle`] for a handle from another session
    #[instrument(skip_all, fields(session = %session.id()))]
    pub async fn wait_for_disappearance<'a>(
        &self,
        session: &Session,
        target: impl Into<Target<'a>>,
        policy: &WaitPolicy,
    ) -> Result<(), InteractionError> {
        let target = target.into();
        let driver = session.driver();
        let endpoint = session.endpoint();
        let resolver = LocatorResolver::new(*policy);

        if let Target::Handle(handle) = target {
            check_owner(session, handle)?;
        }

        let outcome = poll_until(policy, || async {
            match target {
                Target::Locator(spec) => match resolver.find_displayed(session, spec).await {
                    Ok(None) => Probe::Ready(()),
                    Ok(Some(_)) => Probe::Pending(None),
                    Err(e) if e.is_session_lost() => Probe::Abort(e),
                    Err(e) => Probe::Pending(Some(e)),
                },
                Target::Handle(handle) => match driver.is_displayed(endpoint, handle.element_id()).await {
                    Ok(false) => Probe::Ready(()),
                    Err(e) if e.is_element_missing() => Probe::Ready(()),
                    Ok(true) => Probe::Pending(None),
                    Err(e) if e.is_session_lost() => Probe::Abort(e),
                    Err(e) => Probe::Pending(Some(e)),
                },
            }
        })
        .await;

        match outcome {
            Ok(()) => Ok(()),
            Err(WaitError::Aborted(source)) => Err(InteractionError::Failed {
                action: Action::WaitForDisappearance,
                element: target.to_string(),
                source,
            }),
            Err(WaitError::TimedOut { last_error }) => Err(InteractionError::Timeout {
                target: target.to_string(),
                timeout: policy.timeout,
                last_error,
            }),
        }
    }

    /// Poll until the element is displayed (and enabled, if asked).
    ///
    /// A missing or stale element, or a lost session, stops the wait at once.
    async fn wait_until_visible(
        &self,
        session: &Session,
        handle: &ElementHandle,
        require_enabled: bool,
    ) -> Result<(), DriverError> {
        let driver = session.driver();
        let endpoint = session.endpoint();
        let element = handle.element_id();

        let outcome = poll_until(&self.policy, || async {
            match driver.is_displayed(endpoint, element).await {
                Ok(true) => {}
                Ok(false) => return Probe::Pending(None),
                Err(e) if e.is_element_missing() || e.is_session_lost() => return Probe::Abort(e),
                Err(e) => return Probe::Pending(Some(e)),
            }
            if !require_enabled {
                return Probe::Ready(());
            }
            match driver.is_enabled(endpoint, element).await {
                Ok(true) => Probe::Ready(()),
                Ok(false) => Probe::Pending(None),
                Err(e) if e.is_element_missing() || e.is_session_lost() => Probe::Abort(e),
                Err(e) => Probe::Pending(Some(e)),
            }
        })
        .await;

        outcome.map_err(|e| match e {
            WaitError::Aborted(e) => e,
            WaitError::TimedOut { last_error } => last_error.unwrap_or(DriverError::Timeout),
        })
    }
}

fn check_owner(session: &Session, handle: &ElementHandle) -> Result<(), InteractionError> {
    if handle.belongs_to(session.id()) {
        Ok(())
    } else {
        Err(InteractionError::ForeignHandle {
            element: handle.to_string(),
            owner: handle.session_id().clone(),
            session: session.id().clone(),
        })
    }
}
