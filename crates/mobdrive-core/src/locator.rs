//! Element lookup through ordered fallback strategies.
//!
//! A single "find by identifier" call is unreliable across platform UI trees:
//! Android exposes accessibility ids as `content-desc`, iOS as `name`, and
//! the native accessibility-id lookup does not always agree with either.
//! Lookups are therefore described by a [`LocatorSpec`], an ordered chain of
//! strategies, and resolved by [`LocatorResolver::locate`], which tries each
//! strategy under its own wait budget before moving on to the next one.
//!
//! # Example
//!
//! ```no_run
//! use mobdrive_core::locator::{LocatorResolver, LocatorSpec, LocatorStrategy};
//! use mobdrive_core::session::Session;
//! use mobdrive_core::wait::WaitPolicy;
//!
//! # async fn example(session: &Session) -> Result<(), Box<dyn std::error::Error>> {
//! // XPath over content-desc/name first, then the native accessibility id.
//! let login = LocatorSpec::accessibility_id("test-LOGIN");
//!
//! // An explicit chain.
//! let error = LocatorSpec::xpath("//*[@content-desc='test-Error message']/android.widget.TextView")
//!     .or(LocatorStrategy::IosPredicate, "name == 'test-Error message'");
//!
//! let resolver = LocatorResolver::default();
//! let handle = resolver.locate(session, &login, &WaitPolicy::default()).await?;
//! # let _ = (handle, error);
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::driver::DriverError;
use crate::element::ElementHandle;
use crate::session::Session;
use crate::wait::{poll_until, Probe, WaitError, WaitPolicy};

/// Lookup strategies understood by Appium.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LocatorStrategy {
    AccessibilityId,
    Id,
    #[serde(rename = "xpath")]
    XPath,
    ClassName,
    AndroidUiAutomator,
    IosPredicate,
    IosClassChain,
}

impl LocatorStrategy {
    /// The `using` value sent to the server.
    pub fn using(&self) -> &'static str {
        match self {
            LocatorStrategy::AccessibilityId => "accessibility id",
            LocatorStrategy::Id => "id",
            LocatorStrategy::XPath => "xpath",
            LocatorStrategy::ClassName => "class name",
            LocatorStrategy::AndroidUiAutomator => "-android uiautomator",
            LocatorStrategy::IosPredicate => "-ios predicate string",
            LocatorStrategy::IosClassChain => "-ios class chain",
        }
    }
}

impl fmt::Display for LocatorStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.using())
    }
}

impl FromStr for LocatorStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['_', ' '], "-").as_str() {
            "accessibility-id" => Ok(LocatorStrategy::AccessibilityId),
            "id" => Ok(LocatorStrategy::Id),
            "xpath" => Ok(LocatorStrategy::XPath),
            "class-name" => Ok(LocatorStrategy::ClassName),
            "android-uiautomator" | "-android-uiautomator" => Ok(LocatorStrategy::AndroidUiAutomator),
            "ios-predicate" | "-ios-predicate-string" => Ok(LocatorStrategy::IosPredicate),
            "ios-class-chain" | "-ios-class-chain" => Ok(LocatorStrategy::IosClassChain),
            other => Err(format!("unknown locator strategy '{}'", other)),
        }
    }
}

/// One strategy/value pair in a [`LocatorSpec`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocatorStep {
    pub strategy: LocatorStrategy,
    pub value: String,
}

impl fmt::Display for LocatorStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}'", self.strategy, self.value)
    }
}

/// Ordered, non-empty chain of lookup strategies for one element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<LocatorStep>", into = "Vec<LocatorStep>")]
pub struct LocatorSpec {
    steps: Vec<LocatorStep>,
}

impl LocatorSpec {
    /// A chain with a single strategy.
    pub fn new(strategy: LocatorStrategy, value: impl Into<String>) -> Self {
        Self {
            steps: vec![LocatorStep {
                strategy,
                value: value.into(),
            }],
        }
    }

    /// Composite accessibility lookup: an XPath matching either
    /// `@content-desc` or `@name`, then the native accessibility-id strategy.
    pub fn accessibility_id(id: &str) -> Self {
        let literal = xpath_literal(id);
        Self::xpath(format!("//*[@content-desc={literal} or @name={literal}]"))
            .or(LocatorStrategy::AccessibilityId, id)
    }

    pub fn xpath(expression: impl Into<String>) -> Self {
        Self::new(LocatorStrategy::XPath, expression)
    }

    pub fn id(id: impl Into<String>) -> Self {
        Self::new(LocatorStrategy::Id, id)
    }

    pub fn class_name(name: impl Into<String>) -> Self {
        Self::new(LocatorStrategy::ClassName, name)
    }

    pub fn android_uiautomator(selector: impl Into<String>) -> Self {
        Self::new(LocatorStrategy::AndroidUiAutomator, selector)
    }

    pub fn ios_predicate(predicate: impl Into<String>) -> Self {
        Self::new(LocatorStrategy::IosPredicate, predicate)
    }

    pub fn ios_class_chain(chain: impl Into<String>) -> Self {
        Self::new(LocatorStrategy::IosClassChain, chain)
    }

    /// Append a fallback strategy, tried after every existing one.
    pub fn or(mut self, strategy: LocatorStrategy, value: impl Into<String>) -> Self {
        self.steps.push(LocatorStep {
            strategy,
            value: value.into(),
        });
        self
    }

    /// Append all steps of another chain.
    pub fn or_spec(mut self, other: LocatorSpec) -> Self {
        self.steps.extend(other.steps);
        self
    }

    pub fn steps(&self) -> &[LocatorStep] {
        &self.steps
    }
}

impl TryFrom<Vec<LocatorStep>> for LocatorSpec {
    type Error = String;

    fn try_from(steps: Vec<LocatorStep>) -> Result<Self, Self::Error> {
        if steps.is_empty() {
            return Err("a locator needs at least one strategy".to_string());
        }
        Ok(Self { steps })
    }
}

impl From<LocatorSpec> for Vec<LocatorStep> {
    fn from(spec: LocatorSpec) -> Self {
        spec.steps
    }
}

impl fmt::Display for LocatorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, step) in self.steps.iter().enumerate() {
            if i > 0 {
                f.write_str(" | ")?;
            }
            write!(f, "{}", step)?;
        }
        Ok(())
    }
}

/// Quote `value` as an XPath 1.0 string literal.
///
/// XPath has no escape sequences, so a value containing both quote kinds is
/// assembled with `concat()`.
pub fn xpath_literal(value: &str) -> String {
    if !value.contains('\'') {
        format!("'{}'", value)
    } else if !value.contains('"') {
        format!("\"{}\"", value)
    } else {
        let parts: Vec<String> = value
            .split('\'')
            .map(|part| format!("'{}'", part))
            .collect();
        format!("concat({})", parts.join(", \"'\", "))
    }
}

/// Errors from [`LocatorResolver`].
#[derive(Error, Debug)]
pub enum LocateError {
    /// Every strategy in the chain exhausted its wait budget.
    #[error("Element not found: {spec}")]
    NotFound {
        spec: LocatorSpec,
        /// The last error a lookup reported, if any.
        #[source]
        last_error: Option<DriverError>,
    },

    /// The session stopped working while looking up the element.
    #[error("Lookup of {spec} aborted")]
    Driver {
        spec: LocatorSpec,
        #[source]
        source: DriverError,
    },
}

/// Resolves [`LocatorSpec`]s against a session.
#[derive(Debug, Clone, Default)]
pub struct LocatorResolver {
    default_wait: WaitPolicy,
}

impl LocatorResolver {
    pub fn new(default_wait: WaitPolicy) -> Self {
        Self { default_wait }
    }

    /// The policy used by [`find`](Self::find).
    pub fn default_wait(&self) -> &WaitPolicy {
        &self.default_wait
    }

    /// [`locate`](Self::locate) with the resolver's default wait policy.
    pub async fn find(&self, session: &Session, spec: &LocatorSpec) -> Result<ElementHandle, LocateError> {
        self.locate(session, spec, &self.default_wait).await
    }

    /// Find the element described by `spec`.
    ///
    /// Steps are tried in order. Each step polls for "element present" for up
    /// to `policy.timeout`; when it runs out, the next step gets a fresh
    /// budget. A step whose selector the server rejects is skipped at once.
    ///
    /// # Errors
    ///
    /// - [`LocateError::NotFound`] if no step found the element
    /// - [`LocateError::Driver`] if the session was lost
    #[instrument(skip_all, fields(session = %session.id(), spec = %spec))]
    pub async fn locate(
        &self,
        session: &Session,
        spec: &LocatorSpec,
        policy: &WaitPolicy,
    ) -> Result<ElementHandle, LocateError> {
        let driver = session.driver();
        let endpoint = session.endpoint();
        let mut last_error = None;

        for (index, step) in spec.steps().iter().enumerate() {
            let outcome = poll_until(policy, || async {
                match driver.find_element(endpoint, step.strategy, &step.value).await {
                    Ok(id) => Probe::Ready(id),
                    Err(e) if e.is_session_lost() => Probe::Abort(e),
                    Err(e @ DriverError::InvalidSelector(_)) => Probe::Abort(e),
                    Err(e) => Probe::Pending(Some(e)),
                }
            })
            .await;

            match outcome {
                Ok(element_id) => {
                    if index > 0 {
                        info!(%step, "element found by fallback strategy");
                    }
                    return Ok(ElementHandle::new(session.id().clone(), element_id, step.to_string()));
                }
                Err(WaitError::Aborted(e)) if e.is_session_lost() => {
                    return Err(LocateError::Driver {
                        spec: spec.clone(),
                        source: e,
                    });
                }
                Err(WaitError::Aborted(e)) => {
                    warn!(%step, error = %e, "lookup rejected, trying next strategy");
                    last_error = Some(e);
                }
                Err(WaitError::TimedOut { last_error: err }) => {
                    debug!(%step, timeout_ms = policy.timeout.as_millis() as u64, "strategy timed out");
                    if err.is_some() {
                        last_error = err;
                    }
                }
            }
        }

        Err(LocateError::NotFound {
            spec: spec.clone(),
            last_error,
        })
    }

    /// Single non-waiting pass over the chain.
    ///
    /// Returns the first element any step finds, or `None` if every step
    /// reports the element missing (or rejects its selector).
    pub async fn exists(&self, session: &Session, spec: &LocatorSpec) -> Result<Option<ElementHandle>, DriverError> {
        self.first_match(session, spec, false).await
    }

    /// Like [`exists`](Self::exists), but only counts elements that are displayed.
    pub async fn find_displayed(
        &self,
        session: &Session,
        spec: &LocatorSpec,
    ) -> Result<Option<ElementHandle>, DriverError> {
        self.first_match(session, spec, true).await
    }

    /// Runs [`scan`](Self::scan) with the server-side implicit wait switched
    /// off, so a missing element is reported at once instead of after the
    /// session's implicit wait.
    async fn first_match(
        &self,
        session: &Session,
        spec: &LocatorSpec,
        require_displayed: bool,
    ) -> Result<Option<ElementHandle>, DriverError> {
        let implicit_wait = session.implicit_wait();
        if implicit_wait.is_zero() {
            return self.scan(session, spec, require_displayed).await;
        }

        let driver = session.driver();
        let endpoint = session.endpoint();
        driver.set_implicit_wait(endpoint, Duration::ZERO).await?;
        let found = self.scan(session, spec, require_displayed).await;

        // Restore even when the pass failed.
        match driver.set_implicit_wait(endpoint, implicit_wait).await {
            Ok(()) => found,
            Err(e) => {
                warn!(error = %e, "failed to restore implicit wait");
                found.and(Err(e))
            }
        }
    }

    async fn scan(
        &self,
        session: &Session,
        spec: &LocatorSpec,
        require_displayed: bool,
    ) -> Result<Option<ElementHandle>, DriverError> {
        let driver = session.driver();
        let endpoint = session.endpoint();

        for step in spec.steps() {
            let element_id = match driver.find_element(endpoint, step.strategy, &step.value).await {
                Ok(id) => id,
                Err(e) if e.is_element_missing() => continue,
                Err(DriverError::InvalidSelector(_)) => continue,
                Err(e) => return Err(e),
            };
            if require_displayed {
                match driver.is_displayed(endpoint, &element_id).await {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(e) if e.is_element_missing() => continue,
                    Err(e) => return Err(e),
                }
            }
            return Ok(Some(ElementHandle::new(session.id().clone(), element_id, step.to_string())));
        }
        Ok(None)
    }
}
