//! Remote automation driver trait for backend-agnostic session control.
//!
//! This module defines the [`RemoteDriver`] trait, the only seam between the
//! harness and the remote automation server. The server is treated as an
//! opaque service offering four families of commands: create a session, find
//! an element, act on an element, and destroy a session.
//!
//! The production implementation is [`WebDriverClient`](crate::webdriver::WebDriverClient),
//! which speaks the W3C WebDriver protocol over HTTP to an Appium server.
//! Tests substitute in-memory implementations.
//!
//! # Example
//!
//! ```no_run
//! use mobdrive_core::driver::RemoteDriver;
//! use mobdrive_core::webdriver::WebDriverClient;
//! use mobdrive_core::capabilities::resolve;
//! use mobdrive_core::config::ConfigSource;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigSource::load();
//! let platform = mobdrive_core::capabilities::resolve_platform(&config)?;
//! let bundle = resolve(platform, &config)?;
//! let url = mobdrive_core::capabilities::server_url(platform, &config)?;
//!
//! let client = WebDriverClient::new()?;
//! let endpoint = client.create_session(&url, &bundle).await?;
//! client.delete_session(&endpoint).await?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capabilities::CapabilityBundle;
use crate::locator::LocatorStrategy;

/// Errors reported by a [`RemoteDriver`].
///
/// W3C error codes returned by the server are mapped onto dedicated variants
/// where the harness reacts to them (missing elements, stale references,
/// lost sessions). Everything else lands in [`DriverError::CommandFailed`].
#[derive(Error, Debug)]
pub enum DriverError {
    /// No element matched the lookup.
    #[error("No such element: {0}")]
    NoSuchElement(String),

    /// The element reference is no longer attached to the UI tree.
    #[error("Stale element reference: {0}")]
    StaleElement(String),

    /// The lookup expression was rejected by the server.
    #[error("Invalid selector: {0}")]
    InvalidSelector(String),

    /// The session is unknown to the server or was terminated.
    #[error("Invalid session id: {0}")]
    InvalidSession(String),

    /// The server refused to start a session.
    #[error("Session not created: {0}")]
    SessionNotCreated(String),

    /// The element exists but cannot be interacted with.
    #[error("Element not interactable: {0}")]
    NotInteractable(String),

    /// Any other W3C error code.
    #[error("Command failed ({code}): {message}")]
    CommandFailed {
        /// The W3C error code, e.g. `unknown error`.
        code: String,
        /// The server-provided message.
        message: String,
    },

    /// The HTTP request could not be sent or its response could not be read.
    #[error("Transport error: {0}")]
    Transport(String),

    /// An operation timed out.
    #[error("Operation timed out")]
    Timeout,

    /// Failed to parse JSON data.
    #[error("JSON parse error: {0}")]
    JsonParse(String),

    /// The response parsed but did not have the expected shape.
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl DriverError {
    /// Maps a W3C error code and message to a driver error.
    pub fn from_w3c(code: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            "no such element" => DriverError::NoSuchElement(message),
            "stale element reference" => DriverError::StaleElement(message),
            "invalid selector" => DriverError::InvalidSelector(message),
            "invalid session id" => DriverError::InvalidSession(message),
            "session not created" => DriverError::SessionNotCreated(message),
            "element not interactable" => DriverError::NotInteractable(message),
            "timeout" | "script timeout" => DriverError::Timeout,
            other => DriverError::CommandFailed {
                code: other.to_string(),
                message,
            },
        }
    }

    /// Returns true when the error means "the element is not there (anymore)".
    pub fn is_element_missing(&self) -> bool {
        matches!(self, DriverError::NoSuchElement(_) | DriverError::StaleElement(_))
    }

    /// Returns true when the session itself is gone and no further command can succeed.
    pub fn is_session_lost(&self) -> bool {
        matches!(self, DriverError::InvalidSession(_))
    }
}

/// Identifier the server assigned to a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of an entry in the server's element table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementId(String);

impl ElementId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a remote session lives: the server it was created on and its id.
///
/// Every command after session creation is addressed through an endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEndpoint {
    /// Base URL of the automation server (e.g. `http://127.0.0.1:4723`).
    pub server: Url,
    /// The server-assigned session id.
    pub id: SessionId,
}

impl SessionEndpoint {
    pub fn new(server: Url, id: SessionId) -> Self {
        Self { server, id }
    }
}

/// Trait for talking to a remote automation server.
///
/// Implementors translate each call into the server's wire protocol. All
/// methods are async; none of them retries on its own. Retry and wait
/// policies belong to the [`session`](crate::session),
/// [`locator`](crate::locator) and [`interaction`](crate::interaction)
/// layers.
#[async_trait]
pub trait RemoteDriver: Send + Sync {
    /// Start a new session on `server` with the given capabilities.
    async fn create_session(
        &self,
        server: &Url,
        capabilities: &CapabilityBundle,
    ) -> Result<SessionEndpoint, DriverError>;

    /// Configure how long the server itself waits when a lookup finds nothing.
    async fn set_implicit_wait(
        &self,
        session: &SessionEndpoint,
        wait: Duration,
    ) -> Result<(), DriverError>;

    /// Find a single element using one lookup strategy.
    ///
    /// # Errors
    ///
    /// [`DriverError::NoSuchElement`] when nothing matches.
    async fn find_element(
        &self,
        session: &SessionEndpoint,
        strategy: LocatorStrategy,
        value: &str,
    ) -> Result<ElementId, DriverError>;

    /// Click (tap) an element.
    async fn click(&self, session: &SessionEndpoint, element: &ElementId) -> Result<(), DriverError>;

    /// Clear an editable element's content.
    async fn clear(&self, session: &SessionEndpoint, element: &ElementId) -> Result<(), DriverError>;

    /// Type text into an element.
    async fn send_keys(
        &self,
        session: &SessionEndpoint,
        element: &ElementId,
        text: &str,
    ) -> Result<(), DriverError>;

    /// Read an element's visible text.
    async fn text(&self, session: &SessionEndpoint, element: &ElementId) -> Result<String, DriverError>;

    /// Whether the element is currently displayed.
    async fn is_displayed(
        &self,
        session: &SessionEndpoint,
        element: &ElementId,
    ) -> Result<bool, DriverError>;

    /// Whether the element is enabled.
    async fn is_enabled(
        &self,
        session: &SessionEndpoint,
        element: &ElementId,
    ) -> Result<bool, DriverError>;

    /// Execute a script (or an Appium `mobile:` extension command) in the session.
    async fn execute_script(
        &self,
        session: &SessionEndpoint,
        script: &str,
        args: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, DriverError>;

    /// Capture a PNG screenshot of the device screen.
    async fn screenshot(&self, session: &SessionEndpoint) -> Result<Vec<u8>, DriverError>;

    /// Destroy the session on the server.
    async fn delete_session(&self, session: &SessionEndpoint) -> Result<(), DriverError>;
}
