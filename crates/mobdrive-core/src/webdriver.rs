//! [`RemoteDriver`] implementation over HTTP (W3C WebDriver / Appium 2.x).
//!
//! [`WebDriverClient`] is stateless apart from its connection pool: every
//! command is addressed through the [`SessionEndpoint`] returned by
//! [`create_session`](RemoteDriver::create_session), so one client can serve
//! any number of sessions on any number of servers.
//!
//! Appium 2.x serves the W3C endpoints at the server root. For servers that
//! still expect a `/wd/hub` base path, include it in the configured URL.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, Method, Url};
use serde_json::{json, Value};
use tracing::{debug, instrument};

use crate::capabilities::CapabilityBundle;
use crate::driver::{DriverError, ElementId, RemoteDriver, SessionEndpoint};
use crate::locator::LocatorStrategy;
use crate::protocol::{
    self, ExecuteRequest, FindElementRequest, SendKeysRequest, TimeoutsRequest,
};

/// HTTP client for a W3C WebDriver server.
#[derive(Debug, Clone)]
pub struct WebDriverClient {
    http: Client,
}

impl WebDriverClient {
    /// Per-request timeout used by [`new`](Self::new).
    ///
    /// Session creation on a cold device routinely takes tens of seconds.
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

    pub fn new() -> Result<Self, DriverError> {
        Self::with_timeout(Self::DEFAULT_REQUEST_TIMEOUT)
    }

    /// Create a client whose requests time out after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Result<Self, DriverError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DriverError::Transport(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { http })
    }

    async fn send(&self, method: Method, url: Url, body: Option<Value>) -> Result<Vec<u8>, DriverError> {
        debug!(%method, %url, "webdriver request");
        let mut request = self.http.request(method, url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await.map_err(map_transport_error)?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await.map_err(map_transport_error)?;
        debug!(status, bytes = bytes.len(), "webdriver response");
        if !(200..300).contains(&status) {
            // Surfaces the W3C error carried in the body.
            protocol::decode_value(status, &bytes)?;
        }
        Ok(bytes.to_vec())
    }

    async fn command(
        &self,
        method: Method,
        session: &SessionEndpoint,
        path: &[&str],
        body: Option<Value>,
    ) -> Result<Value, DriverError> {
        let mut segments = vec!["session", session.id.as_str()];
        segments.extend_from_slice(path);
        let url = endpoint(&session.server, &segments)?;
        let bytes = self.send(method, url, body).await?;
        protocol::decode_value(200, &bytes)
    }

    async fn element_command(
        &self,
        method: Method,
        session: &SessionEndpoint,
        element: &ElementId,
        action: &str,
        body: Option<Value>,
    ) -> Result<Value, DriverError> {
        self.command(method, session, &["element", element.as_str(), action], body)
            .await
    }
}

/// Append path segments to a base URL, keeping any base path (e.g. `/wd/hub`).
fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, DriverError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| DriverError::Transport(format!("'{}' cannot be used as a base URL", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn map_transport_error(err: reqwest::Error) -> DriverError {
    if err.is_timeout() {
        DriverError::Timeout
    } else {
        DriverError::Transport(err.to_string())
    }
}

fn to_json<T: serde::Serialize>(body: &T) -> Result<Value, DriverError> {
    serde_json::to_value(body).map_err(|e| DriverError::JsonParse(e.to_string()))
}

#[async_trait]
impl RemoteDriver for WebDriverClient {
    #[instrument(skip(self, capabilities), level = "debug")]
    async fn create_session(
        &self,
        server: &Url,
        capabilities: &CapabilityBundle,
    ) -> Result<SessionEndpoint, DriverError> {
        let url = endpoint(server, &["session"])?;
        let bytes = self
            .send(Method::POST, url, Some(capabilities.new_session_payload()))
            .await?;
        // A 2xx body may still carry an error object.
        protocol::decode_value(200, &bytes)?;
        let id = protocol::parse_new_session(&bytes)?;
        Ok(SessionEndpoint::new(server.clone(), id))
    }

    #[instrument(skip(self), level = "debug")]
    async fn set_implicit_wait(&self, session: &SessionEndpoint, wait: Duration) -> Result<(), DriverError> {
        let body = to_json(&TimeoutsRequest {
            implicit: wait.as_millis() as u64,
        })?;
        self.command(Method::POST, session, &["timeouts"], Some(body)).await?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn find_element(
        &self,
        session: &SessionEndpoint,
        strategy: LocatorStrategy,
        value: &str,
    ) -> Result<ElementId, DriverError> {
        let body = to_json(&FindElementRequest {
            using: strategy.using(),
            value,
        })?;
        let value = self.command(Method::POST, session, &["element"], Some(body)).await?;
        protocol::parse_element_id(&value)
    }

    #[instrument(skip(self), level = "debug")]
    async fn click(&self, session: &SessionEndpoint, element: &ElementId) -> Result<(), DriverError> {
        self.element_command(Method::POST, session, element, "click", Some(json!({})))
            .await?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn clear(&self, session: &SessionEndpoint, element: &ElementId) -> Result<(), DriverError> {
        self.element_command(Method::POST, session, element, "clear", Some(json!({})))
            .await?;
        Ok(())
    }

    #[instrument(skip(self, text), level = "debug")]
    async fn send_keys(
        &self,
        session: &SessionEndpoint,
        element: &ElementId,
        text: &str,
    ) -> Result<(), DriverError> {
        let body = to_json(&SendKeysRequest { text })?;
        self.element_command(Method::POST, session, element, "value", Some(body))
            .await?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn text(&self, session: &SessionEndpoint, element: &ElementId) -> Result<String, DriverError> {
        let value = self
            .element_command(Method::GET, session, element, "text", None)
            .await?;
        protocol::parse_string(&value)
    }

    #[instrument(skip(self), level = "debug")]
    async fn is_displayed(&self, session: &SessionEndpoint, element: &ElementId) -> Result<bool, DriverError> {
        let value = self
            .element_command(Method::GET, session, element, "displayed", None)
            .await?;
        protocol::parse_bool(&value)
    }

    #[instrument(skip(self), level = "debug")]
    async fn is_enabled(&self, session: &SessionEndpoint, element: &ElementId) -> Result<bool, DriverError> {
        let value = self
            .element_command(Method::GET, session, element, "enabled", None)
            .await?;
        protocol::parse_bool(&value)
    }

    #[instrument(skip(self, args), level = "debug")]
    async fn execute_script(
        &self,
        session: &SessionEndpoint,
        script: &str,
        args: Vec<Value>,
    ) -> Result<Value, DriverError> {
        let body = to_json(&ExecuteRequest { script, args })?;
        self.command(Method::POST, session, &["execute", "sync"], Some(body))
            .await
    }

    #[instrument(skip(self), level = "debug")]
    async fn screenshot(&self, session: &SessionEndpoint) -> Result<Vec<u8>, DriverError> {
        let value = self.command(Method::GET, session, &["screenshot"], None).await?;
        let encoded = protocol::parse_string(&value)?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| DriverError::UnexpectedResponse(format!("screenshot is not base64: {}", e)))
    }

    #[instrument(skip(self), level = "debug")]
    async fn delete_session(&self, session: &SessionEndpoint) -> Result<(), DriverError> {
        self.command(Method::DELETE, session, &[], None).await?;
        Ok(())
    }
}
