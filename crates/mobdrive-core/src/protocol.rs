//! W3C WebDriver wire format helpers.
//!
//! The Appium server speaks JSON over HTTP. Every response body has the
//! shape `{"value": ...}`; failures put an error object in `value`:
//!
//! ```text
//! {"value": {"error": "no such element", "message": "...", "stacktrace": "..."}}
//! ```
//!
//! Element references are objects keyed by the W3C element identifier
//! [`ELEMENT_KEY`]; older servers use the legacy `ELEMENT` key instead, and
//! both are accepted here.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::driver::{DriverError, ElementId, SessionId};

/// The W3C web element identifier key.
pub const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// The pre-W3C (JSON Wire Protocol) element key.
pub const LEGACY_ELEMENT_KEY: &str = "ELEMENT";

/// Body of `POST /session/{id}/element`.
#[derive(Debug, Serialize)]
pub struct FindElementRequest<'a> {
    pub using: &'a str,
    pub value: &'a str,
}

/// Body of `POST /session/{id}/timeouts`.
#[derive(Debug, Serialize)]
pub struct TimeoutsRequest {
    /// Implicit wait in milliseconds.
    pub implicit: u64,
}

/// Body of `POST /session/{id}/element/{eid}/value`.
#[derive(Debug, Serialize)]
pub struct SendKeysRequest<'a> {
    pub text: &'a str,
}

/// Body of `POST /session/{id}/execute/sync`.
#[derive(Debug, Serialize)]
pub struct ExecuteRequest<'a> {
    pub script: &'a str,
    pub args: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    value: Value,
    /// Legacy servers put the session id next to `value`.
    #[serde(default, rename = "sessionId")]
    session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireError {
    error: String,
    #[serde(default)]
    message: String,
}

/// Serialise an element id as a script argument (both keys set).
pub fn element_reference(id: &ElementId) -> Value {
    json!({
        ELEMENT_KEY: id.as_str(),
        LEGACY_ELEMENT_KEY: id.as_str(),
    })
}

/// Decode a response body into its `value`, mapping error payloads and
/// non-success statuses to [`DriverError`].
pub fn decode_value(status: u16, body: &[u8]) -> Result<Value, DriverError> {
    let success = (200..300).contains(&status);
    if body.iter().all(u8::is_ascii_whitespace) {
        return if success {
            Ok(Value::Null)
        } else {
            Err(DriverError::UnexpectedResponse(format!("HTTP {} with empty body", status)))
        };
    }

    let envelope: Envelope = match serde_json::from_slice(body) {
        Ok(envelope) => envelope,
        Err(e) if success => return Err(DriverError::JsonParse(e.to_string())),
        Err(_) => {
            return Err(DriverError::UnexpectedResponse(format!(
                "HTTP {}: {}",
                status,
                String::from_utf8_lossy(body)
            )))
        }
    };

    if let Some(err) = as_wire_error(&envelope.value) {
        return Err(DriverError::from_w3c(&err.error, err.message));
    }
    if !success {
        return Err(DriverError::UnexpectedResponse(format!("HTTP {}: {}", status, envelope.value)));
    }
    Ok(envelope.value)
}

fn as_wire_error(value: &Value) -> Option<WireError> {
    if value.get("error").map_or(false, Value::is_string) {
        serde_json::from_value(value.clone()).ok()
    } else {
        None
    }
}

/// Extract the session id from a new-session response body.
pub fn parse_new_session(body: &[u8]) -> Result<SessionId, DriverError> {
    let envelope: Envelope = serde_json::from_slice(body).map_err(|e| DriverError::JsonParse(e.to_string()))?;
    envelope
        .value
        .get("sessionId")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or(envelope.session_id)
        .map(SessionId::new)
        .ok_or_else(|| DriverError::UnexpectedResponse(format!("no sessionId in {}", envelope.value)))
}

/// Extract an element id from a find-element `value`.
pub fn parse_element_id(value: &Value) -> Result<ElementId, DriverError> {
    value
        .get(ELEMENT_KEY)
        .or_else(|| value.get(LEGACY_ELEMENT_KEY))
        .and_then(Value::as_str)
        .map(ElementId::new)
        .ok_or_else(|| DriverError::UnexpectedResponse(format!("not an element reference: {}", value)))
}

/// Read a boolean `value`.
pub fn parse_bool(value: &Value) -> Result<bool, DriverError> {
    value
        .as_bool()
        .ok_or_else(|| DriverError::UnexpectedResponse(format!("expected a boolean, got {}", value)))
}

/// Read a string `value`. `null` reads as the empty string.
pub fn parse_string(value: &Value) -> Result<String, DriverError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Null => Ok(String::new()),
        other => Err(DriverError::UnexpectedResponse(format!("expected a string, got {}", other))),
    }
}
