//! Shared test helpers for mobdrive-core integration tests.
//!
//! Two kinds of mock infrastructure live here:
//!
//! - [`ScriptedDriver`], an in-memory [`RemoteDriver`] whose answers are
//!   scripted per element, for session, locator and interaction tests
//!   (usually run on tokio's paused clock)
//! - [`mock_appium`], an axum server speaking just enough W3C WebDriver to
//!   exercise [`WebDriverClient`](mobdrive_core::webdriver::WebDriverClient)

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::{header, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use reqwest::Url;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use mobdrive_core::capabilities::CapabilityBundle;
use mobdrive_core::config::ConfigSource;
use mobdrive_core::driver::{DriverError, ElementId, RemoteDriver, SessionEndpoint, SessionId};
use mobdrive_core::locator::LocatorStrategy;
use mobdrive_core::session::{SessionManager, SessionManagerConfig};
use mobdrive_core::wait::WaitPolicy;

// ---------------------------------------------------------------------------
// Configuration fixtures
// ---------------------------------------------------------------------------

/// A minimal, valid Android configuration.
pub fn android_config() -> ConfigSource {
    ConfigSource::from_pairs([
        ("platform", "android"),
        ("android.device.name", "emulator-5554"),
        ("android.app.path", "/builds/app.apk"),
    ])
}

/// A minimal, valid iOS configuration.
pub fn ios_config() -> ConfigSource {
    ConfigSource::from_pairs([
        ("platform", "ios"),
        ("ios.device.name", "iPhone 15"),
        ("ios.bundle.id", "com.example.shop"),
    ])
}

/// Short waits so paused-clock tests stay readable.
pub fn fast_wait() -> WaitPolicy {
    WaitPolicy::from_secs(2).with_poll_interval(Duration::from_millis(100))
}

/// A manager over `driver` with default retry settings and [`fast_wait`].
pub fn manager(config: ConfigSource, driver: Arc<ScriptedDriver>) -> SessionManager {
    let settings = SessionManagerConfig {
        default_wait: fast_wait(),
        ..SessionManagerConfig::default()
    };
    SessionManager::with_settings(config, driver, settings)
}

// ---------------------------------------------------------------------------
// Scripted in-memory driver
// ---------------------------------------------------------------------------

/// Cloneable stand-in for the [`DriverError`] variants tests script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    NoSuchElement,
    Stale,
    InvalidSelector,
    InvalidSession,
    NotInteractable,
    SessionNotCreated,
    Transport,
}

impl Failure {
    pub fn error(self) -> DriverError {
        match self {
            Failure::NoSuchElement => DriverError::NoSuchElement("scripted".into()),
            Failure::Stale => DriverError::StaleElement("scripted".into()),
            Failure::InvalidSelector => DriverError::InvalidSelector("scripted".into()),
            Failure::InvalidSession => DriverError::InvalidSession("scripted".into()),
            Failure::NotInteractable => DriverError::NotInteractable("scripted".into()),
            Failure::SessionNotCreated => DriverError::SessionNotCreated("scripted".into()),
            Failure::Transport => DriverError::Transport("connection refused".into()),
        }
    }
}

/// A sequence of answers; the last one repeats forever.
#[derive(Debug, Clone)]
struct Script<T: Clone> {
    queue: VecDeque<Result<T, Failure>>,
}

impl<T: Clone> Script<T> {
    fn new(answers: Vec<Result<T, Failure>>) -> Self {
        Self { queue: answers.into() }
    }

    fn next(&mut self) -> Option<Result<T, Failure>> {
        if self.queue.len() > 1 {
            self.queue.pop_front()
        } else {
            self.queue.front().cloned()
        }
    }
}

#[derive(Default)]
struct DriverState {
    create_failures: u32,
    implicit_wait_failure: Option<Failure>,
    implicit_wait: Duration,
    honor_implicit_wait: bool,
    delete_failure: Option<Failure>,
    sessions_created: u32,
    finds: HashMap<(LocatorStrategy, String), Script<String>>,
    displayed: HashMap<String, Script<bool>>,
    enabled: HashMap<String, Script<bool>>,
    texts: HashMap<String, String>,
    click_failure: Option<Failure>,
    script_failure: Option<Failure>,
    input_failure: Option<Failure>,
    typed: HashMap<String, String>,
    calls: Vec<String>,
}

/// In-memory [`RemoteDriver`] with scripted answers.
///
/// Unknown lookups report "no such element"; elements are displayed and
/// enabled unless scripted otherwise. Every call is recorded as a short
/// string (`"create_session"`, `"find xpath //a"`, `"click e1"`, ...).
#[derive(Default)]
pub struct ScriptedDriver {
    state: Mutex<DriverState>,
}

impl ScriptedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, DriverState> {
        self.state.lock().unwrap()
    }

    /// The first `n` session creations fail with "session not created".
    pub fn fail_create(mut self, n: u32) -> Self {
        self.state.get_mut().unwrap().create_failures = n;
        self
    }

    pub fn fail_implicit_wait(mut self, failure: Failure) -> Self {
        self.state.get_mut().unwrap().implicit_wait_failure = Some(failure);
        self
    }

    /// Lookups of missing elements block for the configured implicit wait
    /// before reporting "no such element", as a real server does.
    pub fn honor_implicit_wait(mut self) -> Self {
        self.state.get_mut().unwrap().honor_implicit_wait = true;
        self
    }

    pub fn fail_delete(mut self, failure: Failure) -> Self {
        self.state.get_mut().unwrap().delete_failure = Some(failure);
        self
    }

    /// `strategy`/`value` finds `id` immediately.
    pub fn element(self, strategy: LocatorStrategy, value: &str, id: &str) -> Self {
        self.element_after(strategy, value, id, 0)
    }

    /// `strategy`/`value` reports "no such element" `misses` times, then finds `id`.
    pub fn element_after(mut self, strategy: LocatorStrategy, value: &str, id: &str, misses: usize) -> Self {
        let mut answers = vec![Err(Failure::NoSuchElement); misses];
        answers.push(Ok(id.to_string()));
        self.state
            .get_mut()
            .unwrap()
            .finds
            .insert((strategy, value.to_string()), Script::new(answers));
        self
    }

    /// `strategy`/`value` always fails with `failure`.
    pub fn find_fails(mut self, strategy: LocatorStrategy, value: &str, failure: Failure) -> Self {
        self.state
            .get_mut()
            .unwrap()
            .finds
            .insert((strategy, value.to_string()), Script::new(vec![Err(failure)]));
        self
    }

    /// Successive answers of `is_displayed` for `id`.
    pub fn displayed(mut self, id: &str, answers: Vec<Result<bool, Failure>>) -> Self {
        self.state
            .get_mut()
            .unwrap()
            .displayed
            .insert(id.to_string(), Script::new(answers));
        self
    }

    /// Successive answers of `is_enabled` for `id`.
    pub fn enabled(mut self, id: &str, answers: Vec<Result<bool, Failure>>) -> Self {
        self.state
            .get_mut()
            .unwrap()
            .enabled
            .insert(id.to_string(), Script::new(answers));
        self
    }

    pub fn text(mut self, id: &str, text: &str) -> Self {
        self.state.get_mut().unwrap().texts.insert(id.to_string(), text.to_string());
        self
    }

    pub fn fail_click(mut self, failure: Failure) -> Self {
        self.state.get_mut().unwrap().click_failure = Some(failure);
        self
    }

    pub fn fail_script(mut self, failure: Failure) -> Self {
        self.state.get_mut().unwrap().script_failure = Some(failure);
        self
    }

    pub fn fail_input(mut self, failure: Failure) -> Self {
        self.state.get_mut().unwrap().input_failure = Some(failure);
        self
    }

    /// Change the visibility of `id` while a test is running.
    pub fn set_displayed(&self, id: &str, answers: Vec<Result<bool, Failure>>) {
        self.state().displayed.insert(id.to_string(), Script::new(answers));
    }

    /// The implicit wait currently applied to the session.
    pub fn implicit_wait(&self) -> Duration {
        self.state().implicit_wait
    }

    /// All recorded calls, in order.
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    /// Number of recorded calls starting with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.state().calls.iter().filter(|c| c.starts_with(prefix)).count()
    }

    /// What was last typed into `id`.
    pub fn typed(&self, id: &str) -> Option<String> {
        self.state().typed.get(id).cloned()
    }

    fn record(&self, call: String) -> std::sync::MutexGuard<'_, DriverState> {
        let mut state = self.state();
        state.calls.push(call);
        state
    }
}

fn failed(failure: Option<Failure>) -> Result<(), DriverError> {
    match failure {
        Some(f) => Err(f.error()),
        None => Ok(()),
    }
}

#[async_trait]
impl RemoteDriver for ScriptedDriver {
    async fn create_session(&self, server: &Url, _capabilities: &CapabilityBundle) -> Result<SessionEndpoint, DriverError> {
        let mut state = self.record("create_session".to_string());
        if state.create_failures > 0 {
            state.create_failures -= 1;
            return Err(Failure::SessionNotCreated.error());
        }
        state.sessions_created += 1;
        let id = SessionId::new(format!("session-{}", state.sessions_created));
        Ok(SessionEndpoint::new(server.clone(), id))
    }

    async fn set_implicit_wait(&self, session: &SessionEndpoint, wait: Duration) -> Result<(), DriverError> {
        let mut state = self.record(format!("implicit_wait {} {}", session.id, wait.as_millis()));
        failed(state.implicit_wait_failure)?;
        state.implicit_wait = wait;
        Ok(())
    }

    async fn find_element(
        &self,
        _session: &SessionEndpoint,
        strategy: LocatorStrategy,
        value: &str,
    ) -> Result<ElementId, DriverError> {
        let (answer, delay) = {
            let mut state = self.record(format!("find {} {}", strategy.using(), value));
            let answer = match state.finds.get_mut(&(strategy, value.to_string())).and_then(Script::next) {
                Some(Ok(id)) => Ok(ElementId::new(id)),
                Some(Err(f)) => Err(f.error()),
                None => Err(Failure::NoSuchElement.error()),
            };
            let delay = match answer {
                Err(DriverError::NoSuchElement(_)) if state.honor_implicit_wait => state.implicit_wait,
                _ => Duration::ZERO,
            };
            (answer, delay)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        answer
    }

    async fn click(&self, _session: &SessionEndpoint, element: &ElementId) -> Result<(), DriverError> {
        let state = self.record(format!("click {}", element));
        failed(state.click_failure)
    }

    async fn clear(&self, _session: &SessionEndpoint, element: &ElementId) -> Result<(), DriverError> {
        let mut state = self.record(format!("clear {}", element));
        failed(state.input_failure)?;
        state.typed.insert(element.to_string(), String::new());
        Ok(())
    }

    async fn send_keys(&self, _session: &SessionEndpoint, element: &ElementId, text: &str) -> Result<(), DriverError> {
        let mut state = self.record(format!("send_keys {}", element));
        failed(state.input_failure)?;
        state.typed.entry(element.to_string()).or_default().push_str(text);
        Ok(())
    }

    async fn text(&self, _session: &SessionEndpoint, element: &ElementId) -> Result<String, DriverError> {
        let state = self.record(format!("text {}", element));
        Ok(state.texts.get(element.as_str()).cloned().unwrap_or_default())
    }

    async fn is_displayed(&self, _session: &SessionEndpoint, element: &ElementId) -> Result<bool, DriverError> {
        let mut state = self.record(format!("displayed {}", element));
        match state.displayed.get_mut(element.as_str()).and_then(Script::next) {
            Some(answer) => answer.map_err(Failure::error),
            None => Ok(true),
        }
    }

    async fn is_enabled(&self, _session: &SessionEndpoint, element: &ElementId) -> Result<bool, DriverError> {
        let mut state = self.record(format!("enabled {}", element));
        match state.enabled.get_mut(element.as_str()).and_then(Script::next) {
            Some(answer) => answer.map_err(Failure::error),
            None => Ok(true),
        }
    }

    async fn execute_script(
        &self,
        _session: &SessionEndpoint,
        script: &str,
        _args: Vec<Value>,
    ) -> Result<Value, DriverError> {
        let state = self.record(format!("execute {}", script));
        failed(state.script_failure)?;
        Ok(Value::Null)
    }

    async fn screenshot(&self, _session: &SessionEndpoint) -> Result<Vec<u8>, DriverError> {
        let _state = self.record("screenshot".to_string());
        Ok(b"\x89PNG\r\n\x1a\n".to_vec())
    }

    async fn delete_session(&self, session: &SessionEndpoint) -> Result<(), DriverError> {
        let state = self.record(format!("delete {}", session.id));
        failed(state.delete_failure)
    }
}

// ---------------------------------------------------------------------------
// Mock Appium server (axum)
// ---------------------------------------------------------------------------

/// How the mock server answers one request on a route.
#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// Reply with the given status and JSON body.
    Respond(u16, Value),
    /// Reply with the given status and a raw (non-JSON) body.
    Raw(u16, &'static str),
    /// Sleep, then reply with the given status and JSON body.
    Delay(Duration, u16, Value),
}

/// A scripted route. Behaviors are used in order; the last one repeats.
#[derive(Debug, Clone)]
pub struct MockRoute {
    method: Method,
    path: String,
    behaviors: VecDeque<MockBehavior>,
}

impl MockRoute {
    pub fn new(method: Method, path: &str, behaviors: Vec<MockBehavior>) -> Self {
        Self {
            method,
            path: path.to_string(),
            behaviors: behaviors.into(),
        }
    }

    /// A route that always answers `200 {"value": value}`.
    pub fn ok(method: Method, path: &str, value: Value) -> Self {
        Self::new(method, path, vec![MockBehavior::Respond(200, json!({ "value": value }))])
    }

    fn next(&mut self) -> Option<MockBehavior> {
        if self.behaviors.len() > 1 {
            self.behaviors.pop_front()
        } else {
            self.behaviors.front().cloned()
        }
    }
}

/// One request seen by the mock server.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub body: Value,
}

#[derive(Clone)]
struct MockState {
    routes: Arc<Mutex<Vec<MockRoute>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

/// A running mock Appium server.
pub struct MockAppium {
    pub url: Url,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockAppium {
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// The body of the last request to `path`.
    pub fn last_body(&self, method: Method, path: &str) -> Option<Value> {
        self.requests()
            .into_iter()
            .rev()
            .find(|r| r.method == method && r.path == path)
            .map(|r| r.body)
    }
}

/// Start a mock Appium server on an ephemeral port.
///
/// Requests that match no route get a W3C `unknown command` error.
pub async fn mock_appium(routes: Vec<MockRoute>) -> MockAppium {
    let requests = Arc::new(Mutex::new(Vec::new()));
    let state = MockState {
        routes: Arc::new(Mutex::new(routes)),
        requests: requests.clone(),
    };
    let app = Router::new().fallback(handle).with_state(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    MockAppium {
        url: Url::parse(&format!("http://{}", addr)).unwrap(),
        requests,
    }
}

async fn handle(State(state): State<MockState>, method: Method, uri: Uri, body: String) -> Response {
    let path = uri.path().to_string();
    let parsed = serde_json::from_str(&body).unwrap_or(Value::Null);
    state.requests.lock().unwrap().push(RecordedRequest {
        method: method.clone(),
        path: path.clone(),
        body: parsed,
    });

    let behavior = {
        let mut routes = state.routes.lock().unwrap();
        routes
            .iter_mut()
            .find(|r| r.method == method && r.path == path)
            .and_then(MockRoute::next)
    };

    match behavior {
        Some(MockBehavior::Respond(status, body)) => json_response(status, &body),
        Some(MockBehavior::Raw(status, body)) => {
            (StatusCode::from_u16(status).unwrap(), body.to_string()).into_response()
        }
        Some(MockBehavior::Delay(delay, status, body)) => {
            tokio::time::sleep(delay).await;
            json_response(status, &body)
        }
        None => json_response(
            404,
            &w3c_error("unknown command", &format!("no route for {} {}", method, path)),
        ),
    }
}

fn json_response(status: u16, body: &Value) -> Response {
    (
        StatusCode::from_u16(status).unwrap(),
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

/// A W3C error body.
pub fn w3c_error(error: &str, message: &str) -> Value {
    json!({ "value": { "error": error, "message": message, "stacktrace": "" } })
}

/// A W3C element reference value.
pub fn element_value(id: &str) -> Value {
    json!({ "element-6066-11e4-a52e-4f735466cecf": id })
}
