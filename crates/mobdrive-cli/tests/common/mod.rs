//! A mock Appium server for end-to-end `mobdrive run` tests.
//!
//! The server plays one login screen: a username field, a login button and a
//! hidden error banner (all reachable by accessibility id), plus a `title`
//! element that reads "PRODUCTS". Every request is recorded as
//! `"METHOD /path"`.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::{header, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::runtime::Runtime;

/// The bytes behind the mock's screenshot (a bare PNG signature).
pub const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

struct LoginScreen {
    elements: HashMap<String, &'static str>,
    texts: HashMap<&'static str, &'static str>,
    hidden: Vec<&'static str>,
    requests: Mutex<Vec<String>>,
}

impl LoginScreen {
    fn new() -> Self {
        let mut elements = HashMap::new();
        for (id, element) in [
            ("test-Username", "user"),
            ("test-Password", "pass"),
            ("test-LOGIN", "login"),
            ("test-Error message", "err"),
        ] {
            elements.insert(format!("//*[@content-desc='{id}' or @name='{id}']"), element);
        }
        elements.insert("title".to_string(), "title");
        Self {
            elements,
            texts: HashMap::from([("title", "PRODUCTS")]),
            hidden: vec!["err"],
            requests: Mutex::new(Vec::new()),
        }
    }
}

/// A running mock server. Dropping it shuts the server down.
pub struct MockAppium {
    pub url: String,
    screen: Arc<LoginScreen>,
    _runtime: Runtime,
}

impl MockAppium {
    pub fn start() -> Self {
        let runtime = Runtime::new().unwrap();
        let screen = Arc::new(LoginScreen::new());
        let app = Router::new().fallback(handle).with_state(screen.clone());

        let addr = runtime.block_on(async {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                axum::serve(listener, app).await.unwrap();
            });
            addr
        });

        Self {
            url: format!("http://{}", addr),
            screen,
            _runtime: runtime,
        }
    }

    pub fn requests(&self) -> Vec<String> {
        self.screen.requests.lock().unwrap().clone()
    }
}

async fn handle(State(screen): State<Arc<LoginScreen>>, method: Method, uri: Uri, body: String) -> Response {
    let path = uri.path().to_string();
    screen.requests.lock().unwrap().push(format!("{} {}", method, path));
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

    match (method.as_str(), segments.as_slice()) {
        ("POST", ["session"]) => ok(json!({ "sessionId": "s1", "capabilities": {} })),
        ("DELETE", ["session", _]) => ok(Value::Null),
        ("POST", ["session", _, "timeouts"]) => ok(Value::Null),
        ("POST", ["session", _, "element"]) => {
            let request: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
            let value = request["value"].as_str().unwrap_or_default();
            match screen.elements.get(value) {
                Some(id) => ok(json!({ "element-6066-11e4-a52e-4f735466cecf": id })),
                None => error(404, "no such element", value),
            }
        }
        ("POST", ["session", _, "element", _, "click" | "clear" | "value"]) => ok(Value::Null),
        ("GET", ["session", _, "element", id, "text"]) => {
            ok(json!(screen.texts.get(*id).copied().unwrap_or_default()))
        }
        ("GET", ["session", _, "element", id, "displayed"]) => ok(json!(!screen.hidden.iter().any(|h| h == id))),
        ("GET", ["session", _, "element", _, "enabled"]) => ok(json!(true)),
        ("POST", ["session", _, "execute", "sync"]) => ok(Value::Null),
        ("GET", ["session", _, "screenshot"]) => ok(json!("iVBORw0KGgo=")),
        _ => error(404, "unknown command", &path),
    }
}

fn ok(value: Value) -> Response {
    respond(200, json!({ "value": value }))
}

fn error(status: u16, error: &str, message: &str) -> Response {
    respond(status, json!({ "value": { "error": error, "message": message, "stacktrace": "" } }))
}

fn respond(status: u16, body: Value) -> Response {
    (
        StatusCode::from_u16(status).unwrap(),
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}
