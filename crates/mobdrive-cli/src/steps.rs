//! JSON step files for `mobdrive run`.
//!
//! A step file is a JSON array of steps. Each step names an `action` and a
//! `locator`; the locator is either a plain string (an accessibility id,
//! resolved through the composite XPath-then-native chain) or an explicit
//! list of `{ "strategy", "value" }` pairs tried in order.
//!
//! ```json
//! [
//!   { "action": "input", "locator": "test-Username", "text": "standard_user" },
//!   { "action": "input", "locator": "test-Password", "text": "secret_sauce" },
//!   { "action": "click", "locator": "test-LOGIN" },
//!   { "action": "read-text",
//!     "locator": [{ "strategy": "xpath", "value": "//*[@text='PRODUCTS']" }],
//!     "expect": "PRODUCTS" },
//!   { "action": "displayed", "locator": "test-Error message", "expect": false },
//!   { "action": "wait-gone", "locator": "test-Spinner" }
//! ]
//! ```

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use mobdrive_core::locator::LocatorSpec;
use mobdrive_core::screen::Screen;

/// Where a step looks for its element.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Locator {
    /// Accessibility id shorthand.
    AccessibilityId(String),
    /// Explicit strategy chain.
    Chain(LocatorSpec),
}

impl Locator {
    pub fn spec(&self) -> LocatorSpec {
        match self {
            Locator::AccessibilityId(id) => LocatorSpec::accessibility_id(id),
            Locator::Chain(spec) => spec.clone(),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::AccessibilityId(id) => f.write_str(id),
            Locator::Chain(spec) => write!(f, "{}", spec),
        }
    }
}

/// One step of a step file.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum Step {
    Click {
        locator: Locator,
    },
    Input {
        locator: Locator,
        text: String,
    },
    ReadText {
        locator: Locator,
        #[serde(default)]
        expect: Option<String>,
    },
    Displayed {
        locator: Locator,
        #[serde(default)]
        expect: Option<bool>,
    },
    WaitGone {
        locator: Locator,
    },
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Click { locator } => write!(f, "click {}", locator),
            Step::Input { locator, .. } => write!(f, "input {}", locator),
            Step::ReadText { locator, .. } => write!(f, "read-text {}", locator),
            Step::Displayed { locator, .. } => write!(f, "displayed {}", locator),
            Step::WaitGone { locator } => write!(f, "wait-gone {}", locator),
        }
    }
}

/// Result of one successful step.
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub index: usize,
    pub step: String,
    /// Text read or visibility observed, where the step produces a value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

/// Why a step failed.
#[derive(Debug)]
pub enum StepFailure {
    Harness(mobdrive_core::Error),
    Mismatch { expected: String, actual: String },
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepFailure::Harness(e) => {
                write!(f, "{}", e)?;
                let mut source = std::error::Error::source(e);
                while let Some(cause) = source {
                    write!(f, ": {}", cause)?;
                    source = cause.source();
                }
                Ok(())
            }
            StepFailure::Mismatch { expected, actual } => {
                write!(f, "expected '{}', got '{}'", expected, actual)
            }
        }
    }
}

impl From<mobdrive_core::Error> for StepFailure {
    fn from(e: mobdrive_core::Error) -> Self {
        StepFailure::Harness(e)
    }
}

/// Read and parse a step file.
pub fn load(path: &Path) -> Result<Vec<Step>, String> {
    let contents =
        std::fs::read_to_string(path).map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    parse(&contents).map_err(|e| format!("invalid step file {}: {}", path.display(), e))
}

pub fn parse(json: &str) -> Result<Vec<Step>, String> {
    let steps: Vec<Step> = serde_json::from_str(json).map_err(|e| e.to_string())?;
    if steps.is_empty() {
        return Err("no steps".to_string());
    }
    Ok(steps)
}

/// Execute one step against `screen`.
pub async fn execute(screen: &impl Screen, index: usize, step: &Step) -> Result<StepReport, StepFailure> {
    let value = match step {
        Step::Click { locator } => {
            screen.click(&locator.spec()).await?;
            None
        }
        Step::Input { locator, text } => {
            screen.input(&locator.spec(), text).await?;
            None
        }
        Step::ReadText { locator, expect } => {
            let text = screen.read_text(&locator.spec()).await?;
            if let Some(expected) = expect {
                if &text != expected {
                    return Err(StepFailure::Mismatch {
                        expected: expected.clone(),
                        actual: text,
                    });
                }
            }
            Some(serde_json::Value::String(text))
        }
        Step::Displayed { locator, expect } => {
            let displayed = screen.is_displayed(&locator.spec()).await;
            if let Some(expected) = expect {
                if displayed != *expected {
                    return Err(StepFailure::Mismatch {
                        expected: expected.to_string(),
                        actual: displayed.to_string(),
                    });
                }
            }
            Some(serde_json::Value::Bool(displayed))
        }
        Step::WaitGone { locator } => {
            screen.wait_for_disappearance(&locator.spec()).await?;
            None
        }
    };

    Ok(StepReport {
        index,
        step: step.to_string(),
        value,
    })
}
