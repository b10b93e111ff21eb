//! # mobdrive-core
//!
//! Core library for Appium-driven mobile UI tests on Android and iOS.
//!
//! This crate owns the parts of a UI test harness that sit between test code
//! and the remote automation server: turning configuration into session
//! capabilities, keeping one session per execution context, finding elements
//! through fallback strategies, and interacting with them under bounded waits.
//!
//! ## Modules
//!
//! - [`config`] - Layered key/value configuration (settings file plus environment overrides)
//! - [`capabilities`] - Platform-specific capability resolution
//! - [`session`] - Per-context session lifecycle with retrying initialization
//! - [`locator`] - Ordered fallback lookup strategies
//! - [`interaction`] - Click, input and text reads with readiness waits and click fallback
//! - [`screen`] - The [`Screen`](screen::Screen) trait for composing screen objects
//! - [`wait`] - Wait policies and the shared polling loop
//! - [`driver`] - The [`RemoteDriver`](driver::RemoteDriver) seam and its error type
//! - [`webdriver`] - W3C WebDriver client over HTTP
//! - [`protocol`] - WebDriver wire-format helpers
//! - [`element`] - Session-bound element handles
//!
//! ## External Dependencies
//!
//! A running Appium 2.x server with the UiAutomator2 (Android) or XCUITest
//! (iOS) driver installed, reachable at the configured URL.
//!
//! ## Example
//!
//! ```no_run
//! use mobdrive_core::config::ConfigSource;
//! use mobdrive_core::locator::LocatorSpec;
//! use mobdrive_core::screen::{Screen, ScreenContext};
//! use mobdrive_core::session::{ContextId, SessionManager};
//!
//! # async fn example() -> mobdrive_core::Result<()> {
//! let manager = SessionManager::with_webdriver(ConfigSource::load())?;
//! let ctx = ContextId::named("smoke");
//!
//! manager
//!     .scoped(&ctx, |session| async move {
//!         let screen = ScreenContext::new(session);
//!         screen.click(&LocatorSpec::accessibility_id("test-LOGIN")).await?;
//!         let title = screen.read_text(&LocatorSpec::accessibility_id("test-Title")).await?;
//!         println!("landed on {}", title);
//!         Ok::<_, mobdrive_core::Error>(())
//!     })
//!     .await
//! # }
//! ```

pub mod capabilities;
pub mod config;
pub mod driver;
pub mod element;
pub mod error;
pub mod interaction;
pub mod locator;
pub mod protocol;
pub mod screen;
pub mod session;
pub mod wait;
pub mod webdriver;

pub use error::{Error, Result};
