//! Element handles.
//!
//! An [`ElementHandle`] points into the remote server's element table. It is
//! only meaningful for the session that produced it, and it may go stale any
//! time the UI re-renders, so every use must tolerate a stale-reference error.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::driver::{ElementId, SessionId};

/// Reference to a UI element found in one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementHandle {
    session_id: SessionId,
    element_id: ElementId,
    /// Human-readable description of the lookup that found the element,
    /// e.g. `accessibility id 'test-LOGIN'`.
    found_by: String,
}

impl ElementHandle {
    pub fn new(session_id: SessionId, element_id: ElementId, found_by: impl Into<String>) -> Self {
        Self {
            session_id,
            element_id,
            found_by: found_by.into(),
        }
    }

    /// The session this handle belongs to.
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// The server-side element id.
    pub fn element_id(&self) -> &ElementId {
        &self.element_id
    }

    pub fn found_by(&self) -> &str {
        &self.found_by
    }

    /// Whether this handle was produced by `session`.
    pub fn belongs_to(&self, session: &SessionId) -> bool {
        &self.session_id == session
    }
}

impl fmt::Display for ElementHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "element {} ({})", self.element_id, self.found_by)
    }
}
