use serde::{Deserialize, Serialize};
use std::fmt;

use crate::typed::Event;

/// Stable string tag identifying a concrete event type in the outbox.
///
/// This is what gets persisted, never a language-level type handle, so a
/// record written by one build can be resolved by the next one as long as
/// the tag is kept. Naming convention: `{namespace}.{aggregate}.{event}.v{major}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventTypeId(String);

impl EventTypeId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn of<E: Event>() -> Self {
        Self(E::TYPE.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for EventTypeId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}
