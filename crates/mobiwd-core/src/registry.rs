//! Public element handles.
//!
//! The content-debugging agent hands out its own node identifiers, which are
//! only meaningful for the page connection that produced them and may be
//! reused after a reconnect. Callers never see those. Every backend handle is
//! appended to an [`ElementRegistry`] and the caller receives a
//! [`PublicHandle`] derived from its position, offset into a band
//! ([`ELEMENT_OFFSET`] and up) that no backend would produce.
//!
//! The registry is append-only for the life of a session, so a public handle
//! can never start pointing at a different node. Handles that were never
//! issued resolve to `None`.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// First public handle value.
pub const ELEMENT_OFFSET: u64 = 1000;

/// JSON-wire key of an element reference.
pub const ELEMENT_KEY: &str = "ELEMENT";

/// W3C key of an element reference, accepted on input.
pub const W3C_ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// A caller-visible element identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PublicHandle(u64);

impl PublicHandle {
    pub fn get(self) -> u64 {
        self.0
    }

    /// Parses a handle from a URL segment or a JSON element reference value.
    pub fn parse(raw: &str) -> Option<Self> {
        raw.trim().parse().ok().map(PublicHandle)
    }

    /// Extracts the handle from `{"ELEMENT": ..}` or the W3C equivalent.
    ///
    /// The id may be a number or a numeric string.
    pub fn from_reference(value: &Value) -> Option<Self> {
        let id = element_id(value)?;
        match id {
            Value::Number(n) => n.as_u64().map(PublicHandle),
            Value::String(s) => Self::parse(s),
            _ => None,
        }
    }

    /// Serialises the handle as a JSON-wire element reference.
    pub fn to_reference(self) -> Value {
        serde_json::json!({ ELEMENT_KEY: self.0 })
    }
}

impl From<u64> for PublicHandle {
    fn from(raw: u64) -> Self {
        PublicHandle(raw)
    }
}

impl fmt::Display for PublicHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Returns the id stored under an element-reference key, if `value` is one.
pub fn element_id(value: &Value) -> Option<&Value> {
    let obj = value.as_object()?;
    obj.get(ELEMENT_KEY)
        .or_else(|| obj.get(W3C_ELEMENT_KEY))
        .filter(|id| !id.is_null())
}

/// Append-only mapping from public handles to backend handles.
#[derive(Debug, Clone)]
pub struct ElementRegistry<H> {
    entries: Vec<H>,
}

impl<H> Default for ElementRegistry<H> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<H> ElementRegistry<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a backend handle and returns its public handle.
    ///
    /// `None` means "no element" and is passed through without touching the
    /// registry.
    pub fn intern(&mut self, backend: Option<H>) -> Option<PublicHandle> {
        let backend = backend?;
        self.entries.push(backend);
        Some(PublicHandle(ELEMENT_OFFSET + (self.entries.len() as u64 - 1)))
    }

    /// Looks up the backend handle behind a public handle.
    ///
    /// Returns `None` for handles outside the issued range, including values
    /// below the offset band.
    pub fn resolve(&self, handle: PublicHandle) -> Option<&H> {
        let index = handle.0.checked_sub(ELEMENT_OFFSET)?;
        let index = usize::try_from(index).ok()?;
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every entry. Only called at session teardown.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
