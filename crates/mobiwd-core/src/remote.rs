//! Content-debugging agent contract.
//!
//! Web content inside Safari or an app's webviews is driven through the
//! platform's remote web inspector. Page discovery and the inspector wire
//! protocol live outside this crate; the router only needs the operations in
//! [`ContentAgent`]. A session receives a [`ContentAgentFactory`] and creates
//! the agent lazily, the first time content surfaces are queried.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Identifier the inspector assigns to an open page.
pub type PageId = u64;

/// One inspectable page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub id: PageId,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: String,
}

/// Result of running a named content operation ("atom").
///
/// `status` uses the JSON-wire numeric table; `0` is success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtomResult {
    pub status: i64,
    #[serde(default)]
    pub value: Value,
}

impl AtomResult {
    pub fn ok(value: Value) -> Self {
        Self { status: 0, value }
    }

    pub fn failed(status: i64, message: impl Into<String>) -> Self {
        Self {
            status,
            value: serde_json::json!({ "message": message.into() }),
        }
    }
}

/// Errors raised by a content-debugging agent.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RemoteError {
    /// No page connection is open.
    #[error("not connected to a page")]
    NotConnected,

    /// The page with the given id is gone.
    #[error("page {0} is not available")]
    PageUnavailable(PageId),

    /// The inspector connection failed.
    #[error("remote debugger error: {0}")]
    Transport(String),

    /// The inspector answered with a payload that could not be decoded.
    #[error("malformed remote debugger response: {0}")]
    Malformed(String),
}

/// Operations of the remote web inspector used by the router.
///
/// All methods take `&self`; implementations keep their connection state
/// behind interior mutability.
#[async_trait]
pub trait ContentAgent: Send + Sync {
    async fn start(&self) -> Result<(), RemoteError>;

    async fn stop(&self) -> Result<(), RemoteError>;

    /// Lists the pages currently open on the device.
    async fn pages(&self) -> Result<Vec<Page>, RemoteError>;

    async fn connect(&self, page: PageId) -> Result<(), RemoteError>;

    async fn disconnect(&self) -> Result<(), RemoteError>;

    async fn navigate_to(&self, url: &str) -> Result<(), RemoteError>;

    /// Runs a named content operation with `args` inside the nested frames
    /// listed in `frames` (outermost first; empty for the top document).
    async fn send_command(
        &self,
        atom: &str,
        args: Vec<Value>,
        frames: &[Value],
    ) -> Result<AtomResult, RemoteError>;
}

/// Builds a content agent for a device udid.
pub type ContentAgentFactory = Arc<dyn Fn(&str) -> Arc<dyn ContentAgent> + Send + Sync>;
