//! Native UI-test agent.
//!
//! The native agent runs inside the device as an XCTest bundle and speaks a
//! WebDriver dialect of its own over HTTP. The router forwards most native
//! context commands to it verbatim, and the gesture, key and alert helpers
//! call a few of its endpoints directly. [`NativeAgent`] is the contract the
//! rest of the crate depends on; [`HttpNativeAgent`] is the implementation
//! used against a real agent.
//!
//! # Example
//!
//! ```no_run
//! use mobiwd_core::native::{HttpNativeAgent, NativeAgent, Method};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let agent = HttpNativeAgent::new("127.0.0.1", 8900);
//! agent.start(&serde_json::json!({"bundleId": "com.example.app"})).await?;
//! let reply = agent
//!     .send_command("/wd/hub/session/:sessionId/source", Method::Get, None)
//!     .await?;
//! println!("{}", reply.value);
//! agent.stop().await?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, debug_span, trace, Instrument};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Bundle identifier of the XCTest agent runner.
pub const AGENT_BUNDLE_ID: &str = "XCTestWD.XCTestWD";

/// Timeout for establishing a connection to the agent.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for a whole request/response exchange.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// HTTP verb of a forwarded command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Delete,
}

impl Method {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_uppercase().as_str() {
            "GET" => Some(Method::Get),
            "POST" => Some(Method::Post),
            "DELETE" => Some(Method::Delete),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The agent's answer to one command.
///
/// `raw` is the full body as the agent sent it, which is what a proxied
/// command returns to the caller unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentReply {
    pub status: i64,
    pub value: Value,
    pub raw: Value,
}

impl AgentReply {
    /// Splits a JSON-wire body into status and value.
    ///
    /// A body without `status` is treated as a success (W3C style replies).
    pub fn from_body(raw: Value) -> Self {
        let status = raw.get("status").and_then(Value::as_i64).unwrap_or(0);
        let value = raw.get("value").cloned().unwrap_or(Value::Null);
        Self { status, value, raw }
    }

    pub fn ok(value: Value) -> Self {
        Self::from_body(serde_json::json!({ "status": 0, "value": value }))
    }

    pub fn is_success(&self) -> bool {
        self.status == 0
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur while talking to the native agent.
#[derive(Error, Debug)]
pub enum NativeAgentError {
    /// A command was sent before the agent session was started.
    #[error("native agent session not started")]
    NotStarted,

    /// The HTTP exchange itself failed.
    #[error("native agent transport error: {0}")]
    Transport(String),

    /// The agent answered with something that is not JSON.
    #[error("malformed native agent response: {0}")]
    Decode(String),

    /// The agent refused to create a session.
    #[error("native agent failed to start: {0}")]
    StartFailed(String),
}

// ---------------------------------------------------------------------------
// NativeAgent trait
// ---------------------------------------------------------------------------

/// Contract of the in-device UI-test agent.
#[async_trait]
pub trait NativeAgent: Send + Sync {
    /// Starts an agent session with the filtered desired capabilities.
    async fn start(&self, desired_caps: &Value) -> Result<(), NativeAgentError>;

    /// Ends the agent session.
    async fn stop(&self) -> Result<(), NativeAgentError>;

    /// Sends one command and returns the parsed reply.
    ///
    /// `path` is a full `/wd/hub/session/<id>/...` path; the agent substitutes
    /// its own session id.
    async fn send_command(
        &self,
        path: &str,
        method: Method,
        body: Option<&Value>,
    ) -> Result<AgentReply, NativeAgentError>;
}

/// Replaces the id segment following `/session/` with `session_id`.
///
/// Paths without a session segment are returned unchanged.
pub fn rewrite_session_path(path: &str, session_id: &str) -> String {
    let marker = "/session/";
    let Some(start) = path.find(marker) else {
        return path.to_string();
    };
    let id_start = start + marker.len();
    let id_end = path[id_start..]
        .find('/')
        .map(|i| id_start + i)
        .unwrap_or(path.len());
    format!("{}{}{}", &path[..id_start], session_id, &path[id_end..])
}

// ---------------------------------------------------------------------------
// HttpNativeAgent
// ---------------------------------------------------------------------------

/// [`NativeAgent`] reached over HTTP on a forwarded local port.
pub struct HttpNativeAgent {
    base_url: String,
    client: reqwest::Client,
    session_id: Mutex<Option<String>>,
}

impl HttpNativeAgent {
    /// Creates a client for an agent listening on `host:port`.
    ///
    /// No request is made until [`start`](NativeAgent::start) is called.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            base_url: format!("http://{}:{}", host.into(), port),
            client,
            session_id: Mutex::new(None),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The agent-side session id, once started.
    pub async fn session_id(&self) -> Option<String> {
        self.session_id.lock().await.clone()
    }

    async fn exchange(
        &self,
        path: &str,
        method: Method,
        body: Option<&Value>,
    ) -> Result<Value, NativeAgentError> {
        let url = format!("{}{}", self.base_url, path);
        let request = match method {
            Method::Get => self.client.get(&url),
            Method::Post => self
                .client
                .post(&url)
                .json(body.unwrap_or(&Value::Object(Default::default()))),
            Method::Delete => self.client.delete(&url),
        };

        let response = request
            .send()
            .await
            .map_err(|e| NativeAgentError::Transport(e.to_string()))?;
        let text = response
            .text()
            .await
            .map_err(|e| NativeAgentError::Transport(e.to_string()))?;
        trace!(bytes = text.len(), "agent replied");
        serde_json::from_str(&text).map_err(|e| NativeAgentError::Decode(e.to_string()))
    }
}

#[async_trait]
impl NativeAgent for HttpNativeAgent {
    async fn start(&self, desired_caps: &Value) -> Result<(), NativeAgentError> {
        let body = serde_json::json!({ "desiredCapabilities": desired_caps });
        let raw = self
            .exchange("/wd/hub/session", Method::Post, Some(&body))
            .await?;
        let reply = AgentReply::from_body(raw.clone());
        if !reply.is_success() {
            return Err(NativeAgentError::StartFailed(reply.value.to_string()));
        }

        let id = raw
            .get("sessionId")
            .or_else(|| reply.value.get("sessionId"))
            .and_then(Value::as_str)
            .ok_or_else(|| NativeAgentError::StartFailed("reply carried no sessionId".into()))?;
        debug!(session_id = id, "native agent session started");
        *self.session_id.lock().await = Some(id.to_string());
        Ok(())
    }

    async fn stop(&self) -> Result<(), NativeAgentError> {
        let Some(id) = self.session_id.lock().await.take() else {
            return Ok(());
        };
        self.exchange(&format!("/wd/hub/session/{id}"), Method::Delete, None)
            .await?;
        debug!(session_id = %id, "native agent session stopped");
        Ok(())
    }

    async fn send_command(
        &self,
        path: &str,
        method: Method,
        body: Option<&Value>,
    ) -> Result<AgentReply, NativeAgentError> {
        let id = self
            .session_id
            .lock()
            .await
            .clone()
            .ok_or(NativeAgentError::NotStarted)?;
        let path = rewrite_session_path(path, &id);
        let span = debug_span!("native_send", %method, path = %path);
        async {
            let raw = self.exchange(&path, method, body).await?;
            Ok(AgentReply::from_body(raw))
        }
        .instrument(span)
        .await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rewrite_replaces_session_segment() {
        assert_eq!(
            rewrite_session_path("/wd/hub/session/:sessionId/accept_alert", "abc"),
            "/wd/hub/session/abc/accept_alert"
        );
        assert_eq!(
            rewrite_session_path("/wd/hub/session/temp/tap/null", "abc"),
            "/wd/hub/session/abc/tap/null"
        );
        assert_eq!(rewrite_session_path("/wd/hub/session/x", "abc"), "/wd/hub/session/abc");
        assert_eq!(rewrite_session_path("/keys", "abc"), "/keys");
    }

    #[test]
    fn reply_splits_status_and_value() {
        let reply = AgentReply::from_body(json!({"status": 7, "value": {"message": "gone"}}));
        assert_eq!(reply.status, 7);
        assert!(!reply.is_success());
        assert_eq!(reply.value["message"], "gone");
    }

    #[test]
    fn reply_without_status_is_success() {
        let reply = AgentReply::from_body(json!({"value": "png"}));
        assert!(reply.is_success());
        assert_eq!(reply.value, json!("png"));
    }

    #[test]
    fn method_parse() {
        assert_eq!(Method::parse("get"), Some(Method::Get));
        assert_eq!(Method::parse("POST"), Some(Method::Post));
        assert_eq!(Method::parse("PATCH"), None);
    }

    #[tokio::test]
    async fn send_before_start_is_rejected() {
        let agent = HttpNativeAgent::new("127.0.0.1", 1);
        let result = agent
            .send_command("/wd/hub/session/x/source", Method::Get, None)
            .await;
        assert!(matches!(result, Err(NativeAgentError::NotStarted)));
    }

    #[tokio::test]
    async fn stop_without_session_is_noop() {
        let agent = HttpNativeAgent::new("127.0.0.1", 1);
        assert!(agent.stop().await.is_ok());
    }
}
