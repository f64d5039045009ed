//! Command classification and parsing.
//!
//! Every request that reaches a session passes [`classify`] first:
//!
//! - [`Route::Driver`]: the command is on the driver whitelist (context and
//!   url handling, screenshots, timeouts, gestures, keys) and is always
//!   handled by the session itself.
//! - [`Route::NativeProxy`]: native proxying is on and the command is not on
//!   the whitelist. The request is forwarded verbatim to the native agent.
//! - [`Route::Content`]: everything else. The request is parsed into a
//!   [`Command`] and translated into content-debugging calls.

use serde_json::Value;

use crate::error::WdError;
use crate::native::Method;
use crate::registry::PublicHandle;

/// Path fragments the session always handles itself.
pub const DRIVER_WHITELIST: &[&str] = &[
    "url",
    "context",
    "contexts",
    "screenshot",
    "implicit_wait",
    "timeouts",
    "actions",
    "keys",
];

/// Where a command goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Driver,
    NativeProxy,
    Content,
}

/// The part of a request path after `/session/<id>/`, without a trailing
/// slash. Returns the input when it has no session segment.
pub fn command_path(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    let Some(start) = trimmed.find("/session/") else {
        return trimmed.trim_start_matches('/');
    };
    let rest = &trimmed[start + "/session/".len()..];
    match rest.find('/') {
        Some(idx) => &rest[idx + 1..],
        None => "",
    }
}

pub fn is_whitelisted(command: &str) -> bool {
    DRIVER_WHITELIST.iter().any(|word| command.contains(word))
}

/// Decides the route of a command path.
pub fn classify(command: &str, proxying: bool) -> Route {
    if is_whitelisted(command) {
        Route::Driver
    } else if proxying {
        Route::NativeProxy
    } else {
        Route::Content
    }
}

/// A parsed session command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    GetContexts,
    GetContext,
    SetContext(Option<String>),
    GetWindow,
    GetWindows,
    SetWindow(String),
    DeleteWindow,
    GetUrl,
    Navigate(String),
    FindElement {
        using: String,
        value: String,
        root: Option<PublicHandle>,
    },
    FindElements {
        using: String,
        value: String,
        root: Option<PublicHandle>,
    },
    Click(PublicHandle),
    GetText(PublicHandle),
    Clear(PublicHandle),
    SetValue(PublicHandle, Value),
    Execute {
        script: String,
        args: Vec<Value>,
    },
    Title,
    Source,
    Back,
    Forward,
    Refresh,
    SetFrame(Value),
    Screenshot,
    SetImplicitWait(u64),
    /// A timeout kind the driver accepts without acting on, such as
    /// `page load` or `script`.
    IgnoreTimeout(String),
    Actions(Value),
    Keys(Vec<String>),
}

impl Command {
    /// Parses a command from its method, command path and body.
    ///
    /// Unknown commands are "not implemented"; element ids that are not
    /// numbers can never name a live element.
    pub fn parse(method: Method, command: &str, body: &Value) -> Result<Self, WdError> {
        let segments: Vec<&str> = command.split('/').filter(|s| !s.is_empty()).collect();

        let parsed = match (method, segments.as_slice()) {
            (Method::Get, ["contexts"]) => Command::GetContexts,
            (Method::Get, ["context"]) => Command::GetContext,
            (Method::Post, ["context"]) => {
                Command::SetContext(body.get("name").and_then(Value::as_str).map(str::to_string))
            }

            (Method::Get, ["window_handle"]) | (Method::Get, ["window"]) => Command::GetWindow,
            (Method::Get, ["window_handles"]) | (Method::Get, ["window", "handles"]) => {
                Command::GetWindows
            }
            (Method::Post, ["window"]) => {
                let name = body
                    .get("name")
                    .or_else(|| body.get("handle"))
                    .and_then(Value::as_str)
                    .ok_or_else(|| missing("name"))?;
                Command::SetWindow(name.to_string())
            }
            (Method::Delete, ["window"]) => Command::DeleteWindow,

            (Method::Get, ["url"]) => Command::GetUrl,
            (Method::Post, ["url"]) => Command::Navigate(required_str(body, "url")?),

            (Method::Post, ["element"]) => {
                let (using, value) = locator(body)?;
                Command::FindElement { using, value, root: None }
            }
            (Method::Post, ["elements"]) => {
                let (using, value) = locator(body)?;
                Command::FindElements { using, value, root: None }
            }
            (Method::Post, ["element", id, "element"]) => {
                let (using, value) = locator(body)?;
                Command::FindElement { using, value, root: Some(handle(id)?) }
            }
            (Method::Post, ["element", id, "elements"]) => {
                let (using, value) = locator(body)?;
                Command::FindElements { using, value, root: Some(handle(id)?) }
            }
            (Method::Post, ["element", id, "click"]) => Command::Click(handle(id)?),
            (Method::Get, ["element", id, "text"]) => Command::GetText(handle(id)?),
            (Method::Post, ["element", id, "clear"]) => Command::Clear(handle(id)?),
            (Method::Post, ["element", id, "value"]) => {
                Command::SetValue(handle(id)?, typed_text(body))
            }

            (Method::Post, ["execute"])
            | (Method::Post, ["execute", "sync"])
            | (Method::Post, ["execute_sync"]) => Command::Execute {
                script: required_str(body, "script")?,
                args: body
                    .get("args")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default(),
            },

            (Method::Get, ["title"]) => Command::Title,
            (Method::Get, ["source"]) => Command::Source,
            (Method::Post, ["back"]) => Command::Back,
            (Method::Post, ["forward"]) => Command::Forward,
            (Method::Post, ["refresh"]) => Command::Refresh,
            (Method::Post, ["frame"]) => {
                Command::SetFrame(body.get("id").cloned().unwrap_or(Value::Null))
            }

            (Method::Get, ["screenshot"]) => Command::Screenshot,
            (Method::Post, ["timeouts", "implicit_wait"]) => {
                Command::SetImplicitWait(required_ms(body, "ms")?)
            }
            (Method::Post, ["timeouts"]) => timeouts(body)?,
            (Method::Post, ["actions"]) => Command::Actions(
                body.get("actions")
                    .cloned()
                    .ok_or_else(|| WdError::unknown("Missing 'actions' in parameters."))?,
            ),
            (Method::Post, ["keys"]) => Command::Keys(key_values(body)),

            _ => {
                return Err(WdError::not_implemented(format!(
                    "{method} /{command} is not supported"
                )))
            }
        };
        Ok(parsed)
    }
}

fn missing(key: &str) -> WdError {
    WdError::unknown(format!("Missing '{key}' in parameters."))
}

fn required_str(body: &Value, key: &str) -> Result<String, WdError> {
    body.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| missing(key))
}

fn required_ms(body: &Value, key: &str) -> Result<u64, WdError> {
    body.get(key)
        .and_then(|v| v.as_u64().or_else(|| v.as_f64().map(|f| f.max(0.0) as u64)))
        .ok_or_else(|| missing(key))
}

/// JSON-wire sends `{"type", "ms"}`; W3C sends one key per timeout kind.
/// Only the implicit wait is kept.
fn timeouts(body: &Value) -> Result<Command, WdError> {
    if let Some(kind) = body.get("type").and_then(Value::as_str) {
        return match kind {
            "implicit" => Ok(Command::SetImplicitWait(required_ms(body, "ms")?)),
            other => Ok(Command::IgnoreTimeout(other.to_string())),
        };
    }
    if body.get("implicit").is_some_and(|v| !v.is_null()) {
        return Ok(Command::SetImplicitWait(required_ms(body, "implicit")?));
    }
    let kinds = body
        .as_object()
        .map(|map| map.keys().cloned().collect::<Vec<_>>().join(","))
        .unwrap_or_default();
    Ok(Command::IgnoreTimeout(kinds))
}

fn locator(body: &Value) -> Result<(String, String), WdError> {
    Ok((required_str(body, "using")?, required_str(body, "value")?))
}

fn handle(raw: &str) -> Result<PublicHandle, WdError> {
    PublicHandle::parse(raw).ok_or_else(WdError::no_such_element)
}

/// Text to type: JSON-wire sends `value` as an array of strings, W3C sends
/// `text`.
fn typed_text(body: &Value) -> Value {
    if let Some(text) = body.get("text").and_then(Value::as_str) {
        return Value::String(text.to_string());
    }
    match body.get("value") {
        Some(Value::Array(parts)) => Value::String(
            parts
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .concat(),
        ),
        Some(other) => other.clone(),
        None => Value::String(String::new()),
    }
}

fn key_values(body: &Value) -> Vec<String> {
    match body.get("value").or_else(|| body.get("text")) {
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::String(s)) => vec![s.clone()],
        _ => Vec::new(),
    }
}
