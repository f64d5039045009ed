//! Protocol error taxonomy.
//!
//! Every failure that reaches a WebDriver caller is a [`WdError`]: an
//! [`ErrorKind`] from the fixed JSON-wire status table plus an optional
//! diagnostic message. Backend agents report numeric status codes, which are
//! mapped back into this table with [`ErrorKind::from_code`]; codes outside the
//! table collapse to [`ErrorKind::UnknownError`] rather than failing the
//! mapping itself.

use std::fmt;

use thiserror::Error;

use crate::device::DeviceError;
use crate::native::NativeAgentError;
use crate::remote::RemoteError;
use crate::wait::WaitError;

/// Named error kinds of the JSON-wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NoSuchDriver,
    NoSuchElement,
    NoSuchFrame,
    UnknownCommand,
    StaleElementReference,
    ElementNotVisible,
    InvalidElementState,
    UnknownError,
    ElementIsNotSelectable,
    JavaScriptError,
    XPathLookupError,
    Timeout,
    NoSuchWindow,
    InvalidCookieDomain,
    UnableToSetCookie,
    UnexpectedAlertOpen,
    NoAlertOpenError,
    ScriptTimeout,
    InvalidElementCoordinates,
    InvalidSelector,
    SessionNotCreated,
    MoveTargetOutOfBounds,
    NotImplementedError,
}

/// Code, W3C name, HTTP status, default message.
const TABLE: &[(ErrorKind, i64, &str, u16, &str)] = &[
    (ErrorKind::NoSuchDriver, 6, "invalid session id", 404, "A session is either terminated or not started"),
    (ErrorKind::NoSuchElement, 7, "no such element", 404, "An element could not be located on the page using the given search parameters."),
    (ErrorKind::NoSuchFrame, 8, "no such frame", 404, "A request to switch to a frame could not be satisfied because the frame could not be found."),
    (ErrorKind::UnknownCommand, 9, "unknown command", 404, "The requested resource could not be found, or a request was received using an HTTP method that is not supported by the mapped resource."),
    (ErrorKind::StaleElementReference, 10, "stale element reference", 404, "An element command failed because the referenced element is no longer attached to the DOM."),
    (ErrorKind::ElementNotVisible, 11, "element not visible", 400, "An element command could not be completed because the element is not visible on the page."),
    (ErrorKind::InvalidElementState, 12, "invalid element state", 400, "An element command could not be completed because the element is in an invalid state."),
    (ErrorKind::UnknownError, 13, "unknown error", 500, "An unknown server-side error occurred while processing the command."),
    (ErrorKind::ElementIsNotSelectable, 15, "element not selectable", 400, "An attempt was made to select an element that cannot be selected."),
    (ErrorKind::JavaScriptError, 17, "javascript error", 500, "An error occurred while executing user supplied JavaScript."),
    (ErrorKind::XPathLookupError, 19, "invalid selector", 400, "An error occurred while searching for an element by XPath."),
    (ErrorKind::Timeout, 21, "timeout", 408, "An operation did not complete before its timeout expired."),
    (ErrorKind::NoSuchWindow, 23, "no such window", 404, "A request to switch to a different window could not be satisfied because the window could not be found."),
    (ErrorKind::InvalidCookieDomain, 24, "invalid cookie domain", 400, "An illegal attempt was made to set a cookie under a different domain than the current page."),
    (ErrorKind::UnableToSetCookie, 25, "unable to set cookie", 500, "A request to set a cookie's value could not be satisfied."),
    (ErrorKind::UnexpectedAlertOpen, 26, "unexpected alert open", 500, "A modal dialog was open, blocking this operation."),
    (ErrorKind::NoAlertOpenError, 27, "no such alert", 404, "An attempt was made to operate on a modal dialog when one was not open."),
    (ErrorKind::ScriptTimeout, 28, "script timeout", 408, "A script did not complete before its timeout expired."),
    (ErrorKind::InvalidElementCoordinates, 29, "invalid element coordinates", 400, "The coordinates provided to an interactions operation are invalid."),
    (ErrorKind::InvalidSelector, 32, "invalid selector", 400, "Argument was an invalid selector."),
    (ErrorKind::SessionNotCreated, 33, "session not created", 500, "A new session could not be created."),
    (ErrorKind::MoveTargetOutOfBounds, 34, "move target out of bounds", 500, "Target provided for a move action is out of bounds."),
    (ErrorKind::NotImplementedError, 405, "unsupported operation", 405, "Method has not yet been implemented."),
];

impl ErrorKind {
    fn row(self) -> &'static (ErrorKind, i64, &'static str, u16, &'static str) {
        TABLE
            .iter()
            .find(|row| row.0 == self)
            .unwrap_or(&TABLE[7])
    }

    /// JSON-wire numeric status.
    pub fn code(self) -> i64 {
        self.row().1
    }

    /// W3C error string, e.g. `"no such element"`.
    pub fn w3c_name(self) -> &'static str {
        self.row().2
    }

    /// HTTP status the front end answers with.
    pub fn http_status(self) -> u16 {
        self.row().3
    }

    /// Default human readable description.
    pub fn description(self) -> &'static str {
        self.row().4
    }

    /// Maps a backend status code to a kind.
    ///
    /// Returns `None` for `0` (success). Any code missing from the table
    /// maps to [`ErrorKind::UnknownError`].
    pub fn from_code(code: i64) -> Option<Self> {
        if code == 0 {
            return None;
        }
        Some(
            TABLE
                .iter()
                .find(|row| row.1 == code)
                .map(|row| row.0)
                .unwrap_or(ErrorKind::UnknownError),
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.w3c_name())
    }
}

/// A protocol-visible failure.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind}: {message}")]
pub struct WdError {
    kind: ErrorKind,
    message: String,
}

impl WdError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// An error carrying only the kind's default description.
    pub fn bare(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: kind.description().to_string(),
        }
    }

    /// Builds the error a backend reported through a non-zero status.
    ///
    /// The message is taken from `value.message` when present.
    pub fn from_status(code: i64, value: &serde_json::Value) -> Self {
        let kind = ErrorKind::from_code(code).unwrap_or(ErrorKind::UnknownError);
        match value.get("message").and_then(|m| m.as_str()) {
            Some(msg) => Self::new(kind, msg),
            None => Self::bare(kind),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn no_such_element() -> Self {
        Self::bare(ErrorKind::NoSuchElement)
    }

    pub fn no_such_window() -> Self {
        Self::bare(ErrorKind::NoSuchWindow)
    }

    pub fn no_such_frame() -> Self {
        Self::bare(ErrorKind::NoSuchFrame)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnknownError, message)
    }

    pub fn javascript(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::JavaScriptError, message)
    }

    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotImplementedError, message)
    }

    /// JSON body for an error reply: `{"error": .., "message": ..}`.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "error": self.kind.w3c_name(),
            "message": self.message(),
        })
    }
}

impl From<NativeAgentError> for WdError {
    fn from(err: NativeAgentError) -> Self {
        match err {
            NativeAgentError::Decode(msg) => WdError::javascript(msg),
            other => WdError::unknown(other.to_string()),
        }
    }
}

impl From<RemoteError> for WdError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Malformed(msg) => WdError::javascript(msg),
            other => WdError::unknown(other.to_string()),
        }
    }
}

impl From<DeviceError> for WdError {
    fn from(err: DeviceError) -> Self {
        WdError::unknown(err.to_string())
    }
}

impl From<WaitError> for WdError {
    fn from(err: WaitError) -> Self {
        WdError::new(ErrorKind::Timeout, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_code_has_no_kind() {
        assert_eq!(ErrorKind::from_code(0), None);
    }

    #[test]
    fn known_codes_round_trip() {
        for row in TABLE {
            assert_eq!(ErrorKind::from_code(row.1), Some(row.0));
            assert_eq!(row.0.code(), row.1);
        }
    }

    #[test]
    fn unknown_code_falls_back_to_unknown_error() {
        assert_eq!(ErrorKind::from_code(999), Some(ErrorKind::UnknownError));
        assert_eq!(ErrorKind::from_code(-1), Some(ErrorKind::UnknownError));
    }

    #[test]
    fn from_status_keeps_backend_message() {
        let err = WdError::from_status(17, &json!({"message": "x is not defined"}));
        assert_eq!(err.kind(), ErrorKind::JavaScriptError);
        assert_eq!(err.message(), "x is not defined");
    }

    #[test]
    fn bare_error_uses_default_description() {
        let err = WdError::no_such_element();
        assert!(err.message().contains("could not be located"));
        assert!(err.to_string().starts_with("no such element"));
    }

    #[test]
    fn decode_failures_become_javascript_errors() {
        let err: WdError = NativeAgentError::Decode("expected value".into()).into();
        assert_eq!(err.kind(), ErrorKind::JavaScriptError);
        assert!(err.message().contains("expected value"));
    }

    #[test]
    fn error_value_shape() {
        let value = WdError::no_such_window().to_value();
        assert_eq!(value["error"], "no such window");
        assert!(value["message"].is_string());
    }
}
