//! Automatic alert handling.
//!
//! Clients may ask for system alerts to be accepted or dismissed before every
//! command. The choice is made once when the session starts and is read, not
//! re-evaluated, for every command afterwards.

use serde_json::json;
use tracing::{debug, warn};

use crate::caps::Capabilities;
use crate::native::{Method, NativeAgent};

const ACCEPT_ALERT_PATH: &str = "/wd/hub/session/:sessionId/accept_alert";
const DISMISS_ALERT_PATH: &str = "/wd/hub/session/:sessionId/dismiss_alert";

/// What to do with an open alert before running a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlertPolicy {
    /// The session has not started yet.
    #[default]
    Unset,
    Accept,
    Dismiss,
    NoOp,
}

impl AlertPolicy {
    /// Decides the policy from capabilities. Accept wins over dismiss.
    pub fn from_caps(caps: &Capabilities) -> Self {
        if caps.auto_accept_alerts {
            AlertPolicy::Accept
        } else if caps.auto_dismiss_alerts {
            AlertPolicy::Dismiss
        } else {
            AlertPolicy::NoOp
        }
    }

    fn path(self) -> Option<&'static str> {
        match self {
            AlertPolicy::Accept => Some(ACCEPT_ALERT_PATH),
            AlertPolicy::Dismiss => Some(DISMISS_ALERT_PATH),
            AlertPolicy::Unset | AlertPolicy::NoOp => None,
        }
    }

    /// Runs the hook against the native agent.
    ///
    /// Having no alert open is the common case, so the agent's answer is not
    /// inspected and transport failures are only logged.
    pub async fn apply(self, native: &dyn NativeAgent) {
        let Some(path) = self.path() else {
            return;
        };
        match native.send_command(path, Method::Post, Some(&json!({}))).await {
            Ok(reply) => debug!(policy = ?self, status = reply.status, "alert hook ran"),
            Err(e) => warn!(policy = ?self, error = %e, "alert hook failed"),
        }
    }
}
