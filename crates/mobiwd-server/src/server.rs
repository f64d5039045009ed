//! HTTP routes and the table of live sessions.
//!
//! Every created session lives behind its own `tokio::sync::Mutex`, so
//! commands for one session run one at a time while different sessions
//! proceed independently.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, delete, get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use mobiwd_core::caps::Capabilities;
use mobiwd_core::config::DriverConfig;
use mobiwd_core::device::Simctl;
use mobiwd_core::error::{ErrorKind, WdError};
use mobiwd_core::native::{HttpNativeAgent, Method};
use mobiwd_core::session::{Reply, Session, SessionDeps};

/// Live sessions plus the settings new ones are created with.
pub struct ServerState {
    config: DriverConfig,
    sessions: Mutex<HashMap<String, Arc<Mutex<Session>>>>,
}

pub type SharedState = Arc<ServerState>;

impl ServerState {
    pub fn new(config: DriverConfig) -> Self {
        info!(
            proxy_port = config.proxy_port,
            agent_host = %config.agent_host,
            implicit_wait_ms = config.implicit_wait_ms,
            "ServerState initialised"
        );
        Self {
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    async fn session(&self, id: &str) -> Option<Arc<Mutex<Session>>> {
        self.sessions.lock().await.get(id).cloned()
    }

    fn new_session(&self, caps: &Capabilities) -> Session {
        let port = caps.proxy_port.unwrap_or(self.config.proxy_port);
        let native = HttpNativeAgent::new(self.config.agent_host.clone(), port);
        debug!(base_url = native.base_url(), "native agent endpoint");

        let mut deps = SessionDeps::new(Arc::new(native), Arc::new(Simctl));
        deps.implicit_wait = self.config.implicit_wait();
        Session::new(deps)
    }

    /// Tears down every session. Used on shutdown.
    pub async fn stop_all(&self) {
        let sessions: Vec<_> = self.sessions.lock().await.drain().collect();
        for (id, session) in sessions {
            info!(session_id = %id, "stopping session");
            session.lock().await.stop().await;
        }
    }
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/wd/hub/status", get(status))
        .route("/wd/hub/session", post(create_session))
        .route("/wd/hub/session/{id}", delete(delete_session))
        .route("/wd/hub/session/{id}/{*command}", any(session_command))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Reply shapes
// ---------------------------------------------------------------------------

fn success(session_id: Option<&str>, value: Value) -> Response {
    Json(json!({ "sessionId": session_id, "status": 0, "value": value })).into_response()
}

fn failure(session_id: Option<&str>, err: &WdError) -> Response {
    let status = StatusCode::from_u16(err.kind().http_status())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = json!({
        "sessionId": session_id,
        "status": err.kind().code(),
        "value": err.to_value(),
    });
    (status, Json(body)).into_response()
}

fn no_such_session(id: &str) -> WdError {
    WdError::new(ErrorKind::NoSuchDriver, format!("Session {id} does not exist"))
}

fn parse_body(raw: &[u8]) -> Result<Value, WdError> {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(raw)
        .map_err(|e| WdError::unknown(format!("Malformed request body: {e}")))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn status(State(state): State<SharedState>) -> Response {
    let count = state.sessions.lock().await.len();
    success(None, json!({ "ready": true, "sessions": count }))
}

async fn create_session(State(state): State<SharedState>, body: Bytes) -> Response {
    let caps = match parse_body(&body).and_then(|body| {
        Capabilities::from_request(&body)
            .map_err(|e| WdError::new(ErrorKind::SessionNotCreated, e.to_string()))
    }) {
        Ok(caps) => caps,
        Err(e) => return failure(None, &e),
    };

    let mut session = state.new_session(&caps);
    let id = session.id().to_string();
    info!(session_id = %id, "creating session");

    match session.start(caps).await {
        Ok(value) => {
            state
                .sessions
                .lock()
                .await
                .insert(id.clone(), Arc::new(Mutex::new(session)));
            success(Some(&id), value)
        }
        Err(e) => {
            warn!(session_id = %id, error = %e, "session start failed");
            session.stop().await;
            failure(Some(&id), &e)
        }
    }
}

async fn delete_session(State(state): State<SharedState>, Path(id): Path<String>) -> Response {
    let Some(session) = state.sessions.lock().await.remove(&id) else {
        return failure(Some(&id), &no_such_session(&id));
    };
    session.lock().await.stop().await;
    info!(session_id = %id, "session deleted");
    success(Some(&id), Value::Null)
}

async fn session_command(
    State(state): State<SharedState>,
    Path((id, _command)): Path<(String, String)>,
    method: axum::http::Method,
    uri: Uri,
    body: Bytes,
) -> Response {
    let Some(method) = Method::parse(method.as_str()) else {
        let err = WdError::new(ErrorKind::UnknownCommand, format!("Unsupported method {method}"));
        return failure(Some(&id), &err);
    };
    let body = match parse_body(&body) {
        Ok(body) => body,
        Err(e) => return failure(Some(&id), &e),
    };
    let Some(session) = state.session(&id).await else {
        return failure(Some(&id), &no_such_session(&id));
    };

    let mut session = session.lock().await;
    match session.handle(method, uri.path(), body).await {
        Ok(Reply::Native(raw)) => Json(raw).into_response(),
        Ok(Reply::Driver(value)) => success(Some(&id), value),
        Err(e) => {
            debug!(session_id = %id, error = %e, "command failed");
            failure(Some(&id), &e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_body_is_null() {
        assert_eq!(parse_body(b"").unwrap(), Value::Null);
        assert_eq!(parse_body(b" \n").unwrap(), Value::Null);
        assert_eq!(parse_body(br#"{"ms": 5}"#).unwrap(), json!({"ms": 5}));
    }

    #[test]
    fn malformed_body_is_unknown_error() {
        let err = parse_body(b"{not json").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownError);
    }

    #[test]
    fn failures_carry_code_and_http_status() {
        let response = failure(Some("s1"), &WdError::no_such_element());
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = failure(None, &WdError::unknown("boom"));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn unknown_session_is_rejected() {
        let state = Arc::new(ServerState::new(DriverConfig::default()));
        let response = delete_session(State(state), Path("missing".to_string())).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
