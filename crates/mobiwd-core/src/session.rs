//! One automated run.
//!
//! A [`Session`] owns everything a run mutates: the context state, the
//! element registry, the implicit wait, the alert policy and the device it
//! drives. Callers feed it one request at a time through
//! [`Session::handle`]; the session never processes two commands at once.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use mobiwd_core::caps::Capabilities;
//! use mobiwd_core::device::Simctl;
//! use mobiwd_core::native::{HttpNativeAgent, Method};
//! use mobiwd_core::session::{Session, SessionDeps};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let deps = SessionDeps::new(
//!     Arc::new(HttpNativeAgent::new("127.0.0.1", 8900)),
//!     Arc::new(Simctl),
//! );
//! let mut session = Session::new(deps);
//!
//! let caps = Capabilities::from_request(&serde_json::json!({
//!     "desiredCapabilities": {"deviceName": "iPhone 15", "bundleId": "com.example.app"}
//! }))?;
//! session.start(caps).await?;
//!
//! let path = format!("/wd/hub/session/{}/contexts", session.id());
//! let reply = session.handle(Method::Get, &path, serde_json::Value::Null).await?;
//! println!("{:?}", reply);
//! session.stop().await;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::alert::AlertPolicy;
use crate::caps::Capabilities;
use crate::commands::{self, ContentCommands, Guarded, Translator};
use crate::context::{Context, ContextManager};
use crate::device::{DeviceHost, DeviceKind, DeviceProvider};
use crate::error::WdError;
use crate::gesture;
use crate::lifecycle::{self, AppTarget, LifecycleConfig};
use crate::native::{Method, NativeAgent};
use crate::registry::ElementRegistry;
use crate::remote::ContentAgentFactory;
use crate::router::{self, Command, Route};
use crate::wait::DEFAULT_WAIT_TIMEOUT;

const KEYS_PATH: &str = "/wd/hub/session/:sessionId/keys";
const HOMESCREEN_PATH: &str = "/wd/hub/session/:sessionId/homescreen";
const SCREENSHOT_PATH: &str = "/wd/hub/session/:sessionId/screenshot";

/// WebDriver key code that sends the device to the home screen.
pub const HOME_KEY: char = '\u{E105}';

/// Pause after opening a URL on the device, before looking for its page.
const URL_SETTLE: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

/// Collaborators a session is built from.
pub struct SessionDeps {
    pub native: Arc<dyn NativeAgent>,
    pub host: Arc<dyn DeviceHost>,
    /// Creates the content-debugging agent for a device. Without one, no web
    /// contexts are ever discovered.
    pub content: Option<ContentAgentFactory>,
    pub lifecycle: LifecycleConfig,
    pub implicit_wait: Duration,
    pub url_settle: Duration,
}

impl SessionDeps {
    pub fn new(native: Arc<dyn NativeAgent>, host: Arc<dyn DeviceHost>) -> Self {
        Self {
            native,
            host,
            content: None,
            lifecycle: LifecycleConfig::default(),
            implicit_wait: DEFAULT_WAIT_TIMEOUT,
            url_settle: URL_SETTLE,
        }
    }

    pub fn with_content(mut self, factory: ContentAgentFactory) -> Self {
        self.content = Some(factory);
        self
    }
}

/// What a command produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// The native agent's reply body, returned to the client as is.
    Native(Value),
    /// A value computed by the driver; the caller wraps it.
    Driver(Value),
}

pub struct Session {
    id: String,
    caps: Capabilities,
    native: Arc<dyn NativeAgent>,
    host: Arc<dyn DeviceHost>,
    device: Option<Arc<dyn DeviceProvider>>,
    target: Option<AppTarget>,
    contexts: ContextManager,
    registry: ElementRegistry<Value>,
    implicit_wait: Duration,
    alerts: AlertPolicy,
    lifecycle: LifecycleConfig,
    url_settle: Duration,
}

impl Session {
    pub fn new(deps: SessionDeps) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            caps: Capabilities::default(),
            native: deps.native,
            host: deps.host,
            device: None,
            target: None,
            contexts: ContextManager::new(deps.content),
            registry: ElementRegistry::new(),
            implicit_wait: deps.implicit_wait,
            alerts: AlertPolicy::Unset,
            lifecycle: deps.lifecycle,
            url_settle: deps.url_settle,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn caps(&self) -> &Capabilities {
        &self.caps
    }

    pub fn is_safari(&self) -> bool {
        self.target.as_ref().is_some_and(|t| t.safari)
    }

    pub fn contexts(&self) -> &ContextManager {
        &self.contexts
    }

    pub fn registry(&self) -> &ElementRegistry<Value> {
        &self.registry
    }

    pub fn implicit_wait(&self) -> Duration {
        self.implicit_wait
    }

    pub fn alert_policy(&self) -> AlertPolicy {
        self.alerts
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Prepares the device, starts the agents and returns the capabilities
    /// the session runs with.
    pub async fn start(&mut self, mut caps: Capabilities) -> Result<Value, WdError> {
        let span = info_span!("start_session", session_id = %self.id);
        async move {
            self.alerts = AlertPolicy::from_caps(&caps);
            debug!(policy = ?self.alerts, "alert policy decided");
            self.caps = caps.clone();

            let udid = lifecycle::resolve_udid(self.host.as_ref(), &caps).await?;
            let kind = DeviceKind::from_udid(&udid);
            let target = lifecycle::resolve_target(self.host.as_ref(), &caps).await?;
            info!(%udid, ?kind, bundle_id = %target.bundle_id, safari = target.safari, "starting device");

            let device = self.host.attach(&udid, kind)?;
            self.device = Some(device.clone());
            self.contexts.set_udid(udid.clone());
            caps.udid = Some(udid);

            lifecycle::prepare_simulator(
                self.host.as_ref(),
                device.as_ref(),
                &mut caps,
                &target.bundle_id,
                &self.lifecycle,
            )
            .await?;

            let desired = caps.filtered_for_agent(
                Some(target.bundle_id.as_str()),
                kind == DeviceKind::Simulator,
            );
            self.contexts.set_proxying(!target.safari);
            self.target = Some(target.clone());

            lifecycle::start_native_agent(
                self.native.as_ref(),
                device.as_ref(),
                &desired,
                &self.lifecycle,
            )
            .await?;

            if target.safari {
                self.start_safari().await?;
            }

            self.caps = caps;
            info!("session started");
            serde_json::to_value(&self.caps).map_err(|e| WdError::unknown(e.to_string()))
        }
        .instrument(span)
        .await
    }

    async fn start_safari(&mut self) -> Result<(), WdError> {
        lifecycle::wait_for_first_page(&mut self.contexts, &self.lifecycle).await?;
        let page = self
            .contexts
            .attach_latest()
            .await?
            .ok_or_else(WdError::no_such_window)?;
        debug!(page = page.id, url = %page.url, "attached to safari page");
        self.contexts.set_proxying(false);
        self.guarded().delete_window().await?;
        Ok(())
    }

    /// Tears the session down. Every step runs even when an earlier one
    /// failed; failures are only logged.
    pub async fn stop(&mut self) {
        let span = info_span!("stop_session", session_id = %self.id);
        async move {
            debug!("stopping driver");
            if let Err(e) = self.native.stop().await {
                warn!(error = %e, "stopping native agent failed");
            }
            if let Err(e) = self.contexts.shutdown().await {
                warn!(error = %e, "stopping content agent failed");
            }
            if let (Some(device), false) = (&self.device, self.caps.reuse.keeps_device()) {
                if let Err(e) = device.shutdown().await {
                    warn!(udid = device.udid(), error = %e, "shutting down simulator failed");
                }
                if let Err(e) = self.host.kill_all().await {
                    warn!(error = %e, "killing simulators failed");
                }
            }
            self.registry.clear();
            info!("driver cleaned up");
        }
        .instrument(span)
        .await
    }

    // -----------------------------------------------------------------------
    // Command handling
    // -----------------------------------------------------------------------

    /// Routes one request.
    ///
    /// `path` is the full request path, `/wd/hub/session/<id>/...`; `body` is
    /// `Null` for requests without one.
    pub async fn handle(&mut self, method: Method, path: &str, body: Value) -> Result<Reply, WdError> {
        let command = router::command_path(path);
        let route = router::classify(command, self.contexts.is_proxying());
        let span = info_span!("handle", %method, command, ?route);
        async move {
            match route {
                Route::NativeProxy => self.proxy(method, path, &body).await.map(Reply::Native),
                Route::Driver | Route::Content => {
                    let parsed = Command::parse(method, command, &body)?;
                    self.run(parsed).await.map(Reply::Driver)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn proxy(&self, method: Method, path: &str, body: &Value) -> Result<Value, WdError> {
        self.alerts.apply(self.native.as_ref()).await;
        let body = (!body.is_null()).then_some(body);
        let reply = self.native.send_command(path, method, body).await?;
        Ok(reply.raw)
    }

    fn guarded(&mut self) -> Guarded<'_, Translator<'_>> {
        let translator = Translator::new(&mut self.contexts, &mut self.registry, self.implicit_wait);
        Guarded::new(translator, self.alerts, self.native.as_ref())
    }

    async fn run(&mut self, command: Command) -> Result<Value, WdError> {
        match command {
            Command::GetContexts => {
                let catalog = self.contexts.refresh().await?;
                Ok(catalog.into_iter().map(Context::context_name).collect())
            }
            Command::GetContext => {
                self.contexts.ensure_active().await?;
                Ok(Value::String(self.contexts.active().context_name()))
            }
            Command::SetContext(name) => {
                let target = Context::from_name(name.as_deref())?;
                self.contexts.set_context(target).await?;
                Ok(Value::Null)
            }
            Command::GetWindows => self.get_windows().await,
            Command::SetWindow(name) => self.set_window(&name).await,
            Command::Navigate(url) => self.navigate(&url).await,
            Command::Screenshot => self.screenshot().await,
            Command::SetImplicitWait(ms) => {
                self.implicit_wait = Duration::from_millis(ms);
                debug!(ms, "implicit wait set");
                Ok(Value::Null)
            }
            Command::IgnoreTimeout(kind) => {
                debug!(kind = %kind, "timeout ignored");
                Ok(Value::Null)
            }
            Command::Actions(actions) => gesture::perform(self.native.as_ref(), &actions).await,
            Command::Keys(values) => self.keys(&values).await,
            other => commands::dispatch(&mut self.guarded(), other).await,
        }
    }

    // -----------------------------------------------------------------------
    // Driver-local commands
    // -----------------------------------------------------------------------

    async fn get_windows(&mut self) -> Result<Value, WdError> {
        if !self.is_safari() {
            return Err(WdError::no_such_window());
        }
        let catalog = self.contexts.refresh().await?;
        Ok(catalog.into_iter().filter_map(Context::window_name).collect())
    }

    async fn set_window(&mut self, name: &str) -> Result<Value, WdError> {
        match Context::from_name(Some(name))? {
            Context::Native => Err(WdError::no_such_window()),
            target => {
                self.contexts.set_context(target).await?;
                Ok(Value::Null)
            }
        }
    }

    async fn navigate(&mut self, url: &str) -> Result<Value, WdError> {
        if !(self.is_safari() || self.contexts.is_proxying()) {
            debug!(url, "navigating connected page");
            self.contexts.navigate(url).await?;
            return Ok(Value::Null);
        }

        let device = self
            .device
            .clone()
            .ok_or_else(|| WdError::unknown("no device attached"))?;
        device.open_url(url).await?;
        tokio::time::sleep(self.url_settle).await;

        match self.contexts.attach_latest().await? {
            Some(page) => debug!(page = page.id, "attached to opened page"),
            None => debug!(url, "no page found after opening url"),
        }
        self.contexts.set_frame(None);
        Ok(Value::Null)
    }

    async fn screenshot(&self) -> Result<Value, WdError> {
        let reply = self
            .native
            .send_command(SCREENSHOT_PATH, Method::Get, None)
            .await?;
        if !reply.is_success() {
            return Err(WdError::from_status(reply.status, &reply.value));
        }
        Ok(reply.value)
    }

    /// Types key strings through the native agent. Runs of ordinary
    /// characters are sent together; the home key flushes them first.
    async fn keys(&self, values: &[String]) -> Result<Value, WdError> {
        let mut pending: Vec<String> = Vec::new();
        for key in values.concat().chars() {
            if key == HOME_KEY {
                self.flush_keys(&mut pending).await?;
                self.send_native(HOMESCREEN_PATH, json!({})).await?;
            } else {
                pending.push(key.to_string());
            }
        }
        self.flush_keys(&mut pending).await?;
        Ok(Value::Null)
    }

    async fn flush_keys(&self, pending: &mut Vec<String>) -> Result<(), WdError> {
        if pending.is_empty() {
            return Ok(());
        }
        let text = std::mem::take(pending);
        self.send_native(KEYS_PATH, json!({ "value": text })).await
    }

    async fn send_native(&self, path: &str, body: Value) -> Result<(), WdError> {
        let reply = self
            .native
            .send_command(path, Method::Post, Some(&body))
            .await?;
        if reply.is_success() {
            Ok(())
        } else {
            Err(WdError::from_status(reply.status, &reply.value))
        }
    }
}
