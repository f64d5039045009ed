//! Shared test helpers for mobiwd-core integration tests.
//!
//! Scripted stand-ins for the three external collaborators: a native agent
//! that records every command, a content agent with programmable pages and
//! atom results, and a fake simulator host.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use mobiwd_core::caps::Capabilities;
use mobiwd_core::device::{DeviceError, DeviceHost, DeviceKind, DeviceProvider, SimulatorDevice};
use mobiwd_core::lifecycle::LifecycleConfig;
use mobiwd_core::native::{AgentReply, Method, NativeAgent, NativeAgentError};
use mobiwd_core::remote::{AtomResult, ContentAgent, ContentAgentFactory, Page, PageId, RemoteError};
use mobiwd_core::session::{Reply, Session, SessionDeps};

pub const UDID: &str = "5D1A7F2C-0B6E-4C38-9A51-3E7D2B8F4A10";
pub const BUNDLE_ID: &str = "com.example.app";

// ---------------------------------------------------------------------------
// Recording native agent
// ---------------------------------------------------------------------------

/// One command the native agent received.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeCall {
    pub path: String,
    pub method: Method,
    pub body: Option<Value>,
}

/// Native agent that records commands and answers from a script.
///
/// Queued replies are used first; once they run out every command succeeds
/// with a `null` value.
#[derive(Default)]
pub struct RecordingNative {
    calls: Mutex<Vec<NativeCall>>,
    replies: Mutex<VecDeque<AgentReply>>,
    start_failures: AtomicU32,
    starts: AtomicU32,
    stops: AtomicU32,
    fail_stop: AtomicBool,
    start_caps: Mutex<Vec<Value>>,
}

impl RecordingNative {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn queue_reply(&self, reply: AgentReply) {
        self.replies.lock().unwrap().push_back(reply);
    }

    /// The next `n` starts fail.
    pub fn fail_starts(&self, n: u32) {
        self.start_failures.store(n, Ordering::SeqCst);
    }

    pub fn fail_stop(&self) {
        self.fail_stop.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<NativeCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn paths(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.path).collect()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn starts(&self) -> u32 {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> u32 {
        self.stops.load(Ordering::SeqCst)
    }

    /// Capabilities of every start attempt.
    pub fn start_caps(&self) -> Vec<Value> {
        self.start_caps.lock().unwrap().clone()
    }
}

#[async_trait]
impl NativeAgent for RecordingNative {
    async fn start(&self, desired_caps: &Value) -> Result<(), NativeAgentError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.start_caps.lock().unwrap().push(desired_caps.clone());
        let remaining = self.start_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.start_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(NativeAgentError::StartFailed("agent not ready".into()));
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), NativeAgentError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(NativeAgentError::Transport("connection refused".into()));
        }
        Ok(())
    }

    async fn send_command(
        &self,
        path: &str,
        method: Method,
        body: Option<&Value>,
    ) -> Result<AgentReply, NativeAgentError> {
        self.calls.lock().unwrap().push(NativeCall {
            path: path.to_string(),
            method,
            body: body.cloned(),
        });
        let queued = self.replies.lock().unwrap().pop_front();
        Ok(queued.unwrap_or_else(|| AgentReply::ok(Value::Null)))
    }
}

// ---------------------------------------------------------------------------
// Scripted content agent
// ---------------------------------------------------------------------------

/// One atom the content agent ran.
#[derive(Debug, Clone, PartialEq)]
pub struct AtomCall {
    pub atom: String,
    pub args: Vec<Value>,
    pub frames: Vec<Value>,
}

/// Content agent with programmable pages and atom results.
///
/// Queued results for an atom are consumed first, then the sticky result set
/// with [`respond`](Self::respond), then `{status: 0, value: null}`.
#[derive(Default)]
pub struct ScriptedContent {
    pages: Mutex<Vec<Page>>,
    connected: Mutex<Option<PageId>>,
    calls: Mutex<Vec<AtomCall>>,
    sticky: Mutex<HashMap<String, AtomResult>>,
    queued: Mutex<HashMap<String, VecDeque<AtomResult>>>,
    navigations: Mutex<Vec<String>>,
    stopped: AtomicBool,
    fail_stop: AtomicBool,
}

impl ScriptedContent {
    pub fn with_pages(ids: &[PageId]) -> Arc<Self> {
        let agent = Self::default();
        agent.set_pages(ids);
        Arc::new(agent)
    }

    pub fn set_pages(&self, ids: &[PageId]) {
        *self.pages.lock().unwrap() = ids
            .iter()
            .map(|id| Page {
                id: *id,
                url: format!("https://example.com/page/{id}"),
                title: format!("Page {id}"),
            })
            .collect();
    }

    pub fn respond(&self, atom: &str, result: AtomResult) {
        self.sticky.lock().unwrap().insert(atom.to_string(), result);
    }

    pub fn queue(&self, atom: &str, results: Vec<AtomResult>) {
        self.queued
            .lock()
            .unwrap()
            .entry(atom.to_string())
            .or_default()
            .extend(results);
    }

    pub fn fail_stop(&self) {
        self.fail_stop.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<AtomCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, atom: &str) -> Vec<AtomCall> {
        self.calls().into_iter().filter(|c| c.atom == atom).collect()
    }

    pub fn connected(&self) -> Option<PageId> {
        *self.connected.lock().unwrap()
    }

    pub fn navigations(&self) -> Vec<String> {
        self.navigations.lock().unwrap().clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentAgent for ScriptedContent {
    async fn start(&self) -> Result<(), RemoteError> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), RemoteError> {
        self.stopped.store(true, Ordering::SeqCst);
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(RemoteError::Transport("inspector went away".into()));
        }
        Ok(())
    }

    async fn pages(&self) -> Result<Vec<Page>, RemoteError> {
        Ok(self.pages.lock().unwrap().clone())
    }

    async fn connect(&self, page: PageId) -> Result<(), RemoteError> {
        if !self.pages.lock().unwrap().iter().any(|p| p.id == page) {
            return Err(RemoteError::PageUnavailable(page));
        }
        *self.connected.lock().unwrap() = Some(page);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), RemoteError> {
        *self.connected.lock().unwrap() = None;
        Ok(())
    }

    async fn navigate_to(&self, url: &str) -> Result<(), RemoteError> {
        self.navigations.lock().unwrap().push(url.to_string());
        Ok(())
    }

    async fn send_command(
        &self,
        atom: &str,
        args: Vec<Value>,
        frames: &[Value],
    ) -> Result<AtomResult, RemoteError> {
        self.calls.lock().unwrap().push(AtomCall {
            atom: atom.to_string(),
            args,
            frames: frames.to_vec(),
        });
        if let Some(result) = self
            .queued
            .lock()
            .unwrap()
            .get_mut(atom)
            .and_then(VecDeque::pop_front)
        {
            return Ok(result);
        }
        let sticky = self.sticky.lock().unwrap().get(atom).cloned();
        Ok(sticky.unwrap_or_else(|| AtomResult::ok(Value::Null)))
    }
}

pub fn content_factory(agent: Arc<ScriptedContent>) -> ContentAgentFactory {
    Arc::new(move |_udid: &str| {
        let agent: Arc<dyn ContentAgent> = agent.clone();
        agent
    })
}

// ---------------------------------------------------------------------------
// Fake simulator
// ---------------------------------------------------------------------------

/// A simulator that tracks boot state and installed bundles.
pub struct FakeDevice {
    udid: String,
    booted: AtomicBool,
    installed: Mutex<HashSet<String>>,
    log: Mutex<Vec<String>>,
    fail_shutdown: AtomicBool,
}

impl FakeDevice {
    pub fn new(booted: bool, installed: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            udid: UDID.to_string(),
            booted: AtomicBool::new(booted),
            installed: Mutex::new(installed.iter().map(|s| s.to_string()).collect()),
            log: Mutex::new(Vec::new()),
            fail_shutdown: AtomicBool::new(false),
        })
    }

    pub fn fail_shutdown(&self) {
        self.fail_shutdown.store(true, Ordering::SeqCst);
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn record(&self, entry: impl Into<String>) {
        self.log.lock().unwrap().push(entry.into());
    }
}

#[async_trait]
impl DeviceProvider for FakeDevice {
    fn udid(&self) -> &str {
        &self.udid
    }

    async fn is_booted(&self) -> Result<bool, DeviceError> {
        Ok(self.booted.load(Ordering::SeqCst))
    }

    async fn open(&self) -> Result<(), DeviceError> {
        self.record("open");
        self.booted.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn erase(&self) -> Result<(), DeviceError> {
        self.record("erase");
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), DeviceError> {
        self.record("shutdown");
        if self.fail_shutdown.load(Ordering::SeqCst) {
            return Err(DeviceError::CommandFailed("Unable to shutdown device".into()));
        }
        self.booted.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn install(&self, app: &str) -> Result<(), DeviceError> {
        self.record(format!("install {app}"));
        Ok(())
    }

    async fn uninstall(&self, bundle_id: &str) -> Result<(), DeviceError> {
        self.record(format!("uninstall {bundle_id}"));
        self.installed.lock().unwrap().remove(bundle_id);
        Ok(())
    }

    async fn exists(&self, bundle_id: &str) -> Result<bool, DeviceError> {
        Ok(self.installed.lock().unwrap().contains(bundle_id))
    }

    async fn open_url(&self, url: &str) -> Result<(), DeviceError> {
        self.record(format!("open_url {url}"));
        Ok(())
    }
}

/// Host with one simulator.
pub struct FakeHost {
    device: Arc<FakeDevice>,
    kills: AtomicU32,
    fail_kill: AtomicBool,
}

impl FakeHost {
    pub fn new(device: Arc<FakeDevice>) -> Arc<Self> {
        Arc::new(Self {
            device,
            kills: AtomicU32::new(0),
            fail_kill: AtomicBool::new(false),
        })
    }

    pub fn fail_kill(&self) {
        self.fail_kill.store(true, Ordering::SeqCst);
    }

    pub fn kills(&self) -> u32 {
        self.kills.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceHost for FakeHost {
    async fn available_devices(&self) -> Result<Vec<SimulatorDevice>, DeviceError> {
        Ok(vec![SimulatorDevice {
            udid: UDID.to_string(),
            name: "iPhone 15".to_string(),
            state: if self.device.booted.load(Ordering::SeqCst) {
                "Booted".to_string()
            } else {
                "Shutdown".to_string()
            },
            is_available: true,
        }])
    }

    fn attach(&self, udid: &str, kind: DeviceKind) -> Result<Arc<dyn DeviceProvider>, DeviceError> {
        if kind == DeviceKind::Real || udid != UDID {
            return Err(DeviceError::NotAvailable(udid.to_string()));
        }
        let device: Arc<dyn DeviceProvider> = self.device.clone();
        Ok(device)
    }

    async fn kill_all(&self) -> Result<(), DeviceError> {
        self.kills.fetch_add(1, Ordering::SeqCst);
        if self.fail_kill.load(Ordering::SeqCst) {
            return Err(DeviceError::CommandFailed("killall failed".into()));
        }
        Ok(())
    }

    async fn bundle_id(&self, _app: &str) -> Result<String, DeviceError> {
        Ok(BUNDLE_ID.to_string())
    }
}

// ---------------------------------------------------------------------------
// Session helpers
// ---------------------------------------------------------------------------

/// Lifecycle timings short enough for tests.
pub fn fast_lifecycle() -> LifecycleConfig {
    LifecycleConfig {
        boot_poll_interval: Duration::from_millis(5),
        boot_retries: 3,
        agent_retry_interval: Duration::from_millis(5),
        agent_retries: 3,
        page_wait_timeout: Duration::from_millis(50),
        page_poll_interval: Duration::from_millis(5),
    }
}

/// Everything a test needs to poke at a session's collaborators.
pub struct Harness {
    pub native: Arc<RecordingNative>,
    pub content: Arc<ScriptedContent>,
    pub device: Arc<FakeDevice>,
    pub host: Arc<FakeHost>,
    pub session: Session,
}

impl Harness {
    /// A session over a booted simulator with the app installed and the
    /// given web pages open.
    pub fn new(pages: &[PageId]) -> Self {
        Self::with_device(pages, FakeDevice::new(true, &[BUNDLE_ID]))
    }

    pub fn with_device(pages: &[PageId], device: Arc<FakeDevice>) -> Self {
        let native = RecordingNative::new();
        let content = ScriptedContent::with_pages(pages);
        let host = FakeHost::new(device.clone());

        let native_dyn: Arc<dyn NativeAgent> = native.clone();
        let host_dyn: Arc<dyn DeviceHost> = host.clone();
        let mut deps = SessionDeps::new(native_dyn, host_dyn).with_content(content_factory(content.clone()));
        deps.lifecycle = fast_lifecycle();
        deps.implicit_wait = Duration::from_millis(40);
        deps.url_settle = Duration::from_millis(0);

        Self {
            native,
            content,
            device,
            host,
            session: Session::new(deps),
        }
    }

    /// Starts a native app session from raw desired capabilities.
    pub async fn start(&mut self, desired: Value) -> Result<Value, mobiwd_core::error::WdError> {
        let caps = Capabilities::from_request(&json!({ "desiredCapabilities": desired }))
            .expect("capabilities parse");
        self.session.start(caps).await
    }

    pub async fn start_app(&mut self) {
        self.start(json!({ "udid": UDID, "bundleId": BUNDLE_ID }))
            .await
            .expect("session start");
        self.native.clear();
    }

    /// Starts an app session and switches into the given web page.
    pub async fn start_in_webview(&mut self, page: PageId) {
        self.start_app().await;
        self.send(Method::Post, "context", json!({ "name": format!("WEBVIEW_{page}") }))
            .await
            .expect("switch to webview");
        self.native.clear();
    }

    pub fn path(&self, command: &str) -> String {
        format!("/wd/hub/session/{}/{}", self.session.id(), command)
    }

    pub async fn send(
        &mut self,
        method: Method,
        command: &str,
        body: Value,
    ) -> Result<Reply, mobiwd_core::error::WdError> {
        let path = self.path(command);
        self.session.handle(method, &path, body).await
    }

    /// Sends a command that must produce a driver value.
    pub async fn value(
        &mut self,
        method: Method,
        command: &str,
        body: Value,
    ) -> Result<Value, mobiwd_core::error::WdError> {
        match self.send(method, command, body).await? {
            Reply::Driver(value) => Ok(value),
            Reply::Native(raw) => panic!("expected a driver reply, got native {raw}"),
        }
    }
}

/// `{"ELEMENT": id}`.
pub fn backend_ref(id: &str) -> Value {
    json!({ "ELEMENT": id })
}
