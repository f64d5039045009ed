//! Active context tracking.
//!
//! A session is always in exactly one [`Context`]: the native surface, or one
//! web page exposed by the content-debugging agent. [`ContextManager`] owns
//! the link to that agent, the catalog of live contexts, the active frame
//! inside the active page, and whether commands are currently proxied to the
//! native agent.
//!
//! The catalog is rebuilt from the agent on every query and always starts
//! with [`Context::Native`]. Content commands call
//! [`ContextManager::ensure_active`] first, so a page that has gone away is
//! reported as "no such window" instead of being silently driven.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::WdError;
use crate::remote::{ContentAgent, ContentAgentFactory, Page, PageId};

/// Name of the native context.
pub const NATIVE_CONTEXT: &str = "NATIVE_APP";

/// Prefix of web content context names.
pub const WEBVIEW_PREFIX: &str = "WEBVIEW_";

/// Prefix of Safari window names.
pub const WINDOW_PREFIX: &str = "WINDOW_";

/// A logical automation surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Context {
    #[default]
    Native,
    Content(PageId),
}

impl Context {
    /// Parses a context or window name.
    ///
    /// `None`, the empty string and `NATIVE_APP` all name the native context.
    /// Content names may carry the `WEBVIEW_` or `WINDOW_` prefix or be a bare
    /// page id. Anything else cannot name a live context.
    pub fn from_name(name: Option<&str>) -> Result<Self, WdError> {
        let name = match name.map(str::trim) {
            None | Some("") | Some(NATIVE_CONTEXT) => return Ok(Context::Native),
            Some(name) => name,
        };
        let id = name
            .strip_prefix(WEBVIEW_PREFIX)
            .or_else(|| name.strip_prefix(WINDOW_PREFIX))
            .unwrap_or(name);
        id.parse()
            .map(Context::Content)
            .map_err(|_| WdError::no_such_window())
    }

    /// The name reported by "get context(s)".
    pub fn context_name(self) -> String {
        match self {
            Context::Native => NATIVE_CONTEXT.to_string(),
            Context::Content(id) => format!("{WEBVIEW_PREFIX}{id}"),
        }
    }

    /// The name reported by "get window(s)"; the native context has none.
    pub fn window_name(self) -> Option<String> {
        match self {
            Context::Native => None,
            Context::Content(id) => Some(format!("{WINDOW_PREFIX}{id}")),
        }
    }

    pub fn page_id(self) -> Option<PageId> {
        match self {
            Context::Native => None,
            Context::Content(id) => Some(id),
        }
    }

    pub fn is_native(self) -> bool {
        self == Context::Native
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.context_name())
    }
}

/// Context state machine plus the content-debugging link.
pub struct ContextManager {
    udid: String,
    factory: Option<ContentAgentFactory>,
    remote: Option<Arc<dyn ContentAgent>>,
    active: Context,
    catalog: Vec<Context>,
    frame: Option<Value>,
    proxy_native: bool,
}

impl ContextManager {
    /// Starts in the native context with native proxying on.
    ///
    /// Without a factory no content surfaces are ever discovered.
    pub fn new(factory: Option<ContentAgentFactory>) -> Self {
        Self {
            udid: String::new(),
            factory,
            remote: None,
            active: Context::Native,
            catalog: vec![Context::Native],
            frame: None,
            proxy_native: true,
        }
    }

    pub fn set_udid(&mut self, udid: impl Into<String>) {
        self.udid = udid.into();
    }

    pub fn active(&self) -> Context {
        self.active
    }

    /// The catalog as of the last refresh.
    pub fn catalog(&self) -> &[Context] {
        &self.catalog
    }

    pub fn frame(&self) -> Option<&Value> {
        self.frame.as_ref()
    }

    pub fn set_frame(&mut self, frame: Option<Value>) {
        self.frame = frame;
    }

    pub fn is_proxying(&self) -> bool {
        self.proxy_native
    }

    pub fn set_proxying(&mut self, proxy: bool) {
        self.proxy_native = proxy;
    }

    pub fn is_web_context(&self) -> bool {
        !self.active.is_native()
    }

    pub fn remote(&self) -> Option<&Arc<dyn ContentAgent>> {
        self.remote.as_ref()
    }

    /// Returns the content agent, creating and starting it on first use.
    pub async fn ensure_remote(&mut self) -> Result<Option<Arc<dyn ContentAgent>>, WdError> {
        if self.remote.is_none() {
            if let Some(factory) = &self.factory {
                let remote = factory(&self.udid);
                remote.start().await?;
                debug!(udid = %self.udid, "content debugging agent started");
                self.remote = Some(remote);
            }
        }
        Ok(self.remote.clone())
    }

    /// Open pages, or none when content debugging is unavailable.
    pub async fn pages(&mut self) -> Result<Vec<Page>, WdError> {
        let Some(remote) = self.ensure_remote().await? else {
            return Ok(Vec::new());
        };
        let pages = remote.pages().await?;
        if pages.is_empty() {
            debug!("no webviews found");
        }
        Ok(pages)
    }

    /// Rebuilds the catalog from the live pages. Does not change the active
    /// context.
    pub async fn refresh(&mut self) -> Result<Vec<Context>, WdError> {
        let pages = self.pages().await?;
        let mut catalog = Vec::with_capacity(pages.len() + 1);
        catalog.push(Context::Native);
        catalog.extend(pages.iter().map(|p| Context::Content(p.id)));
        self.catalog = catalog;
        Ok(self.catalog.clone())
    }

    /// Fails with "no such window" when the active context has disappeared.
    pub async fn ensure_active(&mut self) -> Result<(), WdError> {
        self.refresh().await?;
        if !self.catalog.contains(&self.active) {
            debug!(context = %self.active, "active context is gone");
            return Err(WdError::no_such_window());
        }
        Ok(())
    }

    /// Switches the active context.
    ///
    /// Switching to the active context is a no-op. Switching to a page that
    /// is not in the freshly refreshed catalog fails with "no such window"
    /// and leaves the state untouched.
    pub async fn set_context(&mut self, target: Context) -> Result<(), WdError> {
        if target == self.active {
            return Ok(());
        }

        let page = match target {
            Context::Native => {
                self.release_link().await;
                self.enter(Context::Native);
                return Ok(());
            }
            Context::Content(page) => page,
        };

        self.refresh().await?;
        if !self.catalog.contains(&target) {
            debug!(context = %target, "requested context does not exist");
            return Err(WdError::no_such_window());
        }
        self.connect_page(page).await
    }

    /// Connects to the most recently opened page and makes it active.
    ///
    /// Returns the page, or `None` when no page is open.
    pub async fn attach_latest(&mut self) -> Result<Option<Page>, WdError> {
        let pages = self.pages().await?;
        let Some(latest) = pages.last().cloned() else {
            return Ok(None);
        };
        if self.active != Context::Content(latest.id) {
            self.connect_page(latest.id).await?;
        }
        self.frame = None;
        Ok(Some(latest))
    }

    async fn connect_page(&mut self, page: PageId) -> Result<(), WdError> {
        let remote = self
            .ensure_remote()
            .await?
            .ok_or_else(WdError::no_such_window)?;

        if self.is_web_context() {
            self.release_link().await;
        }
        if let Err(e) = remote.connect(page).await {
            // the previous link is already gone
            self.enter(Context::Native);
            return Err(e.into());
        }
        self.enter(Context::Content(page));
        Ok(())
    }

    fn enter(&mut self, context: Context) {
        debug!(from = %self.active, to = %context, "switching context");
        self.active = context;
        self.frame = None;
        self.proxy_native = context.is_native();
    }

    async fn release_link(&self) {
        if let Some(remote) = &self.remote {
            if let Err(e) = remote.disconnect().await {
                warn!(error = %e, "failed to disconnect content link");
            }
        }
    }

    /// Runs a content operation on the connected page.
    ///
    /// Unless `in_default_frame` is set, the call is scoped to the active
    /// frame. A non-zero backend status is mapped through the protocol error
    /// table.
    pub async fn send_atom(
        &self,
        atom: &str,
        args: Vec<Value>,
        in_default_frame: bool,
    ) -> Result<Value, WdError> {
        let remote = self
            .remote
            .as_ref()
            .ok_or_else(|| WdError::unknown("no content debugging connection"))?;
        let frames: Vec<Value> = match (&self.frame, in_default_frame) {
            (Some(frame), false) => vec![frame.clone()],
            _ => Vec::new(),
        };

        let result = remote.send_command(atom, args, &frames).await?;
        if result.status == 0 {
            Ok(result.value)
        } else {
            debug!(atom, status = result.status, "content operation failed");
            Err(WdError::from_status(result.status, &result.value))
        }
    }

    /// Navigates the connected page.
    pub async fn navigate(&mut self, url: &str) -> Result<(), WdError> {
        self.frame = None;
        let remote = self
            .remote
            .as_ref()
            .ok_or_else(|| WdError::unknown("no content debugging connection"))?;
        remote.navigate_to(url).await?;
        Ok(())
    }

    /// Stops the content agent, if one was started.
    pub async fn shutdown(&mut self) -> Result<(), WdError> {
        let Some(remote) = self.remote.take() else {
            return Ok(());
        };
        remote.stop().await?;
        Ok(())
    }
}
