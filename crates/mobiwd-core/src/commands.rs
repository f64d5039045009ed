//! Content command translation.
//!
//! [`ContentCommands`] has one method per web-content verb. [`Translator`]
//! implements it on top of the [`ContextManager`] and the element registry:
//! public element handles are resolved to backend handles on the way in, and
//! backend element references are interned on the way out, so callers never
//! see backend identifiers.
//!
//! [`Guarded`] wraps any implementation and, before every verb, checks that
//! the active context still exists and runs the alert hook.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, instrument};

use crate::alert::AlertPolicy;
use crate::context::ContextManager;
use crate::error::{ErrorKind, WdError};
use crate::native::NativeAgent;
use crate::registry::{element_id, ElementRegistry, PublicHandle, ELEMENT_KEY};
use crate::router::Command;
use crate::wait::{poll_until, DEFAULT_POLL_INTERVAL};

const TITLE_SCRIPT: &str = "return document.title;";
const SOURCE_SCRIPT: &str = "return document.getElementsByTagName(\"html\")[0].outerHTML";
const FORWARD_SCRIPT: &str = "history.forward()";
const BACK_SCRIPT: &str = "history.back()";
const REFRESH_SCRIPT: &str = "location.reload()";
const CLOSE_SCRIPT: &str = "window.close()";

// ---------------------------------------------------------------------------
// ContentCommands trait
// ---------------------------------------------------------------------------

/// Web-content verbs.
#[async_trait]
pub trait ContentCommands: Send {
    /// Fails with "no such window" when the active context is gone.
    async fn verify_context(&mut self) -> Result<(), WdError>;

    /// Switches frame: `null` resets to the top document, an element
    /// reference enters that frame element, a number selects by index and a
    /// string by id or name.
    async fn set_frame(&mut self, frame: Value) -> Result<Value, WdError>;
    async fn click(&mut self, element: PublicHandle) -> Result<Value, WdError>;
    async fn find_element(
        &mut self,
        using: &str,
        value: &str,
        root: Option<PublicHandle>,
    ) -> Result<Value, WdError>;
    async fn find_elements(
        &mut self,
        using: &str,
        value: &str,
        root: Option<PublicHandle>,
    ) -> Result<Value, WdError>;
    async fn get_text(&mut self, element: PublicHandle) -> Result<Value, WdError>;
    async fn clear_text(&mut self, element: PublicHandle) -> Result<Value, WdError>;
    /// Clicks the element, then types `text` into it.
    async fn set_value(&mut self, element: PublicHandle, text: Value) -> Result<Value, WdError>;
    async fn title(&mut self) -> Result<Value, WdError>;
    async fn execute(&mut self, script: &str, args: Vec<Value>) -> Result<Value, WdError>;
    /// URL of the most recently opened page.
    async fn url(&mut self) -> Result<Value, WdError>;
    async fn forward(&mut self) -> Result<Value, WdError>;
    async fn back(&mut self) -> Result<Value, WdError>;
    async fn refresh(&mut self) -> Result<Value, WdError>;
    async fn get_source(&mut self) -> Result<Value, WdError>;
    async fn get_window(&mut self) -> Result<Value, WdError>;
    async fn delete_window(&mut self) -> Result<Value, WdError>;
}

/// Runs a parsed command against a [`ContentCommands`] implementation.
///
/// Commands that are not content verbs are "not implemented" here.
pub async fn dispatch<C>(commands: &mut C, command: Command) -> Result<Value, WdError>
where
    C: ContentCommands + ?Sized,
{
    match command {
        Command::FindElement { using, value, root } => {
            commands.find_element(&using, &value, root).await
        }
        Command::FindElements { using, value, root } => {
            commands.find_elements(&using, &value, root).await
        }
        Command::Click(el) => commands.click(el).await,
        Command::GetText(el) => commands.get_text(el).await,
        Command::Clear(el) => commands.clear_text(el).await,
        Command::SetValue(el, text) => commands.set_value(el, text).await,
        Command::Execute { script, args } => commands.execute(&script, args).await,
        Command::Title => commands.title().await,
        Command::Source => commands.get_source().await,
        Command::Back => commands.back().await,
        Command::Forward => commands.forward().await,
        Command::Refresh => commands.refresh().await,
        Command::SetFrame(frame) => commands.set_frame(frame).await,
        Command::GetUrl => commands.url().await,
        Command::GetWindow => commands.get_window().await,
        Command::DeleteWindow => commands.delete_window().await,
        other => Err(WdError::not_implemented(format!(
            "{other:?} is not a content command"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Translator
// ---------------------------------------------------------------------------

/// Translates verbs into content-debugging operations.
pub struct Translator<'a> {
    contexts: &'a mut ContextManager,
    registry: &'a mut ElementRegistry<Value>,
    implicit_wait: Duration,
}

impl<'a> Translator<'a> {
    pub fn new(
        contexts: &'a mut ContextManager,
        registry: &'a mut ElementRegistry<Value>,
        implicit_wait: Duration,
    ) -> Self {
        Self {
            contexts,
            registry,
            implicit_wait,
        }
    }

    /// Backend element reference for a public handle.
    fn resolve(&self, handle: PublicHandle) -> Result<Value, WdError> {
        let backend = self.registry.resolve(handle).ok_or_else(|| {
            debug!(%handle, "unknown element handle");
            WdError::no_such_element()
        })?;
        Ok(json!({ ELEMENT_KEY: backend }))
    }

    /// Maps a public element reference argument to its backend form.
    fn resolve_arg(&self, arg: Value) -> Result<Value, WdError> {
        if element_id(&arg).is_none() {
            return Ok(arg);
        }
        let handle = PublicHandle::from_reference(&arg).ok_or_else(WdError::no_such_element)?;
        self.resolve(handle)
    }

    /// Interns a backend element reference, or returns `Null` for anything
    /// that is not one.
    fn intern(&mut self, backend: &Value) -> Value {
        self.registry
            .intern(element_id(backend).cloned())
            .map(PublicHandle::to_reference)
            .unwrap_or(Value::Null)
    }

    /// Interns element references inside a script result; other values pass
    /// through unchanged.
    fn intern_result(&mut self, value: Value) -> Value {
        match value {
            Value::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(|item| {
                        if element_id(&item).is_some() {
                            self.intern(&item)
                        } else {
                            item
                        }
                    })
                    .collect(),
            ),
            single if element_id(&single).is_some() => self.intern(&single),
            other => other,
        }
    }

    async fn atom(&self, atom: &str, args: Vec<Value>) -> Result<Value, WdError> {
        self.contexts.send_atom(atom, args, false).await
    }

    /// Searches with the implicit wait. `None` means nothing turned up in
    /// time.
    async fn search(
        &self,
        many: bool,
        using: &str,
        value: &str,
        root: Option<PublicHandle>,
    ) -> Result<Option<Value>, WdError> {
        let root = root.map(|h| self.resolve(h)).transpose()?;
        let atom = if many { "find_elements" } else { "find_element" };
        let args = vec![json!(using), json!(value), root.unwrap_or(Value::Null)];
        let contexts = &*self.contexts;

        let found = poll_until(
            || {
                let args = args.clone();
                async move {
                    let result = contexts.send_atom(atom, args, false).await?;
                    Ok::<_, WdError>(is_present(&result).then_some(result))
                }
            },
            self.implicit_wait,
            DEFAULT_POLL_INTERVAL,
        )
        .await;

        match found {
            Ok(result) => Ok(Some(result)),
            Err(e) => {
                debug!(using, value, error = %e, "element search gave up");
                Ok(None)
            }
        }
    }

    async fn frame_window(&self, atom: &str, arg: Value) -> Result<Value, WdError> {
        let result = self.atom(atom, vec![arg]).await.map_err(|e| {
            debug!(atom, error = %e, "frame lookup failed");
            WdError::new(ErrorKind::NoSuchFrame, e.message())
        })?;
        match result.get("WINDOW") {
            Some(window) if !window.is_null() => Ok(window.clone()),
            _ => Err(WdError::no_such_frame()),
        }
    }
}

/// Whether a search result holds anything.
fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

#[async_trait]
impl<'a> ContentCommands for Translator<'a> {
    async fn verify_context(&mut self) -> Result<(), WdError> {
        self.contexts.ensure_active().await
    }

    #[instrument(skip(self))]
    async fn set_frame(&mut self, frame: Value) -> Result<Value, WdError> {
        if !self.contexts.is_web_context() {
            return Err(WdError::no_such_frame());
        }

        let window = match frame {
            Value::Null => {
                debug!("back to default content");
                self.contexts.set_frame(None);
                return Ok(Value::Null);
            }
            reference if element_id(&reference).is_some() => {
                let backend = self.resolve_arg(reference)?;
                self.frame_window("get_frame_window", backend).await?
            }
            index @ Value::Number(_) => self.frame_window("frame_by_index", index).await?,
            name @ Value::String(_) => self.frame_window("frame_by_id_or_name", name).await?,
            _ => return Err(WdError::no_such_frame()),
        };

        debug!(%window, "entering web frame");
        self.contexts.set_frame(Some(window));
        Ok(Value::Null)
    }

    async fn click(&mut self, element: PublicHandle) -> Result<Value, WdError> {
        let backend = self.resolve(element)?;
        self.atom("click", vec![backend]).await
    }

    #[instrument(skip(self))]
    async fn find_element(
        &mut self,
        using: &str,
        value: &str,
        root: Option<PublicHandle>,
    ) -> Result<Value, WdError> {
        let Some(found) = self.search(false, using, value, root).await? else {
            return Err(WdError::no_such_element());
        };
        match self.intern(&found) {
            Value::Null => Err(WdError::no_such_element()),
            reference => Ok(reference),
        }
    }

    #[instrument(skip(self))]
    async fn find_elements(
        &mut self,
        using: &str,
        value: &str,
        root: Option<PublicHandle>,
    ) -> Result<Value, WdError> {
        let found = self.search(true, using, value, root).await?;
        let items = match found {
            Some(Value::Array(items)) => items,
            Some(single) => vec![single],
            None => Vec::new(),
        };
        let references = items.iter().map(|item| self.intern(item)).collect();
        Ok(Value::Array(references))
    }

    async fn get_text(&mut self, element: PublicHandle) -> Result<Value, WdError> {
        let backend = self.resolve(element)?;
        self.atom("get_text", vec![backend]).await
    }

    async fn clear_text(&mut self, element: PublicHandle) -> Result<Value, WdError> {
        let backend = self.resolve(element)?;
        self.atom("clear", vec![backend]).await
    }

    async fn set_value(&mut self, element: PublicHandle, text: Value) -> Result<Value, WdError> {
        let backend = self.resolve(element)?;
        self.atom("click", vec![backend.clone()]).await?;
        self.atom("type", vec![backend, text]).await
    }

    async fn title(&mut self) -> Result<Value, WdError> {
        self.execute(TITLE_SCRIPT, Vec::new()).await
    }

    #[instrument(skip(self, args), fields(arg_count = args.len()))]
    async fn execute(&mut self, script: &str, args: Vec<Value>) -> Result<Value, WdError> {
        let args = args
            .into_iter()
            .map(|arg| self.resolve_arg(arg))
            .collect::<Result<Vec<_>, _>>()?;
        let result = self
            .contexts
            .send_atom("execute_script", vec![json!(script), Value::Array(args)], true)
            .await?;
        Ok(self.intern_result(result))
    }

    async fn url(&mut self) -> Result<Value, WdError> {
        let pages = self.contexts.pages().await?;
        let latest = pages.last().ok_or_else(WdError::no_such_window)?;
        Ok(Value::String(latest.url.clone()))
    }

    async fn forward(&mut self) -> Result<Value, WdError> {
        self.execute(FORWARD_SCRIPT, Vec::new()).await
    }

    async fn back(&mut self) -> Result<Value, WdError> {
        self.execute(BACK_SCRIPT, Vec::new()).await
    }

    async fn refresh(&mut self) -> Result<Value, WdError> {
        self.execute(REFRESH_SCRIPT, Vec::new()).await
    }

    async fn get_source(&mut self) -> Result<Value, WdError> {
        self.execute(SOURCE_SCRIPT, Vec::new()).await
    }

    async fn get_window(&mut self) -> Result<Value, WdError> {
        self.contexts
            .active()
            .window_name()
            .map(Value::String)
            .ok_or_else(WdError::no_such_window)
    }

    async fn delete_window(&mut self) -> Result<Value, WdError> {
        self.execute(CLOSE_SCRIPT, Vec::new()).await
    }
}

// ---------------------------------------------------------------------------
// Guarded
// ---------------------------------------------------------------------------

/// Verifies the active context and runs the alert hook before delegating.
pub struct Guarded<'n, C> {
    inner: C,
    alerts: AlertPolicy,
    native: &'n dyn NativeAgent,
}

impl<'n, C: ContentCommands> Guarded<'n, C> {
    pub fn new(inner: C, alerts: AlertPolicy, native: &'n dyn NativeAgent) -> Self {
        Self {
            inner,
            alerts,
            native,
        }
    }

    pub fn into_inner(self) -> C {
        self.inner
    }

    async fn before(&mut self) -> Result<(), WdError> {
        self.inner.verify_context().await?;
        self.alerts.apply(self.native).await;
        Ok(())
    }
}

#[async_trait]
impl<'n, C: ContentCommands> ContentCommands for Guarded<'n, C> {
    async fn verify_context(&mut self) -> Result<(), WdError> {
        self.inner.verify_context().await
    }

    async fn set_frame(&mut self, frame: Value) -> Result<Value, WdError> {
        self.before().await?;
        self.inner.set_frame(frame).await
    }

    async fn click(&mut self, element: PublicHandle) -> Result<Value, WdError> {
        self.before().await?;
        self.inner.click(element).await
    }

    async fn find_element(
        &mut self,
        using: &str,
        value: &str,
        root: Option<PublicHandle>,
    ) -> Result<Value, WdError> {
        self.before().await?;
        self.inner.find_element(using, value, root).await
    }

    async fn find_elements(
        &mut self,
        using: &str,
        value: &str,
        root: Option<PublicHandle>,
    ) -> Result<Value, WdError> {
        self.before().await?;
        self.inner.find_elements(using, value, root).await
    }

    async fn get_text(&mut self, element: PublicHandle) -> Result<Value, WdError> {
        self.before().await?;
        self.inner.get_text(element).await
    }

    async fn clear_text(&mut self, element: PublicHandle) -> Result<Value, WdError> {
        self.before().await?;
        self.inner.clear_text(element).await
    }

    async fn set_value(&mut self, element: PublicHandle, text: Value) -> Result<Value, WdError> {
        self.before().await?;
        self.inner.set_value(element, text).await
    }

    async fn title(&mut self) -> Result<Value, WdError> {
        self.before().await?;
        self.inner.title().await
    }

    async fn execute(&mut self, script: &str, args: Vec<Value>) -> Result<Value, WdError> {
        self.before().await?;
        self.inner.execute(script, args).await
    }

    async fn url(&mut self) -> Result<Value, WdError> {
        self.before().await?;
        self.inner.url().await
    }

    async fn forward(&mut self) -> Result<Value, WdError> {
        self.before().await?;
        self.inner.forward().await
    }

    async fn back(&mut self) -> Result<Value, WdError> {
        self.before().await?;
        self.inner.back().await
    }

    async fn refresh(&mut self) -> Result<Value, WdError> {
        self.before().await?;
        self.inner.refresh().await
    }

    async fn get_source(&mut self) -> Result<Value, WdError> {
        self.before().await?;
        self.inner.get_source().await
    }

    async fn get_window(&mut self) -> Result<Value, WdError> {
        self.before().await?;
        self.inner.get_window().await
    }

    async fn delete_window(&mut self) -> Result<Value, WdError> {
        self.before().await?;
        self.inner.delete_window().await
    }
}
