//! Device and agent bootstrap.
//!
//! The steps [`Session::start`](crate::session::Session::start) runs before
//! the first command:
//!
//! 1. **Resolve** the udid (explicit, or by `deviceName`) and the bundle id
//!    (explicit, read from `app`, or Safari)
//! 2. **Prepare** the simulator according to the reuse level
//! 3. **Start** the native agent, retried a few times since it is often not
//!    ready right after boot
//! 4. **Wait** for the first web page when driving Safari
//!
//! Every step reports failures as [`WdError`] so the session can hand them
//! straight to the client.

use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::caps::{Capabilities, SAFARI_BUNDLE_ID};
use crate::context::ContextManager;
use crate::device::{DeviceHost, DeviceProvider, Simctl};
use crate::error::{ErrorKind, WdError};
use crate::native::{NativeAgent, AGENT_BUNDLE_ID};
use crate::wait::{retry, wait_for_condition, DEFAULT_POLL_INTERVAL, DEFAULT_WAIT_TIMEOUT};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Timing of the bootstrap retries.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Pause between two "is it booted yet" checks.
    pub boot_poll_interval: Duration,
    /// Extra boot checks after the first one.
    pub boot_retries: u32,
    /// Pause between two native agent start attempts.
    pub agent_retry_interval: Duration,
    /// Extra native agent start attempts after the first one.
    pub agent_retries: u32,
    /// How long to wait for Safari's first page.
    pub page_wait_timeout: Duration,
    pub page_poll_interval: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            boot_poll_interval: Duration::from_secs(3),
            boot_retries: 10,
            agent_retry_interval: Duration::from_secs(10),
            agent_retries: 3,
            page_wait_timeout: DEFAULT_WAIT_TIMEOUT,
            page_poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// What the session automates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppTarget {
    pub bundle_id: String,
    pub safari: bool,
}

/// Picks the device udid.
///
/// An explicit `udid` wins; otherwise the available simulator named by
/// `deviceName` is used; otherwise the first booted simulator.
pub async fn resolve_udid(host: &dyn DeviceHost, caps: &Capabilities) -> Result<String, WdError> {
    if let Some(udid) = caps.udid.as_deref().filter(|u| !u.is_empty()) {
        return Ok(udid.to_string());
    }

    let devices = host.available_devices().await?;
    debug!(count = devices.len(), "available simulators");

    let found = match caps.device_name.as_deref() {
        Some(name) => Simctl::find_by_name(&devices, name).ok_or_else(|| {
            WdError::new(
                ErrorKind::SessionNotCreated,
                format!("Device {name} is not available!"),
            )
        })?,
        None => Simctl::find_booted_device(&devices).ok_or_else(|| {
            WdError::new(
                ErrorKind::SessionNotCreated,
                "Neither 'udid' nor 'deviceName' is provided, and no simulator is booted",
            )
        })?,
    };
    Ok(found.udid.clone())
}

/// Picks the bundle id: explicit `bundleId`, then the one inside `app`, then
/// Mobile Safari when `browserName` is `Safari`.
pub async fn resolve_target(host: &dyn DeviceHost, caps: &Capabilities) -> Result<AppTarget, WdError> {
    if let Some(id) = caps.bundle_id.as_deref().filter(|b| !b.is_empty()) {
        return Ok(AppTarget {
            bundle_id: id.to_string(),
            safari: false,
        });
    }
    if let Some(app) = caps.app.as_deref().filter(|a| !a.is_empty()) {
        return Ok(AppTarget {
            bundle_id: host.bundle_id(app).await?,
            safari: false,
        });
    }
    if caps.is_safari() {
        return Ok(AppTarget {
            bundle_id: SAFARI_BUNDLE_ID.to_string(),
            safari: true,
        });
    }
    Err(WdError::unknown("Neither 'app' nor 'bundleId' is provided!"))
}

fn not_installed(bundle_id: &str) -> WdError {
    WdError::unknown(format!(
        "App '{bundle_id}' is neither installed, nor provided!"
    ))
}

// ---------------------------------------------------------------------------
// Simulator preparation
// ---------------------------------------------------------------------------

/// Brings the simulator into the state the reuse level asks for.
///
/// May clear `caps.app` when reuse level 3 finds the app already installed.
#[instrument(skip_all, fields(udid = device.udid(), reuse = caps.reuse.0))]
pub async fn prepare_simulator(
    host: &dyn DeviceHost,
    device: &dyn DeviceProvider,
    caps: &mut Capabilities,
    bundle_id: &str,
    config: &LifecycleConfig,
) -> Result<(), WdError> {
    let reuse = caps.reuse;
    let has_app = caps.app.as_deref().is_some_and(|a| !a.is_empty());

    if reuse.keeps_device() && device.is_booted().await? {
        debug!("reusing booted simulator");
        let installed = device.exists(bundle_id).await?;
        if !installed && !has_app {
            return Err(not_installed(bundle_id));
        }
        if reuse.0 == 1 && has_app {
            device.uninstall(bundle_id).await?;
        }
        if reuse.0 == 3 && installed {
            caps.app = None;
        }
        return Ok(());
    }

    if let Err(e) = host.kill_all().await {
        debug!(error = %e, "kill simulators failed");
    }
    if let Err(e) = device.shutdown().await {
        debug!(error = %e, "shutdown simulator failed");
    }
    if !reuse.keeps_device() {
        info!("erasing simulator");
        device.erase().await?;
    }

    device.open().await?;
    retry(
        || async move {
            if device.is_booted().await? {
                Ok(())
            } else {
                Err(WdError::unknown(format!(
                    "Simulator {} is not booted.",
                    device.udid()
                )))
            }
        },
        config.boot_poll_interval,
        Some(config.boot_retries),
    )
    .await?;

    let installed = device.exists(bundle_id).await?;
    if !installed && !has_app {
        return Err(not_installed(bundle_id));
    }
    if reuse.0 == 1 && has_app {
        device.uninstall(bundle_id).await?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Agents
// ---------------------------------------------------------------------------

/// Starts the native agent session.
///
/// Each attempt stops whatever is left of a previous agent and removes the
/// agent bundle first, so the agent is freshly installed by its runner.
#[instrument(skip_all, fields(udid = device.udid()))]
pub async fn start_native_agent(
    native: &dyn NativeAgent,
    device: &dyn DeviceProvider,
    desired_caps: &Value,
    config: &LifecycleConfig,
) -> Result<(), WdError> {
    debug!(caps = %desired_caps, "starting native agent");
    retry(
        || async move {
            debug!("trying to start native agent");
            if let Err(e) = native.stop().await {
                debug!(error = %e, "stopping previous agent failed");
            }
            device.uninstall(AGENT_BUNDLE_ID).await?;
            native.start(desired_caps).await?;
            Ok::<_, WdError>(())
        },
        config.agent_retry_interval,
        Some(config.agent_retries),
    )
    .await
}

/// Waits until the content agent reports at least one page.
pub async fn wait_for_first_page(
    contexts: &mut ContextManager,
    config: &LifecycleConfig,
) -> Result<(), WdError> {
    let remote = contexts.ensure_remote().await?.ok_or_else(|| {
        WdError::new(
            ErrorKind::SessionNotCreated,
            "content debugging is not available for this device",
        )
    })?;

    wait_for_condition(
        || {
            let remote = remote.clone();
            async move { remote.pages().await.map(|pages| !pages.is_empty()) }
        },
        config.page_wait_timeout,
        config.page_poll_interval,
    )
    .await?;
    Ok(())
}
