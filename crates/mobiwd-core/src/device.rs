//! Device and simulator lifecycle.
//!
//! The driver never provisions devices itself. It consumes two contracts:
//! [`DeviceProvider`] for operations on one device (boot state, app
//! install/uninstall, opening URLs) and [`DeviceHost`] for host-wide
//! operations (listing simulators, killing Simulator.app, reading an app
//! bundle's identifier). [`Simctl`] implements both on top of `xcrun simctl`.
//!
//! # Example
//!
//! ```no_run
//! use mobiwd_core::device::{DeviceHost, DeviceKind, Simctl};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let host = Simctl;
//! for device in host.available_devices().await? {
//!     println!("{}: {} ({})", device.name, device.udid, device.state);
//! }
//! let device = host.attach("A1B2C3D4-E5F6-7890-ABCD-EF1234567890", DeviceKind::Simulator)?;
//! if !device.is_booted().await? {
//!     device.open().await?;
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Errors that can occur when operating a device.
#[derive(Error, Debug)]
pub enum DeviceError {
    /// A device command failed to execute successfully.
    #[error("Command execution failed: {0}")]
    CommandFailed(String),

    /// The requested device is not known to the host.
    #[error("Device {0} is not available!")]
    NotAvailable(String),

    /// The operation is not supported for this kind of device.
    #[error("Unsupported device operation: {0}")]
    Unsupported(String),

    /// Failed to parse JSON output.
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// An I/O error occurred while executing the command.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Whether a udid names a physical device or a simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Simulator,
    Real,
}

impl DeviceKind {
    /// Classifies a udid by shape.
    ///
    /// Physical devices carry either a 40 character identifier or the newer
    /// `00008020-001D4D38XXXXXXXX` form; everything else is a simulator.
    pub fn from_udid(udid: &str) -> Self {
        let is_word = |c: char| c.is_ascii_alphanumeric() || c == '_';

        let legacy = udid.len() >= 40 && udid.chars().take(40).all(is_word);

        let bytes = udid.as_bytes();
        let modern = bytes.len() >= 25 && {
            let tail = &bytes[bytes.len() - 25..];
            tail[..8].iter().all(u8::is_ascii_digit)
                && tail[8] == b'-'
                && tail[9..].iter().all(|b| is_word(*b as char))
        };

        if legacy || modern {
            DeviceKind::Real
        } else {
            DeviceKind::Simulator
        }
    }
}

/// Represents an iOS Simulator device as reported by `xcrun simctl list devices -j`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatorDevice {
    /// The unique device identifier (UDID) for this simulator.
    pub udid: String,

    /// The human-readable name of the device (e.g., "iPhone 15 Pro").
    pub name: String,

    /// The current state of the device (e.g., "Booted", "Shutdown").
    pub state: String,

    /// Whether the runtime for this device is installed.
    #[serde(rename = "isAvailable", default = "default_available")]
    pub is_available: bool,
}

fn default_available() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct DeviceList {
    devices: std::collections::HashMap<String, Vec<SimulatorDevice>>,
}

/// Operations on a single device.
#[async_trait]
pub trait DeviceProvider: Send + Sync {
    fn udid(&self) -> &str;

    async fn is_booted(&self) -> Result<bool, DeviceError>;

    /// Boots the device and brings its window up.
    async fn open(&self) -> Result<(), DeviceError>;

    async fn erase(&self) -> Result<(), DeviceError>;

    async fn shutdown(&self) -> Result<(), DeviceError>;

    async fn install(&self, app: &str) -> Result<(), DeviceError>;

    async fn uninstall(&self, bundle_id: &str) -> Result<(), DeviceError>;

    async fn exists(&self, bundle_id: &str) -> Result<bool, DeviceError>;

    async fn open_url(&self, url: &str) -> Result<(), DeviceError>;
}

/// Host-wide device operations.
#[async_trait]
pub trait DeviceHost: Send + Sync {
    /// Simulators whose runtime is installed.
    async fn available_devices(&self) -> Result<Vec<SimulatorDevice>, DeviceError>;

    /// Returns a provider for the device with `udid`.
    fn attach(&self, udid: &str, kind: DeviceKind) -> Result<Arc<dyn DeviceProvider>, DeviceError>;

    /// Quits every running simulator.
    async fn kill_all(&self) -> Result<(), DeviceError>;

    /// Reads the bundle identifier of an `.app` bundle on disk.
    async fn bundle_id(&self, app: &str) -> Result<String, DeviceError>;
}

/// Runs a command and returns its stdout, or stderr as the error.
async fn run(program: &str, args: &[&str]) -> Result<Vec<u8>, DeviceError> {
    debug!(program, ?args, "running device command");
    let output = Command::new(program).args(args).output().await?;
    if !output.status.success() {
        return Err(DeviceError::CommandFailed(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }
    Ok(output.stdout)
}

async fn simctl(args: &[&str]) -> Result<Vec<u8>, DeviceError> {
    let mut full = vec!["simctl"];
    full.extend_from_slice(args);
    run("xcrun", &full).await
}

/// Wrapper for `xcrun simctl`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Simctl;

impl Simctl {
    /// Lists all iOS Simulator devices, across runtimes.
    pub async fn list_devices() -> Result<Vec<SimulatorDevice>, DeviceError> {
        let stdout = simctl(&["list", "devices", "-j"]).await?;
        Self::parse_device_list(&stdout)
    }

    /// Parses `simctl list devices -j` output into a flat vector of devices.
    pub fn parse_device_list(json: &[u8]) -> Result<Vec<SimulatorDevice>, DeviceError> {
        let device_list: DeviceList = serde_json::from_slice(json)?;
        Ok(device_list.devices.into_values().flatten().collect())
    }

    /// Finds the first booted device in a list.
    pub fn find_booted_device(devices: &[SimulatorDevice]) -> Option<&SimulatorDevice> {
        devices.iter().find(|d| d.state == "Booted")
    }

    /// Finds an available device by its display name.
    pub fn find_by_name<'a>(devices: &'a [SimulatorDevice], name: &str) -> Option<&'a SimulatorDevice> {
        devices
            .iter()
            .filter(|d| d.is_available)
            .rfind(|d| d.name == name)
    }
}

#[async_trait]
impl DeviceHost for Simctl {
    async fn available_devices(&self) -> Result<Vec<SimulatorDevice>, DeviceError> {
        let devices = Self::list_devices().await?;
        Ok(devices.into_iter().filter(|d| d.is_available).collect())
    }

    fn attach(&self, udid: &str, kind: DeviceKind) -> Result<Arc<dyn DeviceProvider>, DeviceError> {
        match kind {
            DeviceKind::Simulator => Ok(Arc::new(SimulatorHandle {
                udid: udid.to_string(),
            })),
            DeviceKind::Real => Err(DeviceError::Unsupported(format!(
                "physical device {udid} cannot be driven through simctl"
            ))),
        }
    }

    async fn kill_all(&self) -> Result<(), DeviceError> {
        match run("killall", &["Simulator"]).await {
            Ok(_) => Ok(()),
            // nothing to kill
            Err(DeviceError::CommandFailed(msg)) if msg.contains("No matching processes") => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn bundle_id(&self, app: &str) -> Result<String, DeviceError> {
        let plist = format!("{}/Info.plist", app.trim_end_matches('/'));
        let stdout = run(
            "/usr/libexec/PlistBuddy",
            &["-c", "Print :CFBundleIdentifier", &plist],
        )
        .await?;
        let id = String::from_utf8_lossy(&stdout).trim().to_string();
        if id.is_empty() {
            return Err(DeviceError::CommandFailed(format!("no CFBundleIdentifier in {plist}")));
        }
        Ok(id)
    }
}

/// A single simulator, addressed by udid.
#[derive(Debug, Clone)]
pub struct SimulatorHandle {
    udid: String,
}

#[async_trait]
impl DeviceProvider for SimulatorHandle {
    fn udid(&self) -> &str {
        &self.udid
    }

    async fn is_booted(&self) -> Result<bool, DeviceError> {
        let devices = Simctl::list_devices().await?;
        Ok(devices
            .iter()
            .any(|d| d.udid == self.udid && d.state == "Booted"))
    }

    async fn open(&self) -> Result<(), DeviceError> {
        match simctl(&["boot", &self.udid]).await {
            Ok(_) => {}
            // Already booted is not an error
            Err(DeviceError::CommandFailed(msg)) if msg.contains("current state: Booted") => {}
            Err(e) => return Err(e),
        }
        run(
            "open",
            &["-a", "Simulator", "--args", "-CurrentDeviceUDID", &self.udid],
        )
        .await?;
        Ok(())
    }

    async fn erase(&self) -> Result<(), DeviceError> {
        simctl(&["erase", &self.udid]).await.map(|_| ())
    }

    async fn shutdown(&self) -> Result<(), DeviceError> {
        match simctl(&["shutdown", &self.udid]).await {
            Ok(_) => Ok(()),
            Err(DeviceError::CommandFailed(msg)) if msg.contains("current state: Shutdown") => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn install(&self, app: &str) -> Result<(), DeviceError> {
        simctl(&["install", &self.udid, app]).await.map(|_| ())
    }

    async fn uninstall(&self, bundle_id: &str) -> Result<(), DeviceError> {
        simctl(&["uninstall", &self.udid, bundle_id]).await.map(|_| ())
    }

    async fn exists(&self, bundle_id: &str) -> Result<bool, DeviceError> {
        match simctl(&["get_app_container", &self.udid, bundle_id]).await {
            Ok(_) => Ok(true),
            Err(DeviceError::CommandFailed(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn open_url(&self, url: &str) -> Result<(), DeviceError> {
        simctl(&["openurl", &self.udid, url]).await.map(|_| ())
    }
}
