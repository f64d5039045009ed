//! Desired capabilities.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Bundle id of Mobile Safari, used when `browserName` is `Safari`.
pub const SAFARI_BUNDLE_ID: &str = "com.apple.mobilesafari";

/// Capability keys the native agent understands.
const AGENT_KEYS: &[&str] = &[
    "app",
    "bundleId",
    "platformName",
    "platformVersion",
    "browserName",
    "browserVersion",
    "acceptSslCerts",
];

/// How much device state survives between sessions.
///
/// - `0`: erase the simulator and reinstall
/// - `1`: keep the simulator, reinstall the app when one is given (default)
/// - `2`: keep the simulator, install over the existing app
/// - `3`: keep both simulator and app
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Reuse(pub u8);

impl Default for Reuse {
    fn default() -> Self {
        Reuse(1)
    }
}

impl Reuse {
    pub fn keeps_device(self) -> bool {
        self.0 > 0
    }
}

impl<'de> Deserialize<'de> for Reuse {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        let parsed = match &raw {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        };
        Ok(parsed
            .and_then(|n| u8::try_from(n).ok())
            .map(Reuse)
            .unwrap_or_default())
    }
}

/// Capabilities requested by the client at session creation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub udid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser_name: Option<String>,
    #[serde(default)]
    pub reuse: Reuse,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_port: Option<u16>,
    #[serde(default)]
    pub auto_accept_alerts: bool,
    #[serde(default)]
    pub auto_dismiss_alerts: bool,
    /// Everything else the client sent.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Capabilities {
    /// Reads capabilities from a new-session request body.
    ///
    /// Accepts JSON-wire `desiredCapabilities` as well as W3C
    /// `capabilities.alwaysMatch`.
    pub fn from_request(body: &Value) -> Result<Self, serde_json::Error> {
        let caps = body
            .get("desiredCapabilities")
            .or_else(|| body.pointer("/capabilities/alwaysMatch"))
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()));
        serde_json::from_value(caps)
    }

    pub fn is_safari(&self) -> bool {
        self.browser_name.as_deref() == Some("Safari")
    }

    /// The capability set handed to the native agent.
    ///
    /// Only keys the agent knows are kept, and only when they carry a
    /// non-empty value. `bundle_id` overrides whatever the client sent.
    pub fn filtered_for_agent(&self, bundle_id: Option<&str>, include_app: bool) -> Value {
        let mut all = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_object().cloned())
            .unwrap_or_default();
        if let Some(id) = bundle_id {
            all.insert("bundleId".into(), Value::String(id.to_string()));
        }

        let filtered: Map<String, Value> = all
            .into_iter()
            .filter(|(key, _)| AGENT_KEYS.contains(&key.as_str()))
            .filter(|(key, _)| include_app || key != "app")
            .filter(|(_, value)| is_truthy(value))
            .collect();
        Value::Object(filtered)
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        _ => true,
    }
}
