//! Touch gesture batches.
//!
//! A batch is a JSON array of actions such as
//! `{"type": "tap", "x": 10, "y": 20}` or
//! `{"type": "pinch", "element": "5", "scale": 2}`. Each action becomes one
//! POST to the native agent. Actions run strictly in order; the first one to
//! fail ends the batch and nothing already done is undone.
//!
//! Element ids in actions are native agent ids and are forwarded as given.

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, instrument};

use crate::error::WdError;
use crate::native::{Method, NativeAgent};

const GESTURE_PREFIX: &str = "/wd/hub/session/temp/";

/// One parsed gesture.
#[derive(Debug, Clone, PartialEq)]
pub enum Gesture {
    Tap {
        element: Option<String>,
        x: f64,
        y: f64,
    },
    DoubleTap {
        element: Option<String>,
        x: f64,
        y: f64,
    },
    Press {
        element: Option<String>,
        x: f64,
        y: f64,
        duration: f64,
    },
    Pinch {
        element: String,
        scale: Option<f64>,
        velocity: Option<f64>,
    },
    Rotate {
        element: String,
        rotation: Option<f64>,
        velocity: Option<f64>,
    },
    Drag {
        element: Option<String>,
        from_x: Option<f64>,
        from_y: Option<f64>,
        to_x: Option<f64>,
        to_y: Option<f64>,
        duration: f64,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAction {
    #[serde(rename = "type")]
    kind: Option<String>,
    element: Option<Value>,
    x: Option<f64>,
    y: Option<f64>,
    duration: Option<f64>,
    scale: Option<f64>,
    velocity: Option<f64>,
    rotation: Option<f64>,
    from_x: Option<f64>,
    from_y: Option<f64>,
    to_x: Option<f64>,
    to_y: Option<f64>,
}

fn element_of(raw: &Option<Value>) -> Option<String> {
    match raw {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

fn missing_element() -> WdError {
    WdError::unknown("Missing 'element' in action!")
}

impl Gesture {
    /// Parses one action object.
    pub fn from_action(action: &Value) -> Result<Self, WdError> {
        if !action.get("type").is_some_and(Value::is_string) {
            return Err(WdError::unknown("Missing 'type' in action!"));
        }
        let raw: RawAction = serde_json::from_value(action.clone())
            .map_err(|e| WdError::unknown(format!("Malformed action: {e}")))?;
        let kind = raw
            .kind
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| WdError::unknown("Missing 'type' in action!"))?;
        let element = element_of(&raw.element);
        let x = raw.x.unwrap_or(0.0);
        let y = raw.y.unwrap_or(0.0);
        let duration = raw.duration.unwrap_or(1.0);

        let gesture = match kind {
            "tap" => Gesture::Tap { element, x, y },
            "doubleTap" => Gesture::DoubleTap { element, x, y },
            "press" => Gesture::Press {
                element,
                x,
                y,
                duration,
            },
            "pinch" => Gesture::Pinch {
                element: element.ok_or_else(missing_element)?,
                scale: raw.scale,
                velocity: raw.velocity,
            },
            "rotate" => Gesture::Rotate {
                element: element.ok_or_else(missing_element)?,
                rotation: raw.rotation,
                velocity: raw.velocity,
            },
            "drag" => Gesture::Drag {
                element,
                from_x: raw.from_x,
                from_y: raw.from_y,
                to_x: raw.to_x,
                to_y: raw.to_y,
                duration,
            },
            other => {
                return Err(WdError::not_implemented(format!(
                    "Touch action '{other}' is not implemented yet."
                )))
            }
        };
        Ok(gesture)
    }

    /// Agent path (relative to the gesture prefix) and request body.
    pub fn request(&self) -> (String, Value) {
        let mut body = Map::new();
        let mut put = |key: &str, value: Option<f64>| {
            if let Some(v) = value {
                body.insert(key.to_string(), Value::from(v));
            }
        };

        let path = match self {
            Gesture::Tap { element, x, y } => {
                put("x", Some(*x));
                put("y", Some(*y));
                format!("tap/{}", element.as_deref().unwrap_or("null"))
            }
            Gesture::DoubleTap { element, x, y } => {
                put("x", Some(*x));
                put("y", Some(*y));
                match element {
                    Some(el) => format!("uiaElement/{el}/doubleTap"),
                    None => "doubleTap".to_string(),
                }
            }
            Gesture::Press {
                element,
                x,
                y,
                duration,
            } => match element {
                Some(el) => {
                    put("duration", Some(*duration));
                    format!("uiaElement/{el}/touchAndHold")
                }
                None => {
                    put("x", Some(*x));
                    put("y", Some(*y));
                    put("duration", Some(*duration));
                    "touchAndHold".to_string()
                }
            },
            Gesture::Pinch {
                element,
                scale,
                velocity,
            } => {
                put("scale", *scale);
                put("velocity", *velocity);
                format!("element/{element}/pinch")
            }
            Gesture::Rotate {
                element,
                rotation,
                velocity,
            } => {
                put("rotation", *rotation);
                put("velocity", *velocity);
                format!("element/{element}/rotate")
            }
            Gesture::Drag {
                element,
                from_x,
                from_y,
                to_x,
                to_y,
                duration,
            } => match element {
                Some(el) => {
                    put("toX", *to_x);
                    put("toY", *to_y);
                    put("duration", Some(*duration));
                    format!("uiaTarget/{el}/dragfromtoforduration")
                }
                None => {
                    put("fromX", *from_x);
                    put("fromY", *from_y);
                    put("toX", *to_x);
                    put("toY", *to_y);
                    put("duration", Some(*duration));
                    "dragfromtoforduration".to_string()
                }
            },
        };
        (path, Value::Object(body))
    }
}

/// Runs a batch of actions against the native agent, in order.
///
/// Each action is parsed only when its turn comes, so a malformed action
/// fails the batch after the earlier ones have already run.
#[instrument(skip_all)]
pub async fn perform(native: &dyn NativeAgent, actions: &Value) -> Result<Value, WdError> {
    let actions = actions
        .as_array()
        .ok_or_else(|| WdError::unknown("Missing 'actions' in parameters."))?;

    for (index, action) in actions.iter().enumerate() {
        let gesture = Gesture::from_action(action)?;
        let (path, body) = gesture.request();
        debug!(index, path = %path, "dispatching gesture");

        let reply = native
            .send_command(&format!("{GESTURE_PREFIX}{path}"), Method::Post, Some(&body))
            .await?;
        if !reply.is_success() {
            debug!(index, status = reply.status, "gesture failed");
            return Err(WdError::from_status(reply.status, &reply.value));
        }
    }
    Ok(Value::Null)
}
