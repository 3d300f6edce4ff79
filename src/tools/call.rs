use serde::Deserialize;
use serde_json::{Map, Value};

/// A tool request with its arguments validated and typed
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCall {
    SetBrightness { level: i64 },
    ToggleFlashlight { state: bool },
    ToggleWifi { state: bool },
    CheckBattery,
    OpenApp { app_name: String },
    GoHome,
    /// Name not in the registry
    Unknown { name: String },
    /// Known name whose arguments did not validate
    Invalid { name: String, reason: String },
}

#[derive(Deserialize)]
struct LevelArgs {
    level: f64,
}

#[derive(Deserialize)]
struct StateArgs {
    state: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppArgs {
    app_name: String,
}

impl ToolCall {
    /// Parse a raw request at the dispatch boundary
    ///
    /// Never fails: unrecognised names and bad arguments map to the
    /// pass-through variants.
    pub fn parse(name: &str, args: &Map<String, Value>) -> Self {
        let args = Value::Object(args.clone());

        let parsed = match name {
            "setBrightness" => serde_json::from_value::<LevelArgs>(args).map(|a| Self::SetBrightness {
                // Saturating float-to-int cast; no range clamp
                level: a.level.round() as i64,
            }),
            "toggleFlashlight" => {
                serde_json::from_value::<StateArgs>(args).map(|a| Self::ToggleFlashlight { state: a.state })
            }
            "toggleWifi" => {
                serde_json::from_value::<StateArgs>(args).map(|a| Self::ToggleWifi { state: a.state })
            }
            "checkBattery" => Ok(Self::CheckBattery),
            "openApp" => {
                serde_json::from_value::<AppArgs>(args).map(|a| Self::OpenApp { app_name: a.app_name })
            }
            "goHome" => Ok(Self::GoHome),
            other => {
                return Self::Unknown {
                    name: other.to_string(),
                }
            }
        };

        parsed.unwrap_or_else(|e| Self::Invalid {
            name: name.to_string(),
            reason: e.to_string(),
        })
    }

    /// Wire name of the tool
    pub fn name(&self) -> &str {
        match self {
            Self::SetBrightness { .. } => "setBrightness",
            Self::ToggleFlashlight { .. } => "toggleFlashlight",
            Self::ToggleWifi { .. } => "toggleWifi",
            Self::CheckBattery => "checkBattery",
            Self::OpenApp { .. } => "openApp",
            Self::GoHome => "goHome",
            Self::Unknown { name } | Self::Invalid { name, .. } => name,
        }
    }
}
