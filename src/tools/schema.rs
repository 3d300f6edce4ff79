use serde_json::json;

use crate::live::messages::{FunctionDeclaration, ToolSet};

/// Declarations for the six device-control tools
pub fn function_declarations() -> Vec<FunctionDeclaration> {
    vec![
        FunctionDeclaration {
            name: "setBrightness".into(),
            description: "Set the screen brightness level (0-100).".into(),
            parameters: json!({
                "type": "OBJECT",
                "properties": {
                    "level": { "type": "NUMBER", "description": "Brightness level from 0 to 100" }
                },
                "required": ["level"]
            }),
        },
        FunctionDeclaration {
            name: "toggleFlashlight".into(),
            description: "Turn the flashlight on or off.".into(),
            parameters: json!({
                "type": "OBJECT",
                "properties": {
                    "state": { "type": "BOOLEAN", "description": "true for on, false for off" }
                },
                "required": ["state"]
            }),
        },
        FunctionDeclaration {
            name: "toggleWifi".into(),
            description: "Turn Wi-Fi on or off.".into(),
            parameters: json!({
                "type": "OBJECT",
                "properties": {
                    "state": { "type": "BOOLEAN", "description": "true for on, false for off" }
                },
                "required": ["state"]
            }),
        },
        FunctionDeclaration {
            name: "checkBattery".into(),
            description: "Get the current battery level.".into(),
            parameters: json!({ "type": "OBJECT", "properties": {} }),
        },
        FunctionDeclaration {
            name: "openApp".into(),
            description: "Open an application on the phone.".into(),
            parameters: json!({
                "type": "OBJECT",
                "properties": {
                    "appName": {
                        "type": "STRING",
                        "description": "Name of the app, e.g. Camera, Maps, Settings, Messages"
                    }
                },
                "required": ["appName"]
            }),
        },
        FunctionDeclaration {
            name: "goHome".into(),
            description: "Close the current app and return to the home screen.".into(),
            parameters: json!({ "type": "OBJECT", "properties": {} }),
        },
    ]
}

/// Tool schema in the shape the setup message expects
pub fn tool_sets() -> Vec<ToolSet> {
    vec![ToolSet {
        function_declarations: function_declarations(),
    }]
}
