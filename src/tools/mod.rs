//! Device-control tools invoked by the live model
//!
//! The dispatcher is the only writer of [`DeviceState`](crate::device::DeviceState).
//! Tool handlers never fail the session: sensor errors fall back to cached
//! state and unrecognised calls succeed without side effects.

mod call;
pub mod schema;

pub use call::ToolCall;

use anyhow::Result;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::device::{BatterySensor, DeviceState, DeviceStateStore, DeviceStateView};
use crate::live::messages::{FunctionCall, FunctionResponse};
use crate::session::ConversationLog;

/// Executes tool calls against the device state
pub struct ToolDispatcher {
    store: DeviceStateStore,
    sensor: Option<Arc<dyn BatterySensor>>,
}

impl ToolDispatcher {
    pub fn new(store: DeviceStateStore, sensor: Option<Arc<dyn BatterySensor>>) -> Self {
        Self { store, sensor }
    }

    /// Read-only view for presentation
    pub fn device_state(&self) -> DeviceStateView {
        self.store.view()
    }

    pub fn snapshot(&self) -> DeviceState {
        self.store.snapshot()
    }

    /// Run one call and return its structured result
    pub async fn execute(&self, call: &ToolCall) -> Value {
        match call {
            ToolCall::SetBrightness { level } => {
                let level = *level;
                self.store.update(|s| s.brightness = level);
                json!({ "status": format!("Brightness set to {level}%") })
            }
            ToolCall::ToggleFlashlight { state } => {
                let state = *state;
                self.store.update(|s| s.flashlight = state);
                json!({ "status": format!("Flashlight turned {}", on_off(state)) })
            }
            ToolCall::ToggleWifi { state } => {
                let state = *state;
                self.store.update(|s| s.wifi = state);
                json!({ "status": format!("Wi-Fi turned {}", on_off(state)) })
            }
            ToolCall::CheckBattery => {
                json!({ "batteryLevel": self.battery_level().await })
            }
            ToolCall::OpenApp { app_name } => {
                let name = app_name.clone();
                self.store.update(|s| s.active_app = Some(name));
                json!({ "status": format!("Opened {app_name}") })
            }
            ToolCall::GoHome => {
                self.store.update(|s| s.active_app = None);
                json!({ "status": "Returned to home screen" })
            }
            ToolCall::Unknown { name } => {
                debug!("Unknown tool '{}', answering with generic success", name);
                json!({ "result": "ok" })
            }
            ToolCall::Invalid { name, reason } => {
                warn!("Ignoring '{}' call with invalid arguments: {}", name, reason);
                json!({ "result": "ok" })
            }
        }
    }

    /// Execute a batch strictly in arrival order
    ///
    /// Returns exactly one response per request, in the same order. Each call
    /// is logged before and after it runs.
    pub async fn dispatch_batch(
        &self,
        calls: &[FunctionCall],
        log: &ConversationLog,
    ) -> Vec<FunctionResponse> {
        let mut responses = Vec::with_capacity(calls.len());

        for request in calls {
            log.system(format!(
                "Executing: {}({})",
                request.name,
                Value::Object(request.args.clone())
            ));

            let call = ToolCall::parse(&request.name, &request.args);
            let response = self.execute(&call).await;

            log.system(format!("Result: {response}"));

            responses.push(FunctionResponse {
                id: request.id.clone(),
                name: request.name.clone(),
                response,
            });
        }

        responses
    }

    /// Poll the sensor and cache the reading in the device state
    pub async fn refresh_battery(&self) -> Result<i64> {
        let Some(sensor) = &self.sensor else {
            return Ok(self.store.snapshot().battery_level);
        };

        let level = sensor.battery_level().await?;
        self.store.update(|s| s.battery_level = level);
        Ok(level)
    }

    /// Poll the sensor every `period` so the cached level stays current
    ///
    /// Returns `None` when there is no sensor. The task runs until aborted.
    pub fn spawn_battery_refresh(self: &Arc<Self>, period: Duration) -> Option<JoinHandle<()>> {
        self.sensor.as_ref()?;
        let dispatcher = Arc::clone(self);

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                if let Err(e) = dispatcher.refresh_battery().await {
                    debug!("Battery refresh failed: {:#}", e);
                }
            }
        }))
    }

    /// Live reading if available, cached level otherwise
    async fn battery_level(&self) -> i64 {
        if let Some(sensor) = &self.sensor {
            match sensor.battery_level().await {
                Ok(level) => return level,
                Err(e) => warn!("Battery sensor failed, using cached level: {:#}", e),
            }
        }
        self.store.snapshot().battery_level
    }
}

fn on_off(state: bool) -> &'static str {
    if state {
        "ON"
    } else {
        "OFF"
    }
}
