//! Simulated device state and the battery sensor seam.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::watch;

/// Visible state of the simulated handset
///
/// Numeric fields conceptually lie in 0..=100 but are stored as written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceState {
    pub brightness: i64,
    pub flashlight: bool,
    pub battery_level: i64,
    pub wifi: bool,
    pub bluetooth: bool,
    pub volume: i64,
    /// Foreground app; `None` is the home screen
    pub active_app: Option<String>,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            brightness: 80,
            flashlight: false,
            battery_level: 85,
            wifi: true,
            bluetooth: true,
            volume: 60,
            active_app: None,
        }
    }
}

/// Owner of the single shared [`DeviceState`]
///
/// Writes go through [`DeviceStateStore::update`], which is crate-private so
/// that the tool dispatcher stays the only writer. Everyone else reads through
/// a [`DeviceStateView`].
#[derive(Debug)]
pub struct DeviceStateStore {
    tx: watch::Sender<DeviceState>,
}

impl DeviceStateStore {
    pub fn new(initial: DeviceState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    /// Current state, cloned
    pub fn snapshot(&self) -> DeviceState {
        self.tx.borrow().clone()
    }

    /// Read-only handle that can await changes
    pub fn view(&self) -> DeviceStateView {
        DeviceStateView {
            rx: self.tx.subscribe(),
        }
    }

    pub(crate) fn update(&self, mutate: impl FnOnce(&mut DeviceState)) {
        self.tx.send_modify(mutate);
    }
}

impl Default for DeviceStateStore {
    fn default() -> Self {
        Self::new(DeviceState::default())
    }
}

/// Read-only view of the device state for presentation collaborators
#[derive(Debug, Clone)]
pub struct DeviceStateView {
    rx: watch::Receiver<DeviceState>,
}

impl DeviceStateView {
    pub fn snapshot(&self) -> DeviceState {
        self.rx.borrow().clone()
    }

    /// Wait for the next mutation and return the new state
    ///
    /// Returns `None` once the store has been dropped.
    pub async fn changed(&mut self) -> Option<DeviceState> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }
}

/// Live battery level source
#[async_trait::async_trait]
pub trait BatterySensor: Send + Sync {
    /// Battery charge in percent
    async fn battery_level(&self) -> Result<i64>;
}

/// Battery sensor backed by the Linux power-supply class
pub struct SysfsBattery {
    capacity_path: PathBuf,
}

impl SysfsBattery {
    /// Locate the first battery under `/sys/class/power_supply`
    pub fn detect() -> Option<Self> {
        Self::detect_in("/sys/class/power_supply")
    }

    pub fn detect_in(root: impl Into<PathBuf>) -> Option<Self> {
        let root = root.into();
        let entries = std::fs::read_dir(&root).ok()?;

        entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("BAT"))
            .map(|e| e.path().join("capacity"))
            .find(|p| p.exists())
            .map(|capacity_path| Self { capacity_path })
    }
}

#[async_trait::async_trait]
impl BatterySensor for SysfsBattery {
    async fn battery_level(&self) -> Result<i64> {
        let raw = tokio::fs::read_to_string(&self.capacity_path)
            .await
            .with_context(|| format!("Failed to read {}", self.capacity_path.display()))?;

        raw.trim()
            .parse::<i64>()
            .with_context(|| format!("Unexpected battery capacity {:?}", raw.trim()))
    }
}
