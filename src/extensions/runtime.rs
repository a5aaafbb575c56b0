//! Host runtime handed to extension constructors.
//!
//! Extensions keep an `Arc<HostRuntime>` and read it when their blocks run,
//! so they always see the current target list rather than a snapshot taken
//! at construction time.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::peripheral::PeripheralExtension;
use super::ExtensionId;

/// Default length of one runtime step (30 frames per second).
pub const DEFAULT_STEP_TIME: Duration = Duration::from_millis(1000 / 30);

/// A sprite or the stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub is_stage: bool,
}

impl Target {
    pub fn stage(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: format!("stage:{}", name),
            name,
            is_stage: true,
        }
    }

    pub fn sprite(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            is_stage: false,
        }
    }
}

/// Shared host state visible to extensions.
pub struct HostRuntime {
    targets: RwLock<Vec<Target>>,
    peripherals: RwLock<HashMap<ExtensionId, Arc<dyn PeripheralExtension>>>,
    step_time: RwLock<Duration>,
}

impl Default for HostRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HostRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostRuntime")
            .field("targets", &self.targets.read().len())
            .field("peripherals", &self.peripherals.read().len())
            .field("step_time", &*self.step_time.read())
            .finish()
    }
}

impl HostRuntime {
    pub fn new() -> Self {
        Self {
            targets: RwLock::new(Vec::new()),
            peripherals: RwLock::new(HashMap::new()),
            step_time: RwLock::new(DEFAULT_STEP_TIME),
        }
    }

    /// Replace the whole target list.
    pub fn set_targets(&self, targets: Vec<Target>) {
        *self.targets.write() = targets;
    }

    /// Add a target, replacing any target with the same id.
    pub fn add_target(&self, target: Target) {
        let mut targets = self.targets.write();
        match targets.iter_mut().find(|t| t.id == target.id) {
            Some(existing) => *existing = target,
            None => targets.push(target),
        }
    }

    pub fn targets(&self) -> Vec<Target> {
        self.targets.read().clone()
    }

    /// The stage target, if one exists yet.
    pub fn stage(&self) -> Option<Target> {
        self.targets.read().iter().find(|t| t.is_stage).cloned()
    }

    pub fn target_by_id(&self, id: &str) -> Option<Target> {
        self.targets.read().iter().find(|t| t.id == id).cloned()
    }

    /// Record a peripheral extension so the editor can drive its connection.
    pub fn register_peripheral_extension(
        &self,
        extension_id: impl Into<ExtensionId>,
        peripheral: Arc<dyn PeripheralExtension>,
    ) {
        let extension_id = extension_id.into();
        debug!(extension_id = %extension_id, "Registered peripheral extension");
        self.peripherals.write().insert(extension_id, peripheral);
    }

    pub fn peripheral_extension(&self, extension_id: &str) -> Option<Arc<dyn PeripheralExtension>> {
        self.peripherals.read().get(extension_id).cloned()
    }

    pub fn peripheral_extension_ids(&self) -> Vec<ExtensionId> {
        let mut ids: Vec<_> = self.peripherals.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Ask a peripheral extension to start scanning. Returns `false` if no
    /// peripheral extension is registered under `extension_id`.
    pub fn scan_for_peripheral(&self, extension_id: &str) -> bool {
        match self.peripheral_extension(extension_id) {
            Some(peripheral) => {
                peripheral.scan();
                true
            }
            None => false,
        }
    }

    pub fn connect_peripheral(&self, extension_id: &str, peripheral_id: u32) -> bool {
        match self.peripheral_extension(extension_id) {
            Some(peripheral) => {
                peripheral.connect(peripheral_id);
                true
            }
            None => false,
        }
    }

    pub fn disconnect_peripheral(&self, extension_id: &str) -> bool {
        match self.peripheral_extension(extension_id) {
            Some(peripheral) => {
                peripheral.disconnect();
                true
            }
            None => false,
        }
    }

    pub fn peripheral_is_connected(&self, extension_id: &str) -> bool {
        self.peripheral_extension(extension_id)
            .map(|p| p.is_connected())
            .unwrap_or(false)
    }

    pub fn current_step_time(&self) -> Duration {
        *self.step_time.read()
    }

    pub fn set_step_time(&self, step: Duration) {
        *self.step_time.write() = step;
    }
}
