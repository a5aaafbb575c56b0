//! Load-state tracking for extensions.

use std::collections::HashMap;

use tracing::debug;

use super::ExtensionId;

/// Load state of an extension id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LoadState {
    /// Never loaded.
    #[default]
    Unloaded,
    /// A load is in progress.
    Loading,
    /// Loaded and registered. Terminal.
    Loaded,
    /// The last load attempt failed. A new attempt may be made.
    Failed { message: String },
}

/// Tracks which extension ids are loading, loaded or failed.
#[derive(Debug, Default)]
pub struct LoadTracker {
    states: HashMap<ExtensionId, LoadState>,
    /// Loaded ids in load order.
    loaded: Vec<ExtensionId>,
}

impl LoadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `id` as loading. Returns `false` if it is already loaded, in which
    /// case nothing changes.
    pub fn begin(&mut self, id: &str) -> bool {
        if self.is_loaded(id) {
            debug!(extension_id = %id, "Extension already loaded");
            return false;
        }
        self.states.insert(id.to_string(), LoadState::Loading);
        true
    }

    pub fn finish(&mut self, id: &str) {
        if !self.is_loaded(id) {
            self.loaded.push(id.to_string());
        }
        self.states.insert(id.to_string(), LoadState::Loaded);
    }

    /// Record a failed load. Has no effect on an id that is already loaded.
    pub fn fail(&mut self, id: &str, message: impl Into<String>) {
        if self.is_loaded(id) {
            return;
        }
        self.states.insert(
            id.to_string(),
            LoadState::Failed {
                message: message.into(),
            },
        );
    }

    pub fn is_loaded(&self, id: &str) -> bool {
        matches!(self.states.get(id), Some(LoadState::Loaded))
    }

    pub fn state(&self, id: &str) -> LoadState {
        self.states.get(id).cloned().unwrap_or_default()
    }

    /// Loaded ids in load order.
    pub fn loaded(&self) -> &[ExtensionId] {
        &self.loaded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_lifecycle() {
        let mut tracker = LoadTracker::new();
        assert_eq!(tracker.state("a"), LoadState::Unloaded);

        assert!(tracker.begin("a"));
        assert_eq!(tracker.state("a"), LoadState::Loading);
        assert!(!tracker.is_loaded("a"));

        tracker.finish("a");
        assert!(tracker.is_loaded("a"));
        assert!(!tracker.begin("a"));
        assert_eq!(tracker.loaded(), ["a".to_string()]);
    }

    #[test]
    fn test_failed_load_can_retry() {
        let mut tracker = LoadTracker::new();
        tracker.begin("a");
        tracker.fail("a", "constructor failed");
        assert_eq!(
            tracker.state("a"),
            LoadState::Failed {
                message: "constructor failed".into()
            }
        );

        assert!(tracker.begin("a"));
        tracker.finish("a");
        assert!(tracker.is_loaded("a"));
    }

    #[test]
    fn test_loaded_is_terminal() {
        let mut tracker = LoadTracker::new();
        tracker.begin("a");
        tracker.finish("a");
        tracker.fail("a", "late failure");
        assert!(tracker.is_loaded("a"));
        tracker.finish("a");
        assert_eq!(tracker.loaded().len(), 1);
    }
}
