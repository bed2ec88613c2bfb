//! Synthesis configuration

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::model::ObjectiveKind;

/// Options controlling schedule synthesis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    /// Number of worker tapes to produce
    pub workers: usize,
    /// What the solver minimizes first
    pub objective: ObjectiveKind,
    /// Branch-and-bound node budget; the best schedule found so far is kept
    /// when it runs out
    pub max_search_nodes: u64,
    /// Reject schedules that leave a worker without reactions
    pub require_all_workers: bool,
    /// Drop cross-worker synchronisation already implied by other pairs
    pub prune_redundant_sync: bool,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            objective: ObjectiveKind::Makespan,
            max_search_nodes: 200_000,
            require_all_workers: false,
            prune_redundant_sync: true,
        }
    }
}

impl SynthesisConfig {
    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers,
            ..Self::default()
        }
    }

    /// Read a JSON config file; missing fields take their defaults
    pub fn load(path: &Path) -> Result<Self, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
        serde_json::from_str(&text).map_err(|e| format!("{}: {}", path.display(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json() {
        let config: SynthesisConfig =
            serde_json::from_str(r#"{"workers": 3, "objective": "balance"}"#).unwrap();
        assert_eq!(config.workers, 3);
        assert_eq!(config.objective, ObjectiveKind::Balance);
        assert!(config.prune_redundant_sync);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("synth.json");
        std::fs::write(&path, r#"{"max_search_nodes": 10}"#).unwrap();
        let config = SynthesisConfig::load(&path).unwrap();
        assert_eq!(config.max_search_nodes, 10);
        assert_eq!(config.workers, 1);
    }
}
