//! Isolated reconciler with in-memory backends and a temporary state file.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;

use fluxstrap::cluster::MemoryCluster;
use fluxstrap::config::Configuration;
use fluxstrap::git::MemoryRemote;
use fluxstrap::{BootstrapReconciler, DriftScheduler, PersistedState};

pub struct TestHarness {
    temp_dir: TempDir,
    pub state_path: PathBuf,
    pub reconciler: Arc<BootstrapReconciler<MemoryRemote, MemoryCluster>>,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let state_path = temp_dir.path().join("fluxstrap-state.json");
        let reconciler = Arc::new(BootstrapReconciler::new(MemoryRemote::new(), MemoryCluster::new()));
        Self {
            temp_dir,
            state_path,
            reconciler,
        }
    }

    pub fn remote(&self) -> &MemoryRemote {
        self.reconciler.vcs()
    }

    pub fn cluster(&self) -> &MemoryCluster {
        self.reconciler.cluster()
    }

    /// Creates the installation and saves its state.
    pub async fn create(&self, config: &Configuration) -> PersistedState {
        let state = self
            .reconciler
            .create(config)
            .await
            .expect("create should succeed")
            .value;
        state.save(&self.state_path).expect("Failed to save state");
        state
    }

    pub fn saved_state(&self) -> Option<PersistedState> {
        PersistedState::load(&self.state_path).expect("Failed to load state")
    }

    pub fn scheduler(&self, config: &Configuration) -> DriftScheduler<MemoryRemote, MemoryCluster> {
        DriftScheduler::new(Arc::clone(&self.reconciler), config.clone(), &self.state_path)
            .expect("Failed to create scheduler")
    }

    pub fn root(&self) -> &std::path::Path {
        self.temp_dir.path()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
