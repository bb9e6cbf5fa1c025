//! Periodic drift correction.
//!
//! Each tick refreshes the recorded installation and runs an update when the
//! refreshed state no longer matches what the configuration renders to.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::cluster::ClusterClient;
use crate::config::Configuration;
use crate::error::Result;
use crate::git::VersionControl;
use crate::lifecycle::BootstrapReconciler;
use crate::state::PersistedState;

/// What one tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickReport {
    /// No state file; nothing to reconcile.
    Untracked,
    /// The installation is gone from the cluster; the state file was removed.
    Missing,
    InSync,
    Updated { changed: Vec<String>, removed: Vec<String> },
    /// The configuration changes fields that need a new installation.
    ReplacementRequired(Vec<String>),
}

pub struct DriftScheduler<V: VersionControl, C: ClusterClient> {
    reconciler: Arc<BootstrapReconciler<V, C>>,
    config: Configuration,
    state_path: PathBuf,
    interval: Duration,
}

impl<V: VersionControl, C: ClusterClient> DriftScheduler<V, C> {
    /// Ticks at the configuration's reconciliation interval.
    pub fn new(
        reconciler: Arc<BootstrapReconciler<V, C>>,
        config: Configuration,
        state_path: impl Into<PathBuf>,
    ) -> Result<Self> {
        let interval = config.interval_duration()?;
        Ok(Self {
            reconciler,
            config,
            state_path: state_path.into(),
            interval,
        })
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    /// Ticks until `shutdown` turns true or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut timer = tokio::time::interval(self.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        timer.tick().await; // skip immediate first tick

        tracing::info!(
            interval = ?self.interval,
            state = %self.state_path.display(),
            "drift scheduler started"
        );
        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = timer.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }

            match self.tick().await {
                Ok(TickReport::Updated { changed, removed }) => {
                    tracing::info!(?changed, ?removed, "drift corrected")
                }
                Ok(TickReport::ReplacementRequired(fields)) => tracing::warn!(
                    fields = %fields.join(", "),
                    "configuration needs a new installation; skipping update"
                ),
                Ok(report) => tracing::debug!(?report, "drift check finished"),
                Err(e) => tracing::error!(error = %e, "drift check failed"),
            }
        }
        tracing::info!("drift scheduler stopped");
    }

    /// Refreshes once and updates when the refreshed state has drifted.
    pub async fn tick(&self) -> Result<TickReport> {
        let Some(state) = PersistedState::load(&self.state_path)? else {
            return Ok(TickReport::Untracked);
        };

        let refreshed = self.reconciler.refresh(&self.config, &state).await?;
        let Some(refreshed) = refreshed.value else {
            PersistedState::remove(&self.state_path)?;
            tracing::warn!(namespace = %state.namespace, "installation missing; stopped tracking it");
            return Ok(TickReport::Missing);
        };
        refreshed.save(&self.state_path)?;

        let plan = self.reconciler.plan(&self.config, Some(&refreshed))?;
        if !plan.requires_replacement.is_empty() {
            return Ok(TickReport::ReplacementRequired(plan.requires_replacement));
        }
        if !plan.has_changes() {
            return Ok(TickReport::InSync);
        }

        let updated = self.reconciler.update(&self.config, &refreshed).await?;
        updated.value.save(&self.state_path)?;
        Ok(TickReport::Updated {
            changed: plan.changed,
            removed: plan.removed,
        })
    }
}
