//! DEV watch session: debounced rebuilds and live-reload notification.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebouncedEventKind};
use tracing::{info, warn};

use crate::error::BuildError;
use crate::naming::Artifact;
use crate::pipeline::{BuildReport, BuildStatus, Pipeline};
use crate::theme::CLIENT_DIR;

/// Debounce window when the profile does not set one
pub const DEFAULT_DEBOUNCE_MS: u64 = 200;

/// How often the loop wakes up to check for shutdown
const SHUTDOWN_POLL: Duration = Duration::from_millis(250);

/// Tells connected clients to reload after a successful rebuild
pub trait LiveReload: Send {
    fn notify(&self, artifacts: &[Artifact]);
}

/// Logs each reload instead of pushing it anywhere
#[derive(Debug, Default)]
pub struct LogNotifier;

impl LiveReload for LogNotifier {
    fn notify(&self, artifacts: &[Artifact]) {
        info!(artifacts = artifacts.len(), "live reload");
    }
}

/// Sends the logical names of the rebuilt artifacts over a channel
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: Sender<Vec<String>>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, Receiver<Vec<String>>) {
        let (tx, rx) = channel();
        (Self { tx }, rx)
    }
}

impl LiveReload for ChannelNotifier {
    fn notify(&self, artifacts: &[Artifact]) {
        let names = artifacts.iter().map(|a| a.logical_name.clone()).collect();
        // Nobody listening any more
        let _ = self.tx.send(names);
    }
}

/// Changed paths worth a rebuild: outside `node_modules`, deduplicated
pub fn relevant_changes<'a>(paths: impl IntoIterator<Item = &'a Path>) -> Vec<PathBuf> {
    let unique: BTreeSet<PathBuf> = paths
        .into_iter()
        .filter(|path| {
            !path
                .components()
                .any(|c| matches!(c, Component::Normal(name) if name == "node_modules"))
        })
        .map(Path::to_path_buf)
        .collect();
    unique.into_iter().collect()
}

/// A pipeline kept alive between rebuilds
pub struct DevSession<N: LiveReload> {
    pipeline: Pipeline,
    notifier: N,
}

impl<N: LiveReload> DevSession<N> {
    pub fn new(pipeline: Pipeline, notifier: N) -> Self {
        Self { pipeline, notifier }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Initial full build
    pub fn start(&mut self) -> Result<BuildReport, BuildError> {
        let report = self.pipeline.run()?;
        self.announce(&report);
        Ok(report)
    }

    /// Rebuild after `changed` files were modified
    pub fn rebuild(&mut self, changed: &[PathBuf]) -> Result<BuildReport, BuildError> {
        let report = self.pipeline.rebuild(changed)?;
        self.announce(&report);
        Ok(report)
    }

    fn announce(&self, report: &BuildReport) {
        match report.status {
            BuildStatus::Success if self.pipeline.config().profile.has_live_reload() => {
                self.notifier.notify(&report.artifacts);
            }
            BuildStatus::Success | BuildStatus::Cancelled => {}
            BuildStatus::Failed => {
                for diagnostic in &report.diagnostics {
                    warn!("{diagnostic}");
                }
            }
        }
    }

    /// Watch `<root>/client` and rebuild on every debounced change until
    /// shutdown is requested. Failed rebuilds are logged and watching
    /// continues.
    pub fn watch(&mut self) -> Result<(), BuildError> {
        let config = self.pipeline.config();
        let dir = config.root.join(CLIENT_DIR);
        let debounce = Duration::from_millis(config.profile.debounce_ms().unwrap_or(DEFAULT_DEBOUNCE_MS));

        let (tx, rx) = channel();
        let mut debouncer = new_debouncer(debounce, tx).map_err(|e| BuildError::Watch(e.to_string()))?;
        debouncer
            .watcher()
            .watch(&dir, RecursiveMode::Recursive)
            .map_err(|e| BuildError::Watch(format!("{}: {e}", dir.display())))?;
        info!(dir = %dir.display(), "watching for changes");

        loop {
            if self.pipeline.is_shutdown() {
                info!("stopping watch");
                return Ok(());
            }

            match rx.recv_timeout(SHUTDOWN_POLL) {
                Ok(Ok(events)) => {
                    let changed = relevant_changes(
                        events
                            .iter()
                            .filter(|e| matches!(e.kind, DebouncedEventKind::Any))
                            .map(|e| e.path.as_path()),
                    );
                    if changed.is_empty() {
                        continue;
                    }
                    for path in &changed {
                        info!(path = %path.display(), "changed");
                    }
                    match self.rebuild(&changed) {
                        Ok(report) => info!(
                            status = ?report.status,
                            modules = report.processed.len(),
                            "rebuilt in {:.2}s",
                            report.duration.as_secs_f64()
                        ),
                        Err(e) => warn!(error = %e, "rebuild failed, still watching"),
                    }
                }
                Ok(Err(error)) => warn!(%error, "watch error, still watching"),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(BuildError::Watch("event channel closed".to_string()));
                }
            }
        }
    }
}
