//! Build orchestration.
//!
//! One [`Pipeline`] owns the configuration of a `(theme, mode)` request and,
//! between builds, the module graph and transform cache. Each build runs:
//! - `before_build` hooks (output clearing)
//! - parallel module discovery and transformation
//! - bundle assembly, naming and asset optimisation
//! - writing (RELEASE, with rollback) and `after_build` hooks

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::bundle::assemble;
use crate::cache::TransformCache;
use crate::error::BuildError;
use crate::graph::{GraphContext, ModuleGraph};
use crate::naming::Artifact;
use crate::output::write_all;
use crate::plugins::HookContext;
use crate::resolver::BuildConfiguration;
use crate::transform::{ChainContext, TransformerRegistry};

/// Cache-line aligned atomic counter to prevent false sharing
/// Each counter is on its own 64-byte cache line
#[repr(align(64))]
pub struct CacheAlignedAtomic(pub AtomicU64);

impl CacheAlignedAtomic {
    pub const fn new(val: u64) -> Self {
        Self(AtomicU64::new(val))
    }
}

/// Counters accumulated over every build of a pipeline
pub struct BuildStats {
    pub builds: CacheAlignedAtomic,
    pub modules_processed: CacheAlignedAtomic,
    pub transform_failures: CacheAlignedAtomic,
    pub bytes_written: CacheAlignedAtomic,
}

impl BuildStats {
    pub fn new() -> Self {
        Self {
            builds: CacheAlignedAtomic::new(0),
            modules_processed: CacheAlignedAtomic::new(0),
            transform_failures: CacheAlignedAtomic::new(0),
            bytes_written: CacheAlignedAtomic::new(0),
        }
    }
}

impl Default for BuildStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Build outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStatus {
    /// Every module transformed
    Success,
    /// Finished, but at least one module failed to transform
    Failed,
    /// Stopped by the user (SIGINT)
    Cancelled,
}

/// Result of one build
#[derive(Debug)]
pub struct BuildReport {
    pub status: BuildStatus,
    pub artifacts: Vec<Artifact>,
    /// File-scoped errors
    pub diagnostics: Vec<BuildError>,
    /// Soft plugin failures and skipped files
    pub warnings: Vec<String>,
    /// Files transformed by this build
    pub processed: Vec<PathBuf>,
    pub duration: Duration,
}

impl BuildReport {
    fn cancelled(processed: Vec<PathBuf>, warnings: Vec<String>, start: Instant) -> Self {
        Self {
            status: BuildStatus::Cancelled,
            artifacts: Vec::new(),
            diagnostics: Vec::new(),
            warnings,
            processed,
            duration: start.elapsed(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == BuildStatus::Success
    }

    /// Total size of the produced artifacts
    pub fn output_bytes(&self) -> u64 {
        self.artifacts.iter().map(|a| a.bytes.len() as u64).sum()
    }

    /// Artifact by logical name
    pub fn artifact(&self, logical_name: &str) -> Option<&Artifact> {
        self.artifacts.iter().find(|a| a.logical_name == logical_name)
    }
}

/// Builds one theme in one mode, keeping state between builds
pub struct Pipeline {
    config: BuildConfiguration,
    registry: TransformerRegistry,
    cache: Option<TransformCache>,
    graph: Option<ModuleGraph>,
    /// Changes of a failed incremental rebuild, retried with the next one
    pending: BTreeSet<PathBuf>,
    stats: BuildStats,
    shutdown: Arc<AtomicBool>,
}

impl Pipeline {
    pub fn new(config: BuildConfiguration, registry: TransformerRegistry, shutdown: Arc<AtomicBool>) -> Self {
        let cache = config.cache_dir.as_ref().map(TransformCache::open);
        Self {
            config,
            registry,
            cache,
            graph: None,
            pending: BTreeSet::new(),
            stats: BuildStats::new(),
            shutdown,
        }
    }

    pub fn config(&self) -> &BuildConfiguration {
        &self.config
    }

    pub fn stats(&self) -> &BuildStats {
        &self.stats
    }

    pub fn cache(&self) -> Option<&TransformCache> {
        self.cache.as_ref()
    }

    pub fn graph(&self) -> Option<&ModuleGraph> {
        self.graph.as_ref()
    }

    /// Whether the user asked to stop
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Fresh build from the entry module
    pub fn run(&mut self) -> Result<BuildReport, BuildError> {
        self.execute(None)
    }

    /// Rebuild after `changed` files were modified, reusing the module
    /// graph of the previous build. Without one this is a fresh build.
    pub fn rebuild(&mut self, changed: &[PathBuf]) -> Result<BuildReport, BuildError> {
        if self.graph.is_none() {
            return self.execute(None);
        }
        self.execute(Some(changed))
    }

    fn execute(&mut self, changed: Option<&[PathBuf]>) -> Result<BuildReport, BuildError> {
        let start = Instant::now();
        let config = &self.config;
        let ctx = HookContext {
            config,
            incremental: changed.is_some(),
        };
        self.stats.builds.0.fetch_add(1, Ordering::Relaxed);

        let mut warnings = config.plugins.before_build(&ctx)?;

        let chain = ChainContext {
            registry: &self.registry,
            cache: self.cache.as_ref(),
            root: &config.root,
        };
        let graph_ctx = GraphContext::new(config, chain, &self.shutdown);

        // A failed discovery leaves the previous graph in place
        let discovered = match (changed, self.graph.take()) {
            (Some(changed), Some(mut graph)) => {
                let mut changed_now = std::mem::take(&mut self.pending);
                changed_now.extend(changed.iter().cloned());
                let changed_now: Vec<PathBuf> = changed_now.into_iter().collect();
                let result = graph.update(&graph_ctx, &changed_now);
                if result.is_err() {
                    self.pending = changed_now.into_iter().collect();
                }
                self.graph = Some(graph);
                result
            }
            (_, previous) => match ModuleGraph::build(&graph_ctx) {
                Ok(graph) => {
                    let processed = graph.modules().map(|m| m.path.clone()).collect();
                    self.graph = Some(graph);
                    self.pending.clear();
                    Ok(processed)
                }
                Err(e) => {
                    self.graph = previous;
                    Err(e)
                }
            },
        };
        let processed = match discovered {
            Ok(processed) => processed,
            Err(BuildError::Cancelled) => {
                info!("build cancelled during transformation");
                return Ok(BuildReport::cancelled(Vec::new(), warnings, start));
            }
            Err(e) => return Err(e),
        };
        self.stats
            .modules_processed
            .0
            .fetch_add(processed.len() as u64, Ordering::Relaxed);

        let Some(graph) = self.graph.as_ref() else {
            return Ok(BuildReport::cancelled(processed, warnings, start));
        };
        let diagnostics = graph.diagnostics();
        self.stats
            .transform_failures
            .0
            .fetch_add(diagnostics.len() as u64, Ordering::Relaxed);
        warnings.extend(graph.warnings());

        let bundle = assemble(graph, &ctx)?;
        warnings.extend(bundle.warnings);
        let artifacts = bundle.artifacts;

        if self.shutdown.load(Ordering::Relaxed) {
            return Ok(BuildReport::cancelled(processed, warnings, start));
        }

        if config.profile.writes_directly() {
            match write_all(&artifacts, &config.output_dir, &self.shutdown) {
                Ok(bytes) => {
                    self.stats.bytes_written.0.fetch_add(bytes, Ordering::Relaxed);
                }
                Err(BuildError::Cancelled) => {
                    info!("build cancelled while writing, output cleared");
                    return Ok(BuildReport::cancelled(processed, warnings, start));
                }
                Err(e) => return Err(e),
            }
        }

        warnings.extend(config.plugins.after_build(&ctx, &artifacts)?);

        let status = if diagnostics.is_empty() {
            BuildStatus::Success
        } else {
            BuildStatus::Failed
        };
        let report = BuildReport {
            status,
            artifacts,
            diagnostics,
            warnings,
            processed,
            duration: start.elapsed(),
        };
        info!(
            theme = %config.request.theme,
            mode = %config.request.mode,
            status = ?report.status,
            artifacts = report.artifacts.len(),
            modules = report.processed.len(),
            "build finished in {:.2}s",
            report.duration.as_secs_f64()
        );
        if let Some(cache) = &self.cache {
            debug!(stats = %cache.stats(), "transform cache");
        }
        Ok(report)
    }
}
