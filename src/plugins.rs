//! Build plugins and the orchestrator that fans hooks out to them.
//!
//! Every hook that can fail returns a [`HookOutcome`]. Soft failures are
//! logged and reported as warnings while the remaining plugins still run;
//! a hard failure stops the fan-out and aborts the build.
//!
//! Ordering guarantees: `before_build` runs before anything is written and
//! `optimize_assets` runs once per category after every artifact of that
//! category has been rendered.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use indicatif::{ProgressBar, ProgressStyle};
use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet};
use regex::Regex;
use tracing::{debug, info, warn};

use crate::bundle::Chunk;
use crate::error::BuildError;
use crate::naming::{Artifact, ArtifactCategory, PendingArtifact};
use crate::output::{clear_dir, remove_stale, write_if_changed};
use crate::resolver::BuildConfiguration;
use crate::rules::normalized;
use crate::transform::{ContentKind, Payload};
use crate::tzdata::{trim_packed_data, PACKED_DATA_SUFFIX};

/// Result of a plugin hook
#[derive(Debug)]
pub enum HookOutcome {
    Success,
    /// Logged and reported, the build continues
    SoftFailure(String),
    /// Aborts the build
    HardFailure(BuildError),
}

/// What a hook may consult
#[derive(Debug, Clone, Copy)]
pub struct HookContext<'a> {
    pub config: &'a BuildConfiguration,
    /// Rebuild of an existing module graph rather than a fresh build
    pub incremental: bool,
}

/// Optional hooks around the transformer chains. Every hook defaults to a
/// no-op.
pub trait Plugin: Send + Sync {
    fn name(&self) -> &'static str;

    fn before_build(&self, _ctx: &HookContext<'_>) -> HookOutcome {
        HookOutcome::Success
    }

    /// Runs on each module's final payload, before its imports are scanned
    fn process_module(&self, _path: &Path, _payload: &mut Payload) -> HookOutcome {
        HookOutcome::Success
    }

    /// A module finished processing, successfully or not
    fn module_finished(&self, _path: &Path) {}

    fn optimize_chunks(&self, _chunks: &mut Vec<Chunk>, _ctx: &HookContext<'_>) -> HookOutcome {
        HookOutcome::Success
    }

    fn optimize_assets(
        &self,
        _category: ArtifactCategory,
        _artifacts: &mut [PendingArtifact],
        _ctx: &HookContext<'_>,
    ) -> HookOutcome {
        HookOutcome::Success
    }

    fn after_build(&self, _ctx: &HookContext<'_>, _artifacts: &[Artifact]) -> HookOutcome {
        HookOutcome::Success
    }
}

/// Ordered plugin list with best-effort fan-out
#[derive(Clone, Default)]
pub struct PluginSet {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, plugin: Arc<dyn Plugin>) {
        self.plugins.push(plugin);
    }

    pub fn with(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.push(plugin);
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.plugins.iter().any(|p| p.name() == name)
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Run `hook` on every plugin, collecting soft failures as warnings
    fn fan_out<F>(&self, mut hook: F) -> Result<Vec<String>, BuildError>
    where
        F: FnMut(&dyn Plugin) -> HookOutcome,
    {
        let mut warnings = Vec::new();
        for plugin in &self.plugins {
            match hook(plugin.as_ref()) {
                HookOutcome::Success => {}
                HookOutcome::SoftFailure(message) => {
                    warn!(plugin = plugin.name(), "{message}");
                    warnings.push(format!("{}: {message}", plugin.name()));
                }
                HookOutcome::HardFailure(err) => return Err(err),
            }
        }
        Ok(warnings)
    }

    pub fn before_build(&self, ctx: &HookContext<'_>) -> Result<Vec<String>, BuildError> {
        self.fan_out(|p| p.before_build(ctx))
    }

    pub fn process_module(&self, path: &Path, payload: &mut Payload) -> Result<Vec<String>, BuildError> {
        self.fan_out(|p| p.process_module(path, &mut *payload))
    }

    pub fn module_finished(&self, path: &Path) {
        for plugin in &self.plugins {
            plugin.module_finished(path);
        }
    }

    pub fn optimize_chunks(&self, chunks: &mut Vec<Chunk>, ctx: &HookContext<'_>) -> Result<Vec<String>, BuildError> {
        self.fan_out(|p| p.optimize_chunks(&mut *chunks, ctx))
    }

    pub fn optimize_assets(
        &self,
        category: ArtifactCategory,
        artifacts: &mut [PendingArtifact],
        ctx: &HookContext<'_>,
    ) -> Result<Vec<String>, BuildError> {
        self.fan_out(|p| p.optimize_assets(category, &mut *artifacts, ctx))
    }

    pub fn after_build(&self, ctx: &HookContext<'_>, artifacts: &[Artifact]) -> Result<Vec<String>, BuildError> {
        self.fan_out(|p| p.after_build(ctx, artifacts))
    }
}

impl fmt::Debug for PluginSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

fn hard(plugin: &str, err: BuildError) -> HookOutcome {
    HookOutcome::HardFailure(BuildError::Plugin {
        plugin: plugin.to_string(),
        message: err.to_string(),
    })
}

// ==================== Output directory plugins ====================

/// Empties the theme output directory before a fresh build
#[derive(Debug, Default)]
pub struct OutputCleaner;

impl Plugin for OutputCleaner {
    fn name(&self) -> &'static str {
        "output-cleaner"
    }

    fn before_build(&self, ctx: &HookContext<'_>) -> HookOutcome {
        if ctx.incremental {
            return HookOutcome::Success;
        }
        debug!(dir = %ctx.config.output_dir.display(), "clearing output directory");
        match clear_dir(&ctx.config.output_dir) {
            Ok(()) => HookOutcome::Success,
            // Clearing failures keep their own error kind
            Err(err) => HookOutcome::HardFailure(err),
        }
    }
}

/// Removes every file in the output directory that this build did not
/// produce
#[derive(Debug, Default)]
pub struct StaleOutputCleaner;

impl Plugin for StaleOutputCleaner {
    fn name(&self) -> &'static str {
        "stale-output-cleaner"
    }

    fn after_build(&self, ctx: &HookContext<'_>, artifacts: &[Artifact]) -> HookOutcome {
        let keep: BTreeSet<PathBuf> = artifacts.iter().map(|a| a.physical_path.clone()).collect();
        match remove_stale(&ctx.config.output_dir, &keep) {
            Ok(removed) => {
                if !removed.is_empty() {
                    info!(count = removed.len(), "removed stale output files");
                }
                HookOutcome::Success
            }
            Err(err) => HookOutcome::HardFailure(err),
        }
    }
}

/// Writes artifacts that changed since the last flush and removes the
/// ones that disappeared
#[derive(Debug, Default)]
pub struct FlushOnWrite {
    written: Mutex<BTreeSet<PathBuf>>,
}

impl Plugin for FlushOnWrite {
    fn name(&self) -> &'static str {
        "flush-on-write"
    }

    fn after_build(&self, _ctx: &HookContext<'_>, artifacts: &[Artifact]) -> HookOutcome {
        let mut changed = 0usize;
        for artifact in artifacts {
            match write_if_changed(artifact) {
                Ok(true) => changed += 1,
                Ok(false) => {}
                Err(err) => return hard(self.name(), err),
            }
        }

        let current: BTreeSet<PathBuf> = artifacts.iter().map(|a| a.physical_path.clone()).collect();
        let mut written = match self.written.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for gone in written.difference(&current) {
            if let Err(e) = std::fs::remove_file(gone) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    return hard(self.name(), BuildError::output_write(gone, e));
                }
            }
        }
        *written = current;

        debug!(changed, total = artifacts.len(), "flushed artifacts");
        HookOutcome::Success
    }
}

// ==================== Module plugins ====================

/// Cuts the bundled timezone database down to a year range
#[derive(Debug, Clone)]
pub struct TimezoneDataTrimmer {
    pub start_year: i32,
    pub end_year: i32,
}

impl TimezoneDataTrimmer {
    pub fn new(start_year: i32, end_year: i32) -> Self {
        Self { start_year, end_year }
    }
}

impl Plugin for TimezoneDataTrimmer {
    fn name(&self) -> &'static str {
        "timezone-data-trimmer"
    }

    fn process_module(&self, path: &Path, payload: &mut Payload) -> HookOutcome {
        if !normalized(path).ends_with(PACKED_DATA_SUFFIX) {
            return HookOutcome::Success;
        }
        match trim_packed_data(&payload.bytes, self.start_year, self.end_year) {
            Ok(trimmed) => {
                debug!(
                    before = payload.bytes.len(),
                    after = trimmed.len(),
                    "trimmed timezone data to {}..={}",
                    self.start_year,
                    self.end_year
                );
                payload.bytes = trimmed;
                HookOutcome::Success
            }
            Err(message) => HookOutcome::SoftFailure(message),
        }
    }
}

/// Replaces build-time constants such as `process.env.NODE_ENV` in scripts
#[derive(Debug, Clone)]
pub struct DefineConstants {
    replacements: Vec<(Regex, String)>,
}

impl DefineConstants {
    pub fn new(defines: &BTreeMap<String, String>) -> Self {
        let replacements = defines
            .iter()
            .filter_map(|(key, value)| {
                let pattern = format!(r"\b{}\b", regex::escape(key));
                Regex::new(&pattern).ok().map(|re| (re, value.clone()))
            })
            .collect();
        Self { replacements }
    }
}

impl Plugin for DefineConstants {
    fn name(&self) -> &'static str {
        "define-constants"
    }

    fn process_module(&self, _path: &Path, payload: &mut Payload) -> HookOutcome {
        if payload.kind != ContentKind::Script {
            return HookOutcome::Success;
        }
        let mut text = payload.text().into_owned();
        for (re, value) in &self.replacements {
            if re.is_match(&text) {
                text = re.replace_all(&text, regex::NoExpand(value.as_str())).into_owned();
            }
        }
        payload.bytes = text.into_bytes();
        HookOutcome::Success
    }
}

/// Spinner counting processed modules
#[derive(Debug)]
pub struct ProgressReporter {
    bar: ProgressBar,
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self::with_bar(ProgressBar::new_spinner())
    }

    pub fn with_bar(bar: ProgressBar) -> Self {
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {pos} modules {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        Self { bar }
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for ProgressReporter {
    fn name(&self) -> &'static str {
        "progress-reporter"
    }

    fn before_build(&self, ctx: &HookContext<'_>) -> HookOutcome {
        self.bar.reset();
        self.bar.set_message(format!("building {}", ctx.config.request.theme));
        HookOutcome::Success
    }

    fn module_finished(&self, _path: &Path) {
        self.bar.inc(1);
    }

    fn after_build(&self, _ctx: &HookContext<'_>, artifacts: &[Artifact]) -> HookOutcome {
        self.bar.finish_with_message(format!("{} artifacts", artifacts.len()));
        HookOutcome::Success
    }
}

// ==================== Optimization plugins ====================

/// Merges script chunks until at most `max_chunks` remain
#[derive(Debug, Clone)]
pub struct ChunkLimiter {
    pub max_chunks: usize,
}

impl ChunkLimiter {
    pub fn new(max_chunks: usize) -> Self {
        Self {
            max_chunks: max_chunks.max(1),
        }
    }
}

impl Plugin for ChunkLimiter {
    fn name(&self) -> &'static str {
        "chunk-limiter"
    }

    fn optimize_chunks(&self, chunks: &mut Vec<Chunk>, _ctx: &HookContext<'_>) -> HookOutcome {
        while chunks.len() > self.max_chunks {
            let Some(last) = chunks.pop() else {
                break;
            };
            // With a single chunk left everything goes into the entry chunk
            let target = if self.max_chunks == 1 { 0 } else { chunks.len() - 1 };
            if let Some(into) = chunks.get_mut(target) {
                debug!(from = %last.name, into = %into.name, "merging chunk");
                into.absorb(last);
            }
        }
        HookOutcome::Success
    }
}

/// Minifies extracted stylesheets, dropping every comment
#[derive(Debug, Default)]
pub struct CssMinifier;

/// Minify one stylesheet
pub fn minify_css(css: &str) -> Result<String, String> {
    let mut sheet = StyleSheet::parse(css, ParserOptions::default()).map_err(|e| e.to_string())?;
    sheet.minify(MinifyOptions::default()).map_err(|e| e.to_string())?;
    let printed = sheet
        .to_css(PrinterOptions {
            minify: true,
            ..PrinterOptions::default()
        })
        .map_err(|e| e.to_string())?;
    Ok(printed.code)
}

impl Plugin for CssMinifier {
    fn name(&self) -> &'static str {
        "css-minifier"
    }

    fn optimize_assets(
        &self,
        category: ArtifactCategory,
        artifacts: &mut [PendingArtifact],
        _ctx: &HookContext<'_>,
    ) -> HookOutcome {
        if category != ArtifactCategory::Stylesheet {
            return HookOutcome::Success;
        }
        let mut failures = Vec::new();
        for artifact in artifacts.iter_mut().filter(|a| a.category == ArtifactCategory::Stylesheet) {
            let css = String::from_utf8_lossy(&artifact.bytes).into_owned();
            match minify_css(&css) {
                Ok(min) => artifact.bytes = min.into_bytes(),
                Err(e) => failures.push(format!("{}: {e}", artifact.declared_name)),
            }
        }
        if failures.is_empty() {
            HookOutcome::Success
        } else {
            HookOutcome::SoftFailure(format!("left unminified: {}", failures.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming::ArtifactRole;
    use crate::resolver::{resolve, BuildEnv};
    use crate::theme::{BuildRequest, Mode, ThemeName};
    use std::fs;
    use tempfile::TempDir;

    fn project(mode: Mode) -> (TempDir, BuildConfiguration) {
        let temp = TempDir::new().unwrap();
        let entry = temp.path().join("client/themes/default/index.js");
        fs::create_dir_all(entry.parent().unwrap()).unwrap();
        fs::write(&entry, "").unwrap();
        let request = BuildRequest::new(ThemeName::default(), mode);
        let config = resolve(temp.path(), &request, &BuildEnv::default()).unwrap();
        (temp, config)
    }

    fn artifact(config: &BuildConfiguration, name: &str, bytes: &[u8]) -> Artifact {
        Artifact {
            logical_name: name.to_string(),
            physical_path: config.output_dir.join(name),
            content_hash: None,
            category: ArtifactCategory::Script,
            bytes: bytes.to_vec(),
        }
    }

    struct Soft;
    impl Plugin for Soft {
        fn name(&self) -> &'static str {
            "soft"
        }
        fn before_build(&self, _ctx: &HookContext<'_>) -> HookOutcome {
            HookOutcome::SoftFailure("flaky".to_string())
        }
    }

    struct Hard;
    impl Plugin for Hard {
        fn name(&self) -> &'static str {
            "hard"
        }
        fn before_build(&self, _ctx: &HookContext<'_>) -> HookOutcome {
            HookOutcome::HardFailure(BuildError::Plugin {
                plugin: "hard".to_string(),
                message: "boom".to_string(),
            })
        }
    }

    #[derive(Default)]
    struct Counter(std::sync::atomic::AtomicUsize);
    impl Plugin for Counter {
        fn name(&self) -> &'static str {
            "counter"
        }
        fn before_build(&self, _ctx: &HookContext<'_>) -> HookOutcome {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            HookOutcome::Success
        }
    }

    // ==================== PluginSet tests ====================

    #[test]
    fn test_soft_failure_continues_fan_out() {
        let (_temp, config) = project(Mode::Release);
        let counter = Arc::new(Counter::default());
        let set = PluginSet::new().with(Arc::new(Soft)).with(counter.clone());
        let ctx = HookContext { config: &config, incremental: false };

        let warnings = set.before_build(&ctx).unwrap();

        assert_eq!(warnings, vec!["soft: flaky".to_string()]);
        assert_eq!(counter.0.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn test_hard_failure_stops_fan_out() {
        let (_temp, config) = project(Mode::Release);
        let counter = Arc::new(Counter::default());
        let set = PluginSet::new().with(Arc::new(Hard)).with(counter.clone());
        let ctx = HookContext { config: &config, incremental: false };

        assert!(set.before_build(&ctx).is_err());
        assert_eq!(counter.0.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    // ==================== Output plugin tests ====================

    #[test]
    fn test_output_cleaner_clears_fresh_builds_only() {
        let (_temp, config) = project(Mode::Release);
        fs::create_dir_all(&config.output_dir).unwrap();
        fs::write(config.output_dir.join("old.js"), "old").unwrap();

        let ctx = HookContext { config: &config, incremental: true };
        assert!(matches!(OutputCleaner.before_build(&ctx), HookOutcome::Success));
        assert!(config.output_dir.join("old.js").exists());

        let ctx = HookContext { config: &config, incremental: false };
        assert!(matches!(OutputCleaner.before_build(&ctx), HookOutcome::Success));
        assert!(!config.output_dir.join("old.js").exists());
    }

    #[test]
    fn test_stale_output_cleaner_keeps_artifacts() {
        let (_temp, config) = project(Mode::Release);
        fs::create_dir_all(&config.output_dir).unwrap();
        fs::write(config.output_dir.join("theme.js"), "new").unwrap();
        fs::write(config.output_dir.join("chunk.abc.js"), "old").unwrap();

        let ctx = HookContext { config: &config, incremental: false };
        let artifacts = vec![artifact(&config, "theme.js", b"new")];
        assert!(matches!(StaleOutputCleaner.after_build(&ctx, &artifacts), HookOutcome::Success));

        assert!(config.output_dir.join("theme.js").exists());
        assert!(!config.output_dir.join("chunk.abc.js").exists());
    }

    #[test]
    fn test_flush_on_write_removes_dropped_artifacts() {
        let (_temp, config) = project(Mode::Dev);
        let flush = FlushOnWrite::default();
        let ctx = HookContext { config: &config, incremental: false };

        let first = vec![artifact(&config, "theme.js", b"a"), artifact(&config, "svg/x.svg", b"x")];
        assert!(matches!(flush.after_build(&ctx, &first), HookOutcome::Success));
        assert!(config.output_dir.join("svg/x.svg").exists());

        let second = vec![artifact(&config, "theme.js", b"b")];
        assert!(matches!(flush.after_build(&ctx, &second), HookOutcome::Success));
        assert!(!config.output_dir.join("svg/x.svg").exists());
        assert_eq!(fs::read(config.output_dir.join("theme.js")).unwrap(), b"b");
    }

    // ==================== Module plugin tests ====================

    #[test]
    fn test_define_constants_in_scripts_only() {
        let defines: BTreeMap<String, String> =
            [("process.env.NODE_ENV".to_string(), "\"production\"".to_string())].into_iter().collect();
        let plugin = DefineConstants::new(&defines);

        let mut script = Payload::new(
            ContentKind::Script,
            b"if (process.env.NODE_ENV !== 'production') { debug() }".to_vec(),
        );
        plugin.process_module(Path::new("/app/a.js"), &mut script);
        assert_eq!(script.text(), "if (\"production\" !== 'production') { debug() }");

        let mut markup = Payload::new(ContentKind::Markup, b"process.env.NODE_ENV".to_vec());
        plugin.process_module(Path::new("/app/a.pug"), &mut markup);
        assert_eq!(markup.text(), "process.env.NODE_ENV");
    }

    #[test]
    fn test_timezone_trimmer_only_touches_packed_data() {
        let plugin = TimezoneDataTrimmer::new(2017, 2030);
        let mut other = Payload::new(ContentKind::Data, b"{\"zones\": 1}".to_vec());
        assert!(matches!(
            plugin.process_module(Path::new("/app/node_modules/x/latest.json"), &mut other),
            HookOutcome::Success
        ));

        let mut broken = Payload::new(ContentKind::Data, b"{\"zones\": 1}".to_vec());
        let outcome = plugin.process_module(
            Path::new("/app/node_modules/moment-timezone/data/packed/latest.json"),
            &mut broken,
        );
        assert!(matches!(outcome, HookOutcome::SoftFailure(_)));
    }

    #[test]
    fn test_progress_reporter_counts_modules() {
        let (_temp, config) = project(Mode::Dev);
        let reporter = ProgressReporter::with_bar(ProgressBar::hidden());
        let ctx = HookContext { config: &config, incremental: false };
        reporter.before_build(&ctx);
        reporter.module_finished(Path::new("a.js"));
        reporter.module_finished(Path::new("b.js"));
        assert_eq!(reporter.position(), 2);
    }

    // ==================== Optimization plugin tests ====================

    fn chunk(name: &str, modules: &[&str], is_entry: bool) -> Chunk {
        Chunk {
            name: name.to_string(),
            modules: modules.iter().map(PathBuf::from).collect(),
            roots: modules.first().map(PathBuf::from).into_iter().collect(),
            is_entry,
        }
    }

    #[test]
    fn test_chunk_limiter_merges_into_entry() {
        let (_temp, config) = project(Mode::Dev);
        let ctx = HookContext { config: &config, incremental: false };
        let mut chunks = vec![
            chunk("theme", &["/a.js"], true),
            chunk("fonts", &["/b.js", "/shared.js"], false),
            chunk("admin", &["/c.js", "/shared.js"], false),
        ];

        ChunkLimiter::new(1).optimize_chunks(&mut chunks, &ctx);

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].name, "theme");
        assert_eq!(chunks[0].modules.len(), 4);
    }

    #[test]
    fn test_chunk_limiter_keeps_entry_and_merges_tail() {
        let (_temp, config) = project(Mode::Release);
        let ctx = HookContext { config: &config, incremental: false };
        let mut chunks = vec![
            chunk("theme", &["/a.js"], true),
            chunk("fonts", &["/b.js"], false),
            chunk("admin", &["/c.js"], false),
        ];

        ChunkLimiter::new(2).optimize_chunks(&mut chunks, &ctx);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].name, "fonts");
        assert_eq!(chunks[1].roots.len(), 2);
    }

    #[test]
    fn test_css_minifier_drops_comments() {
        let (_temp, config) = project(Mode::Release);
        let ctx = HookContext { config: &config, incremental: false };
        let mut artifacts = vec![PendingArtifact::new(
            "theme.css",
            ArtifactCategory::Stylesheet,
            ArtifactRole::Primary,
            b"/* header */\n.a {\n  color: #ff0000;\n}\n".to_vec(),
        )];

        let outcome = CssMinifier.optimize_assets(ArtifactCategory::Stylesheet, &mut artifacts, &ctx);

        assert!(matches!(outcome, HookOutcome::Success));
        assert_eq!(String::from_utf8(artifacts[0].bytes.clone()).unwrap(), ".a{color:red}");
    }

    #[test]
    fn test_css_minifier_ignores_other_categories() {
        let (_temp, config) = project(Mode::Release);
        let ctx = HookContext { config: &config, incremental: false };
        let original = b"not { css".to_vec();
        let mut artifacts = vec![PendingArtifact::new("a.js", ArtifactCategory::Script, ArtifactRole::Chunk, original.clone())];

        CssMinifier.optimize_assets(ArtifactCategory::Script, &mut artifacts, &ctx);

        assert_eq!(artifacts[0].bytes, original);
    }
}
