//! Module graph discovery.
//!
//! Starting from the theme entry, files are processed in waves: every file
//! in a wave is matched and transformed in parallel, then the imports of
//! the wave are resolved to form the next one. A file is processed at most
//! once per build. Incremental updates reprocess only the changed files
//! plus anything new they import, then drop modules no longer reachable.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::builtins::declared_asset_name;
use crate::error::BuildError;
use crate::modules::{asset_marker, scan_dependencies, Dependency, DependencyKind, ModuleResolver};
use crate::plugins::PluginSet;
use crate::resolver::BuildConfiguration;
use crate::rules::{match_path, MatchOutcome, UnsupportedPolicy};
use crate::transform::{run_chain, ChainContext, ContentKind, EmittedFile, Payload};

/// Output sub-directory for files copied without a rule
pub const PASSTHROUGH_DIR: &str = "files/";

/// Processing result for one file
#[derive(Debug, Clone, PartialEq)]
pub enum ModuleState {
    Ready(Payload),
    /// A stage failed; the module is bundled as a throwing stub
    Failed { stage: String, cause: String },
    /// Left out of the bundle (unsupported type under the skip policy)
    Skipped { reason: String },
}

/// An import together with the file it resolved to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDependency {
    pub dependency: Dependency,
    pub target: PathBuf,
}

/// One processed source file
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub path: PathBuf,
    /// Root-relative path
    pub rel: String,
    pub state: ModuleState,
    pub deps: Vec<ResolvedDependency>,
    /// Soft plugin failures for this module
    pub warnings: Vec<String>,
}

impl Module {
    pub fn payload(&self) -> Option<&Payload> {
        match &self.state {
            ModuleState::Ready(payload) => Some(payload),
            _ => None,
        }
    }

    /// Target of the dependency written as `specifier` with `kind`
    pub fn target_of(&self, specifier: &str, kind: &DependencyKind) -> Option<&Path> {
        self.deps
            .iter()
            .find(|d| d.dependency.specifier == specifier && same_kind(&d.dependency.kind, kind))
            .map(|d| d.target.as_path())
    }
}

fn same_kind(a: &DependencyKind, b: &DependencyKind) -> bool {
    std::mem::discriminant(a) == std::mem::discriminant(b)
}

/// Shared state for processing files
pub struct GraphContext<'a> {
    pub config: &'a BuildConfiguration,
    pub chain: ChainContext<'a>,
    pub resolver: ModuleResolver,
    pub shutdown: &'a AtomicBool,
}

impl<'a> GraphContext<'a> {
    pub fn new(config: &'a BuildConfiguration, chain: ChainContext<'a>, shutdown: &'a AtomicBool) -> Self {
        Self {
            config,
            chain,
            resolver: ModuleResolver::new(&config.root, config.aliases.clone()),
            shutdown,
        }
    }

    fn plugins(&self) -> &PluginSet {
        &self.config.plugins
    }

    /// Match, transform and scan one file.
    ///
    /// File-scoped failures become a failed module; unresolvable imports
    /// and unsupported types (unless skipped) are build errors.
    pub fn process(&self, path: &Path) -> Result<Module, BuildError> {
        let rel = self.config.relative(path);
        let result = self.process_inner(path, rel);
        self.plugins().module_finished(path);
        result
    }

    fn process_inner(&self, path: &Path, rel: String) -> Result<Module, BuildError> {
        let module = |state, deps, warnings| Module {
            path: path.to_path_buf(),
            rel: rel.clone(),
            state,
            deps,
            warnings,
        };

        if self.resolver.is_empty_module(path) {
            let payload = Payload::new(ContentKind::Script, Vec::new());
            return Ok(module(ModuleState::Ready(payload), Vec::new(), Vec::new()));
        }

        let source = match std::fs::read(path) {
            Ok(source) => source,
            Err(e) => {
                let state = ModuleState::Failed {
                    stage: "read".to_string(),
                    cause: e.to_string(),
                };
                return Ok(module(state, Vec::new(), Vec::new()));
            }
        };

        let mut payload = match match_path(path, &self.config.rules, &self.config.policy) {
            MatchOutcome::Chain(rule) => {
                debug!(path = %rel, rule = %rule.name, "transforming");
                match run_chain(source, &rule.chain, path, &self.chain) {
                    Ok(payload) => payload,
                    Err(BuildError::Transform { stage, cause, .. }) => {
                        warn!(path = %rel, %stage, "transform failed: {cause}");
                        return Ok(module(ModuleState::Failed { stage, cause }, Vec::new(), Vec::new()));
                    }
                    Err(other) => return Err(other),
                }
            }
            MatchOutcome::Passthrough => {
                debug!(path = %rel, "passthrough");
                passthrough_payload(path, source)
            }
            MatchOutcome::Unsupported(extension) => match self.config.unsupported {
                UnsupportedPolicy::Fail => {
                    return Err(BuildError::UnsupportedAssetType {
                        path: path.to_path_buf(),
                        extension,
                    })
                }
                UnsupportedPolicy::Skip => {
                    let reason = format!("unsupported asset type '.{extension}'");
                    warn!(path = %rel, "skipping {reason}");
                    let warnings = vec![format!("{rel}: skipped {reason}")];
                    return Ok(module(ModuleState::Skipped { reason }, Vec::new(), warnings));
                }
            },
        };

        let warnings = self.plugins().process_module(path, &mut payload)?;

        let mut deps = Vec::new();
        for dependency in scan_dependencies(&payload) {
            let target = self.resolver.resolve_dependency(&dependency, path)?;
            deps.push(ResolvedDependency { dependency, target });
        }

        Ok(module(ModuleState::Ready(payload), deps, warnings))
    }
}

/// Payload for a file no rule claims.
///
/// Scripts and data are bundled verbatim; anything else is copied as a
/// standalone file and exported as its URL.
pub fn passthrough_payload(path: &Path, source: Vec<u8>) -> Payload {
    let payload = Payload::source(path, source);
    if matches!(payload.kind, ContentKind::Script | ContentKind::Data) {
        return payload;
    }
    let declared_name = declared_asset_name(path, Some(PASSTHROUGH_DIR), None);
    let mut url = Payload::new(ContentKind::Url, asset_marker(&declared_name, &payload.bytes).into_bytes());
    url.emitted.push(EmittedFile {
        declared_name,
        bytes: payload.bytes,
    });
    url
}

/// Every module reachable from the entry
#[derive(Debug, Clone, Default)]
pub struct ModuleGraph {
    entry: PathBuf,
    modules: BTreeMap<PathBuf, Module>,
}

impl ModuleGraph {
    /// Discover and process everything reachable from the configured entry
    pub fn build(ctx: &GraphContext<'_>) -> Result<Self, BuildError> {
        let mut graph = Self {
            entry: ctx.config.entry.clone(),
            modules: BTreeMap::new(),
        };
        graph.discover(ctx, vec![ctx.config.entry.clone()])?;
        Ok(graph)
    }

    /// Reprocess `changed` files already in the graph, pick up new imports
    /// and prune unreachable modules. Returns the files processed.
    pub fn update(&mut self, ctx: &GraphContext<'_>, changed: &[PathBuf]) -> Result<Vec<PathBuf>, BuildError> {
        let stale: Vec<PathBuf> = changed
            .iter()
            .filter(|p| self.modules.contains_key(*p))
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if stale.is_empty() {
            return Ok(Vec::new());
        }
        let processed = self.discover(ctx, stale)?;
        self.prune();
        Ok(processed)
    }

    /// Process `initial` unconditionally, then every newly referenced file.
    ///
    /// Results are staged and only merged into the graph once every wave
    /// succeeded, so an error leaves the previous graph untouched.
    fn discover(&mut self, ctx: &GraphContext<'_>, initial: Vec<PathBuf>) -> Result<Vec<PathBuf>, BuildError> {
        let mut staged: BTreeMap<PathBuf, Module> = BTreeMap::new();
        let mut processed = Vec::new();
        let mut wave = initial;

        while !wave.is_empty() {
            if ctx.shutdown.load(Ordering::Relaxed) {
                return Err(BuildError::Cancelled);
            }

            let results: Vec<Result<Module, BuildError>> = wave.par_iter().map(|path| ctx.process(path)).collect();

            let mut next = BTreeSet::new();
            let mut modules = Vec::with_capacity(results.len());
            for result in results {
                modules.push(result?);
            }
            for module in &modules {
                for dep in &module.deps {
                    let known = self.modules.contains_key(&dep.target) || staged.contains_key(&dep.target);
                    if !known && !wave.contains(&dep.target) {
                        next.insert(dep.target.clone());
                    }
                }
            }
            for module in modules {
                processed.push(module.path.clone());
                staged.insert(module.path.clone(), module);
            }
            debug!(files = wave.len(), next = next.len(), "wave complete");
            wave = next.into_iter().collect();
        }

        self.modules.extend(staged);
        Ok(processed)
    }

    /// Drop modules the entry no longer reaches
    fn prune(&mut self) {
        let mut reachable = BTreeSet::new();
        let mut stack = vec![self.entry.clone()];
        while let Some(path) = stack.pop() {
            if !reachable.insert(path.clone()) {
                continue;
            }
            if let Some(module) = self.modules.get(&path) {
                stack.extend(module.deps.iter().map(|d| d.target.clone()));
            }
        }
        self.modules.retain(|path, _| reachable.contains(path));
    }

    pub fn entry(&self) -> &Path {
        &self.entry
    }

    pub fn get(&self, path: &Path) -> Option<&Module> {
        self.modules.get(path)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.modules.contains_key(path)
    }

    /// Modules in path order
    pub fn modules(&self) -> impl Iterator<Item = &Module> {
        self.modules.values()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Modules that transformed successfully
    pub fn ready_count(&self) -> usize {
        self.modules().filter(|m| m.payload().is_some()).count()
    }

    /// One error per failed module
    pub fn diagnostics(&self) -> Vec<BuildError> {
        self.modules()
            .filter_map(|m| match &m.state {
                ModuleState::Failed { stage, cause } => Some(BuildError::Transform {
                    stage: stage.clone(),
                    path: m.path.clone(),
                    cause: cause.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    /// Soft failures and skips recorded on modules
    pub fn warnings(&self) -> Vec<String> {
        self.modules().flat_map(|m| m.warnings.iter().cloned()).collect()
    }

    /// Modules reachable from `start` through bundled (non-dynamic)
    /// imports, dependencies before dependents. `exclude` is not entered.
    pub fn static_closure(&self, start: &Path, exclude: &BTreeSet<PathBuf>) -> Vec<PathBuf> {
        let mut order = Vec::new();
        let mut visited = BTreeSet::new();
        self.visit(start, exclude, &mut visited, &mut order);
        order
    }

    fn visit(&self, path: &Path, exclude: &BTreeSet<PathBuf>, visited: &mut BTreeSet<PathBuf>, order: &mut Vec<PathBuf>) {
        if exclude.contains(path) || !visited.insert(path.to_path_buf()) {
            return;
        }
        let Some(module) = self.modules.get(path) else {
            return;
        };
        for dep in &module.deps {
            if dep.dependency.kind.is_static() && dep.dependency.kind != DependencyKind::Url {
                self.visit(&dep.target, exclude, visited, order);
            }
        }
        order.push(path.to_path_buf());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TransformCache;
    use crate::naming::content_hash;
    use crate::resolver::{resolve, BuildEnv};
    use crate::rules::UnsupportedPolicy;
    use crate::theme::{BuildRequest, Mode, ThemeName};
    use crate::transform::testing::{CountingTransformer, StrictScript};
    use crate::transform::TransformerRegistry;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn config(root: &Path, mode: Mode, unsupported: UnsupportedPolicy) -> BuildConfiguration {
        let env = BuildEnv {
            use_cache: false,
            unsupported,
            current_year: 2025,
            ..BuildEnv::default()
        };
        resolve(root, &BuildRequest::new(ThemeName::default(), mode), &env).unwrap()
    }

    fn build(config: &BuildConfiguration, registry: &TransformerRegistry, cache: Option<&TransformCache>) -> Result<ModuleGraph, BuildError> {
        let shutdown = AtomicBool::new(false);
        let chain = ChainContext {
            registry,
            cache,
            root: &config.root,
        };
        let ctx = GraphContext::new(config, chain, &shutdown);
        ModuleGraph::build(&ctx)
    }

    fn sample_project() -> TempDir {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        write(root, "client/themes/default/index.js", "import './app.scss'\nrequire('@/helpers/compat')\nimport('./lazy')");
        write(root, "client/themes/default/app.scss", ".a { background: url(./logo.png) }");
        write(root, "client/themes/default/logo.png", "PNG");
        write(root, "client/themes/default/lazy.js", "module.exports = 1");
        write(root, "client/helpers/compat.js", "module.exports = {}");
        write(root, "client/scss/global.scss", "$x: 1;");
        temp
    }

    #[test]
    fn test_build_discovers_all_reachable_files() {
        let temp = sample_project();
        let root = temp.path();
        let config = config(root, Mode::Release, UnsupportedPolicy::Fail);
        let graph = build(&config, &TransformerRegistry::with_builtins(), None).unwrap();

        assert_eq!(graph.len(), 5);
        assert_eq!(graph.ready_count(), 5);
        let entry = graph.get(&config.entry).unwrap();
        assert_eq!(entry.rel, "client/themes/default/index.js");
        assert_eq!(entry.deps.len(), 3);

        let logo = graph.get(&root.join("client/themes/default/logo.png")).unwrap();
        assert_eq!(logo.payload().unwrap().kind, ContentKind::Url);
    }

    #[test]
    fn test_failed_module_does_not_stop_siblings() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        write(root, "client/themes/default/index.js", "require('./a'); require('./b'); require('./c')");
        write(root, "client/themes/default/a.js", "ok()");
        write(root, "client/themes/default/b.js", "SYNTAX ERROR");
        write(root, "client/themes/default/c.js", "ok()");

        let mut registry = TransformerRegistry::with_builtins();
        registry.register("script", Arc::new(StrictScript));
        let config = config(root, Mode::Release, UnsupportedPolicy::Fail);
        let graph = build(&config, &registry, None).unwrap();

        assert_eq!(graph.len(), 4);
        let diagnostics = graph.diagnostics();
        assert_eq!(diagnostics.len(), 1);
        assert!(matches!(&diagnostics[0], BuildError::Transform { path, .. } if path.ends_with("b.js")));
    }

    #[test]
    fn test_unresolved_import_aborts() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        write(root, "client/themes/default/index.js", "require('gql/queries/missing')");
        let config = config(root, Mode::Release, UnsupportedPolicy::Fail);

        let err = build(&config, &TransformerRegistry::with_builtins(), None).unwrap_err();
        assert!(matches!(err, BuildError::UnresolvedAlias { .. }));
    }

    #[test]
    fn test_unsupported_type_fails_or_skips() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        write(root, "client/themes/default/index.js", "require('./main.ts')");
        write(root, "client/themes/default/main.ts", "let x: number = 1");

        let strict = config(root, Mode::Release, UnsupportedPolicy::Fail);
        let err = build(&strict, &TransformerRegistry::with_builtins(), None).unwrap_err();
        assert!(matches!(err, BuildError::UnsupportedAssetType { ref extension, .. } if extension == "ts"));

        let lenient = config(root, Mode::Release, UnsupportedPolicy::Skip);
        let graph = build(&lenient, &TransformerRegistry::with_builtins(), None).unwrap();
        assert_eq!(graph.warnings().len(), 1);
        assert!(graph.diagnostics().is_empty());
    }

    #[test]
    fn test_passthrough_copies_unknown_files() {
        let payload = passthrough_payload(Path::new("/app/client/robots.txt"), b"User-agent: *".to_vec());
        assert_eq!(payload.kind, ContentKind::Url);
        assert_eq!(
            payload.text(),
            format!("[[theme-asset:files/robots.txt|{}]]", content_hash(b"User-agent: *"))
        );
        assert_eq!(payload.emitted[0].bytes, b"User-agent: *".to_vec());

        let script = passthrough_payload(Path::new("/app/node_modules/x/index.js"), b"x()".to_vec());
        assert_eq!(script.kind, ContentKind::Script);
    }

    #[test]
    fn test_update_reprocesses_only_changed_file() {
        let temp = sample_project();
        let root = temp.path();
        let config = config(root, Mode::Dev, UnsupportedPolicy::Fail);
        let css = CountingTransformer::new("css", None);
        let mut registry = TransformerRegistry::with_builtins();
        registry.register("postcss", css.clone());

        let shutdown = AtomicBool::new(false);
        let chain = ChainContext {
            registry: &registry,
            cache: None,
            root: &config.root,
        };
        let ctx = GraphContext::new(&config, chain, &shutdown);
        let mut graph = ModuleGraph::build(&ctx).unwrap();
        assert_eq!(css.calls(), 1);

        let scss = root.join("client/themes/default/app.scss");
        fs::write(&scss, ".a { color: red }").unwrap();
        let processed = graph.update(&ctx, &[scss.clone()]).unwrap();

        assert_eq!(processed, vec![scss]);
        assert_eq!(css.calls(), 2);
        // The image is no longer referenced
        assert!(!graph.contains(&root.join("client/themes/default/logo.png")));
    }

    #[test]
    fn test_update_ignores_unknown_files() {
        let temp = sample_project();
        let root = temp.path();
        let config = config(root, Mode::Dev, UnsupportedPolicy::Fail);
        let registry = TransformerRegistry::with_builtins();
        let shutdown = AtomicBool::new(false);
        let chain = ChainContext {
            registry: &registry,
            cache: None,
            root: &config.root,
        };
        let ctx = GraphContext::new(&config, chain, &shutdown);
        let mut graph = ModuleGraph::build(&ctx).unwrap();

        let processed = graph.update(&ctx, &[root.join("client/unrelated.js")]).unwrap();
        assert!(processed.is_empty());
    }

    #[test]
    fn test_failed_update_keeps_previous_graph() {
        let temp = sample_project();
        let root = temp.path();
        let config = config(root, Mode::Dev, UnsupportedPolicy::Fail);
        let registry = TransformerRegistry::with_builtins();
        let shutdown = AtomicBool::new(false);
        let chain = ChainContext {
            registry: &registry,
            cache: None,
            root: &config.root,
        };
        let ctx = GraphContext::new(&config, chain, &shutdown);
        let mut graph = ModuleGraph::build(&ctx).unwrap();
        let before: Vec<Module> = graph.modules().cloned().collect();

        let lazy = root.join("client/themes/default/lazy.js");
        let extra = root.join("client/themes/default/extra.js");
        write(root, "client/themes/default/lazy.js", "module.exports = require('./extra')");
        write(root, "client/themes/default/extra.js", "require('missing-pkg')");
        assert!(graph.update(&ctx, &[lazy.clone()]).is_err());

        let after: Vec<Module> = graph.modules().cloned().collect();
        assert_eq!(after, before);
        assert!(!graph.contains(&extra));

        write(root, "client/themes/default/extra.js", "module.exports = 2");
        let processed = graph.update(&ctx, &[lazy.clone()]).unwrap();
        assert_eq!(processed, vec![lazy, extra.clone()]);
        assert!(graph.contains(&extra));
    }

    #[test]
    fn test_fs_import_bundles_empty_module() {
        let temp = sample_project();
        let root = temp.path();
        write(root, "client/themes/default/lazy.js", "var fs = require('fs')\nmodule.exports = fs");
        write(root, "client/node_modules/dayjs/index.js", "module.exports = 'day'");
        write(root, "client/themes/default/index.js", "require('./lazy')\nrequire('dayjs')");
        let config = config(root, Mode::Dev, UnsupportedPolicy::Fail);
        let graph = build(&config, &TransformerRegistry::with_builtins(), None).unwrap();

        let resolver = ModuleResolver::new(&config.root, config.aliases.clone());
        let empty = graph.get(&resolver.empty_module()).unwrap();
        assert_eq!(empty.payload().unwrap().bytes, Vec::<u8>::new());
        assert!(graph.contains(&root.join("client/node_modules/dayjs/index.js")));
        assert!(graph.diagnostics().is_empty());
    }

    #[test]
    fn test_static_closure_orders_dependencies_first() {
        let temp = sample_project();
        let root = temp.path();
        let config = config(root, Mode::Release, UnsupportedPolicy::Fail);
        let graph = build(&config, &TransformerRegistry::with_builtins(), None).unwrap();

        let closure = graph.static_closure(&config.entry, &BTreeSet::new());
        let rels: Vec<String> = closure.iter().map(|p| config.relative(p)).collect();
        assert_eq!(
            rels,
            vec![
                "client/themes/default/app.scss".to_string(),
                "client/helpers/compat.js".to_string(),
                "client/themes/default/index.js".to_string(),
            ]
        );
    }

    #[test]
    fn test_cancelled_build() {
        let temp = sample_project();
        let config = config(temp.path(), Mode::Release, UnsupportedPolicy::Fail);
        let registry = TransformerRegistry::with_builtins();
        let shutdown = AtomicBool::new(true);
        let chain = ChainContext {
            registry: &registry,
            cache: None,
            root: &config.root,
        };
        let ctx = GraphContext::new(&config, chain, &shutdown);
        assert!(matches!(ModuleGraph::build(&ctx), Err(BuildError::Cancelled)));
    }
}
