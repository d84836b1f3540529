//! Bundle assembly: chunk planning, module rendering and artifact naming.
//!
//! The entry and everything it imports statically form the `theme` chunk.
//! Each dynamic `import()` target not already in it starts an async chunk
//! holding its own static closure. Script chunks wrap every module in a
//! `__theme_define__` call; the entry chunk carries a small runtime that
//! defines modules lazily and loads async chunks on demand. Stylesheet
//! modules are concatenated per chunk into `theme.css` / `<chunk>.css`.
//!
//! Emitted assets are named first, so that stylesheet and script content
//! can embed their final URLs before being hashed themselves. Async chunks
//! are named before the entry chunk, whose chunk map lists their files.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::{Captures, Regex};
use tracing::{debug, warn};

use crate::error::BuildError;
use crate::graph::{Module, ModuleGraph, ModuleState};
use crate::modules::{cached_regex, dynamic_import_re, marker_re, require_re, static_import_re, DependencyKind};
use crate::naming::{
    content_hash, finalize, Artifact, ArtifactCategory, ArtifactRole, PendingArtifact, PRIMARY_SCRIPT,
    PRIMARY_STYLESHEET,
};
use crate::plugins::HookContext;
use crate::profile::ModeProfile;
use crate::transform::ContentKind;

/// Name of the chunk holding the entry module
pub const ENTRY_CHUNK: &str = "theme";

/// Length of RELEASE module ids
pub const SHORT_ID_LEN: usize = 8;

const CHUNK_MAP_PLACEHOLDER: &str = "[[theme-chunk-map]]";
const PUBLIC_PATH_PLACEHOLDER: &str = "[[theme-public-path]]";

const RUNTIME: &str = r#"(function (global) {
  var definitions = {};
  var cache = {};
  var pending = {};
  var chunkFiles = [[theme-chunk-map]];
  var publicPath = [[theme-public-path]];

  function require(id) {
    if (cache[id]) return cache[id].exports;
    var factory = definitions[id];
    if (!factory) throw new Error("Unknown module " + id);
    var module = (cache[id] = { exports: {} });
    factory.call(module.exports, module, module.exports, require);
    return module.exports;
  }

  function injectStyle(css) {
    var style = document.createElement("style");
    style.appendChild(document.createTextNode(css));
    document.head.appendChild(style);
  }

  function loadFile(file) {
    return new Promise(function (resolve, reject) {
      var el;
      if (/\.css$/.test(file)) {
        el = document.createElement("link");
        el.rel = "stylesheet";
        el.href = publicPath + file;
      } else {
        el = document.createElement("script");
        el.src = publicPath + file;
      }
      el.crossOrigin = "use-credentials";
      el.onload = resolve;
      el.onerror = function () {
        reject(new Error("Failed to load " + file));
      };
      document.head.appendChild(el);
    });
  }

  function load(id) {
    var files = chunkFiles[id];
    if (!files) {
      return Promise.resolve().then(function () {
        return require(id);
      });
    }
    if (!pending[id]) pending[id] = Promise.all(files.map(loadFile));
    return pending[id].then(function () {
      return require(id);
    });
  }

  global.__theme_define__ = function (id, factory) {
    if (!definitions[id]) definitions[id] = factory;
  };
  global.__theme_inject_style__ = injectStyle;
  global.__theme_import__ = load;
  global.__theme_require__ = require;
})(this);
"#;

fn asset_marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    cached_regex(&RE, r"\[\[theme-asset:([^\]|]+)\|([0-9a-f]+)\]\]")
}

/// A group of modules delivered as one script (and stylesheet) file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub name: String,
    /// Modules in definition order, dependencies first
    pub modules: Vec<PathBuf>,
    /// Modules whose dynamic import loads this chunk
    pub roots: Vec<PathBuf>,
    pub is_entry: bool,
}

impl Chunk {
    /// Take over `other`'s modules and roots
    pub fn absorb(&mut self, other: Chunk) {
        for module in other.modules {
            if !self.modules.contains(&module) {
                self.modules.push(module);
            }
        }
        for root in other.roots {
            if !self.roots.contains(&root) {
                self.roots.push(root);
            }
        }
    }
}

/// Everything a build produces, before it is written
#[derive(Debug, Clone, Default)]
pub struct Bundle {
    pub artifacts: Vec<Artifact>,
    pub chunks: Vec<Chunk>,
    /// Soft plugin failures and asset name conflicts
    pub warnings: Vec<String>,
}

/// Id under which a module is defined at runtime
pub fn module_id(rel: &str, profile: &ModeProfile) -> String {
    if profile.named_module_ids() {
        rel.to_string()
    } else {
        content_hash(rel.as_bytes())[..SHORT_ID_LEN].to_string()
    }
}

/// JavaScript string literal
fn js_string(s: &str) -> String {
    serde_json::Value::from(s).to_string()
}

/// Split the graph into the entry chunk and one chunk per dynamic import
pub fn plan_chunks(graph: &ModuleGraph) -> Vec<Chunk> {
    let entry = graph.entry().to_path_buf();
    let main_modules = graph.static_closure(&entry, &BTreeSet::new());
    let main_set: BTreeSet<PathBuf> = main_modules.iter().cloned().collect();

    let mut chunks = vec![Chunk {
        name: ENTRY_CHUNK.to_string(),
        modules: main_modules,
        roots: vec![entry.clone()],
        is_entry: true,
    }];
    let mut names: BTreeSet<String> = [ENTRY_CHUNK.to_string()].into_iter().collect();
    let mut seen_roots: BTreeSet<PathBuf> = [entry].into_iter().collect();
    let mut queue: VecDeque<usize> = VecDeque::from([0]);

    while let Some(idx) = queue.pop_front() {
        let members = chunks[idx].modules.clone();
        for path in &members {
            let Some(module) = graph.get(path) else {
                continue;
            };
            for dep in &module.deps {
                let DependencyKind::Dynamic { chunk_name } = &dep.dependency.kind else {
                    continue;
                };
                if main_set.contains(&dep.target) || !seen_roots.insert(dep.target.clone()) {
                    continue;
                }
                let name = unique_name(chunk_name.as_deref(), &dep.target, &mut names);
                debug!(chunk = %name, root = %dep.target.display(), "async chunk");
                chunks.push(Chunk {
                    name,
                    modules: graph.static_closure(&dep.target, &main_set),
                    roots: vec![dep.target.clone()],
                    is_entry: false,
                });
                queue.push_back(chunks.len() - 1);
            }
        }
    }
    chunks
}

fn unique_name(requested: Option<&str>, root: &Path, taken: &mut BTreeSet<String>) -> String {
    let base = requested
        .map(str::to_string)
        .or_else(|| root.file_stem().map(|s| s.to_string_lossy().to_string()))
        .unwrap_or_else(|| "chunk".to_string());
    let mut name = base.clone();
    let mut n = 2;
    while !taken.insert(name.clone()) {
        name = format!("{base}-{n}");
        n += 1;
    }
    name
}

/// Read-only state for rendering module code
struct Renderer<'a> {
    graph: &'a ModuleGraph,
    profile: &'a ModeProfile,
    public_path: &'a str,
    ids: BTreeMap<PathBuf, String>,
    /// Emitted file identity to final output-relative name
    asset_names: BTreeMap<AssetKey, String>,
}

impl Renderer<'_> {
    fn id(&self, path: &Path) -> String {
        self.ids.get(path).cloned().unwrap_or_default()
    }

    /// Resolve dependency and asset markers in `text`
    fn resolve_markers(&self, module: &Module, text: &str) -> String {
        let text = marker_re().replace_all(text, |caps: &Captures<'_>| {
            if &caps[1] == "import" {
                return String::new();
            }
            module
                .target_of(&caps[2], &DependencyKind::Url)
                .and_then(|target| self.graph.get(target))
                .and_then(Module::payload)
                .filter(|payload| payload.kind == ContentKind::Url)
                .map(|payload| payload.text().into_owned())
                .unwrap_or_default()
        });
        asset_marker_re()
            .replace_all(&text, |caps: &Captures<'_>| {
                let key = (caps[1].to_string(), caps[2].to_string());
                let name = self.asset_names.get(&key).map(String::as_str).unwrap_or(&caps[1]);
                format!("{}{name}", self.public_path)
            })
            .into_owned()
    }

    /// Point import specifiers at module ids
    fn link_script(&self, module: &Module, text: &str) -> String {
        let id_for = |spec: &str, kind: DependencyKind| module.target_of(spec, &kind).map(|target| self.id(target));

        let text = dynamic_import_re().replace_all(text, |caps: &Captures<'_>| {
            let kind = DependencyKind::Dynamic { chunk_name: None };
            match id_for(&caps[2], kind) {
                Some(id) => format!("__theme_import__({})", js_string(&id)),
                None => caps[0].to_string(),
            }
        });
        let text = require_re().replace_all(&text, |caps: &Captures<'_>| match id_for(&caps[1], DependencyKind::Static) {
            Some(id) => format!("require({})", js_string(&id)),
            None => caps[0].to_string(),
        });
        static_import_re()
            .replace_all(&text, |caps: &Captures<'_>| {
                let whole = &caps[0];
                let spec = &caps[1];
                match id_for(spec, DependencyKind::Static) {
                    // Everything up to the opening quote stays
                    Some(id) => format!("{}{}", &whole[..whole.len() - spec.len() - 2], js_string(&id)),
                    None => whole.to_string(),
                }
            })
            .into_owned()
    }

    fn module_body(&self, module: &Module) -> String {
        match &module.state {
            ModuleState::Failed { stage, cause } => {
                let message = format!("Module build failed ({stage}): {cause}");
                format!("throw new Error({});\n", js_string(&message))
            }
            ModuleState::Skipped { .. } => String::new(),
            ModuleState::Ready(payload) => match payload.kind {
                ContentKind::Script => {
                    let mut body = String::new();
                    for dep in &module.deps {
                        if dep.dependency.kind == DependencyKind::StyleImport {
                            body.push_str(&format!("require({});\n", js_string(&self.id(&dep.target))));
                        }
                    }
                    let linked = self.link_script(module, &payload.text());
                    body.push_str(&self.resolve_markers(module, &linked));
                    body
                }
                ContentKind::Markup => {
                    let text = self.resolve_markers(module, &payload.text());
                    format!("module.exports = {};\n", js_string(&text))
                }
                ContentKind::Data => format!("module.exports = {};\n", payload.text().trim()),
                ContentKind::Url => {
                    let url = self.resolve_markers(module, &payload.text());
                    format!("module.exports = {};\n", js_string(&url))
                }
                // Extracted into the chunk stylesheet
                ContentKind::Stylesheet | ContentKind::Binary => String::new(),
            },
        }
    }

    fn render_module(&self, module: &Module, out: &mut String) {
        if self.profile.path_comments() {
            out.push_str(&format!("/*! {} */\n", module.rel));
        }
        let mut body = self.module_body(module);
        if !body.is_empty() && !body.ends_with('\n') {
            body.push('\n');
        }
        out.push_str(&format!(
            "__theme_define__({}, function (module, exports, require) {{\n{body}}});\n",
            js_string(&self.id(&module.path))
        ));
    }

    fn render_script(&self, chunk: &Chunk) -> String {
        let mut out = String::new();
        if chunk.is_entry {
            out.push_str(&RUNTIME.replacen(PUBLIC_PATH_PLACEHOLDER, &js_string(self.public_path), 1));
        }
        for path in &chunk.modules {
            if let Some(module) = self.graph.get(path) {
                self.render_module(module, &mut out);
            }
        }
        if chunk.is_entry {
            out.push_str(&format!("__theme_require__({});\n", js_string(&self.id(self.graph.entry()))));
        }
        out
    }

    /// Concatenated stylesheet modules of `chunk`, if it has any
    fn render_stylesheet(&self, chunk: &Chunk) -> Option<String> {
        let mut out = String::new();
        let mut any = false;
        for path in &chunk.modules {
            let Some(module) = self.graph.get(path) else {
                continue;
            };
            let Some(payload) = module.payload().filter(|p| p.kind == ContentKind::Stylesheet) else {
                continue;
            };
            any = true;
            if self.profile.path_comments() {
                out.push_str(&format!("/* {} */\n", module.rel));
            }
            out.push_str(self.resolve_markers(module, &payload.text()).trim_end());
            out.push('\n');
        }
        any.then_some(out)
    }
}

/// Emitted file identity: declared name plus content hash
type AssetKey = (String, String);

/// Files emitted by every ready module.
///
/// Identical files are written once. When content hashes are in use,
/// different files declared under one name each get their own artifact;
/// otherwise the first one wins and the others are reported. Returns the
/// pending artifacts and, for every key seen, the index of its artifact.
fn collect_emitted(
    graph: &ModuleGraph,
    profile: &ModeProfile,
    warnings: &mut Vec<String>,
) -> (Vec<PendingArtifact>, BTreeMap<AssetKey, usize>) {
    let mut pending: Vec<PendingArtifact> = Vec::new();
    let mut by_key: BTreeMap<AssetKey, usize> = BTreeMap::new();
    let mut by_name: BTreeMap<String, usize> = BTreeMap::new();

    for module in graph.modules() {
        let Some(payload) = module.payload() else {
            continue;
        };
        for file in &payload.emitted {
            let key = (file.declared_name.clone(), content_hash(&file.bytes));
            if by_key.contains_key(&key) {
                continue;
            }
            if !profile.uses_content_hash() {
                if let Some(&first) = by_name.get(&file.declared_name) {
                    warn!(name = %file.declared_name, module = %module.rel, "conflicting emitted asset, keeping the first");
                    warnings.push(format!("{}: conflicting asset '{}' ignored", module.rel, file.declared_name));
                    by_key.insert(key, first);
                    continue;
                }
            }
            by_name.entry(file.declared_name.clone()).or_insert(pending.len());
            by_key.insert(key, pending.len());
            pending.push(PendingArtifact::new(
                file.declared_name.clone(),
                ArtifactCategory::Asset,
                ArtifactRole::Asset,
                file.bytes.clone(),
            ));
        }
    }
    (pending, by_key)
}

/// Plan chunks, render every output file and name it.
///
/// Runs the `optimize_chunks` hook once and `optimize_assets` once per
/// artifact category.
pub fn assemble(graph: &ModuleGraph, ctx: &HookContext<'_>) -> Result<Bundle, BuildError> {
    let config = ctx.config;
    let profile = &config.profile;
    let output_dir = &config.output_dir;
    let plugins = &config.plugins;
    let mut warnings = Vec::new();

    let mut chunks = plan_chunks(graph);
    warnings.extend(plugins.optimize_chunks(&mut chunks, ctx)?);

    // Assets
    let (mut assets, asset_keys) = collect_emitted(graph, profile, &mut warnings);
    warnings.extend(plugins.optimize_assets(ArtifactCategory::Asset, &mut assets, ctx)?);
    let assets: Vec<Artifact> = assets.into_iter().map(|p| finalize(p, output_dir, profile)).collect();

    let renderer = Renderer {
        graph,
        profile,
        public_path: &config.public_path,
        ids: graph
            .modules()
            .map(|m| (m.path.clone(), module_id(&m.rel, profile)))
            .collect(),
        asset_names: asset_keys
            .into_iter()
            .filter_map(|(key, index)| assets.get(index).map(|a| (key, a.logical_name.clone())))
            .collect(),
    };

    // Stylesheets, in chunk order
    let mut style_chunks = Vec::new();
    let mut pending_styles = Vec::new();
    for chunk in &chunks {
        let Some(css) = renderer.render_stylesheet(chunk) else {
            continue;
        };
        let (declared, role) = if chunk.is_entry {
            (PRIMARY_STYLESHEET.to_string(), ArtifactRole::Primary)
        } else {
            (format!("{}.css", chunk.name), ArtifactRole::Chunk)
        };
        style_chunks.push(chunk.name.clone());
        pending_styles.push(PendingArtifact::new(declared, ArtifactCategory::Stylesheet, role, css.into_bytes()));
    }
    warnings.extend(plugins.optimize_assets(ArtifactCategory::Stylesheet, &mut pending_styles, ctx)?);
    let styles: Vec<(String, Artifact)> = style_chunks
        .into_iter()
        .zip(pending_styles)
        .map(|(chunk_name, p)| (chunk_name, finalize(p, output_dir, profile)))
        .collect();

    // Scripts: async chunks first, the entry chunk lists their files
    let mut scripts: Vec<PendingArtifact> = chunks
        .iter()
        .map(|chunk| {
            let (declared, role) = if chunk.is_entry {
                (PRIMARY_SCRIPT.to_string(), ArtifactRole::Primary)
            } else {
                (format!("{}.js", chunk.name), ArtifactRole::Chunk)
            };
            PendingArtifact::new(declared, ArtifactCategory::Script, role, renderer.render_script(chunk).into_bytes())
        })
        .collect();
    warnings.extend(plugins.optimize_assets(ArtifactCategory::Script, &mut scripts, ctx)?);

    let mut chunk_map = serde_json::Map::new();
    let mut artifacts = Vec::with_capacity(scripts.len() + styles.len() + assets.len());
    let mut entry_script = None;
    for (chunk, pending) in chunks.iter().zip(scripts) {
        if chunk.is_entry {
            entry_script = Some(pending);
            continue;
        }
        let artifact = finalize(pending, output_dir, profile);
        let mut files = vec![serde_json::Value::from(artifact.logical_name.as_str())];
        if let Some((_, css)) = styles.iter().find(|(name, _)| *name == chunk.name) {
            files.push(serde_json::Value::from(css.logical_name.as_str()));
        }
        for root in &chunk.roots {
            chunk_map.insert(renderer.id(root), serde_json::Value::Array(files.clone()));
        }
        artifacts.push(artifact);
    }
    if let Some(mut pending) = entry_script {
        let map = serde_json::Value::Object(chunk_map).to_string();
        let text = String::from_utf8_lossy(&pending.bytes).replacen(CHUNK_MAP_PLACEHOLDER, &map, 1);
        pending.bytes = text.into_bytes();
        artifacts.insert(0, finalize(pending, output_dir, profile));
    }
    artifacts.extend(styles.into_iter().map(|(_, artifact)| artifact));
    artifacts.extend(assets);

    debug!(chunks = chunks.len(), artifacts = artifacts.len(), "bundle assembled");
    Ok(Bundle {
        artifacts,
        chunks,
        warnings,
    })
}
