//! Module dependencies: scanning transformed output for imports and
//! resolving import specifiers to files.
//!
//! Scripts are scanned for `require()`, `import ... from`, bare `import`
//! and dynamic `import()` calls. Stylesheets do not carry raw `@import` or
//! `url()` references by the time they leave their chain: the `css` stage
//! rewrites them into reference markers, which survive style injection
//! into script strings and are scanned here regardless of content kind.

use std::ffi::OsStr;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;

use crate::error::BuildError;
use crate::naming::content_hash;
use crate::theme::RESOLVE_EXTENSIONS;
use crate::transform::{ContentKind, Payload};

/// Package manifest fields consulted when resolving a package directory
pub const MAIN_FIELDS: &[&str] = &["browser", "main", "module"];

/// Node built-ins bundled as an empty module
pub const EMPTY_BUILTINS: &[&str] = &["fs"];

/// Root-relative name of the empty module
pub const EMPTY_MODULE_NAME: &str = "(empty)";

/// Extensions probed for stylesheet `@import`s, which may also name
/// `_partial` files
pub const STYLE_EXTENSIONS: &[&str] = &["css", "scss", "sass"];

/// Marker left by the `css` stage for an `@import`
pub fn import_marker(specifier: &str) -> String {
    format!("[[theme-import:{specifier}]]")
}

/// Marker left by the `css` stage for a `url()` reference
pub fn url_marker(specifier: &str) -> String {
    format!("[[theme-url:{specifier}]]")
}

/// Marker for an emitted asset whose final name is not known yet.
///
/// Carries the content hash so that different files declared under the
/// same name stay distinguishable.
pub fn asset_marker(declared_name: &str, bytes: &[u8]) -> String {
    format!("[[theme-asset:{declared_name}|{}]]", content_hash(bytes))
}

/// Compile a fixed pattern once
pub(crate) fn cached_regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    #[allow(clippy::expect_used)]
    cell.get_or_init(|| Regex::new(pattern).expect("static regex pattern is valid"))
}

pub(crate) fn require_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    cached_regex(&RE, r#"\brequire\s*\(\s*['"]([^'"]+)['"]\s*\)"#)
}

pub(crate) fn dynamic_import_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    cached_regex(
        &RE,
        r#"\bimport\s*\(\s*(?:/\*\s*webpackChunkName:\s*['"]([^'"]+)['"]\s*\*/\s*)?['"]([^'"]+)['"]\s*\)"#,
    )
}

pub(crate) fn static_import_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    cached_regex(
        &RE,
        r#"\b(?:import|export)\s+(?:[\w*{}\s,$]+?\s+from\s+)?['"]([^'"]+)['"]"#,
    )
}

pub(crate) fn marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    cached_regex(&RE, r"\[\[theme-(import|url):([^\]]+)\]\]")
}

/// How a module refers to another
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DependencyKind {
    /// `require()` / `import ... from`: bundled into the same chunk
    Static,
    /// `import()`: loaded on demand, possibly from its own chunk
    Dynamic { chunk_name: Option<String> },
    /// Stylesheet `@import`
    StyleImport,
    /// Stylesheet `url()`
    Url,
}

impl DependencyKind {
    /// Target must land in the importer's chunk
    #[inline]
    pub fn is_static(&self) -> bool {
        !matches!(self, DependencyKind::Dynamic { .. })
    }
}

/// Unresolved reference found in a module
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Dependency {
    pub specifier: String,
    pub kind: DependencyKind,
}

/// All references in a transformed payload, in source order, deduplicated
pub fn scan_dependencies(payload: &Payload) -> Vec<Dependency> {
    if !payload.kind.is_textual() {
        return Vec::new();
    }

    let text = payload.text();
    let mut found: Vec<(usize, Dependency)> = Vec::new();

    for caps in marker_re().captures_iter(&text) {
        let (Some(whole), Some(kind), Some(spec)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let kind = if kind.as_str() == "import" {
            DependencyKind::StyleImport
        } else {
            DependencyKind::Url
        };
        found.push((whole.start(), Dependency { specifier: spec.as_str().to_string(), kind }));
    }

    if payload.kind == ContentKind::Script {
        for caps in dynamic_import_re().captures_iter(&text) {
            let (Some(whole), Some(spec)) = (caps.get(0), caps.get(2)) else {
                continue;
            };
            let chunk_name = caps.get(1).map(|m| m.as_str().to_string());
            found.push((
                whole.start(),
                Dependency {
                    specifier: spec.as_str().to_string(),
                    kind: DependencyKind::Dynamic { chunk_name },
                },
            ));
        }
        for re in [require_re(), static_import_re()] {
            for caps in re.captures_iter(&text) {
                let (Some(whole), Some(spec)) = (caps.get(0), caps.get(1)) else {
                    continue;
                };
                found.push((
                    whole.start(),
                    Dependency {
                        specifier: spec.as_str().to_string(),
                        kind: DependencyKind::Static,
                    },
                ));
            }
        }
    }

    found.sort_by_key(|(pos, _)| *pos);
    let mut deps: Vec<Dependency> = Vec::with_capacity(found.len());
    for (_, dep) in found {
        if !deps.contains(&dep) {
            deps.push(dep);
        }
    }
    deps
}

/// Where an alias points
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AliasTarget {
    /// Absolute filesystem path
    Path(PathBuf),
    /// Another module specifier, resolved like a bare import
    Module(String),
}

/// Specifier rewrite applied before resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alias {
    pub key: String,
    pub target: AliasTarget,
    /// Only the specifier equal to `key` is rewritten, never `key/...`
    pub exact: bool,
}

impl Alias {
    pub fn path(key: &str, target: impl Into<PathBuf>) -> Self {
        Self {
            key: key.to_string(),
            target: AliasTarget::Path(target.into()),
            exact: false,
        }
    }

    pub fn exact_module(key: &str, target: &str) -> Self {
        Self {
            key: key.to_string(),
            target: AliasTarget::Module(target.to_string()),
            exact: true,
        }
    }

    /// Remainder of `specifier` after this alias, if it applies
    fn strip<'a>(&self, specifier: &'a str) -> Option<&'a str> {
        if specifier == self.key {
            return Some("");
        }
        if self.exact {
            return None;
        }
        specifier
            .strip_prefix(self.key.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
    }
}

#[derive(Debug, Deserialize)]
struct PackageManifest {
    #[serde(flatten)]
    fields: serde_json::Map<String, serde_json::Value>,
}

/// Resolves import specifiers to source files
#[derive(Debug, Clone)]
pub struct ModuleResolver {
    root: PathBuf,
    aliases: Vec<Alias>,
}

impl ModuleResolver {
    pub fn new(root: impl Into<PathBuf>, aliases: Vec<Alias>) -> Self {
        Self {
            root: root.into(),
            aliases,
        }
    }

    pub fn aliases(&self) -> &[Alias] {
        &self.aliases
    }

    /// Resolve `specifier` as imported from `importer`.
    ///
    /// Query strings and fragments (`font.woff?v=1.2.3#iefix`) are dropped
    /// before resolution.
    pub fn resolve(&self, specifier: &str, importer: &Path) -> Result<PathBuf, BuildError> {
        self.resolve_with(specifier, importer, RESOLVE_EXTENSIONS)
    }

    /// Resolve a stylesheet `@import`, probing stylesheet extensions and
    /// `_partial` names before the script extensions
    pub fn resolve_style(&self, specifier: &str, importer: &Path) -> Result<PathBuf, BuildError> {
        self.resolve_with(specifier, importer, STYLE_EXTENSIONS)
            .or_else(|_| self.resolve(specifier, importer))
    }

    /// Resolve according to how `importer` refers to the target
    pub fn resolve_dependency(&self, dep: &Dependency, importer: &Path) -> Result<PathBuf, BuildError> {
        match dep.kind {
            DependencyKind::StyleImport => self.resolve_style(&dep.specifier, importer),
            _ => self.resolve(&dep.specifier, importer),
        }
    }

    fn resolve_with(
        &self,
        specifier: &str,
        importer: &Path,
        extensions: &[&str],
    ) -> Result<PathBuf, BuildError> {
        let unresolved = || BuildError::UnresolvedAlias {
            specifier: specifier.to_string(),
            importer: importer.to_path_buf(),
        };

        let bare = specifier
            .split(['?', '#'])
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(unresolved)?;

        let request = self.apply_alias(bare);
        let found = match &request {
            AliasTarget::Path(path) => self.find_file(&normalize_path(path), false, extensions),
            AliasTarget::Module(spec) if EMPTY_BUILTINS.contains(&spec.as_str()) => Some(self.empty_module()),
            AliasTarget::Module(spec) if spec.starts_with("./") || spec.starts_with("../") => {
                let dir = importer.parent().unwrap_or(Path::new(""));
                self.find_file(&normalize_path(&dir.join(spec)), false, extensions)
            }
            AliasTarget::Module(spec) if Path::new(spec).is_absolute() => {
                self.find_file(&normalize_path(Path::new(spec)), false, extensions)
            }
            AliasTarget::Module(spec) => self.resolve_package(spec, importer, extensions),
        };

        found.ok_or_else(unresolved)
    }

    /// Stand-in module for built-ins with no browser implementation
    pub fn empty_module(&self) -> PathBuf {
        self.root.join(EMPTY_MODULE_NAME)
    }

    pub fn is_empty_module(&self, path: &Path) -> bool {
        path == self.empty_module()
    }

    /// Look for `spec` in the `node_modules` directory next to the
    /// importer, then in each parent directory up to the project root
    fn resolve_package(&self, spec: &str, importer: &Path, extensions: &[&str]) -> Option<PathBuf> {
        let start = importer
            .parent()
            .filter(|dir| dir.starts_with(&self.root))
            .unwrap_or(self.root.as_path());
        start
            .ancestors()
            .take_while(|dir| dir.starts_with(&self.root))
            .filter(|dir| dir.file_name() != Some(OsStr::new("node_modules")))
            .find_map(|dir| self.find_file(&normalize_path(&dir.join("node_modules").join(spec)), true, extensions))
    }

    fn apply_alias(&self, specifier: &str) -> AliasTarget {
        for alias in &self.aliases {
            let Some(rest) = alias.strip(specifier) else {
                continue;
            };
            return match &alias.target {
                AliasTarget::Path(base) if rest.is_empty() => AliasTarget::Path(base.clone()),
                AliasTarget::Path(base) => AliasTarget::Path(base.join(rest)),
                AliasTarget::Module(module) if rest.is_empty() => {
                    AliasTarget::Module(module.clone())
                }
                AliasTarget::Module(module) => AliasTarget::Module(format!("{module}/{rest}")),
            };
        }
        AliasTarget::Module(specifier.to_string())
    }

    /// Exact file, then with each resolve extension, then as a directory
    fn find_file(&self, candidate: &Path, is_package: bool, extensions: &[&str]) -> Option<PathBuf> {
        if candidate.is_file() {
            return Some(candidate.to_path_buf());
        }

        if let Some(found) = probe_extensions(candidate, extensions) {
            return Some(found);
        }

        if extensions == STYLE_EXTENSIONS {
            if let Some(name) = candidate.file_name() {
                let partial = candidate.with_file_name(format!("_{}", name.to_string_lossy()));
                if partial.is_file() {
                    return Some(partial);
                }
                if let Some(found) = probe_extensions(&partial, extensions) {
                    return Some(found);
                }
            }
        }

        if candidate.is_dir() {
            if is_package {
                if let Some(main) = read_package_main(candidate) {
                    let main_path = normalize_path(&candidate.join(main));
                    if main_path.is_file() {
                        return Some(main_path);
                    }
                    if let Some(found) = probe_extensions(&main_path, extensions) {
                        return Some(found);
                    }
                }
            }
            return probe_extensions(&candidate.join("index"), extensions);
        }

        None
    }
}

fn probe_extensions(base: &Path, extensions: &[&str]) -> Option<PathBuf> {
    let name = base.file_name()?.to_string_lossy().to_string();
    extensions
        .iter()
        .map(|ext| base.with_file_name(format!("{name}.{ext}")))
        .find(|candidate| candidate.is_file())
}

/// First string-valued main field of `dir/package.json`
fn read_package_main(dir: &Path) -> Option<String> {
    let content = fs::read_to_string(dir.join("package.json")).ok()?;
    let manifest: PackageManifest = serde_json::from_str(&content).ok()?;
    MAIN_FIELDS
        .iter()
        .find_map(|field| manifest.fields.get(*field).and_then(|v| v.as_str()))
        .map(str::to_string)
}

/// Lexically remove `.` and `..` components
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
