//! Rule matching: file path to transformer chain.
//!
//! Rules are an immutable ordered list. The first rule whose test accepts
//! a path and whose excludes all reject it wins; later rules are never
//! consulted. Paths no rule claims fall back to [`AssetPolicy`], which
//! decides between verbatim passthrough and an unsupported-type error.

use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Options passed to a single transformer stage
pub type TransformerOptions = BTreeMap<String, serde_json::Value>;

/// Reference to a transformer, plus the options it runs with
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransformerRef {
    pub id: String,
    pub options: TransformerOptions,
    /// Wrap this stage with the persistent content-keyed cache
    pub cacheable: bool,
}

impl TransformerRef {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            options: TransformerOptions::new(),
            cacheable: false,
        }
    }

    /// A stage whose output is cached by content
    pub fn cached(id: &str) -> Self {
        Self {
            cacheable: true,
            ..Self::new(id)
        }
    }

    pub fn with_option(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.options.insert(key.to_string(), value.into());
        self
    }

    /// Stable digest of `(id, options)`.
    ///
    /// Options live in a `BTreeMap`, so keys are visited in sorted order
    /// and each value is hashed in its compact JSON form.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.id.as_bytes());
        for (key, value) in &self.options {
            hasher.update(b"\0");
            hasher.update(key.as_bytes());
            hasher.update(b"=");
            hasher.update(value.to_string().as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }
}

/// Which paths a rule applies to
#[derive(Debug, Clone)]
pub enum PathTest {
    /// Lowercase file extensions, without the dot
    Extensions(BTreeSet<String>),
    /// Regex over the `/`-separated path
    Pattern(Regex),
}

impl PathTest {
    pub fn extensions(exts: &[&str]) -> Self {
        PathTest::Extensions(exts.iter().map(|e| e.to_ascii_lowercase()).collect())
    }

    pub fn accepts(&self, path: &Path) -> bool {
        match self {
            PathTest::Extensions(exts) => {
                extension_of(path).is_some_and(|ext| exts.contains(ext.as_str()))
            }
            PathTest::Pattern(re) => re.is_match(&normalized(path)),
        }
    }
}

/// Paths a rule refuses even though its test accepts them
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exclude {
    /// Anything at or below a directory
    UnderDir(PathBuf),
    /// Any path containing this substring
    Contains(String),
    /// Any path inside a dependency directory unless the path also names
    /// one of the allow-listed packages
    DependencyUnless { marker: String, allow: Vec<String> },
}

impl Exclude {
    pub fn excludes(&self, path: &Path) -> bool {
        match self {
            Exclude::UnderDir(dir) => path.starts_with(dir),
            Exclude::Contains(needle) => normalized(path).contains(needle.as_str()),
            Exclude::DependencyUnless { marker, allow } => {
                let path = normalized(path);
                path.contains(marker.as_str()) && !allow.iter().any(|a| path.contains(a.as_str()))
            }
        }
    }
}

/// Predicate plus the chain that handles matching files
#[derive(Debug, Clone)]
pub struct Rule {
    pub name: String,
    pub test: PathTest,
    pub exclude: Vec<Exclude>,
    pub chain: Vec<TransformerRef>,
}

impl Rule {
    pub fn new(name: &str, test: PathTest, chain: Vec<TransformerRef>) -> Self {
        Self {
            name: name.to_string(),
            test,
            exclude: Vec::new(),
            chain,
        }
    }

    pub fn excluding(mut self, exclude: Exclude) -> Self {
        self.exclude.push(exclude);
        self
    }

    pub fn matches(&self, path: &Path) -> bool {
        self.test.accepts(path) && !self.exclude.iter().any(|e| e.excludes(path))
    }
}

/// What to do with a file
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome<'a> {
    Chain(&'a Rule),
    /// Copy verbatim, no transformer involved
    Passthrough,
    /// Recognized extension nobody handles
    Unsupported(String),
}

impl PartialEq for Rule {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.chain == other.chain
    }
}

/// Extensions that must fail rather than pass through when unmatched
pub const UNSUPPORTED_EXTENSIONS: &[&str] = &[
    "ts", "tsx", "jsx", "mjs", "coffee", // scripts needing a compiler we do not run
    "less", "styl", "stylus", // stylesheet dialects
    "webp", "avif", "otf", // binary formats without an asset rule
    "html", "htm", // markup outside components
];

/// Explicit boundary between passthrough and unsupported
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetPolicy {
    unsupported: BTreeSet<String>,
}

impl AssetPolicy {
    pub fn new(unsupported: &[&str]) -> Self {
        Self {
            unsupported: unsupported.iter().map(|e| e.to_ascii_lowercase()).collect(),
        }
    }

    /// Decide for a path no rule matched
    pub fn classify_unmatched(&self, path: &Path) -> MatchOutcome<'static> {
        match extension_of(path) {
            Some(ext) if self.unsupported.contains(&ext) => MatchOutcome::Unsupported(ext),
            _ => MatchOutcome::Passthrough,
        }
    }
}

impl Default for AssetPolicy {
    fn default() -> Self {
        Self::new(UNSUPPORTED_EXTENSIONS)
    }
}

/// What to do with a file whose extension is unsupported
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnsupportedPolicy {
    /// Abort the build
    #[default]
    Fail,
    /// Leave the file out of the bundle with a warning
    Skip,
}

/// First rule matching `path`, in declaration order
pub fn match_rule<'a>(path: &Path, rules: &'a [Rule]) -> Option<&'a Rule> {
    rules.iter().find(|rule| rule.matches(path))
}

/// Match a path against the rules, falling back to the asset policy
pub fn match_path<'a>(path: &Path, rules: &'a [Rule], policy: &AssetPolicy) -> MatchOutcome<'a> {
    match match_rule(path, rules) {
        Some(rule) => MatchOutcome::Chain(rule),
        None => policy.classify_unmatched(path),
    }
}

/// Lowercase extension without the dot
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(OsStr::to_str)
        .map(str::to_ascii_lowercase)
}

/// Path as a `/`-separated string
pub fn normalized(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

impl fmt::Display for MatchOutcome<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchOutcome::Chain(rule) => write!(f, "rule '{}'", rule.name),
            MatchOutcome::Passthrough => f.write_str("passthrough"),
            MatchOutcome::Unsupported(ext) => write!(f, "unsupported .{}", ext),
        }
    }
}
