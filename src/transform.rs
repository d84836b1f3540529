//! Transformer chain execution.
//!
//! A chain is the ordered list of [`TransformerRef`]s a rule declares.
//! Each stage receives the previous stage's [`Payload`] and returns a new
//! one. Cacheable stages consult the [`TransformCache`] first, keyed by
//! stage id, option fingerprint and input content.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::builtins;
use crate::cache::{base64_bytes, TransformCache};
use crate::error::BuildError;
use crate::rules::{extension_of, TransformerOptions, TransformerRef};

/// What a payload's bytes currently represent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentKind {
    /// Executable script module
    Script,
    /// CSS (or a stylesheet dialect before compilation)
    Stylesheet,
    /// Text that is bundled as a string export (templates, documents)
    Markup,
    /// JSON, bundled as a value export
    Data,
    /// Opaque bytes
    Binary,
    /// A URL string referencing an inlined or emitted asset
    Url,
}

impl ContentKind {
    /// Kind of a source file before any stage has run
    pub fn from_path(path: &Path) -> Self {
        match extension_of(path).as_deref() {
            Some("js") => ContentKind::Script,
            Some("json") => ContentKind::Data,
            Some("css" | "scss" | "sass") => ContentKind::Stylesheet,
            Some("vue" | "pug" | "graphql" | "gql") => ContentKind::Markup,
            _ => ContentKind::Binary,
        }
    }

    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Script => "script",
            ContentKind::Stylesheet => "stylesheet",
            ContentKind::Markup => "markup",
            ContentKind::Data => "data",
            ContentKind::Binary => "binary",
            ContentKind::Url => "url",
        }
    }

    /// Bundled into script chunks (as opposed to copied or extracted)
    #[inline]
    pub fn is_textual(&self) -> bool {
        !matches!(self, ContentKind::Binary)
    }
}

/// A file a stage wants written next to the bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmittedFile {
    /// Output-relative name before hashing (e.g. `svg/logo.svg`)
    pub declared_name: String,
    #[serde(with = "base64_bytes")]
    pub bytes: Vec<u8>,
}

/// Data flowing between stages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub kind: ContentKind,
    #[serde(with = "base64_bytes")]
    pub bytes: Vec<u8>,
    /// Files emitted by this or earlier stages
    #[serde(default)]
    pub emitted: Vec<EmittedFile>,
}

impl Payload {
    pub fn new(kind: ContentKind, bytes: Vec<u8>) -> Self {
        Self {
            kind,
            bytes,
            emitted: Vec::new(),
        }
    }

    /// Unmodified source file
    pub fn source(path: &Path, bytes: Vec<u8>) -> Self {
        Self::new(ContentKind::from_path(path), bytes)
    }

    /// Same emitted files, new content
    pub fn with_content(self, kind: ContentKind, bytes: Vec<u8>) -> Self {
        Self {
            kind,
            bytes,
            emitted: self.emitted,
        }
    }

    /// Lossy UTF-8 view of the content
    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }
}

/// Everything a stage may consult besides its input
#[derive(Debug, Clone, Copy)]
pub struct StageContext<'a> {
    /// Source file being transformed
    pub path: &'a Path,
    /// Project root
    pub root: &'a Path,
    /// Original source bytes, before the first stage
    pub source: &'a [u8],
    /// This stage's options
    pub options: &'a TransformerOptions,
}

impl StageContext<'_> {
    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(|v| v.as_str())
    }

    pub fn option_u64(&self, key: &str) -> Option<u64> {
        self.options.get(key).and_then(|v| v.as_u64())
    }
}

/// A stateless content transformation
///
/// Given identical input payload and options, a transformer must produce
/// identical output; the cache relies on it.
pub trait Transformer: Send + Sync {
    fn transform(&self, input: Payload, ctx: &StageContext<'_>) -> Result<Payload, String>;

    /// Identity of this implementation in cache keys.
    ///
    /// Transformers that can produce different output for the same input
    /// and options must report different fingerprints.
    fn fingerprint(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }

    /// Whether the output depends on the source path, not only the input
    fn depends_on_path(&self) -> bool {
        false
    }
}

/// Transformers addressable by id
#[derive(Clone, Default)]
pub struct TransformerRegistry {
    transformers: HashMap<String, Arc<dyn Transformer>>,
}

impl TransformerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in stage
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        builtins::register_builtins(&mut registry);
        registry
    }

    /// Register (or replace) the transformer for `id`
    pub fn register(&mut self, id: &str, transformer: Arc<dyn Transformer>) {
        self.transformers.insert(id.to_string(), transformer);
    }

    pub fn get(&self, id: &str) -> Option<&Arc<dyn Transformer>> {
        self.transformers.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.transformers.contains_key(id)
    }

    /// Registered ids, sorted
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.transformers.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

impl std::fmt::Debug for TransformerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformerRegistry")
            .field("ids", &self.ids())
            .finish()
    }
}

/// Shared, read-only state for running chains
#[derive(Clone, Copy)]
pub struct ChainContext<'a> {
    pub registry: &'a TransformerRegistry,
    pub cache: Option<&'a TransformCache>,
    pub root: &'a Path,
}

/// Run `chain` over `input`, strictly in order.
///
/// The first failing stage aborts the chain with
/// [`BuildError::Transform`]; the error only concerns this file.
pub fn run_chain(
    input: Vec<u8>,
    chain: &[TransformerRef],
    path: &Path,
    ctx: &ChainContext<'_>,
) -> Result<Payload, BuildError> {
    let mut payload = Payload::source(path, input.clone());

    for stage in chain {
        let transformer = ctx.registry.get(&stage.id).ok_or_else(|| BuildError::Transform {
            stage: stage.id.clone(),
            path: path.to_path_buf(),
            cause: "no transformer registered under this id".to_string(),
        })?;

        let cache_key = match ctx.cache {
            Some(cache) if stage.cacheable => {
                let path = transformer.depends_on_path().then_some(path);
                Some((cache, TransformCache::key(stage, &transformer.fingerprint(), path, &payload)))
            }
            _ => None,
        };

        if let Some((cache, key)) = &cache_key {
            if let Some(hit) = cache.lookup(key) {
                debug!(stage = %stage.id, path = %path.display(), "cache hit");
                payload = hit;
                continue;
            }
        }

        let stage_ctx = StageContext {
            path,
            root: ctx.root,
            source: &input,
            options: &stage.options,
        };
        payload = transformer
            .transform(payload, &stage_ctx)
            .map_err(|cause| BuildError::Transform {
                stage: stage.id.clone(),
                path: path.to_path_buf(),
                cause,
            })?;

        if let Some((cache, key)) = &cache_key {
            cache.store(key, &payload);
        }
    }

    Ok(payload)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Transformer that counts invocations and tags its output
    pub struct CountingTransformer {
        pub calls: AtomicUsize,
        pub tag: &'static str,
        pub output: Option<ContentKind>,
    }

    impl CountingTransformer {
        pub fn new(tag: &'static str, output: Option<ContentKind>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                tag,
                output,
            })
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Transformer for CountingTransformer {
        fn transform(&self, input: Payload, _ctx: &StageContext<'_>) -> Result<Payload, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut bytes = input.bytes.clone();
            bytes.extend_from_slice(format!("/*{}*/", self.tag).as_bytes());
            let kind = self.output.unwrap_or(input.kind);
            Ok(input.with_content(kind, bytes))
        }

        fn fingerprint(&self) -> String {
            format!("counting:{}", self.tag)
        }
    }

    /// Transformer that rejects sources containing `SYNTAX ERROR`
    pub struct StrictScript;

    impl Transformer for StrictScript {
        fn transform(&self, input: Payload, ctx: &StageContext<'_>) -> Result<Payload, String> {
            if input.text().contains("SYNTAX ERROR") {
                return Err(format!("unexpected token in {}", ctx.path.display()));
            }
            Ok(input)
        }
    }
}
