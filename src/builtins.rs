//! Built-in transformer stages.
//!
//! The language compilers (`script`, `sass`, `vue`, `pug`, `postcss`) are
//! placeholders that only fix up the payload kind; hosts bind them to real
//! compilers with [`TransformerRegistry::bind_command`]. The remaining
//! stages implement pipeline plumbing: dependency markers, resource
//! injection, style injection/extraction, asset inlining and query
//! documents.

use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::{Arc, OnceLock};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use regex::{Captures, Regex};
use sha2::{Digest, Sha256};

use crate::modules::{asset_marker, cached_regex, import_marker, url_marker};
use crate::rules::extension_of;
use crate::transform::{ContentKind, EmittedFile, Payload, StageContext, Transformer, TransformerRegistry};

/// Register every built-in stage under its id
pub fn register_builtins(registry: &mut TransformerRegistry) {
    for id in ["script", "sass", "vue", "pug", "postcss"] {
        registry.register(id, Arc::new(Passthrough::new(default_output_kind(id))));
    }
    registry.register("css", Arc::new(CssReferences));
    registry.register("sass-resources", Arc::new(SassResources));
    registry.register("style-inject", Arc::new(StyleInject));
    registry.register("style-extract", Arc::new(StyleExtract));
    registry.register("asset", Arc::new(AssetStage));
    registry.register("graphql", Arc::new(GraphqlDocument));
    registry.register("persisted-query", Arc::new(PersistedQuery));
    registry.register("command", Arc::new(CommandStage));
}

/// Kind produced by a compiler stage
pub fn default_output_kind(id: &str) -> Option<ContentKind> {
    match id {
        "script" | "vue" => Some(ContentKind::Script),
        "sass" => Some(ContentKind::Stylesheet),
        "pug" => Some(ContentKind::Markup),
        _ => None,
    }
}

impl TransformerRegistry {
    /// Replace the stage `id` with an external command.
    ///
    /// `command_line` is split on whitespace; `{path}` in an argument is
    /// replaced with the source file path.
    pub fn bind_command(&mut self, id: &str, command_line: &str) -> Result<(), String> {
        let mut words = command_line.split_whitespace().map(str::to_string);
        let program = words
            .next()
            .ok_or_else(|| format!("empty command line for transformer '{id}'"))?;
        let transformer = ExternalCommand {
            program,
            args: words.collect(),
            output: default_output_kind(id),
        };
        self.register(id, Arc::new(transformer));
        Ok(())
    }
}

/// Forwards content, optionally relabelling its kind
#[derive(Debug, Clone, Copy)]
pub struct Passthrough {
    output: Option<ContentKind>,
}

impl Passthrough {
    pub fn new(output: Option<ContentKind>) -> Self {
        Self { output }
    }
}

impl Transformer for Passthrough {
    fn transform(&self, input: Payload, _ctx: &StageContext<'_>) -> Result<Payload, String> {
        Ok(Payload {
            kind: self.output.unwrap_or(input.kind),
            ..input
        })
    }

    fn fingerprint(&self) -> String {
        format!("passthrough:{}", self.output.map_or("same", |kind| kind.as_str()))
    }
}

fn css_import_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    cached_regex(
        &RE,
        r#"@import\s+(?:url\(\s*)?['"]?([^'"\s;)]+)['"]?\s*\)?\s*;"#,
    )
}

fn css_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    cached_regex(&RE, r#"url\(\s*(['"]?)([^'")]+?)(['"]?)\s*\)"#)
}

/// Whether a stylesheet reference points outside the module graph
fn is_external_reference(spec: &str) -> bool {
    spec.starts_with("data:")
        || spec.starts_with("http:")
        || spec.starts_with("https:")
        || spec.starts_with("//")
        || spec.starts_with('#')
        || spec.starts_with('/')
        || spec.starts_with("[[theme-")
}

/// Stylesheet import specifiers may use `~` for package imports
fn strip_tilde(spec: &str) -> &str {
    spec.strip_prefix('~').unwrap_or(spec)
}

/// Rewrites `@import` and `url()` into dependency markers
#[derive(Debug, Clone, Copy)]
pub struct CssReferences;

impl Transformer for CssReferences {
    fn transform(&self, input: Payload, _ctx: &StageContext<'_>) -> Result<Payload, String> {
        let text = input.text().into_owned();

        let text = css_import_re().replace_all(&text, |caps: &Captures<'_>| {
            let spec = &caps[1];
            if is_external_reference(spec) {
                caps[0].to_string()
            } else {
                import_marker(strip_tilde(spec))
            }
        });

        let text = css_url_re().replace_all(&text, |caps: &Captures<'_>| {
            let spec = caps[2].trim();
            if is_external_reference(spec) {
                caps[0].to_string()
            } else {
                format!("url(\"{}\")", url_marker(strip_tilde(spec)))
            }
        });

        let bytes = text.into_owned().into_bytes();
        Ok(input.with_content(ContentKind::Stylesheet, bytes))
    }
}

/// Prepends shared stylesheet resources (variables, mixins) to every unit.
///
/// Option `resources`: list of root-relative paths.
#[derive(Debug, Clone, Copy)]
pub struct SassResources;

impl Transformer for SassResources {
    fn transform(&self, input: Payload, ctx: &StageContext<'_>) -> Result<Payload, String> {
        let resources: Vec<&str> = ctx
            .options
            .get("resources")
            .and_then(|v| v.as_array())
            .map(|list| list.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default();

        let mut bytes = Vec::new();
        for resource in resources {
            let path = ctx.root.join(resource);
            // A resource never prepends itself
            if path == ctx.path {
                continue;
            }
            let content = std::fs::read(&path)
                .map_err(|e| format!("cannot read resource {}: {e}", path.display()))?;
            bytes.extend_from_slice(&content);
            bytes.push(b'\n');
        }
        bytes.extend_from_slice(&input.bytes);
        Ok(input.with_content(ContentKind::Stylesheet, bytes))
    }

    fn depends_on_path(&self) -> bool {
        true
    }
}

/// Turns a stylesheet into a script that injects it at runtime
#[derive(Debug, Clone, Copy)]
pub struct StyleInject;

impl Transformer for StyleInject {
    fn transform(&self, input: Payload, _ctx: &StageContext<'_>) -> Result<Payload, String> {
        if input.kind != ContentKind::Stylesheet {
            return Err(format!("expected a stylesheet, got {}", input.kind.as_str()));
        }
        let css = serde_json::to_string(&input.text()).map_err(|e| e.to_string())?;
        let script = format!("__theme_inject_style__({css});\n");
        Ok(input.with_content(ContentKind::Script, script.into_bytes()))
    }
}

/// Marks a stylesheet for extraction into the theme stylesheet
#[derive(Debug, Clone, Copy)]
pub struct StyleExtract;

impl Transformer for StyleExtract {
    fn transform(&self, input: Payload, _ctx: &StageContext<'_>) -> Result<Payload, String> {
        if input.kind != ContentKind::Stylesheet {
            return Err(format!("expected a stylesheet, got {}", input.kind.as_str()));
        }
        Ok(input)
    }
}

/// MIME type used for inlined assets
pub fn mime_for(path: &Path) -> &'static str {
    match extension_of(path).as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        Some("ttf") => "font/ttf",
        Some("eot") => "application/vnd.ms-fontobject",
        _ => "application/octet-stream",
    }
}

/// Inlines small binaries as `data:` URIs, emits larger ones.
///
/// Options: `limit` (bytes, inclusive; absent means always emit),
/// `output_path` (sub-directory such as `svg/`), `name` (template with
/// `[name]` and `[ext]`, default `[name].[ext]`).
#[derive(Debug, Clone, Copy)]
pub struct AssetStage;

impl Transformer for AssetStage {
    fn transform(&self, input: Payload, ctx: &StageContext<'_>) -> Result<Payload, String> {
        let inline = ctx
            .option_u64("limit")
            .is_some_and(|limit| input.bytes.len() as u64 <= limit);

        if inline {
            let uri = format!("data:{};base64,{}", mime_for(ctx.path), STANDARD.encode(&input.bytes));
            return Ok(input.with_content(ContentKind::Url, uri.into_bytes()));
        }

        let declared_name = declared_asset_name(ctx.path, ctx.option_str("output_path"), ctx.option_str("name"));
        let mut payload = Payload::new(ContentKind::Url, asset_marker(&declared_name, &input.bytes).into_bytes());
        payload.emitted = input.emitted;
        payload.emitted.push(EmittedFile {
            declared_name,
            bytes: input.bytes,
        });
        Ok(payload)
    }

    fn depends_on_path(&self) -> bool {
        true
    }
}

/// Output-relative name of an emitted file
pub fn declared_asset_name(path: &Path, output_path: Option<&str>, template: Option<&str>) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let ext = extension_of(path).unwrap_or_default();
    let file = template
        .unwrap_or("[name].[ext]")
        .replace("[name]", &stem)
        .replace("[ext]", &ext);
    let dir = output_path.unwrap_or("").trim_matches('/');
    if dir.is_empty() {
        file
    } else {
        format!("{dir}/{file}")
    }
}

fn graphql_import_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    cached_regex(&RE, r#"(?m)^\s*#import\s+['"]([^'"]+)['"]"#)
}

fn graphql_definition_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    cached_regex(&RE, r"\b(query|mutation|subscription|fragment)\s+([_A-Za-z][_0-9A-Za-z]*)")
}

/// Compiles a query document into a script module exporting it
#[derive(Debug, Clone, Copy)]
pub struct GraphqlDocument;

impl Transformer for GraphqlDocument {
    fn transform(&self, input: Payload, _ctx: &StageContext<'_>) -> Result<Payload, String> {
        let text = input.text().into_owned();
        let source: String = graphql_import_re().replace_all(&text, "").trim().to_string();

        let definitions: Vec<serde_json::Value> = graphql_definition_re()
            .captures_iter(&source)
            .map(|caps| serde_json::json!({ "operation": &caps[1], "name": &caps[2] }))
            .collect();
        let document = serde_json::json!({
            "kind": "Document",
            "definitions": definitions,
            "source": source,
        });

        let mut script = format!("var doc = {document};\n");
        let imports: Vec<String> = graphql_import_re()
            .captures_iter(&text)
            .map(|caps| format!("require({})", serde_json::Value::from(&caps[1])))
            .collect();
        if !imports.is_empty() {
            script.push_str(&format!("doc.imports = [{}];\n", imports.join(", ")));
        }
        script.push_str("module.exports = doc;\n");

        Ok(input.with_content(ContentKind::Script, script.into_bytes()))
    }
}

/// Attaches a deterministic document id for persisted queries
#[derive(Debug, Clone, Copy)]
pub struct PersistedQuery;

impl Transformer for PersistedQuery {
    fn transform(&self, input: Payload, ctx: &StageContext<'_>) -> Result<Payload, String> {
        if input.kind != ContentKind::Script {
            return Err("persisted-query must follow the graphql stage".to_string());
        }
        let id = format!("{:x}", Sha256::digest(ctx.source));
        let mut bytes = input.bytes.clone();
        bytes.extend_from_slice(format!("module.exports.documentId = \"{id}\";\n").as_bytes());
        Ok(input.with_content(ContentKind::Script, bytes))
    }
}

/// Stage that runs the program named in its options.
///
/// Options: `program`, `args` (list), `output` (payload kind name).
#[derive(Debug, Clone, Copy)]
pub struct CommandStage;

impl Transformer for CommandStage {
    fn transform(&self, input: Payload, ctx: &StageContext<'_>) -> Result<Payload, String> {
        let program = ctx
            .option_str("program")
            .ok_or("command stage needs a 'program' option")?;
        let args = ctx
            .options
            .get("args")
            .and_then(|v| v.as_array())
            .map(|list| list.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        let output = ctx.option_str("output").and_then(parse_kind);

        ExternalCommand {
            program: program.to_string(),
            args,
            output,
        }
        .transform(input, ctx)
    }

    fn depends_on_path(&self) -> bool {
        true
    }
}

fn parse_kind(name: &str) -> Option<ContentKind> {
    [
        ContentKind::Script,
        ContentKind::Stylesheet,
        ContentKind::Markup,
        ContentKind::Data,
        ContentKind::Binary,
        ContentKind::Url,
    ]
    .into_iter()
    .find(|kind| kind.as_str() == name)
}

/// External program: payload on stdin, result on stdout
#[derive(Debug, Clone)]
pub struct ExternalCommand {
    pub program: String,
    pub args: Vec<String>,
    pub output: Option<ContentKind>,
}

impl Transformer for ExternalCommand {
    fn transform(&self, input: Payload, ctx: &StageContext<'_>) -> Result<Payload, String> {
        let path = ctx.path.to_string_lossy();
        let args: Vec<String> = self.args.iter().map(|a| a.replace("{path}", &path)).collect();

        let mut child = Command::new(&self.program)
            .args(&args)
            .current_dir(ctx.root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| format!("cannot run {}: {e}", self.program))?;

        let stdin = child.stdin.take();
        let (output, written) = std::thread::scope(|scope| {
            // Feed stdin from another thread so a full stdout pipe cannot deadlock us
            let writer = scope.spawn(|| match stdin {
                Some(mut stdin) => stdin.write_all(&input.bytes),
                None => Ok(()),
            });
            let output = child.wait_with_output();
            (output, writer.join().unwrap_or(Ok(())))
        });
        let output = output.map_err(|e| format!("{} failed: {e}", self.program))?;

        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            return Err(format!(
                "{} exited with code {code}: {}",
                self.program,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        written.map_err(|e| format!("cannot feed {}: {e}", self.program))?;

        let kind = self.output.unwrap_or(input.kind);
        Ok(input.with_content(kind, output.stdout))
    }

    fn fingerprint(&self) -> String {
        let output = self.output.map_or("same", |kind| kind.as_str());
        format!("command:{}\0{}\0{output}", self.program, self.args.join("\0"))
    }

    fn depends_on_path(&self) -> bool {
        self.args.iter().any(|a| a.contains("{path}"))
    }
}
