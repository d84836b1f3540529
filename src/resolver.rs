//! Mode configuration resolution.
//!
//! [`resolve`] turns a `(theme, mode)` request into the one immutable
//! [`BuildConfiguration`] used for the whole invocation. A shared base is
//! built first; the DEV and RELEASE factories then fill in the parts that
//! differ. Nothing here touches the output directory.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::error::BuildError;
use crate::modules::Alias;
use crate::plugins::{
    ChunkLimiter, CssMinifier, DefineConstants, FlushOnWrite, OutputCleaner, PluginSet, ProgressReporter,
    StaleOutputCleaner, TimezoneDataTrimmer,
};
use crate::profile::ModeProfile;
use crate::rules::{AssetPolicy, Exclude, PathTest, Rule, TransformerRef, UnsupportedPolicy};
use crate::theme::{find_entry, output_dir_for_theme, public_path_for_theme, theme_source_dir, BuildRequest, Mode, CLIENT_DIR};
use crate::tzdata::{current_year, FIRST_YEAR, YEARS_AHEAD};

/// Byte threshold at or under which images are inlined
pub const INLINE_LIMIT: u64 = 8192;

/// Stylesheet merged into every `.scss` unit
pub const GLOBAL_STYLE_RESOURCE: &str = "client/scss/global.scss";

/// Cache root, relative to the project root
pub const CACHE_ROOT: &str = ".asset-cache";

/// Packages whose sources still go through the script compiler
pub const SCRIPT_ALLOW_LIST: &[&str] = &["vuetify"];

/// Packages aliased to a single copy in `node_modules`
pub const DEDUPLICATED_PACKAGES: &[&str] = &["apollo-link", "apollo-utilities", "uc.micro"];

/// Host-provided knobs that are not part of the request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildEnv {
    pub jobs: usize,
    /// Overrides `<root>/.asset-cache/<namespace>`
    pub cache_dir: Option<PathBuf>,
    pub use_cache: bool,
    pub unsupported: UnsupportedPolicy,
    /// RELEASE chunk limit
    pub max_chunks: Option<usize>,
    /// DEV watch debounce window
    pub debounce_ms: u64,
    /// Year the timezone data window is anchored to
    pub current_year: i32,
    /// Show a progress spinner
    pub progress: bool,
}

impl Default for BuildEnv {
    fn default() -> Self {
        Self {
            jobs: num_cpus::get(),
            cache_dir: None,
            use_cache: true,
            unsupported: UnsupportedPolicy::Fail,
            max_chunks: None,
            debounce_ms: 200,
            current_year: current_year(),
            progress: false,
        }
    }
}

/// Everything a build needs, derived once per request
#[derive(Clone)]
pub struct BuildConfiguration {
    pub request: BuildRequest,
    pub root: PathBuf,
    pub entry: PathBuf,
    pub output_dir: PathBuf,
    pub public_path: String,
    /// `None` when caching is disabled
    pub cache_dir: Option<PathBuf>,
    pub rules: Arc<[Rule]>,
    pub policy: AssetPolicy,
    pub unsupported: UnsupportedPolicy,
    pub aliases: Vec<Alias>,
    pub plugins: PluginSet,
    pub profile: ModeProfile,
    pub defines: BTreeMap<String, String>,
    pub jobs: usize,
}

impl BuildConfiguration {
    /// Root-relative, `/`-separated form of `path`
    pub fn relative(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        crate::rules::normalized(rel)
    }
}

impl fmt::Debug for BuildConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildConfiguration")
            .field("request", &self.request)
            .field("entry", &self.entry)
            .field("output_dir", &self.output_dir)
            .field("public_path", &self.public_path)
            .field("cache_dir", &self.cache_dir)
            .field("rules", &self.rules.iter().map(|r| r.name.as_str()).collect::<Vec<_>>())
            .field("plugins", &self.plugins)
            .field("profile", &self.profile)
            .finish_non_exhaustive()
    }
}

/// Parts shared by both modes
struct BaseConfiguration {
    request: BuildRequest,
    root: PathBuf,
    entry: PathBuf,
    output_dir: PathBuf,
    public_path: String,
    aliases: Vec<Alias>,
    env: BuildEnv,
}

/// Build the configuration for `request` rooted at `root`.
///
/// Fails with [`BuildError::ThemeNotFound`] when the theme has no entry
/// module.
pub fn resolve(root: &Path, request: &BuildRequest, env: &BuildEnv) -> Result<BuildConfiguration, BuildError> {
    let entry = find_entry(root, &request.theme).ok_or_else(|| BuildError::ThemeNotFound {
        theme: request.theme.to_string(),
        entry: theme_source_dir(root, &request.theme).join("index"),
    })?;

    let base = BaseConfiguration {
        request: request.clone(),
        root: root.to_path_buf(),
        entry,
        output_dir: output_dir_for_theme(root, &request.theme),
        public_path: public_path_for_theme(&request.theme),
        aliases: alias_map(root),
        env: env.clone(),
    };

    let config = match request.mode {
        Mode::Dev => dev_configuration(base),
        Mode::Release => release_configuration(base),
    };
    debug!(?config, "resolved build configuration");
    Ok(config)
}

fn dev_configuration(base: BaseConfiguration) -> BuildConfiguration {
    let profile = ModeProfile::dev(base.env.debounce_ms);
    let mut plugins = PluginSet::new().with(Arc::new(OutputCleaner));
    plugins.push(Arc::new(FlushOnWrite::default()));
    finish(base, profile, plugins)
}

fn release_configuration(base: BaseConfiguration) -> BuildConfiguration {
    let profile = ModeProfile::release(base.env.max_chunks);
    let mut plugins = PluginSet::new().with(Arc::new(OutputCleaner));
    plugins.push(Arc::new(CssMinifier));
    plugins.push(Arc::new(StaleOutputCleaner));
    finish(base, profile, plugins)
}

/// Plugins and settings common to both modes, driven by profile
/// capabilities
fn finish(base: BaseConfiguration, profile: ModeProfile, mut plugins: PluginSet) -> BuildConfiguration {
    let env = base.env;
    let defines = define_map(profile.mode());

    plugins.push(Arc::new(TimezoneDataTrimmer::new(FIRST_YEAR, env.current_year + YEARS_AHEAD)));
    plugins.push(Arc::new(DefineConstants::new(&defines)));
    if let Some(max) = profile.max_chunks() {
        plugins.push(Arc::new(ChunkLimiter::new(max)));
    }
    if env.progress {
        plugins.push(Arc::new(ProgressReporter::new()));
    }

    let cache_dir = env.use_cache.then(|| {
        env.cache_dir
            .clone()
            .unwrap_or_else(|| base.root.join(CACHE_ROOT))
            .join(profile.cache_namespace())
    });

    BuildConfiguration {
        rules: rule_catalog(&base.root, &profile).into(),
        policy: AssetPolicy::default(),
        unsupported: env.unsupported,
        request: base.request,
        root: base.root,
        entry: base.entry,
        output_dir: base.output_dir,
        public_path: base.public_path,
        cache_dir,
        aliases: base.aliases,
        plugins,
        profile,
        defines,
        jobs: env.jobs.max(1),
    }
}

/// Build-time constants substituted into scripts
pub fn define_map(mode: Mode) -> BTreeMap<String, String> {
    let mut defines = BTreeMap::new();
    defines.insert("process.env.NODE_ENV".to_string(), format!("\"{}\"", mode.as_str()));
    defines
}

/// Aliases applied identically in both modes
pub fn alias_map(root: &Path) -> Vec<Alias> {
    let client = root.join(CLIENT_DIR);
    let mut aliases = vec![
        Alias::path("@", &client),
        Alias::exact_module("vue", "vue/dist/vue.esm.js"),
        Alias::path("gql", client.join("graph")),
    ];
    for package in DEDUPLICATED_PACKAGES {
        aliases.push(Alias::path(package, root.join("node_modules").join(package)));
    }
    aliases
}

/// The ordered rule list. Both modes share the same topology; only the
/// terminal stylesheet stage differs.
pub fn rule_catalog(root: &Path, profile: &ModeProfile) -> Vec<Rule> {
    let style = || TransformerRef::new(profile.style_stage());
    let postcss = || TransformerRef::new("postcss");
    let css = || TransformerRef::new("css");

    vec![
        Rule::new("script", PathTest::extensions(&["js"]), vec![TransformerRef::cached("script")]).excluding(
            Exclude::DependencyUnless {
                marker: "node_modules".to_string(),
                allow: SCRIPT_ALLOW_LIST.iter().map(|s| s.to_string()).collect(),
            },
        ),
        Rule::new("css", PathTest::extensions(&["css"]), vec![postcss(), css(), style()]),
        Rule::new(
            "sass",
            PathTest::extensions(&["sass"]),
            vec![TransformerRef::cached("sass").with_option("indented", true), postcss(), css(), style()],
        ),
        Rule::new(
            "scss",
            PathTest::extensions(&["scss"]),
            vec![
                TransformerRef::new("sass-resources").with_option("resources", serde_json::json!([GLOBAL_STYLE_RESOURCE])),
                TransformerRef::cached("sass"),
                postcss(),
                css(),
                style(),
            ],
        ),
        Rule::new("vue", PathTest::extensions(&["vue"]), vec![TransformerRef::new("vue")]),
        Rule::new("pug", PathTest::extensions(&["pug"]), vec![TransformerRef::new("pug")])
            .excluding(Exclude::UnderDir(root.join("dev"))),
        Rule::new(
            "images",
            PathTest::extensions(&["png", "jpg", "jpeg", "gif"]),
            vec![TransformerRef::new("asset")
                .with_option("limit", INLINE_LIMIT)
                .with_option("output_path", "img/")],
        ),
        Rule::new(
            "svg",
            PathTest::extensions(&["svg"]),
            vec![TransformerRef::new("asset")
                .with_option("limit", INLINE_LIMIT)
                .with_option("output_path", "svg/")],
        )
        .excluding(Exclude::UnderDir(root.join("node_modules").join("grapesjs"))),
        Rule::new(
            "graphql",
            PathTest::extensions(&["graphql", "gql"]),
            vec![TransformerRef::new("graphql"), TransformerRef::new("persisted-query")],
        )
        .excluding(Exclude::Contains("node_modules".to_string())),
        Rule::new(
            "fonts",
            PathTest::extensions(&["woff", "woff2", "ttf", "eot", "svg"]),
            vec![TransformerRef::new("asset").with_option("output_path", "fonts/")],
        )
        .excluding(Exclude::UnderDir(root.join(CLIENT_DIR))),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{match_path, MatchOutcome};
    use crate::theme::ThemeName;
    use std::fs;
    use tempfile::TempDir;

    fn project_with_theme(theme: &str) -> TempDir {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("client/themes").join(theme);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("index.js"), "require('./app.scss')").unwrap();
        temp
    }

    fn request(theme: &str, mode: Mode) -> BuildRequest {
        BuildRequest::new(ThemeName::validated(theme).unwrap(), mode)
    }

    fn env() -> BuildEnv {
        BuildEnv {
            current_year: 2025,
            ..BuildEnv::default()
        }
    }

    fn chain_ids(rule: &Rule) -> Vec<&str> {
        rule.chain.iter().map(|t| t.id.as_str()).collect()
    }

    #[test]
    fn test_missing_theme_fails_without_touching_output() {
        let temp = project_with_theme("default");
        let out = temp.path().join("assets/themes/dark");
        fs::create_dir_all(&out).unwrap();
        fs::write(out.join("theme.js"), "previous").unwrap();

        let err = resolve(temp.path(), &request("dark", Mode::Release), &env()).unwrap_err();

        assert!(matches!(err, BuildError::ThemeNotFound { .. }));
        assert_eq!(fs::read_to_string(out.join("theme.js")).unwrap(), "previous");
    }

    #[test]
    fn test_paths_derived_from_root_and_theme() {
        let temp = project_with_theme("dark-blue");
        let config = resolve(temp.path(), &request("dark-blue", Mode::Dev), &env()).unwrap();

        assert_eq!(config.entry, temp.path().join("client/themes/dark-blue/index.js"));
        assert_eq!(config.output_dir, temp.path().join("assets/themes/dark-blue"));
        assert_eq!(config.public_path, "/themes/dark-blue/");
        assert_eq!(config.cache_dir, Some(temp.path().join(".asset-cache/theme-dev")));
    }

    #[test]
    fn test_no_cache_disables_cache_dir() {
        let temp = project_with_theme("default");
        let env = BuildEnv {
            use_cache: false,
            ..env()
        };
        let config = resolve(temp.path(), &request("default", Mode::Release), &env).unwrap();
        assert_eq!(config.cache_dir, None);
    }

    #[test]
    fn test_dev_and_release_plugin_sets() {
        let temp = project_with_theme("default");
        let dev = resolve(temp.path(), &request("default", Mode::Dev), &env()).unwrap();
        let release = resolve(temp.path(), &request("default", Mode::Release), &env()).unwrap();

        assert!(dev.plugins.contains("flush-on-write"));
        assert!(dev.plugins.contains("chunk-limiter"));
        assert!(!dev.plugins.contains("css-minifier"));

        assert!(release.plugins.contains("css-minifier"));
        assert!(release.plugins.contains("stale-output-cleaner"));
        assert!(!release.plugins.contains("chunk-limiter"));
        assert!(!release.plugins.contains("flush-on-write"));

        for config in [&dev, &release] {
            assert_eq!(config.plugins.names()[0], "output-cleaner");
            assert!(config.plugins.contains("timezone-data-trimmer"));
        }
    }

    #[test]
    fn test_release_max_chunks_adds_limiter() {
        let temp = project_with_theme("default");
        let env = BuildEnv {
            max_chunks: Some(3),
            ..env()
        };
        let config = resolve(temp.path(), &request("default", Mode::Release), &env).unwrap();
        assert!(config.plugins.contains("chunk-limiter"));
    }

    #[test]
    fn test_modes_share_rule_topology() {
        let root = Path::new("/app");
        let dev = rule_catalog(root, &ModeProfile::dev(200));
        let release = rule_catalog(root, &ModeProfile::release(None));

        let dev_names: Vec<&str> = dev.iter().map(|r| r.name.as_str()).collect();
        let release_names: Vec<&str> = release.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(dev_names, release_names);

        let scss_dev = dev.iter().find(|r| r.name == "scss").unwrap();
        let scss_release = release.iter().find(|r| r.name == "scss").unwrap();
        assert_eq!(chain_ids(scss_dev), vec!["sass-resources", "sass", "postcss", "css", "style-inject"]);
        assert_eq!(chain_ids(scss_release), vec!["sass-resources", "sass", "postcss", "css", "style-extract"]);
    }

    #[test]
    fn test_catalog_routes_svg_by_location() {
        let root = Path::new("/app");
        let rules = rule_catalog(root, &ModeProfile::release(None));
        let policy = AssetPolicy::default();

        let name_of = |path: &str| match match_path(Path::new(path), &rules, &policy) {
            MatchOutcome::Chain(rule) => rule.name.clone(),
            other => other.to_string(),
        };

        assert_eq!(name_of("/app/client/img/logo.svg"), "svg");
        assert_eq!(name_of("/app/node_modules/grapesjs/fonts/main.svg"), "fonts");
        assert_eq!(name_of("/app/node_modules/vuetify/lib/index.js"), "script");
        assert_eq!(name_of("/app/node_modules/lodash/lodash.js"), "passthrough");
        assert_eq!(name_of("/app/dev/page.pug"), "passthrough");
        assert_eq!(name_of("/app/client/main.ts"), "unsupported .ts");
    }

    #[test]
    fn test_aliases() {
        let aliases = alias_map(Path::new("/app"));
        let keys: Vec<&str> = aliases.iter().map(|a| a.key.as_str()).collect();
        assert_eq!(keys, vec!["@", "vue", "gql", "apollo-link", "apollo-utilities", "uc.micro"]);
    }

    #[test]
    fn test_defines_follow_mode() {
        assert_eq!(define_map(Mode::Dev)["process.env.NODE_ENV"], "\"development\"");
        assert_eq!(define_map(Mode::Release)["process.env.NODE_ENV"], "\"production\"");
    }

    #[test]
    fn test_resolve_is_repeatable() {
        let temp = project_with_theme("default");
        let a = resolve(temp.path(), &request("default", Mode::Release), &env()).unwrap();
        let b = resolve(temp.path(), &request("default", Mode::Release), &env()).unwrap();
        assert_eq!(a.entry, b.entry);
        assert_eq!(a.rules.len(), b.rules.len());
        assert_eq!(a.plugins.names(), b.plugins.names());
        assert_eq!(a.profile, b.profile);
    }
}
