//! CLI configuration and runtime settings for theme builds.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::resolver::BuildEnv;
use crate::rules::UnsupportedPolicy;
use crate::theme::{BuildRequest, Mode, ThemeName, DEFAULT_THEME};
use crate::tzdata::current_year;
use crate::watch::DEFAULT_DEBOUNCE_MS;

/// Theme-aware front-end asset builds
#[derive(Parser, Debug)]
#[command(name = "theme-assets")]
#[command(version)]
#[command(about = "Theme-aware front-end asset build pipeline")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Build mode
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Development build, then watch for changes
    Dev {
        #[command(flatten)]
        shared: SharedArgs,

        /// Build once and exit instead of watching
        #[arg(long)]
        once: bool,

        /// Quiet period before a batch of file changes triggers a rebuild
        #[arg(long, default_value_t = DEFAULT_DEBOUNCE_MS)]
        debounce_ms: u64,
    },
    /// Production build with hashed file names
    Release {
        #[command(flatten)]
        shared: SharedArgs,

        /// Merge async chunks until at most this many remain
        #[arg(long)]
        max_chunks: Option<usize>,
    },
}

/// Options common to both modes
#[derive(Args, Debug, Clone)]
pub struct SharedArgs {
    /// Theme to build
    #[arg(short, long, default_value = DEFAULT_THEME)]
    pub theme: String,

    /// Project root (holds client/ and assets/)
    #[arg(short, long, default_value = ".")]
    pub root: PathBuf,

    /// Number of parallel workers
    #[arg(short, long, default_value_t = num_cpus::get())]
    pub jobs: usize,

    /// Transform cache location (default: <root>/.asset-cache)
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Disable the persistent transform cache
    #[arg(long)]
    pub no_cache: bool,

    /// Skip files of unsupported types with a warning instead of failing
    #[arg(long)]
    pub skip_unsupported: bool,

    /// Run transformer ID through an external command (ID=COMMAND, repeatable)
    #[arg(long = "transformer", value_name = "ID=COMMAND")]
    pub transformers: Vec<String>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

/// A transformer id bound to an external command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformerBinding {
    pub id: String,
    pub command: String,
}

impl TransformerBinding {
    /// Parse `ID=COMMAND`
    pub fn parse(s: &str) -> anyhow::Result<Self> {
        let Some((id, command)) = s.split_once('=') else {
            anyhow::bail!("invalid transformer binding '{s}': expected ID=COMMAND");
        };
        let (id, command) = (id.trim(), command.trim());
        if id.is_empty() || command.is_empty() {
            anyhow::bail!("invalid transformer binding '{s}': expected ID=COMMAND");
        }
        Ok(Self {
            id: id.to_string(),
            command: command.to_string(),
        })
    }
}

/// Runtime configuration parsed from CLI
#[derive(Debug, Clone)]
pub struct Config {
    pub request: BuildRequest,
    /// Project root, canonicalized when it exists
    pub root: PathBuf,
    /// Number of parallel workers
    pub jobs: usize,
    pub cache_dir: Option<PathBuf>,
    pub use_cache: bool,
    pub unsupported: UnsupportedPolicy,
    pub transformers: Vec<TransformerBinding>,
    /// DEV: build once instead of watching
    pub once: bool,
    pub debounce_ms: u64,
    /// RELEASE: chunk limit
    pub max_chunks: Option<usize>,
    /// Enable verbose output
    pub verbose: bool,
}

impl Config {
    /// Create Config from CLI arguments
    pub fn from_cli(cli: Cli) -> anyhow::Result<Self> {
        let (mode, shared, once, debounce_ms, max_chunks) = match cli.command {
            Command::Dev {
                shared,
                once,
                debounce_ms,
            } => (Mode::Dev, shared, once, debounce_ms, None),
            Command::Release { shared, max_chunks } => {
                (Mode::Release, shared, false, DEFAULT_DEBOUNCE_MS, max_chunks)
            }
        };

        let theme = ThemeName::validated(&shared.theme)?;
        let root = shared.root.canonicalize().unwrap_or(shared.root);

        let transformers = shared
            .transformers
            .iter()
            .map(|s| TransformerBinding::parse(s))
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Config {
            request: BuildRequest::new(theme, mode),
            root,
            jobs: shared.jobs.max(1),
            cache_dir: shared.cache_dir,
            use_cache: !shared.no_cache,
            unsupported: if shared.skip_unsupported {
                UnsupportedPolicy::Skip
            } else {
                UnsupportedPolicy::Fail
            },
            transformers,
            once,
            debounce_ms,
            max_chunks: max_chunks.map(|n| n.max(1)),
            verbose: shared.verbose,
        })
    }

    /// Environment half of the build configuration
    pub fn build_env(&self) -> BuildEnv {
        BuildEnv {
            jobs: self.jobs,
            cache_dir: self.cache_dir.clone(),
            use_cache: self.use_cache,
            unsupported: self.unsupported,
            max_chunks: self.max_chunks,
            debounce_ms: self.debounce_ms,
            current_year: current_year(),
            progress: self.verbose,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared(theme: &str, jobs: usize) -> SharedArgs {
        SharedArgs {
            theme: theme.to_string(),
            root: PathBuf::from("/tmp"),
            jobs,
            cache_dir: None,
            no_cache: false,
            skip_unsupported: false,
            transformers: Vec::new(),
            verbose: false,
        }
    }

    fn release(shared: SharedArgs) -> Cli {
        Cli {
            command: Command::Release {
                shared,
                max_chunks: None,
            },
        }
    }

    // ==================== Cli parsing tests ====================

    #[test]
    fn test_cli_parses_dev_subcommand() {
        let cli = Cli::try_parse_from([
            "theme-assets",
            "dev",
            "--theme",
            "dark",
            "--once",
            "--debounce-ms",
            "50",
            "--transformer",
            "sass=sassc --stdin",
        ])
        .unwrap();

        let config = Config::from_cli(cli).unwrap();

        assert_eq!(config.request.mode, Mode::Dev);
        assert_eq!(config.request.theme.as_str(), "dark");
        assert!(config.once);
        assert_eq!(config.debounce_ms, 50);
        assert_eq!(config.transformers[0].id, "sass");
        assert_eq!(config.transformers[0].command, "sassc --stdin");
    }

    #[test]
    fn test_cli_parses_release_subcommand() {
        let cli = Cli::try_parse_from(["theme-assets", "release", "--max-chunks", "3", "--no-cache"]).unwrap();

        let config = Config::from_cli(cli).unwrap();

        assert_eq!(config.request.mode, Mode::Release);
        assert_eq!(config.request.theme.as_str(), DEFAULT_THEME);
        assert_eq!(config.max_chunks, Some(3));
        assert!(!config.use_cache);
    }

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["theme-assets"]).is_err());
    }

    #[test]
    fn test_release_rejects_dev_only_flags() {
        assert!(Cli::try_parse_from(["theme-assets", "release", "--once"]).is_err());
    }

    // ==================== Config::from_cli tests ====================

    #[test]
    fn test_config_from_cli_jobs_minimum_one() {
        let config = Config::from_cli(release(shared("default", 0))).unwrap();
        assert_eq!(config.jobs, 1);
    }

    #[test]
    fn test_config_from_cli_invalid_theme() {
        assert!(Config::from_cli(release(shared("../etc", 4))).is_err());
        assert!(Config::from_cli(release(shared("", 4))).is_err());
    }

    #[test]
    fn test_config_from_cli_skip_unsupported() {
        let mut args = shared("default", 4);
        args.skip_unsupported = true;
        let config = Config::from_cli(release(args)).unwrap();
        assert_eq!(config.unsupported, UnsupportedPolicy::Skip);
    }

    #[test]
    fn test_config_from_cli_bad_binding() {
        let mut args = shared("default", 4);
        args.transformers = vec!["sass".to_string()];
        assert!(Config::from_cli(release(args)).is_err());
    }

    #[test]
    fn test_build_env_carries_settings() {
        let mut args = shared("default", 6);
        args.cache_dir = Some(PathBuf::from("/cache"));
        args.verbose = true;
        let cli = Cli {
            command: Command::Release {
                shared: args,
                max_chunks: Some(0),
            },
        };

        let env = Config::from_cli(cli).unwrap().build_env();

        assert_eq!(env.jobs, 6);
        assert_eq!(env.cache_dir, Some(PathBuf::from("/cache")));
        assert_eq!(env.max_chunks, Some(1));
        assert!(env.progress);
    }

    // ==================== TransformerBinding tests ====================

    #[test]
    fn test_binding_parse() {
        let binding = TransformerBinding::parse("script = babel --presets env").unwrap();
        assert_eq!(binding.id, "script");
        assert_eq!(binding.command, "babel --presets env");
        assert!(TransformerBinding::parse("=cmd").is_err());
        assert!(TransformerBinding::parse("id=").is_err());
    }
}
