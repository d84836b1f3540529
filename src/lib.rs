//! # Theme Assets
//!
//! Theme-aware front-end asset build pipeline.
//!
//! Turns the sources of one theme under `client/` into browser-ready
//! bundles under `assets/themes/<theme>/`, in either a DEV mode (stable
//! names, live reload, incremental rebuilds) or a RELEASE mode (content
//! hashed names, extracted and minified stylesheets).
//!
//! ## Features
//!
//! - Ordered rule matching from file path to transformer chain
//! - Transformer chains with a persistent content-addressed cache
//! - Parallel module graph discovery using Rayon
//! - Code splitting on dynamic imports with a chunk limit
//! - Lifecycle plugins per mode (clean, minify, trim timezone data)
//! - Debounced file watching with live-reload notification
//!
//! ## Usage
//!
//! ```ignore
//! use theme_assets::pipeline::Pipeline;
//! use theme_assets::resolver::{resolve, BuildEnv};
//! use theme_assets::theme::{BuildRequest, Mode, ThemeName};
//! use theme_assets::transform::TransformerRegistry;
//!
//! let request = BuildRequest::new(ThemeName::validated("dark")?, Mode::Release);
//! let config = resolve(&root, &request, &BuildEnv::default())?;
//! let mut pipeline = Pipeline::new(config, TransformerRegistry::with_builtins(), shutdown);
//! let report = pipeline.run()?;
//! ```

/// Built-in transformer stages
pub mod builtins;

/// Chunk planning and bundle rendering
pub mod bundle;

/// Persistent transform cache
pub mod cache;

/// CLI configuration and argument parsing
pub mod config;

/// Error types for build operations
pub mod error;

/// Module graph discovery and incremental updates
pub mod graph;

/// Dependency extraction and specifier resolution
pub mod modules;

/// Output file naming
pub mod naming;

/// Writing artifacts to the output directory
pub mod output;

/// Build orchestration
pub mod pipeline;

/// Build lifecycle plugins
pub mod plugins;

/// Per-mode settings
pub mod profile;

/// Mode configuration resolution
pub mod resolver;

/// Path-to-chain rule matching
pub mod rules;

/// Theme, mode, and request types
pub mod theme;

/// Transformer chain execution
pub mod transform;

/// Timezone data trimming
pub mod tzdata;

/// DEV watch session
pub mod watch;
