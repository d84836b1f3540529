//! Theme, mode, and request types for theme asset builds.
//!
//! Provides a validated theme name wrapper using `Arc<str>` and the
//! theme-scoped path layout (entry module, output directory, public path).

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::BuildError;

/// Theme used when the caller does not name one
pub const DEFAULT_THEME: &str = "default";

/// Directory holding theme sources, relative to the project root
pub const CLIENT_DIR: &str = "client";

/// Extensions probed when resolving extension-less module paths
pub const RESOLVE_EXTENSIONS: &[&str] = &["js", "json", "vue"];

/// Theme name (e.g., "default", "dark-blue").
/// Newtype wrapper for validation and cheap cloning
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThemeName(Arc<str>);

impl ThemeName {
    /// Create a validated ThemeName
    ///
    /// Names are used as a single path component, so separators and
    /// relative components are rejected.
    pub fn validated(s: &str) -> Result<Self, BuildError> {
        let invalid = |reason: &str| BuildError::InvalidTheme {
            theme: s.to_string(),
            reason: reason.to_string(),
        };

        if s.is_empty() {
            return Err(invalid("theme name must not be empty"));
        }
        if s == "." || s == ".." {
            return Err(invalid("theme name must not be a relative path component"));
        }
        if !s
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
        {
            return Err(invalid("only ASCII letters, digits, '-', '_' and '.' are allowed"));
        }

        Ok(Self(Arc::from(s)))
    }

    /// Get the inner string reference
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ThemeName {
    fn default() -> Self {
        Self(Arc::from(DEFAULT_THEME))
    }
}

impl fmt::Display for ThemeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Build mode, selected by the invocation entry point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Dev,
    Release,
}

impl Mode {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Dev => "development",
            Mode::Release => "production",
        }
    }

    #[inline]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "dev" | "development" => Some(Mode::Dev),
            "release" | "production" => Some(Mode::Release),
            _ => None,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One build invocation: which theme, in which mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    pub theme: ThemeName,
    pub mode: Mode,
}

impl BuildRequest {
    pub fn new(theme: ThemeName, mode: Mode) -> Self {
        Self { theme, mode }
    }
}

/// Directory holding one theme's sources
pub fn theme_source_dir(root: &Path, theme: &ThemeName) -> PathBuf {
    root.join(CLIENT_DIR).join("themes").join(theme.as_str())
}

/// Locate the theme entry module (`themes/<theme>/index.*`)
pub fn find_entry(root: &Path, theme: &ThemeName) -> Option<PathBuf> {
    let base = theme_source_dir(root, theme).join("index");
    RESOLVE_EXTENSIONS
        .iter()
        .map(|ext| base.with_extension(ext))
        .find(|candidate| candidate.is_file())
}

/// Output directory for a theme: `assets/themes/<theme>`
pub fn output_dir_for_theme(root: &Path, theme: &ThemeName) -> PathBuf {
    root.join("assets").join("themes").join(theme.as_str())
}

/// URL prefix under which the host serves a theme's output directory
pub fn public_path_for_theme(theme: &ThemeName) -> String {
    format!("/themes/{}/", theme.as_str())
}
