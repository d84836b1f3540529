//! Mode profiles: the DEV and RELEASE variants of a build configuration.
//!
//! Pipeline code never matches on [`Mode`] directly. It asks the profile
//! for a capability (`uses_content_hash`, `has_live_reload`, ...) and the
//! branching stays in this module.

use crate::theme::Mode;

/// Settings only meaningful for development builds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevProfile {
    /// Debounce window for the watch loop, in milliseconds
    pub debounce_ms: u64,
}

/// Settings only meaningful for release builds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseProfile {
    /// Upper bound on emitted script chunks (None = one per dynamic import)
    pub max_chunks: Option<usize>,
}

/// Fully specified, immutable mode variant
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModeProfile {
    Dev(DevProfile),
    Release(ReleaseProfile),
}

impl ModeProfile {
    /// Development profile: stable names, injected styles, live reload
    pub fn dev(debounce_ms: u64) -> Self {
        ModeProfile::Dev(DevProfile { debounce_ms })
    }

    /// Release profile: hashed names, extracted and minified styles
    pub fn release(max_chunks: Option<usize>) -> Self {
        ModeProfile::Release(ReleaseProfile {
            max_chunks: max_chunks.map(|n| n.max(1)),
        })
    }

    #[inline]
    pub fn mode(&self) -> Mode {
        match self {
            ModeProfile::Dev(_) => Mode::Dev,
            ModeProfile::Release(_) => Mode::Release,
        }
    }

    /// Derived artifacts carry a content hash in their names
    #[inline]
    pub fn uses_content_hash(&self) -> bool {
        matches!(self, ModeProfile::Release(_))
    }

    /// Stylesheets are written to `theme.css` instead of injected by script
    #[inline]
    pub fn extracts_stylesheets(&self) -> bool {
        matches!(self, ModeProfile::Release(_))
    }

    #[inline]
    pub fn has_live_reload(&self) -> bool {
        matches!(self, ModeProfile::Dev(_))
    }

    /// Module ids are root-relative paths rather than short hashes
    #[inline]
    pub fn named_module_ids(&self) -> bool {
        matches!(self, ModeProfile::Dev(_))
    }

    /// Each bundled module is preceded by a comment naming its source path
    #[inline]
    pub fn path_comments(&self) -> bool {
        matches!(self, ModeProfile::Dev(_))
    }

    /// The module graph is kept between builds for incremental rebuilds
    #[inline]
    pub fn incremental(&self) -> bool {
        matches!(self, ModeProfile::Dev(_))
    }

    /// Artifacts are written by the pipeline itself, with rollback on
    /// failure. Otherwise they stay in memory until a plugin flushes them.
    #[inline]
    pub fn writes_directly(&self) -> bool {
        matches!(self, ModeProfile::Release(_))
    }

    /// Chunk limit this profile enforces, if any
    pub fn max_chunks(&self) -> Option<usize> {
        match self {
            ModeProfile::Dev(_) => Some(1),
            ModeProfile::Release(release) => release.max_chunks,
        }
    }

    /// Terminal stage of every stylesheet rule
    #[inline]
    pub fn style_stage(&self) -> &'static str {
        if self.extracts_stylesheets() {
            "style-extract"
        } else {
            "style-inject"
        }
    }

    /// Sub-directory of the cache root used by this profile
    #[inline]
    pub fn cache_namespace(&self) -> &'static str {
        match self {
            ModeProfile::Dev(_) => "theme-dev",
            ModeProfile::Release(_) => "theme-release",
        }
    }

    /// Debounce window for the watch loop (DEV only)
    pub fn debounce_ms(&self) -> Option<u64> {
        match self {
            ModeProfile::Dev(dev) => Some(dev.debounce_ms),
            ModeProfile::Release(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dev_capabilities() {
        let profile = ModeProfile::dev(200);
        assert_eq!(profile.mode(), Mode::Dev);
        assert!(!profile.uses_content_hash());
        assert!(!profile.extracts_stylesheets());
        assert!(profile.has_live_reload());
        assert!(profile.named_module_ids());
        assert!(profile.incremental());
        assert!(!profile.writes_directly());
        assert_eq!(profile.max_chunks(), Some(1));
        assert_eq!(profile.style_stage(), "style-inject");
        assert_eq!(profile.debounce_ms(), Some(200));
    }

    #[test]
    fn test_release_capabilities() {
        let profile = ModeProfile::release(None);
        assert_eq!(profile.mode(), Mode::Release);
        assert!(profile.uses_content_hash());
        assert!(profile.extracts_stylesheets());
        assert!(!profile.has_live_reload());
        assert!(!profile.named_module_ids());
        assert!(profile.writes_directly());
        assert_eq!(profile.max_chunks(), None);
        assert_eq!(profile.style_stage(), "style-extract");
        assert_eq!(profile.debounce_ms(), None);
    }

    #[test]
    fn test_release_max_chunks_minimum_one() {
        let profile = ModeProfile::release(Some(0));
        assert_eq!(profile.max_chunks(), Some(1));
    }

    #[test]
    fn test_cache_namespaces_differ() {
        assert_ne!(
            ModeProfile::dev(100).cache_namespace(),
            ModeProfile::release(None).cache_namespace()
        );
    }
}
