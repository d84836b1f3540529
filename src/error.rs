use std::path::PathBuf;
use thiserror::Error;

/// Build error types
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Invalid theme name '{theme}': {reason}")]
    InvalidTheme { theme: String, reason: String },

    #[error("Theme not found: {theme} (no entry module at {entry})")]
    ThemeNotFound { theme: String, entry: PathBuf },

    #[error("Failed to write output {path}")]
    OutputWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No space left on device for {path}")]
    DiskFull { path: PathBuf },

    #[error("Cannot resolve '{specifier}' imported from {importer}")]
    UnresolvedAlias { specifier: String, importer: PathBuf },

    #[error("Unsupported asset type '.{extension}': {path}")]
    UnsupportedAssetType { path: PathBuf, extension: String },

    #[error("Transformer '{stage}' failed for {path}: {cause}")]
    Transform {
        stage: String,
        path: PathBuf,
        cause: String,
    },

    #[error("Unreadable cache entry {path}: {reason}")]
    CacheRead { path: PathBuf, reason: String },

    #[error("Plugin '{plugin}' failed: {message}")]
    Plugin { plugin: String, message: String },

    #[error("Watch error: {0}")]
    Watch(String),

    #[error("Build cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BuildError {
    /// Whether this error only concerns a single source file.
    ///
    /// File-scoped errors are collected as diagnostics; everything else
    /// aborts the build.
    pub fn is_file_scoped(&self) -> bool {
        matches!(
            self,
            BuildError::Transform { .. } | BuildError::UnsupportedAssetType { .. }
        )
    }

    /// Wrap an I/O error on an output path, detecting a full disk.
    pub fn output_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        // ENOSPC on Unix
        if source.raw_os_error() == Some(28) {
            return BuildError::DiskFull { path };
        }
        BuildError::OutputWrite { path, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transform_is_file_scoped() {
        let err = BuildError::Transform {
            stage: "script".to_string(),
            path: PathBuf::from("a.js"),
            cause: "syntax error".to_string(),
        };
        assert!(err.is_file_scoped());
        assert!(err.to_string().contains("script"));
    }

    #[test]
    fn test_unresolved_alias_is_build_scoped() {
        let err = BuildError::UnresolvedAlias {
            specifier: "@/missing".to_string(),
            importer: PathBuf::from("index.js"),
        };
        assert!(!err.is_file_scoped());
    }

    #[test]
    fn test_output_write_detects_disk_full() {
        let io = std::io::Error::from_raw_os_error(28);
        let err = BuildError::output_write("/out/theme.js", io);
        assert!(matches!(err, BuildError::DiskFull { .. }));

        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = BuildError::output_write("/out/theme.js", io);
        assert!(matches!(err, BuildError::OutputWrite { .. }));
    }
}
