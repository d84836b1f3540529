//! Output naming for rendered artifacts.
//!
//! RELEASE names derived artifacts `<base>.<hash>.<ext>` where the hash is
//! a pure function of the artifact bytes. The primary `theme.js` and
//! `theme.css` keep fixed names. DEV never hashes.

use std::fmt;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::profile::ModeProfile;

/// Hex characters of SHA-256 kept in hashed names
pub const HASH_LEN: usize = 20;

/// Primary script bundle name
pub const PRIMARY_SCRIPT: &str = "theme.js";

/// Primary (extracted) stylesheet name
pub const PRIMARY_STYLESHEET: &str = "theme.css";

/// Truncated SHA-256 of `bytes`
pub fn content_hash(bytes: &[u8]) -> String {
    let digest = format!("{:x}", Sha256::digest(bytes));
    digest[..HASH_LEN].to_string()
}

/// Broad MIME category of an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArtifactCategory {
    Script,
    Stylesheet,
    Asset,
}

impl ArtifactCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactCategory::Script => "script",
            ArtifactCategory::Stylesheet => "stylesheet",
            ArtifactCategory::Asset => "asset",
        }
    }
}

impl fmt::Display for ArtifactCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether an artifact keeps a fixed name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactRole {
    /// `theme.js` / `theme.css`
    Primary,
    /// Split-off script or stylesheet chunk
    Chunk,
    /// Emitted or copied static file
    Asset,
}

/// Rendered output that has not been named yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingArtifact {
    /// Output-relative name before hashing
    pub declared_name: String,
    pub category: ArtifactCategory,
    pub role: ArtifactRole,
    pub bytes: Vec<u8>,
}

impl PendingArtifact {
    pub fn new(declared_name: impl Into<String>, category: ArtifactCategory, role: ArtifactRole, bytes: Vec<u8>) -> Self {
        Self {
            declared_name: declared_name.into(),
            category,
            role,
            bytes,
        }
    }
}

/// A named build output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Output-relative name, `/`-separated
    pub logical_name: String,
    /// Absolute location under the theme output directory
    pub physical_path: PathBuf,
    /// Hash embedded in the name (RELEASE, non-primary only)
    pub content_hash: Option<String>,
    pub category: ArtifactCategory,
    pub bytes: Vec<u8>,
}

/// Name for `declared` under `profile`.
///
/// Returns the logical name and the hash it embeds, if any.
pub fn name(declared: &str, role: ArtifactRole, bytes: &[u8], profile: &ModeProfile) -> (String, Option<String>) {
    if role == ArtifactRole::Primary || !profile.uses_content_hash() {
        return (declared.to_string(), None);
    }
    let hash = content_hash(bytes);
    (insert_hash(declared, &hash), Some(hash))
}

/// `dir/base.ext` to `dir/base.<hash>.ext`
pub fn insert_hash(declared: &str, hash: &str) -> String {
    let (dir, file) = match declared.rfind('/') {
        Some(idx) => declared.split_at(idx + 1),
        None => ("", declared),
    };
    match file.rfind('.') {
        Some(dot) if dot > 0 => format!("{dir}{}.{hash}{}", &file[..dot], &file[dot..]),
        _ => format!("{dir}{file}.{hash}"),
    }
}

/// Name a pending artifact and place it under `output_dir`
pub fn finalize(pending: PendingArtifact, output_dir: &Path, profile: &ModeProfile) -> Artifact {
    let (logical_name, content_hash) = name(&pending.declared_name, pending.role, &pending.bytes, profile);
    Artifact {
        physical_path: output_dir.join(&logical_name),
        logical_name,
        content_hash,
        category: pending.category,
        bytes: pending.bytes,
    }
}
