//! Mount-based virtual filesystem for worker tool access.
//!
//! A [`Sandbox`] exposes a virtual tree rooted at `/`. Bind-style
//! [`Mount`]s overlay host subtrees at virtual targets; longest target
//! wins during resolution, and every resolved host path must stay under
//! the sandbox root or one of the mount sources. Sub-workers receive a
//! [`restrict`](Sandbox::restrict)ed view that can narrow the visible
//! tree and tighten read-only flags but can never widen access.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, trace};

// ── Errors ─────────────────────────────────────────────────────────

/// Failures raised by sandbox operations.
///
/// Not-found, invalid-path, and read-only are distinct kinds so callers
/// (and the model, via tool error strings) can react to each.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Read-only: cannot modify '{0}'")]
    ReadOnly(String),

    #[error("Permission escalation: restriction cannot grant write access to a read-only sandbox")]
    PermissionEscalation,

    #[error("I/O error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl SandboxError {
    fn from_io(path: &str, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            SandboxError::NotFound(path.to_string())
        } else {
            SandboxError::Io {
                path: path.to_string(),
                source,
            }
        }
    }
}

// ── Configuration ──────────────────────────────────────────────────

/// A bind mount overlaying a host subtree at a virtual target.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Mount {
    /// Absolute host path.
    pub source: PathBuf,
    /// Absolute virtual path.
    pub target: String,
    #[serde(default)]
    pub readonly: bool,
}

/// Resolved sandbox configuration.
#[derive(Clone, Debug)]
pub struct SandboxConfig {
    /// Host directory the virtual `/` maps to.
    pub root: PathBuf,
    /// Read-only flag applying where no mount matches.
    pub readonly: bool,
    /// Mount overlay, kept sorted by target length descending so the
    /// longest prefix wins.
    pub mounts: Vec<Mount>,
}

impl SandboxConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            readonly: false,
            mounts: Vec::new(),
        }
    }

    pub fn readonly(mut self, readonly: bool) -> Self {
        self.readonly = readonly;
        self
    }

    pub fn mount(
        mut self,
        source: impl Into<PathBuf>,
        target: impl Into<String>,
        readonly: bool,
    ) -> Self {
        self.mounts.push(Mount {
            source: source.into(),
            target: target.into(),
            readonly,
        });
        self
    }
}

/// A narrowing request applied when deriving a sub-worker sandbox.
///
/// This is also the shape of a worker definition's `sandbox:` block.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SandboxRestriction {
    /// Virtual path that becomes the child's root.
    #[serde(default)]
    pub restrict: Option<String>,
    /// Force the child read-only. `Some(false)` on a read-only parent is
    /// a permission escalation and fails.
    #[serde(default)]
    pub readonly: Option<bool>,
}

// ── Path normalisation ─────────────────────────────────────────────

/// Normalise a virtual path: require a leading `/`, collapse `.` and `..`.
/// A `..` that would rise above `/` is rejected.
pub fn normalize_virtual_path(path: &str) -> Result<String, SandboxError> {
    if !path.starts_with('/') {
        return Err(SandboxError::InvalidPath(format!(
            "'{path}' is not an absolute virtual path"
        )));
    }

    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(SandboxError::InvalidPath(format!(
                        "'{path}' escapes the sandbox root"
                    )));
                }
            }
            s => segments.push(s),
        }
    }

    if segments.is_empty() {
        Ok("/".to_string())
    } else {
        Ok(format!("/{}", segments.join("/")))
    }
}

// ── File metadata ──────────────────────────────────────────────────

/// Metadata returned by [`Sandbox::stat`].
#[derive(Clone, Debug, Serialize)]
pub struct FileStat {
    /// Normalised virtual path.
    pub path: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub is_directory: bool,
}

// ── Sandbox ────────────────────────────────────────────────────────

/// A virtual filesystem with Docker-style bind mounts over host paths.
#[derive(Clone, Debug)]
pub struct Sandbox {
    config: SandboxConfig,
}

impl Sandbox {
    /// Build a sandbox, normalising mount targets and sorting them by
    /// target length descending.
    pub fn new(mut config: SandboxConfig) -> Result<Self, SandboxError> {
        for mount in &mut config.mounts {
            mount.target = normalize_virtual_path(&mount.target)?;
        }
        config
            .mounts
            .sort_by(|a, b| b.target.len().cmp(&a.target.len()));
        Ok(Self { config })
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// The mount matching a normalised virtual path, if any, with the
    /// path remainder relative to the mount target.
    fn match_mount<'a>(&'a self, normalized: &str) -> Option<(&'a Mount, String)> {
        for mount in &self.config.mounts {
            if mount.target == "/" {
                return Some((mount, normalized.to_string()));
            }
            if normalized == mount.target {
                return Some((mount, String::new()));
            }
            if let Some(rest) = normalized.strip_prefix(&format!("{}/", mount.target)) {
                return Some((mount, format!("/{rest}")));
            }
        }
        None
    }

    /// Resolve a virtual path to its host path.
    ///
    /// The longest-target mount wins; unmatched paths resolve under the
    /// root. The result must lie under the root or some mount source.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, SandboxError> {
        let normalized = normalize_virtual_path(path)?;

        let real = match self.match_mount(&normalized) {
            Some((mount, rest)) => join_virtual(&mount.source, &rest),
            None => join_virtual(&self.config.root, &normalized),
        };

        if real.starts_with(&self.config.root)
            || self.config.mounts.iter().any(|m| real.starts_with(&m.source))
        {
            trace!("resolve {normalized} -> {}", real.display());
            Ok(real)
        } else {
            Err(SandboxError::InvalidPath(format!(
                "'{normalized}' resolves outside the sandbox"
            )))
        }
    }

    /// Whether a virtual path resolves inside the sandbox.
    pub fn is_valid_path(&self, path: &str) -> bool {
        self.resolve(path).is_ok()
    }

    /// Whether writes are permitted at a virtual path: the negation of the
    /// effective read-only flag (matched mount's, else the global one).
    pub fn can_write(&self, path: &str) -> Result<bool, SandboxError> {
        let normalized = normalize_virtual_path(path)?;
        let readonly = match self.match_mount(&normalized) {
            Some((mount, _)) => mount.readonly,
            None => self.config.readonly,
        };
        Ok(!readonly)
    }

    fn assert_writable(&self, path: &str) -> Result<PathBuf, SandboxError> {
        if !self.can_write(path)? {
            return Err(SandboxError::ReadOnly(path.to_string()));
        }
        self.resolve(path)
    }

    // ── Operations ─────────────────────────────────────────────────

    pub async fn read(&self, path: &str) -> Result<String, SandboxError> {
        let real = self.resolve(path)?;
        fs::read_to_string(&real)
            .await
            .map_err(|e| SandboxError::from_io(path, e))
    }

    pub async fn read_binary(&self, path: &str) -> Result<Vec<u8>, SandboxError> {
        let real = self.resolve(path)?;
        fs::read(&real)
            .await
            .map_err(|e| SandboxError::from_io(path, e))
    }

    /// Write text, creating parent directories as needed.
    pub async fn write(&self, path: &str, content: &str) -> Result<(), SandboxError> {
        self.write_binary(path, content.as_bytes()).await
    }

    /// Write bytes, creating parent directories as needed.
    pub async fn write_binary(&self, path: &str, content: &[u8]) -> Result<(), SandboxError> {
        let real = self.assert_writable(path)?;
        if let Some(parent) = real.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| SandboxError::from_io(path, e))?;
        }
        debug!("write {path} ({} bytes)", content.len());
        fs::write(&real, content)
            .await
            .map_err(|e| SandboxError::from_io(path, e))
    }

    pub async fn delete(&self, path: &str) -> Result<(), SandboxError> {
        let real = self.assert_writable(path)?;
        debug!("delete {path}");
        fs::remove_file(&real)
            .await
            .map_err(|e| SandboxError::from_io(path, e))
    }

    /// Whether a path exists. Returns `false` on not-found but propagates
    /// other errors (permission, invalid path).
    pub async fn exists(&self, path: &str) -> Result<bool, SandboxError> {
        let real = self.resolve(path)?;
        fs::try_exists(&real)
            .await
            .map_err(|e| SandboxError::from_io(path, e))
    }

    /// Sorted entry names of a directory.
    pub async fn list(&self, path: &str) -> Result<Vec<String>, SandboxError> {
        let real = self.resolve(path)?;
        let mut reader = fs::read_dir(&real)
            .await
            .map_err(|e| SandboxError::from_io(path, e))?;
        let mut entries = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| SandboxError::from_io(path, e))?
        {
            entries.push(entry.file_name().to_string_lossy().to_string());
        }
        entries.sort();
        Ok(entries)
    }

    pub async fn stat(&self, path: &str) -> Result<FileStat, SandboxError> {
        let normalized = normalize_virtual_path(path)?;
        let real = self.resolve(path)?;
        let meta = fs::metadata(&real)
            .await
            .map_err(|e| SandboxError::from_io(path, e))?;

        let modified_at: DateTime<Utc> = meta
            .modified()
            .map(DateTime::from)
            .unwrap_or_else(|_| Utc::now());
        // Creation time is unavailable on some filesystems; fall back to
        // the modification time.
        let created_at: DateTime<Utc> = meta
            .created()
            .map(DateTime::from)
            .unwrap_or(modified_at);

        Ok(FileStat {
            path: normalized,
            size: meta.len(),
            created_at,
            modified_at,
            is_directory: meta.is_dir(),
        })
    }

    // ── Restriction ────────────────────────────────────────────────

    /// Derive a narrowed sandbox for a sub-worker.
    ///
    /// Invariants: never widening (read-only → read-write fails), the new
    /// root is the resolved host path of the `restrict` target, mounts
    /// outside the target are dropped and surviving mounts are rebased,
    /// `readonly: true` is forced onto the clone's global and mount flags.
    /// `self` is never mutated.
    pub fn restrict(&self, restriction: &SandboxRestriction) -> Result<Sandbox, SandboxError> {
        if self.config.readonly && restriction.readonly == Some(false) {
            return Err(SandboxError::PermissionEscalation);
        }

        let mut config = self.config.clone();

        if let Some(ref target) = restriction.restrict {
            let prefix = normalize_virtual_path(target)?;
            let new_root = self.resolve(&prefix)?;

            // The child's baseline flag is the parent's effective read-only
            // at the restrict target, so narrowing into a read-only mount
            // cannot regain write access through the new root.
            let effective_readonly = !self.can_write(&prefix)?;

            let mut rebased = Vec::new();
            for mount in &config.mounts {
                let new_target = if prefix == "/" {
                    Some(mount.target.clone())
                } else if mount.target == prefix {
                    Some("/".to_string())
                } else {
                    mount
                        .target
                        .strip_prefix(&format!("{prefix}/"))
                        .map(|rest| format!("/{rest}"))
                };
                if let Some(target) = new_target {
                    rebased.push(Mount {
                        source: mount.source.clone(),
                        target,
                        readonly: mount.readonly,
                    });
                }
            }

            config.root = new_root;
            config.readonly = effective_readonly;
            config.mounts = rebased;
        }

        if restriction.readonly == Some(true) {
            config.readonly = true;
            for mount in &mut config.mounts {
                mount.readonly = true;
            }
        }

        debug!(
            "restricted sandbox: root={}, readonly={}, mounts={}",
            config.root.display(),
            config.readonly,
            config.mounts.len()
        );
        Sandbox::new(config)
    }
}

/// Join a normalised virtual path (or remainder) onto a host base path.
fn join_virtual(base: &Path, virtual_path: &str) -> PathBuf {
    let rest = virtual_path.trim_start_matches('/');
    if rest.is_empty() {
        base.to_path_buf()
    } else {
        base.join(rest)
    }
}

// ── Tests ──────────────────────────────────────────────────────────
