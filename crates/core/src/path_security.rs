//! Path-Security Gate (spec §4.1, C1).
//!
//! Canonicalizes paths, resolves symlinks with a bounded chain length, and
//! decides allow/deny under a three-mode policy. Generalizes the teacher's
//! single "must stay under project root" check (`validate_path`) into the
//! full permissive/warn/strict policy.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{CoreError, CoreResult};

/// Maximum symlink chain length before `SymlinkLoop` (spec §4.1, §8 boundary).
pub const MAX_SYMLINK_DEPTH: u32 = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityMode {
    Permissive,
    Warn,
    Strict,
}

impl std::str::FromStr for SecurityMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "permissive" => Ok(Self::Permissive),
            "warn" => Ok(Self::Warn),
            "strict" => Ok(Self::Strict),
            other => Err(format!("unknown security mode '{other}'")),
        }
    }
}

/// A recorded non-fatal warning (emitted in `warn` mode for out-of-bounds paths).
#[derive(Debug, Clone)]
pub struct PathWarning {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct PathGate {
    pub mode: SecurityMode,
    pub base_dir: PathBuf,
    pub allow_dirs: Vec<PathBuf>,
    pub allow_files: Vec<PathBuf>,
}

impl PathGate {
    pub fn new(mode: SecurityMode, base_dir: PathBuf) -> Self {
        Self { mode, base_dir, allow_dirs: Vec::new(), allow_files: Vec::new() }
    }

    /// Canonicalize `path` and decide whether it may be accessed under the
    /// current policy. Returns the canonical path on success.
    ///
    /// Pure function of (path, mode, base_dir, allow_dirs, allow_files):
    /// calling it twice with the same inputs yields the same result.
    pub fn check(&self, path: &Path) -> CoreResult<(PathBuf, Option<PathWarning>)> {
        if has_nul_or_empty_component(path) {
            return Err(CoreError::PathInvalid {
                path: path.to_path_buf(),
                reason: "path contains an empty or NUL component".into(),
            });
        }

        let canonical = canonicalize_bounded(path)?;

        match self.mode {
            SecurityMode::Permissive => Ok((canonical, None)),
            SecurityMode::Warn => {
                if self.is_within_allowed(&canonical) {
                    Ok((canonical, None))
                } else {
                    let warning = PathWarning {
                        path: canonical.clone(),
                        reason: "outside base directory and allow-list".into(),
                    };
                    Ok((canonical, Some(warning)))
                }
            }
            SecurityMode::Strict => {
                if self.is_within_allowed(&canonical) {
                    Ok((canonical, None))
                } else {
                    Err(CoreError::PathDenied {
                        path: canonical,
                        reason: "outside base directory and allow-list under strict mode".into(),
                    })
                }
            }
        }
    }

    fn is_within_allowed(&self, canonical: &Path) -> bool {
        if let Ok(base) = self.base_dir.canonicalize() {
            if canonical.starts_with(&base) {
                return true;
            }
        }
        for dir in &self.allow_dirs {
            if let Ok(dir) = dir.canonicalize() {
                if canonical.starts_with(&dir) {
                    return true;
                }
            }
        }
        for file in &self.allow_files {
            if let Ok(file) = file.canonicalize() {
                if canonical == file {
                    return true;
                }
            }
        }
        false
    }
}

fn has_nul_or_empty_component(path: &Path) -> bool {
    path.components().any(|c| {
        let s = c.as_os_str();
        s.is_empty() || s.to_string_lossy().contains('\0')
    })
}

/// Resolve `.`, `..`, and symlinks manually so we can bound the chain length
/// and detect loops, rather than relying on `fs::canonicalize`'s OS-level
/// (unbounded) resolution.
fn canonicalize_bounded(path: &Path) -> CoreResult<PathBuf> {
    let mut depth = 0u32;
    let mut current = if path.is_absolute() {
        PathBuf::new()
    } else {
        std::env::current_dir().map_err(|e| CoreError::Io { path: path.to_path_buf(), source: e })?
    };

    for component in path.components() {
        use std::path::Component;
        match component {
            Component::Prefix(p) => current.push(p.as_os_str()),
            Component::RootDir => current.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                current.pop();
            }
            Component::Normal(part) => {
                current.push(part);
                current = resolve_symlinks(&current, &mut depth)?;
            }
        }
    }

    fs::metadata(&current).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            CoreError::PathInvalid { path: path.to_path_buf(), reason: "does not exist".into() }
        } else {
            CoreError::Io { path: path.to_path_buf(), source: e }
        }
    })?;

    Ok(current)
}

/// Follow symlinks at `path`, bumping `depth` for each hop, up to
/// `MAX_SYMLINK_DEPTH`. A chain of exactly that length is accepted; one
/// longer raises `SymlinkLoop` (spec §8 boundary behavior).
fn resolve_symlinks(path: &Path, depth: &mut u32) -> CoreResult<PathBuf> {
    let mut current = path.to_path_buf();
    let mut seen = std::collections::HashSet::new();

    loop {
        let meta = match fs::symlink_metadata(&current) {
            Ok(m) => m,
            Err(_) => return Ok(current),
        };
        if !meta.file_type().is_symlink() {
            return Ok(current);
        }

        *depth += 1;
        if *depth > MAX_SYMLINK_DEPTH {
            return Err(CoreError::SymlinkLoop { path: path.to_path_buf() });
        }
        if !seen.insert(current.clone()) {
            return Err(CoreError::SymlinkLoop { path: path.to_path_buf() });
        }

        let target = fs::read_link(&current)
            .map_err(|e| CoreError::Io { path: current.clone(), source: e })?;
        current = if target.is_absolute() {
            target
        } else {
            current.parent().unwrap_or(Path::new("/")).join(target)
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    #[test]
    fn strict_mode_denies_outside_base() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("base");
        fs::create_dir(&base).unwrap();
        let outside = tmp.path().join("outside.txt");
        File::create(&outside).unwrap();

        let gate = PathGate::new(SecurityMode::Strict, base);
        let err = gate.check(&outside).unwrap_err();
        assert!(matches!(err, CoreError::PathDenied { .. }));
    }

    #[test]
    fn strict_mode_allows_under_base() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("base");
        fs::create_dir(&base).unwrap();
        let inside = base.join("inside.txt");
        File::create(&inside).unwrap();

        let gate = PathGate::new(SecurityMode::Strict, base);
        let (canonical, warning) = gate.check(&inside).unwrap();
        assert!(canonical.ends_with("inside.txt"));
        assert!(warning.is_none());
    }

    #[test]
    fn warn_mode_allows_but_records_warning() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("base");
        fs::create_dir(&base).unwrap();
        let outside = tmp.path().join("outside.txt");
        File::create(&outside).unwrap();

        let gate = PathGate::new(SecurityMode::Warn, base);
        let (_, warning) = gate.check(&outside).unwrap();
        assert!(warning.is_some());
    }

    #[test]
    fn rejects_nul_component() {
        let gate = PathGate::new(SecurityMode::Permissive, PathBuf::from("."));
        let bad = PathBuf::from("foo\0bar");
        let err = gate.check(&bad).unwrap_err();
        assert!(matches!(err, CoreError::PathInvalid { .. }));
    }
}
