//! `FileRef`/`DirRef`/`CollectionRef` and the `AttachmentRegistry` that owns
//! them (spec §3, §4.2).

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use globset::{Glob, GlobSetBuilder};
use sha2::{Digest, Sha256};

use super::{Attachment, AttachmentSpec, Kind, Target};
use crate::error::{CoreError, CoreResult};
use crate::path_security::{PathGate, PathWarning};

/// A lazy handle to a single file's bytes and metadata (spec §3 "FileRef").
#[derive(Debug, Clone)]
pub struct FileRef {
    pub path: PathBuf,
    pub name: String,
    pub stem: String,
    pub extension: String,
    pub parent: PathBuf,
    pub size: u64,
    pub mtime_ns: i128,
    encoding: Arc<OnceLock<String>>,
}

impl FileRef {
    fn from_path(path: &Path) -> CoreResult<Self> {
        let meta = fs::metadata(path).map_err(|e| CoreError::Io { path: path.to_path_buf(), source: e })?;
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let stem = path.file_stem().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let extension = path.extension().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let parent = path.parent().unwrap_or(Path::new("")).to_path_buf();
        let mtime_ns = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_nanos() as i128)
            .unwrap_or(0);

        Ok(Self {
            path: path.to_path_buf(),
            name,
            stem,
            extension,
            parent,
            size: meta.len(),
            mtime_ns,
            encoding: Arc::new(OnceLock::new()),
        })
    }

    /// Read the file's content as a string, subject to `max_file_size`
    /// (spec §3 FileRef invariant, §8 boundary: `max_file_size+1` ->
    /// `LimitExceeded` at content access, not at registration).
    pub fn content(
        &self,
        cache: &super::ContentCache,
        max_file_size: Option<u64>,
    ) -> CoreResult<Arc<str>> {
        if let Some(max) = max_file_size {
            if self.size > max {
                return Err(CoreError::LimitExceeded {
                    what: format!(
                        "{} is {} bytes, exceeds max_file_size {}",
                        self.path.display(),
                        self.size,
                        max
                    ),
                });
            }
        }

        let path = self.path.clone();
        let encoding = Arc::clone(&self.encoding);
        cache
            .get_or_insert_with(&self.path, self.mtime_ns, self.size, move || {
                let bytes = fs::read(&path)?;
                match String::from_utf8(bytes.clone()) {
                    Ok(s) => {
                        let _ = encoding.set("utf-8".to_string());
                        Ok(s)
                    }
                    Err(_) => {
                        let _ = encoding.set("utf-8-lossy".to_string());
                        Ok(String::from_utf8_lossy(&bytes).into_owned())
                    }
                }
            })
            .map_err(|e| CoreError::Io { path: self.path.clone(), source: e })
    }

    /// Detected encoding. Populated as a side effect of the first
    /// `content()` call; `"unknown"` before that.
    pub fn encoding(&self) -> String {
        self.encoding.get().cloned().unwrap_or_else(|| "unknown".to_string())
    }

    /// Lazy SHA-256 of the raw file bytes (not subject to `max_file_size`:
    /// hashing streams the file rather than buffering it as a template
    /// value).
    pub fn hash(&self) -> CoreResult<String> {
        let mut file =
            fs::File::open(&self.path).map_err(|e| CoreError::Io { path: self.path.clone(), source: e })?;
        let mut hasher = Sha256::new();
        std::io::copy(&mut file, &mut hasher)
            .map_err(|e| CoreError::Io { path: self.path.clone(), source: e })?;
        Ok(format!("{:x}", hasher.finalize()))
    }
}

/// A lazy handle to a directory: structural attributes plus an ordered,
/// deterministic list of matching `FileRef`s (spec §3 "DirRef").
#[derive(Debug, Clone)]
pub struct DirRef {
    pub path: PathBuf,
    pub name: String,
    pub parent: PathBuf,
    /// Lexicographic by relative path, per spec §4.2 "Directory expansion".
    pub files: Vec<FileRef>,
}

impl DirRef {
    fn from_path(path: &Path, pattern: &str, recursive: bool, gate: &PathGate) -> CoreResult<Self> {
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let parent = path.parent().unwrap_or(Path::new("")).to_path_buf();

        let glob = Glob::new(pattern)
            .map_err(|e| CoreError::InvalidSpec { reason: format!("invalid pattern '{pattern}': {e}") })?;
        let mut builder = GlobSetBuilder::new();
        builder.add(glob);
        let globset = builder
            .build()
            .map_err(|e| CoreError::InvalidSpec { reason: format!("invalid pattern '{pattern}': {e}") })?;

        let mut walker = ignore::WalkBuilder::new(path);
        walker.max_depth(if recursive { None } else { Some(1) });
        walker.follow_links(!matches!(gate.mode, crate::path_security::SecurityMode::Strict));

        let mut matches: Vec<(String, PathBuf)> = Vec::new();
        for entry in walker.build() {
            let entry = match entry {
                Ok(e) => e,
                Err(_) => continue,
            };
            if entry.path() == path {
                continue;
            }
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let rel = entry.path().strip_prefix(path).unwrap_or(entry.path());
            let rel_str = rel.to_string_lossy().replace('\\', "/");
            if globset.is_match(&rel_str) {
                matches.push((rel_str, entry.path().to_path_buf()));
            }
        }
        matches.sort_by(|a, b| a.0.cmp(&b.0));

        let mut files = Vec::with_capacity(matches.len());
        for (_, abs_path) in matches {
            files.push(FileRef::from_path(&abs_path)?);
        }

        Ok(Self { path: path.to_path_buf(), name, parent, files })
    }
}

/// An ordered sequence of `FileRef`s produced from an explicit list file
/// (spec §3 "CollectionRef", §6 "Collection list": one path per line, blank
/// lines and `#` comments ignored).
#[derive(Debug, Clone)]
pub struct CollectionRef {
    pub files: Vec<FileRef>,
}

impl CollectionRef {
    fn from_list_file(list_path: &Path, base_dir: &Path) -> CoreResult<Self> {
        let text = fs::read_to_string(list_path)
            .map_err(|e| CoreError::Io { path: list_path.to_path_buf(), source: e })?;

        let mut files = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let entry_path = PathBuf::from(line);
            let entry_path =
                if entry_path.is_absolute() { entry_path } else { base_dir.join(entry_path) };
            files.push(FileRef::from_path(&entry_path)?);
        }
        Ok(Self { files })
    }
}

#[derive(Debug, Clone)]
pub(crate) enum RefData {
    File(FileRef),
    Dir(DirRef),
    Collection(CollectionRef),
}

struct Entry {
    attachment: Attachment,
    data: RefData,
}

/// Owns all `Attachment`s, `FileRef`s, `DirRef`s, `CollectionRef`s for a run
/// (spec §3 "AttachmentRegistry").
#[derive(Default)]
pub struct AttachmentRegistry {
    entries: BTreeMap<String, Entry>,
    cache: Arc<super::ContentCache>,
    max_file_size: Option<u64>,
}

impl AttachmentRegistry {
    pub fn new(cache: Arc<super::ContentCache>, max_file_size: Option<u64>) -> Self {
        Self { entries: BTreeMap::new(), cache, max_file_size }
    }

    pub fn max_file_size(&self) -> Option<u64> {
        self.max_file_size
    }

    pub fn cache(&self) -> &super::ContentCache {
        &self.cache
    }

    pub(crate) fn cache_handle(&self) -> Arc<super::ContentCache> {
        Arc::clone(&self.cache)
    }

    /// All `(Attachment, RefData)` pairs, in alias order — used by the
    /// template engine to build the render context in one pass.
    pub(crate) fn entries_for_template(&self) -> impl Iterator<Item = (&Attachment, &RefData)> {
        self.entries.values().map(|e| (&e.attachment, &e.data))
    }

    /// Register one attachment spec, validating its path through the
    /// Path-Security Gate and expanding dirs/collections (spec §4.2 `add`).
    pub fn add(
        &mut self,
        spec: AttachmentSpec,
        gate: &PathGate,
    ) -> CoreResult<(&Attachment, Option<PathWarning>)> {
        let alias = match &spec.alias {
            Some(a) => a.clone(),
            None => {
                let basename = spec
                    .path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| spec.path.to_string_lossy().into_owned());
                super::derive_alias(&basename)
            }
        };

        if self.entries.contains_key(&alias) {
            return Err(CoreError::AliasConflict { alias });
        }

        let (canonical, warning) = gate.check(&spec.path)?;

        let data = match spec.kind {
            Kind::File => {
                if canonical.is_dir() {
                    return Err(CoreError::InvalidSpec {
                        reason: format!("'{}' is a directory, expected a file", canonical.display()),
                    });
                }
                RefData::File(FileRef::from_path(&canonical)?)
            }
            Kind::Dir => {
                let pattern = spec
                    .pattern
                    .clone()
                    .unwrap_or_else(|| if spec.recursive { "**/*".to_string() } else { "*".to_string() });
                RefData::Dir(DirRef::from_path(&canonical, &pattern, spec.recursive, gate)?)
            }
            Kind::Collection => {
                let base = canonical.parent().unwrap_or(Path::new(".")).to_path_buf();
                RefData::Collection(CollectionRef::from_list_file(&canonical, &base)?)
            }
        };

        let attachment = Attachment {
            alias: alias.clone(),
            path: canonical,
            kind: spec.kind,
            targets: spec.targets,
            pattern: spec.pattern,
            recursive: spec.recursive,
            explicit_name: spec.explicit_name,
        };

        self.entries.insert(alias.clone(), Entry { attachment, data });
        let entry = self.entries.get(&alias).expect("just inserted");
        Ok((&entry.attachment, warning))
    }

    pub fn attachments(&self) -> impl Iterator<Item = &Attachment> {
        self.entries.values().map(|e| &e.attachment)
    }

    pub fn by_alias(&self, name: &str) -> CoreResult<(&Attachment, &RefData)> {
        self.entries
            .get(name)
            .map(|e| (&e.attachment, &e.data))
            .ok_or_else(|| CoreError::UnknownAlias { alias: name.to_string() })
    }

    /// All `FileRef`s routed to `target`, ordered by alias then relative
    /// path within a directory (spec §4.2 `files_for`, §5 ordering).
    pub fn files_for(&self, target: Target) -> Vec<(&Attachment, &FileRef)> {
        let mut out = Vec::new();
        for entry in self.entries.values() {
            if !entry.attachment.has_target(target) {
                continue;
            }
            match &entry.data {
                RefData::File(f) => out.push((&entry.attachment, f)),
                RefData::Dir(d) => out.extend(d.files.iter().map(|f| (&entry.attachment, f))),
                RefData::Collection(c) => out.extend(c.files.iter().map(|f| (&entry.attachment, f))),
            }
        }
        out
    }

    /// Per-target `{count, total_bytes}` (spec §4.2 `summary`).
    pub fn summary(&self) -> BTreeMap<Target, (usize, u64)> {
        let mut summary: BTreeMap<Target, (usize, u64)> = BTreeMap::new();
        for target in [Target::Prompt, Target::CodeExec, Target::Retrieval, Target::UserData] {
            let files = self.files_for(target);
            let total_bytes: u64 = files.iter().map(|(_, f)| f.size).sum();
            summary.insert(target, (files.len(), total_bytes));
        }
        summary
    }

    /// Reads an attachment's content honoring the template visibility rule
    /// (spec §4.2: `ContentNotAvailable` unless `prompt` is among the
    /// attachment's targets). Directory/collection attachments return the
    /// concatenation of their constituent files in order.
    pub fn content_for_alias(&self, alias: &str) -> CoreResult<Arc<str>> {
        let (attachment, data) = self.by_alias(alias)?;
        if !attachment.has_target(Target::Prompt) {
            return Err(CoreError::ContentNotAvailable { alias: alias.to_string() });
        }
        match data {
            RefData::File(f) => f.content(&self.cache, self.max_file_size),
            RefData::Dir(d) => {
                let mut joined = String::new();
                for f in &d.files {
                    joined.push_str(&f.content(&self.cache, self.max_file_size)?);
                    joined.push('\n');
                }
                Ok(Arc::from(joined.into_boxed_str()))
            }
            RefData::Collection(c) => {
                let mut joined = String::new();
                for f in &c.files {
                    joined.push_str(&f.content(&self.cache, self.max_file_size)?);
                    joined.push('\n');
                }
                Ok(Arc::from(joined.into_boxed_str()))
            }
        }
    }
}
