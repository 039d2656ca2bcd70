//! Template-facing read-only views over `FileRef`/`DirRef`/`CollectionRef`
//! (spec §9 "Attachment-to-template exposure").
//!
//! minijinja's `Object::get_value` cannot itself return a `Result`, so a
//! fallible attribute access (`content`, `hash`) that fails records the real
//! error into a shared slot and returns `None`; the render layer prefers
//! that recorded error over minijinja's generic "undefined attribute" one.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use minijinja::value::{Enumerator, Object, Value};

use crate::attachment::{ContentCache, DirRef, FileRef};
use crate::error::CoreError;

pub(super) type ErrorSlot = Arc<Mutex<Option<CoreError>>>;
pub(super) type DeferredSlot = Arc<Mutex<Vec<String>>>;

pub(super) fn record_error(slot: &ErrorSlot, err: CoreError) {
    let mut guard = slot.lock().expect("template error slot poisoned");
    if guard.is_none() {
        *guard = Some(err);
    }
}

fn format_mtime(mtime_ns: i128) -> String {
    let secs = (mtime_ns / 1_000_000_000) as i64;
    let nanos = (mtime_ns.rem_euclid(1_000_000_000)) as u32;
    match chrono::DateTime::from_timestamp(secs, nanos) {
        Some(dt) => dt.to_rfc3339(),
        None => String::new(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum RenderPhase {
    Validation,
    Final,
}

#[derive(Debug)]
pub(super) struct FileObject {
    file: FileRef,
    cache: Arc<ContentCache>,
    max_file_size: Option<u64>,
    content_allowed: bool,
    alias: String,
    phase: RenderPhase,
    errors: ErrorSlot,
    deferred: DeferredSlot,
}

impl FileObject {
    pub(super) fn value(
        file: FileRef,
        cache: Arc<ContentCache>,
        max_file_size: Option<u64>,
        content_allowed: bool,
        alias: String,
        phase: RenderPhase,
        errors: ErrorSlot,
        deferred: DeferredSlot,
    ) -> Value {
        Value::from_object(Self { file, cache, max_file_size, content_allowed, alias, phase, errors, deferred })
    }

    fn content_value(&self) -> Option<Value> {
        if !self.content_allowed {
            record_error(&self.errors, CoreError::ContentNotAvailable { alias: self.alias.clone() });
            return None;
        }
        match self.file.content(&self.cache, self.max_file_size) {
            Ok(s) => Some(Value::from(s.to_string())),
            Err(CoreError::LimitExceeded { .. }) if self.phase == RenderPhase::Validation => {
                self.deferred.lock().expect("deferred slot poisoned").push(self.alias.clone());
                Some(Value::from(""))
            }
            Err(e) => {
                record_error(&self.errors, e);
                None
            }
        }
    }
}

impl Object for FileObject {
    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        match key.as_str()? {
            "path" => Some(Value::from(self.file.path.display().to_string())),
            "name" => Some(Value::from(self.file.name.clone())),
            "stem" => Some(Value::from(self.file.stem.clone())),
            "extension" => Some(Value::from(self.file.extension.clone())),
            "parent" => Some(Value::from(self.file.parent.display().to_string())),
            "size" => Some(Value::from(self.file.size)),
            "mtime" => Some(Value::from(format_mtime(self.file.mtime_ns))),
            "encoding" => Some(Value::from(self.file.encoding())),
            "hash" => match self.file.hash() {
                Ok(h) => Some(Value::from(h)),
                Err(e) => {
                    record_error(&self.errors, e);
                    None
                }
            },
            "content" => self.content_value(),
            _ => None,
        }
    }

    fn enumerate(self: &Arc<Self>) -> Enumerator {
        Enumerator::Str(&[
            "path", "name", "stem", "extension", "parent", "size", "mtime", "encoding", "content", "hash",
        ])
    }
}

#[derive(Debug)]
pub(super) struct DirObject {
    dir: DirRef,
    files: Vec<Value>,
}

impl DirObject {
    pub(super) fn value(
        dir: DirRef,
        cache: Arc<ContentCache>,
        max_file_size: Option<u64>,
        content_allowed: bool,
        alias: String,
        phase: RenderPhase,
        errors: ErrorSlot,
        deferred: DeferredSlot,
    ) -> Value {
        let files = dir
            .files
            .iter()
            .cloned()
            .map(|f| {
                FileObject::value(
                    f,
                    Arc::clone(&cache),
                    max_file_size,
                    content_allowed,
                    alias.clone(),
                    phase,
                    Arc::clone(&errors),
                    Arc::clone(&deferred),
                )
            })
            .collect();
        Value::from_object(Self { dir, files })
    }
}

fn parent_of(path: &std::path::Path) -> PathBuf {
    path.parent().unwrap_or(std::path::Path::new("")).to_path_buf()
}

impl Object for DirObject {
    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        match key.as_str()? {
            "path" => Some(Value::from(self.dir.path.display().to_string())),
            "name" => Some(Value::from(self.dir.name.clone())),
            "parent" => Some(Value::from(parent_of(&self.dir.path).display().to_string())),
            "files" => Some(Value::from(self.files.clone())),
            _ => None,
        }
    }

    fn enumerate(self: &Arc<Self>) -> Enumerator {
        Enumerator::Str(&["path", "name", "parent", "files"])
    }
}

#[derive(Debug)]
pub(super) struct CollectionObject {
    files: Vec<Value>,
}

impl CollectionObject {
    pub(super) fn value(
        collection: crate::attachment::CollectionRef,
        cache: Arc<ContentCache>,
        max_file_size: Option<u64>,
        content_allowed: bool,
        alias: String,
        phase: RenderPhase,
        errors: ErrorSlot,
        deferred: DeferredSlot,
    ) -> Value {
        let files = collection
            .files
            .iter()
            .cloned()
            .map(|f| {
                FileObject::value(
                    f,
                    Arc::clone(&cache),
                    max_file_size,
                    content_allowed,
                    alias.clone(),
                    phase,
                    Arc::clone(&errors),
                    Arc::clone(&deferred),
                )
            })
            .collect();
        Value::from_object(Self { files })
    }
}

impl Object for CollectionObject {
    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        match key.as_str()? {
            "files" => Some(Value::from(self.files.clone())),
            _ => None,
        }
    }

    fn enumerate(self: &Arc<Self>) -> Enumerator {
        Enumerator::Str(&["files"])
    }
}
