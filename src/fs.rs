// Oasis Gate - Filesystem Sandbox
// Copyright 2026 Joseph Stone - All Rights Reserved
//
// Real filesystem access confined to a fixed set of allowed roots.
// Provides: exists, stat, list, read, write, mkdir, move, delete, find, complete
// Every path is resolved nominal-then-real: expand ~, join cwd, normalize,
// then follow symlinks (or the deepest existing ancestor) before the
// containment check. Reads and writes act on the realized path; delete and
// move act on the entry itself, so a symlink is removed or moved as a link.

use crate::config::FsConfig;
use crate::error::{GateError, Result};
use crate::paths::{expand_home, normalize_lexical};
use base64::Engine;
use chrono::{DateTime, Utc};
use globset::{GlobBuilder, GlobMatcher};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashSet, VecDeque};
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;

// ============================================================================
// CONSTANTS
// ============================================================================

const MAX_SYMLINK_HOPS: usize = 40;
const MAX_COMPLETIONS: usize = 100;

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    File,
    Dir,
    Symlink,
    Other,
}

impl FileType {
    fn from_std(ft: std::fs::FileType) -> Self {
        if ft.is_symlink() {
            FileType::Symlink
        } else if ft.is_dir() {
            FileType::Dir
        } else if ft.is_file() {
            FileType::File
        } else {
            FileType::Other
        }
    }
}

/// An absolute, symlink-resolved directory boundary
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SandboxRoot {
    pub path: PathBuf,
}

/// Per-call resolution result. Never cached.
#[derive(Debug, Clone)]
pub struct ResolvedPath {
    /// Realized path: symlinks followed, checked for containment, operated on
    pub absolute: PathBuf,
    /// Client path after ~ expansion, cwd join and lexical normalization
    pub nominal: PathBuf,
    pub root: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExistsInfo {
    pub exists: bool,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub file_type: Option<FileType>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatInfo {
    pub path: String,
    pub size: u64,
    pub mtime: Option<String>,
    #[serde(rename = "type")]
    pub file_type: FileType,
}

#[derive(Debug, Clone, Serialize)]
pub struct DirEntry {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub file_type: FileType,
    pub size: u64,
    pub mtime: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentEncoding {
    Utf8,
    Base64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadOutput {
    pub content: String,
    pub encoding: ContentEncoding,
    pub size: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteOutput {
    pub path: String,
    pub bytes_written: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MkdirOutput {
    pub path: String,
    pub created: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MoveOutput {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteOutput {
    pub path: String,
    #[serde(rename = "type")]
    pub file_type: FileType,
}

#[derive(Debug, Clone, Serialize)]
pub struct FindMatch {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub file_type: FileType,
}

#[derive(Debug, Clone, Serialize)]
pub struct FindOutput {
    pub results: Vec<FindMatch>,
    pub truncated: bool,
}

#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub max_results: Option<usize>,
    pub include_hidden: bool,
    /// Extra names to skip, on top of the configured exclusions
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompleteOutput {
    pub completions: Vec<String>,
}

// ============================================================================
// SANDBOX
// ============================================================================

pub struct Sandbox {
    roots: Vec<SandboxRoot>,
    limits: FsConfig,
}

impl Sandbox {
    /// Realize every root entry. Missing roots are skipped with a warning;
    /// nested roots collapse into their outermost ancestor.
    pub fn new(entries: &[String], limits: FsConfig) -> anyhow::Result<Self> {
        let mut realized: Vec<PathBuf> = Vec::new();
        for entry in entries {
            let expanded = expand_home(entry.trim());
            if !expanded.is_absolute() {
                log::warn!("Ignoring relative sandbox root {:?}", entry);
                continue;
            }
            match std::fs::canonicalize(&expanded) {
                Ok(p) if p.is_dir() => realized.push(p),
                Ok(p) => log::warn!("Ignoring sandbox root {:?}: not a directory", p),
                Err(e) => log::warn!("Ignoring sandbox root {:?}: {}", expanded, e),
            }
        }

        realized.sort_by_key(|p| p.components().count());
        let mut roots: Vec<SandboxRoot> = Vec::new();
        for path in realized {
            if roots.iter().any(|r| path.starts_with(&r.path)) {
                log::debug!("Sandbox root {:?} already covered", path);
                continue;
            }
            roots.push(SandboxRoot { path });
        }

        if roots.is_empty() {
            anyhow::bail!("no usable sandbox roots in {:?}", entries);
        }
        for root in &roots {
            log::info!("Sandbox root: {:?}", root.path);
        }
        Ok(Self { roots, limits })
    }

    pub fn roots(&self) -> &[SandboxRoot] {
        &self.roots
    }

    // ========================================================================
    // RESOLUTION
    // ========================================================================

    /// Resolve a client path and check containment.
    pub async fn resolve(&self, input: &str, cwd: Option<&str>) -> Result<ResolvedPath> {
        let nominal = nominal_path(input, cwd)?;
        let absolute = realize(&nominal).await?;
        match self.owning_root(&absolute) {
            Some(root) => Ok(ResolvedPath { absolute, nominal, root: root.path.clone() }),
            None => Err(GateError::bad_request(format!(
                "path outside allowed roots: {} (resolves to {})",
                input,
                absolute.display()
            ))),
        }
    }

    /// Resolve for operations on the directory entry itself. Containment is
    /// checked on the fully realized path first; the returned entry path
    /// realizes only the parent, so a final symlink component is not followed.
    async fn resolve_entry(&self, input: &str, cwd: Option<&str>) -> Result<(ResolvedPath, PathBuf)> {
        let resolved = self.resolve(input, cwd).await?;
        let entry = match (resolved.nominal.parent(), resolved.nominal.file_name()) {
            (Some(parent), Some(name)) => realize(parent).await?.join(name),
            _ => resolved.absolute.clone(),
        };
        if self.owning_root(&entry).is_none() && !self.is_root(&resolved.absolute) {
            return Err(GateError::bad_request(format!(
                "path outside allowed roots: {} (entry at {})",
                input,
                entry.display()
            )));
        }
        Ok((resolved, entry))
    }

    fn owning_root(&self, real: &Path) -> Option<&SandboxRoot> {
        self.roots.iter().find(|r| real.starts_with(&r.path))
    }

    fn is_root(&self, real: &Path) -> bool {
        self.roots.iter().any(|r| r.path == real)
    }

    // ========================================================================
    // CORE OPERATIONS
    // ========================================================================

    pub async fn exists(&self, path: &str, cwd: Option<&str>) -> Result<ExistsInfo> {
        let resolved = self.resolve(path, cwd).await?;
        if fs::metadata(&resolved.absolute).await.is_err() {
            return Ok(ExistsInfo { exists: false, file_type: None });
        }
        let file_type = match fs::symlink_metadata(&resolved.nominal).await {
            Ok(meta) => FileType::from_std(meta.file_type()),
            Err(_) => type_of(&resolved.absolute).await?,
        };
        Ok(ExistsInfo { exists: true, file_type: Some(file_type) })
    }

    pub async fn stat(&self, path: &str, cwd: Option<&str>) -> Result<StatInfo> {
        let resolved = self.resolve(path, cwd).await?;
        let meta = fs::metadata(&resolved.absolute).await
            .map_err(|e| GateError::from_io(&format!("stat {}", path), e))?;
        let file_type = match fs::symlink_metadata(&resolved.nominal).await {
            Ok(lmeta) if lmeta.file_type().is_symlink() => FileType::Symlink,
            _ => FileType::from_std(meta.file_type()),
        };
        Ok(StatInfo {
            path: display(&resolved.absolute),
            size: meta.len(),
            mtime: format_mtime(meta.modified().ok()),
            file_type,
        })
    }

    /// List a directory, sorted by name. Dotfiles hidden unless requested.
    pub async fn list(&self, path: &str, include_hidden: bool, cwd: Option<&str>) -> Result<Vec<DirEntry>> {
        let resolved = self.resolve(path, cwd).await?;
        let mut reader = fs::read_dir(&resolved.absolute).await
            .map_err(|e| GateError::from_io(&format!("list {}", path), e))?;

        let mut entries = Vec::new();
        loop {
            let entry = match reader.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => return Err(GateError::from_io(&format!("list {}", path), e)),
            };
            let name = entry.file_name().to_string_lossy().to_string();
            if !include_hidden && name.starts_with('.') {
                continue;
            }
            let meta = match fs::symlink_metadata(entry.path()).await {
                Ok(m) => m,
                // Vanished between readdir and lstat
                Err(_) => continue,
            };
            entries.push(DirEntry {
                path: display(&entry.path()),
                file_type: FileType::from_std(meta.file_type()),
                size: meta.len(),
                mtime: format_mtime(meta.modified().ok()),
                name,
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    pub async fn read(&self, path: &str, cwd: Option<&str>) -> Result<ReadOutput> {
        let resolved = self.resolve(path, cwd).await?;
        let meta = fs::metadata(&resolved.absolute).await
            .map_err(|e| GateError::from_io(&format!("read {}", path), e))?;

        if meta.is_dir() {
            return Err(GateError::bad_request(format!("is a directory: {}", path)));
        }
        if meta.len() > self.limits.max_read_bytes {
            return Err(GateError::bad_request(format!(
                "file too large: {} bytes (max {})",
                meta.len(),
                self.limits.max_read_bytes
            )));
        }

        let data = fs::read(&resolved.absolute).await
            .map_err(|e| GateError::from_io(&format!("read {}", path), e))?;
        let sha256 = sha256_hex(&data);
        let size = data.len() as u64;

        let (content, encoding) = match String::from_utf8(data) {
            Ok(text) => (text, ContentEncoding::Utf8),
            Err(e) => (
                base64::engine::general_purpose::STANDARD.encode(e.as_bytes()),
                ContentEncoding::Base64,
            ),
        };
        Ok(ReadOutput { content, encoding, size, sha256 })
    }

    /// Write a file. Parent must already exist; no implicit mkdir.
    pub async fn write(&self, path: &str, data: &[u8], cwd: Option<&str>) -> Result<WriteOutput> {
        let resolved = self.resolve(path, cwd).await?;

        if let Ok(meta) = fs::metadata(&resolved.absolute).await {
            if meta.is_dir() {
                return Err(GateError::bad_request(format!("is a directory: {}", path)));
            }
        }
        require_parent_dir(&resolved.absolute, path).await?;

        fs::write(&resolved.absolute, data).await
            .map_err(|e| GateError::from_io(&format!("write {}", path), e))?;

        log::debug!("Wrote {} bytes to {:?}", data.len(), resolved.absolute);
        Ok(WriteOutput {
            path: display(&resolved.absolute),
            bytes_written: data.len() as u64,
            sha256: sha256_hex(data),
        })
    }

    pub async fn mkdir(&self, path: &str, recursive: bool, cwd: Option<&str>) -> Result<MkdirOutput> {
        let resolved = self.resolve(path, cwd).await?;

        if let Ok(meta) = fs::metadata(&resolved.absolute).await {
            if meta.is_dir() && recursive {
                return Ok(MkdirOutput { path: display(&resolved.absolute), created: false });
            }
            return Err(GateError::bad_request(format!("already exists: {}", path)));
        }

        let created = if recursive {
            fs::create_dir_all(&resolved.absolute).await
        } else {
            fs::create_dir(&resolved.absolute).await
        };
        created.map_err(|e| GateError::from_io(&format!("mkdir {}", path), e))?;

        Ok(MkdirOutput { path: display(&resolved.absolute), created: true })
    }

    /// Move/rename. Both endpoints must independently satisfy containment.
    /// A symlink source moves the link; a symlink destination is replaced.
    pub async fn rename(&self, from: &str, to: &str, overwrite: bool, cwd: Option<&str>) -> Result<MoveOutput> {
        let (source, source_entry) = self.resolve_entry(from, cwd).await?;
        let (dest, dest_entry) = self.resolve_entry(to, cwd).await?;

        let source_meta = fs::symlink_metadata(&source_entry).await
            .map_err(|e| GateError::from_io(&format!("move {}", from), e))?;

        if self.is_root(&source.absolute) || self.is_root(&source_entry)
            || self.is_root(&dest.absolute) || self.is_root(&dest_entry)
        {
            return Err(GateError::bad_request("cannot move a sandbox root"));
        }
        if source_entry == dest_entry {
            return Ok(MoveOutput { from: display(&source_entry), to: display(&dest_entry) });
        }
        if source_meta.is_dir() && dest_entry.starts_with(&source_entry) {
            return Err(GateError::bad_request(format!("cannot move {} into itself", from)));
        }
        if fs::symlink_metadata(&dest_entry).await.is_ok() && !overwrite {
            return Err(GateError::bad_request(format!("destination exists: {}", to)));
        }
        require_parent_dir(&dest_entry, to).await?;

        match fs::rename(&source_entry, &dest_entry).await {
            Ok(()) => {}
            Err(e) if is_cross_device(&e) && source_meta.is_file() => {
                fs::copy(&source_entry, &dest_entry).await
                    .map_err(|e| GateError::from_io(&format!("move {}", from), e))?;
                fs::remove_file(&source_entry).await
                    .map_err(|e| GateError::from_io(&format!("move {}", from), e))?;
            }
            Err(e) => return Err(GateError::from_io(&format!("move {}", from), e)),
        }

        Ok(MoveOutput { from: display(&source_entry), to: display(&dest_entry) })
    }

    /// Delete the entry itself. A symlink is unlinked; its target is untouched.
    pub async fn delete(&self, path: &str, recursive: bool, cwd: Option<&str>) -> Result<DeleteOutput> {
        let (resolved, entry) = self.resolve_entry(path, cwd).await?;
        if self.is_root(&resolved.absolute) || self.is_root(&entry) {
            return Err(GateError::bad_request("cannot delete a sandbox root"));
        }

        let meta = fs::symlink_metadata(&entry).await
            .map_err(|e| GateError::from_io(&format!("delete {}", path), e))?;
        let file_type = FileType::from_std(meta.file_type());

        let removed = match (file_type, recursive) {
            (FileType::Dir, true) => fs::remove_dir_all(&entry).await,
            (FileType::Dir, false) => fs::remove_dir(&entry).await,
            _ => fs::remove_file(&entry).await,
        };
        removed.map_err(|e| GateError::from_io(&format!("delete {}", path), e))?;

        Ok(DeleteOutput { path: display(&entry), file_type })
    }

    // ========================================================================
    // SEARCH
    // ========================================================================

    /// Breadth-first name search with an explicit work queue.
    /// Symlinked directories are reported but never descended into.
    pub async fn find(&self, root_dir: &str, query: &str, opts: FindOptions, cwd: Option<&str>) -> Result<FindOutput> {
        let resolved = self.resolve(root_dir, cwd).await?;
        let meta = fs::metadata(&resolved.absolute).await
            .map_err(|e| GateError::from_io(&format!("find {}", root_dir), e))?;
        if !meta.is_dir() {
            return Err(GateError::bad_request(format!("not a directory: {}", root_dir)));
        }

        let max = opts.max_results.unwrap_or(self.limits.default_find_results).max(1);
        let excluded: HashSet<&str> = self.limits.find_exclude.iter()
            .chain(opts.exclude.iter())
            .map(String::as_str)
            .collect();
        let matcher = NameMatcher::new(query)?;

        let mut results = Vec::new();
        let mut queue = VecDeque::from([resolved.absolute.clone()]);

        while let Some(dir) = queue.pop_front() {
            let mut reader = match fs::read_dir(&dir).await {
                Ok(r) => r,
                Err(e) if dir == resolved.absolute => {
                    return Err(GateError::from_io(&format!("find {}", root_dir), e));
                }
                Err(e) => {
                    log::debug!("find: skipping {:?}: {}", dir, e);
                    continue;
                }
            };

            let mut batch = Vec::new();
            while let Ok(Some(entry)) = reader.next_entry().await {
                batch.push(entry);
            }
            batch.sort_by_key(|e| e.file_name());

            for entry in batch {
                let name = entry.file_name().to_string_lossy().to_string();
                if !opts.include_hidden && name.starts_with('.') {
                    continue;
                }
                if excluded.contains(name.as_str()) {
                    continue;
                }
                let file_type = match entry.file_type().await {
                    Ok(ft) => FileType::from_std(ft),
                    Err(_) => continue,
                };

                if matcher.matches(&name) {
                    if results.len() >= max {
                        return Ok(FindOutput { results, truncated: true });
                    }
                    results.push(FindMatch { name, path: display(&entry.path()), file_type });
                }
                if file_type == FileType::Dir {
                    queue.push_back(entry.path());
                }
            }
        }

        Ok(FindOutput { results, truncated: false })
    }

    /// Complete a partially typed path against its directory's entries.
    pub async fn complete(&self, input: &str, cwd: Option<&str>) -> Result<CompleteOutput> {
        let split_at = input.rfind(|c: char| c == '/' || (cfg!(windows) && c == '\\'));
        let (dir_part, prefix) = match split_at {
            Some(idx) => (&input[..=idx], &input[idx + 1..]),
            None => ("", input),
        };
        let lookup = if dir_part.is_empty() { "." } else { dir_part };

        let resolved = self.resolve(lookup, cwd).await?;
        let mut reader = match fs::read_dir(&resolved.absolute).await {
            Ok(r) => r,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(CompleteOutput { completions: Vec::new() });
            }
            Err(e) => return Err(GateError::from_io(&format!("complete {}", input), e)),
        };

        let show_hidden = prefix.starts_with('.');
        let mut matches: Vec<(String, bool)> = Vec::new();
        while let Ok(Some(entry)) = reader.next_entry().await {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with(prefix) || (!show_hidden && name.starts_with('.')) {
                continue;
            }
            // Follow symlinks here: a link to a directory completes like one
            let is_dir = fs::metadata(entry.path()).await.map(|m| m.is_dir()).unwrap_or(false);
            matches.push((name, is_dir));
        }
        matches.sort();

        let completions = matches.into_iter()
            .take(MAX_COMPLETIONS)
            .map(|(name, is_dir)| {
                let suffix = if is_dir { "/" } else { "" };
                format!("{}{}{}", dir_part, name, suffix)
            })
            .collect();
        Ok(CompleteOutput { completions })
    }
}

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Expand ~, join cwd, normalize. Rejects empty and NUL-bearing input.
fn nominal_path(input: &str, cwd: Option<&str>) -> Result<PathBuf> {
    if input.trim().is_empty() {
        return Err(GateError::bad_request("path must not be empty"));
    }
    if input.contains('\0') || cwd.is_some_and(|c| c.contains('\0')) {
        return Err(GateError::bad_request("path contains NUL byte"));
    }

    let expanded = expand_home(input);
    let joined = if expanded.is_absolute() {
        expanded
    } else {
        let base = match cwd {
            Some(c) => {
                let base = expand_home(c);
                if !base.is_absolute() {
                    return Err(GateError::bad_request(format!("cwd must be absolute: {}", c)));
                }
                base
            }
            None => std::env::current_dir()
                .map_err(|e| GateError::internal(format!("cannot determine cwd: {}", e)))?,
        };
        base.join(expanded)
    };
    Ok(normalize_lexical(&joined))
}

/// Follow symlinks. For paths that do not exist yet, resolve the deepest
/// existing ancestor and re-append the remaining components. A dangling
/// symlink is chased to its target so a write cannot land outside a root.
async fn realize(nominal: &Path) -> Result<PathBuf> {
    let mut current = nominal.to_path_buf();
    let mut tail: Vec<OsString> = Vec::new();
    let mut hops = 0usize;

    loop {
        match fs::canonicalize(&current).await {
            Ok(real) => {
                let mut out = real;
                for name in tail.iter().rev() {
                    out.push(name);
                }
                return Ok(out);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if let Ok(meta) = fs::symlink_metadata(&current).await {
                    if meta.file_type().is_symlink() {
                        hops += 1;
                        if hops > MAX_SYMLINK_HOPS {
                            return Err(GateError::bad_request(format!(
                                "too many symlink hops resolving {}",
                                nominal.display()
                            )));
                        }
                        let target = fs::read_link(&current).await
                            .map_err(|e| GateError::from_io("readlink", e))?;
                        let base = current.parent().map(Path::to_path_buf).unwrap_or_default();
                        current = normalize_lexical(&base.join(target));
                        continue;
                    }
                }
                match current.file_name() {
                    Some(name) => tail.push(name.to_os_string()),
                    None => {
                        return Err(GateError::bad_request(format!(
                            "cannot resolve path: {}",
                            nominal.display()
                        )))
                    }
                }
                if !current.pop() {
                    return Err(GateError::bad_request(format!(
                        "cannot resolve path: {}",
                        nominal.display()
                    )));
                }
            }
            Err(e) => {
                return Err(GateError::from_io(&format!("resolve {}", nominal.display()), e));
            }
        }
    }
}

async fn require_parent_dir(target: &Path, client_path: &str) -> Result<()> {
    let parent = target.parent()
        .ok_or_else(|| GateError::bad_request(format!("no parent directory: {}", client_path)))?;
    match fs::metadata(parent).await {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(GateError::bad_request(format!("parent is not a directory: {}", client_path))),
        Err(_) => Err(GateError::bad_request(format!(
            "parent directory does not exist: {} (create it with fs_mkdir first)",
            client_path
        ))),
    }
}

async fn type_of(path: &Path) -> Result<FileType> {
    let meta = fs::symlink_metadata(path).await
        .map_err(|e| GateError::from_io("stat", e))?;
    Ok(FileType::from_std(meta.file_type()))
}

fn is_cross_device(err: &io::Error) -> bool {
    // EXDEV
    cfg!(unix) && err.raw_os_error() == Some(18)
}

fn display(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn format_mtime(modified: Option<SystemTime>) -> Option<String> {
    modified.map(|t| DateTime::<Utc>::from(t).to_rfc3339())
}

/// SHA256 hash as hex string
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Case-insensitive name predicate: glob when the query has glob syntax,
/// substring otherwise
enum NameMatcher {
    Glob(GlobMatcher),
    Substring(String),
}

impl NameMatcher {
    fn new(query: &str) -> Result<Self> {
        if !query.contains(['*', '?', '[', '{']) {
            return Ok(NameMatcher::Substring(query.to_lowercase()));
        }
        let glob = GlobBuilder::new(query)
            .case_insensitive(true)
            .literal_separator(true)
            .build()
            .map_err(|e| GateError::bad_request(format!("invalid pattern '{}': {}", query, e)))?;
        Ok(NameMatcher::Glob(glob.compile_matcher()))
    }

    fn matches(&self, name: &str) -> bool {
        match self {
            NameMatcher::Glob(glob) => glob.is_match(name),
            NameMatcher::Substring(needle) => name.to_lowercase().contains(needle.as_str()),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, TempDir};

    fn sandbox_over(dir: &TempDir) -> Sandbox {
        let root = dir.path().to_string_lossy().to_string();
        Sandbox::new(&[root], FsConfig::default()).unwrap()
    }

    fn p(dir: &TempDir, rel: &str) -> String {
        dir.path().join(rel).to_string_lossy().to_string()
    }

    fn assert_bad_request<T: std::fmt::Debug>(result: Result<T>) {
        match result {
            Err(GateError::BadRequest { .. }) => {}
            other => panic!("expected BAD_REQUEST, got {:?}", other),
        }
    }

    #[test]
    fn test_name_matcher() {
        let m = |pat: &str, s: &str| NameMatcher::new(pat).unwrap().matches(s);
        assert!(m("*.rs", "main.rs"));
        assert!(m("*.RS", "Main.rs"));
        assert!(m("ma?n.*", "main.rs"));
        assert!(m("*a*b*", "xxaxxbxx"));
        assert!(!m("*.rs", "main.rst"));
        assert!(m("[lm]*.rs", "lib.rs"));
        assert!(!m("[lm]*.rs", "mod.txt"));
        assert!(m("*.{toml,lock}", "Cargo.lock"));
        assert!(m("READ", "readme.md"));
        assert!(!m("READ", "notes.md"));

        assert!(matches!(NameMatcher::new("[abc"), Err(GateError::BadRequest { .. })));
        assert!(matches!(NameMatcher::new("{a,b"), Err(GateError::BadRequest { .. })));
    }

    #[test]
    fn nested_roots_collapse() -> anyhow::Result<()> {
        let dir = tempdir()?;
        std::fs::create_dir(dir.path().join("inner"))?;
        let sandbox = Sandbox::new(
            &[p(&dir, "inner"), p(&dir, ""), p(&dir, "missing")],
            FsConfig::default(),
        )?;
        assert_eq!(sandbox.roots().len(), 1);
        assert_eq!(sandbox.roots()[0].path, dir.path().canonicalize()?);
        Ok(())
    }

    #[tokio::test]
    async fn round_trip_mkdir_write_read_move() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let sb = sandbox_over(&dir);

        sb.mkdir(&p(&dir, "t"), true, None).await?;
        let written = sb.write(&p(&dir, "t/a.txt"), b"hello", None).await?;
        assert_eq!(written.bytes_written, 5);

        let read = sb.read(&p(&dir, "t/a.txt"), None).await?;
        assert_eq!(read.content, "hello");
        assert_eq!(read.encoding, ContentEncoding::Utf8);
        assert_eq!(read.sha256, written.sha256);

        sb.rename(&p(&dir, "t/a.txt"), &p(&dir, "t/b.txt"), false, None).await?;
        assert_bad_request(sb.read(&p(&dir, "t/a.txt"), None).await);
        assert_eq!(sb.read(&p(&dir, "t/b.txt"), None).await?.content, "hello");
        assert!(!sb.exists(&p(&dir, "t/a.txt"), None).await?.exists);
        Ok(())
    }

    #[tokio::test]
    async fn rejects_paths_outside_roots() -> anyhow::Result<()> {
        let root = tempdir()?;
        let outside = tempdir()?;
        std::fs::write(outside.path().join("secret.txt"), "s")?;
        let sb = sandbox_over(&root);

        let escaped = format!("{}/../{}/secret.txt",
            root.path().display(),
            outside.path().file_name().unwrap().to_string_lossy());
        assert_bad_request(sb.read(&p(&outside, "secret.txt"), None).await);
        assert_bad_request(sb.exists(&p(&outside, "secret.txt"), None).await);
        assert_bad_request(sb.write(&p(&outside, "new.txt"), b"x", None).await);
        assert_bad_request(sb.mkdir(&p(&outside, "d"), true, None).await);
        assert_bad_request(sb.delete(&p(&outside, "secret.txt"), false, None).await);
        assert_bad_request(sb.list(&p(&outside, ""), false, None).await);
        assert_bad_request(sb.read(&escaped, None).await);
        assert!(outside.path().join("secret.txt").exists());
        assert!(!outside.path().join("new.txt").exists());
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlink_inside_root_cannot_escape() -> anyhow::Result<()> {
        use std::os::unix::fs::symlink;
        let root = tempdir()?;
        let outside = tempdir()?;
        std::fs::write(outside.path().join("secret.txt"), "s")?;
        symlink(outside.path(), root.path().join("door"))?;
        symlink(outside.path().join("planted.txt"), root.path().join("dangling"))?;
        let sb = sandbox_over(&root);

        assert_bad_request(sb.read(&p(&root, "door/secret.txt"), None).await);
        assert_bad_request(sb.write(&p(&root, "door/new.txt"), b"x", None).await);
        assert_bad_request(sb.write(&p(&root, "dangling"), b"x", None).await);
        assert_bad_request(sb.delete(&p(&root, "door"), true, None).await);
        assert!(!outside.path().join("new.txt").exists());
        assert!(!outside.path().join("planted.txt").exists());
        assert!(outside.path().join("secret.txt").exists());
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlink_within_root_is_followed() -> anyhow::Result<()> {
        use std::os::unix::fs::symlink;
        let root = tempdir()?;
        std::fs::write(root.path().join("real.txt"), "data")?;
        symlink(root.path().join("real.txt"), root.path().join("link.txt"))?;
        let sb = sandbox_over(&root);

        assert_eq!(sb.read(&p(&root, "link.txt"), None).await?.content, "data");
        let info = sb.exists(&p(&root, "link.txt"), None).await?;
        assert_eq!(info.file_type, Some(FileType::Symlink));
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn delete_and_move_act_on_the_link_not_its_target() -> anyhow::Result<()> {
        use std::os::unix::fs::symlink;
        let root = tempdir()?;
        std::fs::write(root.path().join("real.txt"), "data")?;
        std::fs::create_dir_all(root.path().join("project/src"))?;
        std::fs::write(root.path().join("project/src/main.rs"), "fn main() {}")?;
        std::fs::write(root.path().join("a.txt"), "a")?;
        symlink(root.path().join("real.txt"), root.path().join("link.txt"))?;
        symlink(root.path().join("project"), root.path().join("shortcut"))?;
        symlink(root.path().join("a.txt"), root.path().join("alias"))?;
        let sb = sandbox_over(&root);

        let out = sb.delete(&p(&root, "link.txt"), false, None).await?;
        assert_eq!(out.file_type, FileType::Symlink);
        assert!(out.path.ends_with("link.txt"));
        assert!(std::fs::symlink_metadata(root.path().join("link.txt")).is_err());
        assert_eq!(std::fs::read_to_string(root.path().join("real.txt"))?, "data");

        let out = sb.delete(&p(&root, "shortcut"), true, None).await?;
        assert_eq!(out.file_type, FileType::Symlink);
        assert!(std::fs::symlink_metadata(root.path().join("shortcut")).is_err());
        assert!(root.path().join("project/src/main.rs").exists());

        let moved = sb.rename(&p(&root, "alias"), &p(&root, "renamed"), false, None).await?;
        assert!(moved.to.ends_with("renamed"));
        assert!(std::fs::symlink_metadata(root.path().join("alias")).is_err());
        assert!(std::fs::symlink_metadata(root.path().join("renamed"))?.file_type().is_symlink());
        assert_eq!(std::fs::read_to_string(root.path().join("a.txt"))?, "a");
        Ok(())
    }

    #[tokio::test]
    async fn listing_is_sorted_and_hides_dotfiles() -> anyhow::Result<()> {
        let dir = tempdir()?;
        for name in ["zeta.txt", "alpha.txt", ".hidden", "mid"] {
            if name == "mid" {
                std::fs::create_dir(dir.path().join(name))?;
            } else {
                std::fs::write(dir.path().join(name), name)?;
            }
        }
        let sb = sandbox_over(&dir);

        let first = sb.list(&p(&dir, ""), false, None).await?;
        let names: Vec<&str> = first.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["alpha.txt", "mid", "zeta.txt"]);
        assert_eq!(first[1].file_type, FileType::Dir);

        let second = sb.list(&p(&dir, ""), false, None).await?;
        let again: Vec<&str> = second.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, again);

        let hidden = sb.list(&p(&dir, ""), true, None).await?;
        assert_eq!(hidden[0].name, ".hidden");
        Ok(())
    }

    #[tokio::test]
    async fn move_out_of_root_leaves_source_intact() -> anyhow::Result<()> {
        let root = tempdir()?;
        let outside = tempdir()?;
        std::fs::write(root.path().join("keep.txt"), "original")?;
        let sb = sandbox_over(&root);

        assert_bad_request(sb.rename(&p(&root, "keep.txt"), &p(&outside, "keep.txt"), true, None).await);
        assert_eq!(std::fs::read_to_string(root.path().join("keep.txt"))?, "original");
        assert!(!outside.path().join("keep.txt").exists());
        Ok(())
    }

    #[tokio::test]
    async fn move_respects_overwrite_flag() -> anyhow::Result<()> {
        let dir = tempdir()?;
        std::fs::write(dir.path().join("a"), "a")?;
        std::fs::write(dir.path().join("b"), "b")?;
        let sb = sandbox_over(&dir);

        assert_bad_request(sb.rename(&p(&dir, "a"), &p(&dir, "b"), false, None).await);
        sb.rename(&p(&dir, "a"), &p(&dir, "b"), true, None).await?;
        assert_eq!(std::fs::read_to_string(dir.path().join("b"))?, "a");

        std::fs::create_dir(dir.path().join("d"))?;
        assert_bad_request(sb.rename(&p(&dir, "d"), &p(&dir, "d/inner"), false, None).await);
        Ok(())
    }

    #[tokio::test]
    async fn write_never_creates_parents() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let sb = sandbox_over(&dir);
        assert_bad_request(sb.write(&p(&dir, "missing/a.txt"), b"x", None).await);
        assert!(!dir.path().join("missing").exists());

        std::fs::create_dir(dir.path().join("folder"))?;
        assert_bad_request(sb.write(&p(&dir, "folder"), b"x", None).await);
        assert_bad_request(sb.read(&p(&dir, "folder"), None).await);
        Ok(())
    }

    #[tokio::test]
    async fn delete_rules() -> anyhow::Result<()> {
        let dir = tempdir()?;
        std::fs::create_dir_all(dir.path().join("full/sub"))?;
        std::fs::write(dir.path().join("full/sub/f"), "x")?;
        let sb = sandbox_over(&dir);

        assert_bad_request(sb.delete(&p(&dir, ""), true, None).await);
        assert_bad_request(sb.delete(&p(&dir, "full"), false, None).await);
        assert!(dir.path().join("full/sub/f").exists());

        let out = sb.delete(&p(&dir, "full"), true, None).await?;
        assert_eq!(out.file_type, FileType::Dir);
        assert!(!dir.path().join("full").exists());
        Ok(())
    }

    #[tokio::test]
    async fn mkdir_non_recursive_needs_parent() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let sb = sandbox_over(&dir);
        assert_bad_request(sb.mkdir(&p(&dir, "a/b"), false, None).await);
        assert!(sb.mkdir(&p(&dir, "a/b"), true, None).await?.created);
        assert!(!sb.mkdir(&p(&dir, "a/b"), true, None).await?.created);
        assert_bad_request(sb.mkdir(&p(&dir, "a/b"), false, None).await);
        Ok(())
    }

    #[tokio::test]
    async fn find_bounds_and_exclusions() -> anyhow::Result<()> {
        let dir = tempdir()?;
        std::fs::create_dir_all(dir.path().join("src/deep/deeper"))?;
        std::fs::create_dir_all(dir.path().join("node_modules/pkg"))?;
        std::fs::create_dir_all(dir.path().join(".cache"))?;
        std::fs::write(dir.path().join("src/main.rs"), "")?;
        std::fs::write(dir.path().join("src/deep/lib.rs"), "")?;
        std::fs::write(dir.path().join("src/deep/deeper/mod.rs"), "")?;
        std::fs::write(dir.path().join("node_modules/pkg/index.rs"), "")?;
        std::fs::write(dir.path().join(".cache/hidden.rs"), "")?;
        let sb = sandbox_over(&dir);

        let all = sb.find(&p(&dir, ""), "*.rs", FindOptions::default(), None).await?;
        let mut names: Vec<&str> = all.results.iter().map(|m| m.name.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["lib.rs", "main.rs", "mod.rs"]);
        assert!(!all.truncated);

        let capped = sb.find(&p(&dir, ""), ".RS", FindOptions { max_results: Some(2), ..Default::default() }, None).await?;
        assert_eq!(capped.results.len(), 2);
        assert!(capped.truncated);

        let exact = sb.find(&p(&dir, ""), "*.rs", FindOptions { max_results: Some(3), ..Default::default() }, None).await?;
        assert_eq!(exact.results.len(), 3);
        assert!(!exact.truncated);

        assert_bad_request(sb.find(&p(&dir, ""), "[unclosed", FindOptions::default(), None).await);

        let hidden = sb.find(&p(&dir, ""), "hidden", FindOptions {
            include_hidden: true,
            exclude: vec!["src".to_string()],
            ..Default::default()
        }, None).await?;
        assert_eq!(hidden.results.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn complete_prefix() -> anyhow::Result<()> {
        let dir = tempdir()?;
        std::fs::create_dir(dir.path().join("docs"))?;
        std::fs::write(dir.path().join("do.txt"), "")?;
        std::fs::write(dir.path().join("readme"), "")?;
        std::fs::write(dir.path().join(".dotfile"), "")?;
        let sb = sandbox_over(&dir);

        let base = format!("{}/", dir.path().display());
        let out = sb.complete(&format!("{}do", base), None).await?;
        assert_eq!(out.completions, vec![format!("{}do.txt", base), format!("{}docs/", base)]);

        let hidden = sb.complete(&format!("{}.d", base), None).await?;
        assert_eq!(hidden.completions, vec![format!("{}.dotfile", base)]);

        let rel = sb.complete("re", Some(&dir.path().to_string_lossy())).await?;
        assert_eq!(rel.completions, vec!["readme".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn malformed_paths_rejected() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let sb = sandbox_over(&dir);
        assert_bad_request(sb.stat("", None).await);
        assert_bad_request(sb.stat("a\0b", None).await);
        assert_bad_request(sb.stat("rel.txt", Some("relative/cwd")).await);
        Ok(())
    }

    #[tokio::test]
    async fn binary_content_reads_as_base64() -> anyhow::Result<()> {
        let dir = tempdir()?;
        std::fs::write(dir.path().join("bin"), [0xff, 0xfe, 0x00])?;
        let sb = sandbox_over(&dir);
        let out = sb.read(&p(&dir, "bin"), None).await?;
        assert_eq!(out.encoding, ContentEncoding::Base64);
        assert_eq!(out.content, "//4A");
        Ok(())
    }
}
