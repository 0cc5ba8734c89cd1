//! Filesystem-backed services.
//!
//! Every reference is a path relative to the backend root:
//!
//! * spreadsheets are JSON files `{"rows": [["A1", "B1"], ["A2"]]}`;
//! * templates are UTF-8 text files, and "export" yields the substituted
//!   text bytes;
//! * uploads land in the destination folder and get the link
//!   `<public_base_url><relative path>`;
//! * trashing moves a file into a `.trash/` directory next to it.
//!
//! File writes go through a temp file and a rename, so a crash never
//! leaves a half-written sheet. Sheet writes are serialised by one lock.

use crate::column::Column;
use crate::config::TemplateKind;
use crate::error::CertError;
use crate::identity::WorkerIdentity;
use crate::services::{
    sort_listing, CellRange, ChildFilter, DocumentService, FileKind, RemoteFile, Replacement,
    ServiceError, ServiceResult, ServiceSession, SessionFactory, StorageService, TabularService,
    Uploaded,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Link prefix used when none is configured.
pub const DEFAULT_PUBLIC_BASE_URL: &str = "http://localhost/";

/// Directory receiving trashed files.
pub const TRASH_DIR: &str = ".trash";

/// On-disk spreadsheet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workbook {
    #[serde(default)]
    pub rows: Vec<Vec<String>>,
}

struct Inner {
    root: PathBuf,
    public_base_url: String,
    sheet_lock: Mutex<()>,
}

/// Services over a directory tree. Clones share the same root and lock.
#[derive(Clone)]
pub struct LocalBackend {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for LocalBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalBackend")
            .field("root", &self.inner.root)
            .field("public_base_url", &self.inner.public_base_url)
            .finish()
    }
}

fn io_err(path: &Path, e: std::io::Error) -> ServiceError {
    ServiceError(format!("{}: {}", path.display(), e))
}

impl LocalBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_public_base_url(root, DEFAULT_PUBLIC_BASE_URL)
    }

    pub fn with_public_base_url(root: impl Into<PathBuf>, base: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                root: root.into(),
                public_base_url: base.into(),
                sheet_lock: Mutex::new(()),
            }),
        }
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// All three services in one session.
    pub fn session(&self) -> ServiceSession {
        ServiceSession {
            documents: Arc::new(self.clone()),
            storage: Arc::new(self.clone()),
            sheets: Arc::new(self.clone()),
        }
    }

    /// Map a reference to a path under the root. Empty, `.` and `root`
    /// mean the root itself; absolute paths and `..` are rejected.
    fn resolve(&self, id: &str) -> ServiceResult<PathBuf> {
        let id = id.trim();
        if id.is_empty() || id == "." || id == "root" {
            return Ok(self.inner.root.clone());
        }
        let rel = Path::new(id);
        if !rel.components().all(|c| matches!(c, Component::Normal(_))) {
            return Err(ServiceError(format!("invalid reference '{id}'")));
        }
        Ok(self.inner.root.join(rel))
    }

    /// Reference for `path`, relative to the root with `/` separators.
    fn reference(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.inner.root).unwrap_or(path);
        rel.components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/")
    }

    pub async fn load_workbook(&self, source: &str) -> ServiceResult<Workbook> {
        let path = self.resolve(source)?;
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| io_err(&path, e))?;
        serde_json::from_str(&text).map_err(|e| ServiceError(format!("{}: {}", path.display(), e)))
    }

    pub async fn save_workbook(&self, source: &str, workbook: &Workbook) -> ServiceResult<()> {
        let path = self.resolve(source)?;
        let json = serde_json::to_vec_pretty(workbook).map_err(|e| ServiceError(e.to_string()))?;
        write_atomic(&path, &json).await
    }
}

/// Write via `<path>.tmp` and rename.
async fn write_atomic(path: &Path, bytes: &[u8]) -> ServiceResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| io_err(parent, e))?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| io_err(&tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| io_err(path, e))
}

/// Strip path separators and control characters from a display name.
fn file_stem(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    match cleaned.trim() {
        "" | "." | ".." => "untitled".to_string(),
        s => s.to_string(),
    }
}

fn kind_of(path: &Path, is_dir: bool) -> FileKind {
    if is_dir {
        return FileKind::Folder;
    }
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "json" => FileKind::Spreadsheet,
        "txt" | "md" | "html" | "doc" | "docx" => FileKind::Document,
        "slides" | "ppt" | "pptx" => FileKind::Presentation,
        _ => FileKind::Other(ext),
    }
}

#[async_trait]
impl DocumentService for LocalBackend {
    async fn duplicate(&self, template: &str, folder: &str, name: &str) -> ServiceResult<String> {
        let src = self.resolve(template)?;
        let dir = self.resolve(folder)?;
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| io_err(&dir, e))?;
        let suffix = src
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let prefix = format!("{}-", file_stem(name));

        // A uniquely named, persisted file to copy into.
        let dest = tokio::task::spawn_blocking({
            let dir = dir.clone();
            move || {
                tempfile::Builder::new()
                    .prefix(&prefix)
                    .suffix(&suffix)
                    .tempfile_in(&dir)
                    .and_then(|f| f.keep().map_err(|e| e.error))
                    .map(|(_, path)| path)
            }
        })
        .await
        .map_err(|e| ServiceError(format!("copy task failed: {e}")))?
        .map_err(|e| io_err(&dir, e))?;

        if let Err(e) = tokio::fs::copy(&src, &dest).await {
            let _ = tokio::fs::remove_file(&dest).await;
            return Err(io_err(&src, e));
        }
        debug!("Duplicated {} → {}", src.display(), dest.display());
        Ok(self.reference(&dest))
    }

    async fn substitute_all(
        &self,
        doc: &str,
        _kind: TemplateKind,
        replacements: &[Replacement],
    ) -> ServiceResult<()> {
        let path = self.resolve(doc)?;
        let mut text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| io_err(&path, e))?;
        for r in replacements.iter().filter(|r| !r.find.is_empty()) {
            text = text.replace(&r.find, &r.replace_with);
        }
        write_atomic(&path, text.as_bytes()).await
    }

    async fn export_portable(&self, doc: &str) -> ServiceResult<Vec<u8>> {
        let path = self.resolve(doc)?;
        tokio::fs::read(&path).await.map_err(|e| io_err(&path, e))
    }

    async fn delete(&self, doc: &str) -> ServiceResult<()> {
        let path = self.resolve(doc)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(&path, e)),
        }
    }

    async fn trash(&self, doc: &str) -> ServiceResult<()> {
        let path = self.resolve(doc)?;
        let parent = path.parent().unwrap_or(self.inner.root.as_path());
        let bin = parent.join(TRASH_DIR);
        tokio::fs::create_dir_all(&bin)
            .await
            .map_err(|e| io_err(&bin, e))?;
        let target = bin.join(path.file_name().unwrap_or_default());
        tokio::fs::rename(&path, &target)
            .await
            .map_err(|e| io_err(&path, e))
    }

    async fn describe(&self, file: &str) -> ServiceResult<FileKind> {
        let path = self.resolve(file)?;
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| io_err(&path, e))?;
        Ok(kind_of(&path, meta.is_dir()))
    }

    async fn read_text(&self, doc: &str, _kind: TemplateKind) -> ServiceResult<String> {
        let path = self.resolve(doc)?;
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| io_err(&path, e))
    }
}

#[async_trait]
impl StorageService for LocalBackend {
    async fn upload(&self, bytes: Vec<u8>, name: &str, folder: &str) -> ServiceResult<Uploaded> {
        let dir = self.resolve(folder)?;
        let path = dir.join(file_stem(name));
        write_atomic(&path, &bytes).await?;
        let id = self.reference(&path);
        Ok(Uploaded {
            link: format!("{}{}", self.inner.public_base_url, id),
            id,
        })
    }

    async fn list_children(
        &self,
        folder: &str,
        filter: ChildFilter,
    ) -> ServiceResult<Vec<RemoteFile>> {
        let dir = self.resolve(folder)?;
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| io_err(&dir, e))?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| io_err(&dir, e))? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            let path = entry.path();
            let kind = kind_of(&path, is_dir);
            if filter.accepts(&kind) {
                files.push(RemoteFile {
                    id: self.reference(&path),
                    name,
                    kind,
                });
            }
        }
        sort_listing(&mut files);
        Ok(files)
    }
}

#[async_trait]
impl TabularService for LocalBackend {
    async fn read_range(&self, source: &str, range: &CellRange) -> ServiceResult<Vec<Vec<String>>> {
        let workbook = self.load_workbook(source).await?;
        let first = range.first_row.max(1) - 1;
        let last = range
            .last_row
            .unwrap_or(workbook.rows.len())
            .min(workbook.rows.len());
        let (c0, c1) = (range.first_column.index(), range.last_column.index());
        Ok(workbook
            .rows
            .get(first..last.max(first))
            .unwrap_or_default()
            .iter()
            .map(|row| {
                row.iter()
                    .skip(c0)
                    .take(c1.saturating_sub(c0) + 1)
                    .cloned()
                    .collect()
            })
            .collect())
    }

    async fn write_cell(
        &self,
        source: &str,
        row: usize,
        column: Column,
        text: &str,
    ) -> ServiceResult<()> {
        if row == 0 {
            return Err(ServiceError("rows are 1-based".into()));
        }
        let _guard = self.inner.sheet_lock.lock().await;
        let mut workbook = self.load_workbook(source).await?;
        if workbook.rows.len() < row {
            workbook.rows.resize_with(row, Vec::new);
        }
        let cells = &mut workbook.rows[row - 1];
        if cells.len() <= column.index() {
            cells.resize(column.index() + 1, String::new());
        }
        cells[column.index()] = text.to_string();
        self.save_workbook(source, &workbook).await
    }
}

#[async_trait]
impl SessionFactory for LocalBackend {
    async fn open(&self, identity: &WorkerIdentity) -> Result<ServiceSession, CertError> {
        debug!("Opening local session for {}", identity.label());
        Ok(self.session())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn references_cannot_escape_root() {
        let backend = LocalBackend::new("/tmp/root");
        assert!(backend.resolve("../etc/passwd").is_err());
        assert!(backend.resolve("/etc/passwd").is_err());
        assert_eq!(backend.resolve("").unwrap(), PathBuf::from("/tmp/root"));
        assert_eq!(
            backend.resolve("out/a.txt").unwrap(),
            PathBuf::from("/tmp/root/out/a.txt")
        );
    }

    #[test]
    fn file_stems_are_flat() {
        assert_eq!(file_stem("Dept/احمد.pdf"), "Dept_احمد.pdf");
        assert_eq!(file_stem("  "), "untitled");
    }

    #[test]
    fn kinds_by_extension() {
        assert_eq!(kind_of(Path::new("a.json"), false), FileKind::Spreadsheet);
        assert_eq!(kind_of(Path::new("a.TXT"), false), FileKind::Document);
        assert_eq!(kind_of(Path::new("a.slides"), false), FileKind::Presentation);
        assert_eq!(kind_of(Path::new("dir"), true), FileKind::Folder);
    }
}
