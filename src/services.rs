//! Collaborator contracts: the narrow slices of remote document, storage and
//! spreadsheet APIs the pipeline needs.
//!
//! Each worker identity opens its own [`ServiceSession`] through a
//! [`SessionFactory`], so quota and rate limits are spread across
//! identities. Implementations must be `Send + Sync`: sessions are shared
//! with spawned worker tasks.
//!
//! [`crate::local::LocalBackend`] implements every trait over a directory
//! tree; tests provide in-memory doubles.

use crate::column::Column;
use crate::config::TemplateKind;
use crate::error::CertError;
use crate::identity::WorkerIdentity;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// A failed remote call. Carries only the provider's message.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct ServiceError(pub String);

impl From<String> for ServiceError {
    fn from(s: String) -> Self {
        ServiceError(s)
    }
}

impl From<&str> for ServiceError {
    fn from(s: &str) -> Self {
        ServiceError(s.to_string())
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Remote type of a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Folder,
    Document,
    Presentation,
    Spreadsheet,
    Other(String),
}

impl FileKind {
    /// Template kind for a describable file, `None` when it cannot be a template.
    pub fn template_kind(&self) -> Option<TemplateKind> {
        match self {
            FileKind::Document => Some(TemplateKind::Document),
            FileKind::Presentation => Some(TemplateKind::Presentation),
            _ => None,
        }
    }
}

/// Filter for [`StorageService::list_children`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChildFilter {
    #[default]
    All,
    /// Folders only.
    Folders,
    /// Folders plus documents and presentations.
    Documents,
    /// Folders plus spreadsheets.
    Spreadsheets,
}

impl ChildFilter {
    pub fn accepts(&self, kind: &FileKind) -> bool {
        match self {
            ChildFilter::All => true,
            ChildFilter::Folders => *kind == FileKind::Folder,
            ChildFilter::Documents => matches!(
                kind,
                FileKind::Folder | FileKind::Document | FileKind::Presentation
            ),
            ChildFilter::Spreadsheets => {
                matches!(kind, FileKind::Folder | FileKind::Spreadsheet)
            }
        }
    }
}

/// One entry of a folder listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    pub id: String,
    pub name: String,
    pub kind: FileKind,
}

/// Sort folders first, then by case-insensitive name.
pub fn sort_listing(files: &mut [RemoteFile]) {
    files.sort_by_key(|f| (f.kind != FileKind::Folder, f.name.to_lowercase()));
}

/// Result of an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uploaded {
    pub id: String,
    /// Shareable link written back to the sheet.
    pub link: String,
}

/// One find-and-replace pair, matched case-sensitively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replacement {
    pub find: String,
    pub replace_with: String,
}

/// A rectangular block of rows to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRange {
    /// 1-based first row.
    pub first_row: usize,
    /// 1-based last row, `None` for the data's natural end.
    pub last_row: Option<usize>,
    pub first_column: Column,
    pub last_column: Column,
}

impl CellRange {
    /// Header row only.
    pub fn header(last_column: Column) -> Self {
        CellRange {
            first_row: 1,
            last_row: Some(1),
            first_column: Column::A,
            last_column,
        }
    }
}

impl fmt::Display for CellRange {
    /// A1 notation: `A2:Z` or `A2:Z1000`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}:{}", self.first_column, self.first_row, self.last_column)?;
        if let Some(last) = self.last_row {
            write!(f, "{last}")?;
        }
        Ok(())
    }
}

#[async_trait]
pub trait DocumentService: Send + Sync {
    /// Copy `template` into `folder` under `name`; returns the copy's id.
    async fn duplicate(&self, template: &str, folder: &str, name: &str) -> ServiceResult<String>;

    /// Replace every occurrence of each `find` text.
    async fn substitute_all(
        &self,
        doc: &str,
        kind: TemplateKind,
        replacements: &[Replacement],
    ) -> ServiceResult<()>;

    /// Render to the portable fixed-layout format.
    async fn export_portable(&self, doc: &str) -> ServiceResult<Vec<u8>>;

    /// Permanently delete. Deleting a missing file succeeds.
    async fn delete(&self, doc: &str) -> ServiceResult<()>;

    /// Hide without destroying (move to trash).
    async fn trash(&self, doc: &str) -> ServiceResult<()>;

    async fn describe(&self, file: &str) -> ServiceResult<FileKind>;

    /// Plain text of a document, for placeholder detection.
    async fn read_text(&self, doc: &str, kind: TemplateKind) -> ServiceResult<String>;
}

#[async_trait]
pub trait StorageService: Send + Sync {
    async fn upload(&self, bytes: Vec<u8>, name: &str, folder: &str) -> ServiceResult<Uploaded>;

    async fn list_children(&self, folder: &str, filter: ChildFilter)
        -> ServiceResult<Vec<RemoteFile>>;
}

#[async_trait]
pub trait TabularService: Send + Sync {
    /// Rows of the range, top to bottom. Rows may be shorter than the range
    /// (trailing empty cells omitted) and trailing empty rows may be absent.
    async fn read_range(&self, source: &str, range: &CellRange) -> ServiceResult<Vec<Vec<String>>>;

    async fn write_cell(
        &self,
        source: &str,
        row: usize,
        column: Column,
        text: &str,
    ) -> ServiceResult<()>;
}

/// Service handles opened for one identity.
#[derive(Clone)]
pub struct ServiceSession {
    pub documents: Arc<dyn DocumentService>,
    pub storage: Arc<dyn StorageService>,
    pub sheets: Arc<dyn TabularService>,
}

impl fmt::Debug for ServiceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceSession").finish_non_exhaustive()
    }
}

/// Opens a [`ServiceSession`] for a worker identity.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self, identity: &WorkerIdentity) -> Result<ServiceSession, CertError>;
}
