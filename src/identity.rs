//! Worker identities discovered from local credential files.
//!
//! Each identity is an independent account: the pool size bounds the number
//! of concurrent workers, and the identity's index picks its row bucket.

use crate::error::CertError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// File-name conventions for credential files.
pub const CREDENTIAL_PATTERNS: &[&str] = &["saedny-*.json", "service-account-*.json", "sa-*.json"];

static RE_CREDENTIAL: Lazy<Vec<Regex>> = Lazy::new(|| {
    CREDENTIAL_PATTERNS
        .iter()
        .filter_map(|p| Regex::new(&wildcard_to_regex(p)).ok())
        .collect()
});

/// Translate a `*` wildcard pattern into an anchored regex.
fn wildcard_to_regex(pattern: &str) -> String {
    let parts: Vec<String> = pattern.split('*').map(regex::escape).collect();
    format!("^{}$", parts.join(".*"))
}

/// Whether a file name follows one of the [`CREDENTIAL_PATTERNS`].
pub fn is_credential_file(name: &str) -> bool {
    RE_CREDENTIAL.iter().any(|re| re.is_match(name))
}

/// One account usable to open a service session.
#[derive(Debug, Clone)]
pub struct WorkerIdentity {
    index: usize,
    label: String,
    path: PathBuf,
    credential: Arc<serde_json::Value>,
}

impl WorkerIdentity {
    pub fn new(index: usize, label: impl Into<String>, credential: serde_json::Value) -> Self {
        let label = label.into();
        WorkerIdentity {
            index,
            path: PathBuf::from(&label),
            label,
            credential: Arc::new(credential),
        }
    }

    /// Stable position in the pool; selects the row bucket and limiter.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Raw credential document, opaque to the pipeline.
    pub fn credential(&self) -> &serde_json::Value {
        &self.credential
    }
}

/// Loaded identities, indexed `0..len`.
#[derive(Debug, Clone, Default)]
pub struct IdentityPool {
    identities: Vec<WorkerIdentity>,
}

/// Outcome of scanning a credentials directory.
#[derive(Debug)]
pub struct Discovery {
    pub pool: IdentityPool,
    /// Files that matched a pattern but could not be loaded.
    pub skipped: Vec<CertError>,
}

impl IdentityPool {
    pub fn from_identities(identities: Vec<WorkerIdentity>) -> Self {
        let identities = identities
            .into_iter()
            .enumerate()
            .map(|(i, mut id)| {
                id.index = i;
                id
            })
            .collect();
        IdentityPool { identities }
    }

    /// Load every credential file in `dir` matching the naming conventions.
    ///
    /// Files are de-duplicated and sorted by name so indices are stable
    /// between reloads. Unreadable or malformed files are skipped and
    /// reported in [`Discovery::skipped`]; finding no usable identity is an
    /// error.
    pub fn discover(dir: &Path) -> Result<Discovery, CertError> {
        let entries = std::fs::read_dir(dir).map_err(|e| CertError::io(dir, e))?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(is_credential_file)
            })
            .collect();
        files.sort();
        files.dedup();
        debug!("Found {} credential candidates in {}", files.len(), dir.display());

        let mut identities = Vec::with_capacity(files.len());
        let mut skipped = Vec::new();
        for path in files {
            match load_credential(&path) {
                Ok(credential) => {
                    let label = path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    info!("Loaded identity {}", label);
                    identities.push(WorkerIdentity {
                        index: identities.len(),
                        label,
                        path,
                        credential: Arc::new(credential),
                    });
                }
                Err(e) => {
                    warn!("{}", e);
                    skipped.push(e);
                }
            }
        }

        if identities.is_empty() {
            return Err(CertError::NoIdentities {
                dir: dir.to_path_buf(),
            });
        }
        Ok(Discovery {
            pool: IdentityPool { identities },
            skipped,
        })
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&WorkerIdentity> {
        self.identities.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorkerIdentity> {
        self.identities.iter()
    }
}

fn load_credential(path: &Path) -> Result<serde_json::Value, CertError> {
    let text = std::fs::read_to_string(path).map_err(|e| CertError::IdentityLoad {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let value: serde_json::Value =
        serde_json::from_str(&text).map_err(|e| CertError::IdentityLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    if !value.is_object() {
        return Err(CertError::IdentityLoad {
            path: path.to_path_buf(),
            reason: "credential must be a JSON object".into(),
        });
    }
    Ok(value)
}
