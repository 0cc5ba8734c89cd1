//! Remote render pipeline for one row.
//!
//! ```text
//! duplicate ─▶ settle ─▶ substitute ─▶ export ─▶ upload ─▶ cleanup
//! ```
//!
//! The transient copy is always cleaned up, on success and on failure.
//! Cleanup tries `cleanup_attempts` deletes, then trashes the copy, then
//! gives up with a warning; it never fails the row.

use crate::config::{GeneratorConfig, VariableSource};
use crate::error::RowError;
use crate::normalize::NameNormalizer;
use crate::pipeline::scan::Row;
use crate::services::{DocumentService, Replacement, ServiceSession, Uploaded};
use tokio::time::sleep;
use tracing::{debug, warn};

/// What happened to the transient copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    /// Deleted on the given attempt (1-based).
    Deleted { attempt: u32 },
    /// Every delete failed; the copy was moved to the trash instead.
    Trashed,
    /// Delete and trash both failed; the copy is left behind.
    Leaked { doc: String, detail: String },
}

/// A finished row: its upload and the fate of its working copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub uploaded: Uploaded,
    pub cleanup: CleanupOutcome,
}

/// Resolve every variable against `row`.
///
/// Column values are name-cleaned, literals pass through as-is. Unbound
/// variables contribute nothing.
pub fn build_replacements(
    config: &GeneratorConfig,
    normalizer: &NameNormalizer,
    row: &Row,
) -> Vec<Replacement> {
    config
        .variables
        .iter()
        .filter_map(|var| {
            let replace_with = match &var.source {
                VariableSource::Column { column: Some(col) } => {
                    normalizer.normalize(row.field(*col))
                }
                VariableSource::Column { column: None } => return None,
                VariableSource::Literal { value } => value.clone(),
            };
            Some(Replacement {
                find: var.token.clone(),
                replace_with,
            })
        })
        .collect()
}

/// Produce and upload the certificate for `row`, named `label`.
pub async fn render_row(
    session: &ServiceSession,
    config: &GeneratorConfig,
    normalizer: &NameNormalizer,
    row: &Row,
    label: &str,
) -> Result<Rendered, RowError> {
    let position = row.position;
    let template = config.template.as_deref().unwrap_or_default();
    let destination = config.destination_folder.as_deref().unwrap_or_default();
    let scratch = config.scratch_folder().unwrap_or(destination);

    let doc = session
        .documents
        .duplicate(template, scratch, label)
        .await
        .map_err(|e| RowError::Duplicate {
            position,
            detail: e.to_string(),
        })?;
    debug!("Row {}: working copy {}", position, doc);

    // Fresh copies are not always readable straight away.
    sleep(config.settle_delay()).await;

    let produced = produce(session, config, normalizer, row, &doc, label, destination).await;
    let cleanup = cleanup_copy(session.documents.as_ref(), config, &doc).await;
    if let CleanupOutcome::Leaked { detail, .. } = &cleanup {
        warn!("Row {}: could not remove working copy {}: {}", position, doc, detail);
    }

    produced.map(|uploaded| Rendered { uploaded, cleanup })
}

async fn produce(
    session: &ServiceSession,
    config: &GeneratorConfig,
    normalizer: &NameNormalizer,
    row: &Row,
    doc: &str,
    label: &str,
    destination: &str,
) -> Result<Uploaded, RowError> {
    let position = row.position;
    let replacements = build_replacements(config, normalizer, row);
    if !replacements.is_empty() {
        session
            .documents
            .substitute_all(doc, config.template_kind, &replacements)
            .await
            .map_err(|e| RowError::Substitute {
                position,
                detail: e.to_string(),
            })?;
    }

    let bytes = session
        .documents
        .export_portable(doc)
        .await
        .map_err(|e| RowError::Export {
            position,
            detail: e.to_string(),
        })?;
    debug!("Row {}: exported {} bytes", position, bytes.len());

    session
        .storage
        .upload(bytes, &format!("{label}.pdf"), destination)
        .await
        .map_err(|e| RowError::Upload {
            position,
            detail: e.to_string(),
        })
}

/// Remove the working copy: bounded deletes, then trash, then give up.
pub async fn cleanup_copy(
    documents: &dyn DocumentService,
    config: &GeneratorConfig,
    doc: &str,
) -> CleanupOutcome {
    let attempts = config.cleanup_attempts.max(1);
    let mut last_err = String::new();
    for attempt in 1..=attempts {
        sleep(config.cleanup_delay()).await;
        match documents.delete(doc).await {
            Ok(()) => return CleanupOutcome::Deleted { attempt },
            Err(e) => {
                debug!("Delete {} attempt {}/{} failed: {}", doc, attempt, attempts, e);
                last_err = e.to_string();
            }
        }
    }
    match documents.trash(doc).await {
        Ok(()) => CleanupOutcome::Trashed,
        Err(e) => CleanupOutcome::Leaked {
            doc: doc.to_string(),
            detail: format!("{last_err}; trash: {e}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::Column;
    use crate::config::{CleanupRules, TemplateKind, Variable};
    use crate::services::{FileKind, ServiceResult};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Documents whose first `failing_deletes` deletes fail.
    #[derive(Default)]
    struct FlakyDocs {
        failing_deletes: u32,
        trash_fails: bool,
        deletes: Mutex<u32>,
        trashed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl DocumentService for FlakyDocs {
        async fn duplicate(&self, _: &str, _: &str, _: &str) -> ServiceResult<String> {
            Err("unsupported".into())
        }

        async fn substitute_all(
            &self,
            _: &str,
            _: TemplateKind,
            _: &[Replacement],
        ) -> ServiceResult<()> {
            Err("unsupported".into())
        }

        async fn export_portable(&self, _: &str) -> ServiceResult<Vec<u8>> {
            Err("unsupported".into())
        }

        async fn delete(&self, _: &str) -> ServiceResult<()> {
            let mut deletes = self.deletes.lock();
            *deletes += 1;
            if *deletes <= self.failing_deletes {
                Err("backend busy".into())
            } else {
                Ok(())
            }
        }

        async fn trash(&self, doc: &str) -> ServiceResult<()> {
            if self.trash_fails {
                return Err("trash unavailable".into());
            }
            self.trashed.lock().push(doc.to_string());
            Ok(())
        }

        async fn describe(&self, _: &str) -> ServiceResult<FileKind> {
            Ok(FileKind::Document)
        }

        async fn read_text(&self, _: &str, _: TemplateKind) -> ServiceResult<String> {
            Ok(String::new())
        }
    }

    fn cleanup_config() -> GeneratorConfig {
        GeneratorConfig::builder()
            .without_delays()
            .cleanup_attempts(3)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn cleanup_retries_delete_before_giving_up() {
        let docs = FlakyDocs {
            failing_deletes: 1,
            ..Default::default()
        };
        let outcome = cleanup_copy(&docs, &cleanup_config(), "copy-1").await;
        assert_eq!(outcome, CleanupOutcome::Deleted { attempt: 2 });
        assert_eq!(*docs.deletes.lock(), 2);
        assert!(docs.trashed.lock().is_empty());
    }

    #[tokio::test]
    async fn cleanup_falls_back_to_trash() {
        let docs = FlakyDocs {
            failing_deletes: u32::MAX,
            ..Default::default()
        };
        let outcome = cleanup_copy(&docs, &cleanup_config(), "copy-1").await;
        assert_eq!(outcome, CleanupOutcome::Trashed);
        assert_eq!(*docs.deletes.lock(), 3);
        assert_eq!(*docs.trashed.lock(), ["copy-1"]);
    }

    #[tokio::test]
    async fn cleanup_reports_a_leaked_copy() {
        let docs = FlakyDocs {
            failing_deletes: u32::MAX,
            trash_fails: true,
            ..Default::default()
        };
        match cleanup_copy(&docs, &cleanup_config(), "copy-1").await {
            CleanupOutcome::Leaked { doc, detail } => {
                assert_eq!(doc, "copy-1");
                assert!(detail.contains("backend busy"));
                assert!(detail.contains("trash unavailable"));
            }
            other => panic!("expected a leaked copy, got {other:?}"),
        }
    }

    #[test]
    fn replacements_clean_columns_but_not_literals() {
        let config = GeneratorConfig::builder()
            .variable(Variable::column("<<name>>", Column::A))
            .variable(Variable::literal("<<date>>", "د. 2024"))
            .variable(Variable::unbound("<<later>>"))
            .build()
            .unwrap();
        let normalizer = NameNormalizer::new(&CleanupRules::default());
        let row = Row {
            position: 2,
            fields: vec!["د. احمد".into()],
            resolved_name: "احمد".into(),
        };
        let reps = build_replacements(&config, &normalizer, &row);
        assert_eq!(
            reps,
            vec![
                Replacement {
                    find: "<<name>>".into(),
                    replace_with: "احمد".into()
                },
                Replacement {
                    find: "<<date>>".into(),
                    replace_with: "د. 2024".into()
                },
            ]
        );
    }
}
