//! Pending-row scanner: which rows still need a certificate.
//!
//! The link cell is the only durable "done" marker. A row is pending when
//! its name cell is non-empty and its link cell does not start with
//! `http`. Each scan yields a fresh immutable snapshot; positions are the
//! real 1-based sheet rows so write-back lands on the right row even after
//! filtering.

use crate::column::Column;
use crate::config::GeneratorConfig;
use crate::error::CertError;
use crate::normalize::NameNormalizer;
use crate::services::{CellRange, TabularService};
use tracing::debug;

/// Prefix that marks a link cell as filled.
pub const LINK_PREFIX: &str = "http";

/// One unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    /// 1-based sheet row.
    pub position: usize,
    /// Cell texts from column `A` onward.
    pub fields: Vec<String>,
    /// Normalised recipient name.
    pub resolved_name: String,
}

impl Row {
    /// Cell text at `column`, empty when the row is shorter.
    pub fn field(&self, column: Column) -> &str {
        column.cell(&self.fields).unwrap_or("")
    }

    /// Display label and output file stem.
    pub fn label(&self) -> String {
        if self.resolved_name.is_empty() {
            format!("Certificate_{}", self.position)
        } else {
            self.resolved_name.clone()
        }
    }
}

/// Whether a raw row still needs work.
pub fn is_pending(fields: &[String], name_column: Column, link_column: Column) -> bool {
    let has_name = name_column
        .cell(fields)
        .is_some_and(|name| !name.trim().is_empty());
    let has_link = link_column
        .cell(fields)
        .is_some_and(|link| link.trim().starts_with(LINK_PREFIX));
    has_name && !has_link
}

/// Range the scanner reads for `config`.
pub fn scan_range(config: &GeneratorConfig) -> CellRange {
    CellRange {
        first_row: config.range.first_row(),
        last_row: config.range.last_row(),
        first_column: Column::A,
        last_column: config.last_scan_column(),
    }
}

/// Read the source sheet and return pending rows in sheet order.
pub async fn scan_pending(
    sheets: &dyn TabularService,
    config: &GeneratorConfig,
    normalizer: &NameNormalizer,
) -> Result<Vec<Row>, CertError> {
    let source = config
        .source
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or(CertError::MissingConfig {
            field: "source sheet",
        })?;
    let range = scan_range(config);
    let grid = sheets
        .read_range(source, &range)
        .await
        .map_err(|e| CertError::service("read sheet", e))?;

    let name_column = config.name_column();
    let link_column = config.link_column();
    let rows: Vec<Row> = grid
        .into_iter()
        .enumerate()
        .filter(|(_, fields)| is_pending(fields, name_column, link_column))
        .map(|(offset, fields)| {
            let raw = name_column.cell(&fields).unwrap_or("");
            Row {
                position: range.first_row + offset,
                resolved_name: normalizer.normalize(raw),
                fields,
            }
        })
        .collect();

    debug!("Scanned {} → {} pending rows", range, rows.len());
    Ok(rows)
}
