//! Configuration types for certificate generation.
//!
//! All run behaviour is controlled through [`GeneratorConfig`], built via its
//! [`GeneratorConfigBuilder`] or deserialised from the JSON file the CLI
//! loads. Every recognised field is enumerated here with its default, and
//! validation happens once at the boundary where a command is accepted, so
//! the pipeline never has to second-guess a value.

use crate::column::Column;
use crate::error::CertError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Built-in honorific / title list (Arabic and English).
///
/// Order does not matter for matching; the normaliser sorts it longest
/// first.
pub const DEFAULT_REMOVE_WORDS: &[&str] = &[
    "استاذ", "استاذه", "استاذة", "أستاذ", "أستاذه", "أستاذة",
    "ا.", "أ.", "ا/", "أ/",
    "دكتور", "دكتوره", "دكتورة", "د.", "د/", "Dr", "Dr.",
    "محامي", "محاميه", "محامية", "م.", "م/",
    "مهندس", "مهندسه", "مهندسة", "Eng", "Eng.",
    "المهندس", "المهندسه", "المهندسة", "الدكتور", "الدكتوره", "الدكتورة",
    "الأستاذ", "الأستاذه", "الأستاذة", "الاستاذ", "الاستاذه", "الاستاذة",
    "المحامي", "المحاميه", "المحامية",
    "سيد", "سيده", "سيدة", "السيد", "السيده", "السيدة",
    "شيخ", "الشيخ",
    "حاج", "حاجه", "حاجة", "الحاج", "الحاجه", "الحاجة",
    "عميد", "العميد",
    "لواء", "اللواء",
    "عقيد", "العقيد",
    "رائد", "الرائد",
    "نقيب", "النقيب",
    "ملازم", "الملازم",
    "مستشار", "مستشاره", "مستشارة", "المستشار", "المستشاره", "المستشارة",
    "قاضي", "القاضي",
    "كابتن", "الكابتن", "Captain", "Capt",
    "بروفيسور", "بروفسور", "Prof", "Prof.",
    "Mr", "Mr.", "Mrs", "Mrs.", "Ms", "Ms.", "Miss",
    "Sir", "Madam",
];

/// Configuration for a generation run.
///
/// # Example
/// ```rust
/// use certbatch::GeneratorConfig;
///
/// let config = GeneratorConfig::builder()
///     .template("1AbcTemplate")
///     .destination_folder("1AbcFolder")
///     .source("1AbcSheet")
///     .calls_per_minute(40)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_retries, 1);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Template document to duplicate for each row.
    pub template: Option<String>,

    /// Detected on save; decides which substitution API the document
    /// service uses.
    pub template_kind: TemplateKind,

    /// Folder receiving the exported certificates.
    pub destination_folder: Option<String>,

    /// Folder for transient template copies. Falls back to the destination.
    pub scratch_folder: Option<String>,

    /// Spreadsheet holding one recipient per row.
    pub source: Option<String>,

    /// Which rows to consider.
    pub range: RowRange,

    /// Column the access link is written into. `None` until resolved on save.
    pub link_column: Option<Column>,

    /// Column holding the recipient name. See [`GeneratorConfig::name_column`].
    pub name_column: Option<Column>,

    /// Placeholder bindings applied to every row.
    pub variables: Vec<Variable>,

    /// Name-cleaning rules.
    pub cleanup: CleanupRules,

    /// Per-identity ceiling on remote row pipelines in a rolling minute. Default: 50.
    ///
    /// The effective global ceiling is this value times the number of
    /// identities.
    pub calls_per_minute: usize,

    /// Retry passes after a batch with failures. Default: 1.
    pub max_retries: u32,

    /// Pause between a failed batch and its retry pass. Default: 2000.
    pub retry_delay_ms: u64,

    /// Wait after duplicating the template before touching the copy. Default: 300.
    pub settle_delay_ms: u64,

    /// Wait before each attempt to delete the transient copy. Default: 500.
    pub cleanup_delay_ms: u64,

    /// Delete attempts before falling back to trashing the copy. Default: 3.
    pub cleanup_attempts: u32,

    /// Seconds between watch-mode polls. Default: 30.
    pub watch_interval_secs: u64,

    /// Log entries retained for the dashboard. Default: 500.
    pub log_capacity: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            template: None,
            template_kind: TemplateKind::default(),
            destination_folder: None,
            scratch_folder: None,
            source: None,
            range: RowRange::default(),
            link_column: None,
            name_column: None,
            variables: Vec::new(),
            cleanup: CleanupRules::default(),
            calls_per_minute: 50,
            max_retries: 1,
            retry_delay_ms: 2000,
            settle_delay_ms: 300,
            cleanup_delay_ms: 500,
            cleanup_attempts: 3,
            watch_interval_secs: 30,
            log_capacity: 500,
        }
    }
}

/// Link column used when none has been resolved (`O`).
pub const DEFAULT_LINK_COLUMN: Column = Column::from_index(14);

impl GeneratorConfig {
    /// Create a new builder for `GeneratorConfig`.
    pub fn builder() -> GeneratorConfigBuilder {
        GeneratorConfigBuilder {
            config: Self::default(),
        }
    }

    /// Column whose cell identifies the recipient: the explicit
    /// `name_column`, else the first variable's column, else `A`.
    pub fn name_column(&self) -> Column {
        self.name_column
            .or_else(|| self.variables.first().and_then(Variable::column_ref))
            .unwrap_or(Column::A)
    }

    pub fn link_column(&self) -> Column {
        self.link_column.unwrap_or(DEFAULT_LINK_COLUMN)
    }

    /// Right-most column the scanner must read.
    pub fn last_scan_column(&self) -> Column {
        let z = Column::from_index(25);
        self.variables
            .iter()
            .filter_map(Variable::column_ref)
            .chain([z, self.link_column(), self.name_column()])
            .max()
            .unwrap_or(z)
    }

    /// Folder for transient copies.
    pub fn scratch_folder(&self) -> Option<&str> {
        self.scratch_folder
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(self.destination_folder.as_deref())
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn cleanup_delay(&self) -> Duration {
        Duration::from_millis(self.cleanup_delay_ms)
    }

    pub fn watch_interval(&self) -> Duration {
        Duration::from_secs(self.watch_interval_secs)
    }

    /// Check the structural constraints every config must satisfy.
    pub fn validate(&self) -> Result<(), CertError> {
        if self.calls_per_minute == 0 {
            return Err(CertError::InvalidConfig(
                "calls_per_minute must be ≥ 1".into(),
            ));
        }
        if self.watch_interval_secs == 0 {
            return Err(CertError::InvalidConfig(
                "watch_interval_secs must be ≥ 1".into(),
            ));
        }
        if let RowRange::Rows { start, end } = self.range {
            if start < 1 {
                return Err(CertError::InvalidConfig(format!(
                    "Rows are 1-indexed, minimum is 1 (got {start})"
                )));
            }
            if start > end {
                return Err(CertError::InvalidConfig(format!(
                    "Invalid row range {start}-{end}: start must be <= end"
                )));
            }
        }
        for var in &self.variables {
            if var.token.is_empty() {
                return Err(CertError::InvalidConfig("variable token is empty".into()));
            }
        }
        Ok(())
    }

    /// Check that every reference a run needs is present.
    pub fn validate_for_run(&self) -> Result<(), CertError> {
        self.validate()?;
        let required = [
            ("template", &self.template),
            ("destination folder", &self.destination_folder),
            ("source sheet", &self.source),
        ];
        for (field, value) in required {
            if value.as_deref().map_or(true, str::is_empty) {
                return Err(CertError::MissingConfig { field });
            }
        }
        if let Some(var) = self
            .variables
            .iter()
            .find(|v| matches!(v.source, VariableSource::Column { column: None }))
        {
            return Err(CertError::InvalidConfig(format!(
                "variable {} has no column bound",
                var.token
            )));
        }
        Ok(())
    }
}

/// Builder for [`GeneratorConfig`].
#[derive(Debug)]
pub struct GeneratorConfigBuilder {
    config: GeneratorConfig,
}

impl GeneratorConfigBuilder {
    pub fn template(mut self, reference: impl AsRef<str>) -> Self {
        self.config.template = Some(resource_id(reference.as_ref()));
        self
    }

    pub fn template_kind(mut self, kind: TemplateKind) -> Self {
        self.config.template_kind = kind;
        self
    }

    pub fn destination_folder(mut self, reference: impl AsRef<str>) -> Self {
        self.config.destination_folder = Some(resource_id(reference.as_ref()));
        self
    }

    pub fn scratch_folder(mut self, reference: impl AsRef<str>) -> Self {
        self.config.scratch_folder = Some(resource_id(reference.as_ref()));
        self
    }

    pub fn source(mut self, reference: impl AsRef<str>) -> Self {
        self.config.source = Some(resource_id(reference.as_ref()));
        self
    }

    pub fn range(mut self, range: RowRange) -> Self {
        self.config.range = range;
        self
    }

    pub fn link_column(mut self, column: Column) -> Self {
        self.config.link_column = Some(column);
        self
    }

    pub fn name_column(mut self, column: Column) -> Self {
        self.config.name_column = Some(column);
        self
    }

    pub fn variable(mut self, variable: Variable) -> Self {
        self.config.variables.push(variable);
        self
    }

    pub fn cleanup(mut self, rules: CleanupRules) -> Self {
        self.config.cleanup = rules;
        self
    }

    pub fn calls_per_minute(mut self, n: usize) -> Self {
        self.config.calls_per_minute = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_delay_ms(mut self, ms: u64) -> Self {
        self.config.retry_delay_ms = ms;
        self
    }

    pub fn settle_delay_ms(mut self, ms: u64) -> Self {
        self.config.settle_delay_ms = ms;
        self
    }

    pub fn cleanup_delay_ms(mut self, ms: u64) -> Self {
        self.config.cleanup_delay_ms = ms;
        self
    }

    pub fn cleanup_attempts(mut self, n: u32) -> Self {
        self.config.cleanup_attempts = n.max(1);
        self
    }

    pub fn watch_interval_secs(mut self, secs: u64) -> Self {
        self.config.watch_interval_secs = secs;
        self
    }

    pub fn log_capacity(mut self, n: usize) -> Self {
        self.config.log_capacity = n.max(1);
        self
    }

    /// Zero every fixed delay. Useful for tests and local dry runs.
    pub fn without_delays(mut self) -> Self {
        self.config.retry_delay_ms = 0;
        self.config.settle_delay_ms = 0;
        self.config.cleanup_delay_ms = 0;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<GeneratorConfig, CertError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Kind of template document, decided from its remote type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKind {
    /// Word-processor document (default).
    #[default]
    Document,
    /// Slide deck.
    Presentation,
}

/// Which source rows to scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RowRange {
    /// Everything below the header row (default).
    #[default]
    All,
    /// Explicit 1-based inclusive bounds.
    Rows { start: usize, end: usize },
}

impl RowRange {
    /// First data row (1-based).
    pub fn first_row(&self) -> usize {
        match self {
            RowRange::All => 2,
            RowRange::Rows { start, .. } => *start,
        }
    }

    /// Last row to read, `None` for the data's natural end.
    pub fn last_row(&self) -> Option<usize> {
        match self {
            RowRange::All => None,
            RowRange::Rows { end, .. } => Some(*end),
        }
    }
}

/// A placeholder binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    /// Literal marker text, e.g. `<<الاسم>>`.
    pub token: String,
    #[serde(flatten)]
    pub source: VariableSource,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl Variable {
    pub fn column(token: impl Into<String>, column: Column) -> Self {
        Variable {
            token: token.into(),
            source: VariableSource::Column {
                column: Some(column),
            },
            description: String::new(),
        }
    }

    pub fn literal(token: impl Into<String>, value: impl Into<String>) -> Self {
        Variable {
            token: token.into(),
            source: VariableSource::Literal {
                value: value.into(),
            },
            description: String::new(),
        }
    }

    /// A detected placeholder that still needs a column.
    pub fn unbound(token: impl Into<String>) -> Self {
        Variable {
            token: token.into(),
            source: VariableSource::Column { column: None },
            description: String::new(),
        }
    }

    /// The bound column for column-sourced variables.
    pub fn column_ref(&self) -> Option<Column> {
        match self.source {
            VariableSource::Column { column } => column,
            VariableSource::Literal { .. } => None,
        }
    }
}

/// Where a variable's replacement text comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum VariableSource {
    /// Take the value from a column of the current row; always name-cleaned.
    Column { column: Option<Column> },
    /// Fixed text, passed through as-is.
    Literal { value: String },
}

/// Name-cleaning rules. See [`crate::normalize::NameNormalizer`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupRules {
    pub enabled: bool,
    /// Title / honorific tokens removed from the start of a name.
    pub remove_words: Vec<String>,
    /// Keep only the text after the last `/`.
    pub remove_before_slash: bool,
    /// Strip a lone leading alef (ا أ إ آ).
    pub remove_leading_alef: bool,
    /// Strip other lone letters at either end (initials, abbreviated titles).
    pub strip_single_letters: bool,
    /// Collapse interior whitespace runs to one space.
    pub collapse_whitespace: bool,
}

impl Default for CleanupRules {
    fn default() -> Self {
        Self {
            enabled: true,
            remove_words: DEFAULT_REMOVE_WORDS.iter().map(|w| w.to_string()).collect(),
            remove_before_slash: true,
            remove_leading_alef: true,
            strip_single_letters: true,
            collapse_whitespace: true,
        }
    }
}

impl CleanupRules {
    /// Rules that leave every name untouched.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

// ── Resource references ──────────────────────────────────────────────────

static RE_RESOURCE_ID: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"/d/([a-zA-Z0-9_-]+)",
        r"/folders/([a-zA-Z0-9_-]+)",
        r"id=([a-zA-Z0-9_-]+)",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

/// Extract a resource id from a share URL; bare ids pass through.
///
/// ```rust
/// use certbatch::config::resource_id;
///
/// assert_eq!(
///     resource_id("https://docs.google.com/document/d/1AbC_d-9/edit"),
///     "1AbC_d-9"
/// );
/// assert_eq!(resource_id("plain-id"), "plain-id");
/// ```
pub fn resource_id(input: &str) -> String {
    let input = input.trim();
    if input.is_empty() || !input.contains("://") {
        return input.to_string();
    }
    RE_RESOURCE_ID
        .iter()
        .find_map(|re| re.captures(input))
        .map(|caps| caps[1].to_string())
        .unwrap_or_else(|| input.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready() -> GeneratorConfigBuilder {
        GeneratorConfig::builder()
            .template("tpl")
            .destination_folder("out")
            .source("sheet")
    }

    #[test]
    fn defaults() {
        let c = GeneratorConfig::default();
        assert_eq!(c.calls_per_minute, 50);
        assert_eq!(c.max_retries, 1);
        assert_eq!(c.watch_interval_secs, 30);
        assert_eq!(c.link_column().letter(), "O");
        assert!(c.cleanup.enabled);
        assert!(c.cleanup.remove_words.iter().any(|w| w == "دكتور"));
    }

    #[test]
    fn missing_references_are_reported() {
        let err = GeneratorConfig::default().validate_for_run().unwrap_err();
        assert!(matches!(err, CertError::MissingConfig { field: "template" }));

        let err = GeneratorConfig::builder()
            .template("tpl")
            .build()
            .unwrap()
            .validate_for_run()
            .unwrap_err();
        assert!(matches!(
            err,
            CertError::MissingConfig {
                field: "destination folder"
            }
        ));
        assert!(ready().build().unwrap().validate_for_run().is_ok());
    }

    #[test]
    fn unbound_variable_blocks_run() {
        let config = ready().variable(Variable::unbound("<<x>>")).build().unwrap();
        assert!(matches!(
            config.validate_for_run(),
            Err(CertError::InvalidConfig(_))
        ));
    }

    #[test]
    fn invalid_range_rejected() {
        let err = GeneratorConfig::builder()
            .range(RowRange::Rows { start: 10, end: 2 })
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("start must be"));
        assert!(GeneratorConfig::builder().calls_per_minute(0).build().is_err());
    }

    #[test]
    fn name_column_resolution_order() {
        let c: Column = "C".parse().unwrap();
        let d: Column = "D".parse().unwrap();
        let mut config = ready().build().unwrap();
        assert_eq!(config.name_column(), Column::A);
        config.variables.push(Variable::column("<<n>>", c));
        assert_eq!(config.name_column(), c);
        config.name_column = Some(d);
        assert_eq!(config.name_column(), d);
    }

    #[test]
    fn last_scan_column_covers_far_columns() {
        let config = ready()
            .link_column("AC".parse().unwrap())
            .build()
            .unwrap();
        assert_eq!(config.last_scan_column().letter(), "AC");
        assert_eq!(ready().build().unwrap().last_scan_column().letter(), "Z");
    }

    #[test]
    fn scratch_falls_back_to_destination() {
        let config = ready().build().unwrap();
        assert_eq!(config.scratch_folder(), Some("out"));
        let config = ready().scratch_folder("tmp").build().unwrap();
        assert_eq!(config.scratch_folder(), Some("tmp"));
    }

    #[test]
    fn resource_id_patterns() {
        assert_eq!(
            resource_id("https://drive.google.com/drive/folders/0AHly_d4"),
            "0AHly_d4"
        );
        assert_eq!(resource_id("https://x.test/open?id=abc123"), "abc123");
        assert_eq!(resource_id("https://x.test/nothing"), "https://x.test/nothing");
        assert_eq!(resource_id("  "), "");
    }

    #[test]
    fn config_json_round_trip_keeps_typed_fields() {
        let config = ready()
            .range(RowRange::Rows { start: 2, end: 40 })
            .variable(Variable::column("<<name>>", "C".parse().unwrap()))
            .variable(Variable::literal("<<date>>", "2024"))
            .build()
            .unwrap();
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"mode\":\"rows\""));
        assert!(json.contains("\"source\":\"literal\""));
        let back: GeneratorConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config: GeneratorConfig =
            serde_json::from_str(r#"{"template": "t", "link_column": "P"}"#).unwrap();
        assert_eq!(config.link_column().letter(), "P");
        assert_eq!(config.calls_per_minute, 50);
        assert_eq!(config.range, RowRange::All);
    }
}
