//! The command surface: one [`Generator`] per process.
//!
//! Every inbound command (start, pause/resume, stop, watch on/off, save
//! configuration, column introspection, variable detection, identity
//! reload) is a method here. Commands validate their input and return
//! `Result<_, CertError>`; long-running work is spawned and reported
//! through [`RunState`] and the observer.

use crate::batch::{run_batch, BatchContext, BatchReport};
use crate::column::{column_letter, Column};
use crate::config::{CleanupRules, GeneratorConfig, TemplateKind, Variable};
use crate::error::{truncate_reason, CertError};
use crate::identity::IdentityPool;
use crate::observer::{NoopObserver, RunObserver};
use crate::services::{CellRange, ServiceSession, SessionFactory, TabularService};
use crate::state::{LogEntry, RunControl, RunState, RunStatus, StateChange, StateSnapshot};
use crate::template::{detect_placeholders, merge_detected};
use crate::watch::watch_loop;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Header keywords that mark the recipient-name column.
pub const NAME_KEYWORDS: &[&str] = &["اسم", "الاسم", "name", "الإسم", "أسم", "اﻻسم"];

/// Header texts recognised as an existing link column.
pub const LINK_HEADERS: &[&str] = &[
    "رابط الشهادة",
    "رابط الشهاده",
    "Certificate Link",
    "certificate_link",
    "Link",
];

/// Header written when a link column has to be created.
pub const LINK_HEADER: &str = "رابط الشهادة";

/// Rows inspected when looking for the last used column.
const LINK_PROBE_ROWS: usize = 100;

/// Right-most column read during header introspection (`ZZ`).
const HEADER_LAST_COLUMN: Column = Column::from_index(701);

/// One row-1 header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnHeader {
    pub letter: String,
    /// Trimmed header text, or `Column <letter>` when blank.
    pub name: String,
    pub index: usize,
}

struct Inner {
    config: RwLock<Arc<GeneratorConfig>>,
    identities: RwLock<IdentityPool>,
    factory: Arc<dyn SessionFactory>,
    state: Arc<RunState>,
    control: Mutex<RunControl>,
    watch: Mutex<Option<CancellationToken>>,
}

/// Cheap-to-clone handle over the process-wide generator.
#[derive(Clone)]
pub struct Generator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Generator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Generator")
            .field("status", &self.inner.state.status())
            .finish_non_exhaustive()
    }
}

impl Generator {
    pub fn new(
        config: GeneratorConfig,
        identities: IdentityPool,
        factory: Arc<dyn SessionFactory>,
    ) -> Self {
        Self::with_observer(config, identities, factory, Arc::new(NoopObserver))
    }

    pub fn with_observer(
        config: GeneratorConfig,
        identities: IdentityPool,
        factory: Arc<dyn SessionFactory>,
        observer: Arc<dyn RunObserver>,
    ) -> Self {
        let state = Arc::new(RunState::new(config.log_capacity, observer));
        state.apply(StateChange::Identities(identities.len()));
        Self {
            inner: Arc::new(Inner {
                config: RwLock::new(Arc::new(config)),
                identities: RwLock::new(identities),
                factory,
                state,
                control: Mutex::new(RunControl::new()),
                watch: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> &Arc<RunState> {
        &self.inner.state
    }

    pub fn config(&self) -> Arc<GeneratorConfig> {
        Arc::clone(&self.inner.config.read())
    }

    pub fn snapshot(&self) -> StateSnapshot {
        self.inner.state.snapshot()
    }

    pub fn recent_logs(&self, n: usize) -> Vec<LogEntry> {
        self.inner.state.recent_logs(n)
    }

    pub fn identity_count(&self) -> usize {
        self.inner.identities.read().len()
    }

    // ── Run commands ─────────────────────────────────────────────────────

    /// Start a batch in the background.
    ///
    /// Fails with [`CertError::AlreadyRunning`] when a batch is running or
    /// paused. Problems found after the start (bad config, no identities)
    /// end the run as `Idle` with a log entry.
    pub fn start(&self) -> Result<JoinHandle<BatchReport>, CertError> {
        let state = Arc::clone(&self.inner.state);
        let control = RunControl::new();
        {
            // Claim and swap under one lock.
            let mut current = self.inner.control.lock();
            if !state.try_claim() {
                return Err(CertError::AlreadyRunning);
            }
            *current = control.clone();
        }

        let ctx = BatchContext {
            config: self.config(),
            identities: self.inner.identities.read().clone(),
            factory: Arc::clone(&self.inner.factory),
            state: Arc::clone(&state),
            control,
        };
        let batch = tokio::spawn(run_batch(ctx));
        Ok(tokio::spawn(async move {
            match batch.await {
                Ok(report) => report,
                Err(e) => {
                    state.error(format!("Error: {e}"));
                    state.apply(StateChange::CurrentLabel(None));
                    state.apply(StateChange::Status(RunStatus::Idle));
                    BatchReport::default()
                }
            }
        }))
    }

    /// Start a batch and wait for it.
    pub async fn run(&self) -> Result<BatchReport, CertError> {
        self.start()?
            .await
            .map_err(|e| CertError::Internal(e.to_string()))
    }

    /// Pause a running batch or resume a paused one. Returns the new status.
    pub fn toggle_pause(&self) -> RunStatus {
        let status = {
            let control = self.inner.control.lock();
            let status = self.inner.state.toggle_pause();
            match status {
                RunStatus::Paused => control.set_paused(true),
                RunStatus::Running => control.set_paused(false),
                _ => {}
            }
            status
        };
        match status {
            RunStatus::Paused => self.inner.state.warning("Paused"),
            RunStatus::Running => self.inner.state.info("Resumed"),
            _ => {}
        }
        status
    }

    /// Stop the current batch at its next row boundary and leave watch mode.
    pub fn stop(&self) {
        self.inner.control.lock().stop();
        self.set_watch(false);
        self.inner.state.warning("Stopped");
    }

    /// Enable or disable watch mode.
    ///
    /// Enabling spawns the poll loop and returns its handle; enabling twice
    /// or disabling returns `None`.
    pub fn set_watch(&self, enabled: bool) -> Option<JoinHandle<()>> {
        let mut watch = self.inner.watch.lock();
        if enabled {
            if watch.as_ref().is_some_and(|t| !t.is_cancelled()) {
                return None;
            }
            let token = CancellationToken::new();
            *watch = Some(token.clone());
            self.inner.state.apply(StateChange::Watching(true));
            self.inner.state.success("Auto-watch enabled");
            Some(tokio::spawn(watch_loop(self.clone(), token)))
        } else {
            if let Some(token) = watch.take() {
                token.cancel();
                self.inner.state.apply(StateChange::Watching(false));
                self.inner.state.warning("Auto-watch disabled");
            }
            None
        }
    }

    // ── Configuration commands ───────────────────────────────────────────

    /// Validate and store a configuration, resolving what can be derived
    /// from the remote files.
    ///
    /// * the template kind, from the template's remote type;
    /// * the name column, from the row-1 headers, when not set;
    /// * the link column, found or created, when not set;
    /// * a first variable bound to the name column, when none are set.
    ///
    /// Remote lookups that fail only log a warning; the rest is still saved.
    pub async fn save_config(&self, config: GeneratorConfig) -> Result<Arc<GeneratorConfig>, CertError> {
        config.validate()?;
        let mut config = config;
        let state = &self.inner.state;
        state.set_log_capacity(config.log_capacity);

        let session = self.session().await.ok();

        if let (Some(session), Some(template)) = (&session, config.template.clone()) {
            config.template_kind = match session.documents.describe(&template).await {
                Ok(kind) => match kind.template_kind() {
                    Some(k) => {
                        state.info(format!("Detected template type: {k:?}"));
                        k
                    }
                    None => {
                        state.warning(format!(
                            "Unknown template type {kind:?}, defaulting to document"
                        ));
                        TemplateKind::Document
                    }
                },
                Err(e) => {
                    state.warning(format!(
                        "Could not detect template type: {}",
                        truncate_reason(&e.to_string())
                    ));
                    TemplateKind::Document
                }
            };
        }

        if let (Some(session), Some(source)) = (&session, config.source.clone()) {
            let sheets = session.sheets.as_ref();
            if config.name_column.is_none() {
                match read_headers(sheets, &source).await {
                    Ok(headers) => config.name_column = Some(self.detect_name_column(&headers)),
                    Err(e) => state.warning(format!(
                        "Could not read sheet headers: {}",
                        truncate_reason(&e.to_string())
                    )),
                }
            }
            if config.link_column.is_none() {
                config.link_column = Some(self.find_or_create_link_column(sheets, &source).await);
            }
        }

        if config.variables.is_empty() {
            if let (Some(session), Some(template)) = (&session, config.template.clone()) {
                match session.documents.read_text(&template, config.template_kind).await {
                    Ok(text) => {
                        if let Some(first) = detect_placeholders(&text).into_iter().next() {
                            let column = config.name_column();
                            state.info(format!("Detected variable: {first} → column {column}"));
                            let mut var = Variable::column(first, column);
                            var.description = "الاسم".into();
                            config.variables.push(var);
                        }
                    }
                    Err(e) => state.warning(format!(
                        "Could not read template: {}",
                        truncate_reason(&e.to_string())
                    )),
                }
            }
        }

        let config = Arc::new(config);
        *self.inner.config.write() = Arc::clone(&config);
        state.info("Configuration saved");
        Ok(config)
    }

    /// Replace the variable bindings.
    pub fn set_variables(&self, variables: Vec<Variable>) -> Result<(), CertError> {
        self.update_config(|c| c.variables = variables)?;
        let n = self.config().variables.len();
        self.inner.state.info(format!("Saved {n} variables"));
        Ok(())
    }

    /// Replace the name-cleaning rules.
    pub fn set_cleanup(&self, rules: CleanupRules) -> Result<(), CertError> {
        let words = rules.remove_words.len();
        self.update_config(|c| c.cleanup = rules)?;
        self.inner
            .state
            .info(format!("Saved cleanup config ({words} words)"));
        Ok(())
    }

    fn update_config(&self, f: impl FnOnce(&mut GeneratorConfig)) -> Result<(), CertError> {
        let mut guard = self.inner.config.write();
        let mut next = GeneratorConfig::clone(&guard);
        f(&mut next);
        next.validate()?;
        *guard = Arc::new(next);
        Ok(())
    }

    // ── Introspection ────────────────────────────────────────────────────

    /// Row-1 headers of the configured source sheet.
    pub async fn columns(&self) -> Result<Vec<ColumnHeader>, CertError> {
        let source = self
            .config()
            .source
            .clone()
            .ok_or(CertError::MissingConfig {
                field: "source sheet",
            })?;
        let session = self.session().await?;
        let headers = read_headers(session.sheets.as_ref(), &source).await?;
        self.inner
            .state
            .info(format!("Loaded {} columns from sheet", headers.len()));
        Ok(headers)
    }

    /// Placeholders found in the template, merged with the current bindings.
    ///
    /// Nothing is saved; pass the result to [`Generator::set_variables`].
    pub async fn detect_variables(&self) -> Result<Vec<Variable>, CertError> {
        let config = self.config();
        let template = config
            .template
            .as_deref()
            .ok_or(CertError::MissingConfig { field: "template" })?;
        let session = self.session().await?;
        let text = session
            .documents
            .read_text(template, config.template_kind)
            .await
            .map_err(|e| CertError::service("read template", e))?;
        let detected = detect_placeholders(&text);
        self.inner
            .state
            .success(format!("Detected {} variables", detected.len()));
        Ok(merge_detected(&config.variables, &detected))
    }

    /// Re-discover identities in `dir`, replacing the pool.
    ///
    /// When nothing usable is found the pool becomes empty and the error is
    /// returned.
    pub fn reload_identities(&self, dir: &Path) -> Result<usize, CertError> {
        let state = &self.inner.state;
        let (pool, result) = match IdentityPool::discover(dir) {
            Ok(discovery) => {
                for skipped in &discovery.skipped {
                    state.error(skipped.to_string());
                }
                let n = discovery.pool.len();
                (discovery.pool, Ok(n))
            }
            Err(e) => {
                state.error(e.to_string());
                (IdentityPool::default(), Err(e))
            }
        };
        state.apply(StateChange::Identities(pool.len()));
        state.info(format!("Loaded {} worker identities", pool.len()));
        *self.inner.identities.write() = pool;
        result
    }

    // ── Helpers ──────────────────────────────────────────────────────────

    /// Session of the first identity, used for one-off reads.
    pub(crate) async fn session(&self) -> Result<ServiceSession, CertError> {
        let identity = self
            .inner
            .identities
            .read()
            .get(0)
            .cloned()
            .ok_or_else(|| CertError::NoIdentities {
                dir: Default::default(),
            })?;
        self.inner.factory.open(&identity).await
    }

    fn detect_name_column(&self, headers: &[ColumnHeader]) -> Column {
        let state = &self.inner.state;
        if let Some(header) = find_name_header(headers) {
            state.success(format!(
                "Auto-detected name column: {} ({})",
                header.letter, header.name
            ));
            return Column::from_index(header.index);
        }
        if let Some(first) = headers.first() {
            state.warning(format!(
                "No name column found, using first column: {}",
                first.letter
            ));
            return Column::from_index(first.index);
        }
        Column::A
    }

    /// Existing link column, or a new one after the last used column.
    /// Falls back to the default column when the sheet cannot be read or
    /// written.
    async fn find_or_create_link_column(&self, sheets: &dyn TabularService, source: &str) -> Column {
        let state = &self.inner.state;
        let probe = CellRange {
            first_row: 1,
            last_row: Some(LINK_PROBE_ROWS),
            first_column: Column::A,
            last_column: HEADER_LAST_COLUMN,
        };
        let result = async {
            let rows = sheets.read_range(source, &probe).await?;
            if let Some(headers) = rows.first() {
                if let Some((index, header)) = find_link_header(headers) {
                    state.info(format!(
                        "Found link column \"{}\" at {}",
                        header.trim(),
                        column_letter(index)
                    ));
                    return Ok(Column::from_index(index));
                }
            }
            let column = next_free_column(&rows);
            sheets.write_cell(source, 1, column, LINK_HEADER).await?;
            state.success(format!("Created link column \"{LINK_HEADER}\" at {column}"));
            Ok::<_, crate::services::ServiceError>(column)
        }
        .await;

        result.unwrap_or_else(|e| {
            state.warning(format!(
                "Could not find/create link column: {}",
                truncate_reason(&e.to_string())
            ));
            crate::config::DEFAULT_LINK_COLUMN
        })
    }
}

/// Read row 1 of `source` as [`ColumnHeader`]s.
pub async fn read_headers(
    sheets: &dyn TabularService,
    source: &str,
) -> Result<Vec<ColumnHeader>, CertError> {
    let rows = sheets
        .read_range(source, &CellRange::header(HEADER_LAST_COLUMN))
        .await
        .map_err(|e| CertError::service("read headers", e))?;
    let headers = rows.into_iter().next().unwrap_or_default();
    Ok(headers
        .iter()
        .enumerate()
        .map(|(index, text)| {
            let letter = column_letter(index);
            let name = match text.trim() {
                "" => format!("Column {letter}"),
                t => t.to_string(),
            };
            ColumnHeader { letter, name, index }
        })
        .collect())
}

/// First header containing a name keyword, case-insensitively.
pub fn find_name_header(headers: &[ColumnHeader]) -> Option<&ColumnHeader> {
    headers.iter().find(|h| {
        let name = h.name.trim().to_lowercase();
        NAME_KEYWORDS.iter().any(|k| name.contains(k))
    })
}

/// First non-blank header matching a link name, containment either way.
pub fn find_link_header(headers: &[String]) -> Option<(usize, &str)> {
    headers.iter().enumerate().find_map(|(index, header)| {
        let clean = header.trim().to_lowercase();
        if clean.is_empty() {
            return None;
        }
        LINK_HEADERS
            .iter()
            .map(|n| n.to_lowercase())
            .any(|n| n.contains(&clean) || clean.contains(&n))
            .then_some((index, header.as_str()))
    })
}

/// Column after the right-most non-blank cell, or `A` for an empty grid.
pub fn next_free_column(rows: &[Vec<String>]) -> Column {
    rows.iter()
        .filter_map(|row| row.iter().rposition(|cell| !cell.trim().is_empty()))
        .max()
        .map_or(Column::A, |last| Column::from_index(last + 1))
}
