//! # certbatch
//!
//! Generate certificates in bulk from spreadsheet rows.
//!
//! ## Why this crate?
//!
//! Filling one template per recipient by hand does not scale past a few
//! dozen names, and remote document APIs throttle any single account long
//! before a few thousand. This crate cleans each recipient's name, spreads
//! the rows over every worker identity it can find, keeps each identity
//! under its own per-minute quota, and writes each generated link back
//! into the sheet so a re-run only picks up what is still missing.
//!
//! ## Pipeline Overview
//!
//! ```text
//! Sheet
//!  │
//!  ├─ 1. Scan        read pending rows (name present, no link yet)
//!  ├─ 2. Distribute  round-robin rows over the worker identities
//!  ├─ 3. Limit       sliding 60 s window per identity
//!  ├─ 4. Render      duplicate → substitute → export → upload → clean up
//!  ├─ 5. Write back  link into the row's link column
//!  └─ 6. Retry       rescan and rerun failures, bounded by max_retries
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use certbatch::{Generator, GeneratorConfig, IdentityPool, LocalBackend};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = LocalBackend::new("data");
//!     let identities = IdentityPool::discover(Path::new("credentials"))?.pool;
//!     let config = GeneratorConfig::builder()
//!         .template("templates/cert.txt")
//!         .destination_folder("out")
//!         .source("sheets/list.json")
//!         .build()?;
//!
//!     let generator = Generator::new(config.clone(), identities, Arc::new(backend));
//!     generator.save_config(config).await?;
//!     let report = generator.run().await?;
//!     eprintln!("{} completed, {} failed", report.completed, report.failed);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `certbatch` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! certbatch = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod batch;
pub mod column;
pub mod config;
pub mod error;
pub mod generator;
pub mod identity;
pub mod local;
pub mod normalize;
pub mod observer;
pub mod pipeline;
pub mod services;
pub mod state;
pub mod template;
pub mod watch;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use batch::BatchReport;
pub use column::Column;
pub use config::{
    CleanupRules, GeneratorConfig, GeneratorConfigBuilder, RowRange, TemplateKind, Variable,
    VariableSource,
};
pub use error::{CertError, RowError};
pub use generator::{ColumnHeader, Generator};
pub use identity::{IdentityPool, WorkerIdentity};
pub use local::LocalBackend;
pub use normalize::{comparison_key, NameNormalizer};
pub use observer::{BroadcastObserver, NoopObserver, RunEvent, RunObserver};
pub use services::{
    DocumentService, ServiceError, ServiceSession, SessionFactory, StorageService,
    TabularService,
};
pub use state::{LogEntry, LogLevel, RunStatus, StateSnapshot};
