//! Pipeline stages for one batch.
//!
//! Each submodule implements exactly one step, so each can be tested with
//! in-memory services and without the others.
//!
//! ## Data Flow
//!
//! ```text
//! scan ──▶ distribute ──▶ worker × N ──▶ (batch: retry ⟲ scan)
//!                           │
//!                           ├─ limiter  per-worker sliding window
//!                           └─ render   duplicate → substitute → export → upload
//! ```
//!
//! 1. [`scan`]       : read the sheet and keep rows without a link
//! 2. [`distribute`] : round-robin rows over worker identities
//! 3. [`limiter`]    : bound each worker's calls per rolling minute
//! 4. [`render`]     : the remote document calls for one row, with cleanup
//! 5. [`worker`]     : drive rows through render and write the link back

pub mod distribute;
pub mod limiter;
pub mod render;
pub mod scan;
pub mod worker;
