//! Pipeline stages for one ingestion event.
//!
//! Each submodule implements exactly one step and returns [`IngestError`]
//! tagged with that step, so the orchestrator in [`crate::ingest`] can stop
//! at the first failure and the outcome reporter can tell the delivery
//! system whether to redeliver.
//!
//! ## Data Flow
//!
//! ```text
//! event ──▶ fetch ──▶ invoke ──▶ persist ──▶ relocate
//!         (object    (engine)   (Postgres)  (copy, then
//!          store)                            delete)
//! ```
//!
//! 1. [`fetch`]    — read the object and stage it in a scoped temp dir
//! 2. [`invoke`]   — hand the staged file to the conversion engine
//! 3. [`persist`]  — ensure the schema once, append the record
//! 4. [`relocate`] — move the source into the processed namespace
//!
//! Relocation runs last on purpose: until it succeeds the source is still in
//! the raw namespace, so a redelivered event can redo everything.
//!
//! [`IngestError`]: crate::error::IngestError

pub mod fetch;
pub mod invoke;
pub mod persist;
pub mod relocate;
