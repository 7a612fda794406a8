//! Pipeline stages for turning an uploaded file into document text.
//!
//! Each submodule implements exactly one transformation step, so each is
//! independently testable and the PDF engine can be swapped without touching
//! the other stages.
//!
//! ## Data Flow
//!
//! ```text
//! validate ──▶ read ──▶ parse
//! (MIME/size)  (bytes)  (per-page text)
//! ```
//!
//! 1. [`validate`]: synchronous accept/reject on the file descriptor; no I/O
//! 2. [`read`]: chunked async read into memory, emitting progress events
//! 3. [`parse`]: page-ordered text extraction; runs in `spawn_blocking`
//!    because the PDF engine is CPU-bound
//!
//! Sequencing the stages and owning the upload state is the job of
//! [`crate::ingest`].

pub mod parse;
pub mod read;
pub mod validate;
