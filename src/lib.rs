//! # docchat
//!
//! Chat with a PDF: upload one document, then ask questions grounded in its
//! text.
//!
//! The crate is the core of a chat client, independent of any rendering
//! surface. It validates and reads an uploaded file, extracts page-ordered
//! text, and runs a gated session state machine that forwards questions to an
//! answering service.
//!
//! ## Pipeline Overview
//!
//! ```text
//! FileDescriptor
//!  │
//!  ├─ 1. Validate  exact MIME match, optional size cap (no I/O)
//!  ├─ 2. Read      chunked async read, rounded progress percentages
//!  ├─ 3. Parse     per-page text via lopdf (CPU-bound, spawn_blocking)
//!  └─ 4. Publish   DocumentText replaces the session's document
//!
//! draft ──▶ send gate ──▶ AnswerService(document text, question) ──▶ reply
//! ```
//!
//! Every upload attempt carries a generation token and every send carries the
//! session epoch, so results of superseded work are dropped instead of
//! overwriting newer state.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docchat::{ChatConfig, FileDescriptor, SessionController};
//! use docchat::session::{SendDispatch, UploadDispatch};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / …
//!     let session = SessionController::from_config(ChatConfig::default())?;
//!
//!     if let UploadDispatch::Started(task) = session.upload(FileDescriptor::from_path("report.pdf")) {
//!         task.await?;
//!     }
//!
//!     session.set_draft("What is the total?");
//!     if let SendDispatch::Started(task) = session.send() {
//!         task.await?;
//!     }
//!     for message in session.snapshot().messages() {
//!         println!("{:?}: {}", message.origin, message.text);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docchat` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! docchat = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod answer;
pub mod config;
pub mod error;
pub mod ingest;
pub mod model;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod session;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use answer::{AnswerService, LlmAnswerService};
pub use config::{ChatConfig, ChatConfigBuilder, PDF_MIME_TYPE};
pub use error::{AnswerError, DocChatError, IngestError, ParseError, ReadError};
pub use ingest::{IngestOutcome, IngestionPipeline};
pub use model::{Author, DocumentText, FileDescriptor, Message, UploadState, UploadTask};
pub use pipeline::parse::{DocumentParser, LopdfParser};
pub use progress::{NoopProgressCallback, ProgressCallback, UploadProgressCallback};
pub use session::{Intent, SendBlocked, SessionController, SessionState};
