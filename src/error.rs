//! Error types for the docchat library.
//!
//! Two families of errors reflect two distinct failure modes:
//!
//! * [`DocChatError`]: **Fatal**: the session cannot be set up at all
//!   (invalid configuration, no LLM provider). Returned as `Err` from
//!   constructors before any user interaction happens.
//!
//! * [`IngestError`] and [`AnswerError`]: **Recoverable**: one upload or one
//!   send failed. They never escape the session; each is turned into a single
//!   assistant message via `user_message()` and the relevant state machine
//!   returns to its resting state.
//!
//! [`ReadError`] and [`ParseError`] are the stage-level errors of the
//! ingestion pipeline and are wrapped by [`IngestError`].

use thiserror::Error;

/// Message shown when a send fails for any reason.
pub const ANSWER_FAILED_MESSAGE: &str = "Sorry, there was an error processing your request.";

/// Fatal errors raised while building a session.
#[derive(Debug, Error)]
pub enum DocChatError {
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A failed upload attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IngestError {
    /// The declared MIME type is not the accepted document type.
    #[error("'{file_name}' has type '{declared}', only PDF files are accepted")]
    InvalidType { file_name: String, declared: String },

    /// The declared length exceeds the configured upload cap.
    #[error("'{file_name}' is {size} bytes, the limit is {limit} bytes")]
    TooLarge {
        file_name: String,
        size: u64,
        limit: u64,
    },

    /// Reading the file contents failed.
    #[error(transparent)]
    Read(#[from] ReadError),

    /// The bytes could not be turned into document text.
    #[error(transparent)]
    Parse(#[from] ParseError),
}

impl IngestError {
    /// User-facing text appended to the chat log for this failure.
    pub fn user_message(&self) -> String {
        match self {
            IngestError::InvalidType { .. } => "Only PDF files are allowed.".to_string(),
            IngestError::TooLarge { limit, .. } => format!(
                "This file is too large. Please upload a PDF smaller than {}.",
                human_bytes(*limit)
            ),
            IngestError::Read(_) => "Failed to read the file. Please try again.".to_string(),
            IngestError::Parse(_) => {
                "Failed to process the PDF. Please try another file.".to_string()
            }
        }
    }

    /// `true` for the rejections decided before any I/O starts.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            IngestError::InvalidType { .. } | IngestError::TooLarge { .. }
        )
    }
}

/// I/O failure while reading an uploaded file into memory.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReadError {
    /// The source could not be opened.
    #[error("Failed to open '{file_name}': {detail}")]
    Open { file_name: String, detail: String },

    /// A read call failed part-way through.
    #[error("I/O error after {loaded} bytes: {detail}")]
    Io { loaded: u64, detail: String },

    /// The read did not finish within the configured timeout.
    #[error("Read timed out after {secs}s")]
    Timeout { secs: u64 },

    /// More bytes arrived than the configured cap allows.
    #[error("File exceeds the {limit}-byte upload limit")]
    LimitExceeded { limit: u64 },
}

/// The buffer could not be parsed as a paginated document.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    /// The buffer does not start with the `%PDF` signature.
    #[error("Not a PDF (first bytes: {magic:?})")]
    NotAPdf { magic: Vec<u8> },

    /// Header, trailer, xref or page tree is corrupt.
    #[error("Malformed PDF: {0}")]
    Malformed(String),

    /// The document is encrypted; text streams are unreadable.
    #[error("PDF is encrypted")]
    Encrypted,

    /// The page tree reports a different number of pages than were extracted.
    #[error("Page tree reports {reported} pages but {extracted} were extracted")]
    PageCountMismatch { reported: usize, extracted: usize },

    /// A single page's content stream could not be decoded. Fails the whole document.
    #[error("Page {page}: {detail}")]
    PageExtraction { page: usize, detail: String },

    /// The attempt was superseded while pages were still being extracted.
    #[error("Extraction abandoned after page {page}")]
    Abandoned { page: usize },

    /// The extraction task died before producing a result.
    #[error("Extraction task failed: {0}")]
    Internal(String),
}

/// Failure reported by (or on behalf of) the answering service.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AnswerError {
    /// The provider returned an error after all retries.
    #[error("Answer provider error: {0}")]
    Provider(String),

    /// The call did not resolve within the configured timeout.
    #[error("Answer service timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The provider answered with no content.
    #[error("Answer service returned an empty response")]
    EmptyResponse,
}

impl AnswerError {
    /// User-facing text appended to the chat log for this failure.
    pub fn user_message(&self) -> String {
        ANSWER_FAILED_MESSAGE.to_string()
    }
}

fn human_bytes(n: u64) -> String {
    const MIB: u64 = 1024 * 1024;
    if n >= MIB && n % MIB == 0 {
        format!("{} MB", n / MIB)
    } else if n >= 1024 && n % 1024 == 0 {
        format!("{} KB", n / 1024)
    } else {
        format!("{n} bytes")
    }
}
