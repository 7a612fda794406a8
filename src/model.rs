//! Data model shared by the ingestion pipeline and the session controller.
//!
//! Everything here is plain data. Mutation rules (who may write which field)
//! are enforced by the owning modules: [`crate::ingest`] owns [`UploadTask`]
//! and the current [`DocumentText`], [`crate::session`] owns the
//! [`MessageLog`].

use crate::config::PDF_MIME_TYPE;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncRead;

// ── Messages ─────────────────────────────────────────────────────────────

/// Who wrote a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Author {
    User,
    Assistant,
}

/// One immutable entry of the chat log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub text: String,
    pub origin: Author,
    /// Assigned at creation; strictly increasing across the session's lifetime.
    pub sequence: u64,
}

impl Message {
    pub fn is_user(&self) -> bool {
        self.origin == Author::User
    }
}

/// Append-only, sequence-ordered message log.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageLog {
    messages: Vec<Message>,
    next_sequence: u64,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message and return it. Sequence numbers never repeat, even
    /// after [`MessageLog::clear`].
    pub(crate) fn push(&mut self, origin: Author, text: impl Into<String>) -> &Message {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.messages.push(Message {
            text: text.into(),
            origin,
            sequence,
        });
        &self.messages[self.messages.len() - 1]
    }

    pub(crate) fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn as_slice(&self) -> &[Message] {
        &self.messages
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

// ── Upload task ──────────────────────────────────────────────────────────

/// Lifecycle of the single upload slot.
///
/// `Succeeded` and `Failed` are transient: they are published once so a
/// renderer can show the outcome, then collapse back to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UploadState {
    #[default]
    Idle,
    Reading,
    Parsing,
    Succeeded,
    Failed,
}

impl UploadState {
    /// `true` while an attempt is reading or parsing.
    pub fn is_active(self) -> bool {
        matches!(self, UploadState::Reading | UploadState::Parsing)
    }
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UploadState::Idle => "idle",
            UploadState::Reading => "reading",
            UploadState::Parsing => "parsing",
            UploadState::Succeeded => "succeeded",
            UploadState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// The active (or idle) upload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadTask {
    pub file_name: String,
    pub declared_type: String,
    /// `None` when the source cannot report its length.
    pub byte_length: Option<u64>,
    pub state: UploadState,
    /// Always within `0..=100`.
    pub progress_percent: u8,
}

impl UploadTask {
    pub fn idle() -> Self {
        Self::default()
    }
}

// ── Document text ────────────────────────────────────────────────────────

/// Text extracted from a paginated document.
///
/// `pages[i]` holds page `i + 1`. `aggregate` is the pages joined with `\n`
/// and is only ever built from a complete page list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentText {
    pages: Vec<String>,
    aggregate: String,
}

impl DocumentText {
    pub fn from_pages(pages: Vec<String>) -> Self {
        let aggregate = pages.join("\n");
        Self { pages, aggregate }
    }

    pub fn pages(&self) -> &[String] {
        &self.pages
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Page text by 1-indexed page number.
    pub fn page(&self, page_num: usize) -> Option<&str> {
        page_num
            .checked_sub(1)
            .and_then(|i| self.pages.get(i))
            .map(String::as_str)
    }

    pub fn aggregate(&self) -> &str {
        &self.aggregate
    }
}

// ── File descriptor ──────────────────────────────────────────────────────

/// Where the bytes of an upload come from.
pub(crate) enum FileSource {
    Path(PathBuf),
    Memory(Vec<u8>),
    Reader(Box<dyn AsyncRead + Send + Unpin>),
}

/// A file selected by the user: name, declared MIME type, optional length,
/// and a byte source that is consumed by the read.
pub struct FileDescriptor {
    pub name: String,
    pub mime_type: String,
    pub byte_length: Option<u64>,
    pub(crate) source: FileSource,
}

impl FileDescriptor {
    /// Describe a file on disk.
    ///
    /// The MIME type is guessed from the extension, the way a browser file
    /// picker fills in `File.type`. An unreadable file still yields a
    /// descriptor; the failure surfaces later as a read error.
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let mime_type = mime_guess::from_path(path)
            .first()
            .map(|m| m.essence_str().to_string())
            .unwrap_or_default();
        let byte_length = std::fs::metadata(path).ok().map(|m| m.len());

        Self {
            name,
            mime_type,
            byte_length,
            source: FileSource::Path(path.to_path_buf()),
        }
    }

    /// Describe an in-memory file; its length is always known.
    pub fn from_bytes(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
    ) -> Self {
        let bytes = bytes.into();
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            byte_length: Some(bytes.len() as u64),
            source: FileSource::Memory(bytes),
        }
    }

    /// Shorthand for an in-memory `application/pdf` file.
    pub fn pdf(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self::from_bytes(name, PDF_MIME_TYPE, bytes)
    }

    /// Describe a file backed by an arbitrary async reader.
    ///
    /// Pass `None` as `byte_length` when the total is not computable; no
    /// progress percentages are reported for such reads.
    pub fn from_reader(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        byte_length: Option<u64>,
        reader: impl AsyncRead + Send + Unpin + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            byte_length,
            source: FileSource::Reader(Box::new(reader)),
        }
    }
}

impl fmt::Debug for FileDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match &self.source {
            FileSource::Path(p) => format!("path:{}", p.display()),
            FileSource::Memory(b) => format!("memory:{}B", b.len()),
            FileSource::Reader(_) => "reader".to_string(),
        };
        f.debug_struct("FileDescriptor")
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .field("byte_length", &self.byte_length)
            .field("source", &source)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn sequences_are_monotonic_across_clear() {
        let mut log = MessageLog::new();
        assert_eq!(log.push(Author::User, "a").sequence, 0);
        assert_eq!(log.push(Author::Assistant, "b").sequence, 1);
        log.clear();
        assert!(log.is_empty());
        assert_eq!(log.push(Author::User, "c").sequence, 2);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn aggregate_joins_pages_with_newline() {
        let doc = DocumentText::from_pages(vec!["one".into(), "two".into(), "".into()]);
        assert_eq!(doc.aggregate(), "one\ntwo\n");
        assert_eq!(doc.page_count(), 3);
        assert_eq!(doc.page(1), Some("one"));
        assert_eq!(doc.page(0), None);
        assert_eq!(doc.page(4), None);
    }

    #[test]
    fn active_states() {
        assert!(UploadState::Reading.is_active());
        assert!(UploadState::Parsing.is_active());
        assert!(!UploadState::Idle.is_active());
        assert!(!UploadState::Succeeded.is_active());
        assert!(!UploadState::Failed.is_active());
    }

    #[test]
    fn from_path_guesses_mime_and_length() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("report.pdf");
        std::fs::File::create(&pdf)
            .unwrap()
            .write_all(b"%PDF-1.5")
            .unwrap();
        let txt = dir.path().join("notes.txt");
        std::fs::write(&txt, "hello").unwrap();

        let d = FileDescriptor::from_path(&pdf);
        assert_eq!(d.name, "report.pdf");
        assert_eq!(d.mime_type, "application/pdf");
        assert_eq!(d.byte_length, Some(8));

        let d = FileDescriptor::from_path(&txt);
        assert_eq!(d.mime_type, "text/plain");
    }

    #[test]
    fn from_path_missing_file_has_no_length() {
        let d = FileDescriptor::from_path("/definitely/not/here.pdf");
        assert_eq!(d.byte_length, None);
        assert_eq!(d.mime_type, "application/pdf");
    }
}
