//! Progress-callback trait for upload lifecycle events.
//!
//! Inject an [`Arc<dyn UploadProgressCallback>`] via
//! [`crate::config::ChatConfigBuilder::progress_callback`] to receive events
//! as the ingestion pipeline reads and parses a file.
//!
//! Rendering surfaces that only need the latest state can subscribe to the
//! session's watch channel instead (see [`crate::session::SessionController::subscribe`]).
//! The callback exists for consumers that must see *every* step, such as a
//! terminal progress bar or a test asserting the exact transition sequence.
//!
//! Events are only delivered for the live upload attempt. Once an attempt is
//! superseded or cancelled, nothing more is reported for it.
//!
//! # Example
//!
//! ```rust
//! use docchat::{ChatConfig, UploadProgressCallback, UploadState};
//! use std::sync::{Arc, Mutex};
//!
//! #[derive(Default)]
//! struct Recorder {
//!     states: Mutex<Vec<UploadState>>,
//! }
//!
//! impl UploadProgressCallback for Recorder {
//!     fn on_state_change(&self, _file_name: &str, state: UploadState) {
//!         self.states.lock().unwrap().push(state);
//!     }
//! }
//!
//! let config = ChatConfig::builder()
//!     .progress_callback(Arc::new(Recorder::default()))
//!     .build()
//!     .unwrap();
//! ```

use crate::model::UploadState;
use std::sync::Arc;

/// Called by the ingestion pipeline as an upload progresses.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Page extraction runs on a blocking thread, so
/// implementations must be `Send + Sync`.
pub trait UploadProgressCallback: Send + Sync {
    /// Called when a validated file is accepted and reading begins.
    ///
    /// # Arguments
    /// * `file_name`:   name of the uploaded file
    /// * `byte_length`: declared length, `None` if not computable
    fn on_upload_start(&self, file_name: &str, byte_length: Option<u64>) {
        let _ = (file_name, byte_length);
    }

    /// Called on every upload state transition, terminal states included.
    fn on_state_change(&self, file_name: &str, state: UploadState) {
        let _ = (file_name, state);
    }

    /// Called when the reported read percentage changes.
    fn on_read_progress(&self, file_name: &str, percent: u8) {
        let _ = (file_name, percent);
    }

    /// Called after each page's text has been extracted.
    ///
    /// # Arguments
    /// * `page_num`:    1-indexed page number
    /// * `total_pages`: page count reported by the document
    fn on_page_extracted(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called once when the document replaced the session's current text.
    fn on_upload_complete(&self, file_name: &str, page_count: usize) {
        let _ = (file_name, page_count);
    }

    /// Called once when the attempt failed after validation.
    fn on_upload_failed(&self, file_name: &str, error: &str) {
        let _ = (file_name, error);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl UploadProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ChatConfig`].
pub type ProgressCallback = Arc<dyn UploadProgressCallback>;
