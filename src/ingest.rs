//! Ingestion pipeline: validate → read → parse, with an explicit upload
//! state machine.
//!
//! ## State machine
//!
//! ```text
//!        begin            read ok              parse ok
//! Idle ─────────▶ Reading ────────▶ Parsing ──────────▶ Succeeded ─┐
//!   ▲                │                  │                           │ settle
//!   │                │ read error       │ parse error               │
//!   │                ▼                  ▼                           │
//!   │             Failed ◀──────────────┘                           │
//!   └───────────────┴──────────────── settle ◀──────────────────────┘
//! ```
//!
//! [`IngestState`] holds the single upload slot and the current document.
//! Every transition is a method on it, takes the attempt's [`Generation`]
//! and returns whether it applied. A transition for anything other than the
//! live attempt is a no-op, which is how results from superseded or
//! cancelled attempts are discarded.
//!
//! ## Who writes what
//!
//! Only the methods in this module mutate upload and document state. The
//! session decides *when* to begin, abandon or settle an attempt, and turns
//! each settled [`IngestOutcome`] into a chat message; it never touches the
//! fields directly.

use crate::config::ChatConfig;
use crate::error::{IngestError, ParseError, ReadError};
use crate::model::{DocumentText, FileDescriptor, UploadState, UploadTask};
use crate::pipeline::parse::{parse_document, DocumentParser};
use crate::pipeline::read::{ByteReader, ReadEvent};
use crate::pipeline::validate::{FileValidator, ValidatedFile};
use crate::progress::{ProgressCallback, UploadProgressCallback};
use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Identifies one upload attempt. Strictly increasing per session.
pub type Generation = u64;

// ── State ────────────────────────────────────────────────────────────────

/// Upload slot and current document, owned by the ingestion pipeline.
#[derive(Debug, Clone, Default)]
pub struct IngestState {
    upload: UploadTask,
    document: Option<Arc<DocumentText>>,
    generation: Generation,
    live: Option<Generation>,
}

impl IngestState {
    pub fn upload(&self) -> &UploadTask {
        &self.upload
    }

    pub fn document(&self) -> Option<&Arc<DocumentText>> {
        self.document.as_ref()
    }

    /// The attempt currently owning the upload slot, if any.
    pub fn live_generation(&self) -> Option<Generation> {
        self.live
    }

    pub fn is_live(&self, generation: Generation) -> bool {
        self.live == Some(generation)
    }

    /// Idle → Reading. Returns `None` (and changes nothing) while another
    /// attempt holds the slot.
    pub fn begin(&mut self, file: &ValidatedFile) -> Option<Generation> {
        if let Some(live) = self.live {
            debug!(
                "Ignoring upload of '{}': attempt {} is {}",
                file.name(),
                live,
                self.upload.state
            );
            return None;
        }
        self.generation += 1;
        self.live = Some(self.generation);
        self.upload = UploadTask {
            file_name: file.name().to_string(),
            declared_type: file.mime_type().to_string(),
            byte_length: file.byte_length(),
            state: UploadState::Reading,
            progress_percent: 0,
        };
        info!(
            "Upload {} started: '{}'",
            self.generation, self.upload.file_name
        );
        Some(self.generation)
    }

    /// Drop the live attempt while it is Reading or Parsing. Its pending
    /// results become stale. The current document is kept.
    ///
    /// A Succeeded or Failed attempt is left to settle, so a published
    /// document always gets its message.
    pub fn abandon(&mut self) -> Option<Generation> {
        if !self.upload.state.is_active() {
            return None;
        }
        self.release()
    }

    /// Drop any attempt, whatever its state, and forget the current document.
    /// Returns the dropped attempt.
    pub fn reset(&mut self) -> Option<Generation> {
        let released = self.release();
        self.document = None;
        released
    }

    fn release(&mut self) -> Option<Generation> {
        let released = self.live.take()?;
        info!(
            "Upload {} abandoned in state {}",
            released, self.upload.state
        );
        self.upload = UploadTask::idle();
        Some(released)
    }

    /// Record read progress. Percentages never go backwards.
    pub fn record_progress(&mut self, generation: Generation, percent: u8) -> bool {
        if !self.is_live(generation) || self.upload.state != UploadState::Reading {
            return false;
        }
        self.upload.progress_percent = self.upload.progress_percent.max(percent.min(100));
        true
    }

    /// Reading → Parsing.
    pub fn start_parsing(&mut self, generation: Generation) -> bool {
        if !self.is_live(generation) || self.upload.state != UploadState::Reading {
            return false;
        }
        self.upload.state = UploadState::Parsing;
        true
    }

    /// Parsing → Succeeded, replacing the current document.
    pub fn succeed(&mut self, generation: Generation, document: Arc<DocumentText>) -> bool {
        if !self.is_live(generation) || self.upload.state != UploadState::Parsing {
            return false;
        }
        self.document = Some(document);
        self.upload.state = UploadState::Succeeded;
        true
    }

    /// Reading | Parsing → Failed. The current document is left untouched.
    pub fn fail(&mut self, generation: Generation) -> bool {
        if !self.is_live(generation) || !self.upload.state.is_active() {
            return false;
        }
        self.upload.state = UploadState::Failed;
        true
    }

    /// Succeeded | Failed → Idle with 0 %, releasing the slot.
    pub fn settle(&mut self, generation: Generation) -> bool {
        let terminal = matches!(
            self.upload.state,
            UploadState::Succeeded | UploadState::Failed
        );
        if !self.is_live(generation) || !terminal {
            return false;
        }
        self.live = None;
        self.upload = UploadTask::idle();
        true
    }
}

// ── Outcome ──────────────────────────────────────────────────────────────

/// Terminal result of one attempt, consumed into a chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Succeeded { file_name: String, page_count: usize },
    Failed { file_name: String, error: IngestError },
}

impl IngestOutcome {
    pub fn user_message(&self) -> String {
        match self {
            IngestOutcome::Succeeded { file_name, .. } => format!(
                "Successfully uploaded and processed {}. You can now ask questions related to the document.",
                file_name
            ),
            IngestOutcome::Failed { error, .. } => error.user_message(),
        }
    }
}

// ── Sink ─────────────────────────────────────────────────────────────────

/// Where the pipeline applies its transitions.
///
/// The session implements this over its shared state so that every change
/// is published to subscribers atomically.
pub trait IngestSink: Send + Sync {
    /// Run `f` against the ingest state; publish if it returns `true`.
    fn transition(&self, f: &mut dyn FnMut(&mut IngestState) -> bool) -> bool;

    fn is_live(&self, generation: Generation) -> bool;

    /// Release the slot for `generation` and record `outcome` for the user.
    /// Returns `false` if the attempt was no longer live.
    fn settle(&self, generation: Generation, outcome: &IngestOutcome) -> bool;
}

// ── Pipeline ─────────────────────────────────────────────────────────────

/// Runs the three stages for one attempt at a time.
pub struct IngestionPipeline {
    validator: FileValidator,
    reader: ByteReader,
    parser: Arc<dyn DocumentParser>,
    progress: Option<ProgressCallback>,
}

impl IngestionPipeline {
    pub fn new(config: &ChatConfig, parser: Arc<dyn DocumentParser>) -> Self {
        Self {
            validator: FileValidator::new(config),
            reader: ByteReader::new(config),
            parser,
            progress: config.progress_callback.clone(),
        }
    }

    pub fn validate(&self, file: FileDescriptor) -> Result<ValidatedFile, IngestError> {
        self.validator.validate(file)
    }

    /// Report an event to the progress callback, if one is configured.
    pub(crate) fn notify(&self, f: impl FnOnce(&dyn UploadProgressCallback)) {
        if let Some(cb) = &self.progress {
            f(cb.as_ref());
        }
    }

    /// Drive attempt `generation` from Reading to a settled Idle.
    ///
    /// The attempt must already have been started with
    /// [`IngestState::begin`]. Returns as soon as the attempt stops being
    /// live, dropping the read (or ignoring the parse result) so nothing
    /// from a superseded attempt reaches the session.
    pub async fn run(
        &self,
        generation: Generation,
        file: ValidatedFile,
        sink: Arc<dyn IngestSink>,
    ) {
        let file_name = file.name().to_string();

        // ── Stage 1: read ────────────────────────────────────────────────
        let mut events = self.reader.read(file);
        let mut read_result: Option<Result<Vec<u8>, ReadError>> = None;
        while let Some(event) = events.next().await {
            match event {
                ReadEvent::Progress(p) => {
                    if !sink.transition(&mut |s| s.record_progress(generation, p.percent)) {
                        debug!("Upload {} superseded during read; dropping it", generation);
                        return;
                    }
                    self.notify(|cb| cb.on_read_progress(&file_name, p.percent));
                }
                ReadEvent::Finished(result) => {
                    read_result = Some(result);
                    break;
                }
            }
        }
        drop(events);

        let bytes = match read_result {
            Some(Ok(bytes)) => bytes,
            Some(Err(e)) => return self.finish(generation, &file_name, Err(e.into()), &sink),
            None => {
                let e = ReadError::Io {
                    loaded: 0,
                    detail: "read ended without a result".into(),
                };
                return self.finish(generation, &file_name, Err(e.into()), &sink);
            }
        };

        // ── Stage 2: parse ───────────────────────────────────────────────
        if !sink.transition(&mut |s| s.start_parsing(generation)) {
            debug!("Upload {} superseded after read; discarding bytes", generation);
            return;
        }
        self.notify(|cb| cb.on_state_change(&file_name, UploadState::Parsing));

        let hook_sink = Arc::clone(&sink);
        let hook_cb = self.progress.clone();
        let parsed = parse_document(Arc::clone(&self.parser), bytes, move |page, total| {
            if !hook_sink.is_live(generation) {
                return false;
            }
            if let Some(cb) = &hook_cb {
                cb.on_page_extracted(page, total);
            }
            true
        })
        .await;

        self.finish(generation, &file_name, parsed.map_err(IngestError::from), &sink);
    }

    /// Publish the terminal state, then settle it into a message.
    fn finish(
        &self,
        generation: Generation,
        file_name: &str,
        result: Result<DocumentText, IngestError>,
        sink: &Arc<dyn IngestSink>,
    ) {
        if matches!(result, Err(IngestError::Parse(ParseError::Abandoned { .. }))) {
            debug!("Upload {} abandoned during parse", generation);
            return;
        }

        let outcome = match result {
            Ok(document) => {
                let page_count = document.page_count();
                let document = Arc::new(document);
                if !sink.transition(&mut |s| s.succeed(generation, Arc::clone(&document))) {
                    debug!("Upload {} superseded during parse; discarding text", generation);
                    return;
                }
                info!("Upload {} succeeded: '{}' ({} pages)", generation, file_name, page_count);
                self.notify(|cb| cb.on_state_change(file_name, UploadState::Succeeded));
                IngestOutcome::Succeeded {
                    file_name: file_name.to_string(),
                    page_count,
                }
            }
            Err(error) => {
                if !sink.transition(&mut |s| s.fail(generation)) {
                    debug!("Upload {} superseded; dropping error: {}", generation, error);
                    return;
                }
                warn!("Upload {} failed: '{}': {}", generation, file_name, error);
                self.notify(|cb| cb.on_state_change(file_name, UploadState::Failed));
                IngestOutcome::Failed {
                    file_name: file_name.to_string(),
                    error,
                }
            }
        };

        if sink.settle(generation, &outcome) {
            self.notify(|cb| {
                match &outcome {
                    IngestOutcome::Succeeded {
                        file_name,
                        page_count,
                    } => cb.on_upload_complete(file_name, *page_count),
                    IngestOutcome::Failed { file_name, error } => {
                        cb.on_upload_failed(file_name, &error.to_string())
                    }
                }
                cb.on_state_change(file_name, UploadState::Idle);
            });
        }
    }
}
