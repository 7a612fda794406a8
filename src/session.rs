//! Session controller: the top-level state machine of a document chat.
//!
//! ## Ownership
//!
//! [`SessionState`] is one aggregate held in a `tokio::sync::watch` channel.
//! Every mutation is a single `send_if_modified` closure, so subscribers never
//! observe a half-applied transition.
//!
//! | field                    | written by                          |
//! |--------------------------|-------------------------------------|
//! | `messages`, `draft`      | [`SessionController`]               |
//! | `send_in_flight`, `epoch`| [`SessionController`]               |
//! | upload task, document    | [`crate::ingest`] transitions only  |
//!
//! The controller decides when an upload begins, is abandoned or settles, but
//! the ingest fields themselves only change through [`IngestState`] methods.
//!
//! ## Gating
//!
//! A send is allowed only when no send is in flight, no upload is reading or
//! parsing, a document is present and the draft is non-empty after trimming.
//! [`SessionState::send_gate`] reports the first condition that fails.
//!
//! ## Stale completions
//!
//! Uploads carry a generation token (see [`crate::ingest`]); sends carry the
//! session epoch, which [`SessionController::reset`] bumps. A completion whose
//! token no longer matches is dropped without touching state.

use crate::answer::{AnswerService, LlmAnswerService};
use crate::config::ChatConfig;
use crate::error::{AnswerError, DocChatError, IngestError};
use crate::ingest::{Generation, IngestOutcome, IngestSink, IngestState, IngestionPipeline};
use crate::model::{Author, DocumentText, FileDescriptor, Message, MessageLog, UploadState, UploadTask};
use crate::pipeline::parse::{DocumentParser, LopdfParser};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

// ── State ────────────────────────────────────────────────────────────────

/// Everything a rendering surface needs to draw the chat.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    messages: MessageLog,
    draft: String,
    send_in_flight: bool,
    ingest: IngestState,
    epoch: u64,
}

/// Why the send control is disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SendBlocked {
    #[error("a reply is still pending")]
    InFlight,
    #[error("an upload is in progress")]
    Uploading,
    #[error("no document has been uploaded")]
    NoDocument,
    #[error("the message is empty")]
    EmptyDraft,
}

impl SessionState {
    pub fn messages(&self) -> &[Message] {
        self.messages.as_slice()
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn send_in_flight(&self) -> bool {
        self.send_in_flight
    }

    pub fn upload(&self) -> &UploadTask {
        self.ingest.upload()
    }

    pub fn document(&self) -> Option<&DocumentText> {
        self.ingest.document().map(Arc::as_ref)
    }

    /// Check the send gate, returning the first reason it is closed.
    pub fn send_gate(&self) -> Result<(), SendBlocked> {
        if self.send_in_flight {
            return Err(SendBlocked::InFlight);
        }
        if !matches!(
            self.upload().state,
            UploadState::Idle | UploadState::Succeeded
        ) {
            return Err(SendBlocked::Uploading);
        }
        if self.ingest.document().is_none() {
            return Err(SendBlocked::NoDocument);
        }
        if self.draft.trim().is_empty() {
            return Err(SendBlocked::EmptyDraft);
        }
        Ok(())
    }

    pub fn can_send(&self) -> bool {
        self.send_gate().is_ok()
    }

    /// Whether the text input accepts edits.
    pub fn input_enabled(&self) -> bool {
        !self.send_in_flight && !self.upload().state.is_active()
    }
}

// ── Intents ──────────────────────────────────────────────────────────────

/// A user gesture fed back from the rendering surface.
#[derive(Debug)]
pub enum Intent {
    SetDraft(String),
    /// The send button.
    Send,
    /// Enter in the text input. Gated exactly like [`Intent::Send`].
    Commit,
    Upload(FileDescriptor),
    ReplaceUpload(FileDescriptor),
    CancelUpload,
    Reset,
}

/// Result of an upload request.
#[derive(Debug)]
pub enum UploadDispatch {
    /// Validation passed and the pipeline is running.
    Started(JoinHandle<()>),
    /// Validation failed; a message explaining why was appended.
    Rejected(IngestError),
    /// Another upload holds the slot. Nothing changed.
    Ignored,
}

/// Result of a send request.
#[derive(Debug)]
pub enum SendDispatch {
    /// The user message was appended; the handle resolves once the reply is.
    Started(JoinHandle<()>),
    Blocked(SendBlocked),
}

/// Result of [`SessionController::dispatch`].
#[derive(Debug)]
pub enum Dispatch {
    Draft { accepted: bool },
    Send(SendDispatch),
    Upload(UploadDispatch),
    Cancelled { abandoned: bool },
    Reset,
}

// ── Shared state ─────────────────────────────────────────────────────────

struct Shared {
    state: watch::Sender<SessionState>,
    upload_task: Mutex<Option<AbortHandle>>,
}

impl Shared {
    fn abort_upload_task(&self) {
        if let Ok(mut slot) = self.upload_task.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }

    fn track_upload_task(&self, handle: AbortHandle) {
        if let Ok(mut slot) = self.upload_task.lock() {
            *slot = Some(handle);
        }
    }

    /// Apply a finished answer if it still belongs to the current epoch.
    fn complete_send(&self, epoch: u64, result: Result<String, AnswerError>) {
        let applied = self.state.send_if_modified(|s| {
            if s.epoch != epoch || !s.send_in_flight {
                return false;
            }
            let text = match &result {
                Ok(reply) => reply.clone(),
                Err(e) => e.user_message(),
            };
            s.messages.push(Author::Assistant, text);
            s.send_in_flight = false;
            true
        });

        match (&result, applied) {
            (_, false) => debug!("Discarding reply from epoch {}", epoch),
            (Ok(reply), true) => info!("Reply appended ({} chars)", reply.chars().count()),
            (Err(e), true) => warn!("Answer failed: {}", e),
        }
    }
}

impl IngestSink for Shared {
    fn transition(&self, f: &mut dyn FnMut(&mut IngestState) -> bool) -> bool {
        self.state.send_if_modified(|s| f(&mut s.ingest))
    }

    fn is_live(&self, generation: Generation) -> bool {
        self.state.borrow().ingest.is_live(generation)
    }

    fn settle(&self, generation: Generation, outcome: &IngestOutcome) -> bool {
        self.state.send_if_modified(|s| {
            if !s.ingest.settle(generation) {
                return false;
            }
            s.messages.push(Author::Assistant, outcome.user_message());
            true
        })
    }
}

// ── Controller ───────────────────────────────────────────────────────────

/// Handle to one chat session. Cheap to clone; clones share the session.
///
/// Methods that start work (`upload`, `replace_upload`, `send`) spawn onto
/// the current Tokio runtime and must be called from within one.
#[derive(Clone)]
pub struct SessionController {
    shared: Arc<Shared>,
    config: Arc<ChatConfig>,
    pipeline: Arc<IngestionPipeline>,
    answers: Arc<dyn AnswerService>,
}

impl SessionController {
    /// A session using the built-in PDF parser.
    pub fn new(config: ChatConfig, answers: Arc<dyn AnswerService>) -> Self {
        let parser = Arc::new(LopdfParser::new(config.verify_magic));
        Self::with_parser(config, parser, answers)
    }

    pub fn with_parser(
        config: ChatConfig,
        parser: Arc<dyn DocumentParser>,
        answers: Arc<dyn AnswerService>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::default());
        info!("New session (parser: {})", parser.backend_name());
        Self {
            pipeline: Arc::new(IngestionPipeline::new(&config, parser)),
            shared: Arc::new(Shared {
                state,
                upload_task: Mutex::new(None),
            }),
            config: Arc::new(config),
            answers,
        }
    }

    /// A session answering through the LLM provider resolved from `config`.
    pub fn from_config(config: ChatConfig) -> Result<Self, DocChatError> {
        let answers = Arc::new(LlmAnswerService::from_config(&config)?);
        Ok(Self::new(config, answers))
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    /// Watch the session. The receiver sees every published state.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// Clone of the current state.
    pub fn snapshot(&self) -> SessionState {
        self.shared.state.borrow().clone()
    }

    /// Apply one user intent.
    pub fn dispatch(&self, intent: Intent) -> Dispatch {
        match intent {
            Intent::SetDraft(text) => Dispatch::Draft {
                accepted: self.set_draft(text),
            },
            Intent::Send => Dispatch::Send(self.send()),
            Intent::Commit => Dispatch::Send(self.commit()),
            Intent::Upload(file) => Dispatch::Upload(self.upload(file)),
            Intent::ReplaceUpload(file) => Dispatch::Upload(self.replace_upload(file)),
            Intent::CancelUpload => Dispatch::Cancelled {
                abandoned: self.cancel_upload(),
            },
            Intent::Reset => {
                self.reset();
                Dispatch::Reset
            }
        }
    }

    /// Replace the draft. Ignored while the input is disabled.
    pub fn set_draft(&self, text: impl Into<String>) -> bool {
        let text = text.into();
        let mut accepted = false;
        self.shared.state.send_if_modified(|s| {
            if !s.input_enabled() {
                return false;
            }
            accepted = true;
            if s.draft == text {
                return false;
            }
            s.draft = text;
            true
        });
        accepted
    }

    /// Send the draft if the gate allows it.
    pub fn send(&self) -> SendDispatch {
        let mut request: Option<(u64, Arc<DocumentText>, String)> = None;
        let mut blocked = SendBlocked::NoDocument;

        self.shared.state.send_if_modified(|s| {
            if let Err(reason) = s.send_gate() {
                blocked = reason;
                return false;
            }
            let Some(document) = s.ingest.document().cloned() else {
                return false;
            };
            let text = s.draft.trim().to_string();
            s.messages.push(Author::User, text.as_str());
            s.draft.clear();
            s.send_in_flight = true;
            request = Some((s.epoch, document, text));
            true
        });

        let Some((epoch, document, text)) = request else {
            debug!("Send blocked: {}", blocked);
            return SendDispatch::Blocked(blocked);
        };

        info!("Sending question ({} chars)", text.chars().count());
        let shared = Arc::clone(&self.shared);
        let answers = Arc::clone(&self.answers);
        let timeout = self.config.answer_timeout();

        SendDispatch::Started(tokio::spawn(async move {
            let call = answers.answer(document.aggregate(), &text);
            let result = match timeout {
                Some(limit) => tokio::time::timeout(limit, call)
                    .await
                    .unwrap_or(Err(AnswerError::Timeout {
                        secs: limit.as_secs(),
                    })),
                None => call.await,
            };
            shared.complete_send(epoch, result);
        }))
    }

    /// The Enter gesture.
    pub fn commit(&self) -> SendDispatch {
        self.send()
    }

    /// Start an upload unless one is already running.
    pub fn upload(&self, file: FileDescriptor) -> UploadDispatch {
        self.start_upload(file, false)
    }

    /// Start an upload, abandoning any running one.
    ///
    /// A rejected file leaves the running upload alone.
    pub fn replace_upload(&self, file: FileDescriptor) -> UploadDispatch {
        self.start_upload(file, true)
    }

    /// Abandon the running upload, if any. The current document is kept.
    ///
    /// An attempt that already reached Succeeded or Failed is not cancelled.
    pub fn cancel_upload(&self) -> bool {
        let mut abandoned = None;
        self.shared.state.send_if_modified(|s| {
            let file_name = s.ingest.upload().file_name.clone();
            abandoned = s.ingest.abandon().map(|_| file_name);
            abandoned.is_some()
        });
        let Some(file_name) = abandoned else {
            return false;
        };
        self.shared.abort_upload_task();
        self.pipeline
            .notify(|cb| cb.on_state_change(&file_name, UploadState::Idle));
        true
    }

    /// Clear messages, draft and document, and invalidate all pending work.
    pub fn reset(&self) {
        let mut abandoned = None;
        self.shared.state.send_modify(|s| {
            s.messages.clear();
            s.draft.clear();
            s.send_in_flight = false;
            s.epoch += 1;
            let file_name = s.ingest.upload().file_name.clone();
            abandoned = s.ingest.reset().map(|_| file_name);
        });
        self.shared.abort_upload_task();
        if let Some(file_name) = abandoned {
            self.pipeline
                .notify(|cb| cb.on_state_change(&file_name, UploadState::Idle));
        }
        info!("Session reset");
    }

    fn start_upload(&self, file: FileDescriptor, supersede: bool) -> UploadDispatch {
        let validated = self.pipeline.validate(file);
        let mut rejected = None;
        let mut started = None;
        let mut superseded = None;

        self.shared.state.send_if_modified(|s| {
            let busy = s.ingest.live_generation().is_some();
            if busy && !supersede {
                return false;
            }
            match validated {
                Err(error) => {
                    s.messages.push(Author::Assistant, error.user_message());
                    rejected = Some(error);
                    true
                }
                Ok(file) => {
                    if supersede {
                        let file_name = s.ingest.upload().file_name.clone();
                        superseded = s.ingest.abandon().map(|g| (g, file_name));
                    }
                    match s.ingest.begin(&file) {
                        Some(generation) => {
                            started = Some((generation, file));
                            true
                        }
                        None => superseded.is_some(),
                    }
                }
            }
        });

        if let Some(error) = rejected {
            info!("Upload rejected: {}", error);
            return UploadDispatch::Rejected(error);
        }
        let Some((generation, file)) = started else {
            debug!("Upload ignored: another upload is in progress");
            return UploadDispatch::Ignored;
        };
        if let Some((old, old_name)) = superseded {
            info!("Upload {} superseded by {}", old, generation);
            self.shared.abort_upload_task();
            self.pipeline
                .notify(|cb| cb.on_state_change(&old_name, UploadState::Idle));
        }

        let file_name = file.name().to_string();
        let byte_length = file.byte_length();
        self.pipeline.notify(|cb| {
            cb.on_upload_start(&file_name, byte_length);
            cb.on_state_change(&file_name, UploadState::Reading);
        });

        let pipeline = Arc::clone(&self.pipeline);
        let sink: Arc<dyn IngestSink> = self.shared.clone();
        let handle = tokio::spawn(async move { pipeline.run(generation, file, sink).await });
        self.shared.track_upload_task(handle.abort_handle());
        UploadDispatch::Started(handle)
    }
}
