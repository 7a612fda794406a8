//! Configuration types for a document chat session.
//!
//! All session behaviour is controlled through [`ChatConfig`], built via its
//! [`ChatConfigBuilder`]. One struct covers the ingestion limits, the
//! timeouts around suspended operations and the answer-provider knobs, so a
//! session can be cloned into spawned tasks as a single `Arc`.

use crate::error::DocChatError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// The PDF media type, the only one accepted by default.
pub const PDF_MIME_TYPE: &str = "application/pdf";

/// Configuration for a chat session.
///
/// Built via [`ChatConfig::builder()`] or using [`ChatConfig::default()`].
///
/// # Example
/// ```rust
/// use docchat::ChatConfig;
///
/// let config = ChatConfig::builder()
///     .max_file_bytes(20 * 1024 * 1024)
///     .answer_timeout_secs(30)
///     .model("gpt-4.1-nano")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ChatConfig {
    /// Declared MIME type an upload must carry. Default: `application/pdf`.
    ///
    /// Compared for exact equality; `application/pdf; charset=binary` is rejected.
    pub accepted_mime_type: String,

    /// Optional cap on upload size in bytes. Default: None (no limit).
    ///
    /// Checked against the declared length during validation and against the
    /// bytes actually read, since a declared length may be absent or wrong.
    pub max_file_bytes: Option<u64>,

    /// Bytes requested per read call. Default: 64 KiB. Minimum: 1 KiB.
    ///
    /// Also the granularity of progress reporting.
    pub read_chunk_bytes: usize,

    /// Timeout for reading the whole file, in seconds. Default: None.
    pub read_timeout_secs: Option<u64>,

    /// Reject buffers lacking the `%PDF` signature before parsing. Default: true.
    pub verify_magic: bool,

    /// Timeout around one answer-service call, in seconds. Default: 60.
    pub answer_timeout_secs: Option<u64>,

    /// LLM model identifier, e.g. "gpt-4.1-nano". If None, uses provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature for answers. Default: 0.2.
    pub temperature: f32,

    /// Maximum tokens generated per answer. Default: 1024.
    pub max_tokens: usize,

    /// Retries on a provider error. Default: 2.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Document characters sent to the provider per question. Default: 100 000.
    ///
    /// Longer documents are truncated on a char boundary.
    pub max_context_chars: usize,

    /// Custom system prompt. If None, uses the built-in default.
    pub system_prompt: Option<String>,

    /// Optional observer for upload events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            accepted_mime_type: PDF_MIME_TYPE.to_string(),
            max_file_bytes: None,
            read_chunk_bytes: 64 * 1024,
            read_timeout_secs: None,
            verify_magic: true,
            answer_timeout_secs: Some(60),
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.2,
            max_tokens: 1024,
            max_retries: 2,
            retry_backoff_ms: 500,
            max_context_chars: 100_000,
            system_prompt: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ChatConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatConfig")
            .field("accepted_mime_type", &self.accepted_mime_type)
            .field("max_file_bytes", &self.max_file_bytes)
            .field("read_chunk_bytes", &self.read_chunk_bytes)
            .field("read_timeout_secs", &self.read_timeout_secs)
            .field("verify_magic", &self.verify_magic)
            .field("answer_timeout_secs", &self.answer_timeout_secs)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("max_context_chars", &self.max_context_chars)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn UploadProgressCallback>"),
            )
            .finish()
    }
}

impl ChatConfig {
    /// Create a new builder for `ChatConfig`.
    pub fn builder() -> ChatConfigBuilder {
        ChatConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_secs.map(Duration::from_secs)
    }

    pub fn answer_timeout(&self) -> Option<Duration> {
        self.answer_timeout_secs.map(Duration::from_secs)
    }
}

/// Builder for [`ChatConfig`].
#[derive(Debug)]
pub struct ChatConfigBuilder {
    config: ChatConfig,
}

impl ChatConfigBuilder {
    pub fn accepted_mime_type(mut self, mime: impl Into<String>) -> Self {
        self.config.accepted_mime_type = mime.into();
        self
    }

    pub fn max_file_bytes(mut self, n: u64) -> Self {
        self.config.max_file_bytes = Some(n);
        self
    }

    pub fn read_chunk_bytes(mut self, n: usize) -> Self {
        self.config.read_chunk_bytes = n.max(1024);
        self
    }

    pub fn read_timeout_secs(mut self, secs: u64) -> Self {
        self.config.read_timeout_secs = Some(secs);
        self
    }

    pub fn verify_magic(mut self, v: bool) -> Self {
        self.config.verify_magic = v;
        self
    }

    pub fn answer_timeout_secs(mut self, secs: u64) -> Self {
        self.config.answer_timeout_secs = Some(secs);
        self
    }

    /// Let answer-service calls run without a deadline.
    pub fn no_answer_timeout(mut self) -> Self {
        self.config.answer_timeout_secs = None;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn max_context_chars(mut self, n: usize) -> Self {
        self.config.max_context_chars = n;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ChatConfig, DocChatError> {
        let c = &self.config;
        if c.accepted_mime_type.trim().is_empty() {
            return Err(DocChatError::InvalidConfig(
                "Accepted MIME type must not be empty".into(),
            ));
        }
        if c.max_file_bytes == Some(0) {
            return Err(DocChatError::InvalidConfig(
                "Upload limit must be ≥ 1 byte".into(),
            ));
        }
        if c.read_timeout_secs == Some(0) || c.answer_timeout_secs == Some(0) {
            return Err(DocChatError::InvalidConfig(
                "Timeouts must be ≥ 1 second".into(),
            ));
        }
        if c.max_context_chars == 0 {
            return Err(DocChatError::InvalidConfig(
                "Context window must be ≥ 1 character".into(),
            ));
        }
        Ok(self.config)
    }
}
