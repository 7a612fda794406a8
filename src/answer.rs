//! Answering service: turn (document text, question) into a reply.
//!
//! [`AnswerService`] is the seam the session talks to. [`LlmAnswerService`]
//! is the production implementation backed by an `edgequake-llm` provider;
//! tests substitute their own.
//!
//! ## Retry Strategy
//!
//! Provider errors are retried with exponential backoff
//! (`retry_backoff_ms * 2^attempt`). An empty completion is not retried: the
//! provider answered, it just had nothing to say.

use crate::config::ChatConfig;
use crate::error::{AnswerError, DocChatError};
use crate::prompts::{document_context, truncate_chars, DEFAULT_SYSTEM_PROMPT};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// Produces a reply to one user message about one document.
#[async_trait]
pub trait AnswerService: Send + Sync {
    async fn answer(&self, document_text: &str, user_message: &str)
        -> Result<String, AnswerError>;
}

/// [`AnswerService`] backed by an LLM chat completion.
pub struct LlmAnswerService {
    provider: Arc<dyn LLMProvider>,
    system_prompt: String,
    options: CompletionOptions,
    max_retries: u32,
    retry_backoff_ms: u64,
    max_context_chars: usize,
}

impl LlmAnswerService {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &ChatConfig) -> Self {
        Self {
            provider,
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            options: build_options(config),
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            max_context_chars: config.max_context_chars,
        }
    }

    /// Resolve a provider from `config` and the environment.
    pub fn from_config(config: &ChatConfig) -> Result<Self, DocChatError> {
        let provider = resolve_provider(config)?;
        Ok(Self::new(provider, config))
    }

    /// The messages sent for one question.
    ///
    /// 1. **System message**: the answering rules (or the configured override)
    /// 2. **Document message**: the document text, truncated to the context budget
    /// 3. **User message**: the question
    pub fn build_messages(&self, document_text: &str, user_message: &str) -> Vec<ChatMessage> {
        let text = truncate_chars(document_text, self.max_context_chars);
        vec![
            ChatMessage::system(self.system_prompt.as_str()),
            ChatMessage::system(document_context(&text)),
            ChatMessage::user(user_message),
        ]
    }
}

#[async_trait]
impl AnswerService for LlmAnswerService {
    async fn answer(
        &self,
        document_text: &str,
        user_message: &str,
    ) -> Result<String, AnswerError> {
        let start = Instant::now();
        let messages = self.build_messages(document_text, user_message);
        let mut last_err: Option<String> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = self.retry_backoff_ms * 2u64.pow(attempt - 1);
                warn!(
                    "Answer: retry {}/{} after {}ms",
                    attempt, self.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            match self.provider.chat(&messages, Some(&self.options)).await {
                Ok(response) => {
                    debug!(
                        "Answer: {} input tokens, {} output tokens, {:?}",
                        response.prompt_tokens,
                        response.completion_tokens,
                        start.elapsed()
                    );
                    if response.content.trim().is_empty() {
                        return Err(AnswerError::EmptyResponse);
                    }
                    return Ok(response.content);
                }
                Err(e) => {
                    let err_msg = format!("{}", e);
                    warn!("Answer: attempt {} failed: {}", attempt + 1, err_msg);
                    last_err = Some(err_msg);
                }
            }
        }

        Err(AnswerError::Provider(
            last_err.unwrap_or_else(|| "Unknown error".to_string()),
        ))
    }
}

/// Build `CompletionOptions` from the chat config.
fn build_options(config: &ChatConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, DocChatError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        DocChatError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider + model** (`config.provider_name`).
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 4. **OpenAI** when `OPENAI_API_KEY` is set.
/// 5. **Full auto-detection** (`ProviderFactory::from_env`).
pub fn resolve_provider(config: &ChatConfig) -> Result<Arc<dyn LLMProvider>, DocChatError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| DocChatError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}
