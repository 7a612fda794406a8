//! CLI binary for docchat.
//!
//! A line-oriented chat surface over the library: it maps CLI flags to
//! `ChatConfig`, turns typed lines into session intents and prints assistant
//! messages as the session publishes them.

use anyhow::{Context, Result};
use clap::Parser;
use docchat::session::{SendDispatch, UploadDispatch};
use docchat::{
    ChatConfig, FileDescriptor, ProgressCallback, SessionController, SessionState,
    UploadProgressCallback, UploadState,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal upload progress: a percentage bar while reading, a page counter
/// while parsing.
struct CliProgressCallback {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            bar: Mutex::new(None),
        })
    }

    fn with_bar(&self, f: impl FnOnce(&ProgressBar)) {
        if let Ok(slot) = self.bar.lock() {
            if let Some(bar) = slot.as_ref() {
                f(bar);
            }
        }
    }

    fn finish(&self) {
        if let Ok(mut slot) = self.bar.lock() {
            if let Some(bar) = slot.take() {
                bar.finish_and_clear();
            }
        }
    }
}

impl UploadProgressCallback for CliProgressCallback {
    fn on_upload_start(&self, file_name: &str, byte_length: Option<u64>) {
        let bar = match byte_length {
            Some(_) => ProgressBar::new(100).with_style(
                ProgressStyle::with_template(
                    "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}%  {msg}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▉▊▋▌▍▎▏  ")
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]),
            ),
            None => ProgressBar::new_spinner().with_style(
                ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            ),
        };
        bar.set_prefix("Uploading");
        bar.set_message(file_name.to_string());
        bar.enable_steady_tick(Duration::from_millis(80));

        if let Ok(mut slot) = self.bar.lock() {
            if let Some(old) = slot.replace(bar) {
                old.finish_and_clear();
            }
        }
    }

    fn on_state_change(&self, _file_name: &str, state: UploadState) {
        match state {
            UploadState::Parsing => self.with_bar(|bar| {
                bar.set_prefix("Parsing");
                bar.set_position(100);
            }),
            UploadState::Idle => self.finish(),
            _ => {}
        }
    }

    fn on_read_progress(&self, _file_name: &str, percent: u8) {
        self.with_bar(|bar| bar.set_position(u64::from(percent)));
    }

    fn on_page_extracted(&self, page_num: usize, total_pages: usize) {
        self.with_bar(|bar| bar.set_message(format!("page {page_num}/{total_pages}")));
    }

    fn on_upload_complete(&self, file_name: &str, page_count: usize) {
        self.with_bar(|bar| {
            bar.println(format!(
                "  {} {}  {}",
                green("✓"),
                file_name,
                dim(&format!("{page_count} pages"))
            ))
        });
    }

    fn on_upload_failed(&self, file_name: &str, error: &str) {
        self.with_bar(|bar| bar.println(format!("  {} {}  {}", red("✗"), file_name, red(error))));
    }
}

const AFTER_HELP: &str = r#"COMMANDS (inside the chat):
  /upload <path>    Upload a PDF (ignored while another upload is running)
  /replace <path>   Upload a PDF, abandoning any running upload
  /cancel           Abandon the running upload
  /reset            Clear the conversation and the document
  /status           Show upload state, document and send gate
  /quit             Exit
  <anything else>   Ask a question about the uploaded document

EXAMPLES:
  # Start with a document already loaded
  docchat report.pdf

  # Use a specific model
  docchat --model gpt-4.1 --provider openai report.pdf

  # Cap uploads at 20 MB and save the conversation on exit
  docchat --max-file-mb 20 --transcript chat.json

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
"#;

/// Chat with a PDF from the terminal.
#[derive(Parser, Debug)]
#[command(
    name = "docchat",
    version,
    about = "Chat with a PDF document using an LLM",
    long_about = "Upload a PDF, then ask questions answered from its text. Supports OpenAI, \
Anthropic, Google Gemini, Azure OpenAI, and any OpenAI-compatible endpoint (Ollama, vLLM, etc.).",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// PDF to upload on start.
    pdf: Option<PathBuf>,

    /// LLM model ID (e.g. gpt-4.1-nano, gpt-4.1, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Reject uploads larger than this many MiB.
    #[arg(long, env = "DOCCHAT_MAX_FILE_MB",
          value_parser = clap::value_parser!(u64).range(1..))]
    max_file_mb: Option<u64>,

    /// Timeout for reading an upload, in seconds.
    #[arg(long, env = "DOCCHAT_READ_TIMEOUT",
          value_parser = clap::value_parser!(u64).range(1..))]
    read_timeout: Option<u64>,

    /// Timeout for one answer, in seconds (0 disables it).
    #[arg(long, env = "DOCCHAT_ANSWER_TIMEOUT", default_value_t = 60)]
    answer_timeout: u64,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "DOCCHAT_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "DOCCHAT_TEMPERATURE", default_value_t = 0.2)]
    temperature: f32,

    /// Retries per question on LLM failure.
    #[arg(long, env = "DOCCHAT_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    /// Write the conversation as JSON to this file on exit.
    #[arg(long, env = "DOCCHAT_TRANSCRIPT")]
    transcript: Option<PathBuf>,

    /// Disable the upload progress bar.
    #[arg(long, env = "DOCCHAT_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DOCCHAT_VERBOSE")]
    verbose: bool,

    /// Suppress all logs except errors.
    #[arg(short, long, env = "DOCCHAT_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Library INFO logs would interleave with the chat; keep them off unless
    // asked for.
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "warn"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build session ────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if !cli.no_progress && !cli.quiet {
        Some(CliProgressCallback::new() as Arc<dyn UploadProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb).await?;
    let session =
        SessionController::from_config(config).context("Failed to set up the answer provider")?;

    let printer = spawn_printer(session.subscribe());

    eprintln!(
        "{} {}  {}",
        cyan("◆"),
        bold("docchat"),
        dim("type /upload <file.pdf> to begin, /quit to exit")
    );

    if let Some(ref path) = cli.pdf {
        if let UploadDispatch::Started(task) = upload(&session, path, false) {
            task.await.ok();
        }
    }

    // ── Chat loop ────────────────────────────────────────────────────────
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match line.split_once(' ').unwrap_or((line, "")) {
            ("/quit", _) | ("/exit", _) => break,
            ("/upload", path) => {
                upload(&session, path.trim(), false);
            }
            ("/replace", path) => {
                upload(&session, path.trim(), true);
            }
            ("/cancel", _) => {
                if session.cancel_upload() {
                    eprintln!("{} upload cancelled", cyan("⚠"));
                } else {
                    eprintln!("{}", dim("no upload in progress"));
                }
            }
            ("/reset", _) => {
                session.reset();
                eprintln!("{} session cleared", cyan("◆"));
            }
            ("/status", _) => print_status(&session.snapshot()),
            _ => {
                if !session.set_draft(line) {
                    eprintln!("{}", dim("input is disabled while uploading or waiting for a reply"));
                    continue;
                }
                match session.commit() {
                    SendDispatch::Started(task) => {
                        task.await.ok();
                    }
                    SendDispatch::Blocked(reason) => {
                        eprintln!("{} cannot send: {}", red("✗"), reason);
                    }
                }
            }
        }
    }

    if let Some(ref path) = cli.transcript {
        let state = session.snapshot();
        let json = serde_json::to_string_pretty(state.messages())
            .context("Failed to serialise transcript")?;
        tokio::fs::write(path, json)
            .await
            .with_context(|| format!("Failed to write transcript to {:?}", path))?;
        eprintln!("{} transcript saved to {}", green("✔"), bold(&path.display().to_string()));
    }

    printer.abort();
    Ok(())
}

/// Map CLI args to `ChatConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ChatConfig> {
    let mut builder = ChatConfig::builder()
        .temperature(cli.temperature)
        .max_retries(cli.max_retries);

    if let Some(mb) = cli.max_file_mb {
        builder = builder.max_file_bytes(mib_to_bytes(mb)?);
    }
    if let Some(secs) = cli.read_timeout {
        builder = builder.read_timeout_secs(secs);
    }
    builder = if cli.answer_timeout == 0 {
        builder.no_answer_timeout()
    } else {
        builder.answer_timeout_secs(cli.answer_timeout)
    };
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref path) = cli.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn mib_to_bytes(mib: u64) -> Result<u64> {
    mib.checked_mul(1024 * 1024)
        .with_context(|| format!("--max-file-mb {} is too large", mib))
}

fn upload(
    session: &SessionController,
    path: impl Into<PathBuf>,
    replace: bool,
) -> UploadDispatch {
    let path = path.into();
    if path.as_os_str().is_empty() {
        eprintln!("{}", dim("usage: /upload <path>"));
        return UploadDispatch::Ignored;
    }
    let file = FileDescriptor::from_path(&path);
    let dispatch = if replace {
        session.replace_upload(file)
    } else {
        session.upload(file)
    };
    if let UploadDispatch::Ignored = dispatch {
        eprintln!(
            "{} an upload is already running; use /replace or /cancel",
            cyan("⚠")
        );
    }
    dispatch
}

/// Print assistant messages as they are appended.
fn spawn_printer(mut rx: watch::Receiver<SessionState>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut printed: Option<u64> = None;
        loop {
            let mut fresh = Vec::new();
            {
                let state = rx.borrow_and_update();
                for m in state.messages() {
                    if printed.is_some_and(|seq| m.sequence <= seq) {
                        continue;
                    }
                    printed = Some(m.sequence);
                    if !m.is_user() {
                        fresh.push(m.text.clone());
                    }
                }
            }
            for text in fresh {
                println!("{} {}", cyan("◆"), text);
            }
            if rx.changed().await.is_err() {
                break;
            }
        }
    })
}

fn print_status(state: &SessionState) {
    let upload = state.upload();
    println!("Upload:    {}", upload.state);
    if upload.state != UploadState::Idle {
        println!("File:      {}", upload.file_name);
        println!("Progress:  {}%", upload.progress_percent);
    }
    match state.document() {
        Some(doc) => println!(
            "Document:  {} pages, {} chars",
            doc.page_count(),
            doc.aggregate().chars().count()
        ),
        None => println!("Document:  none"),
    }
    println!("Messages:  {}", state.messages().len());
    match state.send_gate() {
        Ok(()) => println!("Send:      ready"),
        Err(reason) => println!("Send:      blocked ({reason})"),
    }
}
