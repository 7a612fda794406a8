//! Shared fixtures for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use docchat::{AnswerError, AnswerService, UploadProgressCallback, UploadState};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::Notify;

/// Route library logs to the test harness. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// One page per entry; each inner slice is that page's text items.
pub fn build_pdf(pages: &[&[&str]]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids: Vec<Object> = Vec::new();
    for items in pages {
        let mut operations = vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 11.into()]),
            Operation::new("Td", vec![72.into(), 700.into()]),
        ];
        for item in items.iter() {
            operations.push(Operation::new("Tj", vec![Object::string_literal(*item)]));
        }
        operations.push(Operation::new("ET", vec![]));
        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages.len() as i64,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut out = Vec::new();
    doc.save_to(&mut out).unwrap();
    out
}

/// Answers with a fixed reply once released.
#[derive(Default)]
pub struct GatedAnswers {
    pub reply: String,
    pub release: Notify,
    pub calls: AtomicUsize,
    pub seen: Mutex<Vec<(String, String)>>,
}

impl GatedAnswers {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnswerService for GatedAnswers {
    async fn answer(&self, document_text: &str, user_message: &str) -> Result<String, AnswerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen
            .lock()
            .unwrap()
            .push((document_text.to_string(), user_message.to_string()));
        self.release.notified().await;
        Ok(self.reply.clone())
    }
}

/// Never resolves.
pub struct SilentAnswers;

#[async_trait]
impl AnswerService for SilentAnswers {
    async fn answer(&self, _document_text: &str, _user_message: &str) -> Result<String, AnswerError> {
        std::future::pending().await
    }
}

/// Records every upload event.
#[derive(Default)]
pub struct Recorder {
    pub states: Mutex<Vec<UploadState>>,
    pub transitions: Mutex<Vec<(String, UploadState)>>,
    pub percents: Mutex<Vec<u8>>,
    pub pages: Mutex<Vec<(usize, usize)>>,
    pub completed: Mutex<Vec<(String, usize)>>,
    pub failed: Mutex<Vec<String>>,
}

impl UploadProgressCallback for Recorder {
    fn on_state_change(&self, file_name: &str, state: UploadState) {
        self.states.lock().unwrap().push(state);
        self.transitions
            .lock()
            .unwrap()
            .push((file_name.to_string(), state));
    }

    fn on_read_progress(&self, _file_name: &str, percent: u8) {
        self.percents.lock().unwrap().push(percent);
    }

    fn on_page_extracted(&self, page_num: usize, total_pages: usize) {
        self.pages.lock().unwrap().push((page_num, total_pages));
    }

    fn on_upload_complete(&self, file_name: &str, page_count: usize) {
        self.completed
            .lock()
            .unwrap()
            .push((file_name.to_string(), page_count));
    }

    fn on_upload_failed(&self, file_name: &str, _error: &str) {
        self.failed.lock().unwrap().push(file_name.to_string());
    }
}
