//! Prompts for answering questions about an uploaded document.
//!
//! Every prompt lives here so the answering logic in [`crate::answer`] can
//! change without touching wording, and so tests can inspect prompts without
//! a live provider.
//!
//! Callers can override the default via [`crate::config::ChatConfig::system_prompt`];
//! the constants here are used only when no override is provided.

/// Default system prompt for document-grounded question answering.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a helpful assistant answering questions about a document the user has uploaded.

Follow these rules precisely:

1. GROUNDING
   - Answer using ONLY the document text provided in the next message
   - If the document does not contain the answer, say so plainly
   - Do NOT invent facts, figures, names or quotations

2. CITATIONS
   - Quote short passages verbatim when they support the answer
   - Refer to sections or headings by the wording used in the document

3. STYLE
   - Be concise; prefer a short paragraph or a short list
   - Match the language of the user's question"#;

/// Marker appended when the document text was cut to fit the context budget.
pub const TRUNCATION_MARKER: &str = "\n\n[... document truncated ...]";

/// Build the context message carrying the document text.
///
/// Sent as a separate system message between the prompt and the question.
pub fn document_context(document_text: &str) -> String {
    format!(
        "The uploaded document's text follows between triple quotes:\n\n\"\"\"{}\"\"\"",
        document_text
    )
}

/// Keep at most `max_chars` characters, cutting on a char boundary.
///
/// Returns the input unchanged when it already fits.
pub fn truncate_chars(text: &str, max_chars: usize) -> std::borrow::Cow<'_, str> {
    match text.char_indices().nth(max_chars) {
        None => std::borrow::Cow::Borrowed(text),
        Some((cut, _)) => {
            let mut out = String::with_capacity(cut + TRUNCATION_MARKER.len());
            out.push_str(&text[..cut]);
            out.push_str(TRUNCATION_MARKER);
            std::borrow::Cow::Owned(out)
        }
    }
}
