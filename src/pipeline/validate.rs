//! File validation: decide accept/reject before any I/O begins.
//!
//! Validation only looks at the descriptor (name, declared MIME type,
//! declared length). It never touches the byte source, so a rejection has no
//! side effects and can be reported immediately.

use crate::config::ChatConfig;
use crate::error::IngestError;
use crate::model::{FileDescriptor, FileSource};
use tracing::debug;

/// A descriptor that passed validation. Only the byte reader consumes it.
#[derive(Debug)]
pub struct ValidatedFile {
    file: FileDescriptor,
}

impl ValidatedFile {
    pub fn name(&self) -> &str {
        &self.file.name
    }

    pub fn mime_type(&self) -> &str {
        &self.file.mime_type
    }

    pub fn byte_length(&self) -> Option<u64> {
        self.file.byte_length
    }

    pub(crate) fn into_parts(self) -> (String, Option<u64>, FileSource) {
        (self.file.name, self.file.byte_length, self.file.source)
    }
}

/// Accepts only the configured MIME type, optionally under a size cap.
#[derive(Debug, Clone)]
pub struct FileValidator {
    accepted_mime_type: String,
    max_file_bytes: Option<u64>,
}

impl FileValidator {
    pub fn new(config: &ChatConfig) -> Self {
        Self {
            accepted_mime_type: config.accepted_mime_type.clone(),
            max_file_bytes: config.max_file_bytes,
        }
    }

    /// Check a descriptor without consuming it.
    pub fn check(&self, file: &FileDescriptor) -> Result<(), IngestError> {
        if file.mime_type != self.accepted_mime_type {
            debug!(
                "Rejecting '{}': type '{}' is not '{}'",
                file.name, file.mime_type, self.accepted_mime_type
            );
            return Err(IngestError::InvalidType {
                file_name: file.name.clone(),
                declared: file.mime_type.clone(),
            });
        }

        if let (Some(limit), Some(size)) = (self.max_file_bytes, file.byte_length) {
            if size > limit {
                debug!("Rejecting '{}': {} bytes > {} limit", file.name, size, limit);
                return Err(IngestError::TooLarge {
                    file_name: file.name.clone(),
                    size,
                    limit,
                });
            }
        }

        Ok(())
    }

    /// Validate and take ownership of the descriptor.
    pub fn validate(&self, file: FileDescriptor) -> Result<ValidatedFile, IngestError> {
        self.check(&file)?;
        Ok(ValidatedFile { file })
    }
}
