//! The transient, unpersisted representation of an input file handed to the
//! orchestrator (`spec.md` §3.1 "Document").

use std::path::{Path, PathBuf};

/// A document about to be processed. Never persisted as a blob — only its
/// identity (content hash, size, path) survives into `Letter`.
#[derive(Debug, Clone)]
pub struct Document {
    pub path: PathBuf,
    pub byte_size: u64,
    pub content_hash: String,
    pub mime_hint: String,
}

impl Document {
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.to_string_lossy().into_owned())
    }

    pub fn source_path(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }

    pub fn mime_hint_from_extension(path: &Path) -> String {
        match path.extension().and_then(|e| e.to_str()).map(|e| e.to_lowercase()) {
            Some(ext) if ext == "pdf" => "application/pdf".to_string(),
            Some(ext) if ext == "doc" => "application/msword".to_string(),
            Some(ext) if ext == "docx" => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
                    .to_string()
            },
            Some(other) => format!("application/octet-stream; ext={other}"),
            None => "application/octet-stream".to_string(),
        }
    }
}
