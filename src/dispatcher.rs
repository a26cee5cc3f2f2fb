//! Document dispatcher: delivers the gated document.
//!
//! A pre-uploaded file reference is preferred; when it is absent or rejected
//! the local file is read and uploaded instead.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::GuideConfig;
use crate::errors::DispatchError;
use crate::ledger::CatalogEntry;
use crate::transport::Messenger;

const FALLBACK_FILE_NAME: &str = "guide.pdf";

/// A deliverable document
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GuideDocument {
    pub name: String,
    pub file_ref: Option<String>,
    pub path: Option<PathBuf>,
}

impl GuideDocument {
    /// Reference recorded on the lead row
    pub fn reference(&self) -> String {
        self.file_ref
            .clone()
            .or_else(|| self.path.as_ref().map(|path| path.display().to_string()))
            .unwrap_or_default()
    }

    fn file_name(&self) -> String {
        self.path
            .as_ref()
            .and_then(|path| path.file_name())
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| FALLBACK_FILE_NAME.to_string())
    }
}

impl From<&GuideConfig> for GuideDocument {
    fn from(config: &GuideConfig) -> Self {
        Self {
            name: config.name.clone(),
            file_ref: config.file_id.clone(),
            path: config.path.clone(),
        }
    }
}

impl From<&CatalogEntry> for GuideDocument {
    fn from(entry: &CatalogEntry) -> Self {
        Self {
            name: entry.name.clone(),
            file_ref: Some(entry.document_ref.clone()),
            path: None,
        }
    }
}

/// How a document reached the visitor
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Delivery {
    ByReference,
    FromFile { bytes: usize },
}

#[derive(Clone)]
pub struct DocumentDispatcher {
    messenger: Arc<dyn Messenger>,
}

impl DocumentDispatcher {
    pub fn new(messenger: Arc<dyn Messenger>) -> Self {
        Self { messenger }
    }

    pub async fn send(
        &self,
        chat_id: i64,
        document: &GuideDocument,
        caption: &str,
    ) -> Result<Delivery, DispatchError> {
        if document.file_ref.is_none() && document.path.is_none() {
            return Err(DispatchError::NoSource);
        }
        let mut causes = Vec::new();

        if let Some(file_ref) = &document.file_ref {
            match self
                .messenger
                .send_document_ref(chat_id, file_ref, caption)
                .await
            {
                Ok(()) => {
                    info!(user_id = %chat_id, document = %document.name, "Document sent by reference");
                    return Ok(Delivery::ByReference);
                }
                Err(e) => {
                    warn!(user_id = %chat_id, document = %document.name, error = %e, "Reference delivery failed");
                    causes.push(format!("reference: {e}"));
                }
            }
        }

        if let Some(path) = &document.path {
            match tokio::fs::read(path).await {
                Ok(bytes) => {
                    let size = bytes.len();
                    debug!(path = %path.display(), size, "Read fallback document");
                    match self
                        .messenger
                        .send_document_bytes(chat_id, &document.file_name(), bytes, caption)
                        .await
                    {
                        Ok(()) => {
                            info!(user_id = %chat_id, document = %document.name, size, "Document uploaded from file");
                            return Ok(Delivery::FromFile { bytes: size });
                        }
                        Err(e) => causes.push(format!("upload: {e}")),
                    }
                }
                Err(e) => causes.push(format!("read {}: {e}", path.display())),
            }
        }

        Err(DispatchError::Exhausted(causes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_prefers_file_id() {
        let doc = GuideDocument {
            name: "wine".to_string(),
            file_ref: Some("BQACAgIAAx".to_string()),
            path: Some(PathBuf::from("/srv/guide.pdf")),
        };
        assert_eq!(doc.reference(), "BQACAgIAAx");
        assert_eq!(doc.file_name(), "guide.pdf");
    }

    #[test]
    fn test_reference_falls_back_to_path() {
        let doc = GuideDocument {
            name: "wine".to_string(),
            file_ref: None,
            path: Some(PathBuf::from("/srv/wine_guide.pdf")),
        };
        assert_eq!(doc.reference(), "/srv/wine_guide.pdf");
        assert_eq!(doc.file_name(), "wine_guide.pdf");
    }
}
