//! Rendering boundary for issued challans.
//!
//! Page layout (PDF, ZIP bundling) belongs to an external formatter; the
//! ledger only hands it assembled [`ChallanDocument`]s. The JSON renderer is
//! the built-in default.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use paybook_payments::ChallanDocument;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("rendering failed: {0}")]
pub struct RenderError(pub String);

/// A rendered file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedDocument {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

pub trait DocumentRenderer: Send + Sync {
    fn render(&self, document: &ChallanDocument) -> Result<RenderedDocument, RenderError>;

    /// One bundle holding `documents` in the given order.
    fn render_archive(&self, documents: &[ChallanDocument]) -> Result<RenderedDocument, RenderError>;
}

#[derive(Debug, Serialize)]
struct ArchiveEntry<'a> {
    file_name: String,
    document: &'a ChallanDocument,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonDocumentRenderer;

impl JsonDocumentRenderer {
    const CONTENT_TYPE: &'static str = "application/json";
    const EXTENSION: &'static str = "json";
}

impl DocumentRenderer for JsonDocumentRenderer {
    fn render(&self, document: &ChallanDocument) -> Result<RenderedDocument, RenderError> {
        let bytes = serde_json::to_vec_pretty(document).map_err(|e| RenderError(e.to_string()))?;
        Ok(RenderedDocument {
            file_name: document.file_name(Self::EXTENSION),
            content_type: Self::CONTENT_TYPE.to_string(),
            bytes,
        })
    }

    fn render_archive(&self, documents: &[ChallanDocument]) -> Result<RenderedDocument, RenderError> {
        let entries: Vec<ArchiveEntry<'_>> = documents
            .iter()
            .map(|document| ArchiveEntry {
                file_name: document.file_name(Self::EXTENSION),
                document,
            })
            .collect();
        let bytes = serde_json::to_vec_pretty(&entries).map_err(|e| RenderError(e.to_string()))?;
        Ok(RenderedDocument {
            file_name: format!("Challans_{}.{}", documents.len(), Self::EXTENSION),
            content_type: Self::CONTENT_TYPE.to_string(),
            bytes,
        })
    }
}
