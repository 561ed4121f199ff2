//! Plain-text extraction from source documents.
//!
//! Formats are dispatched by file extension through a lookup table. Each
//! format maps to a function that turns a path into a string; anything not in
//! the table is rejected with [`ExtractError::UnsupportedFormat`].

use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Errors that can occur while extracting text from a file.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("Unsupported file format '{0}'. Use PDF or TXT.")]
    UnsupportedFormat(String),

    #[error("{} is not valid UTF-8 text", .0.display())]
    InvalidEncoding(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to extract PDF text: {0}")]
    Pdf(String),
}

impl ExtractError {
    pub fn kind(&self) -> &'static str {
        match self {
            ExtractError::FileNotFound(_) => "FileNotFound",
            ExtractError::UnsupportedFormat(_) => "UnsupportedFormat",
            ExtractError::InvalidEncoding(_) => "InvalidEncoding",
            ExtractError::Io(_) => "Io",
            ExtractError::Pdf(_) => "ExtractionError",
        }
    }
}

pub type Result<T> = std::result::Result<T, ExtractError>;

/// Document formats the extractor understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    PlainText,
}

const FORMATS: &[(&str, DocumentFormat)] = &[
    ("pdf", DocumentFormat::Pdf),
    ("txt", DocumentFormat::PlainText),
];

impl DocumentFormat {
    /// Looks up the format for a path's (case-insensitive) extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        FORMATS
            .iter()
            .find(|(known, _)| *known == ext)
            .map(|(_, format)| *format)
            .ok_or(ExtractError::UnsupportedFormat(ext))
    }

    async fn extract(self, path: PathBuf) -> Result<String> {
        match self {
            DocumentFormat::Pdf => extract_pdf(path).await,
            DocumentFormat::PlainText => extract_text(path).await,
        }
    }
}

/// Returns true when `path` has an extension the extractor can handle.
pub fn is_supported(path: &Path) -> bool {
    DocumentFormat::from_path(path).is_ok()
}

/// Extracts the text content of a PDF or TXT file.
///
/// # Errors
///
/// - [`ExtractError::FileNotFound`] if `path` does not exist
/// - [`ExtractError::UnsupportedFormat`] for any extension other than `pdf`/`txt`
pub async fn extract(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Err(ExtractError::FileNotFound(path.to_path_buf()));
    }

    let format = DocumentFormat::from_path(path)?;
    debug!(file = %path.display(), ?format, "Extracting text");
    format.extract(path.to_path_buf()).await
}

async fn extract_text(path: PathBuf) -> Result<String> {
    let bytes = tokio::fs::read(&path).await?;
    String::from_utf8(bytes).map_err(|_| ExtractError::InvalidEncoding(path))
}

/// Pages are concatenated in document order by `pdf-extract`.
async fn extract_pdf(path: PathBuf) -> Result<String> {
    tokio::task::spawn_blocking(move || pdf_extract::extract_text(&path))
        .await
        .map_err(|e| ExtractError::Pdf(format!("extraction task failed: {e}")))?
        .map_err(|e| ExtractError::Pdf(e.to_string()))
}
