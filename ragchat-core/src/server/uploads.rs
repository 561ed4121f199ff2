//! Storage of uploaded source files under `upload_dir/<knowledge base>/`.

use std::io;
use std::path::{Path, PathBuf};

/// Extensions accepted by the upload endpoints.
pub const ALLOWED_EXTENSIONS: &[&str] = &["txt", "pdf", "doc", "docx", "md"];

pub fn allowed_file(filename: &str) -> bool {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| ALLOWED_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Reduces a client-supplied file name to a safe single path component.
///
/// Directory parts are dropped, whitespace becomes `_`, anything outside
/// `[A-Za-z0-9_.-]` is removed and leading/trailing `.`/`_` are trimmed.
pub fn secure_filename(filename: &str) -> String {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or_default();

    let cleaned: String = base
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();

    cleaned.trim_matches(|c| c == '.' || c == '_').to_string()
}

pub fn knowledge_base_dir(upload_dir: &Path, knowledge_base: &str) -> PathBuf {
    upload_dir.join(knowledge_base)
}

/// Writes an upload and returns its path.
pub async fn save(
    upload_dir: &Path,
    knowledge_base: &str,
    filename: &str,
    data: &[u8],
) -> io::Result<PathBuf> {
    let dir = knowledge_base_dir(upload_dir, knowledge_base);
    tokio::fs::create_dir_all(&dir).await?;

    let path = dir.join(filename);
    tokio::fs::write(&path, data).await?;
    Ok(path)
}

/// Removes every upload of a knowledge base. Missing directories are fine.
pub async fn remove_all(upload_dir: &Path, knowledge_base: &str) -> io::Result<()> {
    match tokio::fs::remove_dir_all(knowledge_base_dir(upload_dir, knowledge_base)).await {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
