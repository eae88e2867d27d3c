//! Storage helpers for uploaded document content on disk.

use std::io;
use std::path::{Component, Path, PathBuf};

use sha2::{Digest, Sha256};

/// Location of a stored file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    /// Path relative to the store root.
    pub relative_path: String,
    /// SHA-256 of the content, hex encoded.
    pub content_hash: String,
}

/// Content-addressed file store rooted at the documents directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Write content to disk and return where it went.
    ///
    /// Layout: `{hash[0..2]}/{sanitized_basename}-{hash[0..8]}.{extension}`
    pub async fn save(
        &self,
        original_filename: &str,
        mime_type: &str,
        content: &[u8],
    ) -> io::Result<StoredFile> {
        let content_hash = hex::encode(Sha256::digest(content));
        let relative = relative_storage_path(&content_hash, original_filename, mime_type);
        let full_path = self.root.join(&relative);

        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full_path, content).await?;

        Ok(StoredFile {
            relative_path: relative.to_string_lossy().replace('\\', "/"),
            content_hash,
        })
    }

    /// Read a stored file back.
    pub async fn read(&self, relative_path: &str) -> io::Result<Vec<u8>> {
        tokio::fs::read(self.absolute_path(relative_path)?).await
    }

    /// Remove a stored file. A file that is already gone is not an error.
    pub async fn delete(&self, relative_path: &str) -> io::Result<()> {
        match tokio::fs::remove_file(self.absolute_path(relative_path)?).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Resolve a stored path against the root, refusing anything that escapes it.
    pub fn absolute_path(&self, relative_path: &str) -> io::Result<PathBuf> {
        let rel = Path::new(relative_path);
        let escapes = rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if relative_path.is_empty() || escapes {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid storage path: {}", relative_path),
            ));
        }
        Ok(self.root.join(rel))
    }
}

/// Relative storage path for content with the given hash.
pub fn relative_storage_path(content_hash: &str, original_filename: &str, mime_type: &str) -> PathBuf {
    let stem = Path::new(original_filename)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let filename = format!(
        "{}-{}.{}",
        sanitize_filename(&stem),
        &content_hash[..8],
        mime_to_extension(mime_type)
    );
    PathBuf::from(&content_hash[..2]).join(filename)
}

/// Make a filename safe for any filesystem.
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let trimmed = sanitized.trim_matches(|c: char| c == '_' || c == '.' || c.is_whitespace());
    if trimmed.is_empty() {
        "document".to_string()
    } else {
        trimmed.chars().take(100).collect()
    }
}

/// Map MIME type to file extension.
pub fn mime_to_extension(mime: &str) -> &'static str {
    match mime {
        "application/pdf" => "pdf",
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/tiff" => "tiff",
        "image/webp" => "webp",
        _ => "bin",
    }
}
