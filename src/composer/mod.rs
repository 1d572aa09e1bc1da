//! Composer: pending text plus staged attachments for one outgoing message.

pub mod codec;
mod preview;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use thiserror::Error;

use crate::models::{Attachment, AttachmentKind, MessageBody};

pub use preview::{PreviewHandle, PreviewRegistry};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ComposeError {
    #[error("nothing to send: message is empty and no files are attached")]
    Empty,
}

/// A file waiting to be uploaded with the next message.
pub struct StagedFile {
    pub name: String,
    pub size: u64,
    pub mime: String,
    pub path: PathBuf,
    preview: Option<PreviewHandle>,
}

impl StagedFile {
    pub fn kind(&self) -> AttachmentKind {
        AttachmentKind::from_mime(&self.mime)
    }

    pub fn has_preview(&self) -> bool {
        self.preview.is_some()
    }
}

/// File metadata as picked by the user, before staging.
#[derive(Debug, Clone)]
pub struct LocalFile {
    pub name: String,
    pub size: u64,
    pub mime: String,
    pub path: PathBuf,
}

impl LocalFile {
    /// Read name and size from disk; MIME type is guessed from the extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        let meta = fs::metadata(path)
            .with_context(|| format!("Failed to read file metadata for {}", path.display()))?;
        anyhow::ensure!(meta.is_file(), "{} is not a regular file", path.display());

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());

        Ok(Self {
            mime: guess_mime(&name).to_string(),
            name,
            size: meta.len(),
            path: path.to_path_buf(),
        })
    }
}

/// Everything taken out of the composer for one send.
///
/// Dropping it releases any previews of the files it carried.
pub struct Outgoing {
    pub text: String,
    pub files: Vec<StagedFile>,
}

impl Outgoing {
    /// Combine the text with the attachments the uploads produced.
    pub fn into_body(self, uploaded: Vec<Attachment>) -> MessageBody {
        MessageBody {
            text: self.text,
            attachments: uploaded,
        }
    }
}

/// State for the compose box.
pub struct Composer {
    /// Current input text.
    pub text: String,
    staged: Vec<StagedFile>,
    previews: PreviewRegistry,
}

impl Composer {
    pub fn new(previews: PreviewRegistry) -> Self {
        Self {
            text: String::new(),
            staged: Vec::new(),
            previews,
        }
    }

    pub fn staged(&self) -> &[StagedFile] {
        &self.staged
    }

    /// Stage a file. Returns false if a file with the same name and size is
    /// already staged.
    pub fn stage(&mut self, file: LocalFile) -> bool {
        let duplicate = self
            .staged
            .iter()
            .any(|s| s.name == file.name && s.size == file.size);
        if duplicate {
            tracing::debug!("{} already staged, skipping", file.name);
            return false;
        }

        let preview = (AttachmentKind::from_mime(&file.mime) == AttachmentKind::Image)
            .then(|| self.previews.acquire(&file.path));

        self.staged.push(StagedFile {
            name: file.name,
            size: file.size,
            mime: file.mime,
            path: file.path,
            preview,
        });
        true
    }

    /// Remove a staged file by position. Its preview is released.
    pub fn remove(&mut self, index: usize) -> bool {
        if index < self.staged.len() {
            self.staged.remove(index);
            true
        } else {
            false
        }
    }

    /// Take the message out of the composer, leaving it empty.
    ///
    /// Fails, leaving the composer untouched, when there is neither text nor
    /// any staged file.
    pub fn take(&mut self) -> Result<Outgoing, ComposeError> {
        let text = self.text.trim().to_string();
        if text.is_empty() && self.staged.is_empty() {
            return Err(ComposeError::Empty);
        }
        self.text.clear();
        Ok(Outgoing {
            text,
            files: std::mem::take(&mut self.staged),
        })
    }
}

fn guess_mime(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "txt" | "md" => "text/plain",
        "zip" => "application/zip",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, size: u64) -> LocalFile {
        LocalFile {
            name: name.to_string(),
            size,
            mime: guess_mime(name).to_string(),
            path: PathBuf::from(name),
        }
    }

    #[test]
    fn test_empty_send_rejected() {
        let mut composer = Composer::new(PreviewRegistry::new());
        composer.text = "   \n ".to_string();
        assert!(matches!(composer.take(), Err(ComposeError::Empty)));
        // Nothing was consumed.
        assert_eq!(composer.text, "   \n ");
    }

    #[test]
    fn test_attachment_only_send_allowed() {
        let mut composer = Composer::new(PreviewRegistry::new());
        composer.stage(file("report.pdf", 100));
        let out = composer.take().unwrap();
        assert_eq!(out.text, "");
        assert_eq!(out.files.len(), 1);
        assert!(composer.staged().is_empty());
    }

    #[test]
    fn test_duplicate_staging_skipped() {
        let mut composer = Composer::new(PreviewRegistry::new());
        assert!(composer.stage(file("a.png", 10)));
        assert!(!composer.stage(file("a.png", 10)));
        // Same name, different size is a different file.
        assert!(composer.stage(file("a.png", 11)));
        assert_eq!(composer.staged().len(), 2);
    }

    #[test]
    fn test_previews_released_on_every_path() {
        let registry = PreviewRegistry::new();
        {
            let mut composer = Composer::new(registry.clone());
            composer.stage(file("one.png", 1));
            composer.stage(file("two.jpg", 2));
            composer.stage(file("doc.pdf", 3));
            assert_eq!(registry.live_count(), 2);
            assert!(!composer.staged()[2].has_preview());

            // Manual removal.
            assert!(composer.remove(0));
            assert_eq!(registry.live_count(), 1);

            // Send: previews live until the outgoing message is dropped.
            let out = composer.take().unwrap();
            assert_eq!(registry.live_count(), 1);
            let body = out.into_body(Vec::new());
            assert!(body.attachments.is_empty());
            assert_eq!(registry.live_count(), 0);

            // Teardown with something still staged.
            composer.stage(file("three.gif", 4));
            assert_eq!(registry.live_count(), 1);
        }
        assert_eq!(registry.live_count(), 0);
    }

    #[test]
    fn test_guess_mime() {
        assert_eq!(guess_mime("photo.JPG"), "image/jpeg");
        assert_eq!(guess_mime("notes"), "application/octet-stream");
        assert_eq!(
            AttachmentKind::from_mime(guess_mime("x.webp")),
            AttachmentKind::Image
        );
    }
}
