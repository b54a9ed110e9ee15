use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use futures::future::join_all;
use std::path::Path;
use std::sync::Arc;

use crate::error::StagingError;
use crate::models::AttachmentRef;
use crate::preview::PreviewRegistry;

pub const MAX_FILE_BYTES: usize = 10 * 1024 * 1024;
pub const MAX_TEXT_BYTES: usize = 4 * 1024 * 1024;

/// A completed file handed over by a picker, camera, recorder or drag-and-drop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl RawFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes: bytes.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagingLimits {
    pub max_bytes: usize,
    pub max_text_bytes: usize,
}

impl Default for StagingLimits {
    fn default() -> Self {
        Self {
            max_bytes: MAX_FILE_BYTES,
            max_text_bytes: MAX_TEXT_BYTES,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MediaKind {
    Image,
    Pdf,
    Text,
    Audio,
    Video,
}

fn classify(mime_essence: &str) -> Option<MediaKind> {
    match mime_essence {
        m if m.starts_with("image/") => Some(MediaKind::Image),
        "application/pdf" => Some(MediaKind::Pdf),
        "text/plain" => Some(MediaKind::Text),
        m if m.starts_with("audio/") => Some(MediaKind::Audio),
        m if m.starts_with("video/") => Some(MediaKind::Video),
        _ => None,
    }
}

/// `audio/webm;codecs=opus` -> `audio/webm`. Empty means unknown binary.
fn mime_essence(mime_type: &str) -> String {
    let essence = mime_type.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    if essence.is_empty() {
        "application/octet-stream".to_string()
    } else {
        essence
    }
}

/// Validates raw files and turns them into transport-ready attachments.
#[derive(Debug, Clone)]
pub struct AttachmentStager {
    previews: Arc<PreviewRegistry>,
    limits: StagingLimits,
}

impl AttachmentStager {
    pub fn new(previews: Arc<PreviewRegistry>) -> Self {
        Self {
            previews,
            limits: StagingLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: StagingLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn previews(&self) -> &Arc<PreviewRegistry> {
        &self.previews
    }

    pub fn stage(&self, file: RawFile) -> Result<AttachmentRef, StagingError> {
        let mime_type = mime_essence(&file.mime_type);
        let size = file.bytes.len();

        if size > self.limits.max_bytes {
            return Err(StagingError::FileTooLarge {
                name: file.name,
                size,
                limit: self.limits.max_bytes,
            });
        }

        let Some(kind) = classify(&mime_type) else {
            return Err(StagingError::UnsupportedType {
                name: file.name,
                mime_type,
            });
        };

        let staged = match kind {
            MediaKind::Text => {
                if size > self.limits.max_text_bytes {
                    return Err(StagingError::FileTooLarge {
                        name: file.name,
                        size,
                        limit: self.limits.max_text_bytes,
                    });
                }
                let text = String::from_utf8(file.bytes).map_err(|e| StagingError::ReadFailure {
                    name: file.name.clone(),
                    reason: format!("not valid UTF-8 text: {}", e),
                })?;
                AttachmentRef {
                    name: file.name,
                    mime_type,
                    inline_data: None,
                    text_content: Some(text),
                    preview_ref: None,
                }
            }
            MediaKind::Image | MediaKind::Pdf | MediaKind::Audio | MediaKind::Video => {
                let preview_ref = (kind == MediaKind::Image)
                    .then(|| self.previews.allocate(&mime_type, &file.bytes));
                AttachmentRef {
                    inline_data: Some(BASE64_STANDARD.encode(&file.bytes)),
                    name: file.name,
                    mime_type,
                    text_content: None,
                    preview_ref,
                }
            }
        };

        log::debug!("Staged '{}' as {} ({} bytes)", staged.name, staged.mime_type, size);
        Ok(staged)
    }

    /// Stages every file independently; one failure never blocks the others.
    /// Results are reported in input order.
    pub async fn stage_all(&self, files: Vec<RawFile>) -> Vec<Result<AttachmentRef, StagingError>> {
        let tasks = files.into_iter().map(|file| {
            let stager = self.clone();
            let name = file.name.clone();
            async move {
                match tokio::task::spawn_blocking(move || stager.stage(file)).await {
                    Ok(result) => result,
                    Err(join_err) => Err(StagingError::ReadFailure {
                        name,
                        reason: join_err.to_string(),
                    }),
                }
            }
        });

        let results = join_all(tasks).await;
        for err in results.iter().filter_map(|r| r.as_ref().err()) {
            log::warn!("Skipping attachment: {}", err);
        }
        results
    }

    /// Reads a file from disk, guessing its mime type from the extension.
    pub async fn stage_path(&self, path: &Path) -> Result<AttachmentRef, StagingError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());

        let metadata = tokio::fs::metadata(path).await.map_err(|e| StagingError::ReadFailure {
            name: name.clone(),
            reason: e.to_string(),
        })?;
        let size = usize::try_from(metadata.len()).unwrap_or(usize::MAX);
        if size > self.limits.max_bytes {
            return Err(StagingError::FileTooLarge {
                name,
                size,
                limit: self.limits.max_bytes,
            });
        }

        let bytes = tokio::fs::read(path).await.map_err(|e| StagingError::ReadFailure {
            name: name.clone(),
            reason: e.to_string(),
        })?;
        let mime_type = mime_guess::from_path(path)
            .first_raw()
            .unwrap_or("application/octet-stream");

        self.stage(RawFile::new(name, mime_type, bytes))
    }
}
