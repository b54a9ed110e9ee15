use std::time::Duration;

use thiserror::Error;

use crate::i18n::Localizer;

/// Per-file staging failures. Reported individually, never abort a batch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StagingError {
    #[error("File '{name}' is too large ({size} bytes, limit {limit} bytes)")]
    FileTooLarge { name: String, size: usize, limit: usize },

    #[error("File '{name}' has unsupported type '{mime_type}'")]
    UnsupportedType { name: String, mime_type: String },

    #[error("Failed to read file '{name}': {reason}")]
    ReadFailure { name: String, reason: String },
}

impl StagingError {
    pub fn file_name(&self) -> &str {
        match self {
            StagingError::FileTooLarge { name, .. }
            | StagingError::UnsupportedType { name, .. }
            | StagingError::ReadFailure { name, .. } => name,
        }
    }

    /// User-facing report line in the active locale.
    pub fn localized(&self, localizer: &dyn Localizer) -> String {
        let detail = match self {
            StagingError::FileTooLarge { name, limit, .. } => localizer.format(
                "chat.errorFileTooLarge",
                &[("fileName", name.as_str()), ("limit", format_size(*limit).as_str())],
            ),
            StagingError::UnsupportedType { mime_type, .. } => {
                localizer.format("chat.errorUnsupportedFileType", &[("fileType", mime_type.as_str())])
            }
            StagingError::ReadFailure { reason, .. } => {
                localizer.format("chat.errorReadingFile", &[("reason", reason.as_str())])
            }
        };
        localizer.format(
            "chat.errorProcessingFile",
            &[("fileName", self.file_name()), ("error", detail.as_str())],
        )
    }
}

fn format_size(bytes: usize) -> String {
    const MB: usize = 1024 * 1024;
    if bytes >= MB && bytes % MB == 0 {
        format!("{} MB", bytes / MB)
    } else {
        format!("{} bytes", bytes)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("Nothing to send: no text and no usable attachment")]
    EmptyRequest,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("API key is not configured")]
    AuthMissing,

    #[error("Network failure: {0}")]
    NetworkFailure(String),

    #[error("Provider rejected the request{}: {message}", status.map(|s| format!(" ({s})")).unwrap_or_default())]
    ProviderRejected { status: Option<u16>, message: String },

    #[error("No response within {0:?}")]
    Timeout(Duration),

    #[error("Request interrupted before a response arrived")]
    Interrupted,
}

impl ProviderError {
    /// Text shown in the conversation log when a turn fails.
    pub fn localized(&self, localizer: &dyn Localizer) -> String {
        match self {
            ProviderError::AuthMissing => localizer.text("errors.apiKeyMissing"),
            ProviderError::NetworkFailure(reason) => {
                localizer.format("errors.networkFailure", &[("reason", reason.as_str())])
            }
            ProviderError::ProviderRejected { message, .. } if message.trim().is_empty() => {
                localizer.text("errors.generalApiError")
            }
            ProviderError::ProviderRejected { status: Some(status), message } => localizer.format(
                "errors.providerRejectedStatus",
                &[("status", status.to_string().as_str()), ("message", message.as_str())],
            ),
            ProviderError::ProviderRejected { status: None, message } => {
                localizer.format("errors.providerRejected", &[("message", message.as_str())])
            }
            ProviderError::Timeout(limit) => {
                localizer.format("errors.timeout", &[("limit", format!("{:?}", limit).as_str())])
            }
            ProviderError::Interrupted => localizer.text("errors.interrupted"),
        }
    }
}

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Storage quota exceeded ({size} bytes, limit {limit} bytes)")]
    QuotaExceeded { size: usize, limit: usize },

    #[error("Corrupt record under '{key}': {reason}")]
    CorruptRecord { key: String, reason: String },

    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for PersistenceError {
    fn from(err: sqlx::Error) -> Self {
        PersistenceError::Backend(err.to_string())
    }
}

/// Errors surfaced by a turn submission.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    #[error("Please enter a message or attach a file")]
    EmptyInput,

    #[error("A request is already in flight for this conversation")]
    Busy,

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("No user is signed in")]
    NotSignedIn,

    #[error("Username cannot be empty")]
    UsernameRequired,

    #[error("Current password is incorrect")]
    CurrentPasswordIncorrect,

    #[error("New password must be at least {0} characters")]
    PasswordTooShort(usize),

    #[error("Credential store error: {0}")]
    CredentialStore(String),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}
