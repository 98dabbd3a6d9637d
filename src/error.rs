//! Failure taxonomy for the processing pipeline.
//!
//! Per-file failures are recovered locally and reported in
//! `processing_info.failed_files`; only [`FailureKind::ProviderAuthError`]
//! aborts a batch (an invalid or out-of-credit key fails identically for
//! every remaining file).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classified failure for a single file or report request.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    #[error("unsupported file format")]
    UnsupportedFormat,
    #[error("file exceeds the size limit")]
    FileTooLarge,
    #[error("text extraction / OCR failed")]
    OcrFailure,
    #[error("provider authentication or credit failure")]
    ProviderAuthError,
    #[error("provider response was not a valid product list")]
    ProviderResponseInvalid,
    #[error("provider call timed out")]
    ProviderTimeout,
    #[error("session unknown or expired")]
    UnknownSession,
}

impl FailureKind {
    /// Batch-fatal failures stop processing of the remaining files.
    pub fn is_batch_fatal(&self) -> bool {
        matches!(self, FailureKind::ProviderAuthError)
    }
}

/// A failure tied to one uploaded file, carried into `processing_info`.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{file}: {message}")]
pub struct FileFailure {
    pub file: String,
    pub error: FailureKind,
    pub message: String,
}

impl FileFailure {
    pub fn new(file: impl Into<String>, error: FailureKind, message: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            error,
            message: message.into(),
        }
    }
}

/// Sniff auth/credit failures out of a provider error body.
///
/// Providers disagree on status codes for exhausted credits (some return 429,
/// some 400 with a quota message), so the body text is checked as well.
pub fn is_auth_failure(status: u16, body: &str) -> bool {
    if status == 401 || status == 403 {
        return true;
    }
    let lower = body.to_lowercase();
    ["insufficient_quota", "quota", "credit", "invalid api key", "invalid x-api-key"]
        .iter()
        .any(|needle| lower.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failure_by_status() {
        assert!(is_auth_failure(401, ""));
        assert!(is_auth_failure(403, "forbidden"));
        assert!(!is_auth_failure(500, "internal error"));
    }

    #[test]
    fn auth_failure_by_body_keyword() {
        assert!(is_auth_failure(429, "insufficient_quota: upgrade your plan"));
        assert!(is_auth_failure(400, "Your credit balance is too low"));
        assert!(!is_auth_failure(429, "rate limit exceeded, retry later"));
    }

    #[test]
    fn only_auth_is_batch_fatal() {
        assert!(FailureKind::ProviderAuthError.is_batch_fatal());
        assert!(!FailureKind::ProviderTimeout.is_batch_fatal());
        assert!(!FailureKind::OcrFailure.is_batch_fatal());
    }
}
