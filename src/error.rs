use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error shape produced by the remote service: `{message, status, data?}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteError {
    pub message: String,
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RemoteError {
    pub fn new(message: impl Into<String>, status: Option<u16>) -> Self {
        Self {
            message: message.into(),
            status,
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

#[derive(Error, Debug)]
pub enum SyncError {
    /// Remote unreachable or timed out.
    #[error("network: {0}")]
    Network(String),
    #[error("server returned {status}: {message}")]
    Server {
        status: u16,
        message: String,
        data: Option<serde_json::Value>,
    },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("validation: {message}")]
    Validation {
        message: String,
        data: Option<serde_json::Value>,
    },
    /// The target of a queued mutation no longer matches the server.
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("sqlite: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("serde: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid state: {0}")]
    State(&'static str),
}

impl SyncError {
    /// Local persistence failed: the change was not saved anywhere.
    pub fn is_storage(&self) -> bool {
        matches!(self, SyncError::Storage(_) | SyncError::Serde(_))
    }

    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            SyncError::Network(_)
                | SyncError::Server { .. }
                | SyncError::NotFound(_)
                | SyncError::Validation { .. }
                | SyncError::Conflict(_)
        )
    }

    /// HTTP status this error corresponds to, when it came from the remote.
    pub fn status(&self) -> Option<u16> {
        match self {
            SyncError::Server { status, .. } => Some(*status),
            SyncError::NotFound(_) => Some(404),
            SyncError::Validation { .. } => Some(422),
            SyncError::Conflict(_) => Some(409),
            _ => None,
        }
    }
}

impl From<RemoteError> for SyncError {
    fn from(err: RemoteError) -> Self {
        match err.status {
            None => SyncError::Network(err.message),
            Some(400) | Some(422) => SyncError::Validation {
                message: err.message,
                data: err.data,
            },
            Some(404) => SyncError::NotFound(err.message),
            Some(409) => SyncError::Conflict(err.message),
            Some(status) => SyncError::Server {
                status,
                message: err.message,
                data: err.data,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn remote_error_without_status_is_network() {
        let err: SyncError = RemoteError::new("connection refused", None).into();
        assert_matches!(err, SyncError::Network(msg) if msg == "connection refused");
    }

    #[test]
    fn remote_error_status_maps_to_kind() {
        let err: SyncError = RemoteError::new("bad title", Some(422))
            .with_data(serde_json::json!({"field": "title"}))
            .into();
        assert_matches!(err, SyncError::Validation { ref data, .. } if data.is_some());
        assert_eq!(err.status(), Some(422));

        let err: SyncError = RemoteError::new("gone", Some(404)).into();
        assert_matches!(err, SyncError::NotFound(_));

        let err: SyncError = RemoteError::new("boom", Some(500)).into();
        assert_matches!(err, SyncError::Server { status: 500, .. });
        assert!(err.is_remote());
        assert!(!err.is_storage());
    }

    #[test]
    fn storage_kinds() {
        let err = SyncError::from(rusqlite::Error::InvalidQuery);
        assert!(err.is_storage());
        assert!(!err.is_remote());
        assert_eq!(err.status(), None);
    }
}
