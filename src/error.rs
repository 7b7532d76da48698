use std::{path::PathBuf, time::Duration};

use thiserror::Error;

use crate::{
    assistants::{
        runs::{LastError, RunStatus},
        vector_stores::VectorStoreFileStatus,
    },
    OpenAiError,
};

/// A failed exchange with the provider.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The request never produced an HTTP response (DNS, TLS, reset, timeout).
    #[error("transport error: {0}")]
    Transport(String),

    #[error("API error ({status}): {error}")]
    Api { status: u16, error: OpenAiError },

    #[error("malformed payload for `{route}`: {source}")]
    Payload {
        route: String,
        #[source]
        source: serde_json::Error,
    },
}

impl RemoteError {
    pub fn api(status: u16, error: OpenAiError) -> Self {
        Self::Api { status, error }
    }

    /// Whether repeating the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Api { status, .. } => matches!(status, 408 | 409 | 429) || *status >= 500,
            Self::Payload { .. } => false,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum RagError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("run {run_id} ended with status `{status}`{}", describe_last_error(.last_error))]
    RunFailed {
        run_id: String,
        status: RunStatus,
        last_error: Option<LastError>,
    },

    /// A polled object (run or store file) did not settle within the poll policy.
    #[error("{id} still pending after {attempts} status reads ({elapsed:?})")]
    Timeout {
        id: String,
        attempts: u32,
        elapsed: Duration,
    },

    #[error("indexing of file {file_id} ended with status `{status}`: {message}")]
    IndexingFailed {
        file_id: String,
        status: VectorStoreFileStatus,
        message: String,
    },

    /// The caller stopped waiting on a run or store file.
    #[error("wait for {id} was cancelled by the caller")]
    Cancelled { id: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RagError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Remote(err) => err.is_retryable(),
            _ => false,
        }
    }
}

fn describe_last_error(last_error: &Option<LastError>) -> String {
    match last_error {
        Some(err) => format!(": {} ({})", err.message, err.code),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(status: u16) -> RemoteError {
        RemoteError::api(status, OpenAiError::new("boom".into(), "server_error".into()))
    }

    #[test]
    fn retryable_classification() {
        assert!(RemoteError::Transport("connection reset".into()).is_retryable());
        assert!(api(429).is_retryable());
        assert!(api(500).is_retryable());
        assert!(api(503).is_retryable());
        assert!(!api(400).is_retryable());
        assert!(!api(401).is_retryable());
        assert!(!api(404).is_retryable());

        let payload = serde_json::from_str::<u32>("nope").unwrap_err();
        let err = RemoteError::Payload {
            route: "threads".into(),
            source: payload,
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn status_only_for_api_errors() {
        assert_eq!(api(429).status(), Some(429));
        assert_eq!(RemoteError::Transport("timed out".into()).status(), None);

        let err: RagError = api(401).into();
        assert!(matches!(&err, RagError::Remote(remote) if remote.status() == Some(401)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn run_failed_message_includes_last_error() {
        let err = RagError::RunFailed {
            run_id: "run_1".into(),
            status: RunStatus::Failed,
            last_error: Some(LastError {
                code: "rate_limit_exceeded".into(),
                message: "slow down".into(),
            }),
        };
        assert_eq!(
            err.to_string(),
            "run run_1 ended with status `failed`: slow down (rate_limit_exceeded)"
        );
        assert!(!err.is_retryable());
    }
}
