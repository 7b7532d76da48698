//! Retrieval-augmented question answering on top of the OpenAI assistants API.
//!
//! The provider does the heavy lifting (chunking, embedding, search and
//! generation). This crate sequences the remote objects involved:
//! vector store, uploaded files, assistant, thread, run and messages.
//!
//! ```no_run
//! use openai_rag::{config::SessionConfig, session::RagSession, OpenAiClient};
//!
//! # async fn demo() -> Result<(), openai_rag::RagError> {
//! let client = OpenAiClient::from_env()?;
//! let config = SessionConfig::from_env()?;
//! let mut session = RagSession::new(client, config);
//! let answer = session
//!     .answer("Who kept the lighthouse in 1936?", &["test_data/keepers.txt"])
//!     .await?;
//! println!("{}", answer.with_footnotes());
//! # Ok(())
//! # }
//! ```
use serde::{Deserialize, Serialize};

pub mod assistants;
pub mod chat;
pub mod client;
pub mod config;
pub mod error;
pub mod session;
pub mod transport;

pub use client::OpenAiClient;
pub use error::{RagError, RemoteError};

/// Default API root. Routes are appended without a leading slash.
pub const BASE_URL: &str = "https://api.openai.com/v1/";

/// Environment variable holding the API key.
pub const KEY_VAR: &str = "OPENAI_KEY";
/// Environment variable overriding [`BASE_URL`].
pub const BASE_URL_VAR: &str = "OPENAI_BASE_URL";

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct OpenAiError {
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: String,
    pub param: Option<String>,
    pub code: Option<String>,
}

impl OpenAiError {
    pub fn new(message: String, error_type: String) -> OpenAiError {
        OpenAiError {
            message,
            error_type,
            param: None,
            code: None,
        }
    }
}

impl std::fmt::Display for OpenAiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for OpenAiError {}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

pub type ApiResponseOrError<T> = Result<T, RemoteError>;

/// Key and API root used for every request.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    api_key: String,
    base_url: String,
}

impl Credentials {
    /// Creates credentials from an API key and a base URL.
    ///
    /// An empty `base_url` falls back to [`BASE_URL`]. A trailing slash is
    /// appended when missing so routes can be joined directly.
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        let base_url = if base_url.trim().is_empty() {
            BASE_URL.to_string()
        } else if base_url.ends_with('/') {
            base_url
        } else {
            format!("{base_url}/")
        };

        Self {
            api_key: api_key.into(),
            base_url,
        }
    }

    /// Reads `OPENAI_KEY` and, optionally, `OPENAI_BASE_URL`.
    ///
    /// Does not load `.env` files; call `dotenvy::dotenv()` first if needed.
    pub fn from_env() -> Result<Self, RagError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, RagError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup(KEY_VAR)
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| RagError::Config(format!("environment variable `{KEY_VAR}` is not set")))?;
        let base_url = lookup(BASE_URL_VAR).unwrap_or_default();

        Ok(Self::new(api_key, base_url))
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn missing_key_is_config_error() {
        let err = Credentials::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(matches!(err, RagError::Config(_)));
    }

    #[test]
    fn blank_key_is_config_error() {
        let err = Credentials::from_lookup(lookup_from(&[(KEY_VAR, "   ")])).unwrap_err();
        assert!(matches!(err, RagError::Config(_)));
    }

    #[test]
    fn base_url_defaults_and_normalises() {
        let credentials = Credentials::from_lookup(lookup_from(&[(KEY_VAR, "sk-test")])).unwrap();
        assert_eq!(credentials.base_url(), BASE_URL);

        let credentials = Credentials::from_lookup(lookup_from(&[
            (KEY_VAR, "sk-test"),
            (BASE_URL_VAR, "http://localhost:8080/v1"),
        ]))
        .unwrap();
        assert_eq!(credentials.base_url(), "http://localhost:8080/v1/");
    }

    #[test]
    fn debug_redacts_key() {
        let credentials = Credentials::new("sk-secret", "");
        assert!(!format!("{credentials:?}").contains("sk-secret"));
    }
}
