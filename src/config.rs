//! Session settings: model, naming, store expiration and the run poll policy.
use std::{future::Future, str::FromStr, time::Duration};

use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{assistants::files::FilePurpose, RagError};

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(600);

pub const MODEL_VAR: &str = "RAG_MODEL";
pub const POLL_INTERVAL_VAR: &str = "RAG_POLL_INTERVAL_MS";
pub const POLL_MAX_ATTEMPTS_VAR: &str = "RAG_POLL_MAX_ATTEMPTS";
pub const POLL_TIMEOUT_VAR: &str = "RAG_POLL_TIMEOUT_SECS";
pub const STORE_EXPIRY_DAYS_VAR: &str = "RAG_STORE_EXPIRY_DAYS";
pub const REQUEST_TIMEOUT_VAR: &str = "RAG_REQUEST_TIMEOUT_SECS";

/// Bounds on how long a pending remote object is polled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Sleep between two status reads.
    pub interval: Duration,
    /// Maximum number of status reads.
    pub max_attempts: Option<u32>,
    /// Wall-clock budget measured from the first read.
    pub timeout: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_attempts: None,
            timeout: Some(DEFAULT_POLL_TIMEOUT),
        }
    }
}

impl PollPolicy {
    pub fn validate(&self) -> Result<(), RagError> {
        if self.max_attempts.is_none() && self.timeout.is_none() {
            return Err(RagError::config(
                "poll policy needs a maximum attempt count or a timeout",
            ));
        }
        if self.max_attempts == Some(0) {
            return Err(RagError::config("poll policy max_attempts must be positive"));
        }
        Ok(())
    }

    /// Instant after which a wait started at `started` gives up.
    pub(crate) fn deadline(&self, started: Instant) -> Option<Instant> {
        self.timeout.map(|timeout| started + timeout)
    }
}

/// Why a bounded wait stopped before its work finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Interrupt {
    Deadline,
    Cancelled,
}

/// Drives `work` until it completes, `deadline` passes or `cancel` fires.
///
/// Cancellation wins over the deadline, and both win over work that is
/// ready at the same poll. In-flight requests are dropped, not awaited.
pub(crate) async fn bounded<F>(
    work: F,
    deadline: Option<Instant>,
    cancel: Option<&CancellationToken>,
) -> Result<F::Output, Interrupt>
where
    F: Future,
{
    let expired = async move {
        match deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending::<()>().await,
        }
    };
    let cancelled = async move {
        match cancel {
            Some(token) => token.cancelled().await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        biased;
        _ = cancelled => Err(Interrupt::Cancelled),
        _ = expired => Err(Interrupt::Deadline),
        output = work => Ok(output),
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExpirationAnchor {
    #[default]
    LastActiveAt,
}

/// When a vector store expires. Serialises as the API's `expires_after` object.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct ExpirationPolicy {
    pub anchor: ExpirationAnchor,
    pub days: u32,
}

impl ExpirationPolicy {
    pub fn days(days: u32) -> Self {
        Self {
            anchor: ExpirationAnchor::LastActiveAt,
            days,
        }
    }

    pub fn validate(&self) -> Result<(), RagError> {
        if self.days == 0 {
            return Err(RagError::invalid_input(
                "vector store expiration must be at least one day",
            ));
        }
        Ok(())
    }
}

impl Default for ExpirationPolicy {
    fn default() -> Self {
        Self::days(7)
    }
}

#[derive(Debug, Clone, Builder)]
#[builder(pattern = "owned")]
#[builder(name = "SessionConfigBuilder")]
#[builder(setter(into))]
#[builder(build_fn(validate = "Self::validate", error = "RagError"))]
pub struct SessionConfig {
    /// Model the assistant runs on. Required.
    pub model: String,
    #[builder(default = "\"Document assistant\".to_string()")]
    pub assistant_name: String,
    #[builder(default = "DEFAULT_INSTRUCTIONS.to_string()")]
    pub instructions: String,
    #[builder(default = "\"rag-session\".to_string()")]
    pub vector_store_name: String,
    #[builder(default)]
    pub expiration: ExpirationPolicy,
    #[builder(default = "FilePurpose::Assistants")]
    pub file_purpose: FilePurpose,
    /// Upper bound on retrieved chunks per file search; provider default when unset.
    #[builder(default, setter(strip_option))]
    pub max_num_results: Option<u32>,
    #[builder(default)]
    pub poll: PollPolicy,
    /// Per-request HTTP timeout for the real transport; none when unset.
    #[builder(default, setter(strip_option))]
    pub request_timeout: Option<Duration>,
    /// Wait for each attached file to finish indexing before returning from upload.
    #[builder(default = "true")]
    pub wait_for_indexing: bool,
}

const DEFAULT_INSTRUCTIONS: &str = "You answer questions using only the attached documents. \
Cite the document each fact comes from. If the documents do not contain the answer, say so.";

impl SessionConfigBuilder {
    fn validate(&self) -> Result<(), RagError> {
        if let Some(model) = &self.model {
            if model.trim().is_empty() {
                return Err(RagError::config("model must not be empty"));
            }
        }
        if let Some(poll) = &self.poll {
            poll.validate()?;
        }
        Ok(())
    }
}

impl From<derive_builder::UninitializedFieldError> for RagError {
    fn from(err: derive_builder::UninitializedFieldError) -> Self {
        RagError::Config(format!("`{}` must be set", err.field_name()))
    }
}

impl SessionConfig {
    pub fn builder(model: impl Into<String>) -> SessionConfigBuilder {
        SessionConfigBuilder::default().model(model)
    }

    pub fn from_env() -> Result<Self, RagError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from `RAG_*` variables, falling back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, RagError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let model = lookup(MODEL_VAR).unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let mut poll = PollPolicy::default();

        if let Some(ms) = parse_var::<u64, _>(&lookup, POLL_INTERVAL_VAR)? {
            poll.interval = Duration::from_millis(ms);
        }
        if let Some(attempts) = parse_var::<u32, _>(&lookup, POLL_MAX_ATTEMPTS_VAR)? {
            poll.max_attempts = Some(attempts);
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, POLL_TIMEOUT_VAR)? {
            // 0 disables the wall-clock bound; max_attempts must then be set.
            poll.timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }

        let mut builder = Self::builder(model).poll(poll);
        if let Some(days) = parse_var::<u32, _>(&lookup, STORE_EXPIRY_DAYS_VAR)? {
            builder = builder.expiration(ExpirationPolicy::days(days));
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, REQUEST_TIMEOUT_VAR)? {
            if secs > 0 {
                builder = builder.request_timeout(Duration::from_secs(secs));
            }
        }

        builder.build()
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, RagError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|err| RagError::Config(format!("invalid `{key}` value `{raw}`: {err}"))),
    }
}
