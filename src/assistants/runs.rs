use std::{collections::HashMap, time::Duration};

use derive_builder::Builder;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    assistants::Tool,
    client::{OpenAiClient, Paginator},
    config::{bounded, Interrupt, PollPolicy},
    transport::ApiRequest,
    ApiResponseOrError, RagError, RemoteError, Usage,
};

/// Upper bound on the best-effort cancel sent when a wait is abandoned.
const REMOTE_CANCEL_GRACE: Duration = Duration::from_secs(5);

/// `include[]` value that adds retrieved chunk text to file search run steps.
pub const FILE_SEARCH_RESULT_CONTENT: &str =
    "step_details.tool_calls[*].file_search.results[*].content";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Run {
    pub id: String,
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub created_at: u64,
    /// The ID of the assistant used for this run.
    pub assistant_id: String,
    /// The ID of the thread associated with this run.
    pub thread_id: String,
    pub status: RunStatus,
    /// The last error that occurred during this run.
    pub last_error: Option<LastError>,
    pub expires_at: Option<u64>,
    pub started_at: Option<u64>,
    pub completed_at: Option<u64>,
    pub cancelled_at: Option<u64>,
    pub failed_at: Option<u64>,
    pub incomplete_details: Option<IncompleteDetails>,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub tools: Vec<Tool>,
    pub usage: Option<Usage>,
    pub metadata: Option<HashMap<String, String>>,
}

/// `queued -> in_progress -> {completed | failed | cancelled | ...}`.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    RequiresAction,
    Cancelling,
    Cancelled,
    Failed,
    Completed,
    Incomplete,
    Expired,
}

impl RunStatus {
    /// The run will not change status on its own any more.
    ///
    /// `requires_action` counts as terminal: it waits on tool outputs that a
    /// file-search-only assistant never asks for.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Queued | Self::InProgress | Self::Cancelling)
    }

    pub fn is_success(&self) -> bool {
        *self == Self::Completed
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct LastError {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct IncompleteDetails {
    pub reason: String,
}

#[derive(Serialize, Builder, Debug, Clone, Default)]
#[builder(pattern = "owned")]
#[builder(name = "CreateRunBuilder")]
#[builder(setter(strip_option, into))]
pub struct CreateRunRequest {
    pub assistant_id: String,
    /// Overrides the assistant's model for this run.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    pub model: Option<String>,
    /// Appended to the assistant's instructions for this run.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    pub additional_instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    pub tools: Option<Vec<Tool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    pub max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    pub metadata: Option<HashMap<String, String>>,
    /// Sent as `include[]` query parameters, not in the body.
    #[serde(skip)]
    #[builder(default)]
    pub include: Vec<String>,
}

impl CreateRunRequest {
    pub fn builder(assistant_id: impl Into<String>) -> CreateRunBuilder {
        CreateRunBuilder::create_empty().assistant_id(assistant_id)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RunStep {
    pub id: String,
    pub run_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub status: String,
    pub step_details: StepDetails,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StepDetails {
    /// `message_creation` or `tool_calls`.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub tool_calls: Vec<StepToolCall>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StepToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub file_search: Option<FileSearchCall>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct FileSearchCall {
    #[serde(default)]
    pub results: Vec<FileSearchResult>,
}

/// One retrieved chunk.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FileSearchResult {
    pub file_id: String,
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub score: f64,
    /// Present only when the step was listed with [`FILE_SEARCH_RESULT_CONTENT`].
    #[serde(default)]
    pub content: Vec<FileSearchResultContent>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FileSearchResultContent {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: Option<String>,
}

impl RunStep {
    pub fn file_search_results(&self) -> impl Iterator<Item = &FileSearchResult> {
        self.step_details
            .tool_calls
            .iter()
            .filter_map(|call| call.file_search.as_ref())
            .flat_map(|search| search.results.iter())
    }
}

impl OpenAiClient {
    pub async fn create_run(
        &self,
        thread_id: &str,
        request: CreateRunRequest,
    ) -> Result<Run, RagError> {
        let route = format!("threads/{thread_id}/runs");
        let body = serde_json::to_value(&request).map_err(|source| RemoteError::Payload {
            route: route.clone(),
            source,
        })?;

        let api_request = request
            .include
            .iter()
            .fold(ApiRequest::new(Method::POST, route), |req, include| {
                req.query("include[]", include.clone())
            })
            .json(body);

        Ok(self.request(api_request).await?)
    }

    pub async fn get_run(&self, thread_id: &str, run_id: &str) -> ApiResponseOrError<Run> {
        self.get(format!("threads/{thread_id}/runs/{run_id}")).await
    }

    pub async fn cancel_run(&self, thread_id: &str, run_id: &str) -> ApiResponseOrError<Run> {
        self.post(
            format!("threads/{thread_id}/runs/{run_id}/cancel"),
            serde_json::json!({}),
        )
        .await
    }

    /// Reads the run status until it settles.
    ///
    /// Every iteration performs at most one status read. Returns the run on
    /// `completed`; any other settled status is [`RagError::RunFailed`].
    /// Exceeding the policy yields [`RagError::Timeout`], and `cancel` firing
    /// yields [`RagError::Cancelled`]. Both also interrupt a status read that
    /// is still in flight, and both end with a best-effort remote cancel.
    pub async fn wait_for_run(
        &self,
        thread_id: &str,
        run_id: &str,
        policy: &PollPolicy,
        cancel: Option<&CancellationToken>,
    ) -> Result<Run, RagError> {
        policy.validate()?;
        let started = Instant::now();
        let deadline = policy.deadline(started);
        let mut attempts = 0u32;
        let mut last_status = None;

        loop {
            let read = bounded(self.get_run(thread_id, run_id), deadline, cancel).await;
            let run = match read {
                Ok(run) => run?,
                Err(interrupt) => {
                    return Err(self
                        .abandon_run(thread_id, run_id, interrupt, attempts, started)
                        .await)
                }
            };
            attempts += 1;

            if last_status != Some(run.status) {
                info!(run_id, status = %run.status, "run status");
                last_status = Some(run.status);
            }

            if run.status.is_success() {
                return Ok(run);
            }
            if run.status.is_terminal() {
                return Err(RagError::RunFailed {
                    run_id: run.id,
                    status: run.status,
                    last_error: run.last_error,
                });
            }

            let now = Instant::now();
            let out_of_attempts = policy.max_attempts.is_some_and(|max| attempts >= max);
            let out_of_time = deadline.is_some_and(|deadline| now >= deadline);
            if out_of_attempts || out_of_time {
                return Err(self
                    .abandon_run(thread_id, run_id, Interrupt::Deadline, attempts, started)
                    .await);
            }

            let pause = match deadline {
                Some(deadline) => policy.interval.min(deadline.saturating_duration_since(now)),
                None => policy.interval,
            };
            if let Err(interrupt) = bounded(tokio::time::sleep(pause), deadline, cancel).await {
                return Err(self
                    .abandon_run(thread_id, run_id, interrupt, attempts, started)
                    .await);
            }
        }
    }

    /// Asks the provider to stop a run nobody waits for any more.
    async fn abandon_run(
        &self,
        thread_id: &str,
        run_id: &str,
        interrupt: Interrupt,
        attempts: u32,
        started: Instant,
    ) -> RagError {
        match tokio::time::timeout(REMOTE_CANCEL_GRACE, self.cancel_run(thread_id, run_id)).await
        {
            Ok(Ok(run)) => info!(run_id, status = %run.status, "requested remote cancel"),
            Ok(Err(err)) => warn!(run_id, "failed to cancel run remotely: {err}"),
            Err(_) => warn!(run_id, "remote cancel got no answer within {REMOTE_CANCEL_GRACE:?}"),
        }

        match interrupt {
            Interrupt::Deadline => RagError::Timeout {
                id: run_id.to_string(),
                attempts,
                elapsed: started.elapsed(),
            },
            Interrupt::Cancelled => RagError::Cancelled {
                id: run_id.to_string(),
            },
        }
    }

    /// Steps of a run, with retrieved chunk text included.
    pub fn list_run_steps(&self, thread_id: &str, run_id: &str) -> Paginator<'_, RunStep> {
        self.paginate(
            format!("threads/{thread_id}/runs/{run_id}/steps"),
            vec![
                ("order".to_string(), "asc".to_string()),
                ("include[]".to_string(), FILE_SEARCH_RESULT_CONTENT.to_string()),
            ],
        )
    }
}
