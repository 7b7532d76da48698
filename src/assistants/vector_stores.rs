use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    client::{OpenAiClient, Paginator},
    config::{bounded, ExpirationPolicy, Interrupt, PollPolicy},
    ApiResponseOrError, RagError,
};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct VectorStore {
    pub id: String,
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub created_at: u64,
    pub name: Option<String>,
    #[serde(default)]
    pub usage_bytes: u64,
    #[serde(default)]
    pub file_counts: FileCounts,
    pub status: VectorStoreStatus,
    pub expires_after: Option<ExpirationPolicy>,
    pub expires_at: Option<u64>,
    pub last_active_at: Option<u64>,
    pub metadata: Option<HashMap<String, String>>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct FileCounts {
    pub in_progress: u32,
    pub completed: u32,
    pub failed: u32,
    pub cancelled: u32,
    pub total: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum VectorStoreStatus {
    Expired,
    InProgress,
    Completed,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct CreateVectorStoreRequest {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_after: Option<ExpirationPolicy>,
}

impl CreateVectorStoreRequest {
    /// Rejects requests the provider would refuse, before sending them.
    pub fn validate(&self) -> Result<(), RagError> {
        if self.name.trim().is_empty() {
            return Err(RagError::invalid_input("vector store name must not be empty"));
        }
        if let Some(expiration) = &self.expires_after {
            expiration.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct VectorStoreFile {
    /// Same as the uploaded file's id.
    pub id: String,
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub created_at: u64,
    pub vector_store_id: String,
    #[serde(default)]
    pub usage_bytes: u64,
    pub status: VectorStoreFileStatus,
    pub last_error: Option<VectorStoreFileError>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct VectorStoreFileError {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum VectorStoreFileStatus {
    InProgress,
    Completed,
    Cancelled,
    Failed,
}

impl OpenAiClient {
    pub async fn create_vector_store(
        &self,
        params: CreateVectorStoreRequest,
    ) -> Result<VectorStore, RagError> {
        params.validate()?;
        Ok(self.post("vector_stores", params).await?)
    }

    pub async fn get_vector_store(&self, vector_store_id: &str) -> ApiResponseOrError<VectorStore> {
        self.get(format!("vector_stores/{vector_store_id}")).await
    }

    pub async fn attach_file_to_vector_store(
        &self,
        vector_store_id: &str,
        file_id: &str,
    ) -> ApiResponseOrError<VectorStoreFile> {
        self.post(
            format!("vector_stores/{vector_store_id}/files"),
            json!({ "file_id": file_id }),
        )
        .await
    }

    pub async fn get_vector_store_file(
        &self,
        vector_store_id: &str,
        file_id: &str,
    ) -> ApiResponseOrError<VectorStoreFile> {
        self.get(format!("vector_stores/{vector_store_id}/files/{file_id}"))
            .await
    }

    pub fn list_vector_store_files(&self, vector_store_id: &str) -> Paginator<'_, VectorStoreFile> {
        self.paginate(
            format!("vector_stores/{vector_store_id}/files"),
            vec![("order".to_string(), "asc".to_string())],
        )
    }

    /// Polls an attached file until it leaves `in_progress`.
    ///
    /// Indexing that ends `failed` or `cancelled` becomes
    /// [`RagError::IndexingFailed`] with the provider's `last_error` message.
    /// The policy's deadline and `cancel` also interrupt a read in flight.
    pub async fn wait_for_vector_store_file(
        &self,
        mut file: VectorStoreFile,
        policy: &PollPolicy,
        cancel: Option<&CancellationToken>,
    ) -> Result<VectorStoreFile, RagError> {
        policy.validate()?;
        let started = Instant::now();
        let deadline = policy.deadline(started);
        let mut attempts = 0;

        while file.status == VectorStoreFileStatus::InProgress {
            let interrupt = if policy.max_attempts.is_some_and(|max| attempts >= max) {
                Some(Interrupt::Deadline)
            } else {
                let (store_id, file_id) = (file.vector_store_id.clone(), file.id.clone());
                let read = bounded(
                    async {
                        tokio::time::sleep(policy.interval).await;
                        self.get_vector_store_file(&store_id, &file_id).await
                    },
                    deadline,
                    cancel,
                )
                .await;
                match read {
                    Ok(read) => {
                        file = read?;
                        attempts += 1;
                        debug!("vector store file {} is {}", file.id, file.status);
                        None
                    }
                    Err(interrupt) => Some(interrupt),
                }
            };

            match interrupt {
                Some(Interrupt::Deadline) => {
                    return Err(RagError::Timeout {
                        id: file.id,
                        attempts,
                        elapsed: started.elapsed(),
                    })
                }
                Some(Interrupt::Cancelled) => return Err(RagError::Cancelled { id: file.id }),
                None => {}
            }
        }

        if file.status == VectorStoreFileStatus::Completed {
            return Ok(file);
        }

        Err(RagError::IndexingFailed {
            message: file
                .last_error
                .map(|err| err.message)
                .unwrap_or_else(|| "no error reported".to_string()),
            file_id: file.id,
            status: file.status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, time::Duration};

    use reqwest::Method;

    use crate::{
        transport::{MockTransport, RequestBody},
        Credentials,
    };

    fn client(mock: &MockTransport) -> OpenAiClient {
        OpenAiClient::with_transport(Credentials::new("sk-test", ""), Arc::new(mock.clone()))
    }

    fn store_file(status: &str) -> serde_json::Value {
        json!({ "id": "file-1", "vector_store_id": "vs_1", "status": status, "last_error": null })
    }

    fn fast_poll() -> PollPolicy {
        PollPolicy {
            interval: Duration::ZERO,
            max_attempts: Some(5),
            timeout: None,
        }
    }

    #[tokio::test]
    async fn create_sends_expiration() {
        let mock = MockTransport::new();
        mock.respond(
            Method::POST,
            "vector_stores",
            json!({ "id": "vs_1", "name": "docs", "status": "completed" }),
        );

        let store = client(&mock)
            .create_vector_store(CreateVectorStoreRequest {
                name: "docs".into(),
                expires_after: Some(ExpirationPolicy::days(1)),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(store.id, "vs_1");

        let calls = mock.calls();
        assert_eq!(
            calls[0].body,
            RequestBody::Json(json!({
                "name": "docs",
                "expires_after": { "anchor": "last_active_at", "days": 1 }
            }))
        );
    }

    #[tokio::test]
    async fn invalid_store_is_rejected_without_a_call() {
        let mock = MockTransport::new();
        let client = client(&mock);

        let err = client
            .create_vector_store(CreateVectorStoreRequest {
                name: "  ".into(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::InvalidInput(_)));

        let err = client
            .create_vector_store(CreateVectorStoreRequest {
                name: "docs".into(),
                expires_after: Some(ExpirationPolicy::days(0)),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::InvalidInput(_)));
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn attach_sends_file_id() {
        let mock = MockTransport::new();
        mock.respond(Method::POST, "vector_stores/vs_1/files", store_file("completed"));

        client(&mock)
            .attach_file_to_vector_store("vs_1", "file-1")
            .await
            .unwrap();

        assert_eq!(
            mock.calls()[0].body,
            RequestBody::Json(json!({ "file_id": "file-1" }))
        );
    }

    #[tokio::test]
    async fn waits_until_indexed() {
        let mock = MockTransport::new();
        mock.respond_seq(
            Method::GET,
            "vector_stores/vs_1/files/file-1",
            [store_file("in_progress"), store_file("completed")],
        );
        let client = client(&mock);

        let pending: VectorStoreFile = serde_json::from_value(store_file("in_progress")).unwrap();
        let file = client
            .wait_for_vector_store_file(pending, &fast_poll(), None)
            .await
            .unwrap();

        assert_eq!(file.status, VectorStoreFileStatus::Completed);
        assert_eq!(mock.count(&Method::GET, "vector_stores/vs_1/files/file-1"), 2);
    }

    #[tokio::test]
    async fn failed_indexing_is_an_error() {
        let mock = MockTransport::new();
        mock.respond(
            Method::GET,
            "vector_stores/vs_1/files/file-1",
            json!({
                "id": "file-1",
                "vector_store_id": "vs_1",
                "status": "failed",
                "last_error": { "code": "unsupported_file", "message": "cannot parse" }
            }),
        );

        let pending: VectorStoreFile = serde_json::from_value(store_file("in_progress")).unwrap();
        let err = client(&mock)
            .wait_for_vector_store_file(pending, &fast_poll(), None)
            .await
            .unwrap_err();
        assert!(matches!(
            &err,
            RagError::IndexingFailed { status: VectorStoreFileStatus::Failed, .. }
        ));
        assert!(err.to_string().contains("cannot parse"));
    }

    #[tokio::test]
    async fn indexing_wait_is_bounded() {
        let mock = MockTransport::new();
        mock.respond(Method::GET, "vector_stores/vs_1/files/file-1", store_file("in_progress"));

        let pending: VectorStoreFile = serde_json::from_value(store_file("in_progress")).unwrap();
        let err = client(&mock)
            .wait_for_vector_store_file(pending, &fast_poll(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Timeout { attempts: 5, .. }));
        assert_eq!(mock.call_count(), 5);
    }

    #[tokio::test]
    async fn unbounded_indexing_wait_is_rejected() {
        let mock = MockTransport::new();
        mock.respond(Method::GET, "vector_stores/vs_1/files/file-1", store_file("in_progress"));
        let unbounded = PollPolicy {
            interval: Duration::ZERO,
            max_attempts: None,
            timeout: None,
        };

        let pending: VectorStoreFile = serde_json::from_value(store_file("in_progress")).unwrap();
        let err = client(&mock)
            .wait_for_vector_store_file(pending, &unbounded, None)
            .await
            .unwrap_err();

        assert!(matches!(err, RagError::Config(_)));
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn hung_indexing_read_hits_deadline() {
        let mock = MockTransport::new();
        mock.stall(Method::GET, "vector_stores/vs_1/files/file-1");
        let policy = PollPolicy {
            interval: Duration::ZERO,
            max_attempts: None,
            timeout: Some(Duration::from_millis(50)),
        };

        let pending: VectorStoreFile = serde_json::from_value(store_file("in_progress")).unwrap();
        let client = client(&mock);
        let outcome = tokio::time::timeout(
            Duration::from_secs(2),
            client.wait_for_vector_store_file(pending, &policy, None),
        )
        .await
        .expect("indexing wait must honour its own deadline");

        assert!(matches!(outcome, Err(RagError::Timeout { ref id, attempts: 0, .. }) if id == "file-1"));
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn cancelled_indexing_wait_stops() {
        let mock = MockTransport::new();
        mock.respond(Method::GET, "vector_stores/vs_1/files/file-1", store_file("in_progress"));
        let token = CancellationToken::new();
        token.cancel();

        let pending: VectorStoreFile = serde_json::from_value(store_file("in_progress")).unwrap();
        let err = client(&mock)
            .wait_for_vector_store_file(pending, &fast_poll(), Some(&token))
            .await
            .unwrap_err();

        assert!(matches!(err, RagError::Cancelled { id } if id == "file-1"));
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn get_store_decodes_file_counts() {
        let mock = MockTransport::new();
        mock.respond(
            Method::GET,
            "vector_stores/vs_1",
            json!({
                "id": "vs_1",
                "object": "vector_store",
                "name": "docs",
                "status": "in_progress",
                "usage_bytes": 2048,
                "file_counts": { "in_progress": 1, "completed": 1, "failed": 0, "cancelled": 0, "total": 2 },
                "expires_after": { "anchor": "last_active_at", "days": 7 },
                "expires_at": null,
                "last_active_at": 1700000000,
                "metadata": {}
            }),
        );

        let store = client(&mock).get_vector_store("vs_1").await.unwrap();

        assert_eq!(store.status, VectorStoreStatus::InProgress);
        assert_eq!(store.file_counts.total, 2);
        assert_eq!(store.expires_after, Some(ExpirationPolicy::days(7)));
        assert_eq!(mock.count(&Method::GET, "vector_stores/vs_1"), 1);
    }
}
