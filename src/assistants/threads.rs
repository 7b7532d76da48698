use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{
    assistants::ToolResources,
    client::{Deleted, OpenAiClient},
    ApiResponseOrError,
};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Thread {
    pub id: String,
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub created_at: u64,
    /// Resources available to the assistant's tools for this thread only.
    pub tool_resources: Option<ToolResources>,
    pub metadata: Option<HashMap<String, String>>,
}

#[derive(Debug, Serialize, Clone, Default)]
pub struct CreateThreadRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_resources: Option<ToolResources>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, String>>,
}

impl OpenAiClient {
    pub async fn create_thread(&self, request: CreateThreadRequest) -> ApiResponseOrError<Thread> {
        self.post("threads", request).await
    }

    pub async fn delete_thread(&self, thread_id: &str) -> ApiResponseOrError<Deleted> {
        self.delete(format!("threads/{thread_id}")).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use reqwest::Method;
    use serde_json::json;

    use crate::{
        transport::{MockTransport, RequestBody},
        Credentials,
    };

    #[tokio::test]
    async fn empty_thread_posts_empty_object() {
        let mock = MockTransport::new();
        mock.respond(Method::POST, "threads", json!({ "id": "thread_1", "object": "thread" }));
        mock.respond(
            Method::DELETE,
            "threads/thread_1",
            json!({ "id": "thread_1", "object": "thread.deleted", "deleted": true }),
        );
        let client =
            OpenAiClient::with_transport(Credentials::new("sk-test", ""), Arc::new(mock.clone()));

        let thread = client.create_thread(CreateThreadRequest::default()).await.unwrap();
        assert_eq!(thread.id, "thread_1");
        assert_eq!(mock.calls()[0].body, RequestBody::Json(json!({})));

        assert!(client.delete_thread(&thread.id).await.unwrap().deleted);
    }
}
