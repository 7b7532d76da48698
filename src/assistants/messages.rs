use crate::{
    client::{OpenAiClient, Paginator},
    ApiResponseOrError,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Message {
    pub id: String,
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub created_at: u64,
    /// The thread ID that this message belongs to.
    pub thread_id: String,
    /// The status of the message, which can be either in_progress, incomplete, or completed.
    pub status: Option<Status>,
    /// The entity that produced the message. One of user or assistant
    pub role: Role,
    /// The content of the message.
    #[serde(default)]
    pub content: Vec<Content>,
    /// The assistant that produced the message.
    pub assistant_id: Option<String>,
    /// The ID of the run associated with the creation of this message. Null for messages created by hand.
    pub run_id: Option<String>,
    pub metadata: Option<HashMap<String, String>>,
}

impl Message {
    /// Text parts of the message in order, skipping images and refusals.
    pub fn texts(&self) -> impl Iterator<Item = &Text> {
        self.content.iter().filter_map(|content| match content {
            Content::Text { text } => Some(text),
            _ => None,
        })
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    InProgress,
    Incomplete,
    Completed,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Content {
    Text { text: Text },
    ImageFile { image_file: ImageFile },
    ImageUrl { image_url: ImageUrl },
    Refusal { refusal: String },
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct Text {
    pub value: String,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
}

/// Marks the span of `text` that cites or links a file.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Annotation {
    /// `file_citation` or `file_path`.
    #[serde(rename = "type")]
    pub kind: String,
    /// The marker as it appears in the message, e.g. `【4:0†source】`.
    pub text: String,
    #[serde(default)]
    pub start_index: u32,
    #[serde(default)]
    pub end_index: u32,
    pub file_citation: Option<FileCitation>,
    pub file_path: Option<FilePath>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct FileCitation {
    pub file_id: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct FilePath {
    pub file_id: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ImageFile {
    pub file_id: String,
    pub detail: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ImageUrl {
    pub url: String,
    pub detail: Option<String>,
}

#[derive(Debug, Serialize, Clone)]
pub struct CreateMessageRequest {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, String>>,
}

impl CreateMessageRequest {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            metadata: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Order {
    #[default]
    Asc,
    Desc,
}

/// Filters for listing a thread's messages.
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    pub run_id: Option<String>,
    pub order: Order,
    /// Page size; the provider default (20) when unset.
    pub limit: Option<u32>,
}

impl MessageFilter {
    pub fn for_run(run_id: impl Into<String>) -> Self {
        Self {
            run_id: Some(run_id.into()),
            ..Default::default()
        }
    }

    fn into_query(self) -> Vec<(String, String)> {
        let mut query = vec![("order".to_string(), self.order.to_string())];
        if let Some(run_id) = self.run_id {
            query.push(("run_id".to_string(), run_id));
        }
        if let Some(limit) = self.limit {
            query.push(("limit".to_string(), limit.to_string()));
        }
        query
    }
}

impl OpenAiClient {
    pub async fn create_message(
        &self,
        thread_id: &str,
        request: CreateMessageRequest,
    ) -> ApiResponseOrError<Message> {
        self.post(format!("threads/{thread_id}/messages"), request)
            .await
    }

    pub fn list_messages(&self, thread_id: &str, filter: MessageFilter) -> Paginator<'_, Message> {
        self.paginate(format!("threads/{thread_id}/messages"), filter.into_query())
    }
}
