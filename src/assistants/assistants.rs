use std::collections::HashMap;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::{
    client::{Deleted, OpenAiClient},
    ApiResponseOrError, RagError,
};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Assistant {
    pub id: String,
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub created_at: u64,
    /// The name of the assistant. The maximum length is 256 characters.
    pub name: Option<String>,
    /// ID of the model to use.
    pub model: String,
    /// The system instructions that the assistant uses. The maximum length is 256,000 characters.
    pub instructions: Option<String>,
    #[serde(default)]
    pub tools: Vec<Tool>,
    /// A set of resources that are used by the assistant's tools. The file_search tool requires a list of vector store IDs.
    pub tool_resources: Option<ToolResources>,
    pub metadata: Option<HashMap<String, String>>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Tool {
    CodeInterpreter,
    FileSearch {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_search: Option<FileSearch>,
    },
    Function {
        function: FunctionDefinition,
    },
}

impl Tool {
    pub fn file_search(max_num_results: Option<u32>) -> Self {
        Tool::FileSearch {
            file_search: max_num_results.map(|max_num_results| FileSearch {
                max_num_results: Some(max_num_results),
            }),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct FileSearch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_num_results: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct FunctionDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON schema of the arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct ToolResources {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_interpreter: Option<CodeInterpreterResources>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_search: Option<FileSearchResources>,
}

impl ToolResources {
    /// Scopes file search to exactly these vector stores.
    pub fn file_search(vector_store_ids: Vec<String>) -> Self {
        Self {
            code_interpreter: None,
            file_search: Some(FileSearchResources { vector_store_ids }),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct CodeInterpreterResources {
    /// A list of file IDs made available to the `code_interpreter` tool.
    pub file_ids: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct FileSearchResources {
    /// The vector stores the assistant may search. The provider accepts at most one.
    pub vector_store_ids: Vec<String>,
}

#[derive(Serialize, Builder, Debug, Clone, Default)]
#[builder(pattern = "owned")]
#[builder(name = "CreateAssistantBuilder")]
#[builder(setter(strip_option, into))]
pub struct CreateAssistantRequest {
    /// ID of the model to use.
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    pub instructions: Option<String>,
    #[builder(default)]
    pub tools: Vec<Tool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    pub tool_resources: Option<ToolResources>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    pub metadata: Option<HashMap<String, String>>,
}

impl CreateAssistantRequest {
    pub fn builder(model: impl Into<String>) -> CreateAssistantBuilder {
        CreateAssistantBuilder::create_empty().model(model)
    }
}

impl OpenAiClient {
    pub async fn create_assistant(
        &self,
        request: CreateAssistantRequest,
    ) -> Result<Assistant, RagError> {
        if request.model.trim().is_empty() {
            return Err(RagError::config("an assistant needs a model"));
        }
        Ok(self.post("assistants", request).await?)
    }

    pub async fn get_assistant(&self, assistant_id: &str) -> ApiResponseOrError<Assistant> {
        self.get(format!("assistants/{assistant_id}")).await
    }

    pub async fn delete_assistant(&self, assistant_id: &str) -> ApiResponseOrError<Deleted> {
        self.delete(format!("assistants/{assistant_id}")).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use reqwest::Method;
    use serde_json::json;

    use crate::{transport::MockTransport, Credentials};

    fn client(mock: &MockTransport) -> OpenAiClient {
        OpenAiClient::with_transport(Credentials::new("sk-test", ""), Arc::new(mock.clone()))
    }

    #[test]
    fn file_search_tool_wire_format() {
        assert_eq!(
            serde_json::to_value(Tool::file_search(None)).unwrap(),
            json!({ "type": "file_search" })
        );
        assert_eq!(
            serde_json::to_value(Tool::file_search(Some(8))).unwrap(),
            json!({ "type": "file_search", "file_search": { "max_num_results": 8 } })
        );

        let tool: Tool = serde_json::from_value(json!({
            "type": "file_search",
            "file_search": { "max_num_results": 20, "ranking_options": { "ranker": "auto" } }
        }))
        .unwrap();
        assert_eq!(tool, Tool::file_search(Some(20)));
    }

    #[test]
    fn builder_scopes_search_to_stores() {
        let request = CreateAssistantRequest::builder("gpt-4o-mini")
            .name("Docs")
            .instructions("Answer from the files.")
            .tools(vec![Tool::file_search(None)])
            .tool_resources(ToolResources::file_search(vec!["vs_1".into()]))
            .build()
            .unwrap();

        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "model": "gpt-4o-mini",
                "name": "Docs",
                "instructions": "Answer from the files.",
                "tools": [{ "type": "file_search" }],
                "tool_resources": { "file_search": { "vector_store_ids": ["vs_1"] } }
            })
        );
    }

    #[test]
    fn assistant_decodes_with_code_interpreter() {
        let assistant: Assistant = serde_json::from_value(json!({
            "id": "asst_1",
            "object": "assistant",
            "created_at": 1700000000,
            "name": null,
            "model": "gpt-4o",
            "instructions": null,
            "tools": [{ "type": "code_interpreter" }],
            "tool_resources": { "code_interpreter": { "file_ids": [] } },
            "metadata": {}
        }))
        .unwrap();
        assert_eq!(assistant.tools, vec![Tool::CodeInterpreter]);
    }

    #[tokio::test]
    async fn get_and_delete_by_id() {
        let mock = MockTransport::new();
        mock.respond(
            Method::GET,
            "assistants/asst_1",
            json!({
                "id": "asst_1",
                "object": "assistant",
                "model": "gpt-4o-mini",
                "tools": [{ "type": "file_search", "file_search": { "max_num_results": 5 } }],
                "tool_resources": { "file_search": { "vector_store_ids": ["vs_1"] } }
            }),
        );
        mock.respond(
            Method::DELETE,
            "assistants/asst_1",
            json!({ "id": "asst_1", "object": "assistant.deleted", "deleted": true }),
        );
        let client = client(&mock);

        let assistant = client.get_assistant("asst_1").await.unwrap();
        assert_eq!(assistant.tools, vec![Tool::file_search(Some(5))]);

        let deleted = client.delete_assistant("asst_1").await.unwrap();
        assert!(deleted.deleted);
        assert_eq!(deleted.id, "asst_1");

        let err = client.get_assistant("asst_gone").await.unwrap_err();
        assert_eq!(err.status(), Some(404));
    }

    #[tokio::test]
    async fn empty_model_is_rejected_without_a_call() {
        let mock = MockTransport::new();
        let request = CreateAssistantRequest::builder("  ").build().unwrap();

        let err = client(&mock).create_assistant(request).await.unwrap_err();
        assert!(matches!(err, RagError::Config(_)));
        assert_eq!(mock.call_count(), 0);
    }
}
