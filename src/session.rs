//! The retrieval session: one vector store, the documents in it, an assistant
//! scoped to it, and one thread per question.
use std::{collections::HashMap, path::Path};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    assistants::{
        files::LocalDocument,
        messages::{CreateMessageRequest, MessageFilter, Role},
        runs::{CreateRunRequest, FILE_SEARCH_RESULT_CONTENT},
        threads::CreateThreadRequest,
        vector_stores::CreateVectorStoreRequest,
        CreateAssistantRequest, Tool, ToolResources,
    },
    client::OpenAiClient,
    config::{ExpirationPolicy, SessionConfig},
    RagError,
};

/// A cited span of the answer and the document it points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Citation {
    /// Marker text as the model wrote it, e.g. `【4:0†keepers.txt】`.
    pub marker: String,
    pub file_id: String,
    /// Resolved from the session's uploads, or from the provider.
    pub filename: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    pub thread_id: String,
    pub run_id: String,
    /// Assistant message texts of the run, in order, joined by blank lines.
    pub text: String,
    pub citations: Vec<Citation>,
}

impl Answer {
    /// Distinct cited file ids, in order of first citation.
    pub fn sources(&self) -> Vec<&str> {
        let mut sources: Vec<&str> = Vec::new();
        for citation in &self.citations {
            if !sources.contains(&citation.file_id.as_str()) {
                sources.push(&citation.file_id);
            }
        }
        sources
    }

    /// Replaces each citation marker with `[n]` and appends a numbered source list.
    pub fn with_footnotes(&self) -> String {
        let sources = self.sources();
        let mut text = self.text.clone();

        for citation in &self.citations {
            if citation.marker.is_empty() {
                continue;
            }
            let n = sources
                .iter()
                .position(|id| *id == citation.file_id)
                .map_or(0, |index| index + 1);
            text = text.replacen(&citation.marker, &format!("[{n}]"), 1);
        }

        if !sources.is_empty() {
            text.push_str("\n\nSources:");
            for (index, file_id) in sources.iter().enumerate() {
                let name = self
                    .citations
                    .iter()
                    .find(|citation| citation.file_id == *file_id)
                    .and_then(|citation| citation.filename.as_deref())
                    .unwrap_or(file_id);
                text.push_str(&format!("\n[{}] {}", index + 1, name));
            }
        }

        text
    }
}

impl std::fmt::Display for Answer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.with_footnotes())
    }
}

/// Ids of everything [`RagSession::prepare`] created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedAssistant {
    pub vector_store_id: String,
    pub document_ids: Vec<String>,
    pub assistant_id: String,
}

/// Drives vector store, uploads, assistant, thread and run in sequence.
///
/// The session only holds remote ids plus a file id to file name map for the
/// documents it uploaded; the provider owns every object's state. Its
/// cancellation token interrupts indexing waits and run waits alike.
#[derive(Debug)]
pub struct RagSession {
    client: OpenAiClient,
    config: SessionConfig,
    documents: HashMap<String, String>,
    cancel: CancellationToken,
}

impl RagSession {
    pub fn new(client: OpenAiClient, config: SessionConfig) -> Self {
        Self {
            client,
            config,
            documents: HashMap::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Uses `token` to interrupt this session's waits.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn client(&self) -> &OpenAiClient {
        &self.client
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// File name of a document uploaded through this session.
    pub fn document_name(&self, file_id: &str) -> Option<&str> {
        self.documents.get(file_id).map(String::as_str)
    }

    pub async fn create_vector_store(
        &self,
        name: &str,
        expiration: ExpirationPolicy,
    ) -> Result<String, RagError> {
        let store = self
            .client
            .create_vector_store(CreateVectorStoreRequest {
                name: name.to_string(),
                expires_after: Some(expiration),
                ..Default::default()
            })
            .await?;

        info!(vector_store_id = %store.id, name, "created vector store");
        Ok(store.id)
    }

    /// Uploads each file and attaches it to `store_id`, in input order.
    ///
    /// Stops at the first failure. Files uploaded before it stay uploaded and
    /// attached; nothing is rolled back or retried.
    pub async fn upload_documents<P>(
        &mut self,
        store_id: &str,
        files: &[P],
    ) -> Result<Vec<String>, RagError>
    where
        P: AsRef<Path>,
    {
        if store_id.trim().is_empty() {
            return Err(RagError::invalid_input("vector store id must not be empty"));
        }
        if self.config.wait_for_indexing {
            self.config.poll.validate()?;
        }

        let mut ids = Vec::with_capacity(files.len());
        for path in files {
            let document = LocalDocument::read(path).await?;
            let mime_type = document.mime_type();
            let LocalDocument { file_name, bytes } = document;

            let file = self
                .client
                .upload_file(&file_name, mime_type, bytes, self.config.file_purpose)
                .await?;
            info!(file_id = %file.id, file_name = %file_name, "uploaded document");

            let attached = self
                .client
                .attach_file_to_vector_store(store_id, &file.id)
                .await?;
            if self.config.wait_for_indexing {
                self.client
                    .wait_for_vector_store_file(attached, &self.config.poll, Some(&self.cancel))
                    .await?;
            }

            self.documents.insert(file.id.clone(), file_name);
            ids.push(file.id);
        }

        Ok(ids)
    }

    /// Creates an assistant whose file search is limited to `store_ids`.
    pub async fn create_assistant(
        &self,
        name: &str,
        instructions: &str,
        store_ids: &[String],
    ) -> Result<String, RagError> {
        if store_ids.is_empty() {
            return Err(RagError::invalid_input(
                "an assistant needs at least one vector store to search",
            ));
        }

        let request = CreateAssistantRequest::builder(self.config.model.clone())
            .name(name)
            .instructions(instructions)
            .tools(vec![Tool::file_search(self.config.max_num_results)])
            .tool_resources(ToolResources::file_search(store_ids.to_vec()))
            .build()
            .map_err(|err| RagError::config(err.to_string()))?;

        let assistant = self.client.create_assistant(request).await?;
        info!(assistant_id = %assistant.id, model = %assistant.model, "created assistant");
        Ok(assistant.id)
    }

    /// Asks `question` on a fresh thread and waits for the run to complete.
    ///
    /// Cancelling the session token stops the wait and cancels the run.
    pub async fn ask(&self, assistant_id: &str, question: &str) -> Result<Answer, RagError> {
        if question.trim().is_empty() {
            return Err(RagError::invalid_input("question must not be empty"));
        }
        self.config.poll.validate()?;

        let thread = self.client.create_thread(CreateThreadRequest::default()).await?;
        self.client
            .create_message(&thread.id, CreateMessageRequest::user(question))
            .await?;

        let request = CreateRunRequest::builder(assistant_id)
            .include(vec![FILE_SEARCH_RESULT_CONTENT.to_string()])
            .build()
            .map_err(|err| RagError::config(err.to_string()))?;
        let run = self.client.create_run(&thread.id, request).await?;
        info!(thread_id = %thread.id, run_id = %run.id, "started run");

        let run = self
            .client
            .wait_for_run(&thread.id, &run.id, &self.config.poll, Some(&self.cancel))
            .await?;

        self.collect_answer(&thread.id, &run.id).await
    }

    /// Store, uploads and assistant for `documents`, using the configured names.
    pub async fn prepare<P>(&mut self, documents: &[P]) -> Result<PreparedAssistant, RagError>
    where
        P: AsRef<Path>,
    {
        let vector_store_id = self
            .create_vector_store(&self.config.vector_store_name, self.config.expiration)
            .await?;
        let document_ids = self.upload_documents(&vector_store_id, documents).await?;
        let assistant_id = self
            .create_assistant(
                &self.config.assistant_name,
                &self.config.instructions,
                std::slice::from_ref(&vector_store_id),
            )
            .await?;

        Ok(PreparedAssistant {
            vector_store_id,
            document_ids,
            assistant_id,
        })
    }

    /// Answers `question` from `documents`, creating every remote object it needs.
    pub async fn answer<P>(&mut self, question: &str, documents: &[P]) -> Result<Answer, RagError>
    where
        P: AsRef<Path>,
    {
        if question.trim().is_empty() {
            return Err(RagError::invalid_input("question must not be empty"));
        }
        let prepared = self.prepare(documents).await?;
        self.ask(&prepared.assistant_id, question).await
    }

    async fn collect_answer(&self, thread_id: &str, run_id: &str) -> Result<Answer, RagError> {
        let mut pages = self
            .client
            .list_messages(thread_id, MessageFilter::for_run(run_id));
        let mut parts = Vec::new();
        let mut citations = Vec::new();

        while let Some(page) = pages.next_page().await? {
            for message in page.iter().filter(|message| message.role == Role::Assistant) {
                for text in message.texts() {
                    parts.push(text.value.clone());
                    citations.extend(text.annotations.iter().filter_map(|annotation| {
                        annotation.file_citation.as_ref().map(|cited| Citation {
                            marker: annotation.text.clone(),
                            file_id: cited.file_id.clone(),
                            filename: None,
                        })
                    }));
                }
            }
        }
        debug!(run_id, parts = parts.len(), citations = citations.len(), "collected answer");

        let mut resolved: HashMap<String, Option<String>> = HashMap::new();
        for citation in &mut citations {
            if let Some(name) = self.documents.get(&citation.file_id) {
                citation.filename = Some(name.clone());
                continue;
            }
            if !resolved.contains_key(&citation.file_id) {
                let name = match self.client.retrieve_file(&citation.file_id).await {
                    Ok(file) => Some(file.filename),
                    Err(err) => {
                        warn!(file_id = %citation.file_id, "could not resolve cited file: {err}");
                        None
                    }
                };
                resolved.insert(citation.file_id.clone(), name);
            }
            citation.filename = resolved.get(&citation.file_id).cloned().flatten();
        }

        Ok(Answer {
            thread_id: thread_id.to_string(),
            run_id: run_id.to_string(),
            text: parts.join("\n\n"),
            citations,
        })
    }
}
