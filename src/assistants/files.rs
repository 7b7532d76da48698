use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    client::OpenAiClient, transport::MultipartUpload, ApiResponseOrError, RagError,
};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct File {
    pub id: String,
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub created_at: u64,
    #[serde(default)]
    pub bytes: u64,
    pub filename: String,
    pub purpose: FilePurpose,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum FilePurpose {
    Assistants,
    AssistantsOutput,
    Batch,
    BatchOutput,
    FineTune,
    FineTuneResults,
    Vision,
}

/// A local file read fully into memory, ready for a multipart upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalDocument {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl LocalDocument {
    /// Opens `path`, reads it and closes the handle before returning,
    /// whether or not the read succeeded.
    pub async fn read(path: impl AsRef<Path>) -> Result<Self, RagError> {
        use tokio::io::AsyncReadExt;

        let path = path.as_ref();
        let io_err = |source| RagError::Io {
            path: path.to_path_buf(),
            source,
        };

        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string)
            .ok_or_else(|| RagError::invalid_input(format!("{} has no file name", path.display())))?;

        let bytes = {
            let mut file = tokio::fs::File::open(path).await.map_err(io_err)?;
            let mut bytes = Vec::new();
            file.read_to_end(&mut bytes).await.map_err(io_err)?;
            bytes
        };
        debug!("read {} bytes from {}", bytes.len(), path.display());

        Ok(Self { file_name, bytes })
    }

    pub fn mime_type(&self) -> &'static str {
        mime_for(&self.file_name)
    }
}

fn mime_for(file_name: &str) -> &'static str {
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "md" => "text/markdown",
        "json" => "application/json",
        "jsonl" => "application/jsonl",
        "pdf" => "application/pdf",
        "html" | "htm" => "text/html",
        _ => "text/plain",
    }
}

impl OpenAiClient {
    pub async fn upload_file(
        &self,
        filename: &str,
        mime_type: &str,
        bytes: Vec<u8>,
        purpose: FilePurpose,
    ) -> ApiResponseOrError<File> {
        let upload = MultipartUpload {
            file_name: filename.to_string(),
            mime_type: mime_type.to_string(),
            bytes,
            fields: vec![("purpose".to_string(), purpose.to_string())],
        };

        self.post_multipart("files", upload).await
    }

    pub async fn retrieve_file(&self, file_id: &str) -> ApiResponseOrError<File> {
        self.get(format!("files/{file_id}")).await
    }
}
