//! The wire boundary. [`OpenAiClient`](crate::OpenAiClient) builds
//! [`ApiRequest`]s and hands them to a [`Transport`]; everything HTTP-specific
//! lives behind this trait.
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{
    header::{HeaderName, HeaderValue},
    multipart::{Form, Part},
    Client, Method,
};
use tracing::debug;

use crate::{Credentials, RemoteError};

pub mod mock;

pub use mock::MockTransport;

const BETA_HEADER: &str = "openai-beta";
const BETA_VALUE: &str = "assistants=v2";

#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the base URL, without a leading slash.
    pub route: String,
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
}

impl ApiRequest {
    pub fn new(method: Method, route: impl Into<String>) -> Self {
        Self {
            method,
            route: route.into(),
            query: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    pub fn multipart(mut self, upload: MultipartUpload) -> Self {
        self.body = RequestBody::Multipart(upload);
        self
    }

    /// First value of a query parameter.
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    Json(serde_json::Value),
    Multipart(MultipartUpload),
}

/// A single file part plus plain text fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartUpload {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
    pub fields: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Performs one request. Non-2xx statuses are returned, not raised.
    async fn send(
        &self,
        credentials: &Credentials,
        request: ApiRequest,
    ) -> Result<RawResponse, RemoteError>;
}

/// [`Transport`] over `reqwest`.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl std::fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ReqwestTransport")
    }
}

impl ReqwestTransport {
    pub fn new(timeout: Option<Duration>) -> Result<Self, RemoteError> {
        let mut builder = Client::builder().default_headers(
            [(
                HeaderName::from_static(BETA_HEADER),
                HeaderValue::from_static(BETA_VALUE),
            )]
            .into_iter()
            .collect(),
        );
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
        })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(
        &self,
        credentials: &Credentials,
        request: ApiRequest,
    ) -> Result<RawResponse, RemoteError> {
        let url = format!("{}{}", credentials.base_url(), request.route);
        debug!("OpenAI Request[{}] {}", request.method, url);

        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .bearer_auth(credentials.api_key());

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }

        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(body) => builder.json(&body),
            RequestBody::Multipart(upload) => {
                let part = Part::bytes(upload.bytes)
                    .file_name(upload.file_name)
                    .mime_str(&upload.mime_type)?;
                let form = upload
                    .fields
                    .into_iter()
                    .fold(Form::new().part("file", part), |form, (key, value)| {
                        form.text(key, value)
                    });
                builder.multipart(form)
            }
        };

        let response = builder.send().await?;
        let status = response.status().as_u16();
        debug!("OpenAI Response[{}] {} {}", request.method, status, url);

        Ok(RawResponse {
            status,
            body: response.text().await?,
        })
    }
}
