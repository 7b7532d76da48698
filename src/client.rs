use std::{marker::PhantomData, sync::Arc, time::Duration};

use reqwest::Method;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

use crate::{
    transport::{ApiRequest, MultipartUpload, RawResponse, ReqwestTransport, Transport},
    ApiResponseOrError, Credentials, OpenAiError, RagError, RemoteError,
};

#[derive(Clone)]
pub struct OpenAiClient {
    credentials: Credentials,
    transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OpenAiClient")
    }
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiErrorWrapper {
    error: OpenAiError,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Empty {}

/// Response of the provider's `DELETE` endpoints.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Deleted {
    pub id: String,
    #[serde(default)]
    pub object: String,
    pub deleted: bool,
}

impl OpenAiClient {
    /// Client over HTTP with the given credentials.
    pub fn new(credentials: Credentials) -> Result<Self, RemoteError> {
        Self::with_request_timeout(credentials, None)
    }

    /// Client over HTTP whose requests fail once `timeout` elapses.
    pub fn with_request_timeout(
        credentials: Credentials,
        timeout: Option<Duration>,
    ) -> Result<Self, RemoteError> {
        Ok(Self::with_transport(
            credentials,
            Arc::new(ReqwestTransport::new(timeout)?),
        ))
    }

    pub fn with_transport(credentials: Credentials, transport: Arc<dyn Transport>) -> Self {
        Self {
            credentials,
            transport,
        }
    }

    /// Reads credentials from the environment; fails before any request when
    /// the key is missing.
    pub fn from_env() -> Result<Self, RagError> {
        let credentials = Credentials::from_env()?;
        Ok(Self::new(credentials)?)
    }

    pub fn from_lookup_with_transport<F>(
        lookup: F,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, RagError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let credentials = Credentials::from_lookup(lookup)?;
        Ok(Self::with_transport(credentials, transport))
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub async fn request<T>(&self, request: ApiRequest) -> ApiResponseOrError<T>
    where
        T: DeserializeOwned,
    {
        let route = request.route.clone();
        let response = self.transport.send(&self.credentials, request).await?;
        decode(&route, response)
    }

    pub async fn get<R, T>(&self, route: R) -> ApiResponseOrError<T>
    where
        R: Into<String>,
        T: DeserializeOwned,
    {
        self.request(ApiRequest::new(Method::GET, route)).await
    }

    pub async fn post<S, R, T>(&self, route: R, body: S) -> ApiResponseOrError<T>
    where
        R: Into<String>,
        S: Serialize,
        T: DeserializeOwned,
    {
        let route = route.into();
        let body = encode(&route, body)?;
        self.request(ApiRequest::new(Method::POST, route).json(body))
            .await
    }

    pub async fn post_multipart<R, T>(&self, route: R, upload: MultipartUpload) -> ApiResponseOrError<T>
    where
        R: Into<String>,
        T: DeserializeOwned,
    {
        self.request(ApiRequest::new(Method::POST, route).multipart(upload))
            .await
    }

    pub async fn delete<R>(&self, route: R) -> ApiResponseOrError<Deleted>
    where
        R: Into<String>,
    {
        self.request(ApiRequest::new(Method::DELETE, route)).await
    }

    /// Lazy cursor over a list endpoint. `query` is sent with every page.
    pub fn paginate<R, T>(&self, route: R, query: Vec<(String, String)>) -> Paginator<'_, T>
    where
        R: Into<String>,
        T: DeserializeOwned,
    {
        Paginator {
            client: self,
            route: route.into(),
            query,
            cursor: None,
            exhausted: false,
            _marker: PhantomData,
        }
    }
}

fn encode<S: Serialize>(route: &str, body: S) -> Result<serde_json::Value, RemoteError> {
    serde_json::to_value(body).map_err(|source| RemoteError::Payload {
        route: route.to_string(),
        source,
    })
}

fn decode<T: DeserializeOwned>(route: &str, response: RawResponse) -> ApiResponseOrError<T> {
    if response.is_success() {
        return serde_json::from_str(&response.body).map_err(|source| RemoteError::Payload {
            route: route.to_string(),
            source,
        });
    }

    let error = match serde_json::from_str::<OpenAiErrorWrapper>(&response.body) {
        Ok(wrapper) => wrapper.error,
        Err(_) => OpenAiError::new(response.body, "unknown".to_string()),
    };
    Err(RemoteError::api(response.status, error))
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct List<T> {
    pub first_id: Option<String>,
    pub last_id: Option<String>,
    pub data: Vec<T>,
    #[serde(default)]
    pub has_more: bool,
}

/// Walks a cursor-paginated list endpoint one page at a time.
///
/// The sequence is finite: it ends when the provider reports no further page,
/// or reports one without a cursor to reach it. [`Paginator::restart`] rewinds
/// to the first page.
pub struct Paginator<'a, T> {
    client: &'a OpenAiClient,
    route: String,
    query: Vec<(String, String)>,
    cursor: Option<String>,
    exhausted: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<'a, T> Paginator<'a, T>
where
    T: DeserializeOwned,
{
    pub async fn next_page(&mut self) -> ApiResponseOrError<Option<Vec<T>>> {
        if self.exhausted {
            return Ok(None);
        }

        let mut request = ApiRequest::new(Method::GET, self.route.clone());
        request.query = self.query.clone();
        if let Some(after) = &self.cursor {
            request = request.query("after", after.clone());
        }

        let page: List<T> = self.client.request(request).await?;
        debug!(
            "page of {} from {} (has_more: {})",
            page.data.len(),
            self.route,
            page.has_more
        );

        match (page.has_more, page.last_id) {
            (true, Some(last_id)) => self.cursor = Some(last_id),
            _ => self.exhausted = true,
        }

        Ok(Some(page.data))
    }

    pub fn restart(&mut self) {
        self.cursor = None;
        self.exhausted = false;
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub async fn collect_all(mut self) -> ApiResponseOrError<Vec<T>> {
        let mut data = Vec::new();
        while let Some(page) = self.next_page().await? {
            data.extend(page);
        }
        Ok(data)
    }
}
