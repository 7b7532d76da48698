//! Scripted in-memory backend for exercising the orchestrator without a network.
use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};

use super::{ApiRequest, RawResponse, Transport};
use crate::{Credentials, RemoteError};

type RouteKey = (Method, String);

#[derive(Debug, Clone)]
enum Reply {
    Respond(RawResponse),
    Fail(String),
    Stall,
}

#[derive(Default)]
struct MockState {
    scripts: HashMap<RouteKey, VecDeque<Reply>>,
    calls: Vec<ApiRequest>,
}

/// Replays scripted responses keyed by method and route.
///
/// Responses for one key are served in order; the last one repeats, so a
/// status sequence like `queued, in_progress, completed` can be scripted
/// once and read any number of times. Unscripted routes answer 404. A
/// stalled route never answers, like a hung connection.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MockTransport({} calls)", self.call_count())
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn push(&self, method: Method, route: &str, reply: Reply) {
        self.state()
            .scripts
            .entry((method, route.to_string()))
            .or_default()
            .push_back(reply);
    }

    /// Queues a 200 response with a JSON body.
    pub fn respond(&self, method: Method, route: &str, body: Value) -> &Self {
        self.push(method, route, Reply::Respond(RawResponse::new(200, body.to_string())));
        self
    }

    /// Queues one 200 response per body, in order.
    pub fn respond_seq<I>(&self, method: Method, route: &str, bodies: I) -> &Self
    where
        I: IntoIterator<Item = Value>,
    {
        for body in bodies {
            self.respond(method.clone(), route, body);
        }
        self
    }

    /// Queues a provider error in the `{"error": {...}}` envelope.
    pub fn respond_error(&self, method: Method, route: &str, status: u16, message: &str) -> &Self {
        let body = json!({
            "error": { "message": message, "type": "invalid_request_error", "param": null, "code": null }
        });
        self.push(method, route, Reply::Respond(RawResponse::new(status, body.to_string())));
        self
    }

    /// Queues a raw response, e.g. a non-JSON error page.
    pub fn respond_raw(&self, method: Method, route: &str, response: RawResponse) -> &Self {
        self.push(method, route, Reply::Respond(response));
        self
    }

    /// Queues a network failure.
    pub fn fail(&self, method: Method, route: &str, message: &str) -> &Self {
        self.push(method, route, Reply::Fail(message.to_string()));
        self
    }

    /// Queues a request that is recorded but never answered.
    pub fn stall(&self, method: Method, route: &str) -> &Self {
        self.push(method, route, Reply::Stall);
        self
    }

    pub fn calls(&self) -> Vec<ApiRequest> {
        self.state().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state().calls.len()
    }

    /// Number of recorded calls matching method and route.
    pub fn count(&self, method: &Method, route: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|call| &call.method == method && call.route == route)
            .count()
    }

    pub fn calls_to(&self, method: &Method, route: &str) -> Vec<ApiRequest> {
        self.state()
            .calls
            .iter()
            .filter(|call| &call.method == method && call.route == route)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(
        &self,
        _credentials: &Credentials,
        request: ApiRequest,
    ) -> Result<RawResponse, RemoteError> {
        let key = (request.method.clone(), request.route.clone());
        let scripted = {
            let mut state = self.state();
            state.calls.push(request);
            match state.scripts.get_mut(&key) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };

        match scripted {
            Some(Reply::Respond(response)) => Ok(response),
            Some(Reply::Fail(message)) => Err(RemoteError::Transport(message)),
            Some(Reply::Stall) => std::future::pending().await,
            None => {
                let body = json!({
                    "error": {
                        "message": format!("no mock for {} {}", key.0, key.1),
                        "type": "invalid_request_error",
                        "param": null,
                        "code": null
                    }
                });
                Ok(RawResponse::new(404, body.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> Credentials {
        Credentials::new("sk-test", "")
    }

    #[tokio::test]
    async fn last_response_repeats() {
        let mock = MockTransport::new();
        mock.respond_seq(
            Method::GET,
            "threads/t/runs/r",
            [json!({ "n": 1 }), json!({ "n": 2 })],
        );

        let mut bodies = Vec::new();
        for _ in 0..3 {
            let response = mock
                .send(&credentials(), ApiRequest::new(Method::GET, "threads/t/runs/r"))
                .await
                .unwrap();
            bodies.push(response.body);
        }

        assert_eq!(bodies, vec![r#"{"n":1}"#, r#"{"n":2}"#, r#"{"n":2}"#]);
        assert_eq!(mock.count(&Method::GET, "threads/t/runs/r"), 3);
    }

    #[tokio::test]
    async fn unscripted_route_is_404() {
        let mock = MockTransport::new();
        let response = mock
            .send(&credentials(), ApiRequest::new(Method::DELETE, "threads/t"))
            .await
            .unwrap();
        assert_eq!(response.status, 404);
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn stalled_route_never_answers() {
        let mock = MockTransport::new();
        mock.stall(Method::GET, "threads/t/runs/r");

        let outcome = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            mock.send(&credentials(), ApiRequest::new(Method::GET, "threads/t/runs/r")),
        )
        .await;

        assert!(outcome.is_err());
        assert_eq!(mock.count(&Method::GET, "threads/t/runs/r"), 1);
    }
}
