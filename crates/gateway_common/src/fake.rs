//! Scripted gateway for deterministic testing.
//!
//! Production code talks to [`RestClient`](crate::rest::RestClient). Tests use
//! `FakeGateway` with pre-configured responses per method and path; no
//! network is involved.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let fake = FakeGateway::new()
//!     .on_get(paths::CABLEMODEM_STATE, FakeResponse::ok(json!({"cablemodem": {"status": "operational"}})));
//!
//! let body = fake.get(paths::CABLEMODEM_STATE).await?;
//! assert_eq!(fake.call_count(Method::Get, paths::CABLEMODEM_STATE), 1);
//! ```

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::error::ApiError;
use crate::rest::{paths, ApiResult, GatewayApi};

// ============================================================================
// Scripted responses
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Delete,
}

/// One scripted reply
#[derive(Debug, Clone)]
pub struct FakeResponse {
    result: ApiResult,
    delay: Option<Duration>,
    hang: bool,
}

impl FakeResponse {
    /// Successful reply with a JSON body
    pub fn ok(body: Value) -> Self {
        Self {
            result: Ok(body),
            delay: None,
            hang: false,
        }
    }

    /// Successful reply with an empty body
    pub fn empty() -> Self {
        Self::ok(Value::Null)
    }

    pub fn error(err: ApiError) -> Self {
        Self {
            result: Err(err),
            delay: None,
            hang: false,
        }
    }

    /// Non-success HTTP status
    pub fn status(code: u16) -> Self {
        Self::error(ApiError::status_code(code))
    }

    /// Reply that never arrives
    pub fn hang() -> Self {
        Self {
            result: Err(ApiError::Timeout),
            delay: None,
            hang: true,
        }
    }

    /// Deliver this reply after `delay` (tokio time, so paused clocks apply)
    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// A recorded call
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
}

// ============================================================================
// Fake gateway
// ============================================================================

/// Fake gateway for deterministic testing.
///
/// Each method/path has a queue of replies. Replies are consumed in order
/// and the last one repeats, so a single scripted reply behaves like a
/// fixed response. Unscripted paths answer 404.
#[derive(Clone, Default)]
pub struct FakeGateway {
    routes: Arc<Mutex<HashMap<(Method, String), VecDeque<FakeResponse>>>>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a reply to the queue for `method path`
    pub fn script(&self, method: Method, path: &str, response: FakeResponse) {
        lock(&self.routes)
            .entry((method, path.to_string()))
            .or_default()
            .push_back(response);
    }

    /// Drop any queued replies for `method path` and answer `response` instead
    pub fn rescript(&self, method: Method, path: &str, response: FakeResponse) {
        lock(&self.routes).insert((method, path.to_string()), VecDeque::from([response]));
    }

    pub fn on_get(self, path: &str, response: FakeResponse) -> Self {
        self.script(Method::Get, path, response);
        self
    }

    pub fn on_post(self, path: &str, response: FakeResponse) -> Self {
        self.script(Method::Post, path, response);
        self
    }

    pub fn on_delete(self, path: &str, response: FakeResponse) -> Self {
        self.script(Method::Delete, path, response);
        self
    }

    /// Script a sequence of GET replies
    pub fn on_get_sequence(self, path: &str, responses: Vec<FakeResponse>) -> Self {
        for response in responses {
            self.script(Method::Get, path, response);
        }
        self
    }

    /// Get the number of calls to a specific method and path
    pub fn call_count(&self, method: Method, path: &str) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|c| c.method == method && c.path == path)
            .count()
    }

    /// Get total call count across all paths
    pub fn total_calls(&self) -> usize {
        lock(&self.calls).len()
    }

    /// Every call in the order it was made
    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    /// Paths that received a DELETE, in order
    pub fn deleted(&self) -> Vec<String> {
        lock(&self.calls)
            .iter()
            .filter(|c| c.method == Method::Delete)
            .map(|c| c.path.clone())
            .collect()
    }

    /// Position of the first matching call, for ordering assertions
    pub fn position(&self, method: Method, path: &str) -> Option<usize> {
        lock(&self.calls)
            .iter()
            .position(|c| c.method == method && c.path == path)
    }

    fn next_response(&self, method: Method, path: &str) -> FakeResponse {
        let mut routes = lock(&self.routes);
        match routes.get_mut(&(method, path.to_string())) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or_else(|| FakeResponse::status(404)),
            Some(queue) => queue
                .front()
                .cloned()
                .unwrap_or_else(|| FakeResponse::status(404)),
            None => FakeResponse::status(404),
        }
    }

    async fn respond(&self, method: Method, path: &str, body: Option<&Value>) -> ApiResult {
        lock(&self.calls).push(RecordedCall {
            method,
            path: path.to_string(),
            body: body.cloned(),
        });

        let response = self.next_response(method, path);
        if let Some(delay) = response.delay {
            tokio::time::sleep(delay).await;
        }
        if response.hang {
            std::future::pending::<()>().await;
        }
        response.result
    }
}

#[async_trait]
impl GatewayApi for FakeGateway {
    async fn get(&self, path: &str) -> ApiResult {
        self.respond(Method::Get, path, None).await
    }

    async fn post(&self, path: &str, body: &Value) -> ApiResult {
        self.respond(Method::Post, path, Some(body)).await
    }

    async fn delete(&self, path: &str) -> ApiResult {
        self.respond(Method::Delete, path, None).await
    }

    /// Recorded as `DELETE /user/login`; a 404 counts as already logged out
    async fn logout(&self) -> Result<(), ApiError> {
        match self.respond(Method::Delete, paths::LOGIN, None).await {
            Err(e) if !e.is_not_found() => Err(e),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_last_response_repeats() {
        let fake = FakeGateway::new().on_get_sequence(
            "/a",
            vec![FakeResponse::ok(json!(1)), FakeResponse::ok(json!(2))],
        );

        assert_eq!(fake.get("/a").await.unwrap(), json!(1));
        assert_eq!(fake.get("/a").await.unwrap(), json!(2));
        assert_eq!(fake.get("/a").await.unwrap(), json!(2));
        assert_eq!(fake.call_count(Method::Get, "/a"), 3);
    }

    #[tokio::test]
    async fn test_unscripted_path_is_not_found() {
        let fake = FakeGateway::new();
        let err = fake.delete("/missing").await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(fake.deleted(), vec!["/missing".to_string()]);
    }

    #[tokio::test]
    async fn test_rescript_replaces_queue() {
        let fake = FakeGateway::new().on_get_sequence(
            "/a",
            vec![FakeResponse::ok(json!(1)), FakeResponse::ok(json!(2))],
        );
        fake.rescript(Method::Get, "/a", FakeResponse::ok(json!(3)));
        assert_eq!(fake.get("/a").await.unwrap(), json!(3));
    }

    #[tokio::test]
    async fn test_post_body_recorded() {
        let fake = FakeGateway::new().on_post("/jobs", FakeResponse::empty());
        fake.post("/jobs", &json!({"x": 1})).await.unwrap();
        assert_eq!(fake.calls()[0].body, Some(json!({"x": 1})));
    }
}
