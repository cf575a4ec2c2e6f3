//! Broadcast server HTTP client
//!
//! Pure HTTP client for the session/quiz API; no dependency on the
//! reconciler or the quiz machine.

use std::sync::LazyLock;
use std::time::Duration;

use reqwest::Client;
use tracing::debug;

use crate::error::{check_response, Result};
use crate::models::{CurrentSessionResp, Quiz, Session, SessionId};

/// Shared HTTP client for all API requests (connection pooling)
static SHARED_CLIENT: LazyLock<Client> = LazyLock::new(|| {
    Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(30))
        .pool_max_idle_per_host(10)
        .build()
        .expect("Failed to build shared HTTP client")
});

/// Broadcast server API client
///
/// Provides the two polling endpoints the viewer relies on:
/// - current-session snapshot
/// - quiz list for a session
pub struct ApiClient {
    base_url: String,
    client: Client,
}

impl ApiClient {
    /// Create a new API client (reuses the shared connection pool)
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: SHARED_CLIENT.clone(),
        }
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch the current-session snapshot.
    ///
    /// `Ok(None)` means the server definitively reports no active
    /// session (empty body, id-less payload, or 404). Network failures
    /// and 5xx responses are errors: the caller treats them as transient
    /// and leaves its session state untouched.
    pub async fn current_session(&self) -> Result<Option<Session>> {
        let url = format!("{}/api/sessions/current", self.base_url);
        let response = self.client.get(&url).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check_response(response)?;

        let body = response.text().await?;
        if body.trim().is_empty() || body.trim() == "null" {
            return Ok(None);
        }

        let resp: CurrentSessionResp = serde_json::from_str(&body)?;
        let session = resp.into_session();
        debug!(current = ?session.as_ref().map(|s| s.id.as_str()), "Polled current session");
        Ok(session)
    }

    /// Fetch the ordered quiz list for a session. The last element is
    /// the current quiz.
    pub async fn session_quizzes(&self, session_id: &SessionId) -> Result<Vec<Quiz>> {
        let url = format!("{}/api/sessions/{}/quizzes", self.base_url, session_id);
        let response = self.client.get(&url).send().await?;
        let response = check_response(response)?;

        let quizzes: Vec<Quiz> = response.json().await?;
        debug!(session_id = %session_id, count = quizzes.len(), "Fetched quiz list");
        Ok(quizzes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = ApiClient::new("https://broadcast.example.com/");
        assert_eq!(client.base_url(), "https://broadcast.example.com");
    }

    #[tokio::test]
    async fn test_current_session_live() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/sessions/current"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "s1",
                "stream_key": "session_abc",
                "title": "Field day"
            })))
            .mount(&server)
            .await;

        let client = ApiClient::new(server.uri());
        let session = client.current_session().await.expect("poll").expect("live");
        assert_eq!(session.id.as_str(), "s1");
        assert_eq!(session.stream_key.as_deref(), Some("session_abc"));
    }

    #[tokio::test]
    async fn test_current_session_empty_means_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/sessions/current"))
            .respond_with(ResponseTemplate::new(200).set_body_string(""))
            .mount(&server)
            .await;

        let client = ApiClient::new(server.uri());
        assert!(client.current_session().await.expect("poll").is_none());
    }

    #[tokio::test]
    async fn test_current_session_idless_payload_means_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/sessions/current"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let client = ApiClient::new(server.uri());
        assert!(client.current_session().await.expect("poll").is_none());
    }

    #[tokio::test]
    async fn test_current_session_404_means_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/sessions/current"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = ApiClient::new(server.uri());
        assert!(client.current_session().await.expect("poll").is_none());
    }

    #[tokio::test]
    async fn test_current_session_5xx_is_transient_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/sessions/current"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = ApiClient::new(server.uri());
        assert!(client.current_session().await.is_err());
    }

    #[tokio::test]
    async fn test_session_quizzes_ordered() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/sessions/s1/quizzes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"id": "q1", "question": "First?", "options": ["A", "B"]},
                {"id": "q2", "question": "Second?", "options": ["C", "D"]}
            ])))
            .mount(&server)
            .await;

        let client = ApiClient::new(server.uri());
        let quizzes = client
            .session_quizzes(&SessionId::from("s1"))
            .await
            .expect("fetch");
        assert_eq!(quizzes.len(), 2);
        assert_eq!(quizzes.last().map(|q| q.id.as_str()), Some("q2"));
    }
}
