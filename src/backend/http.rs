//! reqwest-based [`Backend`].

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::{header, StatusCode};
use serde_json::Value;
use std::time::Duration;
use url::Url;

use super::api_types::{error_message, ApiEnvelope};
use super::{ApiRequest, Backend, CallError};

#[derive(Clone)]
pub struct HttpBackend {
  client: reqwest::Client,
  base: Url,
  token: Option<String>,
}

impl HttpBackend {
  pub fn new(base_url: &str, token: Option<String>) -> Result<Self> {
    // Url::join drops the last path segment unless it ends in '/'
    let normalized = if base_url.ends_with('/') {
      base_url.to_string()
    } else {
      format!("{}/", base_url)
    };
    let base =
      Url::parse(&normalized).map_err(|e| eyre!("Invalid backend URL {}: {}", base_url, e))?;

    let client = reqwest::Client::builder()
      .user_agent(concat!("socgate/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      base,
      token,
    })
  }

  pub fn base_url(&self) -> &Url {
    &self.base
  }

  fn url(&self, path: &str) -> Result<Url, CallError> {
    self
      .base
      .join(path.trim_start_matches('/'))
      .map_err(|e| CallError::ClientError {
        status: None,
        message: format!("invalid request path {}: {}", path, e),
      })
  }
}

#[async_trait]
impl Backend for HttpBackend {
  async fn call(&self, request: ApiRequest) -> Result<Value, CallError> {
    let url = self.url(&request.path)?;
    tracing::debug!(method = %request.method, %url, "backend call");

    let mut builder = self
      .client
      .request(request.method.clone(), url)
      .timeout(request.timeout);
    if let Some(token) = &self.token {
      builder = builder.bearer_auth(token);
    }
    if let Some(body) = &request.body {
      builder = builder.json(body);
    }

    let response = builder
      .send()
      .await
      .map_err(|e| classify_transport(&e, request.timeout))?;

    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
      let retry_after_secs = response
        .headers()
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok());
      return Err(CallError::RateLimited { retry_after_secs });
    }

    let body = response
      .text()
      .await
      .map_err(|e| classify_transport(&e, request.timeout))?;

    if status.is_server_error() {
      return Err(CallError::ServerUnavailable {
        status: Some(status.as_u16()),
        message: error_message(&body).unwrap_or_else(|| status.to_string()),
      });
    }
    if !status.is_success() {
      return Err(CallError::ClientError {
        status: Some(status.as_u16()),
        message: error_message(&body).unwrap_or_else(|| status.to_string()),
      });
    }

    let envelope: ApiEnvelope =
      serde_json::from_str(&body).map_err(|e| CallError::ClientError {
        status: Some(status.as_u16()),
        message: format!("malformed response: {}", e),
      })?;

    if !envelope.success {
      return Err(CallError::ClientError {
        status: Some(status.as_u16()),
        message: envelope
          .reason()
          .unwrap_or("request rejected by backend")
          .to_string(),
      });
    }

    Ok(envelope.data.unwrap_or(Value::Null))
  }

  async fn health(&self, timeout: Duration) -> bool {
    let Ok(url) = self.url("health") else {
      return false;
    };
    match self.client.get(url).timeout(timeout).send().await {
      Ok(response) => response.status().is_success(),
      Err(e) => {
        tracing::debug!(error = %e, "health probe failed");
        false
      }
    }
  }
}

/// Map a reqwest error that happened before a status was available.
fn classify_transport(e: &reqwest::Error, timeout: Duration) -> CallError {
  if e.is_timeout() {
    CallError::Timeout { after: timeout }
  } else if e.is_connect() || e.is_request() || e.is_body() {
    CallError::ServerUnavailable {
      status: None,
      message: e.to_string(),
    }
  } else {
    CallError::ClientError {
      status: None,
      message: e.to_string(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use wiremock::matchers::{header as header_eq, method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  const TIMEOUT: Duration = Duration::from_secs(2);

  async fn backend_for(server: &MockServer) -> HttpBackend {
    HttpBackend::new(&server.uri(), Some("tok".into())).unwrap()
  }

  #[tokio::test]
  async fn test_success_returns_data() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/chat/tools"))
      .and(header_eq("authorization", "Bearer tok"))
      .respond_with(
        ResponseTemplate::new(200)
          .set_body_json(json!({"success": true, "data": [{"name": "ioc_lookup"}]})),
      )
      .mount(&server)
      .await;

    let data = backend_for(&server)
      .await
      .call(ApiRequest::get("/api/chat/tools", TIMEOUT))
      .await
      .unwrap();
    assert_eq!(data, json!([{"name": "ioc_lookup"}]));
  }

  #[tokio::test]
  async fn test_base_url_with_path_prefix() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/soc/api/chat/tools"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true, "data": []})))
      .mount(&server)
      .await;

    let backend = HttpBackend::new(&format!("{}/soc", server.uri()), None).unwrap();
    let data = backend
      .call(ApiRequest::get("/api/chat/tools", TIMEOUT))
      .await
      .unwrap();
    assert_eq!(data, json!([]));
  }

  #[tokio::test]
  async fn test_429_is_rate_limited_with_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "12"))
      .mount(&server)
      .await;

    let err = backend_for(&server)
      .await
      .call(ApiRequest::post("/api/chat/message", json!({}), TIMEOUT))
      .await
      .unwrap_err();
    assert_eq!(
      err,
      CallError::RateLimited {
        retry_after_secs: Some(12)
      }
    );
  }

  #[tokio::test]
  async fn test_5xx_is_server_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .respond_with(ResponseTemplate::new(503).set_body_json(json!({"error": "overloaded"})))
      .mount(&server)
      .await;

    let err = backend_for(&server)
      .await
      .call(ApiRequest::get("/api/chat/tools", TIMEOUT))
      .await
      .unwrap_err();
    assert_eq!(
      err,
      CallError::ServerUnavailable {
        status: Some(503),
        message: "overloaded".into()
      }
    );
  }

  #[tokio::test]
  async fn test_4xx_is_client_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .respond_with(
        ResponseTemplate::new(404).set_body_json(json!({"message": "conversation not found"})),
      )
      .mount(&server)
      .await;

    let err = backend_for(&server)
      .await
      .call(ApiRequest::get("/api/chat/conversations/x", TIMEOUT))
      .await
      .unwrap_err();
    assert_eq!(
      err,
      CallError::ClientError {
        status: Some(404),
        message: "conversation not found".into()
      }
    );
    assert!(!err.trips_breaker());
  }

  #[tokio::test]
  async fn test_slow_response_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .respond_with(
        ResponseTemplate::new(200)
          .set_body_json(json!({"success": true}))
          .set_delay(Duration::from_millis(500)),
      )
      .mount(&server)
      .await;

    let timeout = Duration::from_millis(50);
    let err = backend_for(&server)
      .await
      .call(ApiRequest::get("/api/chat/tools", timeout))
      .await
      .unwrap_err();
    assert_eq!(err, CallError::Timeout { after: timeout });
  }

  #[tokio::test]
  async fn test_malformed_body_is_client_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
      .mount(&server)
      .await;

    let err = backend_for(&server)
      .await
      .call(ApiRequest::get("/api/chat/tools", TIMEOUT))
      .await
      .unwrap_err();
    assert!(matches!(err, CallError::ClientError { status: Some(200), .. }));
  }

  #[tokio::test]
  async fn test_unsuccessful_envelope_is_surfaced() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
      .respond_with(
        ResponseTemplate::new(200)
          .set_body_json(json!({"success": false, "message": "title too long"})),
      )
      .mount(&server)
      .await;

    let err = backend_for(&server)
      .await
      .call(ApiRequest::patch(
        "/api/chat/conversations/c1",
        json!({"title": "x"}),
        TIMEOUT,
      ))
      .await
      .unwrap_err();
    assert_eq!(err.user_message(), "title too long");
  }

  #[tokio::test]
  async fn test_connection_refused_is_server_unavailable() {
    let backend = HttpBackend::new("http://127.0.0.1:1", None).unwrap();
    let err = backend
      .call(ApiRequest::get("/api/chat/tools", TIMEOUT))
      .await
      .unwrap_err();
    assert!(matches!(err, CallError::ServerUnavailable { status: None, .. }));
  }

  #[tokio::test]
  async fn test_health() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/health"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "healthy"})))
      .mount(&server)
      .await;

    assert!(backend_for(&server).await.health(TIMEOUT).await);
    assert!(
      !HttpBackend::new("http://127.0.0.1:1", None)
        .unwrap()
        .health(TIMEOUT)
        .await
    );
  }
}
