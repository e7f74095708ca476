//! HTTP implementation of [`BackendApi`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use crate::api::{
    AnalysisResult, AuthProvider, BackendApi, ImportResult, JobToken, PollStatus, StaticToken,
    TestSuiteTarget, UploadPolicy,
};
use crate::error::{BackendError, Result};

/// Default backend base URL.
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8080/api/v1";

/// Backend client configuration.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Base URL without a trailing slash.
    pub base_url: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl BackendConfig {
    /// Creates a configuration for `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            ..Self::default()
        }
    }

    /// Sets the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Body of a `200` status response.
#[derive(Debug, Deserialize)]
struct JobStatusBody {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    result: Option<serde_json::Value>,
}

/// reqwest-backed backend client.
pub struct HttpBackend {
    config: BackendConfig,
    client: reqwest::Client,
    auth: Arc<dyn AuthProvider>,
}

impl std::fmt::Debug for HttpBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBackend")
            .field("config", &self.config)
            .field("authenticated", &self.auth.token().is_some())
            .finish()
    }
}

impl HttpBackend {
    /// Creates a client without credentials.
    pub fn new(config: BackendConfig) -> Result<Self> {
        Self::with_auth(config, Arc::new(StaticToken::default()))
    }

    /// Creates a client that authenticates with `auth`.
    pub fn with_auth(config: BackendConfig, auth: Arc<dyn AuthProvider>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!("Harvest/{}", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            config,
            client,
            auth,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.auth.token() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Maps non-success statuses to errors.
    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::UNAUTHORIZED {
            return Err(BackendError::Unauthorized);
        }
        if status.is_server_error() {
            return Err(BackendError::Server(status.as_u16()));
        }
        let body = response.text().await.unwrap_or_default();
        Err(BackendError::UnexpectedStatus {
            status: status.as_u16(),
            body,
        })
    }

    async fn post_json<T: DeserializeOwned>(&self, path: &str, body: serde_json::Value) -> Result<T> {
        let response = self
            .authorized(self.client.post(self.url(path)))
            .json(&body)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn poll_job<T>(&self, kind: &str, token: &JobToken) -> Result<PollStatus<T>>
    where
        T: DeserializeOwned + Default,
    {
        let path = format!("/jobs/{}/{}", kind, token.token);
        let response = self
            .authorized(self.client.get(self.url(&path)))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            tracing::debug!("Job {} {} still in progress", kind, token.token);
            return Ok(PollStatus::InProgress);
        }

        let body: JobStatusBody = Self::check(response).await?.json().await?;
        match body.status.as_deref().unwrap_or("SUCCESS") {
            "IN_PROGRESS" => Ok(PollStatus::InProgress),
            "ERROR" => Ok(PollStatus::Error(
                body.error.unwrap_or_else(|| "job failed".to_string()),
            )),
            "SUCCESS" => {
                let result = match body.result {
                    Some(value) => serde_json::from_value(value)
                        .map_err(|e| BackendError::Decode(e.to_string()))?,
                    None => T::default(),
                };
                Ok(PollStatus::Success(result))
            }
            other => Err(BackendError::Decode(format!("unknown job status {:?}", other))),
        }
    }
}

#[async_trait]
impl BackendApi for HttpBackend {
    async fn upload_policy(&self) -> Result<UploadPolicy> {
        self.post_json("/uploads/policy", json!({ "contentType": "application/json" }))
            .await
    }

    async fn upload(&self, policy: &UploadPolicy, file_name: &str, bytes: Vec<u8>) -> Result<()> {
        let mut form = Form::new();
        for (name, value) in &policy.fields {
            form = form.text(name.clone(), value.clone());
        }
        let part = Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str("application/json")?;
        form = form.part("file", part);

        let response = self.client.post(&policy.url).multipart(form).send().await?;
        Self::check(response).await?;
        tracing::debug!("Uploaded {} as {}", file_name, policy.key);
        Ok(())
    }

    async fn submit_transform(&self, object_key: &str) -> Result<JobToken> {
        self.post_json("/jobs/transform", json!({ "key": object_key }))
            .await
    }

    async fn submit_import(&self, object_key: &str, target: &TestSuiteTarget) -> Result<JobToken> {
        let mut body = serde_json::to_value(target).map_err(|e| BackendError::Decode(e.to_string()))?;
        body["key"] = json!(object_key);
        self.post_json("/jobs/import", body).await
    }

    async fn poll_transform(&self, token: &JobToken) -> Result<PollStatus<AnalysisResult>> {
        self.poll_job("transform", token).await
    }

    async fn poll_import(&self, token: &JobToken) -> Result<PollStatus<ImportResult>> {
        self.poll_job("import", token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes;
    use axum::extract::{Path, State};
    use axum::http::{HeaderMap, StatusCode as AxumStatus};
    use axum::response::IntoResponse;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct Recorded {
        polls: AtomicU32,
        upload_body: Mutex<Option<String>>,
        auth_header: Mutex<Option<String>>,
        import_body: Mutex<Option<serde_json::Value>>,
    }

    async fn spawn_backend(state: Arc<Recorded>) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let upload_url = format!("{}/bucket", base);

        let app = Router::new()
            .route(
                "/uploads/policy",
                post(move |State(s): State<Arc<Recorded>>, headers: HeaderMap| {
                    let upload_url = upload_url.clone();
                    async move {
                        *s.auth_header.lock() = headers
                            .get("authorization")
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_string);
                        Json(json!({
                            "url": upload_url,
                            "fields": { "acl": "private" },
                            "key": "uploads/abc.har"
                        }))
                    }
                }),
            )
            .route(
                "/bucket",
                post(|State(s): State<Arc<Recorded>>, body: Bytes| async move {
                    *s.upload_body.lock() = Some(String::from_utf8_lossy(&body).into_owned());
                    AxumStatus::NO_CONTENT
                }),
            )
            .route(
                "/jobs/transform",
                post(|| async { Json(json!({ "token": "t-1" })) }),
            )
            .route(
                "/jobs/import",
                post(
                    |State(s): State<Arc<Recorded>>, Json(body): Json<serde_json::Value>| async move {
                        *s.import_body.lock() = Some(body);
                        Json(json!({ "token": "i-1" }))
                    },
                ),
            )
            .route(
                "/jobs/transform/{token}",
                get(|State(s): State<Arc<Recorded>>| async move {
                    match s.polls.fetch_add(1, Ordering::SeqCst) {
                        0 => AxumStatus::NOT_FOUND.into_response(),
                        1 => Json(json!({ "status": "IN_PROGRESS" })).into_response(),
                        _ => Json(json!({
                            "status": "SUCCESS",
                            "result": { "requests": [ { "extractions": [] } ] }
                        }))
                        .into_response(),
                    }
                }),
            )
            .route(
                "/jobs/import/{token}",
                get(|Path(token): Path<String>| async move {
                    match token.as_str() {
                        "unauthorized" => AxumStatus::UNAUTHORIZED.into_response(),
                        "broken" => AxumStatus::INTERNAL_SERVER_ERROR.into_response(),
                        "failed" => Json(json!({ "status": "ERROR", "error": "bad har" }))
                            .into_response(),
                        _ => Json(json!({ "result": { "suiteId": "s-9" } })).into_response(),
                    }
                }),
            )
            .with_state(state);

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        base
    }

    fn token(value: &str) -> JobToken {
        JobToken {
            token: value.to_string(),
        }
    }

    #[test]
    fn config_trims_trailing_slash() {
        let config = BackendConfig::new("http://backend.local/api/");
        assert_eq!(config.base_url, "http://backend.local/api");
    }

    #[tokio::test]
    async fn upload_and_submit_flow() {
        let state = Arc::new(Recorded::default());
        let base = spawn_backend(state.clone()).await;
        let backend = HttpBackend::with_auth(
            BackendConfig::new(base),
            Arc::new(StaticToken(Some("secret".into()))),
        )
        .unwrap();

        let policy = backend.upload_policy().await.unwrap();
        assert_eq!(policy.key, "uploads/abc.har");
        assert_eq!(state.auth_header.lock().as_deref(), Some("Bearer secret"));

        backend
            .upload(&policy, "traffic.har", br#"{"log":{}}"#.to_vec())
            .await
            .unwrap();
        let uploaded = state.upload_body.lock().clone().unwrap();
        assert!(uploaded.contains("name=\"acl\""));
        assert!(uploaded.contains("filename=\"traffic.har\""));
        assert!(uploaded.contains(r#"{"log":{}}"#));

        assert_eq!(backend.submit_transform(&policy.key).await.unwrap(), token("t-1"));

        let target = TestSuiteTarget::New {
            suite_name: "Smoke".into(),
        };
        assert_eq!(
            backend.submit_import(&policy.key, &target).await.unwrap(),
            token("i-1")
        );
        assert_eq!(
            state.import_body.lock().clone().unwrap(),
            json!({ "suite_name": "Smoke", "key": "uploads/abc.har" })
        );
    }

    #[tokio::test]
    async fn transform_poll_maps_statuses() {
        let state = Arc::new(Recorded::default());
        let base = spawn_backend(state).await;
        let backend = HttpBackend::new(BackendConfig::new(base)).unwrap();

        let t = token("t-1");
        assert_eq!(backend.poll_transform(&t).await.unwrap(), PollStatus::InProgress);
        assert_eq!(backend.poll_transform(&t).await.unwrap(), PollStatus::InProgress);
        let PollStatus::Success(result) = backend.poll_transform(&t).await.unwrap() else {
            panic!("expected success");
        };
        assert_eq!(result.requests.len(), 1);
    }

    #[tokio::test]
    async fn import_poll_maps_errors() {
        let state = Arc::new(Recorded::default());
        let base = spawn_backend(state).await;
        let backend = HttpBackend::new(BackendConfig::new(base)).unwrap();

        assert!(matches!(
            backend.poll_import(&token("unauthorized")).await,
            Err(BackendError::Unauthorized)
        ));
        assert!(matches!(
            backend.poll_import(&token("broken")).await,
            Err(BackendError::Server(500))
        ));
        assert_eq!(
            backend.poll_import(&token("failed")).await.unwrap(),
            PollStatus::Error("bad har".into())
        );
        assert_eq!(
            backend.poll_import(&token("ok")).await.unwrap(),
            PollStatus::Success(ImportResult {
                suite_id: "s-9".into()
            })
        );
    }
}
