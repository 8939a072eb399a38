//! REST transport adapter.
//!
//! Implements the transport port against the portal's REST API with a
//! shared `reqwest` client. Responses are classified into the error
//! taxonomy here; the rest of the crate never sees a status code.

use async_trait::async_trait;
use reqwest::{Client, Method, Response, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use url::Url;

use crate::application::transport::{ResourceTransport, WriteRequest};
use crate::cache::ResourceKey;
use crate::config::TransportSettings;
use crate::domain::error::ResourceError;
use crate::domain::types::ResourceKind;

use super::error::InfraError;

/// Error payload shape the portal's endpoints agree on.
#[derive(Debug, Deserialize, Default)]
struct ErrorBody {
    message: Option<String>,
    kind: Option<String>,
}

pub struct RestTransport {
    client: Client,
    base: Url,
}

impl RestTransport {
    pub fn new(settings: &TransportSettings) -> Result<Self, InfraError> {
        let client = Client::builder()
            .user_agent(Self::user_agent())
            .timeout(settings.timeout)
            .build()
            .map_err(|err| {
                InfraError::configuration(format!("failed to build http client: {err}"))
            })?;
        Ok(Self {
            client,
            base: settings.base_url.clone(),
        })
    }

    pub fn user_agent() -> &'static str {
        concat!("tessera/", env!("CARGO_PKG_VERSION"))
    }

    fn url(&self, segments: &[&str]) -> Result<Url, ResourceError> {
        let mut url = self.base.clone();
        {
            let mut path = url.path_segments_mut().map_err(|()| {
                ResourceError::invariant("transport base URL cannot be a base")
            })?;
            path.pop_if_empty();
            path.extend(segments);
        }
        Ok(url)
    }

    async fn request(
        &self,
        method: Method,
        url: Url,
        body: Option<Value>,
    ) -> Result<Value, ResourceError> {
        let mut request = self.client.request(method, url);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(classify_send_error)?;
        handle(response).await
    }
}

#[async_trait]
impl ResourceTransport for RestTransport {
    async fn fetch(&self, key: &ResourceKey) -> Result<Value, ResourceError> {
        let scope = key.params().first().map(String::as_str).ok_or_else(|| {
            ResourceError::invariant(format!("key `{key}` has no scope parameter"))
        })?;
        let url = match key.kind() {
            ResourceKind::Comments => self.url(&["comments", scope])?,
            ResourceKind::Notifications => self.url(&["notifications", scope])?,
            ResourceKind::PaymentHistory => self.url(&["payments", "history", scope])?,
            ResourceKind::Subscription => self.url(&["payments", "subscription", scope])?,
        };
        self.request(Method::GET, url, None).await
    }

    async fn write(&self, request: &WriteRequest) -> Result<Value, ResourceError> {
        match request {
            WriteRequest::CreateComment {
                publication_id,
                author,
                body,
            } => {
                let url = self.url(&["comments"])?;
                let payload = json!({
                    "publication_id": publication_id,
                    "author": author,
                    "body": body,
                });
                self.request(Method::POST, url, Some(payload)).await
            }
            WriteRequest::MarkNotificationRead {
                user_id,
                notification_id,
            } => {
                let url = self.url(&["notifications", notification_id, "read"])?;
                let payload = json!({ "user_id": user_id });
                self.request(Method::POST, url, Some(payload)).await
            }
            WriteRequest::CreateSubscription { user_id, plan } => {
                let url = self.url(&["payments", "subscription"])?;
                let payload = json!({ "user_id": user_id, "plan": plan });
                self.request(Method::POST, url, Some(payload)).await
            }
        }
    }

    async fn check_status(&self, transaction_id: &str) -> Result<Value, ResourceError> {
        let mut url = self.url(&["payments", "subscription", "verify"])?;
        url.query_pairs_mut()
            .append_pair("transaction_id", transaction_id);
        self.request(Method::GET, url, None).await
    }
}

/// Connection-level failures are transient by definition; the request
/// may never have reached the server.
fn classify_send_error(err: reqwest::Error) -> ResourceError {
    ResourceError::transient(err.to_string())
}

async fn handle(response: Response) -> Result<Value, ResourceError> {
    let status = response.status();
    let bytes = response
        .bytes()
        .await
        .map_err(classify_send_error)?;

    if status.is_success() {
        return serde_json::from_slice(&bytes)
            .map_err(|err| ResourceError::decode(format!("response body: {err}")));
    }

    let body: ErrorBody = serde_json::from_slice(&bytes).unwrap_or_default();
    Err(classify_status(status, body))
}

fn classify_status(status: StatusCode, body: ErrorBody) -> ResourceError {
    let message = body
        .message
        .unwrap_or_else(|| format!("status {status}"));
    if status == StatusCode::NOT_FOUND {
        ResourceError::not_found(message)
    } else if status.is_server_error() {
        ResourceError::transient(message)
    } else {
        ResourceError::rejected(message, body.kind)
    }
}
