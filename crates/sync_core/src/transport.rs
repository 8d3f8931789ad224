//! Request/response plumbing between the sync engine and the backend.

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use shared::error::ApiError;
use tracing::debug;
use url::Url;

use crate::error::TransportError;

pub type Query<'a> = [(&'a str, String)];

/// JSON request/response transport.
///
/// Paths are relative to the backend's API root and never start with `/`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, path: &str, query: &Query<'_>) -> Result<Value, TransportError>;
    async fn post(&self, path: &str, body: Value) -> Result<Value, TransportError>;
    async fn patch(&self, path: &str, body: Value) -> Result<Value, TransportError>;
    async fn delete(&self, path: &str) -> Result<Value, TransportError>;
}

pub struct HttpTransport {
    http: Client,
    base_url: Url,
}

impl HttpTransport {
    pub fn new(base_url: &str) -> Result<Self, TransportError> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            http: Client::new(),
            base_url,
        })
    }

    pub fn with_client(http: Client, base_url: &str) -> Result<Self, TransportError> {
        let mut transport = Self::new(base_url)?;
        transport.http = http;
        Ok(transport)
    }

    fn url(&self, path: &str) -> Result<Url, TransportError> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }
}

async fn read_json(response: Response) -> Result<Value, TransportError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(match serde_json::from_str::<ApiError>(&body) {
            Ok(error) => TransportError::Api {
                status: status.as_u16(),
                error,
            },
            Err(_) => TransportError::Status {
                status: status.as_u16(),
                body,
            },
        });
    }

    if status == StatusCode::NO_CONTENT {
        return Ok(Value::Null);
    }
    let body = response.bytes().await?;
    if body.is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_slice(&body)?)
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, path: &str, query: &Query<'_>) -> Result<Value, TransportError> {
        let url = self.url(path)?;
        debug!(%url, "http: GET");
        read_json(self.http.get(url).query(query).send().await?).await
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, TransportError> {
        let url = self.url(path)?;
        debug!(%url, "http: POST");
        read_json(self.http.post(url).json(&body).send().await?).await
    }

    async fn patch(&self, path: &str, body: Value) -> Result<Value, TransportError> {
        let url = self.url(path)?;
        debug!(%url, "http: PATCH");
        read_json(self.http.patch(url).json(&body).send().await?).await
    }

    async fn delete(&self, path: &str) -> Result<Value, TransportError> {
        let url = self.url(path)?;
        debug!(%url, "http: DELETE");
        read_json(self.http.delete(url).send().await?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_relative_paths_under_base_path() {
        let transport = HttpTransport::new("http://127.0.0.1:9/api").expect("transport");
        assert_eq!(
            transport.url("posts/5/comments").expect("url").as_str(),
            "http://127.0.0.1:9/api/posts/5/comments"
        );
        assert_eq!(
            transport.url("/sessions").expect("url").as_str(),
            "http://127.0.0.1:9/api/sessions"
        );
    }

    #[test]
    fn rejects_unparseable_base_url() {
        assert!(matches!(
            HttpTransport::new("not a url"),
            Err(TransportError::InvalidUrl(_))
        ));
    }
}
