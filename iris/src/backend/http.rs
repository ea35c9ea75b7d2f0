//! HTTP inference service backend

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use super::invoker::BackendInvoker;
use super::validate_payload;
use crate::error::BackendError;
use crate::model::{InputKey, ModelIdentity};

/// Backend reached with `POST {url}{endpoint}`
pub struct HttpBackend {
    client: Client,
    url: String,
    timeout: Duration,
}

#[derive(Serialize)]
struct PredictRequest<'a> {
    image_url: &'a str,
    model_path: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    labels_path: Option<&'a str>,
}

impl HttpBackend {
    pub fn new(url: &str, endpoint: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        let endpoint = endpoint.trim_start_matches('/');
        let url = format!("{}/{}", url.trim_end_matches('/'), endpoint);

        Ok(Self {
            client,
            url,
            timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn classify(&self, err: reqwest::Error) -> BackendError {
        if err.is_timeout() {
            BackendError::Timeout(self.timeout)
        } else if err.is_decode() {
            BackendError::Malformed(err.to_string())
        } else {
            BackendError::Unavailable(err.to_string())
        }
    }
}

#[async_trait]
impl BackendInvoker for HttpBackend {
    async fn invoke(&self, key: &InputKey, model: &ModelIdentity) -> Result<Bytes, BackendError> {
        let request = PredictRequest {
            image_url: key.as_str(),
            model_path: &model.model_ref,
            labels_path: model.labels_ref.as_deref(),
        };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        let body = response.bytes().await.map_err(|e| self.classify(e))?;

        if !status.is_success() {
            return Err(BackendError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        validate_payload(&body)?;
        Ok(body)
    }

    fn name(&self) -> &str {
        "http"
    }
}
