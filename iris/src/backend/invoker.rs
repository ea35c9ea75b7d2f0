//! Backend invoker trait and construction from configuration

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::error::BackendError;
use crate::model::{InputKey, ModelIdentity};

/// Configuration for the compute backend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    /// Sibling inference service reached over HTTP
    Http {
        url: String,
        #[serde(default = "default_endpoint")]
        endpoint: String,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
    /// Script spawned once per prediction:
    /// `program args... <image_url> <model_ref> [labels_ref]`
    Process {
        program: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
        #[serde(default)]
        working_dir: Option<PathBuf>,
    },
}

fn default_endpoint() -> String {
    "/predict".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::Http {
            url: "http://127.0.0.1:8000".to_string(),
            endpoint: default_endpoint(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl BackendConfig {
    /// Point the gateway at an HTTP backend, keeping HTTP settings if present.
    pub fn override_url(&mut self, new_url: impl Into<String>) {
        match self {
            Self::Http { url, .. } => *url = new_url.into(),
            Self::Process { .. } => {
                *self = Self::Http {
                    url: new_url.into(),
                    endpoint: default_endpoint(),
                    timeout_secs: default_timeout_secs(),
                }
            }
        }
    }
}

/// Capability that runs one inference call outside this process.
///
/// Implementations bound their own call duration and report every failure
/// as a [`BackendError`]; callers never retry.
#[async_trait]
pub trait BackendInvoker: Send + Sync {
    /// Predict a label for `key` with the given model identity.
    /// The returned bytes are the backend's response, unmodified.
    async fn invoke(&self, key: &InputKey, model: &ModelIdentity) -> Result<Bytes, BackendError>;

    /// Short name used in logs and metrics labels
    fn name(&self) -> &str;
}

/// Create a backend invoker from configuration
pub fn create_invoker(config: &BackendConfig) -> anyhow::Result<Arc<dyn BackendInvoker>> {
    match config {
        BackendConfig::Http {
            url,
            endpoint,
            timeout_secs,
        } => {
            let backend =
                super::http::HttpBackend::new(url, endpoint, Duration::from_secs(*timeout_secs))?;
            Ok(Arc::new(backend))
        }
        BackendConfig::Process {
            program,
            args,
            timeout_secs,
            working_dir,
        } => {
            let backend = super::process::ProcessBackend::new(
                program,
                args.clone(),
                working_dir.clone(),
                Duration::from_secs(*timeout_secs),
            )?;
            Ok(Arc::new(backend))
        }
    }
}
