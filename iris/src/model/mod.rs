//! Prediction inputs and model identities

mod registry;

pub use registry::{ActiveModel, ModelRegistry};

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a prediction request: the raw image URL.
///
/// Keys compare by exact string equality. No canonicalization is applied, so
/// `https://x/a.jpg` and `https://x/a.jpg/` are distinct keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InputKey(String);

impl InputKey {
    /// Wrap a raw URL, rejecting empty or blank values.
    pub fn new(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(Error::InvalidInput("image_url is required".to_string()));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InputKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Model artifact plus optional labels artifact used by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelIdentity {
    pub model_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels_ref: Option<String>,
}

impl ModelIdentity {
    /// Build an identity. An empty labels reference means "no labels".
    pub fn new(model_ref: impl Into<String>, labels_ref: Option<String>) -> Result<Self> {
        let identity = Self {
            model_ref: model_ref.into(),
            labels_ref: labels_ref.filter(|l| !l.trim().is_empty()),
        };
        identity.validate()?;
        Ok(identity)
    }

    pub fn validate(&self) -> Result<()> {
        if self.model_ref.trim().is_empty() {
            return Err(Error::InvalidInput(
                "model reference must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for ModelIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.labels_ref {
            Some(labels) => write!(f, "{} (labels: {})", self.model_ref, labels),
            None => f.write_str(&self.model_ref),
        }
    }
}

/// Shape every backend payload must have.
///
/// Used only to validate responses; the cache stores the backend bytes as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub predicted_label: String,
    pub confidence: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_key_rejects_blank() {
        assert!(matches!(InputKey::new(""), Err(Error::InvalidInput(_))));
        assert!(matches!(InputKey::new("   "), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_input_key_is_not_canonicalized() {
        let a = InputKey::new("https://x/cat.jpg").unwrap();
        let b = InputKey::new("https://x/cat.jpg/").unwrap();
        assert_ne!(a, b);
        assert_eq!(a.as_str(), "https://x/cat.jpg");
    }

    #[test]
    fn test_identity_requires_model() {
        assert!(ModelIdentity::new("", None).is_err());
        assert!(ModelIdentity::new("  ", Some("labels.json".into())).is_err());
    }

    #[test]
    fn test_identity_empty_labels_means_none() {
        let identity = ModelIdentity::new("v2.onnx", Some(String::new())).unwrap();
        assert_eq!(identity.labels_ref, None);

        let identity = ModelIdentity::new("v2.onnx", Some("labels.json".into())).unwrap();
        assert_eq!(identity.labels_ref.as_deref(), Some("labels.json"));
    }
}
