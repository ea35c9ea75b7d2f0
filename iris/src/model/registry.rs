//! Process-wide active model

use super::ModelIdentity;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;

/// Snapshot of the registry: identity plus the generation it was installed as.
#[derive(Debug, Clone)]
pub struct ActiveModel {
    pub identity: Arc<ModelIdentity>,
    pub generation: u64,
    pub activated_at: DateTime<Utc>,
}

/// Holds the active model identity.
///
/// Identity and generation live behind one lock, so a reader never sees the
/// model ref of one identity paired with the labels ref or generation of
/// another.
pub struct ModelRegistry {
    active: RwLock<ActiveModel>,
}

impl ModelRegistry {
    pub fn new(initial: ModelIdentity) -> Self {
        Self {
            active: RwLock::new(ActiveModel {
                identity: Arc::new(initial),
                generation: 0,
                activated_at: Utc::now(),
            }),
        }
    }

    pub fn current(&self) -> Arc<ModelIdentity> {
        Arc::clone(&self.active.read().identity)
    }

    pub fn active(&self) -> ActiveModel {
        self.active.read().clone()
    }

    pub fn generation(&self) -> u64 {
        self.active.read().generation
    }

    /// Install a new identity and return the resulting snapshot.
    pub fn replace(&self, identity: ModelIdentity) -> ActiveModel {
        let mut active = self.active.write();
        *active = ActiveModel {
            identity: Arc::new(identity),
            generation: active.generation + 1,
            activated_at: Utc::now(),
        };
        active.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(model: &str, labels: Option<&str>) -> ModelIdentity {
        ModelIdentity::new(model, labels.map(String::from)).unwrap()
    }

    #[test]
    fn test_initial_identity() {
        let registry = ModelRegistry::new(identity("v1.onnx", None));
        assert_eq!(registry.current().model_ref, "v1.onnx");
        assert_eq!(registry.generation(), 0);
    }

    #[test]
    fn test_replace_bumps_generation() {
        let registry = ModelRegistry::new(identity("v1.onnx", None));
        let active = registry.replace(identity("v2.onnx", Some("labels.json")));

        assert_eq!(active.generation, 1);
        assert_eq!(*registry.current(), identity("v2.onnx", Some("labels.json")));

        registry.replace(identity("v3.onnx", None));
        assert_eq!(registry.generation(), 2);
        assert_eq!(registry.current().labels_ref, None);
    }

    #[test]
    fn test_concurrent_readers_never_see_mixed_identity() {
        let registry = Arc::new(ModelRegistry::new(identity("a.onnx", Some("a.json"))));

        let writer = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                for i in 0..500 {
                    if i % 2 == 0 {
                        registry.replace(identity("b.onnx", Some("b.json")));
                    } else {
                        registry.replace(identity("a.onnx", Some("a.json")));
                    }
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        let current = registry.current();
                        let prefix = current.model_ref.trim_end_matches(".onnx");
                        let labels = current.labels_ref.as_deref().unwrap_or_default();
                        assert_eq!(labels, format!("{}.json", prefix));
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(registry.generation(), 500);
    }
}
