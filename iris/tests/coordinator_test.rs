//! Concurrency tests for the prediction coordinator.
//!
//! The scripted backend can hold every call at a gate until the test
//! releases it, which lets the tests interleave swaps and cancellations
//! with in-flight backend calls deterministically.

use async_trait::async_trait;
use bytes::Bytes;
use iris::backend::BackendInvoker;
use iris::model::{InputKey, ModelIdentity};
use iris::{BackendError, Error, PredictionCoordinator};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};

struct ScriptedBackend {
    calls: AtomicUsize,
    seen_models: Mutex<Vec<String>>,
    entered: Notify,
    gated: bool,
    gate: Semaphore,
    fail_next: AtomicBool,
}

impl ScriptedBackend {
    fn new(gated: bool) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            seen_models: Mutex::new(Vec::new()),
            entered: Notify::new(),
            gated,
            gate: Semaphore::new(0),
            fail_next: AtomicBool::new(false),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    /// Wait until the backend has been entered once more.
    async fn wait_entered(&self) {
        tokio::time::timeout(Duration::from_secs(5), self.entered.notified())
            .await
            .expect("backend was never called");
    }
}

#[async_trait]
impl BackendInvoker for ScriptedBackend {
    async fn invoke(&self, key: &InputKey, model: &ModelIdentity) -> Result<Bytes, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_models.lock().unwrap().push(model.model_ref.clone());
        self.entered.notify_one();

        if self.gated {
            self.gate.acquire().await.unwrap().forget();
        }
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(BackendError::Unavailable("connection refused".to_string()));
        }

        Ok(Bytes::from(format!(
            r#"{{"predicted_label":"{}@{}","confidence":0.9}}"#,
            key, model.model_ref
        )))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

fn model(name: &str) -> ModelIdentity {
    ModelIdentity::new(name, None).unwrap()
}

fn key(url: &str) -> InputKey {
    InputKey::new(url).unwrap()
}

fn payload_model(payload: &Bytes) -> String {
    let value: serde_json::Value = serde_json::from_slice(payload).unwrap();
    let label = value["predicted_label"].as_str().unwrap();
    label.rsplit_once('@').unwrap().1.to_string()
}

#[tokio::test]
async fn test_second_predict_is_served_from_cache() {
    let backend = ScriptedBackend::new(false);
    let coordinator = PredictionCoordinator::new(backend.clone(), model("v1.onnx"));
    let cat = key("https://x/cat.jpg");

    let first = coordinator.predict(&cat).await.unwrap();
    let second = coordinator.predict(&cat).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(backend.calls(), 1);
    assert_eq!(coordinator.cache().peek(&cat), Some(first));
}

#[tokio::test]
async fn test_swap_forces_fresh_call_with_new_model() {
    let backend = ScriptedBackend::new(false);
    let coordinator = PredictionCoordinator::new(backend.clone(), model("v1.onnx"));
    let cat = key("https://x/cat.jpg");

    coordinator.predict(&cat).await.unwrap();
    let active = coordinator.swap_model(model("v2.onnx")).unwrap();
    assert_eq!(active.generation, 1);
    assert!(coordinator.cache().is_empty());

    let payload = coordinator.predict(&cat).await.unwrap();
    assert_eq!(payload_model(&payload), "v2.onnx");
    assert_eq!(
        *backend.seen_models.lock().unwrap(),
        vec!["v1.onnx".to_string(), "v2.onnx".to_string()]
    );
}

#[tokio::test]
async fn test_failure_is_not_cached() {
    let backend = ScriptedBackend::new(false);
    let coordinator = PredictionCoordinator::new(backend.clone(), model("v1.onnx"));
    let cat = key("https://x/cat.jpg");

    backend.fail_next.store(true, Ordering::SeqCst);
    let err = coordinator.predict(&cat).await.unwrap_err();
    assert!(matches!(err, Error::Backend(BackendError::Unavailable(_))));
    assert!(coordinator.cache().is_empty());

    coordinator.predict(&cat).await.unwrap();
    assert_eq!(backend.calls(), 2);
    assert_eq!(coordinator.cache().len(), 1);
}

#[tokio::test]
async fn test_concurrent_misses_share_one_backend_call() {
    let backend = ScriptedBackend::new(true);
    let coordinator = PredictionCoordinator::new(backend.clone(), model("v1.onnx"));
    let cat = key("https://x/cat.jpg");

    let mut handles = Vec::new();
    for _ in 0..10 {
        let coordinator = coordinator.clone();
        let cat = cat.clone();
        handles.push(tokio::spawn(async move { coordinator.predict(&cat).await }));
    }

    backend.wait_entered().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(coordinator.stats().in_flight, 1);
    backend.release(10);

    let mut payloads = Vec::new();
    for handle in handles {
        payloads.push(handle.await.unwrap().unwrap());
    }

    assert_eq!(backend.calls(), 1);
    assert!(payloads.iter().all(|p| p == &payloads[0]));
    assert_eq!(coordinator.cache().peek(&cat), Some(payloads[0].clone()));
    assert_eq!(coordinator.stats().in_flight, 0);
}

#[tokio::test]
async fn test_concurrent_misses_without_single_flight() {
    let backend = ScriptedBackend::new(false);
    let coordinator =
        PredictionCoordinator::with_single_flight(backend.clone(), model("v1.onnx"), false);
    let cat = key("https://x/cat.jpg");

    let mut handles = Vec::new();
    for _ in 0..10 {
        let coordinator = coordinator.clone();
        let cat = cat.clone();
        handles.push(tokio::spawn(async move { coordinator.predict(&cat).await }));
    }

    let mut payloads = Vec::new();
    for handle in handles {
        payloads.push(handle.await.unwrap().unwrap());
    }

    let calls = backend.calls();
    assert!((1..=10).contains(&calls), "calls = {}", calls);
    assert!(payloads.iter().all(|p| p == &payloads[0]));
    assert_eq!(coordinator.cache().len(), 1);
    assert_eq!(coordinator.cache().peek(&cat), Some(payloads[0].clone()));
}

#[tokio::test]
async fn test_joined_callers_share_failure() {
    let backend = ScriptedBackend::new(true);
    let coordinator = PredictionCoordinator::new(backend.clone(), model("v1.onnx"));
    let cat = key("https://x/cat.jpg");
    backend.fail_next.store(true, Ordering::SeqCst);

    let mut handles = Vec::new();
    for _ in 0..3 {
        let coordinator = coordinator.clone();
        let cat = cat.clone();
        handles.push(tokio::spawn(async move { coordinator.predict(&cat).await }));
    }

    backend.wait_entered().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    backend.release(3);

    for handle in handles {
        assert!(handle.await.unwrap().is_err());
    }
    assert_eq!(backend.calls(), 1);
    assert!(coordinator.cache().is_empty());
    assert_eq!(coordinator.stats().in_flight, 0);
}

#[tokio::test]
async fn test_swap_during_backend_call_discards_stale_result() {
    let backend = ScriptedBackend::new(true);
    let coordinator = PredictionCoordinator::new(backend.clone(), model("v1.onnx"));
    let cat = key("https://x/cat.jpg");

    let pending = {
        let coordinator = coordinator.clone();
        let cat = cat.clone();
        tokio::spawn(async move { coordinator.predict(&cat).await })
    };
    backend.wait_entered().await;

    coordinator.swap_model(model("v2.onnx")).unwrap();
    backend.release(1);

    // The caller still gets the answer it asked for, but it is never cached.
    let stale = pending.await.unwrap().unwrap();
    assert_eq!(payload_model(&stale), "v1.onnx");
    assert!(coordinator.cache().is_empty());

    backend.release(1);
    let fresh = coordinator.predict(&cat).await.unwrap();
    assert_eq!(payload_model(&fresh), "v2.onnx");
    assert_eq!(coordinator.cache().peek(&cat), Some(fresh));
    assert_eq!(backend.calls(), 2);
}

#[tokio::test]
async fn test_flights_are_not_shared_across_generations() {
    let backend = ScriptedBackend::new(true);
    let coordinator = PredictionCoordinator::new(backend.clone(), model("v1.onnx"));
    let cat = key("https://x/cat.jpg");

    let old = {
        let coordinator = coordinator.clone();
        let cat = cat.clone();
        tokio::spawn(async move { coordinator.predict(&cat).await })
    };
    backend.wait_entered().await;

    coordinator.swap_model(model("v2.onnx")).unwrap();

    let new = {
        let coordinator = coordinator.clone();
        let cat = cat.clone();
        tokio::spawn(async move { coordinator.predict(&cat).await })
    };
    backend.wait_entered().await;
    assert_eq!(backend.calls(), 2);

    backend.release(2);
    assert_eq!(payload_model(&old.await.unwrap().unwrap()), "v1.onnx");
    let fresh = new.await.unwrap().unwrap();
    assert_eq!(payload_model(&fresh), "v2.onnx");
    assert_eq!(coordinator.cache().peek(&cat), Some(fresh));
}

#[tokio::test]
async fn test_cancelled_caller_still_fills_cache() {
    let backend = ScriptedBackend::new(true);
    let coordinator = PredictionCoordinator::new(backend.clone(), model("v1.onnx"));
    let cat = key("https://x/cat.jpg");

    let pending = {
        let coordinator = coordinator.clone();
        let cat = cat.clone();
        tokio::spawn(async move { coordinator.predict(&cat).await })
    };
    backend.wait_entered().await;
    pending.abort();
    backend.release(1);

    tokio::time::timeout(Duration::from_secs(5), async {
        while coordinator.cache().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("cache was never filled");

    coordinator.predict(&cat).await.unwrap();
    assert_eq!(backend.calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cache_only_holds_current_model_under_swaps() {
    let backend = ScriptedBackend::new(false);
    let coordinator = PredictionCoordinator::new(backend.clone(), model("v0.onnx"));
    let keys: Vec<InputKey> = (0..8).map(|i| key(&format!("https://x/{}.jpg", i))).collect();

    let mut handles = Vec::new();
    for round in 0..20 {
        for k in &keys {
            let coordinator = coordinator.clone();
            let k = k.clone();
            handles.push(tokio::spawn(async move {
                coordinator.predict(&k).await.unwrap();
            }));
        }
        if round % 5 == 4 {
            let coordinator = coordinator.clone();
            let next = model(&format!("v{}.onnx", round / 5 + 1));
            handles.push(tokio::spawn(async move {
                coordinator.swap_model(next).unwrap();
            }));
        }
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(coordinator.active_model().generation, 4);
    let current = coordinator.current_model().model_ref.clone();
    for k in &keys {
        if let Some(payload) = coordinator.cache().peek(k) {
            assert_eq!(payload_model(&payload), current, "stale entry for {}", k);
        }
    }
}
