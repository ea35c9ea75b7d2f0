//! Prediction coordinator
//!
//! Ties the result cache to the model registry:
//!
//! - `predict` serves cached payloads and otherwise runs one backend call per
//!   (generation, image URL), shared by every concurrent caller.
//! - `swap_model` replaces the active identity and clears the cache inside one
//!   exclusive section of the swap lock.
//!
//! Every backend call records the registry generation it started under. Its
//! result is only written to the cache if the generation is unchanged at
//! write time, so a prediction from a retired model can never be served
//! after a swap.

use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::backend::BackendInvoker;
use crate::cache::{CacheStatsSnapshot, ResultCache};
use crate::error::BackendError;
use crate::model::{ActiveModel, InputKey, ModelIdentity, ModelRegistry};
use crate::Result;

type Flight = Shared<BoxFuture<'static, std::result::Result<Bytes, BackendError>>>;
type FlightKey = (u64, InputKey);

struct FlightEntry {
    id: u64,
    flight: Flight,
}

/// Unregisters a tracked flight when its task ends, including by panic.
struct FlightGuard {
    inner: Arc<Inner>,
    flight_key: Option<FlightKey>,
    id: u64,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        if let Some(flight_key) = self.flight_key.take() {
            self.inner.finish_flight(flight_key, self.id);
        }
    }
}

/// Cache and registry counters exposed over the API
#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorStats {
    pub entries: usize,
    pub generation: u64,
    pub in_flight: usize,
    #[serde(flatten)]
    pub cache: CacheStatsSnapshot,
}

struct Inner {
    cache: ResultCache,
    registry: ModelRegistry,
    invoker: Arc<dyn BackendInvoker>,
    /// Exclusive across replace + clear; shared for lookups and writes.
    swap_lock: RwLock<()>,
    in_flight: Mutex<HashMap<FlightKey, FlightEntry>>,
    next_flight_id: AtomicU64,
    single_flight: bool,
}

/// Entry point for predictions and model swaps. Cheap to clone.
#[derive(Clone)]
pub struct PredictionCoordinator {
    inner: Arc<Inner>,
}

enum Lookup {
    Cached(Bytes),
    Pending(Flight),
}

impl PredictionCoordinator {
    pub fn new(invoker: Arc<dyn BackendInvoker>, initial: ModelIdentity) -> Self {
        Self::with_single_flight(invoker, initial, true)
    }

    pub fn with_single_flight(
        invoker: Arc<dyn BackendInvoker>,
        initial: ModelIdentity,
        single_flight: bool,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                cache: ResultCache::new(),
                registry: ModelRegistry::new(initial),
                invoker,
                swap_lock: RwLock::new(()),
                in_flight: Mutex::new(HashMap::new()),
                next_flight_id: AtomicU64::new(0),
                single_flight,
            }),
        }
    }

    /// Return the payload for `key`, calling the backend only on a cache miss.
    ///
    /// Backend failures are returned as-is and never cached.
    pub async fn predict(&self, key: &InputKey) -> Result<Bytes> {
        let flight = match self.lookup(key) {
            Lookup::Cached(payload) => {
                debug!("Cache hit for {}", key);
                return Ok(payload);
            }
            Lookup::Pending(flight) => flight,
        };

        flight.await.map_err(|e| {
            warn!("Prediction for {} failed: {}", key, e);
            crate::Error::from(e)
        })
    }

    /// Install a new model identity and drop every cached prediction.
    pub fn swap_model(&self, identity: ModelIdentity) -> Result<ActiveModel> {
        let identity = ModelIdentity::new(identity.model_ref, identity.labels_ref)?;

        let (active, removed) = {
            let _guard = self.inner.swap_lock.write();
            let active = self.inner.registry.replace(identity);
            let removed = self.inner.cache.clear();
            (active, removed)
        };

        metrics::counter!("iris_model_swaps_total").increment(1);
        info!(
            "Active model is now {} (generation {}), dropped {} cached predictions",
            active.identity, active.generation, removed
        );
        Ok(active)
    }

    pub fn current_model(&self) -> Arc<ModelIdentity> {
        self.inner.registry.current()
    }

    pub fn active_model(&self) -> ActiveModel {
        let _guard = self.inner.swap_lock.read();
        self.inner.registry.active()
    }

    pub fn cache(&self) -> &ResultCache {
        &self.inner.cache
    }

    pub fn backend_name(&self) -> &str {
        self.inner.invoker.name()
    }

    pub fn stats(&self) -> CoordinatorStats {
        let in_flight = self.inner.in_flight.lock().len();
        let _guard = self.inner.swap_lock.read();
        CoordinatorStats {
            entries: self.inner.cache.len(),
            generation: self.inner.registry.generation(),
            in_flight,
            cache: self.inner.cache.stats().snapshot(),
        }
    }

    fn lookup(&self, key: &InputKey) -> Lookup {
        {
            let _guard = self.inner.swap_lock.read();
            if let Some(payload) = self.inner.cache.get(key) {
                return Lookup::Cached(payload);
            }
            if !self.inner.single_flight {
                let active = self.inner.registry.active();
                let (_, flight) = self.start_flight(key.clone(), active, false);
                return Lookup::Pending(flight);
            }
        }

        // Lock order: in_flight, then swap_lock. The flight task takes them
        // one at a time and never nested.
        let mut in_flight = self.inner.in_flight.lock();
        let _guard = self.inner.swap_lock.read();

        // A flight may have finished between the first lookup and here.
        if let Some(payload) = self.inner.cache.peek(key) {
            return Lookup::Cached(payload);
        }

        let active = self.inner.registry.active();
        let flight_key = (active.generation, key.clone());
        if let Some(entry) = in_flight.get(&flight_key) {
            // A resolved flight that is still registered failed; start over.
            if entry.flight.peek().is_none() {
                metrics::counter!("iris_single_flight_joins_total").increment(1);
                debug!("Joining in-flight prediction for {}", key);
                return Lookup::Pending(entry.flight.clone());
            }
        }

        let (id, flight) = self.start_flight(key.clone(), active, true);
        in_flight.insert(
            flight_key,
            FlightEntry {
                id,
                flight: flight.clone(),
            },
        );
        Lookup::Pending(flight)
    }

    /// Spawn the backend call so it completes even if every caller goes away.
    fn start_flight(&self, key: InputKey, active: ActiveModel, tracked: bool) -> (u64, Flight) {
        let id = self.inner.next_flight_id.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let _guard = tracked.then(|| FlightGuard {
                inner: Arc::clone(&inner),
                flight_key: Some((active.generation, key.clone())),
                id,
            });

            let started = Instant::now();
            let outcome = inner.invoker.invoke(&key, &active.identity).await;
            let elapsed = started.elapsed();

            let status = if outcome.is_ok() { "ok" } else { "error" };
            metrics::counter!(
                "iris_backend_requests_total",
                "backend" => inner.invoker.name().to_string(),
                "status" => status,
            )
            .increment(1);
            metrics::histogram!("iris_backend_duration_seconds").record(elapsed.as_secs_f64());

            if let Ok(payload) = &outcome {
                inner.store(&key, payload.clone(), active.generation);
            }
            outcome
        });

        let flight = async move {
            handle.await.unwrap_or_else(|e| {
                Err(BackendError::Unavailable(format!(
                    "backend task did not complete: {}",
                    e
                )))
            })
        }
        .boxed()
        .shared();
        (id, flight)
    }
}

impl Inner {
    /// Unregister flight `id`, leaving any newer flight for the same key alone.
    fn finish_flight(&self, flight_key: FlightKey, id: u64) {
        let mut in_flight = self.in_flight.lock();
        if in_flight.get(&flight_key).is_some_and(|entry| entry.id == id) {
            in_flight.remove(&flight_key);
        }
    }

    /// Cache `payload` unless the model was swapped since `generation` was read.
    fn store(&self, key: &InputKey, payload: Bytes, generation: u64) -> bool {
        let _guard = self.swap_lock.read();
        let current = self.registry.generation();
        if current != generation {
            metrics::counter!("iris_stale_results_discarded_total").increment(1);
            warn!(
                "Discarding result for {} computed under generation {} (now {})",
                key, generation, current
            );
            return false;
        }
        self.cache.put(key.clone(), payload);
        true
    }
}
