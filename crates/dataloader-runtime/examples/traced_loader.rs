//! Example wiring a toy batching loader to the loader instrumentation
//!
//! This example shows how to:
//! - Select a tracer backend from configuration
//! - Trace load, wait and batch phases of a loader
//! - Meter the loader's shared locks
//! - Check phase pairing with the recording tracer
//!
//! Run with:
//! ```bash
//! cargo run -p dataloader-runtime --example traced_loader
//! RUST_LOG=debug cargo run -p dataloader-runtime --example traced_loader -- '{"tracer": "tracing", "span_level": "debug"}'
//! ```

use dataloader_core::{Key, LoadError, LoadResult, Resolver, Thunk, Value};
use dataloader_runtime::observability::{
    Histogram, LockMetrics, MeteredMutex, RecordingTracer, TelemetryConfig, Tracer,
    TracerBackend,
};
use opentelemetry::Context;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const BATCH_WINDOW: Duration = Duration::from_millis(5);

type Queue<K, V> = Vec<(K, Resolver<V>)>;
type FetchFn<K, V> = fn(&[K]) -> Vec<LoadResult<V>>;

/// Loader batching lookups of `K` and caching their results
struct BatchLoader<K: Key, V: Value> {
    cache: MeteredMutex<Mutex<HashMap<K, Thunk<V>>>>,
    queue: MeteredMutex<Mutex<Queue<K, V>>>,
    tracer: Arc<dyn Tracer<K, V>>,
    fetch: FetchFn<K, V>,
}

impl<K: Key, V: Value> BatchLoader<K, V> {
    fn new(fetch: FetchFn<K, V>, tracer: Arc<dyn Tracer<K, V>>, metrics: LockMetrics) -> Self {
        Self {
            cache: MeteredMutex::new(Mutex::new(HashMap::new()), metrics.clone()),
            queue: MeteredMutex::new(Mutex::new(Vec::new()), metrics),
            tracer,
            fetch,
        }
    }

    async fn load(&self, cx: Context, key: K) -> LoadResult<V> {
        let (_cx, finish) = self.tracer.trace_load(cx, &key);

        let thunk = {
            let mut cache = self.cache.lock();
            match cache.get(&key) {
                Some(thunk) => thunk.clone(),
                None => {
                    let (resolver, thunk) = Thunk::channel();
                    cache.insert(key.clone(), thunk.clone());
                    self.queue.lock().push((key, resolver));
                    thunk
                }
            }
        };

        let result = thunk.get().await;
        finish.finish(&thunk);
        result
    }

    /// Wait out one batching window, then fetch everything queued during it
    async fn dispatch(&self, cx: Context) {
        let (cx, wait) = self.tracer.trace_wait(cx);
        tokio::time::sleep(BATCH_WINDOW).await;

        let queued: Queue<K, V> = std::mem::take(&mut *self.queue.lock());
        let keys: Vec<K> = queued.iter().map(|(key, _)| key.clone()).collect();
        wait.finish(&keys);

        if keys.is_empty() {
            return;
        }

        let (_cx, batch) = self.tracer.trace_batch(cx, &keys);
        let results = (self.fetch)(&keys);
        batch.finish(&results);

        for ((_, resolver), result) in queued.into_iter().zip(results) {
            resolver.resolve(result);
        }
    }
}

/// Stand-in for the backing store: ids above 100 do not exist
fn fetch_users(ids: &[u32]) -> Vec<LoadResult<String>> {
    ids.iter()
        .map(|id| match *id {
            id if id > 100 => Err(LoadError::NotFound(format!("user {id}"))),
            id => Ok(format!("user-{id}")),
        })
        .collect()
}

async fn run<K: Key, V: Value>(loader: Arc<BatchLoader<K, V>>, keys: &[K]) -> Vec<LoadResult<V>> {
    let handles: Vec<_> = keys
        .iter()
        .map(|key| {
            let loader = loader.clone();
            let key = key.clone();
            tokio::spawn(async move { loader.load(Context::new(), key).await })
        })
        .collect();

    // Keep opening windows until every load has been answered, so a load
    // that queues after a window closes is picked up by the next one.
    while handles.iter().any(|handle| !handle.is_finished()) {
        loader.dispatch(Context::new()).await;
    }

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        results.push(handle.await.unwrap_or(Err(LoadError::Canceled)));
    }
    results
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config: TelemetryConfig = match std::env::args().nth(1) {
        Some(json) => serde_json::from_str(&json)?,
        None => TelemetryConfig::new(TracerBackend::Tracing),
    };
    config.validate()?;
    tracing::info!(backend = ?config.tracer, "Starting traced loader example");

    let ids = [1, 2, 2, 3, 101, 1];

    // Configured backend, with lock holds exported through the global meter
    let metrics = LockMetrics::from_global(&config.lock)?;
    let loader: Arc<BatchLoader<u32, String>> =
        Arc::new(BatchLoader::new(fetch_users, config.build_tracer(), metrics));
    for (id, result) in ids.iter().zip(run(loader, &ids).await) {
        tracing::info!(id, result = ?result, "Loaded");
    }

    // Recording backend, with lock holds kept in memory
    let recording = RecordingTracer::new();
    let histogram = Histogram::new(config.lock.instrument_name.clone());
    let loader: Arc<BatchLoader<u32, String>> = Arc::new(BatchLoader::new(
        fetch_users,
        Arc::new(recording.clone()),
        LockMetrics::from_histogram(histogram.clone()),
    ));
    run(loader, &ids).await;

    println!("Recorded phases:");
    for phase in recording.phases() {
        println!(
            "  #{:<2} {:<22} parent={:?} keys={} outcome={:?}",
            phase.id,
            phase.phase.to_string(),
            phase.parent_id,
            phase.keys.as_deref().unwrap_or("-"),
            phase.outcome
        );
    }
    println!("Open phases: {}", recording.open().len());
    println!(
        "Lock holds: {} samples, max {:.6}s, p99 {:.6}s",
        histogram.count(),
        histogram.max().unwrap_or_default(),
        histogram.percentile(99.0)
    );

    Ok(())
}
