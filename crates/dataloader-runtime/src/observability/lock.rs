//! Lock-hold metrics
//!
//! [`MeteredMutex`] wraps an exclusive lock and records, for every critical
//! section, the time between acquisition and release as one histogram sample
//! in seconds. Mutual exclusion, blocking and fairness are those of the
//! wrapped lock.

use super::config::LockMetricConfig;
use super::metrics::DurationHistogram;
use crate::error::{Result, RuntimeError};
use opentelemetry::global;
use opentelemetry::metrics::{Meter, MeterProvider};
use opentelemetry::{InstrumentationScope, KeyValue};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};

const MAX_INSTRUMENT_NAME_LEN: usize = 255;

/// An exclusive lock whose acquisition yields a guard
pub trait ExclusiveLock: Send + Sync {
    type Target: ?Sized;
    type Guard<'a>: DerefMut<Target = Self::Target>
    where
        Self: 'a;

    /// Block until the lock is held
    fn acquire(&self) -> Self::Guard<'_>;
}

impl<T: ?Sized + Send> ExclusiveLock for std::sync::Mutex<T> {
    type Target = T;
    type Guard<'a>
        = std::sync::MutexGuard<'a, T>
    where
        Self: 'a;

    fn acquire(&self) -> Self::Guard<'_> {
        // A panic in another critical section does not invalidate the metric.
        self.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: ?Sized + Send> ExclusiveLock for parking_lot::Mutex<T> {
    type Target = T;
    type Guard<'a>
        = parking_lot::MutexGuard<'a, T>
    where
        Self: 'a;

    fn acquire(&self) -> Self::Guard<'_> {
        self.lock()
    }
}

/// Check a name against the OpenTelemetry instrument-name syntax.
///
/// The SDK replaces instruments with invalid names by a no-op and only logs
/// the problem, which would drop every lock sample.
pub fn validate_instrument_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| RuntimeError::InvalidInstrument {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    let mut chars = name.chars();
    match chars.next() {
        None => return Err(invalid("name is empty")),
        Some(first) if !first.is_ascii_alphabetic() => {
            return Err(invalid("name must start with an ASCII letter"))
        }
        Some(_) => {}
    }
    if name.len() > MAX_INSTRUMENT_NAME_LEN {
        return Err(invalid("name is longer than 255 characters"));
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-' | '/')) {
        return Err(invalid("name may only contain [A-Za-z0-9_.-/]"));
    }
    Ok(())
}

/// Shared lock-hold histogram plus the attributes attached to every sample
#[derive(Clone)]
pub struct LockMetrics {
    histogram: Arc<dyn DurationHistogram>,
    attributes: Vec<KeyValue>,
}

impl LockMetrics {
    /// Create the lock-hold histogram on `meter`.
    ///
    /// `config.meter_name` is not consulted here; the caller picks the meter.
    /// Use [`LockMetrics::from_provider`] to derive it from the config.
    ///
    /// Fails if the instrument cannot be created; callers are expected to
    /// abort startup on error.
    pub fn new(meter: &Meter, config: &LockMetricConfig) -> Result<Self> {
        validate_instrument_name(&config.instrument_name)?;

        let histogram = meter
            .f64_histogram(config.instrument_name.clone())
            .with_description(config.description.clone())
            .with_unit(config.unit.clone())
            .build();

        tracing::debug!(
            instrument = %config.instrument_name,
            "lock duration histogram created"
        );

        Ok(Self::from_histogram(histogram))
    }

    /// Create the lock-hold histogram on the meter scoped by `config.meter_name`
    pub fn from_provider<P>(provider: &P, config: &LockMetricConfig) -> Result<Self>
    where
        P: MeterProvider + ?Sized,
    {
        let scope = InstrumentationScope::builder(config.meter_name.clone()).build();
        Self::new(&provider.meter_with_scope(scope), config)
    }

    /// Same as [`LockMetrics::from_provider`], using the global provider
    pub fn from_global(config: &LockMetricConfig) -> Result<Self> {
        let scope = InstrumentationScope::builder(config.meter_name.clone()).build();
        Self::new(&global::meter_with_scope(scope), config)
    }

    /// Record into an existing histogram
    pub fn from_histogram(histogram: impl DurationHistogram + 'static) -> Self {
        Self {
            histogram: Arc::new(histogram),
            attributes: Vec::new(),
        }
    }

    /// Attach a constant attribute to every sample
    pub fn with_attribute(mut self, attribute: KeyValue) -> Self {
        self.attributes.push(attribute);
        self
    }

    fn record(&self, held: Duration) {
        self.histogram.record_duration(held, &self.attributes);
    }
}

impl fmt::Debug for LockMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockMetrics")
            .field("attributes", &self.attributes)
            .finish_non_exhaustive()
    }
}

/// Exclusive lock that reports how long each critical section held it
pub struct MeteredMutex<L> {
    inner: L,
    metrics: LockMetrics,
}

impl<L: ExclusiveLock> MeteredMutex<L> {
    pub fn new(inner: L, metrics: LockMetrics) -> Self {
        Self { inner, metrics }
    }

    /// Wrap `inner`, creating the default lock-hold histogram on `meter`
    pub fn with_meter(inner: L, meter: &Meter) -> Result<Self> {
        let metrics = LockMetrics::new(meter, &LockMetricConfig::default())?;
        Ok(Self::new(inner, metrics))
    }

    /// Block until the lock is held and start timing the critical section
    pub fn lock(&self) -> MeteredGuard<'_, L> {
        let guard = self.inner.acquire();
        MeteredGuard {
            guard,
            acquired_at: Instant::now(),
            metrics: &self.metrics,
        }
    }

    pub fn metrics(&self) -> &LockMetrics {
        &self.metrics
    }

    pub fn into_inner(self) -> L {
        self.inner
    }
}

impl<L> fmt::Debug for MeteredMutex<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeteredMutex")
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

/// Guard of a [`MeteredMutex`].
///
/// Dropping it records the hold time and then releases the wrapped lock.
pub struct MeteredGuard<'a, L>
where
    L: ExclusiveLock + 'a,
{
    guard: L::Guard<'a>,
    acquired_at: Instant,
    metrics: &'a LockMetrics,
}

impl<'a, L> MeteredGuard<'a, L>
where
    L: ExclusiveLock + 'a,
{
    /// Time since the lock was acquired
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    /// Release the lock, recording the hold time
    pub fn unlock(self) {
        drop(self);
    }
}

impl<'a, L> Deref for MeteredGuard<'a, L>
where
    L: ExclusiveLock + 'a,
{
    type Target = L::Target;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl<'a, L> DerefMut for MeteredGuard<'a, L>
where
    L: ExclusiveLock + 'a,
{
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

impl<'a, L> Drop for MeteredGuard<'a, L>
where
    L: ExclusiveLock + 'a,
{
    fn drop(&mut self) {
        // Fields drop after this body, so the sample is recorded while the
        // lock is still held.
        self.metrics.record(self.acquired_at.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::metrics::Histogram;

    #[test]
    fn test_validate_instrument_name() {
        assert!(validate_instrument_name("mutex.lock.duration").is_ok());
        assert!(validate_instrument_name("cache/lock-hold_time").is_ok());

        assert!(validate_instrument_name("").is_err());
        assert!(validate_instrument_name("_lock").is_err());
        assert!(validate_instrument_name("lock duration").is_err());
        assert!(validate_instrument_name(&"a".repeat(256)).is_err());
        assert!(validate_instrument_name(&"a".repeat(255)).is_ok());
    }

    #[test]
    fn test_lock_metrics_reject_invalid_name() {
        let meter = opentelemetry::global::meter("cache");
        let config = LockMetricConfig::default().with_instrument_name("1st.lock");

        let err = LockMetrics::new(&meter, &config).unwrap_err();
        assert_eq!(
            err,
            RuntimeError::InvalidInstrument {
                name: "1st.lock".to_string(),
                reason: "name must start with an ASCII letter".to_string(),
            }
        );
    }

    #[test]
    fn test_with_meter_default_config() {
        let meter = opentelemetry::global::meter("cache");
        let mutex = MeteredMutex::with_meter(std::sync::Mutex::new(0u32), &meter).unwrap();

        *mutex.lock() += 1;
        assert_eq!(*mutex.into_inner().lock().unwrap(), 1);
    }

    #[test]
    fn test_guard_records_once_on_release() {
        let histogram = Histogram::new("mutex.lock.duration");
        let mutex = MeteredMutex::new(
            parking_lot::Mutex::new(Vec::<u32>::new()),
            LockMetrics::from_histogram(histogram.clone()),
        );

        let mut guard = mutex.lock();
        guard.push(1);
        assert_eq!(histogram.count(), 0);
        guard.unlock();

        assert_eq!(histogram.count(), 1);
        assert_eq!(*mutex.lock(), vec![1]);
        assert_eq!(histogram.count(), 2);
    }

    #[test]
    fn test_poisoned_std_mutex_still_locks() {
        let histogram = Histogram::new("mutex.lock.duration");
        let mutex = Arc::new(MeteredMutex::new(
            std::sync::Mutex::new(5u8),
            LockMetrics::from_histogram(histogram.clone()),
        ));

        let poisoner = mutex.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.lock();
            panic!("poison the lock");
        })
        .join();

        assert_eq!(*mutex.lock(), 5);
        // The panicking section still released through the guard's drop.
        assert_eq!(histogram.count(), 2);
    }
}
