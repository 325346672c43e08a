//! Core flood control implementation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, trace};

use super::backend::{Decision, FloodCheck};
use super::identity::Identity;
use super::record::CallRecord;
use crate::clock::{Clock, SystemClock};
use crate::config::FloodControlConfig;
use crate::error::{FloodControlError, Operation, Result};
use crate::store::{StateStore, StoreError};

/// Per-identity flood control over a TTL store.
///
/// Each identity gets one record holding the start of its current window and
/// the number of calls accepted in it. Windows are anchored at the call that
/// opened them. A rejected call is never written back, so it neither consumes
/// a slot nor moves the window.
///
/// The limiter holds no mutable state of its own and can be shared across
/// tasks. Two concurrent checks for the same identity may both read the same
/// record and both be allowed.
pub struct FloodControl {
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    /// Window length, also used as the record TTL
    window: Duration,
    /// The same window for timestamp arithmetic
    window_delta: chrono::Duration,
    max_calls: u64,
}

impl std::fmt::Debug for FloodControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FloodControl")
            .field("window", &self.window)
            .field("max_calls", &self.max_calls)
            .finish()
    }
}

impl FloodControl {
    /// Create a flood control using the system clock.
    pub fn new(store: Arc<dyn StateStore>, config: &FloodControlConfig) -> Result<Self> {
        Self::with_clock(store, Arc::new(SystemClock), config)
    }

    /// Create a flood control reading the time from `clock`.
    pub fn with_clock(
        store: Arc<dyn StateStore>,
        clock: Arc<dyn Clock>,
        config: &FloodControlConfig,
    ) -> Result<Self> {
        let (window, max_calls) = config.validate()?;
        let window_delta = chrono::Duration::from_std(window).map_err(|_| {
            FloodControlError::Config(format!(
                "'time-interval-seconds' is too large: {}",
                config.time_interval_seconds
            ))
        })?;

        debug!(
            window_secs = window.as_secs(),
            max_calls = max_calls,
            "Flood control initialized"
        );

        Ok(Self {
            store,
            clock,
            window,
            window_delta,
            max_calls,
        })
    }

    /// Length of a window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Calls accepted per identity per window.
    pub fn limit(&self) -> u64 {
        self.max_calls
    }

    /// Decide whether a call from `identity` may proceed.
    ///
    /// Accepted calls are recorded in the store. Store and payload failures
    /// are returned as errors without a decision.
    pub async fn check(&self, identity: &Identity) -> Result<Decision> {
        if self.max_calls == 0 {
            trace!(identity = %identity, "Limit is zero, denying");
            return Ok(Decision::Denied);
        }

        let now = self.clock.now();

        trace!(identity = %identity, "Checking flood control");

        let record = match self.load(identity).await? {
            Some(record) if !record.window_elapsed(now, self.window_delta) => record,
            previous => {
                debug!(
                    identity = %identity,
                    expired = previous.is_some(),
                    "Starting new window"
                );
                self.save(identity, &CallRecord::first(now)).await?;
                return Ok(Decision::Allowed);
            }
        };

        let next = record.incremented();
        if next.call_count > self.max_calls {
            debug!(
                identity = %identity,
                count = record.call_count,
                limit = self.max_calls,
                "Call limit exceeded"
            );
            return Ok(Decision::Denied);
        }

        self.save(identity, &next).await?;
        Ok(Decision::Allowed)
    }

    /// Like [`check`](Self::check), but a denial is returned as
    /// [`FloodControlError::LimitExceeded`].
    pub async fn enforce(&self, identity: &Identity) -> Result<()> {
        match self.check(identity).await? {
            Decision::Allowed => Ok(()),
            Decision::Denied => Err(FloodControlError::LimitExceeded {
                identity: identity.clone(),
            }),
        }
    }

    /// The record currently stored for `identity`, if any.
    pub async fn record(&self, identity: &Identity) -> Result<Option<CallRecord>> {
        self.load(identity).await
    }

    async fn load(&self, identity: &Identity) -> Result<Option<CallRecord>> {
        let payload = match self.store.get(identity.as_str()).await {
            Ok(payload) => payload,
            Err(StoreError::NotFound) => return Ok(None),
            Err(source) => {
                return Err(FloodControlError::Store {
                    operation: Operation::Read,
                    identity: identity.clone(),
                    source,
                })
            }
        };

        CallRecord::decode(&payload)
            .map(Some)
            .map_err(|source| FloodControlError::Payload {
                operation: Operation::Read,
                identity: identity.clone(),
                source,
            })
    }

    async fn save(&self, identity: &Identity, record: &CallRecord) -> Result<()> {
        let payload = record
            .encode()
            .map_err(|source| FloodControlError::Payload {
                operation: Operation::Write,
                identity: identity.clone(),
                source,
            })?;

        self.store
            .set(identity.as_str(), payload, self.window)
            .await
            .map_err(|source| FloodControlError::Store {
                operation: Operation::Write,
                identity: identity.clone(),
                source,
            })
    }
}

#[async_trait]
impl FloodCheck for FloodControl {
    async fn check(&self, identity: &Identity) -> Result<Decision> {
        FloodControl::check(self, identity).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::InMemoryStore;
    use chrono::{TimeZone, Utc};
    use parking_lot::Mutex;
    use tokio_test::{assert_err, assert_ok};

    fn config(window_secs: i64, limit: i64) -> FloodControlConfig {
        FloodControlConfig {
            time_interval_seconds: window_secs,
            call_count_limit: limit,
        }
    }

    fn setup(window_secs: i64, limit: i64) -> (FloodControl, Arc<InMemoryStore>, ManualClock) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let store = Arc::new(InMemoryStore::new(Arc::new(clock.clone())));
        let limiter = FloodControl::with_clock(
            store.clone(),
            Arc::new(clock.clone()),
            &config(window_secs, limit),
        )
        .unwrap();
        (limiter, store, clock)
    }

    /// A store whose reads and writes can be made to fail.
    #[derive(Default)]
    struct FailingStore {
        fail_get: bool,
        fail_set: bool,
        writes: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl StateStore for FailingStore {
        async fn set(
            &self,
            key: &str,
            _value: String,
            _ttl: Duration,
        ) -> std::result::Result<(), StoreError> {
            if self.fail_set {
                return Err(StoreError::Timeout);
            }
            self.writes.lock().push(key.to_string());
            Ok(())
        }

        async fn get(&self, _key: &str) -> std::result::Result<String, StoreError> {
            if self.fail_get {
                return Err(StoreError::Timeout);
            }
            Err(StoreError::NotFound)
        }
    }

    #[tokio::test]
    async fn test_first_call_is_allowed() {
        let (limiter, _store, clock) = setup(10, 3);
        let identity = Identity::from(1_i64);

        assert_eq!(limiter.check(&identity).await.unwrap(), Decision::Allowed);

        let record = limiter.record(&identity).await.unwrap().unwrap();
        assert_eq!(record.call_count, 1);
        assert_eq!(record.last_call_at, clock.now());
    }

    #[tokio::test]
    async fn test_calls_within_limit_are_allowed() {
        let (limiter, _store, clock) = setup(60, 5);
        let identity = Identity::from("user-a");

        for i in 1..=5 {
            let decision = limiter.check(&identity).await.unwrap();
            assert_eq!(decision, Decision::Allowed, "Call {} should be allowed", i);
            clock.advance(Duration::from_secs(1));
        }

        let record = limiter.record(&identity).await.unwrap().unwrap();
        assert_eq!(record.call_count, 5);
    }

    #[tokio::test]
    async fn test_rejected_call_leaves_record_unchanged() {
        let (limiter, store, clock) = setup(10, 2);
        let identity = Identity::from(7_i64);

        limiter.check(&identity).await.unwrap();
        limiter.check(&identity).await.unwrap();
        let before = limiter.record(&identity).await.unwrap();
        let writes = store.set_calls();

        for _ in 0..3 {
            clock.advance(Duration::from_secs(1));
            assert_eq!(limiter.check(&identity).await.unwrap(), Decision::Denied);
        }

        assert_eq!(limiter.record(&identity).await.unwrap(), before);
        assert_eq!(store.set_calls(), writes);
    }

    #[tokio::test]
    async fn test_elapsed_window_resets_count() {
        // Zero TTL keeps the record in the store, so the limiter's own
        // window check is what resets it.
        let (limiter, _store, clock) = setup(0, 3);
        let identity = Identity::from(1_i64);

        for _ in 0..3 {
            limiter.check(&identity).await.unwrap();
        }
        assert_eq!(limiter.check(&identity).await.unwrap(), Decision::Denied);

        clock.advance(Duration::from_millis(1));
        assert_eq!(limiter.check(&identity).await.unwrap(), Decision::Allowed);

        let record = limiter.record(&identity).await.unwrap().unwrap();
        assert_eq!(record.call_count, 1);
        assert_eq!(record.last_call_at, clock.now());
    }

    #[tokio::test]
    async fn test_reset_after_high_count() {
        let (limiter, store, clock) = setup(10, 3);
        let identity = Identity::from(9_i64);

        store.insert_raw(
            "9",
            r#"{"last_call_at":"2023-12-31T23:00:00Z","call_count":1000}"#,
        );

        assert_eq!(limiter.check(&identity).await.unwrap(), Decision::Allowed);
        let record = limiter.record(&identity).await.unwrap().unwrap();
        assert_eq!(record.call_count, 1);
        assert_eq!(record.last_call_at, clock.now());
    }

    #[tokio::test]
    async fn test_zero_limit_denies_without_store_access() {
        let (limiter, store, _clock) = setup(10, 0);

        for id in 0..10_i64 {
            let decision = limiter.check(&Identity::from(id)).await.unwrap();
            assert_eq!(decision, Decision::Denied);
        }

        assert_eq!(store.get_calls(), 0);
        assert_eq!(store.set_calls(), 0);
    }

    #[test]
    fn test_accessors_reflect_config() {
        let (limiter, _store, _clock) = setup(30, 4);

        assert_eq!(limiter.window(), Duration::from_secs(30));
        assert_eq!(limiter.limit(), 4);
    }

    #[tokio::test]
    async fn test_negative_config_is_rejected() {
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStore::default());

        let err = FloodControl::new(store.clone(), &config(-1, 3)).unwrap_err();
        assert!(matches!(err, FloodControlError::Config(_)));

        let err = FloodControl::new(store, &config(10, -1)).unwrap_err();
        assert!(matches!(err, FloodControlError::Config(_)));
    }

    #[tokio::test]
    async fn test_oversized_window_is_rejected() {
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStore::default());

        let err = FloodControl::new(store, &config(i64::MAX, 3)).unwrap_err();
        assert!(matches!(err, FloodControlError::Config(_)));
    }

    #[tokio::test]
    async fn test_reference_scenario() {
        let (limiter, _store, clock) = setup(10, 3);
        let identity = Identity::from(1_i64);
        let start = clock.now();

        let mut decisions = Vec::new();
        for offset in [0, 1, 2, 3, 11] {
            clock.set(start + chrono::Duration::seconds(offset));
            decisions.push(limiter.check(&identity).await.unwrap());
        }

        assert_eq!(
            decisions,
            vec![
                Decision::Allowed,
                Decision::Allowed,
                Decision::Allowed,
                Decision::Denied,
                Decision::Allowed,
            ]
        );
    }

    #[tokio::test]
    async fn test_window_boundary_is_inclusive() {
        let (limiter, _store, clock) = setup(10, 3);
        let identity = Identity::from(1_i64);
        let start = clock.now();

        for offset in [0, 1, 2] {
            clock.set(start + chrono::Duration::seconds(offset));
            limiter.check(&identity).await.unwrap();
        }

        // The record was refreshed at t=2, so it is still stored at t=10,
        // and t=10 is not strictly after the window opened at t=0.
        clock.set(start + chrono::Duration::seconds(10));
        assert_eq!(limiter.check(&identity).await.unwrap(), Decision::Denied);

        clock.set(start + chrono::Duration::milliseconds(10_001));
        assert_eq!(limiter.check(&identity).await.unwrap(), Decision::Allowed);
    }

    #[tokio::test]
    async fn test_identities_are_independent() {
        let (limiter, _store, _clock) = setup(10, 1);

        assert_eq!(limiter.check(&Identity::from(1_i64)).await.unwrap(), Decision::Allowed);
        assert_eq!(limiter.check(&Identity::from(1_i64)).await.unwrap(), Decision::Denied);
        assert_eq!(limiter.check(&Identity::from(2_i64)).await.unwrap(), Decision::Allowed);
    }

    #[tokio::test]
    async fn test_ttl_eviction_starts_new_window() {
        let (limiter, store, clock) = setup(10, 1);
        let identity = Identity::from(1_i64);

        limiter.check(&identity).await.unwrap();
        clock.advance(Duration::from_secs(10));

        assert!(store.is_empty());
        assert_eq!(limiter.check(&identity).await.unwrap(), Decision::Allowed);
    }

    #[tokio::test]
    async fn test_enforce_maps_denial_to_limit_exceeded() {
        let (limiter, _store, _clock) = setup(10, 1);
        let identity = Identity::from("bob");

        assert_ok!(limiter.enforce(&identity).await);

        let err = assert_err!(limiter.enforce(&identity).await);
        assert!(err.is_limit_exceeded());
        assert!(matches!(
            err,
            FloodControlError::LimitExceeded { ref identity } if identity.as_str() == "bob"
        ));
    }

    #[tokio::test]
    async fn test_malformed_record_is_read_error() {
        let (limiter, store, _clock) = setup(10, 3);
        store.insert_raw("1", "{not json");

        let err = limiter.check(&Identity::from(1_i64)).await.unwrap_err();

        assert!(err.is_infrastructure());
        assert!(matches!(
            err,
            FloodControlError::Payload {
                operation: Operation::Read,
                ..
            }
        ));
        assert_eq!(store.set_calls(), 0);
    }

    #[tokio::test]
    async fn test_zero_count_record_is_read_error() {
        let (limiter, store, _clock) = setup(10, 3);
        store.insert_raw("1", r#"{"last_call_at":"2024-01-01T00:00:00Z","call_count":0}"#);

        let err = limiter.check(&Identity::from(1_i64)).await.unwrap_err();
        assert!(err.is_infrastructure());
        assert_eq!(store.set_calls(), 0);
    }

    #[tokio::test]
    async fn test_store_read_failure_is_surfaced_without_write() {
        let store = Arc::new(FailingStore {
            fail_get: true,
            ..Default::default()
        });
        let limiter = FloodControl::new(store.clone(), &config(10, 3)).unwrap();

        let err = limiter.check(&Identity::from(5_i64)).await.unwrap_err();

        assert!(matches!(
            err,
            FloodControlError::Store {
                operation: Operation::Read,
                source: StoreError::Timeout,
                ..
            }
        ));
        assert!(err.to_string().contains("identity 5"));
        assert!(store.writes.lock().is_empty());
    }

    #[tokio::test]
    async fn test_store_write_failure_is_surfaced() {
        let store = Arc::new(FailingStore {
            fail_set: true,
            ..Default::default()
        });
        let limiter = FloodControl::new(store, &config(10, 3)).unwrap();

        let err = limiter.check(&Identity::from(5_i64)).await.unwrap_err();

        assert!(matches!(
            err,
            FloodControlError::Store {
                operation: Operation::Write,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_concurrent_checks_for_distinct_identities() {
        let (limiter, store, _clock) = setup(10, 1);
        let limiter = Arc::new(limiter);

        let checks = (0..32_i64).map(|id| {
            let limiter = limiter.clone();
            async move { limiter.check(&Identity::from(id)).await }
        });
        let results = futures::future::join_all(checks).await;

        assert!(results
            .into_iter()
            .all(|r| r.unwrap() == Decision::Allowed));
        assert_eq!(store.len(), 32);
    }

    #[tokio::test]
    async fn test_usable_through_trait_object() {
        let (limiter, _store, _clock) = setup(10, 1);
        let check: Arc<dyn FloodCheck> = Arc::new(limiter);

        assert!(check.check(&Identity::from(1_i64)).await.unwrap().is_allowed());
        assert!(!check.check(&Identity::from(1_i64)).await.unwrap().is_allowed());
    }
}
