// Pricing Oracle Integration
//
// This module abstracts where an item's suggested base price comes from. The
// valuation engine is agnostic to whether suggestions come from a language model,
// a catalog price list, or nothing at all. Every suggestion is best-effort: a slow,
// failing or disabled oracle degrades to the condition table, it never blocks or
// fails a valuation.

use crate::types::Condition;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// What an oracle is asked about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingQuery {
    pub title: String,
    pub author: String,
    pub condition: Condition,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OracleError {
    #[error("oracle disabled by configuration")]
    Disabled,

    #[error("oracle unavailable: {0}")]
    Unavailable(String),

    #[error("oracle returned malformed suggestion: {0}")]
    Malformed(String),

    #[error("oracle timed out after {after_ms}ms")]
    TimedOut { after_ms: u64 },

    #[error("all {workers} oracle workers are busy")]
    Saturated { workers: usize },
}

/// Trait for pricing adapters. Implement this to integrate an external
/// pricing service.
pub trait PricingOracle: Send + Sync {
    /// Human readable name, used in logs
    fn name(&self) -> &str;

    /// Suggested base points for the query. May block; callers bound it.
    fn suggest_points(&self, query: &PricingQuery) -> Result<i64, OracleError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub enabled: bool,
    /// Hard ceiling on how long a valuation waits for a suggestion
    pub timeout_ms: u64,
    /// Fixed number of threads that call the oracle. When all are busy,
    /// valuations skip the oracle instead of queueing.
    pub workers: usize,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: 250,
            workers: 4,
        }
    }
}

type Reply = Sender<Result<i64, OracleError>>;

struct OracleJob {
    query: PricingQuery,
    reply: Reply,
}

/// Runs an oracle on a fixed pool of worker threads and waits at most
/// `timeout_ms` for an answer. A call that overruns is abandoned but keeps its
/// worker until the adapter returns, so a stalled oracle can tie up at most
/// `workers` threads; further calls are refused up front with `Saturated`.
#[derive(Clone)]
pub struct BoundedOracle {
    inner: Arc<dyn PricingOracle>,
    config: OracleConfig,
    jobs: Sender<OracleJob>,
    in_flight: Arc<AtomicUsize>,
    workers: usize,
}

impl BoundedOracle {
    pub fn new(inner: Arc<dyn PricingOracle>, config: OracleConfig) -> Self {
        let size = if config.enabled { config.workers } else { 0 };
        let (jobs, queue) = crossbeam_channel::bounded::<OracleJob>(size.max(1));
        let in_flight = Arc::new(AtomicUsize::new(0));

        let mut workers = 0;
        for index in 0..size {
            let inner = Arc::clone(&inner);
            let queue = queue.clone();
            let in_flight = Arc::clone(&in_flight);
            let spawned = thread::Builder::new()
                .name(format!("pricing-oracle-{index}"))
                .spawn(move || run_worker(inner, queue, in_flight));
            match spawned {
                Ok(_) => workers += 1,
                Err(e) => tracing::warn!(error = %e, index, "failed to start oracle worker"),
            }
        }

        Self {
            inner,
            config,
            jobs,
            in_flight,
            workers,
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn config(&self) -> &OracleConfig {
        &self.config
    }

    /// Threads actually running for this oracle.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Calls currently held by a worker, including abandoned ones.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn suggest(&self, query: &PricingQuery) -> Result<i64, OracleError> {
        if !self.config.enabled {
            return Err(OracleError::Disabled);
        }

        // claim a worker slot; the queue never holds more jobs than free workers
        let workers = self.workers;
        if self
            .in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < workers).then_some(n + 1))
            .is_err()
        {
            return Err(OracleError::Saturated { workers });
        }

        let (reply, answer) = crossbeam_channel::bounded(1);
        let job = OracleJob {
            query: query.clone(),
            reply,
        };
        if self.jobs.try_send(job).is_err() {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            return Err(OracleError::Saturated { workers });
        }

        let suggestion = match answer.recv_timeout(Duration::from_millis(self.config.timeout_ms)) {
            Ok(result) => result?,
            Err(RecvTimeoutError::Timeout) => {
                return Err(OracleError::TimedOut {
                    after_ms: self.config.timeout_ms,
                })
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(OracleError::Unavailable(
                    "oracle worker exited without answering".to_string(),
                ))
            }
        };

        if suggestion <= 0 {
            return Err(OracleError::Malformed(format!(
                "non-positive suggestion {suggestion}"
            )));
        }
        Ok(suggestion)
    }
}

/// Worker loop. Exits once every `BoundedOracle` clone sharing the queue is dropped.
fn run_worker(inner: Arc<dyn PricingOracle>, queue: Receiver<OracleJob>, in_flight: Arc<AtomicUsize>) {
    for job in queue.iter() {
        let result = panic::catch_unwind(AssertUnwindSafe(|| inner.suggest_points(&job.query)))
            .unwrap_or_else(|_| Err(OracleError::Unavailable(format!("{} panicked", inner.name()))));
        in_flight.fetch_sub(1, Ordering::SeqCst);
        // the caller may have timed out already
        let _ = job.reply.send(result);
    }
}

impl std::fmt::Debug for BoundedOracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedOracle")
            .field("oracle", &self.inner.name())
            .field("config", &self.config)
            .field("workers", &self.workers)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

/// Best-effort suggestion: any failure is logged and reported as `None`.
pub fn suggestion_or_fallback(oracle: Option<&BoundedOracle>, query: &PricingQuery) -> Option<i64> {
    let oracle = oracle?;
    match oracle.suggest(query) {
        Ok(points) => {
            tracing::debug!(oracle = oracle.name(), title = %query.title, points, "oracle suggestion");
            Some(points)
        }
        Err(OracleError::Disabled) => None,
        Err(e) => {
            tracing::warn!(
                oracle = oracle.name(),
                title = %query.title,
                error = %e,
                "oracle failed, using condition table"
            );
            None
        }
    }
}

/// Catalog-backed oracle: a fixed price list keyed by title+author
/// (case-insensitive). Useful for simulations and tests.
pub struct StaticOracle {
    name: String,
    prices: HashMap<(String, String), i64>,
    default_points: Option<i64>,
    healthy: AtomicBool,
}

impl StaticOracle {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            prices: HashMap::new(),
            default_points: None,
            healthy: AtomicBool::new(true),
        }
    }

    pub fn with_price(mut self, title: &str, author: &str, points: i64) -> Self {
        self.prices.insert(catalog_key(title, author), points);
        self
    }

    pub fn with_default(mut self, points: i64) -> Self {
        self.default_points = Some(points);
        self
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}

impl PricingOracle for StaticOracle {
    fn name(&self) -> &str {
        &self.name
    }

    fn suggest_points(&self, query: &PricingQuery) -> Result<i64, OracleError> {
        if !self.is_healthy() {
            return Err(OracleError::Unavailable(format!("{} is offline", self.name)));
        }
        self.prices
            .get(&catalog_key(&query.title, &query.author))
            .copied()
            .or(self.default_points)
            .ok_or_else(|| OracleError::Unavailable(format!("no price for '{}'", query.title)))
    }
}

fn catalog_key(title: &str, author: &str) -> (String, String) {
    (title.trim().to_lowercase(), author.trim().to_lowercase())
}
