//! Parallel Executor
//!
//! Fork-join fan-out of driver actions over a [`Bundle`]. Work runs on a bounded rayon
//! worker pool owned by the executor and the calling thread blocks until every unit has
//! finished. There is no fire-and-forget variant.
//!
//! # Contract
//!
//! - `run_per_session` invokes the action once per session handle.
//! - `run_per_channel` invokes it once per channel address. Channels of one session may
//!   run concurrently, since a multi-channel instrument exposes independent channels.
//! - A failing (or panicking) unit never cancels its siblings. Once everything has
//!   finished, all failures are returned together as one [`AggregateExecutionError`],
//!   each carrying the addresses it affects.
//! - Results come back in executor order: sessions in bundle order, channels in session
//!   order. Each unit writes only its own slot, so no lock is shared across sessions.
//!
//! # Example
//!
//! ```rust,ignore
//! let executor = ParallelExecutor::new(0)?;
//! let voltages = executor.run_per_channel(&bundle, "measure_voltage", |session, address| {
//!     Ok(session.driver.measure(&address.channel)?.voltage)
//! })?;
//! ```

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

use anyhow::anyhow;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, info_span, warn};

use crate::addressing::{ChannelAddress, SessionId};
use crate::broadcast;
use crate::bundle::{Bundle, SessionHandle};
use crate::data::PinSiteTable;
use crate::error::{AggregateExecutionError, AppResult, AteError, ChannelFailure};

// =============================================================================
// Results
// =============================================================================

/// Successful results of one session, in channel order.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionResults<R> {
    /// Session the entries came from.
    pub session: SessionId,
    /// Per-channel values.
    pub entries: Vec<(ChannelAddress, R)>,
}

/// Per-channel results of one executor call, grouped by session in executor order.
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelResults<R> {
    sessions: Vec<SessionResults<R>>,
}

impl<R> ChannelResults<R> {
    /// Wrap per-session results that are already in executor order.
    pub fn from_sessions(sessions: Vec<SessionResults<R>>) -> Self {
        Self { sessions }
    }

    /// Results grouped by session.
    pub fn sessions(&self) -> &[SessionResults<R>] {
        &self.sessions
    }

    /// Number of channel entries.
    pub fn len(&self) -> usize {
        self.sessions.iter().map(|s| s.entries.len()).sum()
    }

    /// True when no channel produced a value.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flattened `(address, value)` pairs in executor order.
    pub fn iter(&self) -> impl Iterator<Item = (&ChannelAddress, &R)> {
        self.sessions
            .iter()
            .flat_map(|s| s.entries.iter().map(|(address, value)| (address, value)))
    }

    /// Value for one address.
    pub fn get(&self, address: &ChannelAddress) -> Option<&R> {
        self.iter().find(|(a, _)| *a == address).map(|(_, v)| v)
    }

    /// Same addresses, every value transformed.
    pub fn map<U>(&self, f: impl Fn(&R) -> U) -> ChannelResults<U> {
        ChannelResults {
            sessions: self
                .sessions
                .iter()
                .map(|s| SessionResults {
                    session: s.session.clone(),
                    entries: s.entries.iter().map(|(a, v)| (a.clone(), f(v))).collect(),
                })
                .collect(),
        }
    }
}

// =============================================================================
// Executor
// =============================================================================

/// Owns the worker pool every fan-out runs on.
pub struct ParallelExecutor {
    pool: ThreadPool,
    workers: usize,
}

impl std::fmt::Debug for ParallelExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelExecutor")
            .field("workers", &self.workers)
            .finish()
    }
}

impl ParallelExecutor {
    /// Create an executor with `worker_threads` workers (`0` = available parallelism).
    pub fn new(worker_threads: usize) -> AppResult<Self> {
        let workers = if worker_threads == 0 {
            std::thread::available_parallelism().map_or(1, |n| n.get())
        } else {
            worker_threads
        };
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|index| format!("ate-worker-{index}"))
            .build()
            .map_err(|e| AteError::Configuration(format!("Failed to build worker pool: {e}")))?;
        Ok(Self { pool, workers })
    }

    /// Number of pool threads.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run `action` once per session of `bundle`.
    ///
    /// Returns one result per session in bundle order.
    pub fn run_per_session<R, F>(
        &self,
        bundle: &Bundle,
        operation: &str,
        action: F,
    ) -> Result<Vec<R>, AggregateExecutionError>
    where
        R: Send,
        F: Fn(&SessionHandle) -> anyhow::Result<R> + Sync,
    {
        let span = info_span!(
            "executor",
            operation,
            sessions = bundle.sessions().len(),
            channels = bundle.len()
        );
        let _guard = span.enter();

        let outcomes: Vec<anyhow::Result<R>> = self.pool.install(|| {
            bundle
                .sessions()
                .par_iter()
                .map(|session| guarded(|| action(session)))
                .collect()
        });

        let mut results = Vec::with_capacity(outcomes.len());
        let mut failures = Vec::new();
        for (session, outcome) in bundle.sessions().iter().zip(outcomes) {
            match outcome {
                Ok(value) => results.push(value),
                Err(error) => {
                    warn!(
                        operation,
                        session = %session.id,
                        channels = %session.channel_list(),
                        error = %format!("{error:#}"),
                        "Session action failed"
                    );
                    failures.push(ChannelFailure {
                        session: session.id.clone(),
                        channels: session.channels.clone(),
                        error,
                    });
                }
            }
        }
        finish(operation, results, failures)
    }

    /// Run `action` once per channel address of `bundle`.
    pub fn run_per_channel<R, F>(
        &self,
        bundle: &Bundle,
        operation: &str,
        action: F,
    ) -> Result<ChannelResults<R>, AggregateExecutionError>
    where
        R: Send,
        F: Fn(&SessionHandle, &ChannelAddress) -> anyhow::Result<R> + Sync,
    {
        let span = info_span!(
            "executor",
            operation,
            sessions = bundle.sessions().len(),
            channels = bundle.len()
        );
        let _guard = span.enter();

        let outcomes: Vec<Vec<anyhow::Result<R>>> = self.pool.install(|| {
            bundle
                .sessions()
                .par_iter()
                .map(|session| {
                    session
                        .channels
                        .par_iter()
                        .map(|address| guarded(|| action(session, address)))
                        .collect()
                })
                .collect()
        });

        let mut sessions = Vec::with_capacity(outcomes.len());
        let mut failures = Vec::new();
        for (session, channel_outcomes) in bundle.sessions().iter().zip(outcomes) {
            let mut entries = Vec::with_capacity(channel_outcomes.len());
            for (address, outcome) in session.channels.iter().zip(channel_outcomes) {
                match outcome {
                    Ok(value) => entries.push((address.clone(), value)),
                    Err(error) => {
                        warn!(
                            operation,
                            channel = %address,
                            error = %format!("{error:#}"),
                            "Channel action failed"
                        );
                        failures.push(ChannelFailure {
                            session: session.id.clone(),
                            channels: vec![address.clone()],
                            error,
                        });
                    }
                }
            }
            sessions.push(SessionResults {
                session: session.id.clone(),
                entries,
            });
        }
        finish(operation, ChannelResults { sessions }, failures)
    }

    /// Run `action` once per channel with the value `table` holds for that channel.
    ///
    /// Table coverage is checked for every address before anything is dispatched, so a
    /// configuration gap never leaves half the channels reconfigured.
    pub fn run_per_channel_with<T, R, F>(
        &self,
        bundle: &Bundle,
        operation: &str,
        table: &PinSiteTable<T>,
        action: F,
    ) -> AppResult<ChannelResults<R>>
    where
        T: Sync,
        R: Send,
        F: Fn(&SessionHandle, &ChannelAddress, &T) -> anyhow::Result<R> + Sync,
    {
        broadcast::validate_coverage(table, bundle.channels())?;
        debug!(operation, shape = ?table.shape(), "Table covers every channel");
        let results = self.run_per_channel(bundle, operation, |session, address| {
            let value = broadcast::select(table, address)?;
            action(session, address, value)
        })?;
        Ok(results)
    }
}

fn finish<T>(
    operation: &str,
    results: T,
    failures: Vec<ChannelFailure>,
) -> Result<T, AggregateExecutionError> {
    if failures.is_empty() {
        debug!(operation, "Fan-out completed");
        Ok(results)
    } else {
        Err(AggregateExecutionError::new(operation, failures))
    }
}

/// Run one unit, turning a panic into an ordinary failure.
fn guarded<R>(unit: impl FnOnce() -> anyhow::Result<R>) -> anyhow::Result<R> {
    catch_unwind(AssertUnwindSafe(unit)).unwrap_or_else(|payload| {
        Err(anyhow!(
            "Driver action panicked: {}",
            panic_message(&*payload)
        ))
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::DriverSession;
    use crate::mock::MockSmuSession;
    use crate::pin_map::PinMap;
    use crate::registry::SessionRegistry;
    use std::sync::Arc;

    fn bundle() -> Bundle {
        let pin_map = PinMap::builder()
            .association("VDD", 0, "SMU_A", "SMU_A/0", "NI PXIe-4137")
            .association("VDD", 1, "SMU_A", "SMU_A/1", "NI PXIe-4137")
            .association("VDD", 2, "SMU_B", "SMU_B/0", "NI PXIe-4137")
            .build();
        let sessions: Vec<Arc<dyn DriverSession>> = vec![
            Arc::new(MockSmuSession::new("SMU_A", "NI PXIe-4137", 2)),
            Arc::new(MockSmuSession::new("SMU_B", "NI PXIe-4137", 2)),
        ];
        SessionRegistry::from_pin_map(&pin_map, &[0, 1, 2], sessions)
            .unwrap()
            .resolve(&["VDD"], None)
            .unwrap()
    }

    #[test]
    fn per_channel_returns_one_result_per_address() {
        let executor = ParallelExecutor::new(4).unwrap();
        let results = executor
            .run_per_channel(&bundle(), "site", |_, address| Ok(address.site))
            .unwrap();
        let sites: Vec<_> = results.iter().map(|(_, site)| *site).collect();
        assert_eq!(sites, vec![0, 1, 2]);
        assert_eq!(results.sessions().len(), 2);
    }

    #[test]
    fn per_session_failure_covers_every_session_channel() {
        let executor = ParallelExecutor::new(2).unwrap();
        let err = executor
            .run_per_session(&bundle(), "abort", |session| {
                if session.id.as_str() == "SMU_A" {
                    anyhow::bail!("driver fault")
                }
                Ok(())
            })
            .unwrap_err();
        assert_eq!(err.len(), 1);
        assert_eq!(err.failed_channels().len(), 2);
    }

    #[test]
    fn panics_become_failures() {
        let executor = ParallelExecutor::new(2).unwrap();
        let err = executor
            .run_per_channel(&bundle(), "explode", |_, address| {
                if address.site == 1 {
                    panic!("boom");
                }
                Ok(())
            })
            .unwrap_err();
        assert_eq!(err.len(), 1);
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn table_gaps_are_rejected_before_dispatch() {
        let executor = ParallelExecutor::new(1).unwrap();
        let table = PinSiteTable::per_site([(0, 1.0), (1, 1.0)]);
        let calls = std::sync::atomic::AtomicUsize::new(0);
        let err = executor
            .run_per_channel_with(&bundle(), "force", &table, |_, _, _| {
                calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, AteError::Addressing(_)));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }
}
