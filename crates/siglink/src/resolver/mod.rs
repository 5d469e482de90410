// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 siglink.dev

//! Stream-discovery resolver.
//!
//! A [`Resolver`] finds the outlets on the network whose metadata matches an
//! XPath predicate. It operates in one of two modes:
//!
//! - **oneshot** ([`Resolver::resolve_oneshot`]) blocks the calling thread,
//!   issuing query waves back-to-back until enough streams have answered or
//!   a timeout fires, and returns the collected results.
//! - **continuous** ([`Resolver::resolve_continuous`]) spawns one background
//!   worker that keeps the result map fresh until the resolver is dropped;
//!   [`Resolver::results`] takes expiry-filtered snapshots at any time.
//!
//! ```no_run
//! use siglink::Resolver;
//!
//! fn main() -> siglink::Result<()> {
//!     let resolver = Resolver::new()?;
//!     let streams = resolver.resolve_oneshot("type='EEG'", 1, 5.0, 0.0)?;
//!     for stream in &streams {
//!         println!("found {} on {}", stream.name(), stream.hostname());
//!     }
//!     Ok(())
//! }
//! ```

mod attempt;
/// Result map and discovered-stream metadata.
pub mod results;
mod wave;

use crate::config::ApiConfig;
use crate::query;
use crate::transport::EndpointCatalog;
use crate::{Error, Result, FOREVER};
use parking_lot::Mutex;
use results::{steady_clock, ResultMap, StreamInfo};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use wave::WavePlan;

/// Shared state between the façade, the wave scheduler, and the attempts.
///
/// Attempts hold a `Weak` reference to this; the resolver's drain protocol
/// guarantees every attempt is joined before the state is torn down.
pub(crate) struct ResolverCore {
    cfg: &'static ApiConfig,
    catalog: EndpointCatalog,
    results: ResultMap,
    cancelled: AtomicBool,
    expired: AtomicBool,
    forget_after: Mutex<f64>,
    attempts: Mutex<Vec<JoinHandle<()>>>,
}

impl ResolverCore {
    pub(crate) fn new(cfg: &'static ApiConfig) -> Result<Arc<Self>> {
        let catalog = EndpointCatalog::from_config(cfg)?;
        Ok(Arc::new(ResolverCore {
            cfg,
            catalog,
            results: ResultMap::new(),
            cancelled: AtomicBool::new(false),
            expired: AtomicBool::new(false),
            forget_after: Mutex::new(FOREVER),
            attempts: Mutex::new(Vec::new()),
        }))
    }

    pub(crate) fn cfg(&self) -> &'static ApiConfig {
        self.cfg
    }

    pub(crate) fn catalog(&self) -> &EndpointCatalog {
        &self.catalog
    }

    pub(crate) fn results(&self) -> &ResultMap {
        &self.results
    }

    pub(crate) fn cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub(crate) fn expired(&self) -> bool {
        self.expired.load(Ordering::Acquire)
    }

    /// Reset the per-run flags and result state before a new wave loop.
    fn reset_for_run(&self, forget_after: f64) {
        self.results.clear();
        *self.forget_after.lock() = forget_after;
        self.expired.store(false, Ordering::Release);
    }

    /// Make ongoing waves and attempts wind down; the scheduler loop and
    /// every attempt observe this flag within one wait slice.
    pub(crate) fn cancel_ongoing(&self) {
        self.expired.store(true, Ordering::Release);
    }

    /// Caller-requested teardown; idempotent and safe from any thread.
    pub(crate) fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.cancel_ongoing();
    }

    pub(crate) fn register_attempt(&self, handle: JoinHandle<()>) {
        self.attempts.lock().push(handle);
    }

    /// Join attempts that already finished, keeping the registry bounded.
    pub(crate) fn reap_attempts(&self) {
        let mut attempts = self.attempts.lock();
        let mut remaining = Vec::with_capacity(attempts.len());
        for handle in attempts.drain(..) {
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                remaining.push(handle);
            }
        }
        *attempts = remaining;
    }

    /// Await every outstanding attempt. Joining never panics the caller.
    pub(crate) fn drain_attempts(&self) {
        let drained: Vec<_> = std::mem::take(&mut *self.attempts.lock());
        for handle in drained {
            if handle.join().is_err() {
                log::warn!("[resolver] a resolve attempt panicked during teardown");
            }
        }
    }
}

/// Discovers streams matching a predicate via UDP multicast and unicast.
///
/// See the [module documentation](self) for the two operating modes. All
/// methods take `&self`; [`Resolver::cancel`] may be called from any thread
/// and returns immediately, while drop awaits full drain of outstanding
/// I/O.
pub struct Resolver {
    core: Arc<ResolverCore>,
    worker: Mutex<Option<JoinHandle<()>>>,
    resolving: AtomicBool,
}

impl Resolver {
    /// Construct a resolver from the process-wide configuration.
    ///
    /// # Errors
    ///
    /// [`Error::ConfigParse`] if the configuration document is malformed;
    /// [`Error::Config`] if no IP family is enabled or no multicast address
    /// is usable.
    pub fn new() -> Result<Self> {
        let cfg = ApiConfig::instance()?;
        Ok(Resolver {
            core: ResolverCore::new(cfg)?,
            worker: Mutex::new(None),
            resolving: AtomicBool::new(false),
        })
    }

    /// Resolve streams matching `query`, blocking the calling thread.
    ///
    /// Returns once at least `minimum` distinct streams have answered and
    /// `minimum_time` seconds have passed, or once `timeout` seconds have
    /// elapsed (pass [`FOREVER`] for no timeout), whichever comes first. A
    /// timeout is not an error: the partial result list is returned. A
    /// cancelled resolver returns an empty list.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidQuery`] if the predicate does not parse (checked
    /// before any datagram is sent); [`Error::Config`] if the resolver is
    /// already running.
    pub fn resolve_oneshot(
        &self,
        query: &str,
        minimum: usize,
        timeout: f64,
        minimum_time: f64,
    ) -> Result<Vec<StreamInfo>> {
        query::check_query(query)?;
        let _guard = self.begin_run()?;

        self.core.reset_for_run(FOREVER);
        let plan = WavePlan {
            query: query.to_string(),
            minimum,
            wait_until: steady_clock() + minimum_time,
            fast_mode: true,
        };
        let deadline = timeout
            .is_finite()
            .then(|| Instant::now() + Duration::from_secs_f64(timeout.max(0.0)));

        if self.core.cancelled() {
            return Ok(Vec::new());
        }
        wave::run_waves(&self.core, &plan, deadline);

        if self.core.cancelled() {
            Ok(Vec::new())
        } else {
            Ok(self.core.results.snapshot(usize::MAX, FOREVER))
        }
    }

    /// Start resolving streams matching `query` in the background.
    ///
    /// Returns immediately; [`Resolver::results`] serves snapshots from
    /// which streams unseen for `forget_after` seconds are evicted. The
    /// background worker stops when the resolver is cancelled or dropped.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidQuery`] if the predicate does not parse;
    /// [`Error::Config`] if the resolver is already running;
    /// [`Error::Io`] if the worker thread cannot be spawned.
    pub fn resolve_continuous(&self, query: &str, forget_after: f64) -> Result<()> {
        query::check_query(query)?;
        let guard = self.begin_run()?;

        self.core.reset_for_run(forget_after);
        let plan = WavePlan {
            query: query.to_string(),
            minimum: 0,
            wait_until: 0.0,
            fast_mode: false,
        };
        let core = Arc::clone(&self.core);
        let handle = std::thread::Builder::new()
            .name("siglink-resolver".into())
            .spawn(move || wave::run_waves(&core, &plan, None))
            .map_err(Error::Io)?;
        *self.worker.lock() = Some(handle);
        // the run guard stays held for the lifetime of the worker
        std::mem::forget(guard);
        Ok(())
    }

    /// Snapshot of the currently known streams, up to `max_results`.
    ///
    /// Streams whose last reply is older than the continuous `forget_after`
    /// window are evicted on the way out. Callable from any thread.
    pub fn results(&self, max_results: usize) -> Vec<StreamInfo> {
        let forget_after = *self.core.forget_after.lock();
        self.core.results.snapshot(max_results, forget_after)
    }

    /// Cancel any ongoing resolve. Idempotent, callable from any thread;
    /// returns immediately rather than after drain (drop awaits drain).
    pub fn cancel(&self) {
        self.core.cancel();
    }

    fn begin_run(&self) -> Result<RunGuard<'_>> {
        if self
            .resolving
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::Config("resolver is already running".into()));
        }
        Ok(RunGuard { flag: &self.resolving })
    }
}

impl Drop for Resolver {
    fn drop(&mut self) {
        self.core.cancel();
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                log::warn!("[resolver] background worker panicked during teardown");
            }
        }
        // the wave loop drains its attempts on exit; this catches a loop
        // that never ran
        self.core.drain_attempts();
    }
}

struct RunGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Construct a continuous resolver for `session_id='<sid>' [and
/// <predicate>='<value>']`, the standard way to keep a live view of the
/// streams of the current session.
///
/// # Errors
///
/// Propagates construction and query errors; see [`Resolver::new`] and
/// [`Resolver::resolve_continuous`].
pub fn create_resolver(
    forget_after: f64,
    pred_or_prop: Option<&str>,
    value: Option<&str>,
) -> Result<Resolver> {
    let query = query::build_query(pred_or_prop, value)?;
    let resolver = Resolver::new()?;
    resolver.resolve_continuous(&query, forget_after)?;
    Ok(resolver)
}
