// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 siglink.dev

//! Wave scheduler: the loop that re-issues query bursts until done.
//!
//! Every wave starts with a multicast burst on each enabled protocol family.
//! When known peers are configured, a unicast burst follows after the
//! multicast minimum RTT so that the two reply streams do not collide. The
//! next wave is spaced by the configured RTT windows, plus the continuous
//! resolve interval outside of fast mode. The loop stops when the resolver
//! is cancelled, the global deadline fires, or enough results have arrived
//! and the minimum waiting time has elapsed; it then drains every attempt
//! it launched.

use crate::resolver::attempt::ResolveAttempt;
use crate::resolver::results::steady_clock;
use crate::resolver::ResolverCore;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Granularity at which waits observe cancellation and the global deadline.
const SLEEP_SLICE: Duration = Duration::from_millis(20);

/// Per-run parameters of the scheduler, fixed before the loop starts.
#[derive(Debug, Clone)]
pub(crate) struct WavePlan {
    /// The discovery predicate sent with every burst.
    pub query: String,
    /// Result count that satisfies the stop condition; 0 disables it.
    pub minimum: usize,
    /// Monotonic time before which the stop condition is not taken.
    pub wait_until: f64,
    /// Waves back-to-back (oneshot) instead of spaced by the continuous
    /// resolve interval.
    pub fast_mode: bool,
}

/// Drive query waves until a stop condition is met, then drain.
///
/// Runs on the caller's thread for oneshot resolves and on the resolver's
/// background worker for continuous resolves. `deadline` is the oneshot
/// global timeout; `None` means no deadline.
pub(crate) fn run_waves(core: &Arc<ResolverCore>, plan: &WavePlan, deadline: Option<Instant>) {
    let cfg = core.cfg();
    loop {
        core.reap_attempts();

        let num_results = core.results().len();
        if core.cancelled()
            || core.expired()
            || (plan.minimum > 0
                && num_results >= plan.minimum
                && steady_clock() >= plan.wait_until)
        {
            break;
        }

        launch_burst(
            core,
            plan,
            core.catalog().mcast_endpoints(),
            cfg.multicast_max_rtt(),
            true,
        );

        let mut delay = if plan.fast_mode {
            cfg.multicast_min_rtt()
        } else {
            cfg.continuous_resolve_interval() + cfg.multicast_min_rtt()
        };

        if !core.catalog().ucast_endpoints().is_empty() {
            // let the unicast replies trail the multicast ones
            if !interruptible_wait(core, cfg.multicast_min_rtt(), deadline) {
                break;
            }
            launch_burst(
                core,
                plan,
                core.catalog().ucast_endpoints(),
                cfg.unicast_max_rtt(),
                false,
            );
            delay += cfg.unicast_min_rtt() - cfg.multicast_min_rtt();
        }

        if !interruptible_wait(core, delay, deadline) {
            break;
        }
    }

    // Whatever ended the loop, make sure in-flight attempts wind down, then
    // await them. Oneshot drains on the caller's thread, continuous on the
    // background worker, so nothing outlives the resolver.
    core.cancel_ongoing();
    core.drain_attempts();
}

/// Start one attempt per enabled protocol family over `endpoints`.
///
/// A family that cannot start is absorbed; only a wave on which every
/// family failed is reported (multicast at ERROR, unicast at WARN, as a
/// unicast-less network is still functional).
fn launch_burst(
    core: &Arc<ResolverCore>,
    plan: &WavePlan,
    endpoints: &Arc<Vec<SocketAddr>>,
    max_rtt: f64,
    is_multicast: bool,
) {
    let families = core.catalog().families();
    let mut failures = 0usize;
    let mut last_error = None;
    for family in families {
        match ResolveAttempt::begin(
            core.cfg(),
            Arc::downgrade(core),
            *family,
            Arc::clone(endpoints),
            plan.query.clone(),
            max_rtt,
            is_multicast,
        ) {
            Ok(handle) => core.register_attempt(handle),
            Err(err) => {
                failures += 1;
                last_error = Some(err);
            }
        }
    }
    if failures == families.len() {
        let err = last_error.map(|e| e.to_string()).unwrap_or_default();
        if is_multicast {
            log::error!(
                "[resolver] could not start a multicast resolve attempt for any of the allowed protocol stacks: {err}"
            );
        } else {
            log::warn!(
                "[resolver] could not start a unicast resolve attempt for any of the allowed protocol stacks: {err}"
            );
        }
    }
}

/// Wait for `seconds`, observing cancellation and the global deadline at
/// slice granularity. Returns false when the wait was cut short.
fn interruptible_wait(core: &ResolverCore, seconds: f64, deadline: Option<Instant>) -> bool {
    let until = Instant::now() + Duration::from_secs_f64(seconds.max(0.0));
    loop {
        if core.cancelled() || core.expired() {
            return false;
        }
        let now = Instant::now();
        if let Some(deadline) = deadline {
            if now >= deadline {
                return false;
            }
        }
        if now >= until {
            return true;
        }
        std::thread::sleep(SLEEP_SLICE.min(until - now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiConfig;

    // Machine scope with an explicit IPv4 group keeps test traffic on-host
    // (TTL 0) while still giving the catalog a usable multicast endpoint.
    fn test_core() -> Arc<ResolverCore> {
        let cfg = ApiConfig::from_content(
            "[ports]\nIPv6 = disable\nMulticastPort = 16999\n\
             [multicast]\nResolveScope = machine\nMachineAddresses = {239.255.172.215}\n\
             [tuning]\nMulticastMinRTT = 0.05\nMulticastMaxRTT = 0.2\n\
             ContinuousResolveInterval = 0.05\n",
        )
        .expect("test config");
        let cfg: &'static ApiConfig = Box::leak(Box::new(cfg));
        ResolverCore::new(cfg).expect("core")
    }

    #[test]
    fn wait_completes_when_undisturbed() {
        let core = test_core();
        assert!(interruptible_wait(&core, 0.05, None));
    }

    #[test]
    fn wait_is_cut_short_by_cancel() {
        let core = test_core();
        let canceller = Arc::clone(&core);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            canceller.cancel();
        });
        let start = Instant::now();
        assert!(!interruptible_wait(&core, 5.0, None));
        assert!(start.elapsed() < Duration::from_millis(300));
        handle.join().expect("canceller thread");
    }

    #[test]
    fn wait_observes_the_deadline() {
        let core = test_core();
        let start = Instant::now();
        assert!(!interruptible_wait(
            &core,
            5.0,
            Some(Instant::now() + Duration::from_millis(50))
        ));
        assert!(start.elapsed() < Duration::from_millis(300));
    }

    #[test]
    fn satisfied_stop_condition_ends_the_loop_without_a_burst() {
        let core = test_core();
        core.results().upsert(crate::resolver::results::StreamInfo::from_reply(
            "pre@host",
            "<info><uid>pre</uid></info>",
        ));
        let plan = WavePlan {
            query: "session_id='default'".into(),
            minimum: 1,
            wait_until: 0.0,
            fast_mode: true,
        };
        let start = Instant::now();
        run_waves(&core, &plan, None);
        assert!(start.elapsed() < Duration::from_millis(200));
        assert!(core.expired());
    }

    #[test]
    fn deadline_stops_an_unsatisfiable_resolve() {
        let core = test_core();
        let plan = WavePlan {
            query: "session_id='default'".into(),
            minimum: 1000,
            wait_until: 0.0,
            fast_mode: true,
        };
        let start = Instant::now();
        run_waves(&core, &plan, Some(Instant::now() + Duration::from_millis(100)));
        // deadline + attempt teardown slices
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(core.expired());
    }
}
