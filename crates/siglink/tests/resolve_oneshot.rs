// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 siglink.dev

//! End-to-end oneshot resolves against loopback outlet stubs.
//!
//! This binary owns the process-wide configuration: a private session ID,
//! a small service port range on loopback known peers, and short RTT
//! windows so waves cycle quickly. Every stub replies only to queries
//! containing its own predicate, so the tests can run concurrently.

mod common;

use common::OutletStub;
use siglink::{Error, Resolver};
use std::time::{Duration, Instant};

const BASE_PORT: u16 = 17600;
const PORT_RANGE: u16 = 8;

const CONFIG: &str = "\
[ports]
BasePort = 17600
PortRange = 8
MulticastPort = 17608
IPv6 = disable
[multicast]
ResolveScope = link
[lab]
SessionID = siglink-oneshot
KnownPeers = {127.0.0.1}
[tuning]
MulticastMinRTT = 0.1
MulticastMaxRTT = 0.4
UnicastMinRTT = 0.1
UnicastMaxRTT = 0.4
ContinuousResolveInterval = 0.2
";

fn eeg_xml(name: &str, uid: &str) -> String {
    format!(
        "<info><name>{name}</name><type>EEG</type><uid>{uid}</uid>\
         <hostname>testhost</hostname></info>"
    )
}

#[test]
fn single_outlet_discovery() {
    common::init_config(CONFIG);
    let _outlet = OutletStub::spawn(
        "name='X1'",
        "abc@testhost",
        &eeg_xml("X1", "abc"),
        BASE_PORT,
        PORT_RANGE,
    );

    let resolver = Resolver::new().expect("resolver");
    let start = Instant::now();
    let streams = resolver
        .resolve_oneshot("name='X1'", 1, 2.0, 0.0)
        .expect("oneshot resolve");

    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(streams.len(), 1);
    assert_eq!(streams[0].uid(), "abc");
    assert_eq!(streams[0].name(), "X1");
    assert_eq!(streams[0].identity(), "abc@testhost");
}

#[test]
fn duplicate_replies_collapse_to_one_entry() {
    common::init_config(CONFIG);
    let outlet = OutletStub::spawn_with_replies(
        "name='DupSrc'",
        "dup@testhost",
        &eeg_xml("DupSrc", "dup"),
        BASE_PORT,
        PORT_RANGE,
        3,
    );

    let resolver = Resolver::new().expect("resolver");
    let streams = resolver
        .resolve_oneshot("name='DupSrc'", 1, 2.0, 0.0)
        .expect("oneshot resolve");

    assert_eq!(streams.len(), 1);
    assert_eq!(streams[0].uid(), "dup");
    assert!(outlet.replies_sent() >= 3, "stub should have replied thrice");
}

#[test]
fn unmet_minimum_returns_partial_results_at_timeout() {
    common::init_config(CONFIG);
    let _a = OutletStub::spawn(
        "type='Audio3'",
        "au1@testhost",
        "<info><name>A1</name><type>Audio3</type><uid>au1</uid><hostname>testhost</hostname></info>",
        BASE_PORT,
        PORT_RANGE,
    );
    let _b = OutletStub::spawn(
        "type='Audio3'",
        "au2@testhost",
        "<info><name>A2</name><type>Audio3</type><uid>au2</uid><hostname>testhost</hostname></info>",
        BASE_PORT,
        PORT_RANGE,
    );

    let resolver = Resolver::new().expect("resolver");
    let start = Instant::now();
    let streams = resolver
        .resolve_oneshot("type='Audio3'", 5, 1.0, 0.0)
        .expect("oneshot resolve");
    let elapsed = start.elapsed();

    assert_eq!(streams.len(), 2, "both outlets, nothing more");
    assert!(elapsed >= Duration::from_millis(900), "timeout must be honoured");
    assert!(elapsed < Duration::from_secs(2));
}

#[test]
fn minimum_time_is_respected_even_with_early_replies() {
    common::init_config(CONFIG);
    let _outlet = OutletStub::spawn(
        "name='Patient'",
        "pat@testhost",
        &eeg_xml("Patient", "pat"),
        BASE_PORT,
        PORT_RANGE,
    );

    let resolver = Resolver::new().expect("resolver");
    let start = Instant::now();
    let streams = resolver
        .resolve_oneshot("name='Patient'", 1, 5.0, 0.8)
        .expect("oneshot resolve");

    assert_eq!(streams.len(), 1);
    assert!(start.elapsed() >= Duration::from_millis(750));
}

#[test]
fn invalid_query_fails_before_any_network_activity() {
    common::init_config(CONFIG);
    let outlet = OutletStub::spawn(
        "never-matched",
        "x@testhost",
        &eeg_xml("X", "x"),
        BASE_PORT,
        PORT_RANGE,
    );

    let resolver = Resolver::new().expect("resolver");
    let start = Instant::now();
    let result = resolver.resolve_oneshot("this is not xpath", 1, 2.0, 0.0);

    assert!(matches!(result, Err(Error::InvalidQuery(_))));
    assert!(start.elapsed() < Duration::from_millis(100), "fails up front");
    assert_eq!(outlet.replies_sent(), 0);
    assert_eq!(outlet.last_query(), "", "no datagram may have been sent");
}

#[test]
fn cancel_from_another_thread_returns_empty_quickly() {
    common::init_config(CONFIG);

    let resolver = Resolver::new().expect("resolver");
    std::thread::scope(|scope| {
        let resolver = &resolver;
        let worker = scope.spawn(move || {
            let start = Instant::now();
            let streams = resolver
                .resolve_oneshot("type='Nonexistent'", 100, 10.0, 0.0)
                .expect("cancelled resolve still returns");
            (streams, start.elapsed())
        });

        std::thread::sleep(Duration::from_millis(50));
        let cancelled_at = Instant::now();
        resolver.cancel();

        let (streams, total) = worker.join().expect("worker thread");
        assert!(streams.is_empty(), "cancellation returns an empty list");
        assert!(
            cancelled_at.elapsed() < Duration::from_millis(300),
            "cancel must unblock the resolve promptly"
        );
        assert!(total < Duration::from_millis(500));
    });

    // cancel is idempotent, and a cancelled resolver keeps returning empty
    resolver.cancel();
    resolver.cancel();
    let streams = resolver
        .resolve_oneshot("type='Nonexistent'", 1, 1.0, 0.0)
        .expect("resolve on a cancelled resolver");
    assert!(streams.is_empty());
}

#[test]
fn query_on_the_wire_is_sent_verbatim() {
    common::init_config(CONFIG);
    let outlet = OutletStub::spawn(
        "name='Verbatim'",
        "verb@testhost",
        &eeg_xml("Verbatim", "verb"),
        BASE_PORT,
        PORT_RANGE,
    );

    let resolver = Resolver::new().expect("resolver");
    let query = "session_id='siglink-oneshot' and name='Verbatim'";
    let streams = resolver
        .resolve_oneshot(query, 1, 2.0, 0.0)
        .expect("oneshot resolve");

    assert_eq!(streams.len(), 1);
    assert_eq!(outlet.last_query(), query);
    assert!(outlet.last_query().starts_with("session_id='"));
}
