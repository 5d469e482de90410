// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 siglink.dev

//! Shared fixtures for the resolver integration tests: a loopback outlet
//! stub that answers discovery queries the way a real outlet would, and a
//! once-per-binary configuration initialiser.
//!
//! Each integration-test binary owns the process-wide configuration store,
//! so every binary picks its own session ID, base port, and (short) RTT
//! tuning. Stubs bind a free port inside the configured service port range
//! and reply only to queries containing their marker predicate, which keeps
//! concurrently running tests inside one binary from answering each other.

#![allow(dead_code)] // each test binary uses a different subset of this module

use parking_lot::Mutex;
use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Install the test configuration and logger, once per test binary.
pub fn init_config(content: &str) {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
        siglink::set_config_content(content)
            .expect("test configuration must be set before first access");
    });
}

/// A loopback outlet: listens on one port of the service port range and
/// answers matching discovery queries with a canned shortinfo + metadata
/// reply.
pub struct OutletStub {
    port: u16,
    shutdown: Arc<AtomicBool>,
    silenced: Arc<AtomicBool>,
    replies_sent: Arc<AtomicUsize>,
    last_query: Arc<Mutex<String>>,
    query_times: Arc<Mutex<Vec<Instant>>>,
    handle: Option<JoinHandle<()>>,
}

impl OutletStub {
    /// Spawn a stub replying once per matching query.
    pub fn spawn(marker: &str, shortinfo: &str, xml: &str, base_port: u16, port_range: u16) -> Self {
        Self::spawn_with_replies(marker, shortinfo, xml, base_port, port_range, 1)
    }

    /// Spawn a stub replying `replies_per_query` times per matching query
    /// (to exercise duplicate collapsing).
    pub fn spawn_with_replies(
        marker: &str,
        shortinfo: &str,
        xml: &str,
        base_port: u16,
        port_range: u16,
        replies_per_query: usize,
    ) -> Self {
        let socket = bind_in_range(base_port, port_range);
        let port = socket
            .local_addr()
            .expect("stub socket has a local address")
            .port();
        socket
            .set_read_timeout(Some(Duration::from_millis(50)))
            .expect("read timeout");

        let shutdown = Arc::new(AtomicBool::new(false));
        let silenced = Arc::new(AtomicBool::new(false));
        let replies_sent = Arc::new(AtomicUsize::new(0));
        let last_query = Arc::new(Mutex::new(String::new()));
        let query_times = Arc::new(Mutex::new(Vec::new()));

        let marker = marker.to_string();
        let reply = format!("{shortinfo}\n{xml}");
        let thread_shutdown = Arc::clone(&shutdown);
        let thread_silenced = Arc::clone(&silenced);
        let thread_replies = Arc::clone(&replies_sent);
        let thread_last_query = Arc::clone(&last_query);
        let thread_query_times = Arc::clone(&query_times);

        let handle = std::thread::spawn(move || {
            let mut buf = [0u8; 2048];
            while !thread_shutdown.load(Ordering::Relaxed) {
                let (len, src) = match socket.recv_from(&mut buf) {
                    Ok(received) => received,
                    Err(_) => continue,
                };
                let Ok(text) = std::str::from_utf8(&buf[..len]) else {
                    continue;
                };
                let Some((port_line, query)) = text.split_once('\n') else {
                    continue;
                };
                let Ok(return_port) = port_line.trim().parse::<u16>() else {
                    continue;
                };
                let query = query.trim();
                if !query.contains(&marker) {
                    continue;
                }
                *thread_last_query.lock() = query.to_string();
                thread_query_times.lock().push(Instant::now());
                if thread_silenced.load(Ordering::Relaxed) {
                    continue;
                }
                let target = (src.ip(), return_port);
                for _ in 0..replies_per_query {
                    if socket.send_to(reply.as_bytes(), target).is_ok() {
                        thread_replies.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        });

        OutletStub {
            port,
            shutdown,
            silenced,
            replies_sent,
            last_query,
            query_times,
            handle: Some(handle),
        }
    }

    /// The service port this stub is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Stop answering queries while staying bound (simulates an outlet that
    /// went away without the port being reused).
    pub fn silence(&self) {
        self.silenced.store(true, Ordering::Relaxed);
    }

    /// Number of reply datagrams sent so far.
    pub fn replies_sent(&self) -> usize {
        self.replies_sent.load(Ordering::Relaxed)
    }

    /// The most recent matching query, verbatim.
    pub fn last_query(&self) -> String {
        self.last_query.lock().clone()
    }

    /// Arrival times of matching queries, for wave-cadence assertions.
    pub fn query_times(&self) -> Vec<Instant> {
        self.query_times.lock().clone()
    }
}

impl Drop for OutletStub {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Bind the first free port in `[base_port, base_port + port_range)`, the
/// way outlets allocate their service ports.
fn bind_in_range(base_port: u16, port_range: u16) -> UdpSocket {
    for port in base_port..base_port + port_range {
        if let Ok(socket) = UdpSocket::bind(("127.0.0.1", port)) {
            return socket;
        }
    }
    panic!("no free port in {base_port}..{}", base_port + port_range);
}
