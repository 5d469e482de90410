// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 siglink.dev

//! A single resolve attempt: one UDP burst on one protocol family.
//!
//! An attempt sends the query datagram to every same-family endpoint of its
//! list and then collects replies on the same socket until its deadline
//! passes or the owning resolver signals teardown. Replies are fed straight
//! into the shared result map; duplicates collapse there. Attempts never
//! fail the resolver: everything that goes wrong mid-burst is logged and
//! absorbed.

use crate::config::ApiConfig;
use crate::resolver::results::StreamInfo;
use crate::resolver::ResolverCore;
use crate::transport::{multicast, ProtocolFamily};
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Upper bound on one reply datagram (kernel-reassembled UDP).
const MAX_REPLY_SIZE: usize = 65536;

/// Receive slice; the cancellation flag is observed at this granularity.
const RECV_SLICE: Duration = Duration::from_millis(50);

/// One short-lived burst of UDP queries with its reply collection thread.
pub(crate) struct ResolveAttempt;

impl ResolveAttempt {
    /// Open the burst socket and start the attempt thread.
    ///
    /// The socket is created on the caller's thread so that a family that
    /// cannot start at all is reported to the wave scheduler; everything
    /// after that runs on the attempt thread. The attempt holds only a weak
    /// reference to the resolver core and winds down as soon as the core is
    /// gone or its `expired` flag is set.
    pub(crate) fn begin(
        cfg: &'static ApiConfig,
        core: Weak<ResolverCore>,
        family: ProtocolFamily,
        endpoints: Arc<Vec<SocketAddr>>,
        query: String,
        max_rtt: f64,
        is_multicast: bool,
    ) -> io::Result<JoinHandle<()>> {
        let groups = is_multicast.then(|| endpoints.as_slice());
        let socket = multicast::open_burst_socket(family, cfg, groups)?;
        socket.set_read_timeout(Some(RECV_SLICE))?;
        std::thread::Builder::new()
            .name("siglink-resolve".into())
            .spawn(move || attempt_loop(core, socket, family, &endpoints, &query, max_rtt))
    }
}

fn attempt_loop(
    core: Weak<ResolverCore>,
    socket: UdpSocket,
    family: ProtocolFamily,
    endpoints: &[SocketAddr],
    query: &str,
    max_rtt: f64,
) {
    let return_port = match socket.local_addr() {
        Ok(addr) => addr.port(),
        Err(err) => {
            log::warn!("[resolver] {family} attempt has no local address: {err}");
            return;
        }
    };
    let datagram = build_datagram(return_port, query);

    let mut targets = 0usize;
    let mut sent = 0usize;
    for endpoint in endpoints.iter().filter(|ep| family.matches(&ep.ip())) {
        targets += 1;
        match socket.send_to(datagram.as_bytes(), endpoint) {
            Ok(_) => sent += 1,
            Err(err) => {
                log::debug!("[resolver] query to {endpoint} failed: {err}");
            }
        }
    }
    if targets == 0 {
        return;
    }
    if sent == 0 {
        log::warn!("[resolver] {family} burst reached none of its {targets} endpoints");
        return;
    }
    log::debug!(
        "[resolver] {family} burst sent to {sent}/{targets} endpoints, listening on port {return_port}"
    );

    let deadline = Instant::now() + Duration::from_secs_f64(max_rtt.max(0.0));
    let mut buf = [0u8; MAX_REPLY_SIZE];
    while Instant::now() < deadline {
        match core.upgrade() {
            Some(core) if !core.expired() => {}
            _ => return,
        }
        match socket.recv_from(&mut buf) {
            Ok((len, src)) => {
                let Some((shortinfo, body)) = parse_reply(&buf[..len]) else {
                    log::debug!("[resolver] discarding malformed reply from {src}");
                    continue;
                };
                if let Some(core) = core.upgrade() {
                    core.results().upsert(StreamInfo::from_reply(shortinfo, body));
                } else {
                    return;
                }
            }
            Err(err)
                if err.kind() == io::ErrorKind::WouldBlock
                    || err.kind() == io::ErrorKind::TimedOut => {}
            Err(err) => {
                log::warn!("[resolver] {family} attempt receive error: {err}");
                return;
            }
        }
    }
}

/// Frame the query datagram: the return port the outlet should reply to,
/// then the predicate, each newline-terminated.
fn build_datagram(return_port: u16, query: &str) -> String {
    format!("{return_port}\n{query}\n")
}

/// Split a reply into its shortinfo identity line and the metadata body.
fn parse_reply(bytes: &[u8]) -> Option<(&str, &str)> {
    let text = std::str::from_utf8(bytes).ok()?;
    let (header, body) = match text.split_once('\n') {
        Some((header, body)) => (header.trim(), body.trim()),
        None => (text.trim(), ""),
    };
    if header.is_empty() {
        return None;
    }
    Some((header, body))
}
