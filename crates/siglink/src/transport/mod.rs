// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 siglink.dev

//! Discovery transport: endpoint catalog and UDP socket construction.
//!
//! # Modules
//!
//! - `multicast` - burst socket setup (group joins, TTL, broadcast)
//!
//! The endpoint catalog is derived once, at resolver construction, from the
//! configuration store: a multicast endpoint list (every configured group
//! address paired with the multicast port) and a unicast endpoint list
//! (every resolved address of every known peer, crossed with every port in
//! the stream service port range).

/// Burst socket construction: group joins, TTL, broadcast permission.
pub mod multicast;

use crate::config::ApiConfig;
use crate::{Error, Result};
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::sync::Arc;

/// IP protocol family a resolve attempt operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolFamily {
    /// IPv4
    V4,
    /// IPv6
    V6,
}

impl ProtocolFamily {
    /// Whether `addr` belongs to this family.
    pub fn matches(self, addr: &IpAddr) -> bool {
        match self {
            ProtocolFamily::V4 => addr.is_ipv4(),
            ProtocolFamily::V6 => addr.is_ipv6(),
        }
    }
}

impl std::fmt::Display for ProtocolFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolFamily::V4 => write!(f, "IPv4"),
            ProtocolFamily::V6 => write!(f, "IPv6"),
        }
    }
}

/// The two endpoint lists a resolver queries, immutable after construction.
#[derive(Debug, Clone)]
pub struct EndpointCatalog {
    mcast_endpoints: Arc<Vec<SocketAddr>>,
    ucast_endpoints: Arc<Vec<SocketAddr>>,
    families: Vec<ProtocolFamily>,
}

impl EndpointCatalog {
    /// Derive the endpoint lists and protocol families from the config.
    ///
    /// Known peers that fail to resolve are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if no IP family is enabled or no usable
    /// multicast endpoint remains for the configured scope and families.
    pub fn from_config(cfg: &ApiConfig) -> Result<Self> {
        let mcast_port = cfg.multicast_port();
        let mcast_endpoints: Vec<SocketAddr> = cfg
            .multicast_addresses()
            .iter()
            .map(|addr| SocketAddr::new(*addr, mcast_port))
            .collect();

        let mut ucast_endpoints = Vec::new();
        for peer in cfg.known_peers() {
            match (peer.as_str(), cfg.base_port()).to_socket_addrs() {
                Ok(resolved) => {
                    let mut addrs: Vec<IpAddr> = Vec::new();
                    for sockaddr in resolved {
                        if !addrs.contains(&sockaddr.ip()) {
                            addrs.push(sockaddr.ip());
                        }
                    }
                    let base = u32::from(cfg.base_port());
                    let end = (base + u32::from(cfg.port_range())).min(65536);
                    for addr in addrs {
                        for port in base..end {
                            ucast_endpoints.push(SocketAddr::new(addr, port as u16));
                        }
                    }
                }
                Err(err) => {
                    log::warn!("[transport] could not resolve known peer '{peer}': {err}");
                }
            }
        }

        let mut families = Vec::new();
        if cfg.allow_ipv6() {
            families.push(ProtocolFamily::V6);
        }
        if cfg.allow_ipv4() {
            families.push(ProtocolFamily::V4);
        }
        if families.is_empty() {
            return Err(Error::Config("no IP protocol family is enabled".into()));
        }
        if mcast_endpoints.is_empty() {
            return Err(Error::Config(
                "no usable multicast address for the configured resolve scope".into(),
            ));
        }

        Ok(EndpointCatalog {
            mcast_endpoints: Arc::new(mcast_endpoints),
            ucast_endpoints: Arc::new(ucast_endpoints),
            families,
        })
    }

    /// Multicast endpoints (group address x multicast port).
    pub fn mcast_endpoints(&self) -> &Arc<Vec<SocketAddr>> {
        &self.mcast_endpoints
    }

    /// Unicast endpoints (known peer address x service port range).
    pub fn ucast_endpoints(&self) -> &Arc<Vec<SocketAddr>> {
        &self.ucast_endpoints
    }

    /// Protocol families enabled for discovery.
    pub fn families(&self) -> &[ProtocolFamily] {
        &self.families
    }
}
