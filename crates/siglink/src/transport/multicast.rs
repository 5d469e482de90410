// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 siglink.dev

//! Burst socket construction for resolve attempts.
//!
//! Each resolve attempt owns one UDP socket bound to an ephemeral port: the
//! queries go out through it and the outlets' replies come back to it, which
//! correlates queries with replies without any extra bookkeeping. For
//! multicast bursts the socket additionally joins the configured groups,
//! gets the scope-derived TTL, and broadcast permission when the IPv4
//! broadcast address is among the targets.

use crate::config::ApiConfig;
use crate::transport::ProtocolFamily;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};

/// Open the UDP socket for one resolve attempt.
///
/// The socket is bound to an ephemeral port on `ListenAddress` if that is
/// set and of the right family, otherwise on the unspecified address. Pass
/// the multicast endpoint list as `mcast_groups` to prepare the socket for
/// a multicast burst; `None` prepares a plain unicast burst socket.
pub(crate) fn open_burst_socket(
    family: ProtocolFamily,
    cfg: &ApiConfig,
    mcast_groups: Option<&[SocketAddr]>,
) -> io::Result<UdpSocket> {
    let domain = match family {
        ProtocolFamily::V4 => Domain::IPV4,
        ProtocolFamily::V6 => Domain::IPV6,
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    if family == ProtocolFamily::V6 {
        socket.set_only_v6(true)?;
    }

    let bind_addr = SocketAddr::new(bind_ip(family, cfg), 0);
    socket.bind(&bind_addr.into())?;

    if let Some(groups) = mcast_groups {
        configure_multicast(&socket, family, cfg, groups)?;
    }

    Ok(socket.into())
}

/// Interface to bind: `ListenAddress` when set and family-compatible,
/// otherwise the unspecified address of the family.
fn bind_ip(family: ProtocolFamily, cfg: &ApiConfig) -> IpAddr {
    let listen = cfg.listen_address();
    if !listen.is_empty() {
        match listen.parse::<IpAddr>() {
            Ok(addr) if family.matches(&addr) => return addr,
            Ok(_) => {}
            Err(err) => {
                log::warn!("[transport] invalid ListenAddress '{listen}': {err}");
            }
        }
    }
    match family {
        ProtocolFamily::V4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        ProtocolFamily::V6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    }
}

/// Join the groups of the socket's family and apply TTL/broadcast options.
///
/// Individual group joins are non-fatal: some interfaces reject some scopes,
/// and the burst still reaches the remaining groups.
fn configure_multicast(
    socket: &Socket,
    family: ProtocolFamily,
    cfg: &ApiConfig,
    groups: &[SocketAddr],
) -> io::Result<()> {
    match family {
        ProtocolFamily::V4 => {
            socket.set_multicast_ttl_v4(cfg.multicast_ttl())?;
            let iface = match bind_ip(family, cfg) {
                IpAddr::V4(addr) => addr,
                IpAddr::V6(_) => Ipv4Addr::UNSPECIFIED,
            };
            if !iface.is_unspecified() {
                socket.set_multicast_if_v4(&iface)?;
            }
            for group in groups {
                let IpAddr::V4(addr) = group.ip() else { continue };
                if addr == Ipv4Addr::BROADCAST {
                    socket.set_broadcast(true)?;
                } else if addr.is_multicast() {
                    if let Err(err) = socket.join_multicast_v4(&addr, &iface) {
                        log::debug!("[transport] join_multicast_v4({addr}) failed: {err}");
                    }
                }
            }
        }
        ProtocolFamily::V6 => {
            socket.set_multicast_hops_v6(cfg.multicast_ttl())?;
            for group in groups {
                let IpAddr::V6(addr) = group.ip() else { continue };
                if addr.is_multicast() {
                    if let Err(err) = socket.join_multicast_v6(&addr, 0) {
                        log::debug!("[transport] join_multicast_v6({addr}) failed: {err}");
                    }
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unicast_socket_binds_ephemeral() {
        let cfg = ApiConfig::from_content("").expect("cfg");
        let socket = open_burst_socket(ProtocolFamily::V4, &cfg, None).expect("socket");
        assert_ne!(socket.local_addr().expect("local addr").port(), 0);
    }

    #[test]
    fn multicast_socket_accepts_link_scope_groups() {
        let cfg = ApiConfig::from_content(
            "[ports]\nIPv6 = disable\n[multicast]\nResolveScope = link\n",
        )
        .expect("cfg");
        let groups: Vec<SocketAddr> = cfg
            .multicast_addresses()
            .iter()
            .map(|a| SocketAddr::new(*a, cfg.multicast_port()))
            .collect();
        let socket =
            open_burst_socket(ProtocolFamily::V4, &cfg, Some(&groups)).expect("socket");
        // broadcast permission was requested for 255.255.255.255
        assert!(socket.broadcast().expect("broadcast flag"));
    }

    #[test]
    fn listen_address_of_wrong_family_falls_back_to_unspecified() {
        let cfg = ApiConfig::from_content("[multicast]\nListenAddress = ::1\n").expect("cfg");
        assert_eq!(
            bind_ip(ProtocolFamily::V4, &cfg),
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        );
        assert_eq!(bind_ip(ProtocolFamily::V6, &cfg), "::1".parse::<IpAddr>().expect("addr"));
    }
}
