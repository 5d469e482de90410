// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 siglink.dev

//! Process-wide configuration store.
//!
//! All tunable settings of the library live here. The store is built once,
//! lazily, on the first call to [`ApiConfig::instance`] and is immutable
//! afterwards. Settings come from an INI-shaped document found through a
//! fixed precedence list:
//!
//! 1. Content set via [`set_config_content`] (before first access)
//! 2. File set via [`set_config_filename`] (before first access)
//! 3. `lsl_api.cfg` in the current working directory
//! 4. `lsl_api.cfg` in the user home (`~/lsl_api/`)
//! 5. `lsl_api.cfg` in the system configuration directory (`/etc/lsl_api/`)
//!
//! A missing file is not an error: defaults apply. Section and key names are
//! case-insensitive; unknown keys are ignored with a warning; a syntactically
//! malformed document or an unrecognised enumerated value fails construction
//! with [`Error::ConfigParse`](crate::Error::ConfigParse).
//!
//! For smooth operation all machines participating in a recording session
//! should use the same settings, in particular the same `SessionID` and port
//! configuration.

use crate::{Error, Result};
use parking_lot::Mutex;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Name of the configuration file searched in the standard locations.
pub const CONFIG_FILE_NAME: &str = "lsl_api.cfg";

// =======================================================================
// Defaults (ports and discovery behaviour)
// =======================================================================

/// Lowest port used to provide data streams and service information.
pub const DEFAULT_BASE_PORT: u16 = 16572;

/// Number of ports above the base port that may be allocated for streams.
pub const DEFAULT_PORT_RANGE: u16 = 32;

/// Port on which discovery datagrams are exchanged.
pub const DEFAULT_MULTICAST_PORT: u16 = 16571;

/// Session identifier isolating parallel recording sessions from each other.
pub const DEFAULT_SESSION_ID: &str = "default";

// Default multicast address groups, merged according to the resolve scope.
// The lists deliberately mix IPv4 and IPv6 entries so that discovery works
// on networks where one of the two stacks is disabled.
const MACHINE_ADDRESSES: &[&str] = &["FF31:113D:6FDD:2C17:A643:FFE2:1BD1:3CD2"];
const LINK_ADDRESSES: &[&str] = &[
    "255.255.255.255",
    "224.0.0.183",
    "FF02:113D:6FDD:2C17:A643:FFE2:1BD1:3CD2",
];
const SITE_ADDRESSES: &[&str] = &["239.255.172.215", "FF05:113D:6FDD:2C17:A643:FFE2:1BD1:3CD2"];
const ORGANIZATION_ADDRESSES: &[&str] =
    &["239.192.172.215", "FF08:113D:6FDD:2C17:A643:FFE2:1BD1:3CD2"];
const GLOBAL_ADDRESSES: &[&str] = &["FF0E:113D:6FDD:2C17:A643:FFE2:1BD1:3CD2"];

// =======================================================================
// Enumerated options
// =======================================================================

/// Administrative reach of multicast-based stream lookup.
///
/// Determines which multicast address groups are queried and the default
/// packet TTL. Scopes are cumulative: `site` also queries the `machine` and
/// `link` groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ResolveScope {
    /// Same host only (TTL 0).
    Machine,
    /// Same subnet, not forwarded by routers (TTL 1).
    Link,
    /// Same site, e.g. a department (TTL 24).
    Site,
    /// Same organization, e.g. a campus (TTL 32).
    Organization,
    /// Unrestricted scope (TTL 255).
    Global,
}

impl ResolveScope {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "machine" => Some(ResolveScope::Machine),
            "link" => Some(ResolveScope::Link),
            "site" => Some(ResolveScope::Site),
            "organization" => Some(ResolveScope::Organization),
            "global" => Some(ResolveScope::Global),
            _ => None,
        }
    }

    /// Default multicast TTL for this scope, used unless `TTLOverride` is set.
    pub fn default_ttl(self) -> u32 {
        match self {
            ResolveScope::Machine => 0,
            ResolveScope::Link => 1,
            ResolveScope::Site => 24,
            ResolveScope::Organization => 32,
            ResolveScope::Global => 255,
        }
    }
}

/// How the IPv4/IPv6 protocol stacks are handled (option `ports.IPv6`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ipv6Mode {
    Disable,
    Allow,
    Force,
}

impl Ipv6Mode {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "disable" => Some(Ipv6Mode::Disable),
            "allow" => Some(Ipv6Mode::Allow),
            "force" => Some(Ipv6Mode::Force),
            _ => None,
        }
    }
}

// =======================================================================
// Config overrides (one-way latched static setters)
// =======================================================================

static OVERRIDE_CONTENT: Mutex<Option<String>> = Mutex::new(None);
static OVERRIDE_FILENAME: Mutex<Option<PathBuf>> = Mutex::new(None);
static INSTANCE: OnceLock<ApiConfig> = OnceLock::new();

/// Supply the configuration document directly as a string.
///
/// Takes precedence over any configuration file. Must be called before the
/// first access to [`ApiConfig::instance`]; once the store has been built
/// the latch is closed and this returns an error.
pub fn set_config_content(content: &str) -> Result<()> {
    if INSTANCE.get().is_some() {
        return Err(Error::ConfigParse(
            "configuration already loaded; set_config_content must be called before first access"
                .into(),
        ));
    }
    *OVERRIDE_CONTENT.lock() = Some(content.to_string());
    Ok(())
}

/// Supply an explicit configuration file path.
///
/// Must be called before the first access to [`ApiConfig::instance`]; once
/// the store has been built the latch is closed and this returns an error.
pub fn set_config_filename<P: AsRef<Path>>(path: P) -> Result<()> {
    if INSTANCE.get().is_some() {
        return Err(Error::ConfigParse(
            "configuration already loaded; set_config_filename must be called before first access"
                .into(),
        ));
    }
    *OVERRIDE_FILENAME.lock() = Some(path.as_ref().to_path_buf());
    Ok(())
}

// =======================================================================
// The configuration store
// =======================================================================

/// Immutable snapshot of all configurable settings.
///
/// Obtained via [`ApiConfig::instance`] and shared read-only by every
/// resolver in the process.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    // ports
    base_port: u16,
    port_range: u16,
    allow_random_ports: bool,
    multicast_port: u16,
    allow_ipv4: bool,
    allow_ipv6: bool,
    // multicast
    resolve_scope: ResolveScope,
    listen_address: String,
    multicast_ttl: u32,
    multicast_addresses: Vec<IpAddr>,
    // lab
    session_id: String,
    known_peers: Vec<String>,
    // tuning
    multicast_min_rtt: f64,
    multicast_max_rtt: f64,
    unicast_min_rtt: f64,
    unicast_max_rtt: f64,
    continuous_resolve_interval: f64,
}

impl ApiConfig {
    /// Get the process-wide configuration, building it on first access.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigParse`] if the configuration document is
    /// malformed. The error is returned to every caller until the document
    /// is fixed; a successfully built store is cached for the process
    /// lifetime.
    pub fn instance() -> Result<&'static ApiConfig> {
        if let Some(cfg) = INSTANCE.get() {
            return Ok(cfg);
        }
        // Racing first accesses both parse the same sources and produce the
        // same value; get_or_init keeps exactly one of them.
        let built = Self::load()?;
        Ok(INSTANCE.get_or_init(|| built))
    }

    fn load() -> Result<ApiConfig> {
        if let Some(content) = OVERRIDE_CONTENT.lock().clone() {
            return Self::from_content(&content);
        }
        if let Some(path) = OVERRIDE_FILENAME.lock().clone() {
            match std::fs::read_to_string(&path) {
                Ok(text) => return Self::from_content(&text),
                Err(err) => {
                    log::warn!(
                        "[config] could not read configured file {}: {}; using defaults",
                        path.display(),
                        err
                    );
                    return Self::from_content("");
                }
            }
        }
        for path in Self::default_paths() {
            if let Ok(text) = std::fs::read_to_string(&path) {
                log::info!("[config] loading configuration from {}", path.display());
                return Self::from_content(&text);
            }
        }
        Self::from_content("")
    }

    fn default_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(CONFIG_FILE_NAME)];
        if let Some(home) = std::env::var_os("HOME") {
            paths.push(PathBuf::from(home).join("lsl_api").join(CONFIG_FILE_NAME));
        }
        paths.push(PathBuf::from("/etc/lsl_api").join(CONFIG_FILE_NAME));
        paths
    }

    /// Parse a configuration document, applying defaults for absent options.
    pub(crate) fn from_content(text: &str) -> Result<ApiConfig> {
        let mut base_port = DEFAULT_BASE_PORT;
        let mut port_range = DEFAULT_PORT_RANGE;
        let mut allow_random_ports = true;
        let mut multicast_port = DEFAULT_MULTICAST_PORT;
        let mut ipv6_mode = Ipv6Mode::Allow;
        let mut resolve_scope = ResolveScope::Site;
        let mut listen_address = String::new();
        let mut ttl_override: i32 = -1;
        let mut machine_addresses = to_owned_list(MACHINE_ADDRESSES);
        let mut link_addresses = to_owned_list(LINK_ADDRESSES);
        let mut site_addresses = to_owned_list(SITE_ADDRESSES);
        let mut organization_addresses = to_owned_list(ORGANIZATION_ADDRESSES);
        let mut global_addresses = to_owned_list(GLOBAL_ADDRESSES);
        let mut session_id = DEFAULT_SESSION_ID.to_string();
        let mut known_peers = Vec::new();
        let mut multicast_min_rtt = 0.5;
        let mut multicast_max_rtt = 3.0;
        let mut unicast_min_rtt = 0.75;
        let mut unicast_max_rtt = 5.0;
        let mut continuous_resolve_interval = 0.5;

        for entry in parse_ini(text)? {
            let IniEntry {
                section,
                key,
                value,
                line,
            } = entry;
            match (section.as_str(), key.as_str()) {
                ("ports", "baseport") => base_port = parse_u16(&value, line)?,
                ("ports", "portrange") => port_range = parse_u16(&value, line)?,
                ("ports", "allowrandomports") => allow_random_ports = parse_bool(&value, line)?,
                ("ports", "multicastport") => multicast_port = parse_u16(&value, line)?,
                ("ports", "ipv6") => {
                    ipv6_mode = Ipv6Mode::parse(&value).ok_or_else(|| {
                        Error::ConfigParse(format!(
                            "line {line}: IPv6 must be one of disable/allow/force, got '{value}'"
                        ))
                    })?;
                }
                ("multicast", "resolvescope") => {
                    resolve_scope = ResolveScope::parse(&value).ok_or_else(|| {
                        Error::ConfigParse(format!(
                            "line {line}: unrecognised ResolveScope '{value}'"
                        ))
                    })?;
                }
                ("multicast", "listenaddress") => listen_address = value,
                ("multicast", "ttloverride") => ttl_override = parse_i32(&value, line)?,
                ("multicast", "machineaddresses") => machine_addresses = parse_list(&value),
                ("multicast", "linkaddresses") => link_addresses = parse_list(&value),
                ("multicast", "siteaddresses") => site_addresses = parse_list(&value),
                ("multicast", "organizationaddresses") => {
                    organization_addresses = parse_list(&value);
                }
                ("multicast", "globaladdresses") => global_addresses = parse_list(&value),
                ("lab", "sessionid") => session_id = value,
                ("lab", "knownpeers") => known_peers = parse_list(&value),
                ("tuning", "multicastminrtt") => multicast_min_rtt = parse_f64(&value, line)?,
                ("tuning", "multicastmaxrtt") => multicast_max_rtt = parse_f64(&value, line)?,
                ("tuning", "unicastminrtt") => unicast_min_rtt = parse_f64(&value, line)?,
                ("tuning", "unicastmaxrtt") => unicast_max_rtt = parse_f64(&value, line)?,
                ("tuning", "continuousresolveinterval") => {
                    continuous_resolve_interval = parse_f64(&value, line)?;
                }
                _ => {
                    log::warn!("[config] ignoring unknown option {section}.{key} (line {line})");
                }
            }
        }

        let (allow_ipv4, allow_ipv6) = match ipv6_mode {
            Ipv6Mode::Disable => (true, false),
            Ipv6Mode::Allow => (true, true),
            Ipv6Mode::Force => (false, true),
        };

        if !(-1..=255).contains(&ttl_override) {
            return Err(Error::ConfigParse(format!(
                "TTLOverride must be -1 or 0..=255, got {ttl_override}"
            )));
        }
        let multicast_ttl = if ttl_override >= 0 {
            ttl_override as u32
        } else {
            resolve_scope.default_ttl()
        };

        let groups: [&[String]; 5] = [
            &machine_addresses,
            &link_addresses,
            &site_addresses,
            &organization_addresses,
            &global_addresses,
        ];
        let multicast_addresses =
            merge_multicast_addresses(&groups, resolve_scope, allow_ipv4, allow_ipv6);

        Ok(ApiConfig {
            base_port,
            port_range,
            allow_random_ports,
            multicast_port,
            allow_ipv4,
            allow_ipv6,
            resolve_scope,
            listen_address,
            multicast_ttl,
            multicast_addresses,
            session_id,
            known_peers,
            multicast_min_rtt,
            multicast_max_rtt,
            unicast_min_rtt,
            unicast_max_rtt,
            continuous_resolve_interval,
        })
    }

    // === core parameters ===

    /// Lowest port used to provide data streams and service information.
    ///
    /// Up to `port_range` successively higher port numbers may be utilized.
    /// If an inlet is behind a firewall, the UDP ports from `base_port` up to
    /// `base_port + port_range - 1` should be open to allow for return
    /// packets in response to stream discovery queries.
    pub fn base_port(&self) -> u16 {
        self.base_port
    }

    /// Number of ports above the base port available for serving streams.
    pub fn port_range(&self) -> u16 {
        self.port_range
    }

    /// Whether binding to a randomly assigned port is allowed once the
    /// regular port range has been exhausted.
    pub fn allow_random_ports(&self) -> bool {
        self.allow_random_ports
    }

    /// Port over which stream discovery datagrams are exchanged.
    pub fn multicast_port(&self) -> u16 {
        self.multicast_port
    }

    /// Whether the IPv4 stack may be used for discovery.
    pub fn allow_ipv4(&self) -> bool {
        self.allow_ipv4
    }

    /// Whether the IPv6 stack may be used for discovery.
    pub fn allow_ipv6(&self) -> bool {
        self.allow_ipv6
    }

    /// The configured range of multicast-based stream lookup.
    pub fn resolve_scope(&self) -> ResolveScope {
        self.resolve_scope
    }

    /// Local interface address to bind for discovery traffic; empty means
    /// the OS default interface(s).
    pub fn listen_address(&self) -> &str {
        &self.listen_address
    }

    /// TTL for outgoing multicast packets, derived from the resolve scope
    /// unless overridden by `TTLOverride`.
    pub fn multicast_ttl(&self) -> u32 {
        self.multicast_ttl
    }

    /// Multicast/broadcast addresses queried during discovery.
    ///
    /// Merged from the per-scope address groups up to and including the
    /// configured resolve scope and restricted to the allowed IP families.
    /// Every participant in the network tries all of them.
    pub fn multicast_addresses(&self) -> &[IpAddr] {
        &self.multicast_addresses
    }

    /// The configured session ID, isolating recording sessions from each
    /// other.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Host names that may provide streams, queried via unicast as a
    /// fallback when multicast communication fails on a given network.
    pub fn known_peers(&self) -> &[String] {
        &self.known_peers
    }

    // === tuning parameters ===

    /// Minimum assumed round-trip-time of a multicast query. A subsequent
    /// wave is started no earlier than this.
    pub fn multicast_min_rtt(&self) -> f64 {
        self.multicast_min_rtt
    }

    /// Maximum assumed round-trip-time of a multicast query; replies are no
    /// longer awaited after this.
    pub fn multicast_max_rtt(&self) -> f64 {
        self.multicast_max_rtt
    }

    /// Minimum assumed round-trip-time of a multi-peer/multi-port unicast
    /// query.
    pub fn unicast_min_rtt(&self) -> f64 {
        self.unicast_min_rtt
    }

    /// Maximum assumed round-trip-time of a multi-peer/multi-port unicast
    /// query.
    pub fn unicast_max_rtt(&self) -> f64 {
        self.unicast_max_rtt
    }

    /// Extra interval between query waves of continuous/background resolve
    /// activities, in addition to the assumed RTTs.
    pub fn continuous_resolve_interval(&self) -> f64 {
        self.continuous_resolve_interval
    }
}

// =======================================================================
// INI parsing
// =======================================================================

struct IniEntry {
    section: String,
    key: String,
    value: String,
    line: usize,
}

/// Parse an INI-shaped document into (section, key, value) entries.
///
/// Section and key names are lowercased; values keep their spelling. Lines
/// starting with `;` or `#` and blank lines are skipped.
fn parse_ini(text: &str) -> Result<Vec<IniEntry>> {
    let mut entries = Vec::new();
    let mut section = String::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = idx + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with(';') || trimmed.starts_with('#') {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix('[') {
            let name = rest.strip_suffix(']').ok_or_else(|| {
                Error::ConfigParse(format!("line {line}: unterminated section header"))
            })?;
            section = name.trim().to_ascii_lowercase();
            continue;
        }
        let (key, value) = trimmed.split_once('=').ok_or_else(|| {
            Error::ConfigParse(format!("line {line}: expected 'key = value', got '{trimmed}'"))
        })?;
        let key = key.trim().to_ascii_lowercase();
        if key.is_empty() {
            return Err(Error::ConfigParse(format!("line {line}: empty option name")));
        }
        entries.push(IniEntry {
            section: section.clone(),
            key,
            value: value.trim().to_string(),
            line,
        });
    }
    Ok(entries)
}

fn parse_u16(value: &str, line: usize) -> Result<u16> {
    value
        .parse()
        .map_err(|_| Error::ConfigParse(format!("line {line}: expected a port number, got '{value}'")))
}

fn parse_i32(value: &str, line: usize) -> Result<i32> {
    value
        .parse()
        .map_err(|_| Error::ConfigParse(format!("line {line}: expected an integer, got '{value}'")))
}

fn parse_f64(value: &str, line: usize) -> Result<f64> {
    value
        .parse()
        .map_err(|_| Error::ConfigParse(format!("line {line}: expected a number, got '{value}'")))
}

fn parse_bool(value: &str, line: usize) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(Error::ConfigParse(format!(
            "line {line}: expected a boolean, got '{value}'"
        ))),
    }
}

/// Split a list value into trimmed items. Lists may be written with optional
/// surrounding braces: `{item1, item2}` or plain `item1, item2`.
fn parse_list(value: &str) -> Vec<String> {
    let inner = value
        .trim()
        .strip_prefix('{')
        .and_then(|v| v.strip_suffix('}'))
        .unwrap_or(value);
    inner
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn to_owned_list(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

/// Concatenate the address groups up to the selected scope, parse each entry
/// and keep the families that are allowed. Unparseable addresses are skipped
/// with a warning rather than failing construction.
fn merge_multicast_addresses(
    groups: &[&[String]; 5],
    scope: ResolveScope,
    allow_ipv4: bool,
    allow_ipv6: bool,
) -> Vec<IpAddr> {
    let upto = match scope {
        ResolveScope::Machine => 1,
        ResolveScope::Link => 2,
        ResolveScope::Site => 3,
        ResolveScope::Organization => 4,
        ResolveScope::Global => 5,
    };
    let mut addresses = Vec::new();
    for group in &groups[..upto] {
        for entry in group.iter() {
            match entry.parse::<IpAddr>() {
                Ok(addr) => {
                    let allowed = match addr {
                        IpAddr::V4(_) => allow_ipv4,
                        IpAddr::V6(_) => allow_ipv6,
                    };
                    if allowed {
                        addresses.push(addr);
                    }
                }
                Err(_) => {
                    log::warn!("[config] skipping invalid multicast address '{entry}'");
                }
            }
        }
    }
    addresses
}

// =======================================================================
// Tests
// =======================================================================
