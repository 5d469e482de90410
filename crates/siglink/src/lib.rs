// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 siglink.dev

//! # siglink - stream discovery for real-time signal streaming
//!
//! siglink is a peer-to-peer library for real-time biosignal and instrument
//! data streaming. This crate implements its *stream-discovery resolver*:
//! the component an inlet uses to find out which outlets currently exist on
//! the local network that match a structured predicate over their metadata.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use siglink::{Resolver, Result};
//!
//! fn main() -> Result<()> {
//!     // Find one EEG stream, waiting up to five seconds
//!     let resolver = Resolver::new()?;
//!     let streams = resolver.resolve_oneshot("type='EEG'", 1, 5.0, 0.0)?;
//!
//!     // Or keep a live view in the background
//!     let live = siglink::create_resolver(5.0, Some("type"), Some("EEG"))?;
//!     let known = live.results(usize::MAX);
//!     # let _ = (streams, known);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------+
//! |                        Resolver facade                       |
//! |        resolve_oneshot | resolve_continuous | results        |
//! +--------------------------------------------------------------+
//! |                        Wave scheduler                        |
//! |     stop condition | RTT-spaced waves | cancellation/drain   |
//! +--------------------------------------------------------------+
//! |                       Resolve attempts                       |
//! |   one UDP burst per protocol family | reply collection       |
//! +--------------------------------------------------------------+
//! |            Endpoint catalog  |  Configuration store          |
//! |   multicast groups x port, peers x port range  |  lsl_api.cfg|
//! +--------------------------------------------------------------+
//! ```
//!
//! Discovery is lossy by design and compensated by periodic re-waves; the
//! result map collapses duplicate replies by stream identity and expires
//! entries that stop answering.
//!
//! ## Modules Overview
//!
//! - [`resolver`] - the resolver engine (start here)
//! - [`config`] - process-wide configuration store
//! - [`query`] - query construction and predicate validation
//! - [`transport`] - endpoint catalog and burst socket setup

use std::fmt;

/// Process-wide configuration store (`lsl_api.cfg` and friends).
pub mod config;
/// Discovery query construction and validation.
pub mod query;
/// The resolver engine: waves, attempts, result map, public façade.
pub mod resolver;
/// Endpoint catalog and UDP socket construction.
pub mod transport;

pub use config::{set_config_content, set_config_filename, ApiConfig, ResolveScope};
pub use query::{build_query, check_query};
pub use resolver::results::StreamInfo;
pub use resolver::{create_resolver, Resolver};

/// Passed as a timeout or forget-after value to wait indefinitely.
pub const FOREVER: f64 = f64::INFINITY;

/// siglink version string.
pub const VERSION: &str = "0.2.0";

/// Errors returned by siglink operations.
///
/// Transient network conditions during discovery are not represented here:
/// they are logged and absorbed inside the resolve attempts, and the
/// resolver keeps re-waving. A oneshot timeout is likewise not an error; it
/// returns the partial result list.
#[derive(Debug)]
pub enum Error {
    /// The configuration document is syntactically malformed, an enumerated
    /// option has an unrecognised value, or a config setter was called
    /// after the store had been built.
    ConfigParse(String),
    /// The configuration yields an unusable resolver (no IP family enabled,
    /// no usable multicast address) or the operation is invalid in the
    /// resolver's current state.
    Config(String),
    /// The discovery predicate does not parse.
    InvalidQuery(String),
    /// An I/O error outside of the absorbed attempt errors (e.g. the
    /// background worker could not be spawned).
    Io(std::io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ConfigParse(msg) => write!(f, "configuration parse error: {msg}"),
            Error::Config(msg) => write!(f, "configuration error: {msg}"),
            Error::InvalidQuery(msg) => write!(f, "{msg}"),
            Error::Io(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

/// Convenient alias for API results using the public [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;
