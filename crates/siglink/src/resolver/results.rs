// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 siglink.dev

//! Discovered-stream bookkeeping: the result map and its entries.
//!
//! Replies from outlets are collapsed by stream identity, so the same outlet
//! seen via several endpoints or address families occupies one entry. Each
//! entry carries the monotonic time of its most recent reply; snapshots
//! evict entries that have not been re-seen within the forget-after window.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Instant;

/// Monotonic seconds since process start, the timebase of `last_seen` and
/// the scheduler's wait deadlines.
pub(crate) fn steady_clock() -> f64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_secs_f64()
}

/// Metadata of one discovered stream, as carried in a discovery reply.
///
/// The reply consists of the stream's *shortinfo* identity token followed by
/// its serialized XML metadata. The common header fields are extracted for
/// convenience; the full document stays available via [`StreamInfo::as_xml`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    shortinfo: String,
    name: String,
    stream_type: String,
    uid: String,
    hostname: String,
    xml: String,
}

impl StreamInfo {
    /// Build a `StreamInfo` from a reply's shortinfo header and XML body.
    ///
    /// An unparseable body is carried opaquely with empty header fields; the
    /// identity token alone is enough to key the result map.
    pub(crate) fn from_reply(shortinfo: &str, xml: &str) -> Self {
        let mut info = StreamInfo {
            shortinfo: shortinfo.to_string(),
            name: String::new(),
            stream_type: String::new(),
            uid: String::new(),
            hostname: String::new(),
            xml: xml.to_string(),
        };
        match roxmltree::Document::parse(xml) {
            Ok(doc) => {
                for child in doc.root_element().children() {
                    let text = child.text().unwrap_or("").trim();
                    match child.tag_name().name() {
                        "name" => info.name = text.to_string(),
                        "type" => info.stream_type = text.to_string(),
                        "uid" => info.uid = text.to_string(),
                        "hostname" => info.hostname = text.to_string(),
                        _ => {}
                    }
                }
            }
            Err(err) => {
                log::debug!(
                    "[resolver] carrying unparseable metadata for '{shortinfo}' opaquely: {err}"
                );
            }
        }
        info
    }

    /// Stable identity of the stream (outlet UID and host), the result-map
    /// key.
    pub fn identity(&self) -> &str {
        &self.shortinfo
    }

    /// Human-readable stream name (e.g. `BioSemi`).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Content type of the stream (e.g. `EEG`).
    pub fn stream_type(&self) -> &str {
        &self.stream_type
    }

    /// Unique identifier of the providing outlet.
    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// Host the outlet runs on.
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// The serialized metadata document as received.
    pub fn as_xml(&self) -> &str {
        &self.xml
    }
}

/// Concurrent map from stream identity to (info, last-seen timestamp).
///
/// All operations hold the internal mutex for a short, I/O-free critical
/// section: attempts upsert from their receive threads while the caller
/// thread takes snapshots.
#[derive(Debug, Default)]
pub(crate) struct ResultMap {
    inner: Mutex<HashMap<String, (StreamInfo, f64)>>,
}

impl ResultMap {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Insert a fresh reply or refresh an existing entry's timestamp,
    /// overwriting the carried info.
    pub(crate) fn upsert(&self, info: StreamInfo) {
        let now = steady_clock();
        self.inner.lock().insert(info.identity().to_string(), (info, now));
    }

    /// Evict entries older than `forget_after`, then return up to
    /// `max_results` of the remaining entries in arbitrary order.
    pub(crate) fn snapshot(&self, max_results: usize, forget_after: f64) -> Vec<StreamInfo> {
        let expired_before = steady_clock() - forget_after;
        let mut map = self.inner.lock();
        map.retain(|_, (_, last_seen)| *last_seen >= expired_before);
        map.values().take(max_results).map(|(info, _)| info.clone()).collect()
    }

    /// Current entry count, without implicit eviction.
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub(crate) fn clear(&self) {
        self.inner.lock().clear();
    }

    /// Timestamp of an entry, for tests and diagnostics.
    #[cfg(test)]
    pub(crate) fn last_seen(&self, identity: &str) -> Option<f64> {
        self.inner.lock().get(identity).map(|(_, t)| *t)
    }
}
