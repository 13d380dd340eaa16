// Fermata
// Copyright (c) 2025-2026 The Project Fermata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `io` module defines the byte-source interface consumed by producers.
//!
//! The cache core never reads bytes itself. Producers pull bytes from a
//! [`MediaSource`]; the cache only issues the control queries (size, transport
//! cache state, base filename, readahead hints, cancellation) needed for
//! telemetry and scheduling.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::meta::Tags;

/// A `MediaSource` is the byte stream a producer demuxes from: blocking
/// `std::io::Read`/`std::io::Seek` access plus the runtime queries the cache
/// issues without interpreting the bytes.
pub trait MediaSource: io::Read + io::Seek + Send {
    /// Returns if the source supports repositioning. Sources that don't get
    /// served from the forward buffer only; seek requests against them are
    /// refused.
    fn is_seekable(&self) -> bool;

    /// Returns the total length in bytes, if known. May be expensive;
    /// the cache stores the result and refreshes it in the background.
    fn byte_len(&self) -> Option<u64>;

    /// Returns the state of the transport-level cache in front of the source,
    /// if there is one.
    fn cache_info(&self) -> Option<SourceCacheInfo> {
        None
    }

    /// Returns the base filename of the source, if it has one.
    fn base_filename(&self) -> Option<String> {
        None
    }

    /// Returns transport-level metadata (e.g. shoutcast stream titles), if
    /// the source carries any.
    fn metadata(&self) -> Option<Tags> {
        None
    }

    /// Hint whether the source should read ahead on its own.
    fn set_readahead(&mut self, _enabled: bool) {}

    /// Returns the cancellation token attached to the source, if any.
    fn cancel(&self) -> Option<CancelToken> {
        None
    }
}

/// An in-memory buffer as a byte source.
///
/// Repositioning a cursor never fails and its size is always known, so a
/// producer reading from one meets every seekability precondition the cache
/// checks before serving seeks or queuing producer-level resume seeks.
impl<T: AsRef<[u8]> + Send> MediaSource for io::Cursor<T> {
    fn is_seekable(&self) -> bool {
        true
    }

    fn byte_len(&self) -> Option<u64> {
        Some(self.get_ref().as_ref().len() as u64)
    }
}

/// State of a transport-level cache in front of a `MediaSource`.
#[derive(Copy, Clone, Debug, Default)]
pub struct SourceCacheInfo {
    /// Total size of the transport cache in bytes.
    pub size: u64,
    /// Number of bytes currently buffered.
    pub fill: u64,
    /// True if the transport cache is idle (not actively reading).
    pub idle: bool,
    /// Measured fill speed in bytes per second, if known.
    pub speed: Option<u64>,
}

/// A `CancelToken` is a cloneable flag used to abort blocking producer work.
///
/// The cache polls the token before driving the producer; a pending
/// cancellation makes the pipeline settle into its EOF state.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a new, untriggered token.
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    /// Trigger the token. This cannot be undone.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Returns true if the token has been triggered.
    pub fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
