// Fermata
// Copyright (c) 2025-2026 The Project Fermata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `units` module provides definitions for common units.

use std::fmt;

/// A timestamp may move backwards by up to this many seconds before the
/// per-queue "last timestamp" tracking follows it down. Within the window the
/// old (higher) value is kept, which tolerates reordered packets around
/// keyframes without collapsing the readahead measurement.
pub const NON_MONOTONE_TOLERANCE_SECS: f64 = 10.0;

/// `Ts` is a timestamp (or span) in seconds that may be unset.
///
/// Containers routinely omit timestamps on individual packets, so almost every
/// timestamp in the cache is optional. `Ts` keeps the "unset" case explicit
/// and propagates it through arithmetic: adding an offset to an unset `Ts`
/// yields an unset `Ts`, while `min`/`max` prefer whichever side is set.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Ts(Option<f64>);

impl Ts {
    /// The unset timestamp.
    pub const NONE: Ts = Ts(None);

    /// Create a set timestamp from a number of seconds.
    pub fn new(seconds: f64) -> Ts {
        Ts(Some(seconds))
    }

    /// Returns true if the timestamp is set.
    pub fn is_set(&self) -> bool {
        self.0.is_some()
    }

    /// Get the timestamp in seconds, or `None` if unset.
    pub fn get(&self) -> Option<f64> {
        self.0
    }

    /// Return `self`, or `def` if `self` is unset.
    pub fn or(self, def: Ts) -> Ts {
        if self.is_set() {
            self
        }
        else {
            def
        }
    }

    /// The smaller of two timestamps, preferring whichever side is set.
    pub fn min(self, other: Ts) -> Ts {
        match (self.0, other.0) {
            (Some(a), Some(b)) => Ts(Some(a.min(b))),
            (Some(a), None) => Ts(Some(a)),
            (None, b) => Ts(b),
        }
    }

    /// The larger of two timestamps, preferring whichever side is set.
    pub fn max(self, other: Ts) -> Ts {
        match (self.0, other.0) {
            (Some(a), Some(b)) => Ts(Some(a.max(b))),
            (Some(a), None) => Ts(Some(a)),
            (None, b) => Ts(b),
        }
    }

    /// Add an offset in seconds. Unset stays unset.
    pub fn add(self, offset: f64) -> Ts {
        Ts(self.0.map(|t| t + offset))
    }

    /// The timestamp value with unset mapped to negative infinity, so that an
    /// unset timestamp orders before every set one. Comparisons on cached
    /// timestamps use this key wherever that ordering is wanted.
    pub fn sort_key(&self) -> f64 {
        self.0.unwrap_or(f64::NEG_INFINITY)
    }
}

impl From<f64> for Ts {
    fn from(seconds: f64) -> Self {
        Ts::new(seconds)
    }
}

impl From<Option<f64>> for Ts {
    fn from(seconds: Option<f64>) -> Self {
        Ts(seconds)
    }
}

impl fmt::Display for Ts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(t) => write!(f, "{:.6}", t),
            None => write!(f, "unset"),
        }
    }
}
