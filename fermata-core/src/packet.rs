// Fermata
// Copyright (c) 2025-2026 The Project Fermata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `packet` module defines the packet structure.

use std::mem;

use crate::units::Ts;

/// A `Packet` contains a discrete amount of encoded data for a single stream:
/// one compressed video frame, one block of audio, or one subtitle event. The
/// exact amount of data is bounded, but not defined, and is dependent on the
/// container.
///
/// Timestamps are in seconds and may be unset; containers do not guarantee
/// timing on every packet. Once a packet has been appended to the cache it is
/// immutable.
#[derive(Clone, Debug)]
pub struct Packet {
    /// The index of the stream this packet belongs to.
    pub stream: u32,
    /// The presentation timestamp of the packet.
    pub pts: Ts,
    /// The decode timestamp of the packet. Usually equal to `pts` for audio.
    pub dts: Ts,
    /// Start of the segment the packet belongs to. Only meaningful if
    /// `segmented` is set.
    pub start: Ts,
    /// End of the segment the packet belongs to. Only meaningful if
    /// `segmented` is set.
    pub end: Ts,
    /// The byte position of the packet in the source, if known. Strictly
    /// increasing positions are one of the keys used to resume demuxing at a
    /// previously observed packet.
    pub pos: Option<u64>,
    /// True if the packet starts a decodable unit (e.g. an IDR frame). For
    /// audio, every packet is typically a keyframe.
    pub keyframe: bool,
    /// True if the packet's timestamps are bounded by `start` and `end`.
    pub segmented: bool,
    /// The packet data buffer.
    pub data: Box<[u8]>,
}

impl Packet {
    /// Create a new `Packet` for the given stream with no timing information.
    pub fn new(stream: u32, data: impl Into<Box<[u8]>>) -> Packet {
        Packet {
            stream,
            pts: Ts::NONE,
            dts: Ts::NONE,
            start: Ts::NONE,
            end: Ts::NONE,
            pos: None,
            keyframe: false,
            segmented: false,
            data: data.into(),
        }
    }

    /// The length of the packet data buffer in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the packet data buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get an immutable slice to the packet data buffer.
    pub fn buf(&self) -> &[u8] {
        &self.data
    }

    /// Estimated total memory footprint of the packet, used for the cache's
    /// byte accounting. Includes a fixed per-packet overhead on top of the
    /// payload so that floods of tiny packets are budgeted realistically.
    pub fn estimated_size(&self) -> usize {
        self.data.len() + mem::size_of::<Packet>()
    }
}
