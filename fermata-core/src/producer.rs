// Fermata
// Copyright (c) 2025-2026 The Project Fermata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `producer` module provides the traits and support structures necessary
//! to implement container demuxers that feed the packet cache.
//!
//! A producer is a synchronous callee: the cache's worker (or, without
//! threading, the consumer) calls into it, and it pushes streams and packets
//! back through the [`ProducerContext`] it is handed.

use log::debug;

use crate::demux::{Events, SeekFlags, Shared};
use crate::errors::Result;
use crate::io::MediaSource;
use crate::meta::Tags;
use crate::packet::Packet;
use crate::stream::StreamInfo;
use crate::units::Ts;

/// How aggressively a producer should probe the source during `open`.
///
/// Lower levels are cheap header checks; `Force` accepts the source without
/// probing. The caller walks candidates from `Normal` down on failure.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CheckLevel {
    /// Accept the source without probing.
    Force,
    /// Accept on weak evidence.
    Unsafe,
    /// The format was explicitly requested by the user.
    Request,
    /// Normal, full probing.
    Normal,
}

/// Source-level properties published by the producer at `open`, and the
/// payload of the consumer-visible `INIT` snapshot.
#[derive(Clone, Debug, Default)]
pub struct SourceProps {
    /// The producer can reposition the source.
    pub seekable: bool,
    /// Seeking nominally works, but may be inexact or slow.
    pub partially_seekable: bool,
    /// Timestamp of the first packet, if known.
    pub start_time: Ts,
    /// Total duration, if known.
    pub duration: Ts,
    /// The source is being streamed over a network.
    pub is_network: bool,
    /// The producer consumed the entire source during `open`; the byte
    /// stream is no longer needed.
    pub fully_read: bool,
    /// Human-readable description of the detected format.
    pub filetype: Option<String>,
    /// Container-level metadata.
    pub metadata: Tags,
}

/// A `PacketProducer` is a container demuxer driven by the packet cache. It
/// declares streams and appends packets through the [`ProducerContext`], and
/// is repositioned via [`seek`](PacketProducer::seek).
///
/// All calls are made with exclusive access and no cache lock held, so
/// implementations may block on I/O. Dropping the producer releases its
/// resources; there is no separate close call.
pub trait PacketProducer: Send {
    /// Probe the source, declare the initial set of streams via
    /// [`ProducerContext::add_stream`], and return the source properties.
    /// Failure means the source does not match this format; the caller may
    /// try the next one.
    fn open(&mut self, ctx: &ProducerContext<'_>, check: CheckLevel) -> Result<SourceProps>;

    /// Read ahead, appending zero or more packets via
    /// [`ProducerContext::add_packet`]. Returns `Ok(true)` if progress was
    /// made, and `Ok(false)` at the end of the source. Errors are treated as
    /// EOF by the cache.
    fn fill_buffer(&mut self, ctx: &ProducerContext<'_>) -> Result<bool>;

    /// Reposition the source. With `SeekFlags::FACTOR`, `pts` is a fraction
    /// of the total duration instead of a timestamp.
    fn seek(&mut self, pts: f64, flags: SeekFlags) -> Result<()>;

    /// The set of selected streams changed. Producers that can skip demuxing
    /// deselected streams may update themselves here.
    fn notify_switched_tracks(&mut self) {}

    /// The source was fully read and its byte stream is being released.
    fn replace_stream(&mut self) {}

    /// Access the underlying byte source for telemetry queries, if there is
    /// one.
    fn source_mut(&mut self) -> Option<&mut dyn MediaSource> {
        None
    }
}

/// The producer's handle into the cache: stream declaration, packet output,
/// and publication of metadata updates.
pub struct ProducerContext<'a> {
    shared: &'a Shared,
}

impl<'a> ProducerContext<'a> {
    pub(crate) fn new(shared: &'a Shared) -> ProducerContext<'a> {
        ProducerContext { shared }
    }

    /// Declare a new stream, returning its index. Streams can be declared at
    /// any time, but never removed, and are immutable once declared.
    pub fn add_stream(&self, info: StreamInfo) -> u32 {
        let index = self.shared.state.lock().add_stream(info);
        self.shared.wakeup.notify_all();
        index
    }

    /// Number of streams declared so far.
    pub fn num_streams(&self) -> usize {
        self.shared.state.lock().streams.len()
    }

    /// Hand a packet to the cache. The cache decides whether to keep it;
    /// empty packets and packets for unknown streams are dropped.
    pub fn add_packet(&self, pkt: Packet) {
        if pkt.is_empty() {
            return;
        }
        {
            let mut state = self.shared.state.lock();
            if pkt.stream as usize >= state.streams.len() {
                debug!("dropping packet for unknown stream {}", pkt.stream);
                return;
            }
            state.add_packet(pkt);
        }
        self.shared.wakeup.notify_all();
    }

    /// Whether the consumer currently wants packets from the stream.
    /// Producers that can demux selectively may use this to skip work.
    pub fn stream_is_selected(&self, stream: u32) -> bool {
        let state = self.shared.state.lock();
        state.streams.get(stream as usize).map_or(false, |ds| ds.selected)
    }

    /// Publish updated container-level metadata. The consumer sees it after
    /// its next `update`.
    pub fn set_metadata(&self, tags: Tags) {
        let mut state = self.shared.state.lock();
        state.props.metadata = tags;
        state.events |= Events::METADATA;
        state.wake();
    }

    /// Publish updated tags for a single stream.
    pub fn update_stream_tags(&self, stream: u32, tags: Tags) {
        let mut state = self.shared.state.lock();
        if let Some(slot) = state.stream_tag_updates.get_mut(stream as usize) {
            *slot = Some(tags);
            state.events |= Events::METADATA;
            state.wake();
        }
    }
}
