// Fermata
// Copyright (c) 2025-2026 The Project Fermata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `stream` module defines the per-stream declarations made by producers.

use crate::meta::Tags;
use crate::packet::Packet;

/// The media type of a stream.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum StreamType {
    Video,
    Audio,
    /// Subtitles, captions, lyrics, etc.
    Sub,
    Unknown,
}

impl StreamType {
    /// A human-readable name for the stream type, for log messages.
    pub fn name(&self) -> &'static str {
        match *self {
            StreamType::Video => "video",
            StreamType::Audio => "audio",
            StreamType::Sub => "sub",
            StreamType::Unknown => "unknown",
        }
    }
}

impl Default for StreamType {
    fn default() -> Self {
        StreamType::Unknown
    }
}

/// A `StreamInfo` describes one logical track (video, audio, or subtitle)
/// declared by the producer.
///
/// Streams are declared through
/// [`ProducerContext::add_stream`](crate::producer::ProducerContext::add_stream)
/// and are immutable afterwards. Streams can be added at any time, but never
/// removed; the stream index returned at declaration stays valid for the
/// lifetime of the demuxer.
#[derive(Clone, Debug, Default)]
pub struct StreamInfo {
    /// The media type of the stream.
    pub stream_type: StreamType,
    /// The name of the codec, if known.
    pub codec: Option<String>,
    /// The language of the stream. May be unknown.
    pub language: Option<String>,
    /// Metadata tags attached to the stream.
    pub tags: Tags,
    /// A single still image (e.g. cover art) delivered in place of a real
    /// packet stream. Reading from such a stream returns the picture exactly
    /// once, then EOF.
    pub attached_picture: Option<Packet>,
    /// Exclude this stream from underrun and EOF detection. Used for sparse
    /// side-band streams that may legitimately never carry packets.
    pub ignore_eof: bool,
}

impl StreamInfo {
    /// Create a new `StreamInfo` of the given type.
    pub fn new(stream_type: StreamType) -> StreamInfo {
        StreamInfo { stream_type, ..Default::default() }
    }
}
