// Fermata
// Copyright (c) 2025-2026 The Project Fermata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The mutable cache state shared between the consumer and the worker.

use std::sync::Arc;

use smallvec::{smallvec, SmallVec};

use crate::io::SourceCacheInfo;
use crate::meta::Tags;
use crate::producer::{PacketProducer, SourceProps};
use crate::stream::{StreamInfo, StreamType};
use crate::units::Ts;

use super::queue::{NodeId, PacketPool, Queue};
use super::{CacheOptions, Events, SeekFlags};

/// Byte positions compared with unset ordering before every real position.
pub(crate) fn pos_key(pos: Option<u64>) -> i64 {
    pos.map_or(-1, |p| p as i64)
}

/// A continuous range of cached packets for all known streams. One queue per
/// stream, indexed by stream index.
pub(crate) struct Range {
    pub queues: Vec<Queue>,

    /// Computed from the queues' values. These fields (unlike the per-queue
    /// ones) are always either both unset, or both set and consistent.
    pub seek_start: Ts,
    pub seek_end: Ts,
}

impl Range {
    pub fn new(num_streams: usize) -> Range {
        let mut queues = Vec::with_capacity(num_streams);
        queues.resize_with(num_streams, Queue::new);
        Range { queues, seek_start: Ts::NONE, seek_end: Ts::NONE }
    }

    /// Refresh the range's seek bounds from its queues.
    pub fn update_seek_ranges(&mut self, streams: &[StreamState]) {
        self.seek_start = Ts::NONE;
        self.seek_end = Ts::NONE;

        for (queue, ds) in self.queues.iter().zip(streams) {
            if ds.selected {
                self.seek_start = self.seek_start.max(queue.seek_start);
                self.seek_end = self.seek_end.min(queue.seek_end);

                if !queue.seek_start.is_set() || !queue.seek_end.is_set() {
                    self.seek_start = Ts::NONE;
                    self.seek_end = Ts::NONE;
                    break;
                }
            }
        }

        if self.seek_start.sort_key() >= self.seek_end.sort_key() {
            self.seek_start = Ts::NONE;
            self.seek_end = Ts::NONE;
        }
    }
}

/// Per-stream runtime state: selection, reader cursor, telemetry.
pub(crate) struct StreamState {
    pub info: Arc<StreamInfo>,
    pub index: usize,

    /// The consumer wants packets from this stream.
    pub selected: bool,
    /// Try to keep at least 1 packet queued. If false, this stream is
    /// disabled, or passively read (like subtitles).
    pub eager: bool,
    /// Enabled mid-stream; a refresh seek is still owed.
    pub need_refresh: bool,
    /// The producer was rewound and duplicates are being filtered.
    pub refreshing: bool,
    /// Exclude the stream from underrun/EOF detection.
    pub ignore_eof: bool,

    /// Monotonicity observed across all ranges so far.
    pub global_correct_dts: bool,
    pub global_correct_pos: bool,

    // Reader (decoder) state. Bitrate calculations are part of it because the
    // bitrate closest to the current reading position is wanted.
    /// Timestamp of the last packet returned to the decoder.
    pub base_ts: Ts,
    pub last_br_ts: Ts,
    pub last_br_bytes: usize,
    pub bitrate: Option<f64>,
    /// Number of packets in the forward buffer.
    pub fw_packs: usize,
    /// Total bytes of packets in the forward buffer.
    pub fw_bytes: usize,
    /// End of demuxed stream? (true if no more packets are coming)
    pub eof: bool,
    /// The current decoder position within the current range's queue.
    pub reader_head: Option<NodeId>,
    pub skip_to_keyframe: bool,
    pub attached_picture_added: bool,
}

impl StreamState {
    fn new(info: Arc<StreamInfo>, index: usize) -> StreamState {
        StreamState {
            info,
            index,
            selected: false,
            eager: false,
            need_refresh: false,
            refreshing: false,
            ignore_eof: false,
            global_correct_dts: true,
            global_correct_pos: true,
            base_ts: Ts::NONE,
            last_br_ts: Ts::NONE,
            last_br_bytes: 0,
            bitrate: None,
            fw_packs: 0,
            fw_bytes: 0,
            eof: false,
            reader_head: None,
            skip_to_keyframe: false,
            attached_picture_added: false,
        }
    }
}

/// A one-shot task handed from the consumer thread to the worker, run with
/// exclusive access to the producer and no cache lock held.
pub(crate) type DeferredFn = Box<dyn FnOnce(&mut dyn PacketProducer) + Send>;

/// All mutable cache state. Protected by the demuxer's single mutex.
pub(crate) struct CacheState {
    pub streams: Vec<StreamState>,

    /// Cached ranges, sorted by least recent use: index 0 is least recently
    /// used. The range the producer appends into and the reader reads from is
    /// always the last one; the list is never empty.
    pub ranges: SmallVec<[Range; 2]>,

    pub pool: PacketPool,

    /// Total sum of packet data buffered, across all ranges.
    pub total_bytes: usize,
    /// Sum of forward packet data in the current range.
    pub fw_bytes: usize,

    // Options mirror.
    pub min_secs: f64,
    pub max_bytes: usize,
    pub max_bytes_bw: usize,
    pub seekable_cache: bool,

    /// At least one decoder actually requested data since init or the last
    /// seek. This allows decoders to select streams before reading starts.
    pub reading: bool,
    pub idle: bool,
    /// Whether we're in the EOF state (reset for retry).
    pub eof: bool,
    /// Last actual global EOF status.
    pub last_eof: bool,
    pub warned_queue_overflow: bool,
    /// Set while we know we are at the start of the file, to avoid a
    /// redundant initial seek after enabling streams.
    pub initial_state: bool,

    /// The worker needs to inform the producer of a track switch.
    pub tracks_switched: bool,
    /// There's a seek queued.
    pub seeking: bool,
    pub seek_flags: SeekFlags,
    pub seek_pts: f64,

    /// Assumed player position, only for track switches.
    pub ref_pts: Ts,
    /// Timestamp offset to apply to everything returned to the consumer.
    pub ts_offset: f64,

    pub autoselect: bool,

    /// The publication snapshot of source-level properties. Copied to the
    /// consumer's view by `Demuxer::update`.
    pub props: SourceProps,
    pub events: Events,
    /// Per-stream tag updates pending publication.
    pub stream_tag_updates: Vec<Option<Tags>>,
    /// Transport-level metadata pending a merge into the published tags.
    pub source_metadata: Option<Tags>,

    // Cached source telemetry, refreshed by the worker outside the lock.
    pub force_cache_update: bool,
    pub stream_size: Option<u64>,
    pub source_cache_info: Option<SourceCacheInfo>,
    pub base_filename: Option<String>,

    /// The consumer-visible position in the source, advanced by reads.
    pub file_pos: Option<u64>,

    pub threading: bool,
    pub thread_terminate: bool,
    pub wakeup_cb: Option<Arc<dyn Fn() + Send + Sync>>,
    pub run_fn: Option<DeferredFn>,
}

impl CacheState {
    pub fn new(options: &CacheOptions) -> CacheState {
        CacheState {
            streams: Vec::new(),
            ranges: smallvec![Range::new(0)],
            pool: PacketPool::new(),
            total_bytes: 0,
            fw_bytes: 0,
            min_secs: options.min_secs.max(0.0),
            max_bytes: options.max_bytes,
            max_bytes_bw: options.max_bytes_bw,
            seekable_cache: options.seekable_cache,
            reading: false,
            idle: true,
            eof: false,
            last_eof: false,
            warned_queue_overflow: false,
            initial_state: true,
            tracks_switched: false,
            seeking: false,
            seek_flags: SeekFlags::empty(),
            seek_pts: 0.0,
            ref_pts: Ts::NONE,
            ts_offset: 0.0,
            autoselect: false,
            props: SourceProps::default(),
            events: Events::empty(),
            stream_tag_updates: Vec::new(),
            source_metadata: None,
            force_cache_update: false,
            stream_size: None,
            source_cache_info: None,
            base_filename: None,
            file_pos: None,
            threading: false,
            thread_terminate: false,
            wakeup_cb: None,
            run_fn: None,
        }
    }

    /// The range the producer appends into and the reader reads from.
    pub fn current_range(&self) -> &Range {
        self.ranges.last().expect("range list is never empty")
    }

    /// Move the given range to the end of the LRU list, making it current.
    /// (This doesn't do most things required for a full switch.)
    pub fn set_current_range(&mut self, idx: usize) {
        let range = self.ranges.remove(idx);
        self.ranges.push(range);
    }

    /// Invoke the consumer's wakeup callback, if one is installed.
    pub fn wake(&self) {
        if let Some(cb) = &self.wakeup_cb {
            cb();
        }
    }

    /// Refresh the seek bounds of the range at `idx`.
    pub fn update_seek_ranges_for(&mut self, idx: usize) {
        let CacheState { ranges, streams, .. } = self;
        ranges[idx].update_seek_ranges(streams);
    }

    /// Drop all packets of one queue, adjusting global byte accounting.
    pub fn clear_queue(&mut self, range_idx: usize, stream: usize) {
        let CacheState { ranges, pool, total_bytes, .. } = self;
        let freed = ranges[range_idx].queues[stream].clear(pool);
        *total_bytes -= freed;
    }

    /// Drop all packets of one range and unset its seek bounds.
    pub fn clear_range(&mut self, range_idx: usize) {
        for s in 0..self.streams.len() {
            self.clear_queue(range_idx, s);
        }
        self.update_seek_ranges_for(range_idx);
    }

    /// Destroy all non-current ranges whose seek bounds have become unset.
    pub fn free_empty_ranges(&mut self) {
        debug_assert!(!self.ranges.is_empty());
        for n in (0..self.ranges.len().saturating_sub(1)).rev() {
            if !self.ranges[n].seek_start.is_set() {
                self.clear_range(n);
                self.ranges.remove(n);
            }
        }
    }

    /// Recount the forward buffer of one stream by walking the reader chain.
    /// Does not touch the global forward counter.
    pub fn recompute_buffers(&mut self, stream: usize) {
        let CacheState { streams, pool, .. } = self;
        let ds = &mut streams[stream];
        ds.fw_packs = 0;
        ds.fw_bytes = 0;
        let mut cur = ds.reader_head;
        while let Some(id) = cur {
            let node = &pool[id];
            ds.fw_bytes += node.pkt.estimated_size();
            ds.fw_packs += 1;
            cur = node.next;
        }
    }

    /// Reset one stream's reader state, removing its forward buffer from the
    /// global count.
    pub fn ds_clear_reader_state(&mut self, stream: usize) {
        let ds = &mut self.streams[stream];
        self.fw_bytes -= ds.fw_bytes;

        ds.reader_head = None;
        ds.eof = false;
        ds.base_ts = Ts::NONE;
        ds.last_br_ts = Ts::NONE;
        ds.last_br_bytes = 0;
        ds.bitrate = None;
        ds.skip_to_keyframe = false;
        ds.attached_picture_added = false;
        ds.fw_bytes = 0;
        ds.fw_packs = 0;
    }

    /// Reset all reader state (called on seeks and flushes).
    pub fn clear_reader_state(&mut self) {
        for s in 0..self.streams.len() {
            self.ds_clear_reader_state(s);
        }
        self.warned_queue_overflow = false;
        self.file_pos = None;
        debug_assert_eq!(self.fw_bytes, 0);
    }

    /// Register a stream declared by the producer. Streams can be added at
    /// any time, but never removed.
    pub fn add_stream(&mut self, info: StreamInfo) -> u32 {
        let index = self.streams.len();
        let mut ds = StreamState::new(Arc::new(info), index);
        ds.ignore_eof = ds.info.ignore_eof;
        self.streams.push(ds);
        self.stream_tag_updates.push(None);

        for range in &mut self.ranges {
            while range.queues.len() < index + 1 {
                range.queues.push(Queue::new());
            }
        }

        let autoselect = self.autoselect;
        self.update_stream_selection_state(index, autoselect, true);

        self.events |= Events::STREAMS;
        self.wake();
        index as u32
    }

    /// Apply a selection change (or initialize a new stream), then recompute
    /// every stream's eagerness.
    pub fn update_stream_selection_state(&mut self, stream: usize, selected: bool, is_new: bool) {
        if self.streams[stream].selected != selected || is_new {
            {
                let ds = &mut self.streams[stream];
                ds.selected = selected;
                ds.eof = false;
                ds.refreshing = false;
                ds.need_refresh = false;
            }

            self.ds_clear_reader_state(stream);

            // Make sure any stream reselection or addition is reflected in
            // the seek ranges, and also get rid of data that is not needed
            // anymore (or rather, which can't be kept consistent).
            for n in 0..self.ranges.len() {
                if !selected {
                    self.clear_queue(n, stream);
                }
                self.update_seek_ranges_for(n);
            }

            self.free_empty_ranges();
        }

        // The whole stream list is rechecked because eagerness depends on the
        // other streams' selections.
        let mut any_av_streams = false;
        for ds in &mut self.streams {
            ds.eager = ds.selected && ds.info.attached_picture.is_none();
            if ds.eager {
                any_av_streams |= ds.info.stream_type != StreamType::Sub;
            }
        }

        // Subtitles are only eagerly read if there are no other eagerly read
        // streams.
        if any_av_streams {
            for ds in &mut self.streams {
                if ds.info.stream_type == StreamType::Sub {
                    ds.eager = false;
                }
            }
        }
    }

    /// Full cross-check of the cached queue state: byte accounting, list
    /// structure, cursor membership, and range bounds. Too expensive for
    /// release builds; tests call it after every interesting operation.
    #[cfg(any(test, debug_assertions))]
    pub fn check_consistency(&self) {
        let mut total_bytes = 0;
        let mut total_fw_bytes = 0;

        assert!(!self.ranges.is_empty());

        for (ri, range) in self.ranges.iter().enumerate() {
            let is_current = ri == self.ranges.len() - 1;

            assert_eq!(range.queues.len(), self.streams.len());

            for (s, queue) in range.queues.iter().enumerate() {
                let ds = &self.streams[s];

                let mut fw_bytes = 0;
                let mut fw_packs = 0;
                let mut is_forward = false;
                let mut kf_found = false;
                let mut npt_found = false;
                let mut last = None;
                let mut steps = 0;

                let mut cur = queue.head;
                while let Some(id) = cur {
                    steps += 1;
                    assert!(steps <= self.pool.len(), "queue list is cyclic");

                    is_forward |= Some(id) == ds.reader_head;
                    kf_found |= Some(id) == queue.keyframe_latest;
                    npt_found |= Some(id) == queue.next_prune_target;

                    let node = &self.pool[id];
                    let bytes = node.pkt.estimated_size();
                    total_bytes += bytes;
                    if is_forward {
                        fw_bytes += bytes;
                        fw_packs += 1;
                        assert!(is_current);
                    }

                    last = Some(id);
                    cur = node.next;
                }
                assert_eq!(queue.tail, last);
                if queue.head.is_none() {
                    assert!(queue.tail.is_none());
                }

                // The queue currently used for reading and demuxing must
                // contain its cursors.
                if is_current {
                    assert_eq!(is_forward, ds.reader_head.is_some());
                    assert_eq!(kf_found, queue.keyframe_latest.is_some());
                }
                else if queue.keyframe_latest.is_some() {
                    assert!(kf_found);
                }
                assert_eq!(npt_found, queue.next_prune_target.is_some());

                total_fw_bytes += fw_bytes;

                if is_current {
                    assert_eq!(ds.fw_bytes, fw_bytes);
                    assert_eq!(ds.fw_packs, fw_packs);
                }
                else {
                    assert!(fw_bytes == 0 && fw_packs == 0);
                }

                if let Some(kl) = queue.keyframe_latest {
                    assert!(self.pool[kl].pkt.keyframe);
                }
            }

            assert_eq!(range.seek_start.is_set(), range.seek_end.is_set());
            if range.seek_start.is_set() {
                assert!(range.seek_end.sort_key() > range.seek_start.sort_key());
            }
        }

        assert_eq!(self.total_bytes, total_bytes);
        assert_eq!(self.fw_bytes, total_fw_bytes);
    }
}
