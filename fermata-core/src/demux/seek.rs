// Fermata
// Copyright (c) 2025-2026 The Project Fermata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-cache seeking: positioning readers inside cached ranges and switching
//! between ranges without touching the producer when possible.

use log::debug;

use crate::stream::StreamType;

use super::queue::{NodeId, PacketPool, Queue};
use super::state::{CacheState, Range};
use super::{SeekFlags, RESUME_SEEK_BACK_SECS};

/// Find the packet a seek to `pts` should position the reader at: the
/// keyframe whose seek range covers `pts` best, honoring the direction
/// requested by `SeekFlags::FORWARD`.
pub(crate) fn find_seek_target(
    pool: &PacketPool,
    queue: &Queue,
    pts: f64,
    flags: SeekFlags,
) -> Option<NodeId> {
    let mut target = None;
    let mut target_diff: Option<f64> = None;

    let mut cur = queue.head;
    while let Some(id) = cur {
        let node = &pool[id];
        cur = node.next;

        let range_pts = match node.kf_seek_pts.get() {
            Some(p) if node.pkt.keyframe => p,
            _ => continue,
        };

        let mut diff = range_pts - pts;
        if flags.contains(SeekFlags::FORWARD) {
            diff = -diff;
            if diff > 0.0 {
                continue;
            }
        }
        if let Some(best) = target_diff {
            if diff <= 0.0 {
                if best <= 0.0 && diff <= best {
                    continue;
                }
            }
            else if diff >= best {
                continue;
            }
        }
        target_diff = Some(diff);
        target = Some(id);
    }

    target
}

impl CacheState {
    /// Try to serve a seek to `pts` entirely from the cache. Returns false if
    /// no cached range covers the target, in which case the caller falls back
    /// to a fresh-range producer seek.
    ///
    /// Note about queued producer seeks: `seeking` can be true here, e.g.
    /// from a previous resume seek to the current range. If this ends up
    /// seeking into the current range (i.e. just changing the time offset),
    /// that seek needs to continue. Otherwise the queued seek is overridden
    /// by the caller anyway.
    pub(crate) fn try_seek_cache(&mut self, mut pts: f64, mut flags: SeekFlags) -> bool {
        if flags.contains(SeekFlags::FACTOR) || !self.seekable_cache {
            return false;
        }

        let mut range_idx = None;
        for (n, range) in self.ranges.iter().enumerate() {
            if let (Some(start), Some(end)) = (range.seek_start.get(), range.seek_end.get()) {
                debug!("cached range {}: {} <-> {}", n, start, end);
                if pts >= start && pts <= end {
                    debug!("...using this range for in-cache seek.");
                    range_idx = Some(n);
                    break;
                }
            }
        }

        let range_idx = match range_idx {
            Some(n) => n,
            None => return false,
        };

        // Adjust the seek target to the found video keyframe. Otherwise the
        // video will undershoot the seek target, while audio will be closer
        // to it, and the consumer would have to play video without audio for
        // the amount of undershoot. (With precise seeks it's better to skip
        // this, as it would only mean that more audio data than necessary
        // gets decoded.)
        if !flags.contains(SeekFlags::HR) {
            for (s, ds) in self.streams.iter().enumerate() {
                if ds.selected && ds.info.stream_type == StreamType::Video {
                    let queue = &self.ranges[range_idx].queues[s];
                    if let Some(target) = find_seek_target(&self.pool, queue, pts, flags) {
                        if let Some(target_pts) = self.pool[target].kf_seek_pts.get() {
                            debug!("adjust seek target {} -> {}", pts, target_pts);
                            // (find_seek_target() is assumed to return the
                            // same target for the video stream afterwards.)
                            pts = target_pts;
                            flags.remove(SeekFlags::FORWARD);
                        }
                    }
                    break;
                }
            }
        }

        for s in 0..self.streams.len() {
            let target =
                find_seek_target(&self.pool, &self.ranges[range_idx].queues[s], pts, flags);
            let base_ts = target.map(|id| {
                let pkt = &self.pool[id].pkt;
                pkt.pts.or(pkt.dts)
            });

            let ds = &mut self.streams[s];
            ds.reader_head = target;
            ds.skip_to_keyframe = target.is_none();
            if let Some(base) = base_ts {
                ds.base_ts = base;
            }

            self.recompute_buffers(s);
            self.fw_bytes += self.streams[s].fw_bytes;

            match target {
                Some(id) => {
                    let pkt = &self.pool[id].pkt;
                    debug!(
                        "seeking stream {} ({}) to packet {}/{}",
                        s,
                        self.streams[s].info.stream_type.name(),
                        pkt.pts,
                        pkt.dts
                    );
                }
                None => {
                    debug!(
                        "seeking stream {} ({}) to nothing",
                        s,
                        self.streams[s].info.stream_type.name()
                    );
                }
            }
        }

        // When seeking into another range, the producer has to be seeked
        // there as well, because reader and demuxing queue must be the same.
        if range_idx != self.ranges.len() - 1 {
            self.switch_current_range(range_idx, self.ranges.len() - 1);

            self.seeking = true;
            self.seek_flags = SeekFlags::HR;
            if let Some(end) = self.current_range().seek_end.get() {
                self.seek_pts = end - RESUME_SEEK_BACK_SECS;
            }

            // When new packets are appended, they could overlap with the
            // range due to producer seek imprecision, or because the queue
            // contains packets past the seek target. They must not be
            // appended twice; the refresh mode skips them until new packets
            // are found.
            for ds in &mut self.streams {
                ds.refreshing = true;
            }

            debug!("resuming demuxer to end of cached range");
        }

        true
    }

    /// Does some (but not all) things for switching to another range. The
    /// range at `new_idx` becomes current; the previous current range is at
    /// `old_idx`.
    pub(crate) fn switch_current_range(&mut self, new_idx: usize, old_idx: usize) {
        debug_assert_ne!(new_idx, old_idx);

        self.set_current_range(new_idx);
        // The rotation shifted every index above `new_idx` down by one.
        let old_idx = if old_idx > new_idx { old_idx - 1 } else { old_idx };

        // Remove packets which can't be used when seeking back to the old
        // range: everything up to and including its prune target.
        for s in 0..self.streams.len() {
            let CacheState { ranges, pool, total_bytes, .. } = self;
            let queue = &mut ranges[old_idx].queues[s];
            while queue.next_prune_target.is_some() {
                match queue.pop_front(pool) {
                    Some(pkt) => *total_bytes -= pkt.estimated_size(),
                    None => break,
                }
            }
        }

        // Exclude weird corner cases that break resuming.
        for s in 0..self.streams.len() {
            let ds = &self.streams[s];
            // This is needed to resume or join the range at all.
            if ds.selected && !(ds.global_correct_dts || ds.global_correct_pos) {
                debug!(
                    "discarding old range, due to stream {}: correct_dts={} correct_pos={}",
                    s, ds.global_correct_dts, ds.global_correct_pos
                );
                self.clear_range(old_idx);
                break;
            }
        }

        // Set up reading from (and writing to) the new range.
        for ds in &mut self.streams {
            ds.refreshing = false;
            ds.need_refresh = false;
            ds.eof = false;
        }

        // No point in keeping any junk (especially if the old current range
        // is empty).
        self.free_empty_ranges();
    }

    /// Create a new blank cache range and back up the old one. If the
    /// seekable cache is disabled, merely reset the current range to a blank
    /// state.
    pub(crate) fn switch_to_fresh_cache_range(&mut self) {
        if !self.seekable_cache {
            let cur = self.ranges.len() - 1;
            self.clear_range(cur);
            return;
        }

        let num_streams = self.streams.len();
        self.ranges.push(Range::new(num_streams));
        let new_idx = self.ranges.len() - 1;
        self.switch_current_range(new_idx, new_idx - 1);
    }
}
