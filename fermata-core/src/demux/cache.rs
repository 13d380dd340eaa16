// Fermata
// Copyright (c) 2025-2026 The Project Fermata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The cache's write side: the producer append path, incremental seek-range
//! maintenance, pruning under the back-buffer budget, and range joining.

use std::sync::Arc;

use log::{debug, trace, warn};

use crate::packet::Packet;
use crate::stream::StreamType;
use crate::units::{Ts, NON_MONOTONE_TOLERANCE_SECS};

use super::queue::NodeId;
use super::state::{pos_key, CacheState};
use super::RESUME_SEEK_BACK_SECS;

impl CacheState {
    /// Append a packet from the producer to the current range, or drop it.
    ///
    /// Dropped when: the stream is unselected, a refresh is still owed, a
    /// seek is queued, or the stream is refreshing and the packet precedes
    /// the resume cutoff.
    pub(crate) fn add_packet(&mut self, mut pkt: Packet) {
        let s = pkt.stream as usize;

        let mut first_forward = false;
        let node;
        {
            let CacheState {
                streams,
                ranges,
                pool,
                total_bytes,
                fw_bytes,
                seeking,
                eof,
                last_eof,
                ..
            } = self;

            let ds = &mut streams[s];
            let queue = &mut ranges.last_mut().expect("range list is never empty").queues[s];

            let drop = ds.refreshing;
            if ds.refreshing {
                // Resume reading once the old position was reached (i.e. we
                // start returning packets where we left off before the
                // refresh). If it's the same position, drop, but continue
                // normally next time.
                if queue.correct_dts {
                    ds.refreshing = pkt.dts.sort_key() < queue.last_dts.sort_key();
                }
                else if queue.correct_pos {
                    ds.refreshing = pos_key(pkt.pos) < pos_key(queue.last_pos);
                }
                else {
                    ds.refreshing = false; // should not happen
                    warn!("stream {}: demux refreshing failed", s);
                }
            }

            if !ds.selected || ds.need_refresh || *seeking || drop {
                return;
            }

            queue.correct_pos &= pkt.pos.is_some() && pos_key(pkt.pos) > pos_key(queue.last_pos);
            queue.correct_dts &= pkt.dts.is_set() && pkt.dts.sort_key() > queue.last_dts.sort_key();
            queue.last_pos = pkt.pos;
            queue.last_dts = pkt.dts;
            ds.global_correct_pos &= queue.correct_pos;
            ds.global_correct_dts &= queue.correct_dts;

            // For video, PTS determination is not trivial, but for other
            // media types distinguishing PTS and DTS is not useful.
            if ds.info.stream_type != StreamType::Video && !pkt.pts.is_set() {
                pkt.pts = pkt.dts;
            }

            let size = pkt.estimated_size();
            let keyframe = pkt.keyframe;

            let mut ts = pkt.dts.or(pkt.pts);
            if pkt.segmented {
                ts = ts.min(pkt.end);
            }

            node = queue.push_back(pool, pkt);

            // (Keep in mind that even if the reader went out of data, the
            // queue is not necessarily empty due to the backbuffer.)
            if ds.reader_head.is_none() && (!ds.skip_to_keyframe || keyframe) {
                ds.reader_head = Some(node);
                ds.skip_to_keyframe = false;
            }

            *total_bytes += size;
            if ds.reader_head.is_some() {
                ds.fw_packs += 1;
                ds.fw_bytes += size;
                *fw_bytes += size;
                // First packet after start or a possible underrun.
                first_forward = ds.reader_head == Some(node);
            }

            if !ds.ignore_eof {
                // Obviously not true anymore.
                ds.eof = false;
                *last_eof = false;
                *eof = false;
            }

            if let Some(t) = ts.get() {
                match queue.last_ts.get() {
                    Some(last) => {
                        if t > last || t + NON_MONOTONE_TOLERANCE_SECS < last {
                            queue.last_ts = ts;
                        }
                    }
                    None => queue.last_ts = ts,
                }
            }
            if !ds.base_ts.is_set() {
                ds.base_ts = queue.last_ts;
            }

            trace!(
                "append packet to {}: size={} pts={} dts={} pos={:?} [num={} size={}]",
                ds.info.stream_type.name(),
                size,
                pool[node].pkt.pts,
                pool[node].pkt.dts,
                pool[node].pkt.pos,
                ds.fw_packs,
                ds.fw_bytes
            );
        }

        self.adjust_seek_range_on_packet(s, Some(node));

        // Wake up if this was the first packet after start or an underrun.
        if first_forward {
            self.wake();
        }
    }

    /// Determine the seekable range when a packet is added. With `node` unset
    /// this acts as the EOF sentinel and closes the pending keyframe interval.
    ///
    /// This has to deal with a number of corner cases, such as producers
    /// starting output at non-keyframes. Can join seek ranges, which replaces
    /// the current range.
    pub(crate) fn adjust_seek_range_on_packet(&mut self, s: usize, node: Option<NodeId>) {
        if !self.seekable_cache {
            return;
        }

        let mut attempt_join = false;
        {
            let CacheState { streams, ranges, pool, .. } = self;
            let range = ranges.last_mut().expect("range list is never empty");

            let is_keyframe = node.map_or(true, |id| pool[id].pkt.keyframe);
            if is_keyframe {
                if let Some(latest) = range.queues[s].keyframe_latest {
                    let queue = &mut range.queues[s];
                    pool[latest].kf_seek_pts = queue.keyframe_pts;

                    let old_end = range.seek_end;
                    let queue = &mut range.queues[s];
                    if !queue.seek_start.is_set() {
                        queue.seek_start = queue.keyframe_pts;
                    }
                    if queue.keyframe_end_pts.is_set() {
                        queue.seek_end = queue.keyframe_end_pts;
                    }
                    range.update_seek_ranges(streams);
                    attempt_join = range.seek_end.sort_key() > old_end.sort_key();
                }
                let queue = &mut range.queues[s];
                queue.keyframe_latest = node;
                queue.keyframe_pts = Ts::NONE;
                queue.keyframe_end_pts = Ts::NONE;
            }

            if let Some(id) = node {
                let pkt = &pool[id].pkt;
                let mut ts = pkt.pts.or(pkt.dts);
                if pkt.segmented
                    && (ts.sort_key() < pkt.start.sort_key() || ts.sort_key() > pkt.end.sort_key())
                {
                    ts = Ts::NONE;
                }

                let queue = &mut range.queues[s];
                queue.keyframe_pts = queue.keyframe_pts.min(ts);
                queue.keyframe_end_pts = queue.keyframe_end_pts.max(ts);
            }
        }

        if attempt_join {
            self.attempt_range_joining();
        }
    }

    /// Check whether another cached range starts within the current one, and
    /// if so, try to collapse the two into a single continuous range.
    pub(crate) fn attempt_range_joining(&mut self) {
        let cur_idx = self.ranges.len() - 1;
        let cur_start = self.ranges[cur_idx].seek_start;
        let cur_end = self.ranges[cur_idx].seek_end;

        let mut next: Option<usize> = None;
        let mut next_dist = f64::INFINITY;

        for n in 0..cur_idx {
            let range = &self.ranges[n];
            if cur_start.sort_key() <= range.seek_start.sort_key() {
                // This uses ">" to get some non-0 overlap.
                let dist = cur_end.sort_key() - range.seek_start.sort_key();
                if dist > 0.0 && dist < next_dist {
                    next = Some(n);
                    next_dist = dist;
                }
            }
        }

        let next_idx = match next {
            Some(n) => n,
            None => return,
        };

        debug!(
            "going to join ranges {}-{} + {}-{}",
            cur_start, cur_end, self.ranges[next_idx].seek_start, self.ranges[next_idx].seek_end
        );

        if !self.drop_join_overlap(next_idx) {
            // Failed. Discard the entire secondary range; the current one
            // stays authoritative.
            self.clear_range(next_idx);
            self.free_empty_ranges();
            return;
        }

        // Actually join the ranges. Now that we think it will work, mutate
        // the data associated with the current range. The next range becomes
        // the current range.
        self.fw_bytes = 0;

        for s in 0..self.streams.len() {
            {
                let CacheState { streams, ranges, pool, .. } = self;
                let (front, back) = ranges.split_at_mut(next_idx + 1);
                let q2 = &mut front[next_idx].queues[s];
                let q1 = &mut back[back.len() - 1].queues[s];

                if let Some(q1_head) = q1.head {
                    let q1_tail = q1.tail.expect("nonempty queue has a tail");
                    pool[q1_tail].next = q2.head;
                    q2.head = Some(q1_head);
                    let single = match q2.head {
                        Some(h) => pool[h].next.is_none(),
                        None => true,
                    };
                    if single {
                        q2.tail = q2.head;
                    }
                }
                q2.next_prune_target = q1.next_prune_target;
                q2.seek_start = q1.seek_start;
                q2.correct_dts &= q1.correct_dts;
                q2.correct_pos &= q1.correct_pos;

                q1.head = None;
                q1.tail = None;
                q1.next_prune_target = None;
                q1.keyframe_latest = None;

                // For moving the producer position past the join.
                streams[s].refreshing = true;
            }

            self.recompute_buffers(s);
            self.fw_bytes += self.streams[s].fw_bytes;
        }

        self.ranges[next_idx].seek_start = cur_start;

        // Move the demuxing position to after the joined range.
        if let Some(end) = self.ranges[next_idx].seek_end.get() {
            self.seeking = true;
            self.seek_flags = super::SeekFlags::HR;
            self.seek_pts = end - RESUME_SEEK_BACK_SECS;
        }

        self.set_current_range(next_idx);
        let old = self.ranges.len() - 2;
        self.clear_range(old);
        self.free_empty_ranges();

        debug!("ranges joined!");
    }

    /// Walk the head of the joined-to range's queues, dropping packets that
    /// overlap the current range, until a packet exactly matching the current
    /// tail is found for every stream. Returns false if the ranges turn out
    /// to be unjoinable.
    fn drop_join_overlap(&mut self, next_idx: usize) -> bool {
        for s in 0..self.streams.len() {
            let CacheState { streams, ranges, pool, total_bytes, .. } = self;
            let ds = &streams[s];

            if !ds.global_correct_pos && !ds.global_correct_dts {
                warn!("stream {}: ranges unjoinable", s);
                return false;
            }

            let (front, back) = ranges.split_at_mut(next_idx + 1);
            let q2 = &mut front[next_idx].queues[s];
            let q1 = &back[back.len() - 1].queues[s];

            let end = q1.tail;
            // No packets yet means joining will work.
            let mut join_point_found = end.is_none();

            if let Some(end_id) = end {
                while let Some(head_id) = q2.head {
                    // A weird corner-case: the equivalent packet in the
                    // current queue would have to be found to keep the
                    // keyframe bookkeeping correct. Better just give up.
                    if Some(head_id) == q2.keyframe_latest {
                        warn!("stream {}: not enough keyframes for joining", s);
                        return false;
                    }

                    let (reached, equal) = {
                        let dp = &pool[head_id].pkt;
                        let end_pkt = &pool[end_id].pkt;
                        // (Check for ">" too, to avoid incorrect joining in
                        // weird corner cases, where the next range misses the
                        // end packet.)
                        let reached = (ds.global_correct_dts
                            && dp.dts.sort_key() >= end_pkt.dts.sort_key())
                            || (ds.global_correct_pos && pos_key(dp.pos) >= pos_key(end_pkt.pos));
                        let equal = dp.dts == end_pkt.dts
                            && dp.pos == end_pkt.pos
                            && dp.pts == end_pkt.pts
                            && dp.len() == end_pkt.len();
                        (reached, equal)
                    };

                    if reached {
                        // Some additional checks as an (imperfect) sanity
                        // check in case pos/dts are not actually comparable
                        // across the ranges (that is never verified).
                        if !equal {
                            warn!("stream {}: weird demuxer behavior", s);
                            return false;
                        }
                        if let Some(pkt) = q2.pop_front(pool) {
                            *total_bytes -= pkt.estimated_size();
                        }
                        join_point_found = true;
                        break;
                    }

                    if let Some(pkt) = q2.pop_front(pool) {
                        *total_bytes -= pkt.estimated_size();
                    }
                }
            }

            // For enabled non-sparse streams, always require an overlap
            // packet.
            if ds.eager && !join_point_found {
                warn!("stream {}: no join point found", s);
                return false;
            }
        }
        true
    }

    /// Evict old packets until the data behind the readers fits the
    /// back-buffer budget. Starts from the least recently used range.
    pub(crate) fn prune_old_packets(&mut self) {
        debug_assert!(!self.ranges.is_empty());

        // It's not clear what the ideal way to prune old packets is. For now,
        // the oldest packet runs are pruned, as long as the total cache
        // amount is too big.
        let max_bytes = if self.seekable_cache { self.max_bytes_bw } else { 0 };
        while self.total_bytes - self.fw_bytes > max_bytes {
            let mut earliest_ts = Ts::NONE;
            let mut earliest_stream = None;

            {
                let range = &self.ranges[0];
                for (s, queue) in range.queues.iter().enumerate() {
                    let ds = &self.streams[s];
                    let head = match queue.head {
                        Some(h) if Some(h) != ds.reader_head => h,
                        _ => continue,
                    };
                    let node = &self.pool[head];
                    let ts = node.kf_seek_pts;
                    // In obscure cases packets might have no timestamps set,
                    // in which case *something* still needs to be pruned.
                    // This fallback can starve one stream when timestamps are
                    // missing; accepted as-is.
                    let prune_always =
                        !self.seekable_cache || !ts.is_set() || !node.pkt.keyframe;
                    if prune_always
                        || earliest_stream.is_none()
                        || ts.sort_key() < earliest_ts.sort_key()
                    {
                        earliest_ts = ts;
                        earliest_stream = Some(s);
                        if prune_always {
                            break;
                        }
                    }
                }
            }

            let s = match earliest_stream {
                Some(s) => s,
                None => panic!("over budget but nothing to prune; buffered size accounting is off"),
            };

            // Prune all packets until the next keyframe or the reader head.
            // Keeping those packets would not help with seeking at all.
            // In addition, the new minimum seek target has to be found, which
            // in the worst case could be inside the forward buffer. The many
            // keyframe ranges without keyframes (audio packets) make this
            // harder, hence the cached prune target.
            if self.seekable_cache && self.ranges[0].queues[s].next_prune_target.is_none() {
                {
                    let CacheState { ranges, pool, .. } = self;
                    let queue = &mut ranges[0].queues[s];
                    // (Has to be *after* the head to drop at least 1 packet.)
                    let head = queue.head.expect("victim queue has a head");
                    queue.seek_start = Ts::NONE;
                    // Prune the entire queue if no new target is found.
                    queue.next_prune_target = queue.tail;
                    let mut prev = head;
                    while let Some(id) = pool[prev].next {
                        let node = &pool[id];
                        // The next seek start might lie above the lowest
                        // buffered packet, but it is still the only viable
                        // lowest seek target.
                        if node.pkt.keyframe && node.kf_seek_pts.is_set() {
                            queue.seek_start = node.kf_seek_pts;
                            queue.next_prune_target = Some(prev);
                            break;
                        }
                        prev = id;
                    }
                }
                self.update_seek_ranges_for(0);
            }

            loop {
                let CacheState { streams, ranges, pool, total_bytes, .. } = self;
                let queue = &mut ranges[0].queues[s];
                let head = match queue.head {
                    Some(h) if Some(h) != streams[s].reader_head => h,
                    _ => break,
                };
                let done = queue.next_prune_target == Some(head);
                if let Some(pkt) = queue.pop_front(pool) {
                    *total_bytes -= pkt.estimated_size();
                }
                if done {
                    break;
                }
            }

            let is_current = self.ranges.len() == 1;
            if !is_current && !self.ranges[0].seek_start.is_set() {
                self.free_empty_ranges();
            }
        }
    }

    /// Remove and return the next packet for the consumer, or `None` when
    /// drained. The returned packet is an independent copy with the consumer
    /// timestamp offset applied; the cached original stays owned by its
    /// queue until pruned.
    pub(crate) fn dequeue_packet(&mut self, s: usize) -> Option<Packet> {
        let info = Arc::clone(&self.streams[s].info);
        if let Some(picture) = &info.attached_picture {
            let ds = &mut self.streams[s];
            ds.eof = true;
            if ds.attached_picture_added {
                return None;
            }
            ds.attached_picture_added = true;
            let mut pkt = picture.clone();
            pkt.stream = s as u32;
            return Some(pkt);
        }

        let mut pkt;
        {
            let CacheState { streams, pool, fw_bytes, file_pos, ts_offset, .. } = self;
            let ds = &mut streams[s];

            let head = ds.reader_head?;
            let node = &pool[head];
            ds.reader_head = node.next;

            let bytes = node.pkt.estimated_size();
            ds.fw_packs -= 1;
            ds.fw_bytes -= bytes;
            *fw_bytes -= bytes;

            // The returned packet is owned by the consumer; the cached node
            // stays in place for the back-buffer.
            pkt = node.pkt.clone();

            let ts = pkt.dts.or(pkt.pts);
            if ts.is_set() {
                ds.base_ts = ts;
            }

            if pkt.keyframe {
                if let Some(t) = ts.get() {
                    // Update the bitrate only at keyframe points, because the
                    // (possibly) reordered packet timestamps are used instead
                    // of realtime.
                    match ds.last_br_ts.get() {
                        Some(br_ts) if t >= br_ts => {
                            let d = t - br_ts;
                            if d >= 0.5 {
                                // A window of at least 500ms for UI purposes.
                                ds.bitrate = Some(ds.last_br_bytes as f64 / d);
                                ds.last_br_ts = Ts::new(t);
                                ds.last_br_bytes = 0;
                            }
                        }
                        _ => {
                            ds.bitrate = None;
                            ds.last_br_ts = Ts::new(t);
                            ds.last_br_bytes = 0;
                        }
                    }
                }
            }
            ds.last_br_bytes += pkt.len();

            if let Some(pos) = pkt.pos {
                if file_pos.map_or(true, |fp| pos >= fp) {
                    *file_pos = Some(pos);
                }
            }

            pkt.pts = pkt.pts.add(*ts_offset);
            pkt.dts = pkt.dts.add(*ts_offset);
            pkt.start = pkt.start.add(*ts_offset);
            pkt.end = pkt.end.add(*ts_offset);
        }

        self.prune_old_packets();
        Some(pkt)
    }
}
