// Fermata
// Copyright (c) 2025-2026 The Project Fermata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The background worker that drives the producer: readahead pumping, queued
//! seeks, track-switch notifications, and source telemetry.

use std::sync::Arc;

use log::{debug, trace, warn};
use parking_lot::MutexGuard;

use crate::producer::{PacketProducer, ProducerContext};
use crate::stream::StreamType;

use super::state::CacheState;
use super::{Events, SeekFlags, Shared, RESUME_SEEK_BACK_SECS};

/// The worker loop. Runs until told to terminate; one pass per wakeup.
pub(crate) fn demux_thread(shared: Arc<Shared>) {
    let mut guard = shared.state.lock();
    while !guard.thread_terminate {
        if let Some(run_fn) = guard.run_fn.take() {
            MutexGuard::unlocked(&mut guard, || {
                let mut producer = shared.producer.lock();
                run_fn(&mut **producer);
            });
            shared.wakeup.notify_all();
            continue;
        }
        if guard.tracks_switched {
            execute_trackswitch(&shared, &mut guard);
            continue;
        }
        if guard.seeking {
            execute_seek(&shared, &mut guard);
            continue;
        }
        if !guard.eof {
            // read_packet releases the lock while working, so recheck all
            // conditions if it made progress.
            if read_packet(&shared, &mut guard) {
                continue;
            }
        }
        if guard.force_cache_update {
            MutexGuard::unlocked(&mut guard, || {
                let mut producer = shared.producer.lock();
                update_cache(&shared, &mut **producer);
            });
            guard.force_cache_update = false;
            continue;
        }
        shared.wakeup.notify_all();
        shared.wakeup.wait(&mut guard);
    }
}

/// Tell the producer about changed stream selections, and hint the source
/// about whether readahead is still wanted.
pub(crate) fn execute_trackswitch(shared: &Shared, guard: &mut MutexGuard<'_, CacheState>) {
    guard.tracks_switched = false;

    let any_selected = guard.streams.iter().any(|ds| ds.selected);

    MutexGuard::unlocked(guard, || {
        let mut producer = shared.producer.lock();
        producer.notify_switched_tracks();
        if let Some(source) = producer.source_mut() {
            source.set_readahead(any_selected);
        }
    });
}

/// Execute the queued producer-level seek.
pub(crate) fn execute_seek(shared: &Shared, guard: &mut MutexGuard<'_, CacheState>) {
    let flags = guard.seek_flags;
    let pts = guard.seek_pts;
    guard.seeking = false;
    guard.initial_state = false;

    MutexGuard::unlocked(guard, || {
        debug!("execute seek (to {} flags {:?})", pts, flags);
        let mut producer = shared.producer.lock();
        if let Err(err) = producer.seek(pts, flags) {
            warn!("producer seek failed: {}", err);
        }
        debug!("seek done");
    });
}

/// Decide whether the producer should be driven, and if so, pump it once.
/// Returns true if there was progress (the lock was released temporarily).
pub(crate) fn read_packet(shared: &Shared, guard: &mut MutexGuard<'_, CacheState>) -> bool {
    let state = &mut **guard;
    state.eof = false;
    state.idle = true;

    if !state.reading {
        return false;
    }

    // A new packet is needed if any stream explicitly wants one, or if all
    // queues are below the readahead minimum. Also includes safeguards
    // against packet queue overflow.
    let mut read_more = false;
    let mut prefetch_more = false;
    for s in 0..state.streams.len() {
        let last_ts = state.current_range().queues[s].last_ts;
        let ds = &state.streams[s];
        read_more |= (ds.eager && ds.reader_head.is_none()) || ds.refreshing;
        if ds.eager && state.min_secs > 0.0 {
            if let (Some(last), Some(base)) = (last_ts.get(), ds.base_ts.get()) {
                if last >= base {
                    prefetch_more |= last - base < state.min_secs;
                }
            }
        }
    }
    trace!("bytes={}, read_more={} prefetch_more={}", state.fw_bytes, read_more, prefetch_more);

    if state.fw_bytes >= state.max_bytes {
        if !read_more {
            return false;
        }
        if !state.warned_queue_overflow {
            state.warned_queue_overflow = true;
            warn!("too many packets in the demuxer packet queues:");
            for (s, ds) in state.streams.iter().enumerate() {
                if ds.selected {
                    warn!(
                        "  {}/{}: {} packets, {} bytes{}",
                        ds.info.stream_type.name(),
                        s,
                        ds.fw_packs,
                        ds.fw_bytes,
                        if ds.eager { "" } else { " (lazy)" }
                    );
                }
            }
        }
        let mut woke = false;
        for ds in &mut state.streams {
            let eof = ds.reader_head.is_none();
            if eof && !ds.eof {
                woke = true;
            }
            ds.eof |= eof;
        }
        if woke {
            state.wake();
            shared.wakeup.notify_all();
        }
        return false;
    }

    let refresh_seek_pts = get_refresh_seek_pts(state);

    if !read_more && refresh_seek_pts.is_none() && !prefetch_more {
        return false;
    }

    state.idle = false;
    state.initial_state = false;

    // Actually read a packet. Drop the lock while doing so, because waiting
    // for disk or network I/O can take time.
    let mut eof = true;
    MutexGuard::unlocked(guard, || {
        let mut producer = shared.producer.lock();

        if let Some(pts) = refresh_seek_pts {
            debug!("refresh seek to {}", pts);
            if let Err(err) = producer.seek(pts, SeekFlags::HR) {
                warn!("refresh seek failed: {}", err);
            }
        }

        let canceled = producer
            .source_mut()
            .and_then(|source| source.cancel())
            .map_or(false, |token| token.is_canceled());
        if !canceled {
            let ctx = ProducerContext::new(shared);
            eof = match producer.fill_buffer(&ctx) {
                Ok(progress) => !progress,
                Err(err) => {
                    warn!("producer read error: {}", err);
                    true
                }
            };
        }

        update_cache(shared, &mut **producer);
    });

    let state = &mut **guard;
    if !state.seeking {
        if eof {
            for s in 0..state.streams.len() {
                if !state.streams[s].eof {
                    // Close the pending keyframe interval so the cached data
                    // becomes seekable up to its end.
                    state.adjust_seek_range_on_packet(s, None);
                }
                state.streams[s].eof = true;
            }
            // If EOF was already flagged, don't wake up again (avoids a
            // wakeup loop).
            if !state.last_eof {
                state.wake();
                shared.wakeup.notify_all();
                debug!("EOF reached.");
            }
        }
        state.eof = eof;
        state.last_eof = eof;
    }
    true
}

/// Work out whether the producer has to be rewound to pick up packets for a
/// newly enabled stream, without disturbing the decoding position of the
/// streams that stayed selected. Returns the producer-level seek target, or
/// `None` if no seek should happen.
fn get_refresh_seek_pts(state: &mut CacheState) -> Option<f64> {
    let mut start_ts = state.ref_pts;
    let mut needed = false;
    let mut normal_seek = true;
    let mut refresh_possible = true;

    for s in 0..state.streams.len() {
        let (correct_dts, correct_pos) = {
            let queue = &state.current_range().queues[s];
            (queue.correct_dts, queue.correct_pos)
        };

        let ds = &mut state.streams[s];
        if !ds.selected {
            continue;
        }

        if matches!(ds.info.stream_type, StreamType::Video | StreamType::Audio) {
            start_ts = start_ts.min(ds.base_ts);
        }

        needed |= ds.need_refresh;
        // If there were no other streams selected, a normal seek suffices.
        normal_seek &= ds.need_refresh;
        ds.need_refresh = false;

        refresh_possible &= correct_dts || correct_pos;
    }

    if !needed || !state.props.seekable || state.props.partially_seekable {
        return None;
    }
    let start = start_ts.get()?;

    if normal_seek {
        return Some(start);
    }

    if !refresh_possible {
        debug!("can't issue refresh seek");
        return None;
    }

    for s in 0..state.streams.len() {
        let has_packets = {
            let queue = &state.current_range().queues[s];
            queue.last_pos.is_some() || queue.last_dts.is_set()
        };
        // Streams which didn't have any packets yet will return all packets;
        // the others resume from the last observed position.
        if has_packets {
            let ds = &mut state.streams[s];
            ds.refreshing |= ds.selected;
        }
    }

    // Seek back to the consumer's current position, with a small offset.
    Some(start - RESUME_SEEK_BACK_SECS)
}

/// Refresh the cached source telemetry. Must be called without the state lock
/// held; the source queries can block.
pub(crate) fn update_cache(shared: &Shared, producer: &mut dyn PacketProducer) {
    let (size, cache_info, metadata) = match producer.source_mut() {
        Some(source) => (source.byte_len(), source.cache_info(), source.metadata()),
        None => (None, None, None),
    };

    let mut state = shared.state.lock();
    state.stream_size = size;
    state.source_cache_info = cache_info;
    if let Some(tags) = metadata {
        state.source_metadata = Some(tags);
        state.events |= Events::METADATA;
    }
}
