// Fermata
// Copyright (c) 2025-2026 The Project Fermata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `demux` module implements the concurrent, seekable packet cache that
//! sits between a [`PacketProducer`] and the consuming decoders.
//!
//! A [`Demuxer`] reads packets ahead on a background worker, holds them in
//! per-stream queues grouped into cached time ranges, serves blocking and
//! non-blocking packet reads, seeks within the cache without touching the
//! producer whenever possible, joins cached ranges when the producer catches
//! up to previously buffered data, and evicts old packets under a byte
//! budget.
//!
//! All shared state lives behind a single mutex with one condition variable;
//! the producer itself is a synchronous callee invoked with the state lock
//! released.

mod cache;
mod queue;
mod seek;
mod state;
mod worker;

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::thread;

use bitflags::bitflags;
use log::{debug, info, trace, warn};
use parking_lot::{Condvar, Mutex};

use crate::errors::{Error, Result};
use crate::io::SourceCacheInfo;
use crate::meta::Tags;
use crate::packet::Packet;
use crate::producer::{CheckLevel, PacketProducer, ProducerContext, SourceProps};
use crate::stream::{StreamInfo, StreamType};
use crate::units::Ts;

use self::state::CacheState;

/// How far behind a resume position the producer is seeked when demuxing
/// continues from the end of a cached range, or when a refresh seek rewinds
/// to pick up packets for a newly enabled stream.
pub const RESUME_SEEK_BACK_SECS: f64 = 1.0;

/// Maximum number of cached seek ranges reported by
/// [`Demuxer::reader_state`].
pub const MAX_SEEK_RANGES: usize = 10;

bitflags! {
    /// Flags qualifying a seek request.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct SeekFlags: u32 {
        /// Seek as precisely as possible to the requested timestamp; do not
        /// round to keyframe targets.
        const HR = 1 << 0;
        /// Prefer seek targets at or after the requested timestamp.
        const FORWARD = 1 << 1;
        /// Prefer seek targets at or before the requested timestamp.
        const BACKWARD = 1 << 2;
        /// The seek target is a fraction of the total duration instead of a
        /// timestamp.
        const FACTOR = 1 << 3;
    }
}

bitflags! {
    /// Consumer-visible change notifications, merged until collected by
    /// [`Demuxer::update`].
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct Events: u32 {
        /// Source-level properties changed (set once at open).
        const INIT = 1 << 0;
        /// Streams were added.
        const STREAMS = 1 << 1;
        /// Container, stream, or transport metadata changed.
        const METADATA = 1 << 2;
        /// All of the above.
        const ALL = Self::INIT.bits() | Self::STREAMS.bits() | Self::METADATA.bits();
    }
}

/// `CacheOptions` is the common set of tunables for the packet cache.
#[derive(Copy, Clone, Debug)]
pub struct CacheOptions {
    /// Readahead target in seconds: the worker keeps demuxing until every
    /// eager stream is buffered at least this far past the reading position.
    /// Default: `1.0`.
    pub min_secs: f64,
    /// Hard cap on the forward buffer in bytes. When reached without a
    /// stream demanding data, reading stops and drained streams report EOF.
    /// Default: 400 MiB.
    pub max_bytes: usize,
    /// Byte budget for data behind the reading position. Only meaningful
    /// with `seekable_cache`; without it the back-buffer is always pruned
    /// completely. Default: `0`.
    pub max_bytes_bw: usize,
    /// Keep demuxed data for in-cache seeking, maintaining seekable ranges
    /// over the buffered packets. Default: `false`.
    pub seekable_cache: bool,
    /// Readahead target used instead of `min_secs` when the source is
    /// network-backed or sits behind a transport cache. Default: `10.0`.
    pub min_secs_cache: f64,
    /// Claim seekability even if the producer says otherwise. Seeks may then
    /// be inexact. Default: `false`.
    pub force_seekable: bool,
}

impl Default for CacheOptions {
    fn default() -> Self {
        CacheOptions {
            min_secs: 1.0,
            max_bytes: 400 * 1024 * 1024,
            max_bytes_bw: 0,
            seekable_cache: false,
            min_secs_cache: 10.0,
            force_seekable: false,
        }
    }
}

/// Result of a non-blocking packet read.
#[derive(Debug)]
pub enum PollPacket {
    /// A packet was dequeued.
    Packet(Packet),
    /// No packet buffered yet; the worker keeps reading ahead and the wakeup
    /// callback fires when one arrives.
    Pending,
    /// The end of the stream was reached.
    Eof,
}

/// A cached, seekable time range, as reported to the consumer.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SeekRange {
    pub start: f64,
    pub end: f64,
}

/// Snapshot of the reader-facing cache state.
#[derive(Clone, Debug, Default)]
pub struct ReaderState {
    /// The producer reported the end of the source.
    pub eof: bool,
    /// An eager stream ran dry while more data is expected.
    pub underrun: bool,
    /// The worker has nothing to do.
    pub idle: bool,
    /// Highest timestamp returned to the consumer so far.
    pub ts_reader: Ts,
    /// Highest timestamp buffered ahead.
    pub ts_end: Ts,
    /// Seconds of data buffered ahead of the reading position.
    pub ts_duration: Option<f64>,
    /// Seekable cached ranges, at most [`MAX_SEEK_RANGES`], in
    /// least-recently-used order with the active range last.
    pub seek_ranges: Vec<SeekRange>,
}

/// Per-media-type bitrate measurements in bytes per second, summed over the
/// selected streams of each type.
#[derive(Copy, Clone, Debug, Default)]
pub struct Bitrates {
    pub video: Option<f64>,
    pub audio: Option<f64>,
    pub sub: Option<f64>,
}

/// The state shared between the consumer handle, the worker thread, and the
/// producer context.
pub(crate) struct Shared {
    pub state: Mutex<CacheState>,
    pub wakeup: Condvar,
    /// The producer is locked separately and only ever while the state lock
    /// is released, so that it can block on I/O without stalling readers.
    pub producer: Mutex<Box<dyn PacketProducer>>,
}

/// Consumer-visible copies of the published snapshots.
#[derive(Default)]
struct View {
    props: SourceProps,
    stream_tags: Vec<Tags>,
}

/// The packet cache and its consumer-facing interface.
///
/// Reading starts in the caller's thread; [`start_thread`](Demuxer::start_thread)
/// moves readahead to a background worker. Dropping the demuxer stops the
/// worker.
pub struct Demuxer {
    shared: Arc<Shared>,
    thread: Option<thread::JoinHandle<()>>,
    view: View,
}

impl Demuxer {
    /// Open a producer and build the cache around it. The producer declares
    /// its streams during the call. A failure is returned untouched so the
    /// caller can try the next format.
    pub fn open(
        producer: Box<dyn PacketProducer>,
        check: CheckLevel,
        options: &CacheOptions,
    ) -> Result<Demuxer> {
        let shared = Arc::new(Shared {
            state: Mutex::new(CacheState::new(options)),
            wakeup: Condvar::new(),
            producer: Mutex::new(producer),
        });

        {
            let mut producer = shared.producer.lock();

            if let Some(token) = producer.source_mut().and_then(|s| s.cancel()) {
                if token.is_canceled() {
                    return Err(Error::Canceled);
                }
            }

            debug!("trying producer (check level: {:?})", check);

            let ctx = ProducerContext::new(&shared);
            let mut props = producer.open(&ctx, check)?;

            match &props.filetype {
                Some(filetype) => info!("detected file format: {}", filetype),
                None => debug!("file format accepted"),
            }
            if !props.seekable {
                debug!("source is not seekable.");
            }
            if !props.seekable && options.force_seekable {
                warn!("not seekable, but enabling seeking on user request.");
                props.seekable = true;
                props.partially_seekable = true;
            }

            let base_filename = producer.source_mut().and_then(|s| s.base_filename());
            let has_cache = producer.source_mut().and_then(|s| s.cache_info()).is_some();
            let size = producer.source_mut().and_then(|s| s.byte_len());

            let mut state = shared.state.lock();
            if props.is_network || has_cache {
                state.min_secs = state.min_secs.max(options.min_secs_cache);
            }
            state.base_filename = base_filename;
            state.stream_size = size;
            state.props = props;
            state.events |= Events::ALL;
        }

        let mut demuxer = Demuxer { shared, thread: None, view: View::default() };
        {
            // Fill the initial view, but leave the accumulated events for
            // the consumer's first update() to collect.
            let mut state = demuxer.shared.state.lock();
            let events = state.events;
            Self::refresh_view(&mut demuxer.view, &mut state, events);
        }
        Ok(demuxer)
    }

    /// Start the worker thread, which reads ahead packets on its own.
    pub fn start_thread(&mut self) {
        {
            let mut state = self.shared.state.lock();
            if state.threading || self.thread.is_some() {
                return;
            }
            state.threading = true;
        }
        let shared = Arc::clone(&self.shared);
        let builder = thread::Builder::new().name("demux".into());
        match builder.spawn(move || worker::demux_thread(shared)) {
            Ok(handle) => self.thread = Some(handle),
            Err(err) => {
                warn!("could not start demuxer thread: {}", err);
                self.shared.state.lock().threading = false;
            }
        }
    }

    /// Stop the worker thread and return readahead to the caller's thread.
    pub fn stop_thread(&mut self) {
        if let Some(handle) = self.thread.take() {
            self.shared.state.lock().thread_terminate = true;
            self.shared.wakeup.notify_all();
            let _ = handle.join();
            let mut state = self.shared.state.lock();
            state.threading = false;
            state.thread_terminate = false;
        }
    }

    /// Install the callback invoked whenever a drained stream received a new
    /// packet, EOF was reached, or published state changed. The callback is
    /// invoked with internal locks held and must not call back into the
    /// demuxer.
    pub fn set_wakeup_callback(&self, cb: impl Fn() + Send + Sync + 'static) {
        self.shared.state.lock().wakeup_cb = Some(Arc::new(cb));
    }

    /// Set the timestamp offset added to every packet and reader-state
    /// timestamp returned to the consumer.
    pub fn set_ts_offset(&self, offset: f64) {
        self.shared.state.lock().ts_offset = offset;
    }

    /// Automatically select newly declared streams. Only usable without the
    /// worker thread.
    pub fn set_stream_autoselect(&self, autoselect: bool) {
        let mut state = self.shared.state.lock();
        assert!(!state.threading, "autoselect cannot be toggled with the demuxer thread running");
        state.autoselect = autoselect;
    }

    /// Number of declared streams. Only ever grows.
    pub fn num_streams(&self) -> usize {
        self.shared.state.lock().streams.len()
    }

    /// The declaration of a single stream.
    pub fn stream_info(&self, stream: u32) -> Option<Arc<StreamInfo>> {
        self.shared.state.lock().streams.get(stream as usize).map(|ds| Arc::clone(&ds.info))
    }

    /// Declarations of all streams, indexed by stream index.
    pub fn streams(&self) -> Vec<Arc<StreamInfo>> {
        self.shared.state.lock().streams.iter().map(|ds| Arc::clone(&ds.info)).collect()
    }

    /// Whether the consumer currently wants packets from the stream.
    pub fn stream_is_selected(&self, stream: u32) -> bool {
        self.shared.state.lock().streams.get(stream as usize).map_or(false, |ds| ds.selected)
    }

    /// The published tags of a stream, including later producer updates.
    /// Refreshed by [`update`](Demuxer::update).
    pub fn stream_tags(&self, stream: u32) -> Option<&Tags> {
        self.view.stream_tags.get(stream as usize)
    }

    /// Set whether the given stream should return packets.
    ///
    /// `ref_pts` is used only when enabling, as the approximate playback
    /// position the newly enabled stream should resume delivering packets
    /// from (in the worst case it is ignored).
    pub fn select_stream(&self, stream: u32, ref_pts: Ts, selected: bool) {
        let s = stream as usize;
        let mut guard = self.shared.state.lock();
        assert!(s < guard.streams.len(), "invalid stream index");

        // Don't flush buffers if the selection didn't change.
        if guard.streams[s].selected != selected {
            guard.update_stream_selection_state(s, selected, false);
            guard.tracks_switched = true;
            let need_refresh = selected && !guard.initial_state;
            guard.streams[s].need_refresh = need_refresh;
            if need_refresh {
                let offset = guard.ts_offset;
                guard.ref_pts = ref_pts.add(-offset);
            }
            if guard.threading {
                self.shared.wakeup.notify_all();
            }
            else {
                worker::execute_trackswitch(&self.shared, &mut guard);
            }
        }
    }

    /// Read a packet from the given stream. Blocks until a packet is
    /// available or the stream ends; returns `None` on EOF.
    pub fn read_packet(&self, stream: u32) -> Option<Packet> {
        let s = stream as usize;
        let mut guard = self.shared.state.lock();
        assert!(s < guard.streams.len(), "invalid stream index");

        if guard.streams[s].eager {
            trace!("reading packet for {}", guard.streams[s].info.stream_type.name());
            guard.eof = false; // force retry
            while guard.streams[s].selected && guard.streams[s].reader_head.is_none() {
                guard.reading = true;
                // The following code marks EOF if it can't continue.
                if guard.threading {
                    debug!(
                        "waiting for demux thread ({})",
                        guard.streams[s].info.stream_type.name()
                    );
                    self.shared.wakeup.notify_all();
                    self.shared.wakeup.wait(&mut guard);
                }
                else {
                    // A queued producer seek (e.g. a resume seek after a
                    // range join) has no worker to execute it here.
                    if guard.seeking {
                        worker::execute_seek(&self.shared, &mut guard);
                    }
                    worker::read_packet(&self.shared, &mut guard);
                }
                if guard.streams[s].eof {
                    break;
                }
            }
        }

        let pkt = guard.dequeue_packet(s);
        self.shared.wakeup.notify_all(); // possibly read more
        pkt
    }

    /// Poll the cache for a packet without blocking.
    ///
    /// Unlike [`read_packet`](Demuxer::read_packet), this always enables
    /// readahead for eager streams, and reports [`PollPacket::Pending`] while
    /// the worker is still fetching. Passive streams (e.g. interleaved
    /// subtitles) never report `Pending`, since their next packet could be
    /// minutes away; they report EOF until a packet happens to arrive.
    /// Without the worker thread this falls back to a blocking read.
    pub fn read_packet_async(&self, stream: u32) -> PollPacket {
        let s = stream as usize;
        let mut guard = self.shared.state.lock();
        assert!(s < guard.streams.len(), "invalid stream index");

        if !guard.threading {
            drop(guard);
            return match self.read_packet(stream) {
                Some(pkt) => PollPacket::Packet(pkt),
                None => PollPacket::Eof,
            };
        }

        let pkt = guard.dequeue_packet(s);
        if !guard.streams[s].eager {
            return match pkt {
                Some(pkt) => PollPacket::Packet(pkt),
                None => PollPacket::Eof,
            };
        }

        let result = match pkt {
            Some(pkt) => PollPacket::Packet(pkt),
            None if guard.streams[s].eof => PollPacket::Eof,
            None => PollPacket::Pending,
        };
        guard.reading = true; // enable readahead
        guard.eof = false; // force retry
        drop(guard);
        self.shared.wakeup.notify_all(); // possibly read more
        result
    }

    /// Return whether a packet is buffered for the stream. Never blocks,
    /// never forces any reads.
    pub fn has_packet(&self, stream: u32) -> bool {
        let state = self.shared.state.lock();
        state.streams.get(stream as usize).map_or(false, |ds| ds.reader_head.is_some())
    }

    /// Read and return a packet from whichever stream has one. `None` means
    /// EOF. Does not work with the worker thread running.
    pub fn read_any_packet(&self) -> Option<Packet> {
        let mut guard = self.shared.state.lock();
        assert!(!guard.threading, "read_any_packet does not work with threading");
        loop {
            for s in 0..guard.streams.len() {
                guard.reading = true; // force the readahead decision to read
                if let Some(pkt) = guard.dequeue_packet(s) {
                    return Some(pkt);
                }
            }
            if guard.seeking {
                worker::execute_seek(&self.shared, &mut guard);
            }
            let progress = worker::read_packet(&self.shared, &mut guard);
            if !progress || guard.eof {
                return None;
            }
        }
    }

    /// Queue a seek to `pts`. Serves the seek from the cache when a cached
    /// range covers the target; otherwise the producer is repositioned.
    /// Returns false if the source cannot seek.
    pub fn seek(&self, pts: f64, flags: SeekFlags) -> bool {
        let mut guard = self.shared.state.lock();

        if !guard.props.seekable {
            warn!("cannot seek in this source.");
            return false;
        }

        debug!("queuing seek to {}{}", pts, if guard.seeking { " (cascade)" } else { "" });

        let mut pts = pts;
        if !flags.contains(SeekFlags::FACTOR) {
            pts -= guard.ts_offset;
        }

        guard.clear_reader_state();

        guard.eof = false;
        guard.last_eof = false;
        guard.idle = true;
        guard.reading = false;

        if !guard.try_seek_cache(pts, flags) {
            guard.switch_to_fresh_cache_range();

            guard.seeking = true;
            guard.seek_flags = flags;
            guard.seek_pts = pts;
        }

        if !guard.threading && guard.seeking {
            worker::execute_seek(&self.shared, &mut guard);
        }

        drop(guard);
        self.shared.wakeup.notify_all();
        true
    }

    /// Drop all cached packets and reset all reader state. Stream selections
    /// and the producer position are unaffected.
    pub fn flush(&self) {
        let mut guard = self.shared.state.lock();
        guard.clear_reader_state();
        for n in 0..guard.ranges.len() {
            guard.clear_range(n);
        }
        guard.free_empty_ranges();
        debug_assert_eq!(guard.total_bytes, 0);
    }

    /// Copy the latest published source properties and metadata into the
    /// consumer's view, returning the change notifications accumulated since
    /// the previous call.
    pub fn update(&mut self) -> Events {
        {
            let threading = self.shared.state.lock().threading;
            if !threading {
                // Without a worker, telemetry is refreshed on demand.
                let mut producer = self.shared.producer.lock();
                worker::update_cache(&self.shared, &mut **producer);
            }
        }

        let mut state = self.shared.state.lock();
        let events = state.events;
        state.events = Events::empty();
        Self::refresh_view(&mut self.view, &mut state, events);
        events
    }

    /// Copy the publication snapshot into the consumer's view.
    fn refresh_view(view: &mut View, state: &mut CacheState, events: Events) {
        view.props = state.props.clone();

        while view.stream_tags.len() < state.streams.len() {
            let s = view.stream_tags.len();
            view.stream_tags.push(state.streams[s].info.tags.clone());
        }
        for s in 0..state.stream_tag_updates.len() {
            if let Some(tags) = state.stream_tag_updates[s].take() {
                view.stream_tags[s] = tags;
            }
        }

        if events.contains(Events::METADATA) {
            // Audio-only files often carry their metadata on the single
            // track instead of the container (especially OGG).
            if state.streams.len() == 1 {
                let tags = view.stream_tags[0].clone();
                view.props.metadata.merge(&tags);
            }
            if let Some(meta) = &state.source_metadata {
                view.props.metadata.merge(meta);
            }
        }
    }

    /// The source properties as of the last [`update`](Demuxer::update).
    pub fn info(&self) -> &SourceProps {
        &self.view.props
    }

    /// Snapshot of the reader-facing cache state: buffered duration,
    /// underrun/idle/EOF flags, and the seekable cached ranges.
    pub fn reader_state(&self) -> ReaderState {
        let state = self.shared.state.lock();

        let mut r = ReaderState { eof: state.last_eof, ..ReaderState::default() };

        let mut any_packets = false;
        for (s, ds) in state.streams.iter().enumerate() {
            let queue = &state.current_range().queues[s];
            if ds.eager && !(queue.head.is_none() && ds.eof) && !ds.ignore_eof {
                r.underrun |= ds.reader_head.is_none() && !ds.eof;
                r.ts_reader = r.ts_reader.max(ds.base_ts);
                r.ts_end = r.ts_end.max(queue.last_ts);
                any_packets |= queue.head.is_some();
            }
        }
        r.idle = (state.idle && !r.underrun) || r.eof;
        r.underrun &= !r.idle;
        r.ts_reader = r.ts_reader.add(state.ts_offset);
        r.ts_end = r.ts_end.add(state.ts_offset);
        if let (Some(reader), Some(end)) = (r.ts_reader.get(), r.ts_end.get()) {
            if reader <= end {
                r.ts_duration = Some(end - reader);
            }
        }
        if state.seeking || !any_packets {
            r.ts_duration = Some(0.0);
        }

        for range in state.ranges.iter() {
            if let (Some(start), Some(end)) = (range.seek_start.get(), range.seek_end.get()) {
                if r.seek_ranges.len() < MAX_SEEK_RANGES {
                    r.seek_ranges.push(SeekRange {
                        start: start + state.ts_offset,
                        end: end + state.ts_offset,
                    });
                }
            }
        }

        r
    }

    /// Bitrate measurements for the selected streams.
    pub fn bitrates(&self) -> Bitrates {
        let state = self.shared.state.lock();
        let mut rates = Bitrates::default();
        for ds in &state.streams {
            let bitrate = match (ds.selected, ds.bitrate) {
                (true, Some(br)) => br,
                _ => continue,
            };
            let slot = match ds.info.stream_type {
                StreamType::Video => &mut rates.video,
                StreamType::Audio => &mut rates.audio,
                StreamType::Sub => &mut rates.sub,
                StreamType::Unknown => continue,
            };
            *slot = Some(slot.unwrap_or(0.0) + bitrate);
        }
        rates
    }

    /// The consumer-visible byte position in the source, advanced as packets
    /// are read.
    pub fn file_pos(&self) -> Option<u64> {
        self.shared.state.lock().file_pos
    }

    /// Total size of the source in bytes, if known. Served from cached
    /// telemetry; the worker refreshes it in the background.
    pub fn stream_size(&self) -> Option<u64> {
        self.poke_cache_update();
        self.shared.state.lock().stream_size
    }

    /// State of the transport-level cache in front of the source, if any.
    pub fn source_cache_info(&self) -> Option<SourceCacheInfo> {
        self.poke_cache_update();
        self.shared.state.lock().source_cache_info
    }

    /// The base filename of the source, if it has one.
    pub fn base_filename(&self) -> Option<String> {
        self.shared.state.lock().base_filename.clone()
    }

    /// Run a closure with exclusive access to the producer, for queries the
    /// cache does not answer itself. With the worker thread running, the
    /// closure is handed over and executed there; the call blocks until it
    /// completes.
    pub fn with_producer<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&mut dyn PacketProducer) -> R + Send + 'static,
        R: Send + 'static,
    {
        let mut guard = self.shared.state.lock();
        if !guard.threading {
            drop(guard);
            let mut producer = self.shared.producer.lock();
            return f(&mut **producer);
        }

        debug!("blocking on demuxer thread");

        let slot: Arc<Mutex<Option<R>>> = Arc::new(Mutex::new(None));
        let producer_slot = Arc::clone(&slot);

        // The handoff slot is single-entry; wait for a previous deferred call
        // to finish first.
        while guard.run_fn.is_some() {
            self.shared.wakeup.wait(&mut guard);
        }
        guard.run_fn = Some(Box::new(move |producer| {
            *producer_slot.lock() = Some(f(producer));
        }));
        self.shared.wakeup.notify_all();

        loop {
            if let Some(result) = slot.lock().take() {
                return result;
            }
            self.shared.wakeup.wait(&mut guard);
        }
    }

    /// If the producer consumed the entire source at open, let it release
    /// the byte stream. Only usable without the worker thread.
    pub fn maybe_replace_stream(&self) {
        {
            let state = self.shared.state.lock();
            assert!(!state.threading, "stream replacement requires threading to be stopped");
            if !state.props.fully_read {
                return;
            }
        }
        debug!("assuming producer read all data; releasing the byte stream");
        self.shared.producer.lock().replace_stream();
    }

    /// Wake the worker to refresh cached telemetry, if it is running and the
    /// source has a transport cache worth polling.
    fn poke_cache_update(&self) {
        let mut state = self.shared.state.lock();
        if state.threading && state.source_cache_info.is_some() {
            state.force_cache_update = true;
            drop(state);
            self.shared.wakeup.notify_all();
        }
    }

    #[cfg(test)]
    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&CacheState) -> R) -> R {
        f(&self.shared.state.lock())
    }
}

impl Drop for Demuxer {
    fn drop(&mut self) {
        self.stop_thread();
    }
}
