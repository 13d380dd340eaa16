// Fermata
// Copyright (c) 2025-2026 The Project Fermata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Scenario tests for the packet cache, driven by a scripted producer that
//! emits a deterministic packet grid and records every call made into it.

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::errors::Result;
use crate::io::{CancelToken, MediaSource};
use crate::meta::Tags;
use crate::packet::Packet;
use crate::producer::{CheckLevel, PacketProducer, ProducerContext, SourceProps};
use crate::stream::{StreamInfo, StreamType};
use crate::units::Ts;

use super::{CacheOptions, Demuxer, Events, PollPacket, SeekFlags};

#[derive(Clone, Debug, PartialEq)]
enum Call {
    Seek(f64),
    SwitchedTracks,
}

type CallLog = Arc<Mutex<Vec<Call>>>;

fn seeks(calls: &CallLog) -> Vec<f64> {
    calls
        .lock()
        .iter()
        .filter_map(|c| match c {
            Call::Seek(pts) => Some(*pts),
            _ => None,
        })
        .collect()
}

/// One synthetic stream: packet `i` has pts `i * dt`, a keyframe every
/// `kf_interval` packets, a fixed payload size, and a per-stream monotone
/// byte position. The grid is a pure function of the packet index, so
/// packets re-emitted after a seek are bit-identical to the first pass.
struct FakeStream {
    info: StreamInfo,
    dt: f64,
    kf_interval: u64,
    payload: usize,
    count: u64,
    with_dts: bool,
    dts_jitter_at: Option<u64>,
    id: u32,
    next: u64,
}

impl FakeStream {
    fn new(
        stream_type: StreamType,
        dt: f64,
        kf_interval: u64,
        payload: usize,
        count: u64,
    ) -> FakeStream {
        FakeStream {
            info: StreamInfo::new(stream_type),
            dt,
            kf_interval,
            payload,
            count,
            with_dts: true,
            dts_jitter_at: None,
            id: 0,
            next: 0,
        }
    }
}

fn video_stream(count: u64) -> FakeStream {
    FakeStream::new(StreamType::Video, 0.1, 5, 100, count)
}

fn audio_stream(count: u64) -> FakeStream {
    FakeStream::new(StreamType::Audio, 0.05, 1, 50, count)
}

fn sub_stream(count: u64) -> FakeStream {
    FakeStream::new(StreamType::Sub, 1.0, 1, 20, count)
}

/// A byte source that exists only to carry a cancellation token.
struct TestSource {
    token: CancelToken,
}

impl std::io::Read for TestSource {
    fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
        Ok(0)
    }
}

impl std::io::Seek for TestSource {
    fn seek(&mut self, _pos: std::io::SeekFrom) -> std::io::Result<u64> {
        Ok(0)
    }
}

impl MediaSource for TestSource {
    fn is_seekable(&self) -> bool {
        true
    }

    fn byte_len(&self) -> Option<u64> {
        Some(1 << 20)
    }

    fn cancel(&self) -> Option<CancelToken> {
        Some(self.token.clone())
    }
}

struct FakeProducer {
    streams: Vec<FakeStream>,
    calls: CallLog,
    seekable: bool,
    fills: u64,
    metadata_at: Option<u64>,
    source: Option<TestSource>,
}

impl FakeProducer {
    fn new(streams: Vec<FakeStream>, calls: CallLog) -> FakeProducer {
        FakeProducer { streams, calls, seekable: true, fills: 0, metadata_at: None, source: None }
    }
}

impl PacketProducer for FakeProducer {
    fn open(&mut self, ctx: &ProducerContext<'_>, _check: CheckLevel) -> Result<SourceProps> {
        let mut duration: f64 = 0.0;
        for stream in &mut self.streams {
            stream.id = ctx.add_stream(stream.info.clone());
            duration = duration.max(stream.count as f64 * stream.dt);
        }
        Ok(SourceProps {
            seekable: self.seekable,
            duration: Ts::new(duration),
            filetype: Some("packet grid".to_string()),
            ..SourceProps::default()
        })
    }

    fn fill_buffer(&mut self, ctx: &ProducerContext<'_>) -> Result<bool> {
        self.fills += 1;
        if self.metadata_at == Some(self.fills) {
            let mut tags = Tags::new();
            tags.set("icy-title", "midstream");
            ctx.set_metadata(tags);
        }

        let mut best: Option<usize> = None;
        for (i, stream) in self.streams.iter().enumerate() {
            if stream.next >= stream.count {
                continue;
            }
            let ts = stream.next as f64 * stream.dt;
            let better = match best {
                None => true,
                Some(b) => ts < self.streams[b].next as f64 * self.streams[b].dt,
            };
            if better {
                best = Some(i);
            }
        }
        let i = match best {
            Some(i) => i,
            None => return Ok(false),
        };

        let stream = &mut self.streams[i];
        let idx = stream.next;
        stream.next += 1;

        let ts = idx as f64 * stream.dt;
        let mut pkt = Packet::new(stream.id, vec![(idx & 0xff) as u8; stream.payload]);
        pkt.pts = Ts::new(ts);
        if stream.with_dts {
            let mut dts = ts;
            if stream.dts_jitter_at == Some(idx) {
                dts -= 0.35;
            }
            pkt.dts = Ts::new(dts);
        }
        pkt.pos = Some(idx * 1000 + stream.id as u64);
        pkt.keyframe = idx % stream.kf_interval == 0;

        ctx.add_packet(pkt);
        Ok(true)
    }

    fn seek(&mut self, pts: f64, _flags: SeekFlags) -> Result<()> {
        self.calls.lock().push(Call::Seek(pts));
        for stream in &mut self.streams {
            let idx = if pts <= 0.0 { 0 } else { (pts / stream.dt).floor() as u64 };
            let idx = idx.min(stream.count.saturating_sub(1));
            stream.next = idx - idx % stream.kf_interval;
        }
        Ok(())
    }

    fn notify_switched_tracks(&mut self) {
        self.calls.lock().push(Call::SwitchedTracks);
    }

    fn source_mut(&mut self) -> Option<&mut dyn MediaSource> {
        match &mut self.source {
            Some(source) => Some(source),
            None => None,
        }
    }
}

fn open_cache(streams: Vec<FakeStream>, options: &CacheOptions) -> (Demuxer, CallLog) {
    let calls: CallLog = Arc::new(Mutex::new(Vec::new()));
    let producer = FakeProducer::new(streams, Arc::clone(&calls));
    let demuxer = Demuxer::open(Box::new(producer), CheckLevel::Normal, options).expect("open");
    (demuxer, calls)
}

fn pts_of(pkt: &Packet) -> f64 {
    pkt.pts.get().expect("packet has a pts")
}

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-6
}

/// Read from `stream` until a packet with pts >= `target` is returned;
/// returns that packet's pts.
fn read_until(demuxer: &Demuxer, stream: u32, target: f64) -> f64 {
    loop {
        let pkt = demuxer.read_packet(stream).expect("unexpected EOF");
        let pts = pts_of(&pkt);
        if pts >= target - 1e-9 {
            return pts;
        }
    }
}

#[test]
fn verify_append_then_drain_keeps_order_and_applies_ts_offset() {
    let (demuxer, _calls) = open_cache(vec![video_stream(40)], &CacheOptions::default());
    demuxer.select_stream(0, Ts::NONE, true);
    demuxer.set_ts_offset(5.0);

    let mut n = 0u64;
    while let Some(pkt) = demuxer.read_packet(0) {
        assert!(approx(pts_of(&pkt), n as f64 * 0.1 + 5.0));
        assert!(approx(pkt.dts.get().unwrap(), n as f64 * 0.1 + 5.0));
        // Unset timestamps stay unset under the offset.
        assert_eq!(pkt.start, Ts::NONE);
        assert_eq!(pkt.end, Ts::NONE);
        assert_eq!(pkt.buf()[0], (n & 0xff) as u8);
        n += 1;
    }
    assert_eq!(n, 40);

    demuxer.with_state(|state| state.check_consistency());
    assert!(demuxer.reader_state().eof);
}

#[test]
fn verify_random_packets_roundtrip() {
    struct ListProducer {
        packets: Vec<Packet>,
        next: usize,
    }

    impl PacketProducer for ListProducer {
        fn open(&mut self, ctx: &ProducerContext<'_>, _check: CheckLevel) -> Result<SourceProps> {
            ctx.add_stream(StreamInfo::new(StreamType::Audio));
            Ok(SourceProps::default())
        }

        fn fill_buffer(&mut self, ctx: &ProducerContext<'_>) -> Result<bool> {
            match self.packets.get(self.next) {
                Some(pkt) => {
                    self.next += 1;
                    ctx.add_packet(pkt.clone());
                    Ok(true)
                }
                None => Ok(false),
            }
        }

        fn seek(&mut self, _pts: f64, _flags: SeekFlags) -> Result<()> {
            Ok(())
        }
    }

    let mut rng = SmallRng::seed_from_u64(7);
    let mut packets = Vec::new();
    let mut ts = 0.0;
    for _ in 0..200 {
        let len = rng.random_range(1..=300);
        let mut data = vec![0u8; len];
        rng.fill(&mut data[..]);
        let mut pkt = Packet::new(0, data);
        ts += rng.random_range(0.001..0.2);
        pkt.pts = Ts::new(ts);
        pkt.dts = Ts::new(ts);
        pkt.keyframe = rng.random_bool(0.2);
        packets.push(pkt);
    }

    let producer = ListProducer { packets: packets.clone(), next: 0 };
    let demuxer =
        Demuxer::open(Box::new(producer), CheckLevel::Normal, &CacheOptions::default()).unwrap();
    demuxer.select_stream(0, Ts::NONE, true);

    let mut drained = Vec::new();
    while let Some(pkt) = demuxer.read_packet(0) {
        drained.push(pkt);
    }

    assert_eq!(drained.len(), packets.len());
    for (a, b) in packets.iter().zip(&drained) {
        assert_eq!(a.buf(), b.buf());
        assert_eq!(a.pts, b.pts);
    }
}

#[test]
fn verify_overflow_cutoff_signals_eof_to_drained_streams() {
    let mut video = video_stream(1000);
    video.payload = 2000;
    let mut audio = audio_stream(100);
    audio.dt = 10.0;

    let options = CacheOptions { max_bytes: 8000, ..CacheOptions::default() };
    let (demuxer, calls) = open_cache(vec![video, audio], &options);
    demuxer.select_stream(0, Ts::NONE, true);
    demuxer.select_stream(1, Ts::NONE, true);

    // The first audio packet arrives normally.
    let first = demuxer.read_packet(1).expect("first audio packet");
    assert!(approx(pts_of(&first), 0.0));

    // The next one is 10 seconds ahead; the forward buffer fills with video
    // long before that and the cache must cut off, reporting EOF on the
    // drained audio stream even though the producer has plenty left.
    assert!(demuxer.read_packet(1).is_none());

    demuxer.with_state(|state| {
        state.check_consistency();
        assert!(state.warned_queue_overflow);
        assert!(state.streams[1].eof);
        assert!(!state.last_eof);
        assert!(state.fw_bytes <= 8000 + 2500);
    });
    assert!(seeks(&calls).is_empty());

    // Video is unaffected and keeps flowing.
    let pkt = demuxer.read_packet(0).expect("video packet");
    assert!(approx(pts_of(&pkt), 0.0));
}

#[test]
fn verify_seek_inside_cached_range_avoids_the_producer() {
    let options = CacheOptions {
        seekable_cache: true,
        max_bytes_bw: 1 << 30,
        ..CacheOptions::default()
    };
    let (demuxer, calls) = open_cache(vec![video_stream(2000), audio_stream(4000)], &options);
    demuxer.select_stream(0, Ts::NONE, true);
    demuxer.select_stream(1, Ts::NONE, true);

    read_until(&demuxer, 0, 30.0);
    read_until(&demuxer, 1, 30.0);

    let seeks_before = seeks(&calls).len();

    // Backward seek into the buffered window: served from the cache, and the
    // reader lands on the keyframe covering the target.
    assert!(demuxer.seek(5.0, SeekFlags::empty()));
    assert_eq!(seeks(&calls).len(), seeks_before);

    let video = demuxer.read_packet(0).expect("video after seek");
    assert!(approx(pts_of(&video), 5.0));
    assert!(video.keyframe);
    let audio = demuxer.read_packet(1).expect("audio after seek");
    assert!(approx(pts_of(&audio), 5.0));

    // Forward-flagged seek rounds up to the next video keyframe, and the
    // audio target follows the adjusted video target.
    assert!(demuxer.seek(5.03, SeekFlags::FORWARD));
    assert_eq!(seeks(&calls).len(), seeks_before);
    let video = demuxer.read_packet(0).expect("video after forward seek");
    assert!(approx(pts_of(&video), 5.5));
    let audio = demuxer.read_packet(1).expect("audio after forward seek");
    assert!(approx(pts_of(&audio), 5.5));

    // Drain forward a little, then seek back again: still cached.
    read_until(&demuxer, 0, 8.0);
    assert!(demuxer.seek(25.0, SeekFlags::empty()));
    assert_eq!(seeks(&calls).len(), seeks_before);
    let video = demuxer.read_packet(0).expect("video after second seek");
    assert!(approx(pts_of(&video), 25.0));

    demuxer.with_state(|state| state.check_consistency());
}

fn run_range_join(with_dts: bool) {
    let options = CacheOptions {
        seekable_cache: true,
        max_bytes_bw: 1 << 30,
        ..CacheOptions::default()
    };
    let mut video = video_stream(2000);
    video.with_dts = with_dts;
    let (demuxer, calls) = open_cache(vec![video], &options);
    demuxer.select_stream(0, Ts::NONE, true);

    // Play the head of the file.
    read_until(&demuxer, 0, 30.0);
    assert!(seeks(&calls).is_empty());

    // Seek outside the buffered window: a fresh range is started and the
    // producer is repositioned.
    assert!(demuxer.seek(60.0, SeekFlags::empty()));
    let after_fresh = seeks(&calls);
    assert_eq!(after_fresh.len(), 1);
    assert!(approx(after_fresh[0], 60.0));

    let first = demuxer.read_packet(0).expect("first packet after fresh seek");
    let first_pts = pts_of(&first);
    assert!(first_pts <= 60.0 && first_pts >= 59.0);
    read_until(&demuxer, 0, 90.0);

    demuxer.with_state(|state| {
        state.check_consistency();
        assert_eq!(state.ranges.len(), 2);
    });

    // Seek back into the original range: in-cache, but demuxing has to
    // resume from that range's end, so one producer-level resume seek is
    // queued.
    assert!(demuxer.seek(10.0, SeekFlags::empty()));
    let after_back = seeks(&calls);
    assert_eq!(after_back.len(), 2);
    assert!(after_back[1] > 25.0 && after_back[1] < 35.0);

    // Read across the former gap. The ranges join when buffering crosses
    // the second range's start, and playback continues seamlessly through
    // the splice point into the data buffered at 60..90.
    let mut last = demuxer.read_packet(0).map(|p| pts_of(&p)).expect("packet after back seek");
    assert!(approx(last, 10.0));
    while last < 91.0 {
        let pkt = demuxer.read_packet(0).expect("packet while crossing the join");
        let pts = pts_of(&pkt);
        assert!(approx(pts, last + 0.1), "gap or duplicate at {} -> {}", last, pts);
        last = pts;
    }

    // Everything collapsed into one continuous seekable range.
    let state = demuxer.reader_state();
    assert_eq!(state.seek_ranges.len(), 1);
    assert!(state.seek_ranges[0].start <= 10.0);
    assert!(state.seek_ranges[0].end >= 89.0);

    // Exactly one more producer seek: the resume past the joined range.
    let after_join = seeks(&calls);
    assert_eq!(after_join.len(), 3);
    assert!(after_join[2] > 85.0);

    demuxer.with_state(|state| {
        state.check_consistency();
        assert_eq!(state.ranges.len(), 1);
    });
}

#[test]
fn verify_range_join_via_dts() {
    run_range_join(true);
}

#[test]
fn verify_range_join_via_pos_without_dts() {
    run_range_join(false);
}

#[test]
fn verify_refresh_seek_on_late_enable() {
    let (demuxer, calls) = open_cache(
        vec![video_stream(1000), sub_stream(200)],
        &CacheOptions::default(),
    );
    demuxer.select_stream(0, Ts::NONE, true);

    // Play up to 42s with subtitles disabled.
    let base = read_until(&demuxer, 0, 42.0);
    assert!(approx(base, 42.0));
    let seeks_before = seeks(&calls).len();

    // Enable subtitles mid-playback. The cache owes a low-amplitude refresh
    // seek to re-demux the subtitle packets the decoder position already
    // passed.
    demuxer.select_stream(1, Ts::new(42.0), true);
    demuxer.with_state(|state| assert!(state.streams[1].need_refresh));

    // Keep playing video: it must continue without duplicates while the
    // refresh seek rewinds the producer behind the playback position.
    let mut last = base;
    while last < 45.0 {
        let pkt = demuxer.read_packet(0).expect("video while refreshing");
        let pts = pts_of(&pkt);
        assert!(pts > last, "duplicate packet after refresh: {} then {}", last, pts);
        last = pts;
    }

    let all_seeks = seeks(&calls);
    assert_eq!(all_seeks.len(), seeks_before + 1);
    assert!(approx(all_seeks[seeks_before], 41.0));

    // The subtitle packets from just before the enable point arrived.
    assert!(demuxer.has_packet(1));
    let sub = demuxer.read_packet(1).expect("subtitle packet");
    assert!(approx(pts_of(&sub), 41.0));

    demuxer.with_state(|state| state.check_consistency());
}

#[test]
fn verify_attached_picture_returned_once() {
    let mut picture = Packet::new(0, vec![9u8; 10]);
    picture.keyframe = true;

    let mut stream = FakeStream::new(StreamType::Video, 0.1, 1, 10, 0);
    stream.info.attached_picture = Some(picture);

    let (demuxer, _calls) = open_cache(vec![stream], &CacheOptions::default());
    demuxer.select_stream(0, Ts::NONE, true);

    // Attached pictures are never read eagerly.
    demuxer.with_state(|state| assert!(!state.streams[0].eager));

    let pkt = demuxer.read_packet(0).expect("the picture");
    assert_eq!(pkt.len(), 10);

    // Only one copy is ever delivered.
    assert!(demuxer.read_packet(0).is_none());
    assert!(demuxer.read_packet(0).is_none());
}

#[test]
fn verify_non_monotone_dts_clears_correctness_flags() {
    let mut video = video_stream(300);
    video.dts_jitter_at = Some(100);

    let (demuxer, _calls) = open_cache(vec![video], &CacheOptions::default());
    demuxer.select_stream(0, Ts::NONE, true);

    // Read past the out-of-order packet; it is delivered, not dropped.
    let mut n = 0;
    loop {
        let pkt = demuxer.read_packet(0).expect("packet");
        n += 1;
        if pts_of(&pkt) > 10.55 {
            break;
        }
    }
    assert_eq!(n, 107);

    demuxer.with_state(|state| {
        state.check_consistency();
        let queue = &state.current_range().queues[0];
        assert!(!queue.correct_dts);
        assert!(queue.correct_pos);
        assert!(!state.streams[0].global_correct_dts);
        assert!(state.streams[0].global_correct_pos);
        // The backward jump was inside the tolerance window, so the queue's
        // high-water timestamp did not follow it down.
        assert!(queue.last_ts.get().unwrap() > 10.0);
    });
}

#[test]
fn verify_prune_respects_backbuffer_budget() {
    let options = CacheOptions {
        seekable_cache: true,
        max_bytes_bw: 5000,
        ..CacheOptions::default()
    };
    let (demuxer, _calls) = open_cache(vec![video_stream(2000)], &options);
    demuxer.select_stream(0, Ts::NONE, true);

    for _ in 0..500 {
        demuxer.read_packet(0).expect("packet");
    }

    demuxer.with_state(|state| {
        state.check_consistency();
        assert!(state.total_bytes - state.fw_bytes <= 5000);
    });

    // The seekable range start moved up as the back-buffer was trimmed.
    let state = demuxer.reader_state();
    assert_eq!(state.seek_ranges.len(), 1);
    assert!(state.seek_ranges[0].start > 0.0);
}

#[test]
fn verify_disabled_seekable_cache_keeps_only_forward_data() {
    let (demuxer, _calls) = open_cache(vec![video_stream(500)], &CacheOptions::default());
    demuxer.select_stream(0, Ts::NONE, true);

    for _ in 0..100 {
        demuxer.read_packet(0).expect("packet");
    }

    demuxer.with_state(|state| {
        state.check_consistency();
        // Everything behind the reader was pruned immediately.
        assert_eq!(state.total_bytes, state.fw_bytes);
    });
}

#[test]
fn verify_subtitles_are_passive_when_av_is_eager() {
    let (demuxer, _calls) =
        open_cache(vec![video_stream(100), audio_stream(100), sub_stream(10)], &CacheOptions::default());

    demuxer.select_stream(0, Ts::NONE, true);
    demuxer.select_stream(1, Ts::NONE, true);
    demuxer.select_stream(2, Ts::NONE, true);

    demuxer.with_state(|state| {
        assert!(state.streams[0].eager);
        assert!(state.streams[1].eager);
        assert!(!state.streams[2].eager);
    });

    // With all A/V deselected, subtitles become eager.
    demuxer.select_stream(0, Ts::NONE, false);
    demuxer.select_stream(1, Ts::NONE, false);
    demuxer.with_state(|state| {
        assert!(state.streams[2].eager);
        state.check_consistency();
    });
}

#[test]
fn verify_deselect_drops_buffered_packets() {
    let (demuxer, _calls) =
        open_cache(vec![video_stream(500), audio_stream(1000)], &CacheOptions::default());
    demuxer.select_stream(0, Ts::NONE, true);
    demuxer.select_stream(1, Ts::NONE, true);

    read_until(&demuxer, 0, 2.0);

    demuxer.select_stream(1, Ts::NONE, false);
    demuxer.with_state(|state| {
        state.check_consistency();
        assert!(state.current_range().queues[1].head.is_none());
        assert_eq!(state.streams[1].fw_bytes, 0);
    });

    // Video is unaffected.
    let pkt = demuxer.read_packet(0).expect("video packet");
    assert!(pts_of(&pkt) > 2.0);
}

#[test]
fn verify_threaded_reads_with_wakeup_callback() {
    let (mut demuxer, _calls) = open_cache(vec![video_stream(50)], &CacheOptions::default());
    demuxer.select_stream(0, Ts::NONE, true);

    let (tx, rx) = mpsc::channel();
    demuxer.set_wakeup_callback(move || {
        let _ = tx.send(());
    });

    demuxer.start_thread();

    let mut n = 0;
    while let Some(pkt) = demuxer.read_packet(0) {
        assert!(approx(pts_of(&pkt), n as f64 * 0.1));
        n += 1;
    }
    assert_eq!(n, 50);

    assert!(demuxer.reader_state().eof);
    assert!(rx.try_iter().count() > 0, "wakeup callback never fired");

    demuxer.stop_thread();
    demuxer.with_state(|state| state.check_consistency());
}

#[test]
fn verify_async_reads_poll_to_completion() {
    let (mut demuxer, _calls) = open_cache(vec![video_stream(20)], &CacheOptions::default());
    demuxer.select_stream(0, Ts::NONE, true);
    demuxer.start_thread();

    let mut got = 0;
    let mut spins = 0;
    loop {
        match demuxer.read_packet_async(0) {
            PollPacket::Packet(_) => got += 1,
            PollPacket::Pending => {
                spins += 1;
                assert!(spins < 100_000, "worker made no progress");
                std::thread::sleep(Duration::from_millis(1));
            }
            PollPacket::Eof => break,
        }
    }
    assert_eq!(got, 20);

    demuxer.stop_thread();
}

#[test]
fn verify_cancellation_settles_into_eof() {
    let calls: CallLog = Arc::new(Mutex::new(Vec::new()));
    let token = CancelToken::new();
    let mut producer = FakeProducer::new(vec![video_stream(1000)], Arc::clone(&calls));
    producer.source = Some(TestSource { token: token.clone() });

    let demuxer =
        Demuxer::open(Box::new(producer), CheckLevel::Normal, &CacheOptions::default()).unwrap();
    demuxer.select_stream(0, Ts::NONE, true);

    read_until(&demuxer, 0, 1.0);

    token.cancel();

    // Buffered packets drain, then the pipeline reports EOF long before the
    // end of the synthetic file.
    let mut last = 0.0;
    while let Some(pkt) = demuxer.read_packet(0) {
        last = pts_of(&pkt);
    }
    assert!(last < 50.0);
    assert!(demuxer.reader_state().eof);
}

#[test]
fn verify_with_producer_runs_in_both_modes() {
    let (mut demuxer, _calls) = open_cache(vec![video_stream(50)], &CacheOptions::default());
    demuxer.select_stream(0, Ts::NONE, true);

    assert_eq!(demuxer.with_producer(|_| 41), 41);

    demuxer.start_thread();
    assert_eq!(demuxer.with_producer(|_| 42), 42);
    demuxer.stop_thread();
}

#[test]
fn verify_update_reports_events_and_metadata() {
    let calls: CallLog = Arc::new(Mutex::new(Vec::new()));
    let mut producer = FakeProducer::new(vec![video_stream(100)], Arc::clone(&calls));
    producer.metadata_at = Some(20);

    let mut demuxer =
        Demuxer::open(Box::new(producer), CheckLevel::Normal, &CacheOptions::default()).unwrap();

    // The initial events are collected by the first update.
    let events = demuxer.update();
    assert!(events.contains(Events::INIT));
    assert!(events.contains(Events::STREAMS));
    assert_eq!(demuxer.info().filetype.as_deref(), Some("packet grid"));
    assert_eq!(demuxer.num_streams(), 1);

    demuxer.select_stream(0, Ts::NONE, true);
    read_until(&demuxer, 0, 3.0);

    let events = demuxer.update();
    assert!(events.contains(Events::METADATA));
    assert_eq!(demuxer.info().metadata.get("icy-title"), Some("midstream"));
}

#[test]
fn verify_unseekable_source_refuses_seeks() {
    let calls: CallLog = Arc::new(Mutex::new(Vec::new()));
    let mut producer = FakeProducer::new(vec![video_stream(100)], Arc::clone(&calls));
    producer.seekable = false;

    let demuxer =
        Demuxer::open(Box::new(producer), CheckLevel::Normal, &CacheOptions::default()).unwrap();
    demuxer.select_stream(0, Ts::NONE, true);

    assert!(!demuxer.seek(10.0, SeekFlags::empty()));
    assert!(seeks(&calls).is_empty());
}

#[test]
fn verify_flush_empties_the_cache_and_reading_resumes() {
    let (demuxer, _calls) = open_cache(vec![video_stream(500)], &CacheOptions::default());
    demuxer.select_stream(0, Ts::NONE, true);

    let last = read_until(&demuxer, 0, 5.0);

    demuxer.flush();
    demuxer.with_state(|state| {
        state.check_consistency();
        assert_eq!(state.total_bytes, 0);
        assert_eq!(state.fw_bytes, 0);
    });

    // Reading resumes from the producer's position.
    let pkt = demuxer.read_packet(0).expect("packet after flush");
    assert!(pts_of(&pkt) > last);
}

#[test]
fn verify_read_any_packet_round_robins_to_eof() {
    let (demuxer, _calls) =
        open_cache(vec![video_stream(20), audio_stream(40)], &CacheOptions::default());
    demuxer.select_stream(0, Ts::NONE, true);
    demuxer.select_stream(1, Ts::NONE, true);

    let mut video = 0;
    let mut audio = 0;
    while let Some(pkt) = demuxer.read_any_packet() {
        match pkt.stream {
            0 => video += 1,
            1 => audio += 1,
            _ => unreachable!(),
        }
    }
    assert_eq!(video, 20);
    assert_eq!(audio, 40);
}
