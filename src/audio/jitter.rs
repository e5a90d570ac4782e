//! Jitter buffer for codec-mode playback
//!
//! Compressed frames are stored by sender timestamp and released strictly by
//! a playback cursor that advances exactly one frame per [`JitterBuffer::get`],
//! whatever the arrival order. A missing frame is replaced by the decoder's
//! loss concealment, so `get` never waits on the network. The cursor only
//! moves otherwise when the sender's clock runs past the whole window, or
//! when a run of late frames re-latches it onto a restarted stream.
//!
//! Timestamps are compared with wrapping arithmetic relative to the cursor,
//! so a sender counter rolling over `u32::MAX` is handled transparently.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::audio::buffer::AudioBlock;
use crate::codec::FrameDecoder;
use crate::config::AppConfig;

/// Jitter buffer tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JitterConfig {
    /// Samples per frame; the cursor step
    pub frame_size: u32,
    /// Frames accepted ahead of the cursor
    pub capacity: usize,
    /// Frames of playout delay inserted when the stream is first latched
    pub delay_frames: u32,
    /// Consecutive late frames that trigger a re-latch; 0 disables
    pub resync_after: u32,
}

impl JitterConfig {
    pub fn from_app(config: &AppConfig) -> Self {
        Self {
            frame_size: config.frame_size() as u32,
            capacity: config.playback.jitter_capacity,
            delay_frames: config.playback.jitter_delay_frames,
            resync_after: config.playback.jitter_resync_frames,
        }
    }
}

/// What happened to a frame handed to [`JitterBuffer::put`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Accepted,
    /// Timestamp already buffered
    Duplicate,
    /// Timestamp behind the cursor
    Late,
    /// Sender clock ran past the window (a loss burst longer than the
    /// buffer); the cursor skipped ahead to this frame
    Jumped,
    /// Stream re-latched onto this frame after a run of late frames
    Resynced,
}

/// Counters since creation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JitterStats {
    pub received: u64,
    pub late: u64,
    pub duplicate: u64,
    pub jumps: u64,
    pub played: u64,
    pub concealed: u64,
    pub decode_errors: u64,
    pub resyncs: u64,
    pub buffered: usize,
}

impl JitterStats {
    pub fn loss_rate(&self) -> f32 {
        if self.played == 0 {
            0.0
        } else {
            self.concealed as f32 / self.played as f32
        }
    }
}

/// Timestamp-keyed reorder buffer that owns the decoder
pub struct JitterBuffer {
    decoder: Box<dyn FrameDecoder>,
    config: JitterConfig,
    /// Compressed frames keyed by timestamp
    frames: BTreeMap<u32, Bytes>,
    /// Timestamp of the next frame to render; `None` until a stream is seen
    cursor: Option<u32>,
    /// Newest timestamp accepted, the sender's clock as far as we know it
    newest: Option<u32>,
    /// Frames the sender's clock has advanced that playback has not pulled yet
    due: u32,
    /// Consecutive frames that arrived behind the cursor
    late_streak: u32,
    stats: JitterStats,
}

impl JitterBuffer {
    pub fn new(decoder: Box<dyn FrameDecoder>, config: JitterConfig) -> Self {
        Self {
            decoder,
            config,
            frames: BTreeMap::new(),
            cursor: None,
            newest: None,
            due: 0,
            late_streak: 0,
            stats: JitterStats::default(),
        }
    }

    /// Signed distance of `timestamp` from the cursor, in samples
    fn offset(cursor: u32, timestamp: u32) -> i64 {
        timestamp.wrapping_sub(cursor) as i32 as i64
    }

    fn window(&self) -> i64 {
        self.config.capacity as i64 * self.config.frame_size as i64
    }

    /// Point the cursor `delay_frames` behind `timestamp` and count one frame due
    ///
    /// The delay is paid once per latch, so the last `delay_frames` frames of
    /// a talk spurt stay buffered until the sender's clock moves again.
    fn latch(&mut self, timestamp: u32) {
        let lead = self.config.delay_frames.wrapping_mul(self.config.frame_size);
        self.cursor = Some(timestamp.wrapping_sub(lead));
        self.newest = Some(timestamp);
        self.due = self.due.saturating_add(1);
    }

    /// Advance the sender clock to `timestamp` if it is newer
    fn observe(&mut self, timestamp: u32) {
        let Some(newest) = self.newest else {
            // Cursor was started by `get` before any frame arrived
            self.newest = Some(timestamp);
            self.due = self.due.saturating_add(1);
            return;
        };
        let ahead = Self::offset(newest, timestamp);
        if ahead > 0 {
            let frames = (ahead / self.config.frame_size as i64).max(1);
            let frames = frames.min(self.config.capacity as i64) as u32;
            self.due = self.due.saturating_add(frames);
            self.newest = Some(timestamp);
        }
    }

    /// Store a compressed frame for later playback
    pub fn put(&mut self, frame: Bytes, timestamp: u32) -> PutOutcome {
        self.stats.received += 1;

        let cursor = match self.cursor {
            Some(cursor) => cursor,
            None => {
                self.latch(timestamp);
                debug!("Jitter buffer latched onto stream at {}", timestamp);
                self.frames.insert(timestamp, frame);
                return PutOutcome::Accepted;
            }
        };

        let offset = Self::offset(cursor, timestamp);
        if offset >= self.window() {
            // Nothing between the cursor and this frame can arrive in time any
            // more; skip ahead instead of concealing the whole gap
            self.stats.jumps += 1;
            debug!(
                "Sender clock jumped to {} (cursor {}), skipping ahead",
                timestamp, cursor
            );
            self.latch(timestamp);
            if let Some(next) = self.cursor {
                self.frames.retain(|&ts, _| Self::offset(next, ts) >= 0);
            }
            self.frames.insert(timestamp, frame);
            self.late_streak = 0;
            return PutOutcome::Jumped;
        }

        if offset >= 0 {
            self.late_streak = 0;
            if self.frames.contains_key(&timestamp) {
                self.stats.duplicate += 1;
                return PutOutcome::Duplicate;
            }
            self.frames.insert(timestamp, frame);
            self.observe(timestamp);
            return PutOutcome::Accepted;
        }

        self.stats.late += 1;
        trace!("Late frame {} (cursor {})", timestamp, cursor);
        self.late_streak += 1;
        if self.config.resync_after > 0 && self.late_streak >= self.config.resync_after {
            warn!(
                "Jitter buffer resync: {} late frames, re-latching at {}",
                self.late_streak, timestamp
            );
            self.frames.clear();
            self.latch(timestamp);
            self.frames.insert(timestamp, frame);
            self.late_streak = 0;
            self.stats.resyncs += 1;
            return PutOutcome::Resynced;
        }

        PutOutcome::Late
    }

    /// Produce the frame at the cursor and advance it by one frame
    ///
    /// Never blocks: a missing or undecodable frame is concealed, and if the
    /// decoder cannot conceal either, the frame is silence.
    pub fn get(&mut self) -> AudioBlock {
        let cursor = *self.cursor.get_or_insert(0);
        let frame_size = self.config.frame_size as usize;

        let decoded = match self.frames.remove(&cursor) {
            Some(payload) => match self.decoder.decode(&payload) {
                Ok(samples) => Some(samples),
                Err(e) => {
                    debug!("Decode failed for frame {}: {}", cursor, e);
                    self.stats.decode_errors += 1;
                    None
                }
            },
            None => None,
        };

        let mut samples = match decoded {
            Some(samples) => samples,
            None => {
                self.stats.concealed += 1;
                self.decoder.conceal().unwrap_or_else(|e| {
                    debug!("Concealment failed: {}", e);
                    vec![0; frame_size]
                })
            }
        };
        samples.resize(frame_size, 0);

        let next = cursor.wrapping_add(self.config.frame_size);
        self.cursor = Some(next);
        // Frames that were never aligned to the cursor can no longer play
        self.frames.retain(|&ts, _| Self::offset(next, ts) >= 0);

        self.stats.played += 1;
        AudioBlock::from_samples(&samples, cursor)
    }

    /// Timestamp the next `get` will render
    pub fn cursor(&self) -> Option<u32> {
        self.cursor
    }

    /// Take the number of frames playback should pull to keep pace with the
    /// sender: one when a stream is latched, then one per frame the sender's
    /// timestamp advances (a lost frame still counts, a reordered one does not)
    pub fn take_due(&mut self) -> u32 {
        std::mem::take(&mut self.due)
    }

    pub fn buffered(&self) -> usize {
        self.frames.len()
    }

    pub fn stats(&self) -> JitterStats {
        JitterStats {
            buffered: self.frames.len(),
            ..self.stats.clone()
        }
    }

    /// Forget the stream; the next frame re-latches the cursor
    pub fn reset(&mut self) {
        self.frames.clear();
        self.cursor = None;
        self.newest = None;
        self.due = 0;
        self.late_streak = 0;
    }
}

/// Jitter buffer behind its own lock, shared by the receive and playback threads
pub struct SharedJitterBuffer {
    inner: Mutex<JitterBuffer>,
}

impl SharedJitterBuffer {
    pub fn new(buffer: JitterBuffer) -> Self {
        Self {
            inner: Mutex::new(buffer),
        }
    }

    /// Store a frame and report how many frames have become due
    pub fn put(&self, frame: Bytes, timestamp: u32) -> (PutOutcome, u32) {
        let mut inner = self.inner.lock();
        let outcome = inner.put(frame, timestamp);
        (outcome, inner.take_due())
    }

    pub fn get(&self) -> AudioBlock {
        self.inner.lock().get()
    }

    pub fn stats(&self) -> JitterStats {
        self.inner.lock().stats()
    }
}

/// Thread-safe handle to a jitter buffer
pub type SharedJitter = Arc<SharedJitterBuffer>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{FrameEncoder, Linear16};
    use proptest::prelude::*;

    const FRAME: u32 = 4;

    fn config(delay_frames: u32, resync_after: u32) -> JitterConfig {
        JitterConfig {
            frame_size: FRAME,
            capacity: 16,
            delay_frames,
            resync_after,
        }
    }

    fn buffer(delay_frames: u32, resync_after: u32) -> JitterBuffer {
        JitterBuffer::new(
            Box::new(Linear16::new(FRAME as usize)),
            config(delay_frames, resync_after),
        )
    }

    /// A frame whose samples all carry `value`
    fn frame(value: i16) -> Bytes {
        Linear16::new(FRAME as usize)
            .encode(&[value; FRAME as usize])
            .unwrap()
    }

    fn first_sample(block: &AudioBlock) -> i16 {
        i16::from_le_bytes([block.pcm[0], block.pcm[1]])
    }

    #[test]
    fn test_get_without_put_conceals() {
        let mut jitter = buffer(0, 0);
        let block = jitter.get();
        assert_eq!(block.len(), FRAME as usize * 2);
        assert_eq!(block.timestamp, Some(0));
        assert!(block.pcm.iter().all(|&b| b == 0));
        assert_eq!(jitter.stats().concealed, 1);
    }

    #[test]
    fn test_reorders_by_timestamp() {
        let mut jitter = buffer(0, 0);
        assert_eq!(jitter.put(frame(1), 0), PutOutcome::Accepted);
        assert_eq!(jitter.put(frame(3), 2 * FRAME), PutOutcome::Accepted);
        assert_eq!(jitter.put(frame(2), FRAME), PutOutcome::Accepted);

        assert_eq!(first_sample(&jitter.get()), 1);
        assert_eq!(first_sample(&jitter.get()), 2);
        assert_eq!(first_sample(&jitter.get()), 3);
        assert_eq!(jitter.stats().concealed, 0);
    }

    #[test]
    fn test_playout_delay_absorbs_early_arrival() {
        let mut jitter = buffer(2, 0);
        // Frame 2 arrives first; frames 0 and 1 are still within the delay
        jitter.put(frame(3), 2 * FRAME);
        assert_eq!(jitter.cursor(), Some(0));
        jitter.put(frame(1), 0);
        jitter.put(frame(2), FRAME);

        let played: Vec<i16> = (0..3).map(|_| first_sample(&jitter.get())).collect();
        assert_eq!(played, vec![1, 2, 3]);
    }

    #[test]
    fn test_playout_delay_holds_tail_of_talk_spurt() {
        let mut jitter = buffer(2, 0);
        for k in 0..3u32 {
            jitter.put(frame(k as i16 + 1), k * FRAME);
        }
        let due = jitter.take_due();
        assert_eq!(due, 3);
        let played: Vec<i16> = (0..due).map(|_| first_sample(&jitter.get())).collect();
        assert_eq!(played, vec![0, 0, 1]);
        assert_eq!(jitter.buffered(), 2);

        // The next spurt makes the held frames due
        jitter.put(frame(4), 3 * FRAME);
        assert_eq!(jitter.take_due(), 1);
        assert_eq!(first_sample(&jitter.get()), 2);
    }

    #[test]
    fn test_gap_is_concealed_and_cursor_advances() {
        let mut jitter = buffer(0, 0);
        jitter.put(frame(1), 0);
        jitter.put(frame(3), 2 * FRAME);

        let a = jitter.get();
        let b = jitter.get();
        let c = jitter.get();
        assert_eq!(first_sample(&a), 1);
        assert_eq!(first_sample(&b), 0);
        assert_eq!(first_sample(&c), 3);
        assert_eq!(b.timestamp, Some(FRAME));
        assert_eq!(jitter.stats().concealed, 1);
    }

    #[test]
    fn test_late_and_duplicate_dropped() {
        let mut jitter = buffer(0, 0);
        jitter.put(frame(1), 0);
        jitter.put(frame(2), FRAME);
        assert_eq!(jitter.put(frame(9), FRAME), PutOutcome::Duplicate);

        jitter.get();
        assert_eq!(jitter.put(frame(9), 0), PutOutcome::Late);

        let stats = jitter.stats();
        assert_eq!(stats.duplicate, 1);
        assert_eq!(stats.late, 1);
        assert_eq!(stats.buffered, 1);
    }

    #[test]
    fn test_frame_beyond_window_skips_ahead() {
        let mut jitter = buffer(1, 0);
        jitter.put(frame(1), 0);
        jitter.put(frame(2), FRAME);
        assert_eq!(jitter.put(frame(3), 14 * FRAME), PutOutcome::Accepted);
        assert_eq!(jitter.take_due(), 15);

        assert_eq!(jitter.put(frame(4), 40 * FRAME), PutOutcome::Jumped);
        assert_eq!(jitter.cursor(), Some(39 * FRAME));
        assert_eq!(jitter.take_due(), 1);
        // Everything behind the new cursor is gone
        assert_eq!(jitter.buffered(), 1);

        assert_eq!(first_sample(&jitter.get()), 0);
        assert_eq!(first_sample(&jitter.get()), 4);
        assert_eq!(jitter.stats().jumps, 1);
    }

    #[test]
    fn test_loss_burst_longer_than_capacity_keeps_playing() {
        for resync_after in [0, 50] {
            let mut jitter = buffer(0, resync_after);
            let mut played = Vec::new();
            fn pull(jitter: &mut JitterBuffer, played: &mut Vec<i16>) {
                for _ in 0..jitter.take_due() {
                    played.push(first_sample(&jitter.get()));
                }
            }

            for k in 0..4u32 {
                jitter.put(frame(k as i16 + 1), k * FRAME);
                pull(&mut jitter, &mut played);
            }
            // Frames 4..24 never arrive, a gap wider than the 16-frame window
            let mut due_after_burst = 0;
            for k in 25..125u32 {
                jitter.put(frame(k as i16 + 1), k * FRAME);
                due_after_burst += jitter.due;
                pull(&mut jitter, &mut played);
            }

            let stats = jitter.stats();
            assert_eq!(due_after_burst, 100, "resync_after {resync_after}");
            assert_eq!(played, (1..=4).chain(26..=125).collect::<Vec<i16>>());
            assert_eq!(stats.jumps, 1);
            assert_eq!(stats.late, 0);
            assert_eq!(stats.resyncs, 0);
            assert_eq!(stats.concealed, 0);
        }
    }

    #[test]
    fn test_undecodable_frame_is_concealed() {
        let mut jitter = buffer(0, 0);
        jitter.put(Bytes::from_static(&[1, 2, 3]), 0);
        let block = jitter.get();
        assert_eq!(block.len(), FRAME as usize * 2);
        let stats = jitter.stats();
        assert_eq!(stats.decode_errors, 1);
        assert_eq!(stats.concealed, 1);
    }

    #[test]
    fn test_resync_after_sender_restart() {
        let mut jitter = buffer(0, 3);
        for i in 0..10 {
            jitter.put(frame(1), 1000 * FRAME + i * FRAME);
            jitter.get();
        }

        // Sender restarted from zero
        assert_eq!(jitter.put(frame(5), 0), PutOutcome::Late);
        assert_eq!(jitter.put(frame(5), FRAME), PutOutcome::Late);
        assert_eq!(jitter.put(frame(7), 2 * FRAME), PutOutcome::Resynced);
        assert_eq!(jitter.cursor(), Some(2 * FRAME));
        assert_eq!(first_sample(&jitter.get()), 7);
        assert_eq!(jitter.stats().resyncs, 1);
    }

    #[test]
    fn test_timestamp_wraparound() {
        let mut jitter = buffer(0, 0);
        let start = u32::MAX - FRAME + 1;
        jitter.put(frame(1), start);
        jitter.put(frame(2), start.wrapping_add(FRAME));

        let a = jitter.get();
        let b = jitter.get();
        assert_eq!((first_sample(&a), a.timestamp), (1, Some(start)));
        assert_eq!((first_sample(&b), b.timestamp), (2, Some(0)));
    }

    #[test]
    fn test_frames_due_follow_sender_clock() {
        let mut jitter = buffer(2, 0);
        jitter.put(frame(1), 10 * FRAME);
        assert_eq!(jitter.take_due(), 1);

        jitter.put(frame(1), 11 * FRAME);
        assert_eq!(jitter.take_due(), 1);

        // Frame 12 lost, 13 arrives: two frames of sender time passed
        jitter.put(frame(1), 13 * FRAME);
        assert_eq!(jitter.take_due(), 2);

        // The straggler is in the past of the sender clock
        jitter.put(frame(1), 12 * FRAME);
        assert_eq!(jitter.take_due(), 0);

        jitter.put(frame(1), 13 * FRAME);
        assert_eq!(jitter.take_due(), 0);
    }

    #[test]
    fn test_shared_put_reports_due() {
        let shared = SharedJitterBuffer::new(buffer(0, 0));
        assert_eq!(shared.put(frame(1), 0), (PutOutcome::Accepted, 1));
        assert_eq!(shared.put(frame(2), FRAME), (PutOutcome::Accepted, 1));
        assert_eq!(shared.put(frame(2), FRAME), (PutOutcome::Duplicate, 0));
        assert_eq!(first_sample(&shared.get()), 1);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Put(u32),
        Get,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u32..64).prop_map(|k| Op::Put(k * FRAME)),
            any::<u32>().prop_map(Op::Put),
            Just(Op::Get),
        ]
    }

    proptest! {
        #[test]
        fn prop_cursor_advances_one_frame_per_get_between_jumps(ops in proptest::collection::vec(op(), 1..200)) {
            let mut jitter = buffer(2, 0);
            let mut expected: Option<u32> = None;

            for op in ops {
                match op {
                    Op::Put(ts) => {
                        if jitter.put(frame(1), ts) == PutOutcome::Jumped {
                            // The only way the cursor moves other than by `get`
                            expected = Some(ts.wrapping_sub(2 * FRAME));
                        }
                    }
                    Op::Get => {
                        let block = jitter.get();
                        prop_assert_eq!(block.len(), FRAME as usize * 2);
                        let ts = block.timestamp.unwrap();
                        if let Some(expected) = expected {
                            prop_assert_eq!(ts, expected);
                        }
                        expected = Some(ts.wrapping_add(FRAME));
                    }
                }
            }
        }

        #[test]
        fn prop_any_arrival_order_plays_in_order(order in Just((0..12i16).collect::<Vec<_>>()).prop_shuffle()) {
            // Enough delay and room that every frame lands ahead of the cursor
            let mut jitter = JitterBuffer::new(
                Box::new(Linear16::new(FRAME as usize)),
                JitterConfig { capacity: 32, ..config(12, 0) },
            );
            for &k in &order {
                jitter.put(frame(k + 1), k as u32 * FRAME);
            }

            let played: Vec<i16> = (0..24)
                .map(|_| first_sample(&jitter.get()))
                .filter(|&s| s != 0)
                .collect();
            prop_assert_eq!(played, (1..=12).collect::<Vec<_>>());
        }
    }
}
