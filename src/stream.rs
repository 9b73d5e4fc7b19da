//! Rolling stream buffer: `DataSegment`, `DataStream`, and the frame/time
//! bookkeeping that anchors every downstream trigger and record (spec §3, §4.1).

use std::time::{Duration, SystemTime};

/// Monotone sample counter within one source run (spec §3).
pub type FrameIndex = i64;

/// Raw ADC word. Interpretation as signed or unsigned is carried alongside
/// the stream via `DataSegment::signed` / `DataStream::signed`, never baked
/// into the type itself (spec §3, §9 "Signed reinterpretation").
pub type RawSample = u16;

/// Reinterpret a raw 16-bit word as signed, per the segment's `signed` flag.
#[inline]
pub fn as_signed(raw: RawSample, signed: bool) -> i32 {
    if signed {
        raw as i16 as i32
    } else {
        raw as i32
    }
}

/// A contiguous run of raw samples for one channel, not yet appended to any
/// stream (spec §3 `DataSegment`).
#[derive(Debug, Clone)]
pub struct DataSegment {
    pub raw_data: Vec<RawSample>,
    pub signed: bool,
    /// Frames represented by each sample; raised by decimation.
    pub frames_per_sample: i64,
    pub first_frame_num: FrameIndex,
    pub first_time: SystemTime,
    /// Duration of one raw (undecimated) frame. Constant across decimation.
    pub frame_period: Duration,
    pub volts_per_arb: f64,
    pub channel_index: usize,
}

impl DataSegment {
    pub fn new(
        raw_data: Vec<RawSample>,
        signed: bool,
        frames_per_sample: i64,
        first_frame_num: FrameIndex,
        first_time: SystemTime,
        frame_period: Duration,
        volts_per_arb: f64,
        channel_index: usize,
    ) -> Self {
        Self {
            raw_data,
            signed,
            frames_per_sample,
            first_frame_num,
            first_time,
            frame_period,
            volts_per_arb,
            channel_index,
        }
    }

    pub fn len(&self) -> usize {
        self.raw_data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw_data.is_empty()
    }

    /// Absolute time of sample `sample_num` within this segment.
    pub fn time_of(&self, sample_num: usize) -> SystemTime {
        let frames = sample_num as i64 * self.frames_per_sample;
        self.first_time + self.frame_period * frames.max(0) as u32
    }
}

/// The rolling window of retained samples that the trigger engine searches
/// (spec §3 `DataStream`). Owned by exactly one pipeline.
#[derive(Debug, Clone)]
pub struct DataStream {
    pub segment: DataSegment,
    /// Total raw samples ever appended, including trimmed-away ones.
    pub samples_seen: u64,
}

impl DataStream {
    pub fn new(segment: DataSegment) -> Self {
        let samples_seen = segment.len() as u64;
        Self {
            segment,
            samples_seen,
        }
    }

    pub fn len(&self) -> usize {
        self.segment.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segment.is_empty()
    }

    pub fn signed(&self) -> bool {
        self.segment.signed
    }

    /// Append `segment`'s samples, re-anchoring `first_frame_num`/`first_time`
    /// from the END of the newly appended data (spec §4.1): upstream sources
    /// timestamp each segment at ITS first frame, so the window's anchor must
    /// be recomputed backward from that to stay consistent.
    pub fn append_segment(&mut self, segment: &DataSegment) {
        let old_len_frames = self.len() as i64 * segment.frames_per_sample;
        self.segment.frames_per_sample = segment.frames_per_sample;
        self.segment.frame_period = segment.frame_period;
        self.segment.signed = segment.signed;
        self.segment.volts_per_arb = segment.volts_per_arb;
        self.segment.channel_index = segment.channel_index;
        self.segment.raw_data.extend_from_slice(&segment.raw_data);
        self.segment.first_frame_num = segment.first_frame_num - old_len_frames;
        self.segment.first_time =
            segment.first_time - segment.frame_period * old_len_frames.max(0) as u32;
        self.samples_seen += segment.len() as u64;
    }

    /// Discard all but the most recent `n` samples, advancing the anchor.
    pub fn trim_keeping_n(&mut self, n: usize) {
        let l = self.len();
        if n >= l {
            return;
        }
        let discard = l - n;
        self.segment.raw_data.copy_within(discard.., 0);
        self.segment.raw_data.truncate(n);
        self.segment.first_frame_num += (discard as i64) * self.segment.frames_per_sample;
        self.segment.first_time += self.segment.frame_period * discard as u32
            * self.segment.frames_per_sample.max(0) as u32;
    }

    /// Absolute frame index of sample `i` in the window.
    pub fn frame_at(&self, i: usize) -> FrameIndex {
        self.segment.first_frame_num + (i as i64) * self.segment.frames_per_sample
    }

    /// Absolute time of the raw frame `frame`, linear in frames from the
    /// window's anchor (frame_period is constant per raw frame regardless of
    /// decimation — see DESIGN.md for why this resolves spec.md's two
    /// differently-phrased timing formulas in §4.1 vs §4.4).
    pub fn time_of_frame(&self, frame: FrameIndex) -> SystemTime {
        let delta = frame - self.segment.first_frame_num;
        if delta >= 0 {
            self.segment.first_time + self.segment.frame_period * delta as u32
        } else {
            self.segment.first_time - self.segment.frame_period * (-delta) as u32
        }
    }
}
