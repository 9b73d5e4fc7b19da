//! Windowed trigger-rate bookkeeping (spec §3 `TriggerCounter`, grounded on
//! `original_source/triggering_test.go TestTriggerCounter`). Buckets trigger
//! frames into fixed-width wall-clock-equivalent windows and emits one
//! message per completed window, used to flag a channel triggering too often.

use crate::stream::FrameIndex;
use crate::trigger::TriggerList;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerCountMessage {
    pub counts_seen: i64,
}

#[derive(Debug, Clone)]
pub struct TriggerCounter {
    channel_index: usize,
    window: Duration,
    window_frames: i64,
    hi: FrameIndex,
    lo: FrameIndex,
    counts_seen: i64,
    initialized: bool,
    pub messages: Vec<TriggerCountMessage>,
}

impl TriggerCounter {
    pub fn new(channel_index: usize, window: Duration) -> Self {
        Self {
            channel_index,
            window,
            window_frames: 0,
            hi: 0,
            lo: 0,
            counts_seen: 0,
            initialized: false,
            messages: Vec::new(),
        }
    }

    pub fn channel_index(&self) -> usize {
        self.channel_index
    }

    pub fn hi(&self) -> FrameIndex {
        self.hi
    }

    pub fn lo(&self) -> FrameIndex {
        self.lo
    }

    pub fn counts_seen(&self) -> i64 {
        self.counts_seen
    }

    /// Fold one `TriggerList` (assumed to belong to this counter's channel,
    /// and whose `frames` are sorted ascending) into the running buckets.
    pub fn observe_trigger_list(&mut self, list: &TriggerList) {
        self.window_frames = (list.sample_rate * self.window_secs()).round() as i64;
        if self.window_frames <= 0 {
            self.window_frames = 1;
        }

        if !self.initialized {
            self.hi = list.key_frame;
            self.lo = self.hi - (self.window_frames - 1);
            self.counts_seen = list
                .frames
                .iter()
                .filter(|&&f| f >= self.lo && f <= self.hi)
                .count() as i64;
            self.initialized = true;
            return;
        }

        for &frame in &list.frames {
            while frame > self.hi {
                self.messages.push(TriggerCountMessage {
                    counts_seen: self.counts_seen,
                });
                self.hi += self.window_frames;
                self.lo += self.window_frames;
                self.counts_seen = 0;
            }
            self.counts_seen += 1;
        }

        let target = list
            .key_frame
            .max(list.last_frame_that_will_never_trigger)
            .max(list.frames.last().copied().unwrap_or(i64::MIN));
        while target > self.hi {
            self.messages.push(TriggerCountMessage {
                counts_seen: self.counts_seen,
            });
            self.hi += self.window_frames;
            self.lo += self.window_frames;
            self.counts_seen = 0;
        }
    }

    fn window_secs(&self) -> f64 {
        self.window.as_secs_f64()
    }
}
