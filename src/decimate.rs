//! In-place stride or averaging downsampler (spec §4.2).

use crate::stream::{DataSegment, RawSample};

/// Decimator configuration, held per channel alongside the trigger state.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecimateState {
    pub enabled: bool,
    pub level: i64,
    pub avg_mode: bool,
}

impl DecimateState {
    /// Decimate `segment` in place. No-op if disabled or `level <= 1`.
    pub fn apply(&self, segment: &mut DataSegment) {
        if !self.enabled || self.level <= 1 {
            return;
        }
        let level = self.level as usize;
        let n_in = segment.raw_data.len();
        let n_out = (n_in - 1 + level) / level;

        if self.avg_mode {
            let mut acc = vec![0.0f64; n_out];
            for (i, &raw) in segment.raw_data.iter().enumerate() {
                let j = i / level;
                acc[j] += if segment.signed {
                    raw as i16 as f64
                } else {
                    raw as f64
                };
            }
            let extra = n_in % level;
            if extra != 0 {
                let last = n_out - 1;
                acc[last] *= level as f64 / extra as f64;
            }
            for (i, &a) in acc.iter().enumerate() {
                let mean = a / level as f64;
                segment.raw_data[i] = if segment.signed {
                    // Bias before truncating so float->int never rounds
                    // toward zero for negative values (spec §4.2, §9(c)).
                    (mean + 65536.0 + 0.5) as i64 as i16 as RawSample
                } else {
                    (mean + 0.5) as RawSample
                };
            }
        } else {
            for i in 0..n_out {
                segment.raw_data[i] = segment.raw_data[i * level];
            }
        }
        segment.raw_data.truncate(n_out);
        segment.frames_per_sample *= self.level;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    fn seg(data: Vec<RawSample>, signed: bool) -> DataSegment {
        DataSegment::new(
            data,
            signed,
            1,
            0,
            SystemTime::UNIX_EPOCH,
            Duration::from_micros(100),
            1.0,
            0,
        )
    }

    #[test]
    fn drop_mode_keeps_every_nth_sample() {
        let mut s = seg(vec![10, 20, 30, 40, 50, 60, 70], false);
        let dec = DecimateState {
            enabled: true,
            level: 3,
            avg_mode: false,
        };
        dec.apply(&mut s);
        assert_eq!(s.raw_data, vec![10, 40, 70]);
        assert_eq!(s.frames_per_sample, 3);
    }

    #[test]
    fn avg_mode_normalizes_partial_last_bin() {
        let mut s = seg(vec![10, 20, 30, 40, 50], false);
        let dec = DecimateState {
            enabled: true,
            level: 3,
            avg_mode: true,
        };
        dec.apply(&mut s);
        // bins: [10,20,30]->20, [40,50] (partial, extra=2) -> mean(40,50)=45
        assert_eq!(s.raw_data, vec![20, 45]);
    }

    #[test]
    fn avg_mode_signed_rounds_without_drifting_to_zero() {
        let mut s = seg(vec![65534, 65534, 65534], true); // == -2 as i16
        let dec = DecimateState {
            enabled: true,
            level: 3,
            avg_mode: true,
        };
        dec.apply(&mut s);
        assert_eq!(s.raw_data[0] as i16, -2);
    }

    #[test]
    fn disabled_is_noop() {
        let mut s = seg(vec![1, 2, 3], false);
        let dec = DecimateState {
            enabled: false,
            level: 4,
            avg_mode: true,
        };
        dec.apply(&mut s);
        assert_eq!(s.raw_data, vec![1, 2, 3]);
    }
}
