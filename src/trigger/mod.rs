//! Pulse triggering: edge, level, auto, and edge-multi (kink-model) trigger
//! modes, their mutual veto/fill ordering, and per-trigger record assembly
//! (spec §4.4).

pub mod kink;

use crate::stream::{as_signed, DataStream, FrameIndex, RawSample};
use std::time::{Duration, SystemTime};

/// The four trigger modes plus pulse-length parameters, grouped exactly as
/// spec.md §3 describes (usable as a map key: only integer/duration
/// fields, no floats).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TriggerState {
    pub auto_trigger: bool,
    pub auto_delay: Duration,

    pub edge_trigger: bool,
    pub edge_level: i32,
    pub edge_rising: bool,

    pub level_trigger: bool,
    pub level_threshold: i32,
    pub level_rising: bool,

    pub edge_multi: bool,
    /// Sign gives direction (negative = falling kink); magnitude is the
    /// minimum kink slope. `i32::MAX`/`i32::MIN` means "never crosses",
    /// used by noise mode.
    pub edge_multi_level: i32,
    pub edge_multi_verify_n_monotone: usize,
    pub edge_multi_make_contaminated: bool,
    pub edge_multi_make_short: bool,
    pub edge_multi_noise: bool,
    pub edge_multi_disable_zero_threshold: bool,

    pub n_presamples: usize,
    pub n_samples: usize,
}

impl Default for TriggerState {
    fn default() -> Self {
        Self {
            auto_trigger: false,
            auto_delay: Duration::from_millis(250),
            edge_trigger: false,
            edge_level: 100,
            edge_rising: true,
            level_trigger: false,
            level_threshold: 4000,
            level_rising: true,
            edge_multi: false,
            edge_multi_level: 0,
            edge_multi_verify_n_monotone: 4,
            edge_multi_make_contaminated: false,
            edge_multi_make_short: false,
            edge_multi_noise: false,
            edge_multi_disable_zero_threshold: false,
            n_presamples: 256,
            n_samples: 1024,
        }
    }
}

impl TriggerState {
    /// Validate the pulse-length invariant (spec §3, §7): `n_samples >
    /// n_presamples`.
    pub fn validate(&self) -> Result<(), String> {
        if self.n_samples <= self.n_presamples {
            return Err(format!(
                "n_samples ({}) must exceed n_presamples ({})",
                self.n_samples, self.n_presamples
            ));
        }
        Ok(())
    }
}

/// One triggered pulse (spec §3 `DataRecord`).
#[derive(Debug, Clone)]
pub struct DataRecord {

    pub data: Vec<RawSample>,
    pub trig_frame: FrameIndex,
    pub trig_time: SystemTime,
    pub presamples: usize,
    pub signed: bool,
    pub channel_index: usize,
    pub volts_per_arb: f64,
    pub sample_period: Duration,

    pub pretrig_mean: f64,
    pub peak_value: f64,
    pub pulse_average: f64,
    pub pulse_rms: f64,
    pub model_coefs: Option<Vec<f64>>,
    pub residual_std_dev: Option<f64>,
}

/// Per-segment trigger output sent to the broker (spec §3 `TriggerList`).
#[derive(Debug, Clone)]
pub struct TriggerList {
    pub channel_index: usize,
    pub frames: Vec<FrameIndex>,
    pub key_frame: FrameIndex,
    pub key_time: SystemTime,
    pub sample_rate: f64,
    pub last_frame_that_will_never_trigger: FrameIndex,
}

/// Mutable, per-channel state the engine carries across segments (spec §4.7).
#[derive(Debug, Clone)]
pub struct EngineState {
    pub last_trigger: FrameIndex,
    pub last_edge_multi_trigger: FrameIndex,
}

impl Default for EngineState {
    fn default() -> Self {
        Self {
            // far in the past, but not so far that subtracting doesn't work.
            last_trigger: i64::MIN / 4,
            last_edge_multi_trigger: i64::MIN / 4,
        }
    }
}

/// The searchable window-relative index range for one invocation (spec §4.4).
fn search_domain(state: &TriggerState, window_len: usize) -> std::ops::Range<usize> {
    let tail_margin = state.n_samples - state.n_presamples;
    let start = state.n_presamples;
    let end = window_len.saturating_sub(tail_margin);
    if end <= start {
        start..start
    } else {
        start..end
    }
}

fn find_edges(
    window: &DataStream,
    rising: bool,
    level: i32,
    domain: std::ops::Range<usize>,
    post_fire_skip: usize,
) -> Vec<usize> {
    let data = &window.segment.raw_data;
    let signed = window.signed();
    let mut out = Vec::new();
    let mut i = domain.start.max(1);
    while i < domain.end {
        let delta = as_signed(data[i], signed) - as_signed(data[i - 1], signed);
        let fire = if rising {
            delta >= level
        } else {
            delta <= -level
        };
        if fire {
            out.push(i);
            i += post_fire_skip.max(1);
        } else {
            i += 1;
        }
    }
    out
}

fn find_levels(
    window: &DataStream,
    rising: bool,
    threshold: i32,
    domain: std::ops::Range<usize>,
    post_fire_skip: usize,
) -> Vec<usize> {
    let data = &window.segment.raw_data;
    let signed = window.signed();
    let mut out = Vec::new();
    let mut i = domain.start.max(1);
    while i < domain.end {
        let prev = as_signed(data[i - 1], signed);
        let cur = as_signed(data[i], signed);
        let fire = if rising {
            prev < threshold && cur >= threshold
        } else {
            prev > threshold && cur <= threshold
        };
        if fire {
            out.push(i);
            i += post_fire_skip.max(1);
        } else {
            i += 1;
        }
    }
    out
}

/// Remove level candidates within `n_samples` (either direction) of any
/// chosen edge trigger (spec §4.4 rule 3).
fn veto_levels_near_edges(levels: Vec<usize>, edges: &[usize], n_samples: usize) -> Vec<usize> {
    levels
        .into_iter()
        .filter(|&lvl| {
            !edges
                .iter()
                .any(|&e| (lvl as i64 - e as i64).unsigned_abs() < n_samples as u64)
        })
        .collect()
}

/// Fill remaining space with auto triggers spaced by `auto_delay_samples`,
/// absorbing (not duplicating) any edge/level trigger that would otherwise
/// block a candidate slot (spec §4.4 rule 4).
fn find_auto(
    existing_frames: &[FrameIndex],
    last_trigger: FrameIndex,
    first_searchable: FrameIndex,
    domain_end: FrameIndex,
    auto_delay_samples: i64,
    n_samples: i64,
) -> Vec<FrameIndex> {
    let mut out = Vec::new();
    let mut last = last_trigger;
    let mut idx = 0usize; // next unconsumed existing trigger
    loop {
        let candidate = (last + auto_delay_samples).max(first_searchable);
        if candidate >= domain_end {
            break;
        }
        // advance past any already-consumed existing triggers
        while idx < existing_frames.len() && existing_frames[idx] <= last {
            idx += 1;
        }
        if idx < existing_frames.len() && existing_frames[idx] < candidate + n_samples {
            last = existing_frames[idx];
            idx += 1;
            continue;
        }
        out.push(candidate);
        last = candidate;
    }
    out
}

/// Edge-multi (kink-model) trigger search (spec §4.4 "EdgeMulti").
/// Returns window-relative indices of confirmed kinks, in order.
fn find_edge_multi(window: &DataStream, state: &TriggerState, domain: std::ops::Range<usize>) -> Vec<usize> {
    if state.edge_multi_level == 0 && !state.edge_multi_disable_zero_threshold {
        return Vec::new();
    }
    let data = &window.segment.raw_data;
    let signed = window.signed();
    let n = state.edge_multi_verify_n_monotone.max(1);
    let rising = state.edge_multi_level >= 0;
    let min_mag = state.edge_multi_level.unsigned_abs() as f64;
    let half = n.max(3);

    let mut out = Vec::new();
    let mut i = domain.start.max(half);
    let end = domain.end.saturating_sub(n);
    while i < end {
        let lo = i.saturating_sub(half);
        let hi = (i + n).min(data.len() - 1);
        let xs: Vec<f64> = (lo..=hi).map(|j| j as f64).collect();
        let ys: Vec<f64> = (lo..=hi)
            .map(|j| as_signed(data[j], signed) as f64)
            .collect();
        let candidates: Vec<f64> = {
            let mut v = Vec::new();
            let mut k = lo as f64;
            while k <= hi as f64 {
                v.push(k);
                k += 0.5;
            }
            v
        };
        if let Some((k_best, _)) = kink::kink_model_fit(&xs, &ys, &candidates) {
            let (_, _, c, _) = kink::kink_model_result(k_best, &xs, &ys);
            let fires = if rising { c >= min_mag } else { c <= -min_mag };
            // Require enough trailing samples in this window past k_best to
            // resolve it precisely; otherwise wait for the window to grow.
            let has_trailing_support = (hi as f64 - k_best) >= n as f64;
            if fires && has_trailing_support {
                let idx = k_best.round() as usize;
                // verify verify_n_monotone subsequent samples move the right way
                let verify_end = (idx + n).min(data.len() - 1);
                let mut monotone = verify_end > idx;
                for j in idx..verify_end {
                    let a = as_signed(data[j], signed);
                    let b = as_signed(data[j + 1], signed);
                    let ok = if rising { b > a } else { b < a };
                    if !ok {
                        monotone = false;
                        break;
                    }
                }
                if monotone {
                    out.push(idx);
                    // Skip past the rest of this excursion so the trailing
                    // samples of the same kink are not mistaken for a new one.
                    let mut j = idx;
                    let scan_end = data.len() - 1;
                    while j < scan_end {
                        let a = as_signed(data[j], signed);
                        let b = as_signed(data[j + 1], signed);
                        let continuing = if rising { b > a } else { b < a };
                        if !continuing {
                            break;
                        }
                        j += 1;
                    }
                    i = (j + 1).max(idx + n);
                    continue;
                }
            }
        }
        i += 1;
    }
    out
}

/// Main entry point: run all four trigger modes over `window` per the
/// mutual-exclusion ordering in spec.md §4.4, and assemble the resulting
/// [`DataRecord`]s plus the [`TriggerList`] to send to the broker.
pub fn trigger_data(
    window: &DataStream,
    state: &TriggerState,
    engine: &mut EngineState,
    sample_rate: f64,
    channel_index: usize,
) -> (Vec<DataRecord>, TriggerList) {
    let domain = search_domain(state, window.len());
    let n_samples = state.n_samples;

    let mut edge_like: Vec<usize> = Vec::new();
    let mut noise_frames_abs: Vec<FrameIndex> = Vec::new();

    if state.edge_trigger && !state.edge_multi {
        edge_like = find_edges(window, state.edge_rising, state.edge_level, domain.clone(), n_samples);
    } else if state.edge_multi {
        if state.edge_multi_noise {
            let stride = n_samples as i64;
            let domain_end_frame = window.frame_at(domain.end.max(domain.start));
            let mut pos = engine.last_edge_multi_trigger.max(window.frame_at(domain.start));
            while pos < domain_end_frame {
                noise_frames_abs.push(pos);
                pos += stride;
            }
            if let Some(&last) = noise_frames_abs.last() {
                engine.last_edge_multi_trigger = last;
            }
        } else {
            let raw_kinks = find_edge_multi(window, state, domain.clone());
            let mut prev_abs = engine.last_edge_multi_trigger;
            for i in raw_kinks {
                let abs = window.frame_at(i);
                let spacing_ok = (abs - prev_abs) >= n_samples as i64;
                if spacing_ok || state.edge_multi_make_contaminated || state.edge_multi_make_short {
                    edge_like.push(i);
                    prev_abs = abs;
                }
            }
            if let Some(&last) = edge_like.last() {
                engine.last_edge_multi_trigger = window.frame_at(last);
            }
        }
    }

    let mut levels: Vec<usize> = if state.level_trigger {
        find_levels(window, state.level_rising, state.level_threshold, domain.clone(), n_samples)
    } else {
        Vec::new()
    };
    levels = veto_levels_near_edges(levels, &edge_like, n_samples);

    let mut chosen: Vec<usize> = edge_like;
    chosen.extend(levels);
    chosen.sort_unstable();
    chosen.dedup();

    let mut chosen_frames: Vec<FrameIndex> = chosen.iter().map(|&i| window.frame_at(i)).collect();

    if state.auto_trigger {
        let auto_delay_samples = {
            let ms = state.auto_delay.as_secs_f64();
            if ms == 0.0 {
                n_samples as i64
            } else {
                (ms * sample_rate).round() as i64
            }
        };
        let first_searchable = window.frame_at(domain.start);
        let domain_end_frame = window.frame_at(domain.end.max(domain.start));
        let autos = find_auto(
            &chosen_frames,
            engine.last_trigger,
            first_searchable,
            domain_end_frame,
            auto_delay_samples.max(1),
            n_samples as i64,
        );
        chosen_frames.extend(autos);
        chosen_frames.sort_unstable();
        chosen_frames.dedup();
    }

    if let Some(&last) = chosen_frames.last() {
        engine.last_trigger = last;
    }

    // Edge-multi make-short: presamples are clipped by how much of the gap to
    // the previous trigger its post-trigger data already claimed, and the
    // post-trigger length is clipped by the gap to the next trigger. Computed
    // as a single forward pass so each record's span never overlaps its
    // neighbors'.
    let short_mode = state.edge_multi && state.edge_multi_make_short && !state.edge_multi_noise;
    let post_cap = n_samples - state.n_presamples;
    let mut records = Vec::with_capacity(chosen_frames.len());
    let mut prev_postlen = 0i64;
    for (idx, &frame) in chosen_frames.iter().enumerate() {
        let (presamples, length) = if short_mode {
            let presamples = if idx == 0 {
                state.n_presamples
            } else {
                let gap_prev = frame - chosen_frames[idx - 1];
                (gap_prev - prev_postlen).max(0).min(state.n_presamples as i64) as usize
            };
            let postlen = match chosen_frames.get(idx + 1) {
                Some(&next) => (next - frame).max(0).min(post_cap as i64) as usize,
                None => post_cap,
            };
            prev_postlen = postlen as i64;
            (presamples, presamples + postlen)
        } else {
            (state.n_presamples, n_samples)
        };
        if let Some(rec) = assemble_record(window, frame, length, presamples, channel_index) {
            records.push(rec);
        }
    }
    // noise-mode records: built but excluded from the broker-facing TriggerList.
    for frame in &noise_frames_abs {
        if let Some(rec) = assemble_record(window, *frame, n_samples, state.n_presamples, channel_index) {
            records.push(rec);
        }
    }
    records.sort_by_key(|r| r.trig_frame);

    let last_frame_that_will_never_trigger =
        window.segment.first_frame_num + (window.len() as i64 - (n_samples - state.n_presamples) as i64).max(0);

    let trigger_list = TriggerList {
        channel_index,
        frames: chosen_frames,
        key_frame: window.segment.first_frame_num,
        key_time: window.segment.first_time,
        sample_rate,
        last_frame_that_will_never_trigger,
    };

    (records, trigger_list)
}

pub(crate) fn assemble_record(
    window: &DataStream,
    trig_frame: FrameIndex,
    length: usize,
    n_presamples: usize,
    channel_index: usize,
) -> Option<DataRecord> {
    let frames_per_sample = window.segment.frames_per_sample.max(1);
    let trig_idx = (trig_frame - window.segment.first_frame_num) / frames_per_sample;
    let start = trig_idx - n_presamples as i64;
    if start < 0 {
        return None;
    }
    let start = start as usize;
    let end = (start + length).min(window.len());
    if end <= start {
        return None;
    }
    let data = window.segment.raw_data[start..end].to_vec();
    let presamples = n_presamples.min(data.len().saturating_sub(1));
    let sample_period = window.segment.frame_period * frames_per_sample as u32;
    Some(DataRecord {
        data,
        trig_frame,
        trig_time: window.time_of_frame(trig_frame),
        presamples,
        signed: window.signed(),
        channel_index,
        volts_per_arb: window.segment.volts_per_arb,
        sample_period,
        pretrig_mean: 0.0,
        peak_value: 0.0,
        pulse_average: 0.0,
        pulse_rms: 0.0,
        model_coefs: None,
        residual_std_dev: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::DataSegment;

    fn make_window(data: Vec<RawSample>) -> DataStream {
        DataStream::new(DataSegment::new(
            data,
            false,
            1,
            0,
            SystemTime::UNIX_EPOCH,
            Duration::from_micros(100),
            1.0,
            0,
        ))
    }

    fn base_state(n_presamples: usize, n_samples: usize) -> TriggerState {
        TriggerState {
            n_presamples,
            n_samples,
            ..Default::default()
        }
    }

    // spec.md §8 scenario 1: edge single
    #[test]
    fn scenario_edge_single() {
        let mut raw = vec![0u16; 10000];
        for i in 1000..1010 {
            raw[i] = 8000;
        }
        let window = make_window(raw);
        let mut state = base_state(100, 1000);
        state.edge_trigger = true;
        state.edge_level = 100;
        state.edge_rising = true;
        let mut engine = EngineState::default();
        let (_records, list) = trigger_data(&window, &state, &mut engine, 10000.0, 0);
        assert_eq!(list.frames, vec![1000]);
    }

    // spec.md §8 scenario 2: auto, zero delay
    #[test]
    fn scenario_auto_zero_delay() {
        let raw = vec![0u16; 10000];
        let window = make_window(raw);
        let mut state = base_state(100, 1000);
        state.auto_trigger = true;
        state.auto_delay = Duration::ZERO;
        let mut engine = EngineState::default();
        let (_records, list) = trigger_data(&window, &state, &mut engine, 10000.0, 0);
        let expected: Vec<FrameIndex> = (0..9).map(|i| 100 + i * 1000).collect();
        assert_eq!(list.frames, expected);
    }

    // spec.md §8 scenario 3: edge vetoes level
    #[test]
    fn scenario_edge_vetoes_level() {
        let level_change_at = [50usize, 199, 200, 201, 299, 300, 301, 399, 400, 401, 500];
        let expect_nt = [2, 2, 2, 1, 1, 1, 1, 1, 1, 2, 2];
        for (lca, &want) in level_change_at.iter().zip(expect_nt.iter()) {
            let mut raw = vec![0u16; 1000];
            for i in *lca..1000 {
                raw[i] = 100;
            }
            for i in 300..400 {
                raw[i] = 400;
            }
            let window = make_window(raw);
            let mut state = base_state(20, 100);
            state.edge_trigger = true;
            state.edge_level = 290;
            state.edge_rising = true;
            state.level_trigger = true;
            state.level_threshold = 99;
            let mut engine = EngineState::default();
            let (_records, list) = trigger_data(&window, &state, &mut engine, 10000.0, 0);
            assert_eq!(list.frames.len(), want, "lca={lca}");
        }
    }

    #[test]
    fn level_and_auto_combine_per_testsingles() {
        // From original_source/triggering_test.go TestSingles: level trigger
        // at 1000, auto_delay=500ms @ 10kHz fills in at 6000.
        const BIGVAL: u16 = 8000;
        let mut raw = vec![0u16; 10000];
        for i in 1000..1010 {
            raw[i] = BIGVAL;
        }
        for i in 6000..6010 {
            raw[i] = 1;
        }
        let window = make_window(raw);
        let mut state = base_state(100, 1000);
        state.level_trigger = true;
        state.level_threshold = 100;
        state.level_rising = true;
        state.auto_trigger = true;
        state.auto_delay = Duration::from_millis(500);
        let mut engine = EngineState::default();
        let (_records, list) = trigger_data(&window, &state, &mut engine, 10000.0, 0);
        assert_eq!(list.frames, vec![1000, 6000]);
    }

    // spec.md §8 scenario 6: edge-multi (kink model) short records.
    #[test]
    fn scenario_edge_multi_short_records() {
        let kink_list: [f64; 8] = [100.0, 200.1, 300.5, 400.9, 460.0, 500.0, 540.0, 700.0];
        let (a, b, c) = (0.0f64, 0.0f64, 10.0f64);
        let mut raw = vec![0u16; 1000];
        for &k in &kink_list {
            let kint = k.ceil() as i64;
            for j in (kint - 6)..(kint + 20) {
                let u = j as f64 - k;
                let model = a + b * u + c * u.max(0.0);
                raw[j as usize] = model.ceil() as u16;
                if j == kint + 19 {
                    raw[j as usize] = kint as u16;
                }
            }
        }
        let window = make_window(raw);
        let mut state = base_state(50, 100);
        state.edge_trigger = true;
        state.edge_multi = true;
        state.edge_rising = true;
        state.edge_multi_level = 1;
        state.edge_multi_verify_n_monotone = 5;
        state.edge_multi_make_short = true;
        let mut engine = EngineState::default();
        let (records, list) = trigger_data(&window, &state, &mut engine, 10000.0, 0);
        assert_eq!(list.frames, vec![100, 200, 301, 401, 460, 500, 540, 700]);
        let lengths: Vec<usize> = records.iter().map(|r| r.data.len()).collect();
        assert_eq!(lengths, vec![100, 100, 100, 100, 49, 40, 50, 100]);
    }

    #[test]
    fn level_and_auto_200ms_fill_pattern() {
        const BIGVAL: u16 = 8000;
        let mut raw = vec![0u16; 10000];
        for i in 1000..1010 {
            raw[i] = BIGVAL;
        }
        for i in 6000..6010 {
            raw[i] = 1;
        }
        let window = make_window(raw);
        let mut state = base_state(100, 1000);
        state.level_trigger = true;
        state.level_threshold = 1;
        state.level_rising = true;
        state.auto_trigger = true;
        state.auto_delay = Duration::from_millis(200);
        let mut engine = EngineState::default();
        let (_records, list) = trigger_data(&window, &state, &mut engine, 10000.0, 0);
        assert_eq!(list.frames, vec![1000, 3000, 5000, 6000, 8000]);
    }
}
