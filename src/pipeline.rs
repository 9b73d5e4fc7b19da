//! Per-channel pipeline driver: (mix, if paired) → decimate → append →
//! trigger → analyze, owning all per-channel mutable state (spec §2, §4.7,
//! grounded on `original_source/process_data.go DataStreamProcessor`).

use crate::analyze::{self, Projectors};
use crate::decimate::DecimateState;
use crate::error::{CoreError, CoreResult};
use crate::mix::Mix;
use crate::stream::{DataSegment, DataStream, FrameIndex};
use crate::trigger::{self, DataRecord, EngineState, TriggerList, TriggerState};
use crate::trigger_counter::TriggerCounter;
use std::time::Duration;

pub struct Pipeline {
    pub channel_index: usize,
    pub sample_rate: f64,
    pub stream: DataStream,
    pub decimate: DecimateState,
    pub mix: Option<Mix>,
    pub trigger_state: TriggerState,
    engine: EngineState,
    projectors: Option<Projectors>,
    pub counter: TriggerCounter,
    /// How many samples of history to retain after each cycle; must be at
    /// least `n_samples` so future presample lookback stays satisfiable.
    retain_margin: usize,
}

impl Pipeline {
    pub fn new(channel_index: usize, sample_rate: f64, initial: DataSegment) -> Self {
        let n_samples = TriggerState::default().n_samples;
        Self {
            channel_index,
            sample_rate,
            stream: DataStream::new(initial),
            decimate: DecimateState::default(),
            mix: None,
            trigger_state: TriggerState::default(),
            engine: EngineState::default(),
            projectors: None,
            counter: TriggerCounter::new(channel_index, Duration::from_secs(1)),
            retain_margin: n_samples,
        }
    }

    /// spec §4.7 `ConfigureTrigger`/`ConfigurePulseLengths`: setting a new
    /// pulse length drops any projector/basis set for the old length.
    pub fn configure_pulse_lengths(&mut self, n_samples: usize, n_presamples: usize) -> CoreResult<()> {
        if n_samples < n_presamples + 1 {
            return Err(CoreError::BadRecordShape(format!(
                "n_samples={n_samples} must be at least n_presamples={n_presamples}+1"
            )));
        }
        self.trigger_state.n_samples = n_samples;
        self.trigger_state.n_presamples = n_presamples;
        self.retain_margin = n_samples;
        self.projectors = None;
        Ok(())
    }

    pub fn configure_trigger(&mut self, state: TriggerState) -> CoreResult<()> {
        state.validate().map_err(CoreError::BadRecordShape)?;
        self.trigger_state = state;
        self.retain_margin = state.n_samples;
        Ok(())
    }

    pub fn set_projectors_basis(&mut self, projectors: Projectors) -> CoreResult<()> {
        let n_samples = self.trigger_state.n_samples;
        if projectors.record_len() != n_samples {
            return Err(CoreError::ProjectorBasisShapeMismatch(format!(
                "projectors row length {} != n_samples {}",
                projectors.record_len(),
                n_samples
            )));
        }
        if projectors.basis.len() != n_samples {
            return Err(CoreError::ProjectorBasisShapeMismatch(format!(
                "basis row count {} != n_samples {}",
                projectors.basis.len(),
                n_samples
            )));
        }
        self.projectors = Some(projectors);
        Ok(())
    }

    pub fn remove_projectors_basis(&mut self) {
        self.projectors = None;
    }

    /// spec §6 `configureMixFraction`: enable (if not already mixing) or
    /// update the TDM feedback/error mix for this channel. Only meaningful
    /// for a feedback channel fed through [`Pipeline::process_paired_segments`].
    pub fn configure_mix_fraction(&mut self, fraction: f64) {
        match &mut self.mix {
            Some(mix) => mix.set_fraction(fraction),
            None => self.mix = Some(Mix::new(fraction)),
        }
    }

    /// Decimate, append, trigger, and analyze one incoming segment from an
    /// unpaired (or error) channel. Returns the finished records plus the
    /// `TriggerList` to hand to the broker.
    pub fn process_segment(&mut self, segment: DataSegment) -> (Vec<DataRecord>, TriggerList) {
        self.process_segment_inner(segment)
    }

    /// Mix `segment` (this channel's feedback data) against `err_segment`
    /// (spec §2/§4.3: mix happens before decimation, on paired channels
    /// only), then decimate/append/trigger/analyze as usual.
    pub fn process_paired_segments(
        &mut self,
        mut segment: DataSegment,
        err_segment: &DataSegment,
    ) -> (Vec<DataRecord>, TriggerList) {
        if let Some(mix) = &mut self.mix {
            mix.retard_and_mix(&mut segment.raw_data, &err_segment.raw_data);
        }
        self.process_segment_inner(segment)
    }

    fn process_segment_inner(&mut self, mut segment: DataSegment) -> (Vec<DataRecord>, TriggerList) {
        self.decimate.apply(&mut segment);
        self.stream.append_segment(&segment);

        let (mut records, list) = trigger::trigger_data(
            &self.stream,
            &self.trigger_state,
            &mut self.engine,
            self.sample_rate,
            self.channel_index,
        );
        for rec in &mut records {
            analyze::analyze(rec, self.projectors.as_ref());
        }
        self.counter.observe_trigger_list(&list);

        let keep = self.retain_margin.max(self.trigger_state.n_samples);
        if self.stream.len() > keep {
            self.stream.trim_keeping_n(keep);
        }
        (records, list)
    }

    /// Build secondary-trigger records at exact frames handed back by the
    /// broker (spec §4.5): these are not found by search, just assembled
    /// and analyzed like any primary trigger.
    pub fn trigger_at_frames(&mut self, frames: &[FrameIndex]) -> Vec<DataRecord> {
        let mut out = Vec::with_capacity(frames.len());
        for &frame in frames {
            if let Some(mut rec) = trigger::assemble_record(
                &self.stream,
                frame,
                self.trigger_state.n_samples,
                self.trigger_state.n_presamples,
                self.channel_index,
            ) {
                analyze::analyze(&mut rec, self.projectors.as_ref());
                out.push(rec);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn seg(data: Vec<crate::stream::RawSample>, first_frame: FrameIndex) -> DataSegment {
        DataSegment::new(
            data,
            false,
            1,
            first_frame,
            SystemTime::UNIX_EPOCH,
            Duration::from_micros(100),
            1.0,
            0,
        )
    }

    #[test]
    fn configure_pulse_lengths_rejects_bad_shape_and_drops_projectors() {
        let empty = seg(vec![0; 10], 0);
        let mut p = Pipeline::new(0, 10_000.0, empty);
        assert!(p.configure_pulse_lengths(10, 20).is_err());

        let projectors = Projectors {
            projectors: vec![vec![1.0; 100]],
            basis: vec![vec![1.0]; 100],
        };
        p.configure_pulse_lengths(100, 20).unwrap();
        p.set_projectors_basis(projectors).unwrap();
        assert!(p.configure_pulse_lengths(200, 20).is_ok());
        // projectors sized for the old length must not survive.
        let bad = Projectors {
            projectors: vec![vec![1.0; 100]],
            basis: vec![vec![1.0]; 100],
        };
        assert!(p.set_projectors_basis(bad).is_err());
    }

    #[test]
    fn configure_pulse_lengths_accepts_zero_presamples_and_the_n_samples_boundary() {
        let empty = seg(vec![0; 10], 0);
        let mut p = Pipeline::new(0, 10_000.0, empty);
        assert!(p.configure_pulse_lengths(1, 0).is_ok());
        assert!(p.configure_pulse_lengths(5, 4).is_ok());
        assert!(p.configure_pulse_lengths(4, 4).is_err());
    }

    #[test]
    fn process_segment_drives_auto_trigger_and_analysis() {
        let empty = seg(vec![], 0);
        let mut p = Pipeline::new(0, 10_000.0, empty);
        let mut state = TriggerState::default();
        state.auto_trigger = true;
        state.auto_delay = Duration::from_millis(10);
        state.n_presamples = 5;
        state.n_samples = 20;
        p.configure_trigger(state).unwrap();

        let data: Vec<_> = (0..500u32).map(|i| 1000 + (i % 7) as u16).collect();
        let (records, list) = p.process_segment(seg(data, 0));

        assert!(!records.is_empty());
        assert_eq!(list.channel_index, 0);
        for rec in &records {
            assert_eq!(rec.data.len(), 20);
            assert_eq!(rec.presamples, 5);
        }
    }

    #[test]
    fn process_paired_segments_mixes_before_decimating() {
        let empty = seg(vec![], 0);
        let mut p = Pipeline::new(0, 10_000.0, empty);
        p.configure_mix_fraction(1.0);

        let fb = seg(vec![100, 200, 300], 0);
        let err = seg(vec![0, 0, 0], 0);
        p.process_paired_segments(fb, &err);

        // retard_and_mix delays fb by one sample: first output is 0 (no
        // prior fb), so the stream's first appended sample must be 0, not
        // the original first fb value of 100.
        assert_eq!(p.stream.segment.raw_data[0], 0);
    }

    #[test]
    fn trigger_at_frames_assembles_without_searching() {
        let empty = seg(vec![], 0);
        let mut p = Pipeline::new(0, 10_000.0, empty);
        let mut state = TriggerState::default();
        state.n_presamples = 5;
        state.n_samples = 20;
        p.configure_trigger(state).unwrap();
        p.process_segment(seg(vec![500; 300], 0));

        // process_segment trims the stream to its retain margin (n_samples),
        // so only recent frames stay assemblable.
        let records = p.trigger_at_frames(&[290]);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].trig_frame, 290);
    }
}
