//! Runtime wiring for one acquisition run (spec §4.8 `prepareRun`/`startRun`,
//! §5 concurrency model): one worker thread per channel pipeline, one
//! broker worker fanning primary triggers in and secondary frames back out,
//! and a tee thread per mix-paired (err, fb) channel pair duplicating the
//! error channel's segments to both its own pipeline and its partner's mix
//! stage (`DataSegment` is `Clone`, `std::sync::mpsc` is single-consumer).
//! Threading idiom grounded on `bass-aes67/src/input/stream.rs`
//! (`Arc<AtomicBool>` run flag + `thread::spawn` + join-on-stop); gather/
//! cycle shape grounded on `original_source/process_data.go`'s per-cycle
//! broker hookup.

use crate::broker::{CouplingMode, TriggerBroker};
use crate::error::{CoreError, CoreResult};
use crate::pipeline::Pipeline;
use crate::sink::Sink;
use crate::source::Source;
use crate::stream::{DataSegment, FrameIndex};
use crate::trigger::TriggerList;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const POLL: Duration = Duration::from_millis(200);

/// Odd channels are feedback (FB), paired with the preceding even channel
/// as their error (Err) source, matching `broker::CouplingMode::FbToErr`'s
/// indexing convention. Returns `None` for an unpaired (or Err) channel.
fn mix_partner(ch: usize, nchan: usize) -> Option<usize> {
    if ch % 2 == 1 && ch - 1 < nchan {
        Some(ch - 1)
    } else {
        None
    }
}

/// One running acquisition: N channel workers, one broker worker, and any
/// tee threads needed for mix-paired channels, all stoppable together via a
/// single broadcast abort flag (spec §5's "cancellation via a single
/// broadcast close-once channel").
pub struct Coordinator {
    pipelines: Vec<Arc<Mutex<Pipeline>>>,
    broker: Arc<Mutex<TriggerBroker>>,
    abort: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl Coordinator {
    /// spec §4.8 `prepareRun`: allocate the segment channels already handed
    /// back by [`crate::source::start_source`], then spawn N pipelines and
    /// the broker. `sample_rate` and `nchan` must match what `source` was
    /// configured with.
    pub fn spawn(
        segment_inputs: Vec<Receiver<DataSegment>>,
        sample_rate: f64,
        sink: Arc<dyn Sink>,
    ) -> CoreResult<Self> {
        let nchan = segment_inputs.len();
        if nchan == 0 {
            return Err(CoreError::BadChannelIndex(0));
        }

        let pipelines: Vec<Arc<Mutex<Pipeline>>> = (0..nchan)
            .map(|ch| {
                let empty = DataSegment::new(
                    Vec::new(),
                    false,
                    1,
                    0,
                    std::time::SystemTime::now(),
                    Duration::from_secs_f64(1.0 / sample_rate),
                    1.0,
                    ch,
                );
                Arc::new(Mutex::new(Pipeline::new(ch, sample_rate, empty)))
            })
            .collect();

        let broker = Arc::new(Mutex::new(TriggerBroker::new(nchan)));
        let abort = Arc::new(AtomicBool::new(false));

        let (primary_tx, primary_rx) = sync_channel::<TriggerList>(nchan.max(1));
        let mut secondary_txs = Vec::with_capacity(nchan);
        let mut secondary_rxs = Vec::with_capacity(nchan);
        for _ in 0..nchan {
            // Zero capacity: the broker's send only completes once the
            // owning channel worker is ready to receive it, which is what
            // keeps cycle k fully drained before cycle k+1 begins.
            let (tx, rx) = sync_channel::<Vec<FrameIndex>>(0);
            secondary_txs.push(tx);
            secondary_rxs.push(rx);
        }

        let mut handles = Vec::with_capacity(2 * nchan + 1);
        handles.push(spawn_broker(
            nchan,
            Arc::clone(&broker),
            primary_rx,
            secondary_txs,
            Arc::clone(&abort),
        ));

        let mut mix_inputs: Vec<Option<Receiver<DataSegment>>> = (0..nchan).map(|_| None).collect();
        // Tee every Err channel that has an FB partner to both its own
        // worker and the partner's mix input.
        let mut own_inputs: Vec<Option<Receiver<DataSegment>>> = segment_inputs.into_iter().map(Some).collect();
        for fb in 0..nchan {
            let Some(err_ch) = mix_partner(fb, nchan) else { continue };
            let err_rx = own_inputs[err_ch].take().expect("err input consumed once");
            let (err_local_tx, err_local_rx) = sync_channel::<DataSegment>(4);
            let (mix_tx, mix_rx) = sync_channel::<DataSegment>(4);
            handles.push(spawn_tee(err_rx, err_local_tx, mix_tx, Arc::clone(&abort)));
            own_inputs[err_ch] = Some(err_local_rx);
            mix_inputs[fb] = Some(mix_rx);
        }

        for ch in 0..nchan {
            let own_rx = own_inputs[ch].take().expect("every channel has an input");
            let mix_rx = mix_inputs[ch].take();
            handles.push(spawn_channel_worker(
                ch,
                own_rx,
                mix_rx,
                Arc::clone(&pipelines[ch]),
                primary_tx.clone(),
                secondary_rxs.remove(0),
                Arc::clone(&sink),
                Arc::clone(&abort),
            ));
        }
        drop(primary_tx);

        Ok(Self {
            pipelines,
            broker,
            abort,
            handles,
        })
    }

    pub fn nchan(&self) -> usize {
        self.pipelines.len()
    }

    fn pipeline(&self, ch: usize) -> CoreResult<&Arc<Mutex<Pipeline>>> {
        self.pipelines.get(ch).ok_or(CoreError::BadChannelIndex(ch))
    }

    /// spec §6 `configurePulseLengths(ch, nSamples, nPresamples)`.
    pub fn configure_pulse_lengths(&self, ch: usize, n_samples: usize, n_presamples: usize) -> CoreResult<()> {
        self.pipeline(ch)?.lock().configure_pulse_lengths(n_samples, n_presamples)
    }

    /// spec §6 `changeTriggerState(ch, state)`.
    pub fn change_trigger_state(&self, ch: usize, state: crate::trigger::TriggerState) -> CoreResult<()> {
        self.pipeline(ch)?.lock().configure_trigger(state)
    }

    /// spec §6 `configureMixFraction(ch, fraction)` (TDM only): `ch` must be
    /// an FB channel with an Err partner.
    pub fn configure_mix_fraction(&self, ch: usize, fraction: f64) -> CoreResult<()> {
        let pipeline = self.pipeline(ch)?;
        if mix_partner(ch, self.nchan()).is_none() {
            return Err(CoreError::UnsupportedOnThisSource);
        }
        pipeline.lock().configure_mix_fraction(fraction);
        Ok(())
    }

    /// spec §6 `configureProjectorsBasis(ch, projectors)`.
    pub fn configure_projectors_basis(&self, ch: usize, projectors: crate::analyze::Projectors) -> CoreResult<()> {
        self.pipeline(ch)?.lock().set_projectors_basis(projectors)
    }

    /// spec §6 `setCoupling(mode)`: replaces the broker's secondary-trigger
    /// connection matrix wholesale.
    pub fn set_coupling(&self, mode: CouplingMode) -> CoreResult<()> {
        self.broker.lock().set_coupling(mode)
    }

    /// spec §4.8 `stop()`: broadcast the abort flag and join every worker.
    /// Safe to call after the source itself has already been stopped (the
    /// workers will also unwind on their own once its channels close).
    pub fn stop(&mut self) {
        self.abort.store(true, Ordering::SeqCst);
        for h in self.handles.drain(..) {
            let _ = h.join();
        }
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.stop();
    }
}

/// spec §4.8: idempotent `sample() -> prepareRun() -> startRun()` plus
/// `Coordinator::spawn`, in one call.
pub fn start_run(src: &mut dyn Source, sample_rate: f64, sink: Arc<dyn Sink>) -> CoreResult<Coordinator> {
    let outputs = crate::source::start_source(src)?;
    Coordinator::spawn(outputs, sample_rate, sink)
}

fn spawn_tee(
    err_rx: Receiver<DataSegment>,
    err_local_tx: SyncSender<DataSegment>,
    mix_tx: SyncSender<DataSegment>,
    abort: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::spawn(move || loop {
        if abort.load(Ordering::SeqCst) {
            return;
        }
        match err_rx.recv_timeout(POLL) {
            Ok(segment) => {
                if mix_tx.send(segment.clone()).is_err() {
                    return;
                }
                if err_local_tx.send(segment).is_err() {
                    return;
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return,
        }
    })
}

#[allow(clippy::too_many_arguments)]
fn spawn_channel_worker(
    ch: usize,
    own_rx: Receiver<DataSegment>,
    mix_rx: Option<Receiver<DataSegment>>,
    pipeline: Arc<Mutex<Pipeline>>,
    primary_tx: SyncSender<TriggerList>,
    secondary_rx: Receiver<Vec<FrameIndex>>,
    sink: Arc<dyn Sink>,
    abort: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::spawn(move || loop {
        if abort.load(Ordering::SeqCst) {
            return;
        }
        let segment = match own_rx.recv_timeout(POLL) {
            Ok(s) => s,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return,
        };

        let (mut records, list) = match &mix_rx {
            Some(mix_rx) => {
                let err_segment = match mix_rx.recv() {
                    Ok(s) => s,
                    Err(_) => return,
                };
                pipeline.lock().process_paired_segments(segment, &err_segment)
            }
            None => pipeline.lock().process_segment(segment),
        };

        if primary_tx.send(list).is_err() {
            return;
        }
        match secondary_rx.recv() {
            Ok(frames) if !frames.is_empty() => {
                let extra = pipeline.lock().trigger_at_frames(&frames);
                records.extend(extra);
            }
            Ok(_) => {}
            Err(_) => return,
        }
        let _ = sink.on_records(ch, &records);
    })
}

/// Gathers exactly one [`TriggerList`] per channel per cycle (strict cycle
/// ordering: cycle k+1 cannot start collecting until cycle k's N lists have
/// all arrived), runs [`TriggerBroker::broker_cycle`], and hands each
/// channel its secondary frames back over a zero-capacity rendezvous
/// channel. Exits once every producer has disconnected, after draining
/// any already-collected partial cycle by discarding it — a torn-down
/// source never completes a final cycle.
fn spawn_broker(
    nchan: usize,
    broker: Arc<Mutex<TriggerBroker>>,
    primary_rx: Receiver<TriggerList>,
    secondary_txs: Vec<SyncSender<Vec<FrameIndex>>>,
    abort: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let mut pending: Vec<Option<TriggerList>> = (0..nchan).map(|_| None).collect();
        let mut have = 0usize;
        loop {
            if abort.load(Ordering::SeqCst) {
                return;
            }
            match primary_rx.recv_timeout(POLL) {
                Ok(list) => {
                    let idx = list.channel_index;
                    if idx < nchan && pending[idx].is_none() {
                        pending[idx] = Some(list);
                        have += 1;
                    }
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return,
            }

            if have == nchan {
                let primaries: Vec<TriggerList> = pending.iter_mut().map(|p| p.take().unwrap()).collect();
                have = 0;
                let secondaries = broker.lock().broker_cycle(&primaries);
                for (ch, frames) in secondaries.into_iter().enumerate() {
                    if secondary_txs[ch].send(frames).is_err() {
                        return;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use crate::source::{SimulatedSource, TriangleSourceConfig};
    use crate::trigger::TriggerState;

    #[test]
    fn mix_partner_follows_odd_even_convention() {
        assert_eq!(mix_partner(0, 4), None);
        assert_eq!(mix_partner(1, 4), Some(0));
        assert_eq!(mix_partner(2, 4), None);
        assert_eq!(mix_partner(3, 4), Some(2));
        assert_eq!(mix_partner(5, 6), Some(4));
    }

    #[test]
    fn end_to_end_run_drives_triggers_through_broker_and_into_sink() {
        let mut source = SimulatedSource::new();
        source
            .configure(TriangleSourceConfig {
                nchan: 4,
                sample_rate: 10_000.0,
                min: 100,
                max: 200,
            })
            .unwrap();
        let sink = Arc::new(MemorySink::new());
        let mut coordinator = start_run(&mut source, 10_000.0, sink.clone() as Arc<dyn Sink>).unwrap();

        for ch in 0..4 {
            let mut state = TriggerState::default();
            state.auto_trigger = true;
            state.auto_delay = Duration::from_millis(20);
            state.n_presamples = 10;
            state.n_samples = 40;
            coordinator.change_trigger_state(ch, state).unwrap();
        }
        coordinator.set_coupling(CouplingMode::FbToErr).unwrap();
        coordinator.configure_mix_fraction(1, 0.5).unwrap();
        assert!(coordinator.configure_mix_fraction(0, 0.5).is_err());

        std::thread::sleep(Duration::from_millis(500));
        source.stop().unwrap();
        coordinator.stop();

        for ch in 0..4 {
            assert!(sink.count(ch) > 0, "channel {ch} produced no records");
        }
    }
}
