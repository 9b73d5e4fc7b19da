//! Source lifecycle and the one concrete `Source` shipped with this crate:
//! a deterministic triangle-wave generator (spec §4.8, grounded on
//! `original_source/data_source.go AnySource` and
//! `original_source/simulated_data_test.go TriangleSource`).

use crate::error::{CoreError, CoreResult};
use crate::stream::{DataSegment, FrameIndex, RawSample};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Capability trait every hardware or simulated data source implements
/// (spec §4.8 `AnySource`/`DataSource`). `sample()` probes channel count
/// and timing without starting acquisition; `prepare_run()` allocates
/// per-channel output queues; `start()` spawns the generator thread(s).
pub trait Source: Send {
    fn sample(&mut self) -> CoreResult<()>;
    fn prepare_run(&mut self) -> CoreResult<Vec<Receiver<DataSegment>>>;
    fn start(&mut self) -> CoreResult<()>;
    fn stop(&mut self) -> CoreResult<()>;
    fn running(&self) -> bool;
    fn nchan(&self) -> usize;
}

/// Idempotent start helper matching spec §4.8's `Start(ds) = Sample() ->
/// PrepareRun() -> Start()`.
pub fn start_source(src: &mut dyn Source) -> CoreResult<Vec<Receiver<DataSegment>>> {
    if src.running() {
        return Err(CoreError::AlreadyRunning);
    }
    src.sample()?;
    let outputs = src.prepare_run()?;
    src.start()?;
    Ok(outputs)
}

#[derive(Debug, Clone, Copy)]
pub struct TriangleSourceConfig {
    pub nchan: usize,
    pub sample_rate: f64,
    pub min: RawSample,
    pub max: RawSample,
}

/// Generates an identical triangle wave on every channel: ramps
/// `min..max` then `max..min`, repeating. Degenerate `min == max`
/// produces a fixed 1001-sample cycle instead of a zero-length one
/// (matches the original's `cycleLen` fallback).
pub struct SimulatedSource {
    config: Option<TriangleSourceConfig>,
    running: Arc<AtomicBool>,
    senders: Vec<SyncSender<DataSegment>>,
    segment_len: usize,
    handles: Vec<std::thread::JoinHandle<()>>,
}

impl Default for SimulatedSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedSource {
    pub fn new() -> Self {
        Self {
            config: None,
            running: Arc::new(AtomicBool::new(false)),
            senders: Vec::new(),
            segment_len: 0,
            handles: Vec::new(),
        }
    }

    pub fn configure(&mut self, config: TriangleSourceConfig) -> CoreResult<()> {
        if config.nchan == 0 {
            return Err(CoreError::BadChannelIndex(0));
        }
        if config.min > config.max {
            return Err(CoreError::BadRecordShape(
                "triangle source min must not exceed max".into(),
            ));
        }
        let n = (config.max - config.min) as usize;
        self.segment_len = if n == 0 { 1001 } else { 2 * n };
        self.config = Some(config);
        Ok(())
    }

    fn cycle_len(&self) -> usize {
        self.segment_len
    }

    fn generate_segment(config: &TriangleSourceConfig, n: usize, first_frame: FrameIndex) -> DataSegment {
        let half = (config.max - config.min) as usize;
        let mut data = Vec::with_capacity(n);
        if half == 0 {
            data.resize(n, config.min);
        } else {
            for j in 0..half {
                data.push(config.min + j as RawSample);
            }
            for j in 0..half {
                data.push(config.max - j as RawSample);
            }
        }
        DataSegment::new(
            data,
            false,
            1,
            first_frame,
            SystemTime::now(),
            Duration::from_secs_f64(1.0 / config.sample_rate),
            1.0,
            0,
        )
    }
}

impl Source for SimulatedSource {
    fn sample(&mut self) -> CoreResult<()> {
        if self.config.is_none() {
            return Err(CoreError::NotConfigured);
        }
        Ok(())
    }

    fn prepare_run(&mut self) -> CoreResult<Vec<Receiver<DataSegment>>> {
        let config = self.config.ok_or(CoreError::NotConfigured)?;
        let mut receivers = Vec::with_capacity(config.nchan);
        self.senders.clear();
        for _ in 0..config.nchan {
            let (tx, rx) = sync_channel(16);
            self.senders.push(tx);
            receivers.push(rx);
        }
        Ok(receivers)
    }

    fn start(&mut self) -> CoreResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(CoreError::AlreadyRunning);
        }
        let config = self.config.ok_or(CoreError::NotConfigured)?;
        let cycle_len = self.cycle_len();
        for tx in self.senders.clone() {
            let running = Arc::clone(&self.running);
            let handle = std::thread::spawn(move || {
                let mut first_frame: FrameIndex = 0;
                'gen: while running.load(Ordering::SeqCst) {
                    let mut segment = SimulatedSource::generate_segment(&config, cycle_len, first_frame);
                    first_frame += cycle_len as FrameIndex;
                    // Blocking send gives the required backpressure, but must
                    // still notice `stop()` if the consumer has gone idle.
                    loop {
                        match tx.try_send(segment) {
                            Ok(()) => break,
                            Err(std::sync::mpsc::TrySendError::Disconnected(_)) => break 'gen,
                            Err(std::sync::mpsc::TrySendError::Full(returned)) => {
                                if !running.load(Ordering::SeqCst) {
                                    break 'gen;
                                }
                                segment = returned;
                                std::thread::sleep(Duration::from_millis(5));
                            }
                        }
                    }
                }
            });
            self.handles.push(handle);
        }
        Ok(())
    }

    fn stop(&mut self) -> CoreResult<()> {
        self.running.store(false, Ordering::SeqCst);
        for h in self.handles.drain(..) {
            let _ = h.join();
        }
        self.senders.clear();
        Ok(())
    }

    fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn nchan(&self) -> usize {
        self.config.map(|c| c.nchan).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn triangle_wave_first_and_second_segments_match_testtriangle() {
        let mut src = SimulatedSource::new();
        let config = TriangleSourceConfig {
            nchan: 4,
            sample_rate: 10000.0,
            min: 100,
            max: 200,
        };
        src.configure(config).unwrap();
        assert!(!src.running());
        let outputs = start_source(&mut src).unwrap();
        assert_eq!(outputs.len(), config.nchan);

        let n = (config.max - config.min) as usize;
        for rx in &outputs {
            let segment = rx.recv().unwrap();
            assert_eq!(segment.raw_data.len(), 2 * n);
            for j in 0..n {
                assert_eq!(segment.raw_data[j], config.min + j as RawSample);
                assert_eq!(segment.raw_data[j + n], config.max - j as RawSample);
            }
            assert_eq!(segment.first_frame_num, 0);
        }
        for rx in &outputs {
            let segment = rx.recv().unwrap();
            assert_eq!(segment.first_frame_num, (2 * n) as FrameIndex);
        }
        src.stop().unwrap();
        assert!(!src.running());
    }

    #[test]
    fn degenerate_min_equals_max_uses_fallback_cycle_len() {
        let mut src = SimulatedSource::new();
        src.configure(TriangleSourceConfig {
            nchan: 1,
            sample_rate: 10000.0,
            min: 200,
            max: 200,
        })
        .unwrap();
        assert_eq!(src.cycle_len(), 1001);
    }

    #[test]
    fn zero_channels_rejected() {
        let mut src = SimulatedSource::new();
        let err = src
            .configure(TriangleSourceConfig {
                nchan: 0,
                sample_rate: 10000.0,
                min: 100,
                max: 200,
            })
            .unwrap_err();
        assert_eq!(err, CoreError::BadChannelIndex(0));
    }

    #[test]
    fn double_start_is_rejected() {
        let mut src = SimulatedSource::new();
        src.configure(TriangleSourceConfig {
            nchan: 1,
            sample_rate: 10000.0,
            min: 0,
            max: 10,
        })
        .unwrap();
        start_source(&mut src).unwrap();
        assert!(start_source(&mut src).is_err());
        src.stop().unwrap();
    }
}
