//! Cross-channel secondary-trigger broker (spec §4.5), grounded on
//! `original_source/triggering_test.go TestBrokerConnections`/`TestBrokering`.
//!
//! Each channel submits its primary [`TriggerList`] once per cycle; the
//! broker fans each sender's frames out to every receiver connected to it
//! (an N×N boolean matrix), then returns one secondary frame list per
//! channel. [`TriggerBroker::broker_cycle`] is the pure per-cycle
//! computation; `coordinator.rs` runs it as a worker that gathers all N
//! channels' primary lists before each cycle and blocks each channel's
//! output on a zero-capacity rendezvous channel, which is what enforces a
//! cycle not completing until every receiver has consumed it (spec §4.5, §5).

use crate::error::{CoreError, CoreResult};
use crate::stream::FrameIndex;
use crate::trigger::TriggerList;

/// FB/Err coupling presets for even(Err)/odd(FB) channel-index pairs
/// (spec §3 `CoupledChannelOutput`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CouplingMode {
    NoCoupling,
    FbToErr,
    ErrToFb,
}

/// N×N connection matrix plus the per-cycle fan-in/fan-out operation.
#[derive(Debug, Clone)]
pub struct TriggerBroker {
    n: usize,
    connections: Vec<Vec<bool>>,
}

impl TriggerBroker {
    pub fn new(n: usize) -> Self {
        Self {
            n,
            connections: vec![vec![false; n]; n],
        }
    }

    fn check_index(&self, i: usize) -> CoreResult<()> {
        if i >= self.n {
            return Err(CoreError::BadChannelIndex(i));
        }
        Ok(())
    }

    pub fn add_connection(&mut self, src: usize, rx: usize) -> CoreResult<()> {
        self.check_index(src)?;
        self.check_index(rx)?;
        self.connections[src][rx] = true;
        Ok(())
    }

    pub fn delete_connection(&mut self, src: usize, rx: usize) -> CoreResult<()> {
        self.check_index(src)?;
        self.check_index(rx)?;
        self.connections[src][rx] = false;
        Ok(())
    }

    pub fn is_connected(&self, src: usize, rx: usize) -> bool {
        if src >= self.n || rx >= self.n {
            return false;
        }
        self.connections[src][rx]
    }

    /// The set of receivers connected to `src`'s triggers, or an empty
    /// vector if `src` is out of range.
    pub fn connections(&self, src: usize) -> Vec<bool> {
        if src >= self.n {
            return Vec::new();
        }
        self.connections[src].clone()
    }

    /// Replace all connections with one of the FB/Err pairing presets.
    pub fn set_coupling(&mut self, mode: CouplingMode) -> CoreResult<()> {
        for row in &mut self.connections {
            row.iter_mut().for_each(|c| *c = false);
        }
        match mode {
            CouplingMode::NoCoupling => {}
            CouplingMode::FbToErr => {
                // odd (FB) channel src connects to its preceding even (Err) channel.
                for src in (1..self.n).step_by(2) {
                    self.connections[src][src - 1] = true;
                }
            }
            CouplingMode::ErrToFb => {
                // even (Err) channel src connects to its following odd (FB) channel.
                for src in (0..self.n).step_by(2) {
                    if src + 1 < self.n {
                        self.connections[src][src + 1] = true;
                    }
                }
            }
        }
        Ok(())
    }

    /// Run one fan-in/fan-out cycle: `primaries` must contain exactly one
    /// [`TriggerList`] per channel (indexed by `channel_index`). Returns one
    /// secondary frame list per channel, each the sorted concatenation of
    /// every connected sender's frames (duplicates are not collapsed).
    pub fn broker_cycle(&self, primaries: &[TriggerList]) -> Vec<Vec<FrameIndex>> {
        let mut secondaries = vec![Vec::new(); self.n];
        for (rx_idx, out) in secondaries.iter_mut().enumerate() {
            for list in primaries {
                if self.is_connected(list.channel_index, rx_idx) {
                    out.extend_from_slice(&list.frames);
                }
            }
            out.sort_unstable();
        }
        secondaries
    }
}
