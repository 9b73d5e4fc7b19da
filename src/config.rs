//! Persisted per-channel `TriggerState` (spec §6 `ConfigStore`). Real
//! configuration storage (a database, a config service) is out of scope
//! (spec Non-goals); this is a JSON-file-backed implementation sufficient
//! to exercise the trait end-to-end.

use crate::error::{CoreError, CoreResult};
use crate::trigger::TriggerState;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub trait ConfigStore: Send + Sync {
    fn load_trigger_state(&self, channel_index: usize) -> CoreResult<TriggerState>;
    fn save_trigger_state(&mut self, channel_index: usize, state: TriggerState) -> CoreResult<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct SerializableTriggerState {
    auto_trigger: bool,
    auto_delay_ms: u64,
    edge_trigger: bool,
    edge_level: i32,
    edge_rising: bool,
    level_trigger: bool,
    level_threshold: i32,
    level_rising: bool,
    edge_multi: bool,
    edge_multi_level: i32,
    edge_multi_verify_n_monotone: usize,
    edge_multi_make_contaminated: bool,
    edge_multi_make_short: bool,
    edge_multi_noise: bool,
    edge_multi_disable_zero_threshold: bool,
    n_presamples: usize,
    n_samples: usize,
}

impl From<TriggerState> for SerializableTriggerState {
    fn from(s: TriggerState) -> Self {
        Self {
            auto_trigger: s.auto_trigger,
            auto_delay_ms: s.auto_delay.as_millis() as u64,
            edge_trigger: s.edge_trigger,
            edge_level: s.edge_level,
            edge_rising: s.edge_rising,
            level_trigger: s.level_trigger,
            level_threshold: s.level_threshold,
            level_rising: s.level_rising,
            edge_multi: s.edge_multi,
            edge_multi_level: s.edge_multi_level,
            edge_multi_verify_n_monotone: s.edge_multi_verify_n_monotone,
            edge_multi_make_contaminated: s.edge_multi_make_contaminated,
            edge_multi_make_short: s.edge_multi_make_short,
            edge_multi_noise: s.edge_multi_noise,
            edge_multi_disable_zero_threshold: s.edge_multi_disable_zero_threshold,
            n_presamples: s.n_presamples,
            n_samples: s.n_samples,
        }
    }
}

impl From<SerializableTriggerState> for TriggerState {
    fn from(s: SerializableTriggerState) -> Self {
        Self {
            auto_trigger: s.auto_trigger,
            auto_delay: std::time::Duration::from_millis(s.auto_delay_ms),
            edge_trigger: s.edge_trigger,
            edge_level: s.edge_level,
            edge_rising: s.edge_rising,
            level_trigger: s.level_trigger,
            level_threshold: s.level_threshold,
            level_rising: s.level_rising,
            edge_multi: s.edge_multi,
            edge_multi_level: s.edge_multi_level,
            edge_multi_verify_n_monotone: s.edge_multi_verify_n_monotone,
            edge_multi_make_contaminated: s.edge_multi_make_contaminated,
            edge_multi_make_short: s.edge_multi_make_short,
            edge_multi_noise: s.edge_multi_noise,
            edge_multi_disable_zero_threshold: s.edge_multi_disable_zero_threshold,
            n_presamples: s.n_presamples,
            n_samples: s.n_samples,
        }
    }
}

/// JSON-file-backed store, one file holding all channels' states.
pub struct JsonConfigStore {
    path: PathBuf,
    states: HashMap<usize, SerializableTriggerState>,
}

impl JsonConfigStore {
    pub fn open(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let states = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| CoreError::BadRecordShape(e.to_string()))?;
            serde_json::from_str(&text).map_err(|e| CoreError::BadRecordShape(e.to_string()))?
        } else {
            HashMap::new()
        };
        Ok(Self { path, states })
    }

    fn flush(&self) -> CoreResult<()> {
        let text = serde_json::to_string_pretty(&self.states)
            .map_err(|e| CoreError::BadRecordShape(e.to_string()))?;
        std::fs::write(&self.path, text).map_err(|e| CoreError::BadRecordShape(e.to_string()))
    }
}

impl ConfigStore for JsonConfigStore {
    fn load_trigger_state(&self, channel_index: usize) -> CoreResult<TriggerState> {
        Ok(self
            .states
            .get(&channel_index)
            .cloned()
            .map(TriggerState::from)
            .unwrap_or_default())
    }

    fn save_trigger_state(&mut self, channel_index: usize, state: TriggerState) -> CoreResult<()> {
        self.states.insert(channel_index, state.into());
        self.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_a_json_file() {
        let dir = std::env::temp_dir().join(format!("tes-daq-core-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("triggers.json");

        let mut store = JsonConfigStore::open(&path).unwrap();
        let mut state = TriggerState::default();
        state.edge_trigger = true;
        state.edge_level = 321;
        store.save_trigger_state(2, state).unwrap();

        let reopened = JsonConfigStore::open(&path).unwrap();
        let loaded = reopened.load_trigger_state(2).unwrap();
        assert!(loaded.edge_trigger);
        assert_eq!(loaded.edge_level, 321);

        let default_channel = reopened.load_trigger_state(99).unwrap();
        assert_eq!(default_channel, TriggerState::default());

        std::fs::remove_dir_all(&dir).ok();
    }
}
