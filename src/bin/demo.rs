//! End-to-end demo: a simulated triangle-wave source feeds the runtime
//! coordinator, which spawns a pipeline worker per channel plus the
//! cross-channel trigger broker, and finished records land in an in-memory
//! sink.

use std::sync::Arc;
use std::time::Duration;
use tes_daq_core::broker::CouplingMode;
use tes_daq_core::coordinator::start_run;
use tes_daq_core::sink::{MemorySink, Sink};
use tes_daq_core::source::{SimulatedSource, Source, TriangleSourceConfig};
use tes_daq_core::trigger::TriggerState;

fn main() {
    env_logger::init();

    const NCHAN: usize = 4;
    const SAMPLE_RATE: f64 = 10_000.0;

    let mut source = SimulatedSource::new();
    source
        .configure(TriangleSourceConfig {
            nchan: NCHAN,
            sample_rate: SAMPLE_RATE,
            min: 100,
            max: 200,
        })
        .expect("configure");

    let sink = Arc::new(MemorySink::new());
    let mut coordinator =
        start_run(&mut source, SAMPLE_RATE, sink.clone() as Arc<dyn Sink>).expect("start run");

    for ch in 0..NCHAN {
        let mut state = TriggerState::default();
        state.auto_trigger = true;
        state.auto_delay = Duration::from_millis(100);
        state.n_presamples = 50;
        state.n_samples = 200;
        coordinator
            .change_trigger_state(ch, state)
            .expect("valid trigger state");
    }
    coordinator
        .set_coupling(CouplingMode::FbToErr)
        .expect("valid coupling mode");
    coordinator
        .configure_mix_fraction(1, 0.5)
        .expect("channel 1 is an FB channel");

    std::thread::sleep(Duration::from_secs(1));

    source.stop().expect("stop source");
    coordinator.stop();

    for ch in 0..NCHAN {
        println!("channel {ch}: {} records", sink.count(ch));
    }
}
