//! End-to-end tests for action potential propagation on an HH axon
//!
//! Tests validate:
//! - A brief stimulus at the bottom face triggers a spike that reaches the
//!   far end later than the near end
//! - The spike overshoots 0 mV and the axon repolarises afterwards
//! - Runs are reproducible under a fixed seed

use stoch_axon_rs::recording::{MemoryRecorder, Probe};
use stoch_axon_rs::{HhAxon, SimulationConfig, TetMesh};

const SPACING: f64 = 1e-6;

fn axon(cells: usize, config: &SimulationConfig) -> HhAxon {
    let _ = env_logger::builder().is_test(true).try_init();
    let mesh = TetMesh::cuboid([1, 1, cells], [SPACING; 3], [0.0; 3]).expect("mesh");
    HhAxon::new(mesh, config).expect("axon")
}

fn first_crossing(times: &[f64], values: &[f64], threshold: f64) -> Option<f64> {
    times
        .iter()
        .zip(values)
        .find(|&(_, &v)| v > threshold)
        .map(|(&t, _)| t)
}

#[test]
fn test_spike_propagates_and_repolarises() {
    let cells = 100;
    let config = SimulationConfig {
        report_dt: 1e-5,
        ..SimulationConfig::default()
    };
    let mut axon = axon(cells, &config);
    let near = 5.0 * SPACING;
    let far = (cells as f64 - 5.0) * SPACING;
    let probes = [
        Probe::PointPotential([0.5 * SPACING, 0.5 * SPACING, near]),
        Probe::PointPotential([0.5 * SPACING, 0.5 * SPACING, far]),
    ];
    let mut recorder = MemoryRecorder::new();
    axon.record(&probes, config.report_dt, &mut recorder)
        .expect("recording");

    axon.set_stimulus(300e-12).expect("stimulus");
    axon.run(0.5e-3, &mut recorder).expect("stimulus phase");
    axon.set_stimulus(0.0).expect("stimulus off");
    axon.run(5e-3, &mut recorder).expect("recovery phase");

    let times = recorder.times();
    let near_v = recorder.series(0);
    let far_v = recorder.series(1);
    let t_near = first_crossing(times, &near_v, 0.0).expect("near end spikes");
    let t_far = first_crossing(times, &far_v, 0.0).expect("far end spikes");
    assert!(t_near <= t_far, "near {t_near} far {t_far}");
    assert!(t_far - t_near < 1e-3, "spike took {} s to travel", t_far - t_near);

    let peak = far_v.iter().cloned().fold(f64::MIN, f64::max);
    assert!(peak > 0.0 && peak < 60e-3, "peak {peak}");
    for (&t, &v) in times.iter().zip(&near_v) {
        assert!(v > -0.1 && v < 0.06, "potential {v} out of range at {t}");
    }
    for &v in axon.simulation().field().potentials() {
        assert!(v < -40e-3, "not repolarised: {v}");
    }
}

#[test]
fn test_fixed_seed_is_reproducible() {
    let config = SimulationConfig {
        end_time: 4e-4,
        ..SimulationConfig::default()
    };
    let run = || {
        let mut axon = axon(10, &config);
        let probes = axon.axial_probes(2.0 * SPACING);
        let mut recorder = MemoryRecorder::new();
        axon.record(&probes, config.report_dt, &mut recorder)
            .expect("recording");
        axon.run(config.end_time, &mut recorder).expect("run");
        recorder.rows().to_vec()
    };
    let first = run();
    assert_eq!(first.len(), 5);
    assert_eq!(first, run());
}
