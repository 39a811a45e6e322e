//! Recording a run and replaying it.

use deluge_engine::prelude::*;
use deluge_kernel::playback::FramePlayer;

fn config() -> SimulationConfig {
    SimulationConfig {
        grid_size: 16,
        cell_size: 2.0,
        max_height: 50.0,
        backend: BackendKind::Cpu,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_replay_reproduces_recorded_mass() {
    let dir = tempfile::tempdir().expect("tempdir");
    let live = SimulationConfig {
        record_dir: Some(dir.path().to_path_buf()),
        ..config()
    };
    let sim = FluidSimulation::init(live, &FlatTerrain::new(0.0))
        .await
        .expect("init");
    let center = sim.extent().center();
    sim.add_water_source_position(center.lon, center.lat);

    let mut recorded = vec![sim.info().total_water];
    for _ in 0..12 {
        sim.tick_once();
        recorded.push(sim.info().total_water);
    }
    drop(sim);
    assert!(recorded.last().is_some_and(|&w| w > 0));

    let replay = SimulationConfig {
        playback_dir: Some(dir.path().to_path_buf()),
        ..config()
    };
    let session = PlaybackSession::open(&replay).expect("open recording");
    let mut replayed = Vec::new();
    while session.step() {
        replayed.push(session.info().total_water);
    }
    assert_eq!(replayed, recorded);
}

#[test]
fn test_recording_of_wrong_grid_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("frame_000000.bin"), vec![0u8; 8 * 8 * 4]).expect("write");

    let replay = SimulationConfig {
        playback_dir: Some(dir.path().to_path_buf()),
        ..config()
    };
    assert!(PlaybackSession::open(&replay).is_err());
    assert!(FramePlayer::from_dir(dir.path(), 8, 50.0).is_ok());
}
