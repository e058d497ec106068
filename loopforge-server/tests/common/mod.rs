//! Shared fixtures for the integration suites.

use std::path::Path;
use std::sync::Arc;

use loopforge_common::config::ForgeConfig;
use loopforge_common::db::init_test_database;
use loopforge_common::{EventBus, Storage};
use loopforge_server::engines::audio::write_wav;
use loopforge_server::queue::JobQueue;
use loopforge_server::{workers, AppState};

pub const SAMPLE_RATE: u32 = 44100;

/// A percussive WAV fixture: decaying noise bursts every half second.
pub fn write_percussive_wav(path: &Path, seconds: f32) {
    let total = (seconds * SAMPLE_RATE as f32) as usize;
    let mut mono = vec![0.0f32; total];
    let mut pos = 0;
    while pos < total {
        for i in 0..2048.min(total - pos) {
            let t = i as f32 / SAMPLE_RATE as f32;
            let pseudo = ((i as f32 * 12.9898).sin() * 43758.547).fract();
            mono[pos + i] = (pseudo * 2.0 - 1.0) * 0.8 * (-t * 80.0).exp();
        }
        pos += SAMPLE_RATE as usize / 2;
    }
    write_wav(path, &[mono.clone(), mono], SAMPLE_RATE).unwrap();
}

/// Full application state over a temp directory, quick mode on, workers
/// registered and the queue running.
pub async fn test_state(dir: &Path) -> AppState {
    let pool = init_test_database().await.unwrap();
    let storage = Storage::new(dir.join("storage")).unwrap();
    let event_bus = EventBus::new(1024);
    let config = ForgeConfig {
        data_dir: dir.to_path_buf(),
        storage_dir: dir.join("storage"),
        quick_mode: true,
        max_upload_mb: 250,
        max_workers: 2,
    };

    let queue = Arc::new(JobQueue::new(
        pool.clone(),
        event_bus.clone(),
        storage.clone(),
        config.clone(),
    ));
    workers::register_all(&queue);
    queue.start().await.unwrap();

    AppState::new(pool, storage, event_bus, queue, config)
}
