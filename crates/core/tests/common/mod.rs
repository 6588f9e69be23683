#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use waveplay_core::{EventKind, PlayerController, PlayerEvent};

/// 16-bit mono PCM WAV of `seconds` length.
pub fn wav_bytes(seconds: f64, sample_rate: u32) -> Vec<u8> {
    let frames = (seconds * f64::from(sample_rate)).round() as u32;
    let data_len = frames * 2;
    let mut bytes = Vec::with_capacity(44 + data_len as usize);
    bytes.extend_from_slice(b"RIFF");
    bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
    bytes.extend_from_slice(b"WAVEfmt ");
    bytes.extend_from_slice(&16u32.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes());
    bytes.extend_from_slice(&sample_rate.to_le_bytes());
    bytes.extend_from_slice(&(sample_rate * 2).to_le_bytes());
    bytes.extend_from_slice(&2u16.to_le_bytes());
    bytes.extend_from_slice(&16u16.to_le_bytes());
    bytes.extend_from_slice(b"data");
    bytes.extend_from_slice(&data_len.to_le_bytes());
    for frame in 0..frames {
        let value = ((frame % 64) as i16 - 32) * 256;
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

pub fn write_source(dir: &Path, name: &str, bytes: &[u8]) -> String {
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path.to_str().unwrap().to_string()
}

/// Ticks `player` until `done` holds, giving loader threads time to run.
pub fn tick_until(player: &mut PlayerController, done: impl Fn(&PlayerController) -> bool) -> bool {
    for _ in 0..400 {
        player.tick().unwrap();
        if done(player) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

/// Records every event of the given kinds.
pub fn record(player: &PlayerController, kinds: &[EventKind]) -> Arc<Mutex<Vec<PlayerEvent>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    for kind in kinds {
        let sink = Arc::clone(&log);
        player.on(*kind, move |event| {
            sink.lock().unwrap().push(event.clone());
            Ok(())
        });
    }
    log
}
