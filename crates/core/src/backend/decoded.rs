use super::{
    clamp_time, Backend, CanPlayCallback, LoadOutcome, StreamErrorCallback, TimeUpdateCallback,
    UpdateCallback,
};
use crate::{
    audio::decode_bytes, AudioDevice, BackendKind, DecodedBuffer, PlayerConfig, Result,
    WaveplayError,
};

/// Plays audio that has been fully decoded into memory. Time is measured on
/// the device clock from the moment playback was last started.
pub struct DecodedBackend {
    device: Box<dyn AudioDevice>,
    initialised: bool,
    buffer: Option<DecodedBuffer>,
    paused: bool,
    start_position: f64,
    last_play: f64,
    update_interval: f64,
    last_update: f64,
    on_update: Option<UpdateCallback>,
    ending: bool,
}

impl DecodedBackend {
    pub fn new(device: Box<dyn AudioDevice>) -> Self {
        Self {
            device,
            initialised: false,
            buffer: None,
            paused: true,
            start_position: 0.0,
            last_play: 0.0,
            update_interval: PlayerConfig::default().update_interval(),
            last_update: 0.0,
            on_update: None,
            ending: false,
        }
    }

    /// Installs an already decoded buffer.
    pub fn set_buffer(&mut self, buffer: DecodedBuffer) {
        self.buffer = Some(buffer);
        self.paused = true;
        self.start_position = 0.0;
        self.ending = false;
    }
}

impl Backend for DecodedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Decoded
    }

    fn init(&mut self, config: &PlayerConfig) -> Result<()> {
        self.update_interval = config.update_interval();
        if self.initialised {
            return Ok(());
        }
        self.device.open().map_err(WaveplayError::Init)?;
        self.initialised = true;
        Ok(())
    }

    fn play(&mut self, offset: f64) -> Result<()> {
        if !self.initialised {
            return Err(WaveplayError::Init("backend used before init".to_string()));
        }
        if self.buffer.is_none() {
            return Err(WaveplayError::NotReady);
        }

        let now = self.device.now();
        self.start_position = clamp_time(offset, self.duration());
        self.last_play = now;
        self.last_update = now;
        self.paused = false;
        self.ending = false;
        Ok(())
    }

    fn pause(&mut self) {
        if !self.paused {
            self.start_position = self.current_time();
            self.paused = true;
        }
        self.ending = false;
    }

    fn is_paused(&self) -> bool {
        self.paused
    }

    fn current_time(&self) -> f64 {
        if self.buffer.is_none() {
            return 0.0;
        }
        if self.paused {
            return self.start_position;
        }
        let elapsed = self.device.now() - self.last_play;
        (self.start_position + elapsed).min(self.duration())
    }

    fn duration(&self) -> f64 {
        self.buffer.as_ref().map_or(0.0, DecodedBuffer::duration)
    }

    fn load_data(&mut self, bytes: Vec<u8>) -> LoadOutcome {
        match decode_bytes(bytes) {
            Ok(buffer) => {
                tracing::info!(duration = buffer.duration(), "audio decoded");
                self.set_buffer(buffer);
                LoadOutcome::Ready
            }
            Err(err) => {
                tracing::warn!(%err, "decoding failed, falling back to streaming");
                // The previous track must not play under the new source.
                self.buffer = None;
                self.paused = true;
                LoadOutcome::StreamFallback(err)
            }
        }
    }

    fn bind_update(&mut self, callback: UpdateCallback) {
        self.on_update = Some(callback);
    }

    fn stream_url(
        &mut self,
        _url: &str,
        _on_time_update: TimeUpdateCallback,
        _on_can_play: CanPlayCallback,
        _on_error: StreamErrorCallback,
    ) -> Result<()> {
        Err(WaveplayError::Unsupported("decoded"))
    }

    fn current_buffer(&self) -> Option<&DecodedBuffer> {
        self.buffer.as_ref()
    }

    fn poll(&mut self) {
        if self.paused || self.buffer.is_none() {
            return;
        }
        // The final update of a track has been delivered, stop now.
        if self.ending {
            self.pause();
            return;
        }

        let now = self.device.now();
        let finished = self.current_time() >= self.duration();
        if finished || now - self.last_update >= self.update_interval {
            self.last_update = now;
            if let Some(callback) = self.on_update.as_mut() {
                callback();
            }
        }
        self.ending = finished;
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::ManualDevice;

    fn backend_with(seconds: f64) -> (DecodedBackend, ManualDevice) {
        let clock = ManualDevice::new();
        let mut backend = DecodedBackend::new(Box::new(clock.clone()));
        backend.init(&PlayerConfig::default()).unwrap();
        backend.set_buffer(DecodedBuffer {
            samples: vec![0.0; (seconds * 100.0) as usize],
            sample_rate: 100,
            channels: 1,
        });
        (backend, clock)
    }

    #[test]
    fn init_fails_when_the_device_is_unavailable() {
        let mut backend = DecodedBackend::new(Box::new(ManualDevice::unavailable()));
        let err = backend.init(&PlayerConfig::default()).unwrap_err();
        assert!(matches!(err, WaveplayError::Init(_)));
    }

    #[test]
    fn play_requires_a_buffer() {
        let mut backend = DecodedBackend::new(Box::new(ManualDevice::new()));
        backend.init(&PlayerConfig::default()).unwrap();
        assert!(matches!(backend.play(0.0), Err(WaveplayError::NotReady)));
        assert!(backend.current_buffer().is_none());
        assert_eq!(backend.current_time(), 0.0);
        assert_eq!(backend.played_percents(), 0.0);
    }

    #[test]
    fn tracks_time_on_the_device_clock() {
        let (mut backend, clock) = backend_with(10.0);
        backend.play(2.0).unwrap();
        clock.advance(1.5);
        assert!((backend.current_time() - 3.5).abs() < 1e-9);

        backend.pause();
        clock.advance(5.0);
        assert!(backend.is_paused());
        assert!((backend.current_time() - 3.5).abs() < 1e-9);
        assert!((backend.played_percents() - 0.35).abs() < 1e-9);
    }

    #[test]
    fn play_clamps_offsets() {
        let (mut backend, _clock) = backend_with(10.0);
        backend.play(42.0).unwrap();
        assert_eq!(backend.current_time(), 10.0);
        backend.play(-1.0).unwrap();
        assert_eq!(backend.current_time(), 0.0);
    }

    #[test]
    fn updates_fire_at_the_configured_rate() {
        let (mut backend, clock) = backend_with(10.0);
        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        backend.bind_update(Box::new(move || counter.set(counter.get() + 1)));

        backend.poll();
        assert_eq!(calls.get(), 0, "nothing fires while paused");

        backend.play(0.0).unwrap();
        backend.poll();
        assert_eq!(calls.get(), 0);
        clock.advance(0.05);
        backend.poll();
        backend.poll();
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn reports_the_end_then_pauses() {
        let (mut backend, clock) = backend_with(1.0);
        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        backend.bind_update(Box::new(move || counter.set(counter.get() + 1)));

        backend.play(0.9).unwrap();
        clock.advance(0.5);
        backend.poll();
        assert_eq!(calls.get(), 1);
        assert!(!backend.is_paused());
        assert_eq!(backend.played_percents(), 1.0);

        backend.poll();
        assert!(backend.is_paused());
        assert_eq!(backend.current_time(), 1.0);
    }

    #[test]
    fn corrupt_bytes_request_a_stream_fallback() {
        let (mut backend, _clock) = backend_with(1.0);
        let outcome = backend.load_data(b"garbage".to_vec());
        assert!(matches!(
            outcome,
            LoadOutcome::StreamFallback(WaveplayError::Decode(_))
        ));
        assert!(backend.current_buffer().is_none());
        assert_eq!(backend.duration(), 0.0);
    }

    #[test]
    fn decodes_wav_data() {
        let mut backend = DecodedBackend::new(Box::new(ManualDevice::new()));
        let outcome = backend.load_data(crate::audio::fixtures::wav_bytes(1.5, 8_000, 1));
        assert!(matches!(outcome, LoadOutcome::Ready));
        assert!((backend.duration() - 1.5).abs() < 1e-6);
        assert!(backend.is_paused());
    }
}
