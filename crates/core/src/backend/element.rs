use std::sync::Arc;

use crossbeam_channel::{Receiver, TryRecvError};

use super::{clamp_time, MediaElement, MediaEvent, StreamFrame};
use crate::{analysis::SpectrumAnalyser, AudioDevice, Loader, PlayerConfig, Result};

/// Bytes inspected around the play head for each stream frame.
const FRAME_BYTES: usize = 256;

enum StreamChunk {
    Data(Vec<u8>),
    End,
    Failed(String),
}

/// Streaming [`MediaElement`] that plays against a device clock while bytes
/// arrive from a [`Loader`] running on a worker thread.
///
/// The element does not decode. Received bytes are converted to seconds with
/// a nominal bitrate, which makes the duration an estimate that grows until
/// the stream ends. Playback stalls at the buffered edge.
pub struct ClockedElement {
    device: Box<dyn AudioDevice>,
    loader: Arc<dyn Loader>,
    bytes_per_second: f64,
    can_play_seconds: f64,
    update_interval: f64,
    incoming: Option<Receiver<StreamChunk>>,
    received: Vec<u8>,
    complete: bool,
    failure: Option<String>,
    paused: bool,
    start_position: f64,
    last_play: f64,
    last_time_update: f64,
    can_play_sent: bool,
    ending: bool,
    analyser: SpectrumAnalyser,
}

impl ClockedElement {
    pub fn new(
        device: Box<dyn AudioDevice>,
        loader: Arc<dyn Loader>,
        config: &PlayerConfig,
    ) -> Self {
        Self {
            device,
            loader,
            bytes_per_second: config.stream_bytes_per_second(),
            can_play_seconds: config.can_play_seconds,
            update_interval: config.update_interval(),
            incoming: None,
            received: Vec::new(),
            complete: false,
            failure: None,
            paused: true,
            start_position: 0.0,
            last_play: 0.0,
            last_time_update: 0.0,
            can_play_sent: false,
            ending: false,
            analyser: SpectrumAnalyser::new(),
        }
    }

    /// Appends bytes received outside of [`MediaElement::load`].
    pub fn feed(&mut self, bytes: &[u8]) {
        self.received.extend_from_slice(bytes);
    }

    /// Marks the stream as complete; the duration stops growing.
    pub fn finish(&mut self) {
        self.complete = true;
    }

    pub fn buffered_seconds(&self) -> f64 {
        self.received.len() as f64 / self.bytes_per_second
    }

    fn drain_incoming(&mut self) {
        let Some(incoming) = self.incoming.as_ref() else {
            return;
        };
        loop {
            match incoming.try_recv() {
                Ok(StreamChunk::Data(bytes)) => self.received.extend_from_slice(&bytes),
                Ok(StreamChunk::End) => {
                    self.complete = true;
                    break;
                }
                Ok(StreamChunk::Failed(reason)) if self.received.is_empty() => {
                    self.failure = Some(reason);
                    self.complete = true;
                    break;
                }
                Ok(StreamChunk::Failed(reason)) => {
                    tracing::warn!(%reason, "stream interrupted, playing what was received");
                    self.complete = true;
                    break;
                }
                Err(TryRecvError::Empty) => return,
                Err(TryRecvError::Disconnected) => {
                    if self.received.is_empty() {
                        self.failure = Some("stream closed before any data arrived".to_string());
                    }
                    self.complete = true;
                    break;
                }
            }
        }
        self.incoming = None;
    }

    fn frame_at(&mut self, time: f64) -> StreamFrame {
        let center = (time * self.bytes_per_second) as usize;
        let start = center.saturating_sub(FRAME_BYTES / 2).min(self.received.len());
        let end = (start + FRAME_BYTES).min(self.received.len());
        let samples: Vec<f32> = self.received[start..end]
            .iter()
            .map(|byte| (f32::from(*byte) - 128.0) / 128.0)
            .collect();
        let spectrum = self.analyser.magnitudes(&samples).unwrap_or_default();
        StreamFrame { time, spectrum }
    }
}

impl MediaElement for ClockedElement {
    fn init(&mut self) -> std::result::Result<(), String> {
        self.device.open()
    }

    fn load(&mut self, url: &str) -> Result<()> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let loader = Arc::clone(&self.loader);
        let source = url.to_string();
        std::thread::Builder::new()
            .name("waveplay-stream".to_string())
            .spawn(move || {
                let result = loader.read(&source, &mut |chunk, _| {
                    let _ = sender.send(StreamChunk::Data(chunk.to_vec()));
                });
                let last = match result {
                    Ok(()) => StreamChunk::End,
                    Err(err) => StreamChunk::Failed(err.to_string()),
                };
                let _ = sender.send(last);
            })?;

        self.incoming = Some(receiver);
        self.received.clear();
        self.complete = false;
        self.failure = None;
        self.paused = true;
        self.start_position = 0.0;
        self.can_play_sent = false;
        self.ending = false;
        tracing::info!(url, "streaming started");
        Ok(())
    }

    fn play(&mut self) {
        if self.paused {
            let now = self.device.now();
            self.last_play = now;
            self.last_time_update = now - self.update_interval;
            self.paused = false;
        }
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

    fn seek(&mut self, seconds: f64) {
        self.start_position = clamp_time(seconds, self.buffered_seconds());
        self.last_play = self.device.now();
        self.ending = false;
    }

    fn current_time(&self) -> f64 {
        if self.paused {
            return self.start_position;
        }
        let elapsed = self.device.now() - self.last_play;
        (self.start_position + elapsed).min(self.buffered_seconds())
    }

    fn duration(&self) -> Option<f64> {
        if self.received.is_empty() && !self.complete {
            None
        } else {
            Some(self.buffered_seconds())
        }
    }

    fn poll_events(&mut self) -> Vec<MediaEvent> {
        self.drain_incoming();

        let mut events = Vec::new();
        if let Some(reason) = self.failure.take() {
            events.push(MediaEvent::Failed(reason));
            return events;
        }
        let buffered = self.buffered_seconds();
        if !self.can_play_sent
            && (buffered >= self.can_play_seconds || (self.complete && buffered > 0.0))
        {
            self.can_play_sent = true;
            events.push(MediaEvent::CanPlay);
        }

        if self.paused {
            return events;
        }
        if self.ending {
            self.pause();
            events.push(MediaEvent::Ended);
            return events;
        }

        let now = self.device.now();
        let time = self.current_time();
        if time >= buffered {
            if self.complete {
                self.ending = true;
                events.push(MediaEvent::TimeUpdate(self.frame_at(buffered)));
                return events;
            }
            // Starved: hold the play head at the buffered edge.
            self.start_position = buffered;
            self.last_play = now;
        }

        if now - self.last_time_update >= self.update_interval {
            self.last_time_update = now;
            events.push(MediaEvent::TimeUpdate(self.frame_at(time)));
        }
        events
    }
}
