use super::{
    clamp_time, Backend, CanPlayCallback, LoadOutcome, MediaElement, MediaEvent,
    StreamErrorCallback, TimeUpdateCallback, UpdateCallback,
};
use crate::{BackendKind, DecodedBuffer, PlayerConfig, Result, WaveplayError};

/// Plays through a [`MediaElement`] while its data is still arriving.
/// Progress is only as precise as the element's duration estimate.
pub struct StreamingBackend {
    element: Box<dyn MediaElement>,
    initialised: bool,
    on_update: Option<UpdateCallback>,
    on_time_update: Option<TimeUpdateCallback>,
    on_can_play: Option<CanPlayCallback>,
    on_error: Option<StreamErrorCallback>,
}

impl StreamingBackend {
    pub fn new(element: Box<dyn MediaElement>) -> Self {
        Self {
            element,
            initialised: false,
            on_update: None,
            on_time_update: None,
            on_can_play: None,
            on_error: None,
        }
    }
}

impl Backend for StreamingBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Streaming
    }

    fn init(&mut self, _config: &PlayerConfig) -> Result<()> {
        if self.initialised {
            return Ok(());
        }
        self.element.init().map_err(WaveplayError::Init)?;
        self.initialised = true;
        Ok(())
    }

    fn play(&mut self, offset: f64) -> Result<()> {
        if !self.initialised {
            return Err(WaveplayError::Init("backend used before init".to_string()));
        }
        let offset = match self.element.duration() {
            Some(duration) => clamp_time(offset, duration),
            None => clamp_time(offset, f64::INFINITY),
        };
        self.element.seek(offset);
        self.element.play();
        Ok(())
    }

    fn pause(&mut self) {
        self.element.pause();
    }

    fn is_paused(&self) -> bool {
        self.element.is_paused()
    }

    fn current_time(&self) -> f64 {
        self.element.current_time()
    }

    fn duration(&self) -> f64 {
        self.element.duration().unwrap_or(0.0)
    }

    fn load_data(&mut self, _bytes: Vec<u8>) -> LoadOutcome {
        LoadOutcome::StreamFallback(WaveplayError::Unsupported("streaming"))
    }

    fn bind_update(&mut self, callback: UpdateCallback) {
        self.on_update = Some(callback);
    }

    fn stream_url(
        &mut self,
        url: &str,
        on_time_update: TimeUpdateCallback,
        on_can_play: CanPlayCallback,
        on_error: StreamErrorCallback,
    ) -> Result<()> {
        self.element.load(url)?;
        self.on_time_update = Some(on_time_update);
        self.on_can_play = Some(on_can_play);
        self.on_error = Some(on_error);
        Ok(())
    }

    fn current_buffer(&self) -> Option<&DecodedBuffer> {
        None
    }

    fn poll(&mut self) {
        for event in self.element.poll_events() {
            match event {
                MediaEvent::TimeUpdate(frame) => {
                    if let Some(callback) = self.on_time_update.as_mut() {
                        callback(frame);
                    }
                    if !self.element.is_paused() {
                        if let Some(callback) = self.on_update.as_mut() {
                            callback();
                        }
                    }
                }
                MediaEvent::CanPlay => {
                    if let Some(callback) = self.on_can_play.take() {
                        callback();
                    }
                }
                MediaEvent::Ended => tracing::debug!("stream ended"),
                MediaEvent::Failed(reason) => {
                    self.on_can_play = None;
                    if let Some(callback) = self.on_error.take() {
                        callback(reason);
                    }
                }
            }
        }
    }
}
