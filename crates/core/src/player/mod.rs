//! The orchestration core: owns the active backend, the markers and the
//! event bus, and turns backend ticks into `progress`, `mark` and `seek`
//! events.
//!
//! Everything runs on the thread that owns the [`PlayerController`]. Loader
//! threads and backend callbacks never touch controller state directly; they
//! post generation-tagged [`Message`]s into the controller's inbox, which
//! [`PlayerController::tick`] drains. Starting a new load or replacing the
//! backend bumps the generation, so messages from superseded work are
//! dropped when they finally arrive.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};

use crate::backend::{
    clamp_time, Backend, ClockedElement, DecodedBackend, LoadOutcome, MediaElement,
    StreamFrame, StreamingBackend,
};
use crate::events::{EventKind, HandlerId, HandlerResult, PlayerEvent, PlayerEventBus};
use crate::markers::{progress_bucket, MarkOptions, Marker, MarkerRegistry, MarkerUpdate};
use crate::{
    AudioDevice, BackendKind, LoadProgress, Loader, PlayerConfig, Renderer, Result, SourceLoader,
    SystemDevice, WaveplayError,
};

/// Builds the media element used when playback falls back to streaming.
pub type MediaFactory = Box<dyn FnMut() -> Box<dyn MediaElement>>;

/// Target used in error events for data handed over in memory.
const IN_MEMORY_SOURCE: &str = "<in-memory data>";

/// Lifecycle of a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Idle,
    Loading,
    Ready,
    Playing,
    Paused,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Idle,
    Loading,
    Loaded,
}

/// Continuations posted to the controller's inbox.
#[derive(Debug)]
enum Message {
    LoadProgress { generation: u64, fraction: f64 },
    Loaded { generation: u64, bytes: Vec<u8> },
    LoadFailed { generation: u64, target: String, reason: String },
    Update { generation: u64 },
    TimeUpdate { generation: u64, frame: StreamFrame },
    CanPlay { generation: u64 },
}

impl Message {
    fn generation(&self) -> u64 {
        match self {
            Self::LoadProgress { generation, .. }
            | Self::Loaded { generation, .. }
            | Self::LoadFailed { generation, .. }
            | Self::Update { generation }
            | Self::TimeUpdate { generation, .. }
            | Self::CanPlay { generation } => *generation,
        }
    }
}

/// Collects the collaborators of a [`PlayerController`].
pub struct PlayerBuilder {
    config: PlayerConfig,
    renderer: Box<dyn Renderer>,
    device: Option<Box<dyn AudioDevice>>,
    audio: Option<Box<dyn MediaElement>>,
    media: Option<MediaFactory>,
    loader: Arc<dyn Loader>,
}

impl PlayerBuilder {
    pub fn new(config: PlayerConfig, renderer: Box<dyn Renderer>) -> Self {
        Self {
            config,
            renderer,
            device: None,
            audio: None,
            media: None,
            loader: Arc::new(SourceLoader::new()),
        }
    }

    /// Audio device of the decoded backend. Defaults to [`SystemDevice`].
    pub fn device(mut self, device: Box<dyn AudioDevice>) -> Self {
        self.device = Some(device);
        self
    }

    /// Pre-supplied audio handle. Selects the streaming backend.
    pub fn audio(mut self, element: Box<dyn MediaElement>) -> Self {
        self.audio = Some(element);
        self
    }

    /// Factory for streaming elements. Defaults to a [`ClockedElement`] on
    /// the system clock.
    pub fn media_factory(mut self, factory: MediaFactory) -> Self {
        self.media = Some(factory);
        self
    }

    pub fn loader(mut self, loader: Arc<dyn Loader>) -> Self {
        self.loader = loader;
        self
    }

    /// Validates the configuration and initialises the backend.
    pub fn build(self) -> Result<PlayerController> {
        let PlayerBuilder {
            config,
            renderer,
            device,
            audio,
            media,
            loader,
        } = self;
        config.validate()?;

        let mut media: MediaFactory = match media {
            Some(factory) => factory,
            None => {
                let loader = Arc::clone(&loader);
                let config = config.clone();
                Box::new(move || -> Box<dyn MediaElement> {
                    Box::new(ClockedElement::new(
                        Box::new(SystemDevice::new()),
                        Arc::clone(&loader),
                        &config,
                    ))
                })
            }
        };

        let mut backend: Box<dyn Backend> = match (audio, config.backend) {
            (Some(element), _) => Box::new(StreamingBackend::new(element)),
            (None, BackendKind::Streaming) => Box::new(StreamingBackend::new(media())),
            (None, BackendKind::Decoded) => {
                let device: Box<dyn AudioDevice> = match device {
                    Some(device) => device,
                    None => Box::new(SystemDevice::new()),
                };
                Box::new(DecodedBackend::new(device))
            }
        };
        backend.init(&config)?;
        tracing::debug!(backend = backend.kind().as_str(), "player initialised");

        let (outbox, inbox) = crossbeam_channel::unbounded();
        Ok(PlayerController {
            config,
            backend,
            parked: None,
            renderer,
            markers: MarkerRegistry::new(),
            events: PlayerEventBus::new(),
            media,
            loader,
            inbox,
            outbox,
            generation: 0,
            stage: Stage::Idle,
            started: false,
            stopped: false,
            source: None,
            last_bucket: None,
            last_error: None,
        })
    }
}

/// Playback, seek and annotation API over one backend, one renderer and a
/// set of markers.
pub struct PlayerController {
    config: PlayerConfig,
    backend: Box<dyn Backend>,
    /// Decoded backend set aside while one source falls back to streaming.
    parked: Option<Box<dyn Backend>>,
    renderer: Box<dyn Renderer>,
    markers: MarkerRegistry,
    events: PlayerEventBus,
    media: MediaFactory,
    loader: Arc<dyn Loader>,
    inbox: Receiver<Message>,
    outbox: Sender<Message>,
    generation: u64,
    stage: Stage,
    started: bool,
    stopped: bool,
    source: Option<String>,
    last_bucket: Option<i64>,
    last_error: Option<WaveplayError>,
}

impl PlayerController {
    pub fn builder(config: PlayerConfig, renderer: Box<dyn Renderer>) -> PlayerBuilder {
        PlayerBuilder::new(config, renderer)
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    pub fn state(&self) -> PlayerState {
        match self.stage {
            Stage::Idle => PlayerState::Idle,
            Stage::Loading => PlayerState::Loading,
            Stage::Loaded if !self.backend.is_paused() => PlayerState::Playing,
            Stage::Loaded if self.stopped => PlayerState::Stopped,
            Stage::Loaded if self.started => PlayerState::Paused,
            Stage::Loaded => PlayerState::Ready,
        }
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// True once the backend holds decoded, playable data.
    pub fn is_ready(&self) -> bool {
        self.backend.current_buffer().is_some()
    }

    pub fn is_paused(&self) -> bool {
        self.backend.is_paused()
    }

    pub fn current_time(&self) -> f64 {
        self.backend.current_time()
    }

    pub fn duration(&self) -> f64 {
        self.backend.duration()
    }

    pub fn played_percents(&self) -> f64 {
        self.backend.played_percents()
    }

    pub fn markers(&self) -> &MarkerRegistry {
        &self.markers
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// The most recent load failure, if any.
    pub fn last_error(&self) -> Option<&WaveplayError> {
        self.last_error.as_ref()
    }

    /// Handle on the event bus, e.g. for handlers that fire their own events.
    pub fn events(&self) -> &PlayerEventBus {
        &self.events
    }

    pub fn on<F>(&self, kind: EventKind, handler: F) -> HandlerId
    where
        F: Fn(&PlayerEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.events.on(kind, handler)
    }

    pub fn off(&self, id: HandlerId) -> bool {
        self.events.off(id)
    }

    /// Fetches `source` on a worker thread, then decodes it, falling back to
    /// streaming when decoding is not possible. Completion is delivered by
    /// [`tick`](Self::tick).
    pub fn load(&mut self, source: &str) -> Result<()> {
        let generation = self.begin_load(Some(source));
        if self.backend.kind() == BackendKind::Streaming {
            return self.start_stream(source);
        }

        let loader = Arc::clone(&self.loader);
        let outbox = self.outbox.clone();
        let target = source.to_string();
        let reports_progress = loader.reports_progress(source);
        std::thread::Builder::new()
            .name("waveplay-load".to_string())
            .spawn(move || {
                let mut on_progress = |step: LoadProgress| {
                    if reports_progress {
                        let _ = outbox.send(Message::LoadProgress {
                            generation,
                            fraction: step.fraction(),
                        });
                    }
                };
                let message = match loader.fetch(&target, &mut on_progress) {
                    Ok(bytes) => Message::Loaded { generation, bytes },
                    Err(err) => Message::LoadFailed {
                        generation,
                        target: target.clone(),
                        reason: err.to_string(),
                    },
                };
                let _ = outbox.send(message);
            })?;
        Ok(())
    }

    /// Loads bytes that are already in memory, e.g. a dropped file. There is
    /// no source to stream from, so undecodable data is reported through an
    /// `error` event.
    pub fn load_bytes(&mut self, bytes: Vec<u8>) -> Result<()> {
        self.begin_load(None);
        self.finish_load(bytes)
    }

    fn begin_load(&mut self, source: Option<&str>) -> u64 {
        self.generation += 1;
        self.backend.pause();
        // A fallback only applies to the source that needed it.
        if let Some(decoded) = self.parked.take() {
            tracing::debug!("restoring the decoded backend");
            self.backend = decoded;
        }
        self.stage = Stage::Loading;
        self.started = false;
        self.stopped = false;
        self.last_bucket = None;
        self.last_error = None;
        self.source = source.map(str::to_string);
        tracing::info!(source, generation = self.generation, "loading");
        self.generation
    }

    /// Decode-attempt stage: `ready` or fallback-to-stream.
    fn finish_load(&mut self, bytes: Vec<u8>) -> Result<()> {
        self.renderer.draw_loading(1.0);
        match self.backend.load_data(bytes) {
            LoadOutcome::Ready => self.on_ready(),
            LoadOutcome::StreamFallback(err) => match self.source.clone() {
                Some(source) => {
                    tracing::warn!(%err, source, "falling back to streaming playback");
                    self.start_stream(&source)
                }
                None => self.fail_load(IN_MEMORY_SOURCE.to_string(), err),
            },
        }
    }

    fn on_ready(&mut self) -> Result<()> {
        let Some(buffer) = self.backend.current_buffer() else {
            return Ok(());
        };
        self.renderer.draw_buffer(buffer);
        self.bind_update();
        self.stage = Stage::Loaded;
        tracing::info!(duration = self.backend.duration(), "ready");
        self.events.fire(&PlayerEvent::Ready)?;
        Ok(())
    }

    fn fail_load(&mut self, target: String, err: WaveplayError) -> Result<()> {
        tracing::warn!(source = target.as_str(), %err, "load failed");
        let reason = match &err {
            WaveplayError::Load { reason, .. } => reason.clone(),
            other => other.to_string(),
        };
        self.stage = Stage::Idle;
        self.last_error = Some(err);
        self.events.fire(&PlayerEvent::Error { target, reason })?;
        Ok(())
    }

    /// Swaps in a streaming backend (unless one is active) and streams `url`.
    /// The decoded backend is parked until the next load.
    fn start_stream(&mut self, url: &str) -> Result<()> {
        if self.backend.kind() != BackendKind::Streaming {
            let mut backend = StreamingBackend::new((self.media)());
            backend.init(&self.config)?;
            self.parked = Some(std::mem::replace(&mut self.backend, Box::new(backend)));
            self.generation += 1;
        }

        let generation = self.generation;
        let frames = self.outbox.clone();
        let can_play = self.outbox.clone();
        let failures = self.outbox.clone();
        let target = url.to_string();
        self.backend.stream_url(
            url,
            Box::new(move |frame| {
                let _ = frames.send(Message::TimeUpdate { generation, frame });
            }),
            Box::new(move || {
                let _ = can_play.send(Message::CanPlay { generation });
            }),
            Box::new(move |reason| {
                let _ = failures.send(Message::LoadFailed {
                    generation,
                    target,
                    reason,
                });
            }),
        )?;
        self.bind_update();
        Ok(())
    }

    fn bind_update(&mut self) {
        let generation = self.generation;
        let outbox = self.outbox.clone();
        self.backend.bind_update(Box::new(move || {
            let _ = outbox.send(Message::Update { generation });
        }));
    }

    /// Runs one cooperative step: lets the backend fire due callbacks, then
    /// handles every pending message.
    pub fn tick(&mut self) -> Result<()> {
        self.backend.poll();
        while let Ok(message) = self.inbox.try_recv() {
            if message.generation() != self.generation {
                tracing::debug!(
                    generation = message.generation(),
                    current = self.generation,
                    "dropping stale message"
                );
                continue;
            }
            self.dispatch(message)?;
        }
        Ok(())
    }

    fn dispatch(&mut self, message: Message) -> Result<()> {
        match message {
            Message::LoadProgress { fraction, .. } => {
                self.renderer.draw_loading(fraction);
                self.events.fire(&PlayerEvent::Loading(fraction))?;
            }
            Message::Loaded { bytes, .. } => self.finish_load(bytes)?,
            Message::LoadFailed { target, reason, .. } => {
                let err = WaveplayError::Load {
                    target: target.clone(),
                    reason,
                };
                self.fail_load(target, err)?;
            }
            Message::Update { .. } => {
                if !self.backend.is_paused() {
                    self.on_audio_process()?;
                }
            }
            Message::TimeUpdate { frame, .. } => {
                let percentage = self.backend.played_percents();
                self.renderer.set_cursor(percentage);
                self.renderer.draw_stream_frame(&frame, percentage);
            }
            Message::CanPlay { .. } => {
                self.renderer
                    .set_min_width(self.backend.duration().floor() as u32);
                let resume_at = self.backend.current_time();
                self.backend.play(resume_at)?;
                self.rearm_markers(self.backend.played_percents());
                self.stage = Stage::Loaded;
                self.started = true;
                tracing::info!(duration = self.backend.duration(), "stream can play");
            }
        }
        Ok(())
    }

    /// One progress tick: `progress` first, then every marker crossed since
    /// the previous tick.
    fn on_audio_process(&mut self) -> Result<()> {
        let progress = self.backend.played_percents();
        self.renderer.progress(progress);
        self.events.fire(&PlayerEvent::Progress(progress))?;

        let resolution = self.resolution();
        let bucket = progress_bucket(progress, resolution);
        let crossed = self.markers.crossed(self.last_bucket, bucket, resolution);
        // A shrinking percentage (e.g. a growing stream) must not re-arm markers.
        self.last_bucket = Some(self.last_bucket.map_or(bucket, |last| last.max(bucket)));
        for marker in crossed {
            tracing::debug!(id = marker.id.as_str(), progress, "marker reached");
            self.events.fire(&PlayerEvent::Mark(marker))?;
        }
        Ok(())
    }

    /// Granularity shared by live progress and markers when matching.
    fn resolution(&self) -> u32 {
        self.config
            .marker_resolution
            .unwrap_or_else(|| self.renderer.width())
            .max(1)
    }

    /// Moves the marker watermark to just before the bucket of `percentage`,
    /// so markers from there on fire again.
    fn rearm_markers(&mut self, percentage: f64) {
        let landing = progress_bucket(clamp_time(percentage, 1.0), self.resolution());
        self.last_bucket = Some(landing - 1);
    }

    /// Plays from `percentage` of the duration.
    pub fn play_at(&mut self, percentage: f64) -> Result<()> {
        self.start_at(percentage)?;
        self.rearm_markers(percentage);
        Ok(())
    }

    fn start_at(&mut self, percentage: f64) -> Result<()> {
        let offset = self.backend.duration() * percentage;
        self.backend.play(offset)?;
        self.started = true;
        self.stopped = false;
        Ok(())
    }

    pub fn play(&mut self) -> Result<()> {
        if self.backend.is_paused() {
            self.play_pause()
        } else {
            Ok(())
        }
    }

    pub fn pause(&mut self) {
        self.backend.pause();
    }

    /// Toggles playback. Resuming at the end of the track restarts it.
    pub fn play_pause(&mut self) -> Result<()> {
        if self.backend.is_paused() {
            let played = self.backend.played_percents();
            if played >= 1.0 {
                return self.play_at(0.0);
            }
            if self.last_bucket.is_none() {
                return self.play_at(played);
            }
            // Resuming keeps the watermark so the current bucket is not replayed.
            self.start_at(played)
        } else {
            self.pause();
            Ok(())
        }
    }

    /// `(position, duration)` after moving `offset` seconds, the position
    /// clamped to the track. An unknown duration counts as 1 second.
    pub fn timings(&self, offset: f64) -> (f64, f64) {
        let duration = match self.backend.duration() {
            d if d > 0.0 && d.is_finite() => d,
            _ => 1.0,
        };
        let position = clamp_time(self.backend.current_time() + offset, duration);
        (position, duration)
    }

    pub fn skip(&mut self, offset: f64) -> Result<()> {
        let (position, duration) = self.timings(offset);
        self.seek_to(position / duration)
    }

    /// Skips forward by `seconds`, or by the configured skip length.
    pub fn skip_forward(&mut self, seconds: Option<f64>) -> Result<()> {
        let seconds = seconds.unwrap_or(self.config.skip_length);
        self.skip(seconds.abs())
    }

    /// Skips backward by `seconds`, or by the configured skip length.
    pub fn skip_backward(&mut self, seconds: Option<f64>) -> Result<()> {
        let seconds = seconds.unwrap_or(self.config.skip_length);
        self.skip(-seconds.abs())
    }

    /// Moves playback to `percentage`. A paused player stays paused: the
    /// backend is played and paused again at the target, since some backends
    /// only move their clock when playing, and the progress is redrawn.
    pub fn seek_to(&mut self, percentage: f64) -> Result<()> {
        let percentage = clamp_time(percentage, 1.0);
        let paused = self.backend.is_paused();
        self.play_at(percentage)?;
        if paused {
            self.backend.pause();
            self.renderer.progress(percentage);
        }
        tracing::debug!(percentage, paused, "seek");
        self.events.fire(&PlayerEvent::Seek(percentage))?;
        Ok(())
    }

    /// Rewinds to the start and pauses.
    pub fn stop(&mut self) -> Result<()> {
        self.play_at(0.0)?;
        self.backend.pause();
        self.renderer.progress(0.0);
        self.stopped = true;
        Ok(())
    }

    /// Handles a click `offset_x` pixels into a waveform `client_width`
    /// pixels wide: seeks there, then fires `click`.
    pub fn click(&mut self, offset_x: f64, client_width: f64) -> Result<()> {
        if client_width.is_nan() || client_width <= 0.0 {
            return Err(WaveplayError::InvalidInput("click target has no width"));
        }
        let progress = offset_x / client_width;
        self.seek_to(progress)?;
        self.events.fire(&PlayerEvent::Click(progress))?;
        Ok(())
    }

    /// Creates or overwrites a marker. Rejected with
    /// [`WaveplayError::NotReady`] until a duration is known.
    pub fn mark(&mut self, options: MarkOptions) -> Result<Marker> {
        if self.stage != Stage::Loaded {
            return Err(WaveplayError::NotReady);
        }
        let (position, duration) = self.timings(0.0);
        let marker = self.markers.mark(&options, position, duration)?;
        self.renderer.upsert_marker(&marker);
        self.refresh_marker(&marker, options.center);
        Ok(marker)
    }

    pub fn update_mark(&mut self, id: &str, update: MarkerUpdate) -> Result<Option<Marker>> {
        let (_, duration) = self.timings(0.0);
        let updated = self.markers.update(id, &update, duration)?;
        if let Some(marker) = &updated {
            self.renderer.upsert_marker(marker);
            self.refresh_marker(marker, update.center);
        }
        Ok(updated)
    }

    pub fn remove_mark(&mut self, id: &str) -> Option<Marker> {
        let removed = self.markers.remove(id);
        if removed.is_some() {
            self.renderer.remove_marker(id);
            if self.backend.is_paused() {
                self.renderer.redraw();
            }
        }
        removed
    }

    /// Removes all markers and restarts automatic ids at `_m0`.
    pub fn clear_marks(&mut self) {
        self.markers.clear();
        self.renderer.clear_markers();
    }

    fn refresh_marker(&mut self, marker: &Marker, center: bool) {
        if self.backend.is_paused() {
            self.renderer.redraw();
            if center {
                self.renderer.recenter(marker.percentage);
            }
        }
    }
}

impl std::fmt::Debug for PlayerController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayerController")
            .field("backend", &self.backend.kind())
            .field("state", &self.state())
            .field("generation", &self.generation)
            .field("source", &self.source)
            .field("markers", &self.markers.len())
            .finish()
    }
}
