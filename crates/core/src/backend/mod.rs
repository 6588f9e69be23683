//! Interchangeable playback backends.
//!
//! A backend owns the playback position: it starts and pauses audio, reports
//! time and duration, and invokes the callbacks bound by the controller. The
//! controller holds exactly one backend at a time behind [`Backend`] and
//! replaces it wholesale when falling back to streaming.

mod decoded;
mod element;
mod streaming;

pub use decoded::DecodedBackend;
pub use element::ClockedElement;
pub use streaming::StreamingBackend;

use crate::{BackendKind, DecodedBuffer, PlayerConfig, Result, WaveplayError};

/// Invoked periodically while a backend plays.
pub type UpdateCallback = Box<dyn FnMut()>;
/// Receives live sample data while a source streams in.
pub type TimeUpdateCallback = Box<dyn FnMut(StreamFrame)>;
/// Invoked once when a stream has buffered enough to start.
pub type CanPlayCallback = Box<dyn FnOnce()>;
/// Invoked once, with the reason, when a stream cannot be fetched.
pub type StreamErrorCallback = Box<dyn FnOnce(String)>;

/// Result of handing raw bytes to a backend.
#[derive(Debug)]
pub enum LoadOutcome {
    /// A playable buffer is available.
    Ready,
    /// The bytes could not be decoded; play the original source as a stream
    /// instead.
    StreamFallback(WaveplayError),
}

/// Live data for one stream position.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamFrame {
    /// Stream time in seconds.
    pub time: f64,
    /// Magnitude spectrum of the data around `time`.
    pub spectrum: Vec<f32>,
}

pub trait Backend {
    fn kind(&self) -> BackendKind;

    /// Acquires the audio subsystem. Calling it again is a no-op.
    fn init(&mut self, config: &PlayerConfig) -> Result<()>;

    /// Starts playing from `offset` seconds, clamped to `[0, duration]`.
    fn play(&mut self, offset: f64) -> Result<()>;

    /// Freezes the current time.
    fn pause(&mut self);

    fn is_paused(&self) -> bool;

    /// Seconds played, 0 before playback started.
    fn current_time(&self) -> f64;

    /// Total seconds, 0 while unknown. May grow while a stream arrives.
    fn duration(&self) -> f64;

    /// Fraction of the duration played, in `[0, 1]`.
    fn played_percents(&self) -> f64 {
        let duration = self.duration();
        if duration <= 0.0 {
            return 0.0;
        }
        (self.current_time() / duration).clamp(0.0, 1.0)
    }

    /// Prepares raw bytes for playback. Never fails outright: data the
    /// backend cannot use is reported as [`LoadOutcome::StreamFallback`].
    fn load_data(&mut self, bytes: Vec<u8>) -> LoadOutcome;

    /// Registers the callback driving the controller's progress loop.
    fn bind_update(&mut self, callback: UpdateCallback);

    /// Starts streaming `url`. `on_error` fires instead of `on_can_play`
    /// when nothing playable arrives.
    fn stream_url(
        &mut self,
        url: &str,
        on_time_update: TimeUpdateCallback,
        on_can_play: CanPlayCallback,
        on_error: StreamErrorCallback,
    ) -> Result<()>;

    /// Decoded audio, present once the backend has playable data.
    fn current_buffer(&self) -> Option<&DecodedBuffer>;

    /// Lets the backend invoke due callbacks. Called by the controller on
    /// every tick; the backend decides how often callbacks actually fire.
    fn poll(&mut self);
}

/// Clamps `seconds` to `[0, duration]`, mapping NaN to 0.
pub(crate) fn clamp_time(seconds: f64, duration: f64) -> f64 {
    seconds.max(0.0).min(duration.max(0.0))
}

/// A streaming media player, e.g. an audio element handed over by the host.
pub trait MediaElement {
    fn init(&mut self) -> std::result::Result<(), String>;

    /// Starts fetching `url`.
    fn load(&mut self, url: &str) -> Result<()>;
    fn play(&mut self);
    fn pause(&mut self);
    fn is_paused(&self) -> bool;
    fn seek(&mut self, seconds: f64);
    fn current_time(&self) -> f64;

    /// `None` until the length of the stream can be estimated.
    fn duration(&self) -> Option<f64>;

    /// Events raised since the previous call.
    fn poll_events(&mut self) -> Vec<MediaEvent>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum MediaEvent {
    TimeUpdate(StreamFrame),
    CanPlay,
    Ended,
    /// The source could not be fetched; nothing will play.
    Failed(String),
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::{MediaElement, MediaEvent, StreamFrame};
    use crate::Result;

    #[derive(Default)]
    pub struct FakeState {
        pub loaded: Option<String>,
        pub paused: bool,
        pub time: f64,
        pub duration: Option<f64>,
        pub pending: Vec<MediaEvent>,
    }

    /// Scripted media element. Clones share state, so a test keeps one
    /// handle to move the play head and queue events.
    #[derive(Clone, Default)]
    pub struct FakeElement(pub Rc<RefCell<FakeState>>);

    impl FakeElement {
        pub fn push(&self, event: MediaEvent) {
            self.0.borrow_mut().pending.push(event);
        }

        /// Moves the play head and queues the matching time update.
        pub fn advance_to(&self, time: f64, duration: f64) {
            let mut state = self.0.borrow_mut();
            state.time = time;
            state.duration = Some(duration);
            state.pending.push(MediaEvent::TimeUpdate(StreamFrame {
                time,
                spectrum: Vec::new(),
            }));
        }
    }

    impl MediaElement for FakeElement {
        fn init(&mut self) -> std::result::Result<(), String> {
            self.0.borrow_mut().paused = true;
            Ok(())
        }

        fn load(&mut self, url: &str) -> Result<()> {
            self.0.borrow_mut().loaded = Some(url.to_string());
            Ok(())
        }

        fn play(&mut self) {
            self.0.borrow_mut().paused = false;
        }

        fn pause(&mut self) {
            self.0.borrow_mut().paused = true;
        }

        fn is_paused(&self) -> bool {
            self.0.borrow().paused
        }

        fn seek(&mut self, seconds: f64) {
            self.0.borrow_mut().time = seconds;
        }

        fn current_time(&self) -> f64 {
            self.0.borrow().time
        }

        fn duration(&self) -> Option<f64> {
            self.0.borrow().duration
        }

        fn poll_events(&mut self) -> Vec<MediaEvent> {
            std::mem::take(&mut self.0.borrow_mut().pending)
        }
    }
}
