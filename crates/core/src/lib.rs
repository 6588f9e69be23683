//! Core library of the waveplay audio player.
//!
//! A [`PlayerController`] loads a source, decodes it through the
//! [`DecodedBackend`] (or streams it through a [`StreamingBackend`] when the
//! data cannot be decoded), drives a [`Renderer`] and reports playback through
//! an [`EventBus`]. Markers placed on the timeline fire `mark` events as the
//! play head crosses them.
//!
//! The controller is single threaded: the host calls
//! [`PlayerController::tick`] regularly and every callback runs inside it.

pub mod analysis;
pub mod audio;
pub mod backend;
pub mod config;
pub mod error;
pub mod events;
pub mod loader;
pub mod markers;
pub mod player;
pub mod render;

pub use analysis::SpectrumAnalyser;
pub use audio::{decode_bytes, AudioDevice, DecodedBuffer, ManualDevice, SystemDevice};
pub use backend::{
    Backend, ClockedElement, DecodedBackend, LoadOutcome, MediaElement, MediaEvent, StreamFrame,
    StreamingBackend,
};
pub use config::{BackendKind, PlayerConfig};
pub use error::{HandlerError, Result, WaveplayError};
pub use events::{EventBus, EventKind, HandlerId, HandlerResult, PlayerEvent, PlayerEventBus};
pub use loader::{FileLoader, HttpLoader, LoadProgress, Loader, SourceLoader};
pub use markers::{MarkOptions, Marker, MarkerRegistry, MarkerUpdate};
pub use player::{MediaFactory, PlayerBuilder, PlayerController, PlayerState};
pub use render::{RecordingRenderer, RenderCommand, Renderer};
