use std::sync::{Arc, Mutex, PoisonError};

use indexmap::IndexMap;

use crate::{backend::StreamFrame, markers::Marker, DecodedBuffer};

/// Drawing surface the controller reports to. Pixel-level drawing is left to
/// implementations; the controller only relies on this contract.
pub trait Renderer {
    /// Pixel resolution, used as the default marker normalisation grid.
    fn width(&self) -> u32;
    fn progress(&mut self, percentage: f64);
    fn draw_buffer(&mut self, buffer: &DecodedBuffer);
    fn draw_loading(&mut self, percentage: f64);
    fn set_cursor(&mut self, percentage: f64);
    fn draw_stream_frame(&mut self, frame: &StreamFrame, percentage: f64);
    fn redraw(&mut self);
    fn recenter(&mut self, percentage: f64);
    fn set_min_width(&mut self, seconds: u32);
    /// Mirrors a marker into the renderer's own store, keyed by id.
    fn upsert_marker(&mut self, marker: &Marker);
    fn remove_marker(&mut self, id: &str);
    fn clear_markers(&mut self);
}

/// One call made on a [`RecordingRenderer`].
#[derive(Debug, Clone, PartialEq)]
pub enum RenderCommand {
    Progress(f64),
    DrawBuffer { duration: f64 },
    DrawLoading(f64),
    SetCursor(f64),
    DrawStreamFrame { time: f64, percentage: f64 },
    Redraw,
    Recenter(f64),
    SetMinWidth(u32),
}

#[derive(Debug, Default)]
struct RenderState {
    commands: Vec<RenderCommand>,
    markers: IndexMap<String, Marker>,
}

/// Renderer that records every call instead of drawing. Clones share the
/// same log so a host can keep a handle after giving the renderer away.
#[derive(Debug, Clone)]
pub struct RecordingRenderer {
    width: u32,
    state: Arc<Mutex<RenderState>>,
}

impl RecordingRenderer {
    pub fn new(width: u32) -> Self {
        Self {
            width,
            state: Arc::new(Mutex::new(RenderState::default())),
        }
    }

    pub fn commands(&self) -> Vec<RenderCommand> {
        self.lock().commands.clone()
    }

    /// Returns and forgets the commands recorded so far.
    pub fn take_commands(&self) -> Vec<RenderCommand> {
        std::mem::take(&mut self.lock().commands)
    }

    /// Most recent playback position drawn, by `progress` or `set_cursor`.
    pub fn last_progress(&self) -> Option<f64> {
        self.lock()
            .commands
            .iter()
            .rev()
            .find_map(|command| match command {
                RenderCommand::Progress(p) | RenderCommand::SetCursor(p) => Some(*p),
                _ => None,
            })
    }

    pub fn markers(&self) -> Vec<Marker> {
        self.lock().markers.values().cloned().collect()
    }

    fn record(&self, command: RenderCommand) {
        self.lock().commands.push(command);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RenderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Renderer for RecordingRenderer {
    fn width(&self) -> u32 {
        self.width
    }

    fn progress(&mut self, percentage: f64) {
        self.record(RenderCommand::Progress(percentage));
    }

    fn draw_buffer(&mut self, buffer: &DecodedBuffer) {
        self.record(RenderCommand::DrawBuffer {
            duration: buffer.duration(),
        });
    }

    fn draw_loading(&mut self, percentage: f64) {
        self.record(RenderCommand::DrawLoading(percentage));
    }

    fn set_cursor(&mut self, percentage: f64) {
        self.record(RenderCommand::SetCursor(percentage));
    }

    fn draw_stream_frame(&mut self, frame: &StreamFrame, percentage: f64) {
        self.record(RenderCommand::DrawStreamFrame {
            time: frame.time,
            percentage,
        });
    }

    fn redraw(&mut self) {
        self.record(RenderCommand::Redraw);
    }

    fn recenter(&mut self, percentage: f64) {
        self.record(RenderCommand::Recenter(percentage));
    }

    fn set_min_width(&mut self, seconds: u32) {
        self.record(RenderCommand::SetMinWidth(seconds));
    }

    fn upsert_marker(&mut self, marker: &Marker) {
        self.lock().markers.insert(marker.id.clone(), marker.clone());
    }

    fn remove_marker(&mut self, id: &str) {
        self.lock().markers.shift_remove(id);
    }

    fn clear_markers(&mut self) {
        self.lock().markers.clear();
    }
}
