use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use waveplay_core::{
    decode_bytes, BackendKind, DecodedBuffer, EventKind, Loader, MarkOptions, Marker,
    PlayerConfig, PlayerController, PlayerEvent, PlayerState, Renderer, SourceLoader, StreamFrame,
};

const TICK: Duration = Duration::from_millis(33);

fn main() -> waveplay_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Play {
            source,
            marks,
            config,
            width,
            stream,
        } => {
            let mut config = load_config(config.as_ref())?;
            if stream {
                config.backend = BackendKind::Streaming;
            }
            run_play(&source, &marks, config, width)
        }
        Commands::Inspect { source, width } => run_inspect(&source, width),
        Commands::Config { config } => {
            println!("{}", load_config(config.as_ref())?.to_json_pretty()?);
            Ok(())
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> waveplay_core::Result<PlayerConfig> {
    match path {
        Some(path) => PlayerConfig::from_json_file(path),
        None => Ok(PlayerConfig::default()),
    }
}

fn run_play(
    source: &str,
    marks: &[f64],
    config: PlayerConfig,
    width: u32,
) -> waveplay_core::Result<()> {
    tracing::info!(source, backend = config.backend.as_str(), "starting playback");

    let mut player = PlayerController::builder(config, Box::new(TerminalRenderer::new(width)))
        .build()?;
    player.on(EventKind::Mark, |event| {
        if let PlayerEvent::Mark(marker) = event {
            eprintln!();
            tracing::info!(id = marker.id.as_str(), position = marker.position, "mark");
        }
        Ok(())
    });
    player.on(EventKind::Error, |event| {
        if let PlayerEvent::Error { target, reason } = event {
            tracing::error!(source = target.as_str(), reason = reason.as_str(), "load error");
        }
        Ok(())
    });

    player.load(source)?;
    while player.state() == PlayerState::Loading {
        player.tick()?;
        std::thread::sleep(TICK);
    }
    if let Some(err) = player.last_error() {
        return Err(waveplay_core::WaveplayError::msg(err.to_string()));
    }

    for position in marks {
        let marker = player.mark(MarkOptions::at(*position))?;
        tracing::debug!(id = marker.id.as_str(), percentage = marker.percentage, "marker added");
    }
    // Streams start playing on their own once enough data is buffered.
    player.play()?;

    while !player.is_paused() {
        player.tick()?;
        std::thread::sleep(TICK);
    }
    eprintln!();
    tracing::info!(position = player.current_time(), "playback finished");
    Ok(())
}

fn run_inspect(source: &str, width: usize) -> waveplay_core::Result<()> {
    let bytes = SourceLoader::new().fetch(source, &mut |_| {})?;
    let buffer = decode_bytes(bytes)?;
    let summary = serde_json::json!({
        "source": source,
        "duration": buffer.duration(),
        "sample_rate": buffer.sample_rate,
        "channels": buffer.channels,
        "frames": buffer.frames(),
        "peaks": buffer.peaks(width),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

/// Draws the waveform as a single line of block characters with the play
/// head highlighted.
struct TerminalRenderer {
    width: u32,
    columns: Vec<char>,
    markers: Vec<Marker>,
    progress: f64,
}

impl TerminalRenderer {
    fn new(width: u32) -> Self {
        Self {
            width,
            columns: vec!['.'; width as usize],
            markers: Vec::new(),
            progress: 0.0,
        }
    }

    fn column(&self, percentage: f64) -> usize {
        let last = self.columns.len().saturating_sub(1);
        ((percentage.clamp(0.0, 1.0) * last as f64).round() as usize).min(last)
    }

    fn draw(&self) {
        let mut line = self.columns.clone();
        for marker in &self.markers {
            if let Some(cell) = line.get_mut(self.column(marker.percentage)) {
                *cell = '|';
            }
        }
        let head = self.column(self.progress);
        if let Some(cell) = line.get_mut(head) {
            *cell = '>';
        }
        let line: String = line.into_iter().collect();
        let mut stderr = std::io::stderr().lock();
        let _ = write!(stderr, "\r[{line}] {:5.1}%", self.progress * 100.0);
        let _ = stderr.flush();
    }
}

impl Renderer for TerminalRenderer {
    fn width(&self) -> u32 {
        self.width
    }

    fn progress(&mut self, percentage: f64) {
        self.progress = percentage;
        self.draw();
    }

    fn draw_buffer(&mut self, buffer: &DecodedBuffer) {
        const LEVELS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];
        self.columns = buffer
            .peaks(self.width as usize)
            .into_iter()
            .map(|peak| {
                let level = (peak.clamp(0.0, 1.0) * (LEVELS.len() - 1) as f32).round() as usize;
                LEVELS[level.min(LEVELS.len() - 1)]
            })
            .collect();
        self.draw();
    }

    fn draw_loading(&mut self, fraction: f64) {
        let mut stderr = std::io::stderr().lock();
        let _ = write!(stderr, "\rloading {:5.1}%", fraction * 100.0);
        let _ = stderr.flush();
    }

    fn set_cursor(&mut self, percentage: f64) {
        self.progress = percentage;
    }

    fn draw_stream_frame(&mut self, frame: &StreamFrame, percentage: f64) {
        let energy = frame.spectrum.iter().copied().fold(0.0_f32, f32::max);
        let column = self.column(percentage);
        if let Some(cell) = self.columns.get_mut(column) {
            *cell = if energy > 0.5 { '█' } else { '▄' };
        }
        self.draw();
    }

    fn redraw(&mut self) {
        self.draw();
    }

    fn recenter(&mut self, _percentage: f64) {}

    fn set_min_width(&mut self, width: u32) {
        if width > self.width {
            tracing::debug!(width, "stream longer than the terminal, keeping width");
        }
    }

    fn upsert_marker(&mut self, marker: &Marker) {
        match self.markers.iter_mut().find(|m| m.id == marker.id) {
            Some(existing) => *existing = marker.clone(),
            None => self.markers.push(marker.clone()),
        }
    }

    fn remove_marker(&mut self, id: &str) {
        self.markers.retain(|marker| marker.id != id);
    }

    fn clear_markers(&mut self) {
        self.markers.clear();
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Waveform audio player", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Play a file or URL, drawing its waveform in the terminal.
    Play {
        /// Path or http(s) URL of the audio source.
        source: String,
        /// Add a marker at this position in seconds. May be repeated.
        #[arg(short, long = "mark")]
        marks: Vec<f64>,
        /// JSON player configuration.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Waveform width in columns.
        #[arg(short, long, default_value_t = 60)]
        width: u32,
        /// Stream the source instead of decoding it up front.
        #[arg(long)]
        stream: bool,
    },
    /// Decode a source and print its properties as JSON.
    Inspect {
        source: String,
        /// Number of peak columns to compute.
        #[arg(short, long, default_value_t = 60)]
        width: usize,
    },
    /// Print the effective player configuration.
    Config {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}
