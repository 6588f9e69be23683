use std::io::Cursor;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::{Result, WaveplayError};

/// The audio subsystem a backend plays through. Besides producing sound it is
/// the backend's time source.
pub trait AudioDevice {
    /// Acquires the output. Called once by `Backend::init`.
    fn open(&mut self) -> std::result::Result<(), String>;

    /// Monotonic device time in seconds.
    fn now(&self) -> f64;
}

/// Device clock backed by [`Instant`].
#[derive(Debug, Clone)]
pub struct SystemDevice {
    epoch: Instant,
}

impl SystemDevice {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for SystemDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioDevice for SystemDevice {
    fn open(&mut self) -> std::result::Result<(), String> {
        Ok(())
    }

    fn now(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }
}

/// Hand-driven device clock. Clones share the same time, so a host (or a
/// test) can keep one handle and advance the clock of a device it gave away.
#[derive(Debug, Clone)]
pub struct ManualDevice {
    time_seconds: Arc<Mutex<f64>>,
    available: bool,
}

impl ManualDevice {
    pub fn new() -> Self {
        Self {
            time_seconds: Arc::new(Mutex::new(0.0)),
            available: true,
        }
    }

    /// A device whose `open` always fails.
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new()
        }
    }

    pub fn advance(&self, delta: f64) {
        let mut time = self.lock();
        *time = (*time + delta).max(0.0);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, f64> {
        self.time_seconds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ManualDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioDevice for ManualDevice {
    fn open(&mut self) -> std::result::Result<(), String> {
        if self.available {
            Ok(())
        } else {
            Err("audio device is unavailable".to_string())
        }
    }

    fn now(&self) -> f64 {
        *self.lock()
    }
}

/// Audio fully decoded into memory, interleaved `f32` samples.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl DecodedBuffer {
    pub fn frames(&self) -> usize {
        self.samples.len() / usize::from(self.channels.max(1))
    }

    /// Length of the buffer in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / f64::from(self.sample_rate)
    }

    /// Peak absolute amplitude per column when the buffer is spread over
    /// `width` columns. Used by renderers to draw the waveform.
    pub fn peaks(&self, width: usize) -> Vec<f32> {
        let frames = self.frames();
        if width == 0 || frames == 0 {
            return vec![0.0; width];
        }

        let channels = usize::from(self.channels.max(1));
        (0..width)
            .map(|column| {
                let start = column * frames / width;
                let end = ((column + 1) * frames / width).max(start + 1).min(frames);
                self.samples[start * channels..end * channels]
                    .iter()
                    .fold(0.0_f32, |peak, sample| peak.max(sample.abs()))
            })
            .collect()
    }
}

/// Decodes a complete in-memory file into a [`DecodedBuffer`].
pub fn decode_bytes(bytes: Vec<u8>) -> Result<DecodedBuffer> {
    if bytes.is_empty() {
        return Err(WaveplayError::Decode("no data to decode".to_string()));
    }

    let stream = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());
    let probed = symphonia::default::get_probe()
        .format(
            &Hint::new(),
            stream,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| WaveplayError::Decode(format!("unrecognised format: {e}")))?;
    let mut reader = probed.format;

    let track = reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| WaveplayError::Decode("no audio track".to_string()))?;
    let track_id = track.id;
    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| WaveplayError::Decode(format!("unsupported codec: {e}")))?;

    let mut samples = Vec::new();
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut channels = track
        .codec_params
        .channels
        .map(|c| c.count() as u16)
        .unwrap_or(0);

    loop {
        let packet = match reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(WaveplayError::Decode(e.to_string())),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(msg)) => {
                tracing::warn!(error = %msg, "skipping corrupted audio packet");
                continue;
            }
            Err(e) => return Err(WaveplayError::Decode(e.to_string())),
        };
        if decoded.frames() == 0 {
            continue;
        }

        let spec = *decoded.spec();
        sample_rate = spec.rate;
        channels = spec.channels.count() as u16;
        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buffer.copy_interleaved_ref(decoded);
        samples.extend_from_slice(buffer.samples());
    }

    if samples.is_empty() || sample_rate == 0 || channels == 0 {
        return Err(WaveplayError::Decode("stream contains no audio frames".to_string()));
    }

    tracing::debug!(sample_rate, channels, samples = samples.len(), "decoded audio");
    Ok(DecodedBuffer {
        samples,
        sample_rate,
        channels,
    })
}
