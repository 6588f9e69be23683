//! Collaborators that produce raw bytes for a backend: a network loader that
//! reports fractional completion and a local-file loader that does not.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::{Result, WaveplayError};

const CHUNK_SIZE: usize = 64 * 1024;

/// Bytes assumed for a download of unknown size when estimating progress.
const UNKNOWN_LENGTH_HINT: f64 = 1_000_000.0;

/// How much of a source has been read so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadProgress {
    pub loaded: u64,
    pub total: Option<u64>,
}

impl LoadProgress {
    /// Completion in `[0, 1]`. Without a known length the fraction
    /// approaches 1 asymptotically, assuming downloads of a few megabytes.
    pub fn fraction(&self) -> f64 {
        match self.total {
            Some(total) if total > 0 => (self.loaded as f64 / total as f64).min(1.0),
            _ => {
                let loaded = self.loaded as f64;
                loaded / (loaded + UNKNOWN_LENGTH_HINT)
            }
        }
    }
}

/// Reads a source chunk by chunk.
pub trait Loader: Send + Sync {
    /// Streams `source` into `sink`, one chunk at a time, alongside the
    /// progress made once the chunk has been read.
    fn read(&self, source: &str, sink: &mut dyn FnMut(&[u8], LoadProgress)) -> Result<()>;

    /// Whether reading `source` reports how far along it is. Loading
    /// progress is only drawn for sources that do.
    fn reports_progress(&self, _source: &str) -> bool {
        true
    }

    /// Reads the whole source into memory.
    fn fetch(&self, source: &str, progress: &mut dyn FnMut(LoadProgress)) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.read(source, &mut |chunk, step| {
            bytes.extend_from_slice(chunk);
            progress(step);
        })?;
        Ok(bytes)
    }
}

fn pump(
    source: &str,
    mut reader: impl Read,
    total: Option<u64>,
    sink: &mut dyn FnMut(&[u8], LoadProgress),
) -> Result<()> {
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut loaded = 0u64;
    loop {
        let read = match reader.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(read) => read,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(WaveplayError::load(source, e)),
        };
        loaded += read as u64;
        sink(&buf[..read], LoadProgress { loaded, total });
    }
}

/// Reads local files, e.g. ones dropped onto the waveform.
#[derive(Debug, Default, Clone)]
pub struct FileLoader;

impl Loader for FileLoader {
    fn read(&self, source: &str, sink: &mut dyn FnMut(&[u8], LoadProgress)) -> Result<()> {
        let path = source.strip_prefix("file://").unwrap_or(source);
        let file = File::open(Path::new(path)).map_err(|e| WaveplayError::load(source, e))?;
        let total = file.metadata().ok().map(|meta| meta.len());
        pump(source, file, total, sink)
    }

    fn reports_progress(&self, _source: &str) -> bool {
        false
    }
}

/// Downloads sources over HTTP(S).
#[derive(Debug, Default, Clone)]
pub struct HttpLoader;

impl Loader for HttpLoader {
    fn read(&self, source: &str, sink: &mut dyn FnMut(&[u8], LoadProgress)) -> Result<()> {
        let response = ureq::get(source)
            .call()
            .map_err(|e| WaveplayError::load(source, e))?;
        let total = response
            .headers()
            .get("content-length")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok());
        tracing::debug!(source, ?total, "http response received");

        let (_parts, body) = response.into_parts();
        pump(source, body.into_reader(), total, sink)
    }
}

/// Picks [`HttpLoader`] for `http://` and `https://` sources and
/// [`FileLoader`] for everything else.
#[derive(Debug, Default, Clone)]
pub struct SourceLoader {
    http: HttpLoader,
    file: FileLoader,
}

impl SourceLoader {
    pub fn new() -> Self {
        Self::default()
    }

    fn for_source(&self, source: &str) -> &dyn Loader {
        if is_remote(source) {
            &self.http
        } else {
            &self.file
        }
    }
}

impl Loader for SourceLoader {
    fn read(&self, source: &str, sink: &mut dyn FnMut(&[u8], LoadProgress)) -> Result<()> {
        self.for_source(source).read(source, sink)
    }

    fn reports_progress(&self, source: &str) -> bool {
        self.for_source(source).reports_progress(source)
    }
}

pub fn is_remote(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}
