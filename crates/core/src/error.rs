/// Result alias that carries the custom [`WaveplayError`] type.
pub type Result<T> = std::result::Result<T, WaveplayError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum WaveplayError {
    /// Free-form message for failures that have no dedicated variant.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// The audio subsystem behind a backend could not be acquired. Fatal for
    /// the controller instance; never retried.
    #[error("failed to initialise audio backend: {0}")]
    Init(String),
    /// The raw bytes could not be decoded. Recovered locally by falling back
    /// to streaming playback whenever a source url is known.
    #[error("failed to decode audio: {0}")]
    Decode(String),
    /// Network or file read failure.
    #[error("failed to load `{target}`: {reason}")]
    Load { target: String, reason: String },
    /// A subscriber's event handler failed.
    #[error(transparent)]
    Handler(#[from] HandlerError),
    /// The operation needs a loaded source with a known duration.
    #[error("no audio has been loaded yet")]
    NotReady,
    /// The active backend does not offer the requested capability.
    #[error("operation not supported by the {0} backend")]
    Unsupported(&'static str),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("{0}")]
    InvalidInput(&'static str),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl WaveplayError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub fn load(target: impl Into<String>, reason: impl ToString) -> Self {
        Self::Load {
            target: target.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<&str> for WaveplayError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for WaveplayError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

/// Error returned by event handlers. It propagates synchronously to whoever
/// triggered the event; handlers are not isolated from each other.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("event handler failed: {message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_errors_name_their_target() {
        let err = WaveplayError::load("song.ogg", "connection reset");
        assert_eq!(
            err.to_string(),
            "failed to load `song.ogg`: connection reset"
        );
    }

    #[test]
    fn handler_errors_convert_transparently() {
        let err: WaveplayError = HandlerError::new("boom").into();
        assert!(matches!(err, WaveplayError::Handler(_)));
        assert_eq!(err.to_string(), "event handler failed: boom");
    }
}
