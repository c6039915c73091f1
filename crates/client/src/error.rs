use std::fmt;

/// Errors surfaced by the channel table and the M2M client.
#[derive(Debug)]
pub enum Error {
    /// The underlying transport failed to connect or was dropped mid-session.
    Transport(String),
    /// A frame or packet could not be decoded; the frame is dropped, the
    /// connection stays open.
    Protocol(codec::Error),
    /// The liveness watcher did not see a frame within the configured window.
    LivenessTimeout,
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Transport(msg) => write!(f, "transport error: {}", msg),
            Error::Protocol(e) => write!(f, "protocol error: {}", e),
            Error::LivenessTimeout => write!(f, "liveness timeout"),
        }
    }
}

impl From<codec::Error> for Error {
    fn from(e: codec::Error) -> Self {
        Error::Protocol(e)
    }
}
