use std::fmt;

/// Errors surfaced by the service layer (C5-C8): limiter exhaustion, PTY
/// setup failures, and I/O that a caller needs to react to rather than
/// just log.
#[derive(Debug)]
pub enum Error {
    /// A named limiter (`services` or `terminals`) is already at capacity.
    LimitReached(&'static str),
    /// No terminal definition is registered under this name.
    UnknownTerminal(String),
    /// Forking or exec'ing the PTY child failed.
    Pty(nix::Error),
    /// A filesystem or process spawn call failed.
    Io(std::io::Error),
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::LimitReached(name) => write!(f, "'{}' limiter is at capacity", name),
            Error::UnknownTerminal(name) => write!(f, "no terminal registered as '{}'", name),
            Error::Pty(e) => write!(f, "pty error: {}", e),
            Error::Io(e) => write!(f, "io error: {}", e),
        }
    }
}

impl From<nix::Error> for Error {
    fn from(e: nix::Error) -> Self {
        Error::Pty(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}
