//! Sorting error types.

use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::io;

/// Errors surfaced by the run-storage container and both sort phases.
#[derive(Debug)]
pub enum SortError {
    /// The original data file could not be opened for reading.
    InputOpen(io::Error),
    /// An underlying file open/read/write/seek failure.
    Io(io::Error),
    /// Invalid magic, truncated header or truncated directory.
    Format(String),
    /// The run directory has no free slot left.
    DirectoryFull,
    /// A directory index out of range.
    InvalidRunId(u32),
}

impl Error for SortError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            SortError::InputOpen(err) => Some(err),
            SortError::Io(err) => Some(err),
            SortError::Format(_) => None,
            SortError::DirectoryFull => None,
            SortError::InvalidRunId(_) => None,
        }
    }
}

impl Display for SortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            SortError::InputOpen(err) => write!(f, "input file not opened: {}", err),
            SortError::Io(err) => write!(f, "I/O operation failed: {}", err),
            SortError::Format(reason) => write!(f, "malformed run file: {}", reason),
            SortError::DirectoryFull => write!(f, "run directory is full"),
            SortError::InvalidRunId(run_id) => write!(f, "run id {} is out of range", run_id),
        }
    }
}

impl From<io::Error> for SortError {
    fn from(err: io::Error) -> Self {
        SortError::Io(err)
    }
}
