use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    IoError(io::Error),
    Decode(String),
    ColumnOutOfRange(usize),
    InvalidChecksum,
    InvalidSchema(String),
    WriteError(&'static str, io::Error),
    MetaStore(String),
    JobAlreadyRunning(String),
    OutOfMemory { requested: usize, available: usize },
    InvalidState(String),
    InvalidOperation(String),
}

impl Error {
    /// Decode errors come from client input rather than from the engine's own I/O.
    pub fn is_decode(&self) -> bool {
        matches!(
            self,
            Error::Decode(_) | Error::ColumnOutOfRange(_) | Error::InvalidChecksum
        )
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::IoError(err)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::IoError(err) => write!(f, "I/O error: {}", err),
            Error::Decode(msg) => write!(f, "Failed to decode upsert batch: {}", msg),
            Error::ColumnOutOfRange(col) => write!(f, "Column index {} out of range", col),
            Error::InvalidChecksum => write!(f, "Invalid checksum"),
            Error::InvalidSchema(msg) => write!(f, "Invalid schema: {}", msg),
            Error::WriteError(context, err) => write!(f, "Failed to write {}: {}", context, err),
            Error::MetaStore(msg) => write!(f, "Metastore error: {}", msg),
            Error::JobAlreadyRunning(job) => write!(f, "Job {} is already running", job),
            Error::OutOfMemory {
                requested,
                available,
            } => write!(
                f,
                "Out of host memory: requested {} bytes, {} available",
                requested, available
            ),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            Error::InvalidOperation(msg) => write!(f, "Invalid operation: {}", msg),
        }
    }
}

impl std::error::Error for Error {}
