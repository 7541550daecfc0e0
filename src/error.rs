//! Unified error handling for the watch-sync library.
//!
//! Every fallible operation in the crate returns [`SyncError`]. Variants map
//! onto the failure classes callers react to differently: a broken input file
//! is fatal to that file, a routing failure aborts a re-anchor, a ledger write
//! failure is propagated on explicit refreshes but degraded on reads.

use std::fmt;

/// Message used when a watch file lacks one of its sample streams.
pub const MISSING_DATA_MESSAGE: &str = "GPS or detail data missing in the provided file.";

/// Unified error type for watch-sync operations.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncError {
    /// The watch file has an empty GPS or detail stream
    MissingData { message: String },
    /// The watch file could not be read or decoded
    InvalidFile { path: String, message: String },
    /// The directions collaborator failed, timed out or returned no path
    RouteSynthesis { message: String },
    /// Ledger cache read/write failure
    Persistence { message: String },
    /// Upload to the fitness platform failed
    Upload {
        activity_id: String,
        message: String,
    },
    /// HTTP/API error
    Http {
        message: String,
        status_code: Option<u16>,
    },
    /// GPX document could not be written or parsed
    Gpx { message: String },
    /// Configuration error
    Config { message: String },
}

impl SyncError {
    pub fn missing_data() -> Self {
        SyncError::MissingData {
            message: MISSING_DATA_MESSAGE.to_string(),
        }
    }

    pub fn route(message: impl Into<String>) -> Self {
        SyncError::RouteSynthesis {
            message: message.into(),
        }
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        SyncError::Persistence {
            message: message.into(),
        }
    }

    pub fn gpx(message: impl Into<String>) -> Self {
        SyncError::Gpx {
            message: message.into(),
        }
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::MissingData { message } => write!(f, "{}", message),
            SyncError::InvalidFile { path, message } => {
                write!(f, "Invalid activity file '{}': {}", path, message)
            }
            SyncError::RouteSynthesis { message } => {
                write!(f, "Route synthesis failed: {}", message)
            }
            SyncError::Persistence { message } => write!(f, "Persistence error: {}", message),
            SyncError::Upload {
                activity_id,
                message,
            } => {
                write!(f, "Upload of activity '{}' failed: {}", activity_id, message)
            }
            SyncError::Http {
                message,
                status_code,
            } => {
                if let Some(code) = status_code {
                    write!(f, "HTTP error ({}): {}", code, message)
                } else {
                    write!(f, "HTTP error: {}", message)
                }
            }
            SyncError::Gpx { message } => write!(f, "GPX error: {}", message),
            SyncError::Config { message } => write!(f, "Configuration error: {}", message),
        }
    }
}

impl std::error::Error for SyncError {}

/// Result type alias for watch-sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Extension trait for converting Option to SyncError.
pub trait OptionExt<T> {
    /// Convert Option to Result with a route synthesis error.
    fn ok_or_route(self, message: &str) -> Result<T>;

    /// Convert Option to Result with a missing data error.
    fn ok_or_missing_data(self) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_route(self, message: &str) -> Result<T> {
        self.ok_or_else(|| SyncError::route(message))
    }

    fn ok_or_missing_data(self) -> Result<T> {
        self.ok_or_else(SyncError::missing_data)
    }
}
