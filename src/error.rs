//! Error types for playlist and guide ingestion
//!
//! Malformed input never surfaces here: the parsers recover locally. What does
//! surface is either a collaborator failure (fetch, disk, serialization), an
//! explicit "nothing found" outcome, or a cancelled chunked operation.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Transport-level failure talking to a remote source
    #[error("Request failed for {url}: {message}")]
    Fetch { url: String, message: String },

    /// Remote source answered with a non-success status
    #[error("HTTP error {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The playlist was readable but contained no complete channel entries
    #[error("Playlist contained no channels")]
    NoChannels,

    /// The guide was readable but contained no programmes
    #[error("Guide contained no programmes")]
    NoProgrammes,

    #[error("Channel not found: {0}")]
    ChannelNotFound(String),

    #[error("Invalid stream URL: {0}")]
    InvalidStreamUrl(String),

    /// A chunked operation observed its cancellation token
    #[error("Operation cancelled")]
    Cancelled,
}

impl Error {
    /// True when the source was fine but held nothing usable.
    pub fn is_empty_result(&self) -> bool {
        matches!(self, Error::NoChannels | Error::NoProgrammes)
    }

    /// True when the source itself could not be retrieved.
    pub fn is_fetch_failure(&self) -> bool {
        matches!(
            self,
            Error::Fetch { .. } | Error::HttpStatus { .. } | Error::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_results_are_not_fetch_failures() {
        assert!(Error::NoChannels.is_empty_result());
        assert!(Error::NoProgrammes.is_empty_result());
        assert!(!Error::NoChannels.is_fetch_failure());

        let err = Error::HttpStatus { url: "http://example.com".into(), status: 404 };
        assert!(err.is_fetch_failure());
        assert!(!err.is_empty_result());
        assert_eq!(err.to_string(), "HTTP error 404 for http://example.com");
    }

    #[test]
    fn test_io_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: Error = io.into();
        assert!(err.is_fetch_failure());
    }
}
