//! Error types shared across the Zori pipeline.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the shared model and the stream transport.
#[derive(Error, Debug)]
pub enum Error {
    /// JSON encoding/decoding of an event frame failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Could not connect to the NATS server.
    #[error("NATS connect error: {0}")]
    Connect(#[from] async_nats::ConnectError),

    /// Stream lookup or creation failed.
    #[error("stream provisioning error: {0}")]
    Stream(String),

    /// Publishing a message (or awaiting its ack) failed.
    #[error("publish error: {0}")]
    Publish(String),

    /// Creating the consumer or pulling messages failed.
    #[error("subscription error: {0}")]
    Subscribe(String),

    /// Sending an ack, nak or term to the broker failed.
    #[error("acknowledgement error: {0}")]
    Ack(String),

    /// Flushing or draining the connection on shutdown failed.
    #[error("connection close error: {0}")]
    Close(String),

    /// I/O error (e.g. reading a credentials file).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_error_display() {
        let err = Error::Stream("stream name already in use".to_string());
        let msg = err.to_string();
        assert!(msg.contains("stream provisioning error"));
        assert!(msg.contains("already in use"));
    }

    #[test]
    fn test_publish_error_display() {
        let err = Error::Publish("no responders".to_string());
        assert_eq!(err.to_string(), "publish error: no responders");
    }

    #[test]
    fn test_close_error_display() {
        let err = Error::Close("connection reset".to_string());
        assert_eq!(err.to_string(), "connection close error: connection reset");
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
        assert!(err.to_string().contains("JSON error"));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "creds missing");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("creds missing"));
    }
}
