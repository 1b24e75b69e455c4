use crate::codec::CodecError;
use crate::registry::RegistrationError;
use std::io;

/// Errors produced by a session and the RPC surface built on top of it.
///
/// Transport and framing failures (`Io`, `InvalidHeader`) are fatal and
/// close the session. Call-level failures (`Remote`, `Codec`) are returned
/// to the caller that triggered them and leave the session open.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Connection-level read or write failure.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),

    /// A frame header carried an unknown stream id or a non-positive body
    /// length.
    #[error("invalid frame header: stream id {stream_id:#04x}, body length {body_len}")]
    InvalidHeader { stream_id: u8, body_len: usize },

    /// The session is closed, or closed while the operation was waiting.
    #[error("session is closed")]
    Closed,

    /// Malformed request or response at the message codec layer.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The remote handler reported a failure for this call.
    #[error("remote error: {0}")]
    Remote(String),

    /// The registry rejected a service registration.
    #[error("registration error: {0}")]
    Registration(#[from] RegistrationError),

    /// `serve` was called while another read loop owns the connection.
    #[error("serve is already running for this session")]
    AlreadyServing,
}

impl Error {
    /// End-of-stream conditions the read loop treats as a clean shutdown
    /// rather than a failure.
    pub(crate) fn is_benign_eof(&self) -> bool {
        match self {
            Error::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        }
    }
}
