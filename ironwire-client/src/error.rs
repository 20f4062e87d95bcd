//! Connection errors.
//!
//! Every variant is terminal for the connection that raised it. The
//! receive loop maps any of these to one `disconnect` dispatch and a
//! released stream; nothing is retried.

use std::fmt;
use std::io;

use ironwire_core::{CryptoError, FrameError};

/// Errors fatal to a connection.
#[derive(Debug)]
pub enum ConnectionError {
    /// Operation requires an established connection.
    NotConnected,

    /// `connect` called while a connection is already up.
    AlreadyConnected,

    /// A read returned fewer bytes than the frame declared.
    ShortRead,

    /// The peer closed the stream.
    ConnectionClosed,

    /// Key exchange failed before the session was established.
    HandshakeFailed,

    /// Frame structure violation (bad length field, bad header).
    MalformedFrame,

    /// Cipher failure on this connection's key material.
    Crypto(CryptoError),

    /// Underlying socket error.
    Io(io::ErrorKind),
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "not connected"),
            Self::AlreadyConnected => write!(f, "already connected"),
            Self::ShortRead => write!(f, "stream ended mid-frame"),
            Self::ConnectionClosed => write!(f, "connection closed by peer"),
            Self::HandshakeFailed => write!(f, "handshake failed"),
            Self::MalformedFrame => write!(f, "malformed frame"),
            Self::Crypto(e) => write!(f, "crypto failure: {e}"),
            Self::Io(kind) => write!(f, "socket error: {kind}"),
        }
    }
}

impl std::error::Error for ConnectionError {}

impl From<CryptoError> for ConnectionError {
    fn from(e: CryptoError) -> Self {
        Self::Crypto(e)
    }
}

impl From<FrameError> for ConnectionError {
    fn from(e: FrameError) -> Self {
        match e {
            FrameError::Crypto(c) => Self::Crypto(c),
            FrameError::MalformedHeader | FrameError::LengthViolation => Self::MalformedFrame,
        }
    }
}

impl From<io::Error> for ConnectionError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof => Self::ShortRead,
            io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe => Self::ConnectionClosed,
            kind => Self::Io(kind),
        }
    }
}
