//! Connection errors and convenience types.

use crate::{audio::AudioError, ws::Error as WsError};
use serde_json::Error as JsonError;
use std::{error::Error as StdError, fmt, io::Error as IoError};
use tokio::time::error::Elapsed;

/// Errors encountered while connecting to a voice server.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// The symmetric key supplied by the server had the wrong size.
    KeyInvalidLength,
    /// Server negotiated an encryption mode other than the one requested.
    CryptoModeInvalid,
    /// An indicator that an endpoint URL was invalid.
    EndpointUrl,
    /// The server failed to correctly respond to IP discovery.
    IllegalDiscoveryResponse,
    /// Could not parse the server's view of our public address.
    IllegalIp,
    /// Miscellaneous I/O error.
    Io(IoError),
    /// JSON (de)serialization error.
    Json(JsonError),
    /// Error communicating with the gateway server over WebSocket.
    Ws(WsError),
    /// The audio pipeline could not be brought up.
    Audio(AudioError),
    /// Connection attempt timed out.
    TimedOut,
}

impl From<IoError> for Error {
    fn from(e: IoError) -> Error {
        Error::Io(e)
    }
}

impl From<JsonError> for Error {
    fn from(e: JsonError) -> Error {
        Error::Json(e)
    }
}

impl From<WsError> for Error {
    fn from(e: WsError) -> Error {
        Error::Ws(e)
    }
}

impl From<AudioError> for Error {
    fn from(e: AudioError) -> Error {
        Error::Audio(e)
    }
}

impl From<Elapsed> for Error {
    fn from(_e: Elapsed) -> Error {
        Error::TimedOut
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to connect to voice server: ")?;
        match self {
            Self::KeyInvalidLength => write!(f, "server supplied key of wrong length"),
            Self::CryptoModeInvalid => write!(f, "server changed negotiated encryption mode"),
            Self::EndpointUrl => write!(f, "endpoint URL received from gateway was invalid"),
            Self::IllegalDiscoveryResponse =>
                write!(f, "IP discovery/NAT punching response was invalid"),
            Self::IllegalIp => write!(f, "IP discovery/NAT punching response had bad IP value"),
            Self::Io(e) => e.fmt(f),
            Self::Json(e) => e.fmt(f),
            Self::Ws(e) => write!(f, "websocket issue ({e})"),
            Self::Audio(e) => e.fmt(f),
            Self::TimedOut => write!(f, "connection attempt timed out"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::KeyInvalidLength
            | Error::CryptoModeInvalid
            | Error::EndpointUrl
            | Error::IllegalDiscoveryResponse
            | Error::IllegalIp
            | Error::TimedOut => None,
            Error::Io(e) => Some(e),
            Error::Json(e) => Some(e),
            Error::Ws(e) => Some(e),
            Error::Audio(e) => Some(e),
        }
    }
}

/// Convenience type for voice connection error handling.
pub type Result<T> = std::result::Result<T, Error>;
