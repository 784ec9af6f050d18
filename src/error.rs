//! Driver and session error handling.

pub use crate::{
    audio::{AudioError, DeviceError},
    driver::connection::error::{Error as ConnectionError, Result as ConnectionResult},
    video::{CaptureError, DecodeError, EncodeError},
    ws::Error as WsError,
};

pub use serde_json::Error as JsonError;
