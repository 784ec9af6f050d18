#![allow(missing_docs)]

//! Messages exchanged between a session's background tasks.

use crate::{driver::connection::error::Error as ConnectionError, info::ConnectionInfo, model::Event};
use flume::Sender;

/// Channels a task uses to reach its peers.
#[derive(Clone, Debug)]
pub(crate) struct Interconnect {
    pub core: Sender<CoreMessage>,
}

/// Messages handled by the session's core runner.
pub(crate) enum CoreMessage {
    /// Establish a session with the given parameters; the result is
    /// reported on the enclosed channel.
    ConnectWithResult(ConnectionInfo, Sender<Result<(), ConnectionError>>),
    /// Tear the current session down, keeping the runner alive.
    Disconnect,
    /// Force the next encoded video frame to be an IDR.
    RequestKeyframe,
    /// The gateway socket closed underneath us.
    SignalWsClosure,
    /// The UDP receive loop hit a non-timeout error.
    SignalUdpClosure,
    /// Tear down and exit the runner.
    Poison,
}

/// Messages handled by the WebSocket task.
pub(crate) enum WsMessage {
    /// Serialize and transmit a gateway event.
    Send(Event),
    /// Close the socket (with the client-disconnect code) and exit.
    Poison,
}

/// Messages handled by the UDP transmit task.
pub(crate) enum UdpTxMessage {
    Packet(Vec<u8>),
    Poison,
}

/// Messages handled by the UDP receive task.
pub(crate) enum UdpRxMessage {
    Poison,
}
