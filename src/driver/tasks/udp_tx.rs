//! The UDP transmit task: outgoing datagrams plus the periodic keepalive.

use super::message::*;
use crate::constants::*;
use flume::Receiver;
use std::sync::Arc;
use tokio::{
    net::UdpSocket,
    time::{timeout_at, Instant},
};
use tracing::{error, instrument, trace};

struct UdpTx {
    rx: Receiver<UdpTxMessage>,
    udp_tx: Arc<UdpSocket>,
}

impl UdpTx {
    async fn run(&mut self) {
        let mut ka_time = Instant::now() + UDP_KEEPALIVE_GAP;

        loop {
            match timeout_at(ka_time, self.rx.recv_async()).await {
                Err(_) => {
                    trace!("Sending UDP keepalive.");
                    if let Err(e) = self.udp_tx.send(&UDP_KEEPALIVE[..]).await {
                        // Fire-and-forget: log, keep the session alive.
                        error!("UDP keepalive send error: {:?}.", e);
                    }
                    ka_time += UDP_KEEPALIVE_GAP;
                },
                Ok(Ok(UdpTxMessage::Packet(p))) => {
                    if let Err(e) = self.udp_tx.send(&p[..]).await {
                        error!("UDP packet send error: {:?}.", e);
                    }
                },
                Ok(Ok(UdpTxMessage::Poison)) | Ok(Err(_)) => {
                    break;
                },
            }
        }
    }
}

#[instrument(skip_all)]
pub(crate) async fn runner(udp_msg_rx: Receiver<UdpTxMessage>, udp_tx: Arc<UdpSocket>) {
    trace!("UDP transmit handle started.");

    let mut txer = UdpTx {
        rx: udp_msg_rx,
        udp_tx,
    };

    txer.run().await;

    trace!("UDP transmit handle stopped.");
}
