//! The UDP receive task: decrypt, then dispatch by SSRC.
//!
//! Datagrams not from the connected voice server are discarded. Packets
//! that fail to open are dropped without comment beyond a debug line;
//! per-packet errors never surface to the host.

use super::message::*;
use crate::{
    audio::AudioEngine,
    constants::*,
    driver::{crypto, receive::VideoRtpReceiver},
};
use bytes::BytesMut;
use chacha20poly1305::XChaCha20Poly1305 as Cipher;
use flume::Receiver;
use std::{net::SocketAddr, sync::Arc};
use tokio::{net::UdpSocket, select, time::timeout};
use tracing::{debug, error, instrument, trace};

struct UdpRx {
    cipher: Cipher,
    rx: Receiver<UdpRxMessage>,
    udp_socket: Arc<UdpSocket>,
    server_addr: SocketAddr,
    engine: Option<AudioEngine>,
    video: Option<VideoRtpReceiver>,
}

impl UdpRx {
    async fn run(&mut self, interconnect: &Interconnect) {
        let mut byte_dest = BytesMut::zeroed(VOICE_PACKET_MAX);

        loop {
            select! {
                result = timeout(UDP_RECV_POLL, self.udp_socket.recv_from(&mut byte_dest[..])) => {
                    match result {
                        // Poll budget elapsed with no traffic; re-check for
                        // shutdown and wait again.
                        Err(_) => continue,
                        Ok(Ok((len, addr))) => {
                            if addr != self.server_addr {
                                trace!("Datagram from stranger {addr} discarded.");
                                continue;
                            }
                            self.process_udp_message(&mut byte_dest[..len]);
                        },
                        Ok(Err(e)) => {
                            error!("Fatal UDP receive error: {:?}.", e);
                            drop(interconnect.core.send(CoreMessage::SignalUdpClosure));
                            break;
                        },
                    }
                },
                msg = self.rx.recv_async() => {
                    match msg {
                        Ok(UdpRxMessage::Poison) | Err(_) => break,
                    }
                },
            }
        }
    }

    fn process_udp_message(&mut self, packet: &mut [u8]) {
        // Errors here are not fatal to the connection; received packets are
        // adversarial input and failures only ever drop the packet.
        let (meta, plaintext) = match crypto::open_in_place(&self.cipher, packet) {
            Ok(opened) => opened,
            Err(e) => {
                debug!("Dropping undecryptable packet: {e:?}.");
                return;
            },
        };

        if let Some(video) = self.video.as_mut() {
            if meta.ssrc == video.ssrc() {
                video.feed(&meta, plaintext);
                return;
            }
        }

        if let Some(engine) = &self.engine {
            // Extension words sit at the head of the plaintext.
            let opus = &plaintext[meta.extension_len.min(plaintext.len())..];
            if !opus.is_empty() {
                engine.feed_opus(meta.ssrc, opus);
            }
        }
    }
}

#[instrument(skip_all)]
#[allow(clippy::too_many_arguments)]
pub(crate) async fn runner(
    interconnect: Interconnect,
    rx: Receiver<UdpRxMessage>,
    cipher: Cipher,
    udp_socket: Arc<UdpSocket>,
    server_addr: SocketAddr,
    engine: Option<AudioEngine>,
    video: Option<VideoRtpReceiver>,
) {
    trace!("UDP receive handle started.");

    let mut state = UdpRx {
        cipher,
        rx,
        udp_socket,
        server_addr,
        engine,
        video,
    };

    state.run(&interconnect).await;

    trace!("UDP receive handle stopped.");
}
