//! Opus → RTP (payload type 120).

use crate::{
    constants::*,
    driver::{
        crypto::{seal_in_place, CryptoState},
        tasks::message::UdpTxMessage,
    },
};
use chacha20poly1305::XChaCha20Poly1305 as Cipher;
use discortp::{rtp::{MutableRtpPacket, RtpPacket}, MutablePacket};
use flume::Sender;
use std::num::Wrapping;
use tracing::trace;

/// Serializes encoded Opus frames onto the session's UDP flow.
///
/// One instance exists per audio direction; sequence and nonce counters are
/// owned here and pre-incremented together before each send, so adjacent
/// packets differ by exactly one in both.
pub(crate) struct OpusRtpSender {
    ssrc: u32,
    sequence: Wrapping<u16>,
    crypto: CryptoState,
    cipher: Cipher,
    udp_tx: Sender<UdpTxMessage>,
}

impl OpusRtpSender {
    pub(crate) fn new(ssrc: u32, cipher: Cipher, udp_tx: Sender<UdpTxMessage>) -> Self {
        Self {
            ssrc,
            sequence: Wrapping(0),
            crypto: CryptoState::default(),
            cipher,
            udp_tx,
        }
    }

    /// Wraps one encoded Opus packet in RTP, seals it, and sends it.
    ///
    /// `timestamp` is the engine's 48 kHz clock value at capture time.
    pub(crate) fn send_opus(&mut self, opus: &[u8], timestamp: u32) {
        if opus.is_empty() {
            return;
        }

        self.sequence += 1;
        let nonce = self.crypto.next_nonce();

        let header_len = RtpPacket::minimum_packet_size();
        let mut packet = vec![0u8; header_len + opus.len()];
        {
            let mut rtp = MutableRtpPacket::new(&mut packet)
                .expect("packet sized from the payload always fits an RTP view");
            rtp.set_version(RTP_VERSION);
            rtp.set_payload_type(RTP_AUDIO_TYPE);
            rtp.set_sequence(self.sequence.0.into());
            rtp.set_timestamp(timestamp.into());
            rtp.set_ssrc(self.ssrc);
            rtp.payload_mut().copy_from_slice(opus);
        }

        seal_in_place(&self.cipher, &mut packet, header_len, nonce);

        if self.udp_tx.send(UdpTxMessage::Packet(packet)).is_err() {
            trace!("UDP transmit task gone; dropping audio packet.");
        }
    }

    /// Sends the silent frame used to punch the NAT mapping open.
    pub(crate) fn send_silence(&mut self) {
        self.send_opus(&SILENT_FRAME, 0);
    }
}
