//! H.264 → RTP packetization (RFC 6184, payload type 101).
//!
//! Each access unit arrives as an Annex-B byte stream. NALs at or under the
//! payload budget go out as single-NAL packets; larger ones are FU-A
//! fragmented. STAP-A is accepted on receive but never produced here.

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

/// NAL type carried by an FU-A indicator byte.
const FU_A_TYPE: u8 = 28;

/// Fragment payload budget: the FU indicator and FU header occupy two of
/// the packet's 1200 bytes.
const MAX_FRAGMENT_PAYLOAD: usize = MAX_RTP_PAYLOAD - 2;

/// Emits one access unit as a train of sealed RTP packets.
pub(crate) struct VideoRtpSender {
    ssrc: u32,
    sequence: Wrapping<u16>,
    crypto: CryptoState,
    cipher: Cipher,
    udp_tx: Sender<UdpTxMessage>,
}

impl VideoRtpSender {
    pub(crate) fn new(ssrc: u32, cipher: Cipher, udp_tx: Sender<UdpTxMessage>) -> Self {
        Self {
            ssrc,
            sequence: Wrapping(0),
            crypto: CryptoState::default(),
            cipher,
            udp_tx,
        }
    }

    /// Splits `annex_b` into NAL units and transmits them under one RTP
    /// timestamp, setting the marker bit on the access unit's final packet.
    pub(crate) fn send_access_unit(&mut self, annex_b: &[u8], timestamp: u32) {
        let nals = parse_annex_b(annex_b);

        for (i, nal) in nals.iter().enumerate() {
            let last_nal = i == nals.len() - 1;
            self.send_nal(nal, timestamp, last_nal);
        }
    }

    fn send_nal(&mut self, nal: &[u8], timestamp: u32, last_nal: bool) {
        if nal.is_empty() {
            return;
        }

        if nal.len() <= MAX_RTP_PAYLOAD {
            self.send_packet(nal, timestamp, last_nal);
        } else {
            self.send_fu_a(nal, timestamp, last_nal);
        }
    }

    /// RFC 6184 §5.8 fragmentation. The NAL's header byte is consumed into
    /// the FU indicator/header pair and re-synthesized by the receiver.
    fn send_fu_a(&mut self, nal: &[u8], timestamp: u32, last_nal: bool) {
        if nal.len() < 2 {
            return;
        }

        let nal_header = nal[0];
        let nal_type = nal_header & 0x1f;
        let indicator = (nal_header & 0xe0) | FU_A_TYPE;

        let mut remaining = &nal[1..];
        let mut first = true;

        while !remaining.is_empty() {
            let frag_len = remaining.len().min(MAX_FRAGMENT_PAYLOAD);
            let last = frag_len == remaining.len();

            let mut fu_header = nal_type;
            if first {
                fu_header |= 0x80;
            }
            if last {
                fu_header |= 0x40;
            }

            let mut payload = Vec::with_capacity(2 + frag_len);
            payload.push(indicator);
            payload.push(fu_header);
            payload.extend_from_slice(&remaining[..frag_len]);

            self.send_packet(&payload, timestamp, last && last_nal);

            remaining = &remaining[frag_len..];
            first = false;
        }
    }

    fn send_packet(&mut self, payload: &[u8], timestamp: u32, marker: bool) {
        self.sequence += 1;
        let nonce = self.crypto.next_nonce();

        let header_len = RtpPacket::minimum_packet_size();
        let mut packet = vec![0u8; header_len + payload.len()];
        {
            let mut rtp = MutableRtpPacket::new(&mut packet)
                .expect("packet sized from the payload always fits an RTP view");
            rtp.set_version(RTP_VERSION);
            rtp.set_payload_type(RTP_VIDEO_TYPE);
            rtp.set_marker(u8::from(marker));
            rtp.set_sequence(self.sequence.0.into());
            rtp.set_timestamp(timestamp.into());
            rtp.set_ssrc(self.ssrc);
            rtp.payload_mut().copy_from_slice(payload);
        }

        seal_in_place(&self.cipher, &mut packet, header_len, nonce);

        if self.udp_tx.send(UdpTxMessage::Packet(packet)).is_err() {
            trace!("UDP transmit task gone; dropping video packet.");
        }
    }
}

/// Scans an Annex-B byte stream into NAL unit slices.
///
/// Both 3-byte (`00 00 01`) and 4-byte (`00 00 00 01`) start codes are
/// accepted; a buffer with no start code at all is one NAL.
pub(crate) fn parse_annex_b(data: &[u8]) -> Vec<&[u8]> {
    let mut nals = Vec::new();
    let len = data.len();
    let mut i = 0;

    while i < len {
        let start_code_len = if i + 3 < len && data[i..i + 4] == [0, 0, 0, 1] {
            4
        } else if i + 2 < len && data[i..i + 3] == [0, 0, 1] {
            3
        } else {
            0
        };

        if start_code_len > 0 {
            let nal_start = i + start_code_len;
            let mut nal_end = len;

            let mut j = nal_start;
            while j + 2 < len {
                if data[j] == 0
                    && data[j + 1] == 0
                    && (data[j + 2] == 1 || (j + 3 < len && data[j + 2] == 0 && data[j + 3] == 1))
                {
                    nal_end = j;
                    break;
                }
                j += 1;
            }

            if nal_end > nal_start {
                nals.push(&data[nal_start..nal_end]);
            }

            i = nal_end;
        } else {
            if nals.is_empty() {
                nals.push(data);
                break;
            }
            i += 1;
        }
    }

    nals
}
