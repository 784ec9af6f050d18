//! The `aead_xchacha20_poly1305_rtpsize` packet scheme.
//!
//! Every media packet is laid out as
//! `RTP header || ciphertext || tag (16) || nonce counter (4, LE)`.
//! Only the first four nonce bytes are meaningful; they hold a 32-bit
//! little-endian counter which is also appended in clear as the packet's
//! final four bytes, since the receiver has no other sync channel for it.
//! The AAD is the RTP header itself, including the one-profile extension
//! header when the X bit is set.

use byteorder::{ByteOrder, LittleEndian};
use chacha20poly1305::{
    aead::{AeadInPlace, KeyInit},
    Tag,
    XChaCha20Poly1305 as Cipher,
    XNonce,
};
use discortp::rtp::{RtpPacket, RtpType};
use std::num::Wrapping;
use zeroize::Zeroize;

/// Poly1305 authentication tag length.
pub const TAG_SIZE: usize = 16;

/// Full XChaCha20 nonce width.
pub const NONCE_SIZE: usize = 24;

/// Bytes of the nonce counter stored in clear at the packet tail.
pub const NONCE_TAIL: usize = 4;

/// Length of the session key delivered in `SessionDescription`.
pub const KEY_SIZE: usize = 32;

/// Bytes added to a plaintext payload by this scheme.
pub const PAYLOAD_OVERHEAD: usize = TAG_SIZE + NONCE_TAIL;

/// A 32-byte session key that never reaches logs and is wiped on drop.
pub struct Secret(pub(crate) [u8; KEY_SIZE]);

impl Secret {
    /// Validates and adopts a server-delivered key.
    pub(crate) fn try_from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; KEY_SIZE] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    pub(crate) fn cipher(&self) -> Cipher {
        Cipher::new_from_slice(&self.0).expect("key length is fixed at KEY_SIZE")
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

/// Per-sender nonce state. Each sender (audio or video) owns one; the
/// counter is pre-incremented so the first packet of a session carries
/// counter 1.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(crate) struct CryptoState {
    nonce: Wrapping<u32>,
}

impl CryptoState {
    pub(crate) fn next_nonce(&mut self) -> u32 {
        self.nonce += 1;
        self.nonce.0
    }
}

/// Fields recovered from a sealed packet's RTP header.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct RtpMeta {
    pub payload_type: RtpType,
    pub marker: bool,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    /// Clear trailing counter, surfaced for host-side replay policy.
    pub nonce_counter: u32,
    /// Extension words at the head of the plaintext, to skip before the
    /// media payload.
    pub extension_len: usize,
}

/// Reasons a packet failed to open. All are handled by dropping the packet.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum DecryptError {
    /// Shorter than header + tag + counter.
    TooSmall,
    /// Not an RTP v2 packet.
    BadHeader,
    /// Tag mismatch.
    Forged,
}

fn expand_nonce(counter: u32) -> XNonce {
    let mut bytes = [0u8; NONCE_SIZE];
    LittleEndian::write_u32(&mut bytes[..4], counter);
    XNonce::clone_from_slice(&bytes)
}

/// AAD length for a packet: the 12-byte header, CSRC words, and the 4-byte
/// extension header when the X bit is set. Extension *words* stay inside
/// the ciphertext.
fn aad_len(packet: &[u8]) -> usize {
    let csrc_count = (packet[0] & 0x0f) as usize;
    let has_extension = packet[0] & 0x10 != 0;

    RtpPacket::minimum_packet_size() + 4 * csrc_count + if has_extension { 4 } else { 0 }
}

/// Seals `packet`, which must hold `header_len` bytes of RTP header
/// followed by the plaintext payload. Appends tag and clear counter.
pub(crate) fn seal_in_place(
    cipher: &Cipher,
    packet: &mut Vec<u8>,
    header_len: usize,
    nonce_counter: u32,
) {
    let nonce = expand_nonce(nonce_counter);
    let (header, payload) = packet.split_at_mut(header_len);

    let tag = cipher
        .encrypt_in_place_detached(&nonce, header, payload)
        .expect("XChaCha20 accepts any payload under its length bound");

    packet.extend_from_slice(tag.as_slice());

    let mut tail = [0u8; NONCE_TAIL];
    LittleEndian::write_u32(&mut tail, nonce_counter);
    packet.extend_from_slice(&tail);
}

/// Opens a sealed packet in place, returning its RTP fields and the
/// plaintext region (extension words included; see
/// [`RtpMeta::extension_len`]).
pub(crate) fn open_in_place<'a>(
    cipher: &Cipher,
    packet: &'a mut [u8],
) -> Result<(RtpMeta, &'a [u8]), DecryptError> {
    let min_len = RtpPacket::minimum_packet_size() + PAYLOAD_OVERHEAD;
    if packet.len() < min_len {
        return Err(DecryptError::TooSmall);
    }

    let (version, meta) = {
        let rtp = RtpPacket::new(packet).ok_or(DecryptError::BadHeader)?;
        (
            rtp.get_version(),
            RtpMeta {
                payload_type: rtp.get_payload_type(),
                marker: rtp.get_marker() != 0,
                sequence: rtp.get_sequence().into(),
                timestamp: rtp.get_timestamp().into(),
                ssrc: rtp.get_ssrc(),
                nonce_counter: 0,
                extension_len: 0,
            },
        )
    };

    if version != crate::constants::RTP_VERSION {
        return Err(DecryptError::BadHeader);
    }

    let aad = aad_len(packet);
    if packet.len() < aad + PAYLOAD_OVERHEAD {
        return Err(DecryptError::TooSmall);
    }

    let extension_len = if packet[0] & 0x10 != 0 {
        // Length field of the extension header: words following it, which
        // were sealed along with the payload.
        4 * u16::from_be_bytes([packet[aad - 2], packet[aad - 1]]) as usize
    } else {
        0
    };

    let counter_at = packet.len() - NONCE_TAIL;
    let nonce_counter = LittleEndian::read_u32(&packet[counter_at..]);
    let nonce = expand_nonce(nonce_counter);

    let (header, body) = packet.split_at_mut(aad);
    let body_len = body.len() - NONCE_TAIL;
    let (sealed, _tail) = body.split_at_mut(body_len);
    let ct_len = sealed.len() - TAG_SIZE;
    let (ciphertext, tag_bytes) = sealed.split_at_mut(ct_len);
    let tag = Tag::from_slice(tag_bytes);

    cipher
        .decrypt_in_place_detached(&nonce, header, ciphertext, tag)
        .map_err(|_| DecryptError::Forged)?;

    if extension_len > ciphertext.len() {
        return Err(DecryptError::BadHeader);
    }

    let meta = RtpMeta {
        nonce_counter,
        extension_len,
        ..meta
    };

    Ok((meta, &packet[aad..aad + ct_len]))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::constants::*;
    use discortp::{rtp::MutableRtpPacket, MutablePacket};

    fn test_cipher() -> Cipher {
        Secret::try_from_slice(&[7u8; KEY_SIZE]).unwrap().cipher()
    }

    fn build_sealed(payload: &[u8], seq: u16, ts: u32, ssrc: u32, counter: u32) -> Vec<u8> {
        let header_len = RtpPacket::minimum_packet_size();
        let mut packet = vec![0u8; header_len + payload.len()];
        {
            let mut rtp = MutableRtpPacket::new(&mut packet).unwrap();
            rtp.set_version(RTP_VERSION);
            rtp.set_payload_type(RTP_AUDIO_TYPE);
            rtp.set_sequence(seq.into());
            rtp.set_timestamp(ts.into());
            rtp.set_ssrc(ssrc);
            rtp.payload_mut().copy_from_slice(payload);
        }

        seal_in_place(&test_cipher(), &mut packet, header_len, counter);
        packet
    }

    #[test]
    fn seal_open_round_trip() {
        let payload = [1u8, 2, 3, 4, 5, 6, 7, 8];
        let mut packet = build_sealed(&payload, 17, 960, 0xABCD_0000, 42);

        assert_eq!(
            packet.len(),
            RtpPacket::minimum_packet_size() + payload.len() + TAG_SIZE + NONCE_TAIL
        );

        let (meta, plaintext) = open_in_place(&test_cipher(), &mut packet).unwrap();
        assert_eq!(plaintext, &payload);
        assert_eq!(meta.sequence, 17);
        assert_eq!(meta.timestamp, 960);
        assert_eq!(meta.ssrc, 0xABCD_0000);
        assert_eq!(meta.nonce_counter, 42);
        assert_eq!(meta.payload_type, RTP_AUDIO_TYPE);
        assert_eq!(meta.extension_len, 0);
    }

    #[test]
    fn any_mutated_byte_fails_to_open() {
        let payload = [9u8; 24];
        let packet = build_sealed(&payload, 1, 0, 5, 1);

        for i in 0..packet.len() {
            let mut tampered = packet.clone();
            tampered[i] ^= 0x40;
            assert!(
                open_in_place(&test_cipher(), &mut tampered).is_err(),
                "byte {i} flipped yet packet opened",
            );
        }
    }

    #[test]
    fn wrong_key_fails_to_open() {
        let mut packet = build_sealed(&[1, 2, 3], 1, 0, 5, 1);
        let other = Secret::try_from_slice(&[8u8; KEY_SIZE]).unwrap().cipher();
        assert_eq!(open_in_place(&other, &mut packet), Err(DecryptError::Forged));
    }

    #[test]
    fn small_packet_errors_not_panics() {
        let cipher = test_cipher();
        for len in 0..RtpPacket::minimum_packet_size() + PAYLOAD_OVERHEAD {
            let mut buf = vec![0x80u8; len];
            assert!(open_in_place(&cipher, &mut buf).is_err());
        }
    }

    #[test]
    fn extension_header_joins_the_aad() {
        let header_len = RtpPacket::minimum_packet_size() + 4;
        // One extension word: stays inside the ciphertext.
        let ext_words = [0xAAu8, 0xBB, 0xCC, 0xDD];
        let media = [1u8, 2, 3];

        let mut packet = vec![0u8; header_len + ext_words.len() + media.len()];
        {
            let mut rtp = MutableRtpPacket::new(&mut packet).unwrap();
            rtp.set_version(RTP_VERSION);
            rtp.set_payload_type(RTP_AUDIO_TYPE);
            rtp.set_sequence(3u16.into());
            rtp.set_timestamp(30u32.into());
            rtp.set_ssrc(77);
        }
        packet[0] |= 0x10; // X bit
        // Extension header: profile 0xBEDE, length 1.
        packet[12..16].copy_from_slice(&[0xBE, 0xDE, 0x00, 0x01]);
        packet[16..20].copy_from_slice(&ext_words);
        packet[20..23].copy_from_slice(&media);

        seal_in_place(&test_cipher(), &mut packet, header_len, 9);

        let (meta, plaintext) = open_in_place(&test_cipher(), &mut packet).unwrap();
        assert_eq!(meta.extension_len, 4);
        assert_eq!(&plaintext[..4], &ext_words);
        assert_eq!(&plaintext[meta.extension_len..], &media);
    }

    #[test]
    fn nonce_counters_pre_increment_from_one() {
        let mut state = CryptoState::default();
        assert_eq!(state.next_nonce(), 1);
        assert_eq!(state.next_nonce(), 2);
        assert_eq!(state.next_nonce(), 3);
    }

    #[test]
    fn secret_rejects_bad_lengths() {
        assert!(Secret::try_from_slice(&[0u8; 31]).is_none());
        assert!(Secret::try_from_slice(&[0u8; 33]).is_none());
        assert!(Secret::try_from_slice(&[0u8; KEY_SIZE]).is_some());
    }

    #[test]
    fn secret_debug_is_redacted() {
        let secret = Secret::try_from_slice(&[3u8; KEY_SIZE]).unwrap();
        assert_eq!(format!("{secret:?}"), "Secret(<redacted>)");
    }
}
