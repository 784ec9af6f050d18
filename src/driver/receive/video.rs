//! RTP → H.264 access unit reassembly (RFC 6184).
//!
//! Packets are fed post-decryption with their parsed RTP fields. The
//! accumulator is keyed by RTP timestamp: a timestamp change or a marker
//! bit flushes one Annex-B access unit to the frame sink. Reassembly is
//! best-effort; out-of-order fragments are not reordered.

use crate::driver::crypto::RtpMeta;
use tracing::trace;

/// Start code prefixed to every NAL placed in the accumulator.
const START_CODE: [u8; 4] = [0, 0, 0, 1];

const STAP_A_TYPE: u8 = 24;
const FU_A_TYPE: u8 = 28;

pub(crate) type FrameSink = Box<dyn FnMut(&[u8], u32) + Send>;

/// Rebuilds access units for a single video SSRC.
pub(crate) struct VideoRtpReceiver {
    video_ssrc: u32,
    current_timestamp: Option<u32>,
    frame: Vec<u8>,
    fua: Vec<u8>,
    fua_active: bool,
    sink: FrameSink,
}

impl VideoRtpReceiver {
    pub(crate) fn new(video_ssrc: u32, sink: FrameSink) -> Self {
        Self {
            video_ssrc,
            current_timestamp: None,
            frame: Vec::new(),
            fua: Vec::new(),
            fua_active: false,
            sink,
        }
    }

    /// The SSRC this receiver reassembles.
    pub(crate) fn ssrc(&self) -> u32 {
        self.video_ssrc
    }

    /// Feeds one decrypted packet. Non-matching SSRCs are ignored.
    pub(crate) fn feed(&mut self, meta: &RtpMeta, payload: &[u8]) {
        if meta.ssrc != self.video_ssrc {
            return;
        }

        // A new timestamp closes the previous access unit.
        if let Some(current) = self.current_timestamp {
            if current != meta.timestamp {
                self.flush(current);
            }
        }
        self.current_timestamp = Some(meta.timestamp);

        self.process_payload(payload);

        if meta.marker {
            self.flush(meta.timestamp);
        }
    }

    fn process_payload(&mut self, payload: &[u8]) {
        let Some(&first) = payload.first() else {
            return;
        };

        match first & 0x1f {
            1..=23 => {
                self.frame.extend_from_slice(&START_CODE);
                self.frame.extend_from_slice(payload);
            },
            STAP_A_TYPE => self.process_stap_a(&payload[1..]),
            FU_A_TYPE => self.process_fu_a(payload),
            other => {
                trace!("Dropping unhandled NAL payload type {other}.");
            },
        }
    }

    /// STAP-A: `[size u16 BE][nal bytes]` repeated until exhausted. A size
    /// overrunning the packet drops the remainder.
    fn process_stap_a(&mut self, mut rest: &[u8]) {
        while rest.len() >= 2 {
            let size = u16::from_be_bytes([rest[0], rest[1]]) as usize;
            rest = &rest[2..];

            if size == 0 || size > rest.len() {
                break;
            }

            self.frame.extend_from_slice(&START_CODE);
            self.frame.extend_from_slice(&rest[..size]);
            rest = &rest[size..];
        }
    }

    fn process_fu_a(&mut self, payload: &[u8]) {
        if payload.len() < 2 {
            return;
        }

        let fu_header = payload[1];
        let start = fu_header & 0x80 != 0;
        let end = fu_header & 0x40 != 0;

        if start {
            self.fua.clear();
            self.fua_active = true;
            // Re-synthesize the original NAL header from indicator NRI bits
            // and the fragmented type.
            self.fua.push((payload[0] & 0xe0) | (fu_header & 0x1f));
        }

        // An end (or middle) without a prior start has lost its header:
        // the whole NAL is unrecoverable.
        if !self.fua_active {
            return;
        }

        self.fua.extend_from_slice(&payload[2..]);

        if end {
            self.frame.extend_from_slice(&START_CODE);
            self.frame.append(&mut self.fua);
            self.fua_active = false;
        }
    }

    fn flush(&mut self, timestamp: u32) {
        if self.frame.is_empty() {
            return;
        }

        (self.sink)(&self.frame, timestamp);
        self.frame.clear();
        self.current_timestamp = None;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::constants::*;
    use std::sync::{Arc, Mutex};

    const SSRC: u32 = 0xABCD_0001;

    fn meta(timestamp: u32, marker: bool) -> RtpMeta {
        RtpMeta {
            payload_type: RTP_VIDEO_TYPE,
            marker,
            sequence: 0,
            timestamp,
            ssrc: SSRC,
            nonce_counter: 0,
            extension_len: 0,
        }
    }

    fn receiver() -> (VideoRtpReceiver, Arc<Mutex<Vec<(Vec<u8>, u32)>>>) {
        let frames = Arc::new(Mutex::new(Vec::new()));
        let sink = frames.clone();
        let rx = VideoRtpReceiver::new(
            SSRC,
            Box::new(move |data, ts| sink.lock().unwrap().push((data.to_vec(), ts))),
        );
        (rx, frames)
    }

    fn with_start_code(nal: &[u8]) -> Vec<u8> {
        let mut out = START_CODE.to_vec();
        out.extend_from_slice(nal);
        out
    }

    #[test]
    fn single_nal_flushes_on_marker() {
        let (mut rx, frames) = receiver();
        let nal = [0x65u8, 1, 2, 3];

        rx.feed(&meta(9000, true), &nal);

        let frames = frames.lock().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].0, with_start_code(&nal));
        assert_eq!(frames[0].1, 9000);
    }

    #[test]
    fn timestamp_change_flushes_previous_unit() {
        let (mut rx, frames) = receiver();

        rx.feed(&meta(9000, false), &[0x61, 0xAA]);
        assert!(frames.lock().unwrap().is_empty());

        rx.feed(&meta(12000, false), &[0x61, 0xBB]);

        let snapshot = frames.lock().unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].0, with_start_code(&[0x61, 0xAA]));
        assert_eq!(snapshot[0].1, 9000);
    }

    #[test]
    fn fu_a_reassembles_across_fragments() {
        let (mut rx, frames) = receiver();

        // Original NAL: header 0x65 + 5 payload bytes, split 2/2/1.
        let indicator = (0x65 & 0xe0) | 28;
        rx.feed(&meta(9000, false), &[indicator, 0x80 | 0x05, 1, 2]);
        rx.feed(&meta(9000, false), &[indicator, 0x05, 3, 4]);
        rx.feed(&meta(9000, true), &[indicator, 0x40 | 0x05, 5]);

        let snapshot = frames.lock().unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].0, with_start_code(&[0x65, 1, 2, 3, 4, 5]));
    }

    #[test]
    fn fu_a_end_without_start_is_discarded() {
        let (mut rx, frames) = receiver();

        let indicator = (0x65 & 0xe0) | 28;
        rx.feed(&meta(9000, false), &[indicator, 0x05, 3, 4]);
        rx.feed(&meta(9000, true), &[indicator, 0x40 | 0x05, 5]);

        assert!(frames.lock().unwrap().is_empty());
    }

    #[test]
    fn stap_a_splits_into_start_coded_nals() {
        let (mut rx, frames) = receiver();

        let mut payload = vec![STAP_A_TYPE];
        payload.extend_from_slice(&[0, 2, 0x67, 0x42]);
        payload.extend_from_slice(&[0, 3, 0x68, 0xCE, 0x3C]);

        rx.feed(&meta(9000, true), &payload);

        let snapshot = frames.lock().unwrap();
        assert_eq!(snapshot.len(), 1);

        let mut expected = with_start_code(&[0x67, 0x42]);
        expected.extend_from_slice(&with_start_code(&[0x68, 0xCE, 0x3C]));
        assert_eq!(snapshot[0].0, expected);
    }

    #[test]
    fn stap_a_size_overrun_drops_the_remainder() {
        let (mut rx, frames) = receiver();

        let mut payload = vec![STAP_A_TYPE];
        payload.extend_from_slice(&[0, 2, 0x67, 0x42]);
        payload.extend_from_slice(&[0, 9, 0x68]); // claims 9, has 1

        rx.feed(&meta(9000, true), &payload);

        let snapshot = frames.lock().unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].0, with_start_code(&[0x67, 0x42]));
    }

    #[test]
    fn other_ssrcs_are_ignored() {
        let (mut rx, frames) = receiver();

        let mut foreign = meta(9000, true);
        foreign.ssrc = SSRC + 5;
        rx.feed(&foreign, &[0x65, 1, 2]);

        assert!(frames.lock().unwrap().is_empty());
    }

    #[test]
    fn mixed_unit_reassembles_to_one_annex_b_stream() {
        // Property 4: single + STAP-A + FU-A under one timestamp with a
        // trailing marker produce exactly one access unit.
        let (mut rx, frames) = receiver();

        rx.feed(&meta(9000, false), &[0x67, 0x42, 0x00]);

        let mut stap = vec![STAP_A_TYPE];
        stap.extend_from_slice(&[0, 2, 0x68, 0xCE]);
        rx.feed(&meta(9000, false), &stap);

        let indicator = (0x65 & 0xe0) | 28;
        rx.feed(&meta(9000, false), &[indicator, 0x85, 0xDE, 0xAD]);
        rx.feed(&meta(9000, true), &[indicator, 0x45, 0xBE, 0xEF]);

        let snapshot = frames.lock().unwrap();
        assert_eq!(snapshot.len(), 1);

        let mut expected = with_start_code(&[0x67, 0x42, 0x00]);
        expected.extend_from_slice(&with_start_code(&[0x68, 0xCE]));
        expected.extend_from_slice(&with_start_code(&[0x65, 0xDE, 0xAD, 0xBE, 0xEF]));
        assert_eq!(snapshot[0].0, expected);
    }
}
